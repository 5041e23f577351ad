//! Run journal
//!
//! Append-only record of every step state transition. Each entry carries
//! the SHA-256 of its predecessor so edits after the fact are detectable.

use crate::error::JournalError;
use crate::types::StepState;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// One recorded transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Position in the journal, from 0
    pub seq: u64,
    /// Wall-clock time of the transition
    pub timestamp: DateTime<Utc>,
    /// Step number
    pub step: u64,
    /// Step or sub-step label
    pub label: String,
    /// Previous state
    pub from: StepState,
    /// New state
    pub to: StepState,
    /// Free-form detail (tx hash, failing check, skip reason)
    pub detail: String,
    /// Hash of the previous entry
    #[serde(with = "hex::serde")]
    pub prev_hash: [u8; 32],
    /// Hash of this entry
    #[serde(with = "hex::serde")]
    pub hash: [u8; 32],
}

/// Hash-chained transition log
#[derive(Debug, Default)]
pub struct RunJournal {
    inner: Mutex<Vec<JournalEntry>>,
}

impl RunJournal {
    /// Empty journal
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transition, returning its sequence number
    pub fn record(&self, step: u64, label: &str, from: StepState, to: StepState, detail: &str) -> u64 {
        let mut guard = self.inner.lock();
        let prev_hash = guard.last().map_or([0u8; 32], |e| e.hash);
        let mut entry = JournalEntry {
            seq: guard.len() as u64,
            timestamp: Utc::now(),
            step,
            label: label.to_string(),
            from,
            to,
            detail: detail.to_string(),
            prev_hash,
            hash: [0u8; 32],
        };
        entry.hash = compute_hash(&entry);
        let seq = entry.seq;
        guard.push(entry);
        seq
    }

    /// Snapshot of all entries
    #[must_use]
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.inner.lock().clone()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Check if nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Check the hash chain
    ///
    /// # Errors
    /// Returns `IntegrityViolation` with the first entry that does not verify
    pub fn verify_integrity(&self) -> Result<(), JournalError> {
        verify_entries(&self.inner.lock())
    }

    /// Write all entries as pretty JSON
    ///
    /// # Errors
    /// Returns `JournalError::Io` if the file cannot be written
    pub fn write_json(&self, path: &Path) -> Result<(), JournalError> {
        let json = serde_json::to_string_pretty(&self.entries())
            .map_err(|e| JournalError::Io(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| JournalError::Io(format!("{}: {e}", path.display())))
    }
}

/// Check the hash chain of a list of entries
///
/// # Errors
/// Returns `IntegrityViolation` with the first entry that does not verify
pub fn verify_entries(entries: &[JournalEntry]) -> Result<(), JournalError> {
    let mut prev = [0u8; 32];
    for entry in entries {
        if entry.prev_hash != prev || entry.hash != compute_hash(entry) {
            return Err(JournalError::IntegrityViolation(entry.seq));
        }
        prev = entry.hash;
    }
    Ok(())
}

fn compute_hash(entry: &JournalEntry) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(entry.seq.to_le_bytes());
    hasher.update(entry.timestamp.timestamp_micros().to_le_bytes());
    hasher.update(entry.step.to_le_bytes());
    update_field(&mut hasher, entry.label.as_bytes());
    update_field(&mut hasher, format!("{:?}", entry.from).as_bytes());
    update_field(&mut hasher, format!("{:?}", entry.to).as_bytes());
    update_field(&mut hasher, entry.detail.as_bytes());
    hasher.update(entry.prev_hash);
    hasher.finalize().into()
}

/// Length-prefixed so no field boundary can shift into a neighbour
fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
