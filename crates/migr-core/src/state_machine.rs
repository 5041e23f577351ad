//! Step lifecycle
//!
//! ```text
//! Pending -> Skipped
//! Pending -> Dispatching -> Confirmed -> Verifying -> Applied | VerificationFailed
//! Pending -> Dispatching -> AwaitingManualConfirmation -> Confirmed -> ...
//! Pending -> Verifying                       (steps without a transaction)
//! ```

use crate::error::StateMachineError;
use crate::journal::RunJournal;
use crate::types::StepState;
use std::sync::Arc;

/// Validates a state transition.
///
/// # Errors
/// Returns `IllegalTransition` for any edge not in the lifecycle graph
pub fn validate_transition(from: StepState, to: StepState) -> Result<(), StateMachineError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(StateMachineError::IllegalTransition { from, to })
    }
}

/// States reachable from `from` in one transition
#[must_use]
pub fn allowed_transitions(from: StepState) -> Vec<StepState> {
    use StepState::*;
    match from {
        Pending => vec![Skipped, Dispatching, AwaitingManualConfirmation, Verifying],
        Dispatching => vec![Confirmed, AwaitingManualConfirmation],
        AwaitingManualConfirmation => vec![Confirmed],
        Confirmed => vec![Verifying],
        Verifying => vec![Applied, VerificationFailed],
        Skipped | Applied | VerificationFailed => vec![],
    }
}

/// Tracks one step (or sub-step) through its lifecycle, journaling each move
#[derive(Debug)]
pub struct StepTracker {
    step: u64,
    label: String,
    state: StepState,
    journal: Arc<RunJournal>,
}

impl StepTracker {
    /// Start tracking in `Pending`
    #[must_use]
    pub fn new(step: u64, label: impl Into<String>, journal: Arc<RunJournal>) -> Self {
        Self {
            step,
            label: label.into(),
            state: StepState::Pending,
            journal,
        }
    }

    /// Step number
    #[inline]
    #[must_use]
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Label used in logs
    #[inline]
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn state(&self) -> StepState {
        self.state
    }

    /// Move to `to`, recording the transition
    ///
    /// # Errors
    /// Returns `IllegalTransition` without changing state
    pub fn advance(&mut self, to: StepState, detail: &str) -> Result<(), StateMachineError> {
        validate_transition(self.state, to)?;
        self.journal.record(self.step, &self.label, self.state, to, detail);
        tracing::debug!(label = %self.label, from = ?self.state, to = ?to, %detail, "step transition");
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn live_path_is_allowed() {
        let journal = Arc::new(RunJournal::new());
        let mut tracker = StepTracker::new(1, "step 1", journal.clone());
        for to in [
            StepState::Dispatching,
            StepState::Confirmed,
            StepState::Verifying,
            StepState::Applied,
        ] {
            tracker.advance(to, "").unwrap();
        }
        assert_eq!(tracker.state(), StepState::Applied);
        assert_eq!(journal.len(), 4);
    }

    #[test]
    fn manual_path_is_allowed() {
        let mut tracker = StepTracker::new(2, "step 2", Arc::new(RunJournal::new()));
        for to in [
            StepState::Dispatching,
            StepState::AwaitingManualConfirmation,
            StepState::Confirmed,
            StepState::Verifying,
            StepState::VerificationFailed,
        ] {
            tracker.advance(to, "").unwrap();
        }
        assert!(tracker.state().is_terminal());
    }

    #[test]
    fn illegal_transition_leaves_state_and_journal_untouched() {
        let journal = Arc::new(RunJournal::new());
        let mut tracker = StepTracker::new(1, "step 1", journal.clone());

        let err = tracker.advance(StepState::Applied, "").unwrap_err();
        assert_eq!(
            err,
            StateMachineError::IllegalTransition {
                from: StepState::Pending,
                to: StepState::Applied
            }
        );
        assert_eq!(tracker.state(), StepState::Pending);
        assert!(journal.is_empty());
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for state in StepState::ALL {
            assert_eq!(state.is_terminal(), allowed_transitions(state).is_empty());
        }
    }

    proptest! {
        #[test]
        fn prop_validate_matches_allowed(
            from in proptest::sample::select(StepState::ALL.to_vec()),
            to in proptest::sample::select(StepState::ALL.to_vec()),
        ) {
            let res = validate_transition(from, to);
            prop_assert_eq!(res.is_ok(), allowed_transitions(from).contains(&to));
        }
    }
}
