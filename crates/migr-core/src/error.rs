//! Error types for the migration orchestrator
//!
//! Three operator-facing failure kinds abort a run:
//! - Dispatch failures (submission rejected, reverted, unauthorized)
//! - Confirmation timeouts in live mode
//! - Configuration errors, raised before any transaction is attempted
//!
//! Post-step verification failures are not errors; they end the run with
//! [`RunStatus::VerificationFailed`](crate::RunStatus::VerificationFailed).

use crate::types::StepState;
use migr_chain::{AbiError, Address, ChainError, B256};
use std::time::Duration;

/// Main orchestrator error type
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Configuration missing or invalid
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Transaction could not be dispatched
    #[error("step {step}: dispatch failed: {source}")]
    Dispatch {
        /// Step being dispatched
        step: u64,
        /// Underlying failure
        #[source]
        source: DispatchError,
    },

    /// Live confirmation never arrived
    #[error("step {step}: {what} not confirmed: {source}")]
    Timeout {
        /// Step being confirmed
        step: u64,
        /// What was awaited
        what: String,
        /// Poller failure
        #[source]
        source: PollError,
    },

    /// Chain read failed outside of a polling loop
    #[error("step {step}: chain error: {source}")]
    Chain {
        /// Step being processed (0 before any step starts)
        step: u64,
        /// Underlying chain failure
        #[source]
        source: ChainError,
    },

    /// Internal state machine misuse
    #[error("state machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    /// Journal failure
    #[error("journal error: {0}")]
    Journal(#[from] JournalError),
}

impl MigrationError {
    /// Wrap a chain error with the step it occurred in
    #[inline]
    #[must_use]
    pub fn chain(step: u64, source: ChainError) -> Self {
        Self::Chain { step, source }
    }

    /// Step the error refers to, if any
    #[must_use]
    pub fn step(&self) -> Option<u64> {
        match self {
            Self::Dispatch { step, .. }
            | Self::Timeout { step, .. }
            | Self::Chain { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Whether re-running the same command may succeed without changes
    ///
    /// Timeouts and unreachable nodes qualify: a rerun re-reads the pointer
    /// and resumes where the chain is.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Chain { .. } | Self::Dispatch { source: DispatchError::Transport(_), .. }
        )
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read {path}: {message}")]
    Io {
        /// File path
        path: String,
        /// OS error text
        message: String,
    },

    /// Config file could not be parsed
    #[error("cannot parse config: {0}")]
    Parse(String),

    /// Required value absent
    #[error("missing required value `{0}`")]
    Missing(String),

    /// Value present but invalid
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        /// Offending field
        field: String,
        /// Why it is invalid
        reason: String,
    },

    /// Address reference is neither a literal nor a known name
    #[error("unknown address reference `{0}`")]
    UnknownAddress(String),

    /// Step numbering violates plan ordering
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// Step number not present in the plan
    #[error("step {0} is not part of the plan")]
    UnknownStep(u64),

    /// Reference block could not be fetched
    #[error("cannot fetch block tag {0}")]
    UnresolvableBlock(String),

    /// ABI problem in a configured call
    #[error("abi error in `{context}`: {source}")]
    Abi {
        /// Where the call was configured
        context: String,
        /// Codec failure
        #[source]
        source: AbiError,
    },

    /// No bytecode at a configured contract address
    #[error("no contract deployed for `{name}` at {address}")]
    NotDeployed {
        /// Configured name
        name: String,
        /// Resolved address
        address: Address,
    },

    /// Configured network does not match the node
    #[error("node reports chain id {actual}, configuration expects {expected}")]
    ChainMismatch {
        /// Configured chain id
        expected: u64,
        /// Chain id reported by the node
        actual: u64,
    },
}

impl ConfigError {
    /// Build an `Invalid` error
    #[inline]
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Wrap an ABI error with its configuration context
    #[inline]
    pub fn abi(context: impl Into<String>, source: AbiError) -> Self {
        Self::Abi {
            context: context.into(),
            source,
        }
    }
}

/// Dispatch errors
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Node rejected the submission
    #[error("submission rejected: {0}")]
    Rejected(ChainError),

    /// Submission could not reach the node
    #[error("transport failure: {0}")]
    Transport(ChainError),

    /// Transaction mined but reverted
    #[error("transaction {tx_hash} reverted")]
    Reverted {
        /// Mined transaction
        tx_hash: B256,
    },
}

impl From<ChainError> for DispatchError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Transport(_) => Self::Transport(err),
            other => Self::Rejected(other),
        }
    }
}

/// Errors while deriving a step's transaction from chain state
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Chain read failed
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// Configuration cannot produce a valid call
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ResolveError {
    /// Attach the step being resolved
    #[must_use]
    pub fn at_step(self, step: u64) -> MigrationError {
        match self {
            Self::Chain(source) => MigrationError::Chain { step, source },
            Self::Config(e) => MigrationError::Config(e),
        }
    }
}

/// Condition poller errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    /// Predicate never held within the timeout
    #[error("timed out after {waited:?} ({attempts} attempts){}", last_error.as_ref().map(|e| format!(", last error: {e}")).unwrap_or_default())]
    TimedOut {
        /// Time spent waiting
        waited: Duration,
        /// Predicate evaluations performed
        attempts: u32,
        /// Most recent predicate error, if the last attempts failed
        last_error: Option<String>,
    },
}

/// A failed verification predicate
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, thiserror::Error)]
#[error("{check}: expected {expected}, got {actual}")]
pub struct VerificationFailure {
    /// Predicate description
    pub check: String,
    /// Expected value
    pub expected: String,
    /// Observed value
    pub actual: String,
}

/// State machine errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    /// Transition not in the allowed graph
    #[error("illegal transition {from:?} -> {to:?}")]
    IllegalTransition {
        /// Current state
        from: StepState,
        /// Requested state
        to: StepState,
    },
}

/// Run journal errors
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// Hash chain does not verify
    #[error("journal integrity violation at entry {0}")]
    IntegrityViolation(u64),

    /// Journal could not be written
    #[error("cannot write journal: {0}")]
    Io(String),
}
