//! Core value types for migration runs

use crate::error::VerificationFailure;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// How transactions reach the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// The local signer is the controller and submits directly
    Live,
    /// Transactions are rendered for an out-of-band signer
    Manual,
}

impl ExecutionMode {
    /// Check if transactions are submitted directly
    #[inline]
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }
}

impl Display for ExecutionMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Lifecycle state of a single step within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    /// Not yet examined
    Pending,
    /// Not run; already applied or not reached
    Skipped,
    /// Transaction being submitted
    Dispatching,
    /// Rendered; waiting on the external signer
    AwaitingManualConfirmation,
    /// Completion predicate observed on-chain
    Confirmed,
    /// Post-conditions being checked
    Verifying,
    /// Applied and verified
    Applied,
    /// A post-condition did not hold
    VerificationFailed,
}

impl StepState {
    /// All states, in lifecycle order
    pub const ALL: [StepState; 8] = [
        Self::Pending,
        Self::Skipped,
        Self::Dispatching,
        Self::AwaitingManualConfirmation,
        Self::Confirmed,
        Self::Verifying,
        Self::Applied,
        Self::VerificationFailed,
    ];

    /// Check if no further transitions are possible
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Skipped | Self::Applied | Self::VerificationFailed
        )
    }
}

/// Why a step was not run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Pointer is past the step, or its idempotency check holds
    AlreadyApplied,
    /// Pointer has not reached the step yet
    NotReached,
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyApplied => write!(f, "already applied"),
            Self::NotReached => write!(f, "not reached"),
        }
    }
}

/// Result of running one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    /// Nothing was sent
    Skipped {
        /// Why
        reason: SkipReason,
    },
    /// Confirmed and verified
    Applied,
    /// Rendered for manual signing; completion not yet observed
    AwaitingManualConfirmation,
    /// Confirmed but a post-condition failed
    VerificationFailed {
        /// First failing predicate
        failure: VerificationFailure,
    },
}

impl StepOutcome {
    /// Skipped with the given reason
    #[inline]
    #[must_use]
    pub fn skipped(reason: SkipReason) -> Self {
        Self::Skipped { reason }
    }

    /// Check if the step is applied on-chain, either now or earlier
    #[inline]
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Self::Applied
                | Self::Skipped {
                    reason: SkipReason::AlreadyApplied
                }
        )
    }
}

impl Display for StepOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped { reason } => write!(f, "skipped ({reason})"),
            Self::Applied => write!(f, "applied"),
            Self::AwaitingManualConfirmation => write!(f, "awaiting manual confirmation"),
            Self::VerificationFailed { failure } => write!(f, "verification failed: {failure}"),
        }
    }
}

/// Outcome of one step within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// Step number
    pub step: u64,
    /// Step description
    pub description: String,
    /// What happened
    pub outcome: StepOutcome,
}

/// Final status of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// Every step is applied
    Complete,
    /// Stopped at a step rendered for manual signing
    AwaitingManualConfirmation {
        /// First unresolved step
        step: u64,
    },
    /// Pointer has not reached a step, so nothing after it can run
    Blocked {
        /// First unreachable step
        step: u64,
        /// Pointer value observed
        pointer: u64,
    },
    /// Stopped on a failed post-condition
    VerificationFailed {
        /// Failing step
        step: u64,
        /// First failing predicate
        failure: VerificationFailure,
    },
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => write!(f, "all steps applied"),
            Self::AwaitingManualConfirmation { step } => {
                write!(f, "step {step} awaiting manual confirmation")
            }
            Self::Blocked { step, pointer } => {
                write!(f, "step {step} not reached (control pointer at {pointer})")
            }
            Self::VerificationFailed { step, failure } => {
                write!(f, "step {step} failed verification: {failure}")
            }
        }
    }
}

/// Everything a run produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Mode the run executed in
    pub mode: ExecutionMode,
    /// Per-step reports, in plan order, up to the step the run stopped at
    pub reports: Vec<StepReport>,
    /// Final status
    pub status: RunStatus,
}

impl RunSummary {
    /// Check if every step is applied
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self.status, RunStatus::Complete)
    }

    /// Report for a given step, if the run got that far
    #[must_use]
    pub fn report(&self, step: u64) -> Option<&StepReport> {
        self.reports.iter().find(|r| r.step == step)
    }
}

/// Read-only view of a step for status output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStatus {
    /// Step number
    pub step: u64,
    /// Step description
    pub description: String,
    /// Applied on-chain according to the pointer or idempotency check
    pub applied: bool,
    /// The step is the next one the pointer allows
    pub current: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settled_outcomes() {
        assert!(StepOutcome::Applied.is_settled());
        assert!(StepOutcome::skipped(SkipReason::AlreadyApplied).is_settled());
        assert!(!StepOutcome::skipped(SkipReason::NotReached).is_settled());
        assert!(!StepOutcome::AwaitingManualConfirmation.is_settled());
    }

    #[test]
    fn terminal_states() {
        let terminal: Vec<_> = StepState::ALL.iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(
            terminal,
            vec![
                &StepState::Skipped,
                &StepState::Applied,
                &StepState::VerificationFailed
            ]
        );
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let json = serde_json::to_value(StepOutcome::skipped(SkipReason::NotReached)).unwrap();
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["reason"], "not_reached");
    }

    #[test]
    fn mode_display() {
        assert_eq!(ExecutionMode::Live.to_string(), "live");
        assert_eq!(ExecutionMode::Manual.to_string(), "manual");
    }
}
