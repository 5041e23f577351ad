//! Step state machine
//!
//! Runs a single step: checks the on-chain pointer and idempotency checks,
//! runs pre-steps, dispatches the action through the configured channel,
//! waits for completion, and verifies post-conditions.

use crate::control::ControlContract;
use crate::dispatch::{ArtifactSink, DispatchResult, Dispatcher};
use crate::error::{DispatchError, MigrationError};
use crate::journal::RunJournal;
use crate::poller::{await_condition, await_value, PollPolicy};
use crate::state_machine::StepTracker;
use crate::step::{Step, SubStep};
use crate::types::{ExecutionMode, SkipReason, StepOutcome, StepState};
use crate::verify::{verify, Predicate};
use migr_chain::{ChainClient, TransactionIntent};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::Instrument;

/// Polling bounds for the two confirmation paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    /// Receipt and completion waits after direct submission
    pub live: PollPolicy,
    /// Completion wait after rendering for manual signing
    pub manual: PollPolicy,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            live: PollPolicy::bounded(
                crate::poller::DEFAULT_POLL_INTERVAL,
                std::time::Duration::from_secs(1800),
            ),
            manual: PollPolicy::default(),
        }
    }
}

enum Confirmation {
    Confirmed,
    Pending,
}

/// Executes steps against one chain through one dispatch channel
pub struct StepMachine {
    chain: Arc<dyn ChainClient>,
    dispatcher: Arc<dyn Dispatcher>,
    control: ControlContract,
    policy: ConfirmationPolicy,
    journal: Arc<RunJournal>,
    sink: Arc<dyn ArtifactSink>,
}

impl StepMachine {
    /// Create a machine
    #[must_use]
    pub fn new(
        chain: Arc<dyn ChainClient>,
        dispatcher: Arc<dyn Dispatcher>,
        control: ControlContract,
        policy: ConfirmationPolicy,
        journal: Arc<RunJournal>,
        sink: Arc<dyn ArtifactSink>,
    ) -> Self {
        Self {
            chain,
            dispatcher,
            control,
            policy,
            journal,
            sink,
        }
    }

    /// Mode of the dispatch channel
    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.dispatcher.mode()
    }

    /// Control contract handle
    #[must_use]
    pub fn control(&self) -> &ControlContract {
        &self.control
    }

    /// Chain client
    #[must_use]
    pub fn chain(&self) -> &Arc<dyn ChainClient> {
        &self.chain
    }

    /// Journal of every transition made by this machine
    #[must_use]
    pub fn journal(&self) -> &Arc<RunJournal> {
        &self.journal
    }

    /// Read the control pointer
    ///
    /// # Errors
    /// Chain failures, attributed to `step`
    pub async fn pointer(&self, step: u64) -> Result<u64, MigrationError> {
        self.control
            .read_pointer(self.chain.as_ref())
            .await
            .map_err(|e| MigrationError::chain(step, e))
    }

    /// Run one step
    ///
    /// # Errors
    /// Dispatch failures, live confirmation timeouts, chain read failures,
    /// and configuration problems surfaced while resolving the action.
    /// Verification failures are an outcome, not an error.
    pub async fn run_step(&self, step: &Step) -> Result<StepOutcome, MigrationError> {
        let span = tracing::info_span!("step", step = step.number);
        self.run_step_inner(step).instrument(span).await
    }

    async fn run_step_inner(&self, step: &Step) -> Result<StepOutcome, MigrationError> {
        let number = step.number;
        let mut tracker = StepTracker::new(number, step.label(), self.journal.clone());

        let pointer = self.pointer(number).await?;
        let skip = match pointer.cmp(&number) {
            Ordering::Less => Some(SkipReason::NotReached),
            Ordering::Greater => Some(SkipReason::AlreadyApplied),
            Ordering::Equal => match &step.applied_when {
                Some(check) if self.holds(number, check.as_ref()).await? => Some(SkipReason::AlreadyApplied),
                _ => None,
            },
        };
        if let Some(reason) = skip {
            tracker.advance(StepState::Skipped, &format!("{reason} (pointer {pointer})"))?;
            match reason {
                SkipReason::NotReached => tracing::warn!(pointer, "step not reached"),
                SkipReason::AlreadyApplied => tracing::info!(pointer, "step already applied"),
            }
            return Ok(StepOutcome::skipped(reason));
        }

        tracing::info!(description = %step.description, mode = %self.mode(), "running step");

        for (index, pre) in step.pre.iter().enumerate() {
            match self.run_sub_step(number, index + 1, pre).await? {
                StepOutcome::AwaitingManualConfirmation => {
                    tracker.advance(StepState::AwaitingManualConfirmation, &format!("pre-step {}", index + 1))?;
                    return Ok(StepOutcome::AwaitingManualConfirmation);
                }
                failed @ StepOutcome::VerificationFailed { .. } => return Ok(failed),
                _ => {}
            }
        }

        let intent = step
            .action
            .intent(self.chain.as_ref(), self.mode())
            .await
            .map_err(|e| e.at_step(number))?;
        let default_completion;
        let completion = match &step.completion {
            Some(predicate) => predicate.as_ref(),
            None => {
                default_completion = self.control.pointer_past(number);
                default_completion.as_ref()
            }
        };

        let outcome = self.settle(&mut tracker, intent, completion, &step.checks).await?;
        tracing::info!(%outcome, "step finished");
        Ok(outcome)
    }

    async fn run_sub_step(&self, step: u64, index: usize, sub: &SubStep) -> Result<StepOutcome, MigrationError> {
        let label = format!("step {step} pre {index}: {}", sub.description);
        let mut tracker = StepTracker::new(step, label.clone(), self.journal.clone());

        if self.holds(step, sub.applied_when.as_ref()).await? {
            tracker.advance(StepState::Skipped, "already applied")?;
            tracing::info!(pre = %sub.description, "pre-step already applied");
            return Ok(StepOutcome::skipped(SkipReason::AlreadyApplied));
        }

        tracing::info!(pre = %sub.description, "running pre-step");
        let intent = sub
            .action
            .intent(self.chain.as_ref(), self.mode())
            .await
            .map_err(|e| e.at_step(step))?;
        self.settle(&mut tracker, intent, sub.applied_when.as_ref(), &sub.checks)
            .await
    }

    /// Dispatch (if there is anything to send), wait, and verify
    async fn settle(
        &self,
        tracker: &mut StepTracker,
        intent: Option<TransactionIntent>,
        completion: &dyn Predicate,
        checks: &[Arc<dyn Predicate>],
    ) -> Result<StepOutcome, MigrationError> {
        if let Some(intent) = intent {
            if let Confirmation::Pending = self.apply(tracker, &intent, completion).await? {
                return Ok(StepOutcome::AwaitingManualConfirmation);
            }
        }

        tracker.advance(StepState::Verifying, "")?;
        match verify(checks, self.chain.as_ref()).await {
            Ok(()) => {
                tracker.advance(StepState::Applied, "")?;
                Ok(StepOutcome::Applied)
            }
            Err(failure) => {
                tracing::error!(label = tracker.label(), %failure, "verification failed");
                tracker.advance(StepState::VerificationFailed, &failure.to_string())?;
                Ok(StepOutcome::VerificationFailed { failure })
            }
        }
    }

    async fn apply(
        &self,
        tracker: &mut StepTracker,
        intent: &TransactionIntent,
        completion: &dyn Predicate,
    ) -> Result<Confirmation, MigrationError> {
        let step = tracker.step();
        tracker.advance(StepState::Dispatching, &intent.description)?;

        let result = self
            .dispatcher
            .dispatch(intent)
            .await
            .map_err(|source| MigrationError::Dispatch { step, source })?;

        let chain = self.chain.as_ref();
        match result {
            DispatchResult::Submitted { tx_hash } => {
                let receipt = await_value(move || chain.transaction_receipt(tx_hash), &self.policy.live)
                    .await
                    .map_err(|source| MigrationError::Timeout {
                        step,
                        what: format!("receipt for {tx_hash}"),
                        source,
                    })?;
                if !receipt.success {
                    tracing::error!(%tx_hash, "transaction reverted");
                    return Err(MigrationError::Dispatch {
                        step,
                        source: DispatchError::Reverted { tx_hash },
                    });
                }

                await_condition(move || completion.holds(chain), &self.policy.live)
                    .await
                    .map_err(|source| MigrationError::Timeout {
                        step,
                        what: completion.describe(),
                        source,
                    })?;
                tracker.advance(StepState::Confirmed, &tx_hash.to_string())?;
                Ok(Confirmation::Confirmed)
            }
            DispatchResult::Rendered(artifact) => {
                self.sink.publish(tracker.label(), &artifact);
                tracker.advance(StepState::AwaitingManualConfirmation, &artifact.summary)?;
                tracing::info!(waiting_for = %completion.describe(), "awaiting manual confirmation");

                match await_condition(move || completion.holds(chain), &self.policy.manual).await {
                    Ok(()) => {
                        tracker.advance(StepState::Confirmed, "observed on-chain")?;
                        Ok(Confirmation::Confirmed)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "manual confirmation not observed; rerun to resume");
                        Ok(Confirmation::Pending)
                    }
                }
            }
        }
    }

    async fn holds(&self, step: u64, predicate: &dyn Predicate) -> Result<bool, MigrationError> {
        predicate
            .holds(self.chain.as_ref())
            .await
            .map_err(|e| MigrationError::chain(step, e))
    }
}
