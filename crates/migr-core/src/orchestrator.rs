//! Migration orchestrator
//!
//! Wires configuration, chain access, and a dispatch channel into a
//! [`StepMachine`], then drives the plan one step at a time. The control
//! pointer is read fresh for every step; nothing about progress is cached
//! between invocations.

use crate::address_book::AddressBook;
use crate::config::MigrationConfig;
use crate::control::ControlContract;
use crate::dispatch::{
    ArtifactSink, DirectSubmit, Dispatcher, LogSink, ManualArtifact, RenderForManualSigning,
};
use crate::error::{ConfigError, MigrationError};
use crate::journal::RunJournal;
use crate::machine::{ConfirmationPolicy, StepMachine};
use crate::mode::resolve_mode_for;
use crate::plan::{MigrationPlan, PlanContext};
use crate::step::Step;
use crate::types::{
    ExecutionMode, RunStatus, RunSummary, SkipReason, StepOutcome, StepReport, StepStatus,
};
use migr_chain::{Address, ChainClient};
use serde::Serialize;
use std::sync::Arc;

/// Caller-supplied run options
#[derive(Clone)]
pub struct RunOptions {
    /// Force manual mode regardless of the signer
    pub force_manual: bool,
    /// Where rendered artifacts go
    pub sink: Arc<dyn ArtifactSink>,
    /// Journal receiving every transition
    pub journal: Arc<RunJournal>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            force_manual: false,
            sink: Arc::new(LogSink),
            journal: Arc::new(RunJournal::new()),
        }
    }
}

/// Snapshot of plan progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Control pointer
    pub pointer: u64,
    /// Mode a run would use
    pub mode: ExecutionMode,
    /// Per-step view
    pub steps: Vec<StepStatus>,
}

/// Top-level driver for one migration plan
pub struct Orchestrator {
    machine: StepMachine,
    plan: MigrationPlan,
    renderer: RenderForManualSigning,
    book: AddressBook,
}

impl Orchestrator {
    /// Assemble from parts
    #[must_use]
    pub fn new(machine: StepMachine, plan: MigrationPlan, renderer: RenderForManualSigning) -> Self {
        Self {
            machine,
            plan,
            renderer,
            book: AddressBook::new(),
        }
    }

    /// Attach the address book used to build the plan, for status output
    #[must_use]
    pub fn with_address_book(mut self, book: AddressBook) -> Self {
        self.book = book;
        self
    }

    /// Build from configuration
    ///
    /// Resolves the chain id, local signer, execution mode, address book and
    /// plan. No transaction is sent.
    ///
    /// # Errors
    /// Configuration problems and chain read failures
    pub async fn connect(
        config: &MigrationConfig,
        chain: Arc<dyn ChainClient>,
        options: RunOptions,
    ) -> Result<Self, MigrationError> {
        let chain_id = chain.chain_id().await.map_err(|e| MigrationError::chain(0, e))?;
        if let Some(expected) = config.network.chain_id {
            if expected != chain_id {
                return Err(ConfigError::ChainMismatch {
                    expected,
                    actual: chain_id,
                }
                .into());
            }
        }

        let controller = config.controller()?;
        let signer = match config.deployer()? {
            Some(deployer) => Some(deployer),
            None => chain
                .accounts()
                .await
                .map_err(|e| MigrationError::chain(0, e))?
                .first()
                .copied(),
        };
        let mode = match signer {
            Some(signer) => resolve_mode_for(signer, controller, options.force_manual),
            None => {
                tracing::warn!("no local signer available; transactions will be rendered");
                ExecutionMode::Manual
            }
        };
        tracing::info!(%mode, chain_id, %controller, signer = ?signer, "execution mode resolved");

        let book = address_book(config)?;
        let control_address = book.resolve(&config.control.contract)?;
        let code = chain.code(control_address).await.map_err(|e| MigrationError::chain(0, e))?;
        if code.is_empty() {
            return Err(ConfigError::NotDeployed {
                name: config.control.contract.clone(),
                address: control_address,
            }
            .into());
        }
        let control = ControlContract::new(control_address, &config.control.pointer_signature)
            .map_err(|e| ConfigError::abi(config.control.pointer_signature.as_str(), e))?;

        let dynamic = config.dynamic_placement()?;
        let plan = MigrationPlan::from_definitions(
            &config.steps,
            &PlanContext {
                book: &book,
                control: &control,
                dynamic: dynamic.as_ref(),
            },
        )?;

        let renderer = RenderForManualSigning::new(controller, chain_id, config.simulation.link());
        let dispatcher: Arc<dyn Dispatcher> = match (mode, signer) {
            (ExecutionMode::Live, Some(signer)) => Arc::new(DirectSubmit::new(chain.clone(), signer)),
            _ => Arc::new(renderer.clone()),
        };
        let policy = ConfirmationPolicy {
            live: config.polling.live_policy(),
            manual: config.polling.manual_policy(),
        };
        let machine = StepMachine::new(chain, dispatcher, control, policy, options.journal, options.sink);

        Ok(Self::new(machine, plan, renderer).with_address_book(book))
    }

    /// Execution mode
    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.machine.mode()
    }

    /// The plan being driven
    #[must_use]
    pub fn plan(&self) -> &MigrationPlan {
        &self.plan
    }

    /// Address book the plan was built from
    #[must_use]
    pub fn address_book(&self) -> &AddressBook {
        &self.book
    }

    /// Journal of transitions made so far
    #[must_use]
    pub fn journal(&self) -> &Arc<RunJournal> {
        self.machine.journal()
    }

    /// Run every step in order, stopping at the first one that cannot complete
    ///
    /// # Errors
    /// Dispatch failures, live timeouts, chain and configuration errors
    pub async fn run(&self) -> Result<RunSummary, MigrationError> {
        tracing::info!(mode = %self.mode(), steps = self.plan.len(), "starting migration run");
        let mut reports = Vec::with_capacity(self.plan.len());

        for step in self.plan.steps() {
            let outcome = self.machine.run_step(step).await?;
            let stop = match &outcome {
                StepOutcome::Skipped {
                    reason: SkipReason::NotReached,
                } => Some(RunStatus::Blocked {
                    step: step.number,
                    pointer: self.machine.pointer(step.number).await?,
                }),
                StepOutcome::AwaitingManualConfirmation => {
                    Some(RunStatus::AwaitingManualConfirmation { step: step.number })
                }
                StepOutcome::VerificationFailed { failure } => Some(RunStatus::VerificationFailed {
                    step: step.number,
                    failure: failure.clone(),
                }),
                StepOutcome::Applied | StepOutcome::Skipped { .. } => None,
            };
            reports.push(StepReport {
                step: step.number,
                description: step.description.clone(),
                outcome,
            });

            if let Some(status) = stop {
                tracing::warn!(%status, "migration run stopped");
                return Ok(self.summary(reports, status));
            }
        }

        tracing::info!("all steps applied");
        Ok(self.summary(reports, RunStatus::Complete))
    }

    fn summary(&self, reports: Vec<StepReport>, status: RunStatus) -> RunSummary {
        RunSummary {
            mode: self.mode(),
            reports,
            status,
        }
    }

    /// Run a single step by number
    ///
    /// # Errors
    /// `UnknownStep` when the plan has no such step, otherwise as [`StepMachine::run_step`]
    pub async fn run_step(&self, number: u64) -> Result<StepOutcome, MigrationError> {
        let step = self.find(number)?;
        self.machine.run_step(step).await
    }

    fn find(&self, number: u64) -> Result<&Step, ConfigError> {
        self.plan.step(number).ok_or(ConfigError::UnknownStep(number))
    }

    /// Applied and pending steps according to the chain
    ///
    /// # Errors
    /// Chain read failures
    pub async fn status(&self) -> Result<StatusReport, MigrationError> {
        let chain = self.machine.chain().as_ref();
        let pointer = self.machine.pointer(0).await?;
        let mut steps = Vec::with_capacity(self.plan.len());

        for step in self.plan.steps() {
            let applied = if pointer > step.number {
                true
            } else if pointer == step.number {
                match &step.applied_when {
                    Some(check) => check
                        .holds(chain)
                        .await
                        .map_err(|e| MigrationError::chain(step.number, e))?,
                    None => false,
                }
            } else {
                false
            };
            steps.push(StepStatus {
                step: step.number,
                description: step.description.clone(),
                applied,
                current: pointer == step.number && !applied,
            });
        }

        Ok(StatusReport {
            pointer,
            mode: self.mode(),
            steps,
        })
    }

    /// Manual-signing artifacts for a step, without dispatching or waiting
    ///
    /// Pre-steps that are already applied are left out.
    ///
    /// # Errors
    /// `UnknownStep`, chain read failures, and action resolution errors
    pub async fn render_step(&self, number: u64) -> Result<Vec<(String, ManualArtifact)>, MigrationError> {
        let step = self.find(number)?;
        let chain = self.machine.chain().as_ref();
        let mut artifacts = Vec::new();

        for (index, pre) in step.pre.iter().enumerate() {
            let applied = pre
                .applied_when
                .holds(chain)
                .await
                .map_err(|e| MigrationError::chain(number, e))?;
            if applied {
                continue;
            }
            let intent = pre
                .action
                .intent(chain, ExecutionMode::Manual)
                .await
                .map_err(|e| e.at_step(number))?;
            if let Some(intent) = intent {
                let label = format!("step {number} pre {}: {}", index + 1, pre.description);
                artifacts.push((label, self.renderer.render(&intent)));
            }
        }

        let intent = step
            .action
            .intent(chain, ExecutionMode::Manual)
            .await
            .map_err(|e| e.at_step(number))?;
        if let Some(intent) = intent {
            artifacts.push((step.label(), self.renderer.render(&intent)));
        }
        Ok(artifacts)
    }

    /// Resolved address for the signer of rendered transactions
    #[must_use]
    pub fn controller(&self) -> Address {
        self.renderer.signer()
    }
}

fn address_book(config: &MigrationConfig) -> Result<AddressBook, ConfigError> {
    let mut book = match &config.deployments_dir {
        Some(dir) => AddressBook::load_dir(dir)?,
        None => AddressBook::new(),
    };
    for (name, value) in &config.addresses {
        book.insert_literal(name, value)?;
    }
    for (name, value) in config.accounts.named() {
        book.insert_literal(name, value)?;
    }
    Ok(book)
}
