//! migr-core - staged migration orchestrator
//!
//! Drives a numbered sequence of privileged on-chain steps to completion
//! against a control contract that records progress:
//! 1. **Gate**: read the control pointer; skip steps behind it, stop at steps ahead of it
//! 2. **Dispatch**: submit directly (live) or render for an out-of-band signer (manual)
//! 3. **Confirm**: poll until the effect is observed on-chain
//! 4. **Verify**: run post-condition checks, fail-fast
//!
//! Everything is re-derived from chain state, so a rerun resumes where the
//! previous one stopped.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use migr_core::prelude::*;
//!
//! let config = MigrationConfig::from_file(Path::new("migration.toml"))?;
//! let chain = Arc::new(JsonRpcClient::new(&config.network.rpc_url)?);
//! let orchestrator = Orchestrator::connect(&config, chain, RunOptions::default()).await?;
//! let summary = orchestrator.run().await?;
//! ```

pub mod address_book;
pub mod config;
pub mod control;
pub mod dispatch;
pub mod dynamic;
pub mod error;
pub mod journal;
pub mod machine;
pub mod mode;
pub mod orchestrator;
pub mod plan;
pub mod poller;
pub mod state_machine;
pub mod step;
pub mod types;
pub mod verify;

pub use error::*;
pub use types::*;

/// Commonly used types
pub mod prelude {
    pub use crate::address_book::AddressBook;
    pub use crate::config::MigrationConfig;
    pub use crate::control::ControlContract;
    pub use crate::dispatch::{
        ArtifactSink, DirectSubmit, DispatchResult, Dispatcher, LogSink, ManualArtifact,
        RenderForManualSigning, SimulationLink,
    };
    pub use crate::dynamic::{DynamicConfig, DynamicConfigResolver, DynamicSettings};
    pub use crate::error::{ConfigError, DispatchError, MigrationError, VerificationFailure};
    pub use crate::journal::RunJournal;
    pub use crate::machine::{ConfirmationPolicy, StepMachine};
    pub use crate::mode::{manual_override_from_env, resolve_mode, resolve_mode_for};
    pub use crate::orchestrator::{Orchestrator, RunOptions, StatusReport};
    pub use crate::plan::MigrationPlan;
    pub use crate::poller::PollPolicy;
    pub use crate::step::{Action, IntentSource, Step, SubStep};
    pub use crate::types::{ExecutionMode, RunStatus, RunSummary, StepOutcome};
    pub use crate::verify::{Expectation, Predicate, Read, ValueCheck};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
