//! Step definitions
//!
//! A [`Step`] couples an action with the predicates that decide whether it
//! already ran, when it is complete, and whether it left the chain in the
//! expected state.

use crate::error::ResolveError;
use crate::types::ExecutionMode;
use crate::verify::Predicate;
use async_trait::async_trait;
use migr_chain::{ChainClient, TransactionIntent};
use std::fmt;
use std::sync::Arc;

/// Produces a transaction from chain state at run time
#[async_trait]
pub trait IntentSource: Send + Sync {
    /// Name used in logs
    fn describe(&self) -> String;

    /// Transaction to send, or `None` when nothing needs to be done
    async fn intent(
        &self,
        chain: &dyn ChainClient,
        mode: ExecutionMode,
    ) -> Result<Option<TransactionIntent>, ResolveError>;
}

/// What a step does
#[derive(Clone, Default)]
pub enum Action {
    /// No transaction; the step only verifies
    #[default]
    None,
    /// Fixed call prepared at plan construction
    Call(TransactionIntent),
    /// Call computed when the step runs
    Derived(Arc<dyn IntentSource>),
}

impl Action {
    /// Transaction for this action, if any
    ///
    /// # Errors
    /// Propagates failures from derived sources
    pub async fn intent(
        &self,
        chain: &dyn ChainClient,
        mode: ExecutionMode,
    ) -> Result<Option<TransactionIntent>, ResolveError> {
        match self {
            Self::None => Ok(None),
            Self::Call(intent) => Ok(Some(intent.clone())),
            Self::Derived(source) => source.intent(chain, mode).await,
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Call(intent) => f.debug_tuple("Call").field(&intent.description).finish(),
            Self::Derived(source) => f.debug_tuple("Derived").field(&source.describe()).finish(),
        }
    }
}

/// Prerequisite transaction run before a step's own action
///
/// `applied_when` is both the idempotency check and the completion predicate.
#[derive(Clone)]
pub struct SubStep {
    /// Description
    pub description: String,
    /// What to send
    pub action: Action,
    /// Holds once the sub-step took effect
    pub applied_when: Arc<dyn Predicate>,
    /// Post-conditions
    pub checks: Vec<Arc<dyn Predicate>>,
}

impl SubStep {
    /// Create a sub-step
    #[must_use]
    pub fn new(description: impl Into<String>, action: Action, applied_when: Arc<dyn Predicate>) -> Self {
        Self {
            description: description.into(),
            action,
            applied_when,
            checks: Vec::new(),
        }
    }

    /// Add a post-condition
    #[must_use]
    pub fn with_check(mut self, check: Arc<dyn Predicate>) -> Self {
        self.checks.push(check);
        self
    }
}

impl fmt::Debug for SubStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubStep")
            .field("description", &self.description)
            .field("action", &self.action)
            .field("applied_when", &self.applied_when.describe())
            .field("checks", &self.checks.len())
            .finish()
    }
}

/// One numbered step of a migration plan
#[derive(Clone)]
pub struct Step {
    /// Step number, matching the control contract's pointer
    pub number: u64,
    /// Description
    pub description: String,
    /// Prerequisites, run in order
    pub pre: Vec<SubStep>,
    /// Main action
    pub action: Action,
    /// Extra idempotency check on top of the pointer
    pub applied_when: Option<Arc<dyn Predicate>>,
    /// Completion predicate; defaults to the pointer moving past the step
    pub completion: Option<Arc<dyn Predicate>>,
    /// Post-conditions, evaluated in order
    pub checks: Vec<Arc<dyn Predicate>>,
}

impl Step {
    /// Step with no action
    #[must_use]
    pub fn new(number: u64, description: impl Into<String>) -> Self {
        Self {
            number,
            description: description.into(),
            pre: Vec::new(),
            action: Action::None,
            applied_when: None,
            completion: None,
            checks: Vec::new(),
        }
    }

    /// Set the action
    #[must_use]
    pub fn with_action(mut self, action: Action) -> Self {
        self.action = action;
        self
    }

    /// Add a prerequisite
    #[must_use]
    pub fn with_pre(mut self, pre: SubStep) -> Self {
        self.pre.push(pre);
        self
    }

    /// Skip the step when `predicate` holds
    #[must_use]
    pub fn applied_when(mut self, predicate: Arc<dyn Predicate>) -> Self {
        self.applied_when = Some(predicate);
        self
    }

    /// Override the completion predicate
    #[must_use]
    pub fn completed_when(mut self, predicate: Arc<dyn Predicate>) -> Self {
        self.completion = Some(predicate);
        self
    }

    /// Add a post-condition
    #[must_use]
    pub fn with_check(mut self, check: Arc<dyn Predicate>) -> Self {
        self.checks.push(check);
        self
    }

    /// Label used in logs, journal entries and artifact output
    #[must_use]
    pub fn label(&self) -> String {
        format!("step {}", self.number)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("number", &self.number)
            .field("description", &self.description)
            .field("pre", &self.pre)
            .field("action", &self.action)
            .field("checks", &self.checks.len())
            .finish_non_exhaustive()
    }
}
