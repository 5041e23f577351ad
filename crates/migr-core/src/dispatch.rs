//! Transaction dispatch
//!
//! Two channels behind one trait: [`DirectSubmit`] sends from the local
//! signer, [`RenderForManualSigning`] produces the artifacts an out-of-band
//! signer needs and never touches the chain.

use crate::error::DispatchError;
use crate::types::ExecutionMode;
use async_trait::async_trait;
use migr_chain::{Address, ChainClient, TransactionIntent, Url, B256};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::sync::Arc;

/// Simulation dashboard used when none is configured
pub const DEFAULT_SIMULATION_BASE: &str = "https://dashboard.tenderly.co";

/// What happened to a dispatched intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    /// Sent to the chain
    Submitted {
        /// Transaction hash
        tx_hash: B256,
    },
    /// Rendered for manual signing
    Rendered(ManualArtifact),
}

/// Everything a manual signer needs for one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualArtifact {
    /// Human-readable summary
    pub summary: String,
    /// Unsigned transaction `{from, to, data, value, chainId}`
    pub transaction: Value,
    /// Equivalent `cast send` command
    pub cli_command: String,
    /// Simulation link
    pub simulation_url: String,
}

impl ManualArtifact {
    /// Multi-line text block for terminals and logs
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.summary);
        let _ = writeln!(out);
        let _ = writeln!(out, "JSON:");
        let _ = writeln!(
            out,
            "{}",
            serde_json::to_string_pretty(&self.transaction).unwrap_or_default()
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "Cast command:");
        let _ = writeln!(out, "{}", self.cli_command);
        let _ = writeln!(out);
        let _ = writeln!(out, "Simulation link:");
        let _ = write!(out, "{}", self.simulation_url);
        out
    }
}

/// Receives rendered artifacts
pub trait ArtifactSink: Send + Sync {
    /// Publish the artifact for `label` (e.g. `step 3`)
    fn publish(&self, label: &str, artifact: &ManualArtifact);
}

/// Sink that writes artifacts to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ArtifactSink for LogSink {
    fn publish(&self, label: &str, artifact: &ManualArtifact) {
        tracing::info!(%label, "manual action required\n{}", artifact.render_text());
    }
}

/// Channel that applies an intent
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Mode this channel implements
    fn mode(&self) -> ExecutionMode;

    /// Apply or render `intent`
    async fn dispatch(&self, intent: &TransactionIntent) -> Result<DispatchResult, DispatchError>;
}

/// Submit directly from the local signer
pub struct DirectSubmit {
    chain: Arc<dyn ChainClient>,
    from: Address,
}

impl DirectSubmit {
    /// Create a direct channel for `from`
    #[must_use]
    pub fn new(chain: Arc<dyn ChainClient>, from: Address) -> Self {
        Self { chain, from }
    }
}

#[async_trait]
impl Dispatcher for DirectSubmit {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Live
    }

    async fn dispatch(&self, intent: &TransactionIntent) -> Result<DispatchResult, DispatchError> {
        tracing::info!(to = %intent.to, description = %intent.description, "submitting transaction");
        let tx_hash = self.chain.send_transaction(self.from, intent).await?;
        tracing::info!(%tx_hash, "transaction submitted");
        Ok(DispatchResult::Submitted { tx_hash })
    }
}

/// Where simulation links point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationLink {
    base: String,
    project: Option<String>,
    username: Option<String>,
}

impl SimulationLink {
    /// Link builder for a dashboard base URL
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            project: None,
            username: None,
        }
    }

    /// Scope links to a project and user
    #[must_use]
    pub fn with_project(mut self, project: impl Into<String>, username: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self.username = Some(username.into());
        self
    }

    /// Simulation URL for `intent` sent by `from` on `chain_id`
    #[must_use]
    pub fn url(&self, chain_id: u64, from: Address, intent: &TransactionIntent) -> String {
        let mut base = self.base.trim_end_matches('/').to_string();
        if let (Some(project), Some(username)) = (&self.project, &self.username) {
            let _ = write!(base, "/{project}/{username}");
        }
        base.push_str("/simulator/new");

        let pairs = [
            ("network", chain_id.to_string()),
            ("contractAddress", intent.to.to_checksum(None)),
            ("rawFunctionInput", intent.data_hex()),
            ("from", from.to_checksum(None)),
        ];
        match Url::parse(&base) {
            Ok(mut url) => {
                url.query_pairs_mut().extend_pairs(pairs.iter());
                url.to_string()
            }
            Err(_) => {
                let query: Vec<String> = pairs.iter().map(|(k, v)| format!("{k}={v}")).collect();
                format!("{base}?{}", query.join("&"))
            }
        }
    }
}

impl Default for SimulationLink {
    fn default() -> Self {
        Self::new(DEFAULT_SIMULATION_BASE)
    }
}

/// Render intents for an out-of-band signer
#[derive(Debug, Clone)]
pub struct RenderForManualSigning {
    from: Address,
    chain_id: u64,
    simulation: SimulationLink,
}

impl RenderForManualSigning {
    /// Create a rendering channel; `from` is the controller that will sign
    #[must_use]
    pub fn new(from: Address, chain_id: u64, simulation: SimulationLink) -> Self {
        Self {
            from,
            chain_id,
            simulation,
        }
    }

    /// Account the rendered transactions are addressed from
    #[must_use]
    pub fn signer(&self) -> Address {
        self.from
    }

    /// Build the artifact without dispatching
    #[must_use]
    pub fn render(&self, intent: &TransactionIntent) -> ManualArtifact {
        let from = self.from.to_checksum(None);
        let to = intent.to.to_checksum(None);
        let data = intent.data_hex();

        let transaction = json!({
            "from": from,
            "to": to,
            "data": data,
            "value": intent.value.to_string(),
            "chainId": self.chain_id,
        });

        let mut cli_command = format!("cast send {to} {data} --from {from}");
        if intent.has_value() {
            let _ = write!(cli_command, " --value {}", intent.value);
        }

        let summary = if intent.description.is_empty() {
            format!("Call {to} from {from}")
        } else {
            format!("{} on {to} from {from}", intent.description)
        };

        ManualArtifact {
            summary,
            transaction,
            cli_command,
            simulation_url: self.simulation.url(self.chain_id, self.from, intent),
        }
    }
}

#[async_trait]
impl Dispatcher for RenderForManualSigning {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Manual
    }

    async fn dispatch(&self, intent: &TransactionIntent) -> Result<DispatchResult, DispatchError> {
        Ok(DispatchResult::Rendered(self.render(intent)))
    }
}
