//! Migration configuration
//!
//! A TOML file describes the network, the accounts involved, polling
//! bounds, where simulation links point, the control contract, named
//! addresses, dynamic configuration, and the `[[steps]]` of the plan.
//! Everything is validated at load time, before any chain access.

use crate::control::DEFAULT_POINTER_SIGNATURE;
use crate::dispatch::{SimulationLink, DEFAULT_SIMULATION_BASE};
use crate::dynamic::DynamicSettings;
use crate::error::ConfigError;
use crate::plan::{DynamicPlacement, StepDefinition};
use crate::poller::PollPolicy;
use indexmap::IndexMap;
use migr_chain::{Address, BlockTag, Url};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `network.rpc_url`
pub const RPC_URL_ENV: &str = "L1_RPC";

/// Top-level migration configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationConfig {
    /// Directory of deployment records, relative to the config file.
    #[serde(default)]
    pub deployments_dir: Option<PathBuf>,

    /// Network access.
    pub network: NetworkConfig,

    /// Accounts involved in the migration.
    pub accounts: AccountsConfig,

    /// Confirmation polling.
    #[serde(default)]
    pub polling: PollingConfig,

    /// Simulation links in manual artifacts.
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Control contract.
    pub control: ControlConfig,

    /// Extra named addresses.
    #[serde(default)]
    pub addresses: IndexMap<String, String>,

    /// Runtime-resolved configuration.
    #[serde(default)]
    pub dynamic: Option<DynamicDefinition>,

    /// The plan.
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

/// Network access.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    /// JSON-RPC endpoint of the L1 node.
    pub rpc_url: String,

    /// Expected chain id; checked against the node when set.
    #[serde(default)]
    pub chain_id: Option<u64>,
}

/// Accounts involved in the migration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountsConfig {
    /// Local signer; the node's first unlocked account when absent.
    #[serde(default)]
    pub deployer: Option<String>,

    /// Identity authorized to advance steps.
    pub controller: String,

    /// Owner of the system after the migration.
    #[serde(default)]
    pub final_system_owner: Option<String>,

    /// Portal guardian.
    #[serde(default)]
    pub portal_guardian: Option<String>,
}

impl AccountsConfig {
    /// Named accounts that are set, in declaration order
    #[must_use]
    pub fn named(&self) -> Vec<(&'static str, &str)> {
        [
            ("deployer", self.deployer.as_deref()),
            ("controller", Some(self.controller.as_str())),
            ("final_system_owner", self.final_system_owner.as_deref()),
            ("portal_guardian", self.portal_guardian.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
        .collect()
    }
}

/// Confirmation polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollingConfig {
    /// Interval between completion checks.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Bound on live confirmation waits; `0` waits forever.
    #[serde(default = "default_live_timeout_secs")]
    pub live_timeout_secs: u64,

    /// Bound on manual confirmation waits; absent waits forever.
    #[serde(default)]
    pub manual_timeout_secs: Option<u64>,
}

fn default_interval_ms() -> u64 {
    5_000
}

fn default_live_timeout_secs() -> u64 {
    1_800
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            live_timeout_secs: default_live_timeout_secs(),
            manual_timeout_secs: None,
        }
    }
}

impl PollingConfig {
    /// Poll interval
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Policy for live confirmation
    #[must_use]
    pub fn live_policy(&self) -> PollPolicy {
        match self.live_timeout_secs {
            0 => PollPolicy::unbounded(self.interval()),
            secs => PollPolicy::bounded(self.interval(), Duration::from_secs(secs)),
        }
    }

    /// Policy for manual confirmation
    #[must_use]
    pub fn manual_policy(&self) -> PollPolicy {
        match self.manual_timeout_secs {
            Some(secs) => PollPolicy::bounded(self.interval(), Duration::from_secs(secs)),
            None => PollPolicy::unbounded(self.interval()),
        }
    }
}

/// Simulation links in manual artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    /// Dashboard base URL.
    #[serde(default = "default_simulation_base")]
    pub base_url: String,

    /// Project slug.
    #[serde(default)]
    pub project: Option<String>,

    /// Account slug.
    #[serde(default)]
    pub username: Option<String>,
}

fn default_simulation_base() -> String {
    DEFAULT_SIMULATION_BASE.to_string()
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            base_url: default_simulation_base(),
            project: None,
            username: None,
        }
    }
}

impl SimulationConfig {
    /// Link builder
    #[must_use]
    pub fn link(&self) -> SimulationLink {
        let link = SimulationLink::new(self.base_url.clone());
        match (&self.project, &self.username) {
            (Some(project), Some(username)) => link.with_project(project.clone(), username.clone()),
            _ => link,
        }
    }
}

/// Control contract.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlConfig {
    /// Address or deployment name.
    pub contract: String,

    /// Pointer getter.
    #[serde(default = "default_pointer_signature")]
    pub pointer_signature: String,
}

fn default_pointer_signature() -> String {
    DEFAULT_POINTER_SIGNATURE.to_string()
}

/// Runtime-resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DynamicDefinition {
    /// Step the configuration is submitted before.
    #[serde(default = "default_dynamic_step")]
    pub step: u64,

    /// L2 block the output oracle starts from.
    #[serde(default)]
    pub starting_block_number: u64,

    /// Fixed starting timestamp; negative reads `reference_block`.
    #[serde(default)]
    pub starting_timestamp: Option<i64>,

    /// Block tag, number, or hash whose timestamp is used.
    #[serde(default)]
    pub reference_block: Option<String>,

    /// Explicit portal paused flag; defaults by execution mode.
    #[serde(default)]
    pub portal_paused: Option<bool>,
}

fn default_dynamic_step() -> u64 {
    5
}

impl DynamicDefinition {
    /// Resolver inputs and placement
    ///
    /// # Errors
    /// Returns `ConfigError` for an unparsable block reference
    pub fn placement(&self) -> Result<DynamicPlacement, ConfigError> {
        let reference_block = self
            .reference_block
            .as_deref()
            .map(|tag| {
                tag.parse::<BlockTag>()
                    .map_err(|e| ConfigError::invalid("dynamic.reference_block", e.to_string()))
            })
            .transpose()?;
        Ok(DynamicPlacement {
            settings: DynamicSettings {
                starting_block_number: self.starting_block_number,
                starting_timestamp: self.starting_timestamp,
                reference_block,
                portal_paused: self.portal_paused,
            },
            step: self.step,
        })
    }
}

impl MigrationConfig {
    /// Load, apply environment overrides, and validate.
    ///
    /// A relative `deployments_dir` is resolved against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let mut config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        if let Some(dir) = &config.deployments_dir {
            if dir.is_relative() {
                let base = path.parent().unwrap_or_else(|| Path::new("."));
                config.deployments_dir = Some(base.join(dir));
            }
        }
        if let Ok(url) = std::env::var(RPC_URL_ENV) {
            config.apply_rpc_override(&url);
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a TOML string, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the RPC endpoint when `url` is non-empty
    pub fn apply_rpc_override(&mut self, url: &str) {
        let url = url.trim();
        if !url.is_empty() {
            tracing::debug!(env = RPC_URL_ENV, "rpc url overridden from environment");
            self.network.rpc_url = url.to_string();
        }
    }

    /// Check everything that can be checked without the chain.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.rpc_url.trim().is_empty() {
            return Err(ConfigError::Missing("network.rpc_url".into()));
        }
        Url::parse(&self.network.rpc_url)
            .map_err(|e| ConfigError::invalid("network.rpc_url", e.to_string()))?;

        for (name, value) in self.accounts.named() {
            parse_address(&format!("accounts.{name}"), value)?;
        }
        for (name, value) in &self.addresses {
            parse_address(&format!("addresses.{name}"), value)?;
        }

        if self.polling.interval_ms == 0 {
            return Err(ConfigError::invalid("polling.interval_ms", "must be positive"));
        }

        if self.control.contract.trim().is_empty() {
            return Err(ConfigError::Missing("control.contract".into()));
        }

        if let Some(dynamic) = &self.dynamic {
            dynamic.placement()?;
        }

        let mut previous = 0;
        for step in &self.steps {
            if step.number <= previous {
                return Err(ConfigError::InvalidPlan(format!(
                    "step {} must be greater than {previous}",
                    step.number
                )));
            }
            previous = step.number;
        }
        Ok(())
    }

    /// Controller address
    ///
    /// # Errors
    /// Returns `ConfigError` if the address is malformed
    pub fn controller(&self) -> Result<Address, ConfigError> {
        parse_address("accounts.controller", &self.accounts.controller)
    }

    /// Explicit local signer, if configured
    ///
    /// # Errors
    /// Returns `ConfigError` if the address is malformed
    pub fn deployer(&self) -> Result<Option<Address>, ConfigError> {
        self.accounts
            .deployer
            .as_deref()
            .map(|d| parse_address("accounts.deployer", d))
            .transpose()
    }

    /// Dynamic configuration placement, if configured
    ///
    /// # Errors
    /// Returns `ConfigError` for an unparsable block reference
    pub fn dynamic_placement(&self) -> Result<Option<DynamicPlacement>, ConfigError> {
        self.dynamic.as_ref().map(DynamicDefinition::placement).transpose()
    }
}

fn parse_address(field: &str, value: &str) -> Result<Address, ConfigError> {
    let value = value.trim();
    if value.len() != 42 || !value.starts_with("0x") {
        return Err(ConfigError::invalid(field, format!("`{value}` is not a 0x-prefixed address")));
    }
    value
        .parse()
        .map_err(|e| ConfigError::invalid(field, format!("`{value}`: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [network]
        rpc_url = "http://localhost:8545"

        [accounts]
        controller = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8"

        [control]
        contract = "SystemDictatorProxy"
    "#;

    #[test]
    fn defaults_apply() {
        let config = MigrationConfig::from_toml(MINIMAL).unwrap();

        assert_eq!(config.polling, PollingConfig::default());
        assert_eq!(config.polling.live_policy().timeout, Some(Duration::from_secs(1800)));
        assert_eq!(config.polling.live_policy().interval, Duration::from_secs(5));
        assert_eq!(config.polling.manual_policy().timeout, None);
        assert_eq!(config.control.pointer_signature, "currentStep()");
        assert_eq!(config.simulation.base_url, DEFAULT_SIMULATION_BASE);
        assert!(config.steps.is_empty());
        assert!(config.deployer().unwrap().is_none());
    }

    #[test]
    fn zero_live_timeout_is_unbounded() {
        let polling = PollingConfig {
            live_timeout_secs: 0,
            ..PollingConfig::default()
        };
        assert_eq!(polling.live_policy().timeout, None);
    }

    #[test]
    fn malformed_account_is_rejected() {
        let src = MINIMAL.replace("0x70997970C51812dc3A010C7d01b50e0d17dc79C8", "0x1234");
        let err = MigrationConfig::from_toml(&src).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field, .. } if field == "accounts.controller"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let src = format!("{MINIMAL}\n[polling]\ninterval = 5\n");
        assert!(matches!(MigrationConfig::from_toml(&src), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn step_order_is_validated() {
        let src = format!("{MINIMAL}\n[[steps]]\nnumber = 2\n[[steps]]\nnumber = 2\n");
        assert!(matches!(MigrationConfig::from_toml(&src), Err(ConfigError::InvalidPlan(_))));
    }

    #[test]
    fn dynamic_reference_block_parses() {
        let src = format!(
            "{MINIMAL}\n[dynamic]\nstarting_timestamp = -1\nreference_block = \"finalized\"\n"
        );
        let config = MigrationConfig::from_toml(&src).unwrap();
        let placement = config.dynamic_placement().unwrap().unwrap();
        assert_eq!(placement.step, 5);
        assert_eq!(placement.settings.reference_block, Some(BlockTag::Finalized));

        let bad = format!("{MINIMAL}\n[dynamic]\nreference_block = \"yesterday\"\n");
        assert!(MigrationConfig::from_toml(&bad).is_err());
    }

    #[test]
    fn from_file_resolves_relative_deployments_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migration.toml");
        std::fs::write(&path, format!("deployments_dir = \"deployments/goerli\"\n{MINIMAL}")).unwrap();

        let config = MigrationConfig::from_file(&path).unwrap();
        assert_eq!(
            config.deployments_dir.unwrap(),
            dir.path().join("deployments/goerli")
        );
    }

    #[test]
    fn bundled_demo_config_is_valid() {
        let config = MigrationConfig::from_toml(include_str!("../../../demos/migration.example.toml")).unwrap();

        assert_eq!(config.network.chain_id, Some(5));
        assert_eq!(config.steps.len(), 6);
        assert_eq!(config.steps[5].pre.len(), 1);
        assert_eq!(config.dynamic_placement().unwrap().unwrap().step, 5);
    }

    #[test]
    fn simulation_link_uses_project_when_both_slugs_set() {
        let config = SimulationConfig {
            project: Some("ops".into()),
            username: Some("alice".into()),
            ..SimulationConfig::default()
        };
        assert_eq!(
            config.link(),
            SimulationLink::default().with_project("ops", "alice")
        );
    }
}
