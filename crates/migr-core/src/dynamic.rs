//! Dynamic configuration
//!
//! Some parameters cannot be known until the migration runs: the output
//! oracle's starting timestamp is taken from a reference L1 block, and the
//! portal's paused flag depends on who is signing. They are submitted once,
//! as a pre-step, and observed as set afterwards.

use crate::error::{ConfigError, ResolveError};
use crate::step::IntentSource;
use crate::types::ExecutionMode;
use crate::verify::{Predicate, ValueCheck};
use async_trait::async_trait;
use migr_chain::abi::uint;
use migr_chain::{
    Address, BlockTag, Bytes, ChainClient, DynSolValue, FunctionSignature, TransactionIntent, U256,
};
use std::sync::Arc;

/// Getter reporting whether dynamic configuration was applied
pub const SET_SIGNATURE: &str = "dynamicConfigSet()";

/// Setter for dynamic configuration
pub const UPDATE_SIGNATURE: &str = "updateDynamicConfig((uint256,uint256),bool)";

/// Values resolved at run time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicConfig {
    /// L2 block the output oracle starts from
    pub starting_block_number: u64,
    /// Timestamp paired with the starting block
    pub starting_timestamp: u64,
    /// Whether the portal stays paused after the upgrade
    pub portal_paused: bool,
}

/// Outcome of resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicResolution {
    /// Already applied on-chain; nothing to compute
    AlreadySet,
    /// Values to submit
    Resolved(DynamicConfig),
}

/// Configured inputs for dynamic resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicSettings {
    /// L2 block the output oracle starts from
    pub starting_block_number: u64,
    /// Fixed starting timestamp; negative or absent means "read the reference block"
    pub starting_timestamp: Option<i64>,
    /// Block whose timestamp is used when no fixed timestamp is configured
    pub reference_block: Option<BlockTag>,
    /// Explicit paused flag; defaults by execution mode
    pub portal_paused: Option<bool>,
}

/// Resolves and encodes the dynamic configuration call
#[derive(Debug, Clone)]
pub struct DynamicConfigResolver {
    control: Address,
    settings: DynamicSettings,
    set_getter: FunctionSignature,
    update: FunctionSignature,
}

impl DynamicConfigResolver {
    /// Resolver targeting the control contract at `control`
    ///
    /// # Errors
    /// Returns `ConfigError` when neither a fixed timestamp nor a reference
    /// block is configured
    pub fn new(control: Address, settings: DynamicSettings) -> Result<Self, ConfigError> {
        let fixed = settings.starting_timestamp.is_some_and(|t| t >= 0);
        if !fixed && settings.reference_block.is_none() {
            return Err(ConfigError::Missing("dynamic.reference_block".into()));
        }
        Ok(Self {
            control,
            settings,
            set_getter: SET_SIGNATURE
                .parse()
                .map_err(|e| ConfigError::abi(SET_SIGNATURE, e))?,
            update: UPDATE_SIGNATURE
                .parse()
                .map_err(|e| ConfigError::abi(UPDATE_SIGNATURE, e))?,
        })
    }

    /// Predicate holding once the configuration is set
    #[must_use]
    pub fn set_predicate(&self) -> Arc<dyn Predicate> {
        Arc::new(ValueCheck::call_equals(
            SET_SIGNATURE,
            self.control,
            self.getter_calldata(),
            DynSolValue::Bool(true),
        ))
    }

    fn getter_calldata(&self) -> Bytes {
        Bytes::from(self.set_getter.selector().to_vec())
    }

    /// Resolve values for `mode`, or report them as already set
    ///
    /// # Errors
    /// Chain read failures, or a reference block the node cannot return
    pub async fn resolve(
        &self,
        chain: &dyn ChainClient,
        mode: ExecutionMode,
    ) -> Result<DynamicResolution, ResolveError> {
        if self.set_predicate().holds(chain).await? {
            tracing::info!("dynamic configuration already set");
            return Ok(DynamicResolution::AlreadySet);
        }

        let starting_timestamp = match self.settings.starting_timestamp {
            Some(t) if t >= 0 => t.unsigned_abs(),
            _ => {
                let tag = self
                    .settings
                    .reference_block
                    .ok_or_else(|| ConfigError::Missing("dynamic.reference_block".into()))?;
                let block = chain
                    .block(tag)
                    .await?
                    .ok_or_else(|| ConfigError::UnresolvableBlock(tag.to_string()))?;
                tracing::info!(block = block.number, timestamp = block.timestamp, "starting timestamp from reference block");
                block.timestamp
            }
        };

        let portal_paused = self.settings.portal_paused.unwrap_or(!mode.is_live());
        Ok(DynamicResolution::Resolved(DynamicConfig {
            starting_block_number: self.settings.starting_block_number,
            starting_timestamp,
            portal_paused,
        }))
    }

    /// Encode the setter call for resolved values
    ///
    /// # Errors
    /// Returns `ConfigError` if the setter cannot be encoded
    pub fn setter_intent(&self, config: &DynamicConfig) -> Result<TransactionIntent, ConfigError> {
        TransactionIntent::call(
            self.control,
            &self.update,
            &[
                DynSolValue::Tuple(vec![
                    uint(config.starting_block_number),
                    DynSolValue::Uint(U256::from(config.starting_timestamp), 256),
                ]),
                DynSolValue::Bool(config.portal_paused),
            ],
        )
        .map_err(|e| ConfigError::abi(UPDATE_SIGNATURE, e))
    }
}

#[async_trait]
impl IntentSource for DynamicConfigResolver {
    fn describe(&self) -> String {
        "dynamic configuration".into()
    }

    async fn intent(
        &self,
        chain: &dyn ChainClient,
        mode: ExecutionMode,
    ) -> Result<Option<TransactionIntent>, ResolveError> {
        match self.resolve(chain, mode).await? {
            DynamicResolution::AlreadySet => Ok(None),
            DynamicResolution::Resolved(config) => Ok(Some(self.setter_intent(&config)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migr_test_utils::MockChain;

    fn settings(timestamp: Option<i64>, reference: Option<BlockTag>) -> DynamicSettings {
        DynamicSettings {
            starting_block_number: 0,
            starting_timestamp: timestamp,
            reference_block: reference,
            portal_paused: None,
        }
    }

    fn set_getter() -> FunctionSignature {
        SET_SIGNATURE.parse().unwrap()
    }

    #[tokio::test]
    async fn already_set_skips_recomputation() {
        let chain = MockChain::new(1);
        let control = Address::repeat_byte(1);
        chain.set_value(control, &set_getter(), DynSolValue::Bool(true));

        let resolver = DynamicConfigResolver::new(control, settings(Some(10), None)).unwrap();
        assert_eq!(
            resolver.resolve(&chain, ExecutionMode::Live).await.unwrap(),
            DynamicResolution::AlreadySet
        );
        assert!(resolver
            .intent(&chain, ExecutionMode::Live)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn negative_timestamp_reads_reference_block() {
        let chain = MockChain::new(1);
        let control = Address::repeat_byte(1);
        chain.set_value(control, &set_getter(), DynSolValue::Bool(false));
        let block = chain.push_block(1_690_000_000);

        let resolver = DynamicConfigResolver::new(
            control,
            settings(Some(-1), Some(BlockTag::Hash(block.hash))),
        )
        .unwrap();

        let DynamicResolution::Resolved(config) =
            resolver.resolve(&chain, ExecutionMode::Manual).await.unwrap()
        else {
            panic!("expected resolved config");
        };
        assert_eq!(config.starting_timestamp, 1_690_000_000);
        assert!(config.portal_paused);

        let DynamicResolution::Resolved(live) =
            resolver.resolve(&chain, ExecutionMode::Live).await.unwrap()
        else {
            panic!("expected resolved config");
        };
        assert!(!live.portal_paused);
    }

    #[tokio::test]
    async fn unknown_reference_block_is_config_error() {
        let chain = MockChain::new(1);
        let control = Address::repeat_byte(1);
        chain.set_value(control, &set_getter(), DynSolValue::Bool(false));

        let resolver =
            DynamicConfigResolver::new(control, settings(None, Some(BlockTag::Number(999)))).unwrap();
        let err = resolver.resolve(&chain, ExecutionMode::Live).await.unwrap_err();
        assert!(matches!(err, ResolveError::Config(ConfigError::UnresolvableBlock(_))));
    }

    #[test]
    fn requires_timestamp_source() {
        assert!(DynamicConfigResolver::new(Address::ZERO, settings(None, None)).is_err());
        assert!(DynamicConfigResolver::new(Address::ZERO, settings(Some(-1), None)).is_err());
    }

    #[test]
    fn encodes_setter_with_tuple_and_flag() {
        let resolver = DynamicConfigResolver::new(Address::repeat_byte(1), settings(Some(5), None)).unwrap();
        let intent = resolver
            .setter_intent(&DynamicConfig {
                starting_block_number: 7,
                starting_timestamp: 5,
                portal_paused: true,
            })
            .unwrap();

        let update: FunctionSignature = UPDATE_SIGNATURE.parse().unwrap();
        assert_eq!(intent.selector(), Some(update.selector()));
        assert_eq!(intent.data.len(), 4 + 3 * 32);
        assert_eq!(intent.data[4 + 31], 7);
        assert_eq!(intent.data[4 + 63], 5);
        assert_eq!(intent.data[4 + 95], 1);
    }
}
