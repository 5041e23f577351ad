//! Chain-agnostic value types shared by clients and the orchestrator

use crate::abi::{format_list, DynSolValue, FunctionSignature};
use crate::error::{AbiError, ChainError};
use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Unsigned description of a call to apply on-chain
///
/// Created per step invocation and discarded after dispatch; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionIntent {
    /// Call target
    pub to: Address,
    /// Encoded calldata
    pub data: Bytes,
    /// Attached value in wei
    pub value: U256,
    /// Human-readable summary of the effect
    pub description: String,
}

impl TransactionIntent {
    /// Create intent with zero value
    #[inline]
    #[must_use]
    pub fn new(to: Address, data: Bytes) -> Self {
        Self {
            to,
            data,
            value: U256::ZERO,
            description: String::new(),
        }
    }

    /// Encode a call to `signature` on `to`
    ///
    /// # Errors
    /// Returns `AbiError` if the arguments do not match the signature
    pub fn call(
        to: Address,
        signature: &FunctionSignature,
        args: &[DynSolValue],
    ) -> Result<Self, AbiError> {
        let data = signature.encode_call(args)?;
        Ok(Self::new(to, data).with_description(format!("{}({})", signature.name(), format_list(args))))
    }

    /// With attached value
    #[inline]
    #[must_use]
    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Whether a non-zero value is attached
    #[inline]
    #[must_use]
    pub fn has_value(&self) -> bool {
        !self.value.is_zero()
    }

    /// Function selector, if the calldata carries one
    #[must_use]
    pub fn selector(&self) -> Option<[u8; 4]> {
        self.data.get(..4).map(|s| [s[0], s[1], s[2], s[3]])
    }

    /// Calldata as `0x`-prefixed hex
    #[must_use]
    pub fn data_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.data))
    }
}

/// Block selector for header lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockTag {
    /// Most recent block
    Latest,
    /// Latest finalized block
    Finalized,
    /// Latest safe block
    Safe,
    /// Genesis
    Earliest,
    /// Block by height
    Number(u64),
    /// Block by hash
    Hash(B256),
}

impl FromStr for BlockTag {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "latest" => Ok(Self::Latest),
            "finalized" => Ok(Self::Finalized),
            "safe" => Ok(Self::Safe),
            "earliest" => Ok(Self::Earliest),
            _ if s.len() == 66 && s.starts_with("0x") => B256::from_str(s)
                .map(Self::Hash)
                .map_err(|e| ChainError::Decode(format!("block hash {s}: {e}"))),
            _ => {
                let parsed = match s.strip_prefix("0x") {
                    Some(hex) => u64::from_str_radix(hex, 16),
                    None => s.parse(),
                };
                parsed
                    .map(Self::Number)
                    .map_err(|_| ChainError::Decode(format!("invalid block tag `{s}`")))
            }
        }
    }
}

impl Display for BlockTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Finalized => write!(f, "finalized"),
            Self::Safe => write!(f, "safe"),
            Self::Earliest => write!(f, "earliest"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Hash(h) => write!(f, "{h}"),
        }
    }
}

/// The block fields the orchestrator consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Height
    pub number: u64,
    /// Hash
    pub hash: B256,
    /// Unix timestamp in seconds
    pub timestamp: u64,
}

/// Outcome of a mined transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Transaction hash
    pub transaction_hash: B256,
    /// Block the transaction landed in
    pub block_number: Option<u64>,
    /// `false` when the transaction reverted
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_tags_parse() {
        assert_eq!("latest".parse::<BlockTag>().unwrap(), BlockTag::Latest);
        assert_eq!("finalized".parse::<BlockTag>().unwrap(), BlockTag::Finalized);
        assert_eq!("17000000".parse::<BlockTag>().unwrap(), BlockTag::Number(17_000_000));
        assert_eq!("0x10".parse::<BlockTag>().unwrap(), BlockTag::Number(16));

        let hash = format!("0x{}", "ab".repeat(32));
        assert!(matches!(hash.parse::<BlockTag>().unwrap(), BlockTag::Hash(_)));
        assert!("yesterday".parse::<BlockTag>().is_err());
    }

    #[test]
    fn call_intent_carries_selector_and_description() {
        let sig: FunctionSignature = "step3()".parse().unwrap();
        let intent = TransactionIntent::call(Address::ZERO, &sig, &[]).unwrap();
        assert_eq!(intent.selector(), Some(sig.selector()));
        assert_eq!(intent.description, "step3()");
        assert!(!intent.has_value());
    }
}
