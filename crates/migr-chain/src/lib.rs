//! migr-chain - chain access for staged migrations
//!
//! Provides the pieces the orchestrator consumes but does not own:
//! - [`ChainClient`]: read state, submit transactions, fetch receipts
//! - [`JsonRpcClient`]: HTTP JSON-RPC implementation on alloy's provider
//! - [`TransactionIntent`]: unsigned, chain-agnostic call description
//! - [`abi`]: signature parsing, call encoding and return decoding over `alloy-dyn-abi`
//!
//! # Example
//!
//! ```rust,ignore
//! use migr_chain::{ChainClient, FunctionSignature, JsonRpcClient, TransactionIntent};
//!
//! let client = JsonRpcClient::new("http://localhost:8545")?;
//! let step: FunctionSignature = "step3()".parse()?;
//! let intent = TransactionIntent::call(dictator, &step, &[])?;
//! let hash = client.send_transaction(deployer, &intent).await?;
//! ```

pub mod abi;
pub mod client;
pub mod error;
pub mod rpc;
pub mod types;

pub use abi::{DynSolType, DynSolValue, FunctionSignature};
pub use client::ChainClient;
pub use error::{AbiError, ChainError};
pub use rpc::JsonRpcClient;
pub use types::{BlockHeader, BlockTag, TransactionIntent, TxReceipt};

pub use alloy_primitives::{Address, Bytes, B256, U256};
pub use reqwest::Url;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
