//! The chain access seam
//!
//! Everything the orchestrator knows about the chain goes through
//! [`ChainClient`]. Production uses [`JsonRpcClient`](crate::JsonRpcClient);
//! tests substitute an in-memory chain.

use crate::error::ChainError;
use crate::types::{BlockHeader, BlockTag, TransactionIntent, TxReceipt};
use alloy_primitives::{Address, Bytes, B256, U256};

/// Read and submit access to a chain
#[async_trait::async_trait]
pub trait ChainClient: Send + Sync {
    /// Chain id of the connected network
    async fn chain_id(&self) -> Result<u64, ChainError>;

    /// Accounts the node can sign for
    async fn accounts(&self) -> Result<Vec<Address>, ChainError>;

    /// Read-only call against the latest state, sent from the zero address
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError>;

    /// Balance of an account in wei
    async fn balance(&self, account: Address) -> Result<U256, ChainError>;

    /// Deployed code at an address (empty when none)
    async fn code(&self, account: Address) -> Result<Bytes, ChainError>;

    /// Block header lookup; `None` when the node does not know the block
    async fn block(&self, tag: BlockTag) -> Result<Option<BlockHeader>, ChainError>;

    /// Submit a transaction signed by `from`
    async fn send_transaction(
        &self,
        from: Address,
        intent: &TransactionIntent,
    ) -> Result<B256, ChainError>;

    /// Receipt of a submitted transaction; `None` while pending
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceipt>, ChainError>;
}
