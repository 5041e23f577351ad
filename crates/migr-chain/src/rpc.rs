//! JSON-RPC client over alloy's HTTP provider

use crate::client::ChainClient;
use crate::error::ChainError;
use crate::types::{BlockHeader, BlockTag, TransactionIntent, TxReceipt};
use alloy::network::TransactionBuilder;
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::eth::TransactionRequest;
use alloy::transports::http::Http;
use alloy::transports::{TransportError, TransportResult};
use alloy_primitives::{Address, Bytes, B256, U256};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::borrow::Cow;
use std::fmt::Debug;
use std::future::IntoFuture;
use std::time::Duration;

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP JSON-RPC client
///
/// Submission goes through `eth_sendTransaction`, so the node must hold the
/// key for the sending account.
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    provider: RootProvider<Http<Client>>,
    url: Url,
}

// Blocks and receipts are read into the fields we consume so that L2
// variants with extra transaction or receipt types still decode.
#[derive(Debug, Deserialize)]
struct RpcBlock {
    number: String,
    hash: B256,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    #[serde(default)]
    block_number: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl JsonRpcClient {
    /// Create a client for `url`
    ///
    /// # Errors
    /// Returns `ChainError::Transport` for an unparsable URL
    pub fn new(url: &str) -> Result<Self, ChainError> {
        let url = Url::parse(url)
            .map_err(|e| ChainError::Transport(format!("invalid RPC url `{url}`: {e}")))?;
        let provider: RootProvider<Http<Client>> = ProviderBuilder::new().on_http(url.clone());
        Ok(Self { provider, url })
    }

    /// Endpoint this client talks to
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Issue a raw JSON-RPC request
    ///
    /// # Errors
    /// Transport failures, JSON-RPC error objects, and undecodable results
    pub async fn request<T>(&self, method: &str, params: Value) -> Result<T, ChainError>
    where
        T: DeserializeOwned + Debug + Send + Sync + Unpin + 'static,
    {
        tracing::trace!(method, "rpc request");
        timed(
            method,
            self.provider
                .raw_request::<Value, T>(Cow::Owned(method.to_owned()), params),
        )
        .await
    }

    async fn block_by(&self, tag: BlockTag) -> Result<Option<RpcBlock>, ChainError> {
        match tag {
            BlockTag::Hash(hash) => self.request("eth_getBlockByHash", json!([hash, false])).await,
            BlockTag::Number(n) => {
                self.request("eth_getBlockByNumber", json!([format!("{n:#x}"), false]))
                    .await
            }
            named => {
                self.request("eth_getBlockByNumber", json!([named.to_string(), false]))
                    .await
            }
        }
    }
}

/// Await a provider call under [`REQUEST_TIMEOUT`]
async fn timed<F, T>(method: &str, call: F) -> Result<T, ChainError>
where
    F: IntoFuture<Output = TransportResult<T>>,
{
    tokio::time::timeout(REQUEST_TIMEOUT, call)
        .await
        .map_err(|_| ChainError::Transport(format!("{method}: no response after {REQUEST_TIMEOUT:?}")))?
        .map_err(|e| classify(method, e))
}

/// Map an alloy transport error onto [`ChainError`]
fn classify(method: &str, err: TransportError) -> ChainError {
    if let Some(payload) = err.as_error_resp() {
        let data = payload
            .data
            .as_ref()
            .map(|raw| raw.get().trim_matches('"').to_string());
        return ChainError::from_rpc(payload.code, payload.message.to_string(), data);
    }
    if err.is_transport_error() {
        ChainError::Transport(format!("{method}: {err}"))
    } else {
        ChainError::Decode(format!("{method}: {err}"))
    }
}

/// Parse a JSON-RPC quantity (`0x`-prefixed hex)
fn quantity(field: &str, raw: &str) -> Result<u64, ChainError> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| ChainError::Decode(format!("{field}: `{raw}` is not a hex quantity")))?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| ChainError::Decode(format!("{field}: `{raw}`: {e}")))
}

#[async_trait::async_trait]
impl ChainClient for JsonRpcClient {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        timed("eth_chainId", self.provider.get_chain_id()).await
    }

    async fn accounts(&self) -> Result<Vec<Address>, ChainError> {
        timed("eth_accounts", self.provider.get_accounts()).await
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        let request = TransactionRequest::default()
            .with_from(Address::ZERO)
            .with_to(to)
            .with_input(data);
        timed("eth_call", self.provider.call(&request)).await
    }

    async fn balance(&self, account: Address) -> Result<U256, ChainError> {
        timed("eth_getBalance", self.provider.get_balance(account)).await
    }

    async fn code(&self, account: Address) -> Result<Bytes, ChainError> {
        timed("eth_getCode", self.provider.get_code_at(account)).await
    }

    async fn block(&self, tag: BlockTag) -> Result<Option<BlockHeader>, ChainError> {
        let Some(block) = self.block_by(tag).await? else {
            return Ok(None);
        };
        Ok(Some(BlockHeader {
            number: quantity("number", &block.number)?,
            hash: block.hash,
            timestamp: quantity("timestamp", &block.timestamp)?,
        }))
    }

    async fn send_transaction(
        &self,
        from: Address,
        intent: &TransactionIntent,
    ) -> Result<B256, ChainError> {
        tracing::debug!(%from, to = %intent.to, "eth_sendTransaction");
        let request = TransactionRequest::default()
            .with_from(from)
            .with_to(intent.to)
            .with_input(intent.data.clone())
            .with_value(intent.value);
        let pending = timed("eth_sendTransaction", self.provider.send_transaction(request)).await?;
        Ok(*pending.tx_hash())
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceipt>, ChainError> {
        let receipt: Option<RpcReceipt> = self
            .request("eth_getTransactionReceipt", json!([hash]))
            .await?;
        receipt
            .map(|r| {
                let block_number = r
                    .block_number
                    .as_deref()
                    .map(|n| quantity("blockNumber", n))
                    .transpose()?;
                // Pre-byzantium receipts carry no status field.
                let success = match r.status.as_deref() {
                    Some(status) => quantity("status", status)? == 1,
                    None => true,
                };
                Ok(TxReceipt {
                    transaction_hash: r.transaction_hash,
                    block_number,
                    success,
                })
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::rpc::json_rpc::ErrorPayload;

    #[test]
    fn rejects_bad_url() {
        assert!(matches!(
            JsonRpcClient::new("not a url"),
            Err(ChainError::Transport(_))
        ));
    }

    #[test]
    fn quantities_require_hex_prefix() {
        assert_eq!(quantity("n", "0x1a").unwrap(), 26);
        assert!(quantity("n", "26").is_err());
    }

    #[test]
    fn revert_errors_are_classified() {
        let err = ChainError::from_rpc(3, "execution reverted: paused".into(), None);
        assert!(err.is_revert());
        let err = ChainError::from_rpc(-32000, "nonce too low".into(), None);
        assert!(!err.is_revert());
    }

    #[test]
    fn error_payloads_keep_code_and_message() {
        let payload: ErrorPayload = serde_json::from_value(json!({
            "code": -32000,
            "message": "nonce too low"
        }))
        .unwrap();
        let err = classify("eth_sendTransaction", TransportError::ErrorResp(payload));
        assert_eq!(
            err,
            ChainError::Rpc {
                code: -32000,
                message: "nonce too low".into()
            }
        );
    }

    #[test]
    fn null_results_are_decode_errors() {
        let err = classify("eth_chainId", TransportError::NullResp);
        assert!(matches!(err, ChainError::Decode(msg) if msg.starts_with("eth_chainId")));
    }
}
