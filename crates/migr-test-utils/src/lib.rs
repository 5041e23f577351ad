//! Testing utilities for the migr workspace
//!
//! [`MockChain`] is an in-memory chain with programmable getters, balances,
//! blocks and per-function transaction effects. Tests act as the external
//! signer by calling [`MockChain::update`] from a spawned task.

#![allow(missing_docs)]

use async_trait::async_trait;
use migr_chain::{
    abi::{encode_return, uint}, Address, BlockHeader, BlockTag, Bytes, ChainClient, ChainError,
    DynSolValue, FunctionSignature, TransactionIntent, TxReceipt, B256, U256,
};
use migr_core::dispatch::{ArtifactSink, ManualArtifact};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Mutation applied when a transaction to a given function is mined
pub type Effect = Arc<dyn Fn(&mut ChainState, &TransactionIntent) + Send + Sync>;

/// Getter slot
#[derive(Debug, Clone)]
pub enum Slot {
    Value(DynSolValue),
    Revert(String),
}

/// A transaction the mock accepted
#[derive(Debug, Clone)]
pub struct SentTransaction {
    pub from: Address,
    pub intent: TransactionIntent,
    pub hash: B256,
}

/// Raw chain state, mutable from tests and effects
#[derive(Default)]
pub struct ChainState {
    pub chain_id: u64,
    pub accounts: Vec<Address>,
    pub calls: HashMap<(Address, Bytes), Slot>,
    pub balances: HashMap<Address, U256>,
    pub codes: HashMap<Address, Bytes>,
    pub blocks: Vec<BlockHeader>,
    pub finalized: Option<u64>,
    pub sent: Vec<SentTransaction>,
    pub receipts: HashMap<B256, TxReceipt>,
    pub effects: HashMap<(Address, [u8; 4]), Effect>,
    /// Number of upcoming reads that fail with a transport error
    pub fail_next_reads: u32,
    /// Reject submissions with this RPC message
    pub reject_sends: Option<String>,
    /// Mine submissions as reverted
    pub revert_sends: bool,
}

impl ChainState {
    /// Set the value returned by a call with exact calldata
    pub fn set_call(&mut self, target: Address, calldata: Bytes, value: DynSolValue) {
        self.calls.insert((target, calldata), Slot::Value(value));
    }

    /// Set the value returned by an argument-less getter
    pub fn set_value(&mut self, target: Address, getter: &FunctionSignature, value: DynSolValue) {
        self.set_call(target, getter_calldata(getter), value);
    }

    /// Current value of an argument-less getter
    pub fn value(&self, target: Address, getter: &FunctionSignature) -> Option<DynSolValue> {
        match self.calls.get(&(target, getter_calldata(getter))) {
            Some(Slot::Value(v)) => Some(v.clone()),
            _ => None,
        }
    }

    fn tip(&self) -> u64 {
        self.blocks.last().map_or(0, |b| b.number)
    }

    fn mine(&mut self) -> u64 {
        let number = self.tip() + 1;
        let timestamp = self.blocks.last().map_or(1_700_000_000, |b| b.timestamp + 12);
        self.blocks.push(BlockHeader {
            number,
            hash: B256::from(U256::from(number).to_be_bytes::<32>()),
            timestamp,
        });
        number
    }
}

fn getter_calldata(getter: &FunctionSignature) -> Bytes {
    Bytes::from(getter.selector().to_vec())
}

fn sig(signature: &str) -> FunctionSignature {
    signature.parse().unwrap()
}

/// In-memory [`ChainClient`]
#[derive(Clone)]
pub struct MockChain {
    state: Arc<Mutex<ChainState>>,
}

impl MockChain {
    pub fn new(chain_id: u64) -> Self {
        let mut state = ChainState {
            chain_id,
            ..ChainState::default()
        };
        state.mine();
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Run `f` against the state, as an external actor would
    pub fn update<R>(&self, f: impl FnOnce(&mut ChainState) -> R) -> R {
        let mut state = self.state.lock();
        f(&mut state)
    }

    pub fn set_value(&self, target: Address, getter: &FunctionSignature, value: DynSolValue) {
        self.update(|s| s.set_value(target, getter, value));
    }

    pub fn set_call(&self, target: Address, calldata: Bytes, value: DynSolValue) {
        self.update(|s| s.set_call(target, calldata, value));
    }

    pub fn set_revert(&self, target: Address, getter: &FunctionSignature) {
        self.update(|s| {
            s.calls
                .insert((target, getter_calldata(getter)), Slot::Revert("execution reverted".into()))
        });
    }

    pub fn value(&self, target: Address, getter: &FunctionSignature) -> Option<DynSolValue> {
        self.state.lock().value(target, getter)
    }

    pub fn set_balance(&self, account: Address, balance: U256) {
        self.update(|s| s.balances.insert(account, balance));
    }

    /// Deploy placeholder bytecode at `account`
    pub fn set_code(&self, account: Address, code: &[u8]) {
        self.update(|s| s.codes.insert(account, Bytes::copy_from_slice(code)));
    }

    pub fn set_accounts(&self, accounts: Vec<Address>) {
        self.update(|s| s.accounts = accounts);
    }

    /// Append a block with the given timestamp and return its header
    pub fn push_block(&self, timestamp: u64) -> BlockHeader {
        self.update(|s| {
            s.mine();
            let header = s.blocks.last_mut().unwrap();
            header.timestamp = timestamp;
            *header
        })
    }

    pub fn set_finalized(&self, number: u64) {
        self.update(|s| s.finalized = Some(number));
    }

    /// Register an effect for transactions calling `function` on `target`
    pub fn on_transaction(
        &self,
        target: Address,
        function: &FunctionSignature,
        effect: impl Fn(&mut ChainState, &TransactionIntent) + Send + Sync + 'static,
    ) {
        self.update(|s| s.effects.insert((target, function.selector()), Arc::new(effect)));
    }

    /// Transactions accepted so far
    pub fn sent(&self) -> Vec<SentTransaction> {
        self.state.lock().sent.clone()
    }

    pub fn fail_next_reads(&self, count: u32) {
        self.update(|s| s.fail_next_reads = count);
    }

    pub fn reject_sends(&self, message: &str) {
        self.update(|s| s.reject_sends = Some(message.to_string()));
    }

    pub fn revert_sends(&self) {
        self.update(|s| s.revert_sends = true);
    }

    // Control contract helpers

    pub fn set_pointer(&self, control: Address, step: u64) {
        self.set_value(control, &sig("currentStep()"), uint(step));
    }

    pub fn pointer(&self, control: Address) -> Option<U256> {
        match self.value(control, &sig("currentStep()")) {
            Some(DynSolValue::Uint(n, _)) => Some(n),
            _ => None,
        }
    }

    /// Make `step<n>()` on `control` advance the pointer to `n + 1`
    pub fn advance_pointer_on_step(&self, control: Address, step: u64) {
        self.on_transaction(control, &sig(&format!("step{step}()")), move |s, _| {
            s.set_value(control, &sig("currentStep()"), uint(step + 1));
        });
    }

    fn read_guard(&self) -> Result<(), ChainError> {
        self.update(|s| {
            if s.fail_next_reads > 0 {
                s.fail_next_reads -= 1;
                Err(ChainError::Transport("mock: connection reset".into()))
            } else {
                Ok(())
            }
        })
    }
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new(31337)
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        Ok(self.state.lock().chain_id)
    }

    async fn accounts(&self) -> Result<Vec<Address>, ChainError> {
        Ok(self.state.lock().accounts.clone())
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        self.read_guard()?;
        let state = self.state.lock();
        match state.calls.get(&(to, data)) {
            Some(Slot::Value(value)) => Ok(Bytes::from(encode_return(value))),
            Some(Slot::Revert(reason)) => Err(ChainError::Reverted {
                reason: reason.clone(),
                data: None,
            }),
            None => Err(ChainError::Reverted {
                reason: "execution reverted".into(),
                data: None,
            }),
        }
    }

    async fn balance(&self, account: Address) -> Result<U256, ChainError> {
        self.read_guard()?;
        Ok(self.state.lock().balances.get(&account).copied().unwrap_or_default())
    }

    async fn code(&self, account: Address) -> Result<Bytes, ChainError> {
        self.read_guard()?;
        Ok(self.state.lock().codes.get(&account).cloned().unwrap_or_default())
    }

    async fn block(&self, tag: BlockTag) -> Result<Option<BlockHeader>, ChainError> {
        self.read_guard()?;
        let state = self.state.lock();
        let found = match tag {
            BlockTag::Latest => state.blocks.last(),
            BlockTag::Earliest => state.blocks.first(),
            BlockTag::Finalized | BlockTag::Safe => match state.finalized {
                Some(n) => state.blocks.iter().find(|b| b.number == n),
                None => state.blocks.last(),
            },
            BlockTag::Number(n) => state.blocks.iter().find(|b| b.number == n),
            BlockTag::Hash(hash) => state.blocks.iter().find(|b| b.hash == hash),
        };
        Ok(found.cloned())
    }

    async fn send_transaction(
        &self,
        from: Address,
        intent: &TransactionIntent,
    ) -> Result<B256, ChainError> {
        let mut state = self.state.lock();
        if let Some(message) = state.reject_sends.clone() {
            return Err(ChainError::Rpc {
                code: -32000,
                message,
            });
        }

        let block_number = state.mine();
        let hash = B256::from(U256::from(state.sent.len() as u64 + 1).to_be_bytes::<32>());
        state.sent.push(SentTransaction {
            from,
            intent: intent.clone(),
            hash,
        });

        let success = !state.revert_sends;
        if success {
            let effect = intent
                .selector()
                .and_then(|sel| state.effects.get(&(intent.to, sel)).cloned());
            if let Some(effect) = effect {
                effect(&mut *state, intent);
            }
        }
        state.receipts.insert(
            hash,
            TxReceipt {
                transaction_hash: hash,
                block_number: Some(block_number),
                success,
            },
        );
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<TxReceipt>, ChainError> {
        Ok(self.state.lock().receipts.get(&hash).cloned())
    }
}

/// Sink that keeps every published manual artifact
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    published: Arc<Mutex<Vec<(String, ManualArtifact)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(String, ManualArtifact)> {
        self.published.lock().clone()
    }
}

impl ArtifactSink for MemorySink {
    fn publish(&self, label: &str, artifact: &ManualArtifact) {
        self.published.lock().push((label.to_string(), artifact.clone()));
    }
}

/// Deterministic address for fixtures
pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn getters_round_trip_through_call() {
        let chain = MockChain::default();
        let target = addr(1);
        chain.set_pointer(target, 3);

        let data = chain
            .call(target, getter_calldata(&sig("currentStep()")))
            .await
            .unwrap();
        assert_eq!(U256::from_be_slice(&data), U256::from(3));
    }

    #[tokio::test]
    async fn step_effect_advances_pointer() {
        let chain = MockChain::default();
        let control = addr(2);
        chain.set_pointer(control, 1);
        chain.advance_pointer_on_step(control, 1);

        let intent = TransactionIntent::call(control, &sig("step1()"), &[]).unwrap();
        let hash = chain.send_transaction(addr(9), &intent).await.unwrap();

        assert_eq!(chain.pointer(control), Some(U256::from(2)));
        assert!(chain.transaction_receipt(hash).await.unwrap().unwrap().success);
    }
}
