//! Control contract access
//!
//! The control contract owns the step pointer and exposes one entry point
//! per step (`step1()`, `step2()`, ...). The orchestrator only reads the
//! pointer; it moves when a step transaction executes.

use crate::verify::{Evaluation, Predicate};
use async_trait::async_trait;
use migr_chain::abi::{decode_return, format_value};
use migr_chain::{
    AbiError, Address, Bytes, ChainClient, ChainError, DynSolType, DynSolValue, FunctionSignature,
    TransactionIntent,
};
use std::sync::Arc;

/// Default pointer getter
pub const DEFAULT_POINTER_SIGNATURE: &str = "currentStep()";

/// Handle on the control contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlContract {
    address: Address,
    pointer: FunctionSignature,
}

impl ControlContract {
    /// Create a handle using `pointer_signature` as the pointer getter
    ///
    /// # Errors
    /// Returns `AbiError` if the signature does not parse or takes arguments
    pub fn new(address: Address, pointer_signature: &str) -> Result<Self, AbiError> {
        let pointer: FunctionSignature = pointer_signature.parse()?;
        if !pointer.inputs().is_empty() {
            return Err(AbiError::ArgumentCount {
                expected: 0,
                actual: pointer.inputs().len(),
            });
        }
        Ok(Self { address, pointer })
    }

    /// Contract address
    #[inline]
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// Pointer getter signature
    #[inline]
    #[must_use]
    pub fn pointer_signature(&self) -> &FunctionSignature {
        &self.pointer
    }

    /// Read the current step pointer
    ///
    /// # Errors
    /// Chain failures, or a pointer that does not fit in `u64`
    pub async fn read_pointer(&self, chain: &dyn ChainClient) -> Result<u64, ChainError> {
        let data = chain
            .call(self.address, Bytes::from(self.pointer.selector().to_vec()))
            .await?;
        match decode_return(&DynSolType::Uint(256), &data, 0)? {
            DynSolValue::Uint(n, _) => u64::try_from(n)
                .map_err(|_| ChainError::Decode(format!("step pointer {n} out of range"))),
            other => Err(ChainError::Decode(format!("unexpected pointer value {}", format_value(&other)))),
        }
    }

    /// Transaction that executes step `number`
    ///
    /// # Errors
    /// Never in practice; the generated signature always parses
    pub fn step_intent(&self, number: u64) -> Result<TransactionIntent, AbiError> {
        let signature: FunctionSignature = format!("step{number}()").parse()?;
        TransactionIntent::call(self.address, &signature, &[])
    }

    /// Predicate holding once the pointer has moved past `number`
    #[must_use]
    pub fn pointer_past(&self, number: u64) -> Arc<dyn Predicate> {
        Arc::new(PointerPast {
            control: self.clone(),
            number,
        })
    }
}

/// Default completion predicate: the pointer advanced past a step
#[derive(Debug, Clone)]
pub struct PointerPast {
    control: ControlContract,
    number: u64,
}

#[async_trait]
impl Predicate for PointerPast {
    fn describe(&self) -> String {
        format!("{} > {}", self.control.pointer.name(), self.number)
    }

    async fn evaluate(&self, chain: &dyn ChainClient) -> Result<Evaluation, ChainError> {
        let pointer = self.control.read_pointer(chain).await?;
        Ok(Evaluation::compare(
            pointer > self.number,
            format!("> {}", self.number),
            pointer.to_string(),
        ))
    }
}
