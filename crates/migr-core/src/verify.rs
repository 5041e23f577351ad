//! Post-step verification
//!
//! Predicates read chain state and compare it with an expectation. They are
//! side-effect free and evaluated in order; the first failure stops the
//! verification of a step.

use crate::error::VerificationFailure;
use async_trait::async_trait;
use migr_chain::abi::{decode_return, format_value};
use migr_chain::{Address, Bytes, ChainClient, ChainError, DynSolType, DynSolValue};
use std::sync::Arc;

/// Result of evaluating one predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// Whether the predicate holds
    pub passed: bool,
    /// Expected value, rendered
    pub expected: String,
    /// Observed value, rendered
    pub actual: String,
}

impl Evaluation {
    /// Evaluation from a comparison
    #[must_use]
    pub fn compare(passed: bool, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            passed,
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// A named, read-only condition on chain state
#[async_trait]
pub trait Predicate: Send + Sync {
    /// Name used in logs and failure reports
    fn describe(&self) -> String;

    /// Evaluate against current chain state
    async fn evaluate(&self, chain: &dyn ChainClient) -> Result<Evaluation, ChainError>;

    /// Shorthand for the pass/fail bit
    async fn holds(&self, chain: &dyn ChainClient) -> Result<bool, ChainError> {
        Ok(self.evaluate(chain).await?.passed)
    }
}

/// Where a checked value comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Read {
    /// Return word of a read-only call
    Call {
        /// Contract to call
        target: Address,
        /// Encoded calldata
        calldata: Bytes,
        /// Type of the returned value
        returns: DynSolType,
        /// Return word index
        word: usize,
    },
    /// Balance of an account in wei
    Balance {
        /// Account to read
        account: Address,
    },
}

/// Comparison applied to the read value
#[derive(Debug, Clone, PartialEq)]
pub enum Expectation {
    /// Value equals
    Equals(DynSolValue),
    /// Value differs
    NotEquals(DynSolValue),
    /// The read itself reverts
    Reverts,
}

/// Compare a getter or balance against an expected value
#[derive(Debug, Clone)]
pub struct ValueCheck {
    name: String,
    read: Read,
    expect: Expectation,
}

impl ValueCheck {
    /// Create a check
    #[must_use]
    pub fn new(name: impl Into<String>, read: Read, expect: Expectation) -> Self {
        Self {
            name: name.into(),
            read,
            expect,
        }
    }

    /// Check that return word 0 of a call equals `value`, decoded as the value's own type
    #[must_use]
    pub fn call_equals(name: impl Into<String>, target: Address, calldata: Bytes, value: DynSolValue) -> Self {
        let returns = value.as_type().unwrap_or(DynSolType::Uint(256));
        Self::new(
            name,
            Read::Call {
                target,
                calldata,
                returns,
                word: 0,
            },
            Expectation::Equals(value),
        )
    }

    async fn read_value(&self, chain: &dyn ChainClient) -> Result<DynSolValue, ChainError> {
        match &self.read {
            Read::Call {
                target,
                calldata,
                returns,
                word,
            } => {
                let data = chain.call(*target, calldata.clone()).await?;
                Ok(decode_return(returns, &data, *word)?)
            }
            Read::Balance { account } => Ok(DynSolValue::Uint(chain.balance(*account).await?, 256)),
        }
    }
}

#[async_trait]
impl Predicate for ValueCheck {
    fn describe(&self) -> String {
        self.name.clone()
    }

    async fn evaluate(&self, chain: &dyn ChainClient) -> Result<Evaluation, ChainError> {
        let read = self.read_value(chain).await;
        match (&self.expect, read) {
            (Expectation::Reverts, Ok(value)) => {
                Ok(Evaluation::compare(false, "revert", format_value(&value)))
            }
            (Expectation::Reverts, Err(e)) if e.is_revert() => {
                Ok(Evaluation::compare(true, "revert", "revert"))
            }
            (Expectation::Equals(expected), Ok(actual)) => Ok(Evaluation::compare(
                &actual == expected,
                format_value(expected),
                format_value(&actual),
            )),
            (Expectation::NotEquals(expected), Ok(actual)) => Ok(Evaluation::compare(
                &actual != expected,
                format!("not {}", format_value(expected)),
                format_value(&actual),
            )),
            (Expectation::Equals(expected), Err(e)) if e.is_revert() => {
                Ok(Evaluation::compare(false, format_value(expected), e.to_string()))
            }
            (Expectation::NotEquals(expected), Err(e)) if e.is_revert() => {
                Ok(Evaluation::compare(false, format!("not {}", format_value(expected)), e.to_string()))
            }
            (_, Err(e)) => Err(e),
        }
    }
}

/// Evaluate predicates in order, stopping at the first that does not hold
///
/// A chain error while evaluating counts as a failure of that predicate.
///
/// # Errors
/// Returns the first failing predicate with expected and actual values
pub async fn verify(predicates: &[Arc<dyn Predicate>], chain: &dyn ChainClient) -> Result<(), VerificationFailure> {
    for predicate in predicates {
        let check = predicate.describe();
        let evaluation = match predicate.evaluate(chain).await {
            Ok(evaluation) => evaluation,
            Err(e) => {
                tracing::warn!(%check, error = %e, "verification read failed");
                return Err(VerificationFailure {
                    check,
                    expected: "readable value".into(),
                    actual: e.to_string(),
                });
            }
        };
        if !evaluation.passed {
            return Err(VerificationFailure {
                check,
                expected: evaluation.expected,
                actual: evaluation.actual,
            });
        }
        tracing::debug!(%check, value = %evaluation.actual, "check passed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use migr_chain::abi::uint;
    use migr_chain::{FunctionSignature, U256};
    use migr_test_utils::MockChain;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        name: &'static str,
        passed: bool,
        evaluated: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Predicate for Fixed {
        fn describe(&self) -> String {
            self.name.to_string()
        }

        async fn evaluate(&self, _chain: &dyn ChainClient) -> Result<Evaluation, ChainError> {
            self.evaluated.fetch_add(1, Ordering::SeqCst);
            Ok(Evaluation::compare(self.passed, "true", self.passed.to_string()))
        }
    }

    fn fixed(name: &'static str, passed: bool, evaluated: &Arc<AtomicUsize>) -> Arc<dyn Predicate> {
        Arc::new(Fixed {
            name,
            passed,
            evaluated: evaluated.clone(),
        })
    }

    #[tokio::test]
    async fn verification_is_fail_fast() {
        let chain = MockChain::new(1);
        let p1 = Arc::new(AtomicUsize::new(0));
        let p2 = Arc::new(AtomicUsize::new(0));
        let p3 = Arc::new(AtomicUsize::new(0));

        let failure = verify(&[fixed("P1", true, &p1), fixed("P2", false, &p2), fixed("P3", true, &p3)], &chain)
            .await
            .unwrap_err();

        assert_eq!(failure.check, "P2");
        assert_eq!(failure.actual, "false");
        assert_eq!(p1.load(Ordering::SeqCst), 1);
        assert_eq!(p2.load(Ordering::SeqCst), 1);
        assert_eq!(p3.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn getter_equality_and_mismatch() {
        let chain = MockChain::new(1);
        let target = Address::repeat_byte(0x11);
        let sig: FunctionSignature = "value()".parse().unwrap();
        chain.set_value(target, &sig, uint(5));

        let ok = ValueCheck::call_equals("value()", target, sig.encode_call(&[]).unwrap(), uint(5));
        assert!(ok.holds(&chain).await.unwrap());

        let bad = ValueCheck::call_equals("value()", target, sig.encode_call(&[]).unwrap(), uint(6));
        let eval = bad.evaluate(&chain).await.unwrap();
        assert!(!eval.passed);
        assert_eq!(eval.expected, "6");
        assert_eq!(eval.actual, "5");
    }

    #[tokio::test]
    async fn revert_expectation() {
        let chain = MockChain::new(1);
        let target = Address::repeat_byte(0x22);
        let sig: FunctionSignature = "implementation()".parse().unwrap();
        chain.set_revert(target, &sig);

        let check = ValueCheck::new(
            "implementation() reverts",
            Read::Call {
                target,
                calldata: sig.encode_call(&[]).unwrap(),
                returns: DynSolType::Address,
                word: 0,
            },
            Expectation::Reverts,
        );
        assert!(check.holds(&chain).await.unwrap());

        let equals = ValueCheck::call_equals(
            "implementation()",
            target,
            sig.encode_call(&[]).unwrap(),
            DynSolValue::Address(Address::ZERO),
        );
        assert!(!equals.holds(&chain).await.unwrap());
    }

    #[tokio::test]
    async fn malformed_return_data_is_a_read_error() {
        let chain = MockChain::new(1);
        let target = Address::repeat_byte(0x44);
        let sig: FunctionSignature = "version()".parse().unwrap();
        // a uint read back as a string points its payload far past the data
        chain.set_value(target, &sig, DynSolValue::Uint(U256::MAX, 256));

        let check = ValueCheck::new(
            "version()",
            Read::Call {
                target,
                calldata: sig.encode_call(&[]).unwrap(),
                returns: DynSolType::String,
                word: usize::MAX / 16,
            },
            Expectation::Equals(DynSolValue::String("v1".into())),
        );
        assert!(check.evaluate(&chain).await.is_err());

        let failure = verify(&[Arc::new(check) as Arc<dyn Predicate>], &chain).await.unwrap_err();
        assert_eq!(failure.check, "version()");
        assert_eq!(failure.expected, "readable value");
    }

    #[tokio::test]
    async fn balance_comparison() {
        let chain = MockChain::new(1);
        let account = Address::repeat_byte(0x33);
        chain.set_balance(account, U256::ZERO);

        let check = ValueCheck::new(
            "balance drained",
            Read::Balance { account },
            Expectation::Equals(DynSolValue::Uint(U256::ZERO, 256)),
        );
        assert!(check.holds(&chain).await.unwrap());

        let check = ValueCheck::new(
            "balance not drained",
            Read::Balance { account },
            Expectation::NotEquals(DynSolValue::Uint(U256::ZERO, 256)),
        );
        assert!(!check.holds(&chain).await.unwrap());
    }
}
