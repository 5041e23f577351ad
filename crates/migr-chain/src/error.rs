//! Error types for chain access and ABI handling

/// Errors surfaced by a [`ChainClient`](crate::ChainClient)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// The request never produced a JSON-RPC response
    #[error("transport error: {0}")]
    Transport(String),

    /// The node answered with a JSON-RPC error object
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Message reported by the node
        message: String,
    },

    /// The call executed and reverted
    #[error("execution reverted: {reason}")]
    Reverted {
        /// Revert reason as reported by the node
        reason: String,
        /// Raw revert data, if any
        data: Option<String>,
    },

    /// The response could not be decoded into the expected shape
    #[error("decode error: {0}")]
    Decode(String),

    /// ABI encoding or decoding failed
    #[error(transparent)]
    Abi(#[from] AbiError),
}

impl ChainError {
    /// Build an error from a JSON-RPC error object.
    ///
    /// Code 3 and messages mentioning a revert are classified as
    /// [`ChainError::Reverted`], everything else is kept as a plain RPC error.
    #[must_use]
    pub fn from_rpc(code: i64, message: String, data: Option<String>) -> Self {
        if code == 3 || message.to_ascii_lowercase().contains("revert") {
            Self::Reverted {
                reason: message,
                data,
            }
        } else {
            Self::Rpc { code, message }
        }
    }

    /// Check whether the error is a revert
    #[inline]
    #[must_use]
    pub fn is_revert(&self) -> bool {
        matches!(self, Self::Reverted { .. })
    }
}

/// ABI encoding and decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbiError {
    /// Function signature could not be parsed
    #[error("invalid function signature `{signature}`: {reason}")]
    InvalidSignature {
        /// Signature as written
        signature: String,
        /// Parser message
        reason: String,
    },

    /// Unknown or unsupported parameter type
    #[error("unsupported parameter type `{0}`")]
    UnsupportedType(String),

    /// Wrong number of arguments for a signature
    #[error("expected {expected} arguments, got {actual}")]
    ArgumentCount {
        /// Arguments declared by the signature
        expected: usize,
        /// Arguments supplied
        actual: usize,
    },

    /// Value does not match the declared parameter type
    #[error("value {value} does not fit parameter type {expected}")]
    TypeMismatch {
        /// Declared parameter type
        expected: String,
        /// Offending value
        value: String,
    },

    /// Return data shorter than the requested word
    #[error("return data has {len} bytes, word {word} is out of range")]
    ShortReturnData {
        /// Requested word index
        word: usize,
        /// Length of the return data
        len: usize,
    },

    /// Encoder or decoder rejected the data
    #[error("abi codec: {0}")]
    Codec(String),
}

impl From<alloy_dyn_abi::Error> for AbiError {
    fn from(e: alloy_dyn_abi::Error) -> Self {
        Self::Codec(e.to_string())
    }
}
