//! Calls and getters described by signature strings
//!
//! Signatures and return types arrive at runtime from configuration, so
//! encoding and decoding go through `alloy-json-abi` and `alloy-dyn-abi`
//! instead of compile-time `sol!` bindings. This module adds the pieces the
//! orchestrator needs on top: canonical signatures, argument-count checks,
//! decoding a single return word, and display of decoded values.

use crate::error::AbiError;
use alloy_dyn_abi::JsonAbiExt;
use alloy_json_abi::Function;
use alloy_primitives::{Bytes, U256};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

pub use alloy_dyn_abi::{DynSolType, DynSolValue};

const WORD: usize = 32;

/// Parse a Solidity type such as `uint256`, `address[]` or `(uint64,bool)`
///
/// # Errors
/// Returns `AbiError::UnsupportedType` for unknown or malformed types
pub fn parse_type(ty: &str) -> Result<DynSolType, AbiError> {
    DynSolType::parse(ty.trim()).map_err(|_| AbiError::UnsupportedType(ty.trim().to_string()))
}

/// `uint256` value from a primitive
#[inline]
#[must_use]
pub fn uint(value: u64) -> DynSolValue {
    DynSolValue::Uint(U256::from(value), 256)
}

/// Render a value for reports and logs
///
/// Addresses are checksummed, integers decimal, byte strings `0x` hex.
#[must_use]
pub fn format_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Address(a) => a.to_checksum(None),
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Uint(n, _) => n.to_string(),
        DynSolValue::Int(n, _) => n.to_string(),
        DynSolValue::FixedBytes(word, size) => format!("0x{}", hex::encode(&word[..(*size).min(WORD)])),
        DynSolValue::Bytes(b) => format!("0x{}", hex::encode(b)),
        DynSolValue::String(s) => format!("{s:?}"),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => format!("[{}]", format_list(items)),
        DynSolValue::Tuple(items) => format!("({})", format_list(items)),
        other => format!("{other:?}"),
    }
}

/// Comma-separated [`format_value`] of each item
#[must_use]
pub fn format_list(values: &[DynSolValue]) -> String {
    values.iter().map(format_value).collect::<Vec<_>>().join(", ")
}

/// Parsed function signature such as `updateDynamicConfig((uint256,uint256),bool)`
///
/// Type aliases are normalized on parse, so `set(uint)` hashes as `set(uint256)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    function: Function,
    inputs: Vec<DynSolType>,
}

impl FunctionSignature {
    /// Function name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Declared input types
    #[inline]
    #[must_use]
    pub fn inputs(&self) -> &[DynSolType] {
        &self.inputs
    }

    /// Canonical form used for selector hashing
    #[must_use]
    pub fn canonical(&self) -> String {
        self.function.signature()
    }

    /// First four bytes of keccak-256 of the canonical signature
    #[must_use]
    pub fn selector(&self) -> [u8; 4] {
        self.function.selector().0
    }

    /// Encode a call: selector followed by the ABI-encoded arguments
    ///
    /// # Errors
    /// Returns `AbiError` when the arguments do not match the signature
    pub fn encode_call(&self, args: &[DynSolValue]) -> Result<Bytes, AbiError> {
        if args.len() != self.inputs.len() {
            return Err(AbiError::ArgumentCount {
                expected: self.inputs.len(),
                actual: args.len(),
            });
        }
        if let Some((ty, value)) = self.inputs.iter().zip(args).find(|(ty, value)| !ty.matches(value)) {
            return Err(AbiError::TypeMismatch {
                expected: ty.sol_type_name().into_owned(),
                value: format_value(value),
            });
        }
        Ok(Bytes::from(self.function.abi_encode_input(args)?))
    }
}

impl FromStr for FunctionSignature {
    type Err = AbiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| AbiError::InvalidSignature {
            signature: s.trim().to_string(),
            reason,
        };
        let parsed = Function::parse(s.trim()).map_err(|e| invalid(e.to_string()))?;
        let inputs = parsed
            .inputs
            .iter()
            .map(|param| parse_type(&param.selector_type()))
            .collect::<Result<Vec<_>, _>>()?;

        let types: Vec<_> = inputs.iter().map(DynSolType::sol_type_name).collect();
        let canonical = format!("{}({})", parsed.name, types.join(","));
        let function = Function::parse(&canonical).map_err(|e| invalid(e.to_string()))?;
        Ok(Self { function, inputs })
    }
}

impl Display for FunctionSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Decode the return value whose head sits at word `word`.
///
/// Preceding head words are skipped as `uint256`; `ty` may be dynamic, in
/// which case its head word holds the offset of the payload.
///
/// # Errors
/// `ShortReturnData` when `word` lies beyond `data`, otherwise the decoder's
/// error for data malformed as `ty`
pub fn decode_return(ty: &DynSolType, data: &[u8], word: usize) -> Result<DynSolValue, AbiError> {
    let in_range = word
        .checked_mul(WORD)
        .and_then(|start| start.checked_add(WORD))
        .is_some_and(|end| end <= data.len());
    if !in_range {
        return Err(AbiError::ShortReturnData { word, len: data.len() });
    }

    let mut layout = vec![DynSolType::Uint(256); word];
    layout.push(ty.clone());
    match DynSolType::Tuple(layout).abi_decode_sequence(data)? {
        DynSolValue::Tuple(mut values) => values.pop().ok_or(AbiError::ShortReturnData { word, len: data.len() }),
        other => Err(AbiError::TypeMismatch {
            expected: ty.sol_type_name().into_owned(),
            value: format_value(&other),
        }),
    }
}

/// Encode a single value as a getter would return it
#[must_use]
pub fn encode_return(value: &DynSolValue) -> Vec<u8> {
    DynSolValue::Tuple(vec![value.clone()]).abi_encode_params()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;
    use proptest::prelude::*;

    #[test]
    fn parses_nested_tuple_signature() {
        let sig: FunctionSignature = "updateDynamicConfig((uint256,uint256),bool)".parse().unwrap();
        assert_eq!(sig.name(), "updateDynamicConfig");
        assert_eq!(
            sig.inputs(),
            &[
                DynSolType::Tuple(vec![DynSolType::Uint(256), DynSolType::Uint(256)]),
                DynSolType::Bool,
            ]
        );
        assert_eq!(sig.canonical(), "updateDynamicConfig((uint256,uint256),bool)");
    }

    #[test]
    fn uint_alias_canonicalizes() {
        let sig: FunctionSignature = "set(uint)".parse().unwrap();
        assert_eq!(sig.canonical(), "set(uint256)");
        let explicit: FunctionSignature = "set(uint256)".parse().unwrap();
        assert_eq!(sig.selector(), explicit.selector());
    }

    #[test]
    fn known_selectors() {
        let transfer: FunctionSignature = "transfer(address,uint256)".parse().unwrap();
        assert_eq!(transfer.selector(), [0xa9, 0x05, 0x9c, 0xbb]);

        let owner: FunctionSignature = "owner()".parse().unwrap();
        assert_eq!(owner.selector(), [0x8d, 0xa5, 0xcb, 0x5b]);
    }

    #[test]
    fn rejects_malformed_signatures() {
        assert!("f(uint256".parse::<FunctionSignature>().is_err());
        assert!("f(uint7)".parse::<FunctionSignature>().is_err());
        assert!("f(NotAType)".parse::<FunctionSignature>().is_err());
    }

    #[test]
    fn encodes_static_tuple_inline() {
        let sig: FunctionSignature = "updateDynamicConfig((uint256,uint256),bool)".parse().unwrap();
        let data = sig
            .encode_call(&[DynSolValue::Tuple(vec![uint(7), uint(9)]), DynSolValue::Bool(true)])
            .unwrap();
        assert_eq!(data.len(), 4 + 3 * 32);
        assert_eq!(&data[..4], &sig.selector());
        assert_eq!(data[4 + 31], 7);
        assert_eq!(data[4 + 63], 9);
        assert_eq!(data[4 + 95], 1);
    }

    #[test]
    fn encodes_dynamic_string_with_offset() {
        let sig: FunctionSignature = "getAddress(string)".parse().unwrap();
        let data = sig.encode_call(&[DynSolValue::String("BondManager".into())]).unwrap();
        // offset, length, one padded data word
        assert_eq!(data.len(), 4 + 3 * 32);
        assert_eq!(data[4 + 31], 0x20);
        assert_eq!(data[4 + 63], 11);
        assert_eq!(&data[4 + 64..4 + 75], b"BondManager");
    }

    #[test]
    fn encodes_address_arrays() {
        let sig: FunctionSignature = "setOwners(address[])".parse().unwrap();
        let owners = DynSolValue::Array(vec![
            DynSolValue::Address(Address::repeat_byte(1)),
            DynSolValue::Address(Address::repeat_byte(2)),
        ]);
        let data = sig.encode_call(&[owners]).unwrap();
        // offset, length, two elements
        assert_eq!(data.len(), 4 + 4 * 32);
        assert_eq!(data[4 + 63], 2);
    }

    #[test]
    fn argument_count_is_checked() {
        let sig: FunctionSignature = "step3()".parse().unwrap();
        let err = sig.encode_call(&[DynSolValue::Bool(true)]).unwrap_err();
        assert_eq!(
            err,
            AbiError::ArgumentCount {
                expected: 0,
                actual: 1
            }
        );
    }

    #[test]
    fn argument_types_are_checked() {
        let sig: FunctionSignature = "pause(bool)".parse().unwrap();
        let err = sig.encode_call(&[uint(1)]).unwrap_err();
        assert!(matches!(err, AbiError::TypeMismatch { .. }), "{err:?}");
    }

    #[test]
    fn decodes_string_return() {
        let encoded = encode_return(&DynSolValue::String("v1.2.0".into()));
        let decoded = decode_return(&DynSolType::String, &encoded, 0).unwrap();
        assert_eq!(decoded, DynSolValue::String("v1.2.0".into()));
    }

    #[test]
    fn decodes_later_words() {
        let mut data = encode_return(&uint(7));
        data.extend(encode_return(&DynSolValue::Address(Address::repeat_byte(0xab))));
        assert_eq!(
            decode_return(&DynSolType::Address, &data, 1).unwrap(),
            DynSolValue::Address(Address::repeat_byte(0xab))
        );
    }

    #[test]
    fn short_return_data_is_reported() {
        let err = decode_return(&DynSolType::Bool, &[0u8; 32], 1).unwrap_err();
        assert_eq!(err, AbiError::ShortReturnData { word: 1, len: 32 });
    }

    #[test]
    fn huge_word_index_is_short_data() {
        let err = decode_return(&DynSolType::Uint(256), &[0u8; 32], usize::MAX / 16).unwrap_err();
        assert_eq!(
            err,
            AbiError::ShortReturnData {
                word: usize::MAX / 16,
                len: 32
            }
        );
    }

    #[test]
    fn out_of_bounds_payload_offset_is_an_error() {
        // head word points at an offset near u64::MAX
        let mut data = vec![0u8; 24];
        data.extend((u64::MAX - 1).to_be_bytes());
        data.extend([0u8; 32]);
        assert!(decode_return(&DynSolType::String, &data, 0).is_err());

        // sane offset, length runs past the end
        let mut data = encode_return(&uint(0x20));
        data.extend(encode_return(&uint(u64::MAX)));
        assert!(decode_return(&DynSolType::Bytes, &data, 0).is_err());
    }

    #[test]
    fn unsupported_types_are_named() {
        assert_eq!(parse_type(" uint256 ").unwrap(), DynSolType::Uint(256));
        assert_eq!(
            parse_type("address[]").unwrap(),
            DynSolType::Array(Box::new(DynSolType::Address))
        );
        assert_eq!(parse_type("uint7").unwrap_err(), AbiError::UnsupportedType("uint7".into()));
    }

    #[test]
    fn values_format_for_humans() {
        let owner = Address::repeat_byte(0xab);
        assert_eq!(format_value(&uint(5)), "5");
        assert_eq!(format_value(&DynSolValue::Address(owner)), owner.to_checksum(None));
        assert_eq!(format_value(&DynSolValue::String("v1".into())), "\"v1\"");
        assert_eq!(
            format_value(&DynSolValue::Tuple(vec![uint(1), DynSolValue::Bool(true)])),
            "(1, true)"
        );
    }

    proptest! {
        #[test]
        fn prop_static_words_decode_in_place(raw in any::<[u8; 20]>(), n in any::<u64>(), flag in any::<bool>()) {
            let values = vec![
                DynSolValue::Address(Address::from(raw)),
                uint(n),
                DynSolValue::Bool(flag),
            ];
            let types = vec![DynSolType::Address, DynSolType::Uint(256), DynSolType::Bool];
            let encoded = DynSolValue::Tuple(values.clone()).abi_encode_params();
            prop_assert_eq!(encoded.len(), 3 * 32);
            for (i, (ty, v)) in types.iter().zip(&values).enumerate() {
                prop_assert_eq!(&decode_return(ty, &encoded, i).unwrap(), v);
            }
        }
    }
}
