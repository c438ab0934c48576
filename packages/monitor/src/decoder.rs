//! Transaction Decoder
//!
//! Lenient decoding of JSON-RPC transaction payloads into [`RawTransaction`]
//! plus the single ABI decode the monitor performs: ERC-20
//! `transfer(address,uint256)` calldata.

use std::str::FromStr;

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// ERC-20 `transfer(address,uint256)` selector - 0xa9059cbb
pub const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// Selector plus two 32-byte ABI words
const TRANSFER_CALLDATA_LEN: usize = 4 + 32 + 32;

/// Errors that can occur during decoding
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("Input too short: expected at least {expected} bytes, got {actual}")]
    InputTooShort { expected: usize, actual: usize },

    #[error("Selector 0x{0} is not transfer(address,uint256)")]
    UnexpectedSelector(String),

    #[error("Recipient word has non-zero padding")]
    DirtyAddressPadding,
}

/// Transaction as returned by the node, before any validation
///
/// Every field except `hash` is optional because the payload comes from an
/// untrusted remote and several fetch paths only know part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    /// Transaction hash as reported by the node (not validated here)
    pub hash: String,
    /// Sender, `None` when absent or unparsable
    pub from: Option<Address>,
    /// Recipient, `None` for contract creation
    pub to: Option<Address>,
    /// Calldata exactly as received, possibly not hex
    pub input: Option<String>,
    /// Value in wei
    pub value: U256,
    /// Block the node placed the transaction in, if reported
    pub block_number: Option<u64>,
}

impl RawTransaction {
    /// Build from a JSON-RPC transaction object
    ///
    /// # Returns
    /// `None` if the payload is not an object or carries no string hash
    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let hash = obj.get("hash")?.as_str()?.to_string();

        Some(RawTransaction {
            hash,
            from: obj.get("from").and_then(parse_address),
            to: obj.get("to").and_then(parse_address),
            input: obj
                .get("input")
                .or_else(|| obj.get("data"))
                .and_then(Value::as_str)
                .map(str::to_string),
            value: obj.get("value").and_then(parse_u256).unwrap_or_default(),
            block_number: obj.get("blockNumber").and_then(parse_quantity),
        })
    }

    /// Decoded calldata bytes, `None` when absent or not valid hex
    pub fn input_bytes(&self) -> Option<Vec<u8>> {
        self.input.as_deref().and_then(|s| hex_to_bytes(s).ok())
    }
}

/// Decoded ERC-20 transfer call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransfer {
    /// Address receiving the tokens
    pub recipient: Address,
    /// Amount in the token's base units
    pub amount: U256,
}

/// Decode `transfer(address,uint256)` calldata
///
/// # Arguments
/// * `input` - Full calldata including the selector
///
/// # Returns
/// The recipient and amount, or the reason the calldata is not a transfer
pub fn decode_transfer(input: &[u8]) -> Result<TokenTransfer, DecodeError> {
    let method_id = extract_method_id(input).ok_or(DecodeError::InputTooShort {
        expected: 4,
        actual: input.len(),
    })?;
    if method_id != TRANSFER_SELECTOR {
        return Err(DecodeError::UnexpectedSelector(hex::encode(method_id)));
    }
    if input.len() < TRANSFER_CALLDATA_LEN {
        return Err(DecodeError::InputTooShort {
            expected: TRANSFER_CALLDATA_LEN,
            actual: input.len(),
        });
    }

    let recipient_word = &input[4..36];
    if recipient_word[..12].iter().any(|b| *b != 0) {
        return Err(DecodeError::DirtyAddressPadding);
    }

    Ok(TokenTransfer {
        recipient: Address::from_slice(&recipient_word[12..]),
        amount: U256::from_be_slice(&input[36..68]),
    })
}

/// Extract method ID from transaction input data
///
/// # Returns
/// `Some([u8; 4])` if input has at least 4 bytes, `None` otherwise
pub fn extract_method_id(input: &[u8]) -> Option<[u8; 4]> {
    if input.len() < 4 {
        return None;
    }
    let mut method_id = [0u8; 4];
    method_id.copy_from_slice(&input[..4]);
    Some(method_id)
}

/// Parse a hex string to bytes (with or without 0x prefix)
pub fn hex_to_bytes(hex_str: &str) -> Result<Vec<u8>, DecodeError> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(hex_str).map_err(|e| DecodeError::InvalidHex(e.to_string()))
}

/// Strict transaction hash check: `0x` followed by exactly 64 hex digits
pub fn is_valid_tx_hash(hash: &str) -> bool {
    match hash.strip_prefix("0x") {
        Some(digits) => digits.len() == 64 && digits.bytes().all(|b| b.is_ascii_hexdigit()),
        None => false,
    }
}

/// Parse a JSON-RPC quantity: either a JSON number or a `0x` hex string
pub fn parse_quantity(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => match s.strip_prefix("0x") {
            Some(digits) if !digits.is_empty() => u64::from_str_radix(digits, 16).ok(),
            Some(_) => None,
            None => s.parse().ok(),
        },
        _ => None,
    }
}

/// Parse a 256-bit quantity from a JSON number, hex or decimal string
pub fn parse_u256(value: &Value) -> Option<U256> {
    match value {
        Value::Number(n) => n.as_u64().map(U256::from),
        Value::String(s) => match s.strip_prefix("0x") {
            Some("") => Some(U256::ZERO),
            Some(digits) => U256::from_str_radix(digits, 16).ok(),
            None => U256::from_str_radix(s, 10).ok(),
        },
        _ => None,
    }
}

/// Parse an address from a JSON string, `None` for null or garbage
pub fn parse_address(value: &Value) -> Option<Address> {
    value.as_str().and_then(|s| Address::from_str(s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;
    use serde_json::json;

    const TRANSFER_CALLDATA: &str = "0xa9059cbb000000000000000000000000f39fd6e51aad88f6f4ce6ab8827279cfffb922660000000000000000000000000000000000000000000000000000000005f5e100";

    // ==================== RawTransaction tests ====================

    #[test]
    fn test_raw_transaction_from_full_object() {
        let value = json!({
            "hash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "from": "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266",
            "to": "0x6c3ea9036406852006290770BEdFcAbA0e23A0e8",
            "input": "0x",
            "value": "0xde0b6b3a7640000",
            "blockNumber": "0x10"
        });

        let tx = RawTransaction::from_json(&value).unwrap();
        assert_eq!(tx.from, Some(address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266")));
        assert_eq!(tx.to, Some(address!("6c3ea9036406852006290770BEdFcAbA0e23A0e8")));
        assert_eq!(tx.value, U256::from(1_000_000_000_000_000_000u64));
        assert_eq!(tx.block_number, Some(16));
    }

    #[test]
    fn test_raw_transaction_contract_creation_has_no_to() {
        let value = json!({
            "hash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "from": "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266",
            "to": null,
            "input": "0x6080"
        });

        let tx = RawTransaction::from_json(&value).unwrap();
        assert_eq!(tx.to, None);
        assert_eq!(tx.value, U256::ZERO);
    }

    #[test]
    fn test_raw_transaction_keeps_unparsable_sender_as_none() {
        let value = json!({ "hash": "0xabc", "from": "not-an-address" });
        let tx = RawTransaction::from_json(&value).unwrap();
        assert_eq!(tx.from, None);
    }

    #[test]
    fn test_raw_transaction_rejects_null_and_hashless() {
        assert!(RawTransaction::from_json(&Value::Null).is_none());
        assert!(RawTransaction::from_json(&json!("0xabc")).is_none());
        assert!(RawTransaction::from_json(&json!({ "from": "0x00" })).is_none());
    }

    #[test]
    fn test_raw_transaction_accepts_data_alias() {
        let value = json!({ "hash": "0x01", "data": "0xa9059cbb" });
        let tx = RawTransaction::from_json(&value).unwrap();
        assert_eq!(tx.input.as_deref(), Some("0xa9059cbb"));
        assert_eq!(tx.input_bytes(), Some(TRANSFER_SELECTOR.to_vec()));
    }

    #[test]
    fn test_input_bytes_none_for_non_hex() {
        let value = json!({ "hash": "0x01", "input": "hello" });
        let tx = RawTransaction::from_json(&value).unwrap();
        assert_eq!(tx.input_bytes(), None);
    }

    // ==================== decode_transfer tests ====================

    #[test]
    fn test_decode_transfer_extracts_recipient_and_amount() {
        let calldata = hex_to_bytes(TRANSFER_CALLDATA).unwrap();
        let transfer = decode_transfer(&calldata).unwrap();
        assert_eq!(transfer.recipient, address!("f39Fd6e51aad88F6F4ce6aB8827279cffFb92266"));
        assert_eq!(transfer.amount, U256::from(100_000_000u64));
    }

    #[test]
    fn test_decode_transfer_wrong_selector() {
        let calldata =
            hex_to_bytes("0x095ea7b3000000000000000000000000f39fd6e51aad88f6f4ce6ab8827279cfffb92266")
                .unwrap();
        assert!(matches!(decode_transfer(&calldata), Err(DecodeError::UnexpectedSelector(_))));
    }

    #[test]
    fn test_decode_transfer_truncated() {
        let calldata =
            hex_to_bytes("0xa9059cbb000000000000000000000000f39fd6e51aad88f6f4ce6ab8827279cfffb92266")
                .unwrap();
        assert!(matches!(
            decode_transfer(&calldata),
            Err(DecodeError::InputTooShort { expected: 68, .. })
        ));
    }

    #[test]
    fn test_decode_transfer_dirty_padding() {
        let mut calldata = hex_to_bytes(TRANSFER_CALLDATA).unwrap();
        calldata[5] = 0xff;
        assert!(matches!(decode_transfer(&calldata), Err(DecodeError::DirtyAddressPadding)));
    }

    #[test]
    fn test_decode_transfer_empty() {
        assert!(matches!(
            decode_transfer(&[]),
            Err(DecodeError::InputTooShort {
                expected: 4,
                actual: 0
            })
        ));
    }

    // ==================== extract_method_id tests ====================

    #[test]
    fn test_extract_method_id_from_valid_input() {
        let input = vec![0xa9, 0x05, 0x9c, 0xbb, 0x00];
        assert_eq!(extract_method_id(&input), Some(TRANSFER_SELECTOR));
    }

    #[test]
    fn test_extract_method_id_from_short_input() {
        assert_eq!(extract_method_id(&[0xa9, 0x05, 0x9c]), None);
    }

    // ==================== hex_to_bytes tests ====================

    #[test]
    fn test_hex_to_bytes_with_and_without_prefix() {
        assert_eq!(hex_to_bytes("0xa9059cbb").unwrap(), TRANSFER_SELECTOR.to_vec());
        assert_eq!(hex_to_bytes("a9059cbb").unwrap(), TRANSFER_SELECTOR.to_vec());
    }

    #[test]
    fn test_hex_to_bytes_invalid() {
        assert!(matches!(hex_to_bytes("0xGGGG"), Err(DecodeError::InvalidHex(_))));
    }

    // ==================== is_valid_tx_hash tests ====================

    #[test]
    fn test_valid_tx_hash() {
        let hash = format!("0x{}", "ab".repeat(32));
        assert!(is_valid_tx_hash(&hash));
        assert!(is_valid_tx_hash(&format!("0x{}", "AB".repeat(32))));
    }

    #[test]
    fn test_invalid_tx_hashes() {
        assert!(!is_valid_tx_hash(""));
        assert!(!is_valid_tx_hash(&"ab".repeat(32)));
        assert!(!is_valid_tx_hash(&format!("0x{}", "ab".repeat(31))));
        assert!(!is_valid_tx_hash(&format!("0x{}zz", "ab".repeat(31))));
        assert!(!is_valid_tx_hash("synthetic:12:0"));
    }

    // ==================== quantity parsing tests ====================

    #[test]
    fn test_parse_quantity_variants() {
        assert_eq!(parse_quantity(&json!(21000)), Some(21000));
        assert_eq!(parse_quantity(&json!("0x5208")), Some(21000));
        assert_eq!(parse_quantity(&json!("21000")), Some(21000));
        assert_eq!(parse_quantity(&json!("0x")), None);
        assert_eq!(parse_quantity(&json!(null)), None);
        assert_eq!(parse_quantity(&json!(-1)), None);
    }

    #[test]
    fn test_parse_u256_variants() {
        assert_eq!(parse_u256(&json!("0x0")), Some(U256::ZERO));
        assert_eq!(parse_u256(&json!("0x")), Some(U256::ZERO));
        assert_eq!(parse_u256(&json!("1000")), Some(U256::from(1000u64)));
        assert_eq!(parse_u256(&json!(5)), Some(U256::from(5u64)));
        assert_eq!(parse_u256(&json!("0xzz")), None);
    }
}
