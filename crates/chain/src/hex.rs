//! `0x`-prefixed quantity encoding used by Ethereum JSON-RPC.

use std::num::ParseIntError;

use thiserror::Error;

use crate::error::ChainError;

#[derive(Debug, Error)]
pub enum QuantityError {
    #[error("missing 0x prefix")]
    MissingPrefix,

    #[error("unexpected sign")]
    Signed,

    #[error(transparent)]
    Int(#[from] ParseIntError),
}

/// Parse a `0x`-prefixed hexadecimal quantity.
pub fn parse_quantity(value: &str) -> Result<u64, QuantityError> {
    let digits = value.strip_prefix("0x").ok_or(QuantityError::MissingPrefix)?;
    // from_str_radix takes a leading `+`.
    if digits.starts_with(['+', '-']) {
        return Err(QuantityError::Signed);
    }
    Ok(u64::from_str_radix(digits, 16)?)
}

/// Like [`parse_quantity`] but reports the offending value.
pub fn quantity(value: &str) -> Result<u64, ChainError> {
    parse_quantity(value).map_err(|source| ChainError::Hex {
        value: value.to_string(),
        source,
    })
}

/// Encode an integer as a lowercase `0x`-prefixed quantity.
pub fn to_quantity(value: u64) -> String {
    format!("{value:#x}")
}

/// Convert a chain-native timestamp in seconds to milliseconds.
pub fn seconds_to_millis(seconds: u64) -> Option<u64> {
    seconds.checked_mul(1000)
}
