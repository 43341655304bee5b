//! Block parameter parsing shared by the cache finalization check and the integrity
//! processor.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),
    #[error("invalid number: {0}")]
    InvalidNumber(String),
    #[error("block parameter is not a string: {0}")]
    NotAString(String),
}

/// A block reference as used in request parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    Number(u64),
    Tag(BlockTag),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Earliest,
    Pending,
    Safe,
    Finalized,
}

impl TryFrom<&str> for BlockRef {
    type Error = ParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        BlockParameter::parse(value)
    }
}

pub struct BlockParameter;

impl BlockParameter {
    /// Parses a tag, a `0x` hex number or a decimal number.
    ///
    /// ```
    /// use gateway_core::utils::block_param::{BlockParameter, BlockRef, BlockTag};
    ///
    /// assert_eq!(BlockParameter::parse("finalized").unwrap(), BlockRef::Tag(BlockTag::Finalized));
    /// assert_eq!(BlockParameter::parse("0x10").unwrap(), BlockRef::Number(16));
    /// assert_eq!(BlockParameter::parse("100").unwrap(), BlockRef::Number(100));
    /// ```
    pub fn parse(param: &str) -> Result<BlockRef, ParseError> {
        match param {
            "latest" => Ok(BlockRef::Tag(BlockTag::Latest)),
            "pending" => Ok(BlockRef::Tag(BlockTag::Pending)),
            "earliest" => Ok(BlockRef::Tag(BlockTag::Earliest)),
            "safe" => Ok(BlockRef::Tag(BlockTag::Safe)),
            "finalized" => Ok(BlockRef::Tag(BlockTag::Finalized)),
            s => match s.strip_prefix("0x") {
                Some(hex) => u64::from_str_radix(hex, 16)
                    .map(BlockRef::Number)
                    .map_err(|_| ParseError::InvalidHex(s.to_string())),
                None => s.parse::<u64>().map(BlockRef::Number).map_err(|_| ParseError::InvalidNumber(s.to_string())),
            },
        }
    }

    /// Parses a JSON block parameter. Numbers are accepted as-is.
    pub fn parse_value(value: &Value) -> Result<BlockRef, ParseError> {
        match value {
            Value::String(s) => Self::parse(s),
            Value::Number(n) => n.as_u64().map(BlockRef::Number).ok_or_else(|| ParseError::InvalidNumber(n.to_string())),
            other => Err(ParseError::NotAString(other.to_string())),
        }
    }

    /// Hex-encoded quantity from a response, e.g. the result of `eth_blockNumber`.
    ///
    /// ```
    /// use gateway_core::utils::block_param::BlockParameter;
    /// use serde_json::json;
    ///
    /// assert_eq!(BlockParameter::from_json_value(&json!("0xff")), Some(255));
    /// assert_eq!(BlockParameter::from_json_value(&json!(255)), None);
    /// ```
    #[must_use]
    pub fn from_json_value(value: &Value) -> Option<u64> {
        value.as_str().and_then(Self::parse_hex)
    }

    #[must_use]
    pub fn parse_hex(s: &str) -> Option<u64> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        u64::from_str_radix(s, 16).ok()
    }
}
