//! Small helpers shared across modules.

pub mod block_param;

pub use block_param::{BlockParameter, BlockRef, BlockTag, ParseError as BlockParseError};

use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Lowercase hex SHA-256 of `parts`, hashed in order.
#[must_use]
pub fn sha256_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// `0x`-prefixed hex quantity.
#[must_use]
pub fn hex_quantity(value: u64) -> String {
    format!("0x{value:x}")
}
