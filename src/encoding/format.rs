//! Human-readable rendering of keys, hashes and offsets, used by the record
//! `Display` implementations.

use itertools::Itertools as _;

/// Formats raw byte slices without any decoding.
pub struct Raw;

impl Raw {
    /// Formats raw bytes as escaped ASCII strings.
    pub fn bytes(bytes: &[u8]) -> String {
        let escaped = bytes
            .iter()
            .copied()
            .flat_map(std::ascii::escape_default)
            .collect_vec();
        format!("\"{}\"", String::from_utf8_lossy(&escaped))
    }

    /// Formats bytes as lowercase hex, e.g. object ids.
    pub fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).join("")
    }

    /// Formats a list of block offsets.
    pub fn offsets(offsets: &[u64]) -> String {
        format!("[{}]", offsets.iter().join(", "))
    }
}
