//! Prefix-compressed record keys.
//!
//! ```text
//! +-----------------+------------------------------+--------+
//! | varint(prefix)  | varint(suffix_len << 3 | x)  | suffix |
//! +-----------------+------------------------------+--------+
//! ```
//!
//! `prefix` is the number of leading bytes shared with the previous key in the
//! block and `x` carries the record's 3-bit value type. A restart point has a
//! prefix of zero and stores its whole key as the suffix.

use super::{common_prefix_size, get_var_int, put_var_int};
use crate::error::Result;
use crate::Error;

/// Encodes `key` relative to `last_key`. Returns the number of bytes written
/// and whether the key was stored in full (a restart point).
pub fn encode_key(
    dest: &mut [u8],
    last_key: &[u8],
    key: &[u8],
    extra: u8,
    force_restart: bool,
) -> Result<(usize, bool)> {
    debug_assert!(extra < 8, "extra bits overflow: {}", extra);

    let prefix_len = if force_restart {
        0
    } else {
        common_prefix_size(last_key, key)
    };
    let suffix = &key[prefix_len..];

    let mut n = put_var_int(dest, prefix_len as u64)?;
    n += put_var_int(
        &mut dest[n..],
        ((suffix.len() as u64) << 3) | u64::from(extra & 0x7),
    )?;
    if dest.len() - n < suffix.len() {
        return Err(Error::BufferTooSmall);
    }
    dest[n..n + suffix.len()].copy_from_slice(suffix);
    n += suffix.len();

    Ok((n, prefix_len == 0))
}

/// Decodes a key stored after `last_key`. Returns the key, its extra bits and
/// the number of bytes consumed.
pub fn decode_key(last_key: &[u8], src: &[u8]) -> Result<(Vec<u8>, u8, usize)> {
    let (prefix_len, mut n) = get_var_int(src)?;
    let (suffix_and_extra, m) = get_var_int(&src[n..])?;
    n += m;

    if prefix_len > last_key.len() as u64 {
        return Err(Error::format(format!(
            "key prefix {} exceeds previous key length {}",
            prefix_len,
            last_key.len()
        )));
    }
    let prefix_len = prefix_len as usize;

    let extra = (suffix_and_extra & 0x7) as u8;
    let suffix_len = suffix_and_extra >> 3;
    if suffix_len > (src.len() - n) as u64 {
        return Err(Error::format("key suffix overruns block"));
    }
    let suffix_len = suffix_len as usize;

    let mut key = Vec::with_capacity(prefix_len + suffix_len);
    key.extend_from_slice(&last_key[..prefix_len]);
    key.extend_from_slice(&src[n..n + suffix_len]);
    n += suffix_len;

    Ok((key, extra, n))
}
