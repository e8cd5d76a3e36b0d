//! Variable-length unsigned integers.
//!
//! Groups of 7 bits are written most significant first. Every byte except the
//! last has its high bit set. Each continuation group is stored minus one, so
//! every value has exactly one encoding and `u64::MAX` fits in 10 bytes.

use crate::error::Result;
use crate::Error;

/// Upper bound on the encoded length of a `u64`.
pub const MAX_VAR_INT_LEN: usize = 10;

/// Encodes `value` into the front of `dest`, returning the number of bytes written.
pub fn put_var_int(dest: &mut [u8], value: u64) -> Result<usize> {
    let mut buf = [0u8; MAX_VAR_INT_LEN];
    let mut i = MAX_VAR_INT_LEN - 1;
    buf[i] = (value & 0x7f) as u8;

    let mut rest = value >> 7;
    while rest != 0 {
        i -= 1;
        rest -= 1;
        buf[i] = 0x80 | (rest & 0x7f) as u8;
        rest >>= 7;
    }

    let n = MAX_VAR_INT_LEN - i;
    if dest.len() < n {
        return Err(Error::BufferTooSmall);
    }
    dest[..n].copy_from_slice(&buf[i..]);
    Ok(n)
}

/// Decodes a varint from the front of `src`, returning the value and the
/// number of bytes consumed.
pub fn get_var_int(src: &[u8]) -> Result<(u64, usize)> {
    let first = *src
        .first()
        .ok_or_else(|| Error::format("varint: empty buffer"))?;

    let mut value = u64::from(first & 0x7f);
    let mut ptr = 0;
    while src[ptr] & 0x80 != 0 {
        ptr += 1;
        if ptr >= src.len() {
            return Err(Error::format("varint: truncated"));
        }
        if value >= u64::MAX >> 7 {
            return Err(Error::format("varint: overflows 64 bits"));
        }
        value = ((value + 1) << 7) | u64::from(src[ptr] & 0x7f);
    }

    Ok((value, ptr + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_roundtrip() {
        let inputs = [
            0u64,
            1,
            27,
            127,
            128,
            257,
            4096,
            1 << 63,
            u64::MAX,
            u64::MAX - 1,
        ];
        for input in inputs {
            let mut dest = [0u8; MAX_VAR_INT_LEN];
            let n = put_var_int(&mut dest, input).unwrap();
            assert!(n > 0 && n <= MAX_VAR_INT_LEN);

            let (got, m) = get_var_int(&dest[..n]).unwrap();
            assert_eq!(got, input);
            assert_eq!(n, m, "length mismatch for {}", input);
        }
    }

    #[test]
    fn test_varint_known_encodings() {
        let mut dest = [0u8; MAX_VAR_INT_LEN];

        assert_eq!(put_var_int(&mut dest, 127).unwrap(), 1);
        assert_eq!(dest[0], 0x7f);

        let n = put_var_int(&mut dest, 128).unwrap();
        assert_eq!(&dest[..n], &[0x80, 0x00]);

        let n = put_var_int(&mut dest, u64::MAX).unwrap();
        assert_eq!(n, MAX_VAR_INT_LEN);
    }

    #[test]
    fn test_varint_buffer_too_small() {
        let mut dest = [0u8; 1];
        assert!(matches!(
            put_var_int(&mut dest, 4096),
            Err(Error::BufferTooSmall)
        ));
        assert!(put_var_int(&mut [], 0).is_err());
    }

    #[test]
    fn test_varint_truncated() {
        assert!(get_var_int(&[]).unwrap_err().is_format());
        assert!(get_var_int(&[0x80]).unwrap_err().is_format());
        assert!(get_var_int(&[0xff, 0xff]).unwrap_err().is_format());
    }

    #[test]
    fn test_varint_overflow() {
        let overlong = [0xffu8; 11];
        let mut src = overlong.to_vec();
        src.push(0x7f);
        assert!(get_var_int(&src).unwrap_err().is_format());
    }

    #[test]
    fn test_varint_stops_at_terminator() {
        let (value, n) = get_var_int(&[0x05, 0xff, 0xff]).unwrap();
        assert_eq!(value, 5);
        assert_eq!(n, 1);
    }
}
