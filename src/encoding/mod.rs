//! Low-level codecs shared by every block type: varints, 24-bit integers,
//! prefix-compressed keys and bounds-checked cursors over byte slices.

pub mod format;
mod key;
mod varint;

pub use key::{decode_key, encode_key};
pub use varint::{get_var_int, put_var_int, MAX_VAR_INT_LEN};

use byteorder::{BigEndian, ByteOrder};

use crate::error::Result;
use crate::table::{Hash, HASH_SIZE};
use crate::Error;

/// Writes the low 24 bits of `value` big-endian into `dest[..3]`.
pub fn put_u24(dest: &mut [u8], value: u32) {
    BigEndian::write_u24(&mut dest[..3], value);
}

/// Reads a 24-bit big-endian integer from `src[..3]`.
pub fn get_u24(src: &[u8]) -> u32 {
    BigEndian::read_u24(&src[..3])
}

/// Number of leading bytes `a` and `b` have in common.
pub fn common_prefix_size(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(a, b)| a == b).count()
}

/// Sequential writer over a fixed destination slice. Every method fails with
/// `BufferTooSmall` instead of writing past the end.
pub struct Encoder<'a> {
    dest: &'a mut [u8],
    pos: usize,
}

impl<'a> Encoder<'a> {
    pub fn new(dest: &'a mut [u8]) -> Self {
        Self { dest, pos: 0 }
    }

    pub fn var_int(&mut self, value: u64) -> Result<()> {
        self.pos += put_var_int(&mut self.dest[self.pos..], value)?;
        Ok(())
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if self.dest.len() - self.pos < bytes.len() {
            return Err(Error::BufferTooSmall);
        }
        self.dest[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    /// Writes a varint length followed by the bytes themselves.
    pub fn string(&mut self, bytes: &[u8]) -> Result<()> {
        self.var_int(bytes.len() as u64)?;
        self.bytes(bytes)
    }

    pub fn i16(&mut self, value: i16) -> Result<()> {
        let mut buf = [0u8; 2];
        BigEndian::write_i16(&mut buf, value);
        self.bytes(&buf)
    }

    pub fn written(&self) -> usize {
        self.pos
    }
}

/// Sequential reader over a source slice. Running off the end is a format
/// error, since the slice is always a region of an on-disk block.
pub struct Decoder<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(src: &'a [u8]) -> Self {
        Self { src, pos: 0 }
    }

    pub fn var_int(&mut self) -> Result<u64> {
        let (value, n) = get_var_int(&self.src[self.pos..])?;
        self.pos += n;
        Ok(value)
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.src.len() - self.pos < len {
            return Err(Error::format(format!(
                "need {} bytes, {} remain",
                len,
                self.src.len() - self.pos
            )));
        }
        let bytes = &self.src[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Reads a varint length followed by that many bytes.
    pub fn string(&mut self) -> Result<&'a [u8]> {
        let len = self.var_int()?;
        if len > (self.src.len() - self.pos) as u64 {
            return Err(Error::format("string length overruns buffer"));
        }
        self.bytes(len as usize)
    }

    pub fn hash(&mut self) -> Result<Hash> {
        let mut hash = [0u8; HASH_SIZE];
        hash.copy_from_slice(self.bytes(HASH_SIZE)?);
        Ok(hash)
    }

    pub fn i16(&mut self) -> Result<i16> {
        Ok(BigEndian::read_i16(self.bytes(2)?))
    }

    pub fn consumed(&self) -> usize {
        self.pos
    }
}
