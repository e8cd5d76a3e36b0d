//! File header and footer.
//!
//! ```text
//! Header (24 bytes)
//! +-------+----------+-----------------+------------------+------------------+
//! | REFT  | version  | block_size: u24 | min_update: u64  | max_update: u64  |
//! +-------+----------+-----------------+------------------+------------------+
//!
//! Footer (68 bytes)
//! +--------+---------------+---------------------------+---------------+
//! | header | ref_index_off | obj_off << 5 | obj_id_len | obj_index_off |
//! +--------+---------------+---------------------------+---------------+
//! | log_off | log_index_off | crc32 of the preceding 64 bytes           |
//! +---------+---------------+-------------------------------------------+
//! ```
//!
//! All integers are big-endian.

use std::io::Read;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use crc::{Crc, CRC_32_ISO_HDLC};

use super::{FOOTER_SIZE, HEADER_SIZE, MAGIC, VERSION};
use crate::error::Result;
use crate::Error;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub block_size: u32,
    pub min_update_index: u64,
    pub max_update_index: u64,
}

impl Header {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..4].copy_from_slice(MAGIC);
        buf[4] = VERSION;
        BigEndian::write_u24(&mut buf[5..8], self.block_size);
        BigEndian::write_u64(&mut buf[8..16], self.min_update_index);
        BigEndian::write_u64(&mut buf[16..24], self.max_update_index);
        buf
    }

    /// Decodes and validates a header from the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::format(format!(
                "header needs {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let mut r = &bytes[..HEADER_SIZE];
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(Error::BadMagic(magic));
        }
        let version = r.read_u8()?;
        if version != VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        Ok(Self {
            block_size: r.read_u24::<BigEndian>()?,
            min_update_index: r.read_u64::<BigEndian>()?,
            max_update_index: r.read_u64::<BigEndian>()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Footer {
    pub header: Header,
    pub ref_index_offset: u64,
    pub obj_offset: u64,
    pub object_id_len: u8,
    pub obj_index_offset: u64,
    pub log_offset: u64,
    pub log_index_offset: u64,
}

impl Footer {
    pub fn encode(&self) -> [u8; FOOTER_SIZE] {
        let mut buf = [0u8; FOOTER_SIZE];
        buf[..HEADER_SIZE].copy_from_slice(&self.header.encode());

        let obj_field = (self.obj_offset << 5) | u64::from(self.object_id_len & 0x1f);
        let fields = [
            self.ref_index_offset,
            obj_field,
            self.obj_index_offset,
            self.log_offset,
            self.log_index_offset,
        ];
        for (i, field) in fields.into_iter().enumerate() {
            let at = HEADER_SIZE + 8 * i;
            BigEndian::write_u64(&mut buf[at..at + 8], field);
        }

        let crc = CRC32.checksum(&buf[..FOOTER_SIZE - 4]);
        BigEndian::write_u32(&mut buf[FOOTER_SIZE - 4..], crc);
        buf
    }

    /// Decodes a footer, checking magic, version and checksum in that order.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != FOOTER_SIZE {
            return Err(Error::format(format!(
                "footer must be {} bytes, got {}",
                FOOTER_SIZE,
                bytes.len()
            )));
        }

        let header = Header::decode(bytes)?;

        let mut r = &bytes[FOOTER_SIZE - 4..];
        let stored = r.read_u32::<BigEndian>()?;
        let computed = CRC32.checksum(&bytes[..FOOTER_SIZE - 4]);
        if stored != computed {
            tracing::warn!(stored, computed, "Footer checksum mismatch");
            return Err(Error::ChecksumMismatch);
        }

        let mut r = &bytes[HEADER_SIZE..FOOTER_SIZE - 4];
        let ref_index_offset = r.read_u64::<BigEndian>()?;
        let obj_field = r.read_u64::<BigEndian>()?;
        Ok(Self {
            header,
            ref_index_offset,
            obj_offset: obj_field >> 5,
            object_id_len: (obj_field & 0x1f) as u8,
            obj_index_offset: r.read_u64::<BigEndian>()?,
            log_offset: r.read_u64::<BigEndian>()?,
            log_index_offset: r.read_u64::<BigEndian>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Footer {
        Footer {
            header: Header {
                block_size: 4096,
                min_update_index: 3,
                max_update_index: 9,
            },
            ref_index_offset: 8192,
            obj_offset: 12288,
            object_id_len: 4,
            obj_index_offset: 0,
            log_offset: 16384,
            log_index_offset: 0,
        }
    }

    #[test]
    fn test_header_layout() {
        let header = Header {
            block_size: 0x010203,
            min_update_index: 1,
            max_update_index: 2,
        };
        let buf = header.encode();
        assert_eq!(&buf[..4], b"REFT");
        assert_eq!(buf[4], 1);
        assert_eq!(&buf[5..8], &[0x01, 0x02, 0x03]);
        assert_eq!(Header::decode(&buf).unwrap(), header);
    }

    #[test]
    fn test_footer_encoding_decoding() {
        let footer = sample();
        let buf = footer.encode();
        assert_eq!(&buf[..HEADER_SIZE], &footer.header.encode());
        assert_eq!(Footer::decode(&buf).unwrap(), footer);
    }

    #[test]
    fn test_footer_field_layout() {
        let buf = sample().encode();
        assert_eq!(BigEndian::read_u64(&buf[24..32]), 8192);
        assert_eq!(BigEndian::read_u64(&buf[32..40]), (12288 << 5) | 4);
        assert_eq!(BigEndian::read_u64(&buf[48..56]), 16384);
        assert_eq!(
            BigEndian::read_u32(&buf[64..68]),
            CRC32.checksum(&buf[..64])
        );
    }

    #[test]
    fn test_footer_bad_magic() {
        let mut buf = sample().encode();
        buf[..4].copy_from_slice(b"XXXX");
        let err = Footer::decode(&buf).unwrap_err();
        assert!(matches!(err, Error::BadMagic(m) if &m == b"XXXX"));
        assert!(err.is_format());
    }

    #[test]
    fn test_footer_bad_version() {
        let mut buf = sample().encode();
        buf[4] = 2;
        let err = Footer::decode(&buf).unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion(2)));
    }

    #[test]
    fn test_footer_checksum_mismatch() {
        let mut buf = sample().encode();
        buf[HEADER_SIZE + 3] ^= 0x40;
        assert!(matches!(
            Footer::decode(&buf),
            Err(Error::ChecksumMismatch)
        ));
    }

    #[test]
    fn test_footer_invalid_length() {
        let buf = sample().encode();
        assert!(Footer::decode(&buf[..FOOTER_SIZE - 1]).unwrap_err().is_format());
        assert!(Header::decode(&buf[..10]).unwrap_err().is_format());
    }
}
