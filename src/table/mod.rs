//! Reftable files: immutable, sorted, block-structured tables of references,
//! object back-references and reflog entries.
//!
//! # File Format
//!
//! ```text
//! +---------------------------+
//! | Header (24 bytes)         |  ← "REFT", version, block size, update index range
//! +---------------------------+
//! | Ref blocks ('r')          |  ← first ref block shares its start with the header
//! | Ref index blocks ('i')    |  ← optional
//! +---------------------------+
//! | Obj blocks ('o')          |  ← optional, hash prefix → ref block offsets
//! | Obj index blocks ('i')    |  ← optional
//! +---------------------------+
//! | Log blocks ('g')          |  ← optional, newest entry first per ref
//! | Log index blocks ('i')    |  ← optional
//! +---------------------------+
//! | Footer (68 bytes)         |  ← header copy, section offsets, CRC-32
//! +---------------------------+
//! ```
//!
//! ## Blocks
//!
//! ```text
//! +------+-------------+---------+-----+---------------------+----------------+
//! | type | len: u24 BE | record  | ... | restart: u24 BE * n | n: u16 BE      |
//! +------+-------------+---------+-----+---------------------+----------------+
//! ```
//!
//! `len` covers everything from the start of the block through the restart
//! count; for the first block that includes the file header. Restart offsets
//! are relative to the block start. Unless the table was written unpadded,
//! each block is followed by zero padding up to the table block size.
//!
//! ## Records
//!
//! Each record is a prefix-compressed key (see [`crate::encoding::encode_key`])
//! followed by a type-specific payload described in [`record`].
//!
//! # Components
//!
//! - [`source`]: where block bytes come from (file or memory), handed out as leases.
//! - [`block`]: building and parsing one block, seeking inside it.
//! - [`reader`]: footer parsing, section offsets, seeks and lookups.
//! - [`iter`]: iteration across the chain of blocks in a section.
//! - [`writer`]: producing tables.

pub mod block;
pub mod footer;
pub mod iter;
pub mod reader;
pub mod record;
pub mod source;
pub mod writer;

/// Size of an object id (SHA-1).
pub const HASH_SIZE: usize = 20;

/// An object id.
pub type Hash = [u8; HASH_SIZE];

pub const MAGIC: &[u8; 4] = b"REFT";
pub const VERSION: u8 = 1;
pub const HEADER_SIZE: usize = 24;
pub const FOOTER_SIZE: usize = 68;

/// Each block stores its restart count in two bytes.
pub const MAX_RESTARTS: usize = (1 << 16) - 1;

/// Largest block size expressible in the 24-bit length fields.
pub const MAX_BLOCK_SIZE: u32 = (1 << 24) - 1;

/// The single-byte tag at the start of every block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockType {
    Ref,
    Obj,
    Log,
    Index,
}

impl BlockType {
    pub fn as_byte(self) -> u8 {
        match self {
            BlockType::Ref => b'r',
            BlockType::Obj => b'o',
            BlockType::Log => b'g',
            BlockType::Index => b'i',
        }
    }

    /// Returns `None` for bytes that do not name a block type, such as padding.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'r' => Some(BlockType::Ref),
            b'o' => Some(BlockType::Obj),
            b'g' => Some(BlockType::Log),
            b'i' => Some(BlockType::Index),
            _ => None,
        }
    }
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_byte() as char)
    }
}

pub use block::{BlockIter, BlockReader, BlockWriter};
pub use footer::{Footer, Header};
pub use iter::TableIter;
pub use reader::{Reader, SectionOffsets};
pub use record::{
    Codec, IndexRecord, LogEntry, LogRecord, LogValue, ObjRecord, Record, RefRecord, RefValue,
};
pub use source::{Block, BlockSource, BufferBlockSource, FileBlockSource, LeaseCounter};
pub use writer::Writer;
