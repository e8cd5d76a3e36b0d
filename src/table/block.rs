//! Building, parsing and iterating a single block.
//!
//! A block is written front to back as prefix-compressed records. The restart
//! table and restart count are appended by [`BlockWriter::finish`], and the
//! type byte and length are filled in last. Restart keys are stored in full,
//! so [`BlockReader::seek`] can binary-search them before scanning linearly.

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};

use super::source::Block;
use super::{BlockType, Record, MAX_RESTARTS};
use crate::encoding::format::Raw;
use crate::encoding::{decode_key, encode_key, get_u24, put_u24};
use crate::error::Result;
use crate::Error;

/// Bytes taken by the type tag and the 24-bit length.
const BLOCK_HEADER_SIZE: usize = 4;

pub struct BlockWriter {
    buf: Vec<u8>,
    typ: BlockType,
    header_off: usize,
    next: usize,
    restart_interval: usize,
    restarts: Vec<u32>,
    last_key: Vec<u8>,
    entries: usize,
}

impl BlockWriter {
    /// Starts a block of type `typ` that must fit in `block_size` bytes.
    /// `header_off` leaves room for the file header in the first block.
    pub fn new(
        typ: BlockType,
        block_size: u32,
        header_off: usize,
        restart_interval: usize,
    ) -> Self {
        Self {
            buf: vec![0u8; block_size as usize],
            typ,
            header_off,
            next: header_off + BLOCK_HEADER_SIZE,
            restart_interval: restart_interval.max(1),
            restarts: Vec::new(),
            last_key: Vec::new(),
            entries: 0,
        }
    }

    /// Appends `rec`. Returns `false`, leaving the block unchanged, when the
    /// record does not fit.
    pub fn add(&mut self, rec: &Record) -> Result<bool> {
        if rec.block_type() != self.typ {
            return Err(Error::InvalidOperation(format!(
                "cannot add {} record to {} block",
                rec.block_type(),
                self.typ
            )));
        }

        // Leave room for this record's restart entry and the restart count.
        let trailer = 3 * (self.restarts.len() + 1) + 2;
        if self.next + trailer > self.buf.len() {
            return Ok(false);
        }
        let end = self.buf.len() - trailer;

        let key = rec.key();
        let force_restart = self.entries % self.restart_interval == 0;
        let dest = &mut self.buf[self.next..end];
        let encoded = encode_key(dest, &self.last_key, &key, rec.value_type(), force_restart);
        let (n, restart) = match encoded {
            Ok(encoded) => encoded,
            Err(Error::BufferTooSmall) => return Ok(false),
            Err(e) => return Err(e),
        };
        let m = match rec.encode(&mut dest[n..]) {
            Ok(m) => m,
            Err(Error::BufferTooSmall) => return Ok(false),
            Err(e) => return Err(e),
        };

        if restart {
            if self.restarts.len() >= MAX_RESTARTS {
                return Ok(false);
            }
            self.restarts.push(self.next as u32);
        }

        self.next += n + m;
        self.last_key = key;
        self.entries += 1;
        Ok(true)
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn last_key(&self) -> &[u8] {
        &self.last_key
    }

    pub fn block_type(&self) -> BlockType {
        self.typ
    }

    /// Writes the restart table and block header, returning the block bytes
    /// up to its length, without padding. The first `header_off` bytes are
    /// left zeroed for the caller to fill.
    pub fn finish(mut self) -> Vec<u8> {
        for &restart in &self.restarts {
            put_u24(&mut self.buf[self.next..], restart);
            self.next += 3;
        }
        BigEndian::write_u16(&mut self.buf[self.next..], self.restarts.len() as u16);
        self.next += 2;

        self.buf[self.header_off] = self.typ.as_byte();
        put_u24(&mut self.buf[self.header_off + 1..], self.next as u32);

        self.buf.truncate(self.next);
        self.buf
    }
}

/// A parsed block. Holds the block lease until dropped.
#[derive(Debug)]
pub struct BlockReader {
    block: Block,
    typ: BlockType,
    header_off: usize,
    restart_count: usize,
    restart_off: usize,
    full_block_size: u32,
}

impl BlockReader {
    /// Parses `block`, whose type byte sits at `header_off`. `table_block_size`
    /// is used to work out how far away the next block starts.
    pub fn new(block: Block, header_off: usize, table_block_size: u32) -> Result<Self> {
        if block.len() < header_off + BLOCK_HEADER_SIZE {
            return Err(Error::format(format!(
                "block of {} bytes too short for header at {}",
                block.len(),
                header_off
            )));
        }

        let typ = BlockType::from_byte(block[header_off]).ok_or_else(|| {
            Error::format(format!("invalid block type {:#04x}", block[header_off]))
        })?;

        let len = get_u24(&block[header_off + 1..]) as usize;
        if len > block.len() || len < header_off + BLOCK_HEADER_SIZE + 2 {
            return Err(Error::format(format!(
                "block length {} out of range, have {} bytes",
                len,
                block.len()
            )));
        }

        let restart_count = BigEndian::read_u16(&block[len - 2..]) as usize;
        let restart_bytes = 3 * restart_count + 2;
        if header_off + BLOCK_HEADER_SIZE + restart_bytes > len {
            return Err(Error::format(format!(
                "{} restarts do not fit in block of length {}",
                restart_count, len
            )));
        }
        let restart_off = len - restart_bytes;

        // Unpadded tables put the next block right after this one.
        let full_block_size = if table_block_size == 0
            || (block.len() > len && BlockType::from_byte(block[len]).is_some())
        {
            len as u32
        } else {
            table_block_size
        };

        Ok(Self {
            block,
            typ,
            header_off,
            restart_count,
            restart_off,
            full_block_size,
        })
    }

    pub fn block_type(&self) -> BlockType {
        self.typ
    }

    pub fn header_off(&self) -> usize {
        self.header_off
    }

    /// Distance from the start of this block to the start of the next one.
    pub fn full_block_size(&self) -> u32 {
        self.full_block_size
    }

    pub fn restart_count(&self) -> usize {
        self.restart_count
    }

    /// Offset of the `i`th restart point, relative to the block start.
    pub fn restart_offset(&self, i: usize) -> usize {
        get_u24(&self.block[self.restart_off + 3 * i..]) as usize
    }

    fn records_start(&self) -> usize {
        self.header_off + BLOCK_HEADER_SIZE
    }

    fn restart_key(&self, i: usize) -> Result<Vec<u8>> {
        let off = self.restart_offset(i);
        if off < self.records_start() || off >= self.restart_off {
            return Err(Error::format(format!("restart offset {} out of range", off)));
        }
        let (key, _, _) = decode_key(&[], &self.block[off..self.restart_off])?;
        Ok(key)
    }

    /// Key of the first record in the block.
    pub fn first_key(&self) -> Result<Vec<u8>> {
        if self.records_start() >= self.restart_off {
            return Err(Error::format("block holds no records"));
        }
        let (key, _, _) = decode_key(&[], &self.block[self.records_start()..self.restart_off])?;
        Ok(key)
    }

    /// An iterator positioned at the first record.
    pub fn start(self: &Arc<Self>) -> BlockIter {
        BlockIter {
            br: self.clone(),
            next_off: self.records_start(),
            last_key: Vec::new(),
        }
    }

    /// An iterator positioned at the first record whose key is `>= key`.
    pub fn seek(self: &Arc<Self>, key: &[u8]) -> Result<BlockIter> {
        // First restart whose key is greater than the target.
        let (mut lo, mut hi) = (0, self.restart_count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.restart_key(mid)?.as_slice() > key {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }

        let mut it = self.start();
        if lo > 0 {
            it.next_off = self.restart_offset(lo - 1);
        }

        loop {
            let before = it.clone();
            match it.next_record()? {
                None => return Ok(it),
                Some(rec) if rec.key().as_slice() >= key => return Ok(before),
                Some(_) => {}
            }
        }
    }
}

/// Cursor over the records of one block. Cloning yields an independent
/// cursor over the same block.
#[derive(Debug, Clone)]
pub struct BlockIter {
    br: Arc<BlockReader>,
    next_off: usize,
    last_key: Vec<u8>,
}

impl BlockIter {
    pub fn block_reader(&self) -> &Arc<BlockReader> {
        &self.br
    }

    /// Decodes the next record, or returns `None` at the end of the block.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        let end = self.br.restart_off;
        if self.next_off >= end {
            return Ok(None);
        }

        let src = &self.br.block[self.next_off..end];
        let decoded = decode_key(&self.last_key, src).and_then(|(key, value_type, n)| {
            let (rec, m) = Record::decode(self.br.typ, &key, value_type, &src[n..])?;
            Ok((key, rec, n + m))
        });
        let (key, rec, n) = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(
                    offset = self.next_off,
                    last_key = %Raw::bytes(&self.last_key),
                    "Corrupt record in {} block: {}",
                    self.br.typ,
                    e
                );
                self.next_off = end;
                return Err(e);
            }
        };

        self.next_off += n;
        self.last_key = key;
        Ok(Some(rec))
    }
}

impl Iterator for BlockIter {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
