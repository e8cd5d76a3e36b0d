//! Produces reftable files.
//!
//! Records arrive in key order and are packed into blocks of the configured
//! size. Sections are written in file order: refs, the object section derived
//! from the refs, then logs. A section that spans several blocks gets index
//! blocks, one level at a time, until a level fits in a single block.

use std::collections::BTreeMap;
use std::io::Write;

use super::block::BlockWriter;
use super::footer::{Footer, Header};
use super::record::Codec;
use super::{
    Hash, IndexRecord, LogRecord, ObjRecord, Record, RefRecord, FOOTER_SIZE, HASH_SIZE,
    HEADER_SIZE,
};
use crate::config::WriterOptions;
use crate::encoding::common_prefix_size;
use crate::encoding::format::Raw;
use crate::error::Result;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Refs,
    Logs,
}

pub struct Writer<W: Write> {
    out: W,
    opts: WriterOptions,
    min_update_index: u64,
    max_update_index: u64,

    /// Bytes written to `out` so far.
    next: u64,
    /// Zero bytes owed before the next block. Never written after the last.
    pending_padding: usize,

    stage: Stage,
    bw: Option<BlockWriter>,
    last_key: Vec<u8>,
    /// Index records for the blocks written in the current section.
    index: Vec<IndexRecord>,
    /// Ref block offsets for every hash a ref points at.
    obj_index: BTreeMap<Hash, Vec<u64>>,
    added: usize,

    footer: Footer,
}

impl<W: Write> Writer<W> {
    pub fn new(out: W, opts: WriterOptions) -> Result<Self> {
        opts.validate()?;
        Ok(Self {
            out,
            opts,
            min_update_index: 0,
            max_update_index: 0,
            next: 0,
            pending_padding: 0,
            stage: Stage::Refs,
            bw: None,
            last_key: Vec::new(),
            index: Vec::new(),
            obj_index: BTreeMap::new(),
            added: 0,
            footer: Footer::default(),
        })
    }

    /// Sets the update index range of the table. Must precede the first record.
    pub fn set_limits(&mut self, min: u64, max: u64) -> Result<()> {
        if self.next > 0 || self.bw.is_some() {
            return Err(Error::InvalidOperation(
                "limits must be set before adding records".to_string(),
            ));
        }
        if min > max {
            return Err(Error::InvalidOperation(format!(
                "min update index {} exceeds max {}",
                min, max
            )));
        }
        self.min_update_index = min;
        self.max_update_index = max;
        Ok(())
    }

    fn header(&self) -> Header {
        Header {
            block_size: self.opts.block_size,
            min_update_index: self.min_update_index,
            max_update_index: self.max_update_index,
        }
    }

    /// Offset at which the block being filled will be written.
    fn block_offset(&self) -> u64 {
        self.next + self.pending_padding as u64
    }

    /// Adds a ref. Refs must come before any log and in strictly increasing
    /// name order.
    pub fn add_ref(&mut self, rec: RefRecord) -> Result<()> {
        if self.stage != Stage::Refs {
            return Err(Error::InvalidOperation(format!(
                "ref {} added after logs",
                rec.ref_name
            )));
        }
        if rec.update_index < self.min_update_index || rec.update_index > self.max_update_index {
            return Err(Error::InvalidOperation(format!(
                "update index {} of {} outside [{}, {}]",
                rec.update_index, rec.ref_name, self.min_update_index, self.max_update_index
            )));
        }
        self.check_order(rec.key())?;

        let hashes = [rec.value().copied(), rec.target_value().copied()];
        let rebased = RefRecord {
            update_index: rec.update_index - self.min_update_index,
            ..rec
        };
        self.add_record(rebased.into())?;

        if self.opts.index_objects {
            let off = self.block_offset();
            for hash in hashes.into_iter().flatten() {
                let offsets = self.obj_index.entry(hash).or_default();
                if offsets.last() != Some(&off) {
                    offsets.push(off);
                }
            }
        }
        Ok(())
    }

    /// Adds a log entry. Entries must be in strictly increasing key order:
    /// by ref name, then newest first.
    pub fn add_log(&mut self, rec: LogRecord) -> Result<()> {
        if self.stage == Stage::Refs {
            self.finish_refs()?;
            self.stage = Stage::Logs;
            self.footer.log_offset = self.block_offset();
        }
        self.check_order(rec.key())?;
        self.add_record(rec.into())
    }

    fn check_order(&mut self, key: Vec<u8>) -> Result<()> {
        if self.added > 0 && key <= self.last_key {
            return Err(Error::InvalidOperation(format!(
                "key {} not after {}",
                Raw::bytes(&key),
                Raw::bytes(&self.last_key)
            )));
        }
        self.last_key = key;
        self.added += 1;
        Ok(())
    }

    fn add_record(&mut self, rec: Record) -> Result<()> {
        if self.try_add(&rec)? {
            return Ok(());
        }

        // An object referenced from too many blocks is written without its
        // offsets; readers fall back to scanning the refs.
        if let Record::Obj(obj) = &rec {
            if !obj.offsets.is_empty() {
                tracing::debug!(
                    prefix = %Raw::bytes(&obj.hash_prefix),
                    offsets = obj.offsets.len(),
                    "Dropping offsets of object record"
                );
                let bare = ObjRecord {
                    hash_prefix: obj.hash_prefix.clone(),
                    offsets: Vec::new(),
                };
                if self.try_add(&bare.into())? {
                    return Ok(());
                }
            }
        }

        Err(Error::InvalidOperation(format!(
            "record {} does not fit in a {} byte block",
            Raw::bytes(&rec.key()),
            self.opts.block_size
        )))
    }

    /// Adds `rec` to the current block, starting a new one if needed.
    /// Returns false when the record does not fit even in an empty block.
    fn try_add(&mut self, rec: &Record) -> Result<bool> {
        let typ = rec.block_type();
        if self.bw.as_ref().is_some_and(|bw| bw.block_type() != typ) {
            self.flush_block()?;
        }

        let first = self.next == 0 && self.pending_padding == 0;
        let (block_size, restart_interval) = (self.opts.block_size, self.opts.restart_interval);
        let bw = self.bw.get_or_insert_with(|| {
            let header_off = if first { HEADER_SIZE } else { 0 };
            BlockWriter::new(typ, block_size, header_off, restart_interval)
        });
        if bw.add(rec)? {
            return Ok(true);
        }
        if bw.is_empty() {
            return Ok(false);
        }

        self.flush_block()?;
        let mut bw = BlockWriter::new(typ, block_size, 0, restart_interval);
        if !bw.add(rec)? {
            return Ok(false);
        }
        self.bw = Some(bw);
        Ok(true)
    }

    fn flush_block(&mut self) -> Result<()> {
        let Some(bw) = self.bw.take() else {
            return Ok(());
        };
        if bw.is_empty() {
            return Ok(());
        }

        let typ = bw.block_type();
        let last_key = bw.last_key().to_vec();
        let entries = bw.entries();
        let mut data = bw.finish();

        let off = self.block_offset();
        if off == 0 {
            data[..HEADER_SIZE].copy_from_slice(&self.header().encode());
        }

        self.write_padding()?;
        self.out.write_all(&data)?;
        self.next += data.len() as u64;
        if !self.opts.unpadded {
            self.pending_padding = (self.opts.block_size as usize).saturating_sub(data.len());
        }

        tracing::trace!(offset = off, len = data.len(), entries, "Wrote {} block", typ);
        self.index.push(IndexRecord {
            last_key,
            offset: off,
        });
        Ok(())
    }

    fn write_padding(&mut self) -> Result<()> {
        if self.pending_padding > 0 {
            self.out.write_all(&vec![0u8; self.pending_padding])?;
            self.next += self.pending_padding as u64;
            self.pending_padding = 0;
        }
        Ok(())
    }

    /// Flushes the current section and writes its index. Returns the offset
    /// of the root index block, or 0 when the section needs no index.
    fn finish_section(&mut self) -> Result<u64> {
        self.flush_block()?;
        let mut level = std::mem::take(&mut self.index);
        let mut depth = 0;

        while level.len() > 1 {
            depth += 1;
            for rec in level {
                self.add_record(rec.into())?;
            }
            self.flush_block()?;
            level = std::mem::take(&mut self.index);
        }

        let root = match level.first() {
            Some(rec) if depth > 0 => rec.offset,
            _ => 0,
        };
        if depth > 0 {
            tracing::debug!(root, depth, "Wrote index");
        }
        Ok(root)
    }

    fn finish_refs(&mut self) -> Result<()> {
        self.footer.ref_index_offset = self.finish_section()?;
        if !self.obj_index.is_empty() {
            self.write_objects()?;
        }
        self.last_key.clear();
        self.added = 0;
        Ok(())
    }

    fn write_objects(&mut self) -> Result<()> {
        let obj_index = std::mem::take(&mut self.obj_index);

        let mut max_common = 0;
        let mut prev: Option<&Hash> = None;
        for hash in obj_index.keys() {
            if let Some(prev) = prev {
                max_common = max_common.max(common_prefix_size(prev, hash));
            }
            prev = Some(hash);
        }
        let id_len = (max_common + 1).clamp(2, HASH_SIZE);

        self.footer.obj_offset = self.block_offset();
        self.footer.object_id_len = id_len as u8;
        for (hash, offsets) in obj_index {
            let rec = ObjRecord {
                hash_prefix: hash[..id_len].to_vec(),
                offsets,
            };
            self.add_record(rec.into())?;
        }
        self.footer.obj_index_offset = self.finish_section()?;

        tracing::debug!(
            offset = self.footer.obj_offset,
            id_len,
            "Wrote object section"
        );
        Ok(())
    }

    /// Writes the remaining blocks and the footer, returning the output.
    pub fn finish(mut self) -> Result<W> {
        match self.stage {
            Stage::Refs => self.finish_refs()?,
            Stage::Logs => self.footer.log_index_offset = self.finish_section()?,
        }

        if self.next == 0 {
            self.out.write_all(&self.header().encode())?;
            self.next = HEADER_SIZE as u64;
        }

        self.footer.header = self.header();
        self.out.write_all(&self.footer.encode())?;
        self.out.flush()?;

        tracing::debug!(
            size = self.next + FOOTER_SIZE as u64,
            block_size = self.opts.block_size,
            "Finished table"
        );
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::RefValue;

    fn writer(opts: WriterOptions) -> Writer<Vec<u8>> {
        let mut w = Writer::new(Vec::new(), opts).unwrap();
        w.set_limits(1, 10).unwrap();
        w
    }

    #[test]
    fn test_empty_table() {
        let buf = writer(WriterOptions::default()).finish().unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + FOOTER_SIZE);
        assert_eq!(&buf[..4], b"REFT");
        assert_eq!(&buf[HEADER_SIZE..HEADER_SIZE + 4], b"REFT");
    }

    #[test]
    fn test_first_block_carries_header() {
        let mut w = writer(WriterOptions::default());
        w.add_ref(RefRecord::new("refs/heads/main", 1, RefValue::Value([7; 20])))
            .unwrap();
        let buf = w.finish().unwrap();

        assert_eq!(&buf[..4], b"REFT");
        assert_eq!(buf[HEADER_SIZE], b'r');
        let footer = Footer::decode(&buf[buf.len() - FOOTER_SIZE..]).unwrap();
        assert_eq!(footer.header.min_update_index, 1);
        assert_eq!(footer.header.max_update_index, 10);
        assert_eq!(footer.ref_index_offset, 0);
        assert!(footer.obj_offset > 0);
        assert_eq!(footer.object_id_len, 2);
    }

    #[test]
    fn test_rejects_out_of_order_refs() {
        let mut w = writer(WriterOptions::default());
        w.add_ref(RefRecord::new("refs/heads/b", 1, RefValue::Deletion))
            .unwrap();
        let err = w
            .add_ref(RefRecord::new("refs/heads/a", 1, RefValue::Deletion))
            .unwrap_err();
        assert_eq!(err.code(), crate::error::API_ERROR);

        let err = w
            .add_ref(RefRecord::new("refs/heads/b", 1, RefValue::Deletion))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[test]
    fn test_rejects_update_index_outside_limits() {
        let mut w = writer(WriterOptions::default());
        let err = w
            .add_ref(RefRecord::new("refs/heads/a", 11, RefValue::Deletion))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[test]
    fn test_rejects_refs_after_logs() {
        let mut w = writer(WriterOptions::default());
        w.add_log(LogRecord::new(
            "refs/heads/a",
            1,
            crate::table::LogValue::Deletion,
        ))
        .unwrap();
        assert!(w
            .add_ref(RefRecord::new("refs/heads/b", 1, RefValue::Deletion))
            .is_err());
    }

    #[test]
    fn test_limits_fixed_after_first_record() {
        let mut w = writer(WriterOptions::default());
        w.add_ref(RefRecord::new("refs/heads/a", 1, RefValue::Deletion))
            .unwrap();
        assert!(w.set_limits(0, 5).is_err());
    }

    #[test]
    fn test_record_larger_than_block() {
        let mut w = writer(WriterOptions::default().block_size(64));
        let err = w
            .add_ref(RefRecord::new(
                "refs/heads/".to_string() + &"x".repeat(100),
                1,
                RefValue::Deletion,
            ))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[test]
    fn test_padded_blocks_are_aligned() {
        let mut w = writer(WriterOptions::default().block_size(256).index_objects(false));
        for i in 0..50 {
            w.add_ref(RefRecord::new(
                format!("refs/heads/branch{:03}", i),
                1,
                RefValue::Value([i as u8; 20]),
            ))
            .unwrap();
        }
        let buf = w.finish().unwrap();
        let footer = Footer::decode(&buf[buf.len() - FOOTER_SIZE..]).unwrap();

        assert!(footer.ref_index_offset > 0);
        assert_eq!(footer.ref_index_offset % 256, 0);
        assert_eq!(buf[256], b'r');
        assert_eq!(buf[footer.ref_index_offset as usize], b'i');
        assert_eq!(footer.obj_offset, 0);
    }

    #[test]
    fn test_crowded_object_drops_offsets() {
        let mut w = writer(WriterOptions::default().block_size(256));
        for i in 0..2000 {
            w.add_ref(RefRecord::new(
                format!("refs/heads/branch{:05}", i),
                1,
                RefValue::Value([7; 20]),
            ))
            .unwrap();
        }
        let buf = w.finish().unwrap();
        let footer = Footer::decode(&buf[buf.len() - FOOTER_SIZE..]).unwrap();
        assert!(footer.obj_offset > 0);
        assert_eq!(footer.object_id_len, 2);
        assert_eq!(buf[footer.obj_offset as usize], b'o');
    }

    #[test]
    fn test_invalid_options() {
        assert!(Writer::new(Vec::new(), WriterOptions::default().block_size(0)).is_err());
    }
}
