//! Opening tables and locating records in them.
//!
//! A [`Reader`] validates the footer and header once, remembers where each
//! section starts, and hands out [`TableIter`]s. Blocks are leased from the
//! [`BlockSource`] on demand and returned as soon as no iterator holds them.

use std::path::Path;
use std::sync::Arc;

use super::block::BlockReader;
use super::footer::{Footer, Header};
use super::iter::TableIter;
use super::source::{Block, BlockSource, BufferBlockSource, FileBlockSource};
use super::{BlockType, Hash, LogRecord, Record, RefRecord, FOOTER_SIZE, HASH_SIZE, HEADER_SIZE};
use crate::encoding::get_u24;
use crate::error::Result;
use crate::Error;

/// Where a section lives in the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionOffsets {
    pub present: bool,
    pub offset: u64,
    /// Root index block, or 0 when the section has no index.
    pub index_offset: u64,
}

#[derive(Debug)]
pub struct Reader {
    source: Box<dyn BlockSource>,
    /// Size of the table without its footer.
    size: u64,
    block_size: u32,
    min_update_index: u64,
    max_update_index: u64,
    object_id_len: u8,
    ref_offsets: SectionOffsets,
    obj_offsets: SectionOffsets,
    log_offsets: SectionOffsets,
}

impl Reader {
    pub fn new(source: impl BlockSource + 'static) -> Result<Self> {
        let file_size = source.size();
        if file_size < FOOTER_SIZE as u64 {
            return Err(Error::ShortRead {
                offset: 0,
                wanted: FOOTER_SIZE,
                got: file_size as usize,
            });
        }
        let size = file_size - FOOTER_SIZE as u64;

        let footer = Footer::decode(&source.read_block(size, FOOTER_SIZE as u32)?)?;

        let head = source.read_block(0, file_size.min(HEADER_SIZE as u64 + 1) as u32)?;
        let header = Header::decode(&head)?;
        if header != footer.header {
            return Err(Error::format(format!(
                "header {:?} does not match footer {:?}",
                header, footer.header
            )));
        }
        let first_type = head.get(HEADER_SIZE).copied().and_then(BlockType::from_byte);
        drop(head);

        let obj_present = footer.obj_offset > 0;
        if obj_present && (footer.object_id_len == 0 || footer.object_id_len as usize > HASH_SIZE) {
            return Err(Error::format(format!(
                "invalid object id length {}",
                footer.object_id_len
            )));
        }

        let reader = Self {
            source: Box::new(source),
            size,
            block_size: header.block_size,
            min_update_index: header.min_update_index,
            max_update_index: header.max_update_index,
            object_id_len: footer.object_id_len,
            ref_offsets: SectionOffsets {
                present: first_type == Some(BlockType::Ref),
                offset: 0,
                index_offset: footer.ref_index_offset,
            },
            obj_offsets: SectionOffsets {
                present: obj_present,
                offset: footer.obj_offset,
                index_offset: footer.obj_index_offset,
            },
            log_offsets: SectionOffsets {
                present: first_type == Some(BlockType::Log) || footer.log_offset > 0,
                offset: footer.log_offset,
                index_offset: footer.log_index_offset,
            },
        };

        tracing::debug!(
            size = file_size,
            block_size = reader.block_size,
            min_update_index = reader.min_update_index,
            max_update_index = reader.max_update_index,
            refs = reader.ref_offsets.present,
            objs = reader.obj_offsets.present,
            logs = reader.log_offsets.present,
            "Opened table"
        );
        Ok(reader)
    }

    /// Opens the table file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(FileBlockSource::open(path)?)
    }

    /// Reads a table held in memory.
    pub fn from_bytes(buf: impl Into<Arc<[u8]>>) -> Result<Self> {
        Self::new(BufferBlockSource::new(buf))
    }

    /// Releases the block source. Blocks leased earlier stay readable.
    pub fn close(&mut self) {
        self.source.close();
    }

    pub fn min_update_index(&self) -> u64 {
        self.min_update_index
    }

    pub fn max_update_index(&self) -> u64 {
        self.max_update_index
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn object_id_len(&self) -> u8 {
        self.object_id_len
    }

    /// Size of the table excluding the footer.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn offsets(&self, typ: BlockType) -> Result<&SectionOffsets> {
        match typ {
            BlockType::Ref => Ok(&self.ref_offsets),
            BlockType::Obj => Ok(&self.obj_offsets),
            BlockType::Log => Ok(&self.log_offsets),
            BlockType::Index => Err(Error::InvalidOperation(
                "index blocks do not form a section".to_string(),
            )),
        }
    }

    /// Leases up to `size` bytes at `off`, clamped to the end of the last
    /// block. `None` when `off` is past it.
    fn get_block(&self, off: u64, size: u32) -> Result<Option<Block>> {
        if off >= self.size {
            return Ok(None);
        }
        let size = u64::from(size).min(self.size - off) as u32;
        self.source.read_block(off, size).map(Some)
    }

    /// Type and length of the block at `off`, or `None` if no block starts
    /// there.
    pub fn block_size_at(&self, off: u64) -> Result<Option<(BlockType, u32)>> {
        let header_off = if off == 0 { HEADER_SIZE } else { 0 };
        let Some(block) = self.get_block(off, (header_off + 4) as u32)? else {
            return Ok(None);
        };
        if block.len() < header_off + 4 {
            return Ok(None);
        }
        Ok(BlockType::from_byte(block[header_off])
            .map(|typ| (typ, get_u24(&block[header_off + 1..]))))
    }

    /// Loads and parses the block at `off`. `None` when there is no block
    /// there or it is not of type `want` (any type when `want` is `None`).
    pub fn init_block_reader(
        &self,
        off: u64,
        want: Option<BlockType>,
    ) -> Result<Option<BlockReader>> {
        let Some((typ, len)) = self.block_size_at(off)? else {
            return Ok(None);
        };
        if want.is_some_and(|want| want != typ) {
            return Ok(None);
        }

        let Some(block) = self.get_block(off, len.max(self.block_size))? else {
            return Ok(None);
        };
        let header_off = if off == 0 { HEADER_SIZE } else { 0 };
        BlockReader::new(block, header_off, self.block_size).map(Some)
    }

    /// Applies the table's update index base to ref records.
    pub(crate) fn rebase(&self, rec: Record) -> Result<Record> {
        match rec {
            Record::Ref(mut r) => {
                r.update_index = r
                    .update_index
                    .checked_add(self.min_update_index)
                    .ok_or_else(|| {
                        Error::format(format!("update index of {} overflows", r.ref_name))
                    })?;
                Ok(Record::Ref(r))
            }
            other => Ok(other),
        }
    }

    /// An iterator at the start of section `typ`, or of its root index when
    /// `use_index` is set. `None` when the section (or its index) is absent.
    pub fn start(&self, typ: BlockType, use_index: bool) -> Result<Option<TableIter<'_>>> {
        let offs = *self.offsets(typ)?;
        if !offs.present {
            return Ok(None);
        }
        if use_index {
            if offs.index_offset == 0 {
                return Ok(None);
            }
            return TableIter::at_block(self, offs.index_offset, BlockType::Index);
        }
        TableIter::at_block(self, offs.offset, typ)
    }

    /// An iterator at the first record of section `typ` whose key is `>= key`.
    pub fn seek(&self, typ: BlockType, key: &[u8]) -> Result<TableIter<'_>> {
        let offs = *self.offsets(typ)?;
        if !offs.present {
            return Ok(TableIter::empty(self, typ));
        }
        if offs.index_offset > 0 {
            self.seek_indexed(typ, key, offs.index_offset)
        } else {
            self.seek_linear(typ, key, offs.offset)
        }
    }

    /// Walks blocks from `off` while the following block starts at or before
    /// `key`, then seeks inside the block reached.
    fn seek_linear(&self, typ: BlockType, key: &[u8], off: u64) -> Result<TableIter<'_>> {
        let Some(mut br) = self.init_block_reader(off, Some(typ))? else {
            return Ok(TableIter::empty(self, typ));
        };
        let mut block_off = off;

        loop {
            let next_off = block_off + u64::from(br.full_block_size());
            match self.init_block_reader(next_off, Some(typ))? {
                Some(next) if next.first_key()?.as_slice() <= key => {
                    br = next;
                    block_off = next_off;
                }
                _ => break,
            }
        }

        TableIter::seek_in_block(self, block_off, br, key)
    }

    /// Descends from the root index block through any lower index levels to
    /// the block of type `typ` that holds `key`.
    fn seek_indexed(&self, typ: BlockType, key: &[u8], index_off: u64) -> Result<TableIter<'_>> {
        let mut index_iter = self.seek_linear(BlockType::Index, key, index_off)?;

        loop {
            let idx = match index_iter.next_record()? {
                Some(Record::Index(idx)) => idx,
                Some(other) => {
                    return Err(Error::format(format!("unexpected {} in index block", other)))
                }
                None => return Ok(TableIter::empty(self, typ)),
            };
            // Indexed blocks are always written before their index.
            let cur = index_iter.block_offset();
            if idx.offset >= cur {
                return Err(Error::format(format!(
                    "index entry at {} points at {}, not an earlier block",
                    cur, idx.offset
                )));
            }

            let Some(br) = self.init_block_reader(idx.offset, None)? else {
                return Err(Error::format(format!(
                    "index entry points at {} which holds no block",
                    idx.offset
                )));
            };
            match br.block_type() {
                t if t == typ => return TableIter::seek_in_block(self, idx.offset, br, key),
                BlockType::Index => {
                    index_iter = TableIter::seek_in_block(self, idx.offset, br, key)?;
                }
                other => {
                    return Err(Error::format(format!(
                        "index for {} section points at {} block at {}",
                        typ, other, idx.offset
                    )))
                }
            }
        }
    }

    /// Iterates all refs, in name order.
    pub fn ref_iter(&self) -> Result<TableIter<'_>> {
        Ok(self
            .start(BlockType::Ref, false)?
            .unwrap_or_else(|| TableIter::empty(self, BlockType::Ref)))
    }

    /// Iterates all log entries, by ref name and then newest first.
    pub fn log_iter(&self) -> Result<TableIter<'_>> {
        Ok(self
            .start(BlockType::Log, false)?
            .unwrap_or_else(|| TableIter::empty(self, BlockType::Log)))
    }

    pub fn seek_ref(&self, name: &str) -> Result<TableIter<'_>> {
        self.seek(BlockType::Ref, name.as_bytes())
    }

    /// Positions at the newest entry for `name` at or below `update_index`.
    /// Pass `u64::MAX` for the newest entry overall.
    pub fn seek_log(&self, name: &str, update_index: u64) -> Result<TableIter<'_>> {
        self.seek(BlockType::Log, &LogRecord::key_for(name, update_index))
    }

    /// Looks up the ref called `name`.
    pub fn read_ref(&self, name: &str) -> Result<Option<RefRecord>> {
        match self.seek_ref(name)?.next_record()? {
            Some(Record::Ref(r)) if r.ref_name == name => Ok(Some(r)),
            _ => Ok(None),
        }
    }

    /// All refs whose value or peeled value is `hash`.
    pub fn refs_for(&self, hash: &Hash) -> Result<Vec<RefRecord>> {
        if !self.obj_offsets.present {
            return self.scan_refs_for(hash);
        }

        let prefix = &hash[..self.object_id_len as usize];
        let offsets = match self.seek(BlockType::Obj, prefix)?.next_record()? {
            Some(Record::Obj(obj)) if obj.hash_prefix == prefix => obj.offsets,
            _ => return Ok(Vec::new()),
        };
        // Objects referenced from too many blocks are stored without offsets.
        if offsets.is_empty() {
            return self.scan_refs_for(hash);
        }

        let mut refs = Vec::new();
        for off in offsets {
            let Some(br) = self.init_block_reader(off, Some(BlockType::Ref))? else {
                return Err(Error::format(format!(
                    "object index points at {} which holds no ref block",
                    off
                )));
            };
            for rec in Arc::new(br).start() {
                if let Record::Ref(r) = self.rebase(rec?)? {
                    if r.points_to(hash) {
                        refs.push(r);
                    }
                }
            }
        }
        Ok(refs)
    }

    fn scan_refs_for(&self, hash: &Hash) -> Result<Vec<RefRecord>> {
        let mut refs = Vec::new();
        for rec in self.ref_iter()? {
            if let Record::Ref(r) = rec? {
                if r.points_to(hash) {
                    refs.push(r);
                }
            }
        }
        Ok(refs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriterOptions;
    use crate::table::source::LeaseCounter;
    use crate::table::{BlockWriter, IndexRecord, LogEntry, LogValue, RefValue, Writer};

    fn hash(i: usize) -> Hash {
        let mut h = [0u8; HASH_SIZE];
        h[0] = (i >> 8) as u8;
        h[1] = i as u8;
        h[19] = 0xaa;
        h
    }

    fn ref_name(i: usize) -> String {
        format!("refs/heads/branch{:04}", i)
    }

    fn build(opts: WriterOptions, n: usize, logs: usize) -> Vec<u8> {
        let mut w = Writer::new(Vec::new(), opts).unwrap();
        w.set_limits(100, 200).unwrap();
        for i in 0..n {
            let value = if i % 3 == 0 {
                RefValue::Peeled {
                    value: hash(i),
                    target_value: hash(i + 1),
                }
            } else {
                RefValue::Value(hash(i))
            };
            w.add_ref(RefRecord::new(ref_name(i), 100 + (i as u64 % 100), value))
                .unwrap();
        }
        for i in 0..logs {
            let name = ref_name(i / 4);
            let update_index = 200 - (i % 4) as u64;
            w.add_log(LogRecord::new(
                name,
                update_index,
                LogValue::Update(LogEntry {
                    old_hash: hash(i),
                    new_hash: hash(i + 1),
                    name: "C O Mitter".to_string(),
                    email: "committer@example.com".to_string(),
                    time: 1_600_000_000 + i as u64,
                    tz_offset: 120,
                    message: format!("update {}", i),
                }),
            ))
            .unwrap();
        }
        w.finish().unwrap()
    }

    fn open(buf: Vec<u8>) -> (Reader, LeaseCounter) {
        let source = BufferBlockSource::new(buf);
        let leases = source.leases();
        (Reader::new(source).unwrap(), leases)
    }

    fn refs(it: TableIter<'_>) -> Vec<RefRecord> {
        it.map(|rec| match rec.unwrap() {
            Record::Ref(r) => r,
            other => panic!("expected ref, got {}", other),
        })
        .collect()
    }

    #[test]
    fn test_bad_magic_releases_leases() {
        let mut buf = build(WriterOptions::default(), 3, 0);
        let n = buf.len();
        buf[n - FOOTER_SIZE..n - FOOTER_SIZE + 4].copy_from_slice(b"XXXX");

        let source = BufferBlockSource::new(buf);
        let leases = source.leases();
        let err = Reader::new(source).unwrap_err();
        assert!(err.is_format());
        assert_eq!(leases.outstanding(), 0);
    }

    #[test]
    fn test_short_source() {
        let err = Reader::from_bytes(vec![0u8; FOOTER_SIZE - 1]).unwrap_err();
        assert!(err.is_io());
    }

    #[test]
    fn test_bad_version_and_checksum() {
        let buf = build(WriterOptions::default(), 3, 0);
        let n = buf.len();

        let mut bad_version = buf.clone();
        bad_version[n - FOOTER_SIZE + 4] = 2;
        assert!(matches!(
            Reader::from_bytes(bad_version).unwrap_err(),
            Error::UnsupportedVersion(2)
        ));

        let mut bad_crc = buf;
        bad_crc[n - 10] ^= 1;
        assert!(matches!(
            Reader::from_bytes(bad_crc).unwrap_err(),
            Error::ChecksumMismatch
        ));
    }

    #[test]
    fn test_header_must_match_footer() {
        let mut buf = build(WriterOptions::default(), 3, 0);
        buf[4] = 2;
        assert!(Reader::from_bytes(buf).unwrap_err().is_format());
    }

    #[test]
    fn test_empty_table() {
        let (reader, _) = open(build(WriterOptions::default(), 0, 0));
        assert!(!reader.offsets(BlockType::Ref).unwrap().present);
        assert!(!reader.offsets(BlockType::Log).unwrap().present);
        assert!(reader.start(BlockType::Ref, false).unwrap().is_none());

        let mut it = reader.ref_iter().unwrap();
        assert!(it.next_record().unwrap().is_none());
        assert!(reader.read_ref("refs/heads/main").unwrap().is_none());
        assert!(reader.offsets(BlockType::Index).is_err());
    }

    #[test]
    fn test_iterate_padded_and_unpadded() {
        for unpadded in [false, true] {
            let opts = WriterOptions::default().block_size(256).unpadded(unpadded);
            let (reader, leases) = open(build(opts, 200, 0));
            assert_eq!(reader.min_update_index(), 100);
            assert_eq!(reader.max_update_index(), 200);
            assert_eq!(reader.block_size(), 256);

            let all = refs(reader.ref_iter().unwrap());
            assert_eq!(all.len(), 200);
            for (i, r) in all.iter().enumerate() {
                assert_eq!(r.ref_name, ref_name(i));
                assert_eq!(r.update_index, 100 + (i as u64 % 100));
                assert_eq!(r.value(), Some(&hash(i)));
            }
            assert_eq!(leases.outstanding(), 0);
        }
    }

    #[test]
    fn test_seek_indexed_matches_linear() {
        let opts = WriterOptions::default().block_size(128).restart_interval(4);
        let (reader, leases) = open(build(opts, 500, 0));
        let offs = *reader.offsets(BlockType::Ref).unwrap();
        assert!(offs.index_offset > 0);

        // The root index of 500 refs in 128 byte blocks has lower levels.
        let root = reader.start(BlockType::Ref, true).unwrap().unwrap();
        let first = refs_of_index(root);
        assert!(first < 100);

        for i in (0..500).step_by(7) {
            let name = ref_name(i);
            let key = name.as_bytes();
            let mut indexed = reader.seek(BlockType::Ref, key).unwrap();
            let mut linear = reader.seek_linear(BlockType::Ref, key, 0).unwrap();
            let a = indexed.next_record().unwrap().map(|r| r.key());
            let b = linear.next_record().unwrap().map(|r| r.key());
            assert_eq!(a, Some(key.to_vec()));
            assert_eq!(a, b);

            let prefix = &key[..key.len() - 1];
            let a = reader.seek(BlockType::Ref, prefix).unwrap().next_record().unwrap();
            let b = reader.seek_linear(BlockType::Ref, prefix, 0).unwrap().next_record().unwrap();
            assert_eq!(a, b);
        }

        let mut past = reader.seek(BlockType::Ref, b"refs/tags").unwrap();
        assert!(past.next_record().unwrap().is_none());

        let tail = refs(reader.seek_ref(&ref_name(495)).unwrap());
        assert_eq!(tail.len(), 5);
        assert_eq!(leases.outstanding(), 0);
    }

    /// Number of entries in the root index block.
    fn refs_of_index(it: TableIter<'_>) -> usize {
        let mut n = 0;
        for rec in it {
            assert!(matches!(rec.unwrap(), Record::Index(_)));
            n += 1;
        }
        n
    }

    #[test]
    fn test_read_ref() {
        let (reader, _) = open(build(WriterOptions::default().block_size(256), 50, 0));
        let r = reader.read_ref(&ref_name(30)).unwrap().unwrap();
        assert_eq!(r.ref_name, ref_name(30));
        assert_eq!(r.update_index, 130);
        assert_eq!(r.target_value(), Some(&hash(31)));

        assert!(reader.read_ref("refs/heads/branch0030x").unwrap().is_none());
        assert!(reader.read_ref("refs/heads/a").unwrap().is_none());
    }

    #[test]
    fn test_logs_newest_first() {
        let opts = WriterOptions::default().block_size(256);
        let (reader, leases) = open(build(opts, 10, 40));
        assert!(reader.offsets(BlockType::Log).unwrap().present);

        let logs: Vec<LogRecord> = reader
            .log_iter()
            .unwrap()
            .map(|rec| match rec.unwrap() {
                Record::Log(l) => l,
                other => panic!("expected log, got {}", other),
            })
            .collect();
        assert_eq!(logs.len(), 40);
        for pair in logs.windows(2) {
            if pair[0].ref_name == pair[1].ref_name {
                assert!(pair[0].update_index > pair[1].update_index);
            } else {
                assert!(pair[0].ref_name < pair[1].ref_name);
            }
        }
        assert_eq!(logs[0].update_index, 200);
        assert_eq!(logs[0].entry().unwrap().message, "update 0");

        let mut it = reader.seek_log(&ref_name(2), 198).unwrap();
        let Some(Record::Log(l)) = it.next_record().unwrap() else {
            panic!("expected a log record");
        };
        assert_eq!(l.ref_name, ref_name(2));
        assert_eq!(l.update_index, 198);

        let mut it = reader.seek_log(&ref_name(3), u64::MAX).unwrap();
        let Some(Record::Log(l)) = it.next_record().unwrap() else {
            panic!("expected a log record");
        };
        assert_eq!(l.update_index, 200);

        drop(it);
        assert_eq!(leases.outstanding(), 0);
    }

    #[test]
    fn test_only_logs() {
        let (reader, _) = open(build(WriterOptions::default(), 0, 5));
        assert!(!reader.offsets(BlockType::Ref).unwrap().present);
        assert!(reader.offsets(BlockType::Log).unwrap().present);
        assert_eq!(reader.offsets(BlockType::Log).unwrap().offset, 0);
        assert_eq!(reader.log_iter().unwrap().count(), 5);
    }

    #[test]
    fn test_refs_for() {
        for index_objects in [true, false] {
            let opts = WriterOptions::default()
                .block_size(256)
                .index_objects(index_objects);
            let (reader, _) = open(build(opts, 100, 0));
            assert_eq!(reader.offsets(BlockType::Obj).unwrap().present, index_objects);

            // hash(4) is the value of ref 4 and the peeled value of ref 3.
            let mut found: Vec<String> = reader
                .refs_for(&hash(4))
                .unwrap()
                .into_iter()
                .map(|r| r.ref_name)
                .collect();
            found.sort();
            assert_eq!(found, vec![ref_name(3), ref_name(4)]);

            assert!(reader.refs_for(&[0x55; HASH_SIZE]).unwrap().is_empty());
        }
    }

    #[test]
    fn test_refs_for_crowded_object() {
        let mut w = Writer::new(Vec::new(), WriterOptions::default().block_size(256)).unwrap();
        w.set_limits(1, 1).unwrap();
        for i in 0..2000 {
            w.add_ref(RefRecord::new(
                format!("refs/heads/branch{:05}", i),
                1,
                RefValue::Value([7; HASH_SIZE]),
            ))
            .unwrap();
        }
        let (reader, _) = open(w.finish().unwrap());

        match reader.seek(BlockType::Obj, &[7, 7]).unwrap().next_record().unwrap() {
            Some(Record::Obj(obj)) => {
                assert_eq!(obj.hash_prefix, vec![7, 7]);
                assert!(obj.offsets.is_empty());
            }
            other => panic!("expected object record, got {:?}", other),
        }

        let found = reader.refs_for(&[7; HASH_SIZE]).unwrap();
        assert_eq!(found.len(), 2000);
        assert_eq!(found[0].ref_name, "refs/heads/branch00000");
        assert_eq!(found[1999].update_index, 1);
    }

    #[test]
    fn test_self_referencing_index() {
        let header = Header {
            block_size: 256,
            min_update_index: 0,
            max_update_index: 0,
        };

        let mut refs = BlockWriter::new(BlockType::Ref, 256, HEADER_SIZE, 16);
        let rec = RefRecord::new("refs/heads/a", 0, RefValue::Deletion);
        assert!(refs.add(&rec.into()).unwrap());
        let mut buf = refs.finish();
        buf[..HEADER_SIZE].copy_from_slice(&header.encode());
        buf.resize(256, 0);

        let mut index = BlockWriter::new(BlockType::Index, 256, 0, 16);
        let rec = IndexRecord {
            last_key: b"refs/heads/zzz".to_vec(),
            offset: 256,
        };
        assert!(index.add(&rec.into()).unwrap());
        buf.extend_from_slice(&index.finish());

        let footer = Footer {
            header,
            ref_index_offset: 256,
            ..Footer::default()
        };
        buf.extend_from_slice(&footer.encode());

        let reader = Reader::from_bytes(buf).unwrap();
        let err = reader.seek_ref("refs/heads/b").unwrap_err();
        assert!(err.is_format());
    }

    #[test]
    fn test_fork_is_independent() {
        let (reader, leases) = open(build(WriterOptions::default().block_size(256), 30, 0));
        let mut it = reader.ref_iter().unwrap();
        it.next_record().unwrap();

        let mut fork = it.fork();
        let a: Vec<_> = refs(it).into_iter().map(|r| r.ref_name).collect();
        assert_eq!(a.len(), 29);

        let b = fork.next_record().unwrap().unwrap();
        assert_eq!(b.key(), ref_name(1).as_bytes());
        drop(fork);
        assert_eq!(leases.outstanding(), 0);
    }

    #[test]
    fn test_block_size_at() {
        let (reader, _) = open(build(WriterOptions::default().block_size(256), 30, 0));
        let (typ, len) = reader.block_size_at(0).unwrap().unwrap();
        assert_eq!(typ, BlockType::Ref);
        assert!(len as usize > HEADER_SIZE && len <= 256);

        assert!(reader.block_size_at(reader.size()).unwrap().is_none());
        assert!(reader
            .init_block_reader(0, Some(BlockType::Log))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("000001.ref");
        std::fs::write(&path, build(WriterOptions::default(), 20, 8)).unwrap();

        let mut reader = Reader::open(&path).unwrap();
        assert_eq!(refs(reader.ref_iter().unwrap()).len(), 20);
        assert_eq!(reader.log_iter().unwrap().count(), 8);
        assert_eq!(reader.refs_for(&hash(7)).unwrap().len(), 2);

        reader.close();
        assert!(reader.ref_iter().unwrap_err().is_io());

        let err = Reader::open(dir.path().join("missing.ref")).unwrap_err();
        assert_eq!(err.code(), crate::error::NOT_EXIST_ERROR);
    }
}
