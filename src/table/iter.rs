use std::sync::Arc;

use super::block::{BlockIter, BlockReader};
use super::reader::Reader;
use super::{BlockType, Record};
use crate::error::Result;

/// Forward cursor over the records of one section, crossing block
/// boundaries as it goes.
///
/// An iterator without a current block is exhausted. Cloning (or [`fork`])
/// gives an independent cursor that shares the current block.
///
/// [`fork`]: TableIter::fork
#[derive(Debug, Clone)]
pub struct TableIter<'a> {
    reader: &'a Reader,
    typ: BlockType,
    block_off: u64,
    bi: Option<BlockIter>,
}

impl<'a> TableIter<'a> {
    /// An iterator that yields nothing.
    pub(crate) fn empty(reader: &'a Reader, typ: BlockType) -> Self {
        Self {
            reader,
            typ,
            block_off: 0,
            bi: None,
        }
    }

    /// An iterator at the start of the block at `off`, or `None` when there
    /// is no block of type `typ` there.
    pub(crate) fn at_block(reader: &'a Reader, off: u64, typ: BlockType) -> Result<Option<Self>> {
        let Some(br) = reader.init_block_reader(off, Some(typ))? else {
            return Ok(None);
        };
        Ok(Some(Self::positioned(reader, off, Arc::new(br).start())))
    }

    /// An iterator continuing from `bi`, a cursor into the block at `off`.
    pub(crate) fn positioned(reader: &'a Reader, off: u64, bi: BlockIter) -> Self {
        Self {
            reader,
            typ: bi.block_reader().block_type(),
            block_off: off,
            bi: Some(bi),
        }
    }

    /// Seeks within the block at `off`, which must already be parsed as `br`.
    pub(crate) fn seek_in_block(
        reader: &'a Reader,
        off: u64,
        br: BlockReader,
        key: &[u8],
    ) -> Result<Self> {
        let bi = Arc::new(br).seek(key)?;
        Ok(Self::positioned(reader, off, bi))
    }

    pub fn fork(&self) -> Self {
        self.clone()
    }

    pub fn block_type(&self) -> BlockType {
        self.typ
    }

    /// Offset of the block the cursor is in.
    pub fn block_offset(&self) -> u64 {
        self.block_off
    }

    pub fn is_exhausted(&self) -> bool {
        self.bi.is_none()
    }

    /// Moves to the block following the current one. The current block is
    /// kept until the next one has loaded.
    fn next_block(&mut self) -> Result<bool> {
        let Some(bi) = &self.bi else {
            return Ok(false);
        };
        let next_off = self.block_off + u64::from(bi.block_reader().full_block_size());

        match self.reader.init_block_reader(next_off, Some(self.typ)) {
            Ok(Some(br)) => {
                self.block_off = next_off;
                self.bi = Some(Arc::new(br).start());
                Ok(true)
            }
            Ok(None) => {
                self.bi = None;
                Ok(false)
            }
            Err(e) => {
                self.bi = None;
                Err(e)
            }
        }
    }

    /// Returns the next record of the section, or `None` at its end.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            let Some(bi) = self.bi.as_mut() else {
                return Ok(None);
            };
            match bi.next_record() {
                Ok(Some(rec)) => return self.reader.rebase(rec).map(Some),
                Ok(None) => {
                    if !self.next_block()? {
                        return Ok(None);
                    }
                }
                Err(e) => {
                    self.bi = None;
                    return Err(e);
                }
            }
        }
    }
}

impl Iterator for TableIter<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
