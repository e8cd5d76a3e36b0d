//! Block sources hand out byte ranges of a table as [`Block`] leases.
//!
//! A lease is returned to its source when the `Block` is dropped, so every
//! `read_block` is paired with exactly one release on every path, including
//! early error returns. Sources count the leases they have outstanding.

use std::fmt;
use std::fs::File;
use std::io;
use std::ops::{Deref, Range};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::Error;

/// Provider of block bytes for a [`Reader`](super::Reader).
pub trait BlockSource: fmt::Debug + Send + Sync {
    /// Total size of the underlying table in bytes.
    fn size(&self) -> u64;

    /// Leases `size` bytes starting at `offset`.
    fn read_block(&self, offset: u64, size: u32) -> Result<Block>;

    /// Releases the underlying storage. Calling it again is a no-op.
    fn close(&mut self);
}

/// Counts the leases a source has handed out and not yet seen returned.
#[derive(Debug, Clone, Default)]
pub struct LeaseCounter(Arc<AtomicUsize>);

impl LeaseCounter {
    pub fn outstanding(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn acquire(&self) -> Lease {
        self.0.fetch_add(1, Ordering::SeqCst);
        Lease(self.0.clone())
    }
}

#[derive(Debug)]
struct Lease(Arc<AtomicUsize>);

impl Drop for Lease {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

enum BlockData {
    Owned(Vec<u8>),
    Shared { buf: Arc<[u8]>, range: Range<usize> },
}

/// Bytes leased from a [`BlockSource`]. Dropping it returns the lease.
pub struct Block {
    data: BlockData,
    _lease: Lease,
}

impl Block {
    pub fn len(&self) -> usize {
        self.deref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Deref for Block {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.data {
            BlockData::Owned(data) => data,
            BlockData::Shared { buf, range } => &buf[range.clone()],
        }
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block").field("len", &self.len()).finish()
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        // Poison returned file buffers so stale reads are easy to spot.
        if cfg!(debug_assertions) {
            if let BlockData::Owned(data) = &mut self.data {
                data.fill(0xff);
            }
        }
    }
}

/// Reads blocks from an open file with positioned reads.
#[derive(Debug)]
pub struct FileBlockSource {
    file: Option<File>,
    path: PathBuf,
    size: u64,
    leases: LeaseCounter,
}

impl FileBlockSource {
    /// Opens the table at `path`. A missing file is reported as
    /// [`Error::NotExist`] so callers can treat it as an empty table.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::NotExist(path));
            }
            Err(e) => return Err(Error::IoError(e)),
        };
        let size = file.metadata()?.len();

        tracing::trace!(path = %path.display(), size, "Opened file block source");
        Ok(Self {
            file: Some(file),
            path,
            size,
            leases: LeaseCounter::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn leases(&self) -> LeaseCounter {
        self.leases.clone()
    }
}

impl BlockSource for FileBlockSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_block(&self, offset: u64, size: u32) -> Result<Block> {
        let file = self.file.as_ref().ok_or(Error::Closed)?;

        let mut data = vec![0u8; size as usize];
        let got = read_full_at(file, &mut data, offset)?;
        if got != data.len() {
            return Err(Error::ShortRead {
                offset,
                wanted: data.len(),
                got,
            });
        }

        Ok(Block {
            data: BlockData::Owned(data),
            _lease: self.leases.acquire(),
        })
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            tracing::trace!(path = %self.path.display(), "Closed file block source");
        }
    }
}

/// Fills `buf` from `offset`, stopping early only at end of file. Returns the
/// number of bytes read.
#[cfg(unix)]
fn read_full_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;

    let mut done = 0;
    while done < buf.len() {
        match file.read_at(&mut buf[done..], offset + done as u64) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(done)
}

#[cfg(windows)]
fn read_full_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;

    let mut done = 0;
    while done < buf.len() {
        match file.seek_read(&mut buf[done..], offset + done as u64) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(done)
}

#[cfg(not(any(unix, windows)))]
fn read_full_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::io::{Read, Seek, SeekFrom};

    let mut file = file;
    file.seek(SeekFrom::Start(offset))?;
    let mut done = 0;
    while done < buf.len() {
        match file.read(&mut buf[done..]) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(done)
}

/// Serves blocks out of an in-memory table. Leases are views into the shared
/// buffer, not copies.
#[derive(Debug, Clone)]
pub struct BufferBlockSource {
    buf: Option<Arc<[u8]>>,
    size: u64,
    leases: LeaseCounter,
}

impl BufferBlockSource {
    pub fn new(buf: impl Into<Arc<[u8]>>) -> Self {
        let buf = buf.into();
        Self {
            size: buf.len() as u64,
            buf: Some(buf),
            leases: LeaseCounter::default(),
        }
    }

    pub fn leases(&self) -> LeaseCounter {
        self.leases.clone()
    }
}

impl BlockSource for BufferBlockSource {
    fn size(&self) -> u64 {
        self.size
    }

    /// # Panics
    ///
    /// Panics if the requested range lies outside the buffer. The reader
    /// clamps every request to the table size, so this signals a caller bug.
    fn read_block(&self, offset: u64, size: u32) -> Result<Block> {
        let buf = self.buf.as_ref().ok_or(Error::Closed)?;
        assert!(
            offset + u64::from(size) <= self.size,
            "block [{}, +{}) outside buffer of {} bytes",
            offset,
            size,
            self.size
        );

        let start = offset as usize;
        Ok(Block {
            data: BlockData::Shared {
                buf: buf.clone(),
                range: start..start + size as usize,
            },
            _lease: self.leases.acquire(),
        })
    }

    fn close(&mut self) {
        self.buf = None;
    }
}
