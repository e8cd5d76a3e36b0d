use crate::error::Result;
use crate::table::MAX_BLOCK_SIZE;
use crate::Error;

/// Configuration for writing a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterOptions {
    /// Size of each block in bytes (default: 4096)
    pub block_size: u32,

    /// A record's key is stored in full every this many records (default: 16)
    pub restart_interval: usize,

    /// Skip zero padding between blocks (default: false)
    pub unpadded: bool,

    /// Write the object section mapping hashes back to ref blocks (default: true)
    pub index_objects: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            block_size: 4096,
            restart_interval: 16,
            unpadded: false,
            index_objects: true,
        }
    }
}

impl WriterOptions {
    /// Set the block size
    pub fn block_size(mut self, size: u32) -> Self {
        self.block_size = size;
        self
    }

    /// Set the restart interval
    pub fn restart_interval(mut self, interval: usize) -> Self {
        self.restart_interval = interval;
        self
    }

    /// Write blocks back to back without padding
    pub fn unpadded(mut self, unpadded: bool) -> Self {
        self.unpadded = unpadded;
        self
    }

    /// Enable or disable the object section
    pub fn index_objects(mut self, enabled: bool) -> Self {
        self.index_objects = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 || self.block_size >= MAX_BLOCK_SIZE {
            return Err(Error::InvalidOperation(format!(
                "block size {} must be in (0, {})",
                self.block_size, MAX_BLOCK_SIZE
            )));
        }
        if self.restart_interval == 0 {
            return Err(Error::InvalidOperation(
                "restart interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
