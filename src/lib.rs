//! Reader and writer for reftable files: immutable, block-structured tables
//! of git references, object back-references and reflog entries.
//!
//! ```no_run
//! use reftable::table::{Reader, RefRecord, RefValue, Writer};
//! use reftable::WriterOptions;
//!
//! # fn main() -> reftable::Result<()> {
//! let mut w = Writer::new(Vec::new(), WriterOptions::default())?;
//! w.set_limits(1, 1)?;
//! w.add_ref(RefRecord::new("refs/heads/main", 1, RefValue::Value([1; 20])))?;
//! let table = w.finish()?;
//!
//! let reader = Reader::from_bytes(table)?;
//! let main = reader.read_ref("refs/heads/main")?;
//! assert!(main.is_some());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod encoding;
pub mod error;
pub mod table;

pub use config::WriterOptions;
pub use error::{Error, Result};
