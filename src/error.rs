use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Numeric code for I/O failures: short reads, closed sources, descriptor errors.
pub const IO_ERROR: i32 = -2;
/// Numeric code for structurally invalid tables.
pub const FORMAT_ERROR: i32 = -3;
/// Numeric code for a table file that does not exist.
pub const NOT_EXIST_ERROR: i32 = -4;
/// Numeric code for caller contract violations.
pub const API_ERROR: i32 = -6;

#[derive(Debug)]
pub enum Error {
    IoError(io::Error),
    ShortRead {
        offset: u64,
        wanted: usize,
        got: usize,
    },
    Closed,
    BadMagic([u8; 4]),
    UnsupportedVersion(u8),
    ChecksumMismatch,
    Format(String),
    NotExist(PathBuf),
    BufferTooSmall,
    InvalidOperation(String),
}

impl Error {
    /// Returns the numeric error class for this error.
    pub fn code(&self) -> i32 {
        match self {
            Error::IoError(_) | Error::ShortRead { .. } | Error::Closed => IO_ERROR,
            Error::BadMagic(_)
            | Error::UnsupportedVersion(_)
            | Error::ChecksumMismatch
            | Error::Format(_) => FORMAT_ERROR,
            Error::NotExist(_) => NOT_EXIST_ERROR,
            Error::BufferTooSmall | Error::InvalidOperation(_) => API_ERROR,
        }
    }

    pub fn is_io(&self) -> bool {
        self.code() == IO_ERROR
    }

    pub fn is_format(&self) -> bool {
        self.code() == FORMAT_ERROR
    }

    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::ShortRead {
                offset,
                wanted,
                got,
            } => write!(
                f,
                "Short read at offset {}: wanted {} bytes, got {}",
                offset, wanted, got
            ),
            Error::Closed => write!(f, "Block source is closed"),
            Error::BadMagic(magic) => write!(f, "Bad table magic: {:?}", magic),
            Error::UnsupportedVersion(v) => write!(f, "Unsupported table version: {}", v),
            Error::ChecksumMismatch => write!(f, "Footer checksum mismatch"),
            Error::Format(msg) => write!(f, "Format error: {}", msg),
            Error::NotExist(path) => write!(f, "Table does not exist: {}", path.display()),
            Error::BufferTooSmall => write!(f, "Destination buffer too small"),
            Error::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}
