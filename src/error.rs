//! Error types for device and buffer operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the device channel, the block buffer and the encoders.
#[derive(Error, Debug)]
pub enum Error {
    /// The device open was rejected for access reasons.
    #[error("failed to open device \"{}\" (permission denied)", path.display())]
    PermissionDenied { path: PathBuf },

    /// The device path does not exist.
    #[error("device \"{}\" not found", path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Any other open failure, with the original cause.
    #[error("failed to open device \"{}\"", path.display())]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The channel is not open.
    #[error("device channel is closed")]
    Closed,

    /// The passthrough call itself failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The device transferred fewer bytes than requested.
    #[error("short transfer at LBA {lba}: expected {expected} bytes, got {actual}")]
    ShortTransfer {
        lba: u32,
        expected: usize,
        actual: usize,
    },

    /// The device or the host adapter reported a non-success status.
    #[error(
        "READ(10) at LBA {lba} rejected (status 0x{status:02x}, host 0x{host_status:04x}, \
         driver 0x{driver_status:04x}, sense key 0x{sense_key:x})"
    )]
    CommandRejected {
        lba: u32,
        status: u8,
        host_status: u16,
        driver_status: u16,
        sense_key: u8,
    },

    /// Offset/length arithmetic would overflow or leave the addressable range.
    #[error("out of bounds: offset {offset}, length {length}")]
    Bounds { offset: u64, length: u64 },

    /// Block size is not a usable sector size.
    #[error("invalid block size {0}")]
    InvalidBlockSize(usize),

    /// A byte count or device offset that must be block-aligned is not.
    #[error("{value} is not a multiple of the {block_size}-byte block size")]
    Misaligned { value: u64, block_size: usize },
}

impl Error {
    /// Whether this error belongs to the I/O category (failed, short or
    /// rejected transfer).
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::ShortTransfer { .. } | Error::CommandRejected { .. }
        )
    }

    pub(crate) fn bounds(offset: impl TryInto<u64>, length: impl TryInto<u64>) -> Self {
        Error::Bounds {
            offset: offset.try_into().unwrap_or(u64::MAX),
            length: length.try_into().unwrap_or(u64::MAX),
        }
    }

    /// Classify an `open(2)` failure on `path`.
    pub(crate) fn from_open(path: PathBuf, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::PermissionDenied => Error::PermissionDenied { path },
            io::ErrorKind::NotFound => Error::NotFound { path, source },
            _ => Error::OpenFailed { path, source },
        }
    }
}
