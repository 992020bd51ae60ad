//! Command transports.
//!
//! A [`Transport`] carries one READ(10) command to a device and fills the
//! caller's buffer with whatever the device returned. The channel on top
//! decides whether the transfer was complete.

use crate::command::Read10Command;
use crate::error::{Error, Result};
use crate::options::Options;
use crate::sg::SgTransport;

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

/// Selects how commands reach the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// SCSI generic passthrough (`SG_IO`).
    #[default]
    Passthrough,
    /// Positional reads on a raw device image.
    Image,
}

impl TransportKind {
    /// Open `path` read-only and wrap it in the selected transport.
    pub fn open(self, path: &Path, options: &Options) -> Result<Box<dyn Transport>> {
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(|e| Error::from_open(path.to_path_buf(), e))?;

        Ok(match self {
            TransportKind::Passthrough => Box::new(SgTransport::new(file, options.timeout)),
            TransportKind::Image => Box::new(ImageTransport::new(file, options.block_size)),
        })
    }
}

/// Issues READ(10) commands on an open device handle.
///
/// At most one command is in flight per transport; `&mut self` enforces it.
/// Transports are `Send` so a channel can move into a worker thread or sit
/// behind a `Mutex`.
pub trait Transport: Send {
    /// Execute `command`, reading into `buf`.
    ///
    /// `buf` is exactly `transfer_length * block_size` bytes. Returns the
    /// number of bytes the device actually transferred.
    fn read10(&mut self, command: &Read10Command, buf: &mut [u8]) -> Result<usize>;
}

/// Serves READ(10) commands from a regular file holding a raw device dump.
#[derive(Debug)]
pub struct ImageTransport {
    file: File,
    block_size: usize,
}

impl ImageTransport {
    /// Serve blocks of `block_size` bytes from `file`.
    pub fn new(file: File, block_size: usize) -> Self {
        Self { file, block_size }
    }
}

impl Transport for ImageTransport {
    fn read10(&mut self, command: &Read10Command, buf: &mut [u8]) -> Result<usize> {
        let mut offset = command.logical_block_address as u64 * self.block_size as u64;
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read_at(&mut buf[filled..], offset)?;
            if n == 0 {
                break;
            }
            filled += n;
            offset += n as u64;
        }
        Ok(filled)
    }
}
