//! Device channel: an explicitly opened handle that reads whole blocks.

use crate::command::Read10Command;
use crate::error::{Error, Result};
use crate::options::Options;
use crate::transport::Transport;

use std::path::{Path, PathBuf};

/// An open (or openable) block device.
///
/// The channel is created closed. [`open`](DeviceChannel::open) acquires the
/// handle, [`close`](DeviceChannel::close) releases it, and every read in
/// between is a single READ(10) command through the configured transport.
///
/// Only one command is outstanding at a time; the channel is not `Sync`
/// and callers sharing it across threads must wrap it in a mutex.
///
/// # Example
///
/// ```no_run
/// use sgwindow::DeviceChannel;
///
/// let mut channel = DeviceChannel::new("/dev/sg2");
/// channel.open().unwrap();
/// let sector = channel.read_block(0).unwrap();
/// assert_eq!(sector.len(), 512);
/// channel.close();
/// ```
pub struct DeviceChannel {
    path: PathBuf,
    options: Options,
    transport: Option<Box<dyn Transport>>,
}

impl DeviceChannel {
    /// Create a closed channel for `path` with default options.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            options: Options::default(),
            transport: None,
        }
    }

    /// Create a closed channel for `path` with the given options.
    pub fn new_opt(path: impl AsRef<Path>, options: Options) -> Result<Self> {
        if !options.block_size_is_valid() {
            return Err(Error::InvalidBlockSize(options.block_size));
        }
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            options,
            transport: None,
        })
    }

    /// Create an already-open channel over a caller-provided transport.
    pub fn with_transport(transport: Box<dyn Transport>, options: Options) -> Result<Self> {
        let mut channel = Self::new_opt(PathBuf::new(), options)?;
        channel.transport = Some(transport);
        Ok(channel)
    }

    /// Open the device read-only.
    ///
    /// Access rejections surface as [`Error::PermissionDenied`]; the
    /// channel stays closed on any failure. Opening an open channel
    /// replaces its handle.
    pub fn open(&mut self) -> Result<()> {
        self.open_with(|path, options| options.transport.open(path, options))
    }

    /// Open through `opener` instead of the configured transport kind.
    pub(crate) fn open_with<F>(&mut self, opener: F) -> Result<()>
    where
        F: FnOnce(&Path, &Options) -> Result<Box<dyn Transport>>,
    {
        let transport = opener(&self.path, &self.options)?;
        log::debug!(
            "opened {} ({:?}, {}-byte blocks)",
            self.path.display(),
            self.options.transport,
            self.options.block_size
        );
        self.transport = Some(transport);
        Ok(())
    }

    /// Release the device handle. A no-op on a channel that is not open.
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            log::debug!("closed {}", self.path.display());
        }
    }

    /// Whether the channel currently holds a device handle.
    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Device path given at construction. Empty for channels built with
    /// [`with_transport`](DeviceChannel::with_transport).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block size in bytes; every transfer is a multiple of it.
    pub fn block_size(&self) -> usize {
        self.options.block_size
    }

    /// Options the channel was created with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// LBA of the block containing device byte `offset`.
    pub fn offset_to_block(&self, offset: u64) -> Result<u32> {
        let lba = offset / self.options.block_size as u64;
        u32::try_from(lba).map_err(|_| Error::bounds(offset, 0u64))
    }

    /// Read one block.
    pub fn read_block(&mut self, lba: u32) -> Result<Vec<u8>> {
        self.read_blocks(lba, 1)
    }

    /// Read `block_count` blocks at `lba` using the default mode byte.
    pub fn read_blocks(&mut self, lba: u32, block_count: u16) -> Result<Vec<u8>> {
        self.read_blocks_with_mode(lba, block_count, self.options.read_mode)
    }

    /// Read `block_count` blocks at `lba`, carrying `read_mode` in the
    /// command's mode byte.
    ///
    /// Returns exactly `block_count * block_size` bytes or an error; a short
    /// transfer is [`Error::ShortTransfer`].
    pub fn read_blocks_with_mode(
        &mut self,
        lba: u32,
        block_count: u16,
        read_mode: u8,
    ) -> Result<Vec<u8>> {
        let transport = self.transport.as_mut().ok_or(Error::Closed)?;

        let command = Read10Command::new(lba, block_count, read_mode);
        let expected = block_count as usize * self.options.block_size;
        let mut buf = vec![0u8; expected];

        log::trace!("READ(10) lba={lba} count={block_count} mode={read_mode}");
        let actual = transport.read10(&command, &mut buf).map_err(|e| {
            log::warn!("READ(10) at lba {lba} failed: {e}");
            e
        })?;

        if actual != expected {
            log::warn!("READ(10) at lba {lba}: short transfer {actual}/{expected}");
            return Err(Error::ShortTransfer {
                lba,
                expected,
                actual,
            });
        }
        Ok(buf)
    }
}

impl std::fmt::Debug for DeviceChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceChannel")
            .field("path", &self.path)
            .field("options", &self.options)
            .field("open", &self.is_open())
            .finish()
    }
}
