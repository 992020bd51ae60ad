//! Configuration options for device channels.

use crate::transport::TransportKind;
use std::time::Duration;

/// Sector size of the device family this crate targets.
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// Default passthrough command timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Options for opening and reading a device channel.
#[derive(Debug, Clone)]
pub struct Options {
    /// Device block size in bytes.
    ///
    /// Every transfer is `block_count * block_size` bytes. Must be a
    /// non-zero multiple of 512 and at most 64 KiB.
    pub block_size: usize,

    /// Flag byte placed in the READ(10) mode slot when the caller does
    /// not pass one explicitly.
    pub read_mode: u8,

    /// Timeout handed to the kernel for each passthrough command.
    pub timeout: Duration,

    /// How commands reach the device.
    ///
    /// [`TransportKind::Passthrough`] (default) issues SCSI commands with
    /// `SG_IO`. [`TransportKind::Image`] serves the same commands from a
    /// regular file holding a raw dump of the device.
    pub transport: TransportKind,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            read_mode: 0,
            timeout: DEFAULT_TIMEOUT,
            transport: TransportKind::Passthrough,
        }
    }
}

impl Options {
    /// Create a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the device block size.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the default READ(10) mode byte.
    pub fn with_read_mode(mut self, read_mode: u8) -> Self {
        self.read_mode = read_mode;
        self
    }

    /// Set the passthrough command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Select the transport.
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub(crate) fn block_size_is_valid(&self) -> bool {
        self.block_size != 0 && self.block_size % 512 == 0 && self.block_size <= 64 * 1024
    }
}
