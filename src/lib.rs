//! # sgwindow
//!
//! A Rust crate for reading blocked binary data off raw block devices with
//! SCSI READ(10) passthrough commands.
//!
//! ## Overview
//!
//! Some devices (GPS loggers, bike computers and similar USB mass-storage
//! gadgets) expose their recorded telemetry as raw sectors rather than as
//! files. `sgwindow` issues READ(10) commands directly through the Linux
//! `SG_IO` interface and presents the result as a lazily growing byte
//! window with typed field accessors:
//!
//! - [`DeviceChannel`] opens a device node and reads whole blocks
//! - [`BlockBuffer`] maps byte offsets onto block reads, fetching only
//!   what is not already in memory
//! - `int32_at`, `uint16_at`, `text_at`, ... decode record fields in the
//!   record byte order ([`RecordOrder`])
//!
//! Command descriptor fields always use the big-endian SCSI convention
//! ([`CommandOrder`]); record fields use [`RecordOrder`], the host's native
//! order by default.
//!
//! ## Example
//!
//! ```no_run
//! use sgwindow::{BlockBuffer, DeviceChannel, Options};
//!
//! let mut channel = DeviceChannel::new_opt("/dev/sg2", Options::new().with_read_mode(1)).unwrap();
//! channel.open().unwrap();
//!
//! let header = BlockBuffer::new(channel).unwrap();
//! let name = header.text_at(0, 8).unwrap();
//! let points = header.uint32_at(8).unwrap();
//! println!("{}: {} points", name, points);
//! ```
//!
//! ## Safety
//!
//! Reading a device node usually requires root privileges or membership of
//! the `disk` group; a rejected open is reported as
//! [`Error::PermissionDenied`].

mod buffer;
mod channel;
mod codec;
mod command;
mod error;
mod fields;
mod options;
mod sg;
mod transport;

pub use buffer::{BlockBuffer, BlockSource};
pub use channel::DeviceChannel;
pub use codec::{CommandOrder, RecordOrder};
pub use command::{encode_read_command, Read10Command, READ10_LEN, READ10_OPCODE};
pub use error::{Error, Result};
pub use options::{Options, DEFAULT_BLOCK_SIZE, DEFAULT_TIMEOUT};
pub use sg::SgTransport;
pub use transport::{ImageTransport, Transport, TransportKind};
