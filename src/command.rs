//! SCSI READ(10) command descriptor block.

use crate::codec::CommandOrder;
use crate::error::{Error, Result};

/// READ(10) operation code.
pub const READ10_OPCODE: u8 = 0x28;

/// Length of a READ(10) CDB in bytes.
pub const READ10_LEN: usize = 10;

/// READ(10) command: read `transfer_length` blocks starting at
/// `logical_block_address`.
///
/// Byte layout:
///
/// | Offset | Field |
/// |---|---|
/// | 0 | opcode `0x28` |
/// | 1 | `flags` |
/// | 2..6 | `logical_block_address`, big-endian |
/// | 6 | `read_mode` |
/// | 7..9 | `transfer_length`, big-endian |
/// | 9 | control, always 0 |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Read10Command {
    /// Byte 1 (RDPROTECT/DPO/FUA bits in SBC). Zero for the devices we talk to.
    pub flags: u8,
    /// First block to read.
    pub logical_block_address: u32,
    /// Byte 6, nominally GROUP NUMBER. Some GPS logger firmwares read it
    /// as a mode selector for which memory region the transfer comes from.
    pub read_mode: u8,
    /// Number of blocks to transfer.
    pub transfer_length: u16,
}

impl Read10Command {
    /// Create a command with `flags` cleared.
    pub fn new(logical_block_address: u32, transfer_length: u16, read_mode: u8) -> Self {
        Self {
            flags: 0,
            logical_block_address,
            read_mode,
            transfer_length,
        }
    }

    /// Build a command from wider integers, rejecting values that do not
    /// fit the CDB fields.
    pub fn try_new(lba: u64, block_count: u32, read_mode: u8) -> Result<Self> {
        let logical_block_address =
            u32::try_from(lba).map_err(|_| Error::bounds(lba, block_count))?;
        let transfer_length =
            u16::try_from(block_count).map_err(|_| Error::bounds(lba, block_count))?;
        Ok(Self::new(logical_block_address, transfer_length, read_mode))
    }

    /// Set byte 1.
    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    /// Serialize into the 10-byte CDB.
    pub fn to_bytes(&self) -> [u8; READ10_LEN] {
        let mut cdb = [0u8; READ10_LEN];
        cdb[0] = READ10_OPCODE;
        cdb[1] = self.flags;
        CommandOrder::put_u32(&mut cdb[2..6], self.logical_block_address);
        cdb[6] = self.read_mode;
        CommandOrder::put_u16(&mut cdb[7..9], self.transfer_length);
        // cdb[9]: control
        cdb
    }

    /// Decode a READ(10) CDB. Returns `None` for a wrong length or opcode.
    pub fn parse(cdb: &[u8]) -> Option<Self> {
        if cdb.len() != READ10_LEN || cdb[0] != READ10_OPCODE {
            return None;
        }
        Some(Self {
            flags: cdb[1],
            logical_block_address: CommandOrder::get_u32(&cdb[2..6]),
            read_mode: cdb[6],
            transfer_length: CommandOrder::get_u16(&cdb[7..9]),
        })
    }
}

/// Encode a READ(10) CDB for `block_count` blocks at `lba`, with `flag_byte`
/// carried in the mode slot (byte 6).
///
/// Fails with [`Error::Bounds`] if `lba` does not fit 32 bits or
/// `block_count` does not fit 16 bits.
pub fn encode_read_command(
    lba: u64,
    block_count: u32,
    flag_byte: u8,
) -> Result<[u8; READ10_LEN]> {
    Ok(Read10Command::try_new(lba, block_count, flag_byte)?.to_bytes())
}
