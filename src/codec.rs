//! Byte-order codecs.
//!
//! Two orders are in play and each has its own codec. [`CommandOrder`] is
//! the SCSI wire convention used for multi-byte command descriptor fields
//! and is always big-endian. [`RecordOrder`] is the order telemetry records
//! were written in by the device firmware, which is the host's native order
//! unless configured otherwise.

/// Big-endian codec for command descriptor fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOrder;

impl CommandOrder {
    /// Write `value` big-endian into `buf[..4]`.
    pub fn put_u32(buf: &mut [u8], value: u32) {
        buf[..4].copy_from_slice(&value.to_be_bytes());
    }

    /// Write `value` big-endian into `buf[..2]`.
    pub fn put_u16(buf: &mut [u8], value: u16) {
        buf[..2].copy_from_slice(&value.to_be_bytes());
    }

    /// Read a big-endian `u32` from `buf[..4]`.
    pub fn get_u32(buf: &[u8]) -> u32 {
        u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
    }

    /// Read a big-endian `u16` from `buf[..2]`.
    pub fn get_u16(buf: &[u8]) -> u16 {
        u16::from_be_bytes([buf[0], buf[1]])
    }
}

/// Byte order of decoded record fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOrder {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
}

impl RecordOrder {
    /// The host's native order.
    #[cfg(target_endian = "little")]
    pub const NATIVE: RecordOrder = RecordOrder::Little;
    /// The host's native order.
    #[cfg(target_endian = "big")]
    pub const NATIVE: RecordOrder = RecordOrder::Big;

    /// Decode an unsigned 32-bit field.
    pub fn u32(self, bytes: [u8; 4]) -> u32 {
        match self {
            RecordOrder::Little => u32::from_le_bytes(bytes),
            RecordOrder::Big => u32::from_be_bytes(bytes),
        }
    }

    /// Decode a signed 32-bit field.
    pub fn i32(self, bytes: [u8; 4]) -> i32 {
        self.u32(bytes) as i32
    }

    /// Decode an unsigned 16-bit field.
    pub fn u16(self, bytes: [u8; 2]) -> u16 {
        match self {
            RecordOrder::Little => u16::from_le_bytes(bytes),
            RecordOrder::Big => u16::from_be_bytes(bytes),
        }
    }

    /// Decode a signed 16-bit field.
    pub fn i16(self, bytes: [u8; 2]) -> i16 {
        self.u16(bytes) as i16
    }
}

impl Default for RecordOrder {
    fn default() -> Self {
        RecordOrder::NATIVE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_order_is_big_endian() {
        let mut buf = [0u8; 6];
        CommandOrder::put_u32(&mut buf, 0x0102_0304);
        CommandOrder::put_u16(&mut buf[4..], 0xA0B0);
        assert_eq!(buf, [0x01, 0x02, 0x03, 0x04, 0xA0, 0xB0]);
        assert_eq!(CommandOrder::get_u32(&buf), 0x0102_0304);
        assert_eq!(CommandOrder::get_u16(&buf[4..]), 0xA0B0);
    }

    #[test]
    fn test_record_order() {
        assert_eq!(RecordOrder::Little.u16([0xFF, 0x00]), 0x00FF);
        assert_eq!(RecordOrder::Big.u16([0xFF, 0x00]), 0xFF00);
        assert_eq!(RecordOrder::Little.i16([0xFE, 0xFF]), -2);
        assert_eq!(RecordOrder::Little.u32([0x78, 0x56, 0x34, 0x12]), 0x1234_5678);
        assert_eq!(RecordOrder::Big.u32([0x12, 0x34, 0x56, 0x78]), 0x1234_5678);
        assert_eq!(RecordOrder::Big.i32([0xFF, 0xFF, 0xFF, 0x85]), -123);
    }

    #[test]
    fn test_native_default() {
        let native = if cfg!(target_endian = "little") {
            RecordOrder::Little
        } else {
            RecordOrder::Big
        };
        assert_eq!(RecordOrder::default(), native);
        assert_eq!(
            RecordOrder::NATIVE.u32(0xDEAD_BEEFu32.to_ne_bytes()),
            0xDEAD_BEEF
        );
    }
}
