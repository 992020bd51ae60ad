//! Typed field accessors.
//!
//! Integers are decoded with the view's [`RecordOrder`](crate::RecordOrder),
//! never with the big-endian command order. Each accessor may extend the
//! buffer like [`BlockBuffer::read_bytes`].

use crate::buffer::{BlockBuffer, BlockSource};
use crate::error::Result;

impl<S: BlockSource> BlockBuffer<S> {
    /// Signed 32-bit field at `offset`.
    pub fn int32_at(&self, offset: usize) -> Result<i32> {
        Ok(self.record_order().i32(self.array_at(offset)?))
    }

    /// Unsigned 32-bit field at `offset`.
    pub fn uint32_at(&self, offset: usize) -> Result<u32> {
        Ok(self.record_order().u32(self.array_at(offset)?))
    }

    /// Signed 16-bit field at `offset`.
    pub fn int16_at(&self, offset: usize) -> Result<i16> {
        Ok(self.record_order().i16(self.array_at(offset)?))
    }

    /// Unsigned 16-bit field at `offset`.
    pub fn uint16_at(&self, offset: usize) -> Result<u16> {
        Ok(self.record_order().u16(self.array_at(offset)?))
    }

    /// Signed byte at `offset`.
    pub fn int8_at(&self, offset: usize) -> Result<i8> {
        let [b] = self.array_at::<1>(offset)?;
        Ok(b as i8)
    }

    /// Unsigned byte at `offset`.
    pub fn uint8_at(&self, offset: usize) -> Result<u8> {
        let [b] = self.array_at::<1>(offset)?;
        Ok(b)
    }

    /// Exactly `length` bytes at `offset` as text.
    ///
    /// There is no terminator scan; NUL and padding bytes are kept. Invalid
    /// UTF-8 is replaced with U+FFFD.
    pub fn text_at(&self, offset: usize, length: usize) -> Result<String> {
        self.with_bytes(offset, length, |bytes| {
            String::from_utf8_lossy(bytes).into_owned()
        })
    }
}
