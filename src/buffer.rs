//! Lazily growing block buffer.
//!
//! A [`BlockBuffer`] is a view into an append-only byte arena that mirrors a
//! contiguous run of device blocks. Reads past the materialized end pull the
//! missing blocks from the [`BlockSource`] and append them; bytes already in
//! the arena are never fetched again, whichever view asks for them.
//!
//! Views derived from one another share the arena. The arena is not
//! thread-safe; views are neither `Send` nor `Sync`.

use crate::channel::DeviceChannel;
use crate::codec::RecordOrder;
use crate::error::{Error, Result};

use std::cell::RefCell;
use std::rc::Rc;

/// Something that reads whole blocks by LBA.
pub trait BlockSource {
    /// Size of one block in bytes.
    fn block_size(&self) -> usize;

    /// Read `block_count` blocks at `lba`. A successful result holds
    /// exactly `block_count * block_size()` bytes.
    fn read_blocks(&mut self, lba: u32, block_count: u16) -> Result<Vec<u8>>;
}

impl BlockSource for DeviceChannel {
    fn block_size(&self) -> usize {
        DeviceChannel::block_size(self)
    }

    fn read_blocks(&mut self, lba: u32, block_count: u16) -> Result<Vec<u8>> {
        DeviceChannel::read_blocks(self, lba, block_count)
    }
}

impl<S: BlockSource + ?Sized> BlockSource for &mut S {
    fn block_size(&self) -> usize {
        (**self).block_size()
    }

    fn read_blocks(&mut self, lba: u32, block_count: u16) -> Result<Vec<u8>> {
        (**self).read_blocks(lba, block_count)
    }
}

impl<S: BlockSource + ?Sized> BlockSource for Box<S> {
    fn block_size(&self) -> usize {
        (**self).block_size()
    }

    fn read_blocks(&mut self, lba: u32, block_count: u16) -> Result<Vec<u8>> {
        (**self).read_blocks(lba, block_count)
    }
}

struct Arena<S> {
    source: S,
    block_size: usize,
    /// Device byte offset of `data[0]`; block-aligned.
    base: u64,
    data: Vec<u8>,
    blocks_per_fetch: u16,
    fetches: u64,
}

impl<S: BlockSource> Arena<S> {
    /// Make sure `data[end]` is materialized.
    ///
    /// New blocks are staged and appended only once every command has
    /// succeeded, so a failure leaves `data` untouched.
    fn materialize_through(&mut self, end: usize) -> Result<()> {
        let len = self.data.len();
        if end < len {
            return Ok(());
        }

        let bs = self.block_size;
        let missing = (end - len + 1).div_ceil(bs);
        let first = self
            .base
            .checked_add(len as u64)
            .map(|offset| offset / bs as u64)
            .ok_or_else(|| Error::bounds(end, 1u64))?;
        let last = first + missing as u64 - 1;
        if last > u32::MAX as u64 {
            return Err(Error::bounds(self.base.saturating_add(end as u64), 1u64));
        }

        let total = missing
            .checked_mul(bs)
            .ok_or_else(|| Error::bounds(len, end - len + 1))?;
        let mut staged = Vec::new();
        staged
            .try_reserve_exact(total)
            .and_then(|_| self.data.try_reserve_exact(total))
            .map_err(|_| Error::bounds(len, total))?;
        let mut lba = first as u32;
        let mut remaining = missing;
        while remaining > 0 {
            let count = remaining.min(self.blocks_per_fetch as usize) as u16;
            self.fetches += 1;
            let blocks = self.source.read_blocks(lba, count)?;
            let expected = count as usize * bs;
            if blocks.len() != expected {
                return Err(Error::ShortTransfer {
                    lba,
                    expected,
                    actual: blocks.len(),
                });
            }
            staged.extend_from_slice(&blocks);
            // wraps only past the final block, when the loop is done
            lba = lba.wrapping_add(count as u32);
            remaining -= count as usize;
        }

        log::debug!(
            "extended buffer at base {} by {} block(s) from lba {}",
            self.base,
            missing,
            first
        );
        self.data.append(&mut staged);
        Ok(())
    }
}

/// A view at a relative offset into a shared, lazily fetched block arena.
///
/// # Example
///
/// ```no_run
/// use sgwindow::{BlockBuffer, DeviceChannel};
///
/// let mut channel = DeviceChannel::new("/dev/sg2");
/// channel.open().unwrap();
///
/// let buffer = BlockBuffer::at(channel, 0x2_0000).unwrap();
/// let count = buffer.uint16_at(0).unwrap();
/// let record = buffer.derive_view(16).unwrap();
/// let timestamp = record.uint32_at(0).unwrap();
/// ```
pub struct BlockBuffer<S> {
    arena: Rc<RefCell<Arena<S>>>,
    relative_offset: usize,
    record_order: RecordOrder,
}

impl<S: BlockSource> BlockBuffer<S> {
    /// An empty buffer anchored at device offset 0.
    pub fn new(source: S) -> Result<Self> {
        Self::at(source, 0)
    }

    /// An empty buffer whose offset 0 is device byte `device_offset`.
    ///
    /// The arena starts at the enclosing block boundary; the remainder
    /// becomes the view's initial relative offset.
    pub fn at(source: S, device_offset: u64) -> Result<Self> {
        let bs = checked_block_size(&source)?;
        let within = device_offset % bs as u64;
        let mut buffer = Self::from_parts(source, Vec::new(), device_offset - within)?;
        buffer.relative_offset = within as usize;
        Ok(buffer)
    }

    /// A buffer seeded with `data`, already fetched from device offset
    /// `base_offset`. Both must be whole blocks.
    pub fn from_parts(source: S, data: Vec<u8>, base_offset: u64) -> Result<Self> {
        let bs = checked_block_size(&source)?;
        if data.len() % bs != 0 {
            return Err(Error::Misaligned {
                value: data.len() as u64,
                block_size: bs,
            });
        }
        if base_offset % bs as u64 != 0 {
            return Err(Error::Misaligned {
                value: base_offset,
                block_size: bs,
            });
        }
        Ok(Self {
            arena: Rc::new(RefCell::new(Arena {
                source,
                block_size: bs,
                base: base_offset,
                data,
                blocks_per_fetch: 1,
                fetches: 0,
            })),
            relative_offset: 0,
            record_order: RecordOrder::NATIVE,
        })
    }
}

impl<S> BlockBuffer<S> {
    /// Set the byte order used by the typed accessors of this view and of
    /// views derived from it.
    pub fn with_record_order(mut self, order: RecordOrder) -> Self {
        self.record_order = order;
        self
    }

    /// Maximum number of blocks per device command when extending. Shared
    /// by every view of the arena. Zero is treated as one.
    pub fn with_blocks_per_fetch(self, blocks: u16) -> Self {
        self.arena.borrow_mut().blocks_per_fetch = blocks.max(1);
        self
    }

    /// A new view `extra` bytes further in, sharing the same arena.
    pub fn derive_view(&self, extra: usize) -> Result<Self> {
        let relative_offset = self
            .relative_offset
            .checked_add(extra)
            .ok_or_else(|| Error::bounds(self.relative_offset, extra))?;
        Ok(Self {
            arena: Rc::clone(&self.arena),
            relative_offset,
            record_order: self.record_order,
        })
    }

    /// Move this view `delta` bytes forward.
    pub fn advance(&mut self, delta: usize) -> Result<()> {
        self.relative_offset = self
            .relative_offset
            .checked_add(delta)
            .ok_or_else(|| Error::bounds(self.relative_offset, delta))?;
        Ok(())
    }

    /// Offset of this view from the arena start.
    pub fn relative_offset(&self) -> usize {
        self.relative_offset
    }

    /// Device byte offset of the arena start.
    pub fn absolute_offset(&self) -> u64 {
        self.arena.borrow().base
    }

    /// Bytes fetched so far; always a whole number of blocks.
    pub fn materialized_len(&self) -> usize {
        self.arena.borrow().data.len()
    }

    /// Device commands issued on behalf of this arena, across all views.
    pub fn fetch_count(&self) -> u64 {
        self.arena.borrow().fetches
    }

    /// Byte order used by this view's typed accessors.
    pub fn record_order(&self) -> RecordOrder {
        self.record_order
    }
}

impl<S: BlockSource> BlockBuffer<S> {
    /// Copy of `length` bytes at `offset` from this view, fetching missing
    /// blocks first.
    pub fn read_bytes(&self, offset: usize, length: usize) -> Result<Vec<u8>> {
        self.with_bytes(offset, length, <[u8]>::to_vec)
    }

    /// Fixed-size array at `offset`.
    pub(crate) fn array_at<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        self.with_bytes(offset, N, |bytes| {
            let mut out = [0u8; N];
            out.copy_from_slice(bytes);
            out
        })
    }

    /// Run `f` over `length` bytes at `offset`. `f` must not touch the
    /// buffer.
    pub(crate) fn with_bytes<R>(
        &self,
        offset: usize,
        length: usize,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<R> {
        let start = self
            .relative_offset
            .checked_add(offset)
            .ok_or_else(|| Error::bounds(offset, length))?;
        let stop = start
            .checked_add(length)
            .ok_or_else(|| Error::bounds(offset, length))?;

        if length > 0 {
            self.arena.borrow_mut().materialize_through(stop - 1)?;
        }

        let arena = self.arena.borrow();
        let bytes = arena.data.get(start..stop).unwrap_or_default();
        Ok(f(bytes))
    }
}

impl<S> Clone for BlockBuffer<S> {
    fn clone(&self) -> Self {
        Self {
            arena: Rc::clone(&self.arena),
            relative_offset: self.relative_offset,
            record_order: self.record_order,
        }
    }
}

impl<S> std::fmt::Debug for BlockBuffer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let arena = self.arena.borrow();
        f.debug_struct("BlockBuffer")
            .field("relative_offset", &self.relative_offset)
            .field("absolute_offset", &arena.base)
            .field("materialized_len", &arena.data.len())
            .field("record_order", &self.record_order)
            .finish()
    }
}

fn checked_block_size<S: BlockSource>(source: &S) -> Result<usize> {
    match source.block_size() {
        0 => Err(Error::InvalidBlockSize(0)),
        bs => Ok(bs),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::channel::tests::FakeTransport;
    use crate::options::Options;
    use std::cell::Cell;

    /// In-memory source: every block is filled with `fill`, and commands
    /// are logged. Fails every command once `fail_from` commands were served.
    pub(crate) struct MemorySource {
        pub block_size: usize,
        pub fill: u8,
        pub log: Rc<RefCell<Vec<(u32, u16)>>>,
        pub fail_from: Rc<Cell<Option<usize>>>,
    }

    impl MemorySource {
        pub(crate) fn new(fill: u8) -> Self {
            Self {
                block_size: 512,
                fill,
                log: Rc::new(RefCell::new(Vec::new())),
                fail_from: Rc::new(Cell::new(None)),
            }
        }
    }

    impl BlockSource for MemorySource {
        fn block_size(&self) -> usize {
            self.block_size
        }

        fn read_blocks(&mut self, lba: u32, block_count: u16) -> Result<Vec<u8>> {
            let served = self.log.borrow().len();
            self.log.borrow_mut().push((lba, block_count));
            if matches!(self.fail_from.get(), Some(limit) if served >= limit) {
                return Err(Error::CommandRejected {
                    lba,
                    status: 0x02,
                    host_status: 0,
                    driver_status: 0,
                    sense_key: 0x03,
                });
            }
            Ok(vec![self.fill; block_count as usize * self.block_size])
        }
    }

    fn seeded_buffer() -> (BlockBuffer<MemorySource>, Rc<RefCell<Vec<(u32, u16)>>>) {
        let source = MemorySource::new(0xAA);
        let log = source.log.clone();
        let mut data = vec![0u8; 512];
        data[510] = 0xFF;
        data[511] = 0x00;
        let buffer = BlockBuffer::from_parts(source, data, 0)
            .unwrap()
            .with_record_order(RecordOrder::Little);
        (buffer, log)
    }

    #[test]
    fn test_read_within_materialized() {
        let (buffer, log) = seeded_buffer();
        assert_eq!(buffer.uint16_at(510).unwrap(), 255);
        assert_eq!(buffer.fetch_count(), 0);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_read_spanning_extension() {
        let (buffer, log) = seeded_buffer();
        let bytes = buffer.read_bytes(508, 8).unwrap();
        assert_eq!(bytes, vec![0x00, 0x00, 0xFF, 0x00, 0xAA, 0xAA, 0xAA, 0xAA]);
        assert_eq!(buffer.materialized_len(), 1024);
        assert_eq!(*log.borrow(), vec![(1, 1)]);
    }

    #[test]
    fn test_block_boundary() {
        let (buffer, log) = seeded_buffer();

        // last materialized byte
        buffer.read_bytes(511, 1).unwrap();
        assert_eq!(buffer.materialized_len(), 512);

        // first byte of the next block
        buffer.read_bytes(512, 1).unwrap();
        assert_eq!(buffer.materialized_len(), 1024);

        // ending exactly on the last byte of block 3
        buffer.read_bytes(0, 2048).unwrap();
        assert_eq!(buffer.materialized_len(), 2048);

        // ending exactly on the first byte of block 4
        buffer.read_bytes(2000, 49).unwrap();
        assert_eq!(buffer.materialized_len(), 2560);

        assert_eq!(*log.borrow(), vec![(1, 1), (2, 1), (3, 1), (4, 1)]);
    }

    #[test]
    fn test_materialized_len_invariant() {
        let buffer = BlockBuffer::new(MemorySource::new(1)).unwrap();
        assert_eq!(buffer.materialized_len(), 0);
        for (offset, length) in [(0usize, 1usize), (3, 700), (1500, 1), (1535, 2), (4000, 96)] {
            buffer.read_bytes(offset, length).unwrap();
            let len = buffer.materialized_len();
            assert_eq!(len % 512, 0);
            assert!(len > offset + length - 1);
        }
    }

    #[test]
    fn test_prior_bytes_stable() {
        let source = MemorySource::new(0);
        let fill = Rc::new(Cell::new(0u8));
        // vary the content per command through a wrapper
        struct Counting {
            inner: MemorySource,
            fill: Rc<Cell<u8>>,
        }
        impl BlockSource for Counting {
            fn block_size(&self) -> usize {
                self.inner.block_size()
            }
            fn read_blocks(&mut self, lba: u32, count: u16) -> Result<Vec<u8>> {
                self.fill.set(self.fill.get() + 1);
                self.inner.fill = self.fill.get();
                self.inner.read_blocks(lba, count)
            }
        }

        let buffer = BlockBuffer::new(Counting {
            inner: source,
            fill: fill.clone(),
        })
        .unwrap();

        let first = buffer.read_bytes(100, 20).unwrap();
        let second = buffer.read_bytes(500, 40).unwrap();
        buffer.read_bytes(3000, 10).unwrap();

        assert_eq!(buffer.read_bytes(100, 20).unwrap(), first);
        assert_eq!(buffer.read_bytes(500, 40).unwrap(), second);
        assert!(first.iter().all(|&b| b == 1));
        assert_eq!(&second[..12], &[1u8; 12]);
        assert_eq!(&second[12..], &[2u8; 28]);
    }

    #[test]
    fn test_derived_view_shares_fetches() {
        let source = MemorySource::new(7);
        let log = source.log.clone();
        let parent = BlockBuffer::new(source).unwrap();

        parent.read_bytes(0, 1024).unwrap();
        assert_eq!(parent.fetch_count(), 2);

        let child = parent.derive_view(600).unwrap();
        assert_eq!(child.relative_offset(), 600);
        assert_eq!(child.read_bytes(0, 424).unwrap(), vec![7; 424]);
        assert_eq!(child.fetch_count(), 2);

        // the child extends, the parent sees it
        child.read_bytes(424, 1).unwrap();
        assert_eq!(parent.materialized_len(), 1536);
        parent.read_bytes(1024, 512).unwrap();
        assert_eq!(parent.fetch_count(), 3);
        assert_eq!(log.borrow().len(), 3);
    }

    #[test]
    fn test_advance() {
        let (mut buffer, _) = seeded_buffer();
        buffer.advance(500).unwrap();
        buffer.advance(10).unwrap();
        assert_eq!(buffer.relative_offset(), 510);
        assert_eq!(buffer.uint16_at(0).unwrap(), 255);
        assert!(matches!(buffer.advance(usize::MAX), Err(Error::Bounds { .. })));
        assert_eq!(buffer.relative_offset(), 510);
    }

    #[test]
    fn test_anchor_at_unaligned_offset() {
        let source = MemorySource::new(3);
        let log = source.log.clone();
        let buffer = BlockBuffer::at(source, 1000).unwrap();
        assert_eq!(buffer.absolute_offset(), 512);
        assert_eq!(buffer.relative_offset(), 488);

        buffer.read_bytes(0, 24).unwrap();
        assert_eq!(*log.borrow(), vec![(1, 1)]);
        buffer.read_bytes(24, 1).unwrap();
        assert_eq!(*log.borrow(), vec![(1, 1), (2, 1)]);
    }

    #[test]
    fn test_blocks_per_fetch() {
        let source = MemorySource::new(9);
        let log = source.log.clone();
        let buffer = BlockBuffer::new(source).unwrap().with_blocks_per_fetch(4);
        buffer.read_bytes(0, 6 * 512).unwrap();
        assert_eq!(buffer.materialized_len(), 3072);
        assert_eq!(*log.borrow(), vec![(0, 4), (4, 2)]);
    }

    #[test]
    fn test_failed_extension_leaves_buffer_unchanged() {
        let source = MemorySource::new(5);
        let fail_from = source.fail_from.clone();
        let log = source.log.clone();
        let mut data = vec![0u8; 512];
        data[0] = 1;
        let buffer = BlockBuffer::from_parts(source, data, 0).unwrap();

        // second of three commands fails
        fail_from.set(Some(1));
        let err = buffer.read_bytes(0, 4 * 512).unwrap_err();
        assert!(err.is_io());
        assert_eq!(buffer.materialized_len(), 512);
        assert_eq!(log.borrow().len(), 2);

        fail_from.set(None);
        let bytes = buffer.read_bytes(0, 4 * 512).unwrap();
        assert_eq!(bytes[0], 1);
        assert!(bytes[512..].iter().all(|&b| b == 5));
        assert_eq!(*log.borrow().last().unwrap(), (3, 1));
    }

    #[test]
    fn test_short_transfer_through_channel() {
        let mut fake = FakeTransport::new(512);
        fake.short_after = Some(0);
        let channel = DeviceChannel::with_transport(Box::new(fake), Options::default()).unwrap();
        let buffer = BlockBuffer::from_parts(channel, vec![0u8; 512], 0).unwrap();

        let err = buffer.read_bytes(508, 8).unwrap_err();
        assert!(matches!(err, Error::ShortTransfer { lba: 1, .. }));
        assert_eq!(buffer.materialized_len(), 512);
    }

    #[test]
    fn test_channel_lba_mapping() {
        let fake = FakeTransport::new(512);
        let commands = fake.commands.clone();
        let channel = DeviceChannel::with_transport(Box::new(fake), Options::default()).unwrap();
        let buffer = BlockBuffer::at(channel, 40 * 512).unwrap();

        // block n is filled with n
        assert_eq!(buffer.uint8_at(0).unwrap(), 40);
        assert_eq!(buffer.uint8_at(513).unwrap(), 41);
        let lbas: Vec<u32> = commands
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.logical_block_address)
            .collect();
        assert_eq!(lbas, vec![40, 41]);
    }

    #[test]
    fn test_bounds() {
        let (buffer, log) = seeded_buffer();
        assert!(matches!(
            buffer.read_bytes(usize::MAX, 2),
            Err(Error::Bounds { .. })
        ));
        let view = buffer.derive_view(10).unwrap();
        assert!(matches!(
            view.derive_view(usize::MAX),
            Err(Error::Bounds { .. })
        ));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_lba_past_32_bits() {
        let buffer = BlockBuffer::at(MemorySource::new(0), 512 * u32::MAX as u64).unwrap();
        assert!(buffer.read_bytes(0, 512).is_ok());
        assert!(matches!(
            buffer.read_bytes(512, 1),
            Err(Error::Bounds { .. })
        ));
    }

    #[test]
    fn test_oversized_extension_is_rejected() {
        let mut source = MemorySource::new(0);
        source.block_size = 1 << (usize::BITS - 1);
        let log = source.log.clone();
        let buffer = BlockBuffer::new(source).unwrap();

        let err = buffer.read_bytes(0, 1).unwrap_err();
        assert!(matches!(err, Error::Bounds { .. }));
        assert_eq!(buffer.materialized_len(), 0);
        assert_eq!(buffer.fetch_count(), 0);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_zero_length_read() {
        let buffer = BlockBuffer::new(MemorySource::new(0)).unwrap();
        assert!(buffer.read_bytes(4096, 0).unwrap().is_empty());
        assert_eq!(buffer.fetch_count(), 0);
    }

    #[test]
    fn test_misaligned_seed() {
        let err = BlockBuffer::from_parts(MemorySource::new(0), vec![0; 100], 0).unwrap_err();
        assert!(matches!(
            err,
            Error::Misaligned {
                value: 100,
                block_size: 512
            }
        ));
        let err = BlockBuffer::from_parts(MemorySource::new(0), Vec::new(), 7).unwrap_err();
        assert!(matches!(err, Error::Misaligned { value: 7, .. }));
    }

    #[test]
    fn test_borrowed_channel_source() {
        let fake = FakeTransport::new(512);
        let mut channel =
            DeviceChannel::with_transport(Box::new(fake), Options::default()).unwrap();
        {
            let buffer = BlockBuffer::new(&mut channel).unwrap();
            assert_eq!(buffer.uint8_at(1024).unwrap(), 2);
        }
        channel.close();
        let buffer = BlockBuffer::new(&mut channel).unwrap();
        assert!(matches!(buffer.uint8_at(0), Err(Error::Closed)));
    }
}
