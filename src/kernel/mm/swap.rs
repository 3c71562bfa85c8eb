// src/kernel/mm/swap.rs
//! Swap area: a fixed bitmap of slots backed by a block device.
//!
//! Each slot holds exactly one evicted anonymous page, laid out as
//! `SECTORS_PER_PAGE` contiguous sectors. All operations are serialized by
//! the caller holding `VmSystem`'s swap lock (see `kernel::mm::system`); this
//! type itself performs no internal locking.

use core::fmt;

use crate::constants::{PAGE_SIZE, SECTORS_PER_PAGE};
use crate::kernel::mm::collaborators::SwapDevice;

/// Index of a reserved swap slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SwapSlot(u64);

impl SwapSlot {
    #[must_use]
    pub const fn index(self) -> u64 {
        self.0
    }
}

/// Errors a swap-area operation can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapError {
    /// No free slot remains in the bitmap.
    Exhausted,
    /// The block device rejected the read or write.
    DeviceError,
    /// The requested slot was never reserved, or was already freed.
    NotReserved,
}

impl fmt::Display for SwapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "swap area exhausted"),
            Self::DeviceError => write!(f, "swap device I/O error"),
            Self::NotReserved => write!(f, "swap slot not reserved"),
        }
    }
}

/// A fixed-size bitmap of swap slots over a block device.
///
/// `true` in `reserved` means the slot is in use; this is the opposite sense
/// of the bitmap convention used by the system this core is modeled on,
/// chosen so `reserved.count_ones()` reads directly as the invariant in
/// the spec ("`swap_bitmap.reserved` equals the cardinality of swapped
/// descriptors") without an extra inversion at every call site.
pub struct SwapArea<D: SwapDevice> {
    device: D,
    reserved: alloc::vec::Vec<bool>,
    slot_count: usize,
}

impl<D: SwapDevice> SwapArea<D> {
    /// Build a swap area over `device`, with slot capacity derived from the
    /// device's total block count.
    pub fn new(device: D) -> Self {
        let sector_count = device.total_blocks() as usize;
        let slot_count = sector_count / SECTORS_PER_PAGE;
        Self {
            device,
            reserved: alloc::vec![false; slot_count],
            slot_count,
        }
    }

    /// Number of slots reserved right now.
    #[must_use]
    pub fn reserved_count(&self) -> usize {
        self.reserved.iter().filter(|&&b| b).count()
    }

    /// Total slot capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slot_count
    }

    /// Write `page` (exactly `PAGE_SIZE` bytes) out to a freshly reserved
    /// slot, returning that slot's index.
    pub fn swap_out(&mut self, page: &[u8; PAGE_SIZE]) -> Result<SwapSlot, SwapError> {
        let slot = self
            .reserved
            .iter()
            .position(|&used| !used)
            .ok_or(SwapError::Exhausted)?;
        self.reserved[slot] = true;

        if let Err(err) = self.write_slot(slot, page) {
            self.reserved[slot] = false;
            return Err(err);
        }

        Ok(SwapSlot(slot as u64))
    }

    /// Read slot contents back into `page` and free the slot.
    pub fn swap_in(&mut self, slot: SwapSlot, page: &mut [u8; PAGE_SIZE]) -> Result<(), SwapError> {
        let idx = slot.0 as usize;
        if idx >= self.slot_count || !self.reserved[idx] {
            return Err(SwapError::NotReserved);
        }

        self.read_slot(idx, page)?;
        self.reserved[idx] = false;
        Ok(())
    }

    /// Release a slot without reading it back (process teardown).
    pub fn swap_free(&mut self, slot: SwapSlot) -> Result<(), SwapError> {
        let idx = slot.0 as usize;
        if idx >= self.slot_count || !self.reserved[idx] {
            return Err(SwapError::NotReserved);
        }
        self.reserved[idx] = false;
        Ok(())
    }

    fn write_slot(&mut self, slot: usize, page: &[u8; PAGE_SIZE]) -> Result<(), SwapError> {
        let block_size = self.device.block_size().max(1);
        let base_sector = (slot * SECTORS_PER_PAGE) as u64;
        for (i, chunk) in page.chunks(block_size).enumerate() {
            self.device
                .write_block(base_sector + i as u64, chunk)
                .map_err(|_| SwapError::DeviceError)?;
        }
        Ok(())
    }

    fn read_slot(&mut self, slot: usize, page: &mut [u8; PAGE_SIZE]) -> Result<(), SwapError> {
        let block_size = self.device.block_size().max(1);
        let base_sector = (slot * SECTORS_PER_PAGE) as u64;
        for (i, chunk) in page.chunks_mut(block_size).enumerate() {
            self.device
                .read_block(base_sector + i as u64, chunk)
                .map_err(|_| SwapError::DeviceError)?;
        }
        Ok(())
    }
}

#[cfg(all(test, feature = "std-tests"))]
mod tests {
    use super::*;
    use crate::kernel::core::result::KernelResult;
    use crate::kernel::core::traits::{BlockDevice, Device};

    struct MemoryBlockDevice {
        blocks: alloc::vec::Vec<[u8; 512]>,
    }

    impl MemoryBlockDevice {
        fn new(total_blocks: usize) -> Self {
            Self {
                blocks: alloc::vec![[0u8; 512]; total_blocks],
            }
        }
    }

    impl Device for MemoryBlockDevice {
        fn name(&self) -> &str {
            "mem-swap"
        }
        fn init(&mut self) -> KernelResult<()> {
            Ok(())
        }
        fn reset(&mut self) -> KernelResult<()> {
            Ok(())
        }
    }

    impl BlockDevice for MemoryBlockDevice {
        fn block_size(&self) -> usize {
            512
        }

        fn read_block(&self, block: u64, buf: &mut [u8]) -> KernelResult<usize> {
            let data = &self.blocks[block as usize];
            let len = buf.len().min(data.len());
            buf[..len].copy_from_slice(&data[..len]);
            Ok(len)
        }

        fn write_block(&mut self, block: u64, buf: &[u8]) -> KernelResult<usize> {
            let data = &mut self.blocks[block as usize];
            let len = buf.len().min(data.len());
            data[..len].copy_from_slice(&buf[..len]);
            Ok(len)
        }

        fn total_blocks(&self) -> u64 {
            self.blocks.len() as u64
        }
    }

    fn sample_page(fill: u8) -> [u8; PAGE_SIZE] {
        [fill; PAGE_SIZE]
    }

    #[test]
    fn round_trip_restores_contents() {
        let mut area = SwapArea::new(MemoryBlockDevice::new(256));
        let page = sample_page(0xAB);

        let slot = area.swap_out(&page).expect("swap_out");
        let mut restored = [0u8; PAGE_SIZE];
        area.swap_in(slot, &mut restored).expect("swap_in");

        assert_eq!(page, restored);
    }

    #[test]
    fn reserved_count_tracks_bitmap() {
        let mut area = SwapArea::new(MemoryBlockDevice::new(256));
        assert_eq!(area.reserved_count(), 0);

        let slot = area.swap_out(&sample_page(1)).unwrap();
        assert_eq!(area.reserved_count(), 1);

        area.swap_free(slot).unwrap();
        assert_eq!(area.reserved_count(), 0);
    }

    #[test]
    fn exhaustion_reports_error() {
        let capacity_blocks = SECTORS_PER_PAGE; // exactly one slot
        let mut area = SwapArea::new(MemoryBlockDevice::new(capacity_blocks));

        area.swap_out(&sample_page(1)).expect("first slot succeeds");
        let err = area.swap_out(&sample_page(2));
        assert_eq!(err, Err(SwapError::Exhausted));
    }

    #[test]
    fn swap_in_unknown_slot_is_rejected() {
        let mut area = SwapArea::new(MemoryBlockDevice::new(256));
        let mut buf = [0u8; PAGE_SIZE];
        let result = area.swap_in(SwapSlot(0), &mut buf);
        assert_eq!(result, Err(SwapError::NotReserved));
    }
}
