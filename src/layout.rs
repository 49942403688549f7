use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::error::Error;
use crate::flash::Granularity;
use crate::Config;

/// Length of the block header preceding the first page.
pub(crate) const BLOCK_HEADER: usize = 8;

/// Length of the page header preceding the record area.
pub(crate) const PAGE_HEADER: usize = 8;

/// Header magic of every formatted block, `"NVRM"` little-endian.
pub(crate) const MAGIC: u32 = u32::from_le_bytes(*b"NVRM");

/// Value of any erased word.
pub(crate) const ERASED: u32 = !0;

/// Block header at offset 0 of every erasable block.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub(crate) struct BlockHeader {
    pub magic: U32<LittleEndian>,
    /// How many times this block has been erased. Written after the magic,
    /// so an all-ones generation marks an interrupted format.
    pub generation: U32<LittleEndian>,
}

/// Page header at the base of every page slot.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub(crate) struct PageHeader {
    /// Caller-supplied identifier. All-ones while the slot is empty, zero
    /// once the page has been shredded for reclamation.
    pub id: U32<LittleEndian>,
    /// Allocation order of the page within its id, wraps at 16 bits.
    pub sequence: U16<LittleEndian>,
    /// Fixed record size, or 0 for variable records prefixed by a length
    /// word.
    pub record_size: U16<LittleEndian>,
}

/// Block states derivable from the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// All bits one; the block can be formatted without an erase.
    Empty,
    /// Formatted, carries pages.
    Valid,
    /// Scheduled for erase (magic shredded to zero).
    Erasable,
    /// Magic present but the generation never landed.
    HalfInitialized,
    /// Anything else, e.g. an interrupted erase.
    Corrupted,
}

/// Page states derivable from the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Empty,
    Valid,
    Erasable,
}

/// Flash area measurements shared by every scan.
///
/// Everything is derived once at mount time from the driver's block size and
/// granularity plus the `Config`; the wire layout itself never changes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Geometry {
    /// First byte of the managed area, block aligned.
    pub base: usize,
    /// One past the last managed byte, block aligned.
    pub end: usize,
    pub block_size: usize,
    pub pages_per_block: usize,
    pub page_size: usize,
    /// Unused tail of each block, used to stash the generation across an
    /// erase on double-write media.
    pub block_padding: usize,
    pub granularity: Granularity,
}

impl Geometry {
    pub fn compute(
        flash_len: usize,
        block_size: usize,
        granularity: Granularity,
        config: &Config,
    ) -> Result<Geometry, Error> {
        if block_size == 0 || flash_len < block_size {
            return Err(Error::Config("flash area smaller than one block"));
        }

        let align = granularity.align();
        let base = (config.reserved_head + block_size - 1) / block_size * block_size;
        let end = flash_len.saturating_sub(config.reserved_tail) / block_size * block_size;

        if base >= end {
            return Err(Error::Config("reserved areas leave no usable blocks"));
        }

        let pages_per_block = match config.pages_per_block {
            Some(0) | None => (block_size / 1024).max(1),
            Some(n) => n,
        };

        let page_size = ((block_size - BLOCK_HEADER) / pages_per_block) & !(align - 1);
        if page_size <= PAGE_HEADER + align {
            return Err(Error::Config("pages too small to hold records"));
        }

        let block_padding = block_size - BLOCK_HEADER - pages_per_block * page_size;

        Ok(Geometry {
            base,
            end,
            block_size,
            pages_per_block,
            page_size,
            block_padding,
            granularity,
        })
    }

    pub fn align(&self) -> usize {
        self.granularity.align()
    }

    pub fn align_up(&self, n: usize) -> usize {
        let a = self.align();
        (n + a - 1) & !(a - 1)
    }

    pub fn page_payload(&self) -> usize {
        self.page_size - PAGE_HEADER
    }

    /// Distance from one variable record's first word to the next: the
    /// record body plus the following length word, padded to the program
    /// alignment.
    pub fn var_stride(&self, total_len: usize) -> usize {
        self.align_up(total_len + 4)
    }

    pub fn double_write(&self) -> bool {
        self.granularity == Granularity::Double
    }
}

/// `a < b` under 16-bit wraparound sequence arithmetic.
pub(crate) fn seq_lt(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) < 0
}
