//! Log-structured key/value record store for NOR-like flash.
//!
//! The medium is divided into erasable blocks, each carrying a header and a
//! fixed number of pages. Pages are tagged with a caller-chosen 32-bit id
//! and a wrapping sequence number, and store append-only records whose first
//! word doubles as the lookup key. Writes only ever clear bits, the key (or
//! length) word of every structure is written last, and reclamation happens
//! by shredding discriminator words to zero and erasing whole blocks in the
//! background. Any power cut therefore leaves either a fully valid record,
//! an untouched slot, or a slot that reads as deleted.
//!
//! The store is single-writer and built for a cooperative runtime: the
//! garbage collector is an explicit state machine resumed one suspension
//! point at a time via [`Store::collector_step`], with [`Store::maintenance`]
//! driving it to quiescence for callers without a scheduler.

mod block;
mod error;
mod flash;
mod gc;
mod layout;
mod notify;
mod page;
mod readpath;
mod settings;
mod storage;
mod writepath;

use std::fmt;

pub use error::Error;
pub use flash::{Flash, Granularity, MemFlash};
pub use gc::{collector_cleanup, collector_discard_oldest, collector_relocate};
pub use layout::{BlockState, PageState};
pub use notify::VersionTracker;
pub use settings::{SettingSpec, Settings};
pub use storage::{
    FixedKeyStorage, FixedStorage, FixedUniqueKeyStorage, Record, VariableKeyStorage,
    VariableStorage, VariableUniqueKeyStorage,
};

use gc::{CollectorEntry, GcState};
use layout::Geometry;
use notify::Notifiers;

/// Identifier shared by all pages of one logical stream of records.
///
/// Ids are conventionally four ASCII bytes (`PageId::from_bytes(*b"CONF")`).
/// All-ones and zero are reserved for the empty and shredded page states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(pub u32);

impl PageId {
    pub const fn from_bytes(bytes: [u8; 4]) -> PageId {
        PageId(u32::from_le_bytes(bytes))
    }
}

impl From<u32> for PageId {
    fn from(id: u32) -> PageId {
        PageId(id)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0.to_le_bytes();
        if b.iter().all(|c| c.is_ascii_graphic()) {
            for c in b {
                write!(f, "{}", c as char)?;
            }
            Ok(())
        } else {
            write!(f, "{:#010x}", self.0)
        }
    }
}

/// Opaque handle of one erasable block: its offset into the flash mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block(pub(crate) usize);

/// Opaque handle of one page: the offset of its header into the mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Page(pub(crate) usize);

/// Handle of one stored record: the address of its first word plus its
/// total length. Resolve to bytes with [`Store::bytes`] / [`Store::payload`].
/// The bytes stay valid only until the record is shredded or its page
/// erased, so do not hold the resolved slice across mutating calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rec {
    pub(crate) addr: usize,
    pub(crate) len: usize,
}

/// Store configuration. The wire layout is fixed; this only tunes how the
/// driver's geometry is carved up and when the collector worries.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pages carved out of every block. Defaults to `block_size / 1024`.
    pub pages_per_block: Option<usize>,
    /// Low-water mark of erased pages below which destructive collectors
    /// may run.
    pub pages_kept_free: usize,
    /// Bytes at the start of the flash range left for other uses.
    pub reserved_head: usize,
    /// Bytes at the end of the flash range left for other uses.
    pub reserved_tail: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            pages_per_block: None,
            pages_kept_free: 4,
            reserved_head: 0,
            reserved_tail: 0,
        }
    }
}

/// Flags for [`Store::mount`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InitFlags {
    /// Erase the whole managed area before scanning.
    pub reset: bool,
    /// Leave corrupted blocks alone instead of scheduling them for erase.
    /// Useful for data migration; reported through [`Store::healthy`].
    pub ignore_corrupted: bool,
}

/// The record store over one flash medium.
///
/// `Store` owns the driver and every piece of bookkeeping: the managed block
/// range, the free-page counter (a soft shadow of the physical state,
/// rebuilt by every mount), the collector registrations and the notifier
/// list. All mutation of the medium goes through it.
pub struct Store<F: Flash> {
    pub(crate) flash: F,
    pub(crate) geo: Geometry,
    pub(crate) config: Config,
    /// Lowest block carrying data; page scans start here.
    pub(crate) first_used: usize,
    pub(crate) pages_available: usize,
    pub(crate) healthy: bool,
    pub(crate) collecting: bool,
    pub(crate) blocks_to_erase: bool,
    pub(crate) gc: GcState,
    pub(crate) gc_collected: usize,
    pub(crate) collectors: Vec<CollectorEntry<F>>,
    pub(crate) notifiers: Notifiers,
}

impl<F: Flash> Store<F> {
    /// Scan the managed area, heal whatever an unexpected reset left
    /// behind, and return the store.
    ///
    /// After this returns, every block is either empty, valid, or scheduled
    /// for erase. [`Store::healthy`] is `false` iff corrupted blocks were
    /// tolerated because of [`InitFlags::ignore_corrupted`].
    pub fn mount(flash: F, config: Config, flags: InitFlags) -> Result<Store<F>, Error> {
        let geo = Geometry::compute(
            flash.as_bytes().len(),
            flash.block_size(),
            flash.granularity(),
            &config,
        )?;

        let mut store = Store {
            flash,
            geo,
            config,
            first_used: geo.end,
            pages_available: 0,
            healthy: true,
            collecting: false,
            blocks_to_erase: false,
            gc: GcState::Idle,
            gc_collected: 0,
            collectors: Vec::new(),
            notifiers: Notifiers::default(),
        };

        store.initialize(flags);

        Ok(store)
    }

    /// Give the flash driver back, e.g. to remount after a simulated power
    /// cycle.
    pub fn into_inner(self) -> F {
        self.flash
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// `false` iff corrupted blocks were encountered and tolerated during
    /// the mount scan.
    pub fn healthy(&self) -> bool {
        self.healthy
    }

    /// Number of pages currently available for allocation.
    pub fn pages_available(&self) -> usize {
        self.pages_available
    }

    /// Whether the collector task is scheduled or running.
    pub fn collecting(&self) -> bool {
        self.collecting
    }

    /// All blocks of the managed area, in address order.
    pub fn blocks(&self) -> impl Iterator<Item = Block> {
        self.blocks_from(self.geo.base)
    }

    /// All blocks from the first one carrying data, in address order.
    pub fn used_blocks(&self) -> impl Iterator<Item = Block> {
        self.blocks_from(self.first_used)
    }

    pub(crate) fn blocks_from(&self, start: usize) -> impl Iterator<Item = Block> {
        let (end, step) = (self.geo.end, self.geo.block_size);
        (start..end).step_by(step).map(Block)
    }

    /// Little-endian word at `offset` of the mapping.
    pub(crate) fn word(&self, offset: usize) -> u32 {
        let bytes = self.flash.as_bytes();
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    pub(crate) fn dword(&self, offset: usize) -> u64 {
        let bytes = self.flash.as_bytes();
        u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap())
    }

    pub(crate) fn all_ones(&self, offset: usize, len: usize) -> bool {
        self.flash.as_bytes()[offset..offset + len]
            .iter()
            .all(|b| *b == 0xFF)
    }
}
