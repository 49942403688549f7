use crate::layout::{ERASED, MAGIC};
use crate::{Block, Flash, Page, PageId, Store};

pub(crate) type CollectorFn<F> = Box<dyn FnMut(&mut Store<F>, PageId) -> Option<Page>>;

pub(crate) struct CollectorEntry<F: Flash> {
    pub key: PageId,
    pub level: u32,
    pub collect: CollectorFn<F>,
}

/// The collector task as an explicit state machine. Each variant is one
/// suspension point of the cooperative task; `collector_step` performs the
/// work up to the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GcState {
    Idle,
    /// Run the non-destructive pass.
    Start,
    /// Decide: erase, finish, or go destructive.
    Loop,
    /// One destructive pass after a yield.
    Destructive,
    /// Erase sweep, one block per resume, continuing at `next`.
    Erase { next: usize },
}

impl<F: Flash> Store<F> {
    /// Registers a collector with the specified key (usually a page id) at
    /// the specified level. Level 0 collectors must not discard data and
    /// run on every pass; higher levels only run when the store is below
    /// its free-page low-water mark. Re-registering the same key and level
    /// replaces the callback.
    pub fn register_collector<C>(&mut self, key: PageId, level: u32, collect: C)
    where
        C: FnMut(&mut Store<F>, PageId) -> Option<Page> + 'static,
    {
        self.insert_collector(CollectorEntry {
            key,
            level,
            collect: Box::new(collect),
        });
    }

    fn insert_collector(&mut self, entry: CollectorEntry<F>) {
        let mut at = self.collectors.len();
        for i in 0..self.collectors.len() {
            if self.collectors[i].key == entry.key && self.collectors[i].level == entry.level {
                // replace the existing registration
                self.collectors[i].collect = entry.collect;
                return;
            }
            if self.collectors[i].level > entry.level {
                at = i;
                break;
            }
        }
        self.collectors.insert(at, entry);
    }

    /// Schedules the collector task unless it is already running. The
    /// embedding runtime resumes it via [`Store::collector_step`];
    /// [`Store::maintenance`] drives it inline.
    pub fn run_collector(&mut self) {
        if !self.collecting {
            self.collecting = true;
            self.gc = GcState::Start;
            self.gc_collected = 0;
            log::debug!("scheduling collector task");
        }
    }

    /// Resumes the collector by one suspension point. Returns `true` while
    /// more work is pending.
    pub fn collector_step(&mut self) -> bool {
        match self.gc {
            GcState::Idle => false,
            GcState::Start => {
                log::debug!("collection starting with {} pages free", self.pages_available);
                // always run a non-destructive collection first
                self.collect(false);
                self.gc = GcState::Loop;
                true
            }
            GcState::Loop => {
                if self.blocks_to_erase {
                    self.gc = GcState::Erase {
                        next: self.geo.base,
                    };
                } else if self.pages_available >= self.config.pages_kept_free {
                    log::debug!("collection finished with {} pages free", self.pages_available);
                    self.finish_collection();
                } else {
                    self.gc = GcState::Destructive;
                }
                self.gc != GcState::Idle
            }
            GcState::Destructive => {
                if self.collect(true) == 0 && !self.blocks_to_erase {
                    log::debug!(
                        "collection finished with only {} pages free",
                        self.pages_available
                    );
                    self.finish_collection();
                } else {
                    self.gc = GcState::Loop;
                }
                self.gc != GcState::Idle
            }
            GcState::Erase { next } => {
                self.erase_step(next);
                true
            }
        }
    }

    /// Runs the collector to quiescence and returns the number of pages
    /// collected. The step budget keeps a medium that fails every erase
    /// from spinning forever; the collector stays scheduled in that case.
    pub fn maintenance(&mut self) -> usize {
        log::debug!("performing maintenance");
        self.run_collector();

        let blocks = (self.geo.end - self.geo.base) / self.geo.block_size;
        let mut budget = 64 * blocks * self.geo.pages_per_block + 1024;
        while self.collector_step() {
            budget -= 1;
            if budget == 0 {
                log::error!("collector failed to reach quiescence, giving up");
                break;
            }
        }

        self.gc_collected
    }

    fn finish_collection(&mut self) {
        self.collecting = false;
        self.gc = GcState::Idle;
    }

    /// Executes collectors in level order. Level 0 collectors are drained;
    /// the first destructive collector to yield a page ends the pass.
    fn collect(&mut self, destructive: bool) -> usize {
        let mut collected = 0;
        let mut collectors = std::mem::take(&mut self.collectors);

        'outer: for entry in &mut collectors {
            if !destructive && entry.level > 0 {
                // only non-destructive collectors run on this pass
                break;
            }

            while let Some(page) = (entry.collect)(self, entry.key) {
                log::debug!(
                    "page {}-{} @ {:#x} can be erased",
                    self.page_id(page),
                    self.page_sequence(page),
                    page.0
                );
                self.erase_page(page);
                collected += 1;

                if entry.level > 0 {
                    // at most one destructive collection per pass
                    break 'outer;
                }
            }
        }

        // restore the registrations, merging any added by a callback
        let fresh = std::mem::replace(&mut self.collectors, collectors);
        for entry in fresh {
            self.insert_collector(entry);
        }

        self.gc_collected += collected;
        collected
    }

    /// Shreds a page and, once its block holds nothing but shredded pages,
    /// marks the whole block for background erasure.
    pub(crate) fn erase_page(&mut self, page: Page) {
        self.shred_page_header(page);

        let b = self.block_of(page.0);
        if self.check_pages(b).all_erasable() {
            self.mark_block_erasable(b);
        }
    }

    /// One erase-sweep resume: erase and reformat the next erasable block
    /// at or past `from`, then suspend. After a full sweep the pending flag
    /// is cleared even if some blocks failed, so a bad block cannot pin the
    /// collector in an endless retry.
    fn erase_step(&mut self, from: usize) {
        let mut off = from;
        loop {
            if off >= self.geo.end {
                self.blocks_to_erase = false;
                self.gc = GcState::Loop;
                return;
            }
            if self.word(off) == 0 {
                break;
            }
            off += self.geo.block_size;
        }

        let b = Block(off);

        // recover the pre-erase generation: from the padding stash on
        // double-write media, from the still-intact header word otherwise
        let generation = if self.geo.double_write() {
            if self.geo.block_padding >= 8 && self.word(self.padding_offset(b)) == MAGIC {
                self.word(self.padding_offset(b) + 4)
            } else {
                0
            }
        } else {
            self.word(off + 4)
        };

        log::debug!("trying to erase block @ {:#x}", off);
        if !self.flash.erase_block(off) {
            log::debug!("erase of block interrupted @ {:#x}", off);
            self.gc = GcState::Erase { next: off };
            return;
        }

        if !self.block_empty_from(b, off) {
            log::error!("block not completely erased @ {:#x}", off);
            // mark it for another erasure attempt
            self.shred_block_header(b);
        } else if generation == 0 || generation == ERASED {
            // unknown generation, leave the block empty; it will be
            // formatted as generation 1 on its next allocation
            self.pages_available += self.geo.pages_per_block;
        } else if self.format_block(b, generation.wrapping_add(1)) {
            self.pages_available += self.geo.pages_per_block;
        }
        // a failed format has already shredded the header, leaving the
        // block for a future sweep

        self.gc = GcState::Erase {
            next: off + self.geo.block_size,
        };
    }
}

/// Collector that discards the oldest page of the id outright. Destructive,
/// register at level 1 or above.
pub fn collector_discard_oldest<F: Flash>(store: &mut Store<F>, id: PageId) -> Option<Page> {
    store.page_oldest_first(id)
}

/// Collector that moves records from the oldest pages into the newest when
/// they amount to at most half a page, freeing a page without wholesale
/// copies. Non-destructive, register at level 0.
pub fn collector_relocate<F: Flash>(store: &mut Store<F>, id: PageId) -> Option<Page> {
    let (mut oldest, newest) = store.page_scan(id)?;
    if oldest == newest {
        // fewer than two pages, nothing to relocate
        return None;
    }

    let limit = store.geo.page_payload() / 2;
    while oldest != newest {
        if store.move_records(oldest, newest, limit) {
            return Some(oldest);
        }
        oldest = store.page_oldest_next(oldest)?;
    }

    None
}

/// Collector that drops older pages holding no records at all.
/// Non-destructive, register at level 0.
pub fn collector_cleanup<F: Flash>(store: &mut Store<F>, id: PageId) -> Option<Page> {
    let (mut oldest, newest) = store.page_scan(id)?;

    while oldest != newest {
        if store.first_record(oldest).is_none() {
            return Some(oldest);
        }
        oldest = store.page_oldest_next(oldest)?;
    }

    None
}
