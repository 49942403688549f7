use std::cmp::Ordering;

use zerocopy::FromBytes;

use crate::layout::{seq_lt, PageHeader, PageState, BLOCK_HEADER, ERASED, PAGE_HEADER};
use crate::{Block, Flash, Page, PageId, Rec, Store};

/// Ordering key of a page: sequence first, address as the tiebreaker for
/// duplicates that slipped in during a recovery.
type AgeKey = (u16, usize);

fn before(a: AgeKey, b: AgeKey) -> bool {
    if a.0 == b.0 {
        a.1 < b.1
    } else {
        seq_lt(a.0, b.0)
    }
}

pub(crate) struct RelativeScan {
    pub older: Option<Page>,
    pub newer: Option<Page>,
    pub oldest: Page,
    pub newest: Page,
}

impl<F: Flash> Store<F> {
    pub(crate) fn pages(&self, b: Block) -> impl Iterator<Item = Page> {
        let (base, ps) = (b.0 + BLOCK_HEADER, self.geo.page_size);
        (0..self.geo.pages_per_block).map(move |i| Page(base + i * ps))
    }

    pub(crate) fn page_at(&self, b: Block, index: usize) -> Page {
        Page(b.0 + BLOCK_HEADER + index * self.geo.page_size)
    }

    /// The page containing `addr`.
    pub(crate) fn page_of(&self, addr: usize) -> Page {
        let first = self.block_of(addr).0 + BLOCK_HEADER;
        Page(addr - (addr - first) % self.geo.page_size)
    }

    pub(crate) fn page_header(&self, p: Page) -> &PageHeader {
        PageHeader::ref_from_prefix(&self.flash.as_bytes()[p.0..])
            .unwrap()
            .0
    }

    pub(crate) fn page_id_raw(&self, p: Page) -> u32 {
        self.page_header(p).id.get()
    }

    pub fn page_id(&self, p: Page) -> PageId {
        PageId(self.page_id_raw(p))
    }

    pub fn page_sequence(&self, p: Page) -> u16 {
        self.page_header(p).sequence.get()
    }

    /// Fixed record size of the page, or 0 for variable records.
    pub fn page_record_size(&self, p: Page) -> usize {
        self.page_header(p).record_size.get() as usize
    }

    pub fn page_state(&self, p: Page) -> PageState {
        match self.page_id_raw(p) {
            0 => PageState::Erasable,
            id if id == ERASED => PageState::Empty,
            _ => PageState::Valid,
        }
    }

    pub(crate) fn page_is_empty(&self, p: Page) -> bool {
        self.all_ones(p.0, self.geo.page_size)
    }

    /// First byte of the record area.
    pub(crate) fn page_data(&self, p: Page) -> usize {
        p.0 + PAGE_HEADER
    }

    /// One past the last byte of the record area.
    pub(crate) fn page_end(&self, p: Page) -> usize {
        p.0 + self.geo.page_size
    }

    /// Allocates a new page with the specified id, discovering the
    /// successor sequence number and a free slot in a single pass over the
    /// used blocks.
    pub fn new_page(&mut self, id: PageId, record_size: usize) -> Option<Page> {
        debug_assert!(id.0 != 0 && id.0 != ERASED, "reserved page id");
        debug_assert!(record_size <= u16::MAX as usize);

        let mut seq: Option<u16> = None;
        let mut free: Option<Page> = None;

        for b in self.blocks_from(self.first_used) {
            if !self.block_is_valid(b) {
                continue;
            }

            for p in self.pages(b) {
                let pid = self.page_id_raw(p);
                if pid == id.0 {
                    let s = self.page_sequence(p);
                    if seq.map_or(true, |cur| seq_lt(cur, s)) {
                        seq = Some(s);
                    }
                } else if free.is_none() && pid == ERASED && self.page_is_empty(p) {
                    // pages fill a block in address order, so the rest of
                    // this block cannot hold pages with our id
                    free = Some(p);
                    break;
                }
            }
        }

        let seq = seq.map_or(1, |s| s.wrapping_add(1));
        let w0 = seq as u32 | ((record_size as u32) << 16);

        loop {
            let slot = match free {
                Some(p) => p,
                None => match self.new_block() {
                    Some(b) => self.page_at(b, 0),
                    None => {
                        // cannot allocate now; reschedule the collector so
                        // a later attempt may find reclaimed pages
                        self.run_collector();
                        return None;
                    }
                },
            };

            let ok = if self.geo.double_write() {
                self.flash.write_double(slot.0, id.0, w0)
            } else {
                self.flash.write_word(slot.0 + 4, w0) && self.flash.write_word(slot.0, id.0)
            };

            if ok {
                if record_size != 0 {
                    log::debug!(
                        "allocated page {}-{} with fixed record size {} @ {:#x}",
                        id,
                        seq,
                        record_size,
                        slot.0
                    );
                } else {
                    log::debug!(
                        "allocated page {}-{} with variable records @ {:#x}",
                        id,
                        seq,
                        slot.0
                    );
                }

                // the counter is a soft shadow of the physical state and
                // may miss pages of blocks healed during the mount scan
                self.pages_available = self.pages_available.saturating_sub(1);

                // always run the collector after allocating a new page
                self.run_collector();

                return Some(slot);
            }

            self.shred_page_header(slot);
            log::error!("failed to format page {}-{} @ {:#x}", id, seq, slot.0);

            free = self.free_slot_after(slot);
        }
    }

    /// Next empty page after a failed header write: the rest of the same
    /// block first, then any later valid block. Torn slots encountered on
    /// the way are shredded.
    fn free_slot_after(&mut self, slot: Page) -> Option<Page> {
        let b = self.block_of(slot.0);
        let pages_end = b.0 + BLOCK_HEADER + self.geo.pages_per_block * self.geo.page_size;

        let mut next = Page(slot.0 + self.geo.page_size);
        while next.0 < pages_end {
            if self.page_is_empty(next) {
                return Some(next);
            }
            if self.page_id_raw(next) == ERASED {
                log::warn!("marking corrupted page @ {:#x}", next.0);
                self.shred_page_header(next);
            }
            next = Page(next.0 + self.geo.page_size);
        }

        // this block is full, we need another one
        for b2 in self.blocks_from(b.0 + self.geo.block_size) {
            if !self.block_is_valid(b2) {
                continue;
            }
            for p in self.pages(b2) {
                if self.page_id_raw(p) == ERASED {
                    if self.page_is_empty(p) {
                        return Some(p);
                    }
                    log::warn!("marking corrupted page @ {:#x}", p.0);
                    self.shred_page_header(p);
                }
            }
        }

        None
    }

    pub(crate) fn shred_page_header(&mut self, p: Page) {
        if self.geo.double_write() {
            self.flash.shred_double(p.0);
        } else {
            self.flash.shred_word(p.0);
        }
    }

    /// The first page with the specified id, in no particular order.
    pub fn page_first(&self, id: PageId) -> Option<Page> {
        if self.first_used >= self.geo.end {
            return None;
        }
        let b = Block(self.first_used);
        self.fast_enum(b, self.page_at(b, 0), id)
    }

    /// The next page with the same id, in no particular order.
    pub fn page_next(&self, p: Page) -> Option<Page> {
        let id = self.page_id(p);
        self.fast_enum(self.block_of(p.0), Page(p.0 + self.geo.page_size), id)
    }

    /// Continues an unordered page enumeration from `p` (which may point
    /// one past the last page of `b`).
    pub(crate) fn fast_enum(&self, mut b: Block, mut p: Page, id: PageId) -> Option<Page> {
        loop {
            let pages_end = b.0 + BLOCK_HEADER + self.geo.pages_per_block * self.geo.page_size;

            while p.0 < pages_end {
                let pid = self.page_id_raw(p);
                if pid == ERASED {
                    // pages fill in address order: the rest is empty
                    break;
                }
                if pid == id.0 {
                    return Some(p);
                }
                p = Page(p.0 + self.geo.page_size);
            }

            loop {
                b = Block(b.0 + self.geo.block_size);
                if b.0 >= self.geo.end {
                    return None;
                }
                if self.block_is_valid(b) {
                    break;
                }
            }
            p = self.page_at(b, 0);
        }
    }

    /// The oldest and newest page of an id. Duplicate sequences (possible
    /// transiently after an interrupted move) are disambiguated by address,
    /// lower meaning older.
    pub(crate) fn page_scan(&self, id: PageId) -> Option<(Page, Page)> {
        let first = self.page_first(id)?;
        let first_key: AgeKey = (self.page_sequence(first), first.0);

        let mut oldest = first_key;
        let mut newest = first_key;

        let mut p = first;
        while let Some(q) = self.page_next(p) {
            let key: AgeKey = (self.page_sequence(q), q.0);
            if before(key, oldest) {
                oldest = key;
            }
            if before(newest, key) {
                newest = key;
            }
            p = q;
        }

        Some((Page(oldest.1), Page(newest.1)))
    }

    pub fn page_oldest_first(&self, id: PageId) -> Option<Page> {
        self.page_scan(id).map(|(oldest, _)| oldest)
    }

    pub fn page_newest_first(&self, id: PageId) -> Option<Page> {
        self.page_scan(id).map(|(_, newest)| newest)
    }

    /// The next older page of the same id, or `None` once the sequence ring
    /// would wrap back around to the newest page.
    pub fn page_newest_next(&self, p: Page) -> Option<Page> {
        let scan = self.page_scan_relative(p);
        let older = scan.older?;
        if older == scan.newest {
            None
        } else {
            Some(older)
        }
    }

    /// The next newer page of the same id, dual of [`Store::page_newest_next`].
    pub fn page_oldest_next(&self, p: Page) -> Option<Page> {
        let scan = self.page_scan_relative(p);
        let newer = scan.newer?;
        if newer == scan.oldest {
            None
        } else {
            Some(newer)
        }
    }

    pub(crate) fn page_scan_relative(&self, p: Page) -> RelativeScan {
        let id = self.page_id(p);
        let anchor: AgeKey = (self.page_sequence(p), p.0);

        let mut older: Option<AgeKey> = None;
        let mut newer: Option<AgeKey> = None;
        let mut oldest = anchor;
        let mut newest = anchor;

        let mut cursor = self.page_first(id);
        while let Some(q) = cursor {
            if q != p {
                let key: AgeKey = (self.page_sequence(q), q.0);
                if before(key, anchor) && older.map_or(true, |o| before(o, key)) {
                    older = Some(key);
                }
                if before(anchor, key) && newer.map_or(true, |n| before(key, n)) {
                    newer = Some(key);
                }
                if before(key, oldest) {
                    oldest = key;
                }
                if before(newest, key) {
                    newest = key;
                }
            }
            cursor = self.page_next(q);
        }

        RelativeScan {
            older: older.map(|k| Page(k.1)),
            newer: newer.map(|k| Page(k.1)),
            oldest: Page(oldest.1),
            newest: Page(newest.1),
        }
    }

    /// Relative age of two records: page sequences decide across pages,
    /// addresses within one page (lower is older).
    pub fn compare_age(&self, r1: Rec, r2: Rec) -> Ordering {
        let p1 = self.page_of(r1.addr);
        let p2 = self.page_of(r2.addr);

        if p1 != p2 {
            let diff = self
                .page_sequence(p1)
                .wrapping_sub(self.page_sequence(p2)) as i16;
            diff.cmp(&0)
        } else {
            r1.addr.cmp(&r2.addr)
        }
    }
}
