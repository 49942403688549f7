use crate::layout::ERASED;
use crate::{Flash, Page, PageId, Rec, Store};

/// How a record search continues once a page is exhausted.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Chain {
    /// Stay on the one page.
    None,
    Unordered,
    Oldest,
}

impl<F: Flash> Store<F> {
    /// The stored bytes of a record, including its first (key) word.
    ///
    /// For records discovered by a find on a fixed-size page the span covers
    /// the whole slot; for records just written it covers the written
    /// length.
    pub fn bytes(&self, rec: Rec) -> &[u8] {
        &self.flash.as_bytes()[rec.addr..rec.addr + rec.len]
    }

    /// The record bytes after the 4-byte key prefix.
    pub fn payload(&self, rec: Rec) -> &[u8] {
        &self.bytes(rec)[4..]
    }

    /// The record's first word.
    pub fn key(&self, rec: Rec) -> u32 {
        self.word(rec.addr)
    }

    /// First matching record of the id, in no particular order. A `key` of
    /// zero matches every record (a zero first word never denotes a valid
    /// record).
    pub fn find_unordered_first(&self, id: PageId, key: u32) -> Option<Rec> {
        let p = self.page_first(id)?;
        self.find_forward(p, None, key, Chain::Unordered)
    }

    /// Next matching record after `rec`, in no particular order.
    pub fn find_unordered_next(&self, rec: Rec, key: u32) -> Option<Rec> {
        self.find_forward(self.page_of(rec.addr), Some(rec.addr), key, Chain::Unordered)
    }

    /// The newest matching record of the id.
    pub fn find_newest_first(&self, id: PageId, key: u32) -> Option<Rec> {
        let p = self.page_newest_first(id)?;
        self.find_rearward(p, None, key)
    }

    /// The next older matching record, relative to `rec`.
    pub fn find_newest_next(&self, rec: Rec, key: u32) -> Option<Rec> {
        self.find_rearward(self.page_of(rec.addr), Some(rec.addr), key)
    }

    /// The oldest matching record of the id.
    pub fn find_oldest_first(&self, id: PageId, key: u32) -> Option<Rec> {
        let p = self.page_oldest_first(id)?;
        self.find_forward(p, None, key, Chain::Oldest)
    }

    /// The next newer matching record, relative to `rec`.
    pub fn find_oldest_next(&self, rec: Rec, key: u32) -> Option<Rec> {
        self.find_forward(self.page_of(rec.addr), Some(rec.addr), key, Chain::Oldest)
    }

    /// The first valid record on this one page, in address order.
    pub fn first_record(&self, p: Page) -> Option<Rec> {
        self.find_forward(p, None, 0, Chain::None)
    }

    /// The next valid record on the same page.
    pub fn next_record(&self, rec: Rec) -> Option<Rec> {
        self.find_forward(self.page_of(rec.addr), Some(rec.addr), 0, Chain::None)
    }

    /// Forward search: address order within each page, pages chained per
    /// `chain`. Starts after `after` when given, else at the page start.
    pub(crate) fn find_forward(
        &self,
        mut p: Page,
        mut after: Option<usize>,
        key: u32,
        chain: Chain,
    ) -> Option<Rec> {
        loop {
            let pe = self.page_end(p);
            let record_size = self.page_record_size(p);

            if record_size != 0 {
                let mut rec = match after.take() {
                    Some(a) => a + record_size,
                    None => self.page_data(p),
                };

                while rec + record_size <= pe {
                    let first = self.word(rec);
                    if first != 0 && first != ERASED && (key == 0 || first == key) {
                        return Some(Rec {
                            addr: rec,
                            len: record_size,
                        });
                    }
                    rec += record_size;
                }
            } else {
                let mut rec = match after.take() {
                    Some(a) => a + self.geo.var_stride(self.word(a - 4) as usize),
                    None => self.page_data(p) + 4,
                };

                while rec < pe {
                    let len = self.word(rec - 4);
                    if len == 0 || len == ERASED {
                        // shredded length reservation or still-free space;
                        // records may follow either way
                        rec += 4;
                        continue;
                    }

                    let len = len as usize;
                    if rec + len > pe {
                        // a length overrunning the page is debris
                        break;
                    }
                    if len < 4 {
                        // too short to even hold its first word
                        rec += self.geo.var_stride(len);
                        continue;
                    }

                    let first = self.word(rec);
                    if first != 0 && first != ERASED && (key == 0 || first == key) {
                        return Some(Rec { addr: rec, len });
                    }
                    rec += self.geo.var_stride(len);
                }
            }

            p = self.next_page_in(p, chain)?;
        }
    }

    /// Rearward search: like `find_forward`, but remembers the last match of
    /// each page (the newest record sits at the highest address) and chains
    /// to the next older page. `stop` bounds the scan on the first page.
    pub(crate) fn find_rearward(
        &self,
        mut p: Page,
        mut stop: Option<usize>,
        key: u32,
    ) -> Option<Rec> {
        loop {
            let pe = self.page_end(p);
            let record_size = self.page_record_size(p);
            let mut found: Option<Rec> = None;

            if record_size != 0 {
                let mut rec = self.page_data(p);
                while rec + record_size <= pe && Some(rec) != stop {
                    let first = self.word(rec);
                    if first != 0 && first != ERASED && (key == 0 || first == key) {
                        found = Some(Rec {
                            addr: rec,
                            len: record_size,
                        });
                    }
                    rec += record_size;
                }
            } else {
                let mut rec = self.page_data(p) + 4;
                while rec < pe && Some(rec) != stop {
                    let len = self.word(rec - 4);
                    if len == 0 || len == ERASED {
                        rec += 4;
                        continue;
                    }

                    let len = len as usize;
                    if rec + len > pe {
                        break;
                    }
                    if len < 4 {
                        rec += self.geo.var_stride(len);
                        continue;
                    }

                    let first = self.word(rec);
                    if first != 0 && first != ERASED && (key == 0 || first == key) {
                        found = Some(Rec { addr: rec, len });
                    }
                    rec += self.geo.var_stride(len);
                }
            }

            if found.is_some() {
                return found;
            }
            p = self.page_newest_next(p)?;
            stop = None;
        }
    }

    /// Start of the free space on the page, or `None` when it is full.
    pub(crate) fn find_free(&self, p: Page) -> Option<usize> {
        let pe = self.page_end(p);
        let record_size = self.page_record_size(p);

        if record_size != 0 {
            let mut rec = self.page_data(p);
            while rec + record_size <= pe {
                if self.word(rec) == ERASED {
                    return Some(rec);
                }
                rec += record_size;
            }
        } else {
            let mut rec = self.page_data(p) + 4;
            while rec < pe {
                let len = self.word(rec - 4);
                if len == ERASED {
                    return Some(rec);
                }
                rec += if len == 0 {
                    4
                } else {
                    self.geo.var_stride(len as usize)
                };
            }
        }

        None
    }

    fn next_page_in(&self, p: Page, chain: Chain) -> Option<Page> {
        match chain {
            Chain::None => None,
            Chain::Unordered => self.page_next(p),
            Chain::Oldest => self.page_oldest_next(p),
        }
    }
}
