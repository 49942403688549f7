use std::cmp::Ordering;

use crate::error::Error;
use crate::layout::ERASED;
use crate::{Flash, Page, PageId, Rec, Store};

/// Second word of a fixed record header: the first payload bytes, padded
/// with erased bits when the record is shorter than the atomic unit.
fn tail_word(rest: &[u8]) -> u32 {
    let mut word = [0xFF_u8; 4];
    let n = rest.len().min(4);
    word[..n].copy_from_slice(&rest[..n]);
    u32::from_le_bytes(word)
}

impl<F: Flash> Store<F> {
    /// Appends `data` (first word included) to the newest page of `page`,
    /// allocating a fixed-size page sized to the record when a new page is
    /// needed. Returns the stored record.
    pub fn add_fixed(&mut self, page: PageId, data: &[u8]) -> Result<Rec, Error> {
        assert!(data.len() >= 4, "a record is at least its first word");
        let first = u32::from_le_bytes(data[..4].try_into().unwrap());
        self.add_impl(page, first, &data[4..], data.len(), false, true)
    }

    /// Appends the concatenation of `key` and `data`, allocating a
    /// fixed-size page when a new page is needed.
    pub fn add_fixed_keyed(&mut self, page: PageId, key: u32, data: &[u8]) -> Result<Rec, Error> {
        assert!(key != 0 && key != ERASED, "reserved record key");
        self.add_impl(page, key, data, data.len() + 4, false, true)
    }

    /// Appends `data` (first word included) to the newest page of `page`,
    /// allocating a variable-layout page when a new page is needed.
    pub fn add_var(&mut self, page: PageId, data: &[u8]) -> Result<Rec, Error> {
        assert!(data.len() >= 4, "a record is at least its first word");
        let first = u32::from_le_bytes(data[..4].try_into().unwrap());
        self.add_impl(page, first, &data[4..], data.len(), true, true)
    }

    /// Appends the concatenation of `key` and `data`, allocating a
    /// variable-layout page when a new page is needed.
    pub fn add_var_keyed(&mut self, page: PageId, key: u32, data: &[u8]) -> Result<Rec, Error> {
        assert!(key != 0 && key != ERASED, "reserved record key");
        self.add_impl(page, key, data, data.len() + 4, true, true)
    }

    /// Makes `data` the only record stored under `key`, using fixed-size
    /// pages for new allocations.
    pub fn replace_fixed(&mut self, page: PageId, key: u32, data: &[u8]) -> Result<Rec, Error> {
        assert!(key != 0 && key != ERASED, "reserved record key");
        self.replace_impl(page, key, data, data.len() + 4, false)
    }

    /// Makes `data` the only record stored under `key`, using
    /// variable-layout pages for new allocations.
    pub fn replace_var(&mut self, page: PageId, key: u32, data: &[u8]) -> Result<Rec, Error> {
        assert!(key != 0 && key != ERASED, "reserved record key");
        self.replace_impl(page, key, data, data.len() + 4, true)
    }

    /// Shreds every record stored under `key`. Returns whether at least one
    /// record was shredded.
    pub fn delete(&mut self, page: PageId, key: u32) -> bool {
        assert!(key != 0 && key != ERASED, "reserved record key");

        let mut rec = match self.find_unordered_first(page, key) {
            Some(rec) => rec,
            None => return false,
        };

        // delete all matching records before notifying
        loop {
            log::debug!("deleting record @ {:#x}", rec.addr);
            self.shred_record(rec);
            match self.find_unordered_next(rec, key) {
                Some(next) => rec = next,
                None => break,
            }
        }

        self.notifiers.notify(page);
        true
    }

    /// Shreds every page of `id` and schedules the collector. Returns the
    /// number of pages shredded.
    pub fn erase_all(&mut self, id: PageId) -> usize {
        let mut count = 0;

        let mut page = self.page_first(id);
        while let Some(p) = page {
            self.erase_page(p);
            count += 1;
            page = self.fast_enum(self.block_of(p.0), Page(p.0 + self.geo.page_size), id);
        }

        if count > 0 {
            self.run_collector();
        }

        count
    }

    /// Moves all records from `src` to `dst` (same id). The move is first
    /// simulated; nothing happens unless every record fits below `limit`
    /// bytes of `dst`'s free space (0 meaning no limit). Returns whether
    /// all records were moved.
    pub fn move_records(&mut self, src: Page, dst: Page, limit: usize) -> bool {
        debug_assert_eq!(self.page_id(src), self.page_id(dst));

        let mut free = match self.find_free(dst) {
            Some(free) => free,
            None => return false,
        };

        let mut free_max = self.page_end(dst);
        if limit != 0 && free + limit < free_max {
            free_max = free + limit;
        }

        let dst_record_size = self.page_record_size(dst);

        // simulate the move and start only if every record fits
        let mut test_free = free;
        let mut cursor = self.first_record(src);
        while let Some(rec) = cursor {
            if dst_record_size != 0 {
                // a fixed destination also requires every record to be
                // small enough for its slots
                if test_free + dst_record_size > free_max || rec.len > dst_record_size {
                    return false;
                }
                test_free += dst_record_size;
            } else {
                let required = self.geo.var_stride(rec.len);
                if test_free + required - 4 > free_max {
                    return false;
                }
                test_free += required;
            }
            cursor = self.next_record(rec);
        }

        let mut moved = 0;
        let mut success = true;

        let mut cursor = self.first_record(src);
        while let Some(rec) = cursor {
            // the cursor may sit past the end if the previous record filled
            // the page exactly
            let written = if free < self.page_end(dst) {
                let first = self.key(rec);
                let rest = self.payload(rec).to_vec();
                self.write_record(dst, free, first, &rest, rec.len)
            } else {
                None
            };

            match written {
                Some(w) => {
                    self.shred_record(rec);
                    moved += 1;
                    free = w.addr
                        + if dst_record_size != 0 {
                            dst_record_size
                        } else {
                            self.geo.var_stride(rec.len)
                        };
                }
                None => {
                    success = false;
                    break;
                }
            }

            cursor = self.next_record(rec);
        }

        if moved > 0 {
            log::debug!(
                "moved {} records from page @ {:#x} to page @ {:#x}",
                moved,
                src.0,
                dst.0
            );
            let id = self.page_id(src);
            self.notifiers.notify(id);
        }

        success
    }

    /// Stores one record at the end of the newest page of `page`,
    /// allocating pages as needed. `rest` is the record body after the
    /// first word; `total_len` covers the whole record.
    fn add_impl(
        &mut self,
        page: PageId,
        first_word: u32,
        rest: &[u8],
        total_len: usize,
        var: bool,
        notify: bool,
    ) -> Result<Rec, Error> {
        debug_assert_eq!(rest.len(), total_len - 4);

        let payload = self.geo.page_payload();
        let required = self.geo.align_up(total_len);

        let fits_any_page = if var {
            // a variable record also carries its length word
            required + 4 <= payload
        } else {
            required <= payload
        };
        if !fits_any_page {
            return Err(Error::RecordTooLarge {
                len: total_len,
                payload,
            });
        }

        let mut target = self.page_newest_first(page);
        let mut free = target.and_then(|p| self.find_free(p));

        loop {
            let reusable = match (target, free) {
                (Some(p), Some(slot)) => {
                    let record_size = self.page_record_size(p);
                    slot + required <= self.page_end(p)
                        && !(var && record_size != 0)
                        && !(!var && record_size != 0 && required > record_size)
                }
                _ => false,
            };

            let (p, slot) = if reusable {
                (target.unwrap(), free.unwrap())
            } else {
                // a new page, either because there is no free space left or
                // because a different record format is required
                let p = self
                    .new_page(page, if var { 0 } else { required })
                    .ok_or(Error::OutOfSpace(total_len))?;
                (p, self.page_data(p) + if var { 4 } else { 0 })
            };

            if let Some(rec) = self.write_record(p, slot, first_word, rest, total_len) {
                if notify {
                    self.notifiers.notify(page);
                }
                return Ok(rec);
            }

            // the page is exhausted; allocate a fresh one next time around
            target = None;
            free = None;
        }
    }

    /// Ensures the provided record is the only one stored under `key`. If
    /// the newest stored instance already equals it, nothing is written.
    fn replace_impl(
        &mut self,
        page: PageId,
        key: u32,
        rest: &[u8],
        total_len: usize,
        var: bool,
    ) -> Result<Rec, Error> {
        let mut rec = match self.find_unordered_first(page, key) {
            // no previous record exists, simply add a new one
            None => return self.add_impl(page, key, rest, total_len, var, true),
            Some(rec) => rec,
        };

        // the one found might not be the only one; keep the newest
        while let Some(next) = self.find_unordered_next(rec, key) {
            log::debug!(
                "multiple records with the same key @ {:#x} and {:#x}",
                rec.addr,
                next.addr
            );
            let del = if self.compare_age(rec, next) == Ordering::Less {
                std::mem::replace(&mut rec, next)
            } else {
                next
            };
            log::debug!("deleting older record @ {:#x}", del.addr);
            self.shred_record(del);
        }

        // if using fixed size records the stored one may be longer, but
        // only the part that was about to be written matters
        let same = {
            let bytes = self.bytes(rec);
            (rec.len == total_len || (!var && rec.len > total_len))
                && (total_len <= 4 || &bytes[4..total_len] == rest)
        };
        if same {
            log::debug!("same record already written @ {:#x}", rec.addr);
            return Ok(rec);
        }

        // suppress the add's notification; observers should never see the
        // state with two records for one key
        let res = self.add_impl(page, key, rest, total_len, var, false);

        if res.is_ok() {
            self.shred_record(rec);
        }

        self.notifiers.notify(page);

        res
    }

    /// Tries to write a record starting at `slot`, advancing over failed
    /// program attempts, until the record lands or the page runs out.
    ///
    /// The discriminator word goes last in every layout: an interrupted
    /// write leaves either an all-ones slot or one whose leading word reads
    /// as deleted, never a plausibly valid record.
    pub(crate) fn write_record(
        &mut self,
        p: Page,
        mut slot: usize,
        first_word: u32,
        rest: &[u8],
        total_len: usize,
    ) -> Option<Rec> {
        let pe = self.page_end(p);
        let record_size = self.page_record_size(p);

        if !self.geo.double_write() {
            loop {
                if record_size != 0 {
                    if slot + record_size > pe {
                        return None;
                    }
                } else {
                    let required = self.geo.align_up(total_len);
                    loop {
                        if slot + required > pe {
                            return None;
                        }
                        // reserve space by writing the record length first
                        if self.flash.write_word(slot - 4, total_len as u32) {
                            break;
                        }
                        log::warn!("failed to write length for record @ {:#x}", slot - 4);
                        self.flash.shred_word(slot - 4);
                        // a zero length slot is simply walked over
                        slot += 4;
                    }
                }

                // first word last
                if (total_len <= 4 || self.flash.write(slot + 4, rest))
                    && self.flash.write_word(slot, first_word)
                {
                    return Some(Rec {
                        addr: slot,
                        len: total_len,
                    });
                }

                log::warn!("failed to write record @ {:#x}", slot);
                self.flash.shred_word(slot);
                slot += if record_size != 0 {
                    record_size
                } else {
                    self.geo.var_stride(total_len)
                };
            }
        } else if record_size != 0 {
            loop {
                if slot + record_size > pe {
                    return None;
                }

                // the target span must be free of unfinished writes
                if self.all_ones(slot, self.geo.align_up(total_len)) {
                    if (total_len <= 8 || self.flash.write(slot + 8, &rest[4..]))
                        && self.flash.write_double(slot, first_word, tail_word(rest))
                    {
                        return Some(Rec {
                            addr: slot,
                            len: total_len,
                        });
                    }
                }

                log::warn!("failed to write fixed record @ {:#x}", slot);
                self.flash.shred_double(slot);
                slot += record_size;
            }
        } else {
            // With doublewords the length cannot be reserved up front
            // without risking a valid-looking unfinished record after a
            // power loss, so the payload goes first and the {length, first
            // word} pair lands atomically at the end. That in turn requires
            // the target span, and the following doubleword, to be clean
            // before starting.
            let mut stuck_at = None;

            loop {
                let end = slot - 4 + self.geo.var_stride(total_len);
                if end > pe {
                    return None;
                }

                let mut scan = if end < pe { end + 8 } else { end };
                while scan > slot && self.dword(scan - 8) == !0u64 {
                    scan -= 8;
                }
                if scan > slot {
                    log::warn!("garbage in free space @ {:#x}, shredding", scan - 8);
                    let resume = scan + 4;
                    while scan > slot {
                        self.flash.shred_double(scan - 8);
                        scan -= 8;
                    }
                    slot = resume;
                    stuck_at = None;
                    continue;
                }

                if (total_len <= 4 || self.flash.write(slot + 4, rest))
                    && self
                        .flash
                        .write_double(slot - 4, total_len as u32, first_word)
                {
                    return Some(Rec {
                        addr: slot,
                        len: total_len,
                    });
                }

                // retry in place: whatever the failed program left behind
                // is picked up by the scan above. A slot that fails twice
                // without leaving a trace is a dead medium.
                log::warn!("failed to write variable record @ {:#x}", slot);
                if stuck_at == Some(slot) {
                    return None;
                }
                stuck_at = Some(slot);
            }
        }
    }

    /// Irreversibly invalidates a record.
    pub(crate) fn shred_record(&mut self, rec: Rec) {
        if !self.geo.double_write() {
            self.flash.shred_word(rec.addr);
            return;
        }

        let p = self.page_of(rec.addr);
        if self.page_record_size(p) != 0 {
            self.flash.shred_double(rec.addr);
            return;
        }

        // Variable records are shredded back to front: if interrupted, the
        // tail may survive but the leading header is erased last, so the
        // record can never read as valid nor misalign its successors.
        let total = self.word(rec.addr - 4) as usize;
        let start = rec.addr - 4;
        let mut end = start + self.geo.var_stride(total);
        if end > self.page_end(p) {
            // the length was corrupted, take out the rest of the page
            log::warn!("erasing the rest of a corrupted page from {:#x}", start);
            end = self.page_end(p);
        }

        while end > start {
            self.flash.shred_double(end - 8);
            end -= 8;
        }
    }
}
