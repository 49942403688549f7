use zerocopy::FromBytes;

use crate::layout::{BlockHeader, BlockState, BLOCK_HEADER, ERASED, MAGIC};
use crate::{Block, Flash, InitFlags, Store};

/// What a scan of one block's page headers found.
pub(crate) struct PageCensus {
    pub free: usize,
    pub used: usize,
    pub erasable: usize,
}

impl PageCensus {
    /// The whole block holds nothing but shredded pages and can be erased.
    pub fn all_erasable(&self) -> bool {
        self.erasable > 0 && self.free == 0 && self.used == 0
    }
}

impl<F: Flash> Store<F> {
    /// Scans the managed area for existing blocks and fixes any problems
    /// that may have been created by an unexpected reset, so that later
    /// scans can rely on every block being empty, valid, or erasable.
    pub(crate) fn initialize(&mut self, flags: InitFlags) {
        let (base, end) = (self.geo.base, self.geo.end);

        self.first_used = end;
        self.pages_available = 0;
        self.collecting = false;
        self.blocks_to_erase = false;
        self.healthy = true;

        let mut corrupted = 0;

        if flags.reset {
            log::debug!("erasing managed area {:#x}..{:#x}", base, end);
            self.flash.erase(base, end - base);
        }

        let mut off = end;
        while off > base {
            off -= self.geo.block_size;
            let b = Block(off);
            let header = self.block_header(b);
            let (magic, generation) = (header.magic.get(), header.generation.get());

            if magic == MAGIC {
                self.first_used = off;

                if generation == ERASED {
                    log::debug!(
                        "found half-initialized block (magic but no generation) @ {:#x}",
                        off
                    );
                    if self.block_empty_from(b, off + BLOCK_HEADER) && self.format_block(b, 1) {
                        continue;
                    }

                    log::error!("failed to complete block initialization @ {:#x}", off);
                    self.shred_block_header(b);
                    self.blocks_to_erase = true;
                } else {
                    // scan through pages to see if the block can be erased
                    let census = self.check_pages(b);
                    if census.all_erasable() {
                        log::warn!(
                            "block with no used nor free pages found after reset @ {:#x}",
                            off
                        );
                        self.mark_block_erasable(b);
                    } else {
                        self.pages_available += census.free;
                    }
                }
            } else if self.block_empty_from(b, off) {
                // verified free block, add to the free page pool
                self.pages_available += self.geo.pages_per_block;
            } else if magic == 0 {
                log::warn!("block marked for erase found after reset @ {:#x}", off);
                self.blocks_to_erase = true;
            } else if flags.ignore_corrupted {
                corrupted += 1;
            } else {
                // unless marked erasable, there is something wrong with the
                // block (e.g. an interrupted erase operation)
                log::warn!("corrupted block @ {:#x}", off);
                self.shred_block_header(b);
                self.blocks_to_erase = true;
            }
        }

        log::debug!(
            "mount complete - {:#x} <= {:#x} <= {:#x}, {}/{} pages free",
            base,
            self.first_used,
            end,
            self.pages_available,
            self.geo.pages_per_block * ((end - base) / self.geo.block_size),
        );

        if corrupted > 0 {
            log::warn!("{} corrupted blocks left unerased", corrupted);
            self.healthy = false;
        }

        if self.blocks_to_erase {
            log::debug!("there are blocks marked to be erased, running collector");
            self.run_collector();
        } else if self.pages_available < self.config.pages_kept_free {
            log::debug!("not enough pages free, running collector");
            self.run_collector();
        }
    }

    /// Returns a newly formatted block, or `None` if no empty block is
    /// left. Only empty blocks qualify; erasing is far too slow to perform
    /// synchronously here.
    pub fn new_block(&mut self) -> Option<Block> {
        let (base, bs) = (self.geo.base, self.geo.block_size);

        let mut off = self.geo.end;
        while off > base {
            off -= bs;
            let b = Block(off);
            if self.block_empty_from(b, off) && self.format_block(b, 1) {
                if self.first_used > off {
                    self.first_used = off;
                }
                return Some(b);
            }
        }

        None
    }

    pub fn block_state(&self, b: Block) -> BlockState {
        let header = self.block_header(b);
        let (magic, generation) = (header.magic.get(), header.generation.get());

        if magic == MAGIC {
            if generation == ERASED {
                BlockState::HalfInitialized
            } else {
                BlockState::Valid
            }
        } else if magic == 0 {
            BlockState::Erasable
        } else if self.block_empty_from(b, b.0) {
            BlockState::Empty
        } else {
            BlockState::Corrupted
        }
    }

    pub fn block_generation(&self, b: Block) -> u32 {
        self.block_header(b).generation.get()
    }

    pub(crate) fn block_is_valid(&self, b: Block) -> bool {
        let header = self.block_header(b);
        header.magic.get() == MAGIC && header.generation.get() != ERASED
    }

    pub(crate) fn block_header(&self, b: Block) -> &BlockHeader {
        BlockHeader::ref_from_prefix(&self.flash.as_bytes()[b.0..])
            .unwrap()
            .0
    }

    /// The block containing `addr`.
    pub(crate) fn block_of(&self, addr: usize) -> Block {
        let index = (addr - self.geo.base) / self.geo.block_size;
        Block(self.geo.base + index * self.geo.block_size)
    }

    /// Whether the block is all-ones from `from` (an absolute offset inside
    /// the block) to its end.
    pub(crate) fn block_empty_from(&self, b: Block, from: usize) -> bool {
        self.all_ones(from, b.0 + self.geo.block_size - from)
    }

    /// Writes the block header with the specified generation (erase count).
    /// The magic goes first, so a reset in between is recognizable as a
    /// half-initialized block.
    pub(crate) fn format_block(&mut self, b: Block, generation: u32) -> bool {
        if self.flash.write_word(b.0, MAGIC) && self.flash.write_word(b.0 + 4, generation) {
            log::debug!("formatted block gen {} @ {:#x}", generation, b.0);
            return true;
        }

        self.flash.shred_word(b.0 + 4);
        self.flash.shred_word(b.0);
        log::error!("failed to format block gen {} @ {:#x}", generation, b.0);
        false
    }

    pub(crate) fn shred_block_header(&mut self, b: Block) {
        if self.geo.double_write() {
            self.flash.shred_double(b.0);
        } else {
            self.flash.shred_word(b.0 + 4);
            self.flash.shred_word(b.0);
        }
    }

    /// Marks a block for background erasure. On double-write media the
    /// header is first copied into the block padding so the generation
    /// survives the erase.
    pub(crate) fn mark_block_erasable(&mut self, b: Block) {
        if self.geo.double_write() {
            if self.geo.block_padding >= 8 {
                let pad = self.padding_offset(b);
                let (magic, generation) = (self.word(b.0), self.word(b.0 + 4));
                self.flash.write_double(pad, magic, generation);
            } else {
                log::warn!(
                    "losing generation of block @ {:#x}, no padding available to preserve it",
                    b.0
                );
            }
            self.flash.shred_double(b.0);
        } else {
            self.flash.shred_word(b.0);
        }
        self.blocks_to_erase = true;
    }

    pub(crate) fn padding_offset(&self, b: Block) -> usize {
        b.0 + crate::layout::BLOCK_HEADER + self.geo.pages_per_block * self.geo.page_size
    }

    /// Classify every page of the block.
    pub(crate) fn check_pages(&self, b: Block) -> PageCensus {
        let mut census = PageCensus {
            free: 0,
            used: 0,
            erasable: 0,
        };

        for p in self.pages(b) {
            match self.page_id_raw(p) {
                0 => census.erasable += 1,
                id if id == ERASED => {
                    if self.page_is_empty(p) {
                        census.free += 1;
                    } else {
                        // a torn page header; NewPage shreds these lazily
                        census.used += 1;
                    }
                }
                _ => census.used += 1,
            }
        }

        census
    }
}
