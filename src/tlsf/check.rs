//! Consistency verification of the pool and the free block index
use alloc::collections::BTreeSet;
use derive_more::{Display, Error};

use super::{map, Tlsf, FLLEN, SLLEN};
use crate::{
    block::{Tag, BLOCK_OVERHEAD, MIN_BLOCK_SIZE},
    int::BinInteger,
};

/// A violated allocator invariant, reported by [`Tlsf::check_integrity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Error)]
pub enum IntegrityError {
    /// The blocks don't tile the pool exactly.
    #[display("blocks cover {covered} bytes of a {len}-byte pool")]
    Partition { covered: usize, len: usize },
    /// A block's footer disagrees with its header.
    #[display("block at {offset}: header says {header} bytes, footer says {footer}")]
    FooterMismatch {
        offset: usize,
        header: usize,
        footer: usize,
    },
    /// A block is smaller than the minimum block size.
    #[display("block at {offset} has only {size} bytes")]
    Undersized { offset: usize, size: usize },
    /// Two physically adjacent blocks are both free.
    #[display("free blocks at {offset} and its successor were not coalesced")]
    AdjacentFree { offset: usize },
    /// A free list holds a block that is used, misfiled, or not a block.
    #[display("free list ({fl}, {sl}) holds a bad entry at {offset}")]
    Misfiled { fl: usize, sl: usize, offset: usize },
    /// A free list's back links don't mirror its forward links.
    #[display("free list ({fl}, {sl}) is broken at {offset}")]
    BrokenLink { fl: usize, sl: usize, offset: usize },
    /// A free block is not reachable from any free list.
    #[display("free block at {offset} is not in any free list")]
    Unlisted { offset: usize },
    /// The bitmaps disagree with the emptiness of a free list.
    #[display("bitmap bit for free list ({fl}, {sl}) is stale")]
    Bitmap { fl: usize, sl: usize },
    /// The free byte counter disagrees with the pool.
    #[display("{counted} free bytes counted but {recorded} recorded")]
    FreeBytes { counted: usize, recorded: usize },
}

impl Tlsf {
    /// Verify every structural invariant of the allocator.
    ///
    /// This walks the whole pool and every free list, so it runs in linear
    /// time. It is meant for tests and debugging.
    pub fn check_integrity(&self) -> Result<(), IntegrityError> {
        let pool = &self.pool;

        // Physical walk
        let mut free_blocks = BTreeSet::new();
        let mut covered = 0;
        let mut prev_free = false;
        for info in self.blocks() {
            let block = Tag::at(info.offset);
            if info.offset != covered {
                return Err(IntegrityError::Partition {
                    covered,
                    len: pool.len(),
                });
            }
            covered = info.offset + info.size + BLOCK_OVERHEAD;
            if covered > pool.len() {
                return Err(IntegrityError::Partition {
                    covered,
                    len: pool.len(),
                });
            }

            let footer = block.footer_size(pool);
            if footer != info.size {
                return Err(IntegrityError::FooterMismatch {
                    offset: info.offset,
                    header: info.size,
                    footer,
                });
            }
            if info.size < MIN_BLOCK_SIZE {
                return Err(IntegrityError::Undersized {
                    offset: info.offset,
                    size: info.size,
                });
            }

            if !info.used {
                if prev_free {
                    let offset = block.prev_tag(pool).map_or(0, Tag::offset);
                    return Err(IntegrityError::AdjacentFree { offset });
                }
                free_blocks.insert(info.offset);
            }
            prev_free = !info.used;
        }

        if covered != 0 && covered != pool.len() {
            return Err(IntegrityError::Partition {
                covered,
                len: pool.len(),
            });
        }

        // Free lists
        let mut counted = 0;
        let mut listed = 0;
        for fl in 0..FLLEN {
            for sl in 0..SLLEN {
                let head = self.first_free[fl][sl];
                let bit = self.sl_bitmap[fl].get_bit(sl as u32);
                if bit != head.is_some() {
                    return Err(IntegrityError::Bitmap { fl, sl });
                }

                let mut prev = None;
                let mut cursor = head;
                while let Some(block) = cursor {
                    let offset = block.offset();
                    let filed = free_blocks.remove(&offset)
                        && map::map_floor(block.size(pool)) == (fl, sl);
                    if !filed {
                        return Err(IntegrityError::Misfiled { fl, sl, offset });
                    }
                    if block.prev_link(pool) != prev {
                        return Err(IntegrityError::BrokenLink { fl, sl, offset });
                    }

                    counted += block.size(pool);
                    listed += 1;
                    prev = cursor;
                    cursor = block.next_link(pool);
                }
            }

            let fl_bit = self.fl_bitmap.get_bit(fl as u32);
            if fl_bit != (self.sl_bitmap[fl] != 0) {
                return Err(IntegrityError::Bitmap { fl, sl: 0 });
            }
        }

        if let Some(&offset) = free_blocks.iter().next() {
            return Err(IntegrityError::Unlisted { offset });
        }

        if counted != self.free_bytes {
            return Err(IntegrityError::FreeBytes {
                counted,
                recorded: self.free_bytes,
            });
        }

        log::trace!("tlsf: integrity ok ({} free blocks)", listed);
        Ok(())
    }
}
