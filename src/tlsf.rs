//! The TLSF allocator core
use core::{debug_assert, debug_assert_eq, ptr::NonNull};

use crate::{
    block::{Tag, BLOCK_OVERHEAD, MIN_BLOCK_SIZE},
    int::BinInteger,
    pool::Pool,
};

mod check;
mod map;
mod walk;
pub use self::{
    check::IntegrityError,
    walk::{BlockInfo, Blocks},
};

/// The allocation granularity. Every payload pointer and every block size is
/// a multiple of this.
pub const ALIGNMENT: usize = 8;

/// The number of first-level size classes (one per bit of a `u64` size).
pub const FLLEN: usize = 64;

/// The number of second-level subdivisions of each first-level class.
pub const SLLEN: usize = 32;

/// `SLLEN.log2()`
const SLI: u32 = SLLEN.trailing_zeros();

/// Map a size to its `(first-level, second-level)` size class.
///
/// The first-level index is the position of the most significant set bit of
/// `size`; the second-level index is the [`SLLEN`]`.log2()` bits right below
/// it. Sizes below [`MIN_BLOCK_SIZE`] are all mapped to `(0, 0)`.
///
/// # Examples
///
/// ```
/// use tlsf_pool::classify;
/// assert_eq!(classify(64), (6, 0));
/// assert_eq!(classify(104), (6, 20));
/// assert_eq!(classify(1), (0, 0));
/// ```
#[inline]
pub fn classify(size: usize) -> (usize, usize) {
    map::map_floor(size)
}

#[doc = svgbobdoc::transform!(
/// A TLSF allocator managing one owned memory pool.
///
/// # Data Structure Overview
///
/// <center>
/// ```svgbob
///   First level
///                                                                      FLLEN = 64
///                          ,-----+-----+-----+-----+-----+-----+-----+-----+-----,
///    fl_bitmap: u64 =      | ... |  0  |  0  |  1  |  0  |  0  |  0  |  0  | ... |
///                          +-----+-----+-----+-----+-----+-----+-----+-----+-----+
///                 min size | ... | 2¹¹ | 2¹⁰ |  2⁹ |  2⁸ |  2⁷ |  2⁶ |  2⁵ | ... |
///                          '-----+-----+-----+--+--+-----+-----+-----+-----+-----'
///                                               |
/// ╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶|╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶
///   Second Level                                |
///                                               v                   SLLEN = 32
///                                  ,-----+-----+-----+-----+-----+-----+-----,
///     "sl_bitmap[9]: u32"        = | ... |  0  |  1  |  0  |  0  |  0  |  0  |
///                                  +-----+-----+-----+-----+-----+-----+-----+
///              min size 2⁹(1+n/32) | ... |  5  |  4  |  3  |  2  |  1  |  0  |
///                                  +-----+-----+-----+-----+-----+-----+-----+
///                       first_free |     |     |  O  |     |     |     |     |
///                                  '-----+-----+--|--+-----+-----+-----+-----'
///                                                 |
///                                                 |  size = 576..592
///                                                 |
/// ╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶|╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶╶
///   Free blocks                                   |
///                                                 |
///             ,-----------------------------------'
///             | ,---+---+-------+---,    ,---+---+-------+---,
///             '-+>O | O-+-------+   +----+>O |   |       |   |
///               +---+---'       |   |    +---+---'       |   |
///               |               |   |    |               |   |
///               '---------------+---'    '---------------+---'
///                   576 bytes                584 bytes
/// ```
/// </center>
///
/// Every block is bracketed by a one-word header (size and used flag) and a
/// one-word footer (size). The free-list links of a free block live in the
/// first two words of its payload.
///
/// # Properties
///
/// Both [`Self::allocate`] and [`Self::deallocate`] complete in constant
/// time. Payload pointers are aligned to [`ALIGNMENT`] bytes. Each block
/// costs [`BLOCK_OVERHEAD`] bytes, and no payload is smaller than
/// [`MIN_BLOCK_SIZE`] bytes.
///
)]
/// # Examples
///
/// ```
/// use tlsf_pool::Tlsf;
///
/// let mut tlsf = Tlsf::new(4096);
///
/// let ptr = tlsf.allocate(100).unwrap();
/// assert_eq!(ptr.as_ptr() as usize % 8, 0);
/// assert!(tlsf.allocate(5000).is_none());
///
/// unsafe {
///     ptr.as_ptr().write_bytes(0xa5, 100);
///     tlsf.deallocate(Some(ptr));
/// }
/// assert_eq!(tlsf.free_bytes(), 4096 - tlsf_pool::BLOCK_OVERHEAD);
/// ```
#[derive(Debug)]
pub struct Tlsf {
    pool: Pool,
    fl_bitmap: u64,
    sl_bitmap: [u32; FLLEN],
    first_free: [[Option<Tag>; SLLEN]; FLLEN],
    /// The sum of the payload sizes of all free blocks.
    free_bytes: usize,
}

const _: () = assert!(u64::BITS as usize >= FLLEN);
const _: () = assert!(u32::BITS as usize >= SLLEN);

impl Tlsf {
    /// Construct an allocator owning a new pool of `pool_size` bytes (rounded
    /// down to [`ALIGNMENT`]), initialized as one free block.
    ///
    /// If the pool can't hold a single block of [`MIN_BLOCK_SIZE`] bytes, the
    /// allocator is still constructed but every allocation fails.
    pub fn new(pool_size: usize) -> Self {
        let mut this = Self {
            pool: Pool::new(pool_size),
            fl_bitmap: 0,
            sl_bitmap: [0; FLLEN],
            first_free: [[None; SLLEN]; FLLEN],
            free_bytes: 0,
        };

        let len = this.pool.len();
        let seeded = match Tag::create(&mut this.pool, len, 0) {
            Some(block) => {
                this.link_free_block(block);
                true
            }
            None => false,
        };

        log::debug!("tlsf: pool of {} bytes (seeded = {})", len, seeded);
        this
    }

    /// The usable length of the pool in bytes.
    #[inline]
    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    /// The total payload bytes of all free blocks. A single allocation can
    /// never get all of it unless the pool holds just one free block.
    #[inline]
    pub fn free_bytes(&self) -> usize {
        self.free_bytes
    }

    /// Round a request up to the allocation granularity and the minimum
    /// block size. Returns `None` on overflow.
    #[inline]
    fn adjust_size(size: usize) -> Option<usize> {
        let size = size.checked_add(ALIGNMENT - 1)? & !(ALIGNMENT - 1);
        Some(size.max(MIN_BLOCK_SIZE))
    }

    /// Insert the specified free block at the head of its free block list.
    ///
    /// Updates the block's `prev_free` and `next_free` links.
    fn link_free_block(&mut self, block: Tag) {
        let size = block.size(&self.pool);
        let (fl, sl) = map::map_floor(size);
        debug_assert!(!block.is_used(&self.pool));
        debug_assert!(size >= MIN_BLOCK_SIZE);

        let head = self.first_free[fl][sl].replace(block);
        block.set_next_link(&mut self.pool, head);
        block.set_prev_link(&mut self.pool, None);
        if let Some(head) = head {
            head.set_prev_link(&mut self.pool, Some(block));
        }

        self.fl_bitmap.set_bit(fl as u32);
        self.sl_bitmap[fl].set_bit(sl as u32);
        self.free_bytes += size;
    }

    /// Remove the specified free block from its free block list, clearing its
    /// links.
    ///
    /// The block must be currently included in a free block list.
    fn unlink_free_block(&mut self, block: Tag) {
        let size = block.size(&self.pool);
        let (fl, sl) = map::map_floor(size);

        let next_free = block.next_link(&self.pool);
        let prev_free = block.prev_link(&self.pool);

        if let Some(prev_free) = prev_free {
            prev_free.set_next_link(&mut self.pool, next_free);
        } else {
            let first_free = &mut self.first_free[fl][sl];
            debug_assert_eq!(*first_free, Some(block));
            *first_free = next_free;
        }

        if let Some(next_free) = next_free {
            next_free.set_prev_link(&mut self.pool, prev_free);
        }

        block.clear_links(&mut self.pool);

        if self.first_free[fl][sl].is_none() {
            // The free list is now empty - update the bitmap
            self.sl_bitmap[fl].clear_bit(sl as u32);
            if self.sl_bitmap[fl] == 0 {
                self.fl_bitmap.clear_bit(fl as u32);
            }
        }

        self.free_bytes -= size;
    }

    /// Search for a non-empty free block list whose every item can hold
    /// `size` bytes.
    #[inline]
    fn search_suitable_free_block_list(&self, size: usize) -> Option<(usize, usize)> {
        let (fl, sl) = map::map_ceil(size)?;

        // Search in range `(fl, sl..SLLEN)`
        let sl = self.sl_bitmap[fl].bit_scan_forward(sl as u32) as usize;
        if sl < SLLEN {
            debug_assert!(self.sl_bitmap[fl].get_bit(sl as u32));
            return Some((fl, sl));
        }

        // Search in range `(fl + 1.., ..)`
        let fl = self.fl_bitmap.bit_scan_forward(fl as u32 + 1) as usize;
        if fl < FLLEN {
            debug_assert!(self.fl_bitmap.get_bit(fl as u32));
            let sl = self.sl_bitmap[fl].lowest_set_bit() as usize;
            debug_assert!(sl < SLLEN);
            Some((fl, sl))
        } else {
            None
        }
    }

    /// Take a free block that can hold `size` bytes out of its free list.
    fn search_free_block(&mut self, size: usize) -> Option<Tag> {
        // The list `size` itself maps to might start with a block that fits.
        // Otherwise go for a list whose every item fits.
        let (fl, sl) = map::map_floor(size);
        let block = match self.first_free[fl][sl] {
            Some(head) if head.size(&self.pool) >= size => head,
            _ => {
                let (fl, sl) = self.search_suitable_free_block_list(size)?;
                self.first_free[fl][sl]?
            }
        };
        debug_assert!(block.size(&self.pool) >= size);

        self.unlink_free_block(block);
        Some(block)
    }

    /// Attempt to allocate a block of memory.
    ///
    /// Returns the starting address of the payload, aligned to [`ALIGNMENT`]
    /// bytes, on success; `None` if there's no free block large enough.
    ///
    /// # Time Complexity
    ///
    /// This method will complete in constant time.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        let block = Self::adjust_size(size).and_then(|adjusted| {
            let block = self.search_free_block(adjusted)?;
            self.take_block(block, adjusted);
            Some(block)
        });

        if let Some(block) = block {
            Some(self.pool.ptr_at(block.payload()))
        } else {
            log::trace!("tlsf: no free block for a {}-byte request", size);
            None
        }
    }

    /// Turn a free block fresh out of its free list into a used block of
    /// `size` bytes (already adjusted), returning any usable slack to the
    /// free lists.
    fn take_block(&mut self, block: Tag, size: usize) {
        block.set_used(&mut self.pool, true);
        if let Some(rest) = block.split(&mut self.pool, size) {
            self.link_free_block(rest);
        }
    }

    /// Find the block header for an allocation.
    fn used_block_for_allocation(&self, ptr: NonNull<u8>) -> Option<Tag> {
        let block = self.pool.offset_of(ptr).and_then(Tag::from_payload);
        debug_assert!(block.is_some(), "{:p} does not point into the pool", ptr);
        let block = block?;
        debug_assert!(block.is_used(&self.pool));
        Some(block)
    }

    /// Deallocate a previously allocated memory block. `None` is ignored.
    ///
    /// The block is merged with its physical neighbors that are free, so no
    /// two adjacent blocks are ever free at the same time.
    ///
    /// # Time Complexity
    ///
    /// This method will complete in constant time.
    ///
    /// # Safety
    ///
    ///  - `ptr` must denote a memory block previously allocated via `self`.
    ///  - The memory block must not have been deallocated already.
    ///
    pub unsafe fn deallocate(&mut self, ptr: Option<NonNull<u8>>) {
        let Some(block) = ptr.and_then(|ptr| self.used_block_for_allocation(ptr)) else {
            return;
        };

        block.set_used(&mut self.pool, false);

        // The link words held user data until now
        block.clear_links(&mut self.pool);

        let block = self.merge_free_neighbors(block);
        self.link_free_block(block);
    }

    /// Merge an unlinked free block with its free physical neighbors. Returns
    /// the surviving block, which is not linked to any free list.
    fn merge_free_neighbors(&mut self, mut block: Tag) -> Tag {
        // Merge with the next block if it's a free block
        if let Some(next) = block.next_tag(&self.pool) {
            if !next.is_used(&self.pool) {
                self.unlink_free_block(next);
                block.merge(&mut self.pool, Some(next));
                log::trace!("tlsf: merged {:?} into {:?}", next, block);
            }
        }

        // Merge with the previous block if it's a free block
        if let Some(prev) = block.prev_tag(&self.pool) {
            if prev != block && !prev.is_used(&self.pool) {
                self.unlink_free_block(prev);
                prev.merge(&mut self.pool, Some(block));
                log::trace!("tlsf: merged {:?} into {:?}", block, prev);

                // `prev` is the surviving block
                block = prev;
            }
        }

        block
    }

    /// Get the number of payload bytes reserved for an allocation. This is at
    /// least the size requested, rounded up to [`ALIGNMENT`].
    ///
    /// # Safety
    ///
    /// `ptr` must denote a live memory block previously allocated via `self`.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        self.used_block_for_allocation(ptr)
            .map_or(0, |block| block.size(&self.pool))
    }

    /// Shrink or grow a previously allocated memory block.
    ///
    /// Returns the new starting address of the memory block on success;
    /// `None` otherwise, in which case the original allocation is left
    /// intact.
    ///
    /// # Time Complexity
    ///
    /// Unlike other methods, this method will complete in linear time
    /// (`O(old_size)`) when the block has to be moved.
    ///
    /// # Safety
    ///
    /// `ptr` must denote a live memory block previously allocated via `self`.
    pub unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let block = self.used_block_for_allocation(ptr)?;
        let adjusted = Self::adjust_size(new_size)?;

        // First try to shrink or grow the block toward the end (i.e.,
        // preserving the starting address)
        if self.reallocate_without_moving(block, adjusted) {
            return Some(ptr);
        }

        // Allocate a whole new memory block, then move the contents
        let old_size = block.size(&self.pool);
        let new_block = self.search_free_block(adjusted)?;
        self.take_block(new_block, adjusted);
        self.pool.copy(block.payload(), new_block.payload(), old_size.min(adjusted));

        self.deallocate(Some(ptr));
        Some(self.pool.ptr_at(new_block.payload()))
    }

    /// A subroutine of [`Self::reallocate`]. Attempts to shrink or grow the
    /// block toward the end. `new_size` must be already adjusted.
    fn reallocate_without_moving(&mut self, block: Tag, new_size: usize) -> bool {
        let old_size = block.size(&self.pool);

        if new_size > old_size {
            // Grow into the next free block. Fail if there isn't such a block.
            let Some(next) = block.next_tag(&self.pool) else {
                return false;
            };
            if next.is_used(&self.pool)
                || old_size + BLOCK_OVERHEAD + next.size(&self.pool) < new_size
            {
                return false;
            }

            self.unlink_free_block(next);
            block.merge(&mut self.pool, Some(next));
        }

        // Give back the slack, if it's large enough to form a block
        if let Some(rest) = block.split(&mut self.pool, new_size) {
            let rest = self.merge_free_neighbors(rest);
            self.link_free_block(rest);
        }

        true
    }

    /// Iterate over every block of the pool in physical order.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks::new(&self.pool)
    }
}

#[cfg(test)]
mod tests;
