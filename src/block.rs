//! Boundary tags: the in-pool representation of a single block
use crate::pool::{Pool, WORD};

/// The size of a block header in bytes.
pub(crate) const HEADER_SIZE: usize = WORD;

/// The size of a block footer in bytes.
pub(crate) const FOOTER_SIZE: usize = WORD;

/// The per-block bytes not visible to the caller (header + footer).
pub const BLOCK_OVERHEAD: usize = HEADER_SIZE + FOOTER_SIZE;

/// The minimum payload size of any block in the pool.
///
/// It is large enough to hold a header, a footer, and the two free-list link
/// words, rounded up to [`ALIGNMENT`](crate::ALIGNMENT).
pub const MIN_BLOCK_SIZE: usize =
    (BLOCK_OVERHEAD + 2 * WORD + crate::ALIGNMENT - 1) & !(crate::ALIGNMENT - 1);

/// The bit of the header word indicating whether the block is a used memory
/// block or not. Sizes are multiples of `WORD`, so the bit is otherwise
/// always zero.
const SIZE_USED: usize = 1;

/// The bits of the header word indicating the block's size.
const SIZE_SIZE_MASK: usize = !(WORD - 1);

/// The offset value standing for a missing free-list link.
const NIL: usize = usize::MAX;

/// The location of `next_free` relative to the header.
const NEXT_FREE: usize = HEADER_SIZE;

/// The location of `prev_free` relative to the header.
const PREV_FREE: usize = HEADER_SIZE + WORD;

/// A handle to a block, identified by the pool offset of its header.
///
/// ```text
///            header                 payload                  footer
///   ,---------------------+----------------------------+--------------,
///   | size | used         | next_free | prev_free | ...| size         |
///   '---------------------+----------------------------+--------------'
///   ^ offset              ^ payload()                  ^ footer()
/// ```
///
/// `next_free` and `prev_free` exist only while the block is free. Once the
/// block is handed out they are ordinary payload bytes and must not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tag(usize);

impl Tag {
    #[inline]
    pub fn at(offset: usize) -> Self {
        debug_assert_eq!(offset % WORD, 0);
        Self(offset)
    }

    /// The block whose payload begins at `payload_offset`.
    #[inline]
    pub fn from_payload(payload_offset: usize) -> Option<Self> {
        payload_offset.checked_sub(HEADER_SIZE).map(Self)
    }

    #[inline]
    pub fn offset(self) -> usize {
        self.0
    }

    /// The pool offset of the first payload byte.
    #[inline]
    pub fn payload(self) -> usize {
        self.0 + HEADER_SIZE
    }

    #[inline]
    fn footer(self, pool: &Pool) -> usize {
        self.payload() + self.size(pool)
    }

    /// The offset one past this block's footer.
    #[inline]
    pub fn end(self, pool: &Pool) -> usize {
        self.footer(pool) + FOOTER_SIZE
    }

    /// Carve a free block covering `total` bytes (tags included) at `at`.
    ///
    /// Returns `None` if `total` can't hold the tags and a payload of
    /// [`MIN_BLOCK_SIZE`] bytes.
    pub fn create(pool: &mut Pool, total: usize, at: usize) -> Option<Self> {
        debug_assert_eq!(total % WORD, 0);
        if total < BLOCK_OVERHEAD + MIN_BLOCK_SIZE {
            return None;
        }

        let block = Self::at(at);
        block.init_free(pool, total - BLOCK_OVERHEAD);
        Some(block)
    }

    /// Write a fresh free block of payload size `size`: header, footer, and
    /// cleared links.
    fn init_free(self, pool: &mut Pool, size: usize) {
        pool.write(self.0, size);
        self.write_footer(pool);
        self.clear_links(pool);
    }

    #[inline]
    pub fn size(self, pool: &Pool) -> usize {
        pool.read(self.0) & SIZE_SIZE_MASK
    }

    /// Update the size, preserving the used flag. The footer follows.
    #[inline]
    pub fn set_size(self, pool: &mut Pool, size: usize) {
        debug_assert_eq!(size % WORD, 0);
        let flags = pool.read(self.0) & SIZE_USED;
        pool.write(self.0, size | flags);
        self.write_footer(pool);
    }

    #[inline]
    fn write_footer(self, pool: &mut Pool) {
        let size = self.size(pool);
        pool.write(self.footer(pool), size);
    }

    /// The size recorded in the footer. Always equal to [`Self::size`] in a
    /// consistent pool.
    #[inline]
    pub fn footer_size(self, pool: &Pool) -> usize {
        pool.read(self.footer(pool))
    }

    #[inline]
    pub fn is_used(self, pool: &Pool) -> bool {
        (pool.read(self.0) & SIZE_USED) != 0
    }

    #[inline]
    pub fn set_used(self, pool: &mut Pool, used: bool) {
        let size = self.size(pool);
        pool.write(self.0, if used { size | SIZE_USED } else { size });
    }

    #[inline]
    pub fn next_link(self, pool: &Pool) -> Option<Self> {
        decode_link(pool.read(self.0 + NEXT_FREE))
    }

    #[inline]
    pub fn prev_link(self, pool: &Pool) -> Option<Self> {
        decode_link(pool.read(self.0 + PREV_FREE))
    }

    #[inline]
    pub fn set_next_link(self, pool: &mut Pool, link: Option<Self>) {
        pool.write(self.0 + NEXT_FREE, encode_link(link));
    }

    #[inline]
    pub fn set_prev_link(self, pool: &mut Pool, link: Option<Self>) {
        pool.write(self.0 + PREV_FREE, encode_link(link));
    }

    /// Reset both links. Used when a block's payload bytes are reclaimed as
    /// link storage.
    #[inline]
    pub fn clear_links(self, pool: &mut Pool) {
        self.set_next_link(pool, None);
        self.set_prev_link(pool, None);
    }

    /// Unlink `self` from the free list it's in by joining its neighbors.
    ///
    /// This doesn't know about list heads; a block at the head of a list must
    /// be removed by the allocator instead.
    pub fn detach(self, pool: &mut Pool) {
        let next = self.next_link(pool);
        let prev = self.prev_link(pool);
        if let Some(prev) = prev {
            prev.set_next_link(pool, next);
        }
        if let Some(next) = next {
            next.set_prev_link(pool, prev);
        }
        self.clear_links(pool);
    }

    /// Get the physically following block, or `None` if `self` is the last
    /// block of the pool.
    #[inline]
    pub fn next_tag(self, pool: &Pool) -> Option<Self> {
        let end = self.end(pool);
        if end < pool.len() {
            Some(Self(end))
        } else {
            None
        }
    }

    /// Get the physically preceding block by reading its footer, or `None` if
    /// `self` is the first block of the pool.
    #[inline]
    pub fn prev_tag(self, pool: &Pool) -> Option<Self> {
        let prev_footer = self.0.checked_sub(FOOTER_SIZE)?;
        let prev_size = pool.read(prev_footer);
        prev_footer
            .checked_sub(prev_size)?
            .checked_sub(HEADER_SIZE)
            .map(Self)
    }

    /// Truncate `self` to `size` bytes and turn the remainder into a new free
    /// block, which is returned.
    ///
    /// Returns `None` (and leaves `self` alone) if the remainder could not
    /// hold a block of at least [`MIN_BLOCK_SIZE`] bytes. The used flag of
    /// `self` is preserved.
    pub fn split(self, pool: &mut Pool, size: usize) -> Option<Self> {
        debug_assert_eq!(size % WORD, 0);
        let old_size = self.size(pool);
        let remaining = old_size
            .checked_sub(size)?
            .checked_sub(BLOCK_OVERHEAD)
            .filter(|&x| x >= MIN_BLOCK_SIZE)?;

        self.set_size(pool, size);

        let rest = Self(self.end(pool));
        rest.init_free(pool, remaining);
        Some(rest)
    }

    /// Absorb the physically following block `next` into `self`.
    ///
    /// Does nothing and returns `false` if `next` is `None` or used.
    /// `next` must already be out of every free list; its links are reset
    /// nonetheless.
    pub fn merge(self, pool: &mut Pool, next: Option<Self>) -> bool {
        let next = match next {
            Some(next) if !next.is_used(pool) => next,
            _ => return false,
        };
        debug_assert_eq!(Some(next), self.next_tag(pool));

        next.detach(pool);

        let size = self.size(pool) + next.size(pool) + BLOCK_OVERHEAD;
        self.set_size(pool, size);
        true
    }
}

#[inline]
fn decode_link(raw: usize) -> Option<Tag> {
    if raw == NIL {
        None
    } else {
        Some(Tag(raw))
    }
}

#[inline]
fn encode_link(link: Option<Tag>) -> usize {
    link.map_or(NIL, Tag::offset)
}
