//! The owned memory region the allocator carves blocks out of
use alloc::{boxed::Box, vec::Vec};
use core::{fmt, ptr::NonNull};

use crate::ALIGNMENT;

/// The size of one pool word. Every tag field occupies exactly one word.
pub(crate) const WORD: usize = ALIGNMENT;

/// A fixed-size byte region, addressed by byte offsets.
///
/// The region is allocated as `u64` words so that offset `0` (and therefore
/// every multiple of [`WORD`]) is 8-byte aligned. Tag fields are read and
/// written through the raw base pointer only; no reference to the buffer is
/// ever created, so payload pointers handed out to callers stay valid while
/// the allocator keeps mutating headers elsewhere in the region.
pub(crate) struct Pool {
    base: NonNull<u64>,
    words: usize,
}

// Safety: `Pool` exclusively owns its buffer, and every mutation goes through
//         `&mut self`.
unsafe impl Send for Pool {}
unsafe impl Sync for Pool {}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("base", &self.base)
            .field("len", &self.len())
            .finish()
    }
}

impl Pool {
    /// Allocate a zero-filled region of `size` bytes rounded down to [`WORD`].
    ///
    /// If the region can't be allocated, the pool is empty.
    pub fn new(size: usize) -> Self {
        let mut buffer = Vec::new();
        if buffer.try_reserve_exact(size / WORD).is_ok() {
            buffer.resize(size / WORD, 0u64);
        } else {
            log::warn!("pool: failed to allocate {} bytes", size);
        }
        let buffer: Box<[u64]> = buffer.into_boxed_slice();
        let words = buffer.len();
        let raw: *mut [u64] = Box::into_raw(buffer);
        // Safety: `Box::into_raw` never returns null, even for an empty slice
        let base = unsafe { NonNull::new_unchecked(raw as *mut u64) };
        Self { base, words }
    }

    /// The length of the region in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.words * WORD
    }

    #[inline]
    fn word_ptr(&self, offset: usize) -> *mut usize {
        assert!(
            offset % WORD == 0 && offset < self.len(),
            "pool offset {} is out of bounds or misaligned",
            offset
        );
        // Safety: `offset` is in bounds, checked above
        unsafe { self.base.as_ptr().cast::<u8>().add(offset).cast::<usize>() }
    }

    /// Read the word at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is not a word boundary inside the region.
    #[inline]
    pub fn read(&self, offset: usize) -> usize {
        // Safety: `word_ptr` returns an in-bounds, aligned pointer, and the
        //         buffer was fully initialized at construction
        unsafe { self.word_ptr(offset).read() }
    }

    /// Write the word at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is not a word boundary inside the region.
    #[inline]
    pub fn write(&mut self, offset: usize, value: usize) {
        // Safety: `word_ptr` returns an in-bounds, aligned pointer
        unsafe { self.word_ptr(offset).write(value) }
    }

    /// Get a pointer to the byte at `offset`.
    #[inline]
    pub fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset <= self.len());
        // Safety: `offset` is within (or one past the end of) the buffer,
        //         which starts at a non-null address
        unsafe { NonNull::new_unchecked(self.base.as_ptr().cast::<u8>().add(offset)) }
    }

    /// Convert a pointer into the region back to an offset. Returns `None` if
    /// the pointer lies outside the region.
    #[inline]
    pub fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let start = self.base.as_ptr() as usize;
        let offset = (ptr.as_ptr() as usize).checked_sub(start)?;
        if offset < self.len() {
            Some(offset)
        } else {
            None
        }
    }

    /// Copy `len` bytes from offset `src` to offset `dst`. The ranges may
    /// overlap.
    ///
    /// # Panics
    ///
    /// Panics if either range exceeds the region.
    pub fn copy(&mut self, src: usize, dst: usize, len: usize) {
        assert!(src.checked_add(len).map_or(false, |end| end <= self.len()));
        assert!(dst.checked_add(len).map_or(false, |end| end <= self.len()));
        let base = self.base.as_ptr().cast::<u8>();
        // Safety: both ranges were checked to be within the buffer
        unsafe { core::ptr::copy(base.add(src), base.add(dst), len) };
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        let raw = core::ptr::slice_from_raw_parts_mut(self.base.as_ptr(), self.words);
        // Safety: `raw` is exactly what `Box::into_raw` returned in `new`
        drop(unsafe { Box::from_raw(raw) });
    }
}
