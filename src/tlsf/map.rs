//! Size class mapper. The core implementation of `classify` and the search
//! entry point of `Tlsf::allocate`.
use super::{FLLEN, SLI, SLLEN};
use crate::{block::MIN_BLOCK_SIZE, int::BinInteger};

// Every classifiable size has at least `SLI` bits below its most significant
// one, so the second-level index never needs a left shift.
const _: () = assert!(MIN_BLOCK_SIZE >= 1 << SLI);
const _: () = assert!(SLLEN == 1 << SLI);
const _: () = assert!(FLLEN as u32 >= usize::BITS);

/// Find the free block list to store a free block of the specified size.
///
/// Sizes below [`MIN_BLOCK_SIZE`] are all mapped to `(0, 0)`.
#[inline]
pub fn map_floor(size: usize) -> (usize, usize) {
    if size < MIN_BLOCK_SIZE {
        return (0, 0);
    }

    let fl = size.highest_set_bit();
    let sl = if fl < SLI {
        0
    } else {
        (size >> (fl - SLI)) & (SLLEN - 1)
    };

    (fl as usize, sl)
}

/// Find the first free block list whose every item is at least as large
/// as the specified size. Returns `None` if the size is beyond the largest
/// class.
#[inline]
pub fn map_ceil(size: usize) -> Option<(usize, usize)> {
    debug_assert!(size >= MIN_BLOCK_SIZE);
    let (mut fl, mut sl) = map_floor(size);

    // round up unless `size` is exactly the list's lower bound
    if size != list_min_size(fl, sl) {
        sl += 1;

        // if sl == SLLEN { fl += 1; sl = 0; }
        fl += sl >> SLI;
        sl &= SLLEN - 1;
    }

    // `fl` must be in a valid range
    if fl >= FLLEN || fl as u32 >= usize::BITS {
        return None;
    }

    Some((fl, sl))
}

/// The smallest size mapped to the list `(fl, sl)` by [`map_floor`].
#[inline]
pub fn list_min_size(fl: usize, sl: usize) -> usize {
    let fl = fl as u32;
    if fl < SLI {
        1 << fl
    } else {
        (1 << fl) | (sl << (fl - SLI))
    }
}
