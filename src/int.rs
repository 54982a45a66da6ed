//! Bit manipulation on the unsigned integers used as TLSF bitmaps
use core::{fmt, ops};

/// An unsigned integer usable as a bitmap.
///
/// The bit-scan methods share one contract: when there is no set bit to
/// report, they return [`Self::BITS`] instead of an unspecified value. For
/// the first-level bitmap (`u64`) that sentinel is `64`.
pub trait BinInteger:
    Copy
    + Eq
    + fmt::Debug
    + ops::BitAnd<Output = Self>
    + ops::BitOr<Output = Self>
    + ops::Not<Output = Self>
    + ops::Shl<u32, Output = Self>
    + ops::Shr<u32, Output = Self>
    + Sized
    + 'static
{
    const ZERO: Self;
    const BITS: u32;

    fn set_bit(&mut self, i: u32);
    fn clear_bit(&mut self, i: u32);
    fn get_bit(&self, i: u32) -> bool;

    /// Get the index of the most significant set bit, or `Self::BITS` if
    /// `self` is zero.
    fn highest_set_bit(&self) -> u32;

    /// Get the index of the least significant set bit, or `Self::BITS` if
    /// `self` is zero.
    fn lowest_set_bit(&self) -> u32;

    /// Get the index of the least significant set bit in `start..BITS`, or
    /// `Self::BITS` if there is no such bit.
    fn bit_scan_forward(&self, start: u32) -> u32;
}

macro_rules! impl_binary_integer {
    ($($ty:ty),*) => {$(
        impl BinInteger for $ty {
            const ZERO: Self = 0;
            const BITS: u32 = <$ty>::BITS;

            #[inline]
            fn set_bit(&mut self, i: u32) {
                debug_assert!(i < Self::BITS);
                *self |= 1 << i;
            }

            #[inline]
            fn clear_bit(&mut self, i: u32) {
                debug_assert!(i < Self::BITS);
                *self &= !(1 << i);
            }

            #[inline]
            fn get_bit(&self, i: u32) -> bool {
                debug_assert!(i < Self::BITS);
                (*self & (1 << i)) != 0
            }

            #[inline]
            fn highest_set_bit(&self) -> u32 {
                if *self == 0 {
                    Self::BITS
                } else {
                    Self::BITS - 1 - self.leading_zeros()
                }
            }

            #[inline]
            fn lowest_set_bit(&self) -> u32 {
                // `trailing_zeros` already yields `BITS` for zero
                self.trailing_zeros()
            }

            #[inline]
            fn bit_scan_forward(&self, start: u32) -> u32 {
                if start >= Self::BITS {
                    Self::BITS
                } else {
                    (*self & (!0 << start)).lowest_set_bit()
                }
            }
        }
    )*};
}

impl_binary_integer!(u8, u16, u32, u64, u128, usize);
