//! The machine word ("cell") the abstract machine computes on.
//!
//! A cell is unsigned; instructions that need signed semantics reinterpret
//! the same bit pattern as two's complement through [`Cell::to_signed`] /
//! [`Cell::from_signed`]. The interpreter never relies on implicit
//! promotions: every wrap, every signed view, every shift is an explicit
//! trait method, so the same bytecode produces the same results at all
//! three cell widths.

use std::fmt::Debug;
use std::ops::{BitAnd, BitOr, BitXor, Not};

use byteorder::{ByteOrder, LittleEndian};

/// An AMX machine word: `u16`, `u32` or `u64`.
pub trait Cell:
    Copy
    + Eq
    + Debug
    + BitAnd<Output = Self>
    + BitOr<Output = Self>
    + BitXor<Output = Self>
    + Not<Output = Self>
    + Send
    + Sync
    + 'static
{
    /// Two's-complement view of the same bit pattern.
    type Signed: Copy + Eq + Ord + Debug;

    const BITS: u32;
    /// Cell size in bytes.
    const BYTES: usize;
    /// Cell size in bytes, as a cell value.
    const SIZE: Self;
    const ZERO: Self;
    const ONE: Self;
    const MAX: Self;
    /// Magic number identifying this cell width in an AMX file header.
    const FILE_MAGIC: u16;

    /// Truncating conversion.
    fn from_u64(v: u64) -> Self;
    /// Zero-extending conversion.
    fn to_u64(self) -> u64;
    /// Truncating two's-complement conversion.
    fn from_i64(v: i64) -> Self;
    /// Sign-extending conversion.
    fn to_i64(self) -> i64;

    fn to_signed(self) -> Self::Signed;
    fn from_signed(v: Self::Signed) -> Self;

    fn wrapping_add(self, rhs: Self) -> Self;
    fn wrapping_sub(self, rhs: Self) -> Self;
    fn wrapping_mul(self, rhs: Self) -> Self;
    fn wrapping_neg(self) -> Self;

    /// Logical shift left; the count is taken modulo the cell width.
    fn wrapping_shl(self, n: u32) -> Self;
    /// Logical shift right; the count is taken modulo the cell width.
    fn wrapping_shr(self, n: u32) -> Self;
    /// Arithmetic shift right on the signed view; count modulo the width.
    fn arithmetic_shr(self, n: u32) -> Self;

    /// Truncating signed division and remainder of `self / rhs`.
    ///
    /// `rhs` must be non-zero; `MIN / -1` wraps to `MIN` with remainder 0.
    fn div_rem_signed(self, rhs: Self) -> (Self, Self);

    /// Whether the sign bit is set.
    fn is_negative(self) -> bool;
    /// `self < rhs` on the signed views.
    fn lt_signed(self, rhs: Self) -> bool;
    /// `self <= rhs` on the signed views.
    fn le_signed(self, rhs: Self) -> bool;

    /// Read one cell from a little-endian byte image.
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_cell {
    ($t:ty, $s:ty, $magic:expr, $read:path) => {
        impl Cell for $t {
            type Signed = $s;

            const BITS: u32 = <$t>::BITS;
            const BYTES: usize = (<$t>::BITS / 8) as usize;
            const SIZE: Self = (<$t>::BITS / 8) as $t;
            const ZERO: Self = 0;
            const ONE: Self = 1;
            const MAX: Self = <$t>::MAX;
            const FILE_MAGIC: u16 = $magic;

            #[inline]
            fn from_u64(v: u64) -> Self {
                v as $t
            }

            #[inline]
            fn to_u64(self) -> u64 {
                self as u64
            }

            #[inline]
            fn from_i64(v: i64) -> Self {
                v as $t
            }

            #[inline]
            fn to_i64(self) -> i64 {
                self as $s as i64
            }

            #[inline]
            fn to_signed(self) -> $s {
                self as $s
            }

            #[inline]
            fn from_signed(v: $s) -> Self {
                v as $t
            }

            #[inline]
            fn wrapping_add(self, rhs: Self) -> Self {
                <$t>::wrapping_add(self, rhs)
            }

            #[inline]
            fn wrapping_sub(self, rhs: Self) -> Self {
                <$t>::wrapping_sub(self, rhs)
            }

            #[inline]
            fn wrapping_mul(self, rhs: Self) -> Self {
                <$t>::wrapping_mul(self, rhs)
            }

            #[inline]
            fn wrapping_neg(self) -> Self {
                <$t>::wrapping_neg(self)
            }

            #[inline]
            fn wrapping_shl(self, n: u32) -> Self {
                <$t>::wrapping_shl(self, n)
            }

            #[inline]
            fn wrapping_shr(self, n: u32) -> Self {
                <$t>::wrapping_shr(self, n)
            }

            #[inline]
            fn arithmetic_shr(self, n: u32) -> Self {
                (self as $s).wrapping_shr(n) as $t
            }

            #[inline]
            fn div_rem_signed(self, rhs: Self) -> (Self, Self) {
                let d = self as $s;
                let v = rhs as $s;
                (d.wrapping_div(v) as $t, d.wrapping_rem(v) as $t)
            }

            #[inline]
            fn is_negative(self) -> bool {
                (self as $s) < 0
            }

            #[inline]
            fn lt_signed(self, rhs: Self) -> bool {
                (self as $s) < (rhs as $s)
            }

            #[inline]
            fn le_signed(self, rhs: Self) -> bool {
                (self as $s) <= (rhs as $s)
            }

            #[inline]
            fn read_le(bytes: &[u8]) -> Self {
                $read(bytes)
            }
        }
    };
}

impl_cell!(u16, i16, 0xF1E2, LittleEndian::read_u16);
impl_cell!(u32, i32, 0xF1E0, LittleEndian::read_u32);
impl_cell!(u64, i64, 0xF1E1, LittleEndian::read_u64);
