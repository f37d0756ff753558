//! Fixed-width key and record encoding.
//!
//! Everything tally stores on disk is a fixed-size record: keys in run files
//! and B-tree nodes in a tree's node array. A record's encoded size may depend
//! on runtime parameters (a node's size depends on the tree degree), which is
//! what [`Record::Layout`] carries.

use std::fmt::Debug;
use std::hash::Hash;

/// A value with a fixed-size byte encoding.
pub trait Record: Sized {
    /// Runtime parameters that fix the encoded size.
    type Layout: Copy + Debug + Send + Sync + 'static;

    /// Returns the encoded size in bytes for the given layout.
    fn encoded_size(layout: &Self::Layout) -> usize;

    /// Encodes into `buf`, which is exactly `encoded_size` bytes long.
    fn encode(&self, layout: &Self::Layout, buf: &mut [u8]);

    /// Decodes from `buf`, which is exactly `encoded_size` bytes long.
    fn decode(layout: &Self::Layout, buf: &[u8]) -> Self;
}

/// A fixed-width, totally ordered key.
///
/// Keys are encoded big-endian so byte order matches numeric order.
pub trait Key: Record<Layout = ()> + Copy + Ord + Hash + Debug + Send + Sync + 'static {
    /// Width of the key universe in bits. The universe is `[0, 2^BITS)`.
    const BITS: u32;

    /// Encoded size in bytes.
    const SIZE: usize;

    /// Returns the key's position in the universe.
    fn ordinal(&self) -> u64;
}

macro_rules! impl_unsigned_key {
    ($($ty:ty),*) => {$(
        impl Record for $ty {
            type Layout = ();

            #[inline]
            fn encoded_size(_: &()) -> usize {
                std::mem::size_of::<$ty>()
            }

            #[inline]
            fn encode(&self, _: &(), buf: &mut [u8]) {
                buf.copy_from_slice(&self.to_be_bytes());
            }

            #[inline]
            fn decode(_: &(), buf: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(buf);
                <$ty>::from_be_bytes(raw)
            }
        }

        impl Key for $ty {
            const BITS: u32 = <$ty>::BITS;
            const SIZE: usize = std::mem::size_of::<$ty>();

            #[inline]
            fn ordinal(&self) -> u64 {
                *self as u64
            }
        }
    )*};
}

impl_unsigned_key!(u32, u64);
