//! Tuning constants for segment/page/bin sizing.
//!
//! Modeled on mimalloc's `types.rs`; trimmed to what the heap layer itself
//! consumes (segment/OS-level constants live next to the modules that use
//! them).

use core::mem::size_of;

#[cfg(target_pointer_width = "64")]
pub const INTPTR_SHIFT: usize = 3;
#[cfg(target_pointer_width = "32")]
pub const INTPTR_SHIFT: usize = 2;

pub const INTPTR_SIZE: usize = 1 << INTPTR_SHIFT;

// Sizes below are for 64-bit; halved automatically via the shift on 32-bit.
pub const SMALL_PAGE_SHIFT: usize = 13 + INTPTR_SHIFT; // 64kb
pub const LARGE_PAGE_SHIFT: usize = 6 + SMALL_PAGE_SHIFT; // 4mb
pub const SEGMENT_SHIFT: usize = LARGE_PAGE_SHIFT; // 4mb

pub const SEGMENT_SIZE: usize = 1 << SEGMENT_SHIFT;
pub const SEGMENT_MASK: usize = SEGMENT_SIZE - 1;

pub const SMALL_PAGE_SIZE: usize = 1 << SMALL_PAGE_SHIFT;
pub const LARGE_PAGE_SIZE: usize = 1 << LARGE_PAGE_SHIFT;

pub const SMALL_PAGES_PER_SEGMENT: usize = SEGMENT_SIZE / SMALL_PAGE_SIZE;

pub const LARGE_SIZE_MAX: usize = LARGE_PAGE_SIZE / 8; // 512kb on 64-bit
pub const SMALL_WSIZE_MAX: usize = 128;
pub const SMALL_SIZE_MAX: usize = SMALL_WSIZE_MAX * size_of::<*mut ()>();

/// Maximum number of size classes, spaced in ~16.7% increments.
pub const BIN_HUGE: usize = 64;
/// Sentinel bin for pages that have become full.
pub const BIN_FULL: usize = BIN_HUGE + 1;

/// Minimal alignment required of every returned block (SSE registers etc.).
pub const MAX_ALIGN_SIZE: usize = 16;

/// Number of page-queue bins a heap carries, `0..=BIN_FULL`.
pub const BIN_COUNT: usize = BIN_FULL + 1;

/// Entries in the small-object direct lookup table (`pages_free_direct`).
pub const PAGES_FREE_DIRECT_COUNT: usize = SMALL_WSIZE_MAX + 2;

/// Largest word size the medium-object direct table covers, if the
/// `medium-direct` feature extends `pages_free_direct`'s fast path to
/// medium-size requests.
pub const MEDIUM_WSIZE_MAX: usize = 1024;
/// Entries in the medium-object direct lookup table (`pages_free_medium`).
pub const PAGES_FREE_MEDIUM_COUNT: usize = MEDIUM_WSIZE_MAX + 1;

/// Round a word count up from a byte size.
#[inline]
pub fn wsize_from_size(size: usize) -> usize {
    debug_assert!(size <= usize::MAX - size_of::<usize>());
    (size + size_of::<usize>() - 1) / size_of::<usize>()
}

/// Map a block size to its size-class bin. Stands in for the external
/// size-class binning collaborator, with the same exponential spacing
/// mimalloc uses; callers outside tests should supply their own binning
/// function when wiring this crate into a full allocator.
#[inline]
pub fn bin(size: usize) -> usize {
    if size == 0 {
        return 0;
    }
    let wsize = wsize_from_size(size);
    if wsize <= 1 {
        return 1;
    }
    if wsize > SMALL_WSIZE_MAX {
        return BIN_HUGE;
    }
    // 8 bins per power-of-two octave above the first few exact sizes,
    // mirroring mimalloc's `_mi_bin` shape closely enough for direct lookup
    // and queue placement to behave consistently.
    let bit = usize::BITS - (wsize - 1).leading_zeros();
    let bin = if bit <= 3 {
        wsize
    } else {
        let shift = bit - 3;
        let base = (bit as usize - 3) * 4 + 3;
        base + ((wsize - 1) >> shift)
    };
    bin.min(BIN_HUGE)
}
