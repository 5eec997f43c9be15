//! Thread-local directory: the state every heap created on one OS thread
//! shares. Modeled on mimalloc's `types.rs` (`Tld`, `OsTld`); the `OsTld`
//! mmap-hint fields mimalloc tracks (`mmap_next_probable`, a
//! pooled-allocator fast path) are dropped since this crate's `os.rs`
//! doesn't do hinted mmap.

use crate::segment::SegmentsTld;
use crate::stats::Stats;

pub struct Tld {
    /// The one heap per thread that owns this `Tld`; never deleted except
    /// through thread teardown.
    pub heap_backing: *mut crate::heap::Heap,
    pub segments: SegmentsTld,
    pub stats: Stats,
}

impl Tld {
    pub fn new() -> Box<Tld> {
        Box::new(Tld {
            heap_backing: core::ptr::null_mut(),
            segments: SegmentsTld::new(),
            stats: Stats::default(),
        })
    }
}
