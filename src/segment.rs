//! Segment layer: an out-of-scope collaborator referenced only by the
//! interface it must expose. Trimmed from mimalloc's `segment.rs`: the
//! segment cache, the small/huge/large page-kind split, and the
//! address-masked `ptr_segment` lookup are all real mimalloc behavior this
//! crate does not need to reproduce. What the heap core does need from
//! this collaborator is: hand out page-backed memory, free it back to the
//! OS, and resolve an arbitrary pointer back to the page that owns it with
//! a corruption check.
//!
//! Simplification: every page here is its own segment (what mimalloc's
//! `PageKind::PAGE_LARGE` describes — "larger blocks go into a single page
//! spanning a whole segment"); the small-page multiplexing of many pages
//! into one 4MB segment is a fragmentation optimization, not something the
//! heap-management invariants this crate upholds depend on.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{OnceLock, RwLock};

use crate::heap::Heap;
use crate::page::Page;
use crate::stats::{stat_decrease, stat_increase, Stats};

static PROCESS_COOKIE: OnceLock<usize> = OnceLock::new();

/// A process-wide random salt standing in for `heap_main.cookie`'s role in
/// `_mi_ptr_cookie`: every page's integrity cookie is derived from its own
/// address XORed with this salt, so a corrupted or foreign pointer won't
/// recompute to the cookie stored at the page header.
pub fn process_cookie() -> usize {
    *PROCESS_COOKIE.get_or_init(|| {
        let seed = &PROCESS_COOKIE as *const _ as usize;
        let mut stream = crate::random::RandomStream::init(seed as u64);
        stream.next() as usize | 1
    })
}

struct PageRange {
    start: usize,
    end: usize,
    page: NonNull<Page>,
}

// Raw pointers stored here are only ever dereferenced by the owning
// thread's own heap operations; the registry itself just maps address
// ranges to identity.
unsafe impl Send for PageRange {}
unsafe impl Sync for PageRange {}

static REGISTRY: OnceLock<RwLock<Vec<PageRange>>> = OnceLock::new();

fn registry() -> &'static RwLock<Vec<PageRange>> {
    REGISTRY.get_or_init(|| RwLock::new(Vec::new()))
}

/// Allocate OS-backed storage for a page of `capacity` blocks of
/// `block_size` bytes and register it for pointer resolution. Returns
/// `None` on OOM.
pub fn alloc_page(heap: *mut Heap, block_size: usize, capacity: u16, stats: &Stats) -> Option<Box<Page>> {
    let bytes = block_size.checked_mul(capacity as usize)?;
    if bytes == 0 {
        return None;
    }
    let raw = crate::os::mem_alloc(bytes, stats);
    let storage = NonNull::new(raw)?;
    let cookie = (storage.as_ptr() as usize) ^ process_cookie();
    let page = Page::new(heap, block_size, capacity, cookie, storage, bytes);
    stat_increase(&stats.pages, 1);

    let range = PageRange {
        start: storage.as_ptr() as usize,
        end: storage.as_ptr() as usize + bytes,
        page: NonNull::from(page.as_ref()),
    };
    registry().write().unwrap().push(range);
    Some(page)
}

/// Release a page's backing memory and remove it from the registry.
///
/// # Safety
/// `page` must have been produced by [`alloc_page`] and must not be
/// referenced (directly, or via the registry) after this call.
pub unsafe fn free_page(page: Box<Page>, stats: &Stats) {
    let start = page.start.as_ptr() as usize;
    registry().write().unwrap().retain(|r| r.start != start);
    let bytes = page.reserved_bytes;
    let storage = page.start;
    drop(page);
    unsafe {
        crate::os::mem_free(storage.as_ptr(), bytes, stats);
    }
    stat_decrease(&stats.pages, 1);
}

/// Resolve `p` to the page that owns it, verifying the integrity cookie
/// first. Returns `None` on a cookie mismatch (corruption or a foreign
/// pointer) or if `p` falls in no known page.
pub fn resolve(p: *const u8) -> Option<NonNull<Page>> {
    let addr = p as usize;
    let guard = registry().read().unwrap();
    let range = guard.iter().find(|r| addr >= r.start && addr < r.end)?;
    let page = unsafe { range.page.as_ref() };
    let expected_cookie = range.start ^ process_cookie();
    if page.cookie != expected_cookie {
        return None;
    }
    Some(range.page)
}

/// Queue of segments with free small pages, kept for API parity with
/// mimalloc's `SegmentsTld` even though this substrate allocates one page
/// per segment and has no small-page packing to track.
pub struct SegmentsTld {
    pub current_size: AtomicUsize,
    pub peak_size: AtomicUsize,
}

impl SegmentsTld {
    pub const fn new() -> Self {
        SegmentsTld {
            current_size: AtomicUsize::new(0),
            peak_size: AtomicUsize::new(0),
        }
    }

    pub fn track(&self, delta: i64) {
        if delta >= 0 {
            let new = self.current_size.fetch_add(delta as usize, Ordering::Relaxed) + delta as usize;
            self.peak_size.fetch_max(new, Ordering::Relaxed);
        } else {
            self.current_size.fetch_sub((-delta) as usize, Ordering::Relaxed);
        }
    }
}

/// Merge `from`'s segment-layer bookkeeping into `to`'s, called by
/// reclamation alongside the heap absorb.
pub fn segments_absorb(to: &SegmentsTld, from: &SegmentsTld) {
    let moved = from.current_size.swap(0, Ordering::Relaxed);
    to.track(moved as i64);
    from.peak_size.store(0, Ordering::Relaxed);
}

/// Release a thread's cached segments. This substrate holds no
/// per-thread segment cache, so it only resets the bookkeeping.
pub fn thread_collect(tld: &SegmentsTld) {
    tld.current_size.store(0, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_registers_and_resolves() {
        let stats = Stats::default();
        let page = alloc_page(core::ptr::null_mut(), 32, 4, &stats).expect("alloc should succeed");
        let p = page.start.as_ptr();
        assert!(resolve(p).is_some());
        unsafe {
            free_page(page, &stats);
        }
        assert!(resolve(p).is_none());
    }

    #[test]
    fn resolve_rejects_unknown_pointer() {
        let bogus = 0x1usize as *const u8;
        assert!(resolve(bogus).is_none());
    }
}
