//! Heap-management core: heaps, page queues, collection, abandonment and
//! reclamation, absorption, destroy/delete, block/area visitation, and
//! ownership queries. The fast allocate/free path, size-class binning, and
//! segment/page internals are external collaborators this crate only
//! specifies the interface to (see `constants::bin`, `segment`, `page`).

pub mod abandon;
pub mod absorb;
pub mod block;
pub mod collector;
pub mod constants;
pub mod destroy;
pub mod heap;
pub mod init;
pub mod options;
pub mod os;
pub mod page;
pub mod page_queue;
pub mod random;
pub mod segment;
pub mod stats;
pub mod tld;
pub mod visitor;

use core::ptr::NonNull;

use heap::Heap;

/// Returns the calling thread's current default heap, initializing the
/// thread on first use.
pub fn get_default() -> *mut Heap {
    init::get_default()
}

/// Returns the calling thread's backing heap, initializing the thread on
/// first use.
pub fn get_backing() -> *mut Heap {
    init::get_backing()
}

/// Creates a user heap sharing the calling thread's backing `tld`. Never
/// actually fails in this substrate (heap-object allocation goes through
/// the Rust global allocator rather than this crate's own OS provider),
/// but keeps the `Option` return so callers don't need to change if a
/// future substrate can fail here.
pub fn new() -> Option<*mut Heap> {
    let backing = unsafe { &mut *get_backing() };
    Some(Box::into_raw(Heap::new_user_heap(backing)))
}

/// Installs `h` as the calling thread's default heap, returning the
/// previous default.
pub fn set_default(h: *mut Heap) -> *mut Heap {
    init::set_default(h)
}

/// Runs the Collector on `h`.
pub fn collect(h: *mut Heap, force: bool) {
    let heap = unsafe { &mut *h };
    let mode = if force {
        collector::CollectMode::Force
    } else {
        collector::CollectMode::Normal
    };
    collector::collect(heap, mode, None);
}

/// Collects the calling thread's default heap.
pub fn collect_all(force: bool) {
    collect(get_default(), force);
}

/// Destroys a heap, leaking any live blocks it still owns.
///
/// # Safety
/// `h` must have been produced by [`new`], must satisfy `no_reclaim`
/// (true for every heap `new` returns), and must not be used again by the
/// caller after this call.
pub unsafe fn destroy(h: *mut Heap) {
    unsafe {
        destroy::destroy(Box::from_raw(h));
    }
}

/// Deletes a heap, preserving any live blocks by absorbing them into
/// the backing heap (or the abandoned-heap registry).
///
/// # Safety
/// `h` must have been produced by [`new`] or be the thread's backing heap,
/// and must not be used again by the caller after this call.
pub unsafe fn delete(h: *mut Heap) {
    unsafe {
        destroy::delete(Box::from_raw(h));
    }
}

/// Whether `p` belongs to `h`.
///
/// # Safety
/// `h` must point at a live heap.
pub unsafe fn contains_block(h: *const Heap, p: *const u8) -> bool {
    unsafe { &*h }.contains_block(p)
}

/// Stricter ownership check than [`contains_block`]: `p` must also be
/// pointer-aligned and lie within a page's block range.
///
/// # Safety
/// `h` must point at a live heap.
pub unsafe fn check_owned(h: *const Heap, p: *const u8) -> bool {
    unsafe { &*h }.check_owned(p)
}

/// Walks every area of `h`, and optionally every live block within each
/// area.
///
/// # Safety
/// `h` must point at a live heap.
pub unsafe fn visit_blocks(
    h: *const Heap,
    visit_blocks_flag: bool,
    cb: impl FnMut(*mut Heap, &visitor::HeapArea, Option<NonNull<u8>>) -> bool,
) -> bool {
    visitor::visit_blocks(unsafe { &*h }, visit_blocks_flag, cb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_heap_is_owned_by_backing_tld() {
        let h = new().expect("heap creation never fails in this substrate");
        unsafe {
            assert!((*h).no_reclaim);
            delete(h);
        }
    }

    #[test]
    fn deleting_the_default_heap_resets_default_to_backing() {
        let backing = get_backing();
        let h = new().expect("heap creation never fails in this substrate");
        let previous = set_default(h);
        assert_eq!(get_default(), h);
        unsafe {
            delete(h);
        }
        // without the reset, this would return the now-dangling `h`.
        assert_eq!(get_default(), backing);
        set_default(previous);
    }
}
