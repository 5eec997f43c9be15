//! Abandon & Reclaim Registry: a process-wide lock-free list of heaps
//! orphaned by terminated threads. Modeled on mimalloc's
//! `mi_heap_prepend_abandoned`/`_mi_heap_collect_abandon`/
//! `_mi_heap_try_reclaim_abandoned` (`original_source/heap.c`).

use core::ptr::NonNull;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::collector::{self, CollectMode};
use crate::heap::Heap;

static ABANDONED: AtomicPtr<Heap> = AtomicPtr::new(core::ptr::null_mut());

/// Accepts a non-empty chain `first -> ... -> null` linked by
/// `abandoned_next` and splices it onto the global list.
fn prepend_abandoned(first: NonNull<Heap>) {
    if ABANDONED
        .compare_exchange_weak(
            core::ptr::null_mut(),
            first.as_ptr(),
            Ordering::AcqRel,
            Ordering::Relaxed,
        )
        .is_ok()
    {
        return;
    }

    let mut last = first;
    loop {
        let next = unsafe { last.as_ref() }.abandoned_next.load(Ordering::Relaxed);
        match NonNull::new(next) {
            Some(n) => last = n,
            None => break,
        }
    }

    loop {
        let head = ABANDONED.load(Ordering::Relaxed);
        unsafe { last.as_ref() }.abandoned_next.store(head, Ordering::Relaxed);
        if ABANDONED
            .compare_exchange_weak(head, first.as_ptr(), Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            break;
        }
    }
}

/// Run the Collector in `ABANDON` mode, finalize stats, and either free the
/// heap outright (nothing left to reclaim) or publish it to the global
/// abandoned list.
///
/// # Safety
/// `heap` must not be referenced again by the caller after this call: it
/// is either freed or handed off to the registry.
pub unsafe fn collect_abandon(mut heap: Box<Heap>) {
    collector::collect(&mut heap, CollectMode::Abandon, None);
    unsafe {
        crate::stats::stats_done(&(*heap.tld).stats, crate::stats::process_stats());
    }

    if heap.page_count() == 0 {
        // This is the backing-heap teardown path: unlike a user heap's
        // ordinary release, the backing heap is the sole owner of its
        // `tld`, so both go together here rather than through
        // `heap::free_heap_object` (which asserts the opposite).
        let tld_ptr = heap.tld;
        drop(heap);
        unsafe {
            drop(Box::from_raw(tld_ptr));
        }
        return;
    }

    heap.abandoned_next.store(core::ptr::null_mut(), Ordering::Relaxed);
    let ptr = NonNull::new(Box::into_raw(heap)).expect("box pointer is never null");
    prepend_abandoned(ptr);
}

/// Pulls abandoned heaps into `heap` via the Absorber. A no-op for heaps
/// marked `no_reclaim` (user heaps the caller may `destroy`).
pub fn try_reclaim_abandoned(heap: &mut Heap, all: bool) {
    if heap.no_reclaim {
        return;
    }
    if ABANDONED.load(Ordering::Relaxed).is_null() {
        return;
    }

    let taken = ABANDONED.swap(core::ptr::null_mut(), Ordering::AcqRel);
    let Some(mut reclaim) = NonNull::new(taken) else {
        return;
    };

    if !all {
        let rest = unsafe { reclaim.as_ref() }.abandoned_next.load(Ordering::Relaxed);
        unsafe {
            reclaim.as_mut().abandoned_next.store(core::ptr::null_mut(), Ordering::Relaxed);
        }
        if let Some(rest) = NonNull::new(rest) {
            prepend_abandoned(rest);
        }
        reclaim_one(heap, reclaim);
        return;
    }

    let mut cur = Some(reclaim);
    while let Some(r) = cur {
        let next = unsafe { r.as_ref() }.abandoned_next.load(Ordering::Relaxed);
        reclaim_one(heap, r);
        cur = NonNull::new(next);
    }
}

/// Absorb one reclaimed heap `r` into `heap` and release `r`'s storage.
fn reclaim_one(heap: &mut Heap, r: NonNull<Heap>) {
    let mut r = unsafe { Box::from_raw(r.as_ptr()) };
    crate::absorb::absorb(heap, &mut r);
    let donor_tld = r.tld;
    crate::segment::segments_absorb(unsafe { &(*heap.tld).segments }, unsafe { &(*donor_tld).segments });
    // `r` was a backing heap (only backing heaps are ever abandoned) and
    // so was the sole owner of `donor_tld`; its stats were already merged
    // into the process total back when it was abandoned.
    drop(r);
    unsafe {
        drop(Box::from_raw(donor_tld));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::tld::Tld;
    use std::sync::Mutex;

    // The abandoned list is a single process-wide static; serialize tests
    // that touch it (directly, or indirectly via `collector::collect`) so
    // they don't observe each other's heaps.
    pub(crate) static TEST_LOCK: Mutex<()> = Mutex::new(());

    fn drain_registry() {
        ABANDONED.store(core::ptr::null_mut(), Ordering::Relaxed);
    }

    #[test]
    fn abandon_then_reclaim_roundtrips_page_count() {
        let _guard = TEST_LOCK.lock().unwrap();
        drain_registry();

        // `collect_abandon`/reclaim eventually take ownership of the
        // backing heap's `tld` themselves (see the comments on
        // `collect_abandon` and `reclaim_one`), so it must be leaked into
        // a raw pointer here rather than kept as an owning `Box` binding.
        let donor_tld_ptr = Box::into_raw(Tld::new());
        let mut donor = Heap::new_backing(1, donor_tld_ptr, 11);
        let bin = crate::constants::bin(32);
        let page = crate::segment::alloc_page(&mut *donor as *mut Heap, 32, 4, unsafe { &(*donor_tld_ptr).stats })
            .expect("alloc should succeed");
        unsafe {
            donor.pages[bin].push_back(Box::into_raw(page));
        }
        donor.page_count.fetch_add(1, Ordering::Relaxed);

        unsafe {
            collect_abandon(donor);
        }
        assert!(!ABANDONED.load(Ordering::Relaxed).is_null());

        let mut receiver_tld = Tld::new();
        let mut receiver = Heap::new_backing(2, receiver_tld.as_mut() as *mut Tld, 22);
        try_reclaim_abandoned(&mut receiver, true);

        assert_eq!(receiver.page_count(), 1);
        assert!(ABANDONED.load(Ordering::Relaxed).is_null());
    }

    #[test]
    fn reclaim_on_empty_registry_is_noop() {
        let _guard = TEST_LOCK.lock().unwrap();
        drain_registry();
        let mut tld = Tld::new();
        let mut heap = Heap::new_backing(1, tld.as_mut() as *mut Tld, 5);
        try_reclaim_abandoned(&mut heap, true);
        assert_eq!(heap.page_count(), 0);
    }
}
