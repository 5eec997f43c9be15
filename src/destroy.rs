//! Destroy vs. Delete. Modeled on mimalloc's
//! `mi_heap_destroy`/`_mi_heap_destroy_pages`/`mi_heap_delete`
//! (`original_source/heap.c`).

use core::ptr::NonNull;

use crate::heap::Heap;

/// Forcibly release every page in `heap` to the segment layer regardless
/// of used-count — any live blocks are intentionally leaked, the caller
/// asserts none remain. Falls through to
/// [`delete`] if `heap.no_reclaim` is false, since that invariant is what
/// makes leaking safe: an absorbed heap's pages could still be reachable
/// from elsewhere.
///
/// # Safety
/// `heap` must not be referenced again by the caller after this call.
pub unsafe fn destroy(heap: Box<Heap>) {
    if !heap.no_reclaim {
        unsafe { delete(heap) };
        return;
    }

    let mut heap = heap;
    let stats = unsafe { &(*heap.tld).stats };
    for pq in heap.pages.iter_mut() {
        let mut cur = pq.first;
        while !cur.is_null() {
            let next = unsafe { (*cur).next };
            // `_mi_heap_page_destroy` (heap.c:314-318): force the page's
            // used-count to 0 before release — any live blocks are being
            // leaked on purpose — and assert no foreign-thread frees are
            // still in flight against it, since `no_reclaim` only narrows
            // that window rather than closing it (spec.md §9, open
            // question on destroy racing deferred frees).
            unsafe {
                (*cur).used = 0;
            }
            debug_assert!(unsafe { (*cur).thread_free.is_empty() });
            let owned = unsafe { Box::from_raw(cur) };
            unsafe {
                crate::segment::free_page(owned, stats);
            }
            cur = next;
        }
        pq.first = core::ptr::null_mut();
        pq.last = core::ptr::null_mut();
    }
    heap.reset_pages();
    unsafe {
        crate::heap::free_heap_object(NonNull::new(Box::into_raw(heap)).expect("box pointer is never null"));
    }
}

/// Safe teardown: live allocations survive. If `heap` is not the backing
/// heap, absorb it into `heap.tld.heap_backing` so the backing heap
/// inherits its pages, then free the heap object. If `heap` is the
/// backing heap, hand it to the Abandon & Reclaim Registry instead.
///
/// # Safety
/// `heap` must not be referenced again by the caller after this call.
pub unsafe fn delete(heap: Box<Heap>) {
    if heap.is_backing() {
        unsafe {
            crate::abandon::collect_abandon(heap);
        }
        return;
    }

    let mut heap = heap;
    let backing = unsafe { &mut *(*heap.tld).heap_backing };
    crate::absorb::absorb(backing, &mut heap);
    unsafe {
        crate::heap::free_heap_object(NonNull::new(Box::into_raw(heap)).expect("box pointer is never null"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tld::Tld;
    use core::sync::atomic::Ordering;

    #[test]
    fn destroy_leaks_live_blocks_without_panicking() {
        let mut tld = Tld::new();
        let tld_ptr = tld.as_mut() as *mut Tld;
        let backing = Heap::new_backing(1, tld_ptr, 3);
        unsafe {
            (*tld_ptr).heap_backing = Box::into_raw(backing);
        }
        let mut user = unsafe { Heap::new_user_heap(&mut *(*tld_ptr).heap_backing) };
        assert!(user.no_reclaim);

        let bin = crate::constants::bin(32);
        let page = crate::segment::alloc_page(&mut *user as *mut Heap, 32, 4, unsafe { &(*tld_ptr).stats })
            .expect("alloc should succeed");
        let mut page = page;
        // simulate one live (used) block so destroy must leak rather than
        // assert on it.
        page.used = 1;
        unsafe {
            user.pages[bin].push_back(Box::into_raw(page));
        }
        user.page_count.fetch_add(1, Ordering::Relaxed);

        unsafe {
            destroy(user);
        }

        unsafe {
            drop(Box::from_raw((*tld_ptr).heap_backing));
        }
    }

    #[test]
    fn delete_user_heap_absorbs_into_backing() {
        let mut tld = Tld::new();
        let tld_ptr = tld.as_mut() as *mut Tld;
        let backing = Heap::new_backing(1, tld_ptr, 3);
        unsafe {
            (*tld_ptr).heap_backing = Box::into_raw(backing);
        }
        let mut user = unsafe { Heap::new_user_heap(&mut *(*tld_ptr).heap_backing) };

        let bin = crate::constants::bin(32);
        let page = crate::segment::alloc_page(&mut *user as *mut Heap, 32, 4, unsafe { &(*tld_ptr).stats })
            .expect("alloc should succeed");
        unsafe {
            user.pages[bin].push_back(Box::into_raw(page));
        }
        user.page_count.fetch_add(1, Ordering::Relaxed);

        unsafe {
            delete(user);
        }

        unsafe {
            assert_eq!((*(*tld_ptr).heap_backing).page_count(), 1);
            drop(Box::from_raw((*tld_ptr).heap_backing));
        }
    }
}
