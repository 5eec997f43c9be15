//! The Collector. Drains deferred work, frees empty pages, optionally
//! releases caches. Modeled on mimalloc's `mi_heap_collect_ex`
//! (`original_source/heap.c`), generalized to the heap type in this crate.

use core::sync::atomic::Ordering;

use crate::block;
use crate::heap::Heap;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum CollectMode {
    Normal,
    Force,
    Abandon,
}

/// Hook a caller wires up to flush whatever deferred-free state lives
/// outside this crate. A no-op default satisfies the contract when there
/// is none.
pub type DeferredFreeFn = fn(force: bool);

fn default_deferred_free(_force: bool) {}

/// Run the Collector over `heap` in `mode`. Foreign-free integration must
/// run after deferred callbacks (which may themselves free) and before
/// retired-page collection (which decides a page is dead from the current
/// used-count).
pub fn collect(heap: &mut Heap, mode: CollectMode, deferred_free: Option<DeferredFreeFn>) {
    let deferred_free = deferred_free.unwrap_or(default_deferred_free);
    deferred_free(mode > CollectMode::Normal);

    crate::abandon::try_reclaim_abandoned(heap, mode == CollectMode::Force);

    drain_thread_delayed_free(heap);

    free_retired_pages(heap);

    if mode >= CollectMode::Force {
        crate::segment::thread_collect(unsafe { &(*heap.tld).segments });
    }
    // OS-level region cache release on the main thread has no counterpart
    // substrate in this crate's `os.rs`: there is no global region cache
    // to release, so it's omitted rather than faked.
}

/// Decode each block in `heap.thread_delayed_free` with the heap's keys,
/// push it to its page's local free list, and decrement that page's
/// used-count.
fn drain_thread_delayed_free(heap: &mut Heap) {
    let head = heap.thread_delayed_free.swap(core::ptr::null_mut(), Ordering::AcqRel);
    if head.is_null() {
        return;
    }
    let (key0, key1) = (heap.key[0], heap.key[1]);
    let mut cur = core::ptr::NonNull::new(head);
    while let Some(block) = cur {
        let encoded_next = unsafe { block.as_ref().next };
        let next = unsafe { block::decode_next2(key0, key1, encoded_next) };
        let page = crate::segment::resolve(block.as_ptr() as *const u8);
        if let Some(mut page) = page {
            let page = unsafe { page.as_mut() };
            page.push_local_free(block);
            page.used -= 1;
        }
        cur = next;
    }
}

/// Pages that have become empty are returned to the segment layer. This
/// substrate has no grace-period tracking, so "empty" is immediate: any
/// page with `used == 0` is retired right away.
fn free_retired_pages(heap: &mut Heap) {
    for pq in heap.pages.iter_mut() {
        let mut cur = pq.first;
        while !cur.is_null() {
            let next = unsafe { (*cur).next };
            let page_ref = unsafe { &mut *cur };
            page_ref.free_collect();
            if page_ref.all_free() {
                unlink(pq, cur);
                let owned = unsafe { Box::from_raw(cur) };
                heap.page_count.fetch_sub(1, Ordering::Relaxed);
                unsafe {
                    crate::segment::free_page(owned, &(*heap.tld).stats);
                }
            }
            cur = next;
        }
    }
}

fn unlink(pq: &mut crate::page_queue::PageQueue, page: *mut crate::page::Page) {
    unsafe {
        let prev = (*page).prev;
        let next = (*page).next;
        if !prev.is_null() {
            (*prev).next = next;
        } else {
            pq.first = next;
        }
        if !next.is_null() {
            (*next).prev = prev;
        } else {
            pq.last = prev;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tld::Tld;

    #[test]
    fn collect_normal_on_empty_heap_is_noop() {
        // `collect` always touches the process-wide abandoned list via
        // `try_reclaim_abandoned`; serialize with abandon.rs's tests.
        let _guard = crate::abandon::tests::TEST_LOCK.lock().unwrap();
        let mut tld = Tld::new();
        let mut heap = Heap::new_backing(1, tld.as_mut() as *mut Tld, 42);
        collect(&mut heap, CollectMode::Normal, None);
        assert_eq!(heap.page_count(), 0);
    }

    #[test]
    fn collect_retires_empty_pages() {
        let _guard = crate::abandon::tests::TEST_LOCK.lock().unwrap();
        let mut tld = Tld::new();
        let tld_ptr = tld.as_mut() as *mut Tld;
        let mut heap = Heap::new_backing(1, tld_ptr, 7);
        let bin = crate::constants::bin(32);
        let page = crate::segment::alloc_page(&mut *heap as *mut Heap, 32, 4, unsafe { &(*tld_ptr).stats })
            .expect("alloc should succeed");
        unsafe {
            heap.pages[bin].push_back(Box::into_raw(page));
        }
        heap.page_count.fetch_add(1, Ordering::Relaxed);

        collect(&mut heap, CollectMode::Force, None);
        assert_eq!(heap.page_count(), 0);
        assert!(heap.pages[bin].is_empty());
    }
}
