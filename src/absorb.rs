//! The Absorber: merges one heap's pages and delayed-free inbox into
//! another's. Modeled on mimalloc's `mi_heap_absorb`
//! (`original_source/heap.c`).

use core::sync::atomic::Ordering;

use crate::block;
use crate::heap::Heap;

/// Merge `from` into `to`. No-op if `from` is empty. On return, `from` has
/// been reset via [`Heap::reset_pages`].
pub fn absorb(to: &mut Heap, from: &mut Heap) {
    if from.page_count() == 0 {
        return;
    }

    for i in 0..to.pages.len() {
        let moved = {
            // Split the borrow: `append` needs `&mut from.pages[i]` and
            // `&mut to.pages[i]` simultaneously, plus `to`'s raw address
            // to stamp into every moved page.
            let to_heap_ptr = to as *mut Heap;
            let (from_pages, to_pages) = (&mut from.pages[i], &mut to.pages[i]);
            from_pages.append(to_pages, to_heap_ptr)
        };
        if moved > 0 {
            to.page_count.fetch_add(moved, Ordering::Relaxed);
            from.page_count.fetch_sub(moved, Ordering::Relaxed);
        }
    }

    integrate_thread_delayed_free(to, from);

    from.reset_pages();
}

/// Swap `from.thread_delayed_free` to null, re-key every link from
/// `from`'s keys to `to`'s, then prepend the whole chain to
/// `to.thread_delayed_free` via CAS loop.
fn integrate_thread_delayed_free(to: &mut Heap, from: &mut Heap) {
    let raw_head = from.thread_delayed_free.swap(core::ptr::null_mut(), Ordering::AcqRel);
    let Some(head) = core::ptr::NonNull::new(raw_head) else {
        return;
    };

    let (from_key0, from_key1) = (from.key[0], from.key[1]);
    let (to_key0, to_key1) = (to.key[0], to.key[1]);

    // Decode the whole `from`-keyed chain into a flat list of nodes first.
    let mut nodes = vec![head];
    loop {
        let last = *nodes.last().expect("nodes is never empty");
        let encoded = unsafe { last.as_ref().next };
        match unsafe { block::decode_next2(from_key0, from_key1, encoded) } {
            Some(next) => nodes.push(next),
            None => break,
        }
    }

    // Re-key every internal link with `to`'s keys; the tail's link is set
    // separately below once it's known what it must point past.
    for pair in nodes.windows(2) {
        let (mut node, next) = (pair[0], pair[1]);
        unsafe {
            node.as_mut().next = block::encode_next2(to_key0, to_key1, Some(next));
        }
    }

    let mut tail = *nodes.last().expect("nodes is never empty");
    loop {
        let to_head_raw = to.thread_delayed_free.load(Ordering::Acquire);
        let to_head = core::ptr::NonNull::new(to_head_raw);
        unsafe {
            tail.as_mut().next = block::encode_next2(to_key0, to_key1, to_head);
        }
        if to
            .thread_delayed_free
            .compare_exchange_weak(to_head_raw, head.as_ptr(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tld::Tld;

    #[test]
    fn absorb_moves_pages_and_resets_source() {
        let mut to_tld = Tld::new();
        let to_tld_ptr = to_tld.as_mut() as *mut Tld;
        let mut to = Heap::new_backing(1, to_tld_ptr, 1);

        let mut from_tld = Tld::new();
        let from_tld_ptr = from_tld.as_mut() as *mut Tld;
        let mut from = Heap::new_backing(2, from_tld_ptr, 2);

        let bin = crate::constants::bin(32);
        let page = crate::segment::alloc_page(&mut *from as *mut Heap, 32, 4, unsafe { &(*from_tld_ptr).stats })
            .expect("alloc should succeed");
        let page_ptr = Box::into_raw(page);
        unsafe {
            from.pages[bin].push_back(page_ptr);
        }
        from.page_count.fetch_add(1, Ordering::Relaxed);

        absorb(&mut to, &mut from);

        assert_eq!(to.page_count(), 1);
        assert_eq!(from.page_count(), 0);
        unsafe {
            assert_eq!((*page_ptr).heap(), &mut *to as *mut Heap);
        }

        // clean up the page we leaked via Box::into_raw for the test
        unsafe {
            crate::segment::free_page(Box::from_raw(page_ptr), &(*to_tld_ptr).stats);
        }
    }
}
