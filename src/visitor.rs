//! The Visitor: an orthogonal read path over `heap -> area -> block`.
//! Modeled on mimalloc's `mi_heap_area_visit_blocks`/`mi_heap_visit_areas`
//! (`original_source/heap.c`).

use core::ptr::NonNull;

use crate::heap::Heap;
use crate::page::Page;

/// A projection of one page.
pub struct HeapArea {
    pub reserved_bytes: usize,
    pub committed_bytes: usize,
    pub used_block_count: usize,
    pub block_size: usize,
    pub first_block_pointer: NonNull<u8>,
}

/// Walk every area in `heap`, invoking `visit` once per area with
/// `block == None`, and (if `visit_blocks_flag`) once more per live block
/// in that area with `block == Some(_)`. Short-circuits on the first
/// `false` return.
pub fn visit_blocks(
    heap: &Heap,
    visit_blocks_flag: bool,
    mut visit: impl FnMut(*mut Heap, &HeapArea, Option<NonNull<u8>>) -> bool,
) -> bool {
    let heap_ptr = heap as *const Heap as *mut Heap;
    heap.visit_pages(|page_ptr| {
        let page = unsafe { &mut *page_ptr };
        page.free_collect();

        let area = HeapArea {
            reserved_bytes: page.reserved_bytes,
            committed_bytes: page.committed_bytes,
            used_block_count: page.used,
            block_size: page.block_size,
            first_block_pointer: page.start,
        };

        if !visit(heap_ptr, &area, None) {
            return false;
        }
        if visit_blocks_flag {
            return visit_blocks_in_area(page, heap_ptr, &area, &mut visit);
        }
        true
    })
}

/// Block walk within one area.
fn visit_blocks_in_area(
    page: &mut Page,
    heap_ptr: *mut Heap,
    area: &HeapArea,
    visit: &mut impl FnMut(*mut Heap, &HeapArea, Option<NonNull<u8>>) -> bool,
) -> bool {
    if page.used == 0 {
        return true;
    }
    if page.capacity == 1 {
        return visit(heap_ptr, area, Some(page.start));
    }

    let capacity = page.capacity as usize;
    const BITS_PER_WORD: usize = usize::BITS as usize;
    let word_count = (capacity + BITS_PER_WORD - 1) / BITS_PER_WORD;
    let mut bitmap = vec![0usize; word_count];

    let mut cur = page.free_list;
    while let Some(block) = cur {
        let offset = block.as_ptr() as usize - page.start.as_ptr() as usize;
        debug_assert_eq!(offset % page.block_size, 0);
        let index = offset / page.block_size;
        bitmap[index / BITS_PER_WORD] |= 1usize << (index % BITS_PER_WORD);
        cur = unsafe { crate::block::decode_next1(page.cookie, block.as_ref().next) };
    }

    let mut observed_used = 0usize;
    let mut i = 0usize;
    while i < capacity {
        let word = bitmap[i / BITS_PER_WORD];
        if word == usize::MAX {
            i += BITS_PER_WORD;
            continue;
        }
        let bit = (word >> (i % BITS_PER_WORD)) & 1;
        if bit == 0 {
            observed_used += 1;
            let addr = unsafe { page.start.as_ptr().add(i * page.block_size) };
            let block = NonNull::new(addr).expect("computed block address is never null");
            if !visit(heap_ptr, area, Some(block)) {
                return false;
            }
        }
        i += 1;
    }
    debug_assert_eq!(observed_used, page.used);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tld::Tld;
    use core::sync::atomic::Ordering;

    #[test]
    fn visits_every_used_block_and_every_area() {
        let mut tld = Tld::new();
        let tld_ptr = tld.as_mut() as *mut Tld;
        let mut heap = Heap::new_backing(1, tld_ptr, 9);

        let bin = crate::constants::bin(32);
        let mut page = crate::segment::alloc_page(&mut *heap as *mut Heap, 32, 4, unsafe { &(*tld_ptr).stats })
            .expect("alloc should succeed");
        // mark 2 of the 4 blocks as used by popping them off the free list.
        page.pop_local_free().unwrap();
        page.pop_local_free().unwrap();
        page.used = 2;
        let page_ptr = Box::into_raw(page);
        unsafe {
            heap.pages[bin].push_back(page_ptr);
        }
        heap.page_count.fetch_add(1, Ordering::Relaxed);

        let mut areas_seen = 0usize;
        let mut blocks_seen = 0usize;
        visit_blocks(&heap, true, |_h, area, block| {
            match block {
                None => {
                    areas_seen += 1;
                    assert_eq!(area.used_block_count, 2);
                }
                Some(_) => blocks_seen += 1,
            }
            true
        });

        assert_eq!(areas_seen, 1);
        assert_eq!(blocks_seen, 2);

        unsafe {
            crate::segment::free_page(Box::from_raw(page_ptr), &(*tld_ptr).stats);
        }
    }

    #[test]
    fn short_circuits_on_false_return() {
        let mut tld = Tld::new();
        let tld_ptr = tld.as_mut() as *mut Tld;
        let mut heap = Heap::new_backing(1, tld_ptr, 1);
        let bin = crate::constants::bin(32);
        let page = crate::segment::alloc_page(&mut *heap as *mut Heap, 32, 4, unsafe { &(*tld_ptr).stats })
            .expect("alloc should succeed");
        let page_ptr = Box::into_raw(page);
        unsafe {
            heap.pages[bin].push_back(page_ptr);
        }
        heap.page_count.fetch_add(1, Ordering::Relaxed);

        let mut calls = 0usize;
        let completed = visit_blocks(&heap, true, |_h, _area, _block| {
            calls += 1;
            false
        });
        assert!(!completed);
        assert_eq!(calls, 1);

        unsafe {
            crate::segment::free_page(Box::from_raw(page_ptr), &(*tld_ptr).stats);
        }
    }
}
