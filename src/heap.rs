//! Heap lifecycle: construction, reset, and release of the heap object
//! itself, plus ownership queries over a heap's live blocks. Modeled on
//! mimalloc's `Heap` (`types.rs`) and `init.rs` (`heap_init`/`heap_done`),
//! and on `original_source/heap.c` (`mi_heap_new`, `mi_heap_reset_pages`,
//! `mi_heap_free`, `mi_heap_of_block`, `mi_heap_contains_block`,
//! `mi_heap_check_owned`).

use core::ptr::NonNull;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::block::Block;
use crate::constants::BIN_COUNT;
use crate::page_queue::PageQueue;
use crate::random::RandomStream;
use crate::tld::Tld;

pub struct Heap {
    pub tld: *mut Tld,
    pub pages_free_direct: Vec<*mut crate::page::Page>,
    /// Medium-size extension of `pages_free_direct`, present only when the
    /// `medium-direct` feature is enabled (empty otherwise).
    pub pages_free_medium: Vec<*mut crate::page::Page>,
    pub pages: Vec<PageQueue>,
    pub thread_delayed_free: AtomicPtr<Block>,
    pub thread_id: u64,
    pub cookie: usize,
    pub key: [usize; 2],
    pub random: RandomStream,
    pub page_count: AtomicUsize,
    /// `true` if this heap must never absorb abandoned heaps — required
    /// for user heaps the caller may `destroy`.
    pub no_reclaim: bool,
    /// Forward link used only while this heap sits on the global
    /// abandoned list.
    pub abandoned_next: AtomicPtr<Heap>,
}

fn empty_pages() -> Vec<PageQueue> {
    (0..BIN_COUNT).map(PageQueue::empty).collect()
}

impl Heap {
    /// Build the canonical empty heap template a fresh heap is copied from.
    /// `tld`/`random`/`cookie`/`key`/`no_reclaim` are stamped in afterward
    /// by the caller, matching `mi_heap_new`'s `memcpy(heap, &_mi_heap_empty,
    /// ...)` followed by per-field setup.
    fn empty_template(tld: *mut Tld) -> Heap {
        let pages_free_medium = if crate::options::medium_direct_enabled() {
            vec![core::ptr::null_mut(); crate::constants::PAGES_FREE_MEDIUM_COUNT]
        } else {
            Vec::new()
        };
        Heap {
            tld,
            pages_free_direct: vec![core::ptr::null_mut(); crate::constants::PAGES_FREE_DIRECT_COUNT],
            pages_free_medium,
            pages: empty_pages(),
            thread_delayed_free: AtomicPtr::new(core::ptr::null_mut()),
            thread_id: 0,
            cookie: 0,
            key: [0, 0],
            random: RandomStream::init(0),
            page_count: AtomicUsize::new(0),
            no_reclaim: false,
            abandoned_next: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    /// Construct the one backing heap for a newly initialized thread: the
    /// same template as a user heap, but with `no_reclaim == false` and no
    /// parent to split a random stream from — it seeds its own, the way
    /// `process_init`/`heap_init` seed `heap_main` in mimalloc's `init.rs`.
    pub fn new_backing(thread_id: u64, tld: *mut Tld, seed: u64) -> Box<Heap> {
        let mut heap = Self::empty_template(tld);
        heap.thread_id = thread_id;
        let mut random = RandomStream::init(seed);
        heap.cookie = random.next() as usize | 1;
        heap.key = [random.next() as usize, random.next() as usize];
        heap.random = random;
        heap.no_reclaim = false;
        Box::new(heap)
    }

    /// Allocate a user heap sharing the backing heap's `tld`, with its own
    /// split random stream, cookie, and keys, and `no_reclaim` forced true.
    pub fn new_user_heap(backing: &mut Heap) -> Box<Heap> {
        let mut heap = Self::empty_template(backing.tld);
        heap.thread_id = backing.thread_id;
        let mut random = backing.random.split();
        heap.cookie = random.next() as usize | 1;
        heap.key = [random.next() as usize, random.next() as usize];
        heap.random = random;
        heap.no_reclaim = true;
        Box::new(heap)
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        self.page_count.load(Ordering::Relaxed)
    }

    /// Zero the page-queue array and the direct-lookup table, clear the
    /// delayed-free inbox, zero the page count. Leaves `tld`, `random`,
    /// `key`, `cookie`, `no_reclaim` alone.
    pub fn reset_pages(&mut self) {
        for slot in self.pages_free_direct.iter_mut() {
            *slot = core::ptr::null_mut();
        }
        for slot in self.pages_free_medium.iter_mut() {
            *slot = core::ptr::null_mut();
        }
        self.pages = empty_pages();
        self.thread_delayed_free.store(core::ptr::null_mut(), Ordering::Relaxed);
        self.page_count.store(0, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_backing(&self) -> bool {
        unsafe { (*self.tld).heap_backing == self as *const Heap as *mut Heap }
    }

    /// Walk every page in every bin, invoking `visit` with `false` to
    /// short-circuit. Shared by the Collector's page-check pass and the
    /// Visitor's area walk.
    pub fn visit_pages(&self, mut visit: impl FnMut(*mut crate::page::Page) -> bool) -> bool {
        if self.page_count() == 0 {
            return true;
        }
        for pq in &self.pages {
            let mut page = pq.first;
            while !page.is_null() {
                let next = unsafe { (*page).next };
                debug_assert!(unsafe { (*page).heap() } == self as *const Heap as *mut Heap);
                if !visit(page) {
                    return false;
                }
                page = next;
            }
        }
        true
    }

    /// Resolve the owning heap of an arbitrary pointer via the segment
    /// layer's cookie-checked lookup.
    pub fn heap_of_block(p: *const u8) -> Option<*mut Heap> {
        if p.is_null() {
            return None;
        }
        let page = crate::segment::resolve(p)?;
        Some(unsafe { page.as_ref().heap() })
    }

    /// Whether `p` resolves back to this heap.
    pub fn contains_block(&self, p: *const u8) -> bool {
        Heap::heap_of_block(p) == Some(self as *const Heap as *mut Heap)
    }

    /// Stricter than `contains_block` — `p` must lie within some page's
    /// block range, and must itself be pointer-aligned.
    pub fn check_owned(&self, p: *const u8) -> bool {
        if (p as usize) % core::mem::size_of::<usize>() != 0 {
            return false;
        }
        let mut found = false;
        self.visit_pages(|page| {
            let page = unsafe { &*page };
            let start = page.start.as_ptr() as usize;
            let end = start + page.capacity as usize * page.block_size;
            let addr = p as usize;
            if addr >= start && addr < end {
                found = true;
                false // stop: found it
            } else {
                true
            }
        });
        found
    }
}

/// Release of the heap *object* itself (`mi_heap_free` in mimalloc's
/// vocabulary). Never called on a backing heap: thread teardown frees
/// those via `collect_abandon`/the abandoned-list path instead. If `heap`
/// is the calling thread's current default, the default is reset to the
/// backing heap first (spec.md §4.2; `mi_heap_free`'s
/// `_mi_heap_set_default_direct(heap->tld->heap_backing)`) so no thread is
/// left with a dangling default pointer.
///
/// # Safety
/// `heap` must not be the thread's backing heap, must have `page_count ==
/// 0`, and must not be referenced again afterward.
pub unsafe fn free_heap_object(heap: NonNull<Heap>) {
    debug_assert!(!unsafe { heap.as_ref() }.is_backing());
    debug_assert_eq!(unsafe { heap.as_ref() }.page_count(), 0);
    crate::init::reset_default_if(heap.as_ptr());
    drop(unsafe { Box::from_raw(heap.as_ptr()) });
}
