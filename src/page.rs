//! The page contract the heap layer consumes. Page/segment internals are
//! an out-of-scope collaborator — this is the thin, concrete substrate
//! that lets the heap core in this crate actually run and be tested end
//! to end, grounded in mimalloc's `Page`/`ThreadFree` (`types.rs`) and in
//! `_mi_page_free_collect`/`mi_page_all_free` (`internal.rs`,
//! `original_source/heap.c`).
//!
//! Simplification: mimalloc additionally packs a 2-bit delayed-free
//! coordination state into the same atomic word as the page's thread-free
//! list head, used by the malloc/free fast path to decide whether a
//! foreign free should also touch `heap.thread_delayed_free`. That fast
//! path is out of scope here, so `ThreadFreeList` below is a plain
//! lock-free stack without the delay-state bits; draining it is still
//! exactly the operation the Collector and Visitor need.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::block::{self, Block};
use crate::heap::Heap;

/// A lock-free Treiber stack of blocks freed by threads other than the
/// page's owner. Chain links are XOR-encoded with the page's cookie, same
/// as the local free list.
pub struct ThreadFreeList {
    head: AtomicUsize,
    cookie: usize,
}

impl ThreadFreeList {
    pub fn new(cookie: usize) -> Self {
        ThreadFreeList {
            head: AtomicUsize::new(block::encode_next1(cookie, None)),
            cookie,
        }
    }

    /// Push a block onto the inbox. Safe to call from any thread
    /// concurrently; this is the only page operation foreign threads
    /// perform.
    pub fn push(&self, mut block: NonNull<Block>) {
        loop {
            let encoded_head = self.head.load(Ordering::Acquire);
            unsafe {
                block.as_mut().next = encoded_head;
            }
            // block.next above stores the raw encoded head directly: it is
            // itself already the cookie-masked representation of whatever
            // the previous top pointed at, so chaining it forward needs no
            // further encoding step, only the new top word does.
            let new_head = block::encode_next1(self.cookie, Some(block));
            if self
                .head
                .compare_exchange_weak(encoded_head, new_head, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Atomically take the whole inbox, leaving it empty. Returns the
    /// decoded chain head, still linked via cookie-encoded `next` fields.
    pub fn take_all(&self) -> Option<NonNull<Block>> {
        let empty = block::encode_next1(self.cookie, None);
        let taken = self.head.swap(empty, Ordering::AcqRel);
        unsafe { block::decode_next1(self.cookie, taken) }
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Relaxed) == block::encode_next1(self.cookie, None)
    }
}

/// A slab of equal-size blocks, owned by exactly one heap at any instant.
/// Intrusive `next`/`prev` make it a doubly-linked queue node.
pub struct Page {
    /// Owning-heap back-reference. The only field crossing the heap
    /// boundary without owner-only synchronization: foreign
    /// threads read it (to route a free to the right inbox) while only the
    /// owning thread (via absorption) writes it, release-on-write /
    /// acquire-on-read.
    pub heap: AtomicPtr<Heap>,
    pub next: *mut Page,
    pub prev: *mut Page,

    pub block_size: usize,
    pub capacity: u16,
    pub reserved: u16,
    pub used: usize,

    /// Internal free list: blocks ready to serve the next allocation.
    pub free_list: Option<NonNull<Block>>,
    pub thread_free: ThreadFreeList,

    pub cookie: usize,
    pub start: NonNull<u8>,
    pub reserved_bytes: usize,
    pub committed_bytes: usize,
}

// SAFETY: a `Page`'s `heap` field is the only part read without the owning
// thread's cooperation, and that access is mediated by the atomic pointer
// above; every other field is touched only by the current owning thread
// (enforced by the heap layer, not by the type system, matching the
// teacher's raw-pointer design).
unsafe impl Send for Page {}
unsafe impl Sync for Page {}

impl Page {
    pub fn new(heap: *mut Heap, block_size: usize, capacity: u16, cookie: usize, storage: NonNull<u8>, bytes: usize) -> Box<Page> {
        let mut page = Box::new(Page {
            heap: AtomicPtr::new(heap),
            next: core::ptr::null_mut(),
            prev: core::ptr::null_mut(),
            block_size,
            capacity,
            reserved: capacity,
            used: 0,
            free_list: None,
            thread_free: ThreadFreeList::new(cookie),
            cookie,
            start: storage,
            reserved_bytes: bytes,
            committed_bytes: bytes,
        });
        // carve the backing storage into `capacity` equal slots and chain
        // them onto the local free list, last block first so the list ends
        // up in ascending address order (matches `_mi_page_extend_free`'s
        // sequential layout).
        for i in (0..capacity as usize).rev() {
            let addr = unsafe { storage.as_ptr().add(i * block_size) } as *mut Block;
            let block = NonNull::new(addr).expect("page storage is non-null by construction");
            page.push_local_free(block);
        }
        page
    }

    #[inline]
    pub fn heap(&self) -> *mut Heap {
        self.heap.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_heap(&self, heap: *mut Heap) {
        self.heap.store(heap, Ordering::Release);
    }

    /// True iff every block in the page is free, including ones only
    /// pending in the foreign-thread inbox.
    #[inline]
    pub fn all_free(&self) -> bool {
        self.used == 0
    }

    #[inline]
    pub fn has_free(&self) -> bool {
        self.free_list.is_some() || !self.thread_free.is_empty()
    }

    /// Drain the thread-free inbox into the local free list and decrement
    /// `used` accordingly. Invoked by the Collector before retiring a page
    /// and by the Visitor before an area walk, mirroring
    /// `_mi_page_free_collect`.
    pub fn free_collect(&mut self) {
        let Some(head) = self.thread_free.take_all() else {
            return;
        };
        let mut count = 1usize;
        let mut tail = head;
        loop {
            let next = unsafe { block::decode_next1(self.cookie, tail.as_ref().next) };
            match next {
                Some(n) => {
                    tail = n;
                    count += 1;
                }
                None => break,
            }
        }
        // splice the drained chain onto the front of the local free list
        unsafe {
            tail.as_mut().next = block::encode_next1(self.cookie, self.free_list);
        }
        self.free_list = Some(head);
        self.used -= count;
    }

    /// Push a freshly-freed block onto the local free list (owning thread
    /// only).
    pub fn push_local_free(&mut self, mut block: NonNull<Block>) {
        unsafe {
            block.as_mut().next = block::encode_next1(self.cookie, self.free_list);
        }
        self.free_list = Some(block);
    }

    pub fn pop_local_free(&mut self) -> Option<NonNull<Block>> {
        let head = self.free_list?;
        let next = unsafe { block::decode_next1(self.cookie, head.as_ref().next) };
        self.free_list = next;
        Some(head)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use core::alloc::Layout;

    /// Build a standalone page (no real heap/segment backing) purely for
    /// unit tests that only exercise page-local bookkeeping.
    pub fn make_test_page(block_size: usize, capacity: u16) -> Box<Page> {
        let bytes = block_size * capacity as usize;
        let layout = Layout::from_size_align(bytes.max(1), 16).unwrap();
        let storage = unsafe { NonNull::new(std::alloc::alloc(layout)).unwrap() };
        Page::new(core::ptr::null_mut(), block_size, capacity, 0xABCD, storage, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::make_test_page;

    #[test]
    fn fresh_page_is_all_free_and_has_free_blocks() {
        let page = make_test_page(32, 8);
        assert!(page.all_free());
        assert!(page.has_free());
    }

    #[test]
    fn local_free_push_pop_roundtrips() {
        let mut page = make_test_page(32, 0);
        let mut storage = [0u8; 32];
        let block = core::ptr::NonNull::new(storage.as_mut_ptr() as *mut crate::block::Block).unwrap();
        assert!(!page.has_free());
        page.push_local_free(block);
        assert!(page.has_free());
        let popped = page.pop_local_free();
        assert_eq!(popped, Some(block));
        assert!(!page.has_free());
    }
}
