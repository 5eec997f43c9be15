//! Thread and process lifecycle. Modeled on mimalloc's `init.rs`
//! (`_mi_heap_default`, `mi_heap_get_backing`, `mi_heap_set_default`,
//! `_mi_process_init`, `_mi_thread_init`, `_mi_thread_done`); thread
//! identity is read portably via `std::thread::current().id()` instead of
//! per-platform inline-asm TLS register reads (see DESIGN.md, Open
//! Questions).

use core::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::heap::Heap;
use crate::tld::Tld;

static PROCESS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Runs once per process, the first time any thread touches the heap
/// layer. Warms up the segment layer's process-wide cookie so its first
/// derivation isn't attributed to whichever thread happens to allocate
/// first.
pub fn process_init() {
    if !PROCESS_INITIALIZED.swap(true, Ordering::AcqRel) {
        let _ = crate::segment::process_cookie();
        if crate::options::OPTIONS.verbose() {
            log::debug!("heap core process init");
        }
    }
}

struct ThreadState {
    /// Owns this thread's `Tld`; the backing heap (reached through
    /// `tld.heap_backing`) is the only other thing allowed to reference it.
    #[allow(dead_code)]
    tld: *mut Tld,
    backing: *mut Heap,
    default: Cell<*mut Heap>,
}

impl Drop for ThreadState {
    fn drop(&mut self) {
        if crate::options::OPTIONS.verbose() {
            log::debug!("thread teardown: running collect_abandon on the backing heap");
        }
        let backing = unsafe { Box::from_raw(self.backing) };
        unsafe {
            crate::abandon::collect_abandon(backing);
        }
    }
}

thread_local! {
    static STATE: std::cell::RefCell<Option<ThreadState>> = const { std::cell::RefCell::new(None) };
}

fn thread_seed() -> u64 {
    // A thread-private address plus the thread id gives every thread an
    // independent seed without needing a process-wide RNG lock.
    let probe = 0u8;
    let addr = &probe as *const u8 as u64;
    addr ^ thread_id()
}

fn ensure_initialized() {
    process_init();
    STATE.with(|state| {
        let mut state = state.borrow_mut();
        if state.is_some() {
            return;
        }
        let tld = Box::into_raw(Tld::new());
        let backing = Box::into_raw(Heap::new_backing(thread_id(), tld, thread_seed()));
        unsafe {
            (*tld).heap_backing = backing;
        }
        *state = Some(ThreadState {
            tld,
            backing,
            default: Cell::new(backing),
        });
    });
}

/// Portable stand-in for a raw thread-id read: an opaque but stable
/// identity for the calling thread, derived from
/// `std::thread::current().id()`.
pub fn thread_id() -> u64 {
    use core::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}

/// Returns this thread's default heap, initializing the thread on first
/// use.
pub fn get_default() -> *mut Heap {
    ensure_initialized();
    STATE.with(|state| state.borrow().as_ref().expect("just initialized").default.get())
}

/// Returns this thread's backing heap, initializing the thread on first
/// use.
pub fn get_backing() -> *mut Heap {
    ensure_initialized();
    STATE.with(|state| state.borrow().as_ref().expect("just initialized").backing)
}

/// Installs `heap` as this thread's default heap, returning the previous
/// default.
pub fn set_default(heap: *mut Heap) -> *mut Heap {
    ensure_initialized();
    STATE.with(|state| {
        let state = state.borrow();
        let slot = &state.as_ref().expect("just initialized").default;
        slot.replace(heap)
    })
}

/// If this thread's current default is `heap`, resets it back to the
/// backing heap. Called by the heap-object release path (`delete`/
/// `destroy`) before the heap's storage is freed, matching mimalloc's
/// `mi_heap_free` (`_mi_heap_set_default_direct(heap->tld->heap_backing)`)
/// — otherwise a thread that `set_default`s a user heap and then releases
/// it is left with a dangling default pointer.
///
/// A no-op if this thread was never initialized (the heap being released
/// belongs to some other, still-initialized thread) or if its `STATE` has
/// already been torn down.
pub fn reset_default_if(heap: *mut Heap) {
    STATE.with(|state| {
        if let Some(state) = state.borrow().as_ref() {
            if state.default.get() == heap {
                state.default.set(state.backing);
            }
        }
    });
}
