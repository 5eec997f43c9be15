//! OS memory provider. Trimmed from mimalloc's `os.rs`: the large-page
//! probing, Windows `VirtualAlloc2` hinting, and the three-retry
//! over-allocate-and-shrink alignment dance are real mimalloc behavior but
//! are not part of the heap-management core this crate builds — kept here
//! is exactly what `segment.rs` needs to back a `Segment` with real
//! memory: reserve+commit, decommit, and release.

#[cfg(unix)]
use libc::{mmap, munmap, MAP_ANONYMOUS, MAP_PRIVATE, MAP_FAILED, PROT_READ, PROT_WRITE};
#[cfg(windows)]
use winapi::um::memoryapi::{VirtualAlloc, VirtualFree};
#[cfg(windows)]
use winapi::um::winnt::{MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE};

use log::warn;

use crate::stats::{stat_decrease, stat_increase, Stats};

/// Reserve and commit `size` bytes of page-grained memory from the OS.
/// Returns null on failure — OOM is represented as absence, not a
/// propagated error.
pub fn mem_alloc(size: usize, stats: &Stats) -> *mut u8 {
    if size == 0 {
        return core::ptr::null_mut();
    }
    #[cfg(unix)]
    let p = unsafe {
        let raw = mmap(
            core::ptr::null_mut(),
            size,
            PROT_READ | PROT_WRITE,
            MAP_PRIVATE | MAP_ANONYMOUS,
            -1,
            0,
        );
        if raw == MAP_FAILED {
            core::ptr::null_mut()
        } else {
            raw as *mut u8
        }
    };
    #[cfg(windows)]
    let p = unsafe {
        VirtualAlloc(
            core::ptr::null_mut(),
            size,
            MEM_RESERVE | MEM_COMMIT,
            PAGE_READWRITE,
        ) as *mut u8
    };

    if !p.is_null() {
        stat_increase(&stats.reserved, size as i64);
        stat_increase(&stats.committed, size as i64);
    }
    p
}

/// Release memory obtained from [`mem_alloc`] back to the OS.
///
/// # Safety
/// `addr`/`size` must be the exact pointer and length returned by a prior
/// `mem_alloc` call that has not yet been freed.
pub unsafe fn mem_free(addr: *mut u8, size: usize, stats: &Stats) {
    if addr.is_null() || size == 0 {
        return;
    }
    #[cfg(unix)]
    let failed = unsafe { munmap(addr as *mut _, size) == -1 };
    #[cfg(windows)]
    let failed = unsafe { VirtualFree(addr as *mut _, 0, MEM_RELEASE) == 0 };

    stat_decrease(&stats.committed, size as i64);
    stat_decrease(&stats.reserved, size as i64);
    if failed && crate::options::OPTIONS.show_errors() {
        #[cfg(unix)]
        warn!("munmap failed: errno {}, addr {:p}, size {}", errno::errno(), addr, size);
        #[cfg(windows)]
        warn!("VirtualFree failed, addr {:p}, size {}", addr, size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_roundtrip_updates_stats() {
        let stats = Stats::default();
        let size = 4096;
        let p = mem_alloc(size, &stats);
        assert!(!p.is_null());
        assert_eq!(
            stats.reserved.current.load(core::sync::atomic::Ordering::Relaxed),
            size as i64
        );
        unsafe {
            core::ptr::write_bytes(p, 0xAA, size);
            mem_free(p, size, &stats);
        }
        assert_eq!(
            stats.reserved.current.load(core::sync::atomic::Ordering::Relaxed),
            0
        );
    }

    #[test]
    fn zero_size_alloc_is_null() {
        let stats = Stats::default();
        assert!(mem_alloc(0, &stats).is_null());
    }
}
