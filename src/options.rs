//! Compile-time and process-wide runtime configuration.
//!
//! mimalloc's `lib.rs` declares `mod options;` but never ships the file.
//! This module is that file: compile-time toggles become Cargo features
//! (checked with `cfg!`), and the small set of options mimalloc treats as
//! runtime-checkable (`option_is_enabled`) become `AtomicBool`s set once at
//! process init and read with `Relaxed` ordering everywhere else, the same
//! way stats counters are read in `stats.rs`.

use core::sync::atomic::{AtomicBool, Ordering};

/// True when free-list pointers are XOR-encoded with the owning heap's
/// keys. Backed by the `secure` Cargo feature; corresponds to mimalloc's
/// `cfg(MI_SECURE)`.
#[inline]
pub const fn secure_enabled() -> bool {
    cfg!(feature = "secure")
}

/// True when the small-object direct table additionally serves medium
/// requests (`pages_free_medium`). Backed by the `medium-direct` Cargo
/// feature.
#[inline]
pub const fn medium_direct_enabled() -> bool {
    cfg!(feature = "medium-direct")
}

/// Named runtime options, checked the way mimalloc's `option_is_enabled`
/// checks them: a process-wide flag, set at most once during
/// `init::process_init`, read thereafter with relaxed loads.
pub struct Options {
    pub verbose: AtomicBool,
    pub show_errors: AtomicBool,
}

impl Options {
    pub const fn new() -> Self {
        Options {
            verbose: AtomicBool::new(false),
            show_errors: AtomicBool::new(true),
        }
    }

    #[inline]
    pub fn verbose(&self) -> bool {
        self.verbose.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn show_errors(&self) -> bool {
        self.show_errors.load(Ordering::Relaxed)
    }

    pub fn set_verbose(&self, value: bool) {
        self.verbose.store(value, Ordering::Relaxed);
    }
}

pub static OPTIONS: Options = Options::new();
