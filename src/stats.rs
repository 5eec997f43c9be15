//! Lock-free statistics counters, shared by every heap on a thread through
//! its `Tld`. Modeled on mimalloc's `stats.rs`/`types.rs`: the
//! `stat_update` peak-tracking logic is the same compare-and-swap idea, now
//! using `fetch_max` now that it's stable.

use core::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;

#[derive(Default)]
pub struct StatCount {
    pub allocated: AtomicI64,
    pub freed: AtomicI64,
    pub peak: AtomicI64,
    pub current: AtomicI64,
}

#[derive(Default)]
pub struct StatCounter {
    pub total: AtomicI64,
    pub count: AtomicI64,
}

#[derive(Default)]
pub struct Stats {
    pub segments: StatCount,
    pub pages: StatCount,
    pub reserved: StatCount,
    pub committed: StatCount,
    pub reset: StatCount,
    pub segments_abandoned: StatCount,
    pub pages_abandoned: StatCount,
    pub threads: StatCount,
    pub searches: StatCounter,
}

pub fn stat_increase(stat: &StatCount, amount: i64) {
    stat_update(stat, amount);
}

pub fn stat_decrease(stat: &StatCount, amount: i64) {
    stat_update(stat, -amount);
}

pub fn stat_update(stat: &StatCount, amount: i64) {
    if amount == 0 {
        return;
    }
    let current = stat.current.fetch_add(amount, Ordering::Relaxed) + amount;
    stat.peak.fetch_max(current, Ordering::Relaxed);
    if amount > 0 {
        stat.allocated.fetch_add(amount, Ordering::Relaxed);
    } else {
        stat.freed.fetch_add(-amount, Ordering::Relaxed);
    }
}

pub fn stat_counter_increase(counter: &StatCounter, amount: i64) {
    counter.total.fetch_add(amount, Ordering::Relaxed);
    counter.count.fetch_add(1, Ordering::Relaxed);
}

/// Merge a thread's about-to-vanish stats into the process-wide total.
/// mimalloc calls this `_mi_stats_done`. Folding is a plain move: a
/// thread's stats are only ever touched by that thread up to this point,
/// so no atomics are needed on the read side.
pub fn stats_done(thread_stats: &Stats, into: &Stats) {
    merge_count(&thread_stats.segments, &into.segments);
    merge_count(&thread_stats.pages, &into.pages);
    merge_count(&thread_stats.reserved, &into.reserved);
    merge_count(&thread_stats.committed, &into.committed);
    merge_count(&thread_stats.reset, &into.reset);
    merge_count(&thread_stats.segments_abandoned, &into.segments_abandoned);
    merge_count(&thread_stats.pages_abandoned, &into.pages_abandoned);
    merge_count(&thread_stats.threads, &into.threads);
    stat_counter_increase(
        &into.searches,
        thread_stats.searches.total.load(Ordering::Relaxed),
    );
}

static PROCESS_STATS: OnceLock<Stats> = OnceLock::new();

/// Process-wide totals, the `into` side every terminating thread's stats
/// are folded into via [`stats_done`].
pub fn process_stats() -> &'static Stats {
    PROCESS_STATS.get_or_init(Stats::default)
}

fn merge_count(from: &StatCount, into: &StatCount) {
    let allocated = from.allocated.load(Ordering::Relaxed);
    let freed = from.freed.load(Ordering::Relaxed);
    if allocated != 0 {
        into.allocated.fetch_add(allocated, Ordering::Relaxed);
    }
    if freed != 0 {
        into.freed.fetch_add(freed, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_peak_and_current() {
        let s = StatCount::default();
        stat_increase(&s, 10);
        stat_increase(&s, 5);
        stat_decrease(&s, 3);
        assert_eq!(s.current.load(Ordering::Relaxed), 12);
        assert_eq!(s.peak.load(Ordering::Relaxed), 15);
        assert_eq!(s.allocated.load(Ordering::Relaxed), 15);
        assert_eq!(s.freed.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn done_merges_without_double_counting() {
        let thread_stats = Stats::default();
        stat_increase(&thread_stats.pages, 4);
        let main_stats = Stats::default();
        stats_done(&thread_stats, &main_stats);
        assert_eq!(main_stats.pages.allocated.load(Ordering::Relaxed), 4);
    }
}
