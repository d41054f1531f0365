use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStatsSnapshot {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub joins: u64,
    pub network_fetches: u64,
    pub failures: u64,
    pub cancellations: u64,
    pub color_derivations: u64,
    pub disk_write_errors: u64,
}

#[derive(Debug, Default)]
pub struct FetchStats {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    joins: AtomicU64,
    network_fetches: AtomicU64,
    failures: AtomicU64,
    cancellations: AtomicU64,
    color_derivations: AtomicU64,
    disk_write_errors: AtomicU64,
}

impl FetchStats {
    pub fn on_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_disk_hit(&self) {
        self.disk_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the join count including this one.
    pub fn on_join(&self) -> u64 {
        self.joins.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the fetch count including this one.
    pub fn on_network_fetch(&self) -> u64 {
        self.network_fetches.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn on_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_cancel(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_color_derived(&self) {
        self.color_derivations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_disk_write_error(&self) {
        self.disk_write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FetchStatsSnapshot {
        FetchStatsSnapshot {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            joins: self.joins.load(Ordering::Relaxed),
            network_fetches: self.network_fetches.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            color_derivations: self.color_derivations.load(Ordering::Relaxed),
            disk_write_errors: self.disk_write_errors.load(Ordering::Relaxed),
        }
    }
}
