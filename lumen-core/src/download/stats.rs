use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadCacheStatsSnapshot {
    pub resolved_hits: u64,
    pub catalog_hits: u64,
    pub downloads_started: u64,
    pub coalesced_waits: u64,
    pub failures: u64,
    pub evictions: u64,
    pub evicted_bytes: u64,
}

#[derive(Debug, Default)]
pub(crate) struct DownloadCacheStats {
    resolved_hits: AtomicU64,
    catalog_hits: AtomicU64,
    downloads_started: AtomicU64,
    coalesced_waits: AtomicU64,
    failures: AtomicU64,
    evictions: AtomicU64,
    evicted_bytes: AtomicU64,
}

impl DownloadCacheStats {
    pub fn on_resolved_hit(&self) {
        self.resolved_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_catalog_hit(&self) {
        self.catalog_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_download_started(&self) {
        self.downloads_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_coalesced_wait(&self) {
        self.coalesced_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_evicted(&self, entries: u64, bytes: u64) {
        self.evictions.fetch_add(entries, Ordering::Relaxed);
        self.evicted_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DownloadCacheStatsSnapshot {
        DownloadCacheStatsSnapshot {
            resolved_hits: self.resolved_hits.load(Ordering::Relaxed),
            catalog_hits: self.catalog_hits.load(Ordering::Relaxed),
            downloads_started: self.downloads_started.load(Ordering::Relaxed),
            coalesced_waits: self.coalesced_waits.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            evicted_bytes: self.evicted_bytes.load(Ordering::Relaxed),
        }
    }
}
