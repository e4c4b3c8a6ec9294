//! URL-keyed disk cache with single-flight downloads.
//!
//! A URL is served, in order, from a small in-memory set of recently
//! resolved entries, from the SQLite catalog, or by a download. Concurrent
//! requests for one URL share a single download task; each caller holds a
//! proxy on it, and the download is canceled when the last proxy leaves.
//!
//! Files live in `root/files` as `cache*.tmp`, the catalog in
//! `root/catalog/download.db`.

mod catalog;
mod eviction;
mod fetcher;
mod stats;
mod task;

pub use fetcher::{DownloadOutcome, Downloader, HttpDownloader};
pub use stats::DownloadCacheStatsSnapshot;

use std::{
    collections::{HashMap, HashSet},
    fmt,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use lru::LruCache;
use parking_lot::Mutex;

use crate::{
    error::{CacheError, Result},
    hash::KeyHash,
    job::JobContext,
    units::ByteSize,
};
use catalog::Catalog;
use eviction::plan_evictions;
use stats::DownloadCacheStats;
use task::{DownloadTask, TaskState};

const CATALOG_DIR: &str = "catalog";
const CATALOG_FILE: &str = "download.db";
const FILES_DIR: &str = "files";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadCacheLimits {
    pub capacity: ByteSize,
    pub max_delete_count: usize,
    pub resolved_capacity: usize,
}

impl DownloadCacheLimits {
    pub const fn defaults() -> Self {
        Self {
            capacity: ByteSize::from_mib(64),
            max_delete_count: 16,
            resolved_capacity: 4,
        }
    }
}

impl Default for DownloadCacheLimits {
    fn default() -> Self {
        Self::defaults()
    }
}

/// A downloaded file known to the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadEntry {
    id: i64,
    url: String,
    path: PathBuf,
    size: u64,
    etag: Option<String>,
    last_access: u64,
    last_updated: u64,
}

impl DownloadEntry {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> ByteSize {
        ByteSize::from_bytes(self.size)
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn last_access_ms(&self) -> u64 {
        self.last_access
    }

    pub fn last_updated_ms(&self) -> u64 {
        self.last_updated
    }
}

/// Unix-millisecond clock that never repeats or goes backwards, so that
/// catalog access order is total.
#[derive(Debug)]
struct AccessClock(AtomicU64);

impl AccessClock {
    fn seeded(last: u64) -> Self {
        Self(AtomicU64::new(last))
    }

    fn tick(&self) -> u64 {
        let wall = unix_ms_now();
        let mut prev = self.0.load(Ordering::Acquire);
        loop {
            let next = wall.max(prev.saturating_add(1));
            match self
                .0
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(observed) => prev = observed,
            }
        }
    }
}

struct Inner {
    root: PathBuf,
    files_dir: PathBuf,
    catalog: Catalog,
    limits: DownloadCacheLimits,
    resolved: Mutex<LruCache<String, DownloadEntry>>,
    tasks: Mutex<HashMap<String, Arc<DownloadTask>>>,
    total_bytes: AtomicU64,
    eviction_lock: tokio::sync::Mutex<()>,
    downloader: Arc<dyn Downloader>,
    stats: DownloadCacheStats,
    clock: AccessClock,
}

/// Shared handle; clones refer to the same cache.
#[derive(Clone)]
pub struct DownloadCache {
    inner: Arc<Inner>,
}

impl fmt::Debug for DownloadCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadCache")
            .field("root", &self.inner.root)
            .field("limits", &self.inner.limits)
            .field("total_bytes", &self.total_bytes())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl DownloadCache {
    pub async fn open(
        root: impl Into<PathBuf>,
        limits: DownloadCacheLimits,
        downloader: Arc<dyn Downloader>,
    ) -> Result<Self> {
        let root = root.into();
        let catalog_dir = root.join(CATALOG_DIR);
        let files_dir = root.join(FILES_DIR);
        tokio::fs::create_dir_all(&catalog_dir).await?;
        tokio::fs::create_dir_all(&files_dir).await?;

        let (catalog, reset) = Catalog::open(&catalog_dir.join(CATALOG_FILE)).await?;
        if reset {
            log::info!(
                "download catalog recreated; wiping files dir={}",
                files_dir.display()
            );
            wipe_dir(&files_dir).await?;
        } else {
            remove_orphan_files(&files_dir, &catalog).await;
        }

        let total = catalog.total_size().await?;
        let clock = AccessClock::seeded(catalog.latest_stamp().await?);
        let resolved_capacity =
            NonZeroUsize::new(limits.resolved_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);

        let inner = Arc::new(Inner {
            root,
            files_dir,
            catalog,
            limits,
            resolved: Mutex::new(LruCache::new(resolved_capacity)),
            tasks: Mutex::new(HashMap::new()),
            total_bytes: AtomicU64::new(total),
            eviction_lock: tokio::sync::Mutex::new(()),
            downloader,
            stats: DownloadCacheStats::default(),
            clock,
        });

        if let Err(e) = inner.free_some_space_if_needed().await {
            log::warn!("download cache open eviction failed; err={e}");
        }

        log::debug!(
            "download cache opened; root={}, total={}, capacity={}",
            inner.root.display(),
            ByteSize::from_bytes(inner.total_bytes.load(Ordering::Relaxed)),
            inner.limits.capacity
        );
        Ok(Self { inner })
    }

    /// Returns the cached file for `url`, downloading it if needed.
    ///
    /// Canceling `ctx` abandons this caller's wait only; the download keeps
    /// running while any other caller still waits on it.
    pub async fn fetch(&self, url: &str, ctx: &JobContext) -> Result<DownloadEntry> {
        ctx.check()?;

        if let Some(entry) = self.inner.resolved_hit(url).await {
            return Ok(entry);
        }
        if let Some(entry) = self.inner.catalog_hit(url).await? {
            return Ok(entry);
        }

        let task = match self.inner.join_or_start(url) {
            Joined::Resolved(entry) => return Ok(entry),
            Joined::Task(task) => task,
        };

        TaskProxy {
            inner: Arc::clone(&self.inner),
            task,
        }
        .wait(ctx)
        .await
    }

    pub fn total_bytes(&self) -> ByteSize {
        ByteSize::from_bytes(self.inner.total_bytes.load(Ordering::Relaxed))
    }

    pub fn limits(&self) -> DownloadCacheLimits {
        self.inner.limits
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Number of downloads currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    pub fn stats(&self) -> DownloadCacheStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Closes the catalog. Further fetches fail.
    pub async fn close(&self) {
        self.inner.catalog.close().await;
    }
}

enum Joined {
    Resolved(DownloadEntry),
    Task(Arc<DownloadTask>),
}

impl Inner {
    fn lookup_resolved(&self, url: &str) -> Option<DownloadEntry> {
        self.resolved.lock().get(url).cloned()
    }

    async fn resolved_hit(&self, url: &str) -> Option<DownloadEntry> {
        let mut entry = self.lookup_resolved(url)?;
        self.stats.on_resolved_hit();
        let now = self.clock.tick();
        match self.catalog.touch(entry.id, now).await {
            Ok(()) => entry.last_access = now,
            Err(e) => log::warn!("download catalog touch failed; url={}, err={}", url, e),
        }
        Some(entry)
    }

    async fn catalog_hit(&self, url: &str) -> Result<Option<DownloadEntry>> {
        let Some(mut entry) = self.catalog.lookup(KeyHash::from_key_str(url), url).await? else {
            return Ok(None);
        };

        if !tokio::fs::try_exists(&entry.path).await.unwrap_or(false) {
            log::warn!(
                "download cache file missing; dropping row url={}, path={}",
                url,
                entry.path.display()
            );
            self.catalog.delete(entry.id).await?;
            self.sub_total(entry.size);
            return Ok(None);
        }

        let now = self.clock.tick();
        self.catalog.touch(entry.id, now).await?;
        entry.last_access = now;
        self.stats.on_catalog_hit();
        self.resolved.lock().put(url.to_owned(), entry.clone());
        Ok(Some(entry))
    }

    fn join_or_start(self: &Arc<Self>, url: &str) -> Joined {
        let mut tasks = self.tasks.lock();
        // A task may have completed between the catalog miss and here.
        if let Some(entry) = self.lookup_resolved(url) {
            return Joined::Resolved(entry);
        }

        if let Some(task) = tasks.get(url) {
            task.add_proxy();
            self.stats.on_coalesced_wait();
            return Joined::Task(Arc::clone(task));
        }

        let task = DownloadTask::new(url);
        task.add_proxy();
        tasks.insert(url.to_owned(), Arc::clone(&task));
        self.stats.on_download_started();
        log::debug!("download started; url={}", url);

        let inner = Arc::clone(self);
        let running = Arc::clone(&task);
        tokio::spawn(async move {
            let outcome = inner.run_download(&running).await;
            inner.complete(&running, outcome).await;
        });
        Joined::Task(task)
    }

    async fn run_download(&self, task: &DownloadTask) -> Result<DownloadEntry> {
        // Only one task per url exists at a time, so checking the catalog here
        // rules out a second row when the url finished and left the resolved
        // set after this caller's catalog miss.
        if let Some(entry) = self.catalog_hit(&task.url).await? {
            log::debug!("download satisfied from catalog; url={}", task.url);
            return Ok(entry);
        }

        let files_dir = self.files_dir.clone();
        let temp = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix("cache")
                .suffix(".tmp")
                .tempfile_in(files_dir)
        })
        .await??;

        let outcome = tokio::select! {
            biased;
            _ = task.token.cancelled() => Err(CacheError::Cancelled),
            outcome = self.downloader.download(&task.url, temp.path(), &task.token) => outcome,
        }?;

        let (_file, path) = temp.keep().map_err(|e| CacheError::Io(e.error))?;
        let size = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(_) => outcome.bytes_written,
        };

        let now = self.clock.tick();
        let hash = KeyHash::from_key_str(&task.url);
        let id = match self
            .catalog
            .insert(hash, &task.url, &path, size, outcome.etag.as_deref(), now)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&path).await {
                    log::warn!(
                        "download cache orphan removal failed; path={}, err={}",
                        path.display(),
                        rm
                    );
                }
                return Err(e);
            }
        };
        self.total_bytes.fetch_add(size, Ordering::AcqRel);

        Ok(DownloadEntry {
            id,
            url: task.url.clone(),
            path,
            size,
            etag: outcome.etag,
            last_access: now,
            last_updated: now,
        })
    }

    async fn complete(&self, task: &Arc<DownloadTask>, outcome: Result<DownloadEntry>) {
        let state = match outcome {
            Ok(entry) => {
                self.resolved.lock().put(task.url.clone(), entry.clone());
                TaskState::Done(entry)
            }
            Err(e) if e.is_cancelled() => {
                log::debug!("download cancelled; url={}", task.url);
                TaskState::Cancelled
            }
            Err(e) => {
                self.stats.on_failure();
                log::warn!("download failed; url={}, err={}", task.url, e);
                TaskState::Failed(e.to_string())
            }
        };

        {
            let mut tasks = self.tasks.lock();
            if tasks.get(&task.url).is_some_and(|t| Arc::ptr_eq(t, task)) {
                tasks.remove(&task.url);
            }
        }

        if matches!(state, TaskState::Done(_))
            && let Err(e) = self.free_some_space_if_needed().await
        {
            log::warn!("download cache eviction failed; err={e}");
        }

        task.finish(state);
    }

    /// Called when a proxy leaves. The last proxy out cancels a pending task.
    fn release(&self, task: &Arc<DownloadTask>) {
        if task.release_proxy() > 0 {
            return;
        }

        {
            let mut tasks = self.tasks.lock();
            if task.proxies() > 0 || !task.is_pending() {
                return;
            }
            if tasks.get(&task.url).is_some_and(|t| Arc::ptr_eq(t, task)) {
                tasks.remove(&task.url);
            }
        }

        task.token.cancel();
        log::debug!("download abandoned by every waiter; url={}", task.url);
    }

    async fn free_some_space_if_needed(&self) -> Result<()> {
        let _guard = self.eviction_lock.lock().await;

        let total = self.total_bytes.load(Ordering::Acquire);
        let capacity = self.limits.capacity.as_bytes();
        if total <= capacity {
            return Ok(());
        }

        let candidates = self
            .catalog
            .oldest(self.limits.max_delete_count + self.limits.resolved_capacity)
            .await?;
        let plan = {
            let resolved = self.resolved.lock();
            plan_evictions(
                candidates,
                total,
                capacity,
                self.limits.max_delete_count,
                |url| resolved.contains(url),
            )
        };

        let mut removed = 0u64;
        let mut removed_bytes = 0u64;
        for eviction in plan.planned {
            self.catalog.delete(eviction.id).await?;
            match tokio::fs::remove_file(&eviction.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!(
                    "download cache file removal failed; path={}, err={}",
                    eviction.path.display(),
                    e
                ),
            }
            self.sub_total(eviction.size);
            removed += 1;
            removed_bytes += eviction.size;
            log::debug!("download evicted; url={}, size={}", eviction.url, eviction.size);
        }

        if removed > 0 {
            self.stats.on_evicted(removed, removed_bytes);
            log::info!(
                "download cache evicted {} entries ({}), skipped {} pinned; total={}",
                removed,
                ByteSize::from_bytes(removed_bytes),
                plan.skipped_pinned,
                ByteSize::from_bytes(self.total_bytes.load(Ordering::Relaxed))
            );
        }
        Ok(())
    }

    fn sub_total(&self, size: u64) {
        let _ = self
            .total_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| Some(v.saturating_sub(size)));
    }
}

/// One caller's stake in a download task.
struct TaskProxy {
    inner: Arc<Inner>,
    task: Arc<DownloadTask>,
}

impl TaskProxy {
    async fn wait(self, ctx: &JobContext) -> Result<DownloadEntry> {
        let mut rx = self.task.subscribe();
        let state = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(CacheError::Cancelled),
            state = async {
                rx.wait_for(|s| !s.is_pending()).await.map(|s| (*s).clone())
            } => state,
        };

        match state {
            Ok(TaskState::Done(entry)) => Ok(entry),
            Ok(TaskState::Failed(reason)) => Err(CacheError::DownloadFailed {
                url: self.task.url.clone(),
                reason,
            }),
            Ok(TaskState::Cancelled) => Err(CacheError::Cancelled),
            Ok(TaskState::Pending) | Err(_) => Err(CacheError::Internal(format!(
                "download task for {} ended without a result",
                self.task.url
            ))),
        }
    }
}

impl Drop for TaskProxy {
    fn drop(&mut self) {
        self.inner.release(&self.task);
    }
}

fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis()
        .min(u128::from(u64::MAX)) as u64
}

async fn wipe_dir(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}

async fn remove_orphan_files(files_dir: &Path, catalog: &Catalog) {
    let known: HashSet<PathBuf> = match catalog.all_paths().await {
        Ok(paths) => paths.into_iter().collect(),
        Err(e) => {
            log::warn!("download cache orphan scan skipped; err={e}");
            return;
        }
    };

    let mut dir = match tokio::fs::read_dir(files_dir).await {
        Ok(dir) => dir,
        Err(e) => {
            log::warn!("download cache orphan scan failed; dir={}, err={}", files_dir.display(), e);
            return;
        }
    };

    let mut removed = 0usize;
    while let Ok(Some(entry)) = dir.next_entry().await {
        let path = entry.path();
        if known.contains(&path) {
            continue;
        }
        if tokio::fs::remove_file(&path).await.is_ok() {
            removed += 1;
        }
    }
    if removed > 0 {
        log::info!("download cache removed {} orphan files", removed);
    }
}
