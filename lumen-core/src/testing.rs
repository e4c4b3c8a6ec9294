//! Fakes shared by unit tests.

use std::{
    collections::{HashMap, HashSet},
    path::Path as FsPath,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::{
    adapter::PhotoViewer,
    context::CacheContext,
    download::{DownloadOutcome, Downloader},
    error::{CacheError, Result},
    job::{JobContext, JobExecutor, JobFuture},
    media::{DataVersion, FullImage, ImageType, MediaItem, Preview},
    path::Path,
};

/// Executor that queues jobs until the test runs them.
#[derive(Default)]
pub(crate) struct ManualExecutor {
    queue: Mutex<Vec<JobFuture>>,
}

impl std::fmt::Debug for ManualExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualExecutor")
            .field("pending", &self.pending())
            .finish()
    }
}

impl ManualExecutor {
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Runs every queued job in submission order. Returns how many ran.
    pub async fn run_all(&self) -> usize {
        let mut ran = 0;
        loop {
            let jobs = std::mem::take(&mut *self.queue.lock());
            if jobs.is_empty() {
                return ran;
            }
            for job in jobs {
                job.await;
                ran += 1;
            }
        }
    }
}

impl JobExecutor for ManualExecutor {
    fn execute(&self, job: JobFuture) {
        self.queue.lock().push(job);
    }
}

/// Media item producing 1x1 previews whose red channel is the low byte of
/// its data version.
#[derive(Debug)]
pub(crate) struct FakeItem {
    path: Path,
    version: Mutex<DataVersion>,
    fail_previews: AtomicBool,
    preview_calls: AtomicUsize,
    full_calls: AtomicUsize,
}

impl FakeItem {
    pub fn new(path: Path, version: DataVersion) -> Self {
        Self {
            path,
            version: Mutex::new(version),
            fail_previews: AtomicBool::new(false),
            preview_calls: AtomicUsize::new(0),
            full_calls: AtomicUsize::new(0),
        }
    }

    /// `count` items at `/test/0`, `/test/1`, ...
    pub fn many_typed(ctx: &CacheContext, count: usize) -> Vec<Arc<FakeItem>> {
        let root = ctx.paths().root().child("test");
        (0..count)
            .map(|i| Arc::new(FakeItem::new(root.child(i.to_string()), ctx.next_version_number())))
            .collect()
    }

    pub fn many(ctx: &CacheContext, count: usize) -> Vec<Arc<dyn MediaItem>> {
        Self::many_typed(ctx, count)
            .into_iter()
            .map(|item| item as Arc<dyn MediaItem>)
            .collect()
    }

    pub fn set_version(&self, version: DataVersion) {
        *self.version.lock() = version;
    }

    pub fn fail_previews(&self, fail: bool) {
        self.fail_previews.store(fail, Ordering::SeqCst);
    }

    pub fn marker(&self) -> u8 {
        (self.version.lock().as_u64() & 0xff) as u8
    }

    pub fn preview_calls(&self) -> usize {
        self.preview_calls.load(Ordering::SeqCst)
    }

    pub fn full_calls(&self) -> usize {
        self.full_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaItem for FakeItem {
    fn path(&self) -> &Path {
        &self.path
    }

    fn data_version(&self) -> DataVersion {
        *self.version.lock()
    }

    async fn request_image(&self, _kind: ImageType, ctx: &JobContext) -> Result<Preview> {
        self.preview_calls.fetch_add(1, Ordering::SeqCst);
        ctx.check()?;
        if self.fail_previews.load(Ordering::SeqCst) {
            return Err(CacheError::DecodeFailed(format!("{} is broken", self.path)));
        }
        let pixel = Rgba([self.marker(), 0, 0, 255]);
        Ok(Preview::new(RgbaImage::from_pixel(1, 1, pixel)))
    }

    async fn request_full_image(&self, ctx: &JobContext) -> Result<FullImage> {
        self.full_calls.fetch_add(1, Ordering::SeqCst);
        ctx.check()?;
        Ok(FullImage::new(DynamicImage::new_rgba8(2, 2)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ViewerEvent {
    ImageChanged(isize),
    DataChanged(Vec<Option<usize>>),
    LoadingStarted,
    LoadingFinished(bool),
}

#[derive(Debug, Default)]
pub(crate) struct RecordingViewer {
    events: Mutex<Vec<ViewerEvent>>,
}

impl RecordingViewer {
    pub fn events(&self) -> Vec<ViewerEvent> {
        self.events.lock().clone()
    }

    pub fn data_changes(&self) -> Vec<Vec<Option<usize>>> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ViewerEvent::DataChanged(from) => Some(from.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl PhotoViewer for RecordingViewer {
    fn on_image_changed(&self, offset: isize) {
        self.events.lock().push(ViewerEvent::ImageChanged(offset));
    }

    fn on_data_changed(&self, from_index: &[Option<usize>]) {
        self.events
            .lock()
            .push(ViewerEvent::DataChanged(from_index.to_vec()));
    }

    fn on_loading_started(&self) {
        self.events.lock().push(ViewerEvent::LoadingStarted);
    }

    fn on_loading_finished(&self, failed: bool) {
        self.events.lock().push(ViewerEvent::LoadingFinished(failed));
    }
}

const DEFAULT_FAKE_SIZE: usize = 16;

/// Downloader that writes filler bytes. When gated, every download blocks
/// until [`FakeDownloader::open_gate`] is called.
#[derive(Debug, Default)]
pub(crate) struct FakeDownloader {
    gate: Option<Semaphore>,
    failing: Mutex<HashSet<String>>,
    sizes: Mutex<HashMap<String, usize>>,
    calls: Mutex<HashMap<String, usize>>,
    active: AtomicUsize,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl<'a> ActiveGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().insert(url.to_owned());
    }

    pub fn set_size(&self, url: &str, size: usize) {
        self.sizes.lock().insert(url.to_owned(), size);
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().get(url).copied().unwrap_or(0)
    }

    /// Downloads currently running, including ones blocked on the gate.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download(
        &self,
        url: &str,
        dest: &FsPath,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        let _active = ActiveGuard::enter(&self.active);
        *self.calls.lock().entry(url.to_owned()).or_default() += 1;

        if let Some(gate) = &self.gate {
            tokio::select! {
                _ = cancel.cancelled() => return Err(CacheError::Cancelled),
                permit = gate.acquire() => {
                    permit.map_err(|e| CacheError::Internal(e.to_string()))?.forget();
                }
            }
        }

        if self.failing.lock().contains(url) {
            return Err(CacheError::DownloadFailed {
                url: url.to_owned(),
                reason: "status 404".into(),
            });
        }

        let size = self.sizes.lock().get(url).copied().unwrap_or(DEFAULT_FAKE_SIZE);
        tokio::fs::write(dest, vec![0xab; size]).await?;
        Ok(DownloadOutcome {
            bytes_written: size as u64,
            etag: Some(format!("\"{size}\"")),
        })
    }
}
