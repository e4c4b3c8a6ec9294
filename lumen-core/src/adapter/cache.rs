use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use tokio::sync::mpsc;

use super::{
    AdapterConfig,
    entry::{ImageEntry, ImageVariant},
    fetch::{ImageFetch, fetch_sequence},
    viewer::{LoadingState, PhotoViewer},
    window::{ContentWindow, WindowBounds, plan_window},
};
use crate::{
    error::Result,
    job::{JobRunner, TaskHandle, TaskId},
    media::{DataVersion, FullImage, MediaItem, MediaSet, Preview},
    path::Path,
};

/// Result of one decode job.
#[derive(Debug)]
pub enum Decoded {
    Preview(Result<Preview>),
    Full(Result<FullImage>),
}

impl Decoded {
    pub fn variant(&self) -> ImageVariant {
        match self {
            Decoded::Preview(_) => ImageVariant::Preview,
            Decoded::Full(_) => ImageVariant::Full,
        }
    }
}

/// Posted back to the adapter when a decode job finishes.
#[derive(Debug)]
pub struct TaskCompletion {
    pub path: Path,
    pub task: TaskId,
    pub outcome: Decoded,
}

/// Sliding-window cache state. Owned by a single coordinating task; every
/// method takes `&mut self` and decode results come back through
/// [`AdapterCache::pump`] or the coordinator loop.
pub struct AdapterCache {
    config: AdapterConfig,
    source: Arc<dyn MediaSet>,
    viewer: Arc<dyn PhotoViewer>,
    runner: JobRunner,
    completion_tx: mpsc::UnboundedSender<TaskCompletion>,
    pub(super) completion_rx: mpsc::UnboundedReceiver<TaskCompletion>,
    window: ContentWindow,
    size: usize,
    current: usize,
    active: bool,
    need_full_image: bool,
    entries: HashMap<Path, ImageEntry>,
    fetch_seq: Vec<ImageFetch>,
    versions: Vec<Option<DataVersion>>,
    paths: Vec<Option<Path>>,
}

impl std::fmt::Debug for AdapterCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterCache")
            .field("config", &self.config)
            .field("size", &self.size)
            .field("current", &self.current)
            .field("active", &self.active)
            .field("bounds", &self.window.bounds())
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl AdapterCache {
    /// Builds the adapter and loads the content window around
    /// `initial_index`. The adapter starts inactive.
    pub fn new(
        config: AdapterConfig,
        source: Arc<dyn MediaSet>,
        viewer: Arc<dyn PhotoViewer>,
        runner: JobRunner,
        initial_index: usize,
    ) -> Result<Self> {
        config.validate()?;
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let slots = config.active_capacity();

        let mut cache = Self {
            config,
            source,
            viewer,
            runner,
            completion_tx,
            completion_rx,
            window: ContentWindow::new(config.content_capacity),
            size: 0,
            current: initial_index,
            active: false,
            need_full_image: true,
            entries: HashMap::new(),
            fetch_seq: fetch_sequence(config.active_radius, config.full_image_radius),
            versions: vec![None; slots],
            paths: vec![None; slots],
        };
        cache.reload_content()?;
        Ok(cache)
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn bounds(&self) -> WindowBounds {
        self.window.bounds()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn need_full_image(&self) -> bool {
        self.need_full_image
    }

    /// Number of items holding an image entry.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Decode jobs currently admitted.
    pub fn in_flight_count(&self) -> usize {
        self.entries.values().map(ImageEntry::in_flight).sum()
    }

    /// Activates the adapter: reloads content and starts decoding.
    pub fn start(&mut self) {
        if self.active {
            return;
        }
        self.active = true;
        self.reload();
    }

    /// Deactivates the adapter, cancelling all decode jobs and releasing
    /// every decoded artifact. Results that arrive later are discarded.
    pub fn stop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        for (_, mut entry) in self.entries.drain() {
            entry.teardown();
        }
        while self.completion_rx.try_recv().is_ok() {}
        log::debug!("adapter stopped; current={}", self.current);
    }

    /// Moves the center to `index`, clamped to the set.
    pub fn set_center(&mut self, index: usize) {
        let index = index.min(self.size.saturating_sub(1));
        if index == self.current {
            return;
        }
        self.current = index;
        self.update_sliding_window();
        if self.active {
            self.update_image_cache();
            self.update_image_requests();
        }
        self.fire_data_change();
    }

    /// Re-reads the set size and the whole content range from the source.
    pub fn reload(&mut self) {
        self.viewer.on_loading_started();
        let failed = match self.reload_content() {
            Ok(()) => false,
            Err(e) => {
                log::warn!("adapter reload failed; current={}, err={}", self.current, e);
                true
            }
        };
        if self.active {
            self.update_image_cache();
            self.update_image_requests();
        }
        self.fire_data_change();
        self.viewer.on_loading_finished(failed);
    }

    /// Enables or disables full-image decoding. Disabling drops every held
    /// full image and cancels pending full-image jobs.
    pub fn set_need_full_image(&mut self, enabled: bool) {
        if self.need_full_image == enabled {
            return;
        }
        self.need_full_image = enabled;
        if !enabled {
            for entry in self.entries.values_mut() {
                entry.drop_full_image();
            }
        }
        self.update_image_requests();
    }

    pub fn get_media_at(&self, offset: isize) -> Option<Arc<dyn MediaItem>> {
        self.item_at(offset).cloned()
    }

    pub fn get_preview_at(&self, offset: isize) -> Option<Arc<Preview>> {
        self.entry_at(offset)?.preview.clone()
    }

    pub fn get_full_image_at(&self, offset: isize) -> Option<Arc<FullImage>> {
        self.entry_at(offset)?.full.clone()
    }

    pub fn get_loading_state_at(&self, offset: isize) -> LoadingState {
        match self.entry_at(offset) {
            Some(entry) if entry.preview.is_some() => LoadingState::Complete,
            Some(entry) if entry.failed => LoadingState::Failed,
            _ => LoadingState::Unloaded,
        }
    }

    /// Applies every decode result queued so far. Returns how many were
    /// processed.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(done) = self.completion_rx.try_recv() {
            self.on_task_done(done);
            applied += 1;
        }
        applied
    }

    /// Applies one decode result. Results whose task is no longer the
    /// entry's current task are dropped.
    pub fn on_task_done(&mut self, done: TaskCompletion) {
        let variant = done.outcome.variant();
        let Some(entry) = self.entries.get_mut(&done.path) else {
            log::debug!(
                "discarding result for released entry; path={}, task={}",
                done.path,
                done.task
            );
            return;
        };
        if entry.task(variant).map(TaskHandle::id) != Some(done.task) {
            log::debug!("discarding stale result; path={}, task={}", done.path, done.task);
            return;
        }
        *entry.task_slot(variant) = None;

        match done.outcome {
            Decoded::Preview(Err(e)) | Decoded::Full(Err(e)) if e.is_cancelled() => {
                *entry.requested_slot(variant) = None;
                return;
            }
            Decoded::Preview(Ok(preview)) => {
                entry.preview = Some(Arc::new(preview));
                entry.failed = false;
            }
            Decoded::Preview(Err(e)) => {
                log::warn!("preview decode failed; path={}, err={}", done.path, e);
                entry.preview = None;
                entry.failed = true;
            }
            Decoded::Full(Ok(full)) => {
                entry.full = Some(Arc::new(full));
            }
            Decoded::Full(Err(e)) => {
                log::warn!("full image decode failed; path={}, err={}", done.path, e);
            }
        }

        if self.offset_of(&done.path) == Some(0) {
            self.viewer.on_image_changed(0);
        }
        self.update_image_requests();
    }

    /// Notifies the viewer when any item around the center changed since
    /// the last notification.
    pub fn fire_data_change(&mut self) {
        let radius = self.config.active_radius as isize;

        let mut changed = false;
        for (slot, offset) in (-radius..=radius).enumerate() {
            let version = self.item_at(offset).map(|item| item.data_version());
            if self.versions[slot] != version {
                self.versions[slot] = version;
                changed = true;
            }
        }
        if !changed {
            return;
        }

        let paths: Vec<Option<Path>> = (-radius..=radius)
            .map(|offset| self.item_at(offset).map(|item| item.path().clone()))
            .collect();
        let from_index: Vec<Option<usize>> = paths
            .iter()
            .map(|path| {
                let path = path.as_ref()?;
                self.paths.iter().position(|old| old.as_ref() == Some(path))
            })
            .collect();
        self.paths = paths;
        self.viewer.on_data_changed(&from_index);
    }

    fn index_at(&self, offset: isize) -> Option<usize> {
        self.current
            .checked_add_signed(offset)
            .filter(|&index| index < self.size)
    }

    fn item_at(&self, offset: isize) -> Option<&Arc<dyn MediaItem>> {
        self.window.get(self.index_at(offset)?)
    }

    fn entry_at(&self, offset: isize) -> Option<&ImageEntry> {
        let item = self.item_at(offset)?;
        self.entries.get(item.path())
    }

    fn offset_of(&self, path: &Path) -> Option<isize> {
        let radius = self.config.active_radius as isize;
        (-radius..=radius)
            .find(|&offset| self.item_at(offset).is_some_and(|item| item.path() == path))
    }

    fn reload_content(&mut self) -> Result<()> {
        self.size = self.source.media_item_count();
        self.current = self.current.min(self.size.saturating_sub(1));
        let bounds = plan_window(self.current, self.size, self.window.bounds(), &self.config, true);
        self.window.apply(bounds);
        self.window.clear();
        self.load_content(bounds.content_start, bounds.content_end)
    }

    fn load_content(&mut self, start: usize, end: usize) -> Result<()> {
        if start >= end {
            return Ok(());
        }
        let items = self.source.media_items(start, end - start)?;
        if items.len() < end - start {
            log::debug!(
                "media set returned a short range; start={}, wanted={}, got={}",
                start,
                end - start,
                items.len()
            );
        }
        self.window.fill(start, items);
        Ok(())
    }

    fn update_sliding_window(&mut self) {
        let prev = self.window.bounds();
        let next = plan_window(self.current, self.size, prev, &self.config, false);
        if !self.window.apply(next) {
            return;
        }

        let mut missing = Vec::with_capacity(2);
        if next.content_start < prev.content_start {
            missing.push((next.content_start, next.content_end.min(prev.content_start)));
        }
        if prev.content_end < next.content_end {
            missing.push((next.content_start.max(prev.content_end), next.content_end));
        }
        for (start, end) in missing {
            if let Err(e) = self.load_content(start, end) {
                log::warn!("adapter content load failed; range={}..{}, err={}", start, end, e);
            }
        }
    }

    /// Creates entries for active items, drops entries that left the active
    /// range, and releases full images outside the full-image radius.
    fn update_image_cache(&mut self) {
        let bounds = self.window.bounds();
        let mut stale: HashSet<Path> = self.entries.keys().cloned().collect();

        for index in bounds.active_start..bounds.active_end {
            let Some(item) = self.window.get(index) else {
                continue;
            };
            let path = item.path().clone();
            stale.remove(&path);

            let far = index.abs_diff(self.current) > self.config.full_image_radius;
            match self.entries.get_mut(&path) {
                Some(entry) if far => entry.drop_full_image(),
                Some(_) => {}
                None => {
                    self.entries.insert(path, ImageEntry::default());
                }
            }
        }

        for path in stale {
            if let Some(mut entry) = self.entries.remove(&path) {
                entry.teardown();
            }
        }
    }

    /// Walks the fetch sequence and admits at most one decode job: the first
    /// entry that is already loading or needs to. Every other in-flight job
    /// is cancelled.
    fn update_image_requests(&mut self) {
        if !self.active {
            return;
        }

        let mut admitted = None;
        if self.item_at(0).is_some() {
            for i in 0..self.fetch_seq.len() {
                let fetch = self.fetch_seq[i];
                if fetch.variant == ImageVariant::Full && !self.need_full_image {
                    continue;
                }
                let Some(index) = self.index_at(fetch.offset) else {
                    continue;
                };
                if let Some(task) = self.start_task_if_needed(index, fetch.variant) {
                    admitted = Some(task);
                    break;
                }
            }
        }

        for entry in self.entries.values_mut() {
            for variant in [ImageVariant::Preview, ImageVariant::Full] {
                if entry
                    .task(variant)
                    .is_some_and(|task| Some(task.id()) != admitted)
                {
                    entry.cancel(variant);
                }
            }
        }
    }

    fn start_task_if_needed(&mut self, index: usize, variant: ImageVariant) -> Option<TaskId> {
        if !self.window.bounds().active_contains(index) {
            return None;
        }
        let item = Arc::clone(self.window.get(index)?);
        let version = item.data_version();
        let entry = self.entries.get_mut(item.path())?;

        if entry.requested(variant) == Some(version) {
            return entry.task(variant).map(TaskHandle::id);
        }
        if variant == ImageVariant::Full && !item.supports_full_image() {
            return None;
        }

        entry.cancel(variant);
        if variant == ImageVariant::Preview {
            entry.failed = false;
        }
        *entry.requested_slot(variant) = Some(version);

        let handle = submit_decode(&self.runner, &self.completion_tx, item, variant);
        let id = handle.id();
        *entry.task_slot(variant) = Some(handle);
        Some(id)
    }
}

fn submit_decode(
    runner: &JobRunner,
    completions: &mpsc::UnboundedSender<TaskCompletion>,
    item: Arc<dyn MediaItem>,
    variant: ImageVariant,
) -> TaskHandle {
    let path = item.path().clone();
    let completions = completions.clone();
    match variant {
        ImageVariant::Preview => runner.submit(
            move |ctx| async move { item.request_preview(&ctx).await },
            move |task, result| {
                let _ = completions.send(TaskCompletion {
                    path,
                    task,
                    outcome: Decoded::Preview(result),
                });
            },
        ),
        ImageVariant::Full => runner.submit(
            move |ctx| async move { item.request_full_image(&ctx).await },
            move |task, result| {
                let _ = completions.send(TaskCompletion {
                    path,
                    task,
                    outcome: Decoded::Full(result),
                });
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::CacheContext,
        media::ListMediaSet,
        testing::{FakeItem, ManualExecutor, RecordingViewer, ViewerEvent},
    };
    use image::RgbaImage;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    struct Fixture {
        adapter: AdapterCache,
        exec: Arc<ManualExecutor>,
        viewer: Arc<RecordingViewer>,
        items: Vec<Arc<FakeItem>>,
        set: Arc<ListMediaSet>,
        ctx: Arc<CacheContext>,
    }

    impl Fixture {
        fn new(count: usize, config: AdapterConfig, index: usize) -> Self {
            let ctx = CacheContext::shared();
            let items = FakeItem::many_typed(&ctx, count);
            let set = Arc::new(ListMediaSet::new(as_media(&items)));
            let exec = Arc::new(ManualExecutor::default());
            let viewer = Arc::new(RecordingViewer::default());
            let adapter = AdapterCache::new(
                config,
                Arc::clone(&set) as Arc<dyn MediaSet>,
                Arc::clone(&viewer) as Arc<dyn PhotoViewer>,
                JobRunner::new(Arc::clone(&exec) as _),
                index,
            )
            .unwrap();
            Self {
                adapter,
                exec,
                viewer,
                items,
                set,
                ctx,
            }
        }

        /// Runs queued jobs and applies their results until nothing moves.
        async fn settle(&mut self) {
            loop {
                let ran = self.exec.run_all().await;
                let applied = self.adapter.pump();
                if ran == 0 && applied == 0 {
                    break;
                }
            }
        }

        /// Runs exactly the jobs queued right now and applies their results.
        async fn step(&mut self) {
            self.exec.run_all().await;
            self.adapter.pump();
        }

        fn bump_version(&self, index: usize) {
            self.items[index].set_version(self.ctx.next_version_number());
        }
    }

    fn as_media(items: &[Arc<FakeItem>]) -> Vec<Arc<dyn MediaItem>> {
        items
            .iter()
            .map(|item| Arc::clone(item) as Arc<dyn MediaItem>)
            .collect()
    }

    fn preview_marker(preview: &Preview) -> u8 {
        preview.image().get_pixel(0, 0)[0]
    }

    #[tokio::test]
    async fn start_admits_the_center_preview_first() {
        let mut f = Fixture::new(5, AdapterConfig::defaults(), 2);
        f.adapter.start();
        assert_eq!(f.adapter.in_flight_count(), 1);
        assert_eq!(f.exec.pending(), 1);
        assert_eq!(f.adapter.get_loading_state_at(0), LoadingState::Unloaded);

        f.step().await;
        assert_eq!(f.adapter.get_loading_state_at(0), LoadingState::Complete);
        assert_eq!(f.items[2].preview_calls(), 1);
        // Next in line is the right-hand neighbor's preview.
        assert_eq!(f.adapter.in_flight_count(), 1);
        f.step().await;
        assert_eq!(f.items[3].preview_calls(), 1);
        assert_eq!(f.items[1].preview_calls(), 0);

        f.settle().await;
        assert_eq!(f.adapter.in_flight_count(), 0);
        for offset in -1..=1 {
            assert!(f.adapter.get_preview_at(offset).is_some());
            assert!(f.adapter.get_full_image_at(offset).is_some());
        }
        assert_eq!(f.items[0].preview_calls(), 0);
        assert_eq!(f.items[4].preview_calls(), 0);
        assert_eq!(f.adapter.entry_count(), 3);
    }

    #[tokio::test]
    async fn stale_results_are_discarded() {
        let mut f = Fixture::new(5, AdapterConfig::defaults(), 2);
        f.adapter.start();
        assert_eq!(f.exec.pending(), 1);

        f.bump_version(2);
        f.adapter.reload();
        // The old job was cancelled and a new one admitted.
        assert_eq!(f.adapter.in_flight_count(), 1);
        assert_eq!(f.exec.pending(), 2);

        f.step().await;
        let preview = f.adapter.get_preview_at(0).unwrap();
        assert_eq!(preview_marker(&preview), f.items[2].marker());
        assert_eq!(f.items[2].preview_calls(), 1);
    }

    #[tokio::test]
    async fn results_for_released_entries_are_dropped() {
        let config = AdapterConfig {
            content_capacity: 8,
            min_load_count: 2,
            ..AdapterConfig::defaults()
        };
        let mut f = Fixture::new(20, config, 0);
        f.adapter.start();
        assert_eq!(f.exec.pending(), 1);

        f.adapter.set_center(10);
        f.settle().await;

        assert!(f.adapter.get_preview_at(0).is_some());
        assert_eq!(f.items[0].preview_calls(), 0);
        let changed: Vec<isize> = f
            .viewer
            .events()
            .into_iter()
            .filter_map(|event| match event {
                ViewerEvent::ImageChanged(offset) => Some(offset),
                _ => None,
            })
            .collect();
        assert!(!changed.is_empty());
        assert!(changed.iter().all(|&offset| offset == 0));
    }

    #[tokio::test]
    async fn only_the_center_item_reports_image_changes() {
        let mut f = Fixture::new(5, AdapterConfig::defaults(), 2);
        f.adapter.start();
        f.settle().await;

        for offset in -1..=1 {
            assert!(f.adapter.get_preview_at(offset).is_some());
        }
        let changed: Vec<isize> = f
            .viewer
            .events()
            .into_iter()
            .filter_map(|event| match event {
                ViewerEvent::ImageChanged(offset) => Some(offset),
                _ => None,
            })
            .collect();
        // Center preview and center full image.
        assert_eq!(changed, vec![0, 0]);
    }

    #[tokio::test]
    async fn superseded_successful_decode_is_not_stored() {
        let mut f = Fixture::new(5, AdapterConfig::defaults(), 2);
        f.adapter.start();
        let old = f
            .adapter
            .entries
            .get(f.items[2].path())
            .and_then(|entry| entry.task(ImageVariant::Preview))
            .map(TaskHandle::id)
            .unwrap();

        f.bump_version(2);
        f.adapter.reload();
        f.viewer.clear();

        f.adapter.on_task_done(TaskCompletion {
            path: f.items[2].path().clone(),
            task: old,
            outcome: Decoded::Preview(Ok(Preview::new(RgbaImage::new(1, 1)))),
        });
        assert!(f.adapter.get_preview_at(0).is_none());
        assert_eq!(f.adapter.get_loading_state_at(0), LoadingState::Unloaded);
        assert_eq!(f.adapter.in_flight_count(), 1);
        assert!(f.viewer.events().is_empty());
    }

    #[tokio::test]
    async fn failed_preview_is_not_reissued_until_its_version_changes() {
        let mut f = Fixture::new(5, AdapterConfig::defaults(), 0);
        f.items[0].fail_previews(true);
        f.adapter.start();
        f.settle().await;
        assert_eq!(f.adapter.get_loading_state_at(0), LoadingState::Failed);
        assert_eq!(f.items[0].preview_calls(), 1);

        f.adapter.set_center(1);
        f.adapter.set_center(0);
        f.settle().await;
        assert_eq!(f.items[0].preview_calls(), 1);
        assert_eq!(f.adapter.get_loading_state_at(0), LoadingState::Failed);

        f.items[0].fail_previews(false);
        f.bump_version(0);
        f.adapter.reload();
        f.settle().await;
        assert_eq!(f.items[0].preview_calls(), 2);
        assert_eq!(f.adapter.get_loading_state_at(0), LoadingState::Complete);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_releases_everything() {
        let mut f = Fixture::new(5, AdapterConfig::defaults(), 2);
        f.adapter.start();
        f.step().await;
        assert!(f.adapter.get_preview_at(0).is_some());

        f.adapter.stop();
        f.adapter.stop();
        assert!(!f.adapter.is_active());
        assert_eq!(f.adapter.entry_count(), 0);
        assert_eq!(f.adapter.in_flight_count(), 0);

        f.viewer.clear();
        f.settle().await;
        assert!(f.adapter.get_preview_at(0).is_none());
        assert!(
            f.viewer
                .events()
                .iter()
                .all(|e| !matches!(e, ViewerEvent::ImageChanged(_)))
        );

        f.adapter.start();
        f.settle().await;
        assert!(f.adapter.get_preview_at(0).is_some());
    }

    #[tokio::test]
    async fn disabling_full_images_drops_them() {
        let mut f = Fixture::new(5, AdapterConfig::defaults(), 2);
        f.adapter.set_need_full_image(false);
        f.adapter.start();
        f.settle().await;
        assert!(f.adapter.get_preview_at(0).is_some());
        assert!(f.adapter.get_full_image_at(0).is_none());
        assert_eq!(f.items[2].full_calls(), 0);

        f.adapter.set_need_full_image(true);
        f.settle().await;
        assert!(f.adapter.get_full_image_at(0).is_some());

        f.adapter.set_need_full_image(false);
        assert!(f.adapter.get_full_image_at(0).is_none());
        assert!(f.adapter.get_preview_at(0).is_some());
    }

    #[tokio::test]
    async fn full_images_follow_their_radius() {
        let config = AdapterConfig {
            active_radius: 2,
            full_image_radius: 0,
            ..AdapterConfig::defaults()
        };
        let mut f = Fixture::new(9, config, 4);
        f.adapter.start();
        f.settle().await;
        assert!(f.adapter.get_full_image_at(0).is_some());
        for offset in [-2, -1, 1, 2] {
            assert!(f.adapter.get_preview_at(offset).is_some());
            assert!(f.adapter.get_full_image_at(offset).is_none());
        }

        f.adapter.set_center(5);
        assert!(f.adapter.get_full_image_at(-1).is_none());
        f.settle().await;
        assert!(f.adapter.get_full_image_at(0).is_some());
    }

    #[tokio::test]
    async fn data_change_reports_previous_slots() {
        let mut f = Fixture::new(5, AdapterConfig::defaults(), 2);
        f.adapter.start();
        assert_eq!(f.viewer.data_changes(), vec![vec![None, None, None]]);

        f.viewer.clear();
        f.adapter.set_center(3);
        assert_eq!(f.viewer.data_changes(), vec![vec![Some(1), Some(2), None]]);

        f.viewer.clear();
        f.adapter.set_center(4);
        assert_eq!(f.viewer.data_changes(), vec![vec![Some(1), Some(2), None]]);
        assert!(f.adapter.get_media_at(1).is_none());

        f.viewer.clear();
        f.adapter.fire_data_change();
        assert!(f.viewer.data_changes().is_empty());
    }

    #[tokio::test]
    async fn reload_follows_set_changes() {
        let mut f = Fixture::new(5, AdapterConfig::defaults(), 4);
        f.adapter.start();
        f.settle().await;

        f.set.remove(4);
        f.set.remove(3);
        f.adapter.reload();
        assert_eq!(f.adapter.size(), 3);
        assert_eq!(f.adapter.current_index(), 2);
        let center = f.adapter.get_media_at(0).unwrap();
        assert_eq!(center.path(), f.items[2].path());

        let events = f.viewer.events();
        assert!(events.contains(&ViewerEvent::LoadingStarted));
        assert!(events.contains(&ViewerEvent::LoadingFinished(false)));
    }

    #[tokio::test]
    async fn random_walk_keeps_window_invariants() {
        let config = AdapterConfig {
            active_radius: 2,
            content_capacity: 16,
            min_load_count: 4,
            full_image_radius: 1,
        };
        let mut f = Fixture::new(100, config, 50);
        f.adapter.start();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..300 {
            match rng.random_range(0..10) {
                0 => {
                    let len = f.set.media_item_count();
                    if len > 10 {
                        f.set.remove(rng.random_range(0..len));
                    }
                    f.adapter.reload();
                }
                1 => f.step().await,
                2 => f.settle().await,
                _ => {
                    let size = f.adapter.size();
                    f.adapter.set_center(rng.random_range(0..size));
                }
            }

            let b = f.adapter.bounds();
            let size = f.adapter.size();
            assert!(b.content_start <= b.active_start, "{b:?}");
            assert!(b.active_start <= b.active_end, "{b:?}");
            assert!(b.active_end <= b.content_end, "{b:?}");
            assert!(b.content_end <= size, "{b:?} size={size}");
            assert!(b.active_contains(f.adapter.current_index()));
            assert!(b.content_len() <= config.content_capacity);
            assert!(f.adapter.in_flight_count() <= 1);
            assert!(f.adapter.entry_count() <= config.active_capacity());

            let expected = f.set.media_items(f.adapter.current_index(), 1).unwrap();
            let center = f.adapter.get_media_at(0).unwrap();
            assert_eq!(center.path(), expected[0].path());
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let ctx = CacheContext::shared();
        let set = Arc::new(ListMediaSet::new(FakeItem::many(&ctx, 3)));
        let config = AdapterConfig {
            content_capacity: 1,
            ..AdapterConfig::defaults()
        };
        let result = AdapterCache::new(
            config,
            set,
            Arc::new(RecordingViewer::default()),
            JobRunner::new(Arc::new(ManualExecutor::default())),
            0,
        );
        assert!(result.is_err());
    }
}
