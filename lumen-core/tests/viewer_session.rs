use std::{
    collections::HashMap,
    path::{Path as FsPath, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use lumen_core::{
    AdapterCache, AdapterConfig, AdapterHandle, BlobCache, BlobStoreLimits, CacheContext,
    CacheError, DataManager, DownloadCache, DownloadCacheLimits, JobContext, JobRunner,
    ListMediaSet, LoadingState, MediaItem, PhotoViewer, Result, TokioExecutor, UriSource,
    download::{DownloadOutcome, Downloader},
    media::ImageType,
};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct CountingViewer {
    image_changes: AtomicUsize,
    data_changes: AtomicUsize,
}

impl PhotoViewer for CountingViewer {
    fn on_image_changed(&self, _offset: isize) {
        self.image_changes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_data_changed(&self, _from_index: &[Option<usize>]) {
        self.data_changes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Serves "remote" URLs from local files.
#[derive(Debug)]
struct LocalMirror {
    files: HashMap<String, PathBuf>,
    calls: AtomicUsize,
}

#[async_trait]
impl Downloader for LocalMirror {
    async fn download(
        &self,
        url: &str,
        dest: &FsPath,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }
        let source = self.files.get(url).ok_or_else(|| CacheError::DownloadFailed {
            url: url.to_owned(),
            reason: "status 404".into(),
        })?;
        let bytes_written = tokio::fs::copy(source, dest).await?;
        Ok(DownloadOutcome {
            bytes_written,
            etag: None,
        })
    }
}

fn write_photos(dir: &FsPath, count: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|i| {
            let file = dir.join(format!("photo-{i}.png"));
            RgbImage::from_pixel(64, 32, Rgb([i as u8 * 20, 80, 160]))
                .save(&file)
                .unwrap();
            file
        })
        .collect()
}

async fn wait_for_center(handle: &AdapterHandle) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let settled = handle
                .inspect(|cache| {
                    cache.get_loading_state_at(0) == LoadingState::Complete
                        && cache.in_flight_count() == 0
                })
                .await
                .unwrap();
            if settled {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("adapter did not settle");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn browsing_local_photos_fills_the_blob_cache() {
    let dir = tempdir().unwrap();
    let photos = write_photos(dir.path(), 6);
    let blobs = Arc::new(
        BlobCache::open(dir.path().join("blobs"), BlobStoreLimits::defaults())
            .await
            .unwrap(),
    );

    let manager = DataManager::new(CacheContext::shared());
    manager.add_source(Arc::new(UriSource::new(Some(Arc::clone(&blobs)), None)));
    let items: Vec<Arc<dyn MediaItem>> = photos
        .iter()
        .map(|file| {
            let path = manager.find_path_by_uri(&file.to_string_lossy()).unwrap();
            manager.get_media_object(&path).unwrap()
        })
        .collect();

    let viewer = Arc::new(CountingViewer::default());
    let adapter = AdapterCache::new(
        AdapterConfig::defaults(),
        Arc::new(ListMediaSet::new(items.clone())),
        Arc::clone(&viewer) as Arc<dyn PhotoViewer>,
        JobRunner::new(Arc::new(TokioExecutor::current(2).unwrap())),
        0,
    )
    .unwrap();
    let (handle, join) = adapter.spawn();

    handle.start().unwrap();
    wait_for_center(&handle).await;
    assert!(blobs.get(items[0].path(), ImageType::Thumbnail).await.is_some());
    assert!(blobs.get(items[1].path(), ImageType::Thumbnail).await.is_some());
    assert!(blobs.get(items[3].path(), ImageType::Thumbnail).await.is_none());

    handle.set_center(3).unwrap();
    wait_for_center(&handle).await;
    for index in 2..=4 {
        assert!(blobs.get(items[index].path(), ImageType::Thumbnail).await.is_some());
    }
    let full = handle
        .inspect(|cache| cache.get_full_image_at(0).map(|f| (f.width(), f.height())))
        .await
        .unwrap();
    assert_eq!(full, Some((64, 32)));

    assert!(viewer.image_changes.load(Ordering::SeqCst) > 0);
    assert_eq!(viewer.data_changes.load(Ordering::SeqCst), 2);

    handle.shutdown().unwrap();
    join.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn remote_items_download_once() {
    let dir = tempdir().unwrap();
    let photos = write_photos(dir.path(), 2);
    let urls: Vec<String> = (0..photos.len())
        .map(|i| format!("https://photos.example/{i}.png"))
        .collect();
    let mirror = Arc::new(LocalMirror {
        files: urls.iter().cloned().zip(photos.iter().cloned()).collect(),
        calls: AtomicUsize::new(0),
    });
    let downloads = DownloadCache::open(
        dir.path().join("downloads"),
        DownloadCacheLimits::defaults(),
        Arc::clone(&mirror) as Arc<dyn Downloader>,
    )
    .await
    .unwrap();

    let manager = DataManager::new(CacheContext::shared());
    manager.add_source(Arc::new(UriSource::new(None, Some(downloads.clone()))));
    let path = manager.find_path_by_uri(&urls[0]).unwrap();
    let item = manager.get_media_object(&path).unwrap();

    let job = JobContext::detached();
    let preview = item.request_preview(&job).await.unwrap();
    assert!(preview.width() > 0);
    let full = item.request_full_image(&job).await.unwrap();
    assert_eq!((full.width(), full.height()), (64, 32));
    assert_eq!(mirror.calls.load(Ordering::SeqCst), 1);

    let missing = manager
        .get_media_object_str("/uri/https%3A%2F%2Fphotos.example%2Fgone.png")
        .unwrap();
    assert!(missing.request_preview(&job).await.is_err());
    assert_eq!(downloads.stats().failures, 1);

    downloads.close().await;
}
