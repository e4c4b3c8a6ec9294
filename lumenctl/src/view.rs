use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use lumen_config::LumenConfig;
use lumen_core::{
    AdapterCache, AdapterHandle, CacheContext, DataManager, JobRunner, ListMediaSet,
    LoadingState, MediaItem, PhotoViewer, TokioExecutor, UriSource,
};

use crate::commands::{open_blobs, open_downloads};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Prints every viewer event on stdout.
struct PrintingViewer;

impl PhotoViewer for PrintingViewer {
    fn on_image_changed(&self, offset: isize) {
        println!("image-changed offset={offset}");
    }

    fn on_data_changed(&self, from_index: &[Option<usize>]) {
        let slots: Vec<String> = from_index
            .iter()
            .map(|slot| slot.map_or_else(|| "new".to_owned(), |i| i.to_string()))
            .collect();
        println!("data-changed from=[{}]", slots.join(","));
    }

    fn on_loading_started(&self) {
        println!("loading-started");
    }

    fn on_loading_finished(&self, failed: bool) {
        println!("loading-finished failed={failed}");
    }
}

pub async fn run(
    config: &LumenConfig,
    uris: &[String],
    center: usize,
    moves: &[usize],
    full_images: bool,
) -> Result<()> {
    config.ensure_directories()?;
    let blobs = Arc::new(open_blobs(config).await?);
    let downloads = open_downloads(config).await?;

    let manager = DataManager::new(CacheContext::shared());
    manager.add_source(Arc::new(UriSource::new(
        Some(Arc::clone(&blobs)),
        Some(downloads.clone()),
    )));

    let mut items: Vec<Arc<dyn MediaItem>> = Vec::with_capacity(uris.len());
    for uri in uris {
        let path = manager
            .find_path_by_uri(uri)
            .ok_or_else(|| anyhow!("no media source accepts {uri}"))?;
        items.push(manager.get_media_object(&path)?);
    }

    let runner = JobRunner::new(Arc::new(TokioExecutor::current(config.workers)?));
    let mut adapter = AdapterCache::new(
        config.adapter_config(),
        Arc::new(ListMediaSet::new(items)),
        Arc::new(PrintingViewer),
        runner,
        center,
    )?;
    adapter.set_need_full_image(full_images);
    let (handle, join) = adapter.spawn();

    handle.start()?;
    settle(&handle).await?;
    for &index in moves {
        handle.set_center(index)?;
        settle(&handle).await?;
    }

    handle.shutdown()?;
    join.await.context("adapter loop panicked")?;
    downloads.close().await;
    Ok(())
}

/// Waits until the center item has loaded or failed and no job is running,
/// then prints the window.
async fn settle(handle: &AdapterHandle) -> Result<()> {
    let summary = tokio::time::timeout(SETTLE_TIMEOUT, async {
        loop {
            let snapshot = handle.inspect(summarize).await?;
            if let Some(summary) = snapshot {
                return Ok::<_, anyhow::Error>(summary);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .context("timed out waiting for the adapter to settle")??;
    println!("{summary}");
    Ok(())
}

fn summarize(cache: &AdapterCache) -> Option<String> {
    if cache.in_flight_count() > 0
        || cache.get_loading_state_at(0) == LoadingState::Unloaded
    {
        return None;
    }

    let radius = cache.config().active_radius as isize;
    let mut line = format!("center={}/{}", cache.current_index(), cache.size());
    for offset in -radius..=radius {
        let Some(item) = cache.get_media_at(offset) else {
            continue;
        };
        let preview = match (cache.get_loading_state_at(offset), cache.get_preview_at(offset)) {
            (_, Some(p)) => format!("{}x{}", p.width(), p.height()),
            (LoadingState::Failed, None) => "failed".to_owned(),
            _ => "-".to_owned(),
        };
        let full = cache
            .get_full_image_at(offset)
            .map_or_else(|| "-".to_owned(), |f| format!("{}x{}", f.width(), f.height()));
        line.push_str(&format!(
            "\n  [{offset:+}] {} {} preview={preview} full={full}",
            item.path(),
            item.data_version()
        ));
    }
    Some(line)
}
