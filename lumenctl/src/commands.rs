use std::{path::Path, sync::Arc};

use anyhow::{Context, Result, bail};
use futures::future::join_all;
use lumen_config::{ConfigSource, LumenConfig};
use lumen_core::{
    BlobCache, DownloadCache, HttpDownloader, JobContext, download::Downloader,
};

pub async fn open_downloads(config: &LumenConfig) -> Result<DownloadCache> {
    let downloader = HttpDownloader::new().context("failed to build http client")?;
    let dir = config.download_dir()?;
    DownloadCache::open(
        &dir,
        config.download_limits(),
        Arc::new(downloader) as Arc<dyn Downloader>,
    )
    .await
    .with_context(|| format!("failed to open download cache at {}", dir.display()))
}

pub async fn open_blobs(config: &LumenConfig) -> Result<BlobCache> {
    let dir = config.blob_dir()?;
    BlobCache::open(&dir, config.blob_limits())
        .await
        .with_context(|| format!("failed to open blob cache at {}", dir.display()))
}

pub async fn fetch(config: &LumenConfig, urls: &[String], concurrency: usize) -> Result<()> {
    config.ensure_directories()?;
    let cache = open_downloads(config).await?;

    let shared = &cache;
    let requests = urls.iter().flat_map(|url| {
        (0..concurrency.max(1)).map(move |_| {
            let cache = shared.clone();
            async move { (url, cache.fetch(url, &JobContext::detached()).await) }
        })
    });

    let mut failed = 0usize;
    let mut reported = std::collections::HashSet::new();
    for (url, result) in join_all(requests).await {
        if !reported.insert(url) {
            continue;
        }
        match result {
            Ok(entry) => println!(
                "{url}\t{}\t{}\t{}",
                entry.path().display(),
                entry.size(),
                entry.etag().unwrap_or("-")
            ),
            Err(e) => {
                failed += 1;
                eprintln!("{url}\terror: {e}");
            }
        }
    }

    let stats = cache.stats();
    println!(
        "downloads={} coalesced={} resolved_hits={} catalog_hits={} failures={} evictions={} total={}",
        stats.downloads_started,
        stats.coalesced_waits,
        stats.resolved_hits,
        stats.catalog_hits,
        stats.failures,
        stats.evictions,
        cache.total_bytes()
    );
    cache.close().await;

    if failed > 0 {
        bail!("{failed} of {} urls failed", urls.len());
    }
    Ok(())
}

pub async fn blob_put(config: &LumenConfig, key: &str, file: &Path) -> Result<()> {
    config.ensure_directories()?;
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let blobs = open_blobs(config).await?;
    blobs.put_raw(key, &bytes).await?;
    println!("stored {} bytes under {key}", bytes.len());
    Ok(())
}

pub async fn blob_get(config: &LumenConfig, key: &str, out: Option<&Path>) -> Result<()> {
    let blobs = open_blobs(config).await?;
    let Some(bytes) = blobs.get_raw(key).await else {
        bail!("no record for {key}");
    };
    match out {
        Some(path) => {
            tokio::fs::write(path, &bytes)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("wrote {} bytes to {}", bytes.len(), path.display());
        }
        None => println!("{key}\t{} bytes", bytes.len()),
    }
    Ok(())
}

pub async fn blob_clear(config: &LumenConfig, key: &str) -> Result<()> {
    let blobs = open_blobs(config).await?;
    blobs.clear_raw(key).await?;
    println!("cleared {key}");
    Ok(())
}

pub async fn blob_usage(config: &LumenConfig) -> Result<()> {
    let blobs = open_blobs(config).await?;
    let usage = blobs.store().usage();
    let limits = blobs.store().limits();
    println!(
        "entries={}/{} bytes={}/{} version={}",
        usage.entries, limits.max_entries, usage.bytes, limits.max_bytes, limits.version
    );
    Ok(())
}

pub fn print_config_toml(config: &LumenConfig, source: &ConfigSource) -> Result<()> {
    println!("# source: {source}");
    match config.cache_root() {
        Ok(root) => println!("# cache root: {}", root.display()),
        Err(e) => println!("# cache root: unavailable ({e})"),
    }
    print!("{}", config.to_toml()?);
    Ok(())
}

pub fn print_config_json(config: &LumenConfig) -> Result<()> {
    let rendered =
        serde_json::to_string_pretty(config).context("failed to render config as json")?;
    println!("{rendered}");
    Ok(())
}
