use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use directories::ProjectDirs;
use lumen_core::{AdapterConfig, BlobStoreLimits, ByteSize, DownloadCacheLimits};
use serde::{Deserialize, Serialize};

const DOWNLOAD_DIR: &str = "downloads";
const BLOB_DIR: &str = "blobs";

/// Download cache tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// Disk budget for downloaded files. Eviction runs after each download
    /// once the total exceeds it.
    pub capacity_mib: u64,
    /// Upper bound on files deleted by one eviction pass.
    pub max_delete_count: usize,
    /// Recently resolved entries kept in memory. These are never evicted.
    pub resolved_capacity: usize,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        let limits = DownloadCacheLimits::defaults();
        Self {
            capacity_mib: limits.capacity.as_bytes() / (1024 * 1024),
            max_delete_count: limits.max_delete_count,
            resolved_capacity: limits.resolved_capacity,
        }
    }
}

impl From<&DownloadSettings> for DownloadCacheLimits {
    fn from(value: &DownloadSettings) -> Self {
        DownloadCacheLimits {
            capacity: ByteSize::from_mib(value.capacity_mib),
            max_delete_count: value.max_delete_count,
            resolved_capacity: value.resolved_capacity,
        }
    }
}

/// Blob (encoded preview) cache tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BlobSettings {
    pub max_entries: usize,
    pub max_mib: u64,
    /// Bumping the version wipes the store on next open.
    pub version: u32,
}

impl Default for BlobSettings {
    fn default() -> Self {
        let limits = BlobStoreLimits::defaults();
        Self {
            max_entries: limits.max_entries,
            max_mib: limits.max_bytes.as_bytes() / (1024 * 1024),
            version: limits.version,
        }
    }
}

impl From<&BlobSettings> for BlobStoreLimits {
    fn from(value: &BlobSettings) -> Self {
        BlobStoreLimits {
            max_entries: value.max_entries,
            max_bytes: ByteSize::from_mib(value.max_mib),
            version: value.version,
        }
    }
}

/// Sliding-window adapter tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AdapterSettings {
    /// Neighbors on each side of the current item that get decoded.
    pub active_radius: usize,
    /// Media items held around the current item.
    pub content_capacity: usize,
    /// Drift of the content window tolerated before it is reloaded.
    pub min_load_count: usize,
    /// Neighbors on each side that also get full images.
    pub full_image_radius: usize,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        let config = AdapterConfig::defaults();
        Self {
            active_radius: config.active_radius,
            content_capacity: config.content_capacity,
            min_load_count: config.min_load_count,
            full_image_radius: config.full_image_radius,
        }
    }
}

impl From<&AdapterSettings> for AdapterConfig {
    fn from(value: &AdapterSettings) -> Self {
        AdapterConfig {
            active_radius: value.active_radius,
            content_capacity: value.content_capacity,
            min_load_count: value.min_load_count,
            full_image_radius: value.full_image_radius,
        }
    }
}

/// Top-level settings for every cache layer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LumenConfig {
    /// Root for the download and blob caches. Falls back to the platform
    /// cache directory.
    pub cache_root: Option<PathBuf>,
    /// Decode jobs allowed to run at once.
    pub workers: usize,
    pub download: DownloadSettings,
    pub blob: BlobSettings,
    pub adapter: AdapterSettings,
}

impl Default for LumenConfig {
    fn default() -> Self {
        Self {
            cache_root: None,
            workers: 4,
            download: DownloadSettings::default(),
            blob: BlobSettings::default(),
            adapter: AdapterSettings::default(),
        }
    }
}

impl LumenConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.download.capacity_mib == 0 {
            bail!("download.capacity_mib must be greater than zero");
        }
        if self.download.resolved_capacity == 0 {
            bail!("download.resolved_capacity must be at least 1");
        }
        if self.blob.max_entries == 0 || self.blob.max_mib == 0 {
            bail!("blob limits must be greater than zero");
        }
        self.adapter_config()
            .validate()
            .context("invalid adapter settings")?;
        Ok(())
    }

    pub fn cache_root(&self) -> anyhow::Result<PathBuf> {
        if let Some(root) = &self.cache_root {
            return Ok(root.clone());
        }
        ProjectDirs::from("dev", "lumen", "lumen")
            .map(|dirs| dirs.cache_dir().to_path_buf())
            .context("no cache directory available on this platform; set cache_root")
    }

    pub fn download_dir(&self) -> anyhow::Result<PathBuf> {
        Ok(self.cache_root()?.join(DOWNLOAD_DIR))
    }

    pub fn blob_dir(&self) -> anyhow::Result<PathBuf> {
        Ok(self.cache_root()?.join(BLOB_DIR))
    }

    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        for dir in [self.download_dir()?, self.blob_dir()?] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn download_limits(&self) -> DownloadCacheLimits {
        (&self.download).into()
    }

    pub fn blob_limits(&self) -> BlobStoreLimits {
        (&self.blob).into()
    }

    pub fn adapter_config(&self) -> AdapterConfig {
        (&self.adapter).into()
    }

    /// Rewrites a relative `cache_root` against `base`.
    pub fn resolve_relative_to(&mut self, base: &Path) {
        if let Some(root) = &self.cache_root
            && root.is_relative()
        {
            self.cache_root = Some(base.join(root));
        }
    }
}
