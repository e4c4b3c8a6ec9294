use std::{
    fs::File,
    io::{Read, Write},
    path::{Path, PathBuf},
};

use parking_lot::Mutex;

use crate::{
    error::{CacheError, Result},
    hash::KeyHash,
    units::ByteSize,
};

const MARKER_FILE: &str = "blob-store-version.bin";
const MARKER_MAGIC: [u8; 8] = *b"LUMBLOB1";
const STORE_DIR: &str = "store";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobStoreLimits {
    pub max_entries: usize,
    pub max_bytes: ByteSize,
    pub version: u32,
}

impl BlobStoreLimits {
    pub const fn defaults() -> Self {
        Self {
            max_entries: 5000,
            max_bytes: ByteSize::from_mib(200),
            version: 7,
        }
    }
}

impl Default for BlobStoreLimits {
    fn default() -> Self {
        Self::defaults()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlobUsage {
    pub entries: usize,
    pub bytes: ByteSize,
}

/// Versioned key/bytes store addressed by 64-bit key hashes.
///
/// Records live in a `cacache` directory under `root/store`; the format
/// version is kept in a marker file beside it.
#[derive(Debug)]
pub struct BlobStore {
    root: PathBuf,
    store: PathBuf,
    limits: BlobStoreLimits,
    usage: Mutex<BlobUsage>,
    write_lock: tokio::sync::Mutex<()>,
}

impl BlobStore {
    /// Opens the store, wiping it when the on-disk version differs.
    pub async fn open(root: impl Into<PathBuf>, limits: BlobStoreLimits) -> Result<Self> {
        let root = root.into();
        let store = root.join(STORE_DIR);
        let usage = {
            let root = root.clone();
            let store = store.clone();
            tokio::task::spawn_blocking(move || {
                prepare_root_sync(&root, &store, limits.version)?;
                Ok::<_, CacheError>(compute_usage_sync(&store))
            })
            .await??
        };

        log::debug!(
            "blob store opened; root={}, entries={}, bytes={}",
            root.display(),
            usage.entries,
            usage.bytes
        );

        Ok(Self {
            root,
            store,
            limits,
            usage: Mutex::new(usage),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn limits(&self) -> BlobStoreLimits {
        self.limits
    }

    pub fn usage(&self) -> BlobUsage {
        *self.usage.lock()
    }

    /// Stores `bytes` under `key`, replacing any previous record.
    pub async fn insert(&self, key: KeyHash, bytes: &[u8]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let name = key.to_hex();

        if let Some(old) = self.metadata_size(&name).await {
            self.remove_record(&name).await?;
            let mut usage = self.usage.lock();
            usage.entries = usage.entries.saturating_sub(1);
            usage.bytes = usage.bytes.saturating_sub(ByteSize::from_usize(old));
        }

        cacache::write(&self.store, &name, bytes)
            .await
            .map_err(|e| CacheError::BlobStore(format!("cacache write failed: {e}")))?;
        {
            let mut usage = self.usage.lock();
            usage.entries += 1;
            usage.bytes = usage.bytes.saturating_add(ByteSize::from_usize(bytes.len()));
        }

        if self.is_over_limits() {
            self.evict_oldest(&name).await;
        }
        Ok(())
    }

    /// Returns the record for `key`. Corrupt records are removed and
    /// reported as misses.
    pub async fn lookup(&self, key: KeyHash) -> Result<Option<Vec<u8>>> {
        let name = key.to_hex();
        match cacache::read(&self.store, &name).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(cacache::Error::EntryNotFound(_, _)) => Ok(None),
            Err(e @ (cacache::Error::IntegrityError(_) | cacache::Error::SizeMismatch(_, _))) => {
                log::warn!("blob store dropping corrupt record; key={}, err={}", name, e);
                if let Err(err) = self.remove(key).await {
                    log::warn!(
                        "blob store corrupt record removal failed; key={}, err={}",
                        name,
                        err
                    );
                }
                Ok(None)
            }
            Err(e) => Err(CacheError::BlobStore(format!("cacache read failed: {e}"))),
        }
    }

    /// Removes the record for `key`. Returns whether one existed.
    pub async fn remove(&self, key: KeyHash) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let name = key.to_hex();
        let Some(size) = self.metadata_size(&name).await else {
            return Ok(false);
        };
        self.remove_record(&name).await?;
        let mut usage = self.usage.lock();
        usage.entries = usage.entries.saturating_sub(1);
        usage.bytes = usage.bytes.saturating_sub(ByteSize::from_usize(size));
        Ok(true)
    }

    /// Drops every record, keeping the version marker.
    pub async fn clear_all(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || wipe_dir_sync(&store)).await??;
        *self.usage.lock() = BlobUsage::default();
        log::info!("blob store cleared; root={}", self.root.display());
        Ok(())
    }

    fn is_over_limits(&self) -> bool {
        let usage = self.usage.lock();
        usage.entries > self.limits.max_entries || usage.bytes > self.limits.max_bytes
    }

    async fn metadata_size(&self, name: &str) -> Option<usize> {
        match cacache::metadata(&self.store, name).await {
            Ok(meta) => meta.map(|m| m.size),
            Err(e) => {
                log::debug!("blob store metadata failed; key={}, err={}", name, e);
                None
            }
        }
    }

    async fn remove_record(&self, name: &str) -> Result<()> {
        cacache::index::RemoveOpts::new()
            .remove_fully(true)
            .remove(&self.store, name)
            .await
            .map_err(|e| CacheError::BlobStore(format!("cacache remove failed: {e}")))
    }

    /// Drops oldest-written records until the store is back within limits.
    /// `keep` is the record just written and is never evicted.
    async fn evict_oldest(&self, keep: &str) {
        let store = self.store.clone();
        let entries = match tokio::task::spawn_blocking(move || list_entries_sync(&store)).await {
            Ok(v) => v,
            Err(e) => {
                log::warn!("blob store index ls join error: {e}");
                return;
            }
        };

        let mut candidates: Vec<_> = entries.into_iter().filter(|m| m.key != keep).collect();
        candidates.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.key.cmp(&b.key)));

        let mut removed = 0usize;
        for meta in candidates {
            if !self.is_over_limits() {
                break;
            }
            if let Err(e) = self.remove_record(&meta.key).await {
                log::warn!("blob store eviction failed; key={}, err={}", meta.key, e);
                continue;
            }
            let mut usage = self.usage.lock();
            usage.entries = usage.entries.saturating_sub(1);
            usage.bytes = usage.bytes.saturating_sub(ByteSize::from_usize(meta.size));
            removed += 1;
        }

        if removed > 0 {
            log::debug!("blob store evicted {} records; usage={:?}", removed, self.usage());
        }
    }
}

fn prepare_root_sync(root: &Path, store: &Path, version: u32) -> Result<()> {
    std::fs::create_dir_all(root)?;
    let marker = root.join(MARKER_FILE);
    match read_marker_sync(&marker).map(|found| check_marker(version, found)) {
        Some(Ok(())) => {
            std::fs::create_dir_all(store)?;
            return Ok(());
        }
        Some(Err(e)) => {
            log::info!("blob store wiping; root={}, err={}", root.display(), e);
        }
        None => {
            if store.exists() {
                log::warn!(
                    "blob store marker missing or corrupt; wiping root={}",
                    root.display()
                );
            }
        }
    }

    wipe_dir_sync(store)?;
    write_marker_sync(&marker, version)
}

fn check_marker(expected: u32, found: u32) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(CacheError::VersionMismatch { expected, found })
    }
}

fn read_marker_sync(path: &Path) -> Option<u32> {
    let mut f = File::open(path).ok()?;
    let mut buf = Vec::with_capacity(12);
    f.read_to_end(&mut buf).ok()?;
    if buf.len() != 12 || buf[0..8] != MARKER_MAGIC {
        return None;
    }
    let mut ver = [0u8; 4];
    ver.copy_from_slice(&buf[8..12]);
    Some(u32::from_le_bytes(ver))
}

fn write_marker_sync(path: &Path, version: u32) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut f = File::create(&tmp)?;
        f.write_all(&MARKER_MAGIC)?;
        f.write_all(&version.to_le_bytes())?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn wipe_dir_sync(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    std::fs::create_dir_all(dir)?;
    Ok(())
}

fn list_entries_sync(store: &Path) -> Vec<cacache::Metadata> {
    let mut out = Vec::new();
    for entry in cacache::index::ls(store) {
        match entry {
            Ok(m) => out.push(m),
            Err(e) => log::warn!("blob store index ls entry error: {e}"),
        }
    }
    out
}

fn compute_usage_sync(store: &Path) -> BlobUsage {
    list_entries_sync(store)
        .iter()
        .fold(BlobUsage::default(), |mut usage, m| {
            usage.entries += 1;
            usage.bytes = usage.bytes.saturating_add(ByteSize::from_usize(m.size));
            usage
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn limits(max_entries: usize, max_bytes: u64) -> BlobStoreLimits {
        BlobStoreLimits {
            max_entries,
            max_bytes: ByteSize::from_bytes(max_bytes),
            version: 1,
        }
    }

    #[tokio::test]
    async fn insert_overwrites_and_tracks_usage() {
        let dir = tempdir().unwrap();
        let store = BlobStore::open(dir.path(), limits(10, 1 << 20)).await.unwrap();
        let key = KeyHash::from_key_str("a");

        store.insert(key, &[1u8; 100]).await.unwrap();
        store.insert(key, &[2u8; 50]).await.unwrap();

        assert_eq!(store.lookup(key).await.unwrap().unwrap(), vec![2u8; 50]);
        assert_eq!(store.usage().entries, 1);
        assert_eq!(store.usage().bytes.as_bytes(), 50);

        assert!(store.remove(key).await.unwrap());
        assert!(!store.remove(key).await.unwrap());
        assert!(store.lookup(key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn over_limit_insert_evicts_oldest_written() {
        let dir = tempdir().unwrap();
        let store = BlobStore::open(dir.path(), limits(2, 1 << 20)).await.unwrap();
        let keys: Vec<_> = ["a", "b", "c"].iter().map(|k| KeyHash::from_key_str(k)).collect();

        for (i, key) in keys.iter().enumerate() {
            store.insert(*key, &[i as u8; 10]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(store.lookup(keys[0]).await.unwrap().is_none());
        assert!(store.lookup(keys[1]).await.unwrap().is_some());
        assert!(store.lookup(keys[2]).await.unwrap().is_some());
        assert_eq!(store.usage().entries, 2);
    }

    #[tokio::test]
    async fn version_change_wipes_records() {
        let dir = tempdir().unwrap();
        let key = KeyHash::from_key_str("a");
        {
            let store = BlobStore::open(dir.path(), limits(10, 1 << 20)).await.unwrap();
            store.insert(key, b"hello").await.unwrap();
        }
        {
            let store = BlobStore::open(dir.path(), limits(10, 1 << 20)).await.unwrap();
            assert!(store.lookup(key).await.unwrap().is_some());
        }

        let mut bumped = limits(10, 1 << 20);
        bumped.version = 2;
        let store = BlobStore::open(dir.path(), bumped).await.unwrap();
        assert!(store.lookup(key).await.unwrap().is_none());
        assert_eq!(store.usage(), BlobUsage::default());
    }

    #[test]
    fn marker_mismatch_reports_both_versions() {
        assert!(check_marker(3, 3).is_ok());
        match check_marker(3, 2) {
            Err(CacheError::VersionMismatch { expected, found }) => {
                assert_eq!((expected, found), (3, 2));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn corrupt_marker_wipes_records() {
        let dir = tempdir().unwrap();
        let key = KeyHash::from_key_str("a");
        {
            let store = BlobStore::open(dir.path(), limits(10, 1 << 20)).await.unwrap();
            store.insert(key, b"hello").await.unwrap();
        }
        std::fs::write(dir.path().join(MARKER_FILE), b"garbage").unwrap();

        let store = BlobStore::open(dir.path(), limits(10, 1 << 20)).await.unwrap();
        assert!(store.lookup(key).await.unwrap().is_none());
    }
}
