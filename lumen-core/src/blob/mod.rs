//! Disk cache for encoded previews, keyed by item path and image type.

mod store;

pub use store::{BlobStore, BlobStoreLimits, BlobUsage};

use std::path::PathBuf;

use crate::{
    error::Result,
    hash::KeyHash,
    media::ImageType,
    path::Path,
};

/// Typed front of a [`BlobStore`].
///
/// Each record carries its full key ahead of the payload; a record whose
/// embedded key differs from the requested one (a hash collision) is a miss.
#[derive(Debug)]
pub struct BlobCache {
    store: BlobStore,
}

impl BlobCache {
    pub async fn open(root: impl Into<PathBuf>, limits: BlobStoreLimits) -> Result<Self> {
        Ok(Self {
            store: BlobStore::open(root, limits).await?,
        })
    }

    pub fn from_store(store: BlobStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    pub async fn get(&self, path: &Path, kind: ImageType) -> Option<Vec<u8>> {
        let key = record_key(path, kind);
        self.get_raw(&key).await
    }

    pub async fn put(&self, path: &Path, kind: ImageType, bytes: &[u8]) -> Result<()> {
        let key = record_key(path, kind);
        self.put_raw(&key, bytes).await
    }

    pub async fn clear(&self, path: &Path, kind: ImageType) -> Result<()> {
        let key = record_key(path, kind);
        self.clear_raw(&key).await
    }

    pub async fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        let record = match self.store.lookup(KeyHash::from_key_str(key)).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("blob cache read failed; key={}, err={}", key, e);
                return None;
            }
        };

        let payload = split_record(key, &record);
        if payload.is_none() {
            log::debug!("blob cache key mismatch; key={}", key);
        }
        payload.map(<[u8]>::to_vec)
    }

    pub async fn put_raw(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let record = encode_record(key, bytes);
        self.store.insert(KeyHash::from_key_str(key), &record).await
    }

    pub async fn clear_raw(&self, key: &str) -> Result<()> {
        self.store.remove(KeyHash::from_key_str(key)).await?;
        Ok(())
    }
}

pub fn record_key(path: &Path, kind: ImageType) -> String {
    format!("{path}+{kind}")
}

fn encode_record(key: &str, bytes: &[u8]) -> Vec<u8> {
    let key = key.as_bytes();
    let mut record = Vec::with_capacity(4 + key.len() + bytes.len());
    record.extend_from_slice(&(key.len() as u32).to_le_bytes());
    record.extend_from_slice(key);
    record.extend_from_slice(bytes);
    record
}

fn split_record<'a>(key: &str, record: &'a [u8]) -> Option<&'a [u8]> {
    let (len, rest) = record.split_first_chunk::<4>()?;
    let len = u32::from_le_bytes(*len) as usize;
    if rest.len() < len || &rest[..len] != key.as_bytes() {
        return None;
    }
    Some(&rest[len..])
}
