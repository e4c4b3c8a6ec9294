//! Media caching and prefetch engine.
//!
//! - [`adapter`]: sliding-window cache that decodes previews and full images
//!   around the item being viewed, one job at a time in priority order.
//! - [`download`]: URL-keyed disk cache with single-flight downloads, a
//!   SQLite catalog and LRU eviction.
//! - [`blob`]: versioned, size-bounded store for encoded previews.
//! - [`path`], [`context`], [`media`]: interned identity keys, the shared
//!   cache context and the media item abstractions tying them together.

pub mod adapter;
pub mod blob;
pub mod context;
pub mod download;
pub mod error;
pub mod hash;
pub mod job;
pub mod media;
pub mod path;
pub mod units;

#[cfg(test)]
pub(crate) mod testing;

pub use adapter::{AdapterCache, AdapterConfig, AdapterHandle, LoadingState, PhotoViewer};
pub use blob::{BlobCache, BlobStoreLimits};
pub use context::CacheContext;
pub use download::{DownloadCache, DownloadCacheLimits, DownloadEntry, HttpDownloader};
pub use error::{CacheError, Result};
pub use job::{JobContext, JobRunner, TokioExecutor};
pub use media::{DataManager, ListMediaSet, MediaItem, MediaSet, UriImage, UriSource};
pub use path::{Path, PathTree};
pub use units::ByteSize;
