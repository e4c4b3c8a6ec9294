//! Configuration for the lumen cache engine.
//!
//! [`LumenConfig`] gathers the tunables of every cache layer, loads them from
//! the environment or a TOML/JSON file, and hands them to `lumen-core` as its
//! native limit types.

pub mod loader;
pub mod models;

pub use loader::ConfigSource;
pub use models::{AdapterSettings, BlobSettings, DownloadSettings, LumenConfig};
