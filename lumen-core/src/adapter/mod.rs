//! Sliding-window cache over a [`MediaSet`](crate::media::MediaSet).
//!
//! The adapter keeps a large content range of media items around the
//! current index and, inside it, a small active range whose items get
//! decoded previews and full images. At most one decode job is admitted per
//! scan so the item the viewer is looking at always loads first.

mod cache;
mod coordinator;
mod entry;
mod fetch;
mod viewer;
mod window;

pub use cache::{AdapterCache, Decoded, TaskCompletion};
pub use coordinator::{AdapterCommand, AdapterHandle};
pub use entry::ImageVariant;
pub use fetch::{ImageFetch, fetch_sequence};
pub use viewer::{LoadingState, PhotoViewer};
pub use window::{WindowBounds, plan_window};

use crate::error::{CacheError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Items on each side of the center that get decoded artifacts.
    pub active_radius: usize,
    /// Number of media items held around the center.
    pub content_capacity: usize,
    /// How far the ideal content start may drift before the content range
    /// is reloaded.
    pub min_load_count: usize,
    /// Items on each side of the center that also get full images.
    pub full_image_radius: usize,
}

impl AdapterConfig {
    pub const fn defaults() -> Self {
        Self {
            active_radius: 1,
            content_capacity: 256,
            min_load_count: 16,
            full_image_radius: 1,
        }
    }

    pub const fn active_capacity(&self) -> usize {
        2 * self.active_radius + 1
    }

    pub fn validate(&self) -> Result<()> {
        if self.content_capacity < self.active_capacity() {
            return Err(CacheError::InvalidConfig(format!(
                "content_capacity {} is smaller than the active window {}",
                self.content_capacity,
                self.active_capacity()
            )));
        }
        if self.full_image_radius > self.active_radius {
            return Err(CacheError::InvalidConfig(format!(
                "full_image_radius {} exceeds active_radius {}",
                self.full_image_radius, self.active_radius
            )));
        }
        Ok(())
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self::defaults()
    }
}
