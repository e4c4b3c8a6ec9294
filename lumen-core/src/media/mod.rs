//! Media items and the decoded artifacts they produce.

mod set;
mod source;
mod uri_image;

pub use set::{ListMediaSet, MediaSet};
pub use source::{DataManager, MediaSource};
pub use uri_image::{UriImage, UriSource};

use std::fmt;

use async_trait::async_trait;
use image::{DynamicImage, RgbaImage};
use parking_lot::Mutex;

use crate::{
    error::{CacheError, Result},
    job::JobContext,
    path::Path,
};

/// Change stamp of a media item. Larger means newer; never a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataVersion(u64);

impl DataVersion {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Size class of a cached preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageType {
    Thumbnail,
    MicroThumbnail,
}

impl ImageType {
    /// Stable numeric code used in blob keys.
    pub const fn code(self) -> u32 {
        match self {
            ImageType::Thumbnail => 1,
            ImageType::MicroThumbnail => 2,
        }
    }

    /// Longest side, in pixels, of a preview of this type.
    pub const fn target_size(self) -> u32 {
        match self {
            ImageType::Thumbnail => 640,
            ImageType::MicroThumbnail => 200,
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Decoded, downscaled preview of an item.
#[derive(Clone, PartialEq)]
pub struct Preview {
    image: RgbaImage,
}

impl Preview {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn byte_len(&self) -> usize {
        self.image.as_raw().len()
    }
}

impl fmt::Debug for Preview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preview")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// Full-resolution source that serves rectangular regions on demand.
///
/// Region decodes go through one lock per image.
pub struct FullImage {
    width: u32,
    height: u32,
    decoder: Mutex<DynamicImage>,
}

impl FullImage {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            decoder: Mutex::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Copies the region clipped to the image bounds.
    pub fn decode_region(
        &self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<RgbaImage> {
        if x >= self.width || y >= self.height {
            return Err(CacheError::DecodeFailed(format!(
                "region origin ({x}, {y}) outside {}x{}",
                self.width, self.height
            )));
        }
        let width = width.min(self.width - x);
        let height = height.min(self.height - y);
        let decoder = self.decoder.lock();
        Ok(decoder.crop_imm(x, y, width, height).to_rgba8())
    }
}

impl fmt::Debug for FullImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FullImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// A logical media item that can produce decoded artifacts.
///
/// Producers are expected to check `ctx` between expensive steps and to
/// return [`CacheError::Cancelled`] once it fires.
#[async_trait]
pub trait MediaItem: Send + Sync + fmt::Debug {
    fn path(&self) -> &Path;

    fn data_version(&self) -> DataVersion;

    fn supports_full_image(&self) -> bool {
        true
    }

    async fn request_image(
        &self,
        kind: ImageType,
        ctx: &JobContext,
    ) -> Result<Preview>;

    async fn request_preview(&self, ctx: &JobContext) -> Result<Preview> {
        self.request_image(ImageType::Thumbnail, ctx).await
    }

    async fn request_full_image(&self, ctx: &JobContext) -> Result<FullImage>;
}
