use std::{
    fmt,
    io::Cursor,
    path::PathBuf,
    sync::Arc,
};

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use tokio::sync::Mutex;

use super::{DataVersion, FullImage, ImageType, MediaItem, MediaSource, Preview};
use crate::{
    blob::BlobCache,
    context::CacheContext,
    download::DownloadCache,
    error::{CacheError, Result},
    job::JobContext,
    path::Path,
};

pub const URI_PREFIX: &str = "uri";

#[derive(Debug, Clone)]
enum PrepareState {
    Init,
    Ready(PathBuf),
    Error(String),
}

/// Image addressed by a URI: a local file or an `http(s)` resource.
pub struct UriImage {
    path: Path,
    uri: String,
    version: DataVersion,
    blobs: Option<Arc<BlobCache>>,
    downloads: Option<DownloadCache>,
    state: Mutex<PrepareState>,
}

impl fmt::Debug for UriImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UriImage")
            .field("path", &self.path)
            .field("uri", &self.uri)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl UriImage {
    pub fn new(
        path: Path,
        uri: impl Into<String>,
        version: DataVersion,
        blobs: Option<Arc<BlobCache>>,
        downloads: Option<DownloadCache>,
    ) -> Self {
        Self {
            path,
            uri: uri.into(),
            version,
            blobs,
            downloads,
            state: Mutex::new(PrepareState::Init),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Resolves the URI to a readable local file, at most once.
    ///
    /// Concurrent callers wait on the first attempt. A canceled attempt
    /// leaves the state untouched so a later job may retry.
    async fn prepare_input(&self, ctx: &JobContext) -> Result<PathBuf> {
        let mut state = self.state.lock().await;
        match &*state {
            PrepareState::Ready(path) => return Ok(path.clone()),
            PrepareState::Error(reason) => {
                return Err(CacheError::DownloadFailed {
                    url: self.uri.clone(),
                    reason: reason.clone(),
                });
            }
            PrepareState::Init => {}
        }

        match self.resolve_input(ctx).await {
            Ok(path) => {
                *state = PrepareState::Ready(path.clone());
                Ok(path)
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                log::warn!(
                    "uri image input unavailable; uri={}, err={}",
                    self.uri,
                    e
                );
                *state = PrepareState::Error(e.to_string());
                Err(e)
            }
        }
    }

    async fn resolve_input(&self, ctx: &JobContext) -> Result<PathBuf> {
        let Ok(url) = url::Url::parse(&self.uri) else {
            return Ok(PathBuf::from(&self.uri));
        };

        match url.scheme() {
            "file" => url.to_file_path().map_err(|_| {
                CacheError::UnsupportedUri(format!("bad file uri: {}", self.uri))
            }),
            "http" | "https" => {
                let downloads = self.downloads.as_ref().ok_or_else(|| {
                    CacheError::UnsupportedUri(format!(
                        "no download cache for {}",
                        self.uri
                    ))
                })?;
                let entry = downloads.fetch(&self.uri, ctx).await?;
                Ok(entry.path().to_path_buf())
            }
            other => Err(CacheError::UnsupportedUri(format!(
                "scheme {other:?} in {}",
                self.uri
            ))),
        }
    }

    async fn cached_preview(&self, kind: ImageType) -> Option<Preview> {
        let blobs = self.blobs.as_ref()?;
        let bytes = blobs.get(&self.path, kind).await?;
        let decoded = tokio::task::spawn_blocking(move || {
            image::load_from_memory(&bytes).map(|img| img.to_rgba8())
        })
        .await;

        match decoded {
            Ok(Ok(rgba)) => Some(Preview::new(rgba)),
            Ok(Err(e)) => {
                log::warn!(
                    "cached preview undecodable; path={}, err={}",
                    self.path,
                    e
                );
                None
            }
            Err(e) => {
                log::warn!("cached preview decode join failed: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl MediaItem for UriImage {
    fn path(&self) -> &Path {
        &self.path
    }

    fn data_version(&self) -> DataVersion {
        self.version
    }

    async fn request_image(
        &self,
        kind: ImageType,
        ctx: &JobContext,
    ) -> Result<Preview> {
        if let Some(preview) = self.cached_preview(kind).await {
            return Ok(preview);
        }

        ctx.check()?;
        let file = self.prepare_input(ctx).await?;
        ctx.check()?;

        let target = kind.target_size();
        let (rgba, encoded) = tokio::task::spawn_blocking(move || {
            let img = open_image(&file)?;
            let thumb = if img.width().max(img.height()) > target {
                img.thumbnail(target, target)
            } else {
                img
            };
            let mut encoded = Vec::new();
            DynamicImage::ImageRgb8(thumb.to_rgb8())
                .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Jpeg)?;
            Ok::<_, CacheError>((thumb.to_rgba8(), encoded))
        })
        .await??;

        if let Some(blobs) = &self.blobs
            && let Err(e) = blobs.put(&self.path, kind, &encoded).await
        {
            log::warn!(
                "preview not written to blob cache; path={}, err={}",
                self.path,
                e
            );
        }

        Ok(Preview::new(rgba))
    }

    async fn request_full_image(&self, ctx: &JobContext) -> Result<FullImage> {
        ctx.check()?;
        let file = self.prepare_input(ctx).await?;
        ctx.check()?;
        let img = tokio::task::spawn_blocking(move || open_image(&file)).await??;
        Ok(FullImage::new(img))
    }
}

/// Downloaded files carry no useful extension, so the format is sniffed.
fn open_image(file: &std::path::Path) -> Result<DynamicImage> {
    Ok(image::ImageReader::open(file)?
        .with_guessed_format()?
        .decode()?)
}

/// Media source for `/uri/<percent-encoded uri>` paths.
#[derive(Debug, Clone, Default)]
pub struct UriSource {
    blobs: Option<Arc<BlobCache>>,
    downloads: Option<DownloadCache>,
}

impl UriSource {
    pub fn new(
        blobs: Option<Arc<BlobCache>>,
        downloads: Option<DownloadCache>,
    ) -> Self {
        Self { blobs, downloads }
    }

    pub fn path_for_uri(ctx: &CacheContext, uri: &str) -> Path {
        ctx.paths()
            .root()
            .child(URI_PREFIX)
            .child(urlencoding::encode(uri))
    }
}

impl MediaSource for UriSource {
    fn prefix(&self) -> &str {
        URI_PREFIX
    }

    fn create_media_object(
        &self,
        ctx: &CacheContext,
        path: &Path,
    ) -> Result<Arc<dyn MediaItem>> {
        let segments = path.segments();
        let [prefix, encoded] = segments.as_slice() else {
            return Err(CacheError::InvalidPath(format!(
                "expected /{URI_PREFIX}/<uri>, got {path}"
            )));
        };
        if prefix != URI_PREFIX {
            return Err(CacheError::InvalidPath(path.to_string()));
        }
        let uri = urlencoding::decode(encoded)
            .map_err(|e| CacheError::InvalidPath(format!("{path}: {e}")))?;

        Ok(Arc::new(UriImage::new(
            path.clone(),
            uri.into_owned(),
            ctx.next_version_number(),
            self.blobs.clone(),
            self.downloads.clone(),
        )))
    }

    fn find_path_by_uri(&self, ctx: &CacheContext, uri: &str) -> Option<Path> {
        Some(Self::path_for_uri(ctx, uri))
    }
}
