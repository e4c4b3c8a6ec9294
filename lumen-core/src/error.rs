use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    /// The job or wait was canceled. Never surfaced as a failure.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download failed for {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("Catalog error: {0}")]
    Catalog(#[from] sqlx::Error),

    #[error("Catalog corrupt: {0}")]
    CatalogCorrupt(String),

    #[error("Format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Blob store error: {0}")]
    BlobStore(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Path already bound to a live entity: {0}")]
    AlreadyBound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported uri: {0}")]
    UnsupportedUri(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CacheError::Cancelled)
    }
}

impl From<image::ImageError> for CacheError {
    fn from(err: image::ImageError) -> Self {
        CacheError::DecodeFailed(err.to_string())
    }
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            CacheError::Cancelled
        } else {
            CacheError::Internal(format!("worker panicked: {err}"))
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
