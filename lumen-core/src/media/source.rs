use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::{Mutex, RwLock};

use super::MediaItem;
use crate::{
    context::CacheContext,
    error::{CacheError, Result},
    path::Path,
};

/// Factory for the items living under one path prefix, e.g. `/uri/...`.
pub trait MediaSource: Send + Sync + fmt::Debug {
    fn prefix(&self) -> &str;

    fn create_media_object(
        &self,
        ctx: &CacheContext,
        path: &Path,
    ) -> Result<Arc<dyn MediaItem>>;

    fn find_path_by_uri(&self, _ctx: &CacheContext, _uri: &str) -> Option<Path> {
        None
    }
}

/// Resolves paths to live media items, creating them on first lookup.
pub struct DataManager {
    context: Arc<CacheContext>,
    sources: RwLock<HashMap<String, Arc<dyn MediaSource>>>,
    create_lock: Mutex<()>,
}

impl fmt::Debug for DataManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataManager")
            .field("sources", &self.sources.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DataManager {
    pub fn new(context: Arc<CacheContext>) -> Self {
        Self {
            context,
            sources: RwLock::new(HashMap::new()),
            create_lock: Mutex::new(()),
        }
    }

    pub fn context(&self) -> &Arc<CacheContext> {
        &self.context
    }

    pub fn add_source(&self, source: Arc<dyn MediaSource>) {
        let prefix = source.prefix().to_owned();
        if self.sources.write().insert(prefix.clone(), source).is_some() {
            log::warn!("media source replaced; prefix={prefix}");
        }
    }

    /// Returns the live item bound to `path`, or creates and binds one.
    pub fn get_media_object(&self, path: &Path) -> Result<Arc<dyn MediaItem>> {
        let _guard = self.create_lock.lock();
        if let Some(live) = self.context.live_entity(path) {
            return Ok(live);
        }

        let prefix = path.prefix();
        let source = self
            .sources
            .read()
            .get(&prefix)
            .cloned()
            .ok_or_else(|| {
                CacheError::NotFound(format!("no media source for prefix {prefix:?}"))
            })?;

        let item = source.create_media_object(&self.context, path)?;
        self.context.bind_entity(path, &item)?;
        log::debug!("media object created; path={path}");
        Ok(item)
    }

    pub fn get_media_object_str(&self, path: &str) -> Result<Arc<dyn MediaItem>> {
        let path = self.context.path(path)?;
        self.get_media_object(&path)
    }

    pub fn find_path_by_uri(&self, uri: &str) -> Option<Path> {
        self.sources
            .read()
            .values()
            .find_map(|source| source.find_path_by_uri(&self.context, uri))
    }
}
