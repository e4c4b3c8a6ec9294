//! Explicitly owned registry state shared by one cache instance.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;

use crate::{
    error::{CacheError, Result},
    media::{DataVersion, MediaItem},
    path::{Path, PathTree},
};

const ENTITY_PRUNE_THRESHOLD: usize = 64;

#[derive(Default)]
struct EntityTable {
    entries: HashMap<Path, Weak<dyn MediaItem>>,
    prune_at: usize,
}

impl EntityTable {
    fn prune_dead(&mut self) {
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        self.prune_at = (self.entries.len() * 2).max(ENTITY_PRUNE_THRESHOLD);
    }
}

/// Path interning tree, path-to-entity side table and the data-version
/// counter for one cache instance.
pub struct CacheContext {
    paths: PathTree,
    entities: Mutex<EntityTable>,
    version_serial: AtomicU64,
}

impl fmt::Debug for CacheContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheContext")
            .field("bound_entities", &self.entities.lock().entries.len())
            .field("version_serial", &self.version_serial.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for CacheContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheContext {
    pub fn new() -> Self {
        Self {
            paths: PathTree::new(),
            entities: Mutex::new(EntityTable {
                entries: HashMap::new(),
                prune_at: ENTITY_PRUNE_THRESHOLD,
            }),
            version_serial: AtomicU64::new(0),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn paths(&self) -> &PathTree {
        &self.paths
    }

    pub fn path(&self, s: &str) -> Result<Path> {
        self.paths.from_string(s)
    }

    /// Returns a fresh, strictly increasing data version.
    pub fn next_version_number(&self) -> DataVersion {
        DataVersion::new(self.version_serial.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Binds `entity` to `path`. Fails if a live entity is already bound.
    pub fn bind_entity(
        &self,
        path: &Path,
        entity: &Arc<dyn MediaItem>,
    ) -> Result<()> {
        let mut table = self.entities.lock();
        if let Some(existing) = table.entries.get(path)
            && existing.strong_count() > 0
        {
            return Err(CacheError::AlreadyBound(path.to_string()));
        }

        table.entries.insert(path.clone(), Arc::downgrade(entity));
        if table.entries.len() >= table.prune_at {
            table.prune_dead();
        }
        Ok(())
    }

    /// Upgrades the weak back-reference for `path`, if the entity is alive.
    pub fn live_entity(&self, path: &Path) -> Option<Arc<dyn MediaItem>> {
        let mut table = self.entities.lock();
        let entity = table.entries.get(path).and_then(Weak::upgrade);
        if entity.is_none() {
            table.entries.remove(path);
        }
        entity
    }

    /// Number of bound entities that are still alive.
    pub fn live_entity_count(&self) -> usize {
        self.entities
            .lock()
            .entries
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}
