use std::{fmt, sync::Arc};

use parking_lot::RwLock;

use super::MediaItem;
use crate::error::Result;

/// Ordered collection the adapter slides over.
pub trait MediaSet: Send + Sync {
    fn media_item_count(&self) -> usize;

    /// Items in `[start, start + count)`, truncated at the end of the set.
    fn media_items(
        &self,
        start: usize,
        count: usize,
    ) -> Result<Vec<Arc<dyn MediaItem>>>;
}

/// In-memory media set whose contents can be swapped out.
#[derive(Default)]
pub struct ListMediaSet {
    items: RwLock<Vec<Arc<dyn MediaItem>>>,
}

impl fmt::Debug for ListMediaSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListMediaSet")
            .field("len", &self.items.read().len())
            .finish()
    }
}

impl ListMediaSet {
    pub fn new(items: Vec<Arc<dyn MediaItem>>) -> Self {
        Self {
            items: RwLock::new(items),
        }
    }

    pub fn replace(&self, items: Vec<Arc<dyn MediaItem>>) {
        *self.items.write() = items;
    }

    pub fn push(&self, item: Arc<dyn MediaItem>) {
        self.items.write().push(item);
    }

    pub fn remove(&self, index: usize) -> Option<Arc<dyn MediaItem>> {
        let mut items = self.items.write();
        (index < items.len()).then(|| items.remove(index))
    }
}

impl MediaSet for ListMediaSet {
    fn media_item_count(&self) -> usize {
        self.items.read().len()
    }

    fn media_items(
        &self,
        start: usize,
        count: usize,
    ) -> Result<Vec<Arc<dyn MediaItem>>> {
        let items = self.items.read();
        let start = start.min(items.len());
        let end = start.saturating_add(count).min(items.len());
        Ok(items[start..end].to_vec())
    }
}
