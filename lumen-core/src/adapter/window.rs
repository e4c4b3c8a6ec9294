use std::sync::Arc;

use super::AdapterConfig;
use crate::media::MediaItem;

/// Half-open index ranges of the sliding window. The active range is always
/// contained in the content range, and both lie within `[0, size)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowBounds {
    pub content_start: usize,
    pub content_end: usize,
    pub active_start: usize,
    pub active_end: usize,
}

impl WindowBounds {
    pub fn content_contains(&self, index: usize) -> bool {
        index >= self.content_start && index < self.content_end
    }

    pub fn active_contains(&self, index: usize) -> bool {
        index >= self.active_start && index < self.active_end
    }

    pub fn content_len(&self) -> usize {
        self.content_end - self.content_start
    }

    pub fn active_len(&self) -> usize {
        self.active_end - self.active_start
    }
}

fn centered(current: usize, capacity: usize, size: usize) -> (usize, usize) {
    let start = current
        .saturating_sub(capacity / 2)
        .min(size.saturating_sub(capacity));
    (start, (start + capacity).min(size))
}

/// Computes the next window bounds for a center `current` in a set of
/// `size` items. The content range only moves when forced, when it no longer
/// covers the active range, or when the ideal start drifted by more than
/// `min_load_count`.
pub fn plan_window(
    current: usize,
    size: usize,
    prev: WindowBounds,
    config: &AdapterConfig,
    force: bool,
) -> WindowBounds {
    if size == 0 {
        return WindowBounds::default();
    }
    let current = current.min(size - 1);

    let (active_start, active_end) = centered(current, config.active_capacity(), size);
    if !force && active_start == prev.active_start && active_end == prev.active_end {
        return prev;
    }

    let (start, end) = centered(current, config.content_capacity, size);
    let recenter = force
        || prev.content_start > active_start
        || prev.content_end < active_end
        || prev.content_end > size
        || start.abs_diff(prev.content_start) > config.min_load_count;

    let (content_start, content_end) = if recenter {
        (start, end)
    } else {
        (prev.content_start, prev.content_end)
    };

    WindowBounds {
        content_start,
        content_end,
        active_start,
        active_end,
    }
}

/// Ring of media items for the content range, addressed by absolute index.
pub(crate) struct ContentWindow {
    slots: Vec<Option<Arc<dyn MediaItem>>>,
    bounds: WindowBounds,
}

impl ContentWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
            bounds: WindowBounds::default(),
        }
    }

    pub fn bounds(&self) -> WindowBounds {
        self.bounds
    }

    pub fn get(&self, index: usize) -> Option<&Arc<dyn MediaItem>> {
        if !self.bounds.content_contains(index) {
            return None;
        }
        self.slots[index % self.slots.len()].as_ref()
    }

    /// Moves to `next`. Returns true when the content range changed; slots
    /// that fell out of range are cleared.
    pub fn apply(&mut self, next: WindowBounds) -> bool {
        let prev = self.bounds;
        self.bounds = next;
        if prev.content_start == next.content_start && prev.content_end == next.content_end {
            return false;
        }
        let len = self.slots.len();
        for index in prev.content_start..prev.content_end {
            if !next.content_contains(index) {
                self.slots[index % len] = None;
            }
        }
        true
    }

    /// Stores `items` starting at absolute index `start`, skipping any that
    /// fall outside the content range.
    pub fn fill(&mut self, start: usize, items: Vec<Arc<dyn MediaItem>>) {
        let len = self.slots.len();
        for (offset, item) in items.into_iter().enumerate() {
            let index = start + offset;
            if self.bounds.content_contains(index) {
                self.slots[index % len] = Some(item);
            }
        }
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }
}
