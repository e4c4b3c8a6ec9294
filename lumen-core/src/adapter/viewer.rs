/// Load progress of the preview at one offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingState {
    Unloaded,
    Complete,
    Failed,
}

/// Event sink for the adapter. Called on the coordinating loop only, so
/// implementations must not block.
pub trait PhotoViewer: Send + Sync {
    /// The artifact of the item at `offset` from the center changed.
    fn on_image_changed(&self, offset: isize);

    /// The items around the center changed. `from_index[i]` is the slot the
    /// item now in slot `i` occupied before, or `None` if it is new. Slot `i`
    /// corresponds to offset `i - radius`.
    fn on_data_changed(&self, from_index: &[Option<usize>]);

    fn on_loading_started(&self) {}

    fn on_loading_finished(&self, _failed: bool) {}
}
