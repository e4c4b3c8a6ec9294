use std::sync::Arc;

use crate::{
    job::TaskHandle,
    media::{DataVersion, FullImage, Preview},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageVariant {
    Preview,
    Full,
}

/// Decoded state and in-flight work for one visible item.
#[derive(Debug, Default)]
pub(crate) struct ImageEntry {
    pub preview: Option<Arc<Preview>>,
    pub full: Option<Arc<FullImage>>,
    pub preview_task: Option<TaskHandle>,
    pub full_task: Option<TaskHandle>,
    pub requested_preview: Option<DataVersion>,
    pub requested_full: Option<DataVersion>,
    pub failed: bool,
}

impl ImageEntry {
    pub fn task(&self, variant: ImageVariant) -> Option<&TaskHandle> {
        match variant {
            ImageVariant::Preview => self.preview_task.as_ref(),
            ImageVariant::Full => self.full_task.as_ref(),
        }
    }

    pub fn task_slot(&mut self, variant: ImageVariant) -> &mut Option<TaskHandle> {
        match variant {
            ImageVariant::Preview => &mut self.preview_task,
            ImageVariant::Full => &mut self.full_task,
        }
    }

    pub fn requested(&self, variant: ImageVariant) -> Option<DataVersion> {
        match variant {
            ImageVariant::Preview => self.requested_preview,
            ImageVariant::Full => self.requested_full,
        }
    }

    pub fn requested_slot(&mut self, variant: ImageVariant) -> &mut Option<DataVersion> {
        match variant {
            ImageVariant::Preview => &mut self.requested_preview,
            ImageVariant::Full => &mut self.requested_full,
        }
    }

    /// Cancels the variant's task and forgets what it was requested for.
    pub fn cancel(&mut self, variant: ImageVariant) {
        if let Some(task) = self.task_slot(variant).take() {
            task.cancel();
        }
        *self.requested_slot(variant) = None;
    }

    pub fn drop_full_image(&mut self) {
        self.cancel(ImageVariant::Full);
        self.full = None;
    }

    /// Cancels all work and releases every decoded artifact.
    pub fn teardown(&mut self) {
        self.cancel(ImageVariant::Preview);
        self.cancel(ImageVariant::Full);
        self.preview = None;
        self.full = None;
    }

    pub fn in_flight(&self) -> usize {
        usize::from(self.preview_task.is_some()) + usize::from(self.full_task.is_some())
    }
}
