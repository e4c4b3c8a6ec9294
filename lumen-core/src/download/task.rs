use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::DownloadEntry;

#[derive(Debug, Clone)]
pub(crate) enum TaskState {
    Pending,
    Done(DownloadEntry),
    Failed(String),
    Cancelled,
}

impl TaskState {
    pub fn is_pending(&self) -> bool {
        matches!(self, TaskState::Pending)
    }
}

/// One in-flight download shared by every waiter on the same URL.
#[derive(Debug)]
pub(crate) struct DownloadTask {
    pub url: String,
    pub token: CancellationToken,
    proxies: AtomicUsize,
    state: watch::Sender<TaskState>,
}

impl DownloadTask {
    pub fn new(url: &str) -> Arc<Self> {
        Arc::new(Self {
            url: url.to_owned(),
            token: CancellationToken::new(),
            proxies: AtomicUsize::new(0),
            state: watch::Sender::new(TaskState::Pending),
        })
    }

    /// Callers must hold the cache's task-map lock.
    pub fn add_proxy(&self) {
        self.proxies.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns the number of proxies still attached.
    pub fn release_proxy(&self) -> usize {
        self.proxies.fetch_sub(1, Ordering::AcqRel).saturating_sub(1)
    }

    pub fn proxies(&self) -> usize {
        self.proxies.load(Ordering::Acquire)
    }

    pub fn is_pending(&self) -> bool {
        self.state.borrow().is_pending()
    }

    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.state.subscribe()
    }

    pub fn finish(&self, state: TaskState) {
        self.state.send_replace(state);
    }
}
