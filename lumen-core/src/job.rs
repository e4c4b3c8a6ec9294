//! Background job submission with cooperative cancellation.
//!
//! A [`JobRunner`] hands futures to a [`JobExecutor`]. Every job receives a
//! [`JobContext`] it can poll for cancellation, and the runner itself races
//! the job against its cancellation token so a canceled job reports
//! [`CacheError::Cancelled`] without waiting for the job body to notice.

use std::{
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::future::BoxFuture;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::{CacheError, Result};

/// Cancellation view handed to a running job.
#[derive(Debug, Clone, Default)]
pub struct JobContext {
    token: CancellationToken,
}

impl JobContext {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// A context that is never canceled by anyone else.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Returns `Err(Cancelled)` once the job has been canceled.
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            Err(CacheError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// A child context, canceled together with this one.
    pub fn child(&self) -> JobContext {
        JobContext::new(self.token.child_token())
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Caller-side handle of a submitted job.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    token: CancellationToken,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub type JobFuture = BoxFuture<'static, ()>;

/// Where submitted jobs actually run.
pub trait JobExecutor: Send + Sync + fmt::Debug {
    fn execute(&self, job: JobFuture);
}

/// Bounded pool on a tokio runtime: at most `workers` jobs run at once.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: tokio::runtime::Handle,
    permits: Arc<Semaphore>,
}

impl TokioExecutor {
    pub fn new(handle: tokio::runtime::Handle, workers: usize) -> Self {
        Self {
            handle,
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Uses the runtime the caller is running on.
    pub fn current(workers: usize) -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            CacheError::Internal(format!("no tokio runtime available: {e}"))
        })?;
        Ok(Self::new(handle, workers))
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

impl JobExecutor for TokioExecutor {
    fn execute(&self, job: JobFuture) {
        let permits = Arc::clone(&self.permits);
        self.handle.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                log::warn!("job executor closed; dropping job");
                return;
            };
            job.await;
        });
    }
}

/// Submits jobs and reports each result to a completion callback.
#[derive(Clone)]
pub struct JobRunner {
    executor: Arc<dyn JobExecutor>,
    next_id: Arc<AtomicU64>,
}

impl fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRunner")
            .field("executor", &self.executor)
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

impl JobRunner {
    pub fn new(executor: Arc<dyn JobExecutor>) -> Self {
        Self {
            executor,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Runs `job` on the executor and passes its result to `on_done`.
    ///
    /// `on_done` runs on the worker, exactly once, including for canceled
    /// jobs (with `Err(Cancelled)`).
    pub fn submit<T, F, Fut, D>(&self, job: F, on_done: D) -> TaskHandle
    where
        T: Send + 'static,
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        D: FnOnce(TaskId, Result<T>) + Send + 'static,
    {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let token = CancellationToken::new();
        let ctx = JobContext::new(token.clone());

        let fut = async move {
            let result = if ctx.is_cancelled() {
                Err(CacheError::Cancelled)
            } else {
                let body = job(ctx.clone());
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => Err(CacheError::Cancelled),
                    result = body => result,
                }
            };
            on_done(id, result);
        };

        self.executor.execute(Box::pin(fut));
        TaskHandle { id, token }
    }
}
