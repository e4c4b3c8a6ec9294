use std::fmt;

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use super::AdapterCache;
use crate::error::{CacheError, Result};

type InspectFn = Box<dyn FnOnce(&AdapterCache) + Send>;

/// Requests handled by the adapter's coordinating loop.
pub enum AdapterCommand {
    Start,
    Stop,
    SetCenter(usize),
    Reload,
    SetNeedFullImage(bool),
    /// Runs a read-only closure against the adapter state.
    Inspect(InspectFn),
    Shutdown,
}

impl fmt::Debug for AdapterCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterCommand::Start => f.write_str("Start"),
            AdapterCommand::Stop => f.write_str("Stop"),
            AdapterCommand::SetCenter(index) => f.debug_tuple("SetCenter").field(index).finish(),
            AdapterCommand::Reload => f.write_str("Reload"),
            AdapterCommand::SetNeedFullImage(enabled) => {
                f.debug_tuple("SetNeedFullImage").field(enabled).finish()
            }
            AdapterCommand::Inspect(_) => f.write_str("Inspect(..)"),
            AdapterCommand::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Cloneable sender side of a running adapter loop.
#[derive(Debug, Clone)]
pub struct AdapterHandle {
    tx: mpsc::UnboundedSender<AdapterCommand>,
}

fn loop_closed() -> CacheError {
    CacheError::Internal("adapter loop is not running".into())
}

impl AdapterHandle {
    pub fn send(&self, command: AdapterCommand) -> Result<()> {
        self.tx.send(command).map_err(|_| loop_closed())
    }

    pub fn start(&self) -> Result<()> {
        self.send(AdapterCommand::Start)
    }

    pub fn stop(&self) -> Result<()> {
        self.send(AdapterCommand::Stop)
    }

    pub fn set_center(&self, index: usize) -> Result<()> {
        self.send(AdapterCommand::SetCenter(index))
    }

    pub fn reload(&self) -> Result<()> {
        self.send(AdapterCommand::Reload)
    }

    pub fn set_need_full_image(&self, enabled: bool) -> Result<()> {
        self.send(AdapterCommand::SetNeedFullImage(enabled))
    }

    /// Stops the adapter and ends the loop.
    pub fn shutdown(&self) -> Result<()> {
        self.send(AdapterCommand::Shutdown)
    }

    /// Evaluates `f` on the loop, after every command sent before it.
    pub async fn inspect<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&AdapterCache) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.send(AdapterCommand::Inspect(Box::new(move |cache| {
            let _ = tx.send(f(cache));
        })))?;
        rx.await.map_err(|_| loop_closed())
    }
}

impl AdapterCache {
    /// Applies one command. Returns false once the loop should end.
    pub fn apply(&mut self, command: AdapterCommand) -> bool {
        match command {
            AdapterCommand::Start => self.start(),
            AdapterCommand::Stop => self.stop(),
            AdapterCommand::SetCenter(index) => self.set_center(index),
            AdapterCommand::Reload => self.reload(),
            AdapterCommand::SetNeedFullImage(enabled) => self.set_need_full_image(enabled),
            AdapterCommand::Inspect(f) => f(self),
            AdapterCommand::Shutdown => return false,
        }
        true
    }

    /// Serves commands and decode results until shutdown or until every
    /// handle is dropped, then stops the adapter.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<AdapterCommand>) {
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.apply(command) {
                            break;
                        }
                    }
                    None => break,
                },
                Some(done) = self.completion_rx.recv() => self.on_task_done(done),
            }
        }
        self.stop();
        log::debug!("adapter loop finished");
    }

    /// Moves the adapter onto its own tokio task.
    pub fn spawn(self) -> (AdapterHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let join = tokio::spawn(self.run(rx));
        (AdapterHandle { tx }, join)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        adapter::{AdapterConfig, LoadingState, PhotoViewer},
        context::CacheContext,
        job::{JobRunner, TokioExecutor},
        media::{ListMediaSet, MediaSet},
        testing::{FakeItem, RecordingViewer},
    };

    fn spawn_adapter(count: usize, index: usize) -> (AdapterHandle, JoinHandle<()>) {
        let ctx = CacheContext::shared();
        let set = Arc::new(ListMediaSet::new(FakeItem::many(&ctx, count)));
        let adapter = AdapterCache::new(
            AdapterConfig::defaults(),
            set as Arc<dyn MediaSet>,
            Arc::new(RecordingViewer::default()) as Arc<dyn PhotoViewer>,
            JobRunner::new(Arc::new(TokioExecutor::current(2).unwrap())),
            index,
        )
        .unwrap();
        adapter.spawn()
    }

    async fn wait_for_center(handle: &AdapterHandle) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let state = handle
                    .inspect(|cache| {
                        (cache.get_loading_state_at(0), cache.in_flight_count())
                    })
                    .await
                    .unwrap();
                if state == (LoadingState::Complete, 0) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("adapter did not settle");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn loop_applies_commands_in_order() {
        let (handle, join) = spawn_adapter(10, 0);
        handle.start().unwrap();
        handle.set_center(6).unwrap();
        let index = handle.inspect(|cache| cache.current_index()).await.unwrap();
        assert_eq!(index, 6);

        wait_for_center(&handle).await;
        let full = handle
            .inspect(|cache| cache.get_full_image_at(0).is_some())
            .await
            .unwrap();
        assert!(full);

        handle.shutdown().unwrap();
        join.await.unwrap();
        assert!(handle.start().is_err());
    }

    #[tokio::test]
    async fn dropping_every_handle_ends_the_loop() {
        let (handle, join) = spawn_adapter(3, 1);
        handle.start().unwrap();
        drop(handle);
        tokio::time::timeout(Duration::from_secs(5), join)
            .await
            .unwrap()
            .unwrap();
    }
}
