//! Last-request-wins deferred tasks.
//!
//! DESIGN
//! ======
//! A `LatestTask` owns at most one pending tokio task. Scheduling a new one
//! aborts the previous, so only the most recent request ever fires. Work
//! that must not interleave with a superseded request should do all of its
//! effects after its single `sleep` await, never across awaits.

use std::future::Future;
use std::sync::{Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::task::{AbortHandle, JoinHandle};

/// Slot for the single pending task of one kind.
#[derive(Debug, Default)]
pub struct LatestTask {
    slot: Mutex<Option<AbortHandle>>,
}

impl LatestTask {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `fut` on `runtime`, aborting whatever this slot scheduled before.
    pub fn spawn_on<F>(&self, runtime: &Handle, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let handle = runtime.spawn(fut);
        let previous = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle.abort_handle());
        if let Some(previous) = previous {
            previous.abort();
        }
        handle
    }

    /// Abort the pending task, if any. Returns true if one was still running.
    pub fn cancel(&self) -> bool {
        let previous = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match previous {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

/// Outcome of a transition that may have been deferred.
#[derive(Debug)]
pub enum Deferred<T> {
    /// Ran immediately (no runtime, or nothing to defer).
    Ready(T),
    /// Will run after the settle delay unless superseded.
    Pending(JoinHandle<T>),
}

impl<T> Deferred<T> {
    /// Wait for the outcome. `None` means a newer request superseded this one.
    pub async fn wait(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Pending(handle) => match handle.await {
                Ok(value) => Some(value),
                Err(_) => None,
            },
        }
    }
}
