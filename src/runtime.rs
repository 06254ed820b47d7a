//! Runtime helpers for async operations
//!
//! Marker work is split between three kinds of execution: the caller-facing
//! task that submits operations, background tasks that fetch and decode
//! imagery, and the single surface task that owns the render surface
//! (see [`crate::surface::worker`]). This module wraps the tokio primitives
//! used for the first two so the rest of the crate does not reach for them
//! directly.

use std::time::Duration;

use futures::Future;
use tokio::task::JoinHandle;

use crate::{MarkerError, Result};

/// Spawn a detached background task
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(future)
}

/// Spawn a future that fires after `delay`, unless the returned handle is
/// aborted first.
pub fn spawn_delayed<F>(delay: Duration, future: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        future.await;
    })
}

/// Execute a CPU-intensive closure (image decode, resize, composition) on
/// the blocking pool so it never stalls the caller or the surface task.
pub async fn execute_blocking<F, R>(task: F) -> Result<R>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| MarkerError::Cancelled(format!("blocking task failed: {}", e)))?
}

/// Async delay
pub async fn async_delay(duration: Duration) {
    tokio::time::sleep(duration).await;
}
