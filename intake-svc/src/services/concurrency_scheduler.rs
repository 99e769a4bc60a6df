//! Bounded, chunked task runner
//!
//! Tasks are partitioned into consecutive chunks of `concurrency_limit`.
//! A chunk runs concurrently and is awaited in full before the next one
//! starts; `inter_batch_delay` separates chunks (never after the last).
//!
//! Every task runs in its own tokio task, so a panic surfaces as a
//! [`TaskError`] in that task's slot and siblings keep running.

use futures::future::join_all;
use intake_common::{Error, Result};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Abnormal task termination
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Task was aborted")]
    Aborted,
}

/// Chunked scheduler with a fixed concurrency cap
#[derive(Debug, Clone)]
pub struct ConcurrencyScheduler {
    concurrency_limit: usize,
    inter_batch_delay: Duration,
}

impl ConcurrencyScheduler {
    /// A limit of zero would never run anything and is rejected
    pub fn new(concurrency_limit: usize, inter_batch_delay: Duration) -> Result<Self> {
        if concurrency_limit == 0 {
            return Err(Error::InvalidInput(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            concurrency_limit,
            inter_batch_delay,
        })
    }

    /// Run all tasks; results come back in input order
    pub async fn run<F, Fut, T>(&self, tasks: Vec<F>) -> Vec<std::result::Result<T, TaskError>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let total = tasks.len();
        let mut results = Vec::with_capacity(total);
        let mut pending = tasks.into_iter().peekable();
        let mut chunk_index = 0usize;

        while pending.peek().is_some() {
            if chunk_index > 0 && !self.inter_batch_delay.is_zero() {
                tokio::time::sleep(self.inter_batch_delay).await;
            }

            let handles: Vec<_> = pending
                .by_ref()
                .take(self.concurrency_limit)
                .map(|task| tokio::spawn(task()))
                .collect();

            tracing::trace!(chunk = chunk_index, size = handles.len(), total, "Running chunk");

            for joined in join_all(handles).await {
                results.push(joined.map_err(|e| {
                    if e.is_panic() {
                        let payload = e.into_panic();
                        let message = payload
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| payload.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".to_string());
                        TaskError::Panicked(message)
                    } else {
                        TaskError::Aborted
                    }
                }));
            }

            chunk_index += 1;
        }

        results
    }
}
