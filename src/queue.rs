//! Bounded-concurrency, start-rate-capped task queue.
//!
//! At most `concurrency` tasks run at once, and at most `concurrency` tasks
//! start within any rolling `interval`. Submissions are served in arrival
//! order. Tasks run on their own tokio task, so a failing or panicking task
//! only resolves its own submission.

use crate::rate_limit_config::QueueConfig;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Execution queue is shut down")]
    Closed,

    #[error("Queued task panicked")]
    TaskPanicked,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueStats {
    pub concurrency: usize,
    pub running: usize,
    /// Accepted tasks that have not finished yet, running ones included
    pub outstanding: usize,
}

pub struct ExecutionQueue {
    concurrency: usize,
    interval: Duration,
    slots: Arc<Semaphore>,
    // Held while a submission waits for its slot and start turn, which keeps
    // starts in arrival order.
    starts: Mutex<VecDeque<Instant>>,
    outstanding: watch::Sender<usize>,
    closed: AtomicBool,
}

impl ExecutionQueue {
    pub fn new(config: &QueueConfig) -> Self {
        let concurrency = config.concurrency.max(1);
        let (outstanding, _) = watch::channel(0);

        Self {
            concurrency,
            interval: config.interval,
            slots: Arc::new(Semaphore::new(concurrency)),
            starts: Mutex::new(VecDeque::with_capacity(concurrency)),
            outstanding,
            closed: AtomicBool::new(false),
        }
    }

    /// Queue `task` and wait for its output.
    ///
    /// Once accepted the task runs to completion even if the returned future
    /// is dropped.
    pub async fn submit<F, T>(&self, task: F) -> Result<T, QueueError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        let tracker = OutstandingGuard::new(self.outstanding.clone());

        let permit = {
            let mut starts = self.starts.lock().await;
            let permit = self
                .slots
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| QueueError::Closed)?;
            self.wait_for_start_turn(&mut starts).await;
            permit
        };

        let handle = tokio::spawn(async move {
            let _permit = permit;
            let _tracker = tracker;
            task.await
        });

        handle.await.map_err(|e| {
            error!(error = %e, "Queued task did not complete");
            QueueError::TaskPanicked
        })
    }

    /// Sleeps until starting one more task keeps the rolling interval within
    /// the cap, then records the start.
    async fn wait_for_start_turn(&self, starts: &mut VecDeque<Instant>) {
        loop {
            let now = Instant::now();
            while starts
                .front()
                .is_some_and(|started| now.duration_since(*started) >= self.interval)
            {
                starts.pop_front();
            }

            if starts.len() < self.concurrency {
                starts.push_back(now);
                return;
            }

            if let Some(oldest) = starts.front() {
                let until = *oldest + self.interval;
                debug!(
                    wait_ms = until.duration_since(now).as_millis() as u64,
                    "Start cap reached, delaying task"
                );
                sleep_until(until).await;
            }
        }
    }

    /// Stop accepting new submissions. Accepted tasks keep running.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wait until every accepted task has finished.
    pub async fn drain(&self) {
        let mut rx = self.outstanding.subscribe();
        // The sender lives in `self`, so this only errors if it was dropped.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            concurrency: self.concurrency,
            running: self.concurrency - self.slots.available_permits(),
            outstanding: *self.outstanding.borrow(),
        }
    }
}

/// Counts a submission as outstanding for as long as it lives.
struct OutstandingGuard {
    counter: watch::Sender<usize>,
}

impl OutstandingGuard {
    fn new(counter: watch::Sender<usize>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self { counter }
    }
}

impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        self.counter.send_modify(|n| *n = n.saturating_sub(1));
    }
}
