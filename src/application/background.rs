//! Best-effort background work
//!
//! Side effects of a validation (usage timestamps, quota increments, audit,
//! analytics, threat detection) are queued here instead of being awaited on
//! the request path. Each task's failure is logged with its label and never
//! reaches the caller.

use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::infrastructure::rate_limiter::LocalRateLimiter;

type TaskFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

struct BestEffortTask {
    label: &'static str,
    future: TaskFuture,
}

/// Counts queued and running tasks so callers can wait for quiescence
#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    drained: Notify,
}

impl Pending {
    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }
}

/// Bounded queue drained by a single background worker
///
/// A full queue drops the new task with a warning rather than applying
/// backpressure to requests. Cancelling the shutdown token stops intake;
/// tasks already queued still run.
#[derive(Clone)]
pub struct BestEffortQueue {
    sender: mpsc::Sender<BestEffortTask>,
    pending: Arc<Pending>,
    shutdown_token: CancellationToken,
}

impl BestEffortQueue {
    /// Create the queue and spawn its worker on the current runtime
    pub fn spawn(capacity: usize, shutdown_token: CancellationToken) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let pending = Arc::new(Pending::default());

        tokio::spawn(run_worker(receiver, pending.clone(), shutdown_token.clone()));

        Self {
            sender,
            pending,
            shutdown_token,
        }
    }

    /// Queue a task; returns false if it was dropped
    pub fn submit<F, E>(&self, label: &'static str, task: F) -> bool
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display,
    {
        if self.shutdown_token.is_cancelled() {
            warn!(task = label, "Best-effort queue shut down, dropping task");
            return false;
        }

        let task = BestEffortTask {
            label,
            future: Box::pin(async move { task.await.map_err(|e| e.to_string()) }),
        };

        self.pending.count.fetch_add(1, Ordering::SeqCst);
        match self.sender.try_send(task) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(task)) => {
                warn!(task = task.label, "Best-effort queue full, dropping task");
                self.pending.finish();
                false
            }
            Err(mpsc::error::TrySendError::Closed(task)) => {
                warn!(task = task.label, "Best-effort worker stopped, dropping task");
                self.pending.finish();
                false
            }
        }
    }

    /// Wait until every submitted task has finished
    pub async fn idle(&self) {
        loop {
            let drained = self.pending.drained.notified();
            if self.pending.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            drained.await;
        }
    }

    /// Number of queued or running tasks
    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::SeqCst)
    }

    /// Stop accepting tasks; the worker finishes what is already queued
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<BestEffortTask>,
    pending: Arc<Pending>,
    shutdown_token: CancellationToken,
) {
    debug!("Best-effort worker started");
    loop {
        tokio::select! {
            task = receiver.recv() => match task {
                Some(task) => run_task(task, &pending).await,
                None => break,
            },
            _ = shutdown_token.cancelled() => {
                receiver.close();
                while let Some(task) = receiver.recv().await {
                    run_task(task, &pending).await;
                }
                break;
            }
        }
    }
    info!("Best-effort worker shutting down");
}

/// Run one task on its own Tokio task so a panic stays contained
async fn run_task(task: BestEffortTask, pending: &Pending) {
    match tokio::spawn(task.future).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(task = task.label, error = %e, "Best-effort task failed"),
        Err(e) => error!(task = task.label, error = %e, "Best-effort task panicked"),
    }
    pending.finish();
}

/// Spawn a worker that periodically drops finished local rate-limit windows
pub fn spawn_limiter_cleanup_worker(
    limiter: Arc<LocalRateLimiter>,
    interval: Duration,
    shutdown_token: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => limiter.cleanup().await,
                _ = shutdown_token.cancelled() => {
                    debug!("Rate limiter cleanup worker shutting down");
                    break;
                }
            }
        }
    });
}
