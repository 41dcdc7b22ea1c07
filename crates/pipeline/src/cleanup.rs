//! Deferred workspace cleanup.
//!
//! A single worker task owns every pending removal. [`CleanupScheduler::schedule`]
//! returns a [`DeliveryGuard`] that the response body holds while the archive
//! is streamed; the workspace is removed once the delay has elapsed **and**
//! the guard has been dropped, so a slow client can never lose the file it is
//! downloading. Failed jobs go through [`CleanupScheduler::discard`], which
//! removes the workspace right away.
//!
//! On [`CleanupScheduler::shutdown`] the worker stops waiting and removes
//! every workspace still pending before returning.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use deepscan_core::types::JobId;
use deepscan_core::workspace;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Default grace period between packaging and workspace removal.
pub const CLEANUP_DELAY: Duration = Duration::from_secs(60);

/// Lower bound for configured cleanup delays.
pub const MIN_CLEANUP_DELAY: Duration = CLEANUP_DELAY;

/// Clamp a configured delay to [`MIN_CLEANUP_DELAY`].
pub fn clamp_delay(delay: Duration) -> Duration {
    delay.max(MIN_CLEANUP_DELAY)
}

/// One pending removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupTask {
    pub job_id: JobId,
    pub path: PathBuf,
    pub delay: Duration,
}

/// Held by whoever is still reading from the workspace. Dropping it (or
/// calling [`DeliveryGuard::release`]) lets the scheduled removal proceed.
#[derive(Debug)]
pub struct DeliveryGuard {
    job_id: JobId,
    _released: oneshot::Sender<()>,
}

impl DeliveryGuard {
    /// Explicitly release the workspace.
    pub fn release(self) {}
}

impl Drop for DeliveryGuard {
    fn drop(&mut self) {
        tracing::debug!(job_id = %self.job_id, "Workspace released by reader");
    }
}

enum Command {
    Schedule {
        task: CleanupTask,
        released: oneshot::Receiver<()>,
    },
    Discard {
        job_id: JobId,
        path: PathBuf,
    },
}

/// Handle to the cleanup worker. Cheap to clone.
#[derive(Clone)]
pub struct CleanupScheduler {
    tx: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    delay: Duration,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for CleanupScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupScheduler")
            .field("delay", &self.delay)
            .field("stopped", &self.cancel.is_cancelled())
            .finish()
    }
}

impl CleanupScheduler {
    /// Spawn the worker. Must be called from within a Tokio runtime.
    ///
    /// `delay` is used as given; callers reading it from configuration clamp
    /// it with [`clamp_delay`] first.
    pub fn start(delay: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run(rx, cancel.clone()));

        tracing::info!(delay_secs = delay.as_secs_f64(), "Cleanup scheduler started");

        Self {
            tx,
            cancel,
            delay,
            worker: Arc::new(Mutex::new(Some(worker))),
        }
    }

    /// Delay applied to every scheduled removal.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule removal of `path` once the delay has elapsed and the returned
    /// guard is dropped. Never blocks.
    ///
    /// Scheduling the same workspace twice is harmless: the second removal
    /// finds nothing and counts as done.
    pub fn schedule(&self, job_id: JobId, path: PathBuf) -> DeliveryGuard {
        let (released_tx, released_rx) = oneshot::channel();
        let task = CleanupTask {
            job_id,
            path,
            delay: self.delay,
        };

        if self
            .tx
            .send(Command::Schedule {
                task,
                released: released_rx,
            })
            .is_err()
        {
            tracing::warn!(job_id = %job_id, "Cleanup scheduler stopped; workspace left in place");
        } else {
            tracing::debug!(
                job_id = %job_id,
                delay_secs = self.delay.as_secs_f64(),
                "Cleanup scheduled",
            );
        }

        DeliveryGuard {
            job_id,
            _released: released_tx,
        }
    }

    /// Remove `path` as soon as the worker picks it up, without delay or gate.
    pub fn discard(&self, job_id: JobId, path: PathBuf) {
        if self.tx.send(Command::Discard { job_id, path }).is_err() {
            tracing::warn!(job_id = %job_id, "Cleanup scheduler stopped; workspace left in place");
        }
    }

    /// Stop the worker, removing every pending workspace first. Idempotent.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Cleanup worker panicked");
            }
        }
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Command>, cancel: CancellationToken) {
    let mut waits: JoinSet<u64> = JoinSet::new();
    let mut pending: HashMap<u64, CleanupTask> = HashMap::new();
    let mut next_id: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            cmd = rx.recv() => match cmd {
                Some(Command::Schedule { task, released }) => {
                    let id = next_id;
                    next_id += 1;
                    let delay = task.delay;
                    pending.insert(id, task);
                    waits.spawn(async move {
                        // A dropped sender resolves the receiver too.
                        let _ = tokio::join!(tokio::time::sleep(delay), released);
                        id
                    });
                }
                Some(Command::Discard { job_id, path }) => {
                    tracing::debug!(job_id = %job_id, "Discarding failed job workspace");
                    workspace::delete(&path).await;
                }
                None => break,
            },
            Some(joined) = waits.join_next(), if !waits.is_empty() => match joined {
                Ok(id) => {
                    if let Some(task) = pending.remove(&id) {
                        remove(&task).await;
                    }
                }
                Err(e) => tracing::error!(error = %e, "Cleanup wait task failed"),
            },
        }
    }

    waits.abort_all();

    // Commands that raced the shutdown still get their workspace removed.
    rx.close();
    while let Ok(cmd) = rx.try_recv() {
        match cmd {
            Command::Schedule { task, .. } => {
                pending.insert(next_id, task);
                next_id += 1;
            }
            Command::Discard { path, .. } => {
                workspace::delete(&path).await;
            }
        }
    }

    let flushed = pending.len();
    for task in pending.into_values() {
        remove(&task).await;
    }

    tracing::info!(flushed, "Cleanup scheduler stopped");
}

async fn remove(task: &CleanupTask) {
    if workspace::delete(&task.path).await {
        tracing::info!(job_id = %task.job_id, path = %task.path.display(), "Workspace cleaned up");
    }
}
