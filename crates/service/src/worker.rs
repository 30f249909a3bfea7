//! Worker pool draining the task queue.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tablevault_uploader::{TaskProcessor, TaskReport, UploadError, UploadOutcome, UploadTask};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::ServiceError;
use crate::queue::TaskQueue;

/// Boxed future returned by [`TaskRunner::run`].
pub type RunFuture<'a> = Pin<Box<dyn Future<Output = Result<TaskReport, UploadError>> + Send + 'a>>;

/// Processes one task. An error is unrecoverable and stops the service.
pub trait TaskRunner: Send + Sync + 'static {
    fn run<'a>(&'a self, task: &'a UploadTask) -> RunFuture<'a>;
}

impl TaskRunner for TaskProcessor {
    fn run<'a>(&'a self, task: &'a UploadTask) -> RunFuture<'a> {
        Box::pin(self.process(task))
    }
}

/// Why a worker stopped.
#[derive(Debug)]
pub enum WorkerExit {
    /// The queue was closed and empty.
    Drained,
    Cancelled,
    Fatal(UploadError),
}

/// Totals across all workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub uploaded: u64,
    pub skipped: u64,
    pub vanished: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct PoolCounters {
    uploaded: AtomicU64,
    skipped: AtomicU64,
    vanished: AtomicU64,
    dropped: AtomicU64,
}

impl PoolCounters {
    fn record(&self, report: &TaskReport) {
        let counter = match report {
            TaskReport::Completed {
                outcome: UploadOutcome::Uploaded { .. },
                ..
            } => &self.uploaded,
            TaskReport::Completed {
                outcome: UploadOutcome::Skipped(_),
                ..
            } => &self.skipped,
            TaskReport::Completed {
                outcome: UploadOutcome::Vanished,
                ..
            } => &self.vanished,
            TaskReport::Dropped { .. } => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PoolReport {
        PoolReport {
            uploaded: self.uploaded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            vanished: self.vanished.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// A fixed set of workers, each processing one task at a time.
pub struct WorkerPool {
    workers: JoinSet<WorkerExit>,
    counters: Arc<PoolCounters>,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn spawn(
        count: usize,
        queue: TaskQueue,
        runner: Arc<dyn TaskRunner>,
        cancel: CancellationToken,
    ) -> Self {
        let counters = Arc::new(PoolCounters::default());
        let mut workers = JoinSet::new();
        for id in 0..count.max(1) {
            workers.spawn(worker_loop(
                id,
                queue.clone(),
                Arc::clone(&runner),
                Arc::clone(&counters),
                cancel.clone(),
            ));
        }
        debug!(workers = count.max(1), "worker pool started");
        Self {
            workers,
            counters,
            cancel,
        }
    }

    /// Waits for every worker to stop.
    ///
    /// The first fatal error cancels the whole service and is returned.
    pub async fn join(mut self) -> Result<PoolReport, ServiceError> {
        let mut fatal: Option<ServiceError> = None;

        while let Some(joined) = self.workers.join_next().await {
            let failure = match joined {
                Ok(WorkerExit::Drained) | Ok(WorkerExit::Cancelled) => continue,
                Ok(WorkerExit::Fatal(e)) => ServiceError::WorkerFatal(e),
                Err(e) => ServiceError::Join(e),
            };
            error!(error = %failure, "worker failed, shutting down");
            self.cancel.cancel();
            fatal.get_or_insert(failure);
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(self.counters.snapshot()),
        }
    }
}

async fn worker_loop(
    id: usize,
    queue: TaskQueue,
    runner: Arc<dyn TaskRunner>,
    counters: Arc<PoolCounters>,
    cancel: CancellationToken,
) -> WorkerExit {
    loop {
        let task = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(worker = id, "worker cancelled");
                return WorkerExit::Cancelled;
            }
            task = queue.pop() => task,
        };
        let Some(task) = task else {
            debug!(worker = id, "queue drained");
            return WorkerExit::Drained;
        };

        match runner.run(&task).await {
            Ok(report) => counters.record(&report),
            Err(e) => return WorkerExit::Fatal(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tablevault_uploader::{Strategy, Verdict};

    /// Records tasks and fails on paths containing "fatal".
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl TaskRunner for Recorder {
        fn run<'a>(&'a self, task: &'a UploadTask) -> RunFuture<'a> {
            Box::pin(async move {
                self.seen.lock().unwrap().push(task.remote_key.clone());
                if task.remote_key.contains("fatal") {
                    return Err(UploadError::Invariant("part out of order".into()));
                }
                let outcome = if task.remote_key.contains("old") {
                    UploadOutcome::Skipped(Verdict::AlreadyStored)
                } else {
                    UploadOutcome::Uploaded {
                        strategy: Strategy::Single,
                        bytes: 1,
                    }
                };
                Ok(TaskReport::Completed {
                    outcome,
                    attempts: 1,
                })
            })
        }
    }

    fn task(key: &str) -> UploadTask {
        UploadTask {
            local_path: format!("/d/{key}").into(),
            remote_key: key.into(),
        }
    }

    #[tokio::test]
    async fn drains_queue_then_exits() {
        let queue = TaskQueue::new();
        for key in ["a", "b", "old-c", "d"] {
            queue.push(task(key)).unwrap();
        }
        queue.close();

        let runner = Arc::new(Recorder::default());
        let pool = WorkerPool::spawn(2, queue, runner.clone(), CancellationToken::new());
        let report = pool.join().await.unwrap();

        assert_eq!(
            report,
            PoolReport {
                uploaded: 3,
                skipped: 1,
                ..PoolReport::default()
            }
        );
        let mut seen = runner.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "d", "old-c"]);
    }

    #[tokio::test]
    async fn cancellation_stops_idle_workers() {
        let queue = TaskQueue::new();
        let cancel = CancellationToken::new();
        let pool = WorkerPool::spawn(3, queue, Arc::new(Recorder::default()), cancel.clone());

        cancel.cancel();
        let report = tokio::time::timeout(std::time::Duration::from_secs(2), pool.join())
            .await
            .expect("should stop")
            .unwrap();
        assert_eq!(report, PoolReport::default());
    }

    #[tokio::test]
    async fn fatal_error_cancels_everything() {
        let queue = TaskQueue::new();
        queue.push(task("fatal")).unwrap();
        let cancel = CancellationToken::new();
        let pool = WorkerPool::spawn(2, queue.clone(), Arc::new(Recorder::default()), cancel.clone());

        let err = tokio::time::timeout(std::time::Duration::from_secs(2), pool.join())
            .await
            .expect("should stop")
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::WorkerFatal(UploadError::Invariant(_))
        ));
        assert!(cancel.is_cancelled());
        assert!(!queue.is_closed());
    }
}
