//! The long-running backup service.
//!
//! A [`Dispatcher`] turns filesystem events and periodic walks into
//! [`UploadTask`](tablevault_uploader::UploadTask)s, a [`TaskQueue`] holds
//! them, and a [`WorkerPool`] runs each one through the upload pipeline.

pub mod dispatcher;
pub mod error;
pub mod events;
pub mod filter;
pub mod queue;
pub mod walker;
pub mod worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tablevault_uploader::KeyScheme;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub use dispatcher::{DEFAULT_WALK_INTERVAL, Dispatcher, MAX_WALK_INTERVAL};
pub use error::ServiceError;
pub use events::{EventSource, FsSignal, WatchOptions, classify};
pub use filter::{Admission, DEFAULT_TRANSIENT_MARKER, FilterRules, IngestFilter};
pub use queue::TaskQueue;
pub use walker::{Reconciler, WalkSummary, walk_roots};
pub use worker::{PoolReport, TaskRunner, WorkerExit, WorkerPool};

/// Default number of upload workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Settings of a service run.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub roots: Vec<PathBuf>,
    pub recursive: bool,
    /// Watch directories created under a non-recursive root.
    pub auto_add: bool,
    /// Treat close-after-write events as finalized files.
    pub close_write: bool,
    pub workers: usize,
    pub walk_interval: Duration,
    /// Walk all roots once at startup.
    pub walk_at_start: bool,
    pub rules: FilterRules,
    pub keys: KeyScheme,
}

/// Watches and uploads until `cancel` fires or a worker fails fatally.
pub async fn run(
    config: ServiceConfig,
    runner: Arc<dyn TaskRunner>,
    cancel: CancellationToken,
) -> Result<PoolReport, ServiceError> {
    let queue = TaskQueue::new();
    let filter = Arc::new(IngestFilter::new(
        config.rules.clone(),
        config.keys.clone(),
        queue.clone(),
    ));
    let reconciler = Reconciler::new(config.roots.clone(), config.recursive, Arc::clone(&filter));
    let events = EventSource::start(
        &config.roots,
        WatchOptions {
            recursive: config.recursive,
            auto_add: config.auto_add,
            close_write: config.close_write,
        },
    )?;

    let pool = WorkerPool::spawn(config.workers, queue.clone(), runner, cancel.clone());
    let dispatcher = Dispatcher::new(
        Some(events),
        filter,
        reconciler,
        config.walk_interval,
        config.walk_at_start,
    );
    let mut dispatcher = tokio::spawn(dispatcher.run(cancel.clone()));

    info!(
        roots = config.roots.len(),
        workers = config.workers,
        walk_interval_secs = config.walk_interval.as_secs(),
        "backup service running"
    );

    let join = pool.join();
    tokio::pin!(join);
    let result = tokio::select! {
        result = &mut join => {
            cancel.cancel();
            queue.close();
            dispatcher.await?;
            result
        }
        exit = &mut dispatcher => {
            // Workers must not outlive discovery.
            let requested = cancel.is_cancelled();
            if !requested {
                error!("dispatcher exited, stopping workers");
            }
            cancel.cancel();
            queue.close();
            let result = join.await;
            exit?;
            if !requested {
                return Err(ServiceError::DispatcherStopped);
            }
            result
        }
    };

    if !queue.is_empty() {
        info!(pending = queue.len(), "stopped with tasks pending, the next walk will find them");
    }
    result
}

/// Walks every root once, uploads what is missing, then returns.
pub async fn run_single_pass(
    config: ServiceConfig,
    runner: Arc<dyn TaskRunner>,
) -> Result<PoolReport, ServiceError> {
    let queue = TaskQueue::new();
    let filter = Arc::new(IngestFilter::new(config.rules, config.keys, queue.clone()));
    let reconciler = Reconciler::new(config.roots, config.recursive, filter);

    let pool = WorkerPool::spawn(config.workers, queue.clone(), runner, CancellationToken::new());
    let walked = reconciler.run_once().await;
    queue.close();

    let report = pool.join().await?;
    walked?;
    info!(
        uploaded = report.uploaded,
        skipped = report.skipped,
        vanished = report.vanished,
        dropped = report.dropped,
        "single pass finished"
    );
    Ok(report)
}
