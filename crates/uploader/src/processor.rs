use std::sync::Arc;

use tablevault_store::StoreConnector;
use tracing::{debug, info};

use crate::UploadError;
use crate::pipeline::Uploader;
use crate::retry::{RetryOutcome, RetryPolicy, execute_with_retry};
use crate::types::{Strategy, UploadOutcome, UploadTask, Verdict};

/// What happened to a task once the worker is done with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskReport {
    Completed { outcome: UploadOutcome, attempts: u32 },
    /// Retries used up. The task is dropped until the next walk finds it.
    Dropped { attempts: u32 },
}

/// Runs upload tasks with retries, one fresh connection per attempt.
#[derive(Clone)]
pub struct TaskProcessor {
    uploader: Uploader,
    connector: Arc<dyn StoreConnector>,
    policy: RetryPolicy,
}

impl TaskProcessor {
    pub fn new(uploader: Uploader, connector: Arc<dyn StoreConnector>, policy: RetryPolicy) -> Self {
        Self {
            uploader,
            connector,
            policy,
        }
    }

    /// Processes one task to completion.
    ///
    /// Only an unrecoverable failure is returned as an error; everything else
    /// is reported and logged.
    pub async fn process(&self, task: &UploadTask) -> Result<TaskReport, UploadError> {
        let uploader = &self.uploader;
        let outcome = execute_with_retry(
            &self.policy,
            self.connector.as_ref(),
            &task.remote_key,
            |store| async move { uploader.upload(store.as_ref(), task).await },
        )
        .await;

        match outcome {
            RetryOutcome::Succeeded { value, attempts } => {
                log_outcome(task, &value);
                Ok(TaskReport::Completed {
                    outcome: value,
                    attempts,
                })
            }
            RetryOutcome::Exhausted { attempts, .. } => Ok(TaskReport::Dropped { attempts }),
            RetryOutcome::Fatal(e) => Err(e),
        }
    }
}

fn log_outcome(task: &UploadTask, outcome: &UploadOutcome) {
    match outcome {
        UploadOutcome::Uploaded {
            strategy: Strategy::Single,
            bytes,
        } => info!(key = %task.remote_key, bytes, "uploaded"),
        UploadOutcome::Uploaded {
            strategy: Strategy::Multipart { parts },
            bytes,
        } => info!(key = %task.remote_key, bytes, parts, "uploaded in parts"),
        UploadOutcome::Skipped(Verdict::AlreadyStored) => {
            debug!(key = %task.remote_key, "already backed up")
        }
        // Mismatches were logged as warnings by the integrity check.
        UploadOutcome::Skipped(_) => {}
        UploadOutcome::Vanished => {
            debug!(path = %task.local_path.display(), "skipped vanished file")
        }
    }
}
