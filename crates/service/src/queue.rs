//! Shared queue of pending uploads.

use async_channel as chan;
use tablevault_uploader::UploadTask;

/// Unbounded multi-producer multi-consumer FIFO of [`UploadTask`]s.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct TaskQueue {
    tx: chan::Sender<UploadTask>,
    rx: chan::Receiver<UploadTask>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        let (tx, rx) = chan::unbounded();
        Self { tx, rx }
    }

    /// Appends a task. Returns the task back if the queue is closed.
    pub fn push(&self, task: UploadTask) -> Result<(), UploadTask> {
        self.tx.try_send(task).map_err(|e| e.into_inner())
    }

    /// Waits for the next task. `None` once the queue is closed and empty.
    pub async fn pop(&self) -> Option<UploadTask> {
        self.rx.recv().await.ok()
    }

    /// Stops accepting tasks. Tasks already queued can still be popped.
    pub fn close(&self) {
        self.tx.close();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
