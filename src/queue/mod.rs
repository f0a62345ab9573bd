//! Task queue backends.
//!
//! The daemon picks one backend at construction and holds it as
//! `Arc<dyn TaskQueue>`; nothing re-resolves the backend per call.

pub mod beads;
pub mod file;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::{Config, QueueBackend, StatePaths};
use crate::error::QueueError;
use crate::task::Task;

pub use beads::BeadsQueue;
pub use file::FileQueue;

pub type QueueFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, QueueError>> + Send + 'a>>;

pub trait TaskQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Store a pending task and return the id the backend knows it by.
    fn enqueue<'a>(&'a self, task: &'a Task) -> QueueFuture<'a, String>;

    /// Pending tasks that nobody has claimed yet, oldest first.
    fn list_ready(&self) -> QueueFuture<'_, Vec<Task>>;

    /// Atomically mark `task` running. `false` means another consumer won.
    fn claim<'a>(&'a self, task: &'a Task) -> QueueFuture<'a, bool>;

    /// Remove or close a finished task.
    fn complete<'a>(&'a self, task: &'a Task, failed: bool) -> QueueFuture<'a, ()>;
}

pub fn create_queue(config: &Config, paths: &StatePaths) -> Arc<dyn TaskQueue> {
    match config.queue.backend {
        QueueBackend::File => Arc::new(FileQueue::new(paths.queue_dir())),
        QueueBackend::Beads => Arc::new(BeadsQueue::new(config.queue.beads_bin.clone())),
    }
}
