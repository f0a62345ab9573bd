use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;

use super::{QueueFuture, TaskQueue};
use crate::error::QueueError;
use crate::task::{Task, TaskStatus};
use crate::util::fs::{read_json, write_json};

/// One JSON file per task under `.nightshift/queue/`.
///
/// A claim exclusively creates `<id>.lock` next to the task file, so two
/// consumers racing on the same task cannot both win.
pub struct FileQueue {
    dir: PathBuf,
}

impl FileQueue {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn task_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn lock_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.lock"))
    }

    async fn enqueue_task(&self, task: &Task) -> Result<String, QueueError> {
        let mut pending = task.clone();
        pending.status = TaskStatus::Pending;
        write_json(&self.task_path(&task.id), &pending).await?;
        tracing::debug!(task_id = %task.id, "task queued");
        Ok(task.id.clone())
    }

    async fn ready_tasks(&self) -> Result<Vec<Task>, QueueError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut tasks = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Some(task) = read_json::<Task>(&path).await else {
                continue;
            };
            if task.status == TaskStatus::Pending
                && !tokio::fs::try_exists(self.lock_path(&task.id))
                    .await
                    .unwrap_or(false)
            {
                tasks.push(task);
            }
        }
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    async fn claim_task(&self, task: &Task) -> Result<bool, QueueError> {
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.lock_path(&task.id))
            .await
        {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        let mut running = task.clone();
        if !running.transition(TaskStatus::Running) {
            remove_if_present(&self.lock_path(&task.id)).await?;
            return Ok(false);
        }
        running.started_at = Some(Utc::now());
        write_json(&self.task_path(&task.id), &running).await?;
        Ok(true)
    }

    async fn complete_task(&self, task: &Task) -> Result<(), QueueError> {
        remove_if_present(&self.task_path(&task.id)).await?;
        remove_if_present(&self.lock_path(&task.id)).await
    }
}

async fn remove_if_present(path: &Path) -> Result<(), QueueError> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

impl TaskQueue for FileQueue {
    fn name(&self) -> &str {
        "file"
    }

    fn enqueue<'a>(&'a self, task: &'a Task) -> QueueFuture<'a, String> {
        Box::pin(self.enqueue_task(task))
    }

    fn list_ready(&self) -> QueueFuture<'_, Vec<Task>> {
        Box::pin(self.ready_tasks())
    }

    fn claim<'a>(&'a self, task: &'a Task) -> QueueFuture<'a, bool> {
        Box::pin(self.claim_task(task))
    }

    fn complete<'a>(&'a self, task: &'a Task, _failed: bool) -> QueueFuture<'a, ()> {
        Box::pin(self.complete_task(task))
    }
}
