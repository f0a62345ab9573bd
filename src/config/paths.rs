use std::path::{Path, PathBuf};

pub const STATE_DIR_NAME: &str = ".nightshift";

/// Layout of the `.nightshift/` state directory next to the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    root: PathBuf,
}

impl StatePaths {
    /// State directory rooted at `base` (normally [`super::Config::base_dir`]).
    pub fn new(base: &Path) -> Self {
        Self {
            root: base.join(STATE_DIR_NAME),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.root.join("queue")
    }

    pub fn inbox_dir(&self) -> PathBuf {
        self.root.join("inbox")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.root.join("daemon.pid")
    }

    pub fn daemon_state_file(&self) -> PathBuf {
        self.root.join("daemon.json")
    }

    pub fn scheduler_state_file(&self) -> PathBuf {
        self.root.join("scheduler.json")
    }

    pub fn run_log_file(&self) -> PathBuf {
        self.logs_dir().join("code-agent-runs.jsonl")
    }

    /// Working directory for code-agent checkouts.
    pub fn checkouts_dir(&self) -> PathBuf {
        self.root.join("checkouts")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [self.queue_dir(), self.inbox_dir(), self.logs_dir()] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
