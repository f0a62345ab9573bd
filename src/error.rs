use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for Nightshift.
///
/// Each subsystem defines its own error variant. Library callers can match on
/// these to decide recovery strategy; internal code continues to use
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum NightshiftError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Process invocation ──────────────────────────────────────────────
    #[error("process: {0}")]
    Process(#[from] ProcessError),

    // ── Queue backends ──────────────────────────────────────────────────
    #[error("queue: {0}")]
    Queue(#[from] QueueError),

    // ── State / log persistence ─────────────────────────────────────────
    #[error("persistence: {0}")]
    Persistence(#[from] PersistenceError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid timeout {0:?}: use e.g. \"30m\", \"2h\", \"90s\", \"5000ms\"")]
    Timeout(String),

    #[error("invalid cron expression {expression:?}: {message}")]
    Cron { expression: String, message: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Process invocation errors ──────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("task {task_id} failed: {message}")]
    Execution { task_id: String, message: String },

    #[error("signal delivery failed: {0}")]
    Signal(String),
}

// ─── Queue errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("tracker command `{command}` failed: {stderr}")]
    Tracker { command: String, stderr: String },

    #[error("tracker returned malformed output: {0}")]
    Malformed(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Persistence errors ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, NightshiftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_displays_correctly() {
        let err = NightshiftError::Config(ConfigError::Validation("max_concurrent".into()));
        assert!(err.to_string().contains("validation failed"));
    }

    #[test]
    fn timeout_error_suggests_formats() {
        let err = ConfigError::Timeout("ten minutes".into());
        assert!(err.to_string().contains("30m"));
    }

    #[test]
    fn execution_error_carries_task_id() {
        let err = NightshiftError::Process(ProcessError::Execution {
            task_id: "ns-deadbeef".into(),
            message: "exited with code 2".into(),
        });
        assert!(err.to_string().contains("ns-deadbeef"));
        assert!(err.to_string().contains("code 2"));
    }

    #[test]
    fn anyhow_interop() {
        let anyhow_err = anyhow::anyhow!("something went wrong");
        let err: NightshiftError = anyhow_err.into();
        assert!(err.to_string().contains("something went wrong"));
    }

    #[test]
    fn tracker_error_displays_command() {
        let err = QueueError::Tracker {
            command: "bd close ns-1".into(),
            stderr: "not found".into(),
        };
        assert!(err.to_string().contains("bd close ns-1"));
    }
}
