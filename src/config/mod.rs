pub mod env_file;
pub mod hot_reload;
pub mod init;
pub mod paths;
pub mod schema;

pub use hot_reload::ConfigHandle;
pub use paths::StatePaths;
pub use schema::{
    CategorySchedule, CodeAgentConfig, Config, DEFAULT_CONFIG_FILE, DaemonConfig, NtfyConfig,
    OneOffDefaults, PromptPaths, QueueBackend, QueueConfig, RecurringTaskConfig, StageModels,
};
