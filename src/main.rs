#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::unnecessary_literal_bound,
    clippy::module_name_repetitions,
    clippy::struct_field_names
)]

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod app;
mod cli;

use cli::{Cli, Commands};
use nightshift::config::env_file::load_env_file;
use nightshift::config::{Config, StatePaths};
use nightshift::platform::daemon::daemon_log_path;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_dir = cli
        .config
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    // SAFETY: single-threaded here; the runtime is built below.
    let loaded = unsafe { load_env_file(env_dir) }.context("reading .env")?;

    init_logging(&cli)?;
    if loaded > 0 {
        tracing::debug!(loaded, "exported variables from .env");
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?
        .block_on(app::dispatch::dispatch(cli))
}

fn init_logging(cli: &Cli) -> Result<()> {
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder().with_max_level(level);

    // The daemon appends to today's log file; everything else logs to stderr.
    if matches!(cli.command, Commands::Start)
        && let Ok(config) = Config::load(&cli.config)
    {
        let path = daemon_log_path(&StatePaths::new(&config.base_dir()), Local::now().date_naive());
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening {}", path.display()))?;
        let subscriber = builder
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .finish();
        return tracing::subscriber::set_global_default(subscriber)
            .context("installing log subscriber");
    }

    let subscriber = builder.with_writer(std::io::stderr).finish();
    tracing::subscriber::set_global_default(subscriber).context("installing log subscriber")
}
