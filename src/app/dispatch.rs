use anyhow::{Context, Result};
use chrono::{Local, Utc};
use nix::sys::signal::Signal;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use nightshift::agent::bead::CliStageExecutor;
use nightshift::agent::git::GitHarness;
use nightshift::agent::{Outcome, derive_summary, describe_run, run_code_agent};
use nightshift::config::init::write_default_config;
use nightshift::config::{Config, StatePaths};
use nightshift::inbox::{list_reports, read_report};
use nightshift::notify::{NtfyClient, NtfyMessage};
use nightshift::platform::daemon::{
    self, DaemonStatus, is_daemon_running, read_daemon_state, read_pid_file, remove_pid_file,
    write_daemon_state,
};
use nightshift::process::send_signal;
use nightshift::queue::create_queue;
use nightshift::task::Task;
use nightshift::ui::style;
use nightshift::util::duration::parse_timeout;

use crate::app::inbox::render_inbox;
use crate::app::schedule::render_schedule;
use crate::app::status::render_status;
use crate::cli::{Cli, Commands, ConfigAction};

pub async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Start => daemon::run(&cli.config).await,
        Commands::Stop { force } => stop(&cli.config, force).await,
        Commands::Status => {
            let paths = state_paths(&cli.config)?;
            let state = read_daemon_state(&paths).await;
            println!("{}", render_status(state.as_ref(), Utc::now()));
            Ok(())
        }
        Commands::Submit {
            prompt,
            timeout,
            model,
            notify,
        } => submit(&cli.config, prompt, timeout, model, notify).await,
        Commands::CodeAgent { category, notify } => {
            code_agent(&cli.config, category.as_deref(), notify).await
        }
        Commands::Inbox { limit, read } => inbox(&cli.config, limit, read.as_deref()).await,
        Commands::Schedule => {
            let config = load_config(&cli.config)?;
            println!("{}", render_schedule(&config, &Local::now()));
            Ok(())
        }
        Commands::Init { force } => init(&cli.config, force),
        Commands::Config { action } => show_config(&cli.config, &action),
    }
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("loading {}", path.display()))
}

fn state_paths(config_path: &Path) -> Result<StatePaths> {
    Ok(StatePaths::new(&load_config(config_path)?.base_dir()))
}

async fn stop(config_path: &Path, force: bool) -> Result<()> {
    let paths = state_paths(config_path)?;
    let state = read_daemon_state(&paths)
        .await
        .filter(|state| is_daemon_running(state, Utc::now()));
    let pid = read_pid_file(&paths).await;
    let (Some(mut state), Some(pid)) = (state, pid) else {
        println!("{}", style::warn("daemon is not running"));
        remove_pid_file(&paths).await;
        return Ok(());
    };

    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    send_signal(pid, signal).context("signalling daemon")?;
    if !force {
        println!("{} sent SIGTERM to pid {pid}, draining active tasks", style::success("✓"));
        println!("{}", style::dim("Use 'nightshift stop --force' to kill immediately"));
        return Ok(());
    }

    // A killed daemon cannot record its own shutdown.
    state.status = DaemonStatus::Stopped;
    state.active_tasks = 0;
    write_daemon_state(&paths, &state)
        .await
        .context("recording daemon state")?;
    remove_pid_file(&paths).await;
    println!("{} killed daemon (pid {pid})", style::success("✓"));
    Ok(())
}

async fn submit(
    config_path: &Path,
    prompt: String,
    timeout: Option<String>,
    model: Option<String>,
    notify: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let mut task = Task::one_off(prompt, &config, Utc::now());
    if let Some(timeout) = timeout {
        parse_timeout(&timeout)?;
        task.timeout = timeout;
    }
    if model.is_some() {
        task.model = model;
    }
    task.notify = notify;
    if notify && config.ntfy.is_none() {
        println!("{}", style::warn("--notify has no effect without an [ntfy] section"));
    }

    let paths = StatePaths::new(&config.base_dir());
    let queue = create_queue(&config, &paths);
    let id = queue.enqueue(&task).await.context("queueing task")?;
    println!("{} queued {} ({id})", style::success("✓"), task.name);
    Ok(())
}

async fn code_agent(config_path: &Path, category: Option<&str>, notify: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let ntfy = config.ntfy.as_ref().filter(|_| notify).map(NtfyClient::new);
    let paths = StatePaths::new(&config.base_dir());
    let stage_timeout = parse_timeout(&config.default_timeout)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping current stage");
            on_interrupt.cancel();
        }
    });

    let executor = CliStageExecutor::new(cancel);
    let harness = GitHarness::new(paths.checkouts_dir());
    if let Some(ntfy) = &ntfy {
        ntfy.send(&NtfyMessage::new("Night-shift code-agent started", "Running…"))
            .await;
    }
    let result = run_code_agent(&config, category, stage_timeout, &executor, &harness).await?;
    if let Some(ntfy) = &ntfy {
        let message = NtfyMessage::new(
            format!("Night-shift code-agent done: {}", result.outcome),
            format!("{} · ${:.2}", derive_summary(&result), result.total_cost_usd),
        );
        ntfy.send(&message).await;
    }

    let headline = match result.outcome {
        Outcome::MrCreated => style::success(result.outcome),
        Outcome::NoImprovement => style::warn(result.outcome),
        Outcome::Abandoned => style::failure(result.outcome),
    };
    println!("◆ {headline}");
    println!("{}", describe_run(&result));
    if let Some(url) = &result.mr_url {
        println!("{}", style::url(url));
    }
    Ok(())
}

async fn inbox(config_path: &Path, limit: usize, read: Option<&str>) -> Result<()> {
    let inbox_dir = state_paths(config_path)?.inbox_dir();
    if let Some(name) = read {
        let content = read_report(&inbox_dir, name)
            .await
            .with_context(|| format!("report not found: {name}"))?;
        println!("{content}");
        return Ok(());
    }
    let reports = list_reports(&inbox_dir, limit).await.context("listing inbox")?;
    println!("{}", render_inbox(&reports));
    Ok(())
}

fn init(config_path: &Path, force: bool) -> Result<()> {
    if !write_default_config(config_path, force)
        .with_context(|| format!("writing {}", config_path.display()))?
    {
        println!(
            "{}",
            style::warn(format!(
                "{} already exists. Use --force to overwrite.",
                config_path.display()
            ))
        );
        return Ok(());
    }

    let config = load_config(config_path)?;
    let paths = StatePaths::new(&config.base_dir());
    paths
        .ensure_dirs()
        .with_context(|| format!("creating {}", paths.root().display()))?;
    let workspace = config.workspace_dir();
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("creating {}", workspace.display()))?;

    println!("{} initialized nightshift", style::success("✓"));
    println!("  {} {}", style::dim("Config"), config_path.display());
    println!("  {} {}", style::dim("State"), paths.root().display());
    println!();
    println!("Next steps:");
    println!("  1. Add [[recurring]] tasks to {}", config_path.display());
    println!("  2. Run 'nightshift submit \"<task>\"' to queue a one-off task");
    println!("  3. Run 'nightshift start' to start the daemon");
    Ok(())
}

fn show_config(config_path: &Path, action: &ConfigAction) -> Result<()> {
    let config = load_config(config_path)?;
    match action {
        ConfigAction::Show => {
            let rendered = toml::to_string_pretty(&config).context("rendering config")?;
            print!("{rendered}");
        }
        ConfigAction::Validate => {
            println!("{} {} is valid", style::success("✓"), config_path.display());
        }
    }
    Ok(())
}
