use clap::{Parser, Subcommand};
use std::path::PathBuf;

use nightshift::config::DEFAULT_CONFIG_FILE;

/// `nightshift` - unattended agent scheduler and code-improvement daemon.
#[derive(Parser, Debug)]
#[command(name = "nightshift")]
#[command(version)]
#[command(about = "Run agent tasks on a schedule while you sleep.", long_about = None)]
pub struct Cli {
    /// Path to the config file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the daemon in the foreground until SIGINT or SIGTERM
    Start,

    /// Ask the running daemon to shut down
    Stop {
        /// Kill the daemon immediately (SIGKILL) instead of draining
        #[arg(long)]
        force: bool,
    },

    /// Show daemon liveness and totals
    Status,

    /// Queue a one-off task
    Submit {
        /// Prompt handed to the agent
        prompt: String,

        /// Override the one-off timeout (e.g. 30m)
        #[arg(long)]
        timeout: Option<String>,

        /// Override the one-off model
        #[arg(long)]
        model: Option<String>,

        /// Send ntfy notifications when the task starts and ends
        #[arg(short = 'N', long)]
        notify: bool,
    },

    /// Run the code-agent pipeline once in the foreground
    CodeAgent {
        /// Primary category (defaults to today's schedule)
        #[arg(long)]
        category: Option<String>,

        /// Send ntfy notifications when the run starts and ends
        #[arg(short = 'N', long)]
        notify: bool,
    },

    /// Browse finished task reports
    Inbox {
        /// Number of reports to list
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,

        /// Print one report by file name
        #[arg(long, value_name = "FILE")]
        read: Option<String>,
    },

    /// List recurring tasks and their next run times
    Schedule,

    /// Write a starter config and the state directories
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the resolved configuration
    Show,
    /// Load and validate the config file
    Validate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn global_options_follow_subcommand() {
        let cli = Cli::parse_from(["nightshift", "status", "--config", "/etc/ns.toml", "-v"]);
        assert_eq!(cli.config, PathBuf::from("/etc/ns.toml"));
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn code_agent_takes_optional_category() {
        let cli = Cli::parse_from(["nightshift", "code-agent", "--category", "tests"]);
        match cli.command {
            Commands::CodeAgent { category, notify } => {
                assert_eq!(category.as_deref(), Some("tests"));
                assert!(!notify);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn stop_force_and_submit_notify_flags() {
        let cli = Cli::parse_from(["nightshift", "stop", "--force"]);
        assert!(matches!(cli.command, Commands::Stop { force: true }));

        let cli = Cli::parse_from(["nightshift", "submit", "-N", "check the build"]);
        match cli.command {
            Commands::Submit { prompt, notify, .. } => {
                assert_eq!(prompt, "check the build");
                assert!(notify);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn inbox_defaults_to_ten_reports() {
        let cli = Cli::parse_from(["nightshift", "inbox"]);
        assert!(matches!(
            cli.command,
            Commands::Inbox {
                limit: 10,
                read: None
            }
        ));

        let cli = Cli::parse_from(["nightshift", "inbox", "--read", "a.md"]);
        match cli.command {
            Commands::Inbox { read, .. } => assert_eq!(read.as_deref(), Some("a.md")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn config_requires_an_action() {
        assert!(Cli::try_parse_from(["nightshift", "config"]).is_err());
        let cli = Cli::parse_from(["nightshift", "config", "validate"]);
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Validate
            }
        ));
    }
}
