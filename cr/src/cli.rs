//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// cyclerun - event-driven cycle/batch orchestration
#[derive(Parser)]
#[command(
    name = "cr",
    about = "Run and inspect event-driven training-style loops",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the synthetic regression workload
    Run {
        /// Number of cycles (overrides config)
        #[arg(short = 'n', long)]
        cycles: Option<usize>,

        /// Batches per source per cycle (overrides config)
        #[arg(short, long)]
        steps: Option<usize>,

        /// Do not attach the early-stop trigger
        #[arg(long)]
        no_early_stop: bool,

        /// Start fresh: neither load nor save checkpoints
        #[arg(long)]
        no_checkpoint: bool,
    },

    /// Inspect stored checkpoints
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommand,
    },

    /// Print the effective configuration as YAML
    Config,
}

/// Checkpoint inspection subcommands
#[derive(Debug, Subcommand)]
pub enum CheckpointCommand {
    /// List stored checkpoint tags
    List,

    /// Show one checkpoint as JSON
    Show {
        /// Checkpoint tag (last, best or custom)
        tag: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run_defaults() {
        let cli = Cli::parse_from(["cr", "run"]);
        assert!(matches!(
            cli.command,
            Command::Run {
                cycles: None,
                steps: None,
                no_early_stop: false,
                no_checkpoint: false,
            }
        ));
    }

    #[test]
    fn test_cli_parse_run_overrides() {
        let cli = Cli::parse_from(["cr", "run", "--cycles", "5", "-s", "3", "--no-early-stop"]);
        if let Command::Run {
            cycles,
            steps,
            no_early_stop,
            no_checkpoint,
        } = cli.command
        {
            assert_eq!(cycles, Some(5));
            assert_eq!(steps, Some(3));
            assert!(no_early_stop);
            assert!(!no_checkpoint);
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_cli_parse_checkpoint_show() {
        let cli = Cli::parse_from(["cr", "checkpoint", "show", "best"]);
        if let Command::Checkpoint {
            command: CheckpointCommand::Show { tag },
        } = cli.command
        {
            assert_eq!(tag, "best");
        } else {
            panic!("Expected Checkpoint Show command");
        }
    }

    #[test]
    fn test_cli_parse_global_options() {
        let cli = Cli::parse_from(["cr", "config", "-c", "/tmp/cr.yml", "--log-level", "debug"]);
        assert!(matches!(cli.command, Command::Config));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/cr.yml")));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }
}
