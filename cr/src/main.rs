//! cyclerun - event-driven cycle/batch orchestration
//!
//! CLI entry point for running the demo workload and inspecting checkpoints.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{debug, info};

use checkstore::{CheckpointStore, FileStore};
use cyclerun::cli::{CheckpointCommand, Cli, Command};
use cyclerun::config::Config;
use cyclerun::demo::Workload;
use cyclerun::lifecycle::{SourceIterator, SourceSet};
use cyclerun::report::{ConsoleReporter, JsonlReporter};
use cyclerun::session::Session;

fn setup_logging(log_dir: &Path, cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    fs::create_dir_all(log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("cyclerun.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first: it names the log directory
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(
        &config.logging.dir.join("logs"),
        cli.log_level.as_deref(),
        config.logging.level.as_deref(),
    )
    .context("Failed to setup logging")?;

    // Dispatch command
    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run {
            cycles,
            steps,
            no_early_stop,
            no_checkpoint,
        } => {
            debug!(?cycles, ?steps, no_early_stop, no_checkpoint, "main: matched Run command");
            let mut config = config;
            if let Some(cycles) = cycles {
                config.process.cycles = cycles;
            }
            if let Some(steps) = steps {
                config.process.steps_per_cycle = Some(steps);
            }
            if no_early_stop {
                config.early_stop.enabled = false;
            }
            if no_checkpoint {
                config.checkpoint.enabled = false;
            }
            cmd_run(&config)
        }
        Command::Checkpoint { command } => {
            debug!(?command, "main: matched Checkpoint command");
            match command {
                CheckpointCommand::List => cmd_checkpoint_list(&config),
                CheckpointCommand::Show { tag } => cmd_checkpoint_show(&config, &tag),
            }
        }
        Command::Config => {
            debug!("main: matched Config command");
            cmd_config(&config)
        }
    }
}

fn open_store(config: &Config) -> Result<FileStore> {
    FileStore::open(&config.checkpoint.dir, config.checkpoint.suffix.as_str()).context(format!(
        "Failed to open checkpoint store at {}",
        config.checkpoint.dir.display()
    ))
}

/// Run the synthetic workload
fn cmd_run(config: &Config) -> Result<()> {
    debug!("cmd_run: called");
    let workload = Workload::from_config(&config.demo).context("Invalid demo configuration")?;
    let model = Arc::clone(&workload.model);

    let train = Arc::new(SourceIterator::new(&config.model.train_source, workload.train));
    let valid = Arc::new(SourceIterator::new(&config.model.valid_source, workload.valid));

    let store: Option<Arc<dyn CheckpointStore>> = if config.checkpoint.enabled {
        Some(Arc::new(open_store(config)?))
    } else {
        None
    };

    let session = Session::build(
        config,
        SourceSet::Fixed(vec![train, valid]),
        workload.model,
        workload.optimizer,
        workload.scheduler,
        store,
    )
    .context("Invalid configuration")?;

    session.add(Arc::new(ConsoleReporter::stdout()))?;
    if config.logging.events {
        let reporter = Arc::new(JsonlReporter::new(config.logging.dir.join("runs")));
        info!(run_id = reporter.run_id(), path = ?reporter.log_path(), "Writing event log");
        println!("Event log: {}", reporter.log_path().display());
        session.add(reporter)?;
    }

    session.run().context("Run failed")?;

    let (w, b) = model.params();
    println!("Model: w={:.4} b={:.4}", w, b);
    if let Some(best) = session.model.best_loss() {
        println!("Best validation loss: {:.6}", best);
    }
    Ok(())
}

/// List stored checkpoints
fn cmd_checkpoint_list(config: &Config) -> Result<()> {
    debug!("cmd_checkpoint_list: called");
    let store = open_store(config)?;
    let tags = store.tags()?;

    if tags.is_empty() {
        println!("No checkpoints in {}", store.base_path().display());
        return Ok(());
    }

    println!("{:<16} {:>6}", "TAG", "CYCLE");
    for tag in tags {
        match store.load(&tag)? {
            Some(snapshot) => println!("{:<16} {:>6}", tag, snapshot.cycle_index),
            None => println!("{:<16} {:>6}", tag, "-"),
        }
    }
    Ok(())
}

/// Show one checkpoint as JSON
fn cmd_checkpoint_show(config: &Config, tag: &str) -> Result<()> {
    debug!(%tag, "cmd_checkpoint_show: called");
    let store = open_store(config)?;
    match store.load(tag)? {
        Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        None => println!("No checkpoint tagged '{}'", tag),
    }
    Ok(())
}

/// Print the effective configuration
fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    print!("{}", serde_yaml::to_string(config)?);
    Ok(())
}
