//! cyclerun configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main cyclerun configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cycle and step bounds
    pub process: ProcessConfig,

    /// Metric aggregation
    pub metrics: MetricsConfig,

    /// Model driver
    pub model: ModelConfig,

    /// Checkpoint coordination and storage
    pub checkpoint: CheckpointConfig,

    /// Early-stop trigger
    #[serde(rename = "early-stop")]
    pub early_stop: EarlyStopConfig,

    /// Log file and event log
    pub logging: LoggingConfig,

    /// Synthetic demo workload
    pub demo: DemoConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .cyclerun.yml
        let local_config = PathBuf::from(".cyclerun.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/cyclerun/cyclerun.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("cyclerun").join("cyclerun.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Cycle and step bounds for the process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Number of cycles to run (raised to the last schedule threshold if smaller)
    pub cycles: usize,

    /// Batches per source per cycle; unset drains each source once
    #[serde(rename = "steps-per-cycle")]
    pub steps_per_cycle: Option<usize>,

    /// Rewind each source when its run ends
    #[serde(rename = "wrap-on-completion")]
    pub wrap_on_completion: bool,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            cycles: 1,
            steps_per_cycle: None,
            wrap_on_completion: false,
        }
    }
}

/// Metric aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// When to flush: "per-source" or "per-cycle"
    pub flush: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            flush: "per-cycle".to_string(),
        }
    }
}

/// Model driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// When to step the scheduler: "per-batch" or "per-cycle"
    pub schedule: String,

    /// Source whose batches are trained on
    #[serde(rename = "train-source")]
    pub train_source: String,

    /// Source whose losses drive the best-checkpoint decision
    #[serde(rename = "valid-source")]
    pub valid_source: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            schedule: "per-cycle".to_string(),
            train_source: "train".to_string(),
            valid_source: "valid".to_string(),
        }
    }
}

/// Checkpoint coordination and storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Attach the coordinator and the store
    pub enabled: bool,

    /// Directory holding one file per tag
    pub dir: PathBuf,

    /// File name suffix appended to every tag
    pub suffix: String,

    /// Tag to load at start: "last", "best" or a custom tag
    pub mode: String,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("checkpoints"),
            suffix: checkstore::DEFAULT_SUFFIX.to_string(),
            mode: checkstore::TAG_LAST.to_string(),
        }
    }
}

/// Early-stop trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyStopConfig {
    /// Attach the trigger
    pub enabled: bool,

    /// Number of recent values compared against each new one
    pub window: usize,

    /// Metric to watch
    pub metric: String,

    /// Source to watch
    pub source: String,

    /// Values closer than this count as a plateau
    pub delta: f64,
}

impl Default for EarlyStopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: 3,
            metric: "loss".to_string(),
            source: "valid".to_string(),
            delta: 1e-4,
        }
    }
}

/// Log file and event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: Option<String>,

    /// Directory for the log file and per-run event logs
    pub dir: PathBuf,

    /// Write a JSONL event log per run
    pub events: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/cyclerun on Linux)
        let dir = dirs::data_local_dir()
            .map(|d| d.join("cyclerun"))
            .unwrap_or_else(|| PathBuf::from(".cyclerun"));

        Self {
            level: None,
            dir,
            events: true,
        }
    }
}

/// Synthetic linear-regression workload used by `cr run`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Training samples
    #[serde(rename = "train-samples")]
    pub train_samples: usize,

    /// Validation samples
    #[serde(rename = "valid-samples")]
    pub valid_samples: usize,

    /// Samples per batch
    #[serde(rename = "batch-size")]
    pub batch_size: usize,

    /// Initial learning rate
    #[serde(rename = "learning-rate")]
    pub learning_rate: f64,

    /// Learning-rate decay factor per scheduler step
    pub gamma: f64,

    /// Scheduler steps between decays
    #[serde(rename = "decay-every")]
    pub decay_every: usize,

    /// Amplitude of the uniform label noise
    pub noise: f64,

    /// RNG seed for the synthetic data
    pub seed: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            train_samples: 256,
            valid_samples: 64,
            batch_size: 16,
            learning_rate: 0.1,
            gamma: 0.5,
            decay_every: 5,
            noise: 0.05,
            seed: 7,
        }
    }
}
