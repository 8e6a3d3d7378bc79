//! Configuration for orderflow.
//!
//! Settings are read from `.orderflow/orderflow.toml` and layered:
//! file, then environment, then CLI flags. Every key has a default, so a
//! missing file is a valid configuration.
//!
//! # Configuration File Format
//!
//! ```toml
//! [store]
//! path = ".orderflow/orderflow.db"
//! busy_timeout_ms = 5000
//!
//! [protocols]
//! batch_size = 50
//! evaluator_version = "1.0.0"
//!
//! [checkpoints]
//! default_resume_phase = "PHASE_I"
//!
//! [refund]
//! stale_lock_minutes = 15
//!
//! [logging]
//! filter = "orderflow=debug"
//! format = "json"
//! directory = ".orderflow/logs"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::checkpoint::{CheckpointHandler, DEFAULT_RESUME_PHASE, ResumeRouter};
use crate::errors::ConfigError;
use crate::phase::Phase;
use crate::protocol::persistence::DEFAULT_BATCH_SIZE;
use crate::protocol::{EVALUATOR_VERSION, Evaluators, ProtocolDispatcher};

pub const CONFIG_DIR: &str = ".orderflow";
pub const CONFIG_FILE: &str = "orderflow.toml";

pub const ENV_DB_PATH: &str = "ORDERFLOW_DB_PATH";
pub const ENV_LOG_FORMAT: &str = "ORDERFLOW_LOG_FORMAT";
pub const ENV_BATCH_SIZE: &str = "ORDERFLOW_BATCH_SIZE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSection {
    /// Database file, relative to the project directory unless absolute.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("orderflow.db")
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolsSection {
    /// Protocol results written per transaction.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Stamped on every persisted result.
    #[serde(default = "default_evaluator_version")]
    pub evaluator_version: String,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_evaluator_version() -> String {
    EVALUATOR_VERSION.to_string()
}

impl Default for ProtocolsSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            evaluator_version: default_evaluator_version(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointsSection {
    /// Where a "resume where it stopped" hold goes when the stop point is unknown.
    #[serde(default = "default_resume_phase")]
    pub default_resume_phase: String,
}

fn default_resume_phase() -> String {
    DEFAULT_RESUME_PHASE.as_str().to_string()
}

impl Default for CheckpointsSection {
    fn default() -> Self {
        Self {
            default_resume_phase: default_resume_phase(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundSection {
    /// Refund locks older than this are considered abandoned.
    #[serde(default = "default_stale_lock_minutes")]
    pub stale_lock_minutes: u64,
}

fn default_stale_lock_minutes() -> u64 {
    15
}

impl Default for RefundSection {
    fn default() -> Self {
        Self {
            stale_lock_minutes: default_stale_lock_minutes(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::InvalidValue {
                key: "logging.format".into(),
                message: format!("'{}' is not one of: pretty, json", s),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    /// `EnvFilter` directive. `RUST_LOG` wins when set.
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub format: LogFormat,
    /// When set, logs also go to a daily rolling file here.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

/// The complete orderflow.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderflowToml {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub protocols: ProtocolsSection,
    #[serde(default)]
    pub checkpoints: CheckpointsSection,
    #[serde(default)]
    pub refund: RefundSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl OrderflowToml {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load `path`, or defaults if it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;
        let content =
            toml::to_string_pretty(self).context("Failed to serialize orderflow.toml")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `ORDERFLOW_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DB_PATH).filter(|p| !p.is_empty()) {
            self.store.path = PathBuf::from(path);
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            self.logging.format = format.parse()?;
        }
        if let Some(size) = lookup(ENV_BATCH_SIZE) {
            self.protocols.batch_size =
                size.trim()
                    .parse()
                    .map_err(|e| ConfigError::InvalidValue {
                        key: ENV_BATCH_SIZE.into(),
                        message: format!("{}", e),
                    })?;
        }
        Ok(())
    }

    pub fn resume_phase(&self) -> Result<Phase, ConfigError> {
        self.checkpoints
            .default_resume_phase
            .parse()
            .map_err(|message| ConfigError::InvalidValue {
                key: "checkpoints.default_resume_phase".into(),
                message,
            })
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.protocols.batch_size == 0 {
            warnings.push("protocols.batch_size is 0; batches of 1 will be used".to_string());
        }
        if self.protocols.evaluator_version.trim().is_empty() {
            warnings.push("protocols.evaluator_version is empty".to_string());
        }
        if let Err(e) = self.resume_phase() {
            warnings.push(e.to_string());
        }
        if self.store.busy_timeout_ms == 0 {
            warnings.push(
                "store.busy_timeout_ms is 0; concurrent writers will fail immediately".to_string(),
            );
        }
        if self.refund.stale_lock_minutes == 0 {
            warnings.push(
                "refund.stale_lock_minutes is 0; every refund lock will be swept".to_string(),
            );
        }
        if let Some(filter) = &self.logging.filter
            && let Err(e) = tracing_subscriber::EnvFilter::try_new(filter)
        {
            warnings.push(format!("Invalid logging.filter '{}': {}", filter, e));
        }

        warnings
    }
}

/// Resolved configuration: orderflow.toml + environment + CLI overrides.
#[derive(Debug, Clone)]
pub struct OrderflowConfig {
    pub project_dir: PathBuf,
    pub config_path: PathBuf,
    pub toml: OrderflowToml,
    pub verbose: bool,
    /// CLI override for the database path.
    pub cli_db_path: Option<PathBuf>,
}

impl OrderflowConfig {
    /// Load from `project_dir`, using `config_path` instead of the default file when given.
    pub fn new(project_dir: PathBuf, config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config_path =
            config_path.unwrap_or_else(|| project_dir.join(CONFIG_DIR).join(CONFIG_FILE));
        let mut toml = OrderflowToml::load_or_default(&config_path)?;
        toml.apply_env()?;
        Ok(Self {
            project_dir,
            config_path,
            toml,
            verbose: false,
            cli_db_path: None,
        })
    }

    pub fn with_cli_args(
        project_dir: PathBuf,
        config_path: Option<PathBuf>,
        db_path: Option<PathBuf>,
        verbose: bool,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::new(project_dir, config_path)?;
        config.cli_db_path = db_path;
        config.verbose = verbose;
        Ok(config)
    }

    pub fn config_dir(&self) -> PathBuf {
        self.project_dir.join(CONFIG_DIR)
    }

    /// Database path (CLI → env/file → default), resolved against the project directory.
    pub fn db_path(&self) -> PathBuf {
        let path = self
            .cli_db_path
            .clone()
            .unwrap_or_else(|| self.toml.store.path.clone());
        if path.is_absolute() {
            path
        } else {
            self.project_dir.join(path)
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.toml.store.busy_timeout_ms)
    }

    pub fn stale_lock_age(&self) -> Duration {
        Duration::from_secs(self.toml.refund.stale_lock_minutes * 60)
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        self.toml.logging.directory.as_ref().map(|dir| {
            if dir.is_absolute() {
                dir.clone()
            } else {
                self.project_dir.join(dir)
            }
        })
    }

    pub fn checkpoint_handler(&self) -> Result<CheckpointHandler, ConfigError> {
        Ok(CheckpointHandler::new(ResumeRouter::new(
            self.toml.resume_phase()?,
        )))
    }

    pub fn dispatcher(&self) -> Result<ProtocolDispatcher, ConfigError> {
        Ok(ProtocolDispatcher::new(
            Evaluators::new(self.toml.protocols.evaluator_version.clone()),
            self.checkpoint_handler()?,
            self.toml.protocols.batch_size,
        ))
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
