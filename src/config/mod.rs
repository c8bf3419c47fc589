// Layered configuration: embedded defaults, config files, then environment
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use config::{Config, ConfigError, Environment, File, FileFormat};

use crate::classifier::{KeywordTables, MoeScaling};
use crate::params::{ParameterSet, DEFAULT_PRESET};
use crate::transport::{ModelDescriptor, DEFAULT_OLLAMA_URL};

/// Defaults compiled into the binary so it runs without a config directory
const EMBEDDED_DEFAULTS: &str = include_str!("../../config/default.toml");

/// Prefix for environment overrides, e.g. `OLLAMA_PILOT_SERVER__URL`
pub const ENV_PREFIX: &str = "OLLAMA_PILOT";

/// Connection settings for the inference server
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Base URL of the server
    #[serde(default = "default_server_url")]
    pub url: String,
    /// Timeout for ordinary requests
    pub request_timeout_secs: u64,
    /// Timeout for model loads, which can take minutes for large models
    pub load_timeout_secs: u64,
    /// Timeout for liveness probes
    pub probe_timeout_ms: u64,
    /// How long the server keeps a loaded model resident
    pub keep_alive: String,
}

/// Host service supervision
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    /// systemd unit name
    pub unit: String,
    /// Prefix restarts with non-interactive sudo
    pub use_sudo: bool,
    /// Talk to the user's systemd instance instead of the system one
    pub user_unit: bool,
    /// How long to wait for the service to come back after a restart
    pub restart_timeout_secs: u64,
    /// Minimum spacing between two restarts
    pub restart_cooldown_secs: u64,
    /// Poll interval while waiting for the service
    pub poll_interval_ms: u64,
}

impl ServiceConfig {
    pub fn restart_timeout(&self) -> Duration {
        Duration::from_secs(self.restart_timeout_secs)
    }

    pub fn restart_cooldown(&self) -> Duration {
        Duration::from_secs(self.restart_cooldown_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Failure handling for model loads and requests
#[derive(Debug, Deserialize, Clone)]
pub struct LifecycleConfig {
    /// Consecutive failures tolerated before a service restart is attempted
    pub max_transient_failures: u32,
    /// Base retry delay, multiplied by the failure count
    pub retry_delay_ms: u64,
    /// How long a fetched model list stays valid
    pub model_list_ttl_secs: u64,
}

/// Parameter defaults applied to every request
#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// Preset used when none is requested
    #[serde(default = "default_preset_name")]
    pub default_preset: String,
    /// System prompt sent with chat and benchmark requests
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Persisted overrides, applied after the preset
    #[serde(default)]
    pub overrides: ParameterSet,
}

fn default_server_url() -> String {
    DEFAULT_OLLAMA_URL.to_string()
}

fn default_preset_name() -> String {
    DEFAULT_PRESET.to_string()
}

/// Models hidden from chat and never loaded by the benchmark
#[derive(Debug, Deserialize, Clone, Default)]
pub struct BlacklistConfig {
    #[serde(default)]
    pub models: Vec<String>,
}

impl BlacklistConfig {
    /// Exact, case-insensitive match on the full `name:tag` identifier.
    pub fn contains(&self, model: &str) -> bool {
        self.models.iter().any(|m| m.trim().eq_ignore_ascii_case(model.trim()))
    }

    /// Like [`contains`](Self::contains), but a bare name also matches its `:latest` tag.
    pub fn blocks(&self, model: &str) -> bool {
        let model = model.trim();
        self.contains(model) || (!model.contains(':') && self.contains(&format!("{}:latest", model)))
    }

    /// Drops blacklisted models from `models` and returns the hidden names.
    pub fn remove_blocked(&self, models: &mut Vec<ModelDescriptor>) -> Vec<String> {
        let mut hidden = Vec::new();
        models.retain(|m| {
            let blocked = self.contains(&m.name);
            if blocked {
                hidden.push(m.name.clone());
            }
            !blocked
        });
        hidden
    }
}

/// Where chat attachments are looked up and saved answers are written
#[derive(Debug, Deserialize, Clone)]
pub struct ChatSettings {
    /// Markdown files written by the `save` command
    #[serde(default = "default_answers_dir")]
    pub answers_dir: PathBuf,
    /// Searched for bare file names given to the `text` command
    #[serde(default = "default_texts_dir")]
    pub texts_dir: PathBuf,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            answers_dir: default_answers_dir(),
            texts_dir: default_texts_dir(),
        }
    }
}

fn default_answers_dir() -> PathBuf {
    PathBuf::from("content/answers")
}

fn default_texts_dir() -> PathBuf {
    PathBuf::from("content/texts")
}

/// Classifier tuning
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ClassifierConfig {
    /// Replaces the built-in vision keyword table when set
    #[serde(default)]
    pub vision_keywords: Option<Vec<String>>,
    /// Replaces the built-in thinking keyword table when set
    #[serde(default)]
    pub thinking_keywords: Option<Vec<String>>,
    #[serde(default)]
    pub moe: MoeScaling,
}

impl ClassifierConfig {
    pub fn keyword_tables(&self) -> KeywordTables {
        let defaults = KeywordTables::default();
        KeywordTables {
            vision: self.vision_keywords.clone().unwrap_or(defaults.vision),
            thinking: self.thinking_keywords.clone().unwrap_or(defaults.thinking),
        }
    }
}

/// Benchmark output and question source
#[derive(Debug, Deserialize, Clone)]
pub struct BenchmarkSettings {
    /// Directory receiving the per-category and summary files
    pub output_dir: PathBuf,
    /// JSON array of questions; the built-in list is used when unset
    #[serde(default)]
    pub questions_file: Option<PathBuf>,
}

/// Configuration for application logging
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Directory for the daily rolling log files
    pub directory: PathBuf,
}

/// Main settings struct that contains all configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub service: ServiceConfig,
    pub lifecycle: LifecycleConfig,
    pub generation: GenerationConfig,
    /// Named presets, replacing built-ins with the same name
    #[serde(default)]
    pub presets: BTreeMap<String, ParameterSet>,
    #[serde(default)]
    pub blacklist: BlacklistConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub chat: ChatSettings,
    pub benchmark: BenchmarkSettings,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Loads settings relative to the current directory, in order of
    /// precedence (highest to lowest):
    /// 1. Environment variables prefixed with OLLAMA_PILOT_
    /// 2. config/local.toml if present
    /// 3. config/default.toml if present
    /// 4. Embedded defaults
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = std::env::current_dir()
            .map_err(|e| ConfigError::Message(
                format!("Failed to get current directory: {}", e)
            ))?
            .join("config");
        Self::load_from(&config_dir)
    }

    /// Same layering as [`Settings::new`] with an explicit config directory.
    pub fn load_from(config_dir: &Path) -> Result<Self, ConfigError> {
        let default_config = config_dir.join("default.toml");
        let local_config = config_dir.join("local.toml");

        let settings = Config::builder()
            .add_source(File::from_str(EMBEDDED_DEFAULTS, FileFormat::Toml))
            .add_source(File::from(default_config).required(false))
            .add_source(File::from(local_config).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("blacklist.models")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Settings>()?;

        settings.validate()?;

        Ok(settings)
    }

    /// Parses only the embedded defaults. Used by tests and as a fallback.
    pub fn embedded() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from_str(EMBEDDED_DEFAULTS, FileFormat::Toml))
            .build()?
            .try_deserialize::<Settings>()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.server.url.starts_with("http://") || self.server.url.starts_with("https://")) {
            return Err(ConfigError::Message(
                format!("server.url must start with http:// or https://, got: {}", self.server.url)
            ));
        }

        if self.server.request_timeout_secs == 0
            || self.server.load_timeout_secs == 0
            || self.server.probe_timeout_ms == 0
        {
            return Err(ConfigError::Message(
                "server timeouts must be greater than 0".to_string()
            ));
        }

        if self.service.unit.trim().is_empty() {
            return Err(ConfigError::Message("service.unit must not be empty".to_string()));
        }

        if self.service.poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "service.poll_interval_ms must be greater than 0".to_string()
            ));
        }

        if self.lifecycle.max_transient_failures == 0 {
            return Err(ConfigError::Message(
                "lifecycle.max_transient_failures must be at least 1".to_string()
            ));
        }

        let moe = &self.classifier.moe;
        if !(moe.small_factor > 0.0 && moe.small_factor <= 1.0) {
            return Err(ConfigError::Message(
                format!("classifier.moe.small_factor must be in (0, 1], got: {}", moe.small_factor)
            ));
        }

        // Validate logging level
        match self.logging.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            _ => Err(ConfigError::Message(
                format!("Invalid logging level: {}. Must be one of: error, warn, info, debug, trace",
                    self.logging.level)
            )),
        }?;

        Ok(())
    }

    /// Creates the log and benchmark output directories.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        for dir in [&self.logging.directory, &self.benchmark.output_dir] {
            if !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    ConfigError::Message(format!(
                        "Failed to create directory at {}: {}",
                        dir.display(), e
                    ))
                })?;
            }
        }
        Ok(())
    }
}
