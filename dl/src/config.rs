//! devloop configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::control::TriggerController;
use crate::events::DEFAULT_SUBSCRIBER_BUFFER;
use crate::handler::{DEFAULT_COMMAND_BUFFER, HandlerConfig};
use crate::ipc::get_socket_path;

const CONFIG_FILE: &str = "devloop.yml";
const LOCAL_CONFIG_FILE: &str = ".devloop.yml";

/// Main devloop configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Socket transport
    pub ipc: IpcConfig,

    /// Event log tuning
    pub events: EventsConfig,

    /// Pipeline the server reports on
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.events.subscriber_buffer == 0 {
            return Err(eyre::eyre!("events.subscriber-buffer must be at least 1"));
        }
        if self.events.command_buffer == 0 {
            return Err(eyre::eyre!("events.command-buffer must be at least 1"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::candidates() {
            if candidate.exists() {
                match Self::load_from_file(&candidate) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", candidate.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read just the log level, before logging is set up
    ///
    /// Never fails; a broken config file is reported later by [`Config::load`].
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(path) => path.clone(),
            None => Self::candidates().into_iter().find(|p| p.exists())?,
        };
        let content = fs::read_to_string(path).ok()?;
        serde_yaml::from_str::<Self>(&content).ok()?.log_level
    }

    /// Project-local config first, then the user config
    fn candidates() -> Vec<PathBuf> {
        let mut candidates = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("devloop").join(CONFIG_FILE));
        }
        candidates
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Socket to serve on or connect to
    pub fn socket_path(&self) -> PathBuf {
        self.ipc.socket_path.clone().unwrap_or_else(get_socket_path)
    }

    /// Settings for the event handler
    pub fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            subscriber_buffer: self.events.subscriber_buffer,
            command_buffer: self.events.command_buffer,
            artifacts: self.pipeline.artifacts.clone(),
            triggers: TriggerController::new(
                self.pipeline.auto_build,
                self.pipeline.auto_sync,
                self.pipeline.auto_deploy,
            ),
        }
    }
}

/// Socket transport configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Defaults to `<runtime_dir>/devloop/devloop.sock`
    #[serde(rename = "socket-path")]
    pub socket_path: Option<PathBuf>,
}

/// Event log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Entries a subscriber may fall behind before it is dropped
    #[serde(rename = "subscriber-buffer")]
    pub subscriber_buffer: usize,

    /// Pending commands the handler queues before producers wait
    #[serde(rename = "command-buffer")]
    pub command_buffer: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            command_buffer: DEFAULT_COMMAND_BUFFER,
        }
    }
}

/// Initial pipeline shape and trigger flags
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Artifacts reported as not started until their first build event
    pub artifacts: Vec<String>,

    #[serde(rename = "auto-build")]
    pub auto_build: bool,

    #[serde(rename = "auto-sync")]
    pub auto_sync: bool,

    #[serde(rename = "auto-deploy")]
    pub auto_deploy: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            artifacts: Vec::new(),
            auto_build: true,
            auto_sync: true,
            auto_deploy: true,
        }
    }
}
