//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::control::TriggerPhase;

/// devloop - pipeline state and event server
#[derive(Parser)]
#[command(
    name = "dl",
    about = "Pipeline state aggregation and event streaming for the dev loop",
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
    /// Run the event server in the foreground
    Serve,

    /// Ping the server to check if it's alive and responsive
    Ping,

    /// Show the current pipeline state
    State {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Stream events
    Events {
        /// Only new events, skipping the history
        #[arg(short, long)]
        tail: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Run phases once, regardless of their auto-trigger
    Execute {
        #[arg(long)]
        build: bool,

        #[arg(long)]
        sync: bool,

        #[arg(long)]
        deploy: bool,
    },

    /// Turn a phase's auto-trigger on or off
    Auto {
        /// Phase (build, sync, deploy)
        phase: TriggerPhase,

        /// on or off
        toggle: Toggle,
    },

    /// Record an event given as JSON
    Handle {
        /// Event JSON, e.g. '{"type":"build","artifact":"app","status":"In progress"}'
        event: String,
    },

    /// Ask the server to stop
    Stop,
}

/// Output format for state/events commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use text or json", s)),
        }
    }
}

/// On/off switch for auto-triggers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub fn enabled(self) -> bool {
        self == Toggle::On
    }
}

impl std::str::FromStr for Toggle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "on" | "true" | "enable" => Ok(Self::On),
            "off" | "false" | "disable" => Ok(Self::Off),
            _ => Err(format!("Unknown toggle: {}. Use on or off", s)),
        }
    }
}

/// Path of the server's log file
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("devloop")
        .join("logs")
        .join("devloop.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_serve() {
        let cli = Cli::parse_from(["dl", "serve"]);
        assert!(matches!(cli.command, Command::Serve));
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_parse_global_flags() {
        let cli = Cli::parse_from(["dl", "ping", "-l", "debug", "--config", "/tmp/dl.yml"]);
        assert!(matches!(cli.command, Command::Ping));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/dl.yml")));
    }

    #[test]
    fn test_cli_parse_state_json() {
        let cli = Cli::parse_from(["dl", "state", "--format", "json"]);
        assert!(matches!(
            cli.command,
            Command::State {
                format: OutputFormat::Json
            }
        ));
    }

    #[test]
    fn test_cli_parse_events_tail() {
        let cli = Cli::parse_from(["dl", "events", "--tail"]);
        assert!(matches!(
            cli.command,
            Command::Events {
                tail: true,
                format: OutputFormat::Text
            }
        ));
    }

    #[test]
    fn test_cli_parse_execute() {
        let cli = Cli::parse_from(["dl", "execute", "--build", "--deploy"]);
        assert!(matches!(
            cli.command,
            Command::Execute {
                build: true,
                sync: false,
                deploy: true
            }
        ));
    }

    #[test]
    fn test_cli_parse_auto() {
        let cli = Cli::parse_from(["dl", "auto", "sync", "off"]);
        assert!(matches!(
            cli.command,
            Command::Auto {
                phase: TriggerPhase::Sync,
                toggle: Toggle::Off
            }
        ));
    }

    #[test]
    fn test_cli_rejects_unknown_phase() {
        assert!(Cli::try_parse_from(["dl", "auto", "test", "on"]).is_err());
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_log_path() {
        assert!(get_log_path().ends_with("devloop/logs/devloop.log"));
    }
}
