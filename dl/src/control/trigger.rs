//! Auto-trigger flags for build, sync and deploy

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Phases that can run automatically or on demand
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPhase {
    Build,
    Sync,
    Deploy,
}

impl TriggerPhase {
    pub const ALL: [TriggerPhase; 3] = [TriggerPhase::Build, TriggerPhase::Sync, TriggerPhase::Deploy];

    pub fn as_str(self) -> &'static str {
        match self {
            TriggerPhase::Build => "build",
            TriggerPhase::Sync => "sync",
            TriggerPhase::Deploy => "deploy",
        }
    }
}

impl fmt::Display for TriggerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown phase {0:?} (expected build, sync or deploy)")]
pub struct ParsePhaseError(String);

impl FromStr for TriggerPhase {
    type Err = ParsePhaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "build" => Ok(TriggerPhase::Build),
            "sync" => Ok(TriggerPhase::Sync),
            "deploy" => Ok(TriggerPhase::Deploy),
            _ => Err(ParsePhaseError(s.to_string())),
        }
    }
}

/// Wire form of an auto-trigger toggle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerState {
    pub enabled: bool,
}

/// One auto-trigger flag per phase; last write wins
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriggerController {
    build: bool,
    sync: bool,
    deploy: bool,
}

impl TriggerController {
    pub fn new(build: bool, sync: bool, deploy: bool) -> Self {
        Self { build, sync, deploy }
    }

    pub fn get(&self, phase: TriggerPhase) -> bool {
        match phase {
            TriggerPhase::Build => self.build,
            TriggerPhase::Sync => self.sync,
            TriggerPhase::Deploy => self.deploy,
        }
    }

    /// Set a flag; returns true if the value changed
    pub fn set(&mut self, phase: TriggerPhase, enabled: bool) -> bool {
        let flag = match phase {
            TriggerPhase::Build => &mut self.build,
            TriggerPhase::Sync => &mut self.sync,
            TriggerPhase::Deploy => &mut self.deploy,
        };
        let changed = *flag != enabled;
        *flag = enabled;
        changed
    }
}

impl Default for TriggerController {
    fn default() -> Self {
        Self::new(true, true, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_enabled() {
        let controller = TriggerController::default();
        for phase in TriggerPhase::ALL {
            assert!(controller.get(phase));
        }
    }

    #[test]
    fn test_set_is_per_phase() {
        let mut controller = TriggerController::default();
        assert!(controller.set(TriggerPhase::Sync, false));
        assert!(!controller.get(TriggerPhase::Sync));
        assert!(controller.get(TriggerPhase::Build));
        assert!(controller.get(TriggerPhase::Deploy));
    }

    #[test]
    fn test_last_write_wins() {
        let mut controller = TriggerController::default();
        controller.set(TriggerPhase::Build, false);
        assert!(!controller.set(TriggerPhase::Build, false));
        controller.set(TriggerPhase::Build, true);
        assert!(controller.get(TriggerPhase::Build));
    }

    #[test]
    fn test_parse_phase() {
        assert_eq!("Build".parse::<TriggerPhase>(), Ok(TriggerPhase::Build));
        assert_eq!("deploy".parse::<TriggerPhase>(), Ok(TriggerPhase::Deploy));
        assert!("test".parse::<TriggerPhase>().is_err());
    }

    #[test]
    fn test_trigger_state_serialization() {
        let json = serde_json::to_string(&TriggerState { enabled: true }).unwrap();
        assert_eq!(json, r#"{"enabled":true}"#);
    }
}
