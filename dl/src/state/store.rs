//! StateStore - the pipeline snapshot and its fold rule
//!
//! [`apply`] is the only way state changes. Folding the same events over the
//! same initial state always yields the same snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::control::TriggerPhase;
use crate::events::{COMPLETE, DebuggingContainerEvent, Event, FAILED, Metadata, NOT_STARTED, PortEvent, SUCCEEDED};
use crate::status::{Phase, StatusCode};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildState {
    /// Artifact name to its latest status
    pub artifacts: BTreeMap<String, String>,
    pub auto_trigger: bool,
    pub status_code: StatusCode,
}

impl Default for BuildState {
    fn default() -> Self {
        Self {
            artifacts: BTreeMap::new(),
            auto_trigger: true,
            status_code: StatusCode::Ok,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployState {
    pub status: String,
    pub auto_trigger: bool,
    pub status_code: StatusCode,
}

impl Default for DeployState {
    fn default() -> Self {
        Self {
            status: NOT_STARTED.to_string(),
            auto_trigger: true,
            status_code: StatusCode::Ok,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusCheckState {
    pub status: String,
    /// Resource name to its latest status
    pub resources: BTreeMap<String, String>,
    pub status_code: StatusCode,
}

impl Default for StatusCheckState {
    fn default() -> Self {
        Self {
            status: NOT_STARTED.to_string(),
            resources: BTreeMap::new(),
            status_code: StatusCode::Ok,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSyncState {
    pub status: String,
    pub auto_trigger: bool,
}

impl Default for FileSyncState {
    fn default() -> Self {
        Self {
            status: NOT_STARTED.to_string(),
            auto_trigger: true,
        }
    }
}

/// Point-in-time snapshot of the whole pipeline
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct State {
    pub build_state: BuildState,
    pub deploy_state: DeployState,
    pub status_check_state: StatusCheckState,
    pub file_sync_state: FileSyncState,
    /// Keyed by local port
    #[serde(with = "port_keys")]
    pub forwarded_ports: BTreeMap<i32, PortEvent>,
    pub debugging_containers: Vec<DebuggingContainerEvent>,
    pub metadata: Metadata,
    /// Set by the first Meta event; `metadata.build` and `metadata.deploy` are frozen after that
    pub metadata_recorded: bool,
}

/// Port keys travel as strings so the map survives buffered (tagged) decoding
mod port_keys {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    use crate::events::PortEvent;

    pub fn serialize<S>(ports: &BTreeMap<i32, PortEvent>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(ports.iter().map(|(port, event)| (port.to_string(), event)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<i32, PortEvent>, D::Error>
    where
        D: Deserializer<'de>,
    {
        BTreeMap::<String, PortEvent>::deserialize(deserializer)?
            .into_iter()
            .map(|(port, event)| {
                port.parse::<i32>()
                    .map(|port| (port, event))
                    .map_err(|_| D::Error::custom(format!("invalid port key: {}", port)))
            })
            .collect()
    }
}

impl State {
    /// Initial state with the configured artifacts marked as not started
    pub fn with_artifacts<I, S>(artifacts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = Self::default();
        state.build_state.artifacts = artifacts
            .into_iter()
            .map(|name| (name.into(), NOT_STARTED.to_string()))
            .collect();
        state
    }

    /// Mirror an auto-trigger flag into the matching sub-state
    pub fn set_auto_trigger(&mut self, phase: TriggerPhase, enabled: bool) {
        match phase {
            TriggerPhase::Build => self.build_state.auto_trigger = enabled,
            TriggerPhase::Sync => self.file_sync_state.auto_trigger = enabled,
            TriggerPhase::Deploy => self.deploy_state.auto_trigger = enabled,
        }
    }

    pub fn auto_trigger(&self, phase: TriggerPhase) -> bool {
        match phase {
            TriggerPhase::Build => self.build_state.auto_trigger,
            TriggerPhase::Sync => self.file_sync_state.auto_trigger,
            TriggerPhase::Deploy => self.deploy_state.auto_trigger,
        }
    }
}

/// Status code carried by a failed event, falling back to the phase's unknown code
fn failure_code(event: &Event, phase: Phase) -> StatusCode {
    event
        .actionable_err()
        .map(|e| e.err_code)
        .filter(|code| *code != StatusCode::Ok)
        .unwrap_or_else(|| phase.unknown_code())
}

/// Fold one event into the state
pub fn apply(state: &mut State, event: &Event) {
    match event {
        Event::Meta(e) => {
            if !state.metadata_recorded {
                state.metadata.build = e.metadata.build.clone();
                state.metadata.deploy = e.metadata.deploy.clone();
                state.metadata_recorded = true;
            }
            state
                .metadata
                .additional
                .extend(e.metadata.additional.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        Event::Build(e) => {
            let build = &mut state.build_state;
            build.artifacts.insert(e.artifact.clone(), e.status.clone());
            if e.status == FAILED {
                build.status_code = failure_code(event, Phase::Build);
            } else if build.artifacts.values().all(|s| s == COMPLETE) {
                build.status_code = StatusCode::BuildSuccess;
            }
        }

        Event::Deploy(e) => {
            let deploy = &mut state.deploy_state;
            deploy.status = e.status.clone();
            match e.status.as_str() {
                FAILED => deploy.status_code = failure_code(event, Phase::Deploy),
                COMPLETE => deploy.status_code = StatusCode::DeploySuccess,
                _ => {}
            }
        }

        Event::StatusCheck(e) => {
            let check = &mut state.status_check_state;
            check.status = e.status.clone();
            match e.status.as_str() {
                FAILED => check.status_code = failure_code(event, Phase::StatusCheck),
                SUCCEEDED => check.status_code = StatusCode::StatusCheckSuccess,
                _ => {}
            }
        }

        Event::ResourceStatusCheck(e) => {
            state
                .status_check_state
                .resources
                .insert(e.resource.clone(), e.status.clone());
        }

        Event::FileSync(e) => {
            state.file_sync_state.status = e.status.clone();
        }

        Event::Port(e) => {
            state.forwarded_ports.insert(e.local_port, e.clone());
        }

        Event::DebuggingContainer(e) => {
            let containers = &mut state.debugging_containers;
            match containers.iter_mut().find(|c| c.key() == e.key()) {
                Some(existing) => *existing = e.clone(),
                None => containers.push(e.clone()),
            }
        }

        // Iteration bookkeeping belongs to the driver; the log keeps the record
        Event::DevLoop(_) => {}
    }
}

/// Fold a sequence of events over an initial state
pub fn fold<'a, I>(initial: State, events: I) -> State
where
    I: IntoIterator<Item = &'a Event>,
{
    events.into_iter().fold(initial, |mut state, event| {
        apply(&mut state, event);
        state
    })
}

/// Owner of the authoritative snapshot
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    state: State,
}

impl StateStore {
    pub fn new(initial: State) -> Self {
        Self { state: initial }
    }

    pub fn apply(&mut self, event: &Event) {
        debug!(event_type = event.event_type(), "StateStore::apply");
        apply(&mut self.state, event);
    }

    /// Independent copy of the current state
    pub fn snapshot(&self) -> State {
        self.state.clone()
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn set_auto_trigger(&mut self, phase: TriggerPhase, enabled: bool) {
        debug!(%phase, enabled, "StateStore::set_auto_trigger");
        self.state.set_auto_trigger(phase, enabled);
    }
}
