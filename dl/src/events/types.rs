//! Event types for pipeline activity streaming
//!
//! These events represent every state change of the dev loop:
//! - Pipeline metadata (once per session)
//! - Build, deploy, file sync and status-check progress
//! - Port forwards and debuggable containers
//! - Dev loop iterations

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EventError;
use crate::status::{ActionableErr, Phase, StatusCode, enrich};

// === Status vocabulary ===
pub const NOT_STARTED: &str = "Not started";
pub const IN_PROGRESS: &str = "In progress";
pub const COMPLETE: &str = "Complete";
pub const SUCCEEDED: &str = "Succeeded";
pub const FAILED: &str = "Failed";
pub const STARTED: &str = "Started";
pub const TERMINATED: &str = "Terminated";

/// Every status string an event may carry
pub const STATUS_VOCABULARY: &[&str] = &[
    NOT_STARTED,
    IN_PROGRESS,
    COMPLETE,
    SUCCEEDED,
    FAILED,
    STARTED,
    TERMINATED,
];

/// How the build phase runs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildType {
    #[default]
    UnknownBuildType,
    Local,
    Cluster,
    Remote,
}

/// Kind of cluster being deployed to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterType {
    #[default]
    UnknownClusterType,
    Minikube,
    Gke,
    Other,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageBuilder {
    pub builder_type: String,
    pub count: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildMetadata {
    pub number_of_artifacts: u32,
    pub builders: Vec<ImageBuilder>,
    pub build_type: BuildType,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Deployer {
    pub deployer_type: String,
    pub count: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployMetadata {
    pub deployers: Vec<Deployer>,
    pub cluster: ClusterType,
}

/// Pipeline metadata
///
/// `build` and `deploy` are written once; `additional` accumulates.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub build: Option<BuildMetadata>,
    pub deploy: Option<DeployMetadata>,
    pub additional: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaEvent {
    /// Free-form session banner
    pub entry: String,
    pub metadata: Metadata,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildEvent {
    pub artifact: String,
    pub status: String,
    /// Legacy plain-text error; prefer `actionable_err`
    pub err: String,
    pub actionable_err: Option<ActionableErr>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployEvent {
    pub status: String,
    pub err: String,
    pub actionable_err: Option<ActionableErr>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusCheckEvent {
    pub status: String,
    pub message: String,
    pub err: String,
    pub actionable_err: Option<ActionableErr>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceStatusCheckEvent {
    pub resource: String,
    pub status: String,
    pub message: String,
    pub err: String,
    pub actionable_err: Option<ActionableErr>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortEvent {
    pub local_port: i32,
    pub remote_port: i32,
    pub pod_name: String,
    pub container_name: String,
    pub namespace: String,
    pub port_name: String,
    pub resource_type: String,
    pub resource_name: String,
    pub address: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSyncEvent {
    pub file_count: u32,
    pub image: String,
    pub status: String,
    pub err: String,
    pub actionable_err: Option<ActionableErr>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebuggingContainerEvent {
    pub status: String,
    pub pod_name: String,
    pub container_name: String,
    pub namespace: String,
    pub artifact: String,
    pub runtime: String,
    pub working_dir: String,
    pub debug_ports: BTreeMap<String, u32>,
}

impl DebuggingContainerEvent {
    /// Identity used to replace an existing entry in the state
    pub fn key(&self) -> (&str, &str, &str) {
        (&self.namespace, &self.pod_name, &self.container_name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevLoopEvent {
    pub iteration: u32,
    pub status: String,
    pub actionable_err: Option<ActionableErr>,
}

/// Core event enum - the vocabulary of pipeline activity
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Meta(MetaEvent),
    Build(BuildEvent),
    Deploy(DeployEvent),
    Port(PortEvent),
    StatusCheck(StatusCheckEvent),
    ResourceStatusCheck(ResourceStatusCheckEvent),
    FileSync(FileSyncEvent),
    DebuggingContainer(DebuggingContainerEvent),
    DevLoop(DevLoopEvent),
}

impl Event {
    // === Constructors ===

    pub fn build(artifact: &str, status: &str) -> Self {
        Event::Build(BuildEvent {
            artifact: artifact.to_string(),
            status: status.to_string(),
            ..Default::default()
        })
    }

    pub fn build_failed(artifact: &str, err: &str) -> Self {
        Event::Build(BuildEvent {
            artifact: artifact.to_string(),
            status: FAILED.to_string(),
            err: err.to_string(),
            actionable_err: None,
        })
    }

    pub fn deploy(status: &str) -> Self {
        Event::Deploy(DeployEvent {
            status: status.to_string(),
            ..Default::default()
        })
    }

    pub fn deploy_failed(err: &str) -> Self {
        Event::Deploy(DeployEvent {
            status: FAILED.to_string(),
            err: err.to_string(),
            actionable_err: None,
        })
    }

    pub fn status_check(status: &str) -> Self {
        Event::StatusCheck(StatusCheckEvent {
            status: status.to_string(),
            ..Default::default()
        })
    }

    pub fn resource_status_check(resource: &str, status: &str, message: &str) -> Self {
        Event::ResourceStatusCheck(ResourceStatusCheckEvent {
            resource: resource.to_string(),
            status: status.to_string(),
            message: message.to_string(),
            ..Default::default()
        })
    }

    pub fn file_sync(image: &str, file_count: u32, status: &str) -> Self {
        Event::FileSync(FileSyncEvent {
            image: image.to_string(),
            file_count,
            status: status.to_string(),
            ..Default::default()
        })
    }

    pub fn port_forward(local_port: i32, remote_port: i32, resource_type: &str, resource_name: &str) -> Self {
        Event::Port(PortEvent {
            local_port,
            remote_port,
            resource_type: resource_type.to_string(),
            resource_name: resource_name.to_string(),
            address: "127.0.0.1".to_string(),
            ..Default::default()
        })
    }

    pub fn dev_loop(iteration: u32, status: &str) -> Self {
        Event::DevLoop(DevLoopEvent {
            iteration,
            status: status.to_string(),
            actionable_err: None,
        })
    }

    // === Accessors ===

    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::Meta(_) => "Meta",
            Event::Build(_) => "Build",
            Event::Deploy(_) => "Deploy",
            Event::Port(_) => "Port",
            Event::StatusCheck(_) => "StatusCheck",
            Event::ResourceStatusCheck(_) => "ResourceStatusCheck",
            Event::FileSync(_) => "FileSync",
            Event::DebuggingContainer(_) => "DebuggingContainer",
            Event::DevLoop(_) => "DevLoop",
        }
    }

    /// Phase whose taxonomy classifies this event's failures
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Event::Build(_) => Some(Phase::Build),
            Event::Deploy(_) => Some(Phase::Deploy),
            Event::StatusCheck(_) | Event::ResourceStatusCheck(_) => Some(Phase::StatusCheck),
            Event::FileSync(_) => Some(Phase::Sync),
            Event::DevLoop(_) => Some(Phase::DevInit),
            Event::Meta(_) | Event::Port(_) | Event::DebuggingContainer(_) => None,
        }
    }

    pub fn status(&self) -> Option<&str> {
        match self {
            Event::Build(e) => Some(&e.status),
            Event::Deploy(e) => Some(&e.status),
            Event::StatusCheck(e) => Some(&e.status),
            Event::ResourceStatusCheck(e) => Some(&e.status),
            Event::FileSync(e) => Some(&e.status),
            Event::DebuggingContainer(e) => Some(&e.status),
            Event::DevLoop(e) => Some(&e.status),
            Event::Meta(_) | Event::Port(_) => None,
        }
    }

    pub fn actionable_err(&self) -> Option<&ActionableErr> {
        match self {
            Event::Build(e) => e.actionable_err.as_ref(),
            Event::Deploy(e) => e.actionable_err.as_ref(),
            Event::StatusCheck(e) => e.actionable_err.as_ref(),
            Event::ResourceStatusCheck(e) => e.actionable_err.as_ref(),
            Event::FileSync(e) => e.actionable_err.as_ref(),
            Event::DevLoop(e) => e.actionable_err.as_ref(),
            Event::Meta(_) | Event::Port(_) | Event::DebuggingContainer(_) => None,
        }
    }

    /// Reject events that would corrupt the state fold
    pub fn validate(&self) -> Result<(), EventError> {
        if let Some(status) = self.status() {
            if !STATUS_VOCABULARY.contains(&status) {
                return Err(EventError::Malformed(format!(
                    "{} event has unknown status {:?}",
                    self.event_type(),
                    status
                )));
            }
        }

        let missing = match self {
            Event::Build(e) if e.artifact.is_empty() => Some("artifact"),
            Event::ResourceStatusCheck(e) if e.resource.is_empty() => Some("resource"),
            Event::DebuggingContainer(e) if e.pod_name.is_empty() => Some("pod_name"),
            Event::DebuggingContainer(e) if e.container_name.is_empty() => Some("container_name"),
            _ => None,
        };
        if let Some(field) = missing {
            return Err(EventError::Malformed(format!(
                "{} event is missing {}",
                self.event_type(),
                field
            )));
        }

        if let Event::Port(e) = self {
            if !(1..=65535).contains(&e.local_port) {
                return Err(EventError::Malformed(format!(
                    "Port event has invalid local port {}",
                    e.local_port
                )));
            }
        }

        Ok(())
    }

    /// Attach a status code to any failure that lacks one
    ///
    /// Producer-classified errors (non-`OK` code) are kept as they are.
    pub fn enrich_error(&mut self) {
        let Some(phase) = self.phase() else {
            return;
        };
        let (status, err, actionable) = match self {
            Event::Build(e) => (e.status.as_str(), e.err.as_str(), &mut e.actionable_err),
            Event::Deploy(e) => (e.status.as_str(), e.err.as_str(), &mut e.actionable_err),
            Event::StatusCheck(e) => (e.status.as_str(), e.err.as_str(), &mut e.actionable_err),
            Event::ResourceStatusCheck(e) => (e.status.as_str(), e.err.as_str(), &mut e.actionable_err),
            Event::FileSync(e) => (e.status.as_str(), e.err.as_str(), &mut e.actionable_err),
            Event::DevLoop(e) => (e.status.as_str(), "", &mut e.actionable_err),
            Event::Meta(_) | Event::Port(_) | Event::DebuggingContainer(_) => return,
        };

        // Legacy err text alone does not make a running phase a failure
        if status != FAILED && actionable.is_none() {
            return;
        }

        match actionable {
            Some(existing) if existing.err_code != StatusCode::Ok => {}
            Some(existing) => {
                let text = if existing.message.is_empty() { err } else { existing.message.as_str() };
                let enriched = enrich(text, phase);
                existing.err_code = enriched.err_code;
                if existing.suggestions.is_empty() {
                    existing.suggestions = enriched.suggestions;
                }
            }
            None => *actionable = Some(enrich(err, phase)),
        }
    }

    /// Human-readable one-liner for the log entry
    pub fn describe(&self) -> String {
        match self {
            Event::Meta(e) if e.entry.is_empty() => "Pipeline metadata recorded".to_string(),
            Event::Meta(e) => e.entry.clone(),
            Event::Build(e) => format!("Build {} for artifact {}", verb(&e.status), e.artifact),
            Event::Deploy(e) => format!("Deploy {}", verb(&e.status)),
            Event::StatusCheck(e) => format!("Status check {}", verb(&e.status)),
            Event::ResourceStatusCheck(e) if e.message.is_empty() => {
                format!("Resource {} status {}", e.resource, verb(&e.status))
            }
            Event::ResourceStatusCheck(e) => {
                format!("Resource {} status {}: {}", e.resource, verb(&e.status), e.message)
            }
            Event::Port(e) => {
                let target = if e.resource_name.is_empty() {
                    format!("pod/{}", e.pod_name)
                } else {
                    format!("{}/{}", e.resource_type, e.resource_name)
                };
                format!(
                    "Port forwarding {} port {} to local port {}",
                    target, e.remote_port, e.local_port
                )
            }
            Event::FileSync(e) => format!(
                "File sync {} for {} files for {}",
                verb(&e.status),
                e.file_count,
                e.image
            ),
            Event::DebuggingContainer(e) => format!(
                "Debuggable container {} pod/{}:{} in namespace {}",
                verb(&e.status),
                e.pod_name,
                e.container_name,
                e.namespace
            ),
            Event::DevLoop(e) => format!("Dev loop iteration {} {}", e.iteration, verb(&e.status)),
        }
    }
}

fn verb(status: &str) -> String {
    match status {
        IN_PROGRESS | STARTED => "started".to_string(),
        COMPLETE => "completed".to_string(),
        SUCCEEDED => "succeeded".to_string(),
        FAILED => "failed".to_string(),
        TERMINATED => "terminated".to_string(),
        other => other.to_lowercase(),
    }
}

/// A timestamped, sequenced entry of the event log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the log, starting at 0
    #[serde(default)]
    pub sequence: u64,
    /// Replaced by the log's own clock when a client sends an entry in
    #[serde(rename = "ts", default)]
    pub timestamp: DateTime<Utc>,
    pub event: Event,
    /// Human-readable description
    #[serde(default)]
    pub entry: String,
}

impl LogEntry {
    pub fn new(sequence: u64, timestamp: DateTime<Utc>, event: Event) -> Self {
        let entry = event.describe();
        Self {
            sequence,
            timestamp,
            event,
            entry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type() {
        assert_eq!(Event::build("a", IN_PROGRESS).event_type(), "Build");
        assert_eq!(Event::dev_loop(1, IN_PROGRESS).event_type(), "DevLoop");
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::build("app", COMPLETE);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"build""#));
        assert!(json.contains(r#""artifact":"app""#));

        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_unknown_variant_is_rejected() {
        let json = r#"{"type":"teleport","status":"Complete"}"#;
        assert!(serde_json::from_str::<Event>(json).is_err());
    }

    #[test]
    fn test_missing_fields_default() {
        let json = r#"{"type":"deploy","status":"In progress"}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(event, Event::deploy(IN_PROGRESS));
    }

    #[test]
    fn test_validate_rejects_unknown_status() {
        let err = Event::deploy("Exploded").validate().unwrap_err();
        assert!(err.to_string().contains("Exploded"));
    }

    #[test]
    fn test_validate_rejects_missing_keys() {
        assert!(Event::build("", IN_PROGRESS).validate().is_err());
        assert!(Event::resource_status_check("", IN_PROGRESS, "").validate().is_err());
        assert!(Event::port_forward(0, 80, "service", "web").validate().is_err());
        assert!(
            Event::DebuggingContainer(DebuggingContainerEvent {
                status: STARTED.to_string(),
                pod_name: "web-0".to_string(),
                ..Default::default()
            })
            .validate()
            .is_err()
        );
    }

    #[test]
    fn test_validate_accepts_wellformed() {
        assert!(Event::build("app", IN_PROGRESS).validate().is_ok());
        assert!(Event::port_forward(8080, 80, "service", "web").validate().is_ok());
        assert!(Event::Meta(MetaEvent::default()).validate().is_ok());
    }

    #[test]
    fn test_enrich_fills_missing_actionable_err() {
        let mut event = Event::deploy_failed("kaboom");
        event.enrich_error();
        let err = event.actionable_err().unwrap();
        assert_eq!(err.err_code, StatusCode::DeployUnknown);
        assert_eq!(err.message, "kaboom");
        assert!(err.suggestions.is_empty());
    }

    #[test]
    fn test_enrich_keeps_producer_classification() {
        let mut event = Event::Build(BuildEvent {
            artifact: "app".to_string(),
            status: FAILED.to_string(),
            err: "no space left on device".to_string(),
            actionable_err: Some(ActionableErr::new(StatusCode::BuildUserError, "bad flag")),
        });
        event.enrich_error();
        assert_eq!(event.actionable_err().unwrap().err_code, StatusCode::BuildUserError);
    }

    #[test]
    fn test_enrich_classifies_unset_code() {
        let mut event = Event::Build(BuildEvent {
            artifact: "app".to_string(),
            status: FAILED.to_string(),
            err: String::new(),
            actionable_err: Some(ActionableErr::new(StatusCode::Ok, "write: no space left on device")),
        });
        event.enrich_error();
        let err = event.actionable_err().unwrap();
        assert_eq!(err.err_code, StatusCode::BuildDockerNoSpaceErr);
        assert_eq!(err.suggestions.len(), 1);
    }

    #[test]
    fn test_enrich_ignores_success() {
        let mut event = Event::build("app", COMPLETE);
        event.enrich_error();
        assert!(event.actionable_err().is_none());
    }

    #[test]
    fn test_enrich_leaves_running_event_with_legacy_err() {
        let mut event = Event::Build(BuildEvent {
            artifact: "app".to_string(),
            status: IN_PROGRESS.to_string(),
            err: "retrying push".to_string(),
            actionable_err: None,
        });
        event.enrich_error();
        assert!(event.actionable_err().is_none());

        let mut state = crate::state::State::default();
        crate::state::apply(&mut state, &event);
        assert_eq!(state.build_state.status_code, StatusCode::Ok);
    }

    #[test]
    fn test_enrich_classifies_running_resource_with_actionable_err() {
        let mut event = Event::resource_status_check("deployment/web", IN_PROGRESS, "");
        if let Event::ResourceStatusCheck(e) = &mut event {
            e.actionable_err = Some(ActionableErr::new(StatusCode::Ok, "container app: ImagePullBackOff"));
        }
        event.enrich_error();
        assert_eq!(event.actionable_err().unwrap().err_code, StatusCode::StatusCheckImagePullErr);
    }

    #[test]
    fn test_enrich_dev_loop_failure() {
        let mut event = Event::dev_loop(3, FAILED);
        event.enrich_error();
        assert_eq!(event.actionable_err().unwrap().err_code, StatusCode::DevInitUnknown);
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            Event::build("app", IN_PROGRESS).describe(),
            "Build started for artifact app"
        );
        assert_eq!(Event::deploy(COMPLETE).describe(), "Deploy completed");
        assert_eq!(
            Event::port_forward(8080, 80, "service", "web").describe(),
            "Port forwarding service/web port 80 to local port 8080"
        );
        assert_eq!(
            Event::resource_status_check("deployment/web", IN_PROGRESS, "waiting for rollout").describe(),
            "Resource deployment/web status started: waiting for rollout"
        );
    }

    #[test]
    fn test_log_entry_serialization() {
        let entry = LogEntry::new(7, Utc::now(), Event::deploy(IN_PROGRESS));
        assert_eq!(entry.entry, "Deploy started");

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains(r#""ts""#));
        assert!(json.contains(r#""sequence":7"#));

        let parsed: LogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entry);
    }
}
