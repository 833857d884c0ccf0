//! IPC message types for the event server
//!
//! Simple JSON-over-newline protocol. Each message is a single line of JSON followed by `\n`.
//! `Events` and `EventLog` keep the connection open and answer with one `Entry` per line.

use serde::{Deserialize, Serialize};

use crate::control::{Intent, TriggerPhase, TriggerState};
use crate::events::{Event, LogEntry};
use crate::state::State;

/// Messages from clients to the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Request {
    /// Ping to check if the server is alive
    Ping,

    /// Snapshot of the pipeline state
    GetState,

    /// Stream the full history, then live entries
    Events,

    /// Stream live entries only; the client may send entries back
    EventLog,

    /// Run the flagged phases once
    Execute { intent: Intent },

    /// Toggle a phase's auto-trigger
    AutoExecute { phase: TriggerPhase, state: TriggerState },

    /// Record an event
    Handle { event: Event },

    /// Request the server to stop gracefully
    Shutdown,
}

/// Responses from the server to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Response {
    /// Acknowledgment
    Ok,

    /// Pong response to ping
    Pong { version: String },

    State { state: Box<State> },

    /// One streamed log entry
    Entry { entry: Box<LogEntry> },

    /// Error response
    Error { message: String },
}

impl Response {
    pub fn error(message: impl ToString) -> Self {
        Response::Error {
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::IN_PROGRESS;

    #[test]
    fn test_ping_serialize() {
        let json = serde_json::to_string(&Request::Ping).unwrap();
        assert_eq!(json, r#"{"type":"Ping"}"#);
    }

    #[test]
    fn test_execute_serialize() {
        let msg = Request::Execute {
            intent: Intent {
                build: true,
                ..Default::default()
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"Execute","intent":{"build":true,"sync":false,"deploy":false}}"#
        );
    }

    #[test]
    fn test_auto_execute_deserialize() {
        let json = r#"{"type":"AutoExecute","phase":"sync","state":{"enabled":false}}"#;
        let msg: Request = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            Request::AutoExecute {
                phase: TriggerPhase::Sync,
                state: TriggerState { enabled: false },
            }
        );
    }

    #[test]
    fn test_handle_carries_tagged_event() {
        let json = r#"{"type":"Handle","event":{"type":"build","artifact":"app","status":"In progress"}}"#;
        let msg: Request = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            Request::Handle {
                event: Event::build("app", IN_PROGRESS)
            }
        );
    }

    #[test]
    fn test_unknown_request_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"type":"Reboot"}"#).is_err());
    }

    #[test]
    fn test_error_response_serialize() {
        let json = serde_json::to_string(&Response::error("Something went wrong")).unwrap();
        assert_eq!(json, r#"{"type":"Error","message":"Something went wrong"}"#);
    }

    #[test]
    fn test_state_response_roundtrip() {
        let resp = Response::State {
            state: Box::new(State::with_artifacts(["app"])),
        };
        let json = serde_json::to_string(&resp).unwrap();
        let parsed: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, resp);
    }

    #[test]
    fn test_state_response_with_forwarded_ports() {
        let mut state = State::default();
        crate::state::apply(&mut state, &Event::port_forward(8080, 80, "service", "web"));
        crate::state::apply(&mut state, &Event::port_forward(9090, 90, "service", "metrics"));
        let resp = Response::State { state: Box::new(state) };

        let json = serde_json::to_string(&resp).unwrap();
        let parsed: Response = serde_json::from_str(&json).unwrap();
        match parsed {
            Response::State { state } => {
                assert_eq!(state.forwarded_ports.len(), 2);
                assert_eq!(state.forwarded_ports[&8080].remote_port, 80);
            }
            other => panic!("expected State, got {:?}", other),
        }
    }

    #[test]
    fn test_state_response_rejects_bad_port_key() {
        let json = r#"{"type":"State","state":{"forwarded_ports":{"web":{}}}}"#;
        assert!(serde_json::from_str::<Response>(json).is_err());
    }
}
