//! Event handler messages
//!
//! Commands and responses for the actor pattern.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::control::TriggerPhase;
use crate::events::{Cursor, Event, EventError};
use crate::state::State;

/// Errors from handler operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error("Malformed event: {0}")]
    Malformed(String),

    #[error("Cursor {from} is past the end of the log (tail {tail})")]
    CursorOutOfRange { from: u64, tail: u64 },

    #[error("Channel error")]
    ChannelError,
}

impl From<EventError> for HandlerError {
    fn from(err: EventError) -> Self {
        match err {
            EventError::Malformed(msg) => HandlerError::Malformed(msg),
            EventError::CursorOutOfRange { from, tail } => HandlerError::CursorOutOfRange { from, tail },
        }
    }
}

/// Response from handler operations
pub type HandlerResponse<T> = Result<T, HandlerError>;

/// Where a new subscription starts reading
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartAt {
    /// An explicit sequence number
    Sequence(u64),
    /// Whatever the tail is when the actor handles the request
    Tail,
}

/// Commands sent to the EventHandler actor
#[derive(Debug)]
pub enum HandlerCommand {
    // Producer side
    Handle {
        event: Event,
        reply: oneshot::Sender<HandlerResponse<u64>>,
    },

    // Observer side
    GetState {
        reply: oneshot::Sender<State>,
    },
    Subscribe {
        start: StartAt,
        reply: oneshot::Sender<HandlerResponse<Cursor>>,
    },
    LogLength {
        reply: oneshot::Sender<u64>,
    },
    SubscriberCount {
        reply: oneshot::Sender<usize>,
    },

    // Trigger controller
    SetTrigger {
        phase: TriggerPhase,
        enabled: bool,
        reply: oneshot::Sender<bool>,
    },
    GetTrigger {
        phase: TriggerPhase,
        reply: oneshot::Sender<bool>,
    },

    // Shutdown
    Shutdown,
}
