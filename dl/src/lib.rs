//! devloop - state aggregation and event notification for the dev loop
//!
//! Builders, deployers, file syncers and status checkers report what they are
//! doing as [`Event`]s. The [`EventHandler`] folds every event into one
//! authoritative [`State`] and appends it to an ordered log that any number of
//! observers can replay or tail at the same time.
//!
//! # Modules
//!
//! - [`status`] - Status codes, suggestions and error classification
//! - [`events`] - Event model and the append-only event log
//! - [`state`] - Pipeline snapshot and its fold rule
//! - [`control`] - Auto-triggers and one-shot execution intents
//! - [`handler`] - The single-writer actor behind the public API
//! - [`ipc`] - Unix socket transport
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod control;
pub mod events;
pub mod handler;
pub mod ipc;
pub mod state;
pub mod status;

pub use control::{Intent, TriggerPhase, TriggerState};
pub use events::{Cursor, Event, LogEntry, StreamError};
pub use handler::{EventHandler, HandlerConfig, HandlerError};
pub use state::State;
pub use status::{ActionableErr, StatusCode, SuggestionCode};
