//! Event handler - the single writer of pipeline state
//!
//! [`EventHandler`] is a cloneable handle to an actor that owns the state
//! store, the event log and the trigger controller. Producers call
//! [`EventHandler::handle`]; observers take snapshots or cursors.

mod manager;
mod messages;

pub use manager::{DEFAULT_COMMAND_BUFFER, EventHandler, HandlerConfig};
pub use messages::{HandlerCommand, HandlerError, HandlerResponse, StartAt};
