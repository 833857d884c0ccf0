//! Inter-Process Communication for the event server
//!
//! Unix Domain Socket transport in front of the [`EventHandler`](crate::handler::EventHandler):
//! the CLI, dashboards and producers in other processes reach the same
//! operations the in-process API offers.

use std::path::PathBuf;

pub mod client;
pub mod listener;
pub mod messages;

pub use client::{EntryStream, EventClient};
pub use listener::{LineReader, MAX_MESSAGE_SIZE, ReadLine, cleanup_socket, create_listener_at, handle_connection, parse_request, send_response, serve};
pub use messages::{Request, Response};

/// Get the default socket path for the event server
pub fn get_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("devloop")
        .join("devloop.sock")
}
