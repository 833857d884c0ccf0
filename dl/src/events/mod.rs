//! Event model and event log
//!
//! Every state change of the pipeline is an [`Event`]. Accepted events are
//! appended to the [`EventLog`], which fans them out to subscribers.
//!
//! # Architecture
//!
//! ```text
//!    Builder        Deployer       Syncer      Status checker
//!       │              │             │               │
//!       └──────────────┴──────┬──────┴───────────────┘
//!                             ↓  handle(event)
//! ┌──────────────────────────────────────────────────────────┐
//! │                       EVENT LOG                           │
//! │     entries: [0] [1] [2] ... [tail-1]   (append-only)     │
//! │     one bounded buffer per subscriber                     │
//! └──────────────────────────────────────────────────────────┘
//!         ↓ subscribe(0)                 ↓ subscribe(tail)
//!   replay + live tail              live tail only
//!   (events API)                    (legacy event_log API)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use devloop::events::{Event, EventLog, IN_PROGRESS};
//!
//! let mut log = EventLog::default();
//! log.append(Event::build("app", IN_PROGRESS));
//!
//! let mut cursor = log.subscribe(0)?;
//! while let Some(Ok(entry)) = cursor.next().await {
//!     println!("{}: {}", entry.sequence, entry.entry);
//! }
//! ```

mod log;
mod types;

use thiserror::Error;

pub use log::{Cursor, DEFAULT_SUBSCRIBER_BUFFER, EventLog, StreamError, SubscriberId};
pub use types::{
    BuildEvent, BuildMetadata, BuildType, COMPLETE, ClusterType, DebuggingContainerEvent, DeployEvent, DeployMetadata,
    Deployer, DevLoopEvent, Event, FAILED, FileSyncEvent, IN_PROGRESS, ImageBuilder, LogEntry, MetaEvent, Metadata,
    NOT_STARTED, PortEvent, ResourceStatusCheckEvent, STARTED, STATUS_VOCABULARY, SUCCEEDED, StatusCheckEvent,
    TERMINATED,
};

/// Errors raised by the event model and log
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("Malformed event: {0}")]
    Malformed(String),

    #[error("Cursor {from} is past the end of the log (tail {tail})")]
    CursorOutOfRange { from: u64, tail: u64 },
}
