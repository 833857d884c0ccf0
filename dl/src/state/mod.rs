//! Pipeline state
//!
//! The [`StateStore`] holds the one authoritative [`State`]; it only changes
//! by folding events with [`apply`].

mod store;

pub use store::{BuildState, DeployState, FileSyncState, State, StateStore, StatusCheckState, apply, fold};
