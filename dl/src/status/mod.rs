//! Status taxonomy
//!
//! Enumerated status and suggestion codes plus the lookup tables that turn
//! raw producer errors into [`ActionableErr`] values.

mod codes;
mod enrich;

pub use codes::{Category, Phase, StatusCode, SuggestionCode};
pub use enrich::{ActionableErr, Suggestion, enrich};
