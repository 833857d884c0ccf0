//! Execution control consumed by the dev-loop driver
//!
//! - [`TriggerController`]: per-phase auto-trigger flags
//! - [`IntentQueue`]: one-shot "run it now" requests

mod intent;
mod trigger;

pub use intent::{Intent, IntentQueue};
pub use trigger::{ParsePhaseError, TriggerController, TriggerPhase, TriggerState};
