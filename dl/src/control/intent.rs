//! One-shot execution requests
//!
//! An intent asks the dev-loop driver to run a phase once, even while its
//! auto-trigger is off. Flags are OR-ed in and cleared by the consumer.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::debug;

use super::trigger::TriggerPhase;

/// Which phases to run once
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Intent {
    pub build: bool,
    pub sync: bool,
    pub deploy: bool,
}

impl Intent {
    pub fn is_empty(&self) -> bool {
        !(self.build || self.sync || self.deploy)
    }

    pub fn get(&self, phase: TriggerPhase) -> bool {
        match phase {
            TriggerPhase::Build => self.build,
            TriggerPhase::Sync => self.sync,
            TriggerPhase::Deploy => self.deploy,
        }
    }
}

/// Pending intents shared between the API and the driver
#[derive(Debug, Default)]
pub struct IntentQueue {
    build: AtomicBool,
    sync: AtomicBool,
    deploy: AtomicBool,
    notify: Notify,
}

impl IntentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, phase: TriggerPhase) -> &AtomicBool {
        match phase {
            TriggerPhase::Build => &self.build,
            TriggerPhase::Sync => &self.sync,
            TriggerPhase::Deploy => &self.deploy,
        }
    }

    /// Raise every flag set in `intent`; already-raised flags stay raised
    pub fn set(&self, intent: Intent) {
        debug!(?intent, "IntentQueue::set");
        if intent.is_empty() {
            return;
        }
        for phase in TriggerPhase::ALL {
            if intent.get(phase) {
                self.flag(phase).store(true, Ordering::Release);
            }
        }
        self.notify.notify_one();
    }

    /// Read and clear one phase's flag atomically
    pub fn consume(&self, phase: TriggerPhase) -> bool {
        let was_set = self.flag(phase).swap(false, Ordering::AcqRel);
        if was_set {
            debug!(%phase, "IntentQueue::consume: intent consumed");
        }
        was_set
    }

    /// Current flags without clearing them
    pub fn pending(&self) -> Intent {
        Intent {
            build: self.build.load(Ordering::Acquire),
            sync: self.sync.load(Ordering::Acquire),
            deploy: self.deploy.load(Ordering::Acquire),
        }
    }

    /// Wait until an intent is set
    ///
    /// A `set` that happens while nobody waits is remembered, so the next
    /// call returns immediately. Wake-ups may be spurious; the driver still
    /// decides with [`IntentQueue::consume`]. Meant for a single driver task.
    pub async fn wait(&self) {
        if !self.pending().is_empty() {
            return;
        }
        self.notify.notified().await;
    }
}
