//! Configuration for the intents engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_INTENT_RESOLUTION_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_OPEN_CONTEXT_TIMEOUT_MS: u64 = 10_000;

/// Timeouts for the waits the intents engine performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IntentsConfig {
    /// How long a cold-started application has to add its intent listener.
    pub intent_resolution_timeout_ms: u64,
    /// How long an opened application has to fetch its opening context.
    pub open_context_timeout_ms: u64,
}

impl IntentsConfig {
    pub fn intent_resolution_timeout(&self) -> Duration {
        Duration::from_millis(self.intent_resolution_timeout_ms)
    }

    pub fn open_context_timeout(&self) -> Duration {
        Duration::from_millis(self.open_context_timeout_ms)
    }
}

impl Default for IntentsConfig {
    fn default() -> Self {
        Self {
            intent_resolution_timeout_ms: DEFAULT_INTENT_RESOLUTION_TIMEOUT_MS,
            open_context_timeout_ms: DEFAULT_OPEN_CONTEXT_TIMEOUT_MS,
        }
    }
}
