//! Coordinator tunables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the coordination layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Minimum seconds between readings forwarded to persistence, per source.
    #[serde(default = "default_throttle_window_secs")]
    pub throttle_window_secs: u64,
}

fn default_throttle_window_secs() -> u64 {
    5
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            throttle_window_secs: default_throttle_window_secs(),
        }
    }
}

impl CoordinatorConfig {
    /// The persistence throttle window.
    #[must_use]
    pub fn throttle_window(&self) -> Duration {
        Duration::from_secs(self.throttle_window_secs)
    }
}
