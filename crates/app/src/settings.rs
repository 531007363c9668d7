//! Runtime settings shared by every device of a simulation.

use std::time::Duration;

use blinksim_domain::program::TimerPolicy;
use serde::{Deserialize, Serialize};

/// Tunables of the device runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Neighbor debounce window, in milliseconds.
    pub debounce_ms: u64,
    /// Quiet period closing a multi-click sequence, in milliseconds.
    pub multi_click_window_ms: u64,
    /// Presses longer than this are long clicks, in milliseconds.
    pub long_press_ms: u64,
    /// Maximum nesting of handler runs (signal emission, bypassed thresholds).
    pub max_dispatch_depth: usize,
    /// Maximum cross-device notifications delivered per mailbox pump.
    pub max_cascade: usize,
    /// Number of records kept in each device's event log.
    pub event_log_capacity: usize,
    /// Policy for timers that do not declare their own.
    pub timer_policy: TimerPolicy,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            multi_click_window_ms: 300,
            long_press_ms: 1000,
            max_dispatch_depth: 64,
            max_cascade: 1024,
            event_log_capacity: 256,
            timer_policy: TimerPolicy::default(),
        }
    }
}

impl RuntimeSettings {
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub fn multi_click_window(&self) -> Duration {
        Duration::from_millis(self.multi_click_window_ms)
    }

    #[must_use]
    pub fn long_press(&self) -> Duration {
        Duration::from_millis(self.long_press_ms)
    }
}
