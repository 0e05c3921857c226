//! Engine tunables.
//!
//! [`EngineConfig`] is the human-edited form (plain `f64` seconds, loaded
//! from data files); [`Timing`] is the fixed-point copy the tick loop reads.

use crate::fixed::{Fixed64, Seconds, f64_to_fixed64};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cells travelled per second by a moving item.
    pub item_speed: f64,
    /// How long an idle item may rest on a blank cell.
    pub blank_item_timeout: f64,
    /// How long an item may wait at a machine's midpoint before eviction.
    pub waiting_timeout: f64,
    /// Minimum time between two spawns of one spawner.
    pub spawn_interval: f64,
    /// Maximum number of crates in the global waste queue.
    pub waste_queue_limit: usize,
    pub starting_credits: u64,
    pub rng_seed: u64,
    /// Ring buffer capacity per event kind.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            item_speed: 1.0,
            blank_item_timeout: 10.0,
            waiting_timeout: 15.0,
            spawn_interval: 1.0,
            waste_queue_limit: 5,
            starting_credits: 100,
            rng_seed: 0x5C4A_9E37,
            event_capacity: 1024,
        }
    }
}

impl EngineConfig {
    pub fn timing(&self) -> Timing {
        Timing {
            item_speed: f64_to_fixed64(self.item_speed.max(0.0)),
            blank_item_timeout: f64_to_fixed64(self.blank_item_timeout.max(0.0)),
            waiting_timeout: f64_to_fixed64(self.waiting_timeout.max(0.0)),
            spawn_interval: f64_to_fixed64(self.spawn_interval.max(0.0)),
        }
    }
}

/// Fixed-point timing values derived from [`EngineConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub item_speed: Fixed64,
    pub blank_item_timeout: Seconds,
    pub waiting_timeout: Seconds,
    pub spawn_interval: Seconds,
}

impl Default for Timing {
    fn default() -> Self {
        EngineConfig::default().timing()
    }
}
