//! Simulation clock and state hashing.

use crate::fixed::{Fixed64, Seconds, Ticks};

/// Mutable simulation state tracked by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SimState {
    /// Completed steps.
    pub tick: Ticks,
    /// Simulated seconds since start. Advanced by `dt` at the top of a step.
    pub clock: Seconds,
}

impl SimState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the clock. Negative deltas are ignored so time never runs
    /// backwards.
    pub fn advance_clock(&mut self, dt: Seconds) {
        if dt > Fixed64::ZERO {
            self.clock = self.clock.saturating_add(dt);
        }
    }
}

/// A simple deterministic hash of simulation state for desync detection.
///
/// Uses FNV-1a (64-bit) for speed and simplicity. Not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(pub u64);

impl StateHash {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self(Self::FNV_OFFSET)
    }

    /// Feed bytes into the hash.
    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_fixed64(&mut self, v: Fixed64) {
        self.write(&v.to_bits().to_le_bytes());
    }

    /// Finalize and return the hash value.
    pub fn finish(self) -> u64 {
        self.0
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::secs;

    #[test]
    fn clock_never_runs_backwards() {
        let mut state = SimState::new();
        state.advance_clock(secs(0.5));
        state.advance_clock(secs(-3.0));
        assert_eq!(state.clock, secs(0.5));
        assert_eq!(state.tick, 0);
    }

    #[test]
    fn state_hash_deterministic() {
        let mut h1 = StateHash::new();
        h1.write_u64(42);
        h1.write_fixed64(secs(1.5));

        let mut h2 = StateHash::new();
        h2.write_u64(42);
        h2.write_fixed64(secs(1.5));

        assert_eq!(h1.finish(), h2.finish());
    }

    #[test]
    fn state_hash_order_matters() {
        let mut h1 = StateHash::new();
        h1.write_u32(1);
        h1.write_i32(2);

        let mut h2 = StateHash::new();
        h2.write_u32(2);
        h2.write_i32(1);

        assert_ne!(h1.finish(), h2.finish());
    }
}
