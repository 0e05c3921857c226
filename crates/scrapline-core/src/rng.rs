//! Deterministic PRNG for simulation use (spawner item selection).
//!
//! Uses the SplitMix64 algorithm: fast, 8 bytes of state, and trivially
//! serializable for snapshots, so a restored grid spawns the same sequence.

/// SplitMix64 pseudo-random number generator.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SimRng {
    state: u64,
}

impl SimRng {
    /// Create a new RNG with the given seed.
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Generate the next `u64` in the sequence.
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform value in `0..bound`. Returns 0 when `bound` is 0.
    ///
    /// Multiply-shift on the upper 32 bits, so there is no modulo bias worth
    /// caring about for the handful of item types a crate holds.
    pub fn next_below(&mut self, bound: u32) -> u32 {
        if bound == 0 {
            return 0;
        }
        let upper = self.next_u64() >> 32;
        ((upper * bound as u64) >> 32) as u32
    }

    /// Get the internal state (for hashing/serialization).
    pub fn state(&self) -> u64 {
        self.state
    }
}
