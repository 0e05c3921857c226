use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
pub type Fixed64 = I32F32;

/// Simulation time in seconds, kept in fixed-point so that progress and
/// timeout comparisons are exact and platform independent.
pub type Seconds = Fixed64;

/// Ticks count completed simulation steps.
pub type Ticks = u64;

/// Exactly one half. The midpoint of every move.
pub const HALF: Fixed64 = Fixed64::from_bits(1 << 31);

/// Exactly one. A completed move.
pub const ONE: Fixed64 = Fixed64::from_bits(1 << 32);

/// Convert an f64 to Fixed64. Use only for initialization, never in sim loop.
///
/// Saturates at the Q32.32 range (about ±2.1e9); NaN becomes zero. Callers
/// that must reject such values use [`checked_fixed64`].
#[inline]
pub fn f64_to_fixed64(v: f64) -> Fixed64 {
    if v.is_nan() {
        return Fixed64::ZERO;
    }
    Fixed64::saturating_from_num(v)
}

/// Exact conversion, `None` for NaN, infinities and out-of-range values.
#[inline]
pub fn checked_fixed64(v: f64) -> Option<Fixed64> {
    if !v.is_finite() {
        return None;
    }
    Fixed64::checked_from_num(v)
}

/// Convert Fixed64 to f64. Use only for display and rendering.
#[inline]
pub fn fixed64_to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}

/// Shorthand for a duration in seconds.
#[inline]
pub fn secs(v: f64) -> Seconds {
    f64_to_fixed64(v)
}

/// Time elapsed between `since` and `now`, saturating at zero if the clock
/// reads earlier than the recorded timestamp (restored snapshots).
#[inline]
pub fn elapsed(now: Seconds, since: Seconds) -> Seconds {
    if now > since {
        now - since
    } else {
        Fixed64::ZERO
    }
}
