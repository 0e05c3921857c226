//! Tracing subscriber setup for hosts embedding the engine.
//!
//! The engine logs under `scrapline::{movement, machine, economy, grid,
//! snapshot}` and this crate under `scrapline::data`. `RUST_LOG` overrides
//! the default `info` filter, e.g. `RUST_LOG=scrapline::movement=trace`.

use tracing_subscriber::EnvFilter;

/// Install a compact stderr subscriber. Returns `false` if a global
/// subscriber was already set, which leaves the existing one in place.
pub fn init_logging() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .try_init()
        .is_ok()
}
