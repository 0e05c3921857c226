//! Data-file loading for Scrapline.
//!
//! Reads the static definition tables (`items`, `machines`, `recipes`,
//! `crates`) and an optional engine `config` from a directory of RON, JSON
//! or TOML files, resolves names to ids, and builds a frozen
//! [`Registry`](scrapline_core::registry::Registry).

pub mod loader;
pub mod logging;
pub mod schema;

pub use loader::{DataLoadError, GameData, load_game_data};
pub use logging::init_logging;
