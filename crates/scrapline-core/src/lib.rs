//! Scrapline Core -- the grid simulation engine for a recycling factory.
//!
//! Items travel across a 2D grid of cells. Each cell is blank or holds one
//! machine (conveyor, spawner, processor, fabricator, sorter, seller) that
//! moves, routes, queues, transforms, or sells the items on it. The engine
//! is single-threaded and deterministic: time is fixed-point and the only
//! randomness comes from a seeded [`rng::SimRng`].
//!
//! # Tick Pipeline
//!
//! Each call to [`engine::Engine::step`] advances the simulation by `dt`:
//!
//! 1. **Clock** -- advance the simulated clock.
//! 2. **Machines** -- every cell's heartbeat, row-major.
//! 3. **Movement** -- advance moving items through the two-phase protocol.
//! 4. **Post-tick** -- deliver buffered events.
//! 5. **Bookkeeping** -- increment tick counter and compute the state hash.
//!
//! # Two-Phase Movement
//!
//! A move from one cell to its neighbour runs from progress 0 to 1. At 0.5
//! an item bound for a processor or fabricator stops and joins that
//! machine's waiting queue; it only finishes the move once the machine
//! pulls it:
//!
//! ```rust,ignore
//! engine.place_machine(pos, shredder, Direction::Up)?;
//! engine.inject_item(pos, can)?;          // queued at the midpoint
//! engine.step(secs(0.25));                // shredder pulls, item resumes
//! ```
//!
//! # Key Types
//!
//! - [`engine::Engine`] -- owns the grid and runs the tick pipeline.
//! - [`grid::GridStore`] -- cells, resident and waiting lists, item arena.
//! - [`item::Item`] -- per-item state machine (Idle, Moving, Waiting,
//!   Processing).
//! - [`machine::Machine`] -- enum of machine behaviours.
//! - [`recipe::RecipeResolver`] -- recipe lookup by machine and input.
//! - [`supply::WasteSupplyQueue`] -- bounded queue of purchased crates.
//! - [`registry::Registry`] -- immutable item, machine, recipe and crate
//!   definitions (frozen at startup).
//! - [`event::EventBus`] -- typed events with buffered delivery.
//! - [`render::Renderer`] -- boundary to the rendering collaborator.
//! - [`serialize`] -- versioned snapshots via bitcode.

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod fixed;
pub mod grid;
pub mod id;
pub mod item;
pub mod machine;
pub mod movement;
pub mod processor;
pub mod queue;
pub mod recipe;
pub mod registry;
pub mod render;
pub mod rng;
pub mod serialize;
pub mod sim;
pub mod spawner;
pub mod supply;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
