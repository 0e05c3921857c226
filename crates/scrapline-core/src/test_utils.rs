//! Shared test helpers for unit tests, integration tests, and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::config::{EngineConfig, Timing};
use crate::engine::Engine;
use crate::event::EventBus;
use crate::fixed::{Fixed64, Seconds, Ticks, secs};
use crate::grid::{CellRole, Direction, GridPosition, GridStore};
use crate::id::*;
use crate::machine::MachineContext;
use crate::recipe::RecipeResolver;
use crate::registry::{MachineDef, MachineKind, Registry, RegistryBuilder, RecipeEntry};
use crate::rng::SimRng;
use crate::supply::{WasteSupplyQueue, Wallet};
use std::sync::Arc;

pub fn entry(item: ItemTypeId, quantity: u32) -> RecipeEntry {
    RecipeEntry { item, quantity }
}

fn machine(
    name: &str,
    kind: MachineKind,
    cost: u64,
    roles: &[CellRole],
    can_rotate: bool,
    base_process_time: f64,
) -> MachineDef {
    MachineDef {
        name: name.to_string(),
        kind,
        cost,
        allowed_roles: roles.to_vec(),
        can_rotate,
        can_configure: matches!(
            kind,
            MachineKind::Spawner | MachineKind::Fabricator | MachineKind::Sorter
        ),
        base_process_time: secs(base_process_time),
    }
}

// ===========================================================================
// Fixture
// ===========================================================================

/// A small recycling registry with handles to every definition.
///
/// | Machine   | Kind       | Cost | Roles  | Rotates |
/// |-----------|------------|------|--------|---------|
/// | conveyor  | Conveyor   | 5    | Grid   | yes     |
/// | spawner   | Spawner    | 20   | Bottom | no      |
/// | shredder  | Processor  | 25   | Grid   | yes     |
/// | baler     | Fabricator | 30   | Grid   | yes     |
/// | sorter    | Sorter     | 10   | Grid   | yes     |
/// | seller    | Seller     | 10   | Top    | no      |
///
/// Recipes: `shred_can` (shredder, can -> shredded aluminum, machine base
/// time 2 s) and `press_bale` (baler, 2 cans + paper -> aluminum bale, 3 s).
/// Crates: `household` (2 cans, 10 credits), `metal_scrap` (1 can and
/// 2 bottles, 15 credits).
pub struct Fixture {
    pub registry: Arc<Registry>,

    pub can: ItemTypeId,
    pub shredded_aluminum: ItemTypeId,
    pub paper: ItemTypeId,
    pub bottle: ItemTypeId,
    pub aluminum_bale: ItemTypeId,

    pub conveyor: MachineTypeId,
    pub spawner: MachineTypeId,
    pub shredder: MachineTypeId,
    pub baler: MachineTypeId,
    pub sorter: MachineTypeId,
    pub seller: MachineTypeId,

    pub shred_can: RecipeId,
    pub press_bale: RecipeId,

    pub household: CrateId,
    pub metal_scrap: CrateId,
}

impl Fixture {
    pub fn new() -> Self {
        let mut b = RegistryBuilder::new();
        let can = b.register_item("can", "Aluminum Can", 1);
        let shredded_aluminum = b.register_item("shredded_aluminum", "Shredded Aluminum", 5);
        let paper = b.register_item("paper", "Paper", 1);
        let bottle = b.register_item("bottle", "Plastic Bottle", 1);
        let aluminum_bale = b.register_item("aluminum_bale", "Aluminum Bale", 25);

        use CellRole::*;
        let conveyor = b.register_machine(machine("conveyor", MachineKind::Conveyor, 5, &[Grid], true, 0.0));
        let spawner = b.register_machine(machine("spawner", MachineKind::Spawner, 20, &[Bottom], false, 0.0));
        let shredder = b.register_machine(machine("shredder", MachineKind::Processor, 25, &[Grid], true, 2.0));
        let baler = b.register_machine(machine("baler", MachineKind::Fabricator, 30, &[Grid], true, 4.0));
        let sorter = b.register_machine(machine("sorter", MachineKind::Sorter, 10, &[Grid], true, 0.0));
        let seller = b.register_machine(machine("seller", MachineKind::Seller, 10, &[Top], false, 0.0));

        let shred_can = b.register_recipe(
            "shred_can",
            shredder,
            vec![entry(can, 1)],
            vec![entry(shredded_aluminum, 1)],
            None,
        );
        let press_bale = b.register_recipe(
            "press_bale",
            baler,
            vec![entry(can, 2), entry(paper, 1)],
            vec![entry(aluminum_bale, 1)],
            Some(secs(3.0)),
        );

        let household = b.register_crate("household", 10, vec![entry(can, 2)]);
        let metal_scrap = b.register_crate("metal_scrap", 15, vec![entry(can, 1), entry(bottle, 2)]);

        let registry = Arc::new(b.build().expect("fixture registry is valid"));
        Self {
            registry,
            can,
            shredded_aluminum,
            paper,
            bottle,
            aluminum_bale,
            conveyor,
            spawner,
            shredder,
            baler,
            sorter,
            seller,
            shred_can,
            press_bale,
            household,
            metal_scrap,
        }
    }

    /// An engine over this registry with the default config.
    pub fn engine(&self, width: u32, height: u32) -> Engine {
        self.engine_with(width, height, EngineConfig::default())
    }

    pub fn engine_with(&self, width: u32, height: u32, config: EngineConfig) -> Engine {
        Engine::new(self.registry.clone(), config, width, height)
            .expect("fixture grid dimensions are valid")
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Harness
// ===========================================================================

/// The pieces of an engine without the tick loop, for driving one machine
/// or one pass by hand. Time only moves when a test sets `now`.
pub struct Harness {
    pub grid: GridStore,
    pub wallet: Wallet,
    pub supply: WasteSupplyQueue,
    pub rng: SimRng,
    pub events: EventBus,
    pub now: Seconds,
    pub tick: Ticks,
    resolver: RecipeResolver,
    timing: Timing,
}

impl Harness {
    pub fn new(fx: &Fixture, width: u32, height: u32) -> Self {
        let config = EngineConfig::default();
        Self {
            grid: GridStore::new(width, height).expect("harness grid dimensions are valid"),
            wallet: Wallet::new(config.starting_credits),
            supply: WasteSupplyQueue::new(config.waste_queue_limit),
            rng: SimRng::new(config.rng_seed),
            events: EventBus::default(),
            now: Fixed64::ZERO,
            tick: 0,
            resolver: RecipeResolver::new(fx.registry.clone()),
            timing: config.timing(),
        }
    }

    pub fn ctx(&mut self) -> MachineContext<'_> {
        MachineContext {
            grid: &mut self.grid,
            recipes: &self.resolver,
            supply: &mut self.supply,
            wallet: &mut self.wallet,
            rng: &mut self.rng,
            events: &mut self.events,
            timing: &self.timing,
            now: self.now,
            tick: self.tick,
        }
    }

    /// Mark a cell as holding `machine_type`, ignoring roles and cost.
    /// Returns the cell index for a caller-owned machine table.
    pub fn place(&mut self, machine_type: MachineTypeId, x: i32, y: i32, direction: Direction) -> usize {
        let pos = GridPosition::new(x, y);
        self.grid.set_machine(pos, Some(machine_type), direction);
        self.grid.index_of(pos).expect("harness placement is on the grid")
    }

    pub fn spawn(&mut self, item_type: ItemTypeId, x: i32, y: i32) -> ItemId {
        self.ctx()
            .spawn(GridPosition::new(x, y), item_type)
            .expect("harness spawn is on the grid")
    }
}
