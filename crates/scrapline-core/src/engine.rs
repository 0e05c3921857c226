//! The simulation engine: owns the grid and orchestrates each tick.
//!
//! # Architecture
//!
//! The `Engine` owns:
//! - A [`GridStore`] (cells plus the arena of live items)
//! - A machine table parallel to the cells (`None` for blank cells)
//! - The [`RecipeResolver`] over a shared, frozen [`Registry`]
//! - The [`WasteSupplyQueue`] and the player's [`Wallet`]
//! - A [`SimState`] (tick counter, clock) and a deterministic [`SimRng`]
//! - An [`EventBus`] for typed simulation events
//!
//! # Tick Pipeline
//!
//! Each `step(dt)` runs:
//! 1. **Clock** -- advance the simulated clock by `dt`
//! 2. **Machines** -- every cell's heartbeat in row-major order; blank cells
//!    run the blank-cell timeout
//! 3. **Movement** -- advance every moving item; arrivals fire synchronously
//! 4. **Post-tick** -- deliver buffered events to subscribers
//! 5. **Bookkeeping** -- increment the tick counter, compute the state hash
//!
//! Machines decide on the previous tick's movement results; movement never
//! runs ahead of a release made in the same tick.

use crate::config::{EngineConfig, Timing};
use crate::error::{PlacementIssue, SimError};
use crate::event::{DestroyReason, Event, EventBus, EventKind, PassiveListener};
use crate::fixed::{Fixed64, Seconds, Ticks};
use crate::grid::{Direction, GridPosition, GridStore, InvariantViolation};
use crate::id::{CrateId, ItemId, ItemTypeId, MachineTypeId, RecipeId};
use crate::item::{Item, ItemState};
use crate::machine::{BlankCell, Machine, MachineConfig, MachineContext, SortingRule};
use crate::movement;
use crate::recipe::RecipeResolver;
use crate::registry::{MachineKind, Registry};
use crate::rng::SimRng;
use crate::sim::{SimState, StateHash};
use crate::supply::{WasteSupplyQueue, Wallet};
use std::sync::Arc;
use tracing::{error, info};

/// The core simulation engine.
#[derive(Debug)]
pub struct Engine {
    pub(crate) recipes: RecipeResolver,
    pub(crate) config: EngineConfig,
    pub(crate) timing: Timing,
    pub(crate) grid: GridStore,
    /// Machine behaviour per cell, indexed like `grid.cells()`.
    pub(crate) machines: Vec<Option<Machine>>,
    pub(crate) supply: WasteSupplyQueue,
    pub(crate) wallet: Wallet,
    pub(crate) rng: SimRng,
    pub sim_state: SimState,
    pub(crate) paused: bool,
    pub(crate) last_state_hash: u64,
    pub event_bus: EventBus,
}

impl Engine {
    /// Create an engine with a blank `width` x `height` grid. Fails with
    /// `InvalidDimensions` for an empty or oversized grid.
    pub fn new(
        registry: Arc<Registry>,
        config: EngineConfig,
        width: u32,
        height: u32,
    ) -> Result<Self, SimError> {
        let grid = GridStore::new(width, height)?;
        let machines = vec![None; grid.cell_count()];
        Ok(Self::from_parts(
            registry,
            config.clone(),
            grid,
            machines,
            WasteSupplyQueue::new(config.waste_queue_limit),
            Wallet::new(config.starting_credits),
            SimRng::new(config.rng_seed),
            SimState::new(),
        ))
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        registry: Arc<Registry>,
        config: EngineConfig,
        grid: GridStore,
        machines: Vec<Option<Machine>>,
        supply: WasteSupplyQueue,
        wallet: Wallet,
        rng: SimRng,
        sim_state: SimState,
    ) -> Self {
        let mut engine = Self {
            recipes: RecipeResolver::new(registry),
            timing: config.timing(),
            event_bus: EventBus::new(config.event_capacity),
            config,
            grid,
            machines,
            supply,
            wallet,
            rng,
            sim_state,
            paused: false,
            last_state_hash: 0,
        };
        engine.last_state_hash = engine.compute_state_hash();
        engine
    }

    /// Split the machine table from everything machines may touch.
    fn parts(&mut self) -> (&mut [Option<Machine>], MachineContext<'_>) {
        let Self {
            recipes,
            timing,
            grid,
            machines,
            supply,
            wallet,
            rng,
            sim_state,
            event_bus,
            ..
        } = self;
        let ctx = MachineContext {
            grid,
            recipes,
            supply,
            wallet,
            rng,
            events: event_bus,
            timing,
            now: sim_state.clock,
            tick: sim_state.tick,
        };
        (machines.as_mut_slice(), ctx)
    }

    // -----------------------------------------------------------------------
    // Tick pipeline
    // -----------------------------------------------------------------------

    /// Run one tick of `dt` seconds. No-op while paused.
    pub fn step(&mut self, dt: Seconds) {
        if self.paused {
            return;
        }
        self.sim_state.advance_clock(dt);
        let dt = dt.max(Fixed64::ZERO);
        self.phase_machines();
        self.phase_movement(dt);
        self.event_bus.deliver();
        self.phase_bookkeeping();
    }

    /// Run `steps` ticks of `dt` seconds each.
    pub fn run(&mut self, steps: u64, dt: Seconds) {
        for _ in 0..steps {
            self.step(dt);
        }
    }

    fn phase_machines(&mut self) {
        let (machines, mut ctx) = self.parts();
        for index in 0..machines.len() {
            let Some(pos) = ctx.grid.cell_at(index).map(|c| c.position) else {
                continue;
            };
            match machines[index].as_mut() {
                Some(machine) => machine.update_logic(pos, &mut ctx),
                None => BlankCell.update_logic(pos, &mut ctx),
            }
        }
    }

    fn phase_movement(&mut self, dt: Seconds) {
        let (machines, mut ctx) = self.parts();
        movement::advance(machines, &mut ctx, dt);
    }

    fn phase_bookkeeping(&mut self) {
        self.sim_state.tick += 1;
        self.last_state_hash = self.compute_state_hash();
    }

    fn compute_state_hash(&self) -> u64 {
        let mut h = StateHash::new();
        h.write_u64(self.sim_state.tick);
        h.write_fixed64(self.sim_state.clock);
        h.write_u64(self.wallet.balance());
        h.write_u64(self.rng.state());
        for crate_id in self.supply.iter() {
            h.write_u32(crate_id.0);
        }
        for cell in self.grid.cells() {
            h.write_u32(cell.machine_type.map_or(u32::MAX, |m| m.0));
            h.write_u32(cell.direction as u32);
            for &id in cell.items().iter().chain(cell.waiting()) {
                if let Some(item) = self.grid.item(id) {
                    h.write_u32(item.item_type.0);
                    h.write_u32(item.state as u32);
                    h.write_fixed64(item.progress);
                    h.write_i32(item.target.x);
                    h.write_i32(item.target.y);
                }
            }
        }
        h.finish()
    }

    // -----------------------------------------------------------------------
    // Placement
    // -----------------------------------------------------------------------

    /// Place a machine on a blank cell and pay for it. Rejections change
    /// nothing. Machines that cannot rotate always face Up.
    pub fn place_machine(
        &mut self,
        pos: GridPosition,
        machine_type: MachineTypeId,
        direction: Direction,
    ) -> Result<(), SimError> {
        let registry = self.recipes.registry().clone();
        let Some(def) = registry.get_machine(machine_type) else {
            error!(target: "scrapline::grid", ?machine_type, "placement of undefined machine");
            return Err(SimError::MissingMachineDefinition(machine_type));
        };
        let reject = |reason| {
            info!(target: "scrapline::grid", at = %pos, machine = %def.name, %reason, "placement rejected");
            SimError::InvalidPlacement {
                at: pos,
                machine: machine_type,
                reason,
            }
        };
        let (index, cell) = match self.grid.index_of(pos).zip(self.grid.cell(pos)) {
            Some(found) => found,
            None => return Err(reject(PlacementIssue::OutOfBounds)),
        };
        if !def.allows(cell.role) {
            return Err(reject(PlacementIssue::RoleNotAllowed));
        }
        if !cell.is_blank() {
            return Err(reject(PlacementIssue::Occupied));
        }
        self.wallet.spend(def.cost)?;

        let facing = if def.can_rotate { direction } else { Direction::Up };
        self.grid.set_machine(pos, Some(machine_type), facing);
        self.machines[index] = Some(Machine::new(def.kind));
        self.emit(Event::CellChanged {
            at: pos,
            tick: self.sim_state.tick,
        });
        info!(target: "scrapline::grid", at = %pos, machine = %def.name, ?facing, cost = def.cost, "machine placed");
        Ok(())
    }

    /// Turn a placed machine to face `direction`.
    pub fn rotate_machine(&mut self, pos: GridPosition, direction: Direction) -> Result<(), SimError> {
        let cell = self.grid.cell(pos).ok_or(SimError::NoSuchCell(pos))?;
        let machine_type = cell.machine_type.ok_or(SimError::NotConfigurable(pos))?;
        let def = self
            .recipes
            .registry()
            .get_machine(machine_type)
            .ok_or(SimError::MissingMachineDefinition(machine_type))?;
        if !def.can_rotate {
            return Err(SimError::NotConfigurable(pos));
        }
        self.grid.set_machine(pos, Some(machine_type), direction);
        self.emit(Event::CellChanged {
            at: pos,
            tick: self.sim_state.tick,
        });
        Ok(())
    }

    /// Take the machine off a cell. Resting items stay and fall under the
    /// blank-cell timeout; items queued at the machine are destroyed; an
    /// unopened spawner crate goes back to the supply queue.
    pub fn remove_machine(&mut self, pos: GridPosition) -> Result<(), SimError> {
        let index = self.grid.index_of(pos).ok_or(SimError::NoSuchCell(pos))?;
        let Some(mut machine) = self.machines[index].take() else {
            return Err(SimError::NotConfigurable(pos));
        };
        let (_, mut ctx) = self.parts();
        machine.on_removed(pos, &mut ctx);
        for id in ctx.grid.cell(pos).map(|c| c.waiting().to_vec()).unwrap_or_default() {
            ctx.destroy(id, DestroyReason::MachineRemoved);
        }
        self.grid.set_machine(pos, None, Direction::Up);
        self.emit(Event::CellChanged {
            at: pos,
            tick: self.sim_state.tick,
        });
        info!(target: "scrapline::grid", at = %pos, kind = ?machine.kind(), "machine removed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    /// Apply a configuration to the machine at `pos`.
    pub fn configure(&mut self, pos: GridPosition, config: MachineConfig) -> Result<(), SimError> {
        let index = self.grid.index_of(pos).ok_or(SimError::NoSuchCell(pos))?;
        let (machines, mut ctx) = self.parts();
        let machine = machines[index]
            .as_mut()
            .ok_or(SimError::NotConfigurable(pos))?;
        machine.on_configured(pos, config, &mut ctx)?;
        ctx.emit(Event::CellChanged {
            at: pos,
            tick: ctx.tick,
        });
        Ok(())
    }

    pub fn configure_sorter(
        &mut self,
        pos: GridPosition,
        left: Option<ItemTypeId>,
        right: Option<ItemTypeId>,
    ) -> Result<(), SimError> {
        self.configure(pos, MachineConfig::Sorting(SortingRule { left, right }))
    }

    pub fn select_fabricator_recipe(&mut self, pos: GridPosition, recipe: RecipeId) -> Result<(), SimError> {
        self.configure(pos, MachineConfig::Recipe(recipe))
    }

    /// Set the crate type a spawner refills with.
    pub fn configure_spawner(&mut self, pos: GridPosition, crate_id: CrateId) -> Result<(), SimError> {
        self.configure(pos, MachineConfig::Crate(crate_id))
    }

    /// Load a fresh crate straight into a spawner, bypassing the queue.
    pub fn load_spawner(&mut self, pos: GridPosition, crate_id: CrateId) -> Result<(), SimError> {
        let index = self.grid.index_of(pos).ok_or(SimError::NoSuchCell(pos))?;
        let (machines, mut ctx) = self.parts();
        let spawner = machines[index]
            .as_mut()
            .and_then(Machine::as_spawner_mut)
            .ok_or(SimError::NotConfigurable(pos))?;
        spawner.load(pos, crate_id, &mut ctx)
    }

    // -----------------------------------------------------------------------
    // Economy
    // -----------------------------------------------------------------------

    /// Buy a crate into the global queue, then let empty spawners waiting
    /// for that crate type take it.
    pub fn purchase_crate(&mut self, crate_id: CrateId) -> Result<(), SimError> {
        let registry = self.recipes.registry().clone();
        let cost = self.supply.purchase(crate_id, &registry, &mut self.wallet)?;
        self.emit(Event::CratePurchased {
            crate_id,
            cost,
            tick: self.sim_state.tick,
        });
        self.notify_spawners(crate_id);
        Ok(())
    }

    /// Put a crate back into the queue if there is room.
    pub fn return_to_queue(&mut self, crate_id: CrateId) -> Result<(), SimError> {
        self.supply.return_to_queue(crate_id)?;
        self.notify_spawners(crate_id);
        Ok(())
    }

    /// Offer queued crates of `crate_id` to empty spawners, row-major.
    fn notify_spawners(&mut self, crate_id: CrateId) {
        let (machines, mut ctx) = self.parts();
        for (index, slot) in machines.iter_mut().enumerate() {
            let Some(spawner) = slot.as_mut().and_then(Machine::as_spawner_mut) else {
                continue;
            };
            if spawner.required != Some(crate_id) || !spawner.is_empty() {
                continue;
            }
            let Some(pos) = ctx.grid.cell_at(index).map(|c| c.position) else {
                continue;
            };
            if !spawner.refill(pos, &mut ctx) {
                break;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Items
    // -----------------------------------------------------------------------

    /// Create an Idle item resting on `pos`. The cell's machine picks it up
    /// on its next heartbeat.
    pub fn spawn_item(&mut self, pos: GridPosition, item_type: ItemTypeId) -> Result<ItemId, SimError> {
        if self.recipes.registry().get_item(item_type).is_none() {
            error!(target: "scrapline::grid", ?item_type, "spawn of undefined item type");
        }
        let (_, mut ctx) = self.parts();
        ctx.spawn(pos, item_type).ok_or(SimError::NoSuchCell(pos))
    }

    /// Create an item on `pos` and hand it directly to the cell's machine.
    /// Processing machines enqueue it as if it had reached their midpoint.
    pub fn inject_item(&mut self, pos: GridPosition, item_type: ItemTypeId) -> Result<ItemId, SimError> {
        let id = self.spawn_item(pos, item_type)?;
        let Some(index) = self.grid.index_of(pos) else {
            return Err(SimError::NoSuchCell(pos));
        };
        let (machines, mut ctx) = self.parts();
        if let Some(machine) = machines[index].as_mut() {
            machine.process_item(pos, id, &mut ctx)?;
        }
        Ok(id)
    }

    /// Destroy every item on the grid. Returns how many were removed.
    pub fn clear_items(&mut self) -> usize {
        let ids: Vec<ItemId> = self.grid.items().map(|(id, _)| id).collect();
        let (_, mut ctx) = self.parts();
        ids.into_iter()
            .filter(|&id| ctx.destroy(id, DestroyReason::Cleared))
            .count()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn registry(&self) -> &Arc<Registry> {
        self.recipes.registry()
    }

    pub fn recipes(&self) -> &RecipeResolver {
        &self.recipes
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn grid(&self) -> &GridStore {
        &self.grid
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub fn supply(&self) -> &WasteSupplyQueue {
        &self.supply
    }

    pub fn machine(&self, pos: GridPosition) -> Option<&Machine> {
        let index = self.grid.index_of(pos)?;
        self.machines[index].as_ref()
    }

    pub fn machine_kind(&self, pos: GridPosition) -> Option<MachineKind> {
        self.machine(pos).map(Machine::kind)
    }

    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.grid.item(id)
    }

    pub fn item_count(&self) -> usize {
        self.grid.item_count()
    }

    /// Items resting on or leaving `pos`.
    pub fn items_at(&self, pos: GridPosition) -> &[ItemId] {
        self.grid.cell(pos).map(|c| c.items()).unwrap_or(&[])
    }

    /// The waiting queue of the machine at `pos`, in stack order.
    pub fn waiting_at(&self, pos: GridPosition) -> &[ItemId] {
        self.grid.cell(pos).map(|c| c.waiting()).unwrap_or(&[])
    }

    /// Number of items in `state`.
    pub fn count_in_state(&self, state: ItemState) -> usize {
        self.grid.items().filter(|(_, i)| i.state == state).count()
    }

    pub fn clock(&self) -> Seconds {
        self.sim_state.clock
    }

    pub fn tick(&self) -> Ticks {
        self.sim_state.tick
    }

    /// Get the most recently computed state hash.
    pub fn state_hash(&self) -> u64 {
        self.last_state_hash
    }

    /// Check the grid membership invariants.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        self.grid.validate()
    }

    // -----------------------------------------------------------------------
    // Control & events
    // -----------------------------------------------------------------------

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn suppress_event(&mut self, kind: EventKind) {
        self.event_bus.suppress(kind);
    }

    pub fn on_passive(&mut self, kind: EventKind, listener: PassiveListener) {
        self.event_bus.on_passive(kind, listener);
    }

    fn emit(&mut self, event: Event) {
        self.event_bus.emit(event);
    }
}
