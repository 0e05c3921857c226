//! Machine behaviours and the context they run against.
//!
//! Every placed machine is one [`Machine`] variant stored in the engine's
//! machine table, parallel to the grid's cells. Blank cells have no entry;
//! their heartbeat is [`BlankCell`]. All variants receive their
//! collaborators through a [`MachineContext`] built fresh for each pass.
//!
//! | Variant      | Heartbeat                               | On arrival             |
//! |--------------|-----------------------------------------|------------------------|
//! | Conveyor     | restart idle residents along facing     | forward immediately    |
//! | Sorter       | as Conveyor, routed by [`SortingRule`]  | forward by rule        |
//! | Seller       | sell idle residents                     | sell                   |
//! | Spawner      | spawn from the loaded crate             | warn, leave idle       |
//! | Processor    | pull queue, match recipe by input       | start processing       |
//! | Fabricator   | pull queue, selected recipe, batches    | collect batch          |

use crate::config::Timing;
use crate::error::SimError;
use crate::event::{DestroyReason, Event, EventBus};
use crate::fixed::{Seconds, Ticks, elapsed};
use crate::grid::{Direction, GridPosition, GridStore};
use crate::id::{CrateId, ItemId, ItemTypeId, MachineTypeId, RecipeId};
use crate::processor::{Fabricator, Processor};
use crate::recipe::RecipeResolver;
use crate::registry::{MachineDef, MachineKind};
use crate::rng::SimRng;
use crate::spawner::Spawner;
use crate::supply::{WasteSupplyQueue, Wallet};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Everything a machine may touch while it runs. Built by the engine from
/// disjoint borrows of its own fields.
pub struct MachineContext<'a> {
    pub grid: &'a mut GridStore,
    pub recipes: &'a RecipeResolver,
    pub supply: &'a mut WasteSupplyQueue,
    pub wallet: &'a mut Wallet,
    pub rng: &'a mut SimRng,
    pub events: &'a mut EventBus,
    pub timing: &'a Timing,
    pub now: Seconds,
    pub tick: Ticks,
}

impl MachineContext<'_> {
    /// Facing of the cell at `pos`. Off-grid positions face Up.
    pub fn facing(&self, pos: GridPosition) -> Direction {
        self.grid
            .cell(pos)
            .map(|c| c.direction)
            .unwrap_or_default()
    }

    pub fn machine_type(&self, pos: GridPosition) -> Option<MachineTypeId> {
        self.grid.cell(pos).and_then(|c| c.machine_type)
    }

    pub fn machine_def(&self, pos: GridPosition) -> Option<&MachineDef> {
        self.machine_type(pos).and_then(|m| self.recipes.machine(m))
    }

    pub fn machine_kind(&self, pos: GridPosition) -> Option<MachineKind> {
        self.machine_def(pos).map(|d| d.kind)
    }

    pub fn emit(&mut self, event: Event) {
        self.events.emit(event);
    }

    /// Create an item resting on `pos` and announce it.
    pub fn spawn(&mut self, pos: GridPosition, item_type: ItemTypeId) -> Option<ItemId> {
        let id = self.grid.spawn_item(pos, item_type, self.now)?;
        self.events.emit(Event::ItemCreated {
            item: id,
            item_type,
            at: pos,
            tick: self.tick,
        });
        Some(id)
    }

    /// Destroy an item wherever it is listed and announce it.
    pub fn destroy(&mut self, id: ItemId, reason: DestroyReason) -> bool {
        let Some(holder) = self.grid.item(id).map(|i| i.holder()) else {
            return false;
        };
        if self.grid.destroy_item(id).is_none() {
            return false;
        }
        self.events.emit(Event::ItemDestroyed {
            item: id,
            at: holder.cell,
            reason,
            tick: self.tick,
        });
        true
    }

    /// Ids of Idle items resting on `pos`, in arrival order.
    pub fn idle_residents(&self, pos: GridPosition) -> Vec<ItemId> {
        let Some(cell) = self.grid.cell(pos) else {
            return Vec::new();
        };
        cell.items()
            .iter()
            .copied()
            .filter(|&id| self.grid.item(id).is_some_and(|i| i.is_idle()))
            .collect()
    }
}

/// Start moving an Idle item from `from` towards its neighbour in
/// `direction`. The target must be on the grid and must not be a Spawner;
/// otherwise the item stays Idle and a later heartbeat retries.
pub fn try_start_move(
    ctx: &mut MachineContext<'_>,
    item: ItemId,
    from: GridPosition,
    direction: Direction,
) -> bool {
    let target = from.step(direction);
    if !ctx.grid.in_bounds(target) {
        return false;
    }
    if ctx.machine_kind(target) == Some(MachineKind::Spawner) {
        return false;
    }
    let now = ctx.now;
    let Some(it) = ctx.grid.item_mut(item) else {
        return false;
    };
    let started = it.begin_move(from, direction, now);
    if started {
        let progress = it.progress;
        ctx.events.emit(Event::ItemMoved {
            item,
            source: from,
            target,
            progress,
            tick: ctx.tick,
        });
    }
    started
}

/// Restart every Idle resident of `pos`, choosing each direction with
/// `route`.
pub(crate) fn restart_idle(
    ctx: &mut MachineContext<'_>,
    pos: GridPosition,
    route: impl Fn(ItemTypeId) -> Direction,
) {
    for id in ctx.idle_residents(pos) {
        let Some(item_type) = ctx.grid.item(id).map(|i| i.item_type) else {
            continue;
        };
        try_start_move(ctx, id, pos, route(item_type));
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Item-type routing for a Sorter. Unmatched types go straight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortingRule {
    /// Exits to the facing rotated counter-clockwise.
    pub left: Option<ItemTypeId>,
    /// Exits to the facing rotated clockwise.
    pub right: Option<ItemTypeId>,
}

impl SortingRule {
    pub fn route(&self, item_type: ItemTypeId, facing: Direction) -> Direction {
        if self.left == Some(item_type) {
            facing.rotate_ccw()
        } else if self.right == Some(item_type) {
            facing.rotate_cw()
        } else {
            facing
        }
    }
}

/// A player configuration applied through [`Machine::on_configured`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineConfig {
    Sorting(SortingRule),
    Recipe(RecipeId),
    Crate(CrateId),
}

// ---------------------------------------------------------------------------
// Simple variants
// ---------------------------------------------------------------------------

/// Heartbeat of a cell without a machine: holds items and evicts the ones
/// left idle too long.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlankCell;

impl BlankCell {
    pub fn update_logic(&self, pos: GridPosition, ctx: &mut MachineContext<'_>) {
        let timeout = ctx.timing.blank_item_timeout;
        for id in ctx.idle_residents(pos) {
            let Some(idle_since) = ctx.grid.item(id).map(|i| i.idle_since) else {
                continue;
            };
            if elapsed(ctx.now, idle_since) > timeout {
                debug!(target: "scrapline::machine", at = %pos, ?id, "blank cell evicted idle item");
                ctx.destroy(id, DestroyReason::BlankTimeout);
            }
        }
    }

    pub fn on_item_arrived(&self, _pos: GridPosition, _id: ItemId, _ctx: &mut MachineContext<'_>) {}
}

/// Moves items one cell along its facing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conveyor;

impl Conveyor {
    fn update_logic(&mut self, pos: GridPosition, ctx: &mut MachineContext<'_>) {
        let facing = ctx.facing(pos);
        restart_idle(ctx, pos, |_| facing);
    }

    fn on_item_arrived(&mut self, pos: GridPosition, id: ItemId, ctx: &mut MachineContext<'_>) {
        let facing = ctx.facing(pos);
        try_start_move(ctx, id, pos, facing);
    }
}

/// A conveyor that routes two configured item types sideways.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sorter {
    pub rule: SortingRule,
}

impl Sorter {
    fn update_logic(&mut self, pos: GridPosition, ctx: &mut MachineContext<'_>) {
        let facing = ctx.facing(pos);
        let rule = self.rule;
        restart_idle(ctx, pos, |t| rule.route(t, facing));
    }

    fn on_item_arrived(&mut self, pos: GridPosition, id: ItemId, ctx: &mut MachineContext<'_>) {
        let Some(item_type) = ctx.grid.item(id).map(|i| i.item_type) else {
            return;
        };
        let direction = self.rule.route(item_type, ctx.facing(pos));
        try_start_move(ctx, id, pos, direction);
    }
}

/// Terminal machine: turns arriving items into credits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seller;

impl Seller {
    fn update_logic(&mut self, pos: GridPosition, ctx: &mut MachineContext<'_>) {
        for id in ctx.idle_residents(pos) {
            self.sell(id, ctx);
        }
    }

    fn sell(&mut self, id: ItemId, ctx: &mut MachineContext<'_>) {
        let Some(item_type) = ctx.grid.item(id).map(|i| i.item_type) else {
            return;
        };
        let value = ctx
            .recipes
            .registry()
            .get_item(item_type)
            .map(|d| d.sell_value)
            .unwrap_or(0);
        if !ctx.destroy(id, DestroyReason::Sold) {
            return;
        }
        ctx.wallet.earn(value);
        ctx.emit(Event::ItemSold {
            item_type,
            value,
            tick: ctx.tick,
        });
        debug!(target: "scrapline::economy", ?item_type, value, balance = ctx.wallet.balance(), "item sold");
    }
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

/// A placed machine with its runtime state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Machine {
    Conveyor(Conveyor),
    Spawner(Spawner),
    Processor(Processor),
    Fabricator(Fabricator),
    Sorter(Sorter),
    Seller(Seller),
}

impl Machine {
    /// A fresh machine for a definition kind.
    pub fn new(kind: MachineKind) -> Self {
        match kind {
            MachineKind::Conveyor => Machine::Conveyor(Conveyor),
            MachineKind::Spawner => Machine::Spawner(Spawner::default()),
            MachineKind::Processor => Machine::Processor(Processor::default()),
            MachineKind::Fabricator => Machine::Fabricator(Fabricator::default()),
            MachineKind::Sorter => Machine::Sorter(Sorter::default()),
            MachineKind::Seller => Machine::Seller(Seller),
        }
    }

    pub fn kind(&self) -> MachineKind {
        match self {
            Machine::Conveyor(_) => MachineKind::Conveyor,
            Machine::Spawner(_) => MachineKind::Spawner,
            Machine::Processor(_) => MachineKind::Processor,
            Machine::Fabricator(_) => MachineKind::Fabricator,
            Machine::Sorter(_) => MachineKind::Sorter,
            Machine::Seller(_) => MachineKind::Seller,
        }
    }

    /// Heartbeat, once per tick before the movement pass.
    pub fn update_logic(&mut self, pos: GridPosition, ctx: &mut MachineContext<'_>) {
        match self {
            Machine::Conveyor(m) => m.update_logic(pos, ctx),
            Machine::Spawner(m) => m.update_logic(pos, ctx),
            Machine::Processor(m) => m.update_logic(pos, ctx),
            Machine::Fabricator(m) => m.update_logic(pos, ctx),
            Machine::Sorter(m) => m.update_logic(pos, ctx),
            Machine::Seller(m) => m.update_logic(pos, ctx),
        }
    }

    /// Called by the movement pass once `id` rests on this cell.
    pub fn on_item_arrived(&mut self, pos: GridPosition, id: ItemId, ctx: &mut MachineContext<'_>) {
        match self {
            Machine::Conveyor(m) => m.on_item_arrived(pos, id, ctx),
            Machine::Spawner(m) => m.on_item_arrived(pos, id, ctx),
            Machine::Processor(m) => m.on_item_arrived(pos, id, ctx),
            Machine::Fabricator(m) => m.on_item_arrived(pos, id, ctx),
            Machine::Sorter(m) => m.on_item_arrived(pos, id, ctx),
            Machine::Seller(m) => m.sell(id, ctx),
        }
    }

    /// Hand an item resting on this cell straight to the machine. Processing
    /// machines enqueue it; the others treat it as an arrival.
    pub fn process_item(
        &mut self,
        pos: GridPosition,
        id: ItemId,
        ctx: &mut MachineContext<'_>,
    ) -> Result<(), SimError> {
        match self {
            Machine::Processor(_) | Machine::Fabricator(_) => {
                crate::queue::enqueue(ctx, pos, id).map(|_| ())
            }
            other => {
                other.on_item_arrived(pos, id, ctx);
                Ok(())
            }
        }
    }

    /// Apply a player configuration. Fails with `NotConfigurable` when the
    /// variant does not take that kind of setting.
    pub fn on_configured(
        &mut self,
        pos: GridPosition,
        config: MachineConfig,
        ctx: &mut MachineContext<'_>,
    ) -> Result<(), SimError> {
        match (self, config) {
            (Machine::Sorter(m), MachineConfig::Sorting(rule)) => {
                m.rule = rule;
                debug!(target: "scrapline::machine", at = %pos, ?rule, "sorter configured");
                Ok(())
            }
            (Machine::Fabricator(m), MachineConfig::Recipe(recipe)) => m.select_recipe(pos, recipe, ctx),
            (Machine::Spawner(m), MachineConfig::Crate(crate_id)) => m.configure(pos, crate_id, ctx),
            (machine, config) => {
                warn!(target: "scrapline::machine", at = %pos, kind = ?machine.kind(), ?config, "configuration rejected");
                Err(SimError::NotConfigurable(pos))
            }
        }
    }

    /// Called before the machine is taken off its cell.
    pub fn on_removed(&mut self, pos: GridPosition, ctx: &mut MachineContext<'_>) {
        match self {
            Machine::Spawner(m) => m.on_removed(pos, ctx),
            Machine::Processor(m) => m.on_removed(ctx),
            Machine::Fabricator(m) => m.on_removed(ctx),
            _ => {}
        }
    }

    pub fn as_spawner(&self) -> Option<&Spawner> {
        match self {
            Machine::Spawner(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_spawner_mut(&mut self) -> Option<&mut Spawner> {
        match self {
            Machine::Spawner(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_processor(&self) -> Option<&Processor> {
        match self {
            Machine::Processor(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_fabricator(&self) -> Option<&Fabricator> {
        match self {
            Machine::Fabricator(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_sorter(&self) -> Option<&Sorter> {
        match self {
            Machine::Sorter(s) => Some(s),
            _ => None,
        }
    }
}
