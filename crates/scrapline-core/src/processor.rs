//! Processing machines: [`Processor`] and [`Fabricator`].
//!
//! Both pull from the waiting queue of their own cell (see [`crate::queue`]).
//! A Processor handles one item at a time and finds its recipe from that
//! item's type. A Fabricator works on a player-selected recipe and only
//! pulls once its queue holds a complete batch of inputs.

use crate::error::SimError;
use crate::event::{DestroyReason, Event};
use crate::fixed::{Seconds, elapsed};
use crate::grid::GridPosition;
use crate::id::{ItemId, RecipeId};
use crate::item::ItemState;
use crate::machine::{MachineContext, try_start_move};
use crate::queue;
use crate::registry::RecipeEntry;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Shared completion
// ---------------------------------------------------------------------------

/// Create every output of a recipe on `pos` and send each one out along
/// the machine's facing. Outputs that cannot leave yet are recorded in
/// `outbound`.
fn emit_outputs(
    ctx: &mut MachineContext<'_>,
    pos: GridPosition,
    outputs: &[RecipeEntry],
    outbound: &mut Vec<ItemId>,
) -> u32 {
    let facing = ctx.facing(pos);
    let mut created = 0;
    for entry in outputs {
        for _ in 0..entry.quantity {
            if let Some(id) = ctx.spawn(pos, entry.item) {
                if !try_start_move(ctx, id, pos, facing) {
                    outbound.push(id);
                }
                created += 1;
            }
        }
    }
    created
}

/// Heartbeat for Idle residents of a processing cell. Recorded outputs are
/// retried along the facing. Anything else resting here has not been
/// processed (a stray arrival, an abandoned batch member, a spawned item)
/// and goes back into the cell's own queue, where it is either pulled or
/// evicted on timeout.
fn settle_residents(ctx: &mut MachineContext<'_>, pos: GridPosition, outbound: &mut Vec<ItemId>) {
    let idle = ctx.idle_residents(pos);
    outbound.retain(|id| idle.contains(id));
    let facing = ctx.facing(pos);
    for id in idle {
        if outbound.contains(&id) {
            if try_start_move(ctx, id, pos, facing) {
                outbound.retain(|&o| o != id);
            }
        } else if let Err(e) = queue::enqueue(ctx, pos, id) {
            warn!(target: "scrapline::machine", at = %pos, ?id, error = %e, "could not requeue unprocessed item");
        } else {
            debug!(target: "scrapline::machine", at = %pos, ?id, "unprocessed item returned to queue");
        }
    }
}

fn recipe_duration(ctx: &MachineContext<'_>, pos: GridPosition, recipe: RecipeId) -> Option<Seconds> {
    let def = ctx.recipes.resolve_by_id(recipe)?;
    let machine = ctx.machine_def(pos)?;
    Some(def.duration(machine))
}

/// Put held items back on the cell as ordinary Idle residents.
fn drop_held(ctx: &mut MachineContext<'_>, items: &[ItemId]) {
    let now = ctx.now;
    for &id in items {
        if let Some(item) = ctx.grid.item_mut(id)
            && item.state == ItemState::Processing
        {
            item.state = ItemState::Idle;
            item.idle_since = now;
        }
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Runtime state of a [`Processor`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum ProcessorState {
    #[default]
    Idle,
    /// Released `item` and waiting for it to arrive.
    Receiving { item: ItemId, recipe: RecipeId },
    Processing {
        item: ItemId,
        recipe: RecipeId,
        started_at: Seconds,
        duration: Seconds,
    },
}

/// Single-input machine that resolves its recipe from the pulled item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Processor {
    pub state: ProcessorState,
    /// Head item already reported as having no recipe.
    blocked_on: Option<ItemId>,
    /// Outputs created here that have not left yet.
    outbound: Vec<ItemId>,
}

impl Processor {
    pub fn is_idle(&self) -> bool {
        self.state == ProcessorState::Idle
    }

    pub(crate) fn update_logic(&mut self, pos: GridPosition, ctx: &mut MachineContext<'_>) {
        queue::evict_expired(ctx, pos);

        match self.state.clone() {
            ProcessorState::Idle => self.try_pull(pos, ctx),
            ProcessorState::Receiving { item, .. } => {
                if ctx.grid.item(item).is_none() {
                    warn!(target: "scrapline::machine", at = %pos, ?item, "pulled item vanished before arriving");
                    self.state = ProcessorState::Idle;
                }
            }
            ProcessorState::Processing {
                item,
                recipe,
                started_at,
                duration,
            } => {
                if ctx.grid.item(item).is_none() {
                    warn!(target: "scrapline::machine", at = %pos, ?item, "input vanished during processing");
                    self.state = ProcessorState::Idle;
                } else if elapsed(ctx.now, started_at) >= duration {
                    self.complete(pos, item, recipe, ctx);
                }
            }
        }

        settle_residents(ctx, pos, &mut self.outbound);
    }

    fn try_pull(&mut self, pos: GridPosition, ctx: &mut MachineContext<'_>) {
        let Some(head) = queue::pullable_head(ctx, pos) else {
            return;
        };
        let Some(machine) = ctx.machine_type(pos) else {
            return;
        };
        let Some(item_type) = ctx.grid.item(head).map(|i| i.item_type) else {
            return;
        };
        let Some((recipe, _)) = ctx.recipes.resolve(machine, item_type) else {
            if self.blocked_on != Some(head) {
                self.blocked_on = Some(head);
                error!(
                    target: "scrapline::machine",
                    at = %pos,
                    error = %SimError::MissingRecipe { machine, item: item_type },
                    "processing blocked"
                );
            }
            return;
        };
        self.blocked_on = None;
        if queue::release(ctx, head) {
            debug!(target: "scrapline::machine", at = %pos, item = ?head, ?recipe, "pulled head of queue");
            self.state = ProcessorState::Receiving { item: head, recipe };
        }
    }

    pub(crate) fn on_item_arrived(&mut self, pos: GridPosition, id: ItemId, ctx: &mut MachineContext<'_>) {
        let ProcessorState::Receiving { item, recipe } = self.state else {
            warn!(target: "scrapline::machine", at = %pos, ?id, "unexpected arrival at processor");
            return;
        };
        if item != id {
            warn!(target: "scrapline::machine", at = %pos, ?id, expected = ?item, "unexpected arrival at processor");
            return;
        }
        let Some(duration) = recipe_duration(ctx, pos, recipe) else {
            error!(target: "scrapline::machine", at = %pos, ?recipe, "recipe disappeared while receiving");
            self.state = ProcessorState::Idle;
            return;
        };
        let now = ctx.now;
        if let Some(it) = ctx.grid.item_mut(id) {
            it.begin_processing(now, duration);
        }
        self.state = ProcessorState::Processing {
            item: id,
            recipe,
            started_at: now,
            duration,
        };
        ctx.emit(Event::ProcessingStarted {
            machine: pos,
            recipe,
            tick: ctx.tick,
        });
    }

    fn complete(&mut self, pos: GridPosition, input: ItemId, recipe: RecipeId, ctx: &mut MachineContext<'_>) {
        let Some(outputs) = ctx.recipes.resolve_by_id(recipe).map(|r| r.outputs.clone()) else {
            self.state = ProcessorState::Idle;
            return;
        };
        ctx.destroy(input, DestroyReason::Consumed);
        let created = emit_outputs(ctx, pos, &outputs, &mut self.outbound);
        ctx.emit(Event::ProcessingCompleted {
            machine: pos,
            recipe,
            tick: ctx.tick,
        });
        info!(target: "scrapline::machine", at = %pos, ?recipe, created, "processing complete");
        self.state = ProcessorState::Idle;
    }

    pub(crate) fn on_removed(&mut self, ctx: &mut MachineContext<'_>) {
        if let ProcessorState::Processing { item, .. } = self.state {
            drop_held(ctx, &[item]);
        }
        self.state = ProcessorState::Idle;
    }
}

// ---------------------------------------------------------------------------
// Fabricator
// ---------------------------------------------------------------------------

/// Runtime state of a [`Fabricator`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum FabricatorState {
    #[default]
    Idle,
    /// A batch has been released; `pending` are still on their way in.
    Receiving {
        recipe: RecipeId,
        pending: Vec<ItemId>,
        arrived: Vec<ItemId>,
    },
    Processing {
        recipe: RecipeId,
        inputs: Vec<ItemId>,
        started_at: Seconds,
        duration: Seconds,
    },
}

/// Multi-input machine running the recipe the player selected.
///
/// Nothing is pulled until the paused items in the queue cover every input
/// of the selected recipe (type and count). The covering set is released
/// together; processing starts when the last of them arrives. Changing the
/// selection never affects a batch already released.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fabricator {
    pub selected: Option<RecipeId>,
    pub state: FabricatorState,
    /// Outputs created here that have not left yet.
    outbound: Vec<ItemId>,
}

impl Fabricator {
    pub fn is_idle(&self) -> bool {
        self.state == FabricatorState::Idle
    }

    pub(crate) fn select_recipe(
        &mut self,
        pos: GridPosition,
        recipe: RecipeId,
        ctx: &mut MachineContext<'_>,
    ) -> Result<(), SimError> {
        let def = ctx
            .recipes
            .resolve_by_id(recipe)
            .ok_or(SimError::UnknownRecipe(recipe))?;
        let machine = ctx.machine_type(pos).ok_or(SimError::NoSuchCell(pos))?;
        if def.machine != machine {
            return Err(SimError::RecipeMachineMismatch { recipe, machine });
        }
        self.selected = Some(recipe);
        info!(target: "scrapline::machine", at = %pos, recipe = %def.name, "fabricator recipe selected");
        Ok(())
    }

    pub(crate) fn update_logic(&mut self, pos: GridPosition, ctx: &mut MachineContext<'_>) {
        queue::evict_expired(ctx, pos);

        match std::mem::take(&mut self.state) {
            FabricatorState::Idle => self.try_pull(pos, ctx),
            FabricatorState::Receiving {
                recipe,
                pending,
                arrived,
            } => {
                if pending.iter().any(|&id| ctx.grid.item(id).is_none()) {
                    warn!(target: "scrapline::machine", at = %pos, "batch input vanished, abandoning batch");
                    drop_held(ctx, &arrived);
                } else {
                    self.state = FabricatorState::Receiving {
                        recipe,
                        pending,
                        arrived,
                    };
                }
            }
            FabricatorState::Processing {
                recipe,
                inputs,
                started_at,
                duration,
            } => {
                if inputs.iter().any(|&id| ctx.grid.item(id).is_none()) {
                    warn!(target: "scrapline::machine", at = %pos, "batch input vanished during processing");
                    drop_held(ctx, &inputs);
                } else if elapsed(ctx.now, started_at) >= duration {
                    self.complete(pos, &inputs, recipe, ctx);
                } else {
                    self.state = FabricatorState::Processing {
                        recipe,
                        inputs,
                        started_at,
                        duration,
                    };
                }
            }
        }

        settle_residents(ctx, pos, &mut self.outbound);
    }

    fn try_pull(&mut self, pos: GridPosition, ctx: &mut MachineContext<'_>) {
        let Some(recipe) = self.selected else {
            return;
        };
        let Some(inputs) = ctx.recipes.resolve_by_id(recipe).map(|r| r.inputs.clone()) else {
            return;
        };
        let Some(batch) = queue::collect_batch(ctx, pos, &inputs) else {
            return;
        };
        for &id in &batch {
            queue::release(ctx, id);
        }
        debug!(target: "scrapline::machine", at = %pos, ?recipe, size = batch.len(), "released batch");
        self.state = FabricatorState::Receiving {
            recipe,
            pending: batch,
            arrived: Vec::new(),
        };
    }

    pub(crate) fn on_item_arrived(&mut self, pos: GridPosition, id: ItemId, ctx: &mut MachineContext<'_>) {
        let FabricatorState::Receiving {
            recipe,
            pending,
            arrived,
        } = &mut self.state
        else {
            warn!(target: "scrapline::machine", at = %pos, ?id, "unexpected arrival at fabricator");
            return;
        };
        let Some(slot) = pending.iter().position(|&p| p == id) else {
            warn!(target: "scrapline::machine", at = %pos, ?id, "arrival is not part of the batch");
            return;
        };
        pending.remove(slot);
        arrived.push(id);
        let recipe = *recipe;

        // Hold the input until the batch completes.
        let now = ctx.now;
        if let Some(it) = ctx.grid.item_mut(id) {
            it.state = ItemState::Processing;
            it.processing_started_at = now;
        }
        if !pending.is_empty() {
            return;
        }

        let inputs = std::mem::take(arrived);
        let Some(duration) = recipe_duration(ctx, pos, recipe) else {
            error!(target: "scrapline::machine", at = %pos, ?recipe, "recipe disappeared while receiving");
            drop_held(ctx, &inputs);
            self.state = FabricatorState::Idle;
            return;
        };
        for &input in &inputs {
            if let Some(it) = ctx.grid.item_mut(input) {
                it.begin_processing(now, duration);
            }
        }
        self.state = FabricatorState::Processing {
            recipe,
            inputs,
            started_at: now,
            duration,
        };
        ctx.emit(Event::ProcessingStarted {
            machine: pos,
            recipe,
            tick: ctx.tick,
        });
    }

    fn complete(&mut self, pos: GridPosition, inputs: &[ItemId], recipe: RecipeId, ctx: &mut MachineContext<'_>) {
        let Some(outputs) = ctx.recipes.resolve_by_id(recipe).map(|r| r.outputs.clone()) else {
            drop_held(ctx, inputs);
            return;
        };
        for &input in inputs {
            ctx.destroy(input, DestroyReason::Consumed);
        }
        let created = emit_outputs(ctx, pos, &outputs, &mut self.outbound);
        ctx.emit(Event::ProcessingCompleted {
            machine: pos,
            recipe,
            tick: ctx.tick,
        });
        info!(target: "scrapline::machine", at = %pos, ?recipe, consumed = inputs.len(), created, "batch complete");
    }

    pub(crate) fn on_removed(&mut self, ctx: &mut MachineContext<'_>) {
        match std::mem::take(&mut self.state) {
            FabricatorState::Receiving { arrived, .. } => drop_held(ctx, &arrived),
            FabricatorState::Processing { inputs, .. } => drop_held(ctx, &inputs),
            FabricatorState::Idle => {}
        }
    }
}
