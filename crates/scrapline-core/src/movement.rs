//! ItemMovementEngine: the two-phase move protocol.
//!
//! Each tick every Moving item gains `dt * item_speed` progress:
//!
//! 1. `0 -> 0.5`: progress only.
//! 2. Midpoint: if the target holds a Processor-family machine the item is
//!    parked in that machine's waiting queue at exactly 0.5 and stops until
//!    released. Any other target is passed straight through.
//! 3. `0.5 -> 1.0`: resumes from 0.5 after a release, same formula.
//! 4. Arrival: the item rests on the target cell and the target's
//!    `on_item_arrived` runs immediately.
//!
//! The set of moving items is captured before any item advances, so a move
//! started by an arrival callback waits for the next tick.

use crate::event::{DestroyReason, Event};
use crate::fixed::Seconds;
use crate::grid::GridPosition;
use crate::id::ItemId;
use crate::item::MoveStep;
use crate::machine::{BlankCell, Machine, MachineContext};
use crate::queue;
use tracing::error;

/// Advance every moving item by `dt`.
pub fn advance(machines: &mut [Option<Machine>], ctx: &mut MachineContext<'_>, dt: Seconds) {
    let delta = dt.saturating_mul(ctx.timing.item_speed);
    for id in ctx.grid.moving_items() {
        advance_item(machines, ctx, id, delta);
    }
}

fn advance_item(
    machines: &mut [Option<Machine>],
    ctx: &mut MachineContext<'_>,
    id: ItemId,
    delta: Seconds,
) {
    let Some(item) = ctx.grid.item(id) else {
        return;
    };
    if !item.is_moving() {
        return;
    }
    let (source, target) = (item.source, item.target);
    if !ctx.grid.in_bounds(target) {
        error!(target: "scrapline::movement", ?id, from = %source, to = %target, "move target is off the grid, destroying item");
        ctx.destroy(id, DestroyReason::OffGrid);
        return;
    }

    let Some(item) = ctx.grid.item_mut(id) else {
        return;
    };
    let mut step = item.advance(delta);
    if let MoveStep::Midpoint { next } = step {
        let pauses = ctx
            .machine_kind(target)
            .is_some_and(|kind| kind.is_processor_family());
        if pauses {
            if let Err(e) = queue::enqueue(ctx, target, id) {
                error!(target: "scrapline::movement", ?id, error = %e, "could not queue item at midpoint");
            }
            moved(ctx, id);
            return;
        }
        step = match ctx.grid.item_mut(id) {
            Some(item) => item.pass_midpoint(next),
            None => return,
        };
    }

    match step {
        MoveStep::Arrived => complete(machines, ctx, id, target),
        _ => moved(ctx, id),
    }
}

fn moved(ctx: &mut MachineContext<'_>, id: ItemId) {
    let Some(item) = ctx.grid.item(id) else {
        return;
    };
    let event = Event::ItemMoved {
        item: id,
        source: item.source,
        target: item.target,
        progress: item.progress,
        tick: ctx.tick,
    };
    ctx.emit(event);
}

fn complete(
    machines: &mut [Option<Machine>],
    ctx: &mut MachineContext<'_>,
    id: ItemId,
    target: GridPosition,
) {
    ctx.grid.detach(id);
    ctx.grid.attach_resident(id, target);
    let now = ctx.now;
    if let Some(item) = ctx.grid.item_mut(id) {
        item.arrive(now);
    }
    ctx.emit(Event::ItemArrived {
        item: id,
        at: target,
        tick: ctx.tick,
    });

    let slot = ctx
        .grid
        .index_of(target)
        .and_then(|i| machines.get_mut(i))
        .and_then(Option::as_mut);
    match slot {
        Some(machine) => machine.on_item_arrived(target, id, ctx),
        None => BlankCell.on_item_arrived(target, id, ctx),
    }
}
