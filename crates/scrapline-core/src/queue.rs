//! Pull-queue mechanics shared by Processor and Fabricator.
//!
//! A machine's waiting queue is the `waiting` list of its own cell. Items
//! enter it at the midpoint of a move (or by direct injection), sit there
//! as `Waiting` until the machine releases them, and stay listed while they
//! finish the second half of the move. Stack indices always equal list
//! positions; [`GridStore`](crate::grid::GridStore) re-indexes on removal.

use crate::error::SimError;
use crate::event::{DestroyReason, Event};
use crate::fixed::elapsed;
use crate::grid::GridPosition;
use crate::id::ItemId;
use crate::machine::MachineContext;
use crate::registry::RecipeEntry;
use tracing::warn;

/// Park `id` in the waiting queue of `machine`, paused at the midpoint.
/// Returns its stack index.
pub fn enqueue(
    ctx: &mut MachineContext<'_>,
    machine: GridPosition,
    id: ItemId,
) -> Result<u32, SimError> {
    if ctx.grid.item(id).is_none() || !ctx.grid.in_bounds(machine) {
        return Err(SimError::NoSuchCell(machine));
    }
    ctx.grid.detach(id);
    ctx.grid.attach_waiting(id, machine);
    let now = ctx.now;
    let Some(item) = ctx.grid.item_mut(id) else {
        return Err(SimError::NoSuchCell(machine));
    };
    item.pause_at_midpoint(now);
    let stack_index = item.stack_index;
    ctx.emit(Event::ItemQueued {
        item: id,
        machine,
        stack_index,
        tick: ctx.tick,
    });
    Ok(stack_index)
}

/// Destroy every still-waiting item that has waited longer than the
/// configured timeout. Released items are on their way in and are kept.
pub fn evict_expired(ctx: &mut MachineContext<'_>, machine: GridPosition) -> usize {
    let timeout = ctx.timing.waiting_timeout;
    let now = ctx.now;
    let expired: Vec<(ItemId, _)> = waiting(ctx, machine)
        .into_iter()
        .filter_map(|id| {
            let item = ctx.grid.item(id)?;
            let waited = elapsed(now, item.waiting_since);
            (item.is_pullable() && waited > timeout).then_some((id, waited))
        })
        .collect();

    for &(id, waited) in &expired {
        warn!(
            target: "scrapline::machine",
            at = %machine,
            ?id,
            error = %SimError::Timeout { waited },
            "evicting waiting item"
        );
        ctx.destroy(id, DestroyReason::WaitTimeout);
    }
    expired.len()
}

/// Snapshot of the waiting list at `machine`, in stack order.
pub fn waiting(ctx: &MachineContext<'_>, machine: GridPosition) -> Vec<ItemId> {
    ctx.grid
        .cell(machine)
        .map(|c| c.waiting().to_vec())
        .unwrap_or_default()
}

/// The item at stack index 0, if it is paused and ready to pull.
pub fn pullable_head(ctx: &MachineContext<'_>, machine: GridPosition) -> Option<ItemId> {
    let head = *ctx.grid.cell(machine)?.waiting().first()?;
    ctx.grid
        .item(head)
        .is_some_and(|i| i.is_pullable())
        .then_some(head)
}

/// Pick, in stack order, paused items covering every entry of `inputs`.
/// `None` unless the whole set is present.
pub fn collect_batch(
    ctx: &MachineContext<'_>,
    machine: GridPosition,
    inputs: &[RecipeEntry],
) -> Option<Vec<ItemId>> {
    let mut needed: Vec<(crate::id::ItemTypeId, u32)> =
        inputs.iter().map(|e| (e.item, e.quantity)).collect();
    let mut picked = Vec::new();

    for id in waiting(ctx, machine) {
        let Some(item) = ctx.grid.item(id).filter(|i| i.is_pullable()) else {
            continue;
        };
        if let Some(slot) = needed
            .iter_mut()
            .find(|(t, n)| *t == item.item_type && *n > 0)
        {
            slot.1 -= 1;
            picked.push(id);
        }
    }

    needed.iter().all(|(_, n)| *n == 0).then_some(picked)
}

/// Let a paused item finish its move into the machine.
pub fn release(ctx: &mut MachineContext<'_>, id: ItemId) -> bool {
    ctx.grid.item_mut(id).is_some_and(|i| i.release())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::secs;
    use crate::test_utils::*;

    #[test]
    fn enqueue_assigns_contiguous_indices() {
        let fx = Fixture::new();
        let mut h = Harness::new(&fx, 3, 3);
        let machine = GridPosition::new(1, 1);
        let ids: Vec<ItemId> = (0..3).map(|_| h.spawn(fx.can, 0, 1)).collect();

        let mut ctx = h.ctx();
        for (i, &id) in ids.iter().enumerate() {
            assert_eq!(enqueue(&mut ctx, machine, id).unwrap(), i as u32);
        }
        assert!(ctx.grid.cell(GridPosition::new(0, 1)).unwrap().items().is_empty());
        assert_eq!(waiting(&ctx, machine), ids);
        assert_eq!(pullable_head(&ctx, machine), Some(ids[0]));
        ctx.grid.validate().unwrap();
    }

    #[test]
    fn eviction_reindexes_survivors() {
        let fx = Fixture::new();
        let mut h = Harness::new(&fx, 3, 3);
        let machine = GridPosition::new(1, 1);
        let early = h.spawn(fx.can, 0, 1);
        let late = h.spawn(fx.can, 0, 1);
        enqueue(&mut h.ctx(), machine, early).unwrap();
        h.now = secs(5.0);
        enqueue(&mut h.ctx(), machine, late).unwrap();

        h.now = secs(15.5);
        assert_eq!(evict_expired(&mut h.ctx(), machine), 1);
        assert!(h.grid.item(early).is_none());
        assert_eq!(h.grid.item(late).unwrap().stack_index, 0);
        h.grid.validate().unwrap();
    }

    #[test]
    fn released_items_are_not_evicted() {
        let fx = Fixture::new();
        let mut h = Harness::new(&fx, 3, 3);
        let machine = GridPosition::new(1, 1);
        let id = h.spawn(fx.can, 0, 1);
        enqueue(&mut h.ctx(), machine, id).unwrap();
        assert!(release(&mut h.ctx(), id));

        h.now = secs(100.0);
        assert_eq!(evict_expired(&mut h.ctx(), machine), 0);
        assert!(h.grid.item(id).is_some());
    }

    #[test]
    fn batch_needs_every_input() {
        let fx = Fixture::new();
        let mut h = Harness::new(&fx, 3, 3);
        let machine = GridPosition::new(1, 1);
        let recipe = fx.registry.get_recipe(fx.press_bale).unwrap().inputs.clone();

        let first = h.spawn(fx.can, 0, 1);
        enqueue(&mut h.ctx(), machine, first).unwrap();
        assert_eq!(collect_batch(&h.ctx(), machine, &recipe), None);

        let paper = h.spawn(fx.paper, 0, 1);
        enqueue(&mut h.ctx(), machine, paper).unwrap();
        let second = h.spawn(fx.can, 0, 1);
        enqueue(&mut h.ctx(), machine, second).unwrap();

        let batch = collect_batch(&h.ctx(), machine, &recipe).unwrap();
        assert_eq!(batch.len(), 3);
        assert!(batch.contains(&first) && batch.contains(&second) && batch.contains(&paper));
    }
}
