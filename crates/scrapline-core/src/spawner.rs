//! Spawner: turns a loaded waste crate into items, one per interval.

use crate::error::SimError;
use crate::event::Event;
use crate::fixed::{Seconds, elapsed};
use crate::grid::GridPosition;
use crate::id::{CrateId, ItemId};
use crate::machine::{MachineContext, restart_idle, try_start_move};
use crate::supply::CrateInstance;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spawner {
    /// The crate type this spawner refills with.
    pub required: Option<CrateId>,
    pub crate_instance: Option<CrateInstance>,
    pub last_spawn: Option<Seconds>,
}

impl Spawner {
    /// True when there is nothing left to spawn.
    pub fn is_empty(&self) -> bool {
        self.crate_instance.as_ref().is_none_or(|c| c.is_empty())
    }

    pub fn remaining(&self) -> u32 {
        self.crate_instance
            .as_ref()
            .map(|c| c.total_remaining())
            .unwrap_or(0)
    }

    pub(crate) fn update_logic(&mut self, pos: GridPosition, ctx: &mut MachineContext<'_>) {
        // A spawned item whose first move was refused (facing off the grid
        // or into another spawner) blocks the cell until it leaves.
        let facing = ctx.facing(pos);
        restart_idle(ctx, pos, |_| facing);

        if self.is_empty() {
            return;
        }
        if let Some(last) = self.last_spawn
            && elapsed(ctx.now, last) < ctx.timing.spawn_interval
        {
            return;
        }
        if ctx.grid.cell(pos).is_none_or(|c| !c.items().is_empty()) {
            return;
        }
        let Some(instance) = self.crate_instance.as_mut() else {
            return;
        };
        let Some(item_type) = instance.take_random(ctx.rng) else {
            return;
        };
        let crate_id = instance.crate_id;
        let emptied = instance.is_empty();

        if let Some(id) = ctx.spawn(pos, item_type) {
            let facing = ctx.facing(pos);
            try_start_move(ctx, id, pos, facing);
            debug!(target: "scrapline::machine", at = %pos, ?item_type, remaining = self.remaining(), "spawned item");
        }
        self.last_spawn = Some(ctx.now);

        if emptied {
            ctx.emit(Event::CrateEmptied {
                spawner: pos,
                crate_id,
                tick: ctx.tick,
            });
            info!(target: "scrapline::economy", at = %pos, ?crate_id, "crate emptied, requesting refill");
            self.crate_instance = None;
            self.refill(pos, ctx);
        }
    }

    pub(crate) fn on_item_arrived(&mut self, pos: GridPosition, id: ItemId, _ctx: &mut MachineContext<'_>) {
        warn!(target: "scrapline::machine", at = %pos, ?id, "item arrived at a spawner");
    }

    /// Take the first matching crate from the supply queue if this spawner
    /// has nothing left to spawn. Returns whether a crate was loaded.
    pub fn refill(&mut self, pos: GridPosition, ctx: &mut MachineContext<'_>) -> bool {
        if !self.is_empty() {
            return false;
        }
        let Some(required) = self.required else {
            return false;
        };
        let Some(def) = ctx.recipes.registry().get_crate(required) else {
            return false;
        };
        let Some(crate_id) = ctx.supply.take_matching(required) else {
            return false;
        };
        self.crate_instance = Some(CrateInstance::new(crate_id, def));
        ctx.emit(Event::CrateLoaded {
            spawner: pos,
            crate_id,
            tick: ctx.tick,
        });
        info!(target: "scrapline::economy", at = %pos, ?crate_id, "spawner refilled");
        true
    }

    /// Load a fresh crate directly, bypassing the queue. Any unopened crate
    /// already loaded goes back to the queue.
    pub fn load(
        &mut self,
        pos: GridPosition,
        crate_id: CrateId,
        ctx: &mut MachineContext<'_>,
    ) -> Result<(), SimError> {
        let def = ctx
            .recipes
            .registry()
            .get_crate(crate_id)
            .ok_or(SimError::MissingCrateDefinition(crate_id))?;
        let instance = CrateInstance::new(crate_id, def);
        self.return_unopened(pos, ctx);
        self.required = Some(crate_id);
        self.crate_instance = Some(instance);
        ctx.emit(Event::CrateLoaded {
            spawner: pos,
            crate_id,
            tick: ctx.tick,
        });
        Ok(())
    }

    /// Change the required crate type. An unopened crate is returned to the
    /// queue, an opened one is discarded, then a matching crate is taken.
    pub(crate) fn configure(
        &mut self,
        pos: GridPosition,
        crate_id: CrateId,
        ctx: &mut MachineContext<'_>,
    ) -> Result<(), SimError> {
        if ctx.recipes.registry().get_crate(crate_id).is_none() {
            return Err(SimError::MissingCrateDefinition(crate_id));
        }
        self.return_unopened(pos, ctx);
        if let Some(opened) = self.crate_instance.take() {
            debug!(target: "scrapline::economy", at = %pos, crate_id = ?opened.crate_id, left = opened.total_remaining(), "discarding opened crate");
        }
        self.required = Some(crate_id);
        self.refill(pos, ctx);
        Ok(())
    }

    pub(crate) fn on_removed(&mut self, pos: GridPosition, ctx: &mut MachineContext<'_>) {
        self.return_unopened(pos, ctx);
        self.crate_instance = None;
    }

    fn return_unopened(&mut self, pos: GridPosition, ctx: &mut MachineContext<'_>) {
        let Some(instance) = self.crate_instance.take_if(|c| !c.opened) else {
            return;
        };
        if let Err(e) = ctx.supply.return_to_queue(instance.crate_id) {
            warn!(target: "scrapline::economy", at = %pos, crate_id = ?instance.crate_id, error = %e, "unopened crate lost");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::secs;
    use crate::grid::Direction;
    use crate::test_utils::*;

    fn loaded(fx: &Fixture) -> (Harness, Spawner) {
        let mut h = Harness::new(fx, 3, 3);
        h.place(fx.spawner, 1, 2, Direction::Up);
        let mut s = Spawner::default();
        s.load(GridPosition::new(1, 2), fx.household, &mut h.ctx()).unwrap();
        (h, s)
    }

    /// Clear the spawner cell so the next spawn is allowed.
    fn clear_cell(h: &mut Harness) {
        let ids: Vec<_> = h.grid.cell(GridPosition::new(1, 2)).unwrap().items().to_vec();
        for id in ids {
            h.grid.destroy_item(id);
        }
    }

    #[test]
    fn spawns_respect_interval_and_occupancy() {
        let fx = Fixture::new();
        let (mut h, mut s) = loaded(&fx);
        let pos = GridPosition::new(1, 2);

        s.update_logic(pos, &mut h.ctx());
        assert_eq!(h.grid.item_count(), 1);
        assert_eq!(s.remaining(), 1);

        // The spawned item is still on the cell (moving out).
        h.now = secs(5.0);
        s.update_logic(pos, &mut h.ctx());
        assert_eq!(h.grid.item_count(), 1);

        clear_cell(&mut h);
        h.now = secs(5.5);
        s.update_logic(pos, &mut h.ctx());
        assert_eq!(h.grid.item_count(), 1);
        assert!(s.is_empty());
    }

    #[test]
    fn interval_blocks_back_to_back_spawns() {
        let fx = Fixture::new();
        let (mut h, mut s) = loaded(&fx);
        let pos = GridPosition::new(1, 2);
        s.update_logic(pos, &mut h.ctx());
        clear_cell(&mut h);
        h.now = secs(0.5);
        s.update_logic(pos, &mut h.ctx());
        assert_eq!(s.remaining(), 1);
    }

    #[test]
    fn empty_crate_refills_from_queue() {
        let fx = Fixture::new();
        let (mut h, mut s) = loaded(&fx);
        let pos = GridPosition::new(1, 2);
        h.supply.return_to_queue(fx.metal_scrap).unwrap();
        h.supply.return_to_queue(fx.household).unwrap();

        for step in 0..2 {
            h.now = secs(step as f64 * 2.0);
            clear_cell(&mut h);
            s.update_logic(pos, &mut h.ctx());
        }
        // Refilled with the household crate, metal scrap left alone.
        assert_eq!(s.crate_instance.as_ref().unwrap().crate_id, fx.household);
        assert_eq!(s.remaining(), 2);
        assert_eq!(h.supply.iter().collect::<Vec<_>>(), vec![fx.metal_scrap]);
    }

    #[test]
    fn reconfigure_returns_unopened_crate() {
        let fx = Fixture::new();
        let (mut h, mut s) = loaded(&fx);
        let pos = GridPosition::new(1, 2);
        s.configure(pos, fx.metal_scrap, &mut h.ctx()).unwrap();
        assert_eq!(s.required, Some(fx.metal_scrap));
        assert!(s.crate_instance.is_none());
        assert_eq!(h.supply.iter().collect::<Vec<_>>(), vec![fx.household]);

        assert_eq!(
            s.configure(pos, CrateId(42), &mut h.ctx()),
            Err(SimError::MissingCrateDefinition(CrateId(42)))
        );
    }

    #[test]
    fn blocked_item_leaves_once_the_way_is_clear() {
        let fx = Fixture::new();
        let (mut h, mut s) = loaded(&fx);
        let pos = GridPosition::new(1, 2);
        h.place(fx.spawner, 1, 2, Direction::Down);

        s.update_logic(pos, &mut h.ctx());
        let stuck = h.grid.cell(pos).unwrap().items().to_vec();
        assert_eq!(stuck.len(), 1);
        assert!(h.grid.item(stuck[0]).unwrap().is_idle());

        // Still facing off the grid: nothing moves, nothing new spawns.
        h.now = secs(3.0);
        s.update_logic(pos, &mut h.ctx());
        assert_eq!(h.grid.item_count(), 1);
        assert_eq!(s.remaining(), 1);

        h.place(fx.spawner, 1, 2, Direction::Up);
        h.now = secs(4.0);
        s.update_logic(pos, &mut h.ctx());
        let item = h.grid.item(stuck[0]).unwrap();
        assert!(item.is_moving());
        assert_eq!(item.target, GridPosition::new(1, 1));

        clear_cell(&mut h);
        h.now = secs(5.0);
        s.update_logic(pos, &mut h.ctx());
        assert!(s.is_empty());
        assert_eq!(h.grid.item_count(), 1);
    }

    #[test]
    fn arrival_leaves_item_in_place() {
        let fx = Fixture::new();
        let (mut h, mut s) = loaded(&fx);
        let id = h.spawn(fx.can, 1, 2);
        s.on_item_arrived(GridPosition::new(1, 2), id, &mut h.ctx());
        assert!(h.grid.item(id).unwrap().is_idle());
    }
}
