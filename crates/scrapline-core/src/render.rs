//! Boundary to the rendering collaborator.
//!
//! The engine never draws anything. A [`Renderer`] implementation is fed
//! from the event bus by a [`RenderBridge`]: item events are forwarded as
//! they are delivered at the end of each step, while changed cells are
//! collected and drawn on [`RenderBridge::sync_cells`], because a cell's
//! visuals need the grid and listeners only see the event.

use crate::engine::Engine;
use crate::event::{Event, EventKind};
use crate::fixed::Fixed64;
use crate::grid::{CellKind, Direction, GridPosition};
use crate::id::{ItemId, ItemTypeId, MachineTypeId};
use std::cell::{Ref, RefCell};
use std::rc::Rc;

/// Visual side of the simulation.
///
/// Item calls arrive in the order the engine emitted the underlying
/// events. An item that reaches a conveyor and leaves it in the same tick
/// is reported as resting on the conveyor first and moving on second, so
/// the latest call for an item always reflects where it is now.
pub trait Renderer {
    fn create_visual_item(&mut self, id: ItemId, at: GridPosition, item_type: ItemTypeId);

    /// `progress` runs from 0 at `source` to 1 at `target`. A resting item
    /// has `source == target`.
    fn update_item_visual_position(
        &mut self,
        id: ItemId,
        progress: Fixed64,
        source: GridPosition,
        target: GridPosition,
        direction: Direction,
    );

    fn destroy_visual_item(&mut self, id: ItemId);

    fn update_cell_visuals(
        &mut self,
        at: GridPosition,
        kind: CellKind,
        direction: Direction,
        machine: Option<MachineTypeId>,
    );
}

/// Direction of a one-cell step, Up when the cells are not neighbours.
fn step_direction(source: GridPosition, target: GridPosition) -> Direction {
    Direction::all()
        .into_iter()
        .find(|&d| source.step(d) == target)
        .unwrap_or_default()
}

fn forward<R: Renderer>(renderer: &mut R, event: &Event) {
    match *event {
        Event::ItemCreated {
            item, item_type, at, ..
        } => renderer.create_visual_item(item, at, item_type),
        Event::ItemMoved {
            item,
            source,
            target,
            progress,
            ..
        } => renderer.update_item_visual_position(
            item,
            progress,
            source,
            target,
            step_direction(source, target),
        ),
        Event::ItemArrived { item, at, .. } => {
            renderer.update_item_visual_position(item, Fixed64::ZERO, at, at, Direction::Up)
        }
        Event::ItemDestroyed { item, .. } => renderer.destroy_visual_item(item),
        _ => {}
    }
}

/// Subscribes a [`Renderer`] to an engine's event bus.
pub struct RenderBridge<R> {
    renderer: Rc<RefCell<R>>,
    dirty_cells: Rc<RefCell<Vec<GridPosition>>>,
}

impl<R: Renderer + 'static> RenderBridge<R> {
    /// Register passive listeners on `engine` that drive `renderer`.
    pub fn attach(engine: &mut Engine, renderer: R) -> Self {
        let renderer = Rc::new(RefCell::new(renderer));
        let dirty_cells = Rc::new(RefCell::new(Vec::new()));

        for kind in [
            EventKind::ItemCreated,
            EventKind::ItemMoved,
            EventKind::ItemArrived,
            EventKind::ItemDestroyed,
        ] {
            let r = renderer.clone();
            engine.on_passive(kind, Box::new(move |event| forward(&mut *r.borrow_mut(), event)));
        }

        let dirty = dirty_cells.clone();
        engine.on_passive(
            EventKind::CellChanged,
            Box::new(move |event| {
                if let Event::CellChanged { at, .. } = *event {
                    dirty.borrow_mut().push(at);
                }
            }),
        );

        Self {
            renderer,
            dirty_cells,
        }
    }

    pub fn renderer(&self) -> Ref<'_, R> {
        self.renderer.borrow()
    }

    /// Draw every cell changed since the last sync. Returns how many cells
    /// were drawn.
    pub fn sync_cells(&self, engine: &Engine) -> usize {
        let mut dirty = std::mem::take(&mut *self.dirty_cells.borrow_mut());
        dirty.sort_by_key(|p| (p.y, p.x));
        dirty.dedup();
        let mut renderer = self.renderer.borrow_mut();
        for &at in &dirty {
            if let Some(cell) = engine.grid().cell(at) {
                renderer.update_cell_visuals(at, cell.kind, cell.direction, cell.machine_type);
            }
        }
        dirty.len()
    }

    /// Redraw the whole grid and every live item, e.g. after loading a
    /// snapshot.
    pub fn redraw(&self, engine: &Engine) {
        self.dirty_cells.borrow_mut().clear();
        let mut renderer = self.renderer.borrow_mut();
        for cell in engine.grid().cells() {
            renderer.update_cell_visuals(cell.position, cell.kind, cell.direction, cell.machine_type);
        }
        for (id, item) in engine.grid().items() {
            renderer.create_visual_item(id, item.source, item.item_type);
            if item.is_moving() || item.halfway {
                renderer.update_item_visual_position(
                    id,
                    item.progress,
                    item.source,
                    item.target,
                    item.direction,
                );
            }
        }
    }
}
