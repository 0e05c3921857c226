//! GridStore: the 2D cell array and the arena of live items.
//!
//! Every item id lives in exactly one list: the resident list of some cell
//! or the waiting list of some cell. All list edits go through
//! [`GridStore`] so the item's recorded [`Holder`] always matches the list
//! that contains it.

use crate::error::SimError;
use crate::fixed::Seconds;
use crate::id::{ItemId, ItemTypeId, MachineTypeId};
use crate::item::{Holder, HolderList, Item};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Positions and directions
// ---------------------------------------------------------------------------

/// A cell coordinate. Row 0 is the top row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridPosition {
    pub x: i32,
    pub y: i32,
}

impl GridPosition {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The neighbouring position one step in `direction`. May be off-grid.
    pub fn step(self, direction: Direction) -> Self {
        let (dx, dy) = direction.offset();
        Self::new(self.x + dx, self.y + dy)
    }
}

impl std::fmt::Display for GridPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Facing of a cell. Up moves towards row 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Up,
    Right,
    Down,
    Left,
}

impl Direction {
    /// All four directions, clockwise from Up.
    pub fn all() -> [Direction; 4] {
        [Direction::Up, Direction::Right, Direction::Down, Direction::Left]
    }

    /// Grid offset for one step in this direction.
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Right => (1, 0),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
        }
    }

    /// Rotate 90 degrees clockwise.
    pub fn rotate_cw(self) -> Self {
        match self {
            Direction::Up => Direction::Right,
            Direction::Right => Direction::Down,
            Direction::Down => Direction::Left,
            Direction::Left => Direction::Up,
        }
    }

    /// Rotate 90 degrees counter-clockwise.
    pub fn rotate_ccw(self) -> Self {
        match self {
            Direction::Up => Direction::Left,
            Direction::Left => Direction::Down,
            Direction::Down => Direction::Right,
            Direction::Right => Direction::Up,
        }
    }
}

// ---------------------------------------------------------------------------
// Cells
// ---------------------------------------------------------------------------

/// Row classification, fixed at grid construction. Constrains placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellRole {
    Top,
    Bottom,
    Grid,
}

/// Whether a cell carries a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CellKind {
    #[default]
    Blank,
    Machine,
}

/// One grid cell. Machine behaviour lives in the engine's machine table,
/// indexed the same way as the cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub position: GridPosition,
    pub role: CellRole,
    pub kind: CellKind,
    pub direction: Direction,
    pub machine_type: Option<MachineTypeId>,
    /// Items resting on or leaving this cell, in arrival order.
    pub(crate) items: Vec<ItemId>,
    /// Items paused at the midpoint on their way into this cell's machine.
    /// Position in this list is the item's stack index.
    pub(crate) waiting: Vec<ItemId>,
}

impl Cell {
    fn new(position: GridPosition, role: CellRole) -> Self {
        Self {
            position,
            role,
            kind: CellKind::Blank,
            direction: Direction::Up,
            machine_type: None,
            items: Vec::new(),
            waiting: Vec::new(),
        }
    }

    pub fn items(&self) -> &[ItemId] {
        &self.items
    }

    pub fn waiting(&self) -> &[ItemId] {
        &self.waiting
    }

    pub fn is_blank(&self) -> bool {
        self.kind == CellKind::Blank
    }
}

/// A broken grid invariant, reported by [`GridStore::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("item {0:?} is listed {1} times")]
    DuplicateMembership(ItemId, usize),
    #[error("item {0:?} is not listed in any cell")]
    Orphaned(ItemId),
    #[error("cell {0} lists unknown item {1:?}")]
    DanglingId(GridPosition, ItemId),
    #[error("item {0:?} records holder {1:?} but is listed elsewhere")]
    HolderMismatch(ItemId, Holder),
    #[error("waiting queue at {0} has non-contiguous stack indices")]
    StackIndexGap(GridPosition),
}

// ---------------------------------------------------------------------------
// GridStore
// ---------------------------------------------------------------------------

/// Owns the cells and every live item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridStore {
    width: u32,
    height: u32,
    cells: Vec<Cell>,
    items: SlotMap<ItemId, Item>,
}

impl GridStore {
    /// Create a `width` x `height` grid of blank cells. Row 0 is Top, the
    /// last row is Bottom, every other row is Grid.
    ///
    /// Both sides must be non-zero and fit a signed 32-bit coordinate, and
    /// the cell table must be allocatable.
    pub fn new(width: u32, height: u32) -> Result<Self, SimError> {
        let invalid = SimError::InvalidDimensions { width, height };
        if width == 0 || height == 0 || width > i32::MAX as u32 || height > i32::MAX as u32 {
            return Err(invalid);
        }
        let count = (width as usize).checked_mul(height as usize).ok_or(invalid.clone())?;
        let mut cells = Vec::new();
        cells.try_reserve_exact(count).map_err(|_| invalid)?;
        for y in 0..height as i32 {
            let role = if y == 0 {
                CellRole::Top
            } else if y == height as i32 - 1 {
                CellRole::Bottom
            } else {
                CellRole::Grid
            };
            for x in 0..width as i32 {
                cells.push(Cell::new(GridPosition::new(x, y), role));
            }
        }
        Ok(Self {
            width,
            height,
            cells,
            items: SlotMap::with_key(),
        })
    }

    pub(crate) fn from_parts(
        width: u32,
        height: u32,
        cells: Vec<Cell>,
        items: SlotMap<ItemId, Item>,
    ) -> Self {
        Self {
            width,
            height,
            cells,
            items,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    // -- Cells --

    pub fn in_bounds(&self, pos: GridPosition) -> bool {
        pos.x >= 0 && pos.y >= 0 && (pos.x as u32) < self.width && (pos.y as u32) < self.height
    }

    /// Row-major index of a position, if it is on the grid.
    pub fn index_of(&self, pos: GridPosition) -> Option<usize> {
        self.in_bounds(pos)
            .then(|| pos.y as usize * self.width as usize + pos.x as usize)
    }

    pub fn cell(&self, pos: GridPosition) -> Option<&Cell> {
        self.index_of(pos).map(|i| &self.cells[i])
    }

    pub(crate) fn cell_mut(&mut self, pos: GridPosition) -> Option<&mut Cell> {
        self.index_of(pos).map(move |i| &mut self.cells[i])
    }

    pub fn cell_at(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    // -- Items --

    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.get(id)
    }

    pub(crate) fn item_mut(&mut self, id: ItemId) -> Option<&mut Item> {
        self.items.get_mut(id)
    }

    pub fn items(&self) -> impl Iterator<Item = (ItemId, &Item)> {
        self.items.iter()
    }

    pub(crate) fn item_arena(&self) -> &SlotMap<ItemId, Item> {
        &self.items
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Create an Idle item resting on `pos`. Returns `None` off-grid.
    pub fn spawn_item(
        &mut self,
        pos: GridPosition,
        item_type: ItemTypeId,
        now: Seconds,
    ) -> Option<ItemId> {
        let index = self.index_of(pos)?;
        let id = self
            .items
            .insert_with_key(|id| Item::new(id, item_type, pos, now));
        self.cells[index].items.push(id);
        Some(id)
    }

    /// Remove an item from its list and from the arena.
    pub fn destroy_item(&mut self, id: ItemId) -> Option<Item> {
        self.detach(id)?;
        self.items.remove(id)
    }

    /// Remove an item from whichever list holds it. Waiting queues are
    /// re-indexed. Returns the holder it was removed from.
    pub(crate) fn detach(&mut self, id: ItemId) -> Option<Holder> {
        let holder = self.items.get(id)?.holder;
        let index = self.index_of(holder.cell)?;
        let cell = &mut self.cells[index];
        match holder.list {
            HolderList::Resident => cell.items.retain(|&i| i != id),
            HolderList::Waiting => {
                cell.waiting.retain(|&i| i != id);
                self.reindex_waiting(holder.cell);
            }
        }
        Some(holder)
    }

    /// Append a detached item to the resident list of `pos`.
    pub(crate) fn attach_resident(&mut self, id: ItemId, pos: GridPosition) -> bool {
        let Some(index) = self.index_of(pos) else {
            return false;
        };
        let Some(item) = self.items.get_mut(id) else {
            return false;
        };
        item.holder = Holder::resident(pos);
        self.cells[index].items.push(id);
        true
    }

    /// Append a detached item to the waiting queue of `pos`; its stack index
    /// becomes the queue length before the push.
    pub(crate) fn attach_waiting(&mut self, id: ItemId, pos: GridPosition) -> bool {
        let Some(index) = self.index_of(pos) else {
            return false;
        };
        let Some(item) = self.items.get_mut(id) else {
            return false;
        };
        let cell = &mut self.cells[index];
        item.holder = Holder::waiting(pos);
        item.stack_index = cell.waiting.len() as u32;
        cell.waiting.push(id);
        true
    }

    /// Rewrite stack indices of a waiting queue to `0..n` in list order.
    pub(crate) fn reindex_waiting(&mut self, pos: GridPosition) {
        let Some(index) = self.index_of(pos) else {
            return;
        };
        for (i, &id) in self.cells[index].waiting.iter().enumerate() {
            if let Some(item) = self.items.get_mut(id) {
                item.stack_index = i as u32;
            }
        }
    }

    /// Ids currently in state Moving, visited cell by cell in row-major
    /// order and, within a cell, from the back of each list.
    pub(crate) fn moving_items(&self) -> Vec<ItemId> {
        let mut out = Vec::new();
        for cell in &self.cells {
            for &id in cell.items.iter().rev().chain(cell.waiting.iter().rev()) {
                if self.items.get(id).is_some_and(|item| item.is_moving()) {
                    out.push(id);
                }
            }
        }
        out
    }

    // -- Cell mutation --

    pub(crate) fn set_machine(
        &mut self,
        pos: GridPosition,
        machine_type: Option<MachineTypeId>,
        direction: Direction,
    ) {
        if let Some(cell) = self.cell_mut(pos) {
            cell.kind = if machine_type.is_some() {
                CellKind::Machine
            } else {
                CellKind::Blank
            };
            cell.machine_type = machine_type;
            cell.direction = direction;
        }
    }

    // -- Invariants --

    /// Check the membership and stack-index invariants over the whole grid.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        let mut seen: HashMap<ItemId, usize> = HashMap::new();

        for cell in &self.cells {
            for (list, ids) in [
                (HolderList::Resident, &cell.items),
                (HolderList::Waiting, &cell.waiting),
            ] {
                for (i, &id) in ids.iter().enumerate() {
                    let Some(item) = self.items.get(id) else {
                        return Err(InvariantViolation::DanglingId(cell.position, id));
                    };
                    let expected = Holder {
                        cell: cell.position,
                        list,
                    };
                    if item.holder != expected {
                        return Err(InvariantViolation::HolderMismatch(id, item.holder));
                    }
                    if list == HolderList::Waiting && item.stack_index as usize != i {
                        return Err(InvariantViolation::StackIndexGap(cell.position));
                    }
                    *seen.entry(id).or_insert(0) += 1;
                }
            }
        }

        for (id, _) in &self.items {
            match seen.get(&id).copied().unwrap_or(0) {
                0 => return Err(InvariantViolation::Orphaned(id)),
                1 => {}
                n => return Err(InvariantViolation::DuplicateMembership(id, n)),
            }
        }
        Ok(())
    }
}
