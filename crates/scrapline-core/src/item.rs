//! Items and the move state machine.
//!
//! An item's lifecycle on a move is `Idle -> Moving -> (Waiting -> Moving)
//! -> Idle`. The transitions are explicit methods with guards so the
//! midpoint pause can be exercised without simulating frame timing:
//!
//! - [`Item::begin_move`]: Idle -> Moving, progress 0.
//! - [`Item::advance`]: progress update; stops at the midpoint and reports
//!   [`MoveStep::Midpoint`] so the caller can decide.
//! - [`Item::pause_at_midpoint`]: Moving -> Waiting, progress exactly 0.5.
//! - [`Item::pass_midpoint`]: keep going towards 1.0.
//! - [`Item::release`]: Waiting -> Moving (machine pull).
//! - [`Item::arrive`]: Moving -> Idle at the target cell.

use crate::fixed::{Fixed64, HALF, ONE, Seconds};
use crate::grid::{Direction, GridPosition};
use crate::id::{ItemId, ItemTypeId};
use serde::{Deserialize, Serialize};

/// Which list of a cell holds an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HolderList {
    Resident,
    Waiting,
}

/// The cell list that currently owns an item id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Holder {
    pub cell: GridPosition,
    pub list: HolderList,
}

impl Holder {
    pub fn resident(cell: GridPosition) -> Self {
        Self {
            cell,
            list: HolderList::Resident,
        }
    }

    pub fn waiting(cell: GridPosition) -> Self {
        Self {
            cell,
            list: HolderList::Waiting,
        }
    }
}

/// Runtime state of an item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemState {
    #[default]
    Idle,
    Moving,
    Waiting,
    Processing,
}

/// Outcome of one [`Item::advance`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStep {
    /// Still travelling.
    InFlight,
    /// Crossed the midpoint for the first time. Progress has not been
    /// applied yet; `next` is where it would land.
    Midpoint { next: Fixed64 },
    /// Reached the target.
    Arrived,
}

/// A live item on the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub item_type: ItemTypeId,
    pub state: ItemState,
    /// Move progress in `[0, 1]`.
    pub progress: Fixed64,
    pub move_started_at: Seconds,
    pub source: GridPosition,
    pub target: GridPosition,
    pub direction: Direction,
    pub processing_started_at: Seconds,
    pub process_duration: Seconds,
    pub waiting_since: Seconds,
    /// When the item last came to rest.
    pub idle_since: Seconds,
    pub halfway: bool,
    /// Position within a waiting queue. Only meaningful while waiting.
    pub stack_index: u32,
    pub(crate) holder: Holder,
}

impl Item {
    pub(crate) fn new(id: ItemId, item_type: ItemTypeId, at: GridPosition, now: Seconds) -> Self {
        Self {
            id,
            item_type,
            state: ItemState::Idle,
            progress: Fixed64::ZERO,
            move_started_at: now,
            source: at,
            target: at,
            direction: Direction::Up,
            processing_started_at: Fixed64::ZERO,
            process_duration: Fixed64::ZERO,
            waiting_since: Fixed64::ZERO,
            idle_since: now,
            halfway: false,
            stack_index: 0,
            holder: Holder::resident(at),
        }
    }

    /// The list that currently owns this item.
    pub fn holder(&self) -> Holder {
        self.holder
    }

    pub fn is_idle(&self) -> bool {
        self.state == ItemState::Idle
    }

    pub fn is_moving(&self) -> bool {
        self.state == ItemState::Moving
    }

    /// Paused at the midpoint and eligible to be pulled.
    pub fn is_pullable(&self) -> bool {
        self.state == ItemState::Waiting && self.halfway
    }

    /// Idle -> Moving towards the neighbour in `direction`. Returns false
    /// (and changes nothing) unless the item is Idle.
    pub fn begin_move(
        &mut self,
        from: GridPosition,
        direction: Direction,
        now: Seconds,
    ) -> bool {
        if self.state != ItemState::Idle {
            return false;
        }
        self.state = ItemState::Moving;
        self.progress = Fixed64::ZERO;
        self.halfway = false;
        self.move_started_at = now;
        self.source = from;
        self.target = from.step(direction);
        self.direction = direction;
        true
    }

    /// Add `delta` progress. Never decreases progress and never exceeds 1.
    /// The first crossing of 0.5 is reported without being applied.
    pub fn advance(&mut self, delta: Fixed64) -> MoveStep {
        if self.state != ItemState::Moving {
            return MoveStep::InFlight;
        }
        let next = self.progress.saturating_add(delta.max(Fixed64::ZERO)).min(ONE);
        if !self.halfway && next >= HALF {
            return MoveStep::Midpoint { next };
        }
        self.progress = next;
        if next >= ONE {
            MoveStep::Arrived
        } else {
            MoveStep::InFlight
        }
    }

    /// Moving -> Waiting. Progress is clamped to exactly 0.5.
    pub fn pause_at_midpoint(&mut self, now: Seconds) {
        self.state = ItemState::Waiting;
        self.progress = HALF;
        self.halfway = true;
        self.waiting_since = now;
    }

    /// Continue past the midpoint without pausing.
    pub fn pass_midpoint(&mut self, next: Fixed64) -> MoveStep {
        self.halfway = true;
        self.progress = next.max(self.progress);
        if self.progress >= ONE {
            MoveStep::Arrived
        } else {
            MoveStep::InFlight
        }
    }

    /// Waiting -> Moving. Only a paused, halfway item can be released.
    pub fn release(&mut self) -> bool {
        if !self.is_pullable() {
            return false;
        }
        self.state = ItemState::Moving;
        true
    }

    /// Moving -> Idle, resting on the target cell.
    pub fn arrive(&mut self, now: Seconds) {
        self.state = ItemState::Idle;
        self.source = self.target;
        self.progress = Fixed64::ZERO;
        self.halfway = false;
        self.idle_since = now;
    }

    /// Held by a machine that is working on it.
    pub fn begin_processing(&mut self, now: Seconds, duration: Seconds) {
        self.state = ItemState::Processing;
        self.processing_started_at = now;
        self.process_duration = duration;
    }
}
