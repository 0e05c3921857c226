//! Typed event system with pre-allocated ring buffers.
//!
//! Events are emitted during the machine and movement passes and delivered
//! in batch after the movement pass. Each event kind has its own
//! [`EventBuffer`] ring buffer with a configurable capacity.
//!
//! The bus stamps every event with a sequence number and delivers across
//! kinds in emission order, so a listener subscribed to several kinds sees
//! an item arrive before it moves on. The rendering bridge in
//! [`crate::render`] relies on that ordering.
//!
//! # Suppression
//!
//! [`EventBus::suppress`] stops a kind from being recorded at all.
//! `ItemMoved` fires for every moving item on every tick; headless runs
//! usually suppress it.

use crate::fixed::{Fixed64, Ticks};
use crate::grid::GridPosition;
use crate::id::*;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// Why an item left the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DestroyReason {
    /// Accepted by a Seller.
    Sold,
    /// Sat idle on a blank cell too long.
    BlankTimeout,
    /// Waited at a machine's midpoint too long.
    WaitTimeout,
    /// Its move pointed off the grid.
    OffGrid,
    /// Used as a recipe input.
    Consumed,
    /// Queued at a machine that was removed.
    MachineRemoved,
    /// Removed by an explicit clear.
    Cleared,
}

/// A simulation event. All events carry the tick at which they occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // -- Items --
    ItemCreated {
        item: ItemId,
        item_type: ItemTypeId,
        at: GridPosition,
        tick: Ticks,
    },
    ItemMoved {
        item: ItemId,
        source: GridPosition,
        target: GridPosition,
        progress: Fixed64,
        tick: Ticks,
    },
    ItemQueued {
        item: ItemId,
        machine: GridPosition,
        stack_index: u32,
        tick: Ticks,
    },
    ItemArrived {
        item: ItemId,
        at: GridPosition,
        tick: Ticks,
    },
    ItemDestroyed {
        item: ItemId,
        at: GridPosition,
        reason: DestroyReason,
        tick: Ticks,
    },

    // -- Machines --
    ProcessingStarted {
        machine: GridPosition,
        recipe: RecipeId,
        tick: Ticks,
    },
    ProcessingCompleted {
        machine: GridPosition,
        recipe: RecipeId,
        tick: Ticks,
    },
    CellChanged {
        at: GridPosition,
        tick: Ticks,
    },

    // -- Economy --
    CratePurchased {
        crate_id: CrateId,
        cost: u64,
        tick: Ticks,
    },
    CrateLoaded {
        spawner: GridPosition,
        crate_id: CrateId,
        tick: Ticks,
    },
    CrateEmptied {
        spawner: GridPosition,
        crate_id: CrateId,
        tick: Ticks,
    },
    ItemSold {
        item_type: ItemTypeId,
        value: u64,
        tick: Ticks,
    },
}

/// Discriminant tag for event types, used for suppression and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ItemCreated,
    ItemMoved,
    ItemQueued,
    ItemArrived,
    ItemDestroyed,
    ProcessingStarted,
    ProcessingCompleted,
    CellChanged,
    CratePurchased,
    CrateLoaded,
    CrateEmptied,
    ItemSold,
}

/// Total number of event kinds.
const EVENT_KIND_COUNT: usize = 12;

impl Event {
    /// Get the discriminant kind for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ItemCreated { .. } => EventKind::ItemCreated,
            Event::ItemMoved { .. } => EventKind::ItemMoved,
            Event::ItemQueued { .. } => EventKind::ItemQueued,
            Event::ItemArrived { .. } => EventKind::ItemArrived,
            Event::ItemDestroyed { .. } => EventKind::ItemDestroyed,
            Event::ProcessingStarted { .. } => EventKind::ProcessingStarted,
            Event::ProcessingCompleted { .. } => EventKind::ProcessingCompleted,
            Event::CellChanged { .. } => EventKind::CellChanged,
            Event::CratePurchased { .. } => EventKind::CratePurchased,
            Event::CrateLoaded { .. } => EventKind::CrateLoaded,
            Event::CrateEmptied { .. } => EventKind::CrateEmptied,
            Event::ItemSold { .. } => EventKind::ItemSold,
        }
    }
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; EVENT_KIND_COUNT] = [
        EventKind::ItemCreated,
        EventKind::ItemMoved,
        EventKind::ItemQueued,
        EventKind::ItemArrived,
        EventKind::ItemDestroyed,
        EventKind::ProcessingStarted,
        EventKind::ProcessingCompleted,
        EventKind::CellChanged,
        EventKind::CratePurchased,
        EventKind::CrateLoaded,
        EventKind::CrateEmptied,
        EventKind::ItemSold,
    ];

    /// Convert to usize index for array lookups.
    fn index(self) -> usize {
        self as usize
    }
}

// ---------------------------------------------------------------------------
// EventBuffer
// ---------------------------------------------------------------------------

/// A pre-allocated ring buffer for events. Fixed capacity; when full, the
/// oldest events are dropped.
#[derive(Debug)]
pub struct EventBuffer {
    /// Each event with the sequence number it was emitted under.
    events: Vec<Option<(u64, Event)>>,
    /// Write position (wraps around).
    head: usize,
    len: usize,
    /// Total events ever written (including dropped).
    total_written: u64,
}

impl EventBuffer {
    /// Create a new ring buffer with the given capacity.
    /// A capacity of 0 is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
            total_written: 0,
        }
    }

    /// Push an event into the ring buffer. If full, the oldest event is dropped.
    pub fn push(&mut self, event: Event) {
        let seq = self.total_written;
        self.push_stamped(seq, event);
    }

    fn push_stamped(&mut self, seq: u64, event: Event) {
        self.events[self.head] = Some((seq, event));
        self.head = (self.head + 1) % self.capacity();
        if self.len < self.capacity() {
            self.len += 1;
        }
        self.total_written += 1;
    }

    pub fn capacity(&self) -> usize {
        self.events.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Number of events that were dropped because the buffer was full.
    pub fn dropped_count(&self) -> u64 {
        self.total_written.saturating_sub(self.capacity() as u64)
    }

    /// Iterate over events in order from oldest to newest.
    pub fn iter(&self) -> EventBufferIter<'_> {
        EventBufferIter {
            buffer: self,
            index: self.oldest(),
            remaining: self.len,
        }
    }

    fn oldest(&self) -> usize {
        if self.len < self.capacity() {
            0
        } else {
            // head points to the next write position, which is the oldest entry
            self.head
        }
    }

    /// Oldest to newest, with sequence numbers.
    fn stamped(&self) -> impl Iterator<Item = (u64, &Event)> {
        let start = self.oldest();
        let capacity = self.capacity();
        (0..self.len).filter_map(move |i| {
            self.events[(start + i) % capacity]
                .as_ref()
                .map(|(seq, event)| (*seq, event))
        })
    }

    /// Clear all events from the buffer. The lifetime counter is kept.
    pub fn clear(&mut self) {
        for slot in &mut self.events {
            *slot = None;
        }
        self.head = 0;
        self.len = 0;
    }
}

/// Iterator over events in an [`EventBuffer`], from oldest to newest.
pub struct EventBufferIter<'a> {
    buffer: &'a EventBuffer,
    index: usize,
    remaining: usize,
}

impl<'a> Iterator for EventBufferIter<'a> {
    type Item = &'a Event;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let event = self.buffer.events[self.index].as_ref().map(|(_, e)| e);
        self.index = (self.index + 1) % self.buffer.capacity();
        self.remaining -= 1;
        event
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for EventBufferIter<'_> {}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// A passive listener receives events read-only, in registration order.
pub type PassiveListener = Box<dyn FnMut(&Event)>;

/// One ring buffer and one listener list per event kind, plus suppression
/// flags.
pub struct EventBus {
    /// Lazily allocated on first emit.
    buffers: [Option<EventBuffer>; EVENT_KIND_COUNT],
    suppressed: [bool; EVENT_KIND_COUNT],
    listeners: [Vec<PassiveListener>; EVENT_KIND_COUNT],
    capacity: usize,
    /// Stamp for the next emitted event.
    sequence: u64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners: Vec<usize> = self.listeners.iter().map(Vec::len).collect();
        f.debug_struct("EventBus")
            .field("buffers", &self.buffers)
            .field("suppressed", &self.suppressed)
            .field("listeners", &listeners)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl EventBus {
    /// Create a bus whose per-kind buffers hold `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: Default::default(),
            suppressed: [false; EVENT_KIND_COUNT],
            listeners: Default::default(),
            capacity,
            sequence: 0,
        }
    }

    /// Stop recording a kind. Anything already buffered for it is dropped.
    pub fn suppress(&mut self, kind: EventKind) {
        self.suppressed[kind.index()] = true;
        self.buffers[kind.index()] = None;
    }

    pub fn is_suppressed(&self, kind: EventKind) -> bool {
        self.suppressed[kind.index()]
    }

    /// Buffer an event for the next delivery. No-op for suppressed kinds.
    pub fn emit(&mut self, event: Event) {
        let idx = event.kind().index();
        if self.suppressed[idx] {
            return;
        }
        let capacity = self.capacity;
        let seq = self.sequence;
        self.sequence += 1;
        self.buffers[idx]
            .get_or_insert_with(|| EventBuffer::new(capacity))
            .push_stamped(seq, event);
    }

    pub fn on_passive(&mut self, kind: EventKind, listener: PassiveListener) {
        self.listeners[kind.index()].push(listener);
    }

    /// Hand every buffered event to its kind's listeners in emission
    /// order, then empty the buffers.
    pub fn deliver(&mut self) {
        let mut heard: Vec<(u64, usize, &Event)> = Vec::new();
        for (idx, slot) in self.buffers.iter().enumerate() {
            if self.listeners[idx].is_empty() {
                continue;
            }
            if let Some(buffer) = slot {
                heard.extend(buffer.stamped().map(|(seq, event)| (seq, idx, event)));
            }
        }
        heard.sort_unstable_by_key(|&(seq, ..)| seq);
        for (_, idx, event) in heard {
            for listener in self.listeners[idx].iter_mut() {
                listener(event);
            }
        }
        for buffer in self.buffers.iter_mut().flatten() {
            buffer.clear();
        }
    }

    /// Events currently buffered for a kind.
    pub fn buffered_count(&self, kind: EventKind) -> usize {
        self.buffers[kind.index()].as_ref().map_or(0, EventBuffer::len)
    }

    /// Events ever recorded for a kind, including ones the ring overwrote.
    pub fn total_emitted(&self, kind: EventKind) -> u64 {
        self.buffers[kind.index()]
            .as_ref()
            .map_or(0, EventBuffer::total_written)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
