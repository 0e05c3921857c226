//! Credits, purchased waste crates, and the global queue that feeds spawners.

use crate::error::SimError;
use crate::id::{CrateId, ItemTypeId};
use crate::registry::{Registry, WasteCrateDef};
use crate::rng::SimRng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Wallet
// ---------------------------------------------------------------------------

/// The player's credit balance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    balance: u64,
}

impl Wallet {
    pub fn new(balance: u64) -> Self {
        Self { balance }
    }

    pub fn balance(&self) -> u64 {
        self.balance
    }

    pub fn can_afford(&self, cost: u64) -> bool {
        self.balance >= cost
    }

    /// Deduct `cost`, or fail without touching the balance.
    pub fn spend(&mut self, cost: u64) -> Result<(), SimError> {
        if !self.can_afford(cost) {
            return Err(SimError::InsufficientFunds {
                needed: cost,
                available: self.balance,
            });
        }
        self.balance -= cost;
        Ok(())
    }

    pub fn earn(&mut self, amount: u64) {
        self.balance = self.balance.saturating_add(amount);
    }
}

// ---------------------------------------------------------------------------
// Crate instances
// ---------------------------------------------------------------------------

/// A crate loaded into a spawner, with the counts still to be spawned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrateInstance {
    pub crate_id: CrateId,
    /// Remaining count per item type, in definition order.
    pub remaining: Vec<(ItemTypeId, u32)>,
    /// Set once the first item has been taken out.
    pub opened: bool,
}

impl CrateInstance {
    pub fn new(crate_id: CrateId, def: &WasteCrateDef) -> Self {
        Self {
            crate_id,
            remaining: def
                .items
                .iter()
                .filter(|e| e.quantity > 0)
                .map(|e| (e.item, e.quantity))
                .collect(),
            opened: false,
        }
    }

    pub fn total_remaining(&self) -> u32 {
        self.remaining.iter().map(|(_, n)| n).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_remaining() == 0
    }

    /// Take one item, chosen uniformly among the types that still have a
    /// count, and decrement it. `None` once empty.
    pub fn take_random(&mut self, rng: &mut SimRng) -> Option<ItemTypeId> {
        let available: Vec<usize> = self
            .remaining
            .iter()
            .enumerate()
            .filter(|(_, (_, n))| *n > 0)
            .map(|(i, _)| i)
            .collect();
        if available.is_empty() {
            return None;
        }
        let pick = available[rng.next_below(available.len() as u32) as usize];
        let entry = &mut self.remaining[pick];
        entry.1 -= 1;
        self.opened = true;
        Some(entry.0)
    }
}

// ---------------------------------------------------------------------------
// Global waste queue
// ---------------------------------------------------------------------------

/// Bounded FIFO of purchased crate ids waiting for a spawner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WasteSupplyQueue {
    queue: VecDeque<CrateId>,
    limit: usize,
}

impl WasteSupplyQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(limit),
            limit,
        }
    }

    pub(crate) fn from_parts(queue: VecDeque<CrateId>, limit: usize) -> Self {
        Self { queue, limit }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.limit
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn iter(&self) -> impl Iterator<Item = CrateId> + '_ {
        self.queue.iter().copied()
    }

    /// Buy a crate: validate, deduct its cost, and append it. Nothing
    /// changes on error. Notifying spawners is the caller's job.
    pub fn purchase(
        &mut self,
        crate_id: CrateId,
        registry: &Registry,
        wallet: &mut Wallet,
    ) -> Result<u64, SimError> {
        let def = registry
            .get_crate(crate_id)
            .ok_or(SimError::MissingCrateDefinition(crate_id))?;
        if !wallet.can_afford(def.cost) {
            return Err(SimError::InsufficientFunds {
                needed: def.cost,
                available: wallet.balance(),
            });
        }
        if self.is_full() {
            return Err(SimError::QueueFull { limit: self.limit });
        }
        wallet.spend(def.cost)?;
        self.queue.push_back(crate_id);
        info!(
            target: "scrapline::economy",
            crate_name = %def.name,
            cost = def.cost,
            queued = self.queue.len(),
            "crate purchased"
        );
        Ok(def.cost)
    }

    /// Remove and return the first queued id equal to `required`.
    pub fn take_matching(&mut self, required: CrateId) -> Option<CrateId> {
        let pos = self.queue.iter().position(|&id| id == required)?;
        self.queue.remove(pos)
    }

    /// Re-enqueue an unopened crate. Refused when the queue is full.
    pub fn return_to_queue(&mut self, crate_id: CrateId) -> Result<(), SimError> {
        if self.is_full() {
            return Err(SimError::QueueFull { limit: self.limit });
        }
        self.queue.push_back(crate_id);
        debug!(target: "scrapline::economy", ?crate_id, "crate returned to queue");
        Ok(())
    }
}
