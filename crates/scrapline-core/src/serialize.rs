//! Snapshot support for the simulation engine.
//!
//! A snapshot captures the grid (cells, membership lists, item arena), the
//! machine table, the wallet, the waste queue, the clock and the RNG state.
//! It is encoded with `bitcode` behind a versioned header. The registry and
//! engine config are not part of a snapshot; they are supplied again when
//! restoring, and the restored grid is checked against both.

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::grid::{CellKind, GridPosition, GridStore, InvariantViolation};
use crate::id::MachineTypeId;
use crate::machine::Machine;
use crate::registry::Registry;
use crate::rng::SimRng;
use crate::sim::SimState;
use crate::supply::{WasteSupplyQueue, Wallet};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Magic number identifying a scrapline snapshot.
pub const SNAPSHOT_MAGIC: u32 = 0x5C4A_0001;

/// Current format version. Increment when breaking the wire format.
pub const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during serialization.
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
}

/// Errors that can occur during deserialization.
#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", SNAPSHOT_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("unsupported format version: expected {}, got {}", FORMAT_VERSION, .0)]
    UnsupportedVersion(u32),
    #[error("snapshot from future version {0} (this build supports up to {FORMAT_VERSION})")]
    FutureVersion(u32),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
    #[error("grid is {width}x{height} but holds {found} cells")]
    CellCount { width: u32, height: u32, found: usize },
    #[error("machine table has {found} entries for {expected} cells")]
    MachineCount { expected: usize, found: usize },
    #[error("cell {0} is out of row-major order")]
    CellOrder(GridPosition),
    #[error("cell {at} names unknown machine {machine:?}")]
    UnknownMachine { at: GridPosition, machine: MachineTypeId },
    #[error("cell {0} and its machine entry disagree")]
    MachineMismatch(GridPosition),
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

// ---------------------------------------------------------------------------
// Snapshot header
// ---------------------------------------------------------------------------

/// Header prepended to every serialized snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u32,
    /// Tick count at the time the snapshot was taken.
    pub tick: u64,
}

impl SnapshotHeader {
    pub fn new(tick: u64) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: FORMAT_VERSION,
            tick,
        }
    }

    pub fn validate(&self) -> Result<(), DeserializeError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(DeserializeError::InvalidMagic(self.magic));
        }
        if self.version > FORMAT_VERSION {
            return Err(DeserializeError::FutureVersion(self.version));
        }
        if self.version < FORMAT_VERSION {
            return Err(DeserializeError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

/// Read just the header of a serialized snapshot. bitcode has no partial
/// decoding, so the whole payload is decoded.
pub fn read_snapshot_header(data: &[u8]) -> Result<SnapshotHeader, DeserializeError> {
    let snapshot: GridSnapshot =
        bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
    Ok(snapshot.header)
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Everything needed to resume a simulation. Excludes the event bus
/// (subscribers are closures) and the derived timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSnapshot {
    pub header: SnapshotHeader,
    pub grid: GridStore,
    /// Parallel to `grid.cells()`.
    pub machines: Vec<Option<Machine>>,
    pub wallet: Wallet,
    pub supply: WasteSupplyQueue,
    pub sim_state: SimState,
    pub rng: SimRng,
    pub paused: bool,
}

impl GridSnapshot {
    /// Check the snapshot's shape against itself and the registry.
    fn check(&self, registry: &Registry) -> Result<(), DeserializeError> {
        let (width, height) = (self.grid.width(), self.grid.height());
        let expected = width as usize * height as usize;
        let found = self.grid.cell_count();
        if found != expected {
            return Err(DeserializeError::CellCount { width, height, found });
        }
        if self.machines.len() != expected {
            return Err(DeserializeError::MachineCount {
                expected,
                found: self.machines.len(),
            });
        }

        for (index, (cell, machine)) in self.grid.cells().iter().zip(&self.machines).enumerate() {
            if self.grid.index_of(cell.position) != Some(index) {
                return Err(DeserializeError::CellOrder(cell.position));
            }
            let at = cell.position;
            match (cell.kind, cell.machine_type, machine) {
                (CellKind::Blank, None, None) => {}
                (CellKind::Machine, Some(machine_type), Some(machine)) => {
                    let def = registry
                        .get_machine(machine_type)
                        .ok_or(DeserializeError::UnknownMachine { at, machine: machine_type })?;
                    if def.kind != machine.kind() {
                        return Err(DeserializeError::MachineMismatch(at));
                    }
                }
                _ => return Err(DeserializeError::MachineMismatch(at)),
            }
        }

        self.grid.validate()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Engine integration
// ---------------------------------------------------------------------------

impl Engine {
    /// Capture the current state.
    pub fn snapshot(&self) -> GridSnapshot {
        GridSnapshot {
            header: SnapshotHeader::new(self.sim_state.tick),
            grid: self.grid.clone(),
            machines: self.machines.clone(),
            wallet: self.wallet.clone(),
            supply: self.supply.clone(),
            sim_state: self.sim_state.clone(),
            rng: self.rng.clone(),
            paused: self.paused,
        }
    }

    /// Rebuild an engine from a snapshot. The event bus starts empty.
    pub fn from_snapshot(
        registry: Arc<Registry>,
        config: EngineConfig,
        snapshot: GridSnapshot,
    ) -> Result<Self, DeserializeError> {
        snapshot.header.validate()?;
        if let Err(e) = snapshot.check(&registry) {
            warn!(target: "scrapline::snapshot", error = %e, "rejecting snapshot");
            return Err(e);
        }
        let GridSnapshot {
            grid,
            machines,
            wallet,
            supply,
            sim_state,
            rng,
            paused,
            ..
        } = snapshot;
        let mut engine = Engine::from_parts(
            registry, config, grid, machines, supply, wallet, rng, sim_state,
        );
        engine.paused = paused;
        Ok(engine)
    }

    /// Encode the current state as bytes.
    pub fn serialize(&self) -> Result<Vec<u8>, SerializeError> {
        let bytes =
            bitcode::serialize(&self.snapshot()).map_err(|e| SerializeError::Encode(e.to_string()))?;
        debug!(target: "scrapline::snapshot", tick = self.sim_state.tick, len = bytes.len(), "snapshot written");
        Ok(bytes)
    }

    /// Decode bytes written by [`Engine::serialize`].
    pub fn deserialize(
        registry: Arc<Registry>,
        config: EngineConfig,
        data: &[u8],
    ) -> Result<Self, DeserializeError> {
        let snapshot: GridSnapshot =
            bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))?;
        Self::from_snapshot(registry, config, snapshot)
    }
}
