use crate::fixed::Seconds;
use crate::grid::GridPosition;
use crate::id::{CrateId, ItemTypeId, MachineTypeId, RecipeId};

/// Errors returned by player-facing engine operations. Failures inside the
/// tick loop are logged instead and never surface here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimError {
    #[error("cannot place {machine:?} at {at}: {reason}")]
    InvalidPlacement {
        at: GridPosition,
        machine: MachineTypeId,
        reason: PlacementIssue,
    },
    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },
    #[error("no recipe for {item:?} on machine {machine:?}")]
    MissingRecipe {
        machine: MachineTypeId,
        item: ItemTypeId,
    },
    #[error("unknown machine definition {0:?}")]
    MissingMachineDefinition(MachineTypeId),
    #[error("unknown waste crate {0:?}")]
    MissingCrateDefinition(CrateId),
    #[error("unknown recipe {0:?}")]
    UnknownRecipe(RecipeId),
    #[error("recipe {recipe:?} does not run on machine {machine:?}")]
    RecipeMachineMismatch {
        recipe: RecipeId,
        machine: MachineTypeId,
    },
    #[error("waste queue is full ({limit} crates)")]
    QueueFull { limit: usize },
    #[error("no cell at {0}")]
    NoSuchCell(GridPosition),
    #[error("cell {0} holds no machine accepting that configuration")]
    NotConfigurable(GridPosition),
    #[error("item waited {waited}s at a machine")]
    Timeout { waited: Seconds },
    #[error("cannot build a {width}x{height} grid")]
    InvalidDimensions { width: u32, height: u32 },
}

/// Why a placement was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PlacementIssue {
    #[error("out of bounds")]
    OutOfBounds,
    #[error("role not allowed")]
    RoleNotAllowed,
    #[error("cell occupied")]
    Occupied,
}
