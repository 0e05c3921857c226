//! Serde data file structs for game content definitions.
//!
//! These structs define the on-disk format for items, machines, recipes,
//! and waste crates. They are deserialized from RON, JSON, or TOML data
//! files and then resolved into registry definitions by the loader.
//! Cross-references are by name; times are in seconds.

use scrapline_core::grid::CellRole;
use scrapline_core::registry::MachineKind;
use serde::Deserialize;

/// An `(item name, count)` pair, written as a two-element tuple/array.
pub type CountData = (String, u32);

// ===========================================================================
// Items
// ===========================================================================

/// An item type definition in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemData {
    pub name: String,
    /// Defaults to `name`.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Credits paid by a seller.
    #[serde(default)]
    pub sell_value: u64,
}

// ===========================================================================
// Machines
// ===========================================================================

/// Machine behaviour family, in snake_case on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineKindData {
    Conveyor,
    Spawner,
    Processor,
    Fabricator,
    Sorter,
    Seller,
}

impl From<MachineKindData> for MachineKind {
    fn from(kind: MachineKindData) -> Self {
        match kind {
            MachineKindData::Conveyor => MachineKind::Conveyor,
            MachineKindData::Spawner => MachineKind::Spawner,
            MachineKindData::Processor => MachineKind::Processor,
            MachineKindData::Fabricator => MachineKind::Fabricator,
            MachineKindData::Sorter => MachineKind::Sorter,
            MachineKindData::Seller => MachineKind::Seller,
        }
    }
}

/// Grid row a machine may be placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleData {
    Top,
    Bottom,
    Grid,
}

impl From<RoleData> for CellRole {
    fn from(role: RoleData) -> Self {
        match role {
            RoleData::Top => CellRole::Top,
            RoleData::Bottom => CellRole::Bottom,
            RoleData::Grid => CellRole::Grid,
        }
    }
}

/// A machine definition in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct MachineData {
    pub name: String,
    pub kind: MachineKindData,
    pub cost: u64,
    #[serde(default = "default_roles")]
    pub allowed_roles: Vec<RoleData>,
    #[serde(default)]
    pub can_rotate: bool,
    #[serde(default)]
    pub can_configure: bool,
    #[serde(default)]
    pub base_process_time: f64,
}

fn default_roles() -> Vec<RoleData> {
    vec![RoleData::Grid]
}

// ===========================================================================
// Recipes
// ===========================================================================

/// A recipe definition in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct RecipeData {
    pub name: String,
    /// Name of the machine that runs this recipe.
    pub machine: String,
    pub inputs: Vec<CountData>,
    #[serde(default)]
    pub outputs: Vec<CountData>,
    /// Omitted: the machine's base process time applies.
    #[serde(default)]
    pub process_time: Option<f64>,
}

// ===========================================================================
// Waste crates
// ===========================================================================

/// A purchasable waste crate in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct CrateData {
    pub name: String,
    pub cost: u64,
    pub items: Vec<CountData>,
}
