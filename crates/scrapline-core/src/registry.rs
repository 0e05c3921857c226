//! Static definition tables: items, machines, recipes, and waste crates.
//!
//! Built once through [`RegistryBuilder`] and frozen into an immutable
//! [`Registry`] that the engine shares behind an `Arc`.

use crate::fixed::Seconds;
use crate::grid::CellRole;
use crate::id::*;
use std::collections::HashMap;

/// An item type definition.
#[derive(Debug, Clone)]
pub struct ItemDef {
    pub name: String,
    pub display_name: String,
    /// Credits paid when a Seller accepts one of these.
    pub sell_value: u64,
}

/// Behaviour family of a machine definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum MachineKind {
    Conveyor,
    Spawner,
    Processor,
    Fabricator,
    Sorter,
    Seller,
}

impl MachineKind {
    /// Processor-family machines pause incoming items at the midpoint and
    /// pull them from a waiting queue.
    pub fn is_processor_family(self) -> bool {
        matches!(self, MachineKind::Processor | MachineKind::Fabricator)
    }
}

/// A placeable machine definition.
#[derive(Debug, Clone)]
pub struct MachineDef {
    pub name: String,
    pub kind: MachineKind,
    pub cost: u64,
    pub allowed_roles: Vec<CellRole>,
    pub can_rotate: bool,
    pub can_configure: bool,
    /// Fallback process time for recipes that do not set their own.
    pub base_process_time: Seconds,
}

impl MachineDef {
    pub fn allows(&self, role: CellRole) -> bool {
        self.allowed_roles.contains(&role)
    }
}

/// A recipe input/output entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeEntry {
    pub item: ItemTypeId,
    pub quantity: u32,
}

/// A recipe definition. Bound to one machine type.
#[derive(Debug, Clone)]
pub struct RecipeDef {
    pub name: String,
    pub machine: MachineTypeId,
    pub inputs: Vec<RecipeEntry>,
    pub outputs: Vec<RecipeEntry>,
    /// `None` uses the machine's base process time.
    pub process_time: Option<Seconds>,
}

impl RecipeDef {
    /// The process time to apply on `machine`.
    pub fn duration(&self, machine: &MachineDef) -> Seconds {
        self.process_time.unwrap_or(machine.base_process_time)
    }
}

/// A purchasable waste crate: a fixed list of spawnable item counts.
#[derive(Debug, Clone)]
pub struct WasteCrateDef {
    pub name: String,
    pub cost: u64,
    pub items: Vec<RecipeEntry>,
}

/// Builder for constructing an immutable Registry.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    items: Vec<ItemDef>,
    item_name_to_id: HashMap<String, ItemTypeId>,
    machines: Vec<MachineDef>,
    machine_name_to_id: HashMap<String, MachineTypeId>,
    recipes: Vec<RecipeDef>,
    recipe_name_to_id: HashMap<String, RecipeId>,
    crates: Vec<WasteCrateDef>,
    crate_name_to_id: HashMap<String, CrateId>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an item type. Returns its ID.
    pub fn register_item(&mut self, name: &str, display_name: &str, sell_value: u64) -> ItemTypeId {
        let id = ItemTypeId(self.items.len() as u32);
        self.items.push(ItemDef {
            name: name.to_string(),
            display_name: display_name.to_string(),
            sell_value,
        });
        self.item_name_to_id.insert(name.to_string(), id);
        id
    }

    /// Register a machine definition. Returns its ID.
    pub fn register_machine(&mut self, def: MachineDef) -> MachineTypeId {
        let id = MachineTypeId(self.machines.len() as u32);
        self.machine_name_to_id.insert(def.name.clone(), id);
        self.machines.push(def);
        id
    }

    /// Register a recipe for `machine`. Returns its ID.
    pub fn register_recipe(
        &mut self,
        name: &str,
        machine: MachineTypeId,
        inputs: Vec<RecipeEntry>,
        outputs: Vec<RecipeEntry>,
        process_time: Option<Seconds>,
    ) -> RecipeId {
        let id = RecipeId(self.recipes.len() as u32);
        self.recipes.push(RecipeDef {
            name: name.to_string(),
            machine,
            inputs,
            outputs,
            process_time,
        });
        self.recipe_name_to_id.insert(name.to_string(), id);
        id
    }

    /// Register a waste crate. Returns its ID.
    pub fn register_crate(&mut self, name: &str, cost: u64, items: Vec<RecipeEntry>) -> CrateId {
        let id = CrateId(self.crates.len() as u32);
        self.crates.push(WasteCrateDef {
            name: name.to_string(),
            cost,
            items,
        });
        self.crate_name_to_id.insert(name.to_string(), id);
        id
    }

    /// Mutate an existing recipe by name.
    pub fn mutate_recipe<F>(&mut self, name: &str, f: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut RecipeDef),
    {
        let id = self
            .recipe_name_to_id
            .get(name)
            .ok_or(RegistryError::NotFound(name.to_string()))?;
        f(&mut self.recipes[id.0 as usize]);
        Ok(())
    }

    /// Mutate an existing machine definition by name.
    pub fn mutate_machine<F>(&mut self, name: &str, f: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut MachineDef),
    {
        let id = self
            .machine_name_to_id
            .get(name)
            .ok_or(RegistryError::NotFound(name.to_string()))?;
        f(&mut self.machines[id.0 as usize]);
        Ok(())
    }

    pub fn item_id(&self, name: &str) -> Option<ItemTypeId> {
        self.item_name_to_id.get(name).copied()
    }

    pub fn machine_id(&self, name: &str) -> Option<MachineTypeId> {
        self.machine_name_to_id.get(name).copied()
    }

    pub fn recipe_id(&self, name: &str) -> Option<RecipeId> {
        self.recipe_name_to_id.get(name).copied()
    }

    pub fn crate_id(&self, name: &str) -> Option<CrateId> {
        self.crate_name_to_id.get(name).copied()
    }

    /// Finalize and build the immutable registry.
    pub fn build(self) -> Result<Registry, RegistryError> {
        let item_ok = |id: ItemTypeId| (id.0 as usize) < self.items.len();

        for recipe in &self.recipes {
            if recipe.machine.0 as usize >= self.machines.len() {
                return Err(RegistryError::InvalidMachineRef(recipe.machine));
            }
            if recipe.inputs.is_empty() {
                return Err(RegistryError::EmptyRecipe(recipe.name.clone()));
            }
            if recipe.inputs.iter().chain(&recipe.outputs).any(|e| e.quantity == 0) {
                return Err(RegistryError::ZeroQuantity(recipe.name.clone()));
            }
            // A Processor pulls and consumes exactly one item per run.
            let kind = self.machines[recipe.machine.0 as usize].kind;
            if kind == MachineKind::Processor
                && !matches!(recipe.inputs.as_slice(), [only] if only.quantity == 1)
            {
                return Err(RegistryError::ProcessorRecipeShape(recipe.name.clone()));
            }
            for entry in recipe.inputs.iter().chain(recipe.outputs.iter()) {
                if !item_ok(entry.item) {
                    return Err(RegistryError::InvalidItemRef(entry.item));
                }
            }
        }
        for def in &self.crates {
            for entry in &def.items {
                if !item_ok(entry.item) {
                    return Err(RegistryError::InvalidItemRef(entry.item));
                }
            }
        }

        Ok(Registry {
            items: self.items,
            item_name_to_id: self.item_name_to_id,
            machines: self.machines,
            machine_name_to_id: self.machine_name_to_id,
            recipes: self.recipes,
            recipe_name_to_id: self.recipe_name_to_id,
            crates: self.crates,
            crate_name_to_id: self.crate_name_to_id,
        })
    }
}

/// Immutable registry. Frozen after build().
#[derive(Debug)]
pub struct Registry {
    items: Vec<ItemDef>,
    item_name_to_id: HashMap<String, ItemTypeId>,
    machines: Vec<MachineDef>,
    machine_name_to_id: HashMap<String, MachineTypeId>,
    recipes: Vec<RecipeDef>,
    recipe_name_to_id: HashMap<String, RecipeId>,
    crates: Vec<WasteCrateDef>,
    crate_name_to_id: HashMap<String, CrateId>,
}

impl Registry {
    pub fn get_item(&self, id: ItemTypeId) -> Option<&ItemDef> {
        self.items.get(id.0 as usize)
    }

    pub fn get_machine(&self, id: MachineTypeId) -> Option<&MachineDef> {
        self.machines.get(id.0 as usize)
    }

    pub fn get_recipe(&self, id: RecipeId) -> Option<&RecipeDef> {
        self.recipes.get(id.0 as usize)
    }

    pub fn get_crate(&self, id: CrateId) -> Option<&WasteCrateDef> {
        self.crates.get(id.0 as usize)
    }

    pub fn item_id(&self, name: &str) -> Option<ItemTypeId> {
        self.item_name_to_id.get(name).copied()
    }

    pub fn machine_id(&self, name: &str) -> Option<MachineTypeId> {
        self.machine_name_to_id.get(name).copied()
    }

    pub fn recipe_id(&self, name: &str) -> Option<RecipeId> {
        self.recipe_name_to_id.get(name).copied()
    }

    pub fn crate_id(&self, name: &str) -> Option<CrateId> {
        self.crate_name_to_id.get(name).copied()
    }

    /// All recipes in registration order.
    pub fn recipes(&self) -> impl Iterator<Item = (RecipeId, &RecipeDef)> {
        self.recipes
            .iter()
            .enumerate()
            .map(|(i, r)| (RecipeId(i as u32), r))
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn machine_count(&self) -> usize {
        self.machines.len()
    }

    pub fn recipe_count(&self) -> usize {
        self.recipes.len()
    }

    pub fn crate_count(&self) -> usize {
        self.crates.len()
    }

    /// Behaviour family of a machine type, if defined.
    pub fn machine_kind(&self, id: MachineTypeId) -> Option<MachineKind> {
        self.get_machine(id).map(|m| m.kind)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid item reference: {0:?}")]
    InvalidItemRef(ItemTypeId),
    #[error("invalid machine reference: {0:?}")]
    InvalidMachineRef(MachineTypeId),
    #[error("recipe '{0}' has no inputs")]
    EmptyRecipe(String),
    #[error("recipe '{0}' lists an item with quantity 0")]
    ZeroQuantity(String),
    #[error("recipe '{0}' runs on a processor and must take exactly one input item")]
    ProcessorRecipeShape(String),
}
