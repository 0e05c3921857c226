//! Recipe resolution for processing machines.
//!
//! Processors match a recipe from the item they pull; fabricators use the
//! recipe the player selected. Neither path falls back to a default: a miss
//! is returned as `None` and reported by the caller.

use crate::id::{ItemTypeId, MachineTypeId, RecipeId};
use crate::registry::{MachineDef, RecipeDef, Registry};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Indexed view over the registry's recipe table.
#[derive(Debug, Clone)]
pub struct RecipeResolver {
    registry: Arc<Registry>,
    /// (machine, first input type) -> recipe. First registration wins.
    by_input: BTreeMap<(MachineTypeId, ItemTypeId), RecipeId>,
}

impl RecipeResolver {
    pub fn new(registry: Arc<Registry>) -> Self {
        let mut by_input = BTreeMap::new();
        for (id, recipe) in registry.recipes() {
            if let Some(first) = recipe.inputs.first() {
                by_input.entry((recipe.machine, first.item)).or_insert(id);
            }
        }
        Self { registry, by_input }
    }

    /// The registry this resolver indexes.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Single-input lookup used by processors.
    pub fn resolve(&self, machine: MachineTypeId, input: ItemTypeId) -> Option<(RecipeId, &RecipeDef)> {
        let id = *self.by_input.get(&(machine, input))?;
        self.registry.get_recipe(id).map(|r| (id, r))
    }

    /// Explicit lookup used by fabricators.
    pub fn resolve_by_id(&self, recipe: RecipeId) -> Option<&RecipeDef> {
        self.registry.get_recipe(recipe)
    }

    /// Every recipe bound to `machine`, for configuration menus.
    pub fn recipes_for(&self, machine: MachineTypeId) -> Vec<RecipeId> {
        self.registry
            .recipes()
            .filter(|(_, r)| r.machine == machine)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn machine(&self, machine: MachineTypeId) -> Option<&MachineDef> {
        self.registry.get_machine(machine)
    }
}
