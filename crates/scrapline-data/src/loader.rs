//! Resolution pipeline: reads data files, resolves cross-references, builds
//! the registry.
//!
//! A data directory holds `items`, `machines`, `recipes` and `crates`
//! (required) plus an optional `config`, each as `.ron`, `.json` or
//! `.toml`. List files are a top-level array in RON and JSON and a
//! `[[name]]` array of tables in TOML (`[[items]]`, `[[machines]]`, ...).

use crate::schema::{CountData, CrateData, ItemData, MachineData, RecipeData};
use scrapline_core::config::EngineConfig;
use scrapline_core::fixed::{Seconds, checked_fixed64};
use scrapline_core::id::ItemTypeId;
use scrapline_core::registry::{MachineDef, RecipeEntry, Registry, RegistryBuilder, RegistryError};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur during data loading.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// A required data file was not found in the given directory.
    #[error("required file '{file}' not found in {dir}")]
    MissingRequired { file: String, dir: PathBuf },

    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// A name reference could not be resolved.
    #[error("unresolved {expected_kind} reference '{name}' in {file}")]
    UnresolvedRef {
        file: PathBuf,
        name: String,
        expected_kind: &'static str,
    },

    #[error("duplicate name '{name}' in {file}")]
    DuplicateName { file: PathBuf, name: String },

    #[error("invalid value for '{name}' in {file}: {detail}")]
    InvalidValue {
        file: PathBuf,
        name: String,
        detail: String,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection and file discovery
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

impl Format {
    const ALL: [(Format, &'static str); 3] =
        [(Format::Ron, "ron"), (Format::Toml, "toml"), (Format::Json, "json")];
}

/// Detect the format of a file from its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    let ext = path.extension().and_then(|e| e.to_str());
    Format::ALL
        .iter()
        .find(|(_, e)| Some(*e) == ext)
        .map(|(f, _)| *f)
        .ok_or_else(|| DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        })
}

/// Find `{base_name}.{ron,toml,json}` in `dir`. More than one match is a
/// conflict; none is `Ok(None)`.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut matches = Format::ALL
        .iter()
        .map(|(_, ext)| dir.join(format!("{base_name}.{ext}")))
        .filter(|p| p.exists());
    let first = matches.next();
    if let (Some(a), Some(b)) = (first.clone(), matches.next()) {
        return Err(DataLoadError::ConflictingFormats { a, b });
    }
    Ok(first)
}

/// Like [`find_data_file`], but a missing file is an error.
pub fn require_data_file(dir: &Path, base_name: &str) -> Result<PathBuf, DataLoadError> {
    find_data_file(dir, base_name)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: base_name.to_string(),
        dir: dir.to_path_buf(),
    })
}

// ===========================================================================
// Deserialization
// ===========================================================================

fn parse_error(path: &Path, e: impl std::fmt::Display) -> DataLoadError {
    DataLoadError::Parse {
        file: path.to_path_buf(),
        detail: e.to_string(),
    }
}

/// Read a file and deserialize it according to its format.
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Toml => toml::from_str(&content).map_err(|e| parse_error(path, e)),
    }
}

/// Deserialize a list. TOML files hold it under `toml_key` in a top-level
/// table (an empty file is an empty list); RON and JSON hold it directly.
pub fn deserialize_list<T: DeserializeOwned>(
    path: &Path,
    toml_key: &str,
) -> Result<Vec<T>, DataLoadError> {
    if detect_format(path)? != Format::Toml {
        return deserialize_file(path);
    }
    let mut table: toml::Table = deserialize_file(path)?;
    match table.remove(toml_key) {
        Some(value) => value.try_into().map_err(|e: toml::de::Error| parse_error(path, e)),
        None if table.is_empty() => Ok(Vec::new()),
        None => Err(parse_error(path, format!("missing key '{toml_key}' in TOML file"))),
    }
}

// ===========================================================================
// Name resolution
// ===========================================================================

/// Look up a name, failing with `UnresolvedRef`.
pub fn resolve_name<'a, V>(
    map: &'a HashMap<String, V>,
    name: &str,
    file: &Path,
    expected_kind: &'static str,
) -> Result<&'a V, DataLoadError> {
    map.get(name).ok_or_else(|| DataLoadError::UnresolvedRef {
        file: file.to_path_buf(),
        name: name.to_string(),
        expected_kind,
    })
}

/// Fail with `DuplicateName` if `name` is already taken.
pub fn check_duplicate<V>(map: &HashMap<String, V>, name: &str, file: &Path) -> Result<(), DataLoadError> {
    if map.contains_key(name) {
        return Err(DataLoadError::DuplicateName {
            file: file.to_path_buf(),
            name: name.to_string(),
        });
    }
    Ok(())
}

fn seconds(value: f64, name: &str, file: &Path) -> Result<Seconds, DataLoadError> {
    checked_fixed64(value)
        .filter(|s| *s >= Seconds::ZERO)
        .ok_or_else(|| DataLoadError::InvalidValue {
            file: file.to_path_buf(),
            name: name.to_string(),
            detail: format!("time must be a non-negative number of seconds below 2^31, got {value}"),
        })
}

/// Reject config times the engine cannot represent.
fn check_config(config: &EngineConfig, file: &Path) -> Result<(), DataLoadError> {
    for (name, value) in [
        ("item_speed", config.item_speed),
        ("blank_item_timeout", config.blank_item_timeout),
        ("waiting_timeout", config.waiting_timeout),
        ("spawn_interval", config.spawn_interval),
    ] {
        seconds(value, name, file)?;
    }
    Ok(())
}

fn entries(
    counts: &[CountData],
    items: &HashMap<String, ItemTypeId>,
    file: &Path,
) -> Result<Vec<RecipeEntry>, DataLoadError> {
    counts
        .iter()
        .map(|(name, quantity)| {
            let item = *resolve_name(items, name, file, "item")?;
            Ok(RecipeEntry {
                item,
                quantity: *quantity,
            })
        })
        .collect()
}

// ===========================================================================
// Pipeline
// ===========================================================================

/// Everything loaded from a data directory.
#[derive(Debug)]
pub struct GameData {
    pub registry: Registry,
    pub config: EngineConfig,
}

/// Load a data directory into a registry and engine config.
pub fn load_game_data(dir: &Path) -> Result<GameData, DataLoadError> {
    let mut builder = RegistryBuilder::new();

    // Items.
    let items_path = require_data_file(dir, "items")?;
    let mut items: HashMap<String, ItemTypeId> = HashMap::new();
    for data in deserialize_list::<ItemData>(&items_path, "items")? {
        check_duplicate(&items, &data.name, &items_path)?;
        let display = data.display_name.as_deref().unwrap_or(&data.name);
        let id = builder.register_item(&data.name, display, data.sell_value);
        items.insert(data.name, id);
    }

    // Machines.
    let machines_path = require_data_file(dir, "machines")?;
    let mut machines = HashMap::new();
    for data in deserialize_list::<MachineData>(&machines_path, "machines")? {
        check_duplicate(&machines, &data.name, &machines_path)?;
        let base_process_time = seconds(data.base_process_time, &data.name, &machines_path)?;
        let id = builder.register_machine(MachineDef {
            name: data.name.clone(),
            kind: data.kind.into(),
            cost: data.cost,
            allowed_roles: data.allowed_roles.into_iter().map(Into::into).collect(),
            can_rotate: data.can_rotate,
            can_configure: data.can_configure,
            base_process_time,
        });
        machines.insert(data.name, id);
    }

    // Recipes.
    let recipes_path = require_data_file(dir, "recipes")?;
    let mut recipes = HashMap::new();
    for data in deserialize_list::<RecipeData>(&recipes_path, "recipes")? {
        check_duplicate(&recipes, &data.name, &recipes_path)?;
        let machine = *resolve_name(&machines, &data.machine, &recipes_path, "machine")?;
        let inputs = entries(&data.inputs, &items, &recipes_path)?;
        let outputs = entries(&data.outputs, &items, &recipes_path)?;
        let process_time = data
            .process_time
            .map(|t| seconds(t, &data.name, &recipes_path))
            .transpose()?;
        let id = builder.register_recipe(&data.name, machine, inputs, outputs, process_time);
        recipes.insert(data.name, id);
    }

    // Waste crates.
    let crates_path = require_data_file(dir, "crates")?;
    let mut crates = HashMap::new();
    for data in deserialize_list::<CrateData>(&crates_path, "crates")? {
        check_duplicate(&crates, &data.name, &crates_path)?;
        let contents = entries(&data.items, &items, &crates_path)?;
        let id = builder.register_crate(&data.name, data.cost, contents);
        crates.insert(data.name, id);
    }

    let config = match find_data_file(dir, "config")? {
        Some(path) => {
            debug!(target: "scrapline::data", file = %path.display(), "loading engine config");
            let config: EngineConfig = deserialize_file(&path)?;
            check_config(&config, &path)?;
            config
        }
        None => EngineConfig::default(),
    };

    let registry = builder.build()?;
    info!(
        target: "scrapline::data",
        dir = %dir.display(),
        items = registry.item_count(),
        machines = registry.machine_count(),
        recipes = registry.recipe_count(),
        crates = registry.crate_count(),
        "game data loaded"
    );
    Ok(GameData { registry, config })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use scrapline_core::fixed::f64_to_fixed64;
    use std::fs;

    /// Create a temporary directory with a unique name for test isolation.
    fn make_test_dir(suffix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "scrapline_data_test_{suffix}_{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn cleanup(dir: &Path) {
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn detect_formats() {
        assert_eq!(detect_format(Path::new("items.ron")).unwrap(), Format::Ron);
        assert_eq!(detect_format(Path::new("items.toml")).unwrap(), Format::Toml);
        assert_eq!(detect_format(Path::new("items.json")).unwrap(), Format::Json);
        assert!(matches!(
            detect_format(Path::new("items.yaml")),
            Err(DataLoadError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            detect_format(Path::new("items")),
            Err(DataLoadError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn find_data_file_cases() {
        let dir = make_test_dir("find");
        assert_eq!(find_data_file(&dir, "items").unwrap(), None);
        assert!(matches!(
            require_data_file(&dir, "items"),
            Err(DataLoadError::MissingRequired { .. })
        ));

        fs::write(dir.join("items.ron"), "[]").unwrap();
        assert_eq!(find_data_file(&dir, "items").unwrap(), Some(dir.join("items.ron")));

        fs::write(dir.join("items.json"), "[]").unwrap();
        assert!(matches!(
            find_data_file(&dir, "items"),
            Err(DataLoadError::ConflictingFormats { .. })
        ));
        cleanup(&dir);
    }

    #[test]
    fn toml_lists_live_under_a_key() {
        let dir = make_test_dir("toml_list");
        let path = dir.join("items.toml");
        fs::write(&path, "[[items]]\nname = \"can\"\n\n[[items]]\nname = \"paper\"\n").unwrap();
        let items: Vec<ItemData> = deserialize_list(&path, "items").unwrap();
        assert_eq!(items.len(), 2);

        let empty = dir.join("crates.toml");
        fs::write(&empty, "").unwrap();
        assert!(deserialize_list::<CrateData>(&empty, "crates").unwrap().is_empty());

        let wrong = dir.join("machines.toml");
        fs::write(&wrong, "[[belts]]\nname = \"x\"\n").unwrap();
        assert!(matches!(
            deserialize_list::<MachineData>(&wrong, "machines"),
            Err(DataLoadError::Parse { .. })
        ));
        cleanup(&dir);
    }

    #[test]
    fn unrepresentable_times_are_rejected() {
        let file = Path::new("m.ron");
        assert!(seconds(-1.0, "x", file).is_err());
        assert!(seconds(f64::NAN, "x", file).is_err());
        assert!(seconds(f64::INFINITY, "x", file).is_err());
        assert!(matches!(
            seconds(5.0e9, "slow", file),
            Err(DataLoadError::InvalidValue { ref name, .. }) if name == "slow"
        ));
        assert_eq!(seconds(2.5, "x", file).unwrap(), f64_to_fixed64(2.5));
    }

    #[test]
    fn huge_machine_time_fails_to_load() {
        let dir = make_test_dir("load_huge_time");
        write_ron_set(&dir);
        fs::write(
            dir.join("machines.ron"),
            r#"[(name: "shredder", kind: processor, cost: 25, base_process_time: 5.0e9)]"#,
        )
        .unwrap();
        let err = load_game_data(&dir).unwrap_err();
        assert!(matches!(err, DataLoadError::InvalidValue { ref name, .. } if name == "shredder"));
        cleanup(&dir);
    }

    #[test]
    fn huge_config_timeout_fails_to_load() {
        let dir = make_test_dir("load_huge_config");
        write_ron_set(&dir);
        fs::write(dir.join("config.ron"), "(waiting_timeout: 1e12)").unwrap();
        let err = load_game_data(&dir).unwrap_err();
        assert!(matches!(
            err,
            DataLoadError::InvalidValue { ref name, .. } if name == "waiting_timeout"
        ));
        cleanup(&dir);
    }

    const ITEMS_RON: &str = r#"[
        (name: "can", sell_value: 1),
        (name: "paper", display_name: Some("Paper"), sell_value: 1),
        (name: "shredded_aluminum", sell_value: 5),
    ]"#;

    const MACHINES_RON: &str = r#"[
        (name: "conveyor", kind: conveyor, cost: 5, can_rotate: true),
        (name: "spawner", kind: spawner, cost: 20, allowed_roles: [bottom], can_configure: true),
        (name: "shredder", kind: processor, cost: 25, can_rotate: true, base_process_time: 2.0),
        (name: "seller", kind: seller, cost: 10, allowed_roles: [top]),
    ]"#;

    const RECIPES_RON: &str = r#"[
        (name: "shred_can", machine: "shredder", inputs: [("can", 1)], outputs: [("shredded_aluminum", 1)]),
    ]"#;

    const CRATES_RON: &str = r#"[
        (name: "household", cost: 10, items: [("can", 2), ("paper", 1)]),
    ]"#;

    fn write_ron_set(dir: &Path) {
        fs::write(dir.join("items.ron"), ITEMS_RON).unwrap();
        fs::write(dir.join("machines.ron"), MACHINES_RON).unwrap();
        fs::write(dir.join("recipes.ron"), RECIPES_RON).unwrap();
        fs::write(dir.join("crates.ron"), CRATES_RON).unwrap();
    }

    #[test]
    fn load_ron_directory() {
        let dir = make_test_dir("load_ron");
        write_ron_set(&dir);

        let data = load_game_data(&dir).unwrap();
        let reg = &data.registry;
        assert_eq!(reg.item_count(), 3);
        assert_eq!(reg.machine_count(), 4);
        assert_eq!(data.config, EngineConfig::default());

        let paper = reg.item_id("paper").unwrap();
        assert_eq!(reg.get_item(paper).unwrap().display_name, "Paper");
        let can = reg.item_id("can").unwrap();
        assert_eq!(reg.get_item(can).unwrap().display_name, "can");

        let shredder = reg.machine_id("shredder").unwrap();
        let def = reg.get_machine(shredder).unwrap();
        assert_eq!(def.base_process_time, f64_to_fixed64(2.0));
        let spawner = reg.get_machine(reg.machine_id("spawner").unwrap()).unwrap();
        assert!(spawner.allowed_roles.contains(&scrapline_core::grid::CellRole::Bottom));

        let recipe = reg.get_recipe(reg.recipe_id("shred_can").unwrap()).unwrap();
        assert_eq!(recipe.machine, shredder);
        assert_eq!(recipe.process_time, None);
        assert_eq!(recipe.duration(def), f64_to_fixed64(2.0));

        let household = reg.get_crate(reg.crate_id("household").unwrap()).unwrap();
        assert_eq!(household.cost, 10);
        assert_eq!(household.items.len(), 2);
        cleanup(&dir);
    }

    #[test]
    fn load_mixed_formats_with_config() {
        let dir = make_test_dir("load_mixed");
        fs::write(
            dir.join("items.json"),
            r#"[{"name": "can", "sell_value": 2}, {"name": "bale", "sell_value": 30}]"#,
        )
        .unwrap();
        fs::write(
            dir.join("machines.toml"),
            "[[machines]]\nname = \"baler\"\nkind = \"fabricator\"\ncost = 30\nbase_process_time = 4.0\n",
        )
        .unwrap();
        fs::write(
            dir.join("recipes.ron"),
            r#"[(name: "press", machine: "baler", inputs: [("can", 3)], outputs: [("bale", 1)], process_time: Some(1.5))]"#,
        )
        .unwrap();
        fs::write(dir.join("crates.json"), "[]").unwrap();
        fs::write(dir.join("config.toml"), "item_speed = 2.0\nstarting_credits = 500\n").unwrap();

        let data = load_game_data(&dir).unwrap();
        assert_eq!(data.config.item_speed, 2.0);
        assert_eq!(data.config.starting_credits, 500);
        assert_eq!(data.config.waste_queue_limit, EngineConfig::default().waste_queue_limit);
        let recipe = data
            .registry
            .get_recipe(data.registry.recipe_id("press").unwrap())
            .unwrap();
        assert_eq!(recipe.process_time, Some(f64_to_fixed64(1.5)));
        assert_eq!(data.registry.crate_count(), 0);
        cleanup(&dir);
    }

    #[test]
    fn missing_table_is_reported() {
        let dir = make_test_dir("load_missing");
        write_ron_set(&dir);
        fs::remove_file(dir.join("crates.ron")).unwrap();
        let err = load_game_data(&dir).unwrap_err();
        assert!(matches!(err, DataLoadError::MissingRequired { ref file, .. } if file == "crates"));
        cleanup(&dir);
    }

    #[test]
    fn unresolved_item_in_recipe() {
        let dir = make_test_dir("load_unresolved");
        write_ron_set(&dir);
        fs::write(
            dir.join("recipes.ron"),
            r#"[(name: "shred_tin", machine: "shredder", inputs: [("tin", 1)])]"#,
        )
        .unwrap();
        let err = load_game_data(&dir).unwrap_err();
        assert!(matches!(
            err,
            DataLoadError::UnresolvedRef { ref name, expected_kind: "item", .. } if name == "tin"
        ));
        cleanup(&dir);
    }

    #[test]
    fn unresolved_machine_in_recipe() {
        let dir = make_test_dir("load_unresolved_machine");
        write_ron_set(&dir);
        fs::write(
            dir.join("recipes.ron"),
            r#"[(name: "melt", machine: "furnace", inputs: [("can", 1)])]"#,
        )
        .unwrap();
        let err = load_game_data(&dir).unwrap_err();
        assert!(matches!(err, DataLoadError::UnresolvedRef { expected_kind: "machine", .. }));
        cleanup(&dir);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let dir = make_test_dir("load_duplicate");
        write_ron_set(&dir);
        fs::write(dir.join("items.ron"), r#"[(name: "can"), (name: "can")]"#).unwrap();
        let err = load_game_data(&dir).unwrap_err();
        assert!(matches!(err, DataLoadError::DuplicateName { ref name, .. } if name == "can"));
        cleanup(&dir);
    }

    #[test]
    fn recipe_without_inputs_fails_registry_build() {
        let dir = make_test_dir("load_empty_recipe");
        write_ron_set(&dir);
        fs::write(
            dir.join("recipes.ron"),
            r#"[(name: "nothing", machine: "shredder", inputs: [])]"#,
        )
        .unwrap();
        let err = load_game_data(&dir).unwrap_err();
        assert!(matches!(err, DataLoadError::Registry(RegistryError::EmptyRecipe(_))));
        cleanup(&dir);
    }

    #[test]
    fn loaded_data_drives_an_engine() {
        use scrapline_core::engine::Engine;
        use scrapline_core::fixed::secs;
        use scrapline_core::grid::{Direction, GridPosition};
        use std::sync::Arc;

        let dir = make_test_dir("load_engine");
        write_ron_set(&dir);
        let data = load_game_data(&dir).unwrap();
        let reg = Arc::new(data.registry);
        let conveyor = reg.machine_id("conveyor").unwrap();
        let can = reg.item_id("can").unwrap();

        let mut engine = Engine::new(reg.clone(), data.config, 3, 5).unwrap();
        engine
            .place_machine(GridPosition::new(1, 2), conveyor, Direction::Up)
            .unwrap();
        engine.spawn_item(GridPosition::new(1, 2), can).unwrap();
        engine.run(4, secs(0.25));
        assert_eq!(engine.item_count(), 1);
        engine.validate().unwrap();
        cleanup(&dir);
    }

    #[test]
    fn error_messages_name_the_file() {
        let e = DataLoadError::UnresolvedRef {
            file: PathBuf::from("recipes.ron"),
            name: "tin_can".to_string(),
            expected_kind: "item",
        };
        let msg = e.to_string();
        assert!(msg.contains("tin_can") && msg.contains("recipes.ron"));

        let io: DataLoadError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(io, DataLoadError::Io(_)));
    }
}
