//! Integration tests for the Scrapline simulation engine.
//!
//! These tests drive whole factories through `Engine::step`: spawning,
//! conveying, queueing at processors, fabricating, sorting, selling, crate
//! supply, and snapshots.

use scrapline_core::config::EngineConfig;
use scrapline_core::engine::Engine;
use scrapline_core::error::SimError;
use scrapline_core::event::{DestroyReason, Event, EventKind};
use scrapline_core::fixed::secs;
use scrapline_core::grid::{CellRole, Direction, GridPosition};
use scrapline_core::machine::Machine;
use scrapline_core::registry::{MachineDef, MachineKind, RegistryBuilder};
use scrapline_core::test_utils::*;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

fn pos(x: i32, y: i32) -> GridPosition {
    GridPosition::new(x, y)
}

fn record(engine: &mut Engine, kind: EventKind) -> Rc<RefCell<Vec<Event>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    engine.on_passive(kind, Box::new(move |e| sink.borrow_mut().push(e.clone())));
    log
}

/// Run in quarter-second ticks, checking the grid invariants after each.
fn run_checked(engine: &mut Engine, seconds: u64) {
    for _ in 0..seconds * 4 {
        engine.step(secs(0.25));
        engine.validate().unwrap();
    }
}

/// Vertical line in column `x`: spawner on the bottom row, `middle` from
/// bottom to top, seller on the top row. Everything faces Up.
fn build_column(fx: &Fixture, engine: &mut Engine, x: i32, middle: &[scrapline_core::id::MachineTypeId]) {
    let bottom = engine.grid().height() as i32 - 1;
    engine.place_machine(pos(x, bottom), fx.spawner, Direction::Up).unwrap();
    for (i, &machine) in middle.iter().enumerate() {
        engine.place_machine(pos(x, bottom - 1 - i as i32), machine, Direction::Up).unwrap();
    }
    engine.place_machine(pos(x, 0), fx.seller, Direction::Up).unwrap();
}

// ===========================================================================
// Scenario A: a crate yields exactly its contents, then waits for supply
// ===========================================================================

#[test]
fn crate_yields_exactly_its_contents() {
    let fx = Fixture::new();
    let mut engine = fx.engine(3, 5);
    build_column(&fx, &mut engine, 1, &[fx.conveyor, fx.conveyor, fx.conveyor]);
    engine.load_spawner(pos(1, 4), fx.household).unwrap();
    let created = record(&mut engine, EventKind::ItemCreated);

    run_checked(&mut engine, 20);
    assert_eq!(created.borrow().len(), 2);
    let spawner = engine.machine(pos(1, 4)).and_then(Machine::as_spawner).unwrap();
    assert!(spawner.is_empty());

    // Still nothing without new supply.
    run_checked(&mut engine, 5);
    assert_eq!(created.borrow().len(), 2);

    engine.purchase_crate(fx.household).unwrap();
    run_checked(&mut engine, 20);
    assert_eq!(created.borrow().len(), 4);
    assert!(engine.supply().is_empty());
}

// ===========================================================================
// Scenario B: spawner -> conveyor chain -> seller on a 5x7 grid
// ===========================================================================

#[test]
fn conveyor_chain_delivers_to_seller() {
    let fx = Fixture::new();
    let mut engine = fx.engine(5, 7);
    build_column(&fx, &mut engine, 2, &[fx.conveyor; 5]);
    engine.load_spawner(pos(2, 6), fx.household).unwrap();
    let balance = engine.wallet().balance();
    let destroyed = record(&mut engine, EventKind::ItemDestroyed);

    run_checked(&mut engine, 20);

    let destroyed = destroyed.borrow();
    assert_eq!(destroyed.len(), 2);
    for event in destroyed.iter() {
        assert!(matches!(
            event,
            Event::ItemDestroyed {
                at,
                reason: DestroyReason::Sold,
                ..
            } if *at == pos(2, 0)
        ));
    }
    let spawner = engine.machine(pos(2, 6)).and_then(Machine::as_spawner).unwrap();
    assert!(spawner.is_empty());
    assert_eq!(engine.item_count(), 0);

    let can_value = fx.registry.get_item(fx.can).unwrap().sell_value;
    assert_eq!(engine.wallet().balance(), balance + 2 * can_value);
}

// ===========================================================================
// Scenario C: a full waste queue rejects purchases without side effects
// ===========================================================================

#[test]
fn full_queue_rejects_purchase() {
    let fx = Fixture::new();
    let mut engine = fx.engine_with(
        3,
        3,
        EngineConfig {
            waste_queue_limit: 1,
            ..Default::default()
        },
    );
    engine.purchase_crate(fx.household).unwrap();
    let balance = engine.wallet().balance();

    assert_eq!(
        engine.purchase_crate(fx.household),
        Err(SimError::QueueFull { limit: 1 })
    );
    assert_eq!(engine.wallet().balance(), balance);
    assert_eq!(engine.supply().len(), 1);
}

// ===========================================================================
// Scenario D: waiting too long at a processor evicts the item
// ===========================================================================

#[test]
fn waiting_item_is_evicted_after_timeout() {
    let fx = Fixture::new();
    let mut engine = fx.engine(3, 5);
    engine.place_machine(pos(1, 3), fx.conveyor, Direction::Up).unwrap();
    engine.place_machine(pos(1, 2), fx.shredder, Direction::Up).unwrap();
    let destroyed = record(&mut engine, EventKind::ItemDestroyed);
    // The shredder has no recipe for paper, so it never pulls it.
    let paper = engine.spawn_item(pos(1, 3), fx.paper).unwrap();

    run_checked(&mut engine, 5);
    assert_eq!(engine.waiting_at(pos(1, 2)), &[paper]);
    assert!(engine.items_at(pos(1, 3)).is_empty());
    assert!(engine.item(paper).unwrap().is_pullable());

    run_checked(&mut engine, 15);
    assert!(engine.item(paper).is_none());
    assert!(engine.waiting_at(pos(1, 2)).is_empty());
    assert!(engine.items_at(pos(1, 3)).is_empty());
    assert!(destroyed.borrow().iter().any(|e| matches!(
        e,
        Event::ItemDestroyed {
            reason: DestroyReason::WaitTimeout,
            ..
        }
    )));
}

// ===========================================================================
// Processing chains
// ===========================================================================

#[test]
fn shredder_line_conserves_recipe_counts() {
    let fx = Fixture::new();
    let mut engine = fx.engine(3, 6);
    build_column(&fx, &mut engine, 1, &[fx.conveyor, fx.shredder, fx.conveyor, fx.conveyor]);
    engine.load_spawner(pos(1, 5), fx.household).unwrap();
    let balance = engine.wallet().balance();
    let completed = record(&mut engine, EventKind::ProcessingCompleted);
    let sold = record(&mut engine, EventKind::ItemSold);

    run_checked(&mut engine, 30);

    assert_eq!(completed.borrow().len(), 2);
    let sold = sold.borrow();
    assert_eq!(sold.len(), 2);
    assert!(sold.iter().all(|e| matches!(
        e,
        Event::ItemSold { item_type, .. } if *item_type == fx.shredded_aluminum
    )));
    let value = fx.registry.get_item(fx.shredded_aluminum).unwrap().sell_value;
    assert_eq!(engine.wallet().balance(), balance + 2 * value);
    assert_eq!(engine.item_count(), 0);
}

#[test]
fn fabricator_presses_a_full_batch() {
    let fx = Fixture::new();
    let mut engine = fx.engine(3, 3);
    engine.place_machine(pos(1, 1), fx.baler, Direction::Up).unwrap();
    engine.place_machine(pos(1, 0), fx.seller, Direction::Up).unwrap();
    engine.select_fabricator_recipe(pos(1, 1), fx.press_bale).unwrap();
    let balance = engine.wallet().balance();

    let first = engine.inject_item(pos(1, 1), fx.can).unwrap();
    engine.inject_item(pos(1, 1), fx.paper).unwrap();
    run_checked(&mut engine, 2);
    // Half a batch: nothing pulled.
    assert_eq!(engine.waiting_at(pos(1, 1)).len(), 2);
    assert!(engine.item(first).unwrap().is_pullable());

    engine.inject_item(pos(1, 1), fx.can).unwrap();
    run_checked(&mut engine, 8);

    assert!(engine.waiting_at(pos(1, 1)).is_empty());
    assert_eq!(engine.item_count(), 0);
    let bale = fx.registry.get_item(fx.aluminum_bale).unwrap().sell_value;
    assert_eq!(engine.wallet().balance(), balance + bale);
}

#[test]
fn fabricator_rejects_recipe_of_another_machine() {
    let fx = Fixture::new();
    let mut engine = fx.engine(3, 3);
    engine.place_machine(pos(1, 1), fx.baler, Direction::Up).unwrap();
    assert_eq!(
        engine.select_fabricator_recipe(pos(1, 1), fx.shred_can),
        Err(SimError::RecipeMachineMismatch {
            recipe: fx.shred_can,
            machine: fx.baler,
        })
    );
    engine.place_machine(pos(0, 1), fx.conveyor, Direction::Up).unwrap();
    assert_eq!(
        engine.select_fabricator_recipe(pos(0, 1), fx.press_bale),
        Err(SimError::NotConfigurable(pos(0, 1)))
    );
}

// ===========================================================================
// Routing, timeouts, placement
// ===========================================================================

#[test]
fn sorter_routes_by_item_type() {
    let fx = Fixture::new();
    let mut engine = fx.engine(3, 4);
    engine.place_machine(pos(1, 2), fx.sorter, Direction::Up).unwrap();
    engine
        .configure_sorter(pos(1, 2), Some(fx.can), Some(fx.bottle))
        .unwrap();
    let can = engine.spawn_item(pos(1, 2), fx.can).unwrap();
    let bottle = engine.spawn_item(pos(1, 2), fx.bottle).unwrap();
    let paper = engine.spawn_item(pos(1, 2), fx.paper).unwrap();

    run_checked(&mut engine, 2);
    assert_eq!(engine.items_at(pos(0, 2)), &[can]);
    assert_eq!(engine.items_at(pos(2, 2)), &[bottle]);
    assert_eq!(engine.items_at(pos(1, 1)), &[paper]);
}

#[test]
fn blank_cells_evict_idle_items() {
    let fx = Fixture::new();
    let mut engine = fx.engine(3, 3);
    let id = engine.spawn_item(pos(1, 1), fx.can).unwrap();
    run_checked(&mut engine, 9);
    assert!(engine.item(id).is_some());
    run_checked(&mut engine, 2);
    assert!(engine.item(id).is_none());
}

#[test]
fn conveyor_never_pushes_off_the_grid() {
    let fx = Fixture::new();
    let mut engine = fx.engine(3, 3);
    engine.place_machine(pos(0, 1), fx.conveyor, Direction::Left).unwrap();
    let id = engine.spawn_item(pos(0, 1), fx.can).unwrap();
    run_checked(&mut engine, 15);
    // A conveyor is not blank, so the stuck item is never evicted.
    assert!(engine.item(id).unwrap().is_idle());
    assert_eq!(engine.items_at(pos(0, 1)), &[id]);
}

#[test]
fn spawners_never_accept_items() {
    let fx = Fixture::new();
    let mut engine = fx.engine(3, 3);
    engine.place_machine(pos(1, 1), fx.conveyor, Direction::Down).unwrap();
    engine.place_machine(pos(1, 2), fx.spawner, Direction::Up).unwrap();
    let id = engine.spawn_item(pos(1, 1), fx.can).unwrap();
    run_checked(&mut engine, 3);
    assert_eq!(engine.items_at(pos(1, 1)), &[id]);
}

#[test]
fn removing_a_spawner_returns_its_unopened_crate() {
    let fx = Fixture::new();
    let mut engine = fx.engine(3, 3);
    engine.place_machine(pos(1, 2), fx.spawner, Direction::Up).unwrap();
    engine.load_spawner(pos(1, 2), fx.household).unwrap();
    engine.remove_machine(pos(1, 2)).unwrap();
    assert_eq!(engine.supply().iter().collect::<Vec<_>>(), vec![fx.household]);
}

// ===========================================================================
// Recovery
// ===========================================================================

fn def(name: &str, kind: MachineKind, roles: &[CellRole], can_rotate: bool) -> MachineDef {
    MachineDef {
        name: name.to_string(),
        kind,
        cost: 1,
        allowed_roles: roles.to_vec(),
        can_rotate,
        can_configure: kind == MachineKind::Spawner,
        base_process_time: secs(0.0),
    }
}

#[test]
fn rotatable_spawner_resumes_after_facing_off_the_grid() {
    let mut b = RegistryBuilder::new();
    let can = b.register_item("can", "Aluminum Can", 3);
    let chute = b.register_machine(def("chute", MachineKind::Spawner, &[CellRole::Bottom], true));
    let conveyor = b.register_machine(def("conveyor", MachineKind::Conveyor, &[CellRole::Grid], true));
    let seller = b.register_machine(def("seller", MachineKind::Seller, &[CellRole::Top], false));
    let bin = b.register_crate("bin", 1, vec![entry(can, 2)]);
    let registry = Arc::new(b.build().unwrap());

    let mut engine = Engine::new(registry, EngineConfig::default(), 3, 3).unwrap();
    engine.place_machine(pos(1, 2), chute, Direction::Down).unwrap();
    engine.place_machine(pos(1, 1), conveyor, Direction::Up).unwrap();
    engine.place_machine(pos(1, 0), seller, Direction::Up).unwrap();
    engine.load_spawner(pos(1, 2), bin).unwrap();
    let created = record(&mut engine, EventKind::ItemCreated);
    let sold = record(&mut engine, EventKind::ItemSold);

    // The first item has nowhere to go, so the chute holds it and stops.
    run_checked(&mut engine, 4);
    assert_eq!(created.borrow().len(), 1);
    let stuck = engine.items_at(pos(1, 2)).to_vec();
    assert_eq!(stuck.len(), 1);
    assert!(engine.item(stuck[0]).unwrap().is_idle());

    engine.rotate_machine(pos(1, 2), Direction::Up).unwrap();
    run_checked(&mut engine, 10);
    assert_eq!(created.borrow().len(), 2);
    assert_eq!(sold.borrow().len(), 2);
    assert_eq!(engine.item_count(), 0);
    let spawner = engine.machine(pos(1, 2)).and_then(Machine::as_spawner).unwrap();
    assert!(spawner.is_empty());
}

#[test]
fn stray_item_on_a_processor_is_processed_in_place() {
    let fx = Fixture::new();
    let mut engine = fx.engine(3, 3);
    engine.place_machine(pos(1, 1), fx.shredder, Direction::Up).unwrap();
    engine.place_machine(pos(1, 0), fx.seller, Direction::Up).unwrap();
    let sold = record(&mut engine, EventKind::ItemSold);
    let can = engine.spawn_item(pos(1, 1), fx.can).unwrap();

    run_checked(&mut engine, 6);
    assert!(engine.item(can).is_none());
    let sold = sold.borrow();
    assert_eq!(sold.len(), 1);
    assert!(matches!(
        sold[0],
        Event::ItemSold { item_type, .. } if item_type == fx.shredded_aluminum
    ));
}

#[test]
fn unusable_input_never_leaves_a_fabricator() {
    let fx = Fixture::new();
    let mut engine = fx.engine(3, 3);
    engine.place_machine(pos(1, 1), fx.baler, Direction::Up).unwrap();
    engine.place_machine(pos(1, 0), fx.seller, Direction::Up).unwrap();
    engine.select_fabricator_recipe(pos(1, 1), fx.press_bale).unwrap();
    let moved = record(&mut engine, EventKind::ItemMoved);
    let sold = record(&mut engine, EventKind::ItemSold);
    let destroyed = record(&mut engine, EventKind::ItemDestroyed);
    let paper = engine.spawn_item(pos(1, 1), fx.paper).unwrap();

    run_checked(&mut engine, 5);
    assert_eq!(engine.waiting_at(pos(1, 1)), &[paper]);
    assert!(engine.item(paper).unwrap().is_pullable());

    run_checked(&mut engine, 12);
    assert!(engine.item(paper).is_none());
    assert!(sold.borrow().is_empty());
    assert!(!moved.borrow().iter().any(|e| matches!(
        e,
        Event::ItemMoved { item, target, .. } if *item == paper && *target == pos(1, 0)
    )));
    assert!(destroyed.borrow().iter().any(|e| matches!(
        e,
        Event::ItemDestroyed {
            item,
            reason: DestroyReason::WaitTimeout,
            ..
        } if *item == paper
    )));
}

#[test]
fn oversized_timing_values_run_without_overflow() {
    let fx = Fixture::new();
    let config = EngineConfig {
        item_speed: 1.0e12,
        waiting_timeout: 1.0e12,
        blank_item_timeout: f64::INFINITY,
        ..EngineConfig::default()
    };
    let mut engine = fx.engine_with(3, 4, config);
    engine.place_machine(pos(1, 2), fx.conveyor, Direction::Up).unwrap();
    engine.place_machine(pos(1, 1), fx.shredder, Direction::Up).unwrap();
    let paper = engine.spawn_item(pos(1, 2), fx.paper).unwrap();
    let loose = engine.spawn_item(pos(0, 1), fx.can).unwrap();

    run_checked(&mut engine, 40);
    // Neither timeout can elapse.
    assert_eq!(engine.waiting_at(pos(1, 1)), &[paper]);
    assert!(engine.item(loose).unwrap().is_idle());

    engine.step(secs(1.0e12));
    engine.step(secs(1.0e12));
    engine.validate().unwrap();
    assert!(engine.clock() > secs(40.0));
}

// ===========================================================================
// Determinism and snapshots
// ===========================================================================

fn metal_line(fx: &Fixture) -> Engine {
    let mut engine = fx.engine(3, 6);
    build_column(fx, &mut engine, 1, &[fx.conveyor, fx.shredder, fx.conveyor, fx.conveyor]);
    engine.load_spawner(pos(1, 5), fx.metal_scrap).unwrap();
    engine
}

#[test]
fn identical_runs_have_identical_hashes() {
    let fx = Fixture::new();
    let mut a = metal_line(&fx);
    let mut b = metal_line(&fx);
    for _ in 0..60 {
        a.step(secs(0.25));
        b.step(secs(0.25));
        assert_eq!(a.state_hash(), b.state_hash());
    }
}

#[test]
fn snapshot_mid_run_resumes_identically() {
    let fx = Fixture::new();
    let mut original = metal_line(&fx);
    original.run(9, secs(0.25));

    let bytes = original.serialize().unwrap();
    let mut restored =
        Engine::deserialize(fx.registry.clone(), EngineConfig::default(), &bytes).unwrap();
    restored.validate().unwrap();
    assert_eq!(restored.serialize().unwrap(), bytes);

    original.run(120, secs(0.25));
    restored.run(120, secs(0.25));
    assert_eq!(original.state_hash(), restored.state_hash());
    assert_eq!(original.wallet().balance(), restored.wallet().balance());
    assert_eq!(original.item_count(), restored.item_count());
}
