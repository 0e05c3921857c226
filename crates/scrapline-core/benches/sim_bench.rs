//! Criterion benchmarks for the Scrapline simulation engine.
//!
//! Two benchmark groups:
//! - `conveyor_field`: 32 columns of spawner -> conveyors -> seller
//! - `processing_field`: the same columns with a shredder mid-way, so most
//!   items spend time in waiting queues

use criterion::{Criterion, criterion_group, criterion_main};
use scrapline_core::config::EngineConfig;
use scrapline_core::engine::Engine;
use scrapline_core::fixed::secs;
use scrapline_core::grid::{Direction, GridPosition};
use scrapline_core::test_utils::*;

const COLUMNS: u32 = 32;
const HEIGHT: u32 = 24;

/// One line per column. Column `x` gets a shredder on row `shredder_row`
/// if given.
fn build_field(fx: &Fixture, shredder_row: Option<i32>) -> Engine {
    let config = EngineConfig {
        starting_credits: 1_000_000,
        waste_queue_limit: COLUMNS as usize,
        ..Default::default()
    };
    let mut engine = fx.engine_with(COLUMNS, HEIGHT, config);
    let bottom = HEIGHT as i32 - 1;

    for x in 0..COLUMNS as i32 {
        engine
            .place_machine(GridPosition::new(x, bottom), fx.spawner, Direction::Up)
            .unwrap();
        for y in 1..bottom {
            let machine = if Some(y) == shredder_row {
                fx.shredder
            } else {
                fx.conveyor
            };
            engine
                .place_machine(GridPosition::new(x, y), machine, Direction::Up)
                .unwrap();
        }
        engine
            .place_machine(GridPosition::new(x, 0), fx.seller, Direction::Up)
            .unwrap();
        engine
            .load_spawner(GridPosition::new(x, bottom), fx.metal_scrap)
            .unwrap();
    }

    // Warm up so the lines are populated.
    engine.run(8, secs(0.25));
    engine
}

fn bench_conveyor_field(c: &mut Criterion) {
    let fx = Fixture::new();
    let mut group = c.benchmark_group("conveyor_field");
    group.bench_function("step", |b| {
        let mut engine = build_field(&fx, None);
        b.iter(|| engine.step(secs(0.05)));
    });
    group.finish();
}

fn bench_processing_field(c: &mut Criterion) {
    let fx = Fixture::new();
    let mut group = c.benchmark_group("processing_field");
    group.bench_function("step", |b| {
        let mut engine = build_field(&fx, Some(HEIGHT as i32 / 2));
        b.iter(|| engine.step(secs(0.05)));
    });
    group.bench_function("serialize", |b| {
        let engine = build_field(&fx, Some(HEIGHT as i32 / 2));
        b.iter(|| engine.serialize().unwrap());
    });
    group.finish();
}

criterion_group!(benches, bench_conveyor_field, bench_processing_field);
criterion_main!(benches);
