//! Simulation benchmarks for lockstep_core.
//!
//! Run with: `cargo bench -p lockstep_core`

// Benchmark binaries don't need docs on macro-generated functions
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lockstep_core::math::GridPos;
use lockstep_core::pathfinding::find_path;
use lockstep_core::tech::Field;
use lockstep_test_utils::fixtures::{busy_skirmish, skirmish_world, step};

/// World ticks, hashing and save/restore on the skirmish content.
pub fn simulation_benchmark(c: &mut Criterion) {
    c.bench_function("busy_skirmish_100_ticks", |b| {
        b.iter_batched(
            busy_skirmish,
            |mut world| {
                step(&mut world, 100);
                black_box(world.frame_count())
            },
            criterion::BatchSize::SmallInput,
        );
    });

    let mut world = busy_skirmish();
    step(&mut world, 200);

    c.bench_function("state_hash", |b| b.iter(|| black_box(world.state_hash())));

    c.bench_function("world_serialize_round_trip", |b| {
        b.iter(|| {
            let bytes = world.serialize().unwrap_or_default();
            black_box(lockstep_core::world::World::deserialize(&bytes).is_ok())
        });
    });
}

/// A* across the skirmish map around both bases.
pub fn pathfinding_benchmark(c: &mut Criterion) {
    let world = skirmish_world();
    let map = world.map();
    c.bench_function("find_path_corner_to_corner", |b| {
        b.iter(|| {
            black_box(find_path(GridPos::new(1, 1), GridPos::new(30, 30), |p| {
                map.is_free_cell(p, Field::Land)
            }))
        });
    });
}

criterion_group!(benches, simulation_benchmark, pathfinding_benchmark);
criterion_main!(benches);
