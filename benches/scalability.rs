//! Scalability benchmarks for the arena server
//!
//! Measures the tick pipeline and per-subscriber sync at growing snake counts.
//!
//! Run with: cargo bench --bench scalability

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use slither_arena_server::config::WorldConfig;
use slither_arena_server::game::constants::tick::DT;
use slither_arena_server::game::game_loop::{GameLoop, JoinRequest};
use slither_arena_server::game::rng::Seed;
use slither_arena_server::game::snake::Snake;
use slither_arena_server::game::state::GameState;
use slither_arena_server::game::systems::collision;
use slither_arena_server::net::delta::DeltaCompressor;
use slither_arena_server::settlement::DiscardSink;

const COUNTS: [u64; 4] = [50, 100, 250, 500];

/// Seeded loop with `count` joined snakes, advanced past the first tick
fn loop_with_snakes(count: u64) -> GameLoop {
    let mut game = GameLoop::new(
        GameState::new("bench", WorldConfig::default()),
        Arc::new(DiscardSink),
    );
    if let Ok(seed) = Seed::from_bytes([7; 32]) {
        let _ = game.apply_seed(seed);
    }
    for id in 1..=count {
        game.queue_join(JoinRequest {
            id,
            name: format!("Snake{}", id),
            identity: Some(format!("0x{:040x}", id)),
        });
    }
    for _ in 0..5 {
        game.tick_with_dt(DT);
    }
    game
}

/// One full tick: inputs, movement, pellets, collisions, snapshot
fn bench_full_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_tick");
    group.sample_size(30);

    for count in COUNTS {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("snakes", count), &count, |b, &count| {
            b.iter_batched(
                || loop_with_snakes(count),
                |mut game| black_box(game.tick_with_dt(DT)),
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

/// Body scan alone, the quadratic part of the tick
fn bench_snake_collisions(c: &mut Criterion) {
    let mut group = c.benchmark_group("snake_collisions");
    group.sample_size(50);

    for count in COUNTS {
        let game = loop_with_snakes(count);
        let snakes: Vec<&Snake> = game.state().alive_snakes().collect();

        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("scan", count), &count, |b, _| {
            b.iter(|| black_box(collision::detect_snake_collisions(&snakes)))
        });
    }
    group.finish();
}

/// Sync for 100 subscribers after one tick of movement
fn bench_delta_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta_sync");
    group.sample_size(30);

    for count in COUNTS {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("subscribers_100", count), &count, |b, &count| {
            b.iter_batched(
                || {
                    let mut game = loop_with_snakes(count);
                    let mut compressor = DeltaCompressor::new();
                    let first = game.tick_with_dt(DT).snapshot;
                    for subscriber in 0..100 {
                        compressor.update(subscriber, &first);
                    }
                    let next = game.tick_with_dt(DT).snapshot;
                    (compressor, next)
                },
                |(mut compressor, snapshot)| {
                    for subscriber in 0..100 {
                        black_box(compressor.update(subscriber, &snapshot));
                    }
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_full_tick, bench_snake_collisions, bench_delta_sync);

criterion_main!(benches);
