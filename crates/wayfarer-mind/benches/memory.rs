//! Wayfarer memory benchmarks
//!
//! Hot paths the tick loop and the recall tool hit:
//! - Semantic recall over a filled store
//! - Remember with eviction at capacity
//! - Event buffer push under overflow

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;

use wayfarer_common::Priority;
use wayfarer_mind::{EventBuffer, MemoryContext, SemanticMemoryStore, TokenEmbedding};

const RESOURCES: [&str; 6] = ["iron_ore", "coal_ore", "oak_log", "wheat", "diamond_ore", "cobblestone"];

fn filled_store(capacity: usize) -> SemanticMemoryStore {
    let store = SemanticMemoryStore::new(Arc::new(TokenEmbedding::new(64)), capacity);
    for i in 0..capacity {
        let resource = RESOURCES[i % RESOURCES.len()];
        let mut tags = BTreeMap::new();
        tags.insert("type".to_string(), "resource".to_string());
        let context = MemoryContext::at_tick(i as u64).with_dimension("overworld");
        let _ = store.remember(
            &format!("found {} near camp {}", resource, i),
            tags,
            &context,
            "bench",
        );
    }
    store
}

fn bench_recall(c: &mut Criterion) {
    let mut group = c.benchmark_group("semantic_recall");
    group.measurement_time(Duration::from_secs(5));

    for capacity in [100usize, 1000].iter() {
        let store = filled_store(*capacity);
        let context = MemoryContext::at_tick(*capacity as u64 + 1);
        group.throughput(Throughput::Elements(*capacity as u64));

        group.bench_with_input(BenchmarkId::new("unfiltered", capacity), capacity, |b, _| {
            let filter = BTreeMap::new();
            b.iter(|| store.recall(black_box("where is iron ore"), &filter, &context, 5));
        });

        group.bench_with_input(BenchmarkId::new("tag_filtered", capacity), capacity, |b, _| {
            let mut filter = BTreeMap::new();
            filter.insert("type".to_string(), "resource".to_string());
            b.iter(|| store.recall(black_box("diamond"), &filter, &context, 5));
        });
    }

    group.finish();
}

fn bench_remember_at_capacity(c: &mut Criterion) {
    let store = filled_store(1000);
    let mut tick = 1000u64;

    c.bench_function("semantic_remember_evicting", |b| {
        b.iter(|| {
            tick += 1;
            let context = MemoryContext::at_tick(tick);
            store.remember(black_box("took damage near lava"), BTreeMap::new(), &context, "bench")
        });
    });
}

fn bench_event_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_buffer");

    group.bench_function("push_overflowing", |b| {
        let buffer = EventBuffer::new(64);
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            let priority = match n % 3 {
                0 => Priority::Low,
                1 => Priority::Normal,
                _ => Priority::Urgent,
            };
            buffer.push_at("entity_appear", json!({ "id": n }), priority, n)
        });
    });

    group.bench_function("fill_and_drain", |b| {
        let buffer = EventBuffer::new(64);
        b.iter(|| {
            for n in 0..64u64 {
                buffer.push_at("damage", json!({ "amount": 1.0 }), Priority::Normal, n);
            }
            black_box(buffer.drain_all())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_recall, bench_remember_at_capacity, bench_event_buffer);
criterion_main!(benches);
