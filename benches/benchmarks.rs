//! Performance benchmarks for tether-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use tether_engine::{ChangeMessage, Collection, Delta, SyncMessage, TrackedItem, Value};

fn seed_record(i: u64) -> Value {
    Value::from(json!({
        "name": format!("User {}", i),
        "email": format!("user{}@test.com", i),
        "count": 0,
        "tags": ["a", "b"],
    }))
}

fn bench_tracking(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracking");

    group.bench_function("scalar_write", |b| {
        let mut item = TrackedItem::new("t-1", seed_record(0));
        let mut n = 0i64;
        b.iter(|| {
            n += 1;
            item.cursor().at("count").set(black_box(n))
        })
    });

    group.bench_function("nested_write", |b| {
        let mut item = TrackedItem::new("t-1", Value::from(json!({"a": {"b": {"c": 0}}})));
        let mut n = 0i64;
        b.iter(|| {
            n += 1;
            item.cursor().at("a").at("b").at("c").set(black_box(n))
        })
    });

    group.bench_function("sequence_push", |b| {
        b.iter(|| {
            let mut item = TrackedItem::new("t-1", Value::from(json!({"items": []})));
            for i in 0..100i64 {
                item.cursor().at("items").push(black_box(i)).unwrap();
            }
            item
        })
    });

    group.finish();
}

fn bench_delta(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta");

    for size in [10, 100, 500].iter() {
        group.bench_with_input(BenchmarkId::new("apply", size), size, |b, &size| {
            let mut delta = Delta::new();
            for i in 0..size {
                delta.set.insert(format!("field_{i}"), Value::Int(i64::from(i)));
            }
            let base = seed_record(0);

            b.iter(|| {
                let mut value = base.clone();
                delta.apply(black_box(&mut value)).unwrap();
                value
            })
        });

        group.bench_with_input(BenchmarkId::new("merge", size), size, |b, &size| {
            let mut target = Delta::new();
            let mut source = Delta::new();
            for i in 0..size {
                target.set.insert(format!("a_{i}"), Value::Int(1));
                source.set.insert(format!("b_{i}"), Value::Int(2));
            }

            b.iter(|| {
                let mut merged = target.clone();
                merged.merge(black_box(source.clone()));
                merged
            })
        });
    }

    group.finish();
}

fn bench_collection(c: &mut Criterion) {
    let mut group = c.benchmark_group("collection");

    group.bench_function("insert_and_flush", |b| {
        b.iter(|| {
            let mut collection = Collection::new();
            for i in 0..100 {
                collection.insert(seed_record(i), None).unwrap();
            }
            collection.flush().unwrap();
            collection
        })
    });

    group.bench_function("batched_updates", |b| {
        let mut collection = Collection::new();
        let item = collection.insert(seed_record(0), None).unwrap();
        collection.flush().unwrap();
        let mut n = 0i64;

        b.iter(|| {
            n += 1;
            collection
                .update(&item, |mut c| c.at("count").set(n), None)
                .unwrap();
            collection.flush()
        })
    });

    group.finish();
}

fn bench_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync");

    for size in [100u64, 500, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("drain_inserts", size), size, |b, &size| {
            b.iter(|| {
                let mut collection = Collection::new();
                for i in 0..size {
                    collection.handle_sync_message(SyncMessage::Change(ChangeMessage::insert(
                        format!("key_{i}"),
                        seed_record(i),
                        i + 1,
                    )));
                }
                collection.handle_sync_message(SyncMessage::up_to_date());
                collection
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_tracking, bench_delta, bench_collection, bench_sync);
criterion_main!(benches);
