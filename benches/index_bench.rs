//! Benchmarks for TimeIndex
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use tempfile::tempdir;
use timeindex::events::NoopSink;
use timeindex::index::{Lifetime, Selector};
use timeindex::registry::DataTypeRegistry;
use timeindex::storage::{IndexItem, IndexKind, IndexSpec, IndexStore, StoreContext};
use timeindex::timestamp::{codec, Scale, Timestamp, TimestampKind};

fn bench_context() -> StoreContext {
    StoreContext {
        registry: Arc::new(DataTypeRegistry::builtin()),
        events: Arc::new(NoopSink),
        sync_on_commit: false,
    }
}

fn ts(units: i64) -> Timestamp {
    Timestamp::absolute(Scale::Millis, units).unwrap()
}

fn filled_store(spec: IndexSpec, count: i64) -> IndexStore {
    let store = IndexStore::create(spec, bench_context()).unwrap();
    store.activate().unwrap();
    for i in 0..count {
        store
            .add_item(IndexItem::with_bytes(ts(i * 10), vec![0u8; 64]))
            .unwrap();
    }
    store
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    let kinds = [
        TimestampKind::ABSOLUTE_SECONDS,
        TimestampKind::ABSOLUTE_NANOS,
        TimestampKind::ELAPSED_MILLIS,
    ];
    for kind in kinds {
        let timestamp = Timestamp::new(kind, 1_700_000_000, 0).unwrap();
        let bits = timestamp.to_bits();

        group.bench_function(format!("encode_{}", kind), |b| {
            b.iter(|| codec::encode_timestamp(black_box(&timestamp)))
        });
        group.bench_function(format!("decode_{}", kind), |b| {
            b.iter(|| codec::decode(black_box(bits)).unwrap())
        });
    }

    group.finish();
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");
    group.throughput(Throughput::Elements(1));

    group.bench_function("incore", |b| {
        let store = filled_store(IndexSpec::in_core("bench"), 0);
        let mut i = 0;
        b.iter(|| {
            i += 1;
            store
                .add_item(IndexItem::with_bytes(ts(i), vec![0u8; 64]))
                .unwrap()
        });
    });

    for kind in [IndexKind::Inline, IndexKind::External] {
        group.bench_function(format!("{}", kind), |b| {
            let dir = tempdir().unwrap();
            let store = filled_store(IndexSpec::file(kind, "bench", dir.path()), 0);
            let mut i = 0;
            b.iter(|| {
                i += 1;
                store
                    .add_item(IndexItem::with_bytes(ts(i), vec![0u8; 64]))
                    .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_locate(c: &mut Criterion) {
    let mut group = c.benchmark_group("locate");

    for size in [1_000, 100_000] {
        let store = filled_store(IndexSpec::in_core("bench"), size);
        let query = ts(size * 5 + 3);

        group.bench_function(format!("resident_{}", size), |b| {
            b.iter(|| {
                store
                    .locate(black_box(query), Selector::Data, Lifetime::Continuous)
                    .unwrap()
            })
        });
    }

    let dir = tempdir().unwrap();
    let spec = IndexSpec::file(IndexKind::External, "locate", dir.path());
    filled_store(spec.clone(), 100_000).close().unwrap();
    let store = IndexStore::open(spec, bench_context()).unwrap();
    let query = ts(500_003);

    group.bench_function("hollow_100000", |b| {
        b.iter(|| {
            store
                .locate(black_box(query), Selector::Data, Lifetime::Continuous)
                .unwrap()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_codec, bench_append, bench_locate);
criterion_main!(benches);
