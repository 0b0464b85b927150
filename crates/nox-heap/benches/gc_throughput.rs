use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nox_heap::{CellKind, FieldKind, GcConfig, Heap, Metadata, MetadataTable, Value};

const PAIR: CellKind = CellKind(1);
const LEAF: CellKind = CellKind(2);
const ARRAY: CellKind = CellKind(3);

fn bench_metadata() -> MetadataTable {
    let mut table = MetadataTable::new();
    table.register(
        PAIR,
        Metadata::builder(16)
            .field(0, FieldKind::Slot)
            .field(8, FieldKind::Slot)
            .build(),
    );
    table.register(LEAF, Metadata::builder(16).build());
    table.register(
        ARRAY,
        Metadata::builder(8).var_array(0, 8, FieldKind::Slot).build(),
    );
    table
}

fn bench_heap() -> Heap {
    let config = GcConfig {
        init_heap_size: 4 * 1024 * 1024,
        max_heap_size: 64 * 1024 * 1024,
        ..GcConfig::default()
    };
    Heap::new(config, bench_metadata()).unwrap()
}

fn bench_alloc_short_lived(c: &mut Criterion) {
    c.bench_function("alloc_short_lived_pairs", |b| {
        let mut heap = bench_heap();
        b.iter(|| {
            let pair = heap.alloc_cell(PAIR).unwrap();
            heap.set_value_field(pair, 0, Value::int(1));
            black_box(pair)
        });
    });
}

fn bench_minor_collection(c: &mut Criterion) {
    c.bench_function("minor_collection_10pct_survival", |b| {
        let mut heap = bench_heap();
        b.iter(|| {
            heap.scoped(|heap| {
                for i in 0..2048 {
                    let pair = heap.alloc_cell(PAIR).unwrap();
                    if i % 10 == 0 {
                        let _ = heap.make_handle(Value::object(pair));
                    }
                }
                heap.collect_minor();
            });
        });
    });
}

fn bench_full_collection(c: &mut Criterion) {
    c.bench_function("full_collection_live_graph", |b| {
        let mut heap = bench_heap();
        // A persistent object graph that every full cycle must trace.
        let array = heap.alloc_variable_cell(ARRAY, 1024).unwrap();
        let ha = heap.make_handle(Value::object(array));
        for i in 0..1024 {
            let pair = heap.alloc_cell(PAIR).unwrap();
            heap.set_value_field(pair, 0, Value::int(i));
            let array = ha.get(&heap).as_object().unwrap();
            heap.array_set(array, i as usize, Value::object(pair));
        }
        b.iter(|| {
            heap.collect_full();
            black_box(heap.old_used())
        });
    });
}

fn bench_write_barrier(c: &mut Criterion) {
    c.bench_function("field_store_with_barrier", |b| {
        let mut heap = bench_heap();
        let pair = heap.alloc_cell(PAIR).unwrap();
        let hp = heap.make_handle(Value::object(pair));
        heap.collect_full();
        let old_pair = hp.get(&heap).as_object().unwrap();
        let young = heap.alloc_cell(LEAF).unwrap();
        let value = Value::object(young);
        b.iter(|| {
            heap.set_value_field(old_pair, 0, black_box(value));
        });
    });
}

criterion_group!(
    benches,
    bench_alloc_short_lived,
    bench_minor_collection,
    bench_full_collection,
    bench_write_barrier
);
criterion_main!(benches);
