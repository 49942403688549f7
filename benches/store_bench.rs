use criterion::{criterion_group, criterion_main, Criterion};

use norkv::{
    collector_cleanup, Config, Granularity, InitFlags, MemFlash, PageId, Store,
    VariableUniqueKeyStorage,
};

const BENCH: PageId = PageId::from_bytes(*b"BNCH");

fn bench_store() -> Store<MemFlash> {
    let flash = MemFlash::new(64 * 4096, 4096, Granularity::Word);
    let mut store = Store::mount(
        flash,
        Config::default(),
        InitFlags {
            reset: true,
            ..InitFlags::default()
        },
    )
    .unwrap();
    store.register_collector(BENCH, 0, collector_cleanup);
    store
}

pub fn measure_replace(c: &mut Criterion) {
    let mut store = bench_store();
    let storage = VariableUniqueKeyStorage::new(BENCH);
    let mut value: u64 = 0;

    c.bench_function("replace 16b", |b| {
        b.iter(|| {
            value += 1;
            let bytes = [value.to_le_bytes(), value.to_le_bytes()].concat();
            if storage.set(&mut store, 7, &bytes).is_err() {
                store.maintenance();
                storage.set(&mut store, 7, &bytes).unwrap();
            }
            store.maintenance();
        })
    });
}

pub fn measure_lookup(c: &mut Criterion) {
    let mut store = bench_store();
    let storage = VariableUniqueKeyStorage::new(BENCH);
    for key in 1..=100_u32 {
        storage.set(&mut store, key, &key.to_le_bytes()).unwrap();
    }

    c.bench_function("lookup of 100", |b| {
        b.iter(|| {
            let rec = store.find_newest_first(BENCH, 50).unwrap();
            assert_eq!(store.payload(rec).len(), 4);
        })
    });
}

criterion_group!(writes, measure_replace);
criterion_group!(reads, measure_lookup);
criterion_main!(writes, reads);
