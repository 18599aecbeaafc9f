use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::NamedTempFile;

use ferrodb::common::types::Rid;
use ferrodb::index::btree::{BPlusTree, OrdComparator};
use ferrodb::storage::buffer::BufferPoolManager;
use ferrodb::transaction::Transaction;

fn create_tree(pool_size: usize) -> (Arc<BufferPoolManager>, NamedTempFile) {
    let file = NamedTempFile::new().unwrap();
    let pool = Arc::new(BufferPoolManager::new(pool_size, file.path()).unwrap());
    (pool, file)
}

fn bench_sequential_insert(c: &mut Criterion) {
    c.bench_function("btree_insert_1k_sequential", |b| {
        b.iter_with_setup(
            || {
                let (pool, file) = create_tree(512);
                let tree = BPlusTree::<i64, Rid>::new("bench", pool, OrdComparator).unwrap();
                (tree, file)
            },
            |(tree, _file)| {
                let mut txn = Transaction::new(1);
                for key in 0..1_000i64 {
                    tree.insert(key, Rid::new(1, key as u32), &mut txn).unwrap();
                }
            },
        );
    });
}

fn bench_point_lookup(c: &mut Criterion) {
    let (pool, _file) = create_tree(512);
    let tree = BPlusTree::<i64, Rid>::new("bench", pool, OrdComparator).unwrap();
    let mut txn = Transaction::new(1);
    for key in 0..10_000i64 {
        tree.insert(key, Rid::new(1, key as u32), &mut txn).unwrap();
    }

    c.bench_function("btree_get_value", |b| {
        let mut probe = 0i64;
        b.iter(|| {
            probe = (probe + 7919) % 10_000;
            let found = tree.get_value(black_box(&probe), &mut txn).unwrap();
            black_box(found);
        });
    });
}

fn bench_full_scan(c: &mut Criterion) {
    let (pool, _file) = create_tree(512);
    let tree = BPlusTree::<i64, Rid>::new("bench", pool, OrdComparator).unwrap();
    let mut txn = Transaction::new(1);
    for key in 0..10_000i64 {
        tree.insert(key, Rid::new(1, key as u32), &mut txn).unwrap();
    }

    c.bench_function("btree_scan_10k", |b| {
        b.iter(|| {
            let count = tree.iter().unwrap().count();
            black_box(count);
        });
    });
}

criterion_group!(
    benches,
    bench_sequential_insert,
    bench_point_lookup,
    bench_full_scan
);
criterion_main!(benches);
