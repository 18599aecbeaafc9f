use std::sync::Arc;
use std::thread;

use ferrodb::storage::buffer::ExtendibleHashTable;

#[test]
fn test_insert_then_find() {
    let table = ExtendibleHashTable::new(4);
    for i in 0..200u32 {
        table.insert(i, i * 3);
    }
    for i in 0..200u32 {
        assert_eq!(table.find(&i), Some(i * 3));
    }
    assert_eq!(table.find(&999), None);
}

#[test]
fn test_remove() {
    let table = ExtendibleHashTable::new(4);
    for i in 0..50u32 {
        table.insert(i, i);
    }
    for i in 0..50u32 {
        assert!(table.remove(&i));
        assert_eq!(table.find(&i), None);
        assert!(!table.remove(&i));
    }
}

#[test]
fn test_split_grows_directory() {
    // Three entries overflow a bucket of two and force the first split
    let table = ExtendibleHashTable::new(2);
    table.insert(0u32, 'a');
    table.insert(1u32, 'b');
    table.insert(2u32, 'c');

    assert!(table.global_depth() >= 1);
    assert_eq!(table.num_buckets(), 2);
    assert_eq!(table.find(&0), Some('a'));
    assert_eq!(table.find(&1), Some('b'));
    assert_eq!(table.find(&2), Some('c'));
}

#[test]
fn test_directory_invariants_hold_throughout() {
    let table = ExtendibleHashTable::new(2);
    for i in 0..512u64 {
        table.insert(i, i);

        let global = table.global_depth();
        assert_eq!(table.directory_size(), 1usize << global);
        for slot in 0..table.directory_size() {
            assert!(table.local_depth(slot) <= global);
        }
    }
    for i in 0..512u64 {
        assert_eq!(table.find(&i), Some(i));
    }
}

#[test]
fn test_concurrent_disjoint_key_ranges() {
    const THREADS: u64 = 8;
    const OPS: u64 = 10_000;

    let table = Arc::new(ExtendibleHashTable::new(4));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let table = table.clone();
            thread::spawn(move || {
                let base = t * OPS;
                for i in 0..OPS {
                    let key = base + i;
                    table.insert(key, key * 2);
                    assert_eq!(table.find(&key), Some(key * 2));
                    // Drop a third of the keys again
                    if i % 3 == 0 {
                        assert!(table.remove(&key));
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Post-hoc: surviving keys are intact, removed keys are gone, nothing
    // was lost or duplicated across concurrent splits
    for t in 0..THREADS {
        for i in 0..OPS {
            let key = t * OPS + i;
            if i % 3 == 0 {
                assert_eq!(table.find(&key), None);
            } else {
                assert_eq!(table.find(&key), Some(key * 2));
            }
        }
    }
}

#[test]
fn test_concurrent_inserts_same_range_overwrite() {
    let table = Arc::new(ExtendibleHashTable::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let table = table.clone();
            thread::spawn(move || {
                for i in 0..1000u32 {
                    table.insert(i, i);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    for i in 0..1000u32 {
        assert_eq!(table.find(&i), Some(i));
    }
}
