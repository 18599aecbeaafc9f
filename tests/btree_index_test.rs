use std::sync::Arc;
use std::thread;

use anyhow::Result;
use rand::seq::SliceRandom;
use rand::thread_rng;

use ferrodb::common::types::Rid;
use ferrodb::index::btree::{BPlusTree, OrdComparator};
use ferrodb::transaction::Transaction;

mod common;
use common::create_test_buffer_pool;

fn rid_for(key: i32) -> Rid {
    Rid::new(1000 + key as u32, key as u32)
}

#[test]
fn test_insert_and_get() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(64)?;
    let tree = BPlusTree::<i32, Rid>::new("pk", buffer_pool, OrdComparator)?;
    let mut txn = Transaction::new(1);

    assert!(tree.is_empty());
    for key in [5, 3, 8, 2, 7] {
        assert!(tree.insert(key, rid_for(key), &mut txn)?);
    }
    assert!(!tree.is_empty());

    for key in [5, 3, 8, 2, 7] {
        assert_eq!(tree.get_value(&key, &mut txn)?, Some(rid_for(key)));
    }
    assert_eq!(tree.get_value(&100, &mut txn)?, None);
    Ok(())
}

#[test]
fn test_duplicate_insert_returns_false() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(64)?;
    let tree = BPlusTree::<i32, Rid>::new("pk", buffer_pool, OrdComparator)?;
    let mut txn = Transaction::new(1);

    assert!(tree.insert(1, rid_for(1), &mut txn)?);
    assert!(!tree.insert(1, Rid::new(9, 9), &mut txn)?);
    // The original mapping is untouched
    assert_eq!(tree.get_value(&1, &mut txn)?, Some(rid_for(1)));
    Ok(())
}

#[test]
fn test_insert_remove_round_trip() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(64)?;
    let tree = BPlusTree::<i32, Rid>::new("pk", buffer_pool, OrdComparator)?;
    let mut txn = Transaction::new(1);

    tree.insert(42, rid_for(42), &mut txn)?;
    assert_eq!(tree.get_value(&42, &mut txn)?, Some(rid_for(42)));

    tree.remove(&42, &mut txn)?;
    assert_eq!(tree.get_value(&42, &mut txn)?, None);

    // Removing a missing key is a no-op
    tree.remove(&42, &mut txn)?;
    Ok(())
}

#[test]
fn test_small_fanout_insert_scan_remove() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(64)?;
    let tree =
        BPlusTree::<i32, Rid>::with_max_sizes("pk", buffer_pool, OrdComparator, 4, 4)?;
    let mut txn = Transaction::new(1);

    for key in 1..=10 {
        assert!(tree.insert(key, rid_for(key), &mut txn)?);
    }

    let keys: Vec<i32> = tree.iter()?.map(|(k, _)| k).collect();
    assert_eq!(keys, (1..=10).collect::<Vec<_>>());

    for key in (1..=10).filter(|k| k % 2 == 1) {
        tree.remove(&key, &mut txn)?;
    }

    let keys: Vec<i32> = tree.iter()?.map(|(k, _)| k).collect();
    assert_eq!(keys, vec![2, 4, 6, 8, 10]);

    for key in [2, 4, 6, 8, 10] {
        assert_eq!(tree.get_value(&key, &mut txn)?, Some(rid_for(key)));
    }
    for key in [1, 3, 5, 7, 9] {
        assert_eq!(tree.get_value(&key, &mut txn)?, None);
    }
    Ok(())
}

#[test]
fn test_descending_insert_keeps_order() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(64)?;
    let tree =
        BPlusTree::<i32, Rid>::with_max_sizes("pk", buffer_pool, OrdComparator, 4, 4)?;
    let mut txn = Transaction::new(1);

    for key in (1..=50).rev() {
        assert!(tree.insert(key, rid_for(key), &mut txn)?);
    }

    let keys: Vec<i32> = tree.iter()?.map(|(k, _)| k).collect();
    assert_eq!(keys, (1..=50).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_iter_from_positions_at_first_not_less() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(64)?;
    let tree =
        BPlusTree::<i32, Rid>::with_max_sizes("pk", buffer_pool, OrdComparator, 4, 4)?;
    let mut txn = Transaction::new(1);

    for key in (2..=20).step_by(2) {
        tree.insert(key as i32, rid_for(key as i32), &mut txn)?;
    }

    // Exact hit
    let keys: Vec<i32> = tree.iter_from(&8)?.map(|(k, _)| k).collect();
    assert_eq!(keys, vec![8, 10, 12, 14, 16, 18, 20]);

    // Between keys: starts at the next larger one
    let keys: Vec<i32> = tree.iter_from(&9)?.map(|(k, _)| k).collect();
    assert_eq!(keys, vec![10, 12, 14, 16, 18, 20]);

    // Past the end
    let keys: Vec<i32> = tree.iter_from(&21)?.map(|(k, _)| k).collect();
    assert!(keys.is_empty());
    Ok(())
}

#[test]
fn test_random_workload() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(256)?;
    let tree =
        BPlusTree::<i32, Rid>::with_max_sizes("pk", buffer_pool, OrdComparator, 8, 8)?;
    let mut txn = Transaction::new(1);

    let mut keys: Vec<i32> = (0..500).collect();
    keys.shuffle(&mut thread_rng());
    for &key in &keys {
        assert!(tree.insert(key, rid_for(key), &mut txn)?);
    }

    // Remove a shuffled half
    let mut to_remove = keys[..250].to_vec();
    to_remove.shuffle(&mut thread_rng());
    for &key in &to_remove {
        tree.remove(&key, &mut txn)?;
    }

    let mut expected: Vec<i32> = keys[250..].to_vec();
    expected.sort_unstable();
    let scanned: Vec<i32> = tree.iter()?.map(|(k, _)| k).collect();
    assert_eq!(scanned, expected);

    for &key in &expected {
        assert_eq!(tree.get_value(&key, &mut txn)?, Some(rid_for(key)));
    }
    for &key in &to_remove {
        assert_eq!(tree.get_value(&key, &mut txn)?, None);
    }
    Ok(())
}

#[test]
fn test_remove_everything_then_reuse() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(64)?;
    let tree =
        BPlusTree::<i32, Rid>::with_max_sizes("pk", buffer_pool, OrdComparator, 4, 4)?;
    let mut txn = Transaction::new(1);

    for key in 0..40 {
        tree.insert(key, rid_for(key), &mut txn)?;
    }
    for key in 0..40 {
        tree.remove(&key, &mut txn)?;
    }
    assert!(tree.is_empty());
    assert_eq!(tree.iter()?.count(), 0);

    // The emptied tree accepts a fresh generation of keys
    for key in 100..120 {
        assert!(tree.insert(key, rid_for(key), &mut txn)?);
    }
    let keys: Vec<i32> = tree.iter()?.map(|(k, _)| k).collect();
    assert_eq!(keys, (100..120).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_root_survives_reopen_by_name() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(64)?;

    {
        let tree = BPlusTree::<i32, Rid>::new("orders_pk", buffer_pool.clone(), OrdComparator)?;
        let mut txn = Transaction::new(1);
        for key in 0..10 {
            tree.insert(key, rid_for(key), &mut txn)?;
        }
    }

    // A new handle over the same pool finds the root through the header page
    let reopened = BPlusTree::<i32, Rid>::new("orders_pk", buffer_pool, OrdComparator)?;
    assert!(!reopened.is_empty());
    let mut txn = Transaction::new(2);
    for key in 0..10 {
        assert_eq!(reopened.get_value(&key, &mut txn)?, Some(rid_for(key)));
    }
    Ok(())
}

#[test]
fn test_concurrent_disjoint_inserts() -> Result<()> {
    const THREADS: i32 = 4;
    const PER_THREAD: i32 = 200;

    let (buffer_pool, _file) = create_test_buffer_pool(256)?;
    let tree = Arc::new(BPlusTree::<i32, Rid>::with_max_sizes(
        "pk",
        buffer_pool,
        OrdComparator,
        8,
        8,
    )?);

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let tree = tree.clone();
            thread::spawn(move || {
                let mut txn = Transaction::new(t as u32 + 1);
                for i in 0..PER_THREAD {
                    let key = t * PER_THREAD + i;
                    assert!(tree.insert(key, rid_for(key), &mut txn).unwrap());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // All keys present, in strictly ascending order
    let keys: Vec<i32> = tree.iter()?.map(|(k, _)| k).collect();
    assert_eq!(keys, (0..THREADS * PER_THREAD).collect::<Vec<_>>());

    let mut txn = Transaction::new(99);
    for key in 0..THREADS * PER_THREAD {
        assert_eq!(tree.get_value(&key, &mut txn)?, Some(rid_for(key)));
    }
    Ok(())
}

#[test]
fn test_concurrent_readers_during_inserts() -> Result<()> {
    let (buffer_pool, _file) = create_test_buffer_pool(256)?;
    let tree = Arc::new(BPlusTree::<i32, Rid>::with_max_sizes(
        "pk",
        buffer_pool,
        OrdComparator,
        8,
        8,
    )?);

    // Seed half the keyspace, then read it while a writer fills the rest
    {
        let mut txn = Transaction::new(1);
        for key in 0..300 {
            tree.insert(key, rid_for(key), &mut txn)?;
        }
    }

    let writer = {
        let tree = tree.clone();
        thread::spawn(move || {
            let mut txn = Transaction::new(2);
            for key in 300..600 {
                tree.insert(key, rid_for(key), &mut txn).unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..3)
        .map(|r| {
            let tree = tree.clone();
            thread::spawn(move || {
                let mut txn = Transaction::new(10 + r);
                for round in 0..5 {
                    for key in 0..300 {
                        let found = tree.get_value(&key, &mut txn).unwrap();
                        assert_eq!(found, Some(rid_for(key)), "round {}", round);
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    let keys: Vec<i32> = tree.iter()?.map(|(k, _)| k).collect();
    assert_eq!(keys, (0..600).collect::<Vec<_>>());
    Ok(())
}
