//! Integration tests for the block cache store
//!
//! These run a real store against a temp directory and check the behaviour
//! callers rely on: round trips, idempotent writes, rejection, corruption
//! purging, pin-aware LRU eviction, resizing and persistence.

use burrow_blockstore::{
    BadBlockReason, BlockStoreError, CacheConfig, CacheStore, ContentKey, SteppingClock,
};
use proptest::prelude::*;
use rstest::rstest;
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const CLUSTER: u64 = 4096;

fn config(dir: &Path, clusters: u64) -> CacheConfig {
    CacheConfig::new(dir)
        .with_size(clusters * CLUSTER)
        .with_allocation_unit(CLUSTER)
}

fn open(dir: &Path, clusters: u64) -> CacheStore {
    CacheStore::open_with_clock(config(dir, clusters), Arc::new(SteppingClock::default())).unwrap()
}

fn block(seed: u32, len: usize) -> (ContentKey, Vec<u8>) {
    let mut data = Vec::with_capacity(len);
    let mut x = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    for _ in 0..len {
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        data.push(x as u8);
    }
    (ContentKey::sha512(&data), data)
}

/// Overwrite bytes of a stored block's first cluster from outside the store
fn corrupt(store: &CacheStore, key: &ContentKey) {
    let cluster = store.allocation_of(key).unwrap().clusters[0];
    let mut file = OpenOptions::new()
        .write(true)
        .open(store.config().blocks_path())
        .unwrap();
    file.seek(SeekFrom::Start(cluster * CLUSTER)).unwrap();
    file.write_all(b"garbage").unwrap();
    file.sync_all().unwrap();
}

fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[rstest]
#[case(1)]
#[case(4095)]
#[case(4096)]
#[case(4097)]
#[case(3 * 4096)]
fn test_round_trip_across_cluster_boundaries(#[case] len: usize) {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 16);
    let (key, data) = block(len as u32, len);

    store.put(&key, &data).unwrap();
    assert_eq!(store.get(&key).unwrap().as_ref(), data.as_slice());
    assert_eq!(
        store.allocation_of(&key).unwrap().clusters.len(),
        len.div_ceil(CLUSTER as usize)
    );
}

#[test]
fn test_write_idempotence() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 8);
    let (key, data) = block(1, 9000);

    store.put(&key, &data).unwrap();
    let allocation = store.allocation_of(&key).unwrap();
    let stats = store.stats();

    store.put(&key, &data).unwrap();
    assert_eq!(store.allocation_of(&key).unwrap(), allocation);
    assert_eq!(store.stats(), stats);
}

#[test]
fn test_rejects_oversized_block() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(config(dir.path(), 8).with_max_block_size(1000)).unwrap();
    let (key, data) = block(2, 1001);

    let err = store.put(&key, &data).unwrap_err();
    assert!(matches!(
        err,
        BlockStoreError::BadBlock {
            reason: BadBlockReason::TooLarge { size: 1001, max: 1000 },
            ..
        }
    ));
    assert!(store.is_empty());
}

#[test_log::test]
fn test_corruption_is_purged() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 8);
    let (key, data) = block(3, 6000);
    let (other, other_data) = block(4, 100);

    store.put(&key, &data).unwrap();
    store.put(&other, &other_data).unwrap();
    corrupt(&store, &key);

    assert!(matches!(store.get(&key), Err(BlockStoreError::BlockNotFound(_))));
    assert!(!store.contains(&key));
    assert_eq!(store.buffer_pool().outstanding(), 0);

    // Untouched blocks stay readable and the purged clusters are reusable
    assert_eq!(store.get(&other).unwrap().as_ref(), other_data.as_slice());
    store.put(&key, &data).unwrap();
    assert_eq!(store.get(&key).unwrap().as_ref(), data.as_slice());
}

#[test]
fn test_truncated_file_is_purged() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 8);
    let (key, data) = block(5, 2 * CLUSTER as usize);
    store.put(&key, &data).unwrap();

    let file = OpenOptions::new()
        .write(true)
        .open(store.config().blocks_path())
        .unwrap();
    file.set_len(CLUSTER).unwrap();

    assert!(matches!(store.get(&key), Err(BlockStoreError::BlockNotFound(_))));
    assert!(!store.contains(&key));
}

#[test]
fn test_pinned_block_survives_eviction() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 4);
    let blocks: Vec<_> = (0..4).map(|i| block(10 + i, CLUSTER as usize)).collect();

    for (key, data) in &blocks {
        store.put(key, data).unwrap();
    }
    // The oldest block is pinned
    store.lock(&blocks[0].0);

    let (extra, extra_data) = block(99, CLUSTER as usize);
    store.put(&extra, &extra_data).unwrap();

    assert!(store.contains(&blocks[0].0));
    assert!(!store.contains(&blocks[1].0));
    assert!(store.contains(&blocks[2].0));
    assert!(store.contains(&extra));
}

#[test]
fn test_space_not_found_when_everything_pinned() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 2);
    let a = block(20, CLUSTER as usize);
    let b = block(21, CLUSTER as usize);
    store.put(&a.0, &a.1).unwrap();
    store.put(&b.0, &b.1).unwrap();
    store.lock(&a.0);
    store.lock(&b.0);

    let c = block(22, 10);
    let err = store.put(&c.0, &c.1).unwrap_err();
    assert!(matches!(err, BlockStoreError::SpaceNotFound { needed: 1, .. }));
    assert!(store.contains(&a.0));
    assert!(store.contains(&b.0));

    // Releasing one pin makes its block evictable again
    store.unlock(&b.0).unwrap();
    store.put(&c.0, &c.1).unwrap();
    assert!(store.contains(&a.0));
    assert!(!store.contains(&b.0));
}

#[test]
fn test_eviction_removes_exactly_the_oldest() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 10);
    let blocks: Vec<_> = (0..10).map(|i| block(30 + i, CLUSTER as usize)).collect();
    for (key, data) in &blocks {
        store.put(key, data).unwrap();
    }

    // A successful read counts as a touch
    store.get(&blocks[0].0).unwrap();

    let (big, big_data) = block(77, 3 * CLUSTER as usize);
    store.put(&big, &big_data).unwrap();

    let evicted: Vec<_> = blocks
        .iter()
        .enumerate()
        .filter(|(_, (key, _))| !store.contains(key))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(evicted, vec![1, 2, 3]);
}

#[test]
fn test_scenario_pinned_block_kept_under_pressure() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 10);

    let a = block(100, CLUSTER as usize);
    let b = block(101, CLUSTER as usize);
    let c = block(102, CLUSTER as usize);
    for (key, data) in [&a, &b, &c] {
        store.put(key, data).unwrap();
    }
    assert_eq!(store.stats().free_space, 7 * CLUSTER);
    store.lock(&a.0);

    let fillers: Vec<_> = (0..7).map(|i| block(200 + i, CLUSTER as usize)).collect();
    for (key, data) in &fillers {
        store.put(key, data).unwrap();
        assert!(store.contains(&a.0));
    }
    assert_eq!(store.stats().free_space, 0);

    let one_more = block(300, CLUSTER as usize);
    store.put(&one_more.0, &one_more.1).unwrap();

    assert!(store.contains(&a.0));
    assert!(!store.contains(&b.0));
    assert!(store.contains(&c.0));
    assert_eq!(store.get(&a.0).unwrap().as_ref(), a.1.as_slice());
}

#[test]
fn test_resize_shrink_keeps_allocations_in_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 10);
    let blocks: Vec<_> = (0..10).map(|i| block(400 + i, CLUSTER as usize)).collect();
    for (key, data) in &blocks {
        store.put(key, data).unwrap();
    }
    store.lock(&blocks[9].0);

    store.resize(4 * CLUSTER).unwrap();

    assert_eq!(store.size(), 4 * CLUSTER);
    let file_len = std::fs::metadata(store.config().blocks_path()).unwrap().len();
    assert_eq!(file_len, 4 * CLUSTER);

    let remaining: Vec<_> = store.keys().collect();
    assert_eq!(remaining.len(), 4);
    for key in &remaining {
        assert!(store.allocation_of(key).unwrap().clusters.iter().all(|&c| c < 4));
        store.get(key).unwrap();
    }

    // Full store after shrink still evicts to make room
    let (key, data) = block(500, 10);
    store.put(&key, &data).unwrap();
    assert_eq!(store.len(), 4);
}

#[test]
fn test_resize_grow_and_quantize() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(
        CacheConfig::new(dir.path())
            .with_size(1)
            .with_allocation_unit(8 * CLUSTER),
    )
    .unwrap();
    assert_eq!(store.size(), 8 * CLUSTER);

    store.resize(8 * CLUSTER + 1).unwrap();
    assert_eq!(store.size(), 16 * CLUSTER);
    let file_len = std::fs::metadata(store.config().blocks_path()).unwrap().len();
    assert_eq!(file_len, 16 * CLUSTER);

    let (key, data) = block(600, 12 * CLUSTER as usize);
    store.put(&key, &data).unwrap();
    assert_eq!(store.get(&key).unwrap().len(), data.len());
}

#[test]
fn test_index_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let (a, data_a) = block(700, 5000);
    let (b, data_b) = block(701, 300);
    {
        let store = open(dir.path(), 8);
        store.put(&a, &data_a).unwrap();
        store.put(&b, &data_b).unwrap();
        store.resize(6 * CLUSTER).unwrap();
        store.save().unwrap();
    }

    // The persisted size wins over the configured one
    let store = open(dir.path(), 100);
    assert_eq!(store.size(), 6 * CLUSTER);
    assert_eq!(store.len(), 2);
    assert_eq!(store.get(&a).unwrap().as_ref(), data_a.as_slice());
    assert_eq!(store.get(&b).unwrap().as_ref(), data_b.as_slice());

    // New writes must not land on clusters the loaded index owns
    let (c, data_c) = block(702, 2 * CLUSTER as usize);
    store.put(&c, &data_c).unwrap();
    assert_eq!(store.get(&a).unwrap().as_ref(), data_a.as_slice());
    assert_eq!(store.get(&b).unwrap().as_ref(), data_b.as_slice());
}

#[test]
fn test_load_replaces_index_and_rebuilds_free_set() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 8);
    let (a, data_a) = block(800, 3 * CLUSTER as usize);
    let (b, data_b) = block(801, 100);

    store.put(&a, &data_a).unwrap();
    store.save().unwrap();
    store.put(&b, &data_b).unwrap();

    store.load().unwrap();
    assert!(store.contains(&a));
    assert!(!store.contains(&b));

    let (c, data_c) = block(802, 5 * CLUSTER as usize);
    store.put(&c, &data_c).unwrap();
    assert_eq!(store.get(&a).unwrap().as_ref(), data_a.as_slice());
    assert_eq!(store.get(&c).unwrap().as_ref(), data_c.as_slice());
}

#[test]
fn test_cluster_size_mismatch_on_open() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open(dir.path(), 8);
        store.save().unwrap();
    }

    let result = CacheStore::open(
        CacheConfig::new(dir.path())
            .with_cluster_size(8192)
            .with_allocation_unit(8192),
    );
    assert!(matches!(result, Err(BlockStoreError::Configuration(_))));
}

#[test]
fn test_corrupt_index_document_fails_open() {
    let dir = tempfile::tempdir().unwrap();
    let settings = dir.path().join("settings");
    std::fs::create_dir_all(&settings).unwrap();
    std::fs::write(settings.join("index.json"), b"[1, 2").unwrap();

    let result = CacheStore::open(config(dir.path(), 8));
    assert!(matches!(result, Err(BlockStoreError::Serialization(_))));
}

#[test_log::test]
fn test_check_blocks_counts_and_purges() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 16);
    let blocks: Vec<_> = (0..5).map(|i| block(900 + i, 2000)).collect();
    for (key, data) in &blocks {
        store.put(key, data).unwrap();
    }
    corrupt(&store, &blocks[1].0);
    corrupt(&store, &blocks[3].0);

    let mut calls = 0;
    let report = store.check_blocks(|progress| {
        calls += 1;
        assert_eq!(progress.total, 5);
        assert_eq!(progress.checked, calls);
        ControlFlow::Continue(())
    });

    assert_eq!(calls, 5);
    assert_eq!(report.total, 5);
    assert_eq!(report.checked, 5);
    assert_eq!(report.bad, 2);
    assert!(!report.stopped);
    assert!(!store.contains(&blocks[1].0));
    assert!(!store.contains(&blocks[3].0));
    assert_eq!(store.len(), 3);
}

#[test]
fn test_check_blocks_early_stop() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 16);
    for i in 0..5 {
        let (key, data) = block(1000 + i, 100);
        store.put(&key, &data).unwrap();
    }

    let report = store.check_blocks(|progress| {
        if progress.checked >= 2 {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });

    assert!(report.stopped);
    assert_eq!(report.checked, 2);
    assert_eq!(store.len(), 5);
}

#[test]
fn test_check_blocks_skips_keys_removed_mid_scan() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 16);
    let keys: Vec<_> = (0..3)
        .map(|i| {
            let (key, data) = block(1100 + i, 100);
            store.put(&key, &data).unwrap();
            key
        })
        .collect();

    let mut calls = 0;
    let report = store.check_blocks(|_| {
        calls += 1;
        for key in &keys {
            store.remove(key);
        }
        ControlFlow::Continue(())
    });

    assert_eq!(calls, 1);
    assert_eq!(report.total, 3);
    assert_eq!(report.checked, 1);
    assert_eq!(report.bad, 0);
    assert!(!report.stopped);
}

#[test]
fn test_pin_before_put_survives_eviction() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 2);
    let a = block(30, CLUSTER as usize);
    let b = block(31, CLUSTER as usize);
    let c = block(32, 10);

    store.lock(&a.0);
    store.put(&a.0, &a.1).unwrap();
    store.put(&b.0, &b.1).unwrap();
    store.put(&c.0, &c.1).unwrap();

    assert!(store.contains(&a.0));
    assert!(!store.contains(&b.0));
    assert!(store.contains(&c.0));
    assert_eq!(store.stats().locked_count, 1);
}

#[test]
fn test_oversized_resize_is_rejected_and_eviction_still_works() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 4);
    let blocks: Vec<_> = (0..4).map(|i| block(1200 + i, CLUSTER as usize)).collect();
    for (key, data) in &blocks {
        store.put(key, data).unwrap();
    }

    let err = store.resize(u64::MAX).unwrap_err();
    assert!(matches!(err, BlockStoreError::Configuration(_)));
    assert_eq!(store.size(), 4 * CLUSTER);

    let (extra, extra_data) = block(1300, 10);
    store.put(&extra, &extra_data).unwrap();
    assert_eq!(store.len(), 4);
    assert!(!store.contains(&blocks[0].0));
    assert!(store.contains(&extra));
}

#[test]
fn test_concurrent_writers_get_disjoint_clusters() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(open(dir.path(), 256));

    let handles: Vec<_> = (0..4u32)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut keys = Vec::new();
                for i in 0..16u32 {
                    let (key, data) = block(t * 1000 + i, 1000 + (i as usize) * 500);
                    store.put(&key, &data).unwrap();
                    assert_eq!(store.get(&key).unwrap().as_ref(), data.as_slice());
                    keys.push(key);
                }
                keys
            })
        })
        .collect();

    let keys: Vec<_> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    assert_eq!(store.len(), 64);

    let mut seen = HashSet::new();
    for key in &keys {
        for cluster in store.allocation_of(key).unwrap().clusters {
            assert!(seen.insert(cluster), "cluster {} allocated twice", cluster);
        }
    }
}

#[test]
fn test_watcher_publishes_report() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 8);

    assert!(wait_until(Duration::from_secs(5), || store.report().size == 8 * CLUSTER));

    store.resize(4 * CLUSTER).unwrap();
    assert!(wait_until(Duration::from_secs(5), || store.report().size == 4 * CLUSTER));
}

#[test]
fn test_enumeration_is_a_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 8);
    let (a, data_a) = block(1100, 10);
    let (b, data_b) = block(1101, 10);
    store.put(&a, &data_a).unwrap();

    let keys = store.keys();
    store.put(&b, &data_b).unwrap();
    store.remove(&a);

    let snapshot: Vec<_> = keys.collect();
    assert_eq!(snapshot, vec![a]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_round_trip(data in prop::collection::vec(any::<u8>(), 0..20_000)) {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 8);
        let key = ContentKey::sha512(&data);

        store.put(&key, &data).unwrap();
        let stored = store.get(&key).unwrap();
        prop_assert_eq!(stored.as_ref(), data.as_slice());
    }

    #[test]
    fn prop_mismatched_content_is_rejected(
        data in prop::collection::vec(any::<u8>(), 1..5_000),
        flip in any::<prop::sample::Index>(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), 8);
        let key = ContentKey::sha512(&data);

        let mut tampered = data.clone();
        tampered[flip.index(data.len())] ^= 0x80;

        let rejected = matches!(
            store.put(&key, &tampered),
            Err(BlockStoreError::BadBlock { reason: BadBlockReason::HashMismatch, .. })
        );
        prop_assert!(rejected);
        prop_assert!(store.is_empty());
        prop_assert_eq!(store.stats().used_space, 0);
    }
}
