//! End-to-end synchronization scenarios across dataset instances

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;
use revcache_storage::{MappingRead, SnapshotSource, SyncedDataset};
use revcache_test_utils::assertions::*;
use revcache_test_utils::fixtures::*;
use revcache_test_utils::*;

fn dataset_on<S: KvStore + 'static>(
    store: &Arc<S>,
    loader: &CountingLoader<Prices>,
    config: SyncConfig,
) -> SyncedDataset<Prices> {
    SyncedDataset::new(Arc::clone(store), prices_namespace(), loader.loader(), config)
}

/// A dataset on `store` whose checks are throttled by `clock`.
fn throttled_reader(
    store: &Arc<FlakyStore>,
    clock: &ManualClock,
    secs: u64,
) -> SyncedDataset<Prices> {
    let loader = CountingLoader::new(sample_prices());
    dataset_on(store, &loader, sync_every_secs(secs)).with_clock(Arc::new(clock.clone()))
}

#[test]
fn bootstrap_on_first_pull() -> CacheResult<()> {
    let store = Arc::new(MemoryStore::new());
    let loader = CountingLoader::new(BTreeMap::from([("AAPL".to_string(), 100)]));
    let prices = dataset_on(&store, &loader, SyncConfig::default());

    assert_eq!(prices.pull()?, Revision::FIRST);
    assert_eq!(prices.revision(), Some(Revision::FIRST));
    assert_eq!(prices.get("AAPL")?, Some(100));
    assert_eq!(loader.loads(), 1);
    Ok(())
}

#[test]
fn first_read_bootstraps_without_explicit_pull() -> CacheResult<()> {
    let store = Arc::new(MemoryStore::new());
    let loader = CountingLoader::new(sample_prices());
    let prices = dataset_on(&store, &loader, SyncConfig::default());

    assert_eq!(prices.keys()?, vec!["AAPL", "GOOG", "MSFT"]);
    assert_eq!(prices.revision(), Some(Revision::FIRST));
    assert!(prices.status().last_checked.is_some());
    Ok(())
}

#[test]
fn throttled_checks_contact_store_once_per_window() -> CacheResult<()> {
    let store = Arc::new(FlakyStore::new());
    let clock = ManualClock::default();
    let writer = dataset_on(&store, &CountingLoader::new(sample_prices()), eager_sync());
    let reader = throttled_reader(&store, &clock, 10);

    writer.push()?;
    reader.pull()?;
    store.reset_round_trips();

    // t = 0
    assert_eq!(reader.get("AAPL")?, Some(190));
    assert_eq!(store.round_trips(), 1);

    // t = 2
    clock.advance_secs(2);
    assert_eq!(reader.get("AAPL")?, Some(190));
    assert_eq!(store.round_trips(), 1);

    // t = 11
    clock.advance_secs(9);
    assert_eq!(reader.get("AAPL")?, Some(190));
    assert_eq!(store.round_trips(), 2);
    Ok(())
}

#[test]
fn millisecond_reads_stay_within_one_round_trip() -> CacheResult<()> {
    let store = Arc::new(FlakyStore::new());
    let clock = ManualClock::default();
    let reader = throttled_reader(&store, &clock, 10);
    reader.push()?;
    store.reset_round_trips();

    for _ in 0..5_000 {
        reader.contains_key("MSFT")?;
        clock.advance(chrono::Duration::milliseconds(1));
    }
    assert_eq!(store.round_trips(), 1);
    Ok(())
}

#[test]
fn throttled_reader_picks_up_push_after_window() -> CacheResult<()> {
    let store = Arc::new(FlakyStore::new());
    let clock = ManualClock::default();
    let source = CountingLoader::new(sample_prices());
    let writer = dataset_on(&store, &source, eager_sync());
    let reader = throttled_reader(&store, &clock, 10);

    let start = clock.now();
    writer.push()?;
    assert_eq!(reader.get("AAPL")?, Some(190));

    source.set(BTreeMap::from([("AAPL".to_string(), 200)]));
    writer.push()?;

    clock.advance_secs(5);
    assert_eq!(reader.get("AAPL")?, Some(190));
    clock.set(start + chrono::Duration::seconds(11));
    assert_eq!(reader.get("AAPL")?, Some(200));
    assert_eq!(reader.revision(), Some(Revision::new(2)));
    Ok(())
}

#[test]
fn outage_during_check_serves_stale_snapshot() -> CacheResult<()> {
    let store = Arc::new(FlakyStore::new());
    let clock = ManualClock::default();
    let reader = throttled_reader(&store, &clock, 10);
    reader.push()?;

    store.go_offline();
    clock.advance_secs(11);
    store.reset_round_trips();

    assert_eq!(reader.get("GOOG")?, Some(140));
    assert_eq!(store.round_trips(), 1);
    assert_eq!(reader.revision(), Some(Revision::FIRST));

    // The failed check was not stamped, so the next read tries again.
    assert_eq!(reader.get("GOOG")?, Some(140));
    assert_eq!(store.round_trips(), 2);
    Ok(())
}

#[test]
fn outage_between_check_and_pull_serves_stale_snapshot() -> CacheResult<()> {
    let data = MemoryStore::new();
    let reader_store = Arc::new(FlakyStore::wrap(data.clone()));
    let writer_store = Arc::new(FlakyStore::wrap(data));
    let source = CountingLoader::new(sample_prices());
    let writer = dataset_on(&writer_store, &source, eager_sync());
    let reader = dataset_on(&reader_store, &source, eager_sync());

    writer.push()?;
    assert_eq!(reader.get("MSFT")?, Some(410));

    source.set(BTreeMap::from([("MSFT".to_string(), 1)]));
    writer.push()?;

    // The revision read goes through; the pull that follows does not.
    reader_store.go_offline_after(1);
    assert_eq!(reader.get("MSFT")?, Some(410));
    assert_eq!(reader.revision(), Some(Revision::FIRST));
    reader_store.go_online();
    assert_eq!(reader.get("MSFT")?, Some(1));
    Ok(())
}

#[test]
fn lower_store_revision_keeps_local_snapshot() -> CacheResult<()> {
    let store = Arc::new(FlakyStore::new());
    let source = CountingLoader::new(sample_prices());
    let writer = dataset_on(&store, &source, eager_sync());
    let reader = dataset_on(&store, &CountingLoader::new(Prices::new()), eager_sync());

    writer.push()?;
    writer.push()?;
    assert_eq!(reader.get("MSFT")?, Some(410));
    assert_eq!(reader.revision(), Some(Revision::new(2)));

    // Another instance purges and pushes once; the store now sits below the reader.
    writer.purge()?;
    source.set(BTreeMap::from([("MSFT".to_string(), 1)]));
    writer.push()?;
    let revision_key = prices_namespace().revision_key();
    assert_eq!(store.inner().get(&revision_key)?, Some(b"1".to_vec()));

    assert_eq!(reader.get("MSFT")?, Some(410));
    assert_eq!(reader.revision(), Some(Revision::new(2)));
    Ok(())
}

#[test]
fn wiped_store_is_rebootstrapped_on_next_read() -> CacheResult<()> {
    let store = Arc::new(MemoryStore::new());
    let loader = CountingLoader::new(sample_prices());
    let prices = dataset_on(&store, &loader, eager_sync());

    prices.push()?;
    prices.push()?;
    store.clear();

    assert_eq!(prices.get("GOOG")?, Some(140));
    assert_eq!(prices.revision(), Some(Revision::FIRST));
    assert_eq!(loader.loads(), 3);
    assert!(store.contains_key(&prices_namespace().data_key()));
    Ok(())
}

#[test]
fn outage_surfaces_from_push_pull_and_purge() {
    let store = Arc::new(FlakyStore::new());
    let prices = dataset_on(&store, &CountingLoader::new(sample_prices()), eager_sync());
    store.go_offline();

    assert_store_unavailable(&prices.push());
    assert_store_unavailable(&prices.pull());
    assert_store_unavailable(&prices.purge());
}

#[test]
fn outage_before_first_sync_surfaces_from_read() {
    let store = Arc::new(FlakyStore::new());
    let prices = dataset_on(&store, &CountingLoader::new(sample_prices()), eager_sync());
    store.go_offline();

    assert_store_unavailable(&prices.get("AAPL"));
    assert!(prices.current_snapshot().is_none());
}

#[test]
fn purge_then_read_rebootstraps() -> CacheResult<()> {
    let store = Arc::new(MemoryStore::new());
    let loader = CountingLoader::new(sample_prices());
    let prices = dataset_on(&store, &loader, eager_sync());

    prices.push()?;
    prices.push()?;
    prices.purge()?;
    assert!(!prices.status().is_synchronized());

    assert_eq!(prices.len()?, 3);
    assert_eq!(prices.revision(), Some(Revision::FIRST));
    assert_eq!(loader.loads(), 3);
    Ok(())
}

#[test]
fn orphaned_revision_key_is_reported() {
    let store = Arc::new(MemoryStore::new());
    let prices = dataset_on(&store, &CountingLoader::new(sample_prices()), eager_sync());
    store
        .set(&prices_namespace().revision_key(), b"7")
        .expect("memory store set");

    assert_consistency_error(&prices.pull());
    assert_consistency_error(&prices.get("AAPL"));
}

#[test]
fn loader_failure_surfaces_from_bootstrap() {
    let store = Arc::new(MemoryStore::new());
    let prices: SyncedDataset<Prices> = SyncedDataset::new(
        Arc::clone(&store),
        prices_namespace(),
        failing_loader("prices"),
        eager_sync(),
    );

    assert_load_error(&prices.get("AAPL"));
    assert!(store.is_empty());
}

#[test]
fn namespaces_do_not_interfere() -> CacheResult<()> {
    let store = Arc::new(MemoryStore::new());
    let v1 = dataset_on(&store, &CountingLoader::new(sample_prices()), eager_sync());
    let v2: SyncedDataset<Prices> = SyncedDataset::new(
        Arc::clone(&store),
        Namespace::new("prices", "v2")?,
        CountingLoader::new(Prices::new()).loader(),
        eager_sync(),
    );

    v1.push()?;
    v1.push()?;
    assert!(v2.is_empty()?);
    assert_eq!(v2.revision(), Some(Revision::FIRST));
    assert_eq!(v1.revision(), Some(Revision::new(2)));
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_revision_counts_pushes(pushes in 1usize..20) {
        let store = Arc::new(MemoryStore::new());
        let prices = dataset_on(&store, &CountingLoader::new(sample_prices()), eager_sync());
        for _ in 0..pushes {
            prices.push().unwrap();
        }
        prop_assert_eq!(prices.revision(), Some(Revision::new(pushes as i64)));
    }

    #[test]
    fn prop_pull_observes_other_instance_push(
        before in 0usize..5,
        content in generators::arb_prices(),
    ) {
        let store = Arc::new(MemoryStore::new());
        let source = CountingLoader::new(sample_prices());
        let writer = dataset_on(&store, &source, eager_sync());
        let reader = dataset_on(&store, &CountingLoader::new(Prices::new()), eager_sync());

        for _ in 0..before {
            writer.push().unwrap();
        }
        source.set(content.clone());
        let pushed = writer.push().unwrap();

        prop_assert_eq!(reader.pull().unwrap(), pushed);
        let snapshot = reader.snapshot().unwrap();
        prop_assert_eq!(&*snapshot, &content);
    }

    #[test]
    fn prop_pull_adopts_store_revision(revision in generators::arb_revision()) {
        let store = Arc::new(MemoryStore::new());
        let writer = dataset_on(&store, &CountingLoader::new(sample_prices()), eager_sync());
        let reader = dataset_on(&store, &CountingLoader::new(Prices::new()), eager_sync());

        writer.push().unwrap();
        store
            .set(&prices_namespace().revision_key(), revision.to_string().as_bytes())
            .unwrap();

        prop_assert_eq!(reader.pull().unwrap(), revision);
        prop_assert_eq!(reader.revision(), Some(revision));
        prop_assert_eq!(reader.len().unwrap(), 3);
    }
}
