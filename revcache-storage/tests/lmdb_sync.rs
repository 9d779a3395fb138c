//! Synchronization through an LMDB environment on disk

use std::sync::Arc;

use revcache_core::LmdbStoreConfig;
use revcache_storage::{LmdbStore, MappingRead, SyncedDataset};
use revcache_test_utils::fixtures::*;
use revcache_test_utils::*;
use tempfile::TempDir;

fn open_store() -> (LmdbStore, TempDir) {
    let temp_dir = TempDir::new().expect("TempDir creation should succeed");
    let config = LmdbStoreConfig::new(temp_dir.path().join("revcache")).with_map_size_mb(16);
    let store = LmdbStore::open(&config).expect("store should open");
    (store, temp_dir)
}

fn prices_on(store: LmdbStore, source: &CountingLoader<Prices>) -> SyncedDataset<Prices> {
    SyncedDataset::new(Arc::new(store), prices_namespace(), source.loader(), eager_sync())
}

#[test]
fn instances_share_revisions_through_lmdb() -> CacheResult<()> {
    let (store, _temp_dir) = open_store();
    let source = CountingLoader::new(sample_prices());
    let writer = prices_on(store.clone(), &source);
    let reader = prices_on(store.clone(), &source);

    writer.push()?;
    writer.push()?;
    assert_eq!(reader.get("MSFT")?, Some(410));
    assert_eq!(reader.revision(), Some(Revision::new(2)));

    source.set(Prices::from([("MSFT".to_string(), 420)]));
    writer.push()?;
    assert_eq!(reader.get("MSFT")?, Some(420));
    assert_eq!(reader.len()?, 1);
    Ok(())
}

#[test]
fn store_layout_uses_namespaced_keys() -> CacheResult<()> {
    let (store, _temp_dir) = open_store();
    let prices = prices_on(store.clone(), &CountingLoader::new(sample_prices()));
    prices.push()?;

    let ns = prices_namespace();
    assert_eq!(store.get(&ns.revision_key())?, Some(b"1".to_vec()));
    let payload = store.get(&ns.data_key())?.expect("data key should exist");
    assert!(String::from_utf8_lossy(&payload).contains("\"AAPL\":190"));
    Ok(())
}

#[test]
fn purge_clears_lmdb_keys() -> CacheResult<()> {
    let (store, _temp_dir) = open_store();
    let source = CountingLoader::new(sample_prices());
    let prices = prices_on(store.clone(), &source);
    let other = prices_on(store.clone(), &source);

    prices.push()?;
    other.pull()?;
    prices.purge()?;

    let ns = prices_namespace();
    assert_eq!(store.get(&ns.data_key())?, None);
    assert_eq!(store.get(&ns.revision_key())?, None);

    // The other instance finds the namespace gone and bootstraps it again.
    assert_eq!(other.get("AAPL")?, Some(190));
    assert_eq!(other.revision(), Some(Revision::FIRST));
    Ok(())
}

#[test]
fn concurrent_writers_each_advance_revision() -> CacheResult<()> {
    let (store, _temp_dir) = open_store();
    let source = CountingLoader::new(sample_prices());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let writer = prices_on(store.clone(), &source);
            std::thread::spawn(move || -> CacheResult<()> {
                for _ in 0..25 {
                    writer.push()?;
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread panicked")?;
    }

    let reader = prices_on(store.clone(), &source);
    assert_eq!(reader.pull()?, Revision::new(100));
    Ok(())
}
