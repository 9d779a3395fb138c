//! Two datasets in one LMDB store, with views attached to their owner.
//!
//! Run with `RUST_LOG=revcache_storage=debug` to watch pushes, pulls and
//! view recomputations.

use std::collections::BTreeMap;
use std::sync::Arc;

use revcache_core::{CacheResult, LmdbStoreConfig, Namespace, Revision, SyncConfig};
use revcache_storage::{
    AttachedViews, LmdbStore, MappingRead, RevisionSource, SequenceRead, SyncedDataset, ViewDecl,
    ViewOwner,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type Prices = BTreeMap<String, u32>;
type Holdings = BTreeMap<String, u32>;

/// Prices and holdings read together; views see both.
struct PriceBook {
    prices: SyncedDataset<Prices>,
    holdings: SyncedDataset<Holdings>,
    views: AttachedViews,
}

impl RevisionSource for PriceBook {
    type Stamp = (Option<Revision>, Option<Revision>);

    fn refresh(&self) -> CacheResult<()> {
        self.prices.refresh()?;
        self.holdings.refresh()
    }

    fn stamp(&self) -> Self::Stamp {
        (self.prices.revision(), self.holdings.revision())
    }
}

impl PriceBook {
    fn purge_all(&self) -> CacheResult<()> {
        self.prices.purge()?;
        self.holdings.purge()
    }
}

impl ViewOwner for PriceBook {
    fn attached_views(&self) -> &AttachedViews {
        &self.views
    }
}

fn position_values(book: &PriceBook) -> CacheResult<BTreeMap<String, u64>> {
    let prices = MappingRead::snapshot(&book.prices)?;
    let holdings = MappingRead::snapshot(&book.holdings)?;
    Ok(holdings
        .iter()
        .map(|(symbol, quantity)| {
            let price = prices.get(symbol).copied().unwrap_or(0);
            (symbol.clone(), u64::from(price) * u64::from(*quantity))
        })
        .collect())
}

fn expensive(book: &PriceBook) -> CacheResult<Vec<String>> {
    let prices = MappingRead::snapshot(&book.prices)?;
    Ok(prices
        .iter()
        .filter(|(_, price)| **price >= 200)
        .map(|(symbol, _)| symbol.clone())
        .collect())
}

const POSITION_VALUES: ViewDecl<PriceBook, BTreeMap<String, u64>> =
    ViewDecl::new("position_values", position_values);
const EXPENSIVE: ViewDecl<PriceBook, Vec<String>> = ViewDecl::new("expensive", expensive);

fn load_prices() -> CacheResult<Prices> {
    Ok(BTreeMap::from([
        ("AAPL".to_string(), 190),
        ("GOOG".to_string(), 140),
        ("MSFT".to_string(), 410),
    ]))
}

fn load_holdings() -> CacheResult<Holdings> {
    Ok(BTreeMap::from([
        ("AAPL".to_string(), 10),
        ("MSFT".to_string(), 3),
    ]))
}

fn open_book(store: &Arc<LmdbStore>, config: &SyncConfig) -> CacheResult<Arc<PriceBook>> {
    Ok(Arc::new(PriceBook {
        prices: SyncedDataset::new(
            Arc::clone(store),
            Namespace::new("prices", "v1")?,
            load_prices,
            config.clone(),
        ),
        holdings: SyncedDataset::new(
            Arc::clone(store),
            Namespace::new("holdings", "v1")?,
            load_holdings,
            config.clone(),
        ),
        views: AttachedViews::new(),
    }))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("revcache_storage=debug,info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    let dir = tempfile::tempdir()?;
    let store = Arc::new(LmdbStore::open(&LmdbStoreConfig::new(dir.path()))?);
    let config = SyncConfig::from_env()?;

    // One "process" publishes, another reads through its own snapshots.
    let publisher = open_book(&store, &config)?;
    publisher.prices.push()?;
    publisher.holdings.push()?;

    let reader = open_book(&store, &config)?;
    let values = POSITION_VALUES.view(&reader)?;
    let expensive_symbols = EXPENSIVE.view(&reader)?;

    let msft = MappingRead::get(&*values, "MSFT")?;
    tracing::info!(msft = ?msft, "Position value");
    let symbols = SequenceRead::to_vec(&*expensive_symbols)?;
    tracing::info!(symbols = ?symbols, "Expensive symbols");
    tracing::info!(
        status = ?reader.prices.status(),
        recomputations = values.recomputations(),
        "Reader state"
    );

    publisher.purge_all()?;
    Ok(())
}
