//! Simulated Price Feed
//!
//! Background service that generates random buy/sell events per company,
//! averages them in fixed-size groups and appends each average to the
//! price store. Gives the broadcaster something to stream without an
//! external market data pipeline.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::price_store::SqlitePriceStore;

/// Lowest simulated price
pub const MIN_PRICE: f64 = 50.0;

/// Width of the simulated price range, prices fall in [50, 550)
pub const PRICE_RANGE: f64 = 500.0;

/// Configuration for the price feed
#[derive(Debug, Clone)]
pub struct PriceFeedConfig {
    /// Companies to simulate
    pub companies: Vec<String>,
    /// Time between simulated events per company
    pub tick: Duration,
    /// Number of events averaged into one stored record
    pub group_size: usize,
}

impl Default for PriceFeedConfig {
    fn default() -> Self {
        Self {
            companies: vec!["MSFT".to_string(), "TSLA".to_string(), "AAPL".to_string()],
            tick: Duration::from_millis(100),
            group_size: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// One simulated market event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockEvent {
    pub company: String,
    pub event_type: TradeSide,
    pub price: f64,
}

impl StockEvent {
    /// Draw a random event for `company`
    pub fn random<R: Rng>(rng: &mut R, company: &str) -> Self {
        let event_type = if rng.random_bool(0.5) {
            TradeSide::Buy
        } else {
            TradeSide::Sell
        };

        Self {
            company: company.to_string(),
            event_type,
            price: rng.random::<f64>() * PRICE_RANGE + MIN_PRICE,
        }
    }
}

/// Collects prices until a group is full, then yields their average
#[derive(Debug)]
pub struct PriceBatch {
    prices: Vec<f64>,
    group_size: usize,
}

impl PriceBatch {
    pub fn new(group_size: usize) -> Self {
        let group_size = group_size.max(1);
        Self {
            prices: Vec::with_capacity(group_size),
            group_size,
        }
    }

    /// Add a price, returning the group average once the group is full
    pub fn push(&mut self, price: f64) -> Option<f64> {
        self.prices.push(price);
        if self.prices.len() < self.group_size {
            return None;
        }
        self.drain()
    }

    /// Average whatever is buffered and start a new group
    pub fn drain(&mut self) -> Option<f64> {
        if self.prices.is_empty() {
            return None;
        }
        let avg = self.prices.iter().sum::<f64>() / self.prices.len() as f64;
        self.prices.clear();
        Some(avg)
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

/// Background service writing simulated averages into the price store
pub struct PriceFeed {
    store: SqlitePriceStore,
    config: PriceFeedConfig,
}

impl PriceFeed {
    pub fn new(store: SqlitePriceStore, config: PriceFeedConfig) -> Self {
        Self { store, config }
    }

    /// Run one generator per company until `shutdown` flips
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(
            "Starting price feed for {} companies ({}ms tick, groups of {})",
            self.config.companies.len(),
            self.config.tick.as_millis(),
            self.config.group_size
        );

        let generators = self.config.companies.iter().map(|company| {
            Self::run_company(
                self.store.clone(),
                company.clone(),
                self.config.clone(),
                shutdown.clone(),
            )
        });
        futures::future::join_all(generators).await;

        info!("Price feed stopped");
    }

    async fn run_company(
        store: SqlitePriceStore,
        company: String,
        config: PriceFeedConfig,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut rng = StdRng::from_os_rng();
        let mut batch = PriceBatch::new(config.group_size);
        let mut ticker = interval(config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let event = StockEvent::random(&mut rng, &company);
                    debug!("Generated {:?} event for {} at {:.2}", event.event_type, company, event.price);

                    if let Some(avg) = batch.push(event.price) {
                        Self::store_average(&store, &company, avg).await;
                    }
                }
                _ = shutdown.changed() => {
                    break;
                }
            }
        }

        if let Some(avg) = batch.drain() {
            Self::store_average(&store, &company, avg).await;
        }
    }

    async fn store_average(store: &SqlitePriceStore, company: &str, avg: f64) {
        let store = store.clone();
        let owned_company = company.to_string();
        let result =
            tokio::task::spawn_blocking(move || store.insert_price(&owned_company, avg)).await;

        match result {
            Ok(Ok(sequence)) => {
                debug!("Stored average {:.2} for {} (#{})", avg, company, sequence);
            }
            Ok(Err(e)) => warn!("Failed to store average for {}: {}", company, e),
            Err(e) => warn!("Store task for {} failed: {}", company, e),
        }
    }
}

impl std::fmt::Debug for PriceFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceFeed")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish()
    }
}
