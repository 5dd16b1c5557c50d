//! Price Broadcast Loop
//!
//! Timer-driven service that polls the snapshot provider and pushes the
//! latest prices to every registered connection.
//!
//! Ticks never overlap: the loop awaits each tick's fetch and pushes before
//! waiting for the next timer tick, and missed ticks are delayed rather than
//! replayed in a burst.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use liveview_core::{LiveviewError, ServerMessage, Snapshot};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::provider::SnapshotProvider;
use crate::registry::{ConnectionId, ConnectionRegistry, Membership, Payload, PushError};

/// Configuration for the broadcast loop
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Time between ticks
    pub interval: Duration,
    /// Upper bound on one snapshot fetch
    pub fetch_timeout: Duration,
    /// Upper bound on one push to one connection
    pub push_timeout: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            fetch_timeout: Duration::from_secs(2),
            push_timeout: Duration::from_millis(250),
        }
    }
}

/// Per-connection results of one delivery
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Connections that accepted the payload
    pub delivered: usize,
    /// Connections whose push failed, with the reason
    pub failed: Vec<(ConnectionId, PushError)>,
}

impl TickReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed.len()
    }
}

/// What happened during one tick
#[derive(Debug)]
pub enum TickOutcome {
    /// Nobody was connected, the provider was not called
    SkippedNoConnections,
    /// The provider returned no records
    SkippedEmptySnapshot,
    /// Fetching or encoding the snapshot failed, nothing was pushed
    Aborted(LiveviewError),
    /// The snapshot was pushed to the tick's membership
    Delivered(TickReport),
}

impl TickOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TickOutcome::SkippedNoConnections => "skipped_no_connections",
            TickOutcome::SkippedEmptySnapshot => "skipped_empty_snapshot",
            TickOutcome::Aborted(_) => "aborted",
            TickOutcome::Delivered(_) => "delivered",
        }
    }
}

/// Broadcast loop health, reported by the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastHealth {
    pub connections: usize,
    pub ticks: u64,
    pub deliveries: u64,
    pub push_failures: u64,
    pub fetch_failures: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<String>,
    pub last_error: Option<String>,
    pub healthy: bool,
}

#[derive(Debug, Default)]
struct LastTick {
    at: Option<DateTime<Utc>>,
    outcome: Option<&'static str>,
    error: Option<String>,
}

/// Counters updated after every tick
#[derive(Debug, Default)]
struct BroadcastStats {
    ticks: AtomicU64,
    deliveries: AtomicU64,
    push_failures: AtomicU64,
    fetch_failures: AtomicU64,
    last: RwLock<LastTick>,
}

impl BroadcastStats {
    fn record(&self, outcome: &TickOutcome) {
        self.ticks.fetch_add(1, Ordering::SeqCst);

        let error = match outcome {
            TickOutcome::Aborted(e) => {
                self.fetch_failures.fetch_add(1, Ordering::SeqCst);
                Some(e.to_string())
            }
            TickOutcome::Delivered(report) => {
                self.deliveries
                    .fetch_add(report.delivered as u64, Ordering::SeqCst);
                self.push_failures
                    .fetch_add(report.failed.len() as u64, Ordering::SeqCst);
                None
            }
            _ => None,
        };

        *self.last.write() = LastTick {
            at: Some(Utc::now()),
            outcome: Some(outcome.label()),
            error,
        };
    }
}

/// Pushes the latest prices to all registered connections on a fixed cadence
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    provider: Arc<dyn SnapshotProvider>,
    config: BroadcastConfig,
    stats: BroadcastStats,
}

impl Broadcaster {
    /// Create a new Broadcaster
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        provider: Arc<dyn SnapshotProvider>,
        config: BroadcastConfig,
    ) -> Self {
        Self {
            registry,
            provider,
            config,
            stats: BroadcastStats::default(),
        }
    }

    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    /// Run ticks until `shutdown` flips or its sender is dropped
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting price broadcaster with {}ms interval",
            self.config.interval.as_millis()
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    break;
                }
            }
        }

        info!("Price broadcaster stopped");
    }

    /// Run one full tick and record its outcome
    pub async fn tick(&self) -> TickOutcome {
        let outcome = self.execute_tick().await;
        self.stats.record(&outcome);

        match &outcome {
            TickOutcome::SkippedNoConnections => {}
            TickOutcome::SkippedEmptySnapshot => {
                debug!("No prices in datastore, skipping delivery");
            }
            TickOutcome::Aborted(e) if e.is_transient() => {
                warn!("Broadcast tick aborted, retrying next tick: {}", e);
            }
            TickOutcome::Aborted(e) => {
                error!("Broadcast tick aborted: {}", e);
            }
            TickOutcome::Delivered(report) if report.failed.is_empty() => {
                debug!("Delivered prices to {} connections", report.delivered);
            }
            TickOutcome::Delivered(report) => {
                warn!(
                    "Delivered prices to {}/{} connections",
                    report.delivered,
                    report.attempted()
                );
            }
        }

        outcome
    }

    async fn execute_tick(&self) -> TickOutcome {
        if self.registry.is_empty() {
            return TickOutcome::SkippedNoConnections;
        }

        let snapshot = match self.fetch_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => return TickOutcome::Aborted(e),
        };

        if snapshot.is_empty() {
            return TickOutcome::SkippedEmptySnapshot;
        }

        let members = self.registry.members();
        match self.deliver(snapshot, &members).await {
            Ok(report) => TickOutcome::Delivered(report),
            Err(e) => TickOutcome::Aborted(e),
        }
    }

    async fn fetch_snapshot(&self) -> Result<Snapshot, LiveviewError> {
        let limit = self.config.fetch_timeout;
        match timeout(limit, self.provider.fetch_latest_per_entity()).await {
            Ok(result) => result,
            Err(_) => Err(LiveviewError::timeout(
                "fetch latest prices",
                limit.as_millis() as u64,
            )),
        }
    }

    /// Push one snapshot to every member
    ///
    /// The snapshot is encoded once before any push starts. Pushes run
    /// concurrently and a failed push never affects the others.
    pub async fn deliver(
        &self,
        snapshot: Snapshot,
        members: &Membership,
    ) -> Result<TickReport, LiveviewError> {
        let payload: Payload = ServerMessage::from(snapshot).to_json()?.into();
        let push_timeout = self.config.push_timeout;

        let results = join_all(members.iter().map(|handle| {
            let payload = payload.clone();
            async move { (handle.id(), handle.push(payload, push_timeout).await) }
        }))
        .await;

        let mut report = TickReport::default();
        for (id, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    debug!("Push to {} failed: {}", id, e);
                    report.failed.push((id, e));
                }
            }
        }

        Ok(report)
    }

    /// Current loop health
    pub fn health(&self) -> BroadcastHealth {
        let last = self.stats.last.read();
        let healthy = last.outcome != Some("aborted");

        BroadcastHealth {
            connections: self.registry.size(),
            ticks: self.stats.ticks.load(Ordering::SeqCst),
            deliveries: self.stats.deliveries.load(Ordering::SeqCst),
            push_failures: self.stats.push_failures.load(Ordering::SeqCst),
            fetch_failures: self.stats.fetch_failures.load(Ordering::SeqCst),
            last_tick_at: last.at,
            last_outcome: last.outcome.map(str::to_string),
            last_error: last.error.clone(),
            healthy,
        }
    }
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}
