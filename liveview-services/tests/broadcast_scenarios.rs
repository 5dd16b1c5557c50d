//! Broadcast loop scenarios against a scripted snapshot provider
//!
//! Run with: cargo test -p liveview-services --test broadcast_scenarios

use async_trait::async_trait;
use liveview_core::{LiveviewError, LiveviewResult, PriceRecord, ServerMessage, Snapshot};
use liveview_services::{
    BroadcastConfig, Broadcaster, ConnectionId, ConnectionRegistry, PushError, SnapshotProvider,
    TickOutcome,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Provider that replays queued responses and counts calls
#[derive(Default)]
struct ScriptedProvider {
    calls: AtomicUsize,
    responses: Mutex<VecDeque<LiveviewResult<Snapshot>>>,
    fallback: Snapshot,
}

impl ScriptedProvider {
    fn returning(snapshot: Snapshot) -> Self {
        Self {
            fallback: snapshot,
            ..Self::default()
        }
    }

    fn queue(&self, response: LiveviewResult<Snapshot>) {
        self.responses.lock().push_back(response);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotProvider for ScriptedProvider {
    async fn fetch_latest_per_entity(&self) -> LiveviewResult<Snapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.responses.lock().pop_front() {
            Some(response) => response,
            None => Ok(self.fallback.clone()),
        }
    }
}

fn acme_zeta() -> Snapshot {
    Snapshot::from_records(vec![
        PriceRecord::new("ACME", 10.5, 1),
        PriceRecord::new("ZETA", 3.2, 2),
    ])
}

fn setup(provider: Arc<ScriptedProvider>) -> (Arc<ConnectionRegistry>, Broadcaster) {
    let registry = Arc::new(ConnectionRegistry::new(4));
    let config = BroadcastConfig {
        interval: Duration::from_millis(10),
        fetch_timeout: Duration::from_millis(200),
        push_timeout: Duration::from_millis(50),
    };
    let broadcaster = Broadcaster::new(Arc::clone(&registry), provider, config);
    (registry, broadcaster)
}

fn decode(payload: &str) -> Snapshot {
    match serde_json::from_str::<ServerMessage>(payload).unwrap() {
        ServerMessage::Prices { prices } => prices,
        other => panic!("unexpected message: {:?}", other),
    }
}

fn companies(snapshot: &Snapshot) -> Vec<&str> {
    snapshot.iter().map(|r| r.company.as_str()).collect()
}

fn delivered(outcome: TickOutcome) -> liveview_services::TickReport {
    match outcome {
        TickOutcome::Delivered(report) => report,
        other => panic!("expected delivery, got {:?}", other),
    }
}

#[tokio::test]
async fn test_no_connections_skips_fetch() {
    let provider = Arc::new(ScriptedProvider::returning(acme_zeta()));
    let (registry, broadcaster) = setup(Arc::clone(&provider));

    let outcome = broadcaster.tick().await;

    assert!(matches!(outcome, TickOutcome::SkippedNoConnections));
    assert_eq!(provider.calls(), 0);
    assert_eq!(registry.size(), 0);
}

#[tokio::test]
async fn test_two_connections_receive_ordered_snapshot() {
    let provider = Arc::new(ScriptedProvider::returning(acme_zeta()));
    let (registry, broadcaster) = setup(Arc::clone(&provider));
    let (_a, mut rx_a) = registry.register();
    let (_b, mut rx_b) = registry.register();

    let report = delivered(broadcaster.tick().await);
    assert_eq!(report.delivered, 2);
    assert!(report.failed.is_empty());

    for rx in [&mut rx_a, &mut rx_b] {
        let payload = rx.try_recv().unwrap();
        assert_eq!(
            &*payload,
            r#"{"type":"prices","prices":[{"company":"ACME","avgPrice":10.5,"_id":1},{"company":"ZETA","avgPrice":3.2,"_id":2}]}"#
        );
    }
}

#[tokio::test]
async fn test_empty_snapshot_sends_nothing() {
    let provider = Arc::new(ScriptedProvider::returning(Snapshot::empty()));
    let (registry, broadcaster) = setup(Arc::clone(&provider));
    let (_id, mut rx) = registry.register();

    let outcome = broadcaster.tick().await;

    assert!(matches!(outcome, TickOutcome::SkippedEmptySnapshot));
    assert_eq!(provider.calls(), 1);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_failed_push_does_not_block_others() {
    let provider = Arc::new(ScriptedProvider::returning(acme_zeta()));
    let (registry, broadcaster) = setup(Arc::clone(&provider));

    let (dead, dead_rx) = registry.register();
    let (_alive, mut alive_rx) = registry.register();
    drop(dead_rx);

    let report = delivered(broadcaster.tick().await);

    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, vec![(dead, PushError::Closed)]);
    assert_eq!(companies(&decode(&alive_rx.try_recv().unwrap())), vec!["ACME", "ZETA"]);
}

#[tokio::test]
async fn test_slow_connection_times_out_without_blocking_others() {
    let provider = Arc::new(ScriptedProvider::returning(acme_zeta()));
    let registry = Arc::new(ConnectionRegistry::new(1));
    let broadcaster = Broadcaster::new(
        Arc::clone(&registry),
        provider,
        BroadcastConfig {
            push_timeout: Duration::from_millis(30),
            ..BroadcastConfig::default()
        },
    );

    let (slow, _slow_rx) = registry.register();
    let (_fast, mut fast_rx) = registry.register();

    // Fill both buffers, then drain only the fast one
    delivered(broadcaster.tick().await);
    fast_rx.try_recv().unwrap();

    let report = delivered(broadcaster.tick().await);
    assert_eq!(report.delivered, 1);
    assert_eq!(
        report.failed,
        vec![(slow, PushError::Timeout(Duration::from_millis(30)))]
    );
    assert!(fast_rx.try_recv().is_ok());
    assert!(registry.contains(slow));
}

#[tokio::test]
async fn test_disconnect_mid_iteration() {
    let provider = Arc::new(ScriptedProvider::returning(acme_zeta()));
    let (registry, broadcaster) = setup(Arc::clone(&provider));
    let (leaving, leaving_rx) = registry.register();
    let (_staying, mut staying_rx) = registry.register();

    // Membership is captured, then the client disconnects before its push
    let members = registry.members();
    registry.remove(leaving);
    drop(leaving_rx);

    let report = broadcaster.deliver(acme_zeta(), &members).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, vec![(leaving, PushError::Closed)]);
    assert!(staying_rx.try_recv().is_ok());

    // Next tick only targets the remaining connection
    let report = delivered(broadcaster.tick().await);
    assert_eq!(report.attempted(), 1);
    assert!(!registry.contains(leaving));
}

#[tokio::test]
async fn test_late_registration_waits_for_next_tick() {
    let provider = Arc::new(ScriptedProvider::returning(acme_zeta()));
    let (registry, broadcaster) = setup(Arc::clone(&provider));
    let (_early, mut early_rx) = registry.register();

    let members = registry.members();
    let (_late, mut late_rx) = registry.register();

    broadcaster.deliver(acme_zeta(), &members).await.unwrap();
    assert!(early_rx.try_recv().is_ok());
    assert!(late_rx.try_recv().is_err());

    delivered(broadcaster.tick().await);
    assert!(early_rx.try_recv().is_ok());
    assert!(late_rx.try_recv().is_ok());
}

#[tokio::test]
async fn test_fetch_failure_then_recovery() {
    let provider = Arc::new(ScriptedProvider::returning(acme_zeta()));
    provider.queue(Err(LiveviewError::datastore("connection refused")));
    let (registry, broadcaster) = setup(Arc::clone(&provider));
    let (_id, mut rx) = registry.register();

    let outcome = broadcaster.tick().await;
    assert!(matches!(outcome, TickOutcome::Aborted(_)));
    assert!(rx.try_recv().is_err());
    assert!(!broadcaster.health().healthy);

    delivered(broadcaster.tick().await);
    assert!(rx.try_recv().is_ok());

    let health = broadcaster.health();
    assert!(health.healthy);
    assert_eq!(health.ticks, 2);
    assert_eq!(health.fetch_failures, 1);
    assert_eq!(health.deliveries, 1);
}

#[tokio::test]
async fn test_remove_unknown_keeps_size() {
    let registry = ConnectionRegistry::new(4);
    let (_id, _rx) = registry.register();

    for _ in 0..3 {
        assert!(!registry.remove(ConnectionId(424_242)));
        assert_eq!(registry.size(), 1);
    }
}

#[tokio::test]
async fn test_delivered_snapshots_are_unique_and_ordered() {
    let provider = Arc::new(ScriptedProvider::returning(Snapshot::from_records(vec![
        PriceRecord::new("TSLA", 250.0, 5),
        PriceRecord::new("AAPL", 180.0, 2),
        PriceRecord::new("TSLA", 240.0, 3),
        PriceRecord::new("MSFT", 410.0, 4),
    ])));
    let (registry, broadcaster) = setup(Arc::clone(&provider));
    let (_id, mut rx) = registry.register();

    delivered(broadcaster.tick().await);
    let snapshot = decode(&rx.try_recv().unwrap());

    assert_eq!(companies(&snapshot), vec!["AAPL", "MSFT", "TSLA"]);
    assert_eq!(snapshot.get("TSLA").unwrap().sequence, 5);
}

#[tokio::test]
async fn test_run_loop_delivers_repeatedly() {
    let provider = Arc::new(ScriptedProvider::returning(acme_zeta()));
    let (registry, broadcaster) = setup(Arc::clone(&provider));
    let broadcaster = Arc::new(broadcaster);
    let (_id, mut rx) = registry.register();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let handle = tokio::spawn(Arc::clone(&broadcaster).run(shutdown_rx));

    let mut received = 0;
    while received < 3 {
        let payload = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no push within a second")
            .unwrap();
        assert_eq!(companies(&decode(&payload)), vec!["ACME", "ZETA"]);
        received += 1;
    }

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
    assert!(provider.calls() >= 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_churn_while_broadcasting() {
    const TASKS: usize = 8;
    const ROUNDS: usize = 20;

    let provider = Arc::new(ScriptedProvider::returning(acme_zeta()));
    let (registry, broadcaster) = setup(Arc::clone(&provider));
    let broadcaster = Arc::new(broadcaster);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let loop_handle = tokio::spawn(Arc::clone(&broadcaster).run(shutdown_rx));

    // Each task keeps every other connection and drops the rest mid-flight
    let churn = (0..TASKS).map(|_| {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let mut kept = Vec::new();
            let mut removed = Vec::new();
            for round in 0..ROUNDS {
                let (id, rx) = registry.register();
                tokio::time::sleep(Duration::from_millis(1)).await;
                if round % 2 == 0 {
                    assert!(registry.remove(id));
                    drop(rx);
                    removed.push(id);
                } else {
                    kept.push((id, rx));
                }
            }
            (kept, removed)
        })
    });

    let mut kept = Vec::new();
    for result in futures::future::join_all(churn).await {
        let (task_kept, task_removed) = result.expect("churn task panicked");
        for id in task_removed {
            assert!(!registry.contains(id));
        }
        kept.extend(task_kept);
    }

    assert_eq!(registry.size(), TASKS * ROUNDS / 2);
    assert_eq!(kept.len(), registry.size());

    // Every surviving connection receives a later tick once it drains its backlog
    for (id, rx) in kept.iter_mut() {
        while rx.try_recv().is_ok() {}
        let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap_or_else(|_| panic!("{} received nothing after churn", id))
            .unwrap();
        assert_eq!(companies(&decode(&payload)), vec!["ACME", "ZETA"]);
    }

    shutdown_tx.send(true).unwrap();
    loop_handle.await.expect("broadcast loop panicked");

    let health = broadcaster.health();
    assert!(health.ticks > 0);
    assert_eq!(health.fetch_failures, 0);
    assert_eq!(health.connections, TASKS * ROUNDS / 2);
}
