//! Integration tests for the Zeno controller
//!
//! These tests wire real components together through the public API: the
//! controller against a mock provider and a stubbed queue source, the
//! status API over a real TCP listener, and the event store against a
//! real filesystem.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use zeno::api::ApiServer;
use zeno::config::{Config, ScalingConfig, StoreConfig};
use zeno::controller::Controller;
use zeno::github::QueueSource;
use zeno::leader::LeaderElector;
use zeno::observability::ControllerMetrics;
use zeno::provider::{MockProvider, Provider};
use zeno::store::EventStore;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Queue source with a settable depth
struct FixedQueue {
    depth: AtomicU32,
}

impl FixedQueue {
    fn new(depth: u32) -> Arc<Self> {
        Arc::new(Self {
            depth: AtomicU32::new(depth),
        })
    }

    fn set(&self, depth: u32) {
        self.depth.store(depth, Ordering::SeqCst);
    }
}

#[async_trait]
impl QueueSource for FixedQueue {
    async fn current_queue_depth(&self, _cancel: &CancellationToken) -> zeno::Result<u32> {
        Ok(self.depth.load(Ordering::SeqCst))
    }
}

/// Baseline config: min=1, max=10, up at 5, down at 0, no damping
fn base_config() -> Config {
    let mut config = Config::default();
    config.github.token = "ghp_test".to_string();
    config.github.organization = Some("acme".to_string());
    config.scaling = ScalingConfig {
        min_runners: 1,
        max_runners: 10,
        scale_up_threshold: 5,
        scale_down_threshold: 0,
        scale_up_hysteresis: 1,
        scale_down_hysteresis: 1,
        cooldown_period_secs: 0,
        check_interval_secs: 1,
        ..ScalingConfig::default()
    };
    config
}

struct Harness {
    controller: Arc<Controller>,
    provider: Arc<MockProvider>,
    queue: Arc<FixedQueue>,
    store: Arc<EventStore>,
    metrics: Arc<ControllerMetrics>,
    config: Arc<Config>,
}

fn harness(config: Config, queue_depth: u32) -> Harness {
    let config = Arc::new(config);
    let queue = FixedQueue::new(queue_depth);
    let provider = Arc::new(MockProvider::new());
    let store = Arc::new(EventStore::in_memory(1000));
    let metrics = Arc::new(ControllerMetrics::new());
    let controller = Arc::new(Controller::new(
        config.clone(),
        queue.clone(),
        provider.clone(),
        store.clone(),
        metrics.clone(),
    ));
    Harness {
        controller,
        provider,
        queue,
        store,
        metrics,
        config,
    }
}

async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

// ---------------------------------------------------------------------------
// Reconciliation flow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scale_up_then_drain_down() {
    let h = harness(base_config(), 8);

    // Queue of 8 with no runners: 8 creates.
    h.controller.reconcile(&CancellationToken::new()).await.unwrap();
    assert_eq!(h.provider.created_count(), 8);
    assert_eq!(h.store.len(), 8);

    // The queue drains. Fresh mock runners are provisioning and therefore
    // ineligible, so the inventory holds.
    h.queue.set(0);
    h.controller.reconcile(&CancellationToken::new()).await.unwrap();
    assert_eq!(h.provider.runners().len(), 8);
    assert!(h.provider.removed().is_empty());
}

#[tokio::test]
async fn repeated_ticks_converge_without_flapping() {
    let h = harness(base_config(), 8);

    h.controller.reconcile(&CancellationToken::new()).await.unwrap();
    let after_first = h.provider.created_count();

    // Same queue, capacity now matches: further ticks change nothing.
    for _ in 0..3 {
        h.controller.reconcile(&CancellationToken::new()).await.unwrap();
    }
    assert_eq!(h.provider.created_count(), after_first);
    assert_eq!(h.store.len(), after_first as usize);
}

#[tokio::test]
async fn cooldown_suppresses_consecutive_actions() {
    let mut config = base_config();
    config.scaling.cooldown_period_secs = 3600;
    let h = harness(config, 8);

    h.controller.reconcile(&CancellationToken::new()).await.unwrap();
    assert_eq!(h.provider.created_count(), 8);

    // Even a drained queue cannot trigger a scale-down inside the window.
    h.queue.set(0);
    h.controller.reconcile(&CancellationToken::new()).await.unwrap();
    assert!(h.provider.removed().is_empty());
}

#[tokio::test]
async fn metrics_reflect_reconciliation() {
    let h = harness(base_config(), 6);

    h.controller.reconcile(&CancellationToken::new()).await.unwrap();

    let snap = h.metrics.snapshot();
    assert_eq!(snap.queue_depth, 6);
    assert_eq!(snap.runners_desired, 6);

    let text = h.metrics.render_prometheus();
    assert!(text.contains("zeno_queue_depth 6"));
    assert!(text.contains("zeno_scale_up_events_total{reason=\"queue_above_threshold\"} 6"));
}

// ---------------------------------------------------------------------------
// Leader election driving the controller
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disabled_election_runs_controller_until_shutdown() {
    let mut config = base_config();
    config.scaling.check_interval_secs = 3600;
    let h = harness(config, 7);

    let shutdown = CancellationToken::new();
    let elector = LeaderElector::new(h.config.leader_election.clone());

    let controller = h.controller.clone();
    let task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            elector
                .run(
                    shutdown,
                    move |token| {
                        let controller = controller.clone();
                        async move { controller.run(token).await }
                    },
                    || {},
                )
                .await
                .unwrap();
        })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    // The immediate reconciliation ran under the assumed leadership.
    assert_eq!(h.provider.created_count(), 7);

    shutdown.cancel();
    task.await.unwrap();
}

// ---------------------------------------------------------------------------
// Event store persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn events_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store_config = StoreConfig {
        enabled: true,
        path: dir
            .path()
            .join("events.json")
            .to_string_lossy()
            .into_owned(),
        max_events: 1000,
    };

    {
        let mut config = base_config();
        config.store = store_config.clone();
        let config = Arc::new(config);
        let queue = FixedQueue::new(8);
        let provider = Arc::new(MockProvider::new());
        let store = Arc::new(EventStore::new(store_config.clone()).unwrap());
        let metrics = Arc::new(ControllerMetrics::new());
        let controller =
            Controller::new(config, queue, provider, store, metrics);
        controller.reconcile(&CancellationToken::new()).await.unwrap();
    }

    // A new process sees the recorded history.
    let reloaded = EventStore::new(store_config).unwrap();
    assert_eq!(reloaded.len(), 8);
    assert!(reloaded.all().iter().all(|e| e.action == "up"));
}

// ---------------------------------------------------------------------------
// Status API over real TCP
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_api_serves_runners_and_events() {
    let h = harness(base_config(), 8);
    h.controller.reconcile(&CancellationToken::new()).await.unwrap();

    let port = free_port().await;
    let mut config = (*h.config).clone();
    config.server.address = "127.0.0.1".to_string();
    config.server.port = port;

    let api = Arc::new(ApiServer::new(
        Arc::new(config),
        h.provider.clone() as Arc<dyn Provider>,
        h.store.clone(),
        h.metrics.clone(),
    ));

    let cancel = CancellationToken::new();
    let task = tokio::spawn(api.serve(cancel.clone()));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let base = format!("http://127.0.0.1:{}", port);

    let runners: serde_json::Value = reqwest::get(format!("{}/api/v1/runners", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(runners["count"], 8);

    let events: serde_json::Value = reqwest::get(format!("{}/api/v1/events", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(events["count"], 8);

    let metrics = reqwest::get(format!("{}/metrics", base))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("zeno_reconcile_total"));

    let health = reqwest::get(format!("{}/health", base))
        .await
        .unwrap();
    assert_eq!(health.status(), 200);

    cancel.cancel();
    task.await.unwrap().unwrap();
}

// ---------------------------------------------------------------------------
// Configuration loading
// ---------------------------------------------------------------------------

#[tokio::test]
async fn config_file_with_env_overlay() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("zeno.toml");
    tokio::fs::write(
        &path,
        r#"
        [github]
        token = "ghp_from_file"
        organization = "acme"

        [scaling]
        max_runners = 20
        "#,
    )
    .await
    .unwrap();

    let mut config = Config::from_file(&path).await.unwrap();
    config.overlay_from(|key| (key == "MAX_RUNNERS").then(|| "7".to_string()));
    config.validate().unwrap();

    assert_eq!(config.github.token, "ghp_from_file");
    // Environment wins over the file.
    assert_eq!(config.scaling.max_runners, 7);
}
