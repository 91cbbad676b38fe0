//! Provider port — uniform contract over heterogeneous runner backends
//!
//! A provider owns the backing resources (containers, VMs); the controller
//! only holds transient `Runner` views rediscovered via `list_runners`.
//! Every resource a provider creates must carry the managed-by marker so
//! listing never returns foreign resources.

pub mod docker;

pub use docker::DockerProvider;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ZenoError};

/// Value of the managed-by marker written on every controller-created resource
pub const MANAGED_BY: &str = "zeno";

/// Runner lifecycle state as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerStatus {
    Pending,
    Provisioning,
    Running,
    Idle,
    Busy,
    Terminating,
    Terminated,
    Failed,
}

impl RunnerStatus {
    /// Whether a runner in this state may be selected for scale-down
    pub fn removable(&self) -> bool {
        matches!(self, Self::Idle | Self::Running)
    }
}

impl std::fmt::Display for RunnerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Provisioning => write!(f, "provisioning"),
            Self::Running => write!(f, "running"),
            Self::Idle => write!(f, "idle"),
            Self::Busy => write!(f, "busy"),
            Self::Terminating => write!(f, "terminating"),
            Self::Terminated => write!(f, "terminated"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A runner instance managed by a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runner {
    /// Controller-assigned opaque id, stable for the runner's lifetime
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Current lifecycle state
    pub status: RunnerStatus,
    /// Labels the runner registers with
    #[serde(default)]
    pub labels: Vec<String>,
    /// Provider tag (e.g. `docker`)
    pub provider: String,
    /// Backend-assigned resource id
    pub provider_id: String,
    /// Resource creation time
    pub created_at: DateTime<Utc>,
    /// Free-form provider metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Parameters for provisioning a new runner
#[derive(Debug, Clone, Default)]
pub struct CreateRunnerRequest {
    /// Desired runner name
    pub name: String,
    /// Labels the runner registers with
    pub labels: Vec<String>,
    /// Token the runner uses to self-register
    pub github_token: String,
    /// Organization scope, if org-scoped
    pub github_org: Option<String>,
    /// Repository scope (`owner/name`), if repo-scoped
    pub github_repo: Option<String>,
    /// Extra metadata stored as provider-native tags
    pub metadata: HashMap<String, String>,
}

/// Contract every runner backend implements.
///
/// Every I/O operation takes the caller's cancellation token so lease loss
/// can cancel in-flight calls; implementations race their backend requests
/// against it and return `ZenoError::Cancelled` when it fires first.
///
/// `list_runners` must return every controller-managed runner across all
/// non-final states, including `terminating`, so accounting stays accurate.
/// `remove_runner` on an already-absent runner is a success.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider identifier
    fn name(&self) -> &str;

    /// All runners carrying the managed-by marker
    async fn list_runners(&self, cancel: &CancellationToken) -> Result<Vec<Runner>>;

    /// Lookup by controller id
    async fn get_runner(&self, cancel: &CancellationToken, id: &str) -> Result<Runner>;

    /// Provision a new runner. The returned runner may still be
    /// `pending`/`provisioning`; reaching `running` is observed via
    /// subsequent listing. Partial failures must not leave orphans.
    async fn create_runner(
        &self,
        cancel: &CancellationToken,
        req: &CreateRunnerRequest,
    ) -> Result<Runner>;

    /// Terminate and remove a runner. Graceful mode requests an in-band
    /// drain before forced termination. Idempotent.
    async fn remove_runner(
        &self,
        cancel: &CancellationToken,
        id: &str,
        graceful: bool,
    ) -> Result<()>;

    /// Cheap liveness probe for the readiness gate
    async fn health_check(&self, cancel: &CancellationToken) -> Result<()>;

    /// Release held resources. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Race a provider operation against the caller's cancellation token.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    op: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        result = op => result,
        _ = cancel.cancelled() => Err(ZenoError::Cancelled),
    }
}

// ---------------------------------------------------------------------------
// MockProvider — records operations for testing
// ---------------------------------------------------------------------------

/// In-memory provider that records operations (test-only)
#[derive(Default)]
pub struct MockProvider {
    state: std::sync::Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    runners: Vec<Runner>,
    removed: Vec<(String, bool)>,
    create_failures: u32,
    remove_failures: u32,
    list_fails: bool,
    healthy: bool,
    closed: bool,
    create_seq: u32,
}

impl MockProvider {
    /// Create an empty healthy mock
    pub fn new() -> Self {
        let mock = Self::default();
        mock.state.lock().unwrap().healthy = true;
        mock
    }

    /// Pre-seed the runner inventory
    pub fn with_runners(self, runners: Vec<Runner>) -> Self {
        self.state.lock().unwrap().runners = runners;
        self
    }

    /// Fail the next `n` create calls
    pub fn fail_next_creates(&self, n: u32) {
        self.state.lock().unwrap().create_failures = n;
    }

    /// Fail the next `n` remove calls
    pub fn fail_next_removes(&self, n: u32) {
        self.state.lock().unwrap().remove_failures = n;
    }

    /// Make `list_runners` fail
    pub fn fail_list(&self, fail: bool) {
        self.state.lock().unwrap().list_fails = fail;
    }

    /// Toggle health-check result
    pub fn set_healthy(&self, healthy: bool) {
        self.state.lock().unwrap().healthy = healthy;
    }

    /// Ids and graceful flags of removed runners, in order
    pub fn removed(&self) -> Vec<(String, bool)> {
        self.state.lock().unwrap().removed.clone()
    }

    /// Current inventory snapshot
    pub fn runners(&self) -> Vec<Runner> {
        self.state.lock().unwrap().runners.clone()
    }

    /// Number of successful creates
    pub fn created_count(&self) -> u32 {
        self.state.lock().unwrap().create_seq
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn list_runners(&self, cancel: &CancellationToken) -> Result<Vec<Runner>> {
        if cancel.is_cancelled() {
            return Err(ZenoError::Cancelled);
        }
        let state = self.state.lock().unwrap();
        if state.list_fails {
            return Err(ZenoError::Provider("mock list failure".to_string()));
        }
        Ok(state.runners.clone())
    }

    async fn get_runner(&self, cancel: &CancellationToken, id: &str) -> Result<Runner> {
        if cancel.is_cancelled() {
            return Err(ZenoError::Cancelled);
        }
        let state = self.state.lock().unwrap();
        state
            .runners
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| ZenoError::RunnerNotFound(id.to_string()))
    }

    async fn create_runner(
        &self,
        cancel: &CancellationToken,
        req: &CreateRunnerRequest,
    ) -> Result<Runner> {
        if cancel.is_cancelled() {
            return Err(ZenoError::Cancelled);
        }
        let mut state = self.state.lock().unwrap();
        if state.create_failures > 0 {
            state.create_failures -= 1;
            return Err(ZenoError::Provider("mock create failure".to_string()));
        }
        state.create_seq += 1;
        let runner = Runner {
            id: format!("mock-{:04}", state.create_seq),
            name: req.name.clone(),
            status: RunnerStatus::Provisioning,
            labels: req.labels.clone(),
            provider: "mock".to_string(),
            provider_id: format!("container-{:04}", state.create_seq),
            created_at: Utc::now(),
            metadata: HashMap::new(),
        };
        state.runners.push(runner.clone());
        Ok(runner)
    }

    async fn remove_runner(
        &self,
        cancel: &CancellationToken,
        id: &str,
        graceful: bool,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ZenoError::Cancelled);
        }
        let mut state = self.state.lock().unwrap();
        if state.remove_failures > 0 {
            state.remove_failures -= 1;
            return Err(ZenoError::Provider("mock remove failure".to_string()));
        }
        // Removing an already-absent runner is a success.
        state.runners.retain(|r| r.id != id);
        state.removed.push((id.to_string(), graceful));
        Ok(())
    }

    async fn health_check(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ZenoError::Cancelled);
        }
        if self.state.lock().unwrap().healthy {
            Ok(())
        } else {
            Err(ZenoError::Provider("mock unhealthy".to_string()))
        }
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(id: &str, status: RunnerStatus) -> Runner {
        Runner {
            id: id.to_string(),
            name: format!("zeno-runner-{}", id),
            status,
            labels: vec!["self-hosted".to_string()],
            provider: "mock".to_string(),
            provider_id: format!("c-{}", id),
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_status_display() {
        assert_eq!(RunnerStatus::Pending.to_string(), "pending");
        assert_eq!(RunnerStatus::Provisioning.to_string(), "provisioning");
        assert_eq!(RunnerStatus::Running.to_string(), "running");
        assert_eq!(RunnerStatus::Idle.to_string(), "idle");
        assert_eq!(RunnerStatus::Busy.to_string(), "busy");
        assert_eq!(RunnerStatus::Terminating.to_string(), "terminating");
        assert_eq!(RunnerStatus::Terminated.to_string(), "terminated");
        assert_eq!(RunnerStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_status_removable() {
        assert!(RunnerStatus::Idle.removable());
        assert!(RunnerStatus::Running.removable());
        assert!(!RunnerStatus::Busy.removable());
        assert!(!RunnerStatus::Terminating.removable());
        assert!(!RunnerStatus::Terminated.removable());
        assert!(!RunnerStatus::Failed.removable());
        assert!(!RunnerStatus::Pending.removable());
        assert!(!RunnerStatus::Provisioning.removable());
    }

    #[test]
    fn test_status_serde_lowercase() {
        let json = serde_json::to_string(&RunnerStatus::Provisioning).unwrap();
        assert_eq!(json, r#""provisioning""#);
        let parsed: RunnerStatus = serde_json::from_str(r#""idle""#).unwrap();
        assert_eq!(parsed, RunnerStatus::Idle);
    }

    #[test]
    fn test_runner_serialization() {
        let r = runner("r1", RunnerStatus::Running);
        let json = serde_json::to_string(&r).unwrap();
        let parsed: Runner = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, "r1");
        assert_eq!(parsed.status, RunnerStatus::Running);
        assert_eq!(parsed.provider, "mock");
    }

    #[tokio::test]
    async fn test_mock_create_and_list() {
        let cancel = CancellationToken::new();
        let mock = MockProvider::new();
        let req = CreateRunnerRequest {
            name: "zeno-runner-1".to_string(),
            labels: vec!["self-hosted".to_string()],
            ..CreateRunnerRequest::default()
        };
        let created = mock.create_runner(&cancel, &req).await.unwrap();
        assert_eq!(created.status, RunnerStatus::Provisioning);

        let listed = mock.list_runners(&cancel).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);
    }

    #[tokio::test]
    async fn test_mock_get_runner() {
        let cancel = CancellationToken::new();
        let mock = MockProvider::new().with_runners(vec![runner("a", RunnerStatus::Idle)]);
        assert_eq!(mock.get_runner(&cancel, "a").await.unwrap().id, "a");
        assert!(mock.get_runner(&cancel, "zzz").await.is_err());
    }

    #[tokio::test]
    async fn test_mock_remove_is_idempotent() {
        let cancel = CancellationToken::new();
        let mock = MockProvider::new().with_runners(vec![runner("a", RunnerStatus::Idle)]);
        mock.remove_runner(&cancel, "a", true).await.unwrap();
        // Absent runner: still a success, no side effect on inventory.
        mock.remove_runner(&cancel, "a", true).await.unwrap();
        assert!(mock.runners().is_empty());
        assert_eq!(mock.removed().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_failure_injection() {
        let cancel = CancellationToken::new();
        let mock = MockProvider::new();
        mock.fail_next_creates(1);
        let req = CreateRunnerRequest::default();
        assert!(mock.create_runner(&cancel, &req).await.is_err());
        assert!(mock.create_runner(&cancel, &req).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_list_failure() {
        let cancel = CancellationToken::new();
        let mock = MockProvider::new();
        mock.fail_list(true);
        assert!(mock.list_runners(&cancel).await.is_err());
        mock.fail_list(false);
        assert!(mock.list_runners(&cancel).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_health_and_close() {
        let cancel = CancellationToken::new();
        let mock = MockProvider::new();
        assert!(mock.health_check(&cancel).await.is_ok());
        mock.set_healthy(false);
        assert!(mock.health_check(&cancel).await.is_err());
        mock.close().await.unwrap();
        assert!(mock.is_closed());
    }

    #[tokio::test]
    async fn test_mock_honors_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mock = MockProvider::new().with_runners(vec![runner("a", RunnerStatus::Idle)]);

        let req = CreateRunnerRequest::default();
        assert!(matches!(
            mock.create_runner(&cancel, &req).await.unwrap_err(),
            ZenoError::Cancelled
        ));
        assert!(matches!(
            mock.list_runners(&cancel).await.unwrap_err(),
            ZenoError::Cancelled
        ));
        assert!(matches!(
            mock.remove_runner(&cancel, "a", true).await.unwrap_err(),
            ZenoError::Cancelled
        ));
        // Nothing happened: no creates recorded, inventory untouched.
        assert_eq!(mock.created_count(), 0);
        assert_eq!(mock.runners().len(), 1);
        assert!(mock.removed().is_empty());
    }

    #[tokio::test]
    async fn test_cancellable_helper() {
        let cancel = CancellationToken::new();
        let ok = cancellable(&cancel, async { Ok(7) }).await.unwrap();
        assert_eq!(ok, 7);

        cancel.cancel();
        let err = cancellable(&cancel, std::future::pending::<Result<u32>>())
            .await
            .unwrap_err();
        assert!(matches!(err, ZenoError::Cancelled));
    }

    #[test]
    fn test_provider_trait_is_object_safe() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MockProvider>();
        let _: Option<Box<dyn Provider>> = None;
    }
}
