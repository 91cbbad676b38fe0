//! Configuration types for the Zeno controller
//!
//! Configuration is loaded from a TOML file, overlaid with environment
//! variables, and validated fail-fast before any component starts.
//!
//! # TOML Example
//!
//! ```toml
//! dry_run = false
//!
//! [github]
//! token = "ghp_..."
//! organization = "my-org"
//!
//! [scaling]
//! min_runners = 1
//! max_runners = 10
//! scale_up_threshold = 5
//!
//! [provider]
//! kind = "docker"
//!
//! [provider.docker]
//! host = "/var/run/docker.sock"
//! image = "ghcr.io/my-org/runner:latest"
//! ```

pub mod scaling;

pub use scaling::ScalingConfig;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, ZenoError};

/// Top-level controller configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Compute decisions but never call the provider
    #[serde(default)]
    pub dry_run: bool,

    /// GitHub API access and queue-client tuning
    #[serde(default)]
    pub github: GithubConfig,

    /// Scaling thresholds and bounds
    #[serde(default)]
    pub scaling: ScalingConfig,

    /// Infrastructure provider selection
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Runner naming and labels passed to the provider on create
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Scale-event persistence
    #[serde(default)]
    pub store: StoreConfig,

    /// Single-writer leader election
    #[serde(default)]
    pub leader_election: LeaderElectionConfig,

    /// Status API server
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging and metrics exposure
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// GitHub API client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    /// Personal access token or app token used for the queue query and
    /// injected into runners for self-registration
    #[serde(default)]
    pub token: String,

    /// Organization scope — exactly one of `organization`/`repository`
    #[serde(default)]
    pub organization: Option<String>,

    /// Repository scope (`owner/name`)
    #[serde(default)]
    pub repository: Option<String>,

    /// API base URL; overridable for tests
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Additional attempts after the first failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff in milliseconds for the first retry
    #[serde(default = "default_retry_backoff_base_ms")]
    pub retry_backoff_base_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "default_retry_backoff_max_ms")]
    pub retry_backoff_max_ms: u64,

    /// Queue-depth cache TTL in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Warn when the remaining rate limit drops below this
    #[serde(default = "default_rate_limit_buffer")]
    pub rate_limit_buffer: i64,
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_base_ms() -> u64 {
    1000
}

fn default_retry_backoff_max_ms() -> u64 {
    30_000
}

fn default_cache_ttl_secs() -> u64 {
    30
}

fn default_rate_limit_buffer() -> i64 {
    100
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            organization: None,
            repository: None,
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_base_ms: default_retry_backoff_base_ms(),
            retry_backoff_max_ms: default_retry_backoff_max_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            rate_limit_buffer: default_rate_limit_buffer(),
        }
    }
}

impl GithubConfig {
    /// Per-request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Cache TTL for queue samples
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Base backoff for the first retry
    pub fn retry_backoff_base(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_base_ms)
    }

    /// Backoff ceiling
    pub fn retry_backoff_max(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_max_ms)
    }
}

/// Infrastructure provider selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider discriminator; currently `docker`
    #[serde(default = "default_provider_kind")]
    pub kind: String,

    /// Docker daemon settings
    #[serde(default)]
    pub docker: DockerConfig,
}

fn default_provider_kind() -> String {
    "docker".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            docker: DockerConfig::default(),
        }
    }
}

/// Docker daemon provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Unix socket path or `tcp://host:port`
    #[serde(default = "default_docker_host")]
    pub host: String,

    /// Runner container image
    #[serde(default = "default_docker_image")]
    pub image: String,

    /// Docker network for runner containers
    #[serde(default = "default_docker_network")]
    pub network: String,

    /// CPU limit per runner, in whole/fractional cores
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: f64,

    /// Memory limit per runner, in megabytes
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,

    /// Bind mounts in Docker `host:container[:mode]` form
    #[serde(default)]
    pub volumes: Vec<String>,

    /// Image pull policy: `always`, `if-not-present`, or `never`
    #[serde(default = "default_pull_policy")]
    pub pull_policy: String,

    /// Working directory injected into the runner
    #[serde(default = "default_runner_work_dir")]
    pub runner_work_dir: String,

    /// Extra container labels
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

fn default_docker_host() -> String {
    "/var/run/docker.sock".to_string()
}

fn default_docker_image() -> String {
    "ghcr.io/actions/actions-runner:latest".to_string()
}

fn default_docker_network() -> String {
    "bridge".to_string()
}

fn default_cpu_limit() -> f64 {
    2.0
}

fn default_memory_limit_mb() -> u64 {
    2048
}

fn default_pull_policy() -> String {
    "if-not-present".to_string()
}

fn default_runner_work_dir() -> String {
    "/tmp/runner".to_string()
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            host: default_docker_host(),
            image: default_docker_image(),
            network: default_docker_network(),
            cpu_limit: default_cpu_limit(),
            memory_limit_mb: default_memory_limit_mb(),
            volumes: Vec::new(),
            pull_policy: default_pull_policy(),
            runner_work_dir: default_runner_work_dir(),
            labels: HashMap::new(),
        }
    }
}

/// Runner naming and label configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Prefix for generated runner names
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Labels the runner registers with
    #[serde(default = "default_runner_labels")]
    pub labels: Vec<String>,
}

fn default_name_prefix() -> String {
    "zeno-runner".to_string()
}

fn default_runner_labels() -> Vec<String> {
    vec!["self-hosted".to_string(), "zeno".to_string()]
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            name_prefix: default_name_prefix(),
            labels: default_runner_labels(),
        }
    }
}

/// Scale-event store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Persist events to disk
    #[serde(default)]
    pub enabled: bool,

    /// Path of the JSON event file
    #[serde(default = "default_store_path")]
    pub path: String,

    /// Maximum retained events; oldest are evicted
    #[serde(default = "default_max_events")]
    pub max_events: usize,
}

fn default_store_path() -> String {
    "zeno-events.json".to_string()
}

fn default_max_events() -> usize {
    1000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_store_path(),
            max_events: default_max_events(),
        }
    }
}

/// Leader election configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderElectionConfig {
    /// Run leader election; when disabled the process is the permanent leader
    #[serde(default)]
    pub enabled: bool,

    /// Lock file on a shared filesystem
    #[serde(default = "default_lock_file_path")]
    pub lock_file_path: String,

    /// Lease duration in seconds
    #[serde(default = "default_lease_duration_secs")]
    pub lease_duration_secs: u64,

    /// Renew deadline in seconds; must be below the lease duration
    #[serde(default = "default_renew_deadline_secs")]
    pub renew_deadline_secs: u64,

    /// Seconds between acquisition attempts
    #[serde(default = "default_retry_period_secs")]
    pub retry_period_secs: u64,
}

fn default_lock_file_path() -> String {
    "/tmp/zeno-leader.lock".to_string()
}

fn default_lease_duration_secs() -> u64 {
    15
}

fn default_renew_deadline_secs() -> u64 {
    10
}

fn default_retry_period_secs() -> u64 {
    2
}

impl Default for LeaderElectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            lock_file_path: default_lock_file_path(),
            lease_duration_secs: default_lease_duration_secs(),
            renew_deadline_secs: default_renew_deadline_secs(),
            retry_period_secs: default_retry_period_secs(),
        }
    }
}

impl LeaderElectionConfig {
    /// Interval between acquisition attempts
    pub fn retry_period(&self) -> Duration {
        Duration::from_secs(self.retry_period_secs)
    }
}

/// Status API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_server_address")]
    pub address: String,

    /// Bind port
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Require an API key on `/api/v1/*`
    #[serde(default)]
    pub enable_auth: bool,

    /// Accepted API key
    #[serde(default)]
    pub api_key: String,
}

fn default_server_address() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_server_address(),
            port: default_server_port(),
            enable_auth: false,
            api_key: String::new(),
        }
    }
}

/// Logging and metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Expose the Prometheus text endpoint
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics endpoint path
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,

    /// Health endpoint path
    #[serde(default = "default_health_path")]
    pub health_check_path: String,

    /// Readiness endpoint path
    #[serde(default = "default_readiness_path")]
    pub readiness_path: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_readiness_path() -> String {
    "/ready".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            enable_metrics: true,
            metrics_path: default_metrics_path(),
            health_check_path: default_health_path(),
            readiness_path: default_readiness_path(),
        }
    }
}

impl Config {
    /// Load configuration: optional TOML file, then environment overlay,
    /// then validation.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p).await?,
            None => Self::default(),
        };
        config.apply_env_overlay();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            ZenoError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ZenoError::Config(format!("Failed to parse TOML config: {}", e)))
    }

    /// Overlay settings from process environment variables
    pub fn apply_env_overlay(&mut self) {
        self.overlay_from(|key| std::env::var(key).ok());
    }

    /// Overlay settings from an arbitrary lookup (injectable for tests)
    pub fn overlay_from<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = get("GITHUB_TOKEN") {
            self.github.token = v;
        }
        if let Some(v) = get("GITHUB_ORG") {
            self.github.organization = Some(v);
        }
        if let Some(v) = get("GITHUB_REPO") {
            self.github.repository = Some(v);
        }
        if let Some(v) = get("MIN_RUNNERS").and_then(|v| v.parse().ok()) {
            self.scaling.min_runners = v;
        }
        if let Some(v) = get("MAX_RUNNERS").and_then(|v| v.parse().ok()) {
            self.scaling.max_runners = v;
        }
        if let Some(v) = get("SCALE_UP_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.scaling.scale_up_threshold = v;
        }
        if let Some(v) = get("SCALE_DOWN_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.scaling.scale_down_threshold = v;
        }
        if let Some(v) = get("CHECK_INTERVAL_SEC").and_then(|v| v.parse().ok()) {
            self.scaling.check_interval_secs = v;
        }
        if let Some(v) = get("DRY_RUN") {
            self.dry_run = v == "true" || v == "1";
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.observability.log_level = v;
        }
        if let Some(v) = get("ZENO_API_KEY") {
            self.server.api_key = v;
            self.server.enable_auth = true;
        }
    }

    /// Validate the configuration for consistency. Fails fast at startup.
    pub fn validate(&self) -> Result<()> {
        if self.github.token.is_empty() {
            return Err(ZenoError::Config("github.token is required".to_string()));
        }

        match (&self.github.organization, &self.github.repository) {
            (None, None) => {
                return Err(ZenoError::Config(
                    "exactly one of github.organization or github.repository must be set"
                        .to_string(),
                ));
            }
            (Some(_), Some(_)) => {
                return Err(ZenoError::Config(
                    "github.organization and github.repository are mutually exclusive".to_string(),
                ));
            }
            _ => {}
        }

        self.scaling.validate()?;

        if self.provider.kind != "docker" {
            return Err(ZenoError::Config(format!(
                "unknown provider kind: {}",
                self.provider.kind
            )));
        }

        if self.store.enabled && self.store.path.is_empty() {
            return Err(ZenoError::Config(
                "store.path is required when store.enabled".to_string(),
            ));
        }

        if self.leader_election.enabled
            && self.leader_election.renew_deadline_secs >= self.leader_election.lease_duration_secs
        {
            return Err(ZenoError::Config(
                "leader_election.renew_deadline_secs must be below lease_duration_secs"
                    .to_string(),
            ));
        }

        if self.server.enable_auth && self.server.api_key.is_empty() {
            return Err(ZenoError::Config(
                "server.api_key is required when server.enable_auth".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.github.token = "ghp_test".to_string();
        config.github.organization = Some("acme".to_string());
        config
    }

    // --- validation ---

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_missing_token_rejected() {
        let mut config = valid_config();
        config.github.token = String::new();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("token"));
    }

    #[test]
    fn test_no_scope_rejected() {
        let mut config = valid_config();
        config.github.organization = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_both_scopes_rejected() {
        let mut config = valid_config();
        config.github.repository = Some("acme/widgets".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_repo_scope_alone_accepted() {
        let mut config = valid_config();
        config.github.organization = None;
        config.github.repository = Some("acme/widgets".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut config = valid_config();
        config.provider.kind = "balloon".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("balloon"));
    }

    #[test]
    fn test_renew_deadline_must_be_below_lease() {
        let mut config = valid_config();
        config.leader_election.enabled = true;
        config.leader_election.lease_duration_secs = 10;
        config.leader_election.renew_deadline_secs = 10;
        assert!(config.validate().is_err());

        config.leader_election.renew_deadline_secs = 5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_renew_deadline_ignored_when_disabled() {
        let mut config = valid_config();
        config.leader_election.enabled = false;
        config.leader_election.lease_duration_secs = 5;
        config.leader_election.renew_deadline_secs = 10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_auth_requires_key() {
        let mut config = valid_config();
        config.server.enable_auth = true;
        assert!(config.validate().is_err());
        config.server.api_key = "secret".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_store_enabled_requires_path() {
        let mut config = valid_config();
        config.store.enabled = true;
        config.store.path = String::new();
        assert!(config.validate().is_err());
    }

    // --- TOML parsing ---

    #[test]
    fn test_from_toml_minimal() {
        let config = Config::from_toml(
            r#"
            [github]
            token = "ghp_abc"
            repository = "acme/widgets"
            "#,
        )
        .unwrap();
        assert_eq!(config.github.token, "ghp_abc");
        assert_eq!(config.github.repository.as_deref(), Some("acme/widgets"));
        assert_eq!(config.scaling.max_runners, 10);
        assert_eq!(config.provider.kind, "docker");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_full_sections() {
        let config = Config::from_toml(
            r#"
            dry_run = true

            [github]
            token = "t"
            organization = "acme"
            max_retries = 5
            cache_ttl_secs = 10

            [scaling]
            min_runners = 2
            max_runners = 20
            scale_up_threshold = 8
            scale_down_threshold = 1
            enable_predictive_scaling = true

            [provider.docker]
            host = "tcp://localhost:2375"
            image = "acme/runner:1"

            [store]
            enabled = true
            path = "/var/lib/zeno/events.json"
            max_events = 500

            [leader_election]
            enabled = true
            lock_file_path = "/var/run/zeno.lock"

            [server]
            port = 9090
            enable_auth = true
            api_key = "secret"

            [observability]
            log_level = "debug"
            "#,
        )
        .unwrap();
        assert!(config.dry_run);
        assert_eq!(config.github.max_retries, 5);
        assert_eq!(config.scaling.min_runners, 2);
        assert!(config.scaling.enable_predictive_scaling);
        assert_eq!(config.provider.docker.host, "tcp://localhost:2375");
        assert_eq!(config.store.max_events, 500);
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.observability.log_level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_invalid() {
        assert!(Config::from_toml("this is { not toml").is_err());
    }

    // --- env overlay ---

    #[test]
    fn test_env_overlay_sets_scope_and_thresholds() {
        let mut config = Config::default();
        let env: HashMap<&str, &str> = [
            ("GITHUB_TOKEN", "ghp_env"),
            ("GITHUB_ORG", "acme"),
            ("MIN_RUNNERS", "3"),
            ("MAX_RUNNERS", "12"),
            ("SCALE_UP_THRESHOLD", "7"),
            ("DRY_RUN", "true"),
        ]
        .into_iter()
        .collect();

        config.overlay_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.github.token, "ghp_env");
        assert_eq!(config.github.organization.as_deref(), Some("acme"));
        assert_eq!(config.scaling.min_runners, 3);
        assert_eq!(config.scaling.max_runners, 12);
        assert_eq!(config.scaling.scale_up_threshold, 7);
        assert!(config.dry_run);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overlay_ignores_unparseable_numbers() {
        let mut config = Config::default();
        config.overlay_from(|key| {
            (key == "MAX_RUNNERS").then(|| "a-dozen".to_string())
        });
        assert_eq!(config.scaling.max_runners, 10);
    }

    #[test]
    fn test_env_overlay_api_key_enables_auth() {
        let mut config = Config::default();
        config.overlay_from(|key| (key == "ZENO_API_KEY").then(|| "secret".to_string()));
        assert!(config.server.enable_auth);
        assert_eq!(config.server.api_key, "secret");
    }

    // --- file loading ---

    #[tokio::test]
    async fn test_from_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zeno.toml");
        tokio::fs::write(
            &path,
            r#"
            [github]
            token = "ghp_file"
            organization = "acme"
            "#,
        )
        .await
        .unwrap();

        let config = Config::from_file(&path).await.unwrap();
        assert_eq!(config.github.token, "ghp_file");
    }

    #[tokio::test]
    async fn test_from_file_missing() {
        let err = Config::from_file("/nonexistent/zeno.toml").await.unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
