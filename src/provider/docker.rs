//! Docker provider — runs runners as containers on a Docker daemon
//!
//! Talks to the daemon via Unix socket (hyper 1.x over `tokio::net::UnixStream`)
//! or TCP (`reqwest` against `tcp://host:port`). Every container it creates
//! carries the controller labels:
//!
//! ```text
//! zeno.runner.id=<controller id>
//! zeno.runner.name=<runner name>
//! zeno.runner.managed-by=zeno
//! ```
//!
//! so listing can reliably rediscover controller-owned containers and join
//! them back to controller identity.

use bytes::Bytes;
use chrono::{TimeZone, Utc};
use http::Method;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::DockerConfig;
use crate::error::{Result, ZenoError};
use crate::provider::{cancellable, CreateRunnerRequest, Provider, Runner, RunnerStatus, MANAGED_BY};

const DOCKER_API: &str = "/v1.41";

const LABEL_RUNNER_ID: &str = "zeno.runner.id";
const LABEL_RUNNER_NAME: &str = "zeno.runner.name";
const LABEL_MANAGED_BY: &str = "zeno.runner.managed-by";
const LABEL_PREFIX: &str = "zeno.runner";

// ── Docker API response types (minimal subset) ────────────────────────────────

/// A container returned by `GET /containers/json`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerSummary {
    /// Full container ID
    id: String,
    /// Container image
    image: String,
    /// Container state (`running`, `exited`, ...)
    state: String,
    /// Creation time as Unix seconds
    created: i64,
    /// Container labels
    #[serde(default)]
    labels: HashMap<String, String>,
}

/// Response of `POST /containers/create`
#[derive(Debug, Deserialize)]
struct CreateContainerResponse {
    #[serde(rename = "Id")]
    id: String,
}

// ── DockerProvider ────────────────────────────────────────────────────────────

/// Docker daemon runner provider
pub struct DockerProvider {
    config: DockerConfig,
    http: reqwest::Client,
    stop_timeout: Duration,
}

impl DockerProvider {
    /// Create a new Docker provider
    pub fn new(config: DockerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            config,
            http,
            stop_timeout: Duration::from_secs(30),
        })
    }

    /// Override the graceful-stop drain timeout
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    // ── Internal HTTP transport ───────────────────────────────────────────────

    /// Dispatch a request to the Docker API, choosing transport by host scheme.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<(u16, Bytes)> {
        let host = &self.config.host;
        if host.starts_with("tcp://") || host.starts_with("http://") {
            self.request_tcp(method, path, body).await
        } else {
            self.request_unix(method, path, body).await
        }
    }

    /// TCP mode — reqwest against a remote Docker host (`tcp://host:port`)
    async fn request_tcp(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<(u16, Bytes)> {
        let base = self
            .config
            .host
            .replacen("tcp://", "http://", 1);
        let url = format!("{}{}{}", base, DOCKER_API, path);

        let mut req = self.http.request(method, &url);
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ZenoError::Provider(format!("Docker TCP request '{}': {}", url, e)))?;
        let status = resp.status().as_u16();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ZenoError::Provider(format!("Docker TCP body '{}': {}", url, e)))?;

        Ok((status, bytes))
    }

    /// Unix socket mode — hyper 1.x over a `tokio::net::UnixStream`
    #[cfg(unix)]
    async fn request_unix(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<(u16, Bytes)> {
        use http_body_util::{BodyExt, Full};
        use hyper::client::conn::http1;
        use hyper_util::rt::TokioIo;
        use tokio::net::UnixStream;

        let socket = self.config.host.clone();
        let stream = UnixStream::connect(&socket).await.map_err(|e| {
            ZenoError::Provider(format!("Docker: cannot connect to '{}': {}", socket, e))
        })?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = http1::Builder::new()
            .handshake::<_, Full<Bytes>>(io)
            .await
            .map_err(|e| ZenoError::Provider(format!("Docker handshake: {}", e)))?;

        // Drive the connection in the background; errors surface on send.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let uri = format!("{}{}", DOCKER_API, path);
        let payload = match body {
            Some(body) => Bytes::from(serde_json::to_vec(&body)?),
            None => Bytes::new(),
        };

        let req = hyper::Request::builder()
            .method(method)
            .uri(uri)
            .header("Host", "localhost")
            .header("Content-Type", "application/json")
            .body(Full::new(payload))
            .map_err(|e| ZenoError::Provider(format!("Docker request build: {}", e)))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| ZenoError::Provider(format!("Docker send: {}", e)))?;

        let status = resp.status().as_u16();
        let bytes = BodyExt::collect(resp.into_body())
            .await
            .map_err(|e| ZenoError::Provider(format!("Docker collect body: {}", e)))?
            .to_bytes();

        Ok((status, bytes))
    }

    /// Unix socket mode is not supported on non-Unix platforms.
    #[cfg(not(unix))]
    async fn request_unix(
        &self,
        _method: Method,
        _path: &str,
        _body: Option<serde_json::Value>,
    ) -> Result<(u16, Bytes)> {
        Err(ZenoError::Provider(
            "Docker Unix socket connections are not supported on this platform. \
             Set provider.docker.host to a TCP URL (e.g. tcp://localhost:2375)."
                .to_string(),
        ))
    }

    // ── Container operations ──────────────────────────────────────────────────

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let (status, body) = self
            .request(Method::GET, "/containers/json?all=true", None)
            .await?;
        if status != 200 {
            return Err(ZenoError::Provider(format!(
                "Docker list returned {}: {}",
                status,
                String::from_utf8_lossy(&body)
            )));
        }
        serde_json::from_slice::<Vec<ContainerSummary>>(&body)
            .map_err(|e| ZenoError::Provider(format!("Docker list parse error: {}", e)))
    }

    /// Every container carrying the managed-by marker, joined back to
    /// controller identity.
    async fn all_runners(&self) -> Result<Vec<Runner>> {
        let containers = self.list_containers().await?;
        Ok(containers
            .iter()
            .filter(|c| c.labels.get(LABEL_MANAGED_BY).map(String::as_str) == Some(MANAGED_BY))
            .map(|c| self.runner_from_summary(c))
            .collect())
    }

    /// Pull the configured image according to the pull policy.
    async fn ensure_image(&self) -> Result<()> {
        match self.config.pull_policy.as_str() {
            "never" => return Ok(()),
            "if-not-present" => {
                let path = format!("/images/{}/json", self.config.image);
                let (status, _) = self.request(Method::GET, &path, None).await?;
                if status == 200 {
                    return Ok(());
                }
            }
            _ => {}
        }

        tracing::info!(image = self.config.image, "pulling image");
        let path = format!("/images/create?fromImage={}", self.config.image);
        let (status, body) = self.request(Method::POST, &path, None).await?;
        if status != 200 {
            return Err(ZenoError::Provider(format!(
                "Docker image pull returned {}: {}",
                status,
                String::from_utf8_lossy(&body)
            )));
        }
        Ok(())
    }

    fn build_env(&self, req: &CreateRunnerRequest) -> Vec<String> {
        let mut env = vec![
            format!("RUNNER_NAME={}", req.name),
            format!("RUNNER_WORKDIR={}", self.config.runner_work_dir),
        ];

        if !req.github_token.is_empty() {
            env.push(format!("ACCESS_TOKEN={}", req.github_token));
        }

        if let Some(org) = &req.github_org {
            env.push("RUNNER_SCOPE=org".to_string());
            env.push(format!("ORG_NAME={}", org));
        } else if let Some(repo) = &req.github_repo {
            env.push("RUNNER_SCOPE=repo".to_string());
            env.push(format!("REPO_URL=https://github.com/{}", repo));
        }

        if !req.labels.is_empty() {
            env.push(format!("LABELS={}", req.labels.join(",")));
        }

        env
    }

    fn build_labels(&self, runner_id: &str, req: &CreateRunnerRequest) -> HashMap<String, String> {
        let mut labels = HashMap::from([
            (LABEL_RUNNER_ID.to_string(), runner_id.to_string()),
            (LABEL_RUNNER_NAME.to_string(), req.name.clone()),
            (LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string()),
        ]);

        for (k, v) in &self.config.labels {
            labels.insert(k.clone(), v.clone());
        }

        for (k, v) in &req.metadata {
            labels.insert(format!("{}.{}", LABEL_PREFIX, k), v.clone());
        }

        labels
    }

    fn runner_from_summary(&self, c: &ContainerSummary) -> Runner {
        Runner {
            id: c.labels.get(LABEL_RUNNER_ID).cloned().unwrap_or_default(),
            name: c.labels.get(LABEL_RUNNER_NAME).cloned().unwrap_or_default(),
            status: map_container_state(&c.state),
            labels: Vec::new(),
            provider: "docker".to_string(),
            provider_id: c.id.clone(),
            created_at: Utc
                .timestamp_opt(c.created, 0)
                .single()
                .unwrap_or_else(Utc::now),
            metadata: HashMap::from([
                ("container_id".to_string(), c.id.clone()),
                ("image".to_string(), c.image.clone()),
                ("state".to_string(), c.state.clone()),
            ]),
        }
    }
}

#[async_trait::async_trait]
impl Provider for DockerProvider {
    fn name(&self) -> &str {
        "docker"
    }

    async fn list_runners(&self, cancel: &CancellationToken) -> Result<Vec<Runner>> {
        cancellable(cancel, self.all_runners()).await
    }

    async fn get_runner(&self, cancel: &CancellationToken, id: &str) -> Result<Runner> {
        cancellable(cancel, async {
            self.all_runners()
                .await?
                .into_iter()
                .find(|r| r.id == id)
                .ok_or_else(|| ZenoError::RunnerNotFound(id.to_string()))
        })
        .await
    }

    async fn create_runner(
        &self,
        cancel: &CancellationToken,
        req: &CreateRunnerRequest,
    ) -> Result<Runner> {
        cancellable(cancel, async {
            let runner_id = uuid::Uuid::new_v4().to_string();
            let container_name = format!("zeno-runner-{}", &runner_id[..8]);

            tracing::info!(id = runner_id, name = req.name, "creating runner");

            self.ensure_image().await?;

            let body = serde_json::json!({
                "Image": self.config.image,
                "Env": self.build_env(req),
                "Labels": self.build_labels(&runner_id, req),
                "HostConfig": {
                    "NetworkMode": self.config.network,
                    "Binds": self.config.volumes,
                    "NanoCpus": (self.config.cpu_limit * 1e9) as i64,
                    "Memory": self.config.memory_limit_mb * 1024 * 1024,
                },
            });

            let path = format!("/containers/create?name={}", container_name);
            let (status, resp_body) = self.request(Method::POST, &path, Some(body)).await?;
            if status != 201 {
                return Err(ZenoError::Provider(format!(
                    "Docker create returned {}: {}",
                    status,
                    String::from_utf8_lossy(&resp_body)
                )));
            }

            let created: CreateContainerResponse = serde_json::from_slice(&resp_body)
                .map_err(|e| ZenoError::Provider(format!("Docker create parse error: {}", e)))?;

            let start_path = format!("/containers/{}/start", created.id);
            let (status, start_body) = self.request(Method::POST, &start_path, None).await?;
            if status != 204 {
                // No orphans: destroy the container before reporting the failure.
                let cleanup = format!("/containers/{}?force=true&v=true", created.id);
                let _ = self.request(Method::DELETE, &cleanup, None).await;
                return Err(ZenoError::Provider(format!(
                    "Docker start returned {}: {}",
                    status,
                    String::from_utf8_lossy(&start_body)
                )));
            }

            tracing::info!(
                id = runner_id,
                container_id = created.id,
                name = req.name,
                "runner created successfully"
            );

            Ok(Runner {
                id: runner_id,
                name: req.name.clone(),
                status: RunnerStatus::Provisioning,
                labels: req.labels.clone(),
                provider: "docker".to_string(),
                provider_id: created.id.clone(),
                created_at: Utc::now(),
                metadata: HashMap::from([
                    ("container_id".to_string(), created.id),
                    ("image".to_string(), self.config.image.clone()),
                ]),
            })
        })
        .await
    }

    async fn remove_runner(
        &self,
        cancel: &CancellationToken,
        id: &str,
        graceful: bool,
    ) -> Result<()> {
        cancellable(cancel, async {
            // Already gone: removal is idempotent.
            let runner = match self.all_runners().await?.into_iter().find(|r| r.id == id) {
                Some(runner) => runner,
                None => return Ok(()),
            };

            tracing::info!(
                id,
                container_id = runner.provider_id,
                graceful,
                "removing runner"
            );

            let mut force = !graceful;
            if graceful {
                let stop_path = format!(
                    "/containers/{}/stop?t={}",
                    runner.provider_id,
                    self.stop_timeout.as_secs()
                );
                let (status, _) = self.request(Method::POST, &stop_path, None).await?;
                // 204 stopped, 304 already stopped; anything else falls back to force.
                if status != 204 && status != 304 {
                    tracing::warn!(status, "graceful stop failed, forcing removal");
                    force = true;
                }
            }

            let remove_path = format!(
                "/containers/{}?force={}&v=true",
                runner.provider_id, force
            );
            let (status, body) = self.request(Method::DELETE, &remove_path, None).await?;
            if status != 204 && status != 404 {
                return Err(ZenoError::Provider(format!(
                    "Docker remove returned {}: {}",
                    status,
                    String::from_utf8_lossy(&body)
                )));
            }

            tracing::info!(id, "runner removed successfully");
            Ok(())
        })
        .await
    }

    async fn health_check(&self, cancel: &CancellationToken) -> Result<()> {
        cancellable(cancel, async {
            let (status, _) = self.request(Method::GET, "/_ping", None).await?;
            if status != 200 {
                return Err(ZenoError::Provider(format!(
                    "docker health check failed with status {}",
                    status
                )));
            }
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        // Connections are per-request; nothing held open.
        Ok(())
    }
}

/// Map a Docker container state to a runner status
fn map_container_state(state: &str) -> RunnerStatus {
    match state {
        "running" => RunnerStatus::Running,
        "exited" | "dead" => RunnerStatus::Terminated,
        "paused" => RunnerStatus::Idle,
        "restarting" => RunnerStatus::Provisioning,
        "removing" => RunnerStatus::Terminating,
        "created" => RunnerStatus::Pending,
        _ => RunnerStatus::Failed,
    }
}
