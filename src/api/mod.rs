//! Status API — read-only HTTP surface over the provider, event log, and
//! metrics
//!
//! Serves health/readiness probes, the Prometheus text endpoint, and the
//! `/api/v1/*` views. Handler logic is network-free (`handle()` maps a
//! request to a typed response) with a thin hyper http1 accept loop on
//! top. `/api/v1/*` endpoints optionally require an API key via the
//! `X-API-Key` header or a bearer token.

use bytes::Bytes;
use chrono::Utc;
use http::HeaderMap;
use http_body_util::Full;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::github::QueueClient;
use crate::observability::metrics::ControllerMetrics;
use crate::provider::Provider;
use crate::store::EventStore;

/// Deadline for the provider probe behind `/ready`
const READINESS_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum events returned by `/api/v1/events`
const MAX_EVENTS_RETURNED: usize = 100;

/// Response from the status API
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Content-Type header
    pub content_type: String,
    /// Response body
    pub body: String,
}

impl ApiResponse {
    fn json(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "application/json".to_string(),
            body,
        }
    }

    fn json_value(status: u16, value: &serde_json::Value) -> Self {
        Self::json(status, serde_json::to_string_pretty(value).unwrap_or_default())
    }

    fn not_found() -> Self {
        Self::json(404, r#"{"error":"not found"}"#.to_string())
    }

    fn unauthorized() -> Self {
        Self::json(401, r#"{"error":"unauthorized"}"#.to_string())
    }

    fn method_not_allowed() -> Self {
        Self::json(405, r#"{"error":"method not allowed"}"#.to_string())
    }

    fn error(status: u16, message: &str, details: impl std::fmt::Display) -> Self {
        Self::json_value(
            status,
            &serde_json::json!({
                "error": message,
                "details": details.to_string(),
            }),
        )
    }
}

/// Read-only status API server
pub struct ApiServer {
    config: Arc<Config>,
    provider: Arc<dyn Provider>,
    store: Arc<EventStore>,
    metrics: Arc<ControllerMetrics>,
    queue: Option<Arc<QueueClient>>,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(
        config: Arc<Config>,
        provider: Arc<dyn Provider>,
        store: Arc<EventStore>,
        metrics: Arc<ControllerMetrics>,
    ) -> Self {
        Self {
            config,
            provider,
            store,
            metrics,
            queue: None,
        }
    }

    /// Include the GitHub rate-limit view in `/api/v1/status`
    pub fn with_queue_client(mut self, queue: Arc<QueueClient>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Map a request to a response (no networking involved). Provider
    /// reads inherit `cancel` so server shutdown cancels them.
    pub async fn handle(
        &self,
        method: &str,
        path: &str,
        headers: &HeaderMap,
        cancel: &CancellationToken,
    ) -> ApiResponse {
        if method != "GET" {
            return ApiResponse::method_not_allowed();
        }

        let obs = &self.config.observability;
        if path == obs.health_check_path {
            return self.handle_health();
        }
        if path == obs.readiness_path {
            return self.handle_readiness(cancel).await;
        }
        if obs.enable_metrics && path == obs.metrics_path {
            return ApiResponse {
                status: 200,
                content_type: "text/plain; version=0.0.4".to_string(),
                body: self.metrics.render_prometheus(),
            };
        }

        match path {
            "/api/v1/status" | "/api/v1/runners" | "/api/v1/events" => {
                if !self.authorized(headers) {
                    return ApiResponse::unauthorized();
                }
                match path {
                    "/api/v1/status" => self.handle_status(cancel).await,
                    "/api/v1/runners" => self.handle_runners(cancel).await,
                    _ => self.handle_events(),
                }
            }
            _ => ApiResponse::not_found(),
        }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        if !self.config.server.enable_auth {
            return true;
        }

        let provided = headers
            .get("X-API-Key")
            .and_then(|v| v.to_str().ok())
            .or_else(|| {
                headers
                    .get("Authorization")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.strip_prefix("Bearer "))
            });

        provided == Some(self.config.server.api_key.as_str())
    }

    fn handle_health(&self) -> ApiResponse {
        ApiResponse::json_value(
            200,
            &serde_json::json!({
                "status": "healthy",
                "time": Utc::now().to_rfc3339(),
            }),
        )
    }

    async fn handle_readiness(&self, cancel: &CancellationToken) -> ApiResponse {
        match tokio::time::timeout(READINESS_TIMEOUT, self.provider.health_check(cancel)).await {
            Ok(Ok(())) => ApiResponse::json_value(
                200,
                &serde_json::json!({
                    "status": "ready",
                    "time": Utc::now().to_rfc3339(),
                }),
            ),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "readiness check failed");
                ApiResponse::error(503, "not ready", e)
            }
            Err(_) => ApiResponse::error(503, "not ready", "provider health check timed out"),
        }
    }

    async fn handle_status(&self, cancel: &CancellationToken) -> ApiResponse {
        let runners = match self.provider.list_runners(cancel).await {
            Ok(runners) => runners,
            Err(e) => return ApiResponse::error(500, "failed to list runners", e),
        };

        ApiResponse::json_value(
            200,
            &serde_json::json!({
                "timestamp": Utc::now().to_rfc3339(),
                "runner_count": runners.len(),
                "min_runners": self.config.scaling.min_runners,
                "max_runners": self.config.scaling.max_runners,
                "provider": self.provider.name(),
                "dry_run": self.config.dry_run,
                "rate_limit": self.queue.as_ref().map(|q| q.rate_limit_info()),
                "metrics": self.metrics.snapshot(),
            }),
        )
    }

    async fn handle_runners(&self, cancel: &CancellationToken) -> ApiResponse {
        let runners = match self.provider.list_runners(cancel).await {
            Ok(runners) => runners,
            Err(e) => return ApiResponse::error(500, "failed to list runners", e),
        };

        ApiResponse::json_value(
            200,
            &serde_json::json!({
                "timestamp": Utc::now().to_rfc3339(),
                "count": runners.len(),
                "runners": runners,
            }),
        )
    }

    fn handle_events(&self) -> ApiResponse {
        let events = self.store.recent(MAX_EVENTS_RETURNED);
        ApiResponse::json_value(
            200,
            &serde_json::json!({
                "timestamp": Utc::now().to_rfc3339(),
                "count": events.len(),
                "events": events,
            }),
        )
    }

    /// Accept connections until cancellation
    pub async fn serve(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let addr = format!(
            "{}:{}",
            self.config.server.address, self.config.server.port
        );
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!(address = addr, "API server listening");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("API server stopped");
                    return Ok(());
                }
                conn = listener.accept() => {
                    let (stream, _) = match conn {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to accept connection");
                            continue;
                        }
                    };

                    let server = self.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                            let server = server.clone();
                            let cancel = cancel.clone();
                            async move {
                                let started = Instant::now();
                                let method = req.method().to_string();
                                let path = req.uri().path().to_string();
                                let resp = server.handle(&method, &path, req.headers(), &cancel).await;

                                tracing::debug!(
                                    method,
                                    path,
                                    status = resp.status,
                                    duration_ms = started.elapsed().as_millis() as u64,
                                    "http request"
                                );

                                Ok::<_, std::convert::Infallible>(
                                    hyper::Response::builder()
                                        .status(resp.status)
                                        .header("Content-Type", resp.content_type)
                                        .body(Full::new(Bytes::from(resp.body)))
                                        .unwrap(),
                                )
                            }
                        });

                        if let Err(e) = hyper::server::conn::http1::Builder::new()
                            .serve_connection(io, service)
                            .await
                        {
                            tracing::debug!(error = %e, "connection error");
                        }
                    });
                }
            }
        }
    }
}
