//! GitHub queue client — queued-workflow-job depth with caching, retry,
//! and rate-limit tracking
//!
//! A single operation matters to the reconciler: the current number of
//! queued workflow jobs for the configured scope (organization or
//! repository). Successful fetches refresh a TTL cache; failures never
//! poison it. Transient failures are retried with exponential backoff and
//! ±25% jitter; malformed response bodies are terminal. The caller's
//! cancellation token is raced against every request and every backoff
//! sleep, so losing the lease mid-retry never leaves the tick blocked.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use http::header::HeaderMap;
use rand::Rng;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::GithubConfig;
use crate::error::{Result, ZenoError};
use crate::observability::metrics::ControllerMetrics;

/// Source of the upstream queue depth — the seam the reconciler depends on
#[async_trait]
pub trait QueueSource: Send + Sync {
    /// Number of queued workflow jobs for the configured scope. Returns
    /// `ZenoError::Cancelled` when `cancel` fires first.
    async fn current_queue_depth(&self, cancel: &CancellationToken) -> Result<u32>;
}

/// Rate-limit view extracted from response headers
#[derive(Debug, Clone, Default, Serialize)]
pub struct RateLimitInfo {
    /// Remaining requests in the current window (-1 when unknown)
    pub remaining: i64,
    /// Window reset time
    pub reset: Option<DateTime<Utc>>,
}

/// Cached queue sample
struct QueueSample {
    queued_jobs: u32,
    sampled_at: Instant,
}

#[derive(Debug, Deserialize)]
struct WorkflowRunsResponse {
    total_count: u32,
}

/// GitHub API client for the queue-depth query
pub struct QueueClient {
    config: GithubConfig,
    http: reqwest::Client,
    cache: RwLock<Option<QueueSample>>,
    rate_limit: RwLock<RateLimitInfo>,
    metrics: Option<Arc<ControllerMetrics>>,
}

impl QueueClient {
    /// Create a client from configuration
    pub fn new(config: GithubConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            config,
            http,
            cache: RwLock::new(None),
            rate_limit: RwLock::new(RateLimitInfo {
                remaining: -1,
                reset: None,
            }),
            metrics: None,
        })
    }

    /// Publish rate-limit gauges to the given metrics sink
    pub fn with_metrics(mut self, metrics: Arc<ControllerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Current rate-limit view (also read by the status API)
    pub fn rate_limit_info(&self) -> RateLimitInfo {
        self.rate_limit.read().unwrap().clone()
    }

    fn cached_depth(&self) -> Option<u32> {
        let cache = self.cache.read().unwrap();
        cache.as_ref().and_then(|sample| {
            (sample.sampled_at.elapsed() <= self.config.cache_ttl()).then_some(sample.queued_jobs)
        })
    }

    fn update_cache(&self, queued_jobs: u32) {
        *self.cache.write().unwrap() = Some(QueueSample {
            queued_jobs,
            sampled_at: Instant::now(),
        });
    }

    fn queue_url(&self) -> String {
        match (&self.config.organization, &self.config.repository) {
            (Some(org), _) => format!(
                "{}/orgs/{}/actions/runs?status=queued&per_page=100",
                self.config.api_base_url, org
            ),
            (_, Some(repo)) => format!(
                "{}/repos/{}/actions/runs?status=queued&per_page=100",
                self.config.api_base_url, repo
            ),
            // Config validation guarantees one scope; keep a sane fallback.
            (None, None) => format!(
                "{}/repos//actions/runs?status=queued&per_page=100",
                self.config.api_base_url
            ),
        }
    }

    async fn fetch_with_retry(&self, cancel: &CancellationToken) -> Result<u32> {
        let mut last_err: Option<ZenoError> = None;

        for attempt in 0..=self.config.max_retries {
            if cancel.is_cancelled() {
                return Err(ZenoError::Cancelled);
            }

            if attempt > 0 {
                let backoff = self.backoff_for_attempt(attempt);
                tracing::info!(
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "retrying GitHub API request"
                );
                // The backoff sleep must never outlive the caller.
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return Err(ZenoError::Cancelled),
                }
            }

            let result = tokio::select! {
                result = self.fetch_queued_jobs() => result,
                _ = cancel.cancelled() => return Err(ZenoError::Cancelled),
            };

            match result {
                Ok(queued_jobs) => return Ok(queued_jobs),
                Err(e) => {
                    if !e.is_retriable() {
                        return Err(e);
                    }
                    last_err = Some(e);
                }
            }
        }

        // Surface the typed error so callers can still tell rate limiting
        // apart from plain network failure.
        let err = last_err.unwrap_or_else(|| ZenoError::Other("no attempts made".to_string()));
        tracing::warn!(max_retries = self.config.max_retries, error = %err, "max retries exceeded");
        Err(err)
    }

    /// Exponential backoff for retry `attempt` (1-based): `base · 2^(n−1)`
    /// capped at the configured maximum, with ±25% uniform jitter.
    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.config.retry_backoff_base().as_millis() as f64;
        let max = self.config.retry_backoff_max().as_millis() as f64;

        let mut backoff = base * 2f64.powi(attempt as i32 - 1);
        if backoff > max {
            backoff = max;
        }

        let jitter = backoff * 0.25 * (2.0 * rand::thread_rng().gen::<f64>() - 1.0);
        Duration::from_millis((backoff + jitter).max(0.0) as u64)
    }

    async fn fetch_queued_jobs(&self) -> Result<u32> {
        let started = Instant::now();

        let resp = self
            .http
            .get(self.queue_url())
            .header("Authorization", format!("Bearer {}", self.config.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .await?;

        let status = resp.status();
        tracing::debug!(
            status_code = status.as_u16(),
            duration_ms = started.elapsed().as_millis() as u64,
            "GitHub API request completed"
        );

        self.update_rate_limit(resp.headers());

        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            let reset_at = reset_time_from_headers(resp.headers());
            let retry_after = (reset_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tracing::warn!(
                reset_at = %reset_at,
                retry_after_secs = retry_after.as_secs(),
                "rate limited by GitHub API"
            );
            return Err(ZenoError::RateLimited {
                reset_at,
                retry_after,
            });
        }

        if status != StatusCode::OK {
            return Err(ZenoError::UpstreamStatus(status.as_u16()));
        }

        let body = resp.bytes().await?;
        let parsed: WorkflowRunsResponse = serde_json::from_slice(&body)
            .map_err(|e| ZenoError::MalformedResponse(e.to_string()))?;

        tracing::debug!(count = parsed.total_count, "fetched queued jobs");
        Ok(parsed.total_count)
    }

    fn update_rate_limit(&self, headers: &HeaderMap) {
        let remaining = header_i64(headers, "X-RateLimit-Remaining");
        let reset = header_i64(headers, "X-RateLimit-Reset")
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single());

        let view = {
            let mut rate_limit = self.rate_limit.write().unwrap();
            if let Some(remaining) = remaining {
                rate_limit.remaining = remaining;
            }
            if reset.is_some() {
                rate_limit.reset = reset;
            }
            rate_limit.clone()
        };

        if let Some(metrics) = &self.metrics {
            metrics.set_rate_limit(view.remaining, view.reset.map(|t| t.timestamp()));
        }

        if view.remaining >= 0 && view.remaining < self.config.rate_limit_buffer {
            tracing::warn!(
                remaining = view.remaining,
                reset = ?view.reset,
                "approaching GitHub API rate limit"
            );
        }
    }
}

#[async_trait]
impl QueueSource for QueueClient {
    async fn current_queue_depth(&self, cancel: &CancellationToken) -> Result<u32> {
        if let Some(cached) = self.cached_depth() {
            tracing::debug!(queued_jobs = cached, "using cached queue depth");
            return Ok(cached);
        }

        let queued_jobs = self.fetch_with_retry(cancel).await?;
        self.update_cache(queued_jobs);
        Ok(queued_jobs)
    }
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Rate-limit reset time from headers: `Retry-After` seconds first, then
/// the Unix `X-RateLimit-Reset` timestamp, defaulting to 60 s out.
fn reset_time_from_headers(headers: &HeaderMap) -> DateTime<Utc> {
    if let Some(seconds) = header_i64(headers, "Retry-After") {
        return Utc::now() + chrono::Duration::seconds(seconds);
    }

    if let Some(reset) = header_i64(headers, "X-RateLimit-Reset")
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
    {
        return reset;
    }

    Utc::now() + chrono::Duration::seconds(60)
}
