//! Controller — the reconciliation loop
//!
//! While this process holds the lease, the controller ticks at the check
//! interval: sample the queue, list runners, run the decision engine, and
//! execute the resulting batch against the provider. Each tick is
//! independent; only the hysteresis streaks, cooldown stamps, and queue
//! history survive between ticks. Per-operation provider failures are
//! logged and counted without aborting the rest of the batch.

pub mod decision;

pub use decision::{DecisionEngine, ScaleAction, ScaleDecision};

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Result, ZenoError};
use crate::github::QueueSource;
use crate::observability::metrics::ControllerMetrics;
use crate::provider::{CreateRunnerRequest, Provider, Runner};
use crate::store::{EventStore, ScaleEvent};

/// The reconciliation controller
pub struct Controller {
    config: Arc<Config>,
    queue: Arc<dyn QueueSource>,
    provider: Arc<dyn Provider>,
    store: Arc<EventStore>,
    metrics: Arc<ControllerMetrics>,
    engine: Mutex<DecisionEngine>,
}

impl Controller {
    /// Create a controller; the decision engine is seeded from the scaling
    /// configuration.
    pub fn new(
        config: Arc<Config>,
        queue: Arc<dyn QueueSource>,
        provider: Arc<dyn Provider>,
        store: Arc<EventStore>,
        metrics: Arc<ControllerMetrics>,
    ) -> Self {
        let engine = Mutex::new(DecisionEngine::new(config.scaling.clone()));
        Self {
            config,
            queue,
            provider,
            store,
            metrics,
            engine,
        }
    }

    /// Run the loop until cancellation: one reconciliation immediately,
    /// then one per check interval. A slow tick skips the next scheduled
    /// tick rather than queueing it.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            check_interval_secs = self.config.scaling.check_interval_secs,
            dry_run = self.config.dry_run,
            "controller starting"
        );

        let mut ticker = tokio::time::interval(self.config.scaling.check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("controller stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let started = Instant::now();
                    match self.reconcile(&cancel).await {
                        Ok(()) => self.metrics.inc_reconcile(),
                        Err(ZenoError::Cancelled) => {
                            tracing::debug!("tick cancelled");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "reconcile error");
                            self.metrics.inc_reconcile_error(e.kind());
                        }
                    }
                    self.metrics.observe_reconcile_duration(started.elapsed());
                }
            }
        }
    }

    /// One observe-decide-act pass. Every upstream call inherits `cancel`;
    /// losing the lease mid-tick cancels in-flight queue and provider I/O.
    pub async fn reconcile(&self, cancel: &CancellationToken) -> Result<()> {
        let now = Instant::now();

        // Cooldown gates the tick before any upstream I/O happens.
        if self.engine.lock().unwrap().in_cooldown(now) {
            tracing::debug!("in cooldown, skipping tick");
            return Ok(());
        }

        // On failure the streaks are untouched: a fetch error must not flap
        // the hysteresis state.
        let queue_depth = self.queue.current_queue_depth(cancel).await?;

        let effective_depth = {
            let mut engine = self.engine.lock().unwrap();
            engine.record_sample(queue_depth);
            engine.effective_depth(queue_depth)
        };
        if effective_depth > queue_depth {
            tracing::debug!(
                observed = queue_depth,
                predicted = effective_depth,
                "predictive scaling raised the effective queue depth"
            );
        }

        let runners = self.provider.list_runners(cancel).await?;
        let current = runners.len() as u32;

        let decision = self
            .engine
            .lock()
            .unwrap()
            .decide(effective_depth, current, now);

        tracing::debug!(
            queued_jobs = queue_depth,
            current_runners = current,
            action = %decision.action,
            reason = decision.reason,
            "reconcile tick"
        );

        self.publish_runner_metrics(queue_depth, &runners, &decision);

        if decision.action == ScaleAction::None {
            return Ok(());
        }

        if self.config.dry_run {
            tracing::info!(
                action = %decision.action,
                current = decision.current,
                desired = decision.desired,
                reason = decision.reason,
                "dry-run: skipping scaling action"
            );
            return Ok(());
        }

        tracing::info!(
            action = %decision.action,
            current = decision.current,
            desired = decision.desired,
            queue_depth = decision.queue_depth,
            reason = decision.reason,
            "executing scaling decision"
        );

        let started = Instant::now();
        match decision.action {
            ScaleAction::Up => {
                self.scale_up(&decision, cancel).await;
                self.engine.lock().unwrap().mark_scale_up(Instant::now());
            }
            ScaleAction::Down => {
                self.scale_down(&decision, &runners, cancel).await;
                self.engine.lock().unwrap().mark_scale_down(Instant::now());
            }
            ScaleAction::None => unreachable!(),
        }
        self.metrics.observe_scale_duration(started.elapsed());

        Ok(())
    }

    /// Create `desired - current` runners, best-effort: a failed create is
    /// logged and counted but never aborts the rest of the batch.
    /// Cancellation ends the batch; cancelled operations log no events.
    async fn scale_up(&self, decision: &ScaleDecision, cancel: &CancellationToken) {
        let need = decision.desired - decision.current;
        let mut succeeded: u32 = 0;

        for _ in 0..need {
            if cancel.is_cancelled() {
                tracing::debug!("scale-up batch cancelled");
                return;
            }

            let request = self.create_request();
            let started = Instant::now();

            match self.provider.create_runner(cancel, &request).await {
                Ok(runner) => {
                    succeeded += 1;
                    self.metrics
                        .inc_provider_operation(self.provider.name(), "create", "success");
                    self.metrics.observe_provider_duration(started.elapsed());
                    self.record_event(ScaleEvent {
                        timestamp: Utc::now(),
                        action: "up".to_string(),
                        reason: decision.reason.clone(),
                        queue_depth: decision.queue_depth,
                        runners_before: decision.current + succeeded - 1,
                        runners_after: decision.current + succeeded,
                    });
                    self.metrics.inc_scale_event("up", &decision.reason);
                    tracing::info!(id = runner.id, name = runner.name, "runner created");
                }
                Err(ZenoError::Cancelled) => {
                    tracing::debug!("scale-up batch cancelled");
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to create runner");
                    self.metrics
                        .inc_provider_operation(self.provider.name(), "create", "error");
                    self.metrics
                        .inc_provider_error(self.provider.name(), "create", e.kind());
                }
            }
        }
    }

    /// Remove `current - desired` runners, oldest eligible first.
    /// Cancellation ends the batch; cancelled operations log no events.
    async fn scale_down(
        &self,
        decision: &ScaleDecision,
        runners: &[Runner],
        cancel: &CancellationToken,
    ) {
        let need = (decision.current - decision.desired) as usize;
        let candidates = select_removal_candidates(runners, need);
        let graceful = self.config.scaling.graceful_termination;
        let mut removed: u32 = 0;

        for runner in candidates {
            if cancel.is_cancelled() {
                tracing::debug!("scale-down batch cancelled");
                return;
            }

            let started = Instant::now();
            match self.provider.remove_runner(cancel, &runner.id, graceful).await {
                Ok(()) => {
                    removed += 1;
                    self.metrics
                        .inc_provider_operation(self.provider.name(), "remove", "success");
                    self.metrics.observe_provider_duration(started.elapsed());
                    self.record_event(ScaleEvent {
                        timestamp: Utc::now(),
                        action: "down".to_string(),
                        reason: decision.reason.clone(),
                        queue_depth: decision.queue_depth,
                        runners_before: decision.current - removed + 1,
                        runners_after: decision.current - removed,
                    });
                    self.metrics.inc_scale_event("down", &decision.reason);
                    tracing::info!(id = runner.id, graceful, "runner removed");
                }
                Err(ZenoError::Cancelled) => {
                    tracing::debug!("scale-down batch cancelled");
                    return;
                }
                Err(e) => {
                    tracing::warn!(id = runner.id, error = %e, "failed to remove runner");
                    self.metrics
                        .inc_provider_operation(self.provider.name(), "remove", "error");
                    self.metrics
                        .inc_provider_error(self.provider.name(), "remove", e.kind());
                }
            }
        }
    }

    fn create_request(&self) -> CreateRunnerRequest {
        let suffix = uuid::Uuid::new_v4().to_string();
        CreateRunnerRequest {
            name: format!("{}-{}", self.config.runner.name_prefix, &suffix[..8]),
            labels: self.config.runner.labels.clone(),
            github_token: self.config.github.token.clone(),
            github_org: self.config.github.organization.clone(),
            github_repo: self.config.github.repository.clone(),
            metadata: HashMap::new(),
        }
    }

    fn record_event(&self, event: ScaleEvent) {
        if let Err(e) = self.store.record(event) {
            tracing::warn!(error = %e, "failed to record scale event");
        }
    }

    fn publish_runner_metrics(
        &self,
        queue_depth: u32,
        runners: &[Runner],
        decision: &ScaleDecision,
    ) {
        self.metrics.observe_queue_depth(queue_depth);
        self.metrics
            .set_runner_counts(decision.current, decision.desired);

        let mut by_status: HashMap<String, u64> = HashMap::new();
        for runner in runners {
            *by_status.entry(runner.status.to_string()).or_insert(0) += 1;
        }
        self.metrics.set_runners_by_status(by_status);
    }
}

/// Pick up to `need` runners for removal. Only `idle` and `running`
/// runners are eligible; `idle` is taken before `running`, oldest
/// `created_at` first within a class, ties broken by controller id.
fn select_removal_candidates(runners: &[Runner], need: usize) -> Vec<&Runner> {
    let mut eligible: Vec<&Runner> = runners.iter().filter(|r| r.status.removable()).collect();

    eligible.sort_by(|a, b| {
        status_rank(a)
            .cmp(&status_rank(b))
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });

    eligible.truncate(need);
    eligible
}

fn status_rank(runner: &Runner) -> u8 {
    match runner.status {
        crate::provider::RunnerStatus::Idle => 0,
        _ => 1,
    }
}
