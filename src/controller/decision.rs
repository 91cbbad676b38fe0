//! Decision engine — converts observed queue depth and runner count into
//! scaling decisions
//!
//! The engine is deterministic over its inputs modulo the hysteresis
//! streaks, cooldown stamps, and queue history it owns, which makes the
//! whole decision surface table-testable. Hysteresis requires a threshold
//! condition to persist across consecutive ticks before acting; cooldown
//! enforces a wall-clock gap after any action. Together they damp the two
//! distinct flapping sources (transient spikes vs too-frequent correct
//! decisions).

use serde::Serialize;
use std::collections::VecDeque;
use std::time::Instant;

use crate::config::ScalingConfig;

/// Bound on the retained queue-depth history feeding the predictor
pub const MAX_QUEUE_HISTORY: usize = 100;

/// Samples the predictor needs before it engages
const MIN_PREDICTION_SAMPLES: usize = 5;

/// Window of recent samples the predictor averages over
const PREDICTION_WINDOW: usize = 10;

/// Intervals the predictor projects ahead
const PREDICTION_HORIZON: f64 = 3.0;

/// Direction of a scaling decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleAction {
    None,
    Up,
    Down,
}

impl std::fmt::Display for ScaleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// Outcome of a single reconciliation tick
#[derive(Debug, Clone, Serialize)]
pub struct ScaleDecision {
    /// What to do
    pub action: ScaleAction,
    /// Stable reason string for logs, events, and metrics
    pub reason: String,
    /// Runner count at decision time
    pub current: u32,
    /// Target runner count
    pub desired: u32,
    /// Queue depth the decision was computed from
    pub queue_depth: u32,
    /// A threshold condition held but has not yet persisted long enough
    pub hysteresis_pending: bool,
}

impl ScaleDecision {
    fn none(reason: impl Into<String>, current: u32, desired: u32, queue_depth: u32) -> Self {
        Self {
            action: ScaleAction::None,
            reason: reason.into(),
            current,
            desired,
            queue_depth,
            hysteresis_pending: false,
        }
    }
}

/// Stateful decision engine owned by the reconciler
pub struct DecisionEngine {
    config: ScalingConfig,
    up_streak: u32,
    down_streak: u32,
    last_scale_up: Option<Instant>,
    last_scale_down: Option<Instant>,
    history: VecDeque<u32>,
}

impl DecisionEngine {
    /// Create an engine from scaling configuration
    pub fn new(config: ScalingConfig) -> Self {
        Self {
            config,
            up_streak: 0,
            down_streak: 0,
            last_scale_up: None,
            last_scale_down: None,
            history: VecDeque::with_capacity(MAX_QUEUE_HISTORY),
        }
    }

    /// Append an observed queue depth to the bounded history
    pub fn record_sample(&mut self, queue_depth: u32) {
        if self.history.len() == MAX_QUEUE_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(queue_depth);
    }

    /// Queue depth to classify on: the observed value, raised to the
    /// predicted value when predictive scaling is enabled.
    pub fn effective_depth(&self, observed: u32) -> u32 {
        match self.predicted_depth() {
            Some(predicted) => observed.max(predicted),
            None => observed,
        }
    }

    /// Project the queue depth three intervals ahead from the average
    /// per-sample delta over the recent window. Engages only when enabled
    /// and enough history exists.
    pub fn predicted_depth(&self) -> Option<u32> {
        if !self.config.enable_predictive_scaling || self.history.len() < MIN_PREDICTION_SAMPLES {
            return None;
        }

        let window = PREDICTION_WINDOW.min(self.history.len());
        let samples: Vec<u32> = self.history.iter().rev().take(window).rev().copied().collect();

        let mut delta_sum = 0.0;
        for pair in samples.windows(2) {
            delta_sum += pair[1] as f64 - pair[0] as f64;
        }
        let avg_delta = delta_sum / (samples.len() - 1) as f64;

        let last = *samples.last().unwrap() as f64;
        let projected = (last + PREDICTION_HORIZON * avg_delta).max(0.0);
        Some(projected.round() as u32)
    }

    /// Whether either cooldown stamp is within the cooldown period of `now`
    pub fn in_cooldown(&self, now: Instant) -> bool {
        let period = self.config.cooldown_period();
        if period.is_zero() {
            return false;
        }
        [self.last_scale_up, self.last_scale_down]
            .iter()
            .flatten()
            .any(|stamp| now.saturating_duration_since(*stamp) < period)
    }

    /// Stamp a completed scale-up batch
    pub fn mark_scale_up(&mut self, now: Instant) {
        self.last_scale_up = Some(now);
    }

    /// Stamp a completed scale-down batch
    pub fn mark_scale_down(&mut self, now: Instant) {
        self.last_scale_down = Some(now);
    }

    /// Current hysteresis streaks (at most one is non-zero)
    pub fn streaks(&self) -> (u32, u32) {
        (self.up_streak, self.down_streak)
    }

    fn reset_streaks(&mut self) {
        self.up_streak = 0;
        self.down_streak = 0;
    }

    /// Classify a tick and gate it through hysteresis and cooldown.
    ///
    /// A streak only accumulates while the same candidate direction holds;
    /// crossing direction or returning to the normal band resets it.
    pub fn decide(&mut self, queue_depth: u32, current: u32, now: Instant) -> ScaleDecision {
        if self.in_cooldown(now) {
            return ScaleDecision::none("in_cooldown", current, current, queue_depth);
        }

        let cfg = &self.config;

        if queue_depth >= cfg.scale_up_threshold {
            let desired = queue_depth.clamp(cfg.min_runners, cfg.max_runners);
            if desired > current {
                self.down_streak = 0;
                self.up_streak += 1;
                if self.up_streak >= cfg.scale_up_hysteresis {
                    self.reset_streaks();
                    return ScaleDecision {
                        action: ScaleAction::Up,
                        reason: "queue_above_threshold".to_string(),
                        current,
                        desired,
                        queue_depth,
                        hysteresis_pending: false,
                    };
                }
                return ScaleDecision {
                    action: ScaleAction::None,
                    reason: format!(
                        "hysteresis_check_{}_of_{}",
                        self.up_streak, cfg.scale_up_hysteresis
                    ),
                    current,
                    desired,
                    queue_depth,
                    hysteresis_pending: true,
                };
            }
            // Queue is high but capacity already covers it; nothing to act on.
            self.reset_streaks();
            return ScaleDecision::none("at_desired_capacity", current, desired, queue_depth);
        }

        if queue_depth <= cfg.scale_down_threshold {
            let desired = queue_depth.max(cfg.min_runners).min(cfg.max_runners);
            if desired < current {
                self.up_streak = 0;
                self.down_streak += 1;
                if self.down_streak >= cfg.scale_down_hysteresis {
                    self.reset_streaks();
                    return ScaleDecision {
                        action: ScaleAction::Down,
                        reason: "queue_below_threshold".to_string(),
                        current,
                        desired,
                        queue_depth,
                        hysteresis_pending: false,
                    };
                }
                return ScaleDecision {
                    action: ScaleAction::None,
                    reason: format!(
                        "hysteresis_check_{}_of_{}",
                        self.down_streak, cfg.scale_down_hysteresis
                    ),
                    current,
                    desired,
                    queue_depth,
                    hysteresis_pending: true,
                };
            }
            self.reset_streaks();
            return ScaleDecision::none("at_desired_capacity", current, desired, queue_depth);
        }

        self.reset_streaks();
        ScaleDecision::none("queue_in_normal_range", current, current, queue_depth)
    }
}
