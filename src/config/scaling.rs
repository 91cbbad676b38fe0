//! Scaling configuration — thresholds, bounds, hysteresis, cooldown

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, ZenoError};

/// Scaling behavior configuration for the reconciler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingConfig {
    /// Minimum number of runners to keep alive
    #[serde(default = "default_min_runners")]
    pub min_runners: u32,

    /// Maximum number of runners to ever provision
    #[serde(default = "default_max_runners")]
    pub max_runners: u32,

    /// Queue depth at or above which a scale-up is considered
    #[serde(default = "default_scale_up_threshold")]
    pub scale_up_threshold: u32,

    /// Queue depth at or below which a scale-down is considered
    #[serde(default = "default_scale_down_threshold")]
    pub scale_down_threshold: u32,

    /// Consecutive up-candidate ticks required before acting
    #[serde(default = "default_hysteresis")]
    pub scale_up_hysteresis: u32,

    /// Consecutive down-candidate ticks required before acting
    #[serde(default = "default_hysteresis")]
    pub scale_down_hysteresis: u32,

    /// Seconds between reconciliation ticks
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Minimum seconds between scaling actions
    #[serde(default = "default_cooldown_period_secs")]
    pub cooldown_period_secs: u64,

    /// Project the queue depth forward from recent samples
    #[serde(default)]
    pub enable_predictive_scaling: bool,

    /// Ask the provider for an in-band drain before termination
    #[serde(default = "default_true")]
    pub graceful_termination: bool,

    /// Drain timeout in seconds for graceful termination
    #[serde(default = "default_termination_timeout_secs")]
    pub termination_timeout_secs: u64,
}

fn default_min_runners() -> u32 {
    1
}

fn default_max_runners() -> u32 {
    10
}

fn default_scale_up_threshold() -> u32 {
    5
}

fn default_scale_down_threshold() -> u32 {
    0
}

fn default_hysteresis() -> u32 {
    1
}

fn default_check_interval_secs() -> u64 {
    30
}

fn default_cooldown_period_secs() -> u64 {
    60
}

fn default_termination_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            min_runners: default_min_runners(),
            max_runners: default_max_runners(),
            scale_up_threshold: default_scale_up_threshold(),
            scale_down_threshold: default_scale_down_threshold(),
            scale_up_hysteresis: default_hysteresis(),
            scale_down_hysteresis: default_hysteresis(),
            check_interval_secs: default_check_interval_secs(),
            cooldown_period_secs: default_cooldown_period_secs(),
            enable_predictive_scaling: false,
            graceful_termination: true,
            termination_timeout_secs: default_termination_timeout_secs(),
        }
    }
}

impl ScalingConfig {
    /// Interval between reconciliation ticks
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Minimum wall-clock gap between scaling actions
    pub fn cooldown_period(&self) -> Duration {
        Duration::from_secs(self.cooldown_period_secs)
    }

    /// Validate bound and threshold consistency
    pub fn validate(&self) -> Result<()> {
        if self.max_runners < self.min_runners {
            return Err(ZenoError::Config(format!(
                "max_runners ({}) must be >= min_runners ({})",
                self.max_runners, self.min_runners
            )));
        }
        if self.scale_up_threshold <= self.scale_down_threshold {
            return Err(ZenoError::Config(format!(
                "scale_up_threshold ({}) must be > scale_down_threshold ({})",
                self.scale_up_threshold, self.scale_down_threshold
            )));
        }
        if self.check_interval_secs == 0 {
            return Err(ZenoError::Config(
                "check_interval_secs must be > 0".to_string(),
            ));
        }
        if self.scale_up_hysteresis == 0 || self.scale_down_hysteresis == 0 {
            return Err(ZenoError::Config(
                "hysteresis thresholds must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}
