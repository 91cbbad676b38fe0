//! # Zeno
//!
//! An autoscaling controller for self-hosted GitHub Actions runners.
//! A single leader instance samples the queued-workflow-job count,
//! compares it against operator thresholds, and creates or destroys
//! runner instances through a pluggable infrastructure provider.
//!
//! ## Architecture
//!
//! ```text
//! Leader lease ─▶ Controller ─▶ Queue client ─▶ GitHub API
//!                     │
//!                     ├─▶ Provider port ─▶ Docker daemon / ...
//!                     ├─▶ Event store
//!                     └─▶ Metrics ◀─ Status API (read-only)
//! ```
//!
//! The controller ticks at a fixed interval: sample the queue depth, list
//! runners, run the decision engine (thresholds + hysteresis + cooldown +
//! optional prediction), and execute the resulting create/remove batch.
//! Runner inventory is never cached; it is rediscovered from the provider
//! on every tick.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use zeno::{config::Config, controller::Controller};
//!
//! #[tokio::main]
//! async fn main() -> zeno::Result<()> {
//!     let config = Arc::new(Config::load(Some("zeno.toml".as_ref())).await?);
//!     // wire queue client, provider, store, metrics, then:
//!     // controller.run(cancel_token).await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod github;
pub mod leader;
pub mod observability;
pub mod provider;
pub mod store;

// Re-export main types
pub use config::Config;
pub use controller::Controller;
pub use error::{Result, ZenoError};
pub use provider::{Provider, Runner, RunnerStatus};
