//! Event store — append-only bounded ring of scaling events
//!
//! In-memory by default. When persistence is enabled the whole log is
//! re-serialized and atomically rewritten on each append; the small
//! `max_events` bound keeps that cheap. A missing file on startup is not
//! an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::RwLock;

use crate::config::StoreConfig;
use crate::error::{Result, ZenoError};

/// A recorded scaling decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleEvent {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub reason: String,
    pub queue_depth: u32,
    pub runners_before: u32,
    pub runners_after: u32,
}

/// Bounded ring of scale events with optional on-disk persistence
pub struct EventStore {
    config: StoreConfig,
    events: RwLock<Vec<ScaleEvent>>,
}

impl EventStore {
    /// Create a store, loading any existing event file when persistence is
    /// enabled. A missing file is treated as an empty log.
    pub fn new(config: StoreConfig) -> Result<Self> {
        let mut events = Vec::new();

        if config.enabled && Path::new(&config.path).exists() {
            let data = std::fs::read(&config.path)?;
            events = serde_json::from_slice(&data)
                .map_err(|e| ZenoError::Other(format!("failed to load event store: {}", e)))?;
        }

        Ok(Self {
            config,
            events: RwLock::new(events),
        })
    }

    /// In-memory store with the given capacity (no persistence)
    pub fn in_memory(max_events: usize) -> Self {
        Self {
            config: StoreConfig {
                enabled: false,
                path: String::new(),
                max_events,
            },
            events: RwLock::new(Vec::new()),
        }
    }

    /// Append an event, evicting the oldest past `max_events`, then persist
    /// when enabled. The file write happens outside the events lock.
    pub fn record(&self, event: ScaleEvent) -> Result<()> {
        let snapshot = {
            let mut events = self.events.write().unwrap();
            events.push(event);

            let excess = events.len().saturating_sub(self.config.max_events);
            if excess > 0 {
                events.drain(..excess);
            }

            if self.config.enabled {
                Some(events.clone())
            } else {
                None
            }
        };

        if let Some(snapshot) = snapshot {
            self.persist(&snapshot)?;
        }

        Ok(())
    }

    /// The most recent `count` events, oldest first (copy-on-return)
    pub fn recent(&self, count: usize) -> Vec<ScaleEvent> {
        let events = self.events.read().unwrap();
        let start = events.len().saturating_sub(count);
        events[start..].to_vec()
    }

    /// All retained events, oldest first (copy-on-return)
    pub fn all(&self) -> Vec<ScaleEvent> {
        self.events.read().unwrap().clone()
    }

    /// Number of retained events
    pub fn len(&self) -> usize {
        self.events.read().unwrap().len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomic rewrite: serialize to a sibling temp file, then rename over
    /// the target.
    fn persist(&self, events: &[ScaleEvent]) -> Result<()> {
        let data = serde_json::to_vec_pretty(events)?;
        let tmp = format!("{}.tmp", self.config.path);
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.config.path)?;
        Ok(())
    }
}
