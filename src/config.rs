//! Runtime configuration.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What `get_multi` returns when the deadline passes with some sinks missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialPolicy {
    /// Return whatever arrived, with the missing sinks marked.
    #[default]
    ReturnPartial,
    /// Treat anything short of a full set as a timeout.
    Fail,
}

/// Configuration shared by every stream created through one registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker threads used by the loopback engine.
    pub worker_count: usize,
    /// Capacity of each indexed-mode result queue.
    pub queue_capacity: usize,
    /// Unmatched sends allowed per source in indexed mode.
    pub max_outstanding_per_source: u32,
    /// Timeout applied by FFI calls that pass 0.
    pub default_timeout_ms: u64,
    /// Window for the remaining sinks after the first multi-sink arrival (0 = off).
    pub sink_completion_timeout_ms: u64,
    pub partial_policy: PartialPolicy,
    /// Age after which unclaimed, unwatched results are swept.
    pub result_retention_ms: u64,
    pub stats_interval_ms: u64,
    pub sweep_interval_ms: u64,
    /// Upper bound on live streams per registry.
    pub max_streams: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            queue_capacity: 32,
            max_outstanding_per_source: 1,
            default_timeout_ms: 3000,
            sink_completion_timeout_ms: 0,
            partial_policy: PartialPolicy::ReturnPartial,
            result_retention_ms: 60_000,
            stats_interval_ms: 5000,
            sweep_interval_ms: 1000,
            max_streams: 1024,
        }
    }
}

impl RuntimeConfig {
    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: RuntimeConfig = toml::from_str(text)?;
        Ok(config.normalized())
    }

    /// Load a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Replace zero values that would make the runtime unusable.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.worker_count == 0 {
            self.worker_count = defaults.worker_count;
        }
        if self.queue_capacity == 0 {
            self.queue_capacity = defaults.queue_capacity;
        }
        if self.max_outstanding_per_source == 0 {
            self.max_outstanding_per_source = defaults.max_outstanding_per_source;
        }
        if self.default_timeout_ms == 0 {
            self.default_timeout_ms = defaults.default_timeout_ms;
        }
        if self.stats_interval_ms == 0 {
            self.stats_interval_ms = defaults.stats_interval_ms;
        }
        if self.sweep_interval_ms == 0 {
            self.sweep_interval_ms = defaults.sweep_interval_ms;
        }
        if self.max_streams == 0 {
            self.max_streams = defaults.max_streams;
        }
        self
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn sink_completion_timeout(&self) -> Option<Duration> {
        (self.sink_completion_timeout_ms > 0)
            .then(|| Duration::from_millis(self.sink_completion_timeout_ms))
    }

    pub fn result_retention(&self) -> Duration {
        Duration::from_millis(self.result_retention_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}
