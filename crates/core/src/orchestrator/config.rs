//! Orchestrator configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the pipeline orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum concurrently running tasks across all resource classes.
    /// Resource slots bound per-class concurrency on top of this.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Idle wait when nothing is dispatchable (milliseconds). Also the
    /// granularity at which retry delays become visible.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// How many queue entries one scheduling pass may examine before
    /// yielding. Bounds the work done under resource starvation.
    #[serde(default = "default_scan_limit")]
    pub scan_limit: usize,

    /// After cancellation, how long to wait for in-flight executors
    /// before abandoning them (milliseconds).
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,
}

fn default_workers() -> usize {
    4
}

fn default_poll_interval() -> u64 {
    200
}

fn default_scan_limit() -> usize {
    64
}

fn default_drain_timeout() -> u64 {
    30_000 // 30 seconds
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_ms: default_poll_interval(),
            scan_limit: default_scan_limit(),
            drain_timeout_ms: default_drain_timeout(),
        }
    }
}
