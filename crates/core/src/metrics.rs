//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Stage execution (per stage, by result)
//! - Retry and resumption behaviour
//! - Run outcomes

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Stage Metrics
// =============================================================================

/// Stage executions total by stage and result.
pub static STAGE_EXECUTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("dubflow_stage_executions_total", "Total stage executions"),
        &["stage", "result"], // "success", "failure", "conflict"
    )
    .unwrap()
});

/// Stage execution duration in seconds.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "dubflow_stage_duration_seconds",
            "Duration of stage executions",
        )
        .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["stage"],
    )
    .unwrap()
});

/// Retry attempts total by stage.
pub static RETRY_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("dubflow_retry_attempts_total", "Total retry attempts"),
        &["stage"],
    )
    .unwrap()
});

// =============================================================================
// Run Metrics
// =============================================================================

/// Tasks satisfied from the artifact store without execution.
pub static TASKS_RESUMED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "dubflow_tasks_resumed_total",
        "Total tasks resumed from existing artifacts",
    )
    .unwrap()
});

/// Runs finished by result.
pub static RUNS_COMPLETED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("dubflow_runs_completed_total", "Total runs finished"),
        &["result"], // "completed", "completed_with_failures", "error"
    )
    .unwrap()
});

/// Reassemblies total by result.
pub static REASSEMBLIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("dubflow_reassemblies_total", "Total reassembly attempts"),
        &["result"], // "complete", "partial", "failed"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(STAGE_EXECUTIONS.clone()),
        Box::new(STAGE_DURATION.clone()),
        Box::new(RETRY_ATTEMPTS.clone()),
        Box::new(TASKS_RESUMED.clone()),
        Box::new(RUNS_COMPLETED.clone()),
        Box::new(REASSEMBLIES.clone()),
    ]
}
