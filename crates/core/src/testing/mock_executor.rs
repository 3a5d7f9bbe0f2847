//! Mock stage executor for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::stage::{StageContext, StageExecutor, StageFailure};

/// A recorded execution attempt for test assertions.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub segment_id: u32,
    pub stage: String,
    pub attempt: u32,
    /// Whether this attempt returned a payload.
    pub success: bool,
}

/// Mock implementation of the StageExecutor trait.
///
/// Provides controllable behavior for testing:
/// - Track every execution attempt for assertions
/// - Script failures per (segment, stage), consumed in order
/// - Simulate execution latency
///
/// One instance can be registered for every stage of a pipeline; the
/// stage name is taken from the context, and output payloads are
/// deterministic per (stage, segment) so retries and reruns converge on
/// the same artifact.
#[derive(Debug, Default)]
pub struct MockStageExecutor {
    executions: Arc<RwLock<Vec<ExecutionRecord>>>,
    /// Scripted failures keyed by (segment id, stage name), popped
    /// front-first on each attempt.
    failures: Arc<RwLock<HashMap<(u32, String), Vec<StageFailure>>>>,
    execution_duration_ms: Arc<RwLock<u64>>,
}

impl MockStageExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded execution attempts, in completion order.
    pub async fn recorded_executions(&self) -> Vec<ExecutionRecord> {
        self.executions.read().await.clone()
    }

    /// Total number of execution attempts across all tasks.
    pub async fn execution_count(&self) -> usize {
        self.executions.read().await.len()
    }

    /// Number of attempts recorded for one (segment, stage) task.
    pub async fn attempts_for(&self, segment_id: u32, stage: &str) -> usize {
        self.executions
            .read()
            .await
            .iter()
            .filter(|r| r.segment_id == segment_id && r.stage == stage)
            .count()
    }

    /// Script the next `times` attempts of a task to fail.
    pub async fn fail_times(
        &self,
        segment_id: u32,
        stage: &str,
        failure: StageFailure,
        times: usize,
    ) {
        let mut failures = self.failures.write().await;
        let queue = failures.entry((segment_id, stage.to_string())).or_default();
        for _ in 0..times {
            queue.push(failure.clone());
        }
    }

    /// Set the simulated per-attempt latency.
    pub async fn set_execution_duration(&self, duration: Duration) {
        *self.execution_duration_ms.write().await = duration.as_millis() as u64;
    }

    /// Take the next scripted failure for a task, if any.
    async fn take_failure(&self, segment_id: u32, stage: &str) -> Option<StageFailure> {
        let mut failures = self.failures.write().await;
        let queue = failures.get_mut(&(segment_id, stage.to_string()))?;
        if queue.is_empty() {
            None
        } else {
            Some(queue.remove(0))
        }
    }

    async fn record(&self, ctx: &StageContext, success: bool) {
        self.executions.write().await.push(ExecutionRecord {
            segment_id: ctx.segment.id,
            stage: ctx.stage.name.clone(),
            attempt: ctx.attempt,
            success,
        });
    }
}

#[async_trait]
impl StageExecutor for MockStageExecutor {
    async fn execute(&self, ctx: StageContext) -> Result<Vec<u8>, StageFailure> {
        let duration_ms = *self.execution_duration_ms.read().await;
        if duration_ms > 0 {
            tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        }

        if ctx.is_cancelled() {
            self.record(&ctx, false).await;
            return Err(StageFailure::Transient("cancelled mid-attempt".to_string()));
        }

        if let Some(failure) = self.take_failure(ctx.segment.id, &ctx.stage.name).await {
            self.record(&ctx, false).await;
            return Err(failure);
        }

        self.record(&ctx, true).await;

        // Deterministic per (stage, segment) so reruns reproduce the
        // same artifact bytes.
        Ok(format!(
            "{}[seg {} {:.3}-{:.3}]",
            ctx.stage.name, ctx.segment.id, ctx.segment.start_secs, ctx.segment.end_secs
        )
        .into_bytes())
    }
}
