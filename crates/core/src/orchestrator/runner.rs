//! Pipeline orchestrator implementation.
//!
//! One coordinator task owns all mutable scheduling state (task graph,
//! queue, allocator); stage executors run on spawned workers and report
//! back over a channel. Because every status transition flows through
//! the coordinator, transitions are linearized without locks and at
//! most one worker ever runs a given (segment, stage).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::artifact::{
    chained_fingerprint, source_fingerprint, ArtifactError, ArtifactKey, ArtifactStore,
};
use crate::fault::{FaultDecision, RetryPolicy};
use crate::metrics;
use crate::sched::{AcquireOutcome, ResourceAllocator, ResourceGrant, TaskQueue};
use crate::segment::{Segment, Segmenter};
use crate::stage::{
    ExecutorSet, ResourceClass, StageContext, StageFailure, StageInput, StageRegistry, StageSpec,
};
use crate::task::{Task, TaskKey, TaskStatus, TaskStore};

use super::config::OrchestratorConfig;
use super::types::{OrchestratorError, RunPhase, RunReport, SegmentOutcome, SegmentReport};

/// Cooperative cancellation handle for a run.
#[derive(Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Request cancellation. Queued work is dropped, in-flight
    /// executors are asked to stop, and the run reports Cancelled for
    /// every unfinished segment.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Snapshot of task counts for an in-progress or finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStatus {
    pub running: bool,
    pub phase: RunPhase,
    pub pending: usize,
    pub ready: usize,
    pub running_tasks: usize,
    pub succeeded: usize,
    pub permanently_failed: usize,
    pub cancelled: usize,
}

/// The pipeline orchestrator - drives all (segment, stage) tasks of one
/// run to a terminal status.
pub struct PipelineOrchestrator {
    run_id: String,
    config: OrchestratorConfig,
    registry: StageRegistry,
    executors: ExecutorSet,
    segmenter: Segmenter,
    retry_policy: RetryPolicy,
    slots: HashMap<ResourceClass, usize>,
    task_store: Arc<dyn TaskStore>,
    artifact_store: Arc<dyn ArtifactStore>,

    // Runtime state
    running: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    phase: Arc<Mutex<RunPhase>>,
}

impl PipelineOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: impl Into<String>,
        config: OrchestratorConfig,
        registry: StageRegistry,
        executors: ExecutorSet,
        segmenter: Segmenter,
        retry_policy: RetryPolicy,
        slots: HashMap<ResourceClass, usize>,
        task_store: Arc<dyn TaskStore>,
        artifact_store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            config,
            registry,
            executors,
            segmenter,
            retry_policy,
            slots,
            task_store,
            artifact_store,
            running: Arc::new(AtomicBool::new(false)),
            cancelled: Arc::new(AtomicBool::new(false)),
            phase: Arc::new(Mutex::new(RunPhase::Initializing)),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.lock().unwrap()
    }

    /// Current task counts, read from the task store.
    pub fn status(&self) -> RunStatus {
        let count = |status_type: &str| {
            self.task_store
                .count_by_status(&self.run_id, status_type)
                .unwrap_or(0) as usize
        };
        RunStatus {
            running: self.running.load(Ordering::Relaxed),
            phase: self.phase(),
            pending: count("pending"),
            ready: count("ready"),
            running_tasks: count("running"),
            succeeded: count("succeeded"),
            permanently_failed: count("permanently_failed"),
            cancelled: count("cancelled"),
        }
    }

    /// Drive the run to completion and return the report.
    ///
    /// Safe to call again on the same run id after a crash: tasks with
    /// existing output artifacts are marked Succeeded without
    /// re-execution.
    pub async fn run(&self) -> Result<RunReport, OrchestratorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(OrchestratorError::AlreadyRunning);
        }

        let result = self.run_inner().await;
        self.running.store(false, Ordering::SeqCst);

        match &result {
            Ok(report) => {
                let label = match report.phase {
                    RunPhase::Completed => "completed",
                    _ => "completed_with_failures",
                };
                metrics::RUNS_COMPLETED.with_label_values(&[label]).inc();
            }
            Err(_) => {
                metrics::RUNS_COMPLETED.with_label_values(&["error"]).inc();
            }
        }

        result
    }

    async fn run_inner(&self) -> Result<RunReport, OrchestratorError> {
        let started_at = Utc::now();
        self.set_phase(RunPhase::Initializing);
        info!("Starting run {}", self.run_id);

        self.executors.validate(self.registry.stages())?;

        // A class with zero slots would leave its tasks Blocked forever;
        // fail up front rather than spinning.
        for stage in self.registry.stages() {
            if self.slots.get(&stage.resource_class).copied().unwrap_or(0) == 0 {
                return Err(crate::stage::PipelineConfigError::UnslottedResourceClass {
                    stage: stage.name.clone(),
                    class: stage.resource_class,
                }
                .into());
            }
        }

        let segments = self.segmenter.segments();
        let mut coordinator = Coordinator::new(
            self.run_id.clone(),
            self.config.clone(),
            self.retry_policy.clone(),
            Arc::clone(&self.task_store),
            Arc::clone(&self.artifact_store),
            self.executors.clone(),
            Arc::clone(&self.cancelled),
            ResourceAllocator::new(self.slots.clone()),
            self.registry.clone(),
        );

        coordinator.build_graph(&segments)?;
        coordinator.resumption_sweep()?;
        info!(
            "Run {}: {} segments x {} stages, {} tasks resumed from artifacts",
            self.run_id,
            segments.len(),
            self.registry.len(),
            coordinator.tasks_resumed
        );

        self.set_phase(RunPhase::Scheduling);
        coordinator.drive(&self.phase).await?;

        let report = coordinator.build_report(started_at);
        self.set_phase(report.phase);
        info!(
            "Run {} finished: {}/{} segments completed ({} executed, {} resumed)",
            self.run_id,
            report.completed_segments(),
            report.segments.len(),
            report.tasks_executed,
            report.tasks_resumed
        );
        Ok(report)
    }

    fn set_phase(&self, phase: RunPhase) {
        *self.phase.lock().unwrap() = phase;
    }
}

/// One node of the segment x stage task graph.
struct TaskNode {
    segment: Segment,
    stage: StageSpec,
    input_key: Option<ArtifactKey>,
    output_key: ArtifactKey,
    status: TaskStatus,
    attempts: u32,
    not_before: Option<chrono::DateTime<Utc>>,
}

/// Message from a worker back to the coordinator.
struct WorkerOutcome {
    key: TaskKey,
    grant: ResourceGrant,
    result: Result<Vec<u8>, StageFailure>,
    elapsed: Duration,
}

/// Owns all mutable scheduling state for one run.
struct Coordinator {
    run_id: String,
    config: OrchestratorConfig,
    retry_policy: RetryPolicy,
    task_store: Arc<dyn TaskStore>,
    artifact_store: Arc<dyn ArtifactStore>,
    executors: ExecutorSet,
    cancelled: Arc<AtomicBool>,
    registry: StageRegistry,

    nodes: HashMap<TaskKey, TaskNode>,
    /// Keys in (ordinal, segment id) order for deterministic sweeps.
    order: Vec<TaskKey>,
    queue: TaskQueue,
    allocator: ResourceAllocator,
    in_flight: usize,
    tasks_executed: u64,
    tasks_resumed: u64,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    fn new(
        run_id: String,
        config: OrchestratorConfig,
        retry_policy: RetryPolicy,
        task_store: Arc<dyn TaskStore>,
        artifact_store: Arc<dyn ArtifactStore>,
        executors: ExecutorSet,
        cancelled: Arc<AtomicBool>,
        allocator: ResourceAllocator,
        registry: StageRegistry,
    ) -> Self {
        Self {
            run_id,
            config,
            retry_policy,
            task_store,
            artifact_store,
            executors,
            cancelled,
            registry,
            nodes: HashMap::new(),
            order: Vec::new(),
            queue: TaskQueue::new(),
            allocator,
            in_flight: 0,
            tasks_executed: 0,
            tasks_resumed: 0,
        }
    }

    /// Build all (segment, stage) nodes with their fingerprint chain
    /// and reconcile against persisted task state.
    fn build_graph(&mut self, segments: &[Segment]) -> Result<(), OrchestratorError> {
        let previous: HashMap<TaskKey, Task> = self
            .task_store
            .list_run(&self.run_id)?
            .into_iter()
            .map(|t| (t.key.clone(), t))
            .collect();

        for stage in self.registry.stages() {
            for segment in segments {
                let fingerprint = match stage.ordinal {
                    0 => source_fingerprint(stage, segment, &self.run_id),
                    ordinal => {
                        // Upstream node exists: stages are built in
                        // ordinal order.
                        let upstream_stage = &self.registry.stages()[ordinal as usize - 1];
                        let upstream_key = TaskKey::new(segment.id, upstream_stage.name.clone());
                        let upstream = &self.nodes[&upstream_key];
                        chained_fingerprint(stage, &upstream.output_key.fingerprint, &self.run_id)
                    }
                };

                let key = TaskKey::new(segment.id, stage.name.clone());
                let input_key = if stage.ordinal == 0 {
                    None
                } else {
                    let upstream_stage = &self.registry.stages()[stage.ordinal as usize - 1];
                    let upstream_key = TaskKey::new(segment.id, upstream_stage.name.clone());
                    Some(self.nodes[&upstream_key].output_key.clone())
                };
                let output_key =
                    ArtifactKey::new(segment.id, stage.name.clone(), fingerprint.clone());

                let mut node = TaskNode {
                    segment: segment.clone(),
                    stage: stage.clone(),
                    input_key,
                    output_key,
                    status: TaskStatus::Pending,
                    attempts: 0,
                    not_before: None,
                };

                // Adopt state from a previous run of the same graph. A
                // task left Running or Ready by a crash goes back to
                // Pending; the artifact sweep re-settles it if its
                // output made it to the store.
                if let Some(prev) = previous.get(&key) {
                    if prev.fingerprint == fingerprint {
                        node.attempts = prev.attempts;
                        node.not_before = prev.not_before;
                        node.status = match &prev.status {
                            TaskStatus::Running { .. } | TaskStatus::Ready => TaskStatus::Pending,
                            other => other.clone(),
                        };
                    }
                }

                let mut task = Task::new(&self.run_id, key.clone(), stage.ordinal, &fingerprint);
                task.attempts = node.attempts;
                task.not_before = node.not_before;
                self.task_store.upsert(&task)?;
                if previous
                    .get(&key)
                    .map(|prev| prev.status != node.status)
                    .unwrap_or(false)
                {
                    self.task_store
                        .update_status(&self.run_id, &key, node.status.clone())?;
                }

                self.order.push(key.clone());
                self.nodes.insert(key, node);
            }
        }

        // (ordinal, segment id) order for promotion and reporting.
        self.order.sort_by_key(|key| {
            let node = &self.nodes[key];
            (node.stage.ordinal, key.segment_id)
        });

        Ok(())
    }

    /// Mark every non-terminal task whose output artifact already
    /// exists as Succeeded without execution.
    fn resumption_sweep(&mut self) -> Result<(), OrchestratorError> {
        for key in &self.order {
            let Some(node) = self.nodes.get_mut(key) else {
                continue;
            };
            if node.status.is_terminal() {
                if node.status.is_succeeded() {
                    self.tasks_resumed += 1;
                }
                continue;
            }
            if self.artifact_store.exists(&node.output_key)? {
                debug!("Task {} resumed from existing artifact", key);
                let status = TaskStatus::Succeeded {
                    finished_at: Utc::now(),
                    resumed: true,
                };
                node.status = status.clone();
                self.task_store.update_status(&self.run_id, key, status)?;
                self.tasks_resumed += 1;
                metrics::TASKS_RESUMED.inc();
            }
        }
        Ok(())
    }

    /// Main scheduling loop: promote, dispatch, absorb outcomes, until
    /// every task is terminal or the run is cancelled.
    async fn drive(&mut self, phase: &Arc<Mutex<RunPhase>>) -> Result<(), OrchestratorError> {
        let (result_tx, mut result_rx) = mpsc::channel::<WorkerOutcome>(self.config.workers.max(1));

        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                *phase.lock().unwrap() = RunPhase::Draining;
                self.drain_cancelled(&mut result_rx).await?;
                return Ok(());
            }

            self.promote_ready()?;
            self.dispatch(&result_tx)?;

            let all_terminal = self
                .nodes
                .values()
                .all(|node| node.status.is_terminal());
            if all_terminal && self.in_flight == 0 {
                return Ok(());
            }

            if self.in_flight > 0 && self.queue.is_empty() && self.all_settled_or_running() {
                *phase.lock().unwrap() = RunPhase::Draining;
            }

            let poll = Duration::from_millis(self.config.poll_interval_ms);
            if self.in_flight > 0 {
                tokio::select! {
                    outcome = result_rx.recv() => {
                        let outcome = outcome.ok_or(OrchestratorError::ChannelClosed)?;
                        self.handle_outcome(outcome)?;
                    }
                    _ = tokio::time::sleep(poll) => {}
                }
            } else {
                // Nothing in flight: waiting for a retry delay to pass.
                tokio::time::sleep(poll).await;
            }
        }
    }

    fn all_settled_or_running(&self) -> bool {
        self.nodes
            .values()
            .all(|node| node.status.is_terminal() || node.status.is_running())
    }

    /// Promote Pending tasks whose upstream output exists and whose
    /// retry delay has passed.
    fn promote_ready(&mut self) -> Result<(), OrchestratorError> {
        let now = Utc::now();
        let keys: Vec<TaskKey> = self.order.clone();
        for key in keys {
            let node = &self.nodes[&key];
            if node.status != TaskStatus::Pending {
                continue;
            }
            if let Some(not_before) = node.not_before {
                if now < not_before {
                    continue;
                }
            }
            let upstream_done = match node.stage.ordinal {
                0 => true,
                ordinal => {
                    let upstream_stage = &self.registry.stages()[ordinal as usize - 1];
                    let upstream_key = TaskKey::new(key.segment_id, upstream_stage.name.clone());
                    self.nodes[&upstream_key].status.is_succeeded()
                }
            };
            if !upstream_done {
                continue;
            }

            self.set_status(&key, TaskStatus::Ready)?;
            let node = &self.nodes[&key];
            self.queue
                .push(key.clone(), node.stage.ordinal, node.stage.resource_class);
        }
        Ok(())
    }

    /// Pop ready work in priority order and hand it to workers, up to
    /// the worker budget and within the per-pass scan limit. Entries
    /// without a free slot are re-queued at their original position.
    fn dispatch(&mut self, result_tx: &mpsc::Sender<WorkerOutcome>) -> Result<(), OrchestratorError> {
        let mut deferred = Vec::new();
        let mut scanned = 0;

        while self.in_flight < self.config.workers && scanned < self.config.scan_limit {
            let Some(entry) = self.queue.pop() else {
                break;
            };
            scanned += 1;

            match self.allocator.acquire(entry.class) {
                AcquireOutcome::Blocked => {
                    deferred.push(entry);
                }
                AcquireOutcome::Granted(grant) => {
                    if let Err(e) = self.spawn_worker(&entry.key, grant, result_tx) {
                        // Dispatch failed before the worker started; the
                        // grant was already released by spawn_worker.
                        return Err(e);
                    }
                }
            }
        }

        for entry in deferred {
            self.queue.push_deferred(entry);
        }
        Ok(())
    }

    fn spawn_worker(
        &mut self,
        key: &TaskKey,
        grant: ResourceGrant,
        result_tx: &mpsc::Sender<WorkerOutcome>,
    ) -> Result<(), OrchestratorError> {
        let node = &self.nodes[key];

        let input = match &node.input_key {
            None => StageInput::Source(node.segment.source.clone()),
            Some(input_key) => match self.artifact_store.get(input_key) {
                Ok(Some(artifact)) => StageInput::Artifact(artifact),
                Ok(None) => {
                    self.allocator.release(grant);
                    return Err(OrchestratorError::ArtifactStore(ArtifactError::Storage(
                        format!("upstream artifact {} vanished", input_key),
                    )));
                }
                Err(e) => {
                    self.allocator.release(grant);
                    return Err(e.into());
                }
            },
        };

        let executor = match self.executors.get(&key.stage) {
            Ok(executor) => executor,
            Err(e) => {
                self.allocator.release(grant);
                return Err(e.into());
            }
        };

        self.set_status(
            key,
            TaskStatus::Running {
                started_at: Utc::now(),
            },
        )?;

        let node = &self.nodes[key];
        let ctx = StageContext::new(
            node.segment.clone(),
            node.stage.clone(),
            input,
            node.attempts,
            Arc::clone(&self.cancelled),
        );
        let key = key.clone();
        let tx = result_tx.clone();

        debug!("Dispatching task {} on {}", key, grant.class);
        tokio::spawn(async move {
            let started = Instant::now();
            let result = executor.execute(ctx).await;
            let outcome = WorkerOutcome {
                key,
                grant,
                result,
                elapsed: started.elapsed(),
            };
            // The coordinator only drops the receiver during drain,
            // where unreported grants are reclaimed wholesale.
            let _ = tx.send(outcome).await;
        });

        self.in_flight += 1;
        self.tasks_executed += 1;
        Ok(())
    }

    fn handle_outcome(&mut self, outcome: WorkerOutcome) -> Result<(), OrchestratorError> {
        self.in_flight -= 1;
        self.allocator.release(outcome.grant);

        metrics::STAGE_DURATION
            .with_label_values(&[outcome.key.stage.as_str()])
            .observe(outcome.elapsed.as_secs_f64());

        if self.cancelled.load(Ordering::SeqCst) {
            // Late result after cancellation: discard it.
            return Ok(());
        }

        match outcome.result {
            Ok(payload) => self.complete_task(&outcome.key, payload),
            Err(failure) => self.fail_attempt(&outcome.key, failure),
        }
    }

    fn complete_task(&mut self, key: &TaskKey, payload: Vec<u8>) -> Result<(), OrchestratorError> {
        let output_key = self.nodes[key].output_key.clone();

        match self.artifact_store.put(&output_key, &payload) {
            Ok(()) => {
                metrics::STAGE_EXECUTIONS
                    .with_label_values(&[key.stage.as_str(), "success"])
                    .inc();
                self.set_status(
                    key,
                    TaskStatus::Succeeded {
                        finished_at: Utc::now(),
                        resumed: false,
                    },
                )?;
                debug!("Task {} succeeded", key);
                Ok(())
            }
            Err(ArtifactError::Conflict { key: conflict_key, stored, incoming }) => {
                // A different payload already sits under this key: a
                // stage declared deterministic was not. Failing the
                // task keeps the stored artifact authoritative.
                error!(
                    "Artifact conflict at {} (stored {}, incoming {})",
                    conflict_key, stored, incoming
                );
                metrics::STAGE_EXECUTIONS
                    .with_label_values(&[key.stage.as_str(), "conflict"])
                    .inc();
                self.fail_permanently(
                    key,
                    format!("artifact conflict at {}", conflict_key),
                )
            }
            Err(e) => Err(e.into()),
        }
    }

    fn fail_attempt(&mut self, key: &TaskKey, failure: StageFailure) -> Result<(), OrchestratorError> {
        let attempts = self.nodes[key].attempts + 1;
        let decision = self.retry_policy.decide(&failure, attempts);

        metrics::STAGE_EXECUTIONS
            .with_label_values(&[key.stage.as_str(), "failure"])
            .inc();

        match decision {
            FaultDecision::RetryAfter(delay) => {
                let not_before = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
                warn!(
                    "Task {} attempt {} failed ({}), retrying in {:?}",
                    key, attempts, failure, delay
                );
                metrics::RETRY_ATTEMPTS
                    .with_label_values(&[key.stage.as_str()])
                    .inc();

                self.task_store.record_attempt(
                    &self.run_id,
                    key,
                    attempts,
                    Some(not_before),
                    &failure.to_string(),
                )?;
                if let Some(node) = self.nodes.get_mut(key) {
                    node.attempts = attempts;
                    node.not_before = Some(not_before);
                }
                self.set_status(key, TaskStatus::Pending)?;
                Ok(())
            }
            FaultDecision::FailNow(reason) => {
                self.task_store
                    .record_attempt(&self.run_id, key, attempts, None, &reason)?;
                if let Some(node) = self.nodes.get_mut(key) {
                    node.attempts = attempts;
                }
                self.fail_permanently(key, reason)
            }
        }
    }

    /// Mark a task PermanentlyFailed and propagate to every later stage
    /// of the same segment. Other segments are untouched.
    fn fail_permanently(&mut self, key: &TaskKey, reason: String) -> Result<(), OrchestratorError> {
        error!("Task {} permanently failed: {}", key, reason);
        let failed_ordinal = self.nodes[key].stage.ordinal;
        self.set_status(
            key,
            TaskStatus::PermanentlyFailed {
                error: reason,
                failed_at: Utc::now(),
            },
        )?;

        let downstream: Vec<TaskKey> = self
            .order
            .iter()
            .filter(|k| {
                k.segment_id == key.segment_id
                    && self.nodes[*k].stage.ordinal > failed_ordinal
                    && !self.nodes[*k].status.is_terminal()
            })
            .cloned()
            .collect();

        for dep in downstream {
            debug!("Propagating failure of {} to {}", key, dep);
            self.set_status(
                &dep,
                TaskStatus::PermanentlyFailed {
                    error: format!("upstream stage '{}' failed", key.stage),
                    failed_at: Utc::now(),
                },
            )?;
        }
        Ok(())
    }

    /// Cancel all unfinished work and wait (bounded) for in-flight
    /// executors to come back.
    async fn drain_cancelled(
        &mut self,
        result_rx: &mut mpsc::Receiver<WorkerOutcome>,
    ) -> Result<(), OrchestratorError> {
        info!("Run {} cancelled, draining {} in-flight tasks", self.run_id, self.in_flight);
        self.queue.clear();

        let keys: Vec<TaskKey> = self.order.clone();
        for key in &keys {
            let status = self.nodes[key].status.clone();
            match status {
                TaskStatus::Pending | TaskStatus::Ready => {
                    self.set_status(
                        key,
                        TaskStatus::Cancelled {
                            cancelled_at: Utc::now(),
                        },
                    )?;
                }
                _ => {}
            }
        }

        let deadline = Instant::now() + Duration::from_millis(self.config.drain_timeout_ms);
        while self.in_flight > 0 {
            match tokio::time::timeout_at(deadline, result_rx.recv()).await {
                Ok(Some(outcome)) => {
                    self.in_flight -= 1;
                    self.allocator.release(outcome.grant);
                    // Result discarded; the task is cancelled below.
                }
                Ok(None) => return Err(OrchestratorError::ChannelClosed),
                Err(_) => {
                    warn!(
                        "Drain timeout: abandoning {} in-flight tasks",
                        self.in_flight
                    );
                    break;
                }
            }
        }

        for key in &keys {
            if self.nodes[key].status.is_running() {
                self.set_status(
                    key,
                    TaskStatus::Cancelled {
                        cancelled_at: Utc::now(),
                    },
                )?;
            }
        }
        Ok(())
    }

    fn set_status(&mut self, key: &TaskKey, status: TaskStatus) -> Result<(), OrchestratorError> {
        self.task_store
            .update_status(&self.run_id, key, status.clone())?;
        if let Some(node) = self.nodes.get_mut(key) {
            node.status = status;
        }
        Ok(())
    }

    fn build_report(&self, started_at: chrono::DateTime<Utc>) -> RunReport {
        let final_stage = self.registry.final_stage().name.clone();

        let mut segment_ids: Vec<u32> = self
            .nodes
            .keys()
            .map(|k| k.segment_id)
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        segment_ids.sort_unstable();

        let mut segments = Vec::with_capacity(segment_ids.len());
        for segment_id in segment_ids {
            let mut outcome = SegmentOutcome::Completed;
            let mut final_artifact = None;

            for stage in self.registry.stages() {
                let key = TaskKey::new(segment_id, stage.name.clone());
                let node = &self.nodes[&key];
                match &node.status {
                    TaskStatus::Succeeded { .. } => {
                        if stage.name == final_stage {
                            final_artifact = Some(node.output_key.clone());
                        }
                    }
                    TaskStatus::PermanentlyFailed { error, .. } => {
                        outcome = SegmentOutcome::Failed {
                            stage: stage.name.clone(),
                            error: error.clone(),
                        };
                        break;
                    }
                    _ => {
                        outcome = SegmentOutcome::Cancelled;
                        break;
                    }
                }
            }

            if !outcome.is_completed() {
                final_artifact = None;
            }
            segments.push(SegmentReport {
                segment_id,
                outcome,
                final_artifact,
            });
        }

        let all_completed = segments.iter().all(|s| s.outcome.is_completed());
        RunReport {
            run_id: self.run_id.clone(),
            phase: if all_completed {
                RunPhase::Completed
            } else {
                RunPhase::CompletedWithFailures
            },
            started_at,
            finished_at: Utc::now(),
            segments,
            tasks_executed: self.tasks_executed,
            tasks_resumed: self.tasks_resumed,
        }
    }
}
