//! Pipeline lifecycle integration tests.
//!
//! These tests drive full runs through the orchestrator with mock
//! executors: scheduling, retries, failure propagation, cancellation,
//! resumption and reassembly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dubflow_core::{
    testing::{dubbing_stages, test_source, MemoryArtifactStore, MockStageExecutor},
    ArtifactKind, ArtifactStore, ExecutorSet, OrchestratorConfig, OrchestratorError,
    PipelineConfigError, PipelineOrchestrator, ReassemblyError, ReassemblyMode, Reassembler,
    ResourceClass, RetryPolicy, RunPhase, SegmentOutcome, Segmenter, SqliteTaskStore,
    StageExecutor, StageFailure, StageRegistry, StageSpec, TaskKey, TaskStore,
};

/// Test helper bundling the stores and mock executor for one run.
struct TestHarness {
    task_store: Arc<SqliteTaskStore>,
    artifact_store: Arc<MemoryArtifactStore>,
    executor: Arc<MockStageExecutor>,
}

impl TestHarness {
    fn new() -> Self {
        Self {
            task_store: Arc::new(
                SqliteTaskStore::in_memory().expect("Failed to create task store"),
            ),
            artifact_store: Arc::new(MemoryArtifactStore::new()),
            executor: Arc::new(MockStageExecutor::new()),
        }
    }

    /// Same stores, fresh executor. Used to prove resumed runs do not
    /// re-execute work.
    fn resumed(&self) -> Self {
        Self {
            task_store: Arc::clone(&self.task_store),
            artifact_store: Arc::clone(&self.artifact_store),
            executor: Arc::new(MockStageExecutor::new()),
        }
    }

    fn orchestrator(
        &self,
        run_id: &str,
        stages: Vec<StageSpec>,
        duration_secs: f64,
    ) -> PipelineOrchestrator {
        self.orchestrator_with_slots(run_id, stages, duration_secs, default_slots())
    }

    fn orchestrator_with_slots(
        &self,
        run_id: &str,
        stages: Vec<StageSpec>,
        duration_secs: f64,
        slots: HashMap<ResourceClass, usize>,
    ) -> PipelineOrchestrator {
        let registry = StageRegistry::new(stages).expect("Invalid pipeline");
        let mut executors = ExecutorSet::new();
        for stage in registry.stages() {
            executors = executors.register(
                stage.name.clone(),
                Arc::clone(&self.executor) as Arc<dyn StageExecutor>,
            );
        }
        let segmenter =
            Segmenter::new(test_source(duration_secs), 15.0).expect("Invalid segmenter");

        PipelineOrchestrator::new(
            run_id,
            fast_config(),
            registry,
            executors,
            segmenter,
            fast_retry(),
            slots,
            Arc::clone(&self.task_store) as Arc<dyn TaskStore>,
            Arc::clone(&self.artifact_store) as Arc<dyn ArtifactStore>,
        )
    }
}

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        workers: 4,
        poll_interval_ms: 10,
        scan_limit: 64,
        drain_timeout_ms: 2_000,
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff_base_ms: 10,
        backoff_cap_ms: 40,
    }
}

fn default_slots() -> HashMap<ResourceClass, usize> {
    let mut slots = HashMap::new();
    slots.insert(ResourceClass::Cpu, 4);
    slots.insert(ResourceClass::Gpu, 2);
    slots.insert(ResourceClass::GpuLarge, 2);
    slots
}

/// The payload the mock executor produces for one (stage, segment).
fn mock_payload(stage: &str, segment_id: u32, start: f64, end: f64) -> Vec<u8> {
    format!("{}[seg {} {:.3}-{:.3}]", stage, segment_id, start, end).into_bytes()
}

#[tokio::test]
async fn test_full_run_completes_every_segment() {
    let harness = TestHarness::new();
    let orchestrator = harness.orchestrator("run-1", dubbing_stages(), 60.0);

    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.phase, RunPhase::Completed);
    assert_eq!(report.segments.len(), 4);
    for segment in &report.segments {
        assert!(segment.outcome.is_completed());
        assert!(segment.final_artifact.is_some());
    }
    // 4 segments x 5 stages, nothing resumed.
    assert_eq!(report.tasks_executed, 20);
    assert_eq!(report.tasks_resumed, 0);
    assert_eq!(harness.executor.execution_count().await, 20);
    assert_eq!(harness.artifact_store.len(), 20);

    let status = orchestrator.status();
    assert!(!status.running);
    assert_eq!(status.succeeded, 20);
    assert_eq!(status.permanently_failed, 0);
}

#[tokio::test]
async fn test_strict_reassembly_of_completed_run() {
    let harness = TestHarness::new();
    let orchestrator = harness.orchestrator("run-1", dubbing_stages(), 30.0);
    let report = orchestrator.run().await.unwrap();

    let reassembler = Reassembler::new(
        Arc::clone(&harness.artifact_store) as Arc<dyn ArtifactStore>,
        ReassemblyMode::Strict,
    );
    let output = reassembler.reassemble(&report).unwrap();

    let mut expected = mock_payload("lipsync", 0, 0.0, 15.0);
    expected.extend(mock_payload("lipsync", 1, 15.0, 30.0));
    assert_eq!(output.payload, expected);
    assert_eq!(output.included, vec![0, 1]);
    assert!(output.skipped.is_empty());
}

#[tokio::test]
async fn test_rerun_resumes_from_task_store_and_artifacts() {
    let harness = TestHarness::new();
    let report = harness
        .orchestrator("run-1", dubbing_stages(), 30.0)
        .run()
        .await
        .unwrap();
    assert_eq!(report.tasks_executed, 10);

    // Same run id, same stores, fresh executor: nothing re-executes.
    let resumed = harness.resumed();
    let report = resumed
        .orchestrator("run-1", dubbing_stages(), 30.0)
        .run()
        .await
        .unwrap();

    assert_eq!(report.phase, RunPhase::Completed);
    assert_eq!(report.tasks_executed, 0);
    assert_eq!(report.tasks_resumed, 10);
    assert_eq!(resumed.executor.execution_count().await, 0);
}

#[tokio::test]
async fn test_new_run_resumes_from_warm_artifact_store_alone() {
    let harness = TestHarness::new();
    harness
        .orchestrator("run-1", dubbing_stages(), 30.0)
        .run()
        .await
        .unwrap();

    // Cold task store, warm artifact store, different run id. All
    // stages are deterministic, so the fingerprints line up and the
    // sweep settles every task from the store.
    let second = TestHarness {
        task_store: Arc::new(SqliteTaskStore::in_memory().unwrap()),
        artifact_store: Arc::clone(&harness.artifact_store),
        executor: Arc::new(MockStageExecutor::new()),
    };
    let report = second
        .orchestrator("run-2", dubbing_stages(), 30.0)
        .run()
        .await
        .unwrap();

    assert_eq!(report.phase, RunPhase::Completed);
    assert_eq!(report.tasks_resumed, 10);
    assert_eq!(second.executor.execution_count().await, 0);
}

#[tokio::test]
async fn test_non_deterministic_stage_reruns_with_new_run_id() {
    let stages = || {
        let mut stages = dubbing_stages();
        stages[3] = stages[3].clone().non_deterministic(); // synthesize
        stages
    };

    let harness = TestHarness::new();
    harness
        .orchestrator("run-a", stages(), 15.0)
        .run()
        .await
        .unwrap();

    // New run id: the salted fingerprints of synthesize and everything
    // after it change, so only those re-execute.
    let second = TestHarness {
        task_store: Arc::new(SqliteTaskStore::in_memory().unwrap()),
        artifact_store: Arc::clone(&harness.artifact_store),
        executor: Arc::new(MockStageExecutor::new()),
    };
    let report = second
        .orchestrator("run-b", stages(), 15.0)
        .run()
        .await
        .unwrap();

    assert_eq!(report.phase, RunPhase::Completed);
    assert_eq!(report.tasks_resumed, 3);
    assert_eq!(second.executor.execution_count().await, 2);
    assert_eq!(second.executor.attempts_for(0, "synthesize").await, 1);
    assert_eq!(second.executor.attempts_for(0, "lipsync").await, 1);
}

#[tokio::test]
async fn test_transient_failures_retry_until_success() {
    let harness = TestHarness::new();
    harness
        .executor
        .fail_times(0, "transcribe", StageFailure::Transient("gpu oom".into()), 2)
        .await;

    let report = harness
        .orchestrator("run-1", dubbing_stages(), 15.0)
        .run()
        .await
        .unwrap();

    assert_eq!(report.phase, RunPhase::Completed);
    assert_eq!(harness.executor.attempts_for(0, "transcribe").await, 3);

    let task = harness
        .task_store
        .get("run-1", &TaskKey::new(0, "transcribe"))
        .unwrap()
        .unwrap();
    assert!(task.status.is_succeeded());
    assert_eq!(task.attempts, 2);
    assert!(task.last_error.unwrap().contains("gpu oom"));
}

#[tokio::test]
async fn test_retries_exhaust_into_permanent_failure() {
    let harness = TestHarness::new();
    harness
        .executor
        .fail_times(1, "translate", StageFailure::Transient("timeout".into()), 3)
        .await;

    let report = harness
        .orchestrator("run-1", dubbing_stages(), 30.0)
        .run()
        .await
        .unwrap();

    assert_eq!(report.phase, RunPhase::CompletedWithFailures);
    assert_eq!(harness.executor.attempts_for(1, "translate").await, 3);

    // Segment 0 is untouched by segment 1's failure.
    assert!(report.segments[0].outcome.is_completed());
    match &report.segments[1].outcome {
        SegmentOutcome::Failed { stage, error } => {
            assert_eq!(stage, "translate");
            assert!(error.contains("retries exhausted"));
        }
        other => panic!("expected Failed, got {:?}", other),
    }
    assert!(report.segments[1].final_artifact.is_none());

    // Later stages of the failed segment never ran and carry the
    // propagated error.
    assert_eq!(harness.executor.attempts_for(1, "synthesize").await, 0);
    assert_eq!(harness.executor.attempts_for(1, "lipsync").await, 0);
    let downstream = harness
        .task_store
        .get("run-1", &TaskKey::new(1, "synthesize"))
        .unwrap()
        .unwrap();
    assert_eq!(downstream.status.status_type(), "permanently_failed");

    let failed = harness.task_store.count_by_status("run-1", "permanently_failed").unwrap();
    assert_eq!(failed, 3); // translate + synthesize + lipsync of segment 1
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let harness = TestHarness::new();
    harness
        .executor
        .fail_times(
            0,
            "extract",
            StageFailure::Permanent("corrupt container".into()),
            1,
        )
        .await;

    let report = harness
        .orchestrator("run-1", dubbing_stages(), 15.0)
        .run()
        .await
        .unwrap();

    assert_eq!(harness.executor.attempts_for(0, "extract").await, 1);
    match &report.segments[0].outcome {
        SegmentOutcome::Failed { stage, error } => {
            assert_eq!(stage, "extract");
            assert!(error.contains("corrupt container"));
        }
        other => panic!("expected Failed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_run_rejects_stage_class_without_slots() {
    let harness = TestHarness::new();

    // No slots configured at all: the run must fail fast instead of
    // spinning with every task Blocked.
    let result = harness
        .orchestrator_with_slots("run-1", dubbing_stages(), 15.0, HashMap::new())
        .run()
        .await;

    match result {
        Err(OrchestratorError::PipelineConfig(
            PipelineConfigError::UnslottedResourceClass { stage, class },
        )) => {
            assert_eq!(stage, "extract");
            assert_eq!(class, ResourceClass::Cpu);
        }
        other => panic!(
            "expected UnslottedResourceClass, got {:?}",
            other.map(|_| ())
        ),
    }
}

#[tokio::test]
async fn test_cancellation_drops_queued_work() {
    let harness = TestHarness::new();
    harness
        .executor
        .set_execution_duration(Duration::from_millis(100))
        .await;

    let orchestrator = Arc::new(harness.orchestrator("run-1", dubbing_stages(), 120.0));
    let handle = orchestrator.cancel_handle();

    let run = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run().await })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    handle.cancel();
    let report = run.await.unwrap().unwrap();

    assert_eq!(report.phase, RunPhase::CompletedWithFailures);
    assert!(report
        .segments
        .iter()
        .any(|s| s.outcome == SegmentOutcome::Cancelled));
    // 8 segments x 5 stages; only the first wave ever started.
    assert!(harness.executor.execution_count().await < 40);
    let cancelled = harness.task_store.count_by_status("run-1", "cancelled").unwrap();
    assert!(cancelled > 0);
}

#[tokio::test]
async fn test_contended_run_with_one_failed_segment_and_both_reassembly_modes() {
    // 10 segments through a 3-stage pipeline where the middle stage
    // competes for 2 gpu slots; segment 5 fails permanently mid-chain.
    let stages = vec![
        StageSpec::new(
            "extract",
            ArtifactKind::Source,
            ArtifactKind::AudioTrack,
            ResourceClass::Cpu,
        ),
        StageSpec::new(
            "synthesize",
            ArtifactKind::AudioTrack,
            ArtifactKind::SynthesizedSpeech,
            ResourceClass::Gpu,
        ),
        StageSpec::new(
            "finalize",
            ArtifactKind::SynthesizedSpeech,
            ArtifactKind::DubbedClip,
            ResourceClass::Cpu,
        ),
    ];

    let harness = TestHarness::new();
    harness
        .executor
        .fail_times(
            5,
            "synthesize",
            StageFailure::Permanent("face not found".into()),
            1,
        )
        .await;

    let mut slots = HashMap::new();
    slots.insert(ResourceClass::Cpu, 4);
    slots.insert(ResourceClass::Gpu, 2);
    let report = harness
        .orchestrator_with_slots("run-1", stages, 150.0, slots)
        .run()
        .await
        .unwrap();

    assert_eq!(report.segments.len(), 10);
    assert_eq!(report.completed_segments(), 9);
    match &report.segments[5].outcome {
        SegmentOutcome::Failed { stage, .. } => assert_eq!(stage, "synthesize"),
        other => panic!("expected Failed, got {:?}", other),
    }

    let strict = Reassembler::new(
        Arc::clone(&harness.artifact_store) as Arc<dyn ArtifactStore>,
        ReassemblyMode::Strict,
    );
    match strict.reassemble(&report) {
        Err(ReassemblyError::IncompleteOutput { missing }) => assert_eq!(missing, vec![5]),
        other => panic!("expected IncompleteOutput, got {:?}", other.map(|_| ())),
    }

    let best_effort = Reassembler::new(
        Arc::clone(&harness.artifact_store) as Arc<dyn ArtifactStore>,
        ReassemblyMode::BestEffort,
    );
    let output = best_effort.reassemble(&report).unwrap();
    assert_eq!(output.included, vec![0, 1, 2, 3, 4, 6, 7, 8, 9]);
    assert_eq!(output.skipped, vec![5]);

    let mut expected = Vec::new();
    for id in &output.included {
        let start = *id as f64 * 15.0;
        expected.extend(mock_payload("finalize", *id, start, start + 15.0));
    }
    assert_eq!(output.payload, expected);
}
