//! End-to-end runs over the real pipeline, scheduler and coordinator with
//! in-test handlers.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use conductor_core::cache::{CacheManager, CacheNamespace, ManualClock};
use conductor_core::config::{CoordinatorConfig, PipelineConfig};
use conductor_core::memory::{InMemoryLearningStore, RETRY_EXHAUSTED};
use conductor_core::models::{ExecutionContext, SymbolicPlan, SymbolicTask};
use conductor_core::risk::CheckpointManager;
use conductor_core::skills::{
    Handler, HandlerDefinition, HandlerOutput, HandlerRegistry, NoProtocol,
};
use conductor_core::swarm::{
    AgentTask, Coordinator, ExecutionPipeline, GuardedOutcome, SwarmMode, TaskScheduler,
    TaskStatus,
};
use conductor_core::tools::NoopVcs;
use conductor_core::ConductorError;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Journal of (handler, instruction) calls shared by every handler
type Journal = Arc<Mutex<Vec<(String, String)>>>;

enum Reply {
    Text(String),
    Fail(String),
}

struct StubHandler {
    definition: HandlerDefinition,
    reply: Reply,
    journal: Journal,
}

#[async_trait]
impl Handler for StubHandler {
    fn definition(&self) -> &HandlerDefinition {
        &self.definition
    }

    async fn invoke(&self, ctx: &ExecutionContext) -> conductor_core::Result<HandlerOutput> {
        self.journal
            .lock()
            .push((self.definition.name.clone(), ctx.instruction.clone()));
        match &self.reply {
            Reply::Text(text) => Ok(HandlerOutput::text(text.clone())),
            Reply::Fail(stderr) => Err(ConductorError::ScriptExecutionFailed {
                exit_code: Some(2),
                stderr: stderr.clone(),
            }),
        }
    }
}

struct Harness {
    pipeline: Arc<ExecutionPipeline>,
    learning: Arc<InMemoryLearningStore>,
    journal: Journal,
    workdir: TempDir,
    _backups: TempDir,
}

impl Harness {
    fn new(handlers: Vec<(&str, Reply)>) -> Self {
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        for (name, reply) in handlers {
            registry.register(Arc::new(StubHandler {
                definition: HandlerDefinition::new(name).with_capabilities(&[name]),
                reply,
                journal: journal.clone(),
            }));
        }

        let backups = tempfile::tempdir().unwrap();
        let learning = Arc::new(InMemoryLearningStore::new());
        let pipeline = ExecutionPipeline::new(Arc::new(registry), learning.clone())
            .with_protocol(Arc::new(NoProtocol))
            .with_checkpoints(Arc::new(CheckpointManager::new(
                backups.path(),
                Arc::new(NoopVcs),
            )))
            .with_config(PipelineConfig {
                base_delay_ms: 0,
                ..Default::default()
            });

        Self {
            pipeline: Arc::new(pipeline),
            learning,
            journal,
            workdir: tempfile::tempdir().unwrap(),
            _backups: backups,
        }
    }

    fn ctx(&self, instruction: &str) -> ExecutionContext {
        ExecutionContext::new(instruction, self.workdir.path())
    }

    fn called(&self) -> Vec<String> {
        self.journal.lock().iter().map(|(h, _)| h.clone()).collect()
    }

    fn coordinator(&self) -> Coordinator {
        Coordinator::new(CoordinatorConfig::default(), self.pipeline.clone())
    }
}

fn text(reply: &str) -> Reply {
    Reply::Text(reply.to_string())
}

#[tokio::test]
async fn test_blocked_instruction_never_reaches_a_handler() {
    let harness = Harness::new(vec![("shell", text("Cleaned up the workspace as asked."))]);

    let result = harness
        .pipeline
        .execute(
            harness.ctx("rm -rf /").with_preferred_handler("shell"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.handler_used, "none");
    assert!(result.output.contains("recursive deletion"));
    assert!(harness.called().is_empty());
    assert!(harness.learning.outcomes().is_empty());
}

#[tokio::test]
async fn test_chain_plan_runs_in_dependency_order() {
    let harness = Harness::new(vec![
        ("designer", text("Schema drafted with three tables.")),
        ("builder", text("Endpoints wired to the new schema.")),
        ("tester", text("Integration suite passes against the endpoints.")),
    ]);
    let plan = SymbolicPlan::new("ship the orders api")
        .with_task(SymbolicTask::new("t3", "tester", "Test the endpoints").depends_on("t2"))
        .with_task(SymbolicTask::new("t1", "designer", "Design the schema"))
        .with_task(SymbolicTask::new("t2", "builder", "Build the endpoints").depends_on("t1"));

    let report = TaskScheduler::new(harness.pipeline.clone())
        .execute(&plan, &harness.ctx("ship"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.completion_order, vec!["t1", "t2", "t3"]);
    assert_eq!(harness.called(), vec!["designer", "builder", "tester"]);
    assert_eq!(report.statuses["t3"], TaskStatus::Succeeded);
    assert_eq!(report.results["t2"], "Endpoints wired to the new schema.");
    assert!(report.synthesis.starts_with("# ship the orders api"));
    for id in ["t1", "t2", "t3"] {
        assert!(report.synthesis.contains(id));
    }
}

#[tokio::test]
async fn test_failed_dependency_still_unblocks_dependents() {
    let harness = Harness::new(vec![
        ("designer", Reply::Fail("schema tool missing".into())),
        ("builder", text("Endpoints wired with an inline schema.")),
    ]);
    let plan = SymbolicPlan::new("orders")
        .with_task(SymbolicTask::new("t1", "designer", "Design the schema"))
        .with_task(SymbolicTask::new("t2", "builder", "Build the endpoints").depends_on("t1"));

    let report = TaskScheduler::new(harness.pipeline.clone())
        .execute(&plan, &harness.ctx("orders"), &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.results["t1"].starts_with("ERROR: "));
    assert_eq!(report.statuses["t2"], TaskStatus::Succeeded);
    assert_eq!(report.failed_tasks(), vec!["t1"]);
}

#[tokio::test]
async fn test_dependency_cycle_is_a_deadlock() {
    let harness = Harness::new(vec![("builder", text("Built the requested module."))]);
    let plan = SymbolicPlan::new("cycle")
        .with_task(SymbolicTask::new("a", "builder", "Build a").depends_on("b"))
        .with_task(SymbolicTask::new("b", "builder", "Build b").depends_on("a"));

    let err = TaskScheduler::new(harness.pipeline.clone())
        .execute(&plan, &harness.ctx("cycle"), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ConductorError::DeadlockDetected { pending } => assert_eq!(pending, vec!["a", "b"]),
        other => panic!("expected deadlock, got {other:?}"),
    }
    assert!(harness.called().is_empty());
}

#[tokio::test]
async fn test_sequential_swarm_stops_at_completion_marker() {
    let harness = Harness::new(vec![
        ("a", text("Migration written and applied. Task complete.")),
        ("b", text("Reviewed the migration for locking issues.")),
        ("c", text("Documented the new columns in the schema guide.")),
    ]);

    let report = harness
        .coordinator()
        .execute_swarm(
            vec![
                AgentTask::new("a", "Write the migration"),
                AgentTask::new("b", "Review the migration"),
                AgentTask::new("c", "Document the columns"),
            ],
            SwarmMode::Sequential,
            &harness.ctx("swarm"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(report.short_pathway);
    assert_eq!(report.results.len(), 1);
    assert!(report.results["a"].success);
    assert!(!report.results.contains_key("b"));
    assert!(!report.results.contains_key("c"));
    assert_eq!(report.skipped, vec!["b", "c"]);
    assert_eq!(harness.called(), vec!["a"]);
}

#[tokio::test]
async fn test_parallel_swarm_reports_every_handler() {
    let harness = Harness::new(vec![
        ("docs", text("Wrote the API reference pages.")),
        ("lint", Reply::Fail("linter crashed".into())),
    ]);

    let report = harness
        .coordinator()
        .execute_swarm(
            vec![
                AgentTask::new("docs", "Document the API"),
                AgentTask::new("lint", "Lint the crate"),
            ],
            SwarmMode::Parallel,
            &harness.ctx("swarm"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.status, "completed");
    assert!(report.results["docs"].success);
    assert!(!report.results["lint"].success);
}

#[tokio::test]
async fn test_retry_exhaustion_records_a_lesson() {
    let harness = Harness::new(vec![("deployer", Reply::Fail("cluster unreachable".into()))]);

    let err = harness
        .pipeline
        .execute(
            harness.ctx("Refresh the staging dashboards").with_preferred_handler("deployer"),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    match err {
        ConductorError::RetryExhausted {
            attempts,
            last_error,
            ..
        } => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("cluster unreachable"));
        }
        other => panic!("expected retry exhaustion, got {other:?}"),
    }
    assert_eq!(harness.called().len(), 3);
    let lessons = harness.learning.lessons();
    assert_eq!(lessons.len(), 1);
    assert_eq!(lessons[0].pattern, RETRY_EXHAUSTED);
}

#[tokio::test]
async fn test_risky_edit_is_checkpointed_and_rolled_back() {
    let harness = Harness::new(vec![("editor", text("Removed the legacy section from notes.md."))]);
    let notes = harness.workdir.path().join("notes.md");
    std::fs::write(&notes, "legacy section\n").unwrap();

    let result = harness
        .pipeline
        .execute(
            harness
                .ctx("Remove the legacy section from notes.md")
                .with_target_paths(vec!["notes.md".into()])
                .with_preferred_handler("editor"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(result.success);
    let checkpoint_id = result.checkpoint_id.expect("risky edit should be checkpointed");

    std::fs::write(&notes, "").unwrap();
    let rollback = harness
        .pipeline
        .checkpoints()
        .rollback(&checkpoint_id, harness.workdir.path())
        .await;

    assert!(rollback.success);
    assert_eq!(rollback.restored_files, vec!["notes.md"]);
    assert_eq!(std::fs::read_to_string(&notes).unwrap(), "legacy section\n");
}

#[tokio::test]
async fn test_failed_plan_dispatches_debugger() {
    let harness = Harness::new(vec![
        ("builder", text("Built the requested module.")),
        ("debugger", text("Tasks a and b wait on each other; drop one edge.")),
    ]);
    let plan = SymbolicPlan::new("cycle")
        .with_task(SymbolicTask::new("a", "builder", "Build a").depends_on("b"))
        .with_task(SymbolicTask::new("b", "builder", "Build b").depends_on("a"));
    let coordinator = harness.coordinator();

    let outcome = coordinator
        .plan_and_execute(&plan, &harness.ctx("cycle"), &CancellationToken::new())
        .await
        .unwrap();

    match outcome {
        GuardedOutcome::Recovering {
            attempt, diagnosis, ..
        } => {
            assert_eq!(attempt, 1);
            assert!(diagnosis.unwrap().contains("wait on each other"));
        }
        other => panic!("expected recovery, got {other:?}"),
    }
    assert_eq!(harness.called(), vec!["debugger"]);
}

#[test]
fn test_routing_entry_lives_one_hour() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()));
    let cache = CacheManager::new(10).with_clock(clock.clone());
    cache.set("k", json!({ "handler": "docs" }), CacheNamespace::Routing);

    clock.advance(Duration::from_secs(30 * 60));
    assert_eq!(cache.get("k"), Some(json!({ "handler": "docs" })));

    clock.advance(Duration::from_secs(31 * 60));
    assert!(cache.get("k").is_none());
    assert!(cache.is_empty());
}

#[test]
fn test_audit_results_expire_after_thirty_minutes() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()));
    let cache = CacheManager::new(10).with_clock(clock.clone());
    cache.set("audit:src/lib.rs", json!({ "findings": 0 }), CacheNamespace::AuditResult);

    clock.advance(Duration::from_secs(30 * 60));
    assert!(cache.get("audit:src/lib.rs").is_some());

    clock.advance(Duration::from_secs(31 * 60));
    assert!(cache.get("audit:src/lib.rs").is_none());
    assert_eq!(cache.stats().misses, 1);
}

#[test]
fn test_overflow_evicts_coldest_fifth() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()));
    let cache = CacheManager::new(10).with_clock(clock.clone());

    for i in 0..10 {
        cache.set(&format!("k{i}"), json!(i), CacheNamespace::Routing);
        clock.advance(Duration::from_secs(1));
    }
    assert!(cache.get("k0").is_some());
    assert!(cache.get("k1").is_some());

    cache.set("k10", json!(10), CacheNamespace::Routing);

    assert_eq!(cache.len(), 9);
    assert_eq!(cache.stats().evictions, 2);
    assert!(cache.get("k2").is_none());
    assert!(cache.get("k3").is_none());
    assert!(cache.get("k0").is_some());
    assert!(cache.get("k10").is_some());
}
