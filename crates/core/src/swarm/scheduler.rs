//! # Task Scheduler
//!
//! Executes a [`SymbolicPlan`] wave by wave. Each wave launches every task
//! whose dependencies all have a result and waits for the whole wave before
//! computing the next one.
//!
//! A failed task stores an `ERROR: <message>` sentinel as its result and does
//! not stop the plan; dependents still run and see the sentinel. A plan that
//! can make no progress raises `DeadlockDetected`.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::events::{EventSink, SwarmEvent, SwarmEventKind};
use super::pipeline::TaskExecutor;
use crate::error::{ConductorError, Result};
use crate::models::{ExecutionContext, SymbolicPlan, SymbolicTask};

/// Prefix of the result stored for a failed task
pub const ERROR_SENTINEL: &str = "ERROR: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded,
    Failed,
}

/// Everything a plan run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanReport {
    pub goal: String,
    /// Task id to output, or the error sentinel
    pub results: HashMap<String, String>,
    pub statuses: HashMap<String, TaskStatus>,
    /// Task ids in the order their results were recorded
    pub completion_order: Vec<String>,
    pub waves: usize,
    /// Human-readable report covering every task
    pub synthesis: String,
}

impl PlanReport {
    pub fn failed_tasks(&self) -> Vec<&str> {
        self.completion_order
            .iter()
            .filter(|id| self.statuses.get(*id) == Some(&TaskStatus::Failed))
            .map(String::as_str)
            .collect()
    }
}

/// Dependency-respecting plan executor
pub struct TaskScheduler {
    executor: Arc<dyn TaskExecutor>,
    events: EventSink,
}

impl TaskScheduler {
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            executor,
            events: EventSink::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Run `plan` against `ctx`'s workspace
    ///
    /// Raises only `InvalidPlan`, `DeadlockDetected` and `Cancelled`.
    #[tracing::instrument(skip_all, fields(goal = %plan.goal, tasks = plan.tasks.len()))]
    pub async fn execute(
        &self,
        plan: &SymbolicPlan,
        ctx: &ExecutionContext,
        token: &CancellationToken,
    ) -> Result<PlanReport> {
        validate(plan)?;

        let mut pending: BTreeSet<&str> = plan.tasks.iter().map(|t| t.id.as_str()).collect();
        let mut results: HashMap<String, String> = HashMap::new();
        let mut statuses: HashMap<String, TaskStatus> = HashMap::new();
        let mut completion_order = Vec::with_capacity(plan.tasks.len());
        let mut waves = 0;

        while !pending.is_empty() {
            if token.is_cancelled() {
                return Err(ConductorError::Cancelled);
            }

            // Plan order within a wave
            let ready: Vec<&SymbolicTask> = plan
                .tasks
                .iter()
                .filter(|t| pending.contains(t.id.as_str()))
                .filter(|t| t.dependency_ids.iter().all(|d| results.contains_key(d)))
                .collect();

            if ready.is_empty() {
                let stuck: Vec<String> = pending.iter().map(|id| id.to_string()).collect();
                tracing::error!(pending = ?stuck, "Scheduler deadlock");
                return Err(ConductorError::DeadlockDetected { pending: stuck });
            }

            waves += 1;
            for task in &ready {
                pending.remove(task.id.as_str());
            }
            tracing::info!(wave = waves, tasks = ready.len(), "Launching wave");
            self.events
                .emit(
                    SwarmEvent::new(SwarmEventKind::WaveStarted, "scheduler").with_data(
                        serde_json::json!({
                            "wave": waves,
                            "tasks": ready.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
                        }),
                    ),
                )
                .await;

            let mut running: FuturesUnordered<_> = ready
                .into_iter()
                .map(|task| self.run_task(task, ctx, token))
                .collect();

            while let Some((id, outcome)) = running.next().await {
                let (status, value) = match outcome {
                    Ok(output) => (TaskStatus::Succeeded, output),
                    Err(ConductorError::Cancelled) => return Err(ConductorError::Cancelled),
                    Err(e) => (TaskStatus::Failed, format!("{}{}", ERROR_SENTINEL, e)),
                };

                let kind = match status {
                    TaskStatus::Succeeded => SwarmEventKind::TaskCompleted,
                    TaskStatus::Failed => SwarmEventKind::TaskFailed,
                };
                self.events
                    .emit(
                        SwarmEvent::new(kind, "scheduler")
                            .with_data(serde_json::json!({ "task": id })),
                    )
                    .await;

                tracing::debug!(task = %id, status = ?status, "Task finished");
                results.insert(id.clone(), value);
                statuses.insert(id.clone(), status);
                completion_order.push(id);
            }
        }

        let synthesis = synthesize(plan, &results);
        Ok(PlanReport {
            goal: plan.goal.clone(),
            results,
            statuses,
            completion_order,
            waves,
            synthesis,
        })
    }

    async fn run_task(
        &self,
        task: &SymbolicTask,
        ctx: &ExecutionContext,
        token: &CancellationToken,
    ) -> (String, Result<String>) {
        let task_ctx = ctx.derive(task.instruction.clone(), Some(&task.handler_name));
        let outcome = match self.executor.execute(task_ctx, token).await {
            Ok(result) if result.success => Ok(result.output),
            Ok(result) => Err(ConductorError::Other(anyhow::anyhow!(result.output))),
            Err(e) => Err(e),
        };
        (task.id.clone(), outcome)
    }
}

/// Reject duplicate task ids
fn validate(plan: &SymbolicPlan) -> Result<()> {
    let mut seen = HashSet::new();
    for task in &plan.tasks {
        if !seen.insert(task.id.as_str()) {
            return Err(ConductorError::InvalidPlan(format!(
                "duplicate task id '{}'",
                task.id
            )));
        }
    }
    Ok(())
}

/// Goal followed by each task id and its result, in plan order
fn synthesize(plan: &SymbolicPlan, results: &HashMap<String, String>) -> String {
    let mut report = format!("# {}\n", plan.goal);
    for task in &plan.tasks {
        let result = results.get(&task.id).map(String::as_str).unwrap_or("");
        report.push_str(&format!("\n## {} ({})\n{}\n", task.id, task.handler_name, result));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExecutionResult;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Echoes instructions; instructions containing "fail" fail
    #[derive(Default)]
    struct EchoExecutor {
        started: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TaskExecutor for EchoExecutor {
        async fn execute(
            &self,
            ctx: ExecutionContext,
            _token: &CancellationToken,
        ) -> Result<ExecutionResult> {
            self.started.lock().push(ctx.instruction.clone());
            tokio::time::sleep(Duration::from_millis(5)).await;
            if ctx.instruction.contains("fail") {
                return Err(ConductorError::RetryExhausted {
                    component: "execution_pipeline".into(),
                    attempts: 3,
                    last_error: "boom".into(),
                });
            }
            let mut result = ExecutionResult::failure(
                ctx.preferred_handler.as_deref().unwrap_or("none"),
                format!("did {}", ctx.instruction),
            );
            result.success = true;
            Ok(result)
        }
    }

    fn scheduler() -> (TaskScheduler, Arc<EchoExecutor>) {
        let executor = Arc::new(EchoExecutor::default());
        (TaskScheduler::new(executor.clone()), executor)
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("goal", "/work")
    }

    #[tokio::test]
    async fn test_chain_runs_in_dependency_order() {
        let plan = SymbolicPlan::new("chain")
            .with_task(SymbolicTask::new("t3", "h", "third").depends_on("t2"))
            .with_task(SymbolicTask::new("t1", "h", "first"))
            .with_task(SymbolicTask::new("t2", "h", "second").depends_on("t1"));
        let (scheduler, executor) = scheduler();

        let report = scheduler
            .execute(&plan, &ctx(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.completion_order, vec!["t1", "t2", "t3"]);
        assert_eq!(*executor.started.lock(), vec!["first", "second", "third"]);
        assert_eq!(report.waves, 3);
        for id in ["t1", "t2", "t3"] {
            assert!(report.synthesis.contains(id));
        }
    }

    #[tokio::test]
    async fn test_independent_tasks_share_a_wave() {
        let plan = SymbolicPlan::new("fan-in")
            .with_task(SymbolicTask::new("a", "h", "a"))
            .with_task(SymbolicTask::new("b", "h", "b"))
            .with_task(SymbolicTask::new("c", "h", "c").depends_on("a").depends_on("b"));
        let (scheduler, _) = scheduler();

        let report = scheduler
            .execute(&plan, &ctx(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.waves, 2);
        assert_eq!(report.completion_order.last().map(String::as_str), Some("c"));
    }

    #[tokio::test]
    async fn test_failure_is_recorded_as_sentinel() {
        let plan = SymbolicPlan::new("partial")
            .with_task(SymbolicTask::new("t1", "h", "please fail"))
            .with_task(SymbolicTask::new("t2", "h", "after").depends_on("t1"));
        let (scheduler, _) = scheduler();

        let report = scheduler
            .execute(&plan, &ctx(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.results["t1"].starts_with(ERROR_SENTINEL));
        assert_eq!(report.statuses["t1"], TaskStatus::Failed);
        assert_eq!(report.statuses["t2"], TaskStatus::Succeeded);
        assert_eq!(report.failed_tasks(), vec!["t1"]);
        assert!(report.synthesis.contains("ERROR: "));
    }

    #[tokio::test]
    async fn test_cycle_deadlocks() {
        let plan = SymbolicPlan::new("cycle")
            .with_task(SymbolicTask::new("ok", "h", "fine"))
            .with_task(SymbolicTask::new("a", "h", "a").depends_on("b"))
            .with_task(SymbolicTask::new("b", "h", "b").depends_on("a"));
        let (scheduler, _) = scheduler();

        let err = scheduler
            .execute(&plan, &ctx(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ConductorError::DeadlockDetected { pending } => assert_eq!(pending, vec!["a", "b"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_dependency_deadlocks() {
        let plan = SymbolicPlan::new("dangling")
            .with_task(SymbolicTask::new("a", "h", "a").depends_on("ghost"));
        let (scheduler, _) = scheduler();
        let err = scheduler
            .execute(&plan, &ctx(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::DeadlockDetected { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_ids_are_invalid() {
        let plan = SymbolicPlan::new("dup")
            .with_task(SymbolicTask::new("a", "h", "a"))
            .with_task(SymbolicTask::new("a", "h", "again"));
        let (scheduler, _) = scheduler();
        let err = scheduler
            .execute(&plan, &ctx(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::InvalidPlan(_)));
    }

    #[tokio::test]
    async fn test_empty_plan() {
        let (scheduler, _) = scheduler();
        let report = scheduler
            .execute(&SymbolicPlan::new("nothing"), &ctx(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.waves, 0);
        assert!(report.synthesis.starts_with("# nothing"));
    }
}
