//! # Swarm Coordinator
//!
//! Runs batches of `(handler, instruction)` tasks through the execution
//! pipeline and guards whole runs with a circuit breaker.
//!
//! ## Modes
//!
//! - **Parallel**: every task at once; failures stay per-entry and the swarm
//!   status is always `completed`. A handler that panics is reported as a
//!   failed entry.
//! - **Sequential**: one at a time, each successful output appended to a
//!   shared context handed to the next task. An output containing a
//!   completion marker ends the run early.
//!
//! ## Circuit breaker
//!
//! [`Coordinator::guarded`] wraps a run. A failure under the recovery limit
//! dispatches one diagnostic task to the debug handler; at the limit the
//! coordinator asks for manual intervention instead. A success resets the
//! counter.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::events::{EventSink, SwarmEvent, SwarmEventKind};
use super::pipeline::TaskExecutor;
use super::scheduler::{PlanReport, TaskScheduler};
use crate::config::CoordinatorConfig;
use crate::error::{ConductorError, Result};
use crate::models::{ExecutionContext, ExecutionResult, SymbolicPlan};

/// One unit of swarm work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTask {
    pub handler: String,
    pub instruction: String,
}

impl AgentTask {
    pub fn new(handler: &str, instruction: &str) -> Self {
        Self {
            handler: handler.to_string(),
            instruction: instruction.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmMode {
    Parallel,
    Sequential,
}

/// Result of one agent task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOutcome {
    pub handler: String,
    pub success: bool,
    pub output: String,
    pub duration_ms: u64,
}

impl AgentOutcome {
    fn from_run(handler: &str, run: Result<ExecutionResult>, started: Instant) -> Self {
        let duration_ms = started.elapsed().as_millis() as u64;
        match run {
            Ok(result) => Self {
                handler: handler.to_string(),
                success: result.success,
                output: result.output,
                duration_ms,
            },
            Err(e) => Self {
                handler: handler.to_string(),
                success: false,
                output: e.to_string(),
                duration_ms,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmReport {
    pub mode: SwarmMode,
    /// Always "completed"; failures are visible per entry
    pub status: String,
    /// Keyed by handler name; repeated handlers get `#2`, `#3` suffixes
    pub results: HashMap<String, AgentOutcome>,
    /// Result keys in the order tasks finished
    pub order: Vec<String>,
    /// Set when a completion marker ended a sequential run
    pub short_pathway: bool,
    /// Handlers never started because of the short pathway
    pub skipped: Vec<String>,
}

impl SwarmReport {
    fn new(mode: SwarmMode) -> Self {
        Self {
            mode,
            status: "completed".to_string(),
            results: HashMap::new(),
            order: Vec::new(),
            short_pathway: false,
            skipped: Vec::new(),
        }
    }

    fn insert(&mut self, outcome: AgentOutcome) -> String {
        let mut key = outcome.handler.clone();
        let mut n = 1;
        while self.results.contains_key(&key) {
            n += 1;
            key = format!("{}#{}", outcome.handler, n);
        }
        self.results.insert(key.clone(), outcome);
        self.order.push(key.clone());
        key
    }
}

/// What a guarded run ended with
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GuardedOutcome<T> {
    Completed(T),
    /// The run failed and a diagnostic task was dispatched
    Recovering {
        error: String,
        attempt: u32,
        diagnosis: Option<String>,
    },
    ManualInterventionRequired { error: String, attempts: u32 },
}

impl<T> GuardedOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

pub struct Coordinator {
    config: CoordinatorConfig,
    executor: Arc<dyn TaskExecutor>,
    recovery_attempts: AtomicU32,
    events: EventSink,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            config,
            executor,
            recovery_attempts: AtomicU32::new(0),
            events: EventSink::disabled(),
        }
    }

    /// Set event channel for streaming events
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn recovery_attempts(&self) -> u32 {
        self.recovery_attempts.load(Ordering::SeqCst)
    }

    pub async fn execute_swarm(
        &self,
        tasks: Vec<AgentTask>,
        mode: SwarmMode,
        ctx: &ExecutionContext,
        token: &CancellationToken,
    ) -> Result<SwarmReport> {
        match mode {
            SwarmMode::Parallel => self.run_parallel(tasks, ctx, token).await,
            SwarmMode::Sequential => self.run_sequential(tasks, ctx, token).await,
        }
    }

    /// Fan out every task at once
    #[tracing::instrument(skip_all, fields(tasks = tasks.len()))]
    pub async fn run_parallel(
        &self,
        tasks: Vec<AgentTask>,
        ctx: &ExecutionContext,
        token: &CancellationToken,
    ) -> Result<SwarmReport> {
        let mut join_set = JoinSet::new();

        // SCATTER
        for task in tasks {
            let executor = Arc::clone(&self.executor);
            let token = token.clone();
            let task_ctx = ctx.derive(task.instruction.clone(), Some(&task.handler));
            self.emit(SwarmEventKind::AgentStarted, &task.handler).await;

            join_set.spawn(async move {
                run_agent(executor.as_ref(), &task.handler, task_ctx, &token).await
            });
        }

        // GATHER
        let mut report = SwarmReport::new(SwarmMode::Parallel);
        while let Some(joined) = join_set.join_next().await {
            let outcome = match joined {
                Ok((true, _)) => {
                    join_set.abort_all();
                    return Err(ConductorError::Cancelled);
                }
                Ok((false, outcome)) => outcome,
                Err(e) => {
                    tracing::error!(error = %e, "Swarm task did not finish");
                    continue;
                }
            };
            self.emit_outcome(&outcome).await;
            report.insert(outcome);
        }

        let failed = report.results.values().filter(|o| !o.success).count();
        tracing::info!(total = report.results.len(), failed, "Parallel swarm completed");
        Ok(report)
    }

    /// Run tasks in order, handing each success to the next task
    #[tracing::instrument(skip_all, fields(tasks = tasks.len()))]
    pub async fn run_sequential(
        &self,
        tasks: Vec<AgentTask>,
        ctx: &ExecutionContext,
        token: &CancellationToken,
    ) -> Result<SwarmReport> {
        let mut report = SwarmReport::new(SwarmMode::Sequential);
        let mut shared_context = String::new();
        let mut remaining = tasks.into_iter();

        while let Some(task) = remaining.next() {
            if token.is_cancelled() {
                return Err(ConductorError::Cancelled);
            }

            let instruction = if shared_context.is_empty() {
                task.instruction.clone()
            } else {
                format!(
                    "{}\n\nContext from previous agents:\n{}",
                    task.instruction, shared_context
                )
            };

            self.emit(SwarmEventKind::AgentStarted, &task.handler).await;
            let (cancelled, outcome) = run_agent(
                self.executor.as_ref(),
                &task.handler,
                ctx.derive(instruction, Some(&task.handler)),
                token,
            )
            .await;
            if cancelled {
                return Err(ConductorError::Cancelled);
            }

            self.emit_outcome(&outcome).await;

            let finished = outcome.success && self.has_completion_marker(&outcome.output);
            if outcome.success {
                shared_context.push_str(&format!("[{}]: {}\n", task.handler, outcome.output));
            }
            report.insert(outcome);

            if finished {
                report.short_pathway = true;
                report.skipped = remaining.map(|t| t.handler).collect();
                tracing::info!(handler = %task.handler, skipped = report.skipped.len(), "Completion marker seen, ending swarm early");
                self.emit(SwarmEventKind::ShortPathway, &task.handler).await;
                break;
            }
        }

        Ok(report)
    }

    /// Run `plan` through the scheduler under the circuit breaker
    pub async fn plan_and_execute(
        &self,
        plan: &SymbolicPlan,
        ctx: &ExecutionContext,
        token: &CancellationToken,
    ) -> Result<GuardedOutcome<PlanReport>> {
        let scheduler =
            TaskScheduler::new(Arc::clone(&self.executor)).with_events(self.events.clone());
        self.guarded(&plan.goal, ctx, token, || scheduler.execute(plan, ctx, token))
            .await
    }

    /// Run `op` under the circuit breaker
    ///
    /// Only cancellation propagates; every other error becomes a
    /// `Recovering` or `ManualInterventionRequired` outcome.
    #[tracing::instrument(skip(self, ctx, token, op))]
    pub async fn guarded<T, F, Fut>(
        &self,
        label: &str,
        ctx: &ExecutionContext,
        token: &CancellationToken,
        op: F,
    ) -> Result<GuardedOutcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let error = match op().await {
            Ok(value) => {
                self.recovery_attempts.store(0, Ordering::SeqCst);
                return Ok(GuardedOutcome::Completed(value));
            }
            Err(ConductorError::Cancelled) => return Err(ConductorError::Cancelled),
            Err(e) => e.to_string(),
        };

        let limit = self.config.max_recovery_attempts;
        let claimed = self
            .recovery_attempts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < limit).then_some(n + 1)
            });

        let attempt = match claimed {
            Ok(previous) => previous + 1,
            Err(attempts) => {
                tracing::error!(attempts, error = %error, "Recovery limit reached, manual intervention required");
                self.emit(SwarmEventKind::ManualInterventionRequired, label)
                    .await;
                return Ok(GuardedOutcome::ManualInterventionRequired { error, attempts });
            }
        };

        tracing::warn!(attempt, limit, error = %error, "Run failed, dispatching diagnostic task");
        self.emit(SwarmEventKind::RecoveryDispatched, &self.config.debug_handler)
            .await;

        let diagnostic = ctx.derive(
            format!(
                "Diagnose and fix the failure of '{}'.\n\nError:\n{}",
                label, error
            ),
            Some(&self.config.debug_handler),
        );
        let diagnosis = match self.executor.execute(diagnostic, token).await {
            Ok(result) => Some(result.output),
            Err(ConductorError::Cancelled) => return Err(ConductorError::Cancelled),
            Err(e) => {
                tracing::warn!(error = %e, "Diagnostic task failed");
                None
            }
        };

        Ok(GuardedOutcome::Recovering {
            error,
            attempt,
            diagnosis,
        })
    }

    fn has_completion_marker(&self, output: &str) -> bool {
        let lowered = output.to_lowercase();
        self.config
            .completion_markers
            .iter()
            .any(|m| lowered.contains(&m.to_lowercase()))
    }

    async fn emit_outcome(&self, outcome: &AgentOutcome) {
        let kind = if outcome.success {
            SwarmEventKind::AgentCompleted
        } else {
            SwarmEventKind::AgentFailed
        };
        self.events
            .emit(
                SwarmEvent::new(kind, &outcome.handler)
                    .with_data(serde_json::json!({ "duration_ms": outcome.duration_ms })),
            )
            .await;
    }

    async fn emit(&self, kind: SwarmEventKind, agent: &str) {
        self.events.emit(SwarmEvent::new(kind, agent)).await;
    }
}

/// Run one task; a panicking executor becomes a failed outcome
async fn run_agent(
    executor: &dyn TaskExecutor,
    handler: &str,
    ctx: ExecutionContext,
    token: &CancellationToken,
) -> (bool, AgentOutcome) {
    let started = Instant::now();
    match AssertUnwindSafe(executor.execute(ctx, token)).catch_unwind().await {
        Ok(run) => {
            let cancelled = matches!(run, Err(ConductorError::Cancelled));
            (cancelled, AgentOutcome::from_run(handler, run, started))
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(handler, panic = %message, "Handler panicked");
            let outcome = AgentOutcome {
                handler: handler.to_string(),
                success: false,
                output: format!("handler panicked: {}", message),
                duration_ms: started.elapsed().as_millis() as u64,
            };
            (false, outcome)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
