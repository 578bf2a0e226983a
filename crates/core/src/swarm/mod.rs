//! # Swarm Orchestration
//!
//! Runs instructions, plans and agent batches for Conductor.
//!
//! ## Flow
//!
//! ```text
//! Coordinator ─┬─► TaskScheduler (dependency waves) ─┐
//!              └─► parallel / sequential agents ──────┴─► ExecutionPipeline ─► Handler
//! ```

pub mod coordinator;
pub mod events;
pub mod pipeline;
pub mod scheduler;

pub use coordinator::{
    AgentOutcome, AgentTask, Coordinator, GuardedOutcome, SwarmMode, SwarmReport,
};
pub use events::{EventSink, SwarmEvent, SwarmEventKind};
pub use pipeline::{ExecutionPipeline, PipelineStage, TaskExecutor};
pub use scheduler::{PlanReport, TaskScheduler, TaskStatus, ERROR_SENTINEL};
