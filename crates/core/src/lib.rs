//! # Conductor Core
//!
//! The control plane between a caller and a pool of handlers. Every
//! instruction is risk-scored, guarded, checkpointed, cached and critiqued;
//! plans run as dependency waves; agent swarms run in parallel or in a
//! shared-context sequence behind a circuit breaker.
//!
//! ## Architecture
//!
//! - `risk/` - Pattern-based risk scoring and file checkpoints
//! - `cache/` - Namespaced TTL cache with usage-weighted eviction
//! - `skills/` - Handler registry, guardrails, critic and protocol text
//! - `memory/` - Lessons and task outcomes (in-memory or SQLite)
//! - `swarm/` - Execution pipeline, task scheduler and coordinator
//! - `state/` - Runtime directory, JSON files and the SQLite connection
//! - `tools/` - Subprocess runner and git stash snapshots
//!
//! ## Usage
//!
//! ```rust,ignore
//! use conductor_core::models::ExecutionContext;
//! use conductor_core::swarm::{ExecutionPipeline, TaskExecutor};
//!
//! let pipeline = ExecutionPipeline::new(registry, learning);
//! let ctx = ExecutionContext::new("Add a changelog entry", ".");
//! let result = pipeline.execute(ctx, &CancellationToken::new()).await?;
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod memory;
pub mod models;
pub mod risk;
pub mod skills;
pub mod state;
pub mod swarm;
pub mod tools;

pub use config::EngineConfig;
pub use error::{ConductorError, Result};
