//! Conductor CLI
//!
//! Runs instructions, plans and swarms through the control plane and
//! exposes the risk, checkpoint and cache maintenance operations.

mod engine;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use conductor_core::cache::CacheNamespace;
use conductor_core::models::{ExecutionContext, SymbolicPlan};
use conductor_core::swarm::{AgentTask, GuardedOutcome, SwarmMode};
use conductor_core::ConductorError;
use engine::Engine;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Conductor - guarded execution for handler swarms")]
struct Args {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,
    /// Working directory handlers run in
    #[arg(short = 'C', long, global = true)]
    workdir: Option<PathBuf>,
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run one instruction through the execution pipeline
    Run {
        instruction: String,
        /// Route to this handler instead of the best match
        #[arg(long)]
        handler: Option<String>,
        /// Files the instruction touches; backed up when risk requires it
        #[arg(long = "target", short = 't')]
        targets: Vec<String>,
    },
    /// Execute a plan file (goal plus tasks with dependencies)
    Plan { file: PathBuf },
    /// Run a list of {handler, instruction} tasks as a swarm
    Swarm {
        file: PathBuf,
        /// Run one after another with shared context
        #[arg(long)]
        sequential: bool,
    },
    /// Score an instruction without running it
    Risk {
        instruction: String,
        #[arg(long = "target", short = 't')]
        targets: Vec<String>,
        /// Errors seen so far in the session
        #[arg(long, default_value = "0")]
        errors: u32,
    },
    /// List checkpoints
    Checkpoints,
    /// Restore files from a checkpoint
    Rollback { id: String },
    /// Inspect or maintain the result cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    Stats,
    /// Drop expired entries
    Cleanup,
    /// Drop entries whose key starts with a prefix, or a whole namespace
    Invalidate {
        #[arg(required_unless_present = "namespace", conflicts_with = "namespace")]
        prefix: Option<String>,
        #[arg(long, value_parser = parse_namespace)]
        namespace: Option<CacheNamespace>,
    },
}

fn parse_namespace(value: &str) -> Result<CacheNamespace, String> {
    CacheNamespace::parse(value).ok_or_else(|| {
        let known: Vec<&str> = CacheNamespace::ALL.iter().map(|ns| ns.as_str()).collect();
        format!("unknown namespace '{}', expected one of: {}", value, known.join(", "))
    })
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("conductor=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_tracing(args.json);

    let workdir = match args.workdir {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to resolve working directory")?,
    };

    let engine = Engine::build(&workdir)?;
    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling");
                token.cancel();
            }
        });
    }

    let outcome = dispatch(&engine, args.command, &token).await;
    engine.shutdown().await;

    match outcome {
        Ok(true) => Ok(ExitCode::SUCCESS),
        Ok(false) => Ok(ExitCode::FAILURE),
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            Err(e)
        }
    }
}

/// Returns whether the command succeeded
async fn dispatch(engine: &Engine, command: CliCommand, token: &CancellationToken) -> Result<bool> {
    match command {
        CliCommand::Run {
            instruction,
            handler,
            targets,
        } => {
            let mut ctx = ExecutionContext::new(instruction, &engine.workdir).with_target_paths(targets);
            if let Some(handler) = handler {
                ctx = ctx.with_preferred_handler(handler);
            }
            match engine.pipeline.execute(ctx, token).await {
                Ok(result) => {
                    print_json(&result)?;
                    Ok(result.success)
                }
                Err(e @ ConductorError::RetryExhausted { .. }) => {
                    print_json(&serde_json::json!({ "success": false, "error": e.to_string() }))?;
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            }
        }
        CliCommand::Plan { file } => {
            let plan: SymbolicPlan = read_json(&file)?;
            let ctx = ExecutionContext::new(plan.goal.clone(), &engine.workdir);
            let outcome = engine.coordinator.plan_and_execute(&plan, &ctx, token).await?;
            let succeeded = match &outcome {
                GuardedOutcome::Completed(report) => report.failed_tasks().is_empty(),
                _ => false,
            };
            print_json(&outcome)?;
            Ok(succeeded)
        }
        CliCommand::Swarm { file, sequential } => {
            let tasks: Vec<AgentTask> = read_json(&file)?;
            let mode = if sequential {
                SwarmMode::Sequential
            } else {
                SwarmMode::Parallel
            };
            let ctx = ExecutionContext::new("swarm", &engine.workdir);
            let report = engine.coordinator.execute_swarm(tasks, mode, &ctx, token).await?;
            print_json(&report)?;
            Ok(report.results.values().all(|o| o.success))
        }
        CliCommand::Risk {
            instruction,
            targets,
            errors,
        } => {
            let profile = engine.risk.analyze(&instruction, &targets, errors);
            print_json(&profile)?;
            Ok(!profile.is_blocked())
        }
        CliCommand::Checkpoints => {
            print_json(&engine.checkpoints.list())?;
            Ok(true)
        }
        CliCommand::Rollback { id } => {
            let result = engine.checkpoints.rollback(&id, &engine.workdir).await;
            print_json(&result)?;
            Ok(result.success)
        }
        CliCommand::Cache { action } => {
            let report: Value = match action {
                CacheAction::Stats => serde_json::to_value(engine.cache.stats())?,
                CacheAction::Cleanup => serde_json::json!({ "removed": engine.cache.cleanup() }),
                CacheAction::Invalidate { prefix, namespace } => {
                    let removed = match (namespace, prefix) {
                        (Some(namespace), _) => engine.cache.invalidate_namespace(namespace),
                        (None, Some(prefix)) => engine.cache.invalidate(&prefix),
                        (None, None) => 0,
                    };
                    serde_json::json!({ "removed": removed })
                }
            };
            print_json(&report)?;
            Ok(true)
        }
    }
}


fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
