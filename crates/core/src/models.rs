//! # Conductor Models
//!
//! Shared data types that flow between the risk assessor, the execution
//! pipeline, the task scheduler and the swarm coordinator.
//!
//! ## Example
//! ```rust,ignore
//! use conductor_core::models::{ExecutionContext, SymbolicPlan, SymbolicTask};
//!
//! let ctx = ExecutionContext::new("Add a README section", "/work/repo");
//! let plan = SymbolicPlan::new("Document the API")
//!     .with_task(SymbolicTask::new("t1", "writer", "Draft the overview"))
//!     .with_task(SymbolicTask::new("t2", "reviewer", "Review it").depends_on("t1"));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// Risk level of an instruction
///
/// Ordered `Safe < Low < Medium < High < Critical`; `Blocked` is terminal and
/// never produced by threshold mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Safe,
    Low,
    Medium,
    High,
    Critical,
    Blocked,
}

impl RiskLevel {
    /// Map a clamped score to a level using the fixed thresholds
    pub fn from_score(score: u8) -> Self {
        match score {
            90..=u8::MAX => Self::Critical,
            70..=89 => Self::High,
            50..=69 => Self::Medium,
            25..=49 => Self::Low,
            _ => Self::Safe,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "SAFE",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
            Self::Blocked => "BLOCKED",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable result of scoring one instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskProfile {
    pub level: RiskLevel,
    /// 0-100
    pub score: u8,
    pub requires_confirmation: bool,
    pub requires_backup: bool,
    pub mitigations: Vec<String>,
    pub estimated_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
}

impl RiskProfile {
    pub fn is_blocked(&self) -> bool {
        self.level == RiskLevel::Blocked
    }
}

/// A recoverable snapshot taken before a risky mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Paths relative to the checkpointed root that were actually copied
    pub files_backed_up: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcs_stash_ref: Option<String>,
    /// Set once the checkpoint has been restored; a checkpoint restores once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back_at: Option<DateTime<Utc>>,
}

/// Outcome of restoring a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackResult {
    pub success: bool,
    pub checkpoint_id: String,
    pub restored_files: Vec<String>,
    pub message: String,
}

/// Mutable request envelope threaded through one pipeline invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    /// Rewritten in place by protocol injection, truncation and retry feedback
    pub instruction: String,
    pub working_directory: PathBuf,
    #[serde(default)]
    pub target_paths: Vec<String>,
    /// Route to this handler when it is registered
    #[serde(default)]
    pub preferred_handler: Option<String>,
}

impl ExecutionContext {
    pub fn new(instruction: impl Into<String>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            instruction: instruction.into(),
            working_directory: working_directory.into(),
            target_paths: Vec::new(),
            preferred_handler: None,
        }
    }

    pub fn with_target_paths(mut self, paths: Vec<String>) -> Self {
        self.target_paths = paths;
        self
    }

    pub fn with_preferred_handler(mut self, handler: impl Into<String>) -> Self {
        self.preferred_handler = Some(handler.into());
        self
    }

    /// Derive a context for a sub-instruction sharing this one's workspace
    pub fn derive(&self, instruction: impl Into<String>, handler: Option<&str>) -> Self {
        Self {
            instruction: instruction.into(),
            working_directory: self.working_directory.clone(),
            target_paths: self.target_paths.clone(),
            preferred_handler: handler.map(str::to_string),
        }
    }
}

/// Result of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub handler_used: String,
    pub output: String,
    pub tokens_used: u64,
    pub cached: bool,
    pub risk_profile: Option<RiskProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_steps: Option<Vec<String>>,
}

impl ExecutionResult {
    /// A failed result carrying a human-readable reason
    pub fn failure(handler_used: &str, output: impl Into<String>) -> Self {
        Self {
            success: false,
            handler_used: handler_used.to_string(),
            output: output.into(),
            tokens_used: 0,
            cached: false,
            risk_profile: None,
            checkpoint_id: None,
            duration_ms: 0,
            next_steps: None,
        }
    }

    pub fn with_risk(mut self, profile: RiskProfile) -> Self {
        self.risk_profile = Some(profile);
        self
    }

    /// Copy of this result as served from the cache
    pub fn as_cached(&self) -> Self {
        Self {
            cached: true,
            duration_ms: 0,
            ..self.clone()
        }
    }
}

/// One node of a symbolic plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolicTask {
    pub id: String,
    pub handler_name: String,
    pub instruction: String,
    #[serde(default)]
    pub dependency_ids: BTreeSet<String>,
}

impl SymbolicTask {
    pub fn new(id: &str, handler_name: &str, instruction: &str) -> Self {
        Self {
            id: id.to_string(),
            handler_name: handler_name.to_string(),
            instruction: instruction.to_string(),
            dependency_ids: BTreeSet::new(),
        }
    }

    pub fn depends_on(mut self, id: &str) -> Self {
        self.dependency_ids.insert(id.to_string());
        self
    }
}

/// A goal plus a DAG of sub-instructions; immutable once built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolicPlan {
    pub goal: String,
    pub tasks: Vec<SymbolicTask>,
}

impl SymbolicPlan {
    pub fn new(goal: &str) -> Self {
        Self {
            goal: goal.to_string(),
            tasks: Vec::new(),
        }
    }

    pub fn with_task(mut self, task: SymbolicTask) -> Self {
        self.tasks.push(task);
        self
    }
}
