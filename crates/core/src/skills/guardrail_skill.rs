//! # Guardrails
//!
//! Pattern-based policy checks run by the execution pipeline:
//!
//! - **Reasoning**: before anything else, reject empty instructions and
//!   prompt-injection attempts. Terminal for the whole pipeline run.
//! - **Action**: after a handler is resolved, reject output targets that
//!   leave the working directory or point into system directories.
//!   Retryable.
//!
//! Destructive shell commands are left to the risk assessor.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Outcome of a guardrail check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailVerdict {
    pub passed: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
}

impl GuardrailVerdict {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            blocked_reason: None,
        }
    }

    pub fn block(message: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            blocked_reason: Some(reason.into()),
        }
    }
}

/// An action about to be taken by a resolved handler
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub handler: String,
    pub instruction: String,
    pub working_directory: PathBuf,
    pub output_target: Option<String>,
}

pub trait GuardrailChecker: Send + Sync {
    fn validate_reasoning(&self, instruction: &str) -> GuardrailVerdict;

    fn validate_action(&self, request: &ActionRequest) -> GuardrailVerdict;
}

const INJECTION_PATTERNS: &[&str] = &[
    r"(?i)\bignore\s+(all\s+)?(the\s+)?(previous|prior|above)\s+(instructions|rules)\b",
    r"(?i)\bdisregard\s+(all\s+|your\s+|the\s+)*(rules|guardrails|instructions|system\s+prompt)\b",
    r"(?i)\b(bypass|disable|turn\s+off)\s+(the\s+)?(guardrails|safety\s+checks?|policy)\b",
    r"(?i)\byou\s+are\s+no\s+longer\s+bound\b",
    r"(?i)\breveal\s+(your\s+|the\s+)?system\s+prompt\b",
];

#[cfg(windows)]
const SYSTEM_DIRS: &[&str] = &["C:\\Windows", "C:\\Program Files"];
#[cfg(not(windows))]
const SYSTEM_DIRS: &[&str] = &["/etc", "/usr", "/bin", "/sbin", "/boot", "/sys", "/proc", "/dev"];

/// Default regex-driven guardrails
pub struct PatternGuardrails {
    injection: Vec<Regex>,
}

impl Default for PatternGuardrails {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternGuardrails {
    pub fn new() -> Self {
        Self {
            injection: INJECTION_PATTERNS
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
        }
    }
}

impl GuardrailChecker for PatternGuardrails {
    fn validate_reasoning(&self, instruction: &str) -> GuardrailVerdict {
        if instruction.trim().is_empty() {
            return GuardrailVerdict::block("Reasoning rejected", "instruction is empty");
        }

        if let Some(re) = self.injection.iter().find(|re| re.is_match(instruction)) {
            tracing::warn!(pattern = %re.as_str(), "Prompt injection attempt detected");
            return GuardrailVerdict::block(
                "Reasoning rejected",
                "instruction attempts to override engine rules",
            );
        }

        GuardrailVerdict::pass("Reasoning accepted")
    }

    fn validate_action(&self, request: &ActionRequest) -> GuardrailVerdict {
        let Some(target) = request.output_target.as_deref() else {
            return GuardrailVerdict::pass("No output target");
        };

        let target_path = Path::new(target);
        let resolved = if target_path.is_absolute() {
            normalize(target_path)
        } else {
            normalize(&request.working_directory.join(target_path))
        };

        if SYSTEM_DIRS.iter().any(|dir| resolved.starts_with(dir)) {
            return GuardrailVerdict::block(
                format!("Action by '{}' rejected", request.handler),
                format!("output target {} is a system directory", resolved.display()),
            );
        }

        let workspace = normalize(&request.working_directory);
        if !resolved.starts_with(&workspace) {
            return GuardrailVerdict::block(
                format!("Action by '{}' rejected", request.handler),
                format!(
                    "output target {} is outside the working directory",
                    resolved.display()
                ),
            );
        }

        GuardrailVerdict::pass("Action accepted")
    }
}

/// Lexical normalization without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}
