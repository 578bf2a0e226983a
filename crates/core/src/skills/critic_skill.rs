//! # Critic
//!
//! Scores handler output 0-100. Output below the passing score sends the
//! pipeline into its self-correction loop with the critique as feedback.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Minimum score an output needs to pass
pub const PASSING_SCORE: u8 = 80;

/// Verdict on one handler output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Critique {
    pub passed: bool,
    /// 0-100
    pub score: u8,
    pub feedback: String,
    pub improvements: Vec<String>,
}

#[async_trait]
pub trait CriticEvaluator: Send + Sync {
    async fn evaluate(&self, instruction: &str, output: &str, handler_name: &str) -> Critique;
}

/// Concern found in an output and what it costs
struct Concern {
    penalty: u8,
    description: &'static str,
    improvement: &'static str,
}

const ERROR_MARKERS: &[&str] = &[
    "error:",
    "traceback (most recent call last)",
    "panicked at",
    "unhandled exception",
    "command not found",
];

const PLACEHOLDER_MARKERS: &[&str] = &["todo", "not implemented", "placeholder", "lorem ipsum"];

const MIN_USEFUL_CHARS: usize = 20;

/// Rule-based critic used when no model-backed reviewer is configured
#[derive(Debug, Clone)]
pub struct HeuristicCritic {
    threshold: u8,
}

impl Default for HeuristicCritic {
    fn default() -> Self {
        Self::new(PASSING_SCORE)
    }
}

impl HeuristicCritic {
    pub fn new(threshold: u8) -> Self {
        Self { threshold }
    }

    fn concerns(instruction: &str, output: &str) -> Vec<Concern> {
        let trimmed = output.trim();
        let lowered = trimmed.to_lowercase();
        let mut concerns = Vec::new();

        if trimmed.is_empty() {
            concerns.push(Concern {
                penalty: 100,
                description: "output is empty",
                improvement: "Produce a concrete result for the instruction",
            });
            return concerns;
        }

        if ERROR_MARKERS.iter().any(|m| lowered.contains(m)) {
            concerns.push(Concern {
                penalty: 40,
                description: "output reports an error",
                improvement: "Fix the reported error before returning",
            });
        }
        if PLACEHOLDER_MARKERS.iter().any(|m| lowered.contains(m)) {
            concerns.push(Concern {
                penalty: 30,
                description: "output contains placeholders",
                improvement: "Replace placeholders with a complete implementation",
            });
        }
        if trimmed.chars().count() < MIN_USEFUL_CHARS {
            concerns.push(Concern {
                penalty: 25,
                description: "output is suspiciously short",
                improvement: "Explain what was done and where",
            });
        }
        if trimmed.eq_ignore_ascii_case(instruction.trim()) {
            concerns.push(Concern {
                penalty: 50,
                description: "output only repeats the instruction",
                improvement: "Carry out the instruction instead of restating it",
            });
        }
        concerns
    }
}

#[async_trait]
impl CriticEvaluator for HeuristicCritic {
    async fn evaluate(&self, instruction: &str, output: &str, handler_name: &str) -> Critique {
        let concerns = Self::concerns(instruction, output);
        let penalty: u32 = concerns.iter().map(|c| c.penalty as u32).sum();
        let score = 100u32.saturating_sub(penalty) as u8;
        let passed = score >= self.threshold;

        let feedback = if concerns.is_empty() {
            format!("Output from '{}' looks complete", handler_name)
        } else {
            let list: Vec<&str> = concerns.iter().map(|c| c.description).collect();
            format!("Output from '{}' needs work: {}", handler_name, list.join(", "))
        };

        tracing::debug!(handler = %handler_name, score, passed, "Critic evaluated output");
        Critique {
            passed,
            score,
            feedback,
            improvements: concerns.iter().map(|c| c.improvement.to_string()).collect(),
        }
    }
}
