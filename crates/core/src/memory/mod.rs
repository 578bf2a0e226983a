//! # Learning Store
//!
//! Lessons recorded after failures and outcomes of every finished task.
//! The execution pipeline reads lessons back as warnings for similar
//! instructions.
//!
//! ```text
//! ExecutionPipeline ──► LearningStore
//!                         ├── InMemoryLearningStore (tests, ephemeral runs)
//!                         └── SqliteLearningStore   (.conductor/conductor.db)
//! ```

pub mod in_memory;
pub mod sqlite_memory;

pub use in_memory::InMemoryLearningStore;
pub use sqlite_memory::SqliteLearningStore;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Pattern recorded when the pipeline runs out of attempts
pub const RETRY_EXHAUSTED: &str = "RETRY_EXHAUSTED";

/// Maximum insights returned for one instruction
pub const MAX_INSIGHTS: usize = 5;

/// A lesson learned from a failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonEntry {
    pub pattern: String,
    /// The instruction or situation the lesson came from
    pub context: String,
    pub lesson: String,
    #[serde(default)]
    pub handler: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LessonEntry {
    pub fn new(pattern: &str, context: &str, lesson: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            context: context.to_string(),
            lesson: lesson.to_string(),
            handler: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_handler(mut self, handler: &str) -> Self {
        self.handler = Some(handler.to_string());
        self
    }

    /// How the lesson is shown to a later run
    pub fn as_insight(&self) -> String {
        format!("[{}] {}", self.pattern, self.lesson)
    }
}

/// Outcome of one finished task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    pub instruction: String,
    pub handler: String,
    pub success: bool,
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

pub trait LearningStore: Send + Sync {
    fn record_lesson(&self, entry: LessonEntry) -> Result<()>;

    /// Lessons relevant to `instruction`, most relevant first
    fn find_relevant_insights(&self, instruction: &str) -> Result<Vec<String>>;

    fn record_task_outcome(
        &self,
        instruction: &str,
        handler: &str,
        success: bool,
        duration_ms: u64,
    ) -> Result<()>;
}

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "into", "then", "than", "your", "have",
    "will", "should", "please", "make", "some",
];

/// Lowercased words of at least four chars, minus stop words
pub(crate) fn keywords(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 3 && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Rank lessons by keyword overlap with `instruction`
pub(crate) fn rank_insights<'a>(
    instruction: &str,
    lessons: impl IntoIterator<Item = &'a LessonEntry>,
) -> Vec<String> {
    let wanted = keywords(instruction);
    if wanted.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(usize, &LessonEntry)> = lessons
        .into_iter()
        .filter_map(|lesson| {
            let text = format!("{} {} {}", lesson.pattern, lesson.context, lesson.lesson);
            let overlap = keywords(&text).intersection(&wanted).count();
            (overlap > 0).then_some((overlap, lesson))
        })
        .collect();

    // Most overlap first, newest first among equals
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.created_at.cmp(&a.1.created_at)));

    let mut seen = HashSet::new();
    scored
        .into_iter()
        .map(|(_, lesson)| lesson.as_insight())
        .filter(|insight| seen.insert(insight.clone()))
        .take(MAX_INSIGHTS)
        .collect()
}
