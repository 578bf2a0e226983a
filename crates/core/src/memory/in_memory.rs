//! Process-local learning store.

use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;

use super::{rank_insights, LearningStore, LessonEntry, TaskOutcome};

#[derive(Debug, Default)]
pub struct InMemoryLearningStore {
    lessons: Mutex<Vec<LessonEntry>>,
    outcomes: Mutex<Vec<TaskOutcome>>,
}

impl InMemoryLearningStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lessons(&self) -> Vec<LessonEntry> {
        self.lessons.lock().clone()
    }

    pub fn outcomes(&self) -> Vec<TaskOutcome> {
        self.outcomes.lock().clone()
    }
}

impl LearningStore for InMemoryLearningStore {
    fn record_lesson(&self, entry: LessonEntry) -> Result<()> {
        self.lessons.lock().push(entry);
        Ok(())
    }

    fn find_relevant_insights(&self, instruction: &str) -> Result<Vec<String>> {
        Ok(rank_insights(instruction, self.lessons.lock().iter()))
    }

    fn record_task_outcome(
        &self,
        instruction: &str,
        handler: &str,
        success: bool,
        duration_ms: u64,
    ) -> Result<()> {
        self.outcomes.lock().push(TaskOutcome {
            instruction: instruction.to_string(),
            handler: handler.to_string(),
            success,
            duration_ms,
            recorded_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::RETRY_EXHAUSTED;

    #[test]
    fn test_lessons_come_back_for_similar_instructions() {
        let store = InMemoryLearningStore::new();
        store
            .record_lesson(LessonEntry::new(
                RETRY_EXHAUSTED,
                "migrate the billing schema",
                "Migration needs a maintenance window",
            ))
            .unwrap();

        let insights = store
            .find_relevant_insights("Migrate billing tables")
            .unwrap();
        assert_eq!(
            insights,
            vec!["[RETRY_EXHAUSTED] Migration needs a maintenance window"]
        );
        assert!(store.find_relevant_insights("write poems").unwrap().is_empty());
    }

    #[test]
    fn test_outcomes_are_recorded() {
        let store = InMemoryLearningStore::new();
        store.record_task_outcome("x", "writer", true, 12).unwrap();
        let outcomes = store.outcomes();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].success);
        assert_eq!(outcomes[0].handler, "writer");
    }
}
