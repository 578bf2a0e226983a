//! # SQLite Learning Store
//!
//! Persistent lessons and task outcomes on the shared `ConductorDb`
//! connection. Relevance is keyword overlap computed over the most recent
//! lessons.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

use super::{rank_insights, LearningStore, LessonEntry, TaskOutcome};
use crate::state::db::ConductorDb;

/// Lessons considered per relevance query
const CANDIDATE_LIMIT: i64 = 500;

pub struct SqliteLearningStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLearningStore {
    /// Create from shared ConductorDb connection
    pub fn new(db: &ConductorDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    /// Most recent lessons first
    pub fn recent_lessons(&self, limit: usize) -> Result<Vec<LessonEntry>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            r#"
            SELECT pattern, context, lesson, handler, created_at
            FROM lessons
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let lessons = stmt
            .query_map(params![limit as i64], |row| {
                let created_at: String = row.get(4)?;
                Ok(LessonEntry {
                    pattern: row.get(0)?,
                    context: row.get(1)?,
                    lesson: row.get(2)?,
                    handler: row.get(3)?,
                    created_at: parse_timestamp(&created_at),
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to load lessons")?;

        Ok(lessons)
    }

    /// Outcomes recorded for `handler`, newest first
    pub fn outcomes_for(&self, handler: &str) -> Result<Vec<TaskOutcome>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            r#"
            SELECT instruction, handler, success, duration_ms, recorded_at
            FROM task_outcomes
            WHERE handler = ?1
            ORDER BY id DESC
            "#,
        )?;

        let outcomes = stmt
            .query_map(params![handler], |row| {
                let recorded_at: String = row.get(4)?;
                Ok(TaskOutcome {
                    instruction: row.get(0)?,
                    handler: row.get(1)?,
                    success: row.get::<_, i64>(2)? != 0,
                    duration_ms: row.get::<_, i64>(3)? as u64,
                    recorded_at: parse_timestamp(&recorded_at),
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to load task outcomes")?;

        Ok(outcomes)
    }

    /// Get count of lessons
    pub fn lesson_count(&self) -> Result<i64> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM lessons", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl LearningStore for SqliteLearningStore {
    fn record_lesson(&self, entry: LessonEntry) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "INSERT INTO lessons (pattern, context, lesson, handler, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.pattern,
                entry.context,
                entry.lesson,
                entry.handler,
                entry.created_at.to_rfc3339()
            ],
        )
        .context("Failed to insert lesson")?;

        tracing::debug!(pattern = %entry.pattern, "Lesson recorded");
        Ok(())
    }

    fn find_relevant_insights(&self, instruction: &str) -> Result<Vec<String>> {
        let lessons = self.recent_lessons(CANDIDATE_LIMIT as usize)?;
        Ok(rank_insights(instruction, &lessons))
    }

    fn record_task_outcome(
        &self,
        instruction: &str,
        handler: &str,
        success: bool,
        duration_ms: u64,
    ) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            r#"
            INSERT INTO task_outcomes (instruction, handler, success, duration_ms, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                instruction,
                handler,
                success as i32,
                duration_ms as i64,
                Utc::now().to_rfc3339()
            ],
        )
        .context("Failed to insert task outcome")?;

        Ok(())
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::RETRY_EXHAUSTED;

    #[test]
    fn test_sqlite_learning_store_round_trip() {
        let db = ConductorDb::open_in_memory().unwrap();
        let store = SqliteLearningStore::new(&db);

        store
            .record_lesson(
                LessonEntry::new(
                    RETRY_EXHAUSTED,
                    "deploy the staging cluster",
                    "Cluster credentials expire hourly",
                )
                .with_handler("deployer"),
            )
            .unwrap();
        store
            .record_lesson(LessonEntry::new(
                "CRITIC",
                "write release notes",
                "Mention breaking changes",
            ))
            .unwrap();

        assert_eq!(store.lesson_count().unwrap(), 2);
        assert_eq!(store.recent_lessons(10).unwrap()[0].pattern, "CRITIC");
        assert_eq!(
            store.recent_lessons(10).unwrap()[1].handler.as_deref(),
            Some("deployer")
        );

        let insights = store
            .find_relevant_insights("Deploy staging again")
            .unwrap();
        assert_eq!(
            insights,
            vec!["[RETRY_EXHAUSTED] Cluster credentials expire hourly"]
        );
    }

    #[test]
    fn test_task_outcomes() {
        let db = ConductorDb::open_in_memory().unwrap();
        let store = SqliteLearningStore::new(&db);

        store.record_task_outcome("a", "writer", true, 10).unwrap();
        store.record_task_outcome("b", "writer", false, 20).unwrap();
        store.record_task_outcome("c", "tester", true, 5).unwrap();

        let outcomes = store.outcomes_for("writer").unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(!outcomes[0].success);
        assert_eq!(outcomes[1].duration_ms, 10);
    }
}
