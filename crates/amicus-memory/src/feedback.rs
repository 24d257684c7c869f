//! Standalone store for quality-gate rejections (`database.feedback_path`,
//! §3.1). Kept separate from the main memory database — like
//! `amicus_scheduler::SchedulerHandle`, it owns its own connection so the
//! `self-improve` CLI command can read it without contending with the
//! turn engine's memory lock.

use std::sync::Mutex;

use rusqlite::Connection;

use crate::error::Result;

/// One recorded quality-gate rejection (§4.F rejection reasons: slop score,
/// sentence cap, empty-after-enforcement, judge fail, anti-pattern hit).
#[derive(Debug, Clone)]
pub struct Rejection {
    pub reason: String,
    pub chat_id: String,
    pub created_at_ms: i64,
}

/// A rejection reason seen `count` times, the shape `self-improve` promotes
/// into a [`crate::types::Lesson`] once it crosses a repetition threshold.
#[derive(Debug, Clone)]
pub struct RepeatedReason {
    pub reason: String,
    pub count: i64,
    pub last_seen_ms: i64,
}

pub struct FeedbackStore {
    conn: Mutex<Connection>,
}

impl FeedbackStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;
             CREATE TABLE IF NOT EXISTS rejections (
                 id            INTEGER PRIMARY KEY AUTOINCREMENT,
                 reason        TEXT NOT NULL,
                 chat_id       TEXT NOT NULL,
                 created_at_ms INTEGER NOT NULL,
                 promoted      INTEGER NOT NULL DEFAULT 0
             );
             CREATE INDEX IF NOT EXISTS idx_rejections_reason ON rejections(reason, promoted);",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Record one gate rejection. Called from the quality gate's silence
    /// paths (§4.F) whenever a draft is rejected rather than sent.
    pub fn record_rejection(&self, reason: &str, chat_id: &str, now_ms: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO rejections (reason, chat_id, created_at_ms) VALUES (?1, ?2, ?3)",
            rusqlite::params![reason, chat_id, now_ms],
        )?;
        Ok(())
    }

    /// Reasons that have recurred at least `min_count` times among
    /// not-yet-promoted rejections, most frequent first.
    pub fn repeated_reasons(&self, min_count: i64) -> Result<Vec<RepeatedReason>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT reason, COUNT(*) AS n, MAX(created_at_ms)
             FROM rejections
             WHERE promoted = 0
             GROUP BY reason
             HAVING COUNT(*) >= ?1
             ORDER BY n DESC",
        )?;
        let rows = stmt
            .query_map([min_count], |row| {
                Ok(RepeatedReason {
                    reason: row.get(0)?,
                    count: row.get(1)?,
                    last_seen_ms: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Marks every not-yet-promoted rejection with this reason as promoted,
    /// so the next `self-improve` run doesn't re-derive the same lesson.
    pub fn mark_promoted(&self, reason: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE rejections SET promoted = 1 WHERE reason = ?1 AND promoted = 0",
            [reason],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_reasons_respects_threshold() {
        let store = FeedbackStore::open(":memory:").unwrap();
        store.record_rejection("slop_score", "chat:1", 1000).unwrap();
        store.record_rejection("slop_score", "chat:2", 1100).unwrap();
        store.record_rejection("judge_fail", "chat:1", 1200).unwrap();

        let repeated = store.repeated_reasons(2).unwrap();
        assert_eq!(repeated.len(), 1);
        assert_eq!(repeated[0].reason, "slop_score");
        assert_eq!(repeated[0].count, 2);
    }

    #[test]
    fn mark_promoted_excludes_from_future_queries() {
        let store = FeedbackStore::open(":memory:").unwrap();
        store.record_rejection("slop_score", "chat:1", 1000).unwrap();
        store.record_rejection("slop_score", "chat:2", 1100).unwrap();
        store.mark_promoted("slop_score").unwrap();

        assert!(store.repeated_reasons(2).unwrap().is_empty());
    }
}
