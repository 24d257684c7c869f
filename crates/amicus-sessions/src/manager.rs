use std::str::FromStr;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{Result, SessionError};
use crate::types::{MessageRole, Session, SessionKey, SessionMessage};

/// Thread-safe manager for persisted user sessions.
///
/// Wraps a single SQLite connection in a `Mutex`. For high-concurrency
/// deployments consider a connection pool (e.g. r2d2), but a Mutex is
/// sufficient for the single-node Phase 2 target.
pub struct SessionManager {
    db: Mutex<Connection>,
}

impl SessionManager {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Return an existing session or create a new one (upsert pattern).
    ///
    /// Creating a session is cheap — no LLM call is made. The session is
    /// persisted so stats survive restarts.
    #[instrument(skip(self), fields(key = %key))]
    pub fn get_or_create(&self, key: &SessionKey) -> Result<Session> {
        // Fast path: session already exists
        if let Some(session) = self.get(key)? {
            debug!("session cache hit");
            return Ok(session);
        }

        // Slow path: create a new session row
        let id = Uuid::now_v7().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let key_str = key.format();

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR IGNORE INTO sessions
             (id, session_key, user_id, agent_id, name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            rusqlite::params![id, key_str, key.user_id, key.agent_id, key.name, now],
        )?;

        // Read back — handles the race where two threads insert simultaneously
        let session = db.query_row(
            "SELECT id, session_key, user_id, agent_id, name, title,
                    message_count, total_tokens, last_model, created_at, updated_at
             FROM sessions WHERE session_key = ?1",
            rusqlite::params![key_str],
            row_to_session,
        )?;

        Ok(session)
    }

    /// Retrieve a session by key, returning `None` if it does not exist.
    #[instrument(skip(self), fields(key = %key))]
    pub fn get(&self, key: &SessionKey) -> Result<Option<Session>> {
        let key_str = key.format();
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, session_key, user_id, agent_id, name, title,
                    message_count, total_tokens, last_model, created_at, updated_at
             FROM sessions WHERE session_key = ?1",
            rusqlite::params![key_str],
            row_to_session,
        ) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SessionError::Database(e)),
        }
    }

    /// List the most-recently-updated sessions for a user, newest first.
    #[instrument(skip(self), fields(user_id, limit))]
    pub fn list_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<Session>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, session_key, user_id, agent_id, name, title,
                    message_count, total_tokens, last_model, created_at, updated_at
             FROM sessions
             WHERE user_id = ?1
             ORDER BY updated_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![user_id, limit as i64], row_to_session)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Increment `message_count` by 1, add `tokens` to `total_tokens`,
    /// and record the model that was used.
    ///
    /// Also bumps `updated_at` so `list_for_user` ordering stays current.
    #[instrument(skip(self), fields(key = %key, tokens, model))]
    pub fn update_stats(&self, key: &SessionKey, tokens: u64, model: &str) -> Result<()> {
        let key_str = key.format();
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let rows_changed = db.execute(
            "UPDATE sessions
             SET message_count = message_count + 1,
                 total_tokens  = total_tokens  + ?1,
                 last_model    = ?2,
                 updated_at    = ?3
             WHERE session_key = ?4",
            rusqlite::params![tokens as i64, model, now, key_str],
        )?;
        if rows_changed == 0 {
            return Err(SessionError::NotFound { key: key_str });
        }
        Ok(())
    }

    /// Permanently delete a session record and its message log (cascades via
    /// `ON DELETE CASCADE`, so `foreign_keys=ON` must be set on the
    /// connection — see `db::open`).
    #[instrument(skip(self), fields(key = %key))]
    pub fn delete(&self, key: &SessionKey) -> Result<()> {
        let key_str = key.format();
        let db = self.db.lock().unwrap();
        let rows_changed = db.execute(
            "DELETE FROM sessions WHERE session_key = ?1",
            rusqlite::params![key_str],
        )?;
        if rows_changed == 0 {
            return Err(SessionError::NotFound { key: key_str });
        }
        Ok(())
    }

    /// Append one turn to a session's message log (§4.J step 7 / step 11's
    /// "append assistant message to session"). Creates the session first if
    /// it doesn't exist yet.
    #[instrument(skip(self, content), fields(key = %key, role = %role))]
    pub fn append_message(
        &self,
        key: &SessionKey,
        role: MessageRole,
        content: &str,
        source_message_id: Option<&str>,
    ) -> Result<SessionMessage> {
        let session = self.get_or_create(key)?;
        let id = Uuid::now_v7().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO messages (id, session_id, role, content, source_message_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![id, session.id, role.to_string(), content, source_message_id, now],
        )?;
        db.execute(
            "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
            rusqlite::params![now, session.id],
        )?;

        Ok(SessionMessage {
            id,
            role,
            content: content.to_string(),
            source_message_id: source_message_id.map(String::from),
            created_at: now,
        })
    }

    /// Last `limit` messages, oldest first, ready to feed the model as
    /// `historyForModel` (§4.G).
    #[instrument(skip(self), fields(key = %key, limit))]
    pub fn get_history(&self, key: &SessionKey, limit: usize) -> Result<Vec<SessionMessage>> {
        self.get_history_excluding(key, limit, &[])
    }

    /// Same as [`Self::get_history`], but drops any user message whose
    /// `source_message_id` is in `exclude_source_ids` — the context builder
    /// uses this to keep messages already present in the current
    /// accumulated batch out of history, since they're sent as
    /// `userMessages` instead (§4.G).
    #[instrument(skip(self, exclude_source_ids), fields(key = %key, limit))]
    pub fn get_history_excluding(
        &self,
        key: &SessionKey,
        limit: usize,
        exclude_source_ids: &[String],
    ) -> Result<Vec<SessionMessage>> {
        let session = match self.get(key)? {
            Some(s) => s,
            None => return Ok(Vec::new()),
        };

        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, role, content, source_message_id, created_at
             FROM messages
             WHERE session_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![session.id, limit as i64], row_to_message)?;
        let mut messages: Vec<SessionMessage> = rows
            .filter_map(|r| r.ok())
            .filter(|m| {
                m.source_message_id
                    .as_deref()
                    .map(|id| !exclude_source_ids.iter().any(|x| x == id))
                    .unwrap_or(true)
            })
            .collect();
        messages.reverse();
        Ok(messages)
    }

    /// Collapse everything older than the last `keep_recent` messages into a
    /// single `system`-role summary message, deleting what it replaces.
    ///
    /// The summary text itself is produced by the caller (the context
    /// builder's summarizer callback, §4.G) — this method only performs the
    /// storage-side swap, since summarization requires an LLM call this
    /// crate has no business making.
    #[instrument(skip(self, summary_text), fields(key = %key, keep_recent))]
    pub fn compact(&self, key: &SessionKey, keep_recent: usize, summary_text: &str) -> Result<()> {
        let session = match self.get(key)? {
            Some(s) => s,
            None => return Ok(()),
        };

        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;

        // The summary stands in for everything before it, so it must sort
        // chronologically ahead of the messages it replaces.
        let earliest_ts: Option<String> = tx
            .query_row(
                "SELECT MIN(created_at) FROM messages WHERE session_id = ?1",
                rusqlite::params![session.id],
                |row| row.get::<_, Option<String>>(0),
            )
            .ok()
            .flatten();

        let keep_ids: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM messages WHERE session_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(rusqlite::params![session.id, keep_recent as i64], |row| {
                row.get::<_, String>(0)
            })?;
            rows.filter_map(|r| r.ok()).collect()
        };

        if !keep_ids.is_empty() {
            let placeholders = std::iter::repeat("?").take(keep_ids.len()).collect::<Vec<_>>().join(",");
            let sql = format!(
                "DELETE FROM messages WHERE session_id = ? AND id NOT IN ({placeholders})"
            );
            let mut params: Vec<&dyn rusqlite::ToSql> = vec![&session.id];
            for id in &keep_ids {
                params.push(id);
            }
            tx.execute(&sql, params.as_slice())?;
        } else {
            tx.execute("DELETE FROM messages WHERE session_id = ?1", rusqlite::params![session.id])?;
        }

        let id = Uuid::now_v7().to_string();
        let summary_ts = earliest_ts.unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
        tx.execute(
            "INSERT INTO messages (id, session_id, role, content, source_message_id, created_at)
             VALUES (?1, ?2, 'system', ?3, NULL, ?4)",
            rusqlite::params![id, session.id, summary_text, summary_ts],
        )?;
        tx.commit()?;
        Ok(())
    }
}

/// Map a SQLite row to a `Session`.
fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let key_str: String = row.get(1)?;
    // If the stored key is somehow malformed we fall back to a reconstructed key
    // from the individual columns rather than panicking.
    let key = SessionKey::parse(&key_str).unwrap_or_else(|_| SessionKey {
        user_id: row.get::<_, String>(2).unwrap_or_default(),
        agent_id: row.get::<_, String>(3).unwrap_or_default(),
        name: row.get::<_, String>(4).unwrap_or_default(),
    });

    Ok(Session {
        id: row.get(0)?,
        key,
        title: row.get(5)?,
        message_count: row.get::<_, i64>(6)? as u32,
        total_tokens: row.get::<_, i64>(7)? as u64,
        last_model: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// Map a SQLite row to a `SessionMessage`.
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionMessage> {
    let role_str: String = row.get(1)?;
    let role = role_str.parse::<MessageRole>().unwrap_or(MessageRole::User);
    Ok(SessionMessage {
        id: row.get(0)?,
        role,
        content: row.get(2)?,
        source_message_id: row.get(3)?,
        created_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn manager() -> SessionManager {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        init_db(&conn).unwrap();
        SessionManager::new(conn)
    }

    fn key() -> SessionKey {
        SessionKey::new("u-1", "main", "main")
    }

    #[test]
    fn append_and_get_history_round_trips_in_order() {
        let mgr = manager();
        let k = key();
        mgr.append_message(&k, MessageRole::User, "hi", Some("ch-1")).unwrap();
        mgr.append_message(&k, MessageRole::Assistant, "hello", None).unwrap();
        mgr.append_message(&k, MessageRole::User, "how are you", Some("ch-2")).unwrap();

        let history = mgr.get_history(&k, 10).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "hi");
        assert_eq!(history[1].content, "hello");
        assert_eq!(history[2].content, "how are you");
    }

    #[test]
    fn get_history_respects_limit_and_keeps_most_recent() {
        let mgr = manager();
        let k = key();
        for i in 0..5 {
            mgr.append_message(&k, MessageRole::User, &format!("m{i}"), None).unwrap();
        }
        let history = mgr.get_history(&k, 2).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "m3");
        assert_eq!(history[1].content, "m4");
    }

    #[test]
    fn get_history_excluding_drops_batch_source_ids() {
        let mgr = manager();
        let k = key();
        mgr.append_message(&k, MessageRole::User, "already in batch", Some("ch-1")).unwrap();
        mgr.append_message(&k, MessageRole::Assistant, "reply", None).unwrap();

        let history = mgr
            .get_history_excluding(&k, 10, &["ch-1".to_string()])
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "reply");
    }

    #[test]
    fn compact_collapses_older_messages_into_one_summary() {
        let mgr = manager();
        let k = key();
        for i in 0..6 {
            mgr.append_message(&k, MessageRole::User, &format!("m{i}"), None).unwrap();
        }
        mgr.compact(&k, 2, "summary of the earlier conversation").unwrap();

        let history = mgr.get_history(&k, 10).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, MessageRole::System);
        assert_eq!(history[0].content, "summary of the earlier conversation");
        assert_eq!(history[1].content, "m4");
        assert_eq!(history[2].content, "m5");
    }

    #[test]
    fn append_message_lazily_creates_session() {
        let mgr = manager();
        let k = key();
        assert!(mgr.get(&k).unwrap().is_none());
        mgr.append_message(&k, MessageRole::User, "first", None).unwrap();
        assert!(mgr.get(&k).unwrap().is_some());
    }

    #[test]
    fn delete_cascades_to_messages() {
        let mgr = manager();
        let k = key();
        mgr.append_message(&k, MessageRole::User, "hi", None).unwrap();
        mgr.delete(&k).unwrap();
        assert!(mgr.get_history(&k, 10).unwrap().is_empty());
    }
}
