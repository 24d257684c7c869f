use rusqlite::Connection;

use crate::error::Result;
use crate::types::DirtyRow;

/// A dirty-claim queue table: `group_capsule_dirty` (keyed by `chat_id`) and
/// `public_style_dirty` (keyed by `person_id`) are structurally identical, so
/// both are driven through this one lease implementation (§4.I).
pub struct DirtyQueue {
    table: &'static str,
    key_column: &'static str,
}

impl DirtyQueue {
    pub const fn group_capsules() -> Self {
        Self {
            table: "group_capsule_dirty",
            key_column: "chat_id",
        }
    }

    pub const fn public_style() -> Self {
        Self {
            table: "public_style_dirty",
            key_column: "person_id",
        }
    }

    /// Insert-or-coalesce: keeps `MIN(dirty_at_ms)` and `MAX(dirty_last_at_ms)`
    /// so bursts of dirtying collapse into one row.
    pub fn mark_dirty(&self, conn: &Connection, key: &str, now_ms: i64) -> Result<()> {
        let sql = format!(
            "INSERT INTO {table} ({col}, dirty_at_ms, dirty_last_at_ms, claimed_at_ms)
             VALUES (?1, ?2, ?2, NULL)
             ON CONFLICT({col}) DO UPDATE SET
                dirty_at_ms = MIN(dirty_at_ms, excluded.dirty_at_ms),
                dirty_last_at_ms = MAX(dirty_last_at_ms, excluded.dirty_last_at_ms)",
            table = self.table,
            col = self.key_column,
        );
        conn.execute(&sql, rusqlite::params![key, now_ms])?;
        Ok(())
    }

    /// Claims up to `limit` (caller-supplied, caps applied by the caller)
    /// unleased-or-expired rows in one transaction, ordered by `dirty_at_ms`.
    pub fn claim(
        &self,
        conn: &mut Connection,
        now_ms: i64,
        lease_ms: i64,
        limit: usize,
    ) -> Result<Vec<DirtyRow>> {
        let tx = conn.transaction()?;
        let expired_before = now_ms - lease_ms;

        let select_sql = format!(
            "SELECT {col}, dirty_at_ms, dirty_last_at_ms, claimed_at_ms
             FROM {table}
             WHERE claimed_at_ms IS NULL OR claimed_at_ms < ?1
             ORDER BY dirty_at_ms ASC
             LIMIT ?2",
            table = self.table,
            col = self.key_column,
        );
        let rows: Vec<DirtyRow> = {
            let mut stmt = tx.prepare(&select_sql)?;
            let mapped = stmt.query_map(rusqlite::params![expired_before, limit as i64], |row| {
                Ok(DirtyRow {
                    key: row.get(0)?,
                    dirty_at_ms: row.get(1)?,
                    dirty_last_at_ms: row.get(2)?,
                    claimed_at_ms: row.get(3)?,
                })
            })?;
            mapped.filter_map(|r| r.ok()).collect()
        };

        let update_sql = format!(
            "UPDATE {table} SET claimed_at_ms = ?1 WHERE {col} = ?2",
            table = self.table,
            col = self.key_column,
        );
        for row in &rows {
            tx.execute(&update_sql, rusqlite::params![now_ms, row.key])?;
        }
        tx.commit()?;
        Ok(rows)
    }

    /// Completes processing of `key` claimed at `claimed_at_ms`: deletes the
    /// row iff no newer dirtying occurred during the lease, else releases
    /// the claim so the next claimer picks it up (§3 invariants, §8.4).
    pub fn complete(&self, conn: &Connection, key: &str, claimed_at_ms: i64) -> Result<()> {
        let delete_sql = format!(
            "DELETE FROM {table}
             WHERE {col} = ?1 AND COALESCE(dirty_last_at_ms, dirty_at_ms) <= ?2",
            table = self.table,
            col = self.key_column,
        );
        let deleted = conn.execute(delete_sql.as_str(), rusqlite::params![key, claimed_at_ms])?;
        if deleted == 0 {
            let release_sql = format!(
                "UPDATE {table} SET claimed_at_ms = NULL WHERE {col} = ?1",
                table = self.table,
                col = self.key_column,
            );
            conn.execute(&release_sql, rusqlite::params![key])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        conn
    }

    #[test]
    fn mark_dirty_coalesces_bursts() {
        let conn = setup();
        let q = DirtyQueue::group_capsules();
        q.mark_dirty(&conn, "c1", 100).unwrap();
        q.mark_dirty(&conn, "c1", 200).unwrap();
        q.mark_dirty(&conn, "c1", 50).unwrap();
        let row: DirtyRow = conn
            .query_row(
                "SELECT chat_id, dirty_at_ms, dirty_last_at_ms, claimed_at_ms FROM group_capsule_dirty",
                [],
                |r| {
                    Ok(DirtyRow {
                        key: r.get(0)?,
                        dirty_at_ms: r.get(1)?,
                        dirty_last_at_ms: r.get(2)?,
                        claimed_at_ms: r.get(3)?,
                    })
                },
            )
            .unwrap();
        assert_eq!(row.dirty_at_ms, 50);
        assert_eq!(row.dirty_last_at_ms, 200);
    }

    #[test]
    fn claim_is_exclusive_until_lease_expires() {
        let mut conn = setup();
        let q = DirtyQueue::group_capsules();
        q.mark_dirty(&conn, "c1", 1_000).unwrap();

        let claimed = q.claim(&mut conn, 1_100, 10_000, 50).unwrap();
        assert_eq!(claimed.len(), 1);

        let second = q.claim(&mut conn, 1_200, 10_000, 50).unwrap();
        assert!(second.is_empty(), "lease still held, should not be re-claimable");

        let after_expiry = q.claim(&mut conn, 1_100 + 10_001, 10_000, 50).unwrap();
        assert_eq!(after_expiry.len(), 1, "lease expired, should be reclaimable");
    }

    #[test]
    fn complete_deletes_when_no_new_dirtying() {
        let mut conn = setup();
        let q = DirtyQueue::group_capsules();
        q.mark_dirty(&conn, "c1", 1_000).unwrap();
        let claimed = q.claim(&mut conn, 1_100, 10_000, 50).unwrap();
        let claimed_at = 1_100;
        assert_eq!(claimed.len(), 1);

        q.complete(&conn, "c1", claimed_at).unwrap();
        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM group_capsule_dirty", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn complete_releases_when_new_dirtying_happened_during_lease() {
        let mut conn = setup();
        let q = DirtyQueue::group_capsules();
        q.mark_dirty(&conn, "c1", 1_000).unwrap();
        let claimed = q.claim(&mut conn, 1_100, 10_000, 50).unwrap();
        let claimed_at = 1_100;
        assert_eq!(claimed.len(), 1);

        // New dirtying arrives mid-lease.
        q.mark_dirty(&conn, "c1", 1_150).unwrap();

        q.complete(&conn, "c1", claimed_at).unwrap();
        let row: Option<Option<i64>> = conn
            .query_row(
                "SELECT claimed_at_ms FROM group_capsule_dirty WHERE chat_id = 'c1'",
                [],
                |r| r.get(0),
            )
            .ok();
        assert_eq!(row, Some(None), "claim must be released, not deleted");
    }
}
