//! `status` (§6.1): chat/job/queue counts from the three databases. Reads
//! its own connections rather than going through the managers, since this
//! is a point-in-time report, not a write path.

use amicus_core::{AmicusError, Result};
use rusqlite::Connection;

use crate::wiring;

pub fn run(config_path: Option<&str>, json: bool) -> Result<()> {
    let cfg = wiring::load_config(config_path)?;
    let stores = wiring::open_stores(cfg)?;
    let _ = &stores; // ensures migrations have run before we count

    let memory = open_ro(&wiring::memory_path(&stores.cfg))?;
    let sessions = open_ro(&wiring::sessions_path(&stores.cfg))?;
    let jobs = open_ro(&wiring::jobs_path(&stores.cfg))?;

    let people = count(&memory, "people")?;
    let facts = count(&memory, "facts")?;
    let episodes = count(&memory, "episodes")?;
    let group_capsules = count(&memory, "group_capsules")?;
    let lessons = count(&memory, "lessons")?;
    let group_dirty = count(&memory, "group_capsule_dirty")?;
    let style_dirty = count(&memory, "public_style_dirty")?;
    let session_count = count(&sessions, "sessions")?;
    let message_count = count(&sessions, "messages")?;
    let job_count = count(&jobs, "jobs")?;
    let pending_jobs = count_where(&jobs, "jobs", "status = 'pending'")?;

    if json {
        let payload = serde_json::json!({
            "people": people,
            "facts": facts,
            "episodes": episodes,
            "group_capsules": group_capsules,
            "lessons": lessons,
            "group_capsule_dirty": group_dirty,
            "public_style_dirty": style_dirty,
            "sessions": session_count,
            "messages": message_count,
            "jobs": job_count,
            "jobs_pending": pending_jobs,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("memory:   {people} people, {facts} facts, {episodes} episodes, {group_capsules} group capsules, {lessons} lessons");
        println!("dirty:    {group_dirty} group capsules, {style_dirty} public styles");
        println!("sessions: {session_count} sessions, {message_count} messages");
        println!("jobs:     {job_count} total, {pending_jobs} pending");
    }

    Ok(())
}

fn open_ro(path: &str) -> Result<Connection> {
    Connection::open_with_flags(path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| AmicusError::Database(e.to_string()))
}

fn count(conn: &Connection, table: &str) -> Result<i64> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
        .map_err(|e| AmicusError::Database(e.to_string()))
}

fn count_where(conn: &Connection, table: &str, predicate: &str) -> Result<i64> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table} WHERE {predicate}"), [], |r| r.get(0))
        .map_err(|e| AmicusError::Database(e.to_string()))
}
