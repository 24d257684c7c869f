use rusqlite::Connection;

use crate::error::Result;

/// Opens `path` with the pragmas the spec requires of the memory store
/// (§3.1, §4.I): WAL journaling, `synchronous=NORMAL`, `foreign_keys=ON`,
/// a 5s busy timeout, and a 256MB mmap hint.
pub fn open(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA foreign_keys=ON;
         PRAGMA busy_timeout=5000;
         PRAGMA mmap_size=268435456;",
    )?;
    init_db(&conn)?;
    Ok(conn)
}

/// Linear list of idempotent migrations. Each checks for its own
/// table/column before altering anything, so re-running on an
/// already-migrated database is a no-op (§4.I).
type Migration = fn(&Connection) -> Result<()>;

const MIGRATIONS: &[Migration] = &[
    migrate_0_core_schema,
    migrate_1_dirty_queues,
    migrate_2_meta,
];

pub fn init_db(conn: &Connection) -> Result<()> {
    for migration in MIGRATIONS {
        migration(conn)?;
    }
    Ok(())
}

fn migrate_0_core_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS people (
            id                   TEXT PRIMARY KEY,
            display_name         TEXT,
            channel              TEXT NOT NULL,
            channel_user_id      TEXT NOT NULL,
            relationship_score   REAL NOT NULL DEFAULT 0.0,
            trust_tier_override  TEXT,
            capsule              TEXT,
            public_style_capsule TEXT,
            current_concerns     TEXT,
            goals                TEXT,
            preferences          TEXT,
            last_mood_signal     TEXT,
            curiosity_questions  TEXT,
            created_at_ms        INTEGER NOT NULL,
            updated_at_ms        INTEGER NOT NULL,
            UNIQUE(channel, channel_user_id)
        );

        CREATE TABLE IF NOT EXISTS facts (
            seq                  INTEGER PRIMARY KEY AUTOINCREMENT,
            id                   TEXT UNIQUE NOT NULL,
            person_id            TEXT,
            subject              TEXT NOT NULL,
            content              TEXT NOT NULL,
            category             TEXT,
            evidence_quote       TEXT,
            last_accessed_at_ms  INTEGER,
            created_at_ms        INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_facts_person ON facts(person_id);
        CREATE INDEX IF NOT EXISTS idx_facts_subject ON facts(subject);
        CREATE INDEX IF NOT EXISTS idx_facts_last_accessed ON facts(last_accessed_at_ms);
        CREATE VIRTUAL TABLE IF NOT EXISTS facts_fts
            USING fts5(subject, content, content='facts', content_rowid='seq');

        CREATE TABLE IF NOT EXISTS episodes (
            seq            INTEGER PRIMARY KEY AUTOINCREMENT,
            id             TEXT UNIQUE NOT NULL,
            chat_id        TEXT NOT NULL,
            person_id      TEXT,
            is_group       INTEGER,
            content        TEXT NOT NULL,
            created_at_ms  INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_episodes_chat
            ON episodes(chat_id, created_at_ms DESC);
        CREATE INDEX IF NOT EXISTS idx_episodes_person
            ON episodes(person_id, is_group, created_at_ms DESC);
        CREATE VIRTUAL TABLE IF NOT EXISTS episodes_fts
            USING fts5(content, content='episodes', content_rowid='seq');

        CREATE TABLE IF NOT EXISTS lessons (
            id               TEXT PRIMARY KEY,
            type             TEXT,
            category         TEXT,
            content          TEXT NOT NULL,
            rule             TEXT,
            alternative      TEXT,
            person_id        TEXT,
            episode_refs     TEXT,
            confidence       REAL,
            times_validated  INTEGER NOT NULL DEFAULT 0,
            times_violated   INTEGER NOT NULL DEFAULT 0,
            created_at_ms    INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS group_capsules (
            chat_id        TEXT PRIMARY KEY,
            capsule        TEXT,
            updated_at_ms  INTEGER NOT NULL
        );",
    )?;
    Ok(())
}

fn migrate_1_dirty_queues(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS group_capsule_dirty (
            chat_id           TEXT PRIMARY KEY,
            dirty_at_ms       INTEGER NOT NULL,
            dirty_last_at_ms  INTEGER NOT NULL,
            claimed_at_ms     INTEGER
        );

        CREATE TABLE IF NOT EXISTS public_style_dirty (
            person_id         TEXT PRIMARY KEY,
            dirty_at_ms       INTEGER NOT NULL,
            dirty_last_at_ms  INTEGER NOT NULL,
            claimed_at_ms     INTEGER
        );",
    )?;
    Ok(())
}

fn migrate_2_meta(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (
            key    TEXT PRIMARY KEY,
            value  TEXT NOT NULL
        );",
    )?;
    Ok(())
}

/// Ensures `facts_vec` / `episodes_vec` exist with the embedder's current
/// dimension. If a prior run recorded a different dimension, both virtual
/// tables are dropped and recreated — entries repopulate lazily as new
/// writes occur (§4.I: "never truncated", "dropped and recreated").
pub fn ensure_vector_tables(conn: &Connection, dims: usize) -> Result<()> {
    let recorded: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'embedding_dim'",
            [],
            |row| row.get(0),
        )
        .ok();

    let mismatched = recorded.as_deref() != Some(dims.to_string().as_str());
    if mismatched {
        conn.execute_batch("DROP TABLE IF EXISTS facts_vec; DROP TABLE IF EXISTS episodes_vec;")?;
    }

    conn.execute(
        &format!("CREATE VIRTUAL TABLE IF NOT EXISTS facts_vec USING vec0(embedding float[{dims}])"),
        [],
    )?;
    conn.execute(
        &format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS episodes_vec USING vec0(embedding float[{dims}])"
        ),
        [],
    )?;

    conn.execute(
        "INSERT INTO meta(key, value) VALUES('embedding_dim', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        rusqlite::params![dims.to_string()],
    )?;
    Ok(())
}

/// Registers the `sqlite-vec` extension with the process-global SQLite
/// auto-extension mechanism. Must be called once before any `Connection`
/// is opened that needs `facts_vec`/`episodes_vec`.
pub fn register_vec_extension() {
    unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    }
}
