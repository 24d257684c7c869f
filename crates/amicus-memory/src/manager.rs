use std::path::PathBuf;
use std::sync::Mutex;

use amicus_core::{AmicusConfig, TrustTier};
use rusqlite::Connection;
use tracing::instrument;

use crate::dirty::DirtyQueue;
use crate::error::{MemoryError, Result};
use crate::mirror;
use crate::search::{self, Embedder};
use crate::types::*;

/// Facade over the memory database: people/facts/episodes/lessons, the
/// group-capsule and public-style dirty queues, and hybrid search. Every
/// public method is atomic — callers never hold an external lock around it
/// (§5 shared-resource policy).
pub struct MemoryManager {
    db: Mutex<Connection>,
    embedder: Option<Box<dyn Embedder>>,
    data_dir: PathBuf,
    group_dirty: DirtyQueue,
    style_dirty: DirtyQueue,
}

impl MemoryManager {
    pub fn new(conn: Connection, embedder: Option<Box<dyn Embedder>>, data_dir: PathBuf) -> Self {
        Self {
            db: Mutex::new(conn),
            embedder,
            data_dir,
            group_dirty: DirtyQueue::group_capsules(),
            style_dirty: DirtyQueue::public_style(),
        }
    }

    /// Upsert a `Person` on first appearance and on every inbound turn.
    /// `relationship_score` is monotonically non-decreasing — writers apply
    /// `max` (§3 invariants, §8.5).
    #[instrument(skip(self), fields(channel, channel_user_id))]
    pub fn track_person(
        &self,
        channel: &str,
        channel_user_id: &str,
        display_name: Option<&str>,
        score_floor: f64,
        now_ms: i64,
    ) -> Result<Person> {
        let db = self.db.lock().unwrap();
        let existing: Option<(String, f64)> = db
            .query_row(
                "SELECT id, relationship_score FROM people WHERE channel = ?1 AND channel_user_id = ?2",
                rusqlite::params![channel, channel_user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok();

        let id = match existing {
            Some((id, old_score)) => {
                let score = old_score.max(score_floor);
                db.execute(
                    "UPDATE people SET display_name = COALESCE(?1, display_name),
                     relationship_score = ?2, updated_at_ms = ?3 WHERE id = ?4",
                    rusqlite::params![display_name, score, now_ms, id],
                )?;
                id
            }
            None => {
                let id = amicus_core::PersonId::new().to_string();
                db.execute(
                    "INSERT INTO people (id, display_name, channel, channel_user_id,
                     relationship_score, created_at_ms, updated_at_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                    rusqlite::params![id, display_name, channel, channel_user_id, score_floor, now_ms],
                )?;
                id
            }
        };
        drop(db);
        self.get_person(&id)?.ok_or_else(|| MemoryError::NotFound(id))
    }

    pub fn get_person(&self, id: &str) -> Result<Option<Person>> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, display_name, channel, channel_user_id, relationship_score,
                    trust_tier_override, capsule, public_style_capsule, current_concerns,
                    goals, preferences, last_mood_signal, curiosity_questions,
                    created_at_ms, updated_at_ms
             FROM people WHERE id = ?1",
            rusqlite::params![id],
            row_to_person,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other.into()),
        })
    }

    pub fn find_person_by_identity(&self, channel: &str, channel_user_id: &str) -> Result<Option<Person>> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, display_name, channel, channel_user_id, relationship_score,
                    trust_tier_override, capsule, public_style_capsule, current_concerns,
                    goals, preferences, last_mood_signal, curiosity_questions,
                    created_at_ms, updated_at_ms
             FROM people WHERE channel = ?1 AND channel_user_id = ?2",
            rusqlite::params![channel, channel_user_id],
            row_to_person,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other.into()),
        })
    }

    /// Sets or clears a person's `trustTierOverride` (§6.1 `trust` command).
    /// `None` reverts to the derived tier.
    pub fn set_trust_tier_override(&self, id: &str, tier: Option<&str>) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE people SET trust_tier_override = ?1 WHERE id = ?2",
            rusqlite::params![tier, id],
        )?;
        if n == 0 {
            return Err(MemoryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Deletes a `Person`; cascades to facts. Episodes are preserved (§3 lifecycle).
    pub fn delete_person(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM facts WHERE person_id = ?1", rusqlite::params![id])?;
        db.execute(
            "INSERT INTO facts_fts(facts_fts) VALUES('rebuild')",
            [],
        )?;
        db.execute("DELETE FROM people WHERE id = ?1", rusqlite::params![id])?;
        Ok(())
    }

    /// Stores a fact inside one transaction; the FTS row is written in the
    /// same transaction as the canonical row (§4.I).
    pub fn store_fact(&self, fact: &Fact) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO facts (id, person_id, subject, content, category,
             evidence_quote, last_accessed_at_ms, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                fact.id,
                fact.person_id,
                fact.subject,
                fact.content,
                fact.category.map(|c| c.to_string()),
                fact.evidence_quote,
                fact.last_accessed_at_ms,
                fact.created_at_ms,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn delete_fact(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM facts WHERE id = ?1", rusqlite::params![id])?;
        db.execute("INSERT INTO facts_fts(facts_fts) VALUES('rebuild')", [])?;
        Ok(())
    }

    /// Logs an episode inside one transaction; on group episodes marks the
    /// group-capsule dirty queue, and on person-attributed episodes marks the
    /// public-style dirty queue (§3 lifecycle).
    pub fn log_episode(&self, episode: &Episode, now_ms: i64) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO episodes (id, chat_id, person_id, is_group, content, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                episode.id,
                episode.chat_id,
                episode.person_id,
                episode.is_group.map(|b| b as i64),
                episode.content,
                episode.created_at_ms,
            ],
        )?;
        if episode.is_group == Some(true) {
            self.group_dirty.mark_dirty(&tx, &episode.chat_id, now_ms)?;
        }
        if let Some(person_id) = &episode.person_id {
            self.style_dirty.mark_dirty(&tx, person_id, now_ms)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn recent_episodes_for_chat(&self, chat_id: &str, limit: usize) -> Result<Vec<Episode>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, chat_id, person_id, is_group, content, created_at_ms
             FROM episodes WHERE chat_id = ?1 ORDER BY created_at_ms DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![chat_id, limit], row_to_episode)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn get_group_capsule(&self, chat_id: &str) -> Result<Option<GroupCapsule>> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT chat_id, capsule, updated_at_ms FROM group_capsules WHERE chat_id = ?1",
            rusqlite::params![chat_id],
            |row| {
                Ok(GroupCapsule {
                    chat_id: row.get(0)?,
                    capsule: row.get(1)?,
                    updated_at_ms: row.get(2)?,
                })
            },
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other.into()),
        })
    }

    pub fn set_group_capsule(&self, chat_id: &str, capsule: &str, now_ms: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO group_capsules (chat_id, capsule, updated_at_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(chat_id) DO UPDATE SET capsule = excluded.capsule, updated_at_ms = excluded.updated_at_ms",
            rusqlite::params![chat_id, capsule, now_ms],
        )?;
        drop(db);
        mirror::write_group_capsule(&self.data_dir, chat_id, capsule);
        Ok(())
    }

    pub fn set_public_style_capsule(&self, person_id: &str, capsule: &str, now_ms: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE people SET public_style_capsule = ?1, updated_at_ms = ?2 WHERE id = ?3",
            rusqlite::params![capsule, now_ms, person_id],
        )?;
        let display_name: Option<String> = db
            .query_row(
                "SELECT display_name FROM people WHERE id = ?1",
                rusqlite::params![person_id],
                |row| row.get(0),
            )
            .ok();
        drop(db);
        mirror::write_person_capsule(
            &self.data_dir,
            person_id,
            display_name.as_deref().unwrap_or(person_id),
            capsule,
        );
        Ok(())
    }

    pub fn mark_group_capsule_dirty(&self, chat_id: &str, now_ms: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        self.group_dirty.mark_dirty(&db, chat_id, now_ms)
    }

    pub fn claim_group_capsule_dirty(&self, now_ms: i64, lease_ms: i64, limit: usize) -> Result<Vec<DirtyRow>> {
        let mut db = self.db.lock().unwrap();
        self.group_dirty.claim(&mut db, now_ms, lease_ms, limit.min(50))
    }

    pub fn complete_group_capsule_dirty(&self, chat_id: &str, claimed_at_ms: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        self.group_dirty.complete(&db, chat_id, claimed_at_ms)
    }

    pub fn claim_public_style_dirty(&self, now_ms: i64, lease_ms: i64, limit: usize) -> Result<Vec<DirtyRow>> {
        let mut db = self.db.lock().unwrap();
        self.style_dirty.claim(&mut db, now_ms, lease_ms, limit.min(200))
    }

    pub fn complete_public_style_dirty(&self, person_id: &str, claimed_at_ms: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        self.style_dirty.complete(&db, person_id, claimed_at_ms)
    }

    pub fn hybrid_search_facts(&self, cfg: &AmicusConfig, query: &str, limit: usize, now_ms: i64) -> Result<Vec<SearchHit<Fact>>> {
        let db = self.db.lock().unwrap();
        search::hybrid_search_facts(&db, self.embedder.as_deref(), query, limit, cfg, now_ms)
    }

    pub fn hybrid_search_episodes(&self, cfg: &AmicusConfig, query: &str, limit: usize, now_ms: i64) -> Result<Vec<SearchHit<Episode>>> {
        let db = self.db.lock().unwrap();
        search::hybrid_search_episodes(&db, self.embedder.as_deref(), query, limit, cfg, now_ms)
    }

    pub fn append_lesson(&self, lesson: &Lesson) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO lessons (id, type, category, content, rule, alternative,
             person_id, episode_refs, confidence, times_validated, times_violated, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                lesson.id,
                lesson.kind.map(|k| k.to_string()),
                lesson.category,
                lesson.content,
                lesson.rule,
                lesson.alternative,
                lesson.person_id,
                serde_json::to_string(&lesson.episode_refs)?,
                lesson.confidence,
                lesson.times_validated,
                lesson.times_violated,
                lesson.created_at_ms,
            ],
        )?;
        Ok(())
    }

    /// Most recent lessons first, for the `self-improve`/`status` CLI
    /// surface (§6) — lessons are append-only, so "recent" is the closest
    /// thing to a retraction-aware view without re-deriving live state.
    pub fn list_lessons(&self, limit: usize) -> Result<Vec<Lesson>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, type, category, content, rule, alternative, person_id,
                    episode_refs, confidence, times_validated, times_violated, created_at_ms
             FROM lessons ORDER BY created_at_ms DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, Option<f64>>(8)?,
                    row.get::<_, i64>(9)?,
                    row.get::<_, i64>(10)?,
                    row.get::<_, i64>(11)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .map(|(id, kind, category, content, rule, alternative, person_id, refs_json, confidence, times_validated, times_violated, created_at_ms)| {
                Lesson {
                    id,
                    kind: kind.and_then(|k| k.parse().ok()),
                    category,
                    content,
                    rule,
                    alternative,
                    person_id,
                    episode_refs: serde_json::from_str(&refs_json).unwrap_or_default(),
                    confidence,
                    times_validated,
                    times_violated,
                    created_at_ms,
                }
            })
            .collect();
        Ok(rows)
    }

    /// Dumps all rows for `export`/`import` round-tripping (§8).
    pub fn export_json(&self) -> Result<ExportPayload> {
        let db = self.db.lock().unwrap();
        let people = {
            let mut stmt = db.prepare(
                "SELECT id, display_name, channel, channel_user_id, relationship_score,
                        trust_tier_override, capsule, public_style_capsule, current_concerns,
                        goals, preferences, last_mood_signal, curiosity_questions,
                        created_at_ms, updated_at_ms FROM people",
            )?;
            stmt.query_map([], row_to_person)?.filter_map(|r| r.ok()).collect()
        };
        let facts = {
            let mut stmt = db.prepare(
                "SELECT person_id, subject, content, category, evidence_quote,
                        last_accessed_at_ms, created_at_ms, id FROM facts",
            )?;
            stmt.query_map([], |row| {
                Ok(Fact {
                    person_id: row.get(0)?,
                    subject: row.get(1)?,
                    content: row.get(2)?,
                    category: row.get::<_, Option<String>>(3)?.and_then(|s| s.parse().ok()),
                    evidence_quote: row.get(4)?,
                    last_accessed_at_ms: row.get(5)?,
                    created_at_ms: row.get(6)?,
                    id: row.get(7)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect()
        };
        let episodes = {
            let mut stmt = db.prepare(
                "SELECT id, chat_id, person_id, is_group, content, created_at_ms FROM episodes",
            )?;
            stmt.query_map([], row_to_episode)?.filter_map(|r| r.ok()).collect()
        };
        let group_capsules = {
            let mut stmt = db.prepare("SELECT chat_id, capsule, updated_at_ms FROM group_capsules")?;
            stmt.query_map([], |row| {
                Ok(GroupCapsule {
                    chat_id: row.get(0)?,
                    capsule: row.get(1)?,
                    updated_at_ms: row.get(2)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect()
        };
        let lessons = {
            let mut stmt = db.prepare(
                "SELECT id, type, category, content, rule, alternative, person_id,
                        episode_refs, confidence, times_validated, times_violated, created_at_ms
                 FROM lessons",
            )?;
            stmt.query_map([], |row| {
                let refs_json: String = row.get(7)?;
                Ok(Lesson {
                    id: row.get(0)?,
                    kind: row.get::<_, Option<String>>(1)?.and_then(|s| s.parse().ok()),
                    category: row.get(2)?,
                    content: row.get(3)?,
                    rule: row.get(4)?,
                    alternative: row.get(5)?,
                    person_id: row.get(6)?,
                    episode_refs: serde_json::from_str(&refs_json).unwrap_or_default(),
                    confidence: row.get(8)?,
                    times_validated: row.get(9)?,
                    times_violated: row.get(10)?,
                    created_at_ms: row.get(11)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect()
        };
        Ok(ExportPayload {
            people,
            facts,
            episodes,
            group_capsules,
            lessons,
        })
    }

    /// Applies a previously-exported payload inside one transaction. Vector
    /// entries are never imported — they repopulate lazily on the next
    /// hybrid-query write path (§4.I).
    pub fn import_json(&self, payload: &ExportPayload) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        for p in &payload.people {
            tx.execute(
                "INSERT INTO people (id, display_name, channel, channel_user_id,
                 relationship_score, trust_tier_override, capsule, public_style_capsule,
                 current_concerns, goals, preferences, last_mood_signal, curiosity_questions,
                 created_at_ms, updated_at_ms)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)
                 ON CONFLICT(id) DO UPDATE SET
                    display_name=excluded.display_name, relationship_score=excluded.relationship_score,
                    trust_tier_override=excluded.trust_tier_override, capsule=excluded.capsule,
                    public_style_capsule=excluded.public_style_capsule, updated_at_ms=excluded.updated_at_ms",
                rusqlite::params![
                    p.id, p.display_name, p.channel, p.channel_user_id, p.relationship_score,
                    p.trust_tier_override, p.capsule, p.public_style_capsule,
                    serde_json::to_string(&p.current_concerns)?, serde_json::to_string(&p.goals)?,
                    serde_json::to_string(&p.preferences)?, p.last_mood_signal,
                    serde_json::to_string(&p.curiosity_questions)?, p.created_at_ms, p.updated_at_ms,
                ],
            )?;
        }
        for f in &payload.facts {
            tx.execute(
                "INSERT INTO facts (id, person_id, subject, content, category, evidence_quote,
                 last_accessed_at_ms, created_at_ms) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)
                 ON CONFLICT(id) DO UPDATE SET content=excluded.content",
                rusqlite::params![
                    f.id, f.person_id, f.subject, f.content, f.category.map(|c| c.to_string()),
                    f.evidence_quote, f.last_accessed_at_ms, f.created_at_ms,
                ],
            )?;
        }
        for e in &payload.episodes {
            tx.execute(
                "INSERT INTO episodes (id, chat_id, person_id, is_group, content, created_at_ms)
                 VALUES (?1,?2,?3,?4,?5,?6) ON CONFLICT(id) DO NOTHING",
                rusqlite::params![e.id, e.chat_id, e.person_id, e.is_group.map(|b| b as i64), e.content, e.created_at_ms],
            )?;
        }
        for g in &payload.group_capsules {
            tx.execute(
                "INSERT INTO group_capsules (chat_id, capsule, updated_at_ms) VALUES (?1,?2,?3)
                 ON CONFLICT(chat_id) DO UPDATE SET capsule=excluded.capsule, updated_at_ms=excluded.updated_at_ms",
                rusqlite::params![g.chat_id, g.capsule, g.updated_at_ms],
            )?;
        }
        for l in &payload.lessons {
            tx.execute(
                "INSERT INTO lessons (id, type, category, content, rule, alternative, person_id,
                 episode_refs, confidence, times_validated, times_violated, created_at_ms)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12) ON CONFLICT(id) DO NOTHING",
                rusqlite::params![
                    l.id, l.kind.map(|k| k.to_string()), l.category, l.content, l.rule, l.alternative,
                    l.person_id, serde_json::to_string(&l.episode_refs)?, l.confidence,
                    l.times_validated, l.times_violated, l.created_at_ms,
                ],
            )?;
        }
        tx.execute("INSERT INTO facts_fts(facts_fts) VALUES('rebuild')", [])?;
        tx.execute("INSERT INTO episodes_fts(episodes_fts) VALUES('rebuild')", [])?;
        tx.commit()?;
        Ok(())
    }
}

/// Pure derivation of trust tier from a person row (§3). Operators always
/// bypass this and are treated as `CloseFriend` by callers directly.
pub fn derive_trust_tier(person: &Person) -> TrustTier {
    if let Some(override_str) = &person.trust_tier_override {
        match override_str.as_str() {
            "new_contact" => return TrustTier::NewContact,
            "getting_to_know" => return TrustTier::GettingToKnow,
            "close_friend" => return TrustTier::CloseFriend,
            _ => {}
        }
    }
    if person.relationship_score >= 0.7 {
        TrustTier::CloseFriend
    } else if person.relationship_score >= 0.3 {
        TrustTier::GettingToKnow
    } else {
        TrustTier::NewContact
    }
}

fn row_to_person(row: &rusqlite::Row<'_>) -> rusqlite::Result<Person> {
    let concerns: String = row.get(8)?;
    let goals: String = row.get(9)?;
    let prefs: String = row.get(10)?;
    let curiosity: String = row.get(12)?;
    Ok(Person {
        id: row.get(0)?,
        display_name: row.get(1)?,
        channel: row.get(2)?,
        channel_user_id: row.get(3)?,
        relationship_score: row.get(4)?,
        trust_tier_override: row.get(5)?,
        capsule: row.get(6)?,
        public_style_capsule: row.get(7)?,
        current_concerns: serde_json::from_str(&concerns).unwrap_or_default(),
        goals: serde_json::from_str(&goals).unwrap_or_default(),
        preferences: serde_json::from_str(&prefs).unwrap_or_default(),
        last_mood_signal: row.get(11)?,
        curiosity_questions: serde_json::from_str(&curiosity).unwrap_or_default(),
        created_at_ms: row.get(13)?,
        updated_at_ms: row.get(14)?,
    })
}

fn row_to_episode(row: &rusqlite::Row<'_>) -> rusqlite::Result<Episode> {
    Ok(Episode {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        person_id: row.get(2)?,
        is_group: row.get::<_, Option<i64>>(3)?.map(|v| v != 0),
        content: row.get(4)?,
        created_at_ms: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn setup() -> MemoryManager {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        MemoryManager::new(conn, None, PathBuf::from("/tmp/amicus-test"))
    }

    #[test]
    fn track_person_creates_then_updates() {
        let mgr = setup();
        let p1 = mgr.track_person("signal", "+123", Some("Ann"), 0.1, 1_000).unwrap();
        assert_eq!(p1.relationship_score, 0.1);
        let p2 = mgr.track_person("signal", "+123", Some("Ann"), 0.05, 2_000).unwrap();
        assert_eq!(p1.id, p2.id);
        assert_eq!(p2.relationship_score, 0.1, "score must never decrease");
    }

    #[test]
    fn delete_person_cascades_facts_preserves_episodes() {
        let mgr = setup();
        let p = mgr.track_person("signal", "+1", None, 0.0, 0).unwrap();
        mgr.store_fact(&Fact {
            id: "f1".into(),
            person_id: Some(p.id.clone()),
            subject: "diet".into(),
            content: "vegetarian".into(),
            category: Some(FactCategory::Preference),
            evidence_quote: None,
            last_accessed_at_ms: None,
            created_at_ms: 0,
        })
        .unwrap();
        mgr.log_episode(
            &Episode {
                id: "e1".into(),
                chat_id: "c1".into(),
                person_id: Some(p.id.clone()),
                is_group: Some(false),
                content: "hi".into(),
                created_at_ms: 0,
            },
            0,
        )
        .unwrap();

        mgr.delete_person(&p.id).unwrap();
        assert!(mgr.get_person(&p.id).unwrap().is_none());

        let episodes = mgr.recent_episodes_for_chat("c1", 10).unwrap();
        assert_eq!(episodes.len(), 1, "episodes must be preserved");
    }

    #[test]
    fn export_import_round_trip_preserves_counts() {
        let mgr = setup();
        mgr.track_person("signal", "+1", Some("A"), 0.5, 0).unwrap();
        mgr.track_person("telegram", "42", Some("B"), 0.2, 0).unwrap();
        let export = mgr.export_json().unwrap();
        assert_eq!(export.people.len(), 2);

        let mgr2 = setup();
        mgr2.import_json(&export).unwrap();
        let export2 = mgr2.export_json().unwrap();
        assert_eq!(export2.people.len(), export.people.len());
    }

    #[test]
    fn trust_tier_thresholds() {
        let mut p = Person {
            id: "p".into(),
            display_name: None,
            channel: "signal".into(),
            channel_user_id: "1".into(),
            relationship_score: 0.0,
            trust_tier_override: None,
            capsule: None,
            public_style_capsule: None,
            current_concerns: vec![],
            goals: vec![],
            preferences: vec![],
            last_mood_signal: None,
            curiosity_questions: vec![],
            created_at_ms: 0,
            updated_at_ms: 0,
        };
        assert_eq!(derive_trust_tier(&p), TrustTier::NewContact);
        p.relationship_score = 0.5;
        assert_eq!(derive_trust_tier(&p), TrustTier::GettingToKnow);
        p.relationship_score = 0.9;
        assert_eq!(derive_trust_tier(&p), TrustTier::CloseFriend);
        p.trust_tier_override = Some("new_contact".into());
        assert_eq!(derive_trust_tier(&p), TrustTier::NewContact);
    }
}
