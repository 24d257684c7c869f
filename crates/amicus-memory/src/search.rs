use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::Connection;

use amicus_core::AmicusConfig;

use crate::error::Result;
use crate::types::{Episode, Fact, SearchHit};

/// External embeddings provider. The memory store depends only on this
/// trait and the SQL driver (§2 dependency graph); the concrete embedding
/// model lives outside the core.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
    fn dims(&self) -> usize;
}

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9]{2,}").unwrap());

/// Builds a safe FTS5 MATCH string from arbitrary user text: extract
/// `[a-z0-9]{2,}` tokens, dedupe, cap at 10, double-quote and OR-join.
/// Never passes raw text to MATCH (§3 invariants, §8.7).
pub fn sanitize_fts_query(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    let mut seen = std::collections::HashSet::new();
    let mut tokens = Vec::new();
    for m in TOKEN_RE.find_iter(&lowered) {
        let tok = m.as_str().to_string();
        if seen.insert(tok.clone()) {
            tokens.push(tok);
            if tokens.len() >= 10 {
                break;
            }
        }
    }
    if tokens.is_empty() {
        return None;
    }
    Some(
        tokens
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

fn recency_boost(age_ms: i64, recency_weight: f64, half_life_days: f64) -> f64 {
    let half_life_ms = half_life_days * 24.0 * 60.0 * 60.0 * 1000.0;
    if half_life_ms <= 0.0 {
        return 1.0;
    }
    let age = age_ms.max(0) as f64;
    1.0 + recency_weight * (-std::f64::consts::LN_2 * age / half_life_ms).exp()
}

/// Reciprocal-rank-fusion merge of an FTS rank list and a vector k-NN rank
/// list into one score per id (§4.I.3-4).
fn rrf_merge(
    fts_ranked_ids: &[String],
    vec_ranked_ids: &[String],
    k: f64,
    fts_w: f64,
    vec_w: f64,
) -> HashMap<String, f64> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    for (rank, id) in fts_ranked_ids.iter().enumerate() {
        *scores.entry(id.clone()).or_insert(0.0) += fts_w / (k + (rank + 1) as f64);
    }
    for (rank, id) in vec_ranked_ids.iter().enumerate() {
        *scores.entry(id.clone()).or_insert(0.0) += vec_w / (k + (rank + 1) as f64);
    }
    scores
}

fn vec_knn_ids(
    conn: &Connection,
    vec_table: &str,
    embedder: &dyn Embedder,
    query: &str,
    k: usize,
) -> Vec<(i64, usize)> {
    let embedding = embedder.embed(query);
    let blob: Vec<u8> = embedding.iter().flat_map(|f| f.to_le_bytes()).collect();
    let sql = format!("SELECT rowid FROM {vec_table} WHERE embedding MATCH ?1 AND k = ?2 ORDER BY distance");
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    let rows = stmt.query_map(rusqlite::params![blob, k as i64], |row| row.get::<_, i64>(0));
    match rows {
        Ok(iter) => iter
            .filter_map(|r| r.ok())
            .enumerate()
            .map(|(rank, rowid)| (rowid, rank))
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// `hybridSearch` for facts (§4.I). Falls back to FTS-only when no embedder
/// is configured.
pub fn hybrid_search_facts(
    conn: &Connection,
    embedder: Option<&dyn Embedder>,
    query: &str,
    limit: usize,
    cfg: &AmicusConfig,
    now_ms: i64,
) -> Result<Vec<SearchHit<Fact>>> {
    let Some(match_str) = sanitize_fts_query(query) else {
        return Ok(Vec::new());
    };

    let mut stmt = conn.prepare(
        "SELECT f.seq, f.id, f.person_id, f.subject, f.content, f.category,
                f.evidence_quote, f.last_accessed_at_ms, f.created_at_ms
         FROM facts f
         JOIN facts_fts ON facts_fts.rowid = f.seq
         WHERE facts_fts MATCH ?1
         ORDER BY rank
         LIMIT 200",
    )?;
    let mut by_seq: HashMap<i64, Fact> = HashMap::new();
    let mut fts_order: Vec<String> = Vec::new();
    let rows = stmt.query_map(rusqlite::params![match_str], row_to_fact_with_seq)?;
    for row in rows.flatten() {
        let (seq, fact) = row;
        fts_order.push(seq.to_string());
        by_seq.insert(seq, fact);
    }

    let mut vec_order: Vec<String> = Vec::new();
    if let Some(emb) = embedder {
        for (rowid, _rank) in vec_knn_ids(conn, "facts_vec", emb, query, limit.max(20)) {
            vec_order.push(rowid.to_string());
            if !by_seq.contains_key(&rowid) {
                if let Ok(fact) = conn.query_row(
                    "SELECT person_id, subject, content, category, evidence_quote,
                            last_accessed_at_ms, created_at_ms, id
                     FROM facts WHERE seq = ?1",
                    rusqlite::params![rowid],
                    |row| {
                        Ok(Fact {
                            person_id: row.get(0)?,
                            subject: row.get(1)?,
                            content: row.get(2)?,
                            category: row
                                .get::<_, Option<String>>(3)?
                                .and_then(|s| s.parse().ok()),
                            evidence_quote: row.get(4)?,
                            last_accessed_at_ms: row.get(5)?,
                            created_at_ms: row.get(6)?,
                            id: row.get(7)?,
                        })
                    },
                ) {
                    by_seq.insert(rowid, fact);
                }
            }
        }
    }

    let scores = rrf_merge(&fts_order, &vec_order, cfg.memory.rrf_k, cfg.memory.fts_weight, cfg.memory.vec_weight);

    let mut hits: Vec<SearchHit<Fact>> = scores
        .into_iter()
        .filter_map(|(seq_str, base_score)| {
            let seq: i64 = seq_str.parse().ok()?;
            let fact = by_seq.get(&seq)?.clone();
            let basis = fact.last_accessed_at_ms.unwrap_or(fact.created_at_ms);
            let age_ms = now_ms - basis;
            let score = base_score
                * recency_boost(age_ms, cfg.memory.recency_weight, cfg.memory.recency_half_life_days);
            Some(SearchHit { item: fact, score })
        })
        .collect();

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    Ok(hits)
}

pub fn hybrid_search_episodes(
    conn: &Connection,
    embedder: Option<&dyn Embedder>,
    query: &str,
    limit: usize,
    cfg: &AmicusConfig,
    now_ms: i64,
) -> Result<Vec<SearchHit<Episode>>> {
    let Some(match_str) = sanitize_fts_query(query) else {
        return Ok(Vec::new());
    };

    let mut stmt = conn.prepare(
        "SELECT e.seq, e.id, e.chat_id, e.person_id, e.is_group, e.content, e.created_at_ms
         FROM episodes e
         JOIN episodes_fts ON episodes_fts.rowid = e.seq
         WHERE episodes_fts MATCH ?1
         ORDER BY rank
         LIMIT 200",
    )?;
    let mut by_seq: HashMap<i64, Episode> = HashMap::new();
    let mut fts_order: Vec<String> = Vec::new();
    let rows = stmt.query_map(rusqlite::params![match_str], row_to_episode_with_seq)?;
    for row in rows.flatten() {
        let (seq, episode) = row;
        fts_order.push(seq.to_string());
        by_seq.insert(seq, episode);
    }

    let mut vec_order: Vec<String> = Vec::new();
    if let Some(emb) = embedder {
        for (rowid, _rank) in vec_knn_ids(conn, "episodes_vec", emb, query, limit.max(20)) {
            vec_order.push(rowid.to_string());
        }
    }

    let scores = rrf_merge(&fts_order, &vec_order, cfg.memory.rrf_k, cfg.memory.fts_weight, cfg.memory.vec_weight);

    let mut hits: Vec<SearchHit<Episode>> = scores
        .into_iter()
        .filter_map(|(seq_str, base_score)| {
            let seq: i64 = seq_str.parse().ok()?;
            let episode = by_seq.get(&seq)?.clone();
            let age_ms = now_ms - episode.created_at_ms;
            let score = base_score
                * recency_boost(age_ms, cfg.memory.recency_weight, cfg.memory.recency_half_life_days);
            Some(SearchHit { item: episode, score })
        })
        .collect();

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    Ok(hits)
}

fn row_to_fact_with_seq(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, Fact)> {
    let seq: i64 = row.get(0)?;
    let fact = Fact {
        id: row.get(1)?,
        person_id: row.get(2)?,
        subject: row.get(3)?,
        content: row.get(4)?,
        category: row.get::<_, Option<String>>(5)?.and_then(|s| s.parse().ok()),
        evidence_quote: row.get(6)?,
        last_accessed_at_ms: row.get(7)?,
        created_at_ms: row.get(8)?,
    };
    Ok((seq, fact))
}

fn row_to_episode_with_seq(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, Episode)> {
    let seq: i64 = row.get(0)?;
    let episode = Episode {
        id: row.get(1)?,
        chat_id: row.get(2)?,
        person_id: row.get(3)?,
        is_group: row.get::<_, Option<i64>>(4)?.map(|v| v != 0),
        content: row.get(5)?,
        created_at_ms: row.get(6)?,
    };
    Ok((seq, episode))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_rejects_non_alnum_and_short_tokens() {
        let s = sanitize_fts_query("a! b?? hello-world \"; DROP TABLE x --").unwrap();
        assert!(!s.contains(';'));
        assert!(!s.contains("DROP"));
        for token in s.split(" OR ") {
            let inner = token.trim_matches('"');
            assert!(inner.len() >= 2);
            assert!(inner.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn sanitize_caps_at_ten_tokens_and_dedupes() {
        let text = (0..20).map(|i| format!("tok{i} tok{i}")).collect::<Vec<_>>().join(" ");
        let s = sanitize_fts_query(&text).unwrap();
        assert_eq!(s.split(" OR ").count(), 10);
    }

    #[test]
    fn sanitize_returns_none_for_all_short_tokens() {
        assert!(sanitize_fts_query("a b c ! ?").is_none());
    }

    #[test]
    fn recency_boost_decays_with_age() {
        let fresh = recency_boost(0, 0.2, 30.0);
        let old = recency_boost(60 * 24 * 60 * 60 * 1000, 0.2, 30.0);
        assert!(fresh > old);
        assert!(fresh <= 1.2 + 1e-9);
    }
}
