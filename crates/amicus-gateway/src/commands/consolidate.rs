//! `consolidate` (§6.1): drains both dirty-claim queues once — claim,
//! regenerate capsule text via the fast LLM backend, complete — for
//! operators who don't want to wait for the background interval.

use std::sync::Arc;

use amicus_agent::backend::{BackendMessage, BackendRole, CompleteRequest, LLMBackend};
use amicus_core::Result;
use tokio_util::sync::CancellationToken;

use crate::wiring;

/// How many dirty rows to claim per pass. Matches the group-size cap the
/// turn engine itself uses as a sane per-tick upper bound.
const CLAIM_LIMIT: usize = 50;
/// Lease duration — long enough that a crash mid-regeneration doesn't
/// starve the row forever, short enough that a stuck claim self-heals fast.
const LEASE_MS: i64 = 60_000;

pub async fn run(config_path: Option<&str>) -> Result<()> {
    let cfg = wiring::load_config(config_path)?;
    let runtime = wiring::build_runtime(cfg)?;
    let memory = Arc::clone(&runtime.stores.memory);
    let backend = wiring::build_backend(&runtime.stores.cfg)?;

    let now_ms = chrono::Utc::now().timestamp_millis();

    let group_rows = memory.claim_group_capsule_dirty(now_ms, LEASE_MS, CLAIM_LIMIT)?;
    let mut group_done = 0usize;
    for row in &group_rows {
        let episodes = memory.recent_episodes_for_chat(&row.key, 40)?;
        if episodes.is_empty() {
            memory.complete_group_capsule_dirty(&row.key, row.claimed_at_ms.unwrap_or(now_ms))?;
            continue;
        }
        let transcript = episodes
            .iter()
            .rev()
            .map(|e| e.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let capsule = summarize(
            &backend,
            "Summarize this group chat's ongoing topics, running jokes, and group dynamics \
             in 3-5 sentences, for an AI participant's own memory.",
            &transcript,
        )
        .await?;
        memory.set_group_capsule(&row.key, &capsule, now_ms)?;
        memory.complete_group_capsule_dirty(&row.key, row.claimed_at_ms.unwrap_or(now_ms))?;
        group_done += 1;
    }

    let style_rows = memory.claim_public_style_dirty(now_ms, LEASE_MS, CLAIM_LIMIT)?;
    let mut style_done = 0usize;
    for row in &style_rows {
        let Some(person) = memory.get_person(&row.key)? else {
            memory.complete_public_style_dirty(&row.key, row.claimed_at_ms.unwrap_or(now_ms))?;
            continue;
        };
        let material = format!(
            "display_name: {:?}\nconcerns: {:?}\ngoals: {:?}\npreferences: {:?}\nlast_mood: {:?}",
            person.display_name, person.current_concerns, person.goals,
            person.preferences, person.last_mood_signal
        );
        let capsule = summarize(
            &backend,
            "Write a short third-person style note describing how to talk to this person \
             publicly (tone, topics to avoid, topics they enjoy) in 2-3 sentences.",
            &material,
        )
        .await?;
        memory.set_public_style_capsule(&person.id, &capsule, now_ms)?;
        memory.complete_public_style_dirty(&row.key, row.claimed_at_ms.unwrap_or(now_ms))?;
        style_done += 1;
    }

    println!("group capsules: {group_done}/{} regenerated", group_rows.len());
    println!("public styles:  {style_done}/{} regenerated", style_rows.len());
    Ok(())
}

async fn summarize(backend: &Arc<dyn LLMBackend>, system: &str, material: &str) -> Result<String> {
    let req = CompleteRequest {
        role: BackendRole::Fast,
        system: system.to_string(),
        messages: vec![BackendMessage::text("user", material)],
        tools: Vec::new(),
        max_steps: 1,
        max_tokens: 400,
    };
    let signal = CancellationToken::new();
    let resp = backend.complete(req, None, &signal).await?;
    Ok(resp.text)
}
