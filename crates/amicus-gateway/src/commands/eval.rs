//! `eval` (§6.1, §6.3): a fixed battery of scenario checks run against a
//! scratch copy of the stores and a [`ScriptedBackend`] double, so the
//! harness neither calls a live model nor requires one to be configured.
//! Exercises the turn engine's own gating logic end to end, the way the
//! spec's example scenarios describe it.

use std::sync::Arc;

use amicus_agent::context::ContextBuilder;
use amicus_agent::prompt::PromptBuilder;
use amicus_agent::{LLMBackend, ScriptedBackend, TurnGenerator};
use amicus_core::config::AmicusConfig;
use amicus_core::{AmicusError, Channel, ChatId, IncomingMessage, Mentioned, MessageId, OutgoingAction, Result};
use amicus_memory::manager::MemoryManager;
use amicus_turn::engine::TurnEngine;
use amicus_turn::proactive::{ProactiveKind, ProactiveTrigger};
use serde::Serialize;

use crate::wiring;

#[derive(Serialize)]
struct ScenarioOutcome {
    name: &'static str,
    passed: bool,
    detail: String,
}

pub async fn run(config_path: Option<&str>, json: bool) -> Result<()> {
    let mut cfg = wiring::load_config(config_path)?;
    let scratch = tempfile::tempdir().map_err(AmicusError::Io)?;
    cfg.data_dir = Some(scratch.path().to_string_lossy().to_string());

    let mut outcomes = Vec::new();
    outcomes.push(scenario_dm_greeting(&cfg).await?);
    outcomes.push(scenario_group_not_mentioned(&cfg).await?);
    outcomes.push(scenario_duplicate_message(&cfg).await?);
    outcomes.push(scenario_rapid_messages_coalesce(&cfg).await?);
    outcomes.push(scenario_slop_exhausted(&cfg).await?);
    outcomes.push(scenario_proactive_sleep_precedes_trust_gate(&cfg).await?);

    let all_passed = outcomes.iter().all(|o| o.passed);

    if json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    } else {
        for o in &outcomes {
            let mark = if o.passed { "PASS" } else { "FAIL" };
            println!("[{mark}] {} — {}", o.name, o.detail);
        }
        println!(
            "\n{}/{} scenarios passed",
            outcomes.iter().filter(|o| o.passed).count(),
            outcomes.len()
        );
    }

    if !all_passed {
        return Err(AmicusError::Internal("one or more eval scenarios failed".into()));
    }
    Ok(())
}

struct Harness {
    cfg: Arc<AmicusConfig>,
    memory: Arc<MemoryManager>,
    engine: TurnEngine,
    generator: Arc<TurnGenerator>,
}

async fn build_harness(cfg: &AmicusConfig, backend: Arc<dyn LLMBackend>) -> Result<Harness> {
    let stores = wiring::open_stores(cfg.clone())?;
    let prompt = PromptBuilder::load(stores.cfg.agent.soul_path.as_deref(), Some(&stores.data_dir));
    let context = ContextBuilder::new(Arc::clone(&stores.memory), Arc::clone(&stores.sessions), prompt);
    let generator = Arc::new(TurnGenerator::new(
        Arc::clone(&stores.cfg),
        backend,
        Arc::clone(&stores.memory),
        Arc::clone(&stores.sessions),
        Arc::clone(&stores.scheduler),
        context,
    ));
    let engine = TurnEngine::new(&stores.cfg);
    Ok(Harness { cfg: stores.cfg, memory: stores.memory, engine, generator })
}

/// Same stack as [`build_harness`], unpacked into its two moving parts for
/// scenarios that need to hand the engine around independently (wrapped in
/// an `Arc` for concurrent tasks, or driven directly).
async fn build_generator(cfg: &AmicusConfig, backend: Arc<dyn LLMBackend>) -> Result<(TurnEngine, Arc<TurnGenerator>)> {
    let h = build_harness(cfg, backend).await?;
    Ok((h.engine, h.generator))
}

fn dm(chat_id: &str, message_id: &str, text: &str, ts_ms: i64) -> IncomingMessage {
    IncomingMessage {
        channel: Channel::Cli,
        chat_id: ChatId::from(chat_id),
        message_id: MessageId::from(message_id),
        author_id: "user1".to_string(),
        author_display_name: Some("User One".to_string()),
        text: text.to_string(),
        attachments: Vec::new(),
        is_group: false,
        is_operator: false,
        mentioned: Mentioned::Yes,
        timestamp_ms: ts_ms,
    }
}

async fn scenario_dm_greeting(cfg: &AmicusConfig) -> Result<ScenarioOutcome> {
    let backend: Arc<dyn LLMBackend> = Arc::new(ScriptedBackend::repeating("hey! good to hear from you."));
    let h = build_harness(cfg, backend).await?;

    let outcome = h
        .engine
        .process(dm("eval:dm-greeting", "m1", "hi", 1_000), &h.cfg, &h.memory, h.generator.as_ref())
        .await;

    let (passed, detail) = match outcome {
        Some(Ok(OutgoingAction::SendText { text, .. })) => (true, format!("sent: {text:?}")),
        other => (false, format!("expected send_text, got {other:?}")),
    };
    Ok(ScenarioOutcome { name: "dm_greeting_sends_text", passed, detail })
}

fn group_msg(chat_id: &str, message_id: &str, text: &str, ts_ms: i64) -> IncomingMessage {
    IncomingMessage {
        channel: Channel::Telegram,
        chat_id: ChatId::from(chat_id),
        message_id: MessageId::from(message_id),
        author_id: "user2".to_string(),
        author_display_name: Some("User Two".to_string()),
        text: text.to_string(),
        attachments: Vec::new(),
        is_group: true,
        is_operator: false,
        mentioned: Mentioned::No,
        timestamp_ms: ts_ms,
    }
}

async fn scenario_group_not_mentioned(cfg: &AmicusConfig) -> Result<ScenarioOutcome> {
    let backend: Arc<dyn LLMBackend> = Arc::new(ScriptedBackend::repeating("should never be sent"));
    let h = build_harness(cfg, backend).await?;

    let outcome = h
        .engine
        .process(group_msg("eval:group-quiet", "m1", "anyone seen the new episode?", 1_000), &h.cfg, &h.memory, h.generator.as_ref())
        .await;

    let (passed, detail) = match outcome {
        Some(Ok(OutgoingAction::Silence { reason })) if reason == "not_mentioned" => {
            (true, "silenced with not_mentioned".to_string())
        }
        other => (false, format!("expected silence(not_mentioned), got {other:?}")),
    };
    Ok(ScenarioOutcome { name: "group_message_without_mention_silences", passed, detail })
}

async fn scenario_duplicate_message(cfg: &AmicusConfig) -> Result<ScenarioOutcome> {
    let backend: Arc<dyn LLMBackend> = Arc::new(ScriptedBackend::repeating("first reply"));
    let h = build_harness(cfg, backend).await?;

    let first = h
        .engine
        .process(dm("eval:dup", "shared-id", "hi", 1_000), &h.cfg, &h.memory, h.generator.as_ref())
        .await;
    let second = h
        .engine
        .process(dm("eval:dup", "shared-id", "hi", 1_050), &h.cfg, &h.memory, h.generator.as_ref())
        .await;

    let first_ok = matches!(first, Some(Ok(OutgoingAction::SendText { .. })));
    let (passed, detail) = match second {
        Some(Ok(OutgoingAction::Silence { reason })) if first_ok && reason == "duplicate_message" => {
            (true, "second delivery silenced with duplicate_message".to_string())
        }
        other => (false, format!("first_ok={first_ok}, second={other:?}")),
    };
    Ok(ScenarioOutcome { name: "duplicate_message_id_silences_second_delivery", passed, detail })
}

async fn scenario_rapid_messages_coalesce(cfg: &AmicusConfig) -> Result<ScenarioOutcome> {
    let backend = Arc::new(ScriptedBackend::repeating("got all three, replying once"));
    let backend_dyn: Arc<dyn LLMBackend> = backend.clone();
    let (engine, generator) = build_generator(cfg, backend_dyn).await?;
    let stores = wiring::open_stores(cfg.clone())?;
    let engine = Arc::new(engine);

    let chat_id = "eval:rapid";
    let mut handles = Vec::new();
    for (i, text) in ["one", "two", "three"].iter().enumerate() {
        let engine = Arc::clone(&engine);
        let generator = Arc::clone(&generator);
        let cfg = stores.cfg.clone();
        let memory = Arc::clone(&stores.memory);
        let msg = dm(chat_id, &format!("m{i}"), text, 1_000 + i as i64 * 10);
        handles.push(tokio::spawn(async move {
            engine.process(msg, &cfg, &memory, generator.as_ref()).await
        }));
    }

    let mut sends = 0usize;
    for h in handles {
        if let Ok(Some(Ok(OutgoingAction::SendText { .. }))) = h.await {
            sends += 1;
        }
    }

    let calls = backend.call_count();
    let passed = sends == 1 && calls == 1;
    Ok(ScenarioOutcome {
        name: "rapid_messages_coalesce_into_one_generate_call",
        passed,
        detail: format!("{sends} send(s) returned, {calls} backend call(s)"),
    })
}

async fn scenario_slop_exhausted(cfg: &AmicusConfig) -> Result<ScenarioOutcome> {
    // Trips the "assistant_energy" slop category on every attempt, so the
    // regen loop exhausts its budget and silences instead of ever sending it.
    let slop_text = "As an AI, I don't have personal feelings, but let me know if there's anything else!";
    let backend: Arc<dyn LLMBackend> = Arc::new(ScriptedBackend::repeating(slop_text));
    let (engine, generator) = build_generator(cfg, backend).await?;
    let stores = wiring::open_stores(cfg.clone())?;

    let outcome = engine
        .process(dm("eval:slop", "m1", "how's it going", 1_000), &stores.cfg, &stores.memory, generator.as_ref())
        .await;

    let (passed, detail) = match outcome {
        Some(Ok(OutgoingAction::Silence { reason })) if reason == "slop_unresolved" => {
            (true, "silenced with slop_unresolved after regen budget ran out".to_string())
        }
        other => (false, format!("expected silence(slop_unresolved), got {other:?}")),
    };
    Ok(ScenarioOutcome { name: "persistent_slop_exhausts_regen_budget", passed, detail })
}

/// §8 scenario 6: "sleep check precedes trust gate for non-operators." A
/// `CheckIn` trigger (not exempt from the new-contact safe mode, unlike
/// `Reminder`/`Birthday`) aimed at an unknown recipient would silence as
/// `proactive_safe_mode` if the trust gate ran first; routed through the
/// real `process_proactive` with the sleep window forced open for the
/// whole day, it must come back `sleep_mode` instead.
async fn scenario_proactive_sleep_precedes_trust_gate(cfg: &AmicusConfig) -> Result<ScenarioOutcome> {
    let mut cfg = cfg.clone();
    cfg.behavior.sleep.enabled = true;
    cfg.behavior.sleep.start_local = "00:00".to_string();
    cfg.behavior.sleep.end_local = "23:59".to_string();
    cfg.behavior.sleep.timezone = "UTC".to_string();

    let backend: Arc<dyn LLMBackend> = Arc::new(ScriptedBackend::repeating("should never be sent"));
    let (engine, generator) = build_generator(&cfg, backend).await?;
    let stores = wiring::open_stores(cfg.clone())?;

    let trigger = ProactiveTrigger {
        chat_id: ChatId::from("eval:proactive-sleep"),
        kind: ProactiveKind::CheckIn,
        recipient_channel: Some("signal".to_string()),
        recipient_user_id: Some("+15550000000".to_string()),
        payload: serde_json::Value::Null,
    };

    let outcome = engine
        .process_proactive(
            ChatId::from("eval:proactive-sleep"),
            &stores.cfg,
            &stores.memory,
            generator.as_ref(),
            trigger,
            false,
        )
        .await;

    let (passed, detail) = match outcome {
        Ok(OutgoingAction::Silence { reason }) if reason == "sleep_mode" => {
            (true, "silenced with sleep_mode ahead of the new-contact safe-mode gate".to_string())
        }
        other => (false, format!("expected silence(sleep_mode), got {other:?}")),
    };
    Ok(ScenarioOutcome { name: "proactive_sleep_check_precedes_trust_gate", passed, detail })
}
