//! `chat` (§4.J/K, §6.1): the operator CLI channel. Reads stdin lines,
//! wraps each as an `IncomingMessage { channel: Cli, is_operator: true, .. }`,
//! and prints the resulting `OutgoingAction` — the same `Generator` seam
//! every other channel adapter drives, so the turn engine cannot tell this
//! apart from Signal/Telegram except via `is_operator`.

use std::io::{self, BufRead, Write};

use amicus_core::{Channel, ChatId, IncomingMessage, Mentioned, MessageId, OutgoingAction, Result};
use amicus_turn::engine::TurnEngine;

use crate::wiring;

pub async fn run(config_path: Option<&str>) -> Result<()> {
    let cfg = wiring::load_config(config_path)?;
    let runtime = wiring::build_runtime(cfg)?;
    let engine = TurnEngine::new(&runtime.stores.cfg);
    let chat_id = ChatId::from("cli:operator");

    println!("amicus chat — type a message, Ctrl-D to exit.");
    let stdin = io::stdin();
    let mut line = String::new();

    loop {
        print!("> ");
        io::stdout().flush().ok();
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let text = line.trim_end();
        if text.is_empty() {
            continue;
        }

        let incoming = IncomingMessage {
            channel: Channel::Cli,
            chat_id: chat_id.clone(),
            message_id: MessageId::new(),
            author_id: "operator".to_string(),
            author_display_name: Some("operator".to_string()),
            text: text.to_string(),
            attachments: Vec::new(),
            is_group: false,
            is_operator: true,
            mentioned: Mentioned::Yes,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        };

        let outcome = engine
            .process(incoming, &runtime.stores.cfg, &runtime.stores.memory, runtime.generator.as_ref())
            .await;

        match outcome {
            None => {}
            Some(Ok(OutgoingAction::SendText { text, .. })) => println!("{text}"),
            Some(Ok(OutgoingAction::React { emoji, .. })) => println!("[reacts: {emoji}]"),
            Some(Ok(OutgoingAction::Silence { reason })) => println!("[silent: {reason}]"),
            Some(Err(e)) => println!("[error: {e}]"),
        }
    }

    Ok(())
}
