//! Signal typing indicator — `sendTyping` every 8 seconds (signal-cli's own
//! typing indicator expires client-side after ~15s, so an 8s refresh keeps
//! margin without spamming the RPC endpoint).

use std::sync::Arc;
use std::time::Duration;

use amicus_core::ChatId;

use crate::rpc::RpcClient;

pub struct TypingHandle(tokio::task::JoinHandle<()>);

impl TypingHandle {
    pub fn start(rpc: Arc<RpcClient>, account: String, chat_id: ChatId) -> Self {
        let handle = tokio::spawn(async move {
            let (recipient, group_id) = split_target(&chat_id);
            loop {
                let mut params = serde_json::json!({ "account": account });
                if let Some(ref r) = recipient {
                    params["recipient"] = serde_json::json!([r]);
                }
                if let Some(ref g) = group_id {
                    params["groupId"] = serde_json::json!(g);
                }
                let _ = rpc.call::<serde_json::Value>("sendTyping", params).await;
                tokio::time::sleep(Duration::from_secs(8)).await;
            }
        });
        TypingHandle(handle)
    }

    pub fn stop(self) {
        self.0.abort();
    }
}

fn split_target(chat_id: &ChatId) -> (Option<String>, Option<String>) {
    let s = chat_id.as_str();
    if let Some(number) = s.strip_prefix("signal:dm:") {
        (Some(number.to_string()), None)
    } else if let Some(group_id) = s.strip_prefix("signal:group:") {
        (None, Some(group_id.to_string()))
    } else {
        (None, None)
    }
}
