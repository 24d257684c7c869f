use amicus_core::{ChatId, OutgoingAction};
use amicus_scheduler::Job;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TurnError};

/// The payload stored in a scheduler `Job.action` for an agent-initiated
/// send. `amicus-scheduler` only knows how to persist and fire an opaque
/// string; this is the schema the turn engine gives that string (§4.K).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveTrigger {
    pub chat_id: ChatId,
    pub kind: ProactiveKind,
    /// Channel + channel-user-id of the recipient, when known — used to
    /// resolve trust tier for the safe-mode/warming-throttle gates (§4.K.2).
    /// `None` for group-chat triggers with no single addressee.
    #[serde(default)]
    pub recipient_channel: Option<String>,
    #[serde(default)]
    pub recipient_user_id: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProactiveKind {
    /// A user-requested reminder fired through the `reminder` tool.
    Reminder,
    /// An agent-initiated check-in with no explicit user request behind it.
    CheckIn,
    /// A birthday-triggered message — exempt from the new-contact safe mode
    /// alongside `Reminder` (§4.K.2).
    Birthday,
}

impl ProactiveTrigger {
    pub fn from_job(job: &Job) -> Result<Self> {
        serde_json::from_str(&job.action)
            .map_err(|e| TurnError::Aborted(format!("malformed proactive job action: {e}")))
    }

    pub fn to_job_action(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| TurnError::Aborted(e.to_string()))
    }
}

/// Produces the outgoing send for a fired proactive trigger. Implemented by
/// the generation loop the same way `Generator` is, but proactive sends have
/// no inbound message to ground the prompt in — only the trigger's own kind
/// and payload plus whatever memory context the implementation pulls in.
#[async_trait]
pub trait ProactiveGenerator: Send + Sync {
    async fn generate(&self, trigger: ProactiveTrigger) -> amicus_core::Result<OutgoingAction>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_round_trips_through_job_action_string() {
        let trigger = ProactiveTrigger {
            chat_id: ChatId::from("c1"),
            kind: ProactiveKind::Reminder,
            recipient_channel: Some("signal".into()),
            recipient_user_id: Some("+1".into()),
            payload: serde_json::json!({"text": "call the dentist"}),
        };
        let encoded = trigger.to_job_action().unwrap();
        let job = Job {
            id: "j1".into(),
            name: "reminder".into(),
            schedule: amicus_scheduler::Schedule::Once { at: chrono::Utc::now() },
            action: encoded,
            status: amicus_scheduler::JobStatus::Pending,
            last_run: None,
            next_run: None,
            run_count: 0,
            max_runs: Some(1),
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        };
        let decoded = ProactiveTrigger::from_job(&job).unwrap();
        assert_eq!(decoded.chat_id, trigger.chat_id);
        assert_eq!(decoded.kind, trigger.kind);
    }
}
