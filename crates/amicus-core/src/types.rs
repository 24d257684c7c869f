use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

/// Identifies one chat (DM or group) on some channel. Not comparable across
/// channels by value alone — the channel adapter is responsible for making
/// the string globally unique (e.g. `"signal:dm:+123"`, `"telegram:g:-100"`).
opaque_id!(ChatId);
/// Identifies one inbound message, scoped to a `ChatId`.
opaque_id!(MessageId);
/// Stable identity for a `(channel, channelUserId)` pair.
opaque_id!(PersonId);
opaque_id!(FactId);
opaque_id!(EpisodeId);
opaque_id!(LessonId);
/// The single running agent instance. Distinct from `PersonId` — the agent
/// is never a `Person` row.
opaque_id!(AgentId);

impl AgentId {
    pub fn main() -> Self {
        Self("main".to_string())
    }
}

/// Which chat channel a message arrived on / an action is sent over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Signal,
    Telegram,
    Cli,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Signal => write!(f, "signal"),
            Channel::Telegram => write!(f, "telegram"),
            Channel::Cli => write!(f, "cli"),
        }
    }
}

/// Three-valued "was the bot addressed directly" signal. Plain `Option<bool>`
/// would conflate "checked and no" with "never checked" — callers here must
/// match all three arms explicitly (§4.D treats only `No` as "not mentioned").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mentioned {
    Yes,
    No,
    Unknown,
}

impl Mentioned {
    pub fn or(self, other: Mentioned) -> Mentioned {
        use Mentioned::*;
        match (self, other) {
            (Yes, _) | (_, Yes) => Yes,
            (No, No) => No,
            (No, Unknown) | (Unknown, No) => No,
            (Unknown, Unknown) => Unknown,
        }
    }

    pub fn is_explicitly_no(self) -> bool {
        matches!(self, Mentioned::No)
    }

    pub fn is_yes(self) -> bool {
        matches!(self, Mentioned::Yes)
    }
}

/// One attachment on an inbound message. Fetching bytes is left to the
/// channel adapter; the core only sees metadata unless a tool explicitly
/// asks for bytes via `ToolContext`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub kind: AttachmentKind,
    pub mime: Option<String>,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Audio,
    Video,
    File,
}

/// An inbound delivery from a channel adapter. Ephemeral — never persisted
/// verbatim; the turn engine derives session rows and episodes from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub channel: Channel,
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub author_id: String,
    pub author_display_name: Option<String>,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub is_group: bool,
    pub is_operator: bool,
    pub mentioned: Mentioned,
    /// Channel-supplied timestamp; the canonical ordering key for this turn.
    pub timestamp_ms: i64,
}

impl IncomingMessage {
    /// `userText` per §4.J step 5: trimmed text plus a summary of any
    /// attachments, used both for the empty-input check and as the literal
    /// text shown to the model.
    pub fn user_text(&self) -> String {
        let trimmed = self.text.trim();
        if self.attachments.is_empty() {
            return trimmed.to_string();
        }
        let summary = self
            .attachments
            .iter()
            .map(|a| format!("[attachment:{:?}]", a.kind))
            .collect::<Vec<_>>()
            .join(" ");
        if trimmed.is_empty() {
            summary
        } else {
            format!("{trimmed} {summary}")
        }
    }
}

/// What the turn engine hands back to the channel adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutgoingAction {
    Silence {
        reason: String,
    },
    SendText {
        text: String,
        media: Option<String>,
        tts_hint: Option<bool>,
    },
    React {
        emoji: String,
        target_author_id: String,
        target_timestamp_ms: i64,
    },
}

impl OutgoingAction {
    pub fn silence(reason: impl Into<String>) -> Self {
        OutgoingAction::Silence {
            reason: reason.into(),
        }
    }

    pub fn is_silence(&self) -> bool {
        matches!(self, OutgoingAction::Silence { .. })
    }
}

/// Derived (never stored) trust category gating proactive behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    NewContact,
    GettingToKnow,
    CloseFriend,
}

impl fmt::Display for TrustTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustTier::NewContact => write!(f, "new_contact"),
            TrustTier::GettingToKnow => write!(f, "getting_to_know"),
            TrustTier::CloseFriend => write!(f, "close_friend"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mentioned_or_prefers_yes() {
        assert!(Mentioned::Unknown.or(Mentioned::Yes).is_yes());
        assert!(Mentioned::No.or(Mentioned::Yes).is_yes());
    }

    #[test]
    fn mentioned_or_no_dominates_unknown() {
        assert!(Mentioned::No.or(Mentioned::Unknown).is_explicitly_no());
        assert!(Mentioned::Unknown.or(Mentioned::No).is_explicitly_no());
    }

    #[test]
    fn user_text_appends_attachment_summary() {
        let msg = IncomingMessage {
            channel: Channel::Signal,
            chat_id: ChatId::from("c1"),
            message_id: MessageId::from("m1"),
            author_id: "a1".into(),
            author_display_name: None,
            text: "  look  ".into(),
            attachments: vec![Attachment {
                id: "att1".into(),
                kind: AttachmentKind::Image,
                mime: Some("image/png".into()),
                size_bytes: Some(1024),
            }],
            is_group: false,
            is_operator: false,
            mentioned: Mentioned::Unknown,
            timestamp_ms: 0,
        };
        assert_eq!(msg.user_text(), "look [attachment:Image]");
    }

    #[test]
    fn ids_are_time_sortable() {
        let a = ChatId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = ChatId::new();
        assert!(a.as_str() < b.as_str());
    }
}
