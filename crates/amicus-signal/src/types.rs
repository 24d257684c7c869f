//! Wire types for `signal-cli`'s JSON envelope format, as returned by the
//! `receive` JSON-RPC method.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiveEnvelope {
    pub envelope: Envelope,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub source: String,
    #[serde(rename = "sourceName")]
    pub source_name: Option<String>,
    pub timestamp: i64,
    #[serde(rename = "dataMessage")]
    pub data_message: Option<DataMessage>,
    #[serde(rename = "receiptMessage")]
    pub receipt_message: Option<serde_json::Value>,
    #[serde(rename = "typingMessage")]
    pub typing_message: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataMessage {
    pub message: Option<String>,
    #[serde(rename = "groupInfo")]
    pub group_info: Option<GroupInfo>,
    #[serde(default)]
    pub attachments: Vec<SignalAttachment>,
    #[serde(default)]
    pub mentions: Vec<Mention>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupInfo {
    #[serde(rename = "groupId")]
    pub group_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Mention {
    pub uuid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalAttachment {
    pub id: String,
    #[serde(rename = "contentType")]
    pub content_type: Option<String>,
    pub size: Option<u64>,
}
