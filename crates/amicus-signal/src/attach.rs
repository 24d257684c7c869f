//! Inbound attachment metadata for the Signal adapter.
//!
//! Mirrors `amicus-telegram/src/attach.rs`: the turn engine only ever sees
//! `Attachment` metadata, never bytes. `signal-cli` reports attachment
//! content type and size up front, so no download is needed to enforce
//! a size limit.

use amicus_core::{Attachment, AttachmentKind};

use crate::types::SignalAttachment;

pub fn extract_attachments(attachments: &[SignalAttachment]) -> Vec<Attachment> {
    attachments
        .iter()
        .map(|a| Attachment {
            id: a.id.clone(),
            kind: classify(a.content_type.as_deref()),
            mime: a.content_type.clone(),
            size_bytes: a.size,
        })
        .collect()
}

fn classify(mime: Option<&str>) -> AttachmentKind {
    match mime {
        Some(m) if m.starts_with("image/") => AttachmentKind::Image,
        Some(m) if m.starts_with("audio/") => AttachmentKind::Audio,
        Some(m) if m.starts_with("video/") => AttachmentKind::Video,
        _ => AttachmentKind::File,
    }
}

/// Drop attachments whose declared size exceeds `max_bytes`.
pub fn enforce_size_limit(attachments: Vec<Attachment>, max_bytes: u64) -> Vec<Attachment> {
    attachments
        .into_iter()
        .filter(|a| a.size_bytes.map(|s| s <= max_bytes).unwrap_or(true))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_mime() {
        let attachments = vec![
            SignalAttachment { id: "a".into(), content_type: Some("image/png".into()), size: Some(10) },
            SignalAttachment { id: "b".into(), content_type: Some("audio/ogg".into()), size: Some(10) },
            SignalAttachment { id: "c".into(), content_type: None, size: None },
        ];
        let out = extract_attachments(&attachments);
        assert_eq!(out[0].kind, AttachmentKind::Image);
        assert_eq!(out[1].kind, AttachmentKind::Audio);
        assert_eq!(out[2].kind, AttachmentKind::File);
    }

    #[test]
    fn enforce_size_limit_drops_oversized() {
        let attachments = vec![
            Attachment { id: "a".into(), kind: AttachmentKind::Image, mime: None, size_bytes: Some(100) },
            Attachment { id: "b".into(), kind: AttachmentKind::Image, mime: None, size_bytes: Some(1_000_000) },
        ];
        let kept = enforce_size_limit(attachments, 500);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "a");
    }
}
