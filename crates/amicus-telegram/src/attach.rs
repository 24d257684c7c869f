//! Inbound attachment metadata for the Telegram adapter.
//!
//! The turn engine only ever sees `Attachment` metadata (§ core data model) —
//! fetching bytes, if a tool ever needs them, happens lazily and out of band.
//! This module never touches the network; it just reads what teloxide
//! already parsed out of the update.

use amicus_core::{Attachment, AttachmentKind};
use teloxide::prelude::*;

/// Extract attachment metadata from a Telegram message.
///
/// Returns an empty vec for text-only messages. A message with more than one
/// media item (Telegram only ever attaches one kind per message, plus
/// multiple photo sizes) yields a single `Attachment` for the richest item.
pub fn extract_attachments(msg: &Message) -> Vec<Attachment> {
    if let Some(photos) = msg.photo() {
        if let Some(photo) = photos.last() {
            return vec![Attachment {
                id: photo.file.id.clone(),
                kind: AttachmentKind::Image,
                mime: Some("image/jpeg".to_string()),
                size_bytes: Some(photo.file.size as u64),
            }];
        }
    }

    if let Some(doc) = msg.document() {
        let mime = doc.mime_type.as_ref().map(|m| m.to_string());
        let kind = match mime.as_deref() {
            Some(m) if m.starts_with("image/") => AttachmentKind::Image,
            Some(m) if m.starts_with("audio/") => AttachmentKind::Audio,
            Some(m) if m.starts_with("video/") => AttachmentKind::Video,
            _ => AttachmentKind::File,
        };
        return vec![Attachment {
            id: doc.file.id.clone(),
            kind,
            mime,
            size_bytes: Some(doc.file.size as u64),
        }];
    }

    if let Some(video) = msg.video() {
        return vec![Attachment {
            id: video.file.id.clone(),
            kind: AttachmentKind::Video,
            mime: video.mime_type.as_ref().map(|m| m.to_string()),
            size_bytes: Some(video.file.size as u64),
        }];
    }

    if let Some(audio) = msg.audio() {
        return vec![Attachment {
            id: audio.file.id.clone(),
            kind: AttachmentKind::Audio,
            mime: audio.mime_type.as_ref().map(|m| m.to_string()),
            size_bytes: Some(audio.file.size as u64),
        }];
    }

    if let Some(voice) = msg.voice() {
        return vec![Attachment {
            id: voice.file.id.clone(),
            kind: AttachmentKind::Audio,
            mime: voice.mime_type.as_ref().map(|m| m.to_string()).or_else(|| Some("audio/ogg".into())),
            size_bytes: Some(voice.file.size as u64),
        }];
    }

    if let Some(sticker) = msg.sticker() {
        return vec![Attachment {
            id: sticker.file.id.clone(),
            kind: AttachmentKind::Image,
            mime: Some("image/webp".to_string()),
            size_bytes: Some(sticker.file.size as u64),
        }];
    }

    Vec::new()
}

/// Drop attachments whose declared size exceeds `max_bytes`. Telegram
/// reports size up front, so this never needs a download to enforce.
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
    fn enforce_size_limit_drops_oversized() {
        let attachments = vec![
            Attachment { id: "a".into(), kind: AttachmentKind::Image, mime: None, size_bytes: Some(100) },
            Attachment { id: "b".into(), kind: AttachmentKind::Image, mime: None, size_bytes: Some(1_000_000) },
        ];
        let kept = enforce_size_limit(attachments, 500);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "a");
    }

    #[test]
    fn enforce_size_limit_keeps_unknown_size() {
        let attachments = vec![Attachment { id: "a".into(), kind: AttachmentKind::File, mime: None, size_bytes: None }];
        let kept = enforce_size_limit(attachments, 1);
        assert_eq!(kept.len(), 1);
    }
}
