use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::warn;

/// First 10 hex chars of SHA-256(id) — directory-sharding key for the
/// human-editable markdown mirror (§6.3).
fn shard(id: &str) -> String {
    let digest = Sha256::digest(id.as_bytes());
    hex::encode(digest)[..10].to_string()
}

fn mirror_path(data_dir: &Path, kind: &str, id: &str) -> PathBuf {
    data_dir.join("md").join(kind).join(format!("{}.md", shard(id)))
}

/// Legacy flat-name mirror file (pre-sharding), migrated lazily on first write.
fn legacy_path(data_dir: &Path, kind: &str, id: &str) -> PathBuf {
    data_dir.join("md").join(kind).join(format!("{id}.md"))
}

/// Regenerates the markdown mirror for a person capsule. Best-effort: any
/// I/O failure is logged and never surfaced (§9 open question).
pub fn write_person_capsule(data_dir: &Path, person_id: &str, display_name: &str, capsule: &str) {
    write_mirror(data_dir, "people", person_id, &format!("# {display_name}\n\n{capsule}\n"));
}

pub fn write_group_capsule(data_dir: &Path, chat_id: &str, capsule: &str) {
    write_mirror(data_dir, "groups", chat_id, &format!("# {chat_id}\n\n{capsule}\n"));
}

fn write_mirror(data_dir: &Path, kind: &str, id: &str, body: &str) {
    let path = mirror_path(data_dir, kind, id);
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(error = %e, ?path, "failed to create markdown mirror directory");
            return;
        }
    }

    let legacy = legacy_path(data_dir, kind, id);
    if legacy != path && legacy.exists() {
        if let Err(e) = std::fs::remove_file(&legacy) {
            warn!(error = %e, ?legacy, "failed to remove legacy flat-name mirror file");
        }
    }

    if let Err(e) = std::fs::write(&path, body) {
        warn!(error = %e, ?path, "failed to write markdown mirror");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_is_ten_hex_chars() {
        let s = shard("person-123");
        assert_eq!(s.len(), 10);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn shard_is_deterministic() {
        assert_eq!(shard("abc"), shard("abc"));
        assert_ne!(shard("abc"), shard("abd"));
    }
}
