//! `self-improve` (§6.1): reads `feedback.db` and promotes quality-gate
//! rejection reasons that have recurred at least [`PROMOTION_THRESHOLD`]
//! times into new `Lesson` rows, so future context assembly can steer
//! around them (§4.I).

use amicus_core::Result;
use amicus_memory::types::{Lesson, LessonType};
use uuid::Uuid;

use crate::wiring;

const PROMOTION_THRESHOLD: i64 = 3;

pub fn run(config_path: Option<&str>) -> Result<()> {
    let cfg = wiring::load_config(config_path)?;
    let stores = wiring::open_stores(cfg)?;

    let repeated = stores.feedback.repeated_reasons(PROMOTION_THRESHOLD)?;
    if repeated.is_empty() {
        println!("no rejection reason has recurred {PROMOTION_THRESHOLD}+ times — nothing to promote");
        return Ok(());
    }

    for r in &repeated {
        let lesson = Lesson {
            id: Uuid::now_v7().to_string(),
            kind: Some(LessonType::Failure),
            category: Some("quality_gate".to_string()),
            content: format!(
                "Outgoing drafts have been rejected {} times for reason '{}'. \
                 Avoid patterns that trigger this check.",
                r.count, r.reason
            ),
            rule: Some(r.reason.clone()),
            alternative: None,
            person_id: None,
            episode_refs: Vec::new(),
            confidence: Some((r.count as f64 / (r.count as f64 + 5.0)).min(0.95)),
            times_validated: 0,
            times_violated: r.count,
            created_at_ms: r.last_seen_ms,
        };
        stores.memory.append_lesson(&lesson)?;
        stores.feedback.mark_promoted(&r.reason)?;
        println!("promoted '{}' ({} occurrences) to lesson {}", r.reason, r.count, lesson.id);
    }

    Ok(())
}
