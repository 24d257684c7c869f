//! `trust` (§6.1): show or override a person's trust tier.

use amicus_core::{AmicusError, Result};
use amicus_memory::derive_trust_tier;

use crate::wiring;

pub fn run(
    config_path: Option<&str>,
    person_id: &str,
    set: Option<&str>,
    clear: bool,
    json: bool,
) -> Result<()> {
    let cfg = wiring::load_config(config_path)?;
    let stores = wiring::open_stores(cfg)?;

    if let Some(tier) = set {
        validate_tier(tier)?;
        stores
            .memory
            .set_trust_tier_override(person_id, Some(tier))?;
    } else if clear {
        stores.memory.set_trust_tier_override(person_id, None)?;
    }

    let Some(person) = stores.memory.get_person(person_id)? else {
        return Err(AmicusError::Internal(format!("no such person: {person_id}")));
    };
    let derived = derive_trust_tier(&person);

    if json {
        let payload = serde_json::json!({
            "person_id": person.id,
            "display_name": person.display_name,
            "override": person.trust_tier_override,
            "derived": derived.to_string(),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!(
            "{} ({}): override={:?} derived={}",
            person.display_name.as_deref().unwrap_or("?"),
            person.id,
            person.trust_tier_override,
            derived
        );
    }

    Ok(())
}

fn validate_tier(tier: &str) -> Result<()> {
    match tier {
        "new_contact" | "getting_to_know" | "close_friend" => Ok(()),
        other => Err(AmicusError::Config(format!(
            "invalid trust tier '{other}': expected new_contact, getting_to_know, or close_friend"
        ))),
    }
}
