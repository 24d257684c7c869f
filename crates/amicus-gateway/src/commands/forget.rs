//! `forget` (§6.1): deletes a `Person`, cascading facts; episodes are
//! preserved per the §3 lifecycle.

use std::io::{self, Write};

use amicus_core::Result;

use crate::wiring;

pub fn run(config_path: Option<&str>, person_id: &str, force: bool) -> Result<()> {
    let cfg = wiring::load_config(config_path)?;
    let stores = wiring::open_stores(cfg)?;

    let Some(person) = stores.memory.get_person(person_id)? else {
        println!("no such person: {person_id}");
        return Ok(());
    };

    if !force {
        print!(
            "delete {} ({})? facts are removed, episodes are kept. [y/N] ",
            person.display_name.as_deref().unwrap_or("?"),
            person.id
        );
        io::stdout().flush().ok();
        let mut answer = String::new();
        io::stdin().read_line(&mut answer).ok();
        if !answer.trim().eq_ignore_ascii_case("y") {
            println!("aborted");
            return Ok(());
        }
    }

    stores.memory.delete_person(person_id)?;
    println!("deleted {person_id}");
    Ok(())
}
