//! `export` (§6.1, §8 round-trip law): dumps people/facts/episodes/
//! group_capsules/lessons as JSON.

use amicus_core::Result;

use crate::wiring;

pub fn run(config_path: Option<&str>, out: Option<&str>) -> Result<()> {
    let cfg = wiring::load_config(config_path)?;
    let stores = wiring::open_stores(cfg)?;
    let payload = stores.memory.export_json()?;
    let text = serde_json::to_string_pretty(&payload)?;

    match out {
        Some(path) => {
            std::fs::write(path, &text)?;
            println!("wrote {path}");
        }
        None => println!("{text}"),
    }
    Ok(())
}
