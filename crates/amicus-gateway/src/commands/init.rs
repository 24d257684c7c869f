//! Minimal `init` scaffold (§6.1): writes a starter `amicus.toml` rather
//! than running a full interactive wizard, which is explicitly out of
//! scope in detail.

use amicus_core::Result;

pub fn run(config_path: Option<&str>, force: bool) -> Result<()> {
    let path = config_path
        .map(String::from)
        .unwrap_or_else(default_config_path);

    if std::path::Path::new(&path).exists() && !force {
        println!("{path} already exists — pass --force to overwrite.");
        return Ok(());
    }

    if let Some(parent) = std::path::Path::new(&path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(&path, STARTER_TOML)?;
    println!("wrote {path}");
    println!("edit providers.anthropic.api_key and channels.* before running `amicus start`.");
    Ok(())
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.amicus/amicus.toml")
}

const STARTER_TOML: &str = r#"# Amicus configuration. See SPEC_FULL.md for every field's meaning.

[agent]
name = "Amicus"
model = "claude-sonnet-4-5"
fast_model = "claude-3-5-haiku-latest"

[database]
memory_path = "memory.db"
sessions_path = "sessions.db"
feedback_path = "feedback.db"

[providers.anthropic]
api_key = "REPLACE_ME"

# [channels.signal]
# rpc_url = "http://127.0.0.1:8080/api/v1/rpc"
# account = "+15555550123"

# [channels.telegram]
# bot_token = "REPLACE_ME"
"#;
