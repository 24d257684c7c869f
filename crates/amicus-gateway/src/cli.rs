use clap::{Parser, Subcommand};

/// Amicus — a persona agent that lives in Signal/Telegram group chats.
#[derive(Parser, Debug)]
#[command(name = "amicus", version, about, long_about = None)]
pub struct Cli {
    /// Path to amicus.toml. Defaults to ~/.amicus/amicus.toml.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Emit machine-readable JSON instead of human text where supported.
    #[arg(long, global = true)]
    pub json: bool,

    /// Skip confirmation prompts for destructive commands (forget, import).
    #[arg(long, global = true)]
    pub force: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a starter amicus.toml into the data directory.
    Init,
    /// Interactive REPL: each line is a turn through the engine as the operator.
    Chat,
    /// Boot the turn engine, connect channel adapters, run the scheduler.
    Start,
    /// Run the built-in end-to-end scenario battery and print pass/fail.
    Eval,
    /// Drain the group-capsule and public-style dirty queues once.
    Consolidate,
    /// Print chat/job/queue counts from the three databases.
    Status,
    /// Health check: databases, schema, embedder dimension, channel config.
    Doctor,
    /// Show or override a person's trust tier.
    Trust {
        /// Person id (see `amicus status` or `export` for ids).
        person_id: String,
        /// New tier to force: new_contact, getting_to_know, close_friend.
        #[arg(long)]
        set: Option<String>,
        /// Clear a previously forced tier, reverting to the derived one.
        #[arg(long)]
        clear: bool,
    },
    /// Dump people/facts/episodes/group_capsules/lessons as JSON.
    Export {
        /// Write to this file instead of stdout.
        #[arg(long)]
        out: Option<String>,
    },
    /// Delete a person (cascades facts; episodes are preserved).
    Forget {
        /// Person id to delete.
        person_id: String,
    },
    /// Promote repeated quality-gate rejections into new lessons.
    SelfImprove,
}
