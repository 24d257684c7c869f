mod cli;
mod commands;
mod wiring;

use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("AMICUS_LOG")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("amicus=info")),
        )
        .init();

    let cli = Cli::parse();
    let json = cli.json;

    let result = match cli.command {
        Command::Init => commands::init::run(cli.config.as_deref(), cli.force),
        Command::Chat => commands::chat::run(cli.config.as_deref()).await,
        Command::Start => commands::start::run(cli.config.as_deref()).await,
        Command::Eval => commands::eval::run(cli.config.as_deref(), json).await,
        Command::Consolidate => commands::consolidate::run(cli.config.as_deref()).await,
        Command::Status => commands::status::run(cli.config.as_deref(), json),
        Command::Doctor => commands::doctor::run(cli.config.as_deref(), json),
        Command::Trust { person_id, set, clear } => {
            commands::trust::run(cli.config.as_deref(), &person_id, set.as_deref(), clear, json)
        }
        Command::Export { out } => commands::export::run(cli.config.as_deref(), out.as_deref()),
        Command::Forget { person_id } => {
            commands::forget::run(cli.config.as_deref(), &person_id, cli.force)
        }
        Command::SelfImprove => commands::self_improve::run(cli.config.as_deref()),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "amicus: command failed");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
