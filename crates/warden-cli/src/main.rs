//! warden: policy enforcement for coding-agent tool use.
//!
//! Runs once per hook event; all state lives in signed documents on disk.

mod cli;
mod commands;

use clap::Parser;
use cli::{ClearanceAction, Cli, Commands, ConfigAction, KeyAction};
use commands::CommandExit;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging goes to stderr; stdout belongs to the hook protocol.
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("warden=debug")
            .with_writer(std::io::stderr)
            .init();
    }

    let warden_home = cli.warden_home()?;
    let result = match cli.command {
        Commands::Hook { event } => commands::hook::run(event, &warden_home).await,
        Commands::Status { project } => commands::status::run(project, &warden_home).await,
        Commands::Key { action } => match action {
            KeyAction::Init { force } => commands::key::init(&warden_home, force).await,
        },
        Commands::Config { action } => match action {
            ConfigAction::Init { force } => commands::config::init(&warden_home, force),
            ConfigAction::Show => commands::config::show(&warden_home),
        },
        Commands::Clearance { action } => match action {
            ClearanceAction::Grant { app, project } => {
                commands::clearance::grant(&app, project, &warden_home).await
            }
            ClearanceAction::Check { app, project } => {
                commands::clearance::check(&app, project, &warden_home).await
            }
        },
    };

    if let Err(err) = result {
        if let Some(exit) = err.downcast_ref::<CommandExit>() {
            eprintln!("{}", exit.message);
            std::process::exit(exit.code);
        }
        return Err(err);
    }
    Ok(())
}
