use clap::Parser;
use ledger_view::{HttpClient, LedgerController, Session};

mod commands;
mod config;
mod error;

use crate::error::Result;

#[derive(Debug, Parser)]
#[command(name = "ledger_cli", disable_version_flag = true)]
#[command(about = "Browse, filter and edit the transaction ledger")]
struct Cli {
    #[command(flatten)]
    overrides: config::Overrides,

    #[command(subcommand)]
    command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load(&cli.overrides)?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "ledger_cli={level},ledger_view={level}",
            level = config.level
        ))
        .with_writer(std::io::stderr)
        .init();

    let session = match &config.token {
        Some(token) => Session::new(token.as_str()),
        None => {
            tracing::warn!("no token configured, requests are sent without credentials");
            Session::default()
        }
    };
    let client = HttpClient::new(&config.base_url, session.clone())?;
    let mut ledger = LedgerController::builder()
        .api(client)
        .settings(config.settings())
        .build()?;

    let result = commands::run(cli.command, &mut ledger).await;
    if config.token.is_some() && !session.is_active() {
        tracing::warn!("session rejected by the server, sign in again and update the token");
    }
    result
}
