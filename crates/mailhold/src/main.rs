//! `mailhold` - a self-hosted SMTP, IMAP and POP3 mail server.
//!
//! Accepts mail for the configured local domains over SMTP and serves the
//! stored messages over IMAP and POP3, all backed by one `SQLite` database.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod cli;
mod server;
mod users;

use anyhow::{Context, Result};
use clap::Parser;
use mailhold_core::Config;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands};

/// Filter used when neither `RUST_LOG` nor `log_level` is set.
const DEFAULT_FILTER: &str =
    "mailhold=info,mailhold_smtp=info,mailhold_imap=info,mailhold_pop3=info,mailhold_core=info";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = cli.config.unwrap_or_else(Config::default_config_path);
    let config =
        Config::load(&path).with_context(|| format!("loading config from {}", path.display()))?;

    init_tracing(config.log_level.as_deref());

    match cli.command {
        Commands::Serve => server::run(config).await,
        Commands::User(command) => users::run(&config, command).await,
        Commands::CheckConfig => {
            config.validate().context("invalid configuration")?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn init_tracing(log_level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .ok()
        .or_else(|| log_level.and_then(|level| EnvFilter::try_new(level).ok()))
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
