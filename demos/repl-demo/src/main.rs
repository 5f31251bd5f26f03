//! Line-oriented REPL client.
//!
//! Run with: cargo run -p repl-demo
//!
//! Reads one instruction per line from stdin and prints its output and
//! result. `cargo run -p repl-demo -- login <token>` stores a token in the
//! config file instead.

use std::io::Write as _;

use anyhow::{Context as _, bail};
use remote_repl_core::{ApiToken, ConfigManager};
use remote_repl_session::{Repl, ReplConfig, StandardOutputStream};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => run().await,
        [cmd, token] if cmd == "login" => login(token),
        _ => bail!("usage: repl-demo [login <token>]"),
    }
}

fn login(token: &str) -> anyhow::Result<()> {
    let token: ApiToken = token.parse().context("invalid token")?;
    let manager = ConfigManager::new()?;
    let mut file = manager.load()?;
    file.token = Some(token);
    manager.save(&file)?;
    tracing::info!(path = %manager.path().display(), "Token saved");
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let config = ReplConfig::load()?;
    let mut repl = Repl::connect(config)?;
    let machine = repl.wait_for_machine_name().await?;
    tracing::info!(%machine, "Attached");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let mut handle = repl.exec(line)?;
        while let Some(chunk) = handle.next_output().await {
            match chunk.stream {
                StandardOutputStream::Stdout => print!("{}", chunk.data),
                StandardOutputStream::Stderr => eprint!("{}", chunk.data),
            }
        }
        std::io::stdout().flush()?;

        let result = handle.result().await?;
        if let Some(error) = result.failure() {
            eprintln!("{error}");
        } else if let Some(value) = result.returned() {
            println!("{value}");
        }
        tracing::debug!(runtime_ms = result.runtime_ms, "Instruction finished");
    }

    repl.close().await;
    Ok(())
}
