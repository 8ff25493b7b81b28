// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use relay_config::default_state_dir;
use relay_core::RuntimeBuilder;
use relay_rollout::RolloutStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let state_dir = cli.state_dir.clone().unwrap_or_else(default_state_dir);

    match cli.command {
        Some(Commands::ListModels { json }) => list_models(json),
        Some(Commands::Chats { limit }) => list_chats(&state_dir, limit),
        Some(Commands::Serve) | None => {
            let rt = RuntimeBuilder::new(state_dir).build();
            relay_rpc::serve_stdio(rt).await
        }
    }
}

fn list_models(as_json: bool) -> anyhow::Result<()> {
    let models = relay_model::catalog();
    if as_json {
        println!("{}", serde_json::to_string_pretty(&models)?);
        return Ok(());
    }
    let id_w = models.iter().map(|m| m.id.len()).max().unwrap_or(10).max(10);
    println!("{:<id_w$}  {:<9}  {:>12}  DESCRIPTION", "ID", "PROVIDER", "CTX WINDOW");
    println!("{}", "-".repeat(id_w + 42));
    for m in &models {
        println!(
            "{:<id_w$}  {:<9}  {:>12}  {}",
            m.id,
            m.provider.as_str(),
            relay_model::context_window_tokens(m),
            m.description,
        );
    }
    println!("\nTotal: {} model(s)", models.len());
    Ok(())
}

fn list_chats(state_dir: &std::path::Path, limit: usize) -> anyhow::Result<()> {
    let store = RolloutStore::new(state_dir);
    let rollouts = store.list()?;
    if rollouts.is_empty() {
        println!("No saved conversations found.");
        println!("Rollouts are stored in: {}", store.dir().display());
        return Ok(());
    }
    println!("{:<58}  {:<20}  MESSAGES", "ID", "CREATED");
    println!("{}", "-".repeat(92));
    for r in rollouts.iter().take(limit) {
        println!(
            "{:<58}  {:<20}  {}",
            r.id,
            r.created_at.format("%Y-%m-%d %H:%M:%S"),
            r.message_count,
        );
    }
    println!("\nRollout dir: {}", store.dir().display());
    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
