// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Multi-provider AI-agent session runtime.
///
/// With no subcommand, serves the JSON-RPC surface over stdio.
#[derive(Parser, Debug)]
#[command(name = "relay", version, about)]
pub struct Cli {
    /// State directory (selection record, secrets, rollouts, skills).
    /// Defaults to the platform data dir, e.g. `~/.local/share/relay`.
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Increase log verbosity (-v: debug, -vv: trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the JSON-RPC surface over stdin/stdout (the default).
    Serve,
    /// Print the model catalog.
    ListModels {
        /// Emit JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// List saved conversation rollouts.
    Chats {
        /// Maximum number of rollouts to show.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}
