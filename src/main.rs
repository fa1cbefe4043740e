// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipechain contributors

//! pipechain - Process chain runner
//!
//! Run external programs as a chain with explicit stream routing.

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipechain::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; stdout belongs to the chain
    let default_filter = if cli.verbose {
        "pipechain=debug"
    } else {
        "pipechain=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    // Dispatch to command handlers
    match cli.command {
        Commands::Run {
            file,
            stages,
            stdin,
            ignore_exit,
            timeout_ms,
        } => pipechain::cli::run::run(file, stages, stdin, ignore_exit, timeout_ms, cli.verbose).await,
        Commands::Validate { file } => pipechain::cli::validate::run(file, cli.verbose).await,
    }
}
