//! # shellgrid
//!
//! Command-line front end for the shellgrid terminal emulator and session
//! types.
//!
//! ## Overview
//!
//! - `replay`: feed captured output through the emulator and print the screen
//! - `schema`: print the JSON schema of snapshots, configuration or reports
//! - `check-config`: validate a YAML configuration file
//!
//! ## Architecture
//!
//! This is the top layer, tying together:
//! - shellgrid-core: Core types and configuration
//! - shellgrid-emulator: Terminal emulation

use anyhow::Context;
use clap::Parser;
use shellgrid::{describe_config, load_config, replay, replay_options, schema, Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let command = Cli::parse().command;

    // Configuration is loaded before logging so its level can apply.
    let config = load_config(command.config_path().map(|p| p.as_path()));

    let level = config
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match command {
        Command::Replay(args) => {
            let config = config.context("failed to load configuration")?;
            let bytes = tokio::fs::read(&args.path)
                .await
                .with_context(|| format!("failed to read {}", args.path.display()))?;

            let options = replay_options(&config, &args);
            tracing::info!(
                "Replaying {} bytes from {} at {}x{}",
                bytes.len(),
                args.path.display(),
                options.terminal.default_cols,
                options.terminal.default_rows
            );
            let report = replay(&bytes, &options);

            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render_text());
            }
        }
        Command::Schema { target, draft07 } => {
            let value = schema::generate(target, draft07)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Command::CheckConfig { path } => match config {
            Ok(config) => {
                println!("{}: ok", path.display());
                print!("{}", describe_config(&config));
            }
            Err(e) => {
                tracing::error!("Invalid configuration {}: {}", path.display(), e);
                eprintln!("{}: {e}", path.display());
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
