//! shellgrid command-line library
//!
//! This library contains the command implementations behind the
//! `shellgrid` binary. The binary entry point is in main.rs.

pub mod cli;
pub mod replay;
pub mod schema;

use std::path::Path;

use shellgrid_core::{ClientConfig, Dimensions};

// Re-export commonly used types
pub use cli::{Cli, Command, ReplayArgs, SchemaTarget};
pub use replay::{replay, ReplayOptions, ReplayReport};
pub use schema::SchemaTransformer;

/// Load the configuration file, or defaults when none is given.
pub fn load_config(path: Option<&Path>) -> shellgrid_core::Result<ClientConfig> {
    match path {
        Some(path) => ClientConfig::from_file(path),
        None => Ok(ClientConfig::default()),
    }
}

/// Replay options from configuration and command-line overrides.
pub fn replay_options(config: &ClientConfig, args: &ReplayArgs) -> ReplayOptions {
    let mut terminal = config.terminal.clone();
    let defaults = terminal.dimensions();
    let dimensions = Dimensions::new(
        args.rows.unwrap_or(defaults.rows),
        args.cols.unwrap_or(defaults.cols),
    );
    terminal.default_rows = dimensions.rows;
    terminal.default_cols = dimensions.cols;
    ReplayOptions::new(terminal)
}

/// One-paragraph summary of a validated configuration.
pub fn describe_config(config: &ClientConfig) -> String {
    let orchestrator = &config.orchestrator;
    let mut out = format!(
        "sessions: up to {}\n\
         keep-alive: {}s foreground, {}s background\n\
         reconnect: {} attempts, {}ms apart\n\
         snapshots: every {}s\n\
         terminal: {}x{}, {} scrollback lines\n",
        orchestrator.max_sessions,
        orchestrator.keep_alive_foreground_secs,
        orchestrator.keep_alive_background_secs,
        orchestrator.max_reconnect_attempts,
        orchestrator.reconnect_delay_ms,
        orchestrator.persist_interval_secs,
        config.terminal.default_cols,
        config.terminal.default_rows,
        config.terminal.scrollback_lines,
    );
    if config.auto_attach.enabled {
        out.push_str(&format!("auto-attach: {}\n", config.auto_attach.command()));
    } else {
        out.push_str("auto-attach: off\n");
    }
    out
}
