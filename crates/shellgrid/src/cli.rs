//! Command-line definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Terminal emulator and session tooling for remote-shell clients
#[derive(Debug, Parser)]
#[command(name = "shellgrid", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Which type `shellgrid schema` prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SchemaTarget {
    /// Persisted session snapshot
    #[default]
    Snapshot,
    /// YAML client configuration
    Config,
    /// `replay --json` output
    Replay,
}

/// Options for `shellgrid replay`.
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ReplayArgs {
    /// Captured output stream
    pub path: PathBuf,

    /// Column override
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub cols: Option<u16>,

    /// Row override
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub rows: Option<u16>,

    /// Configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Feed a captured byte stream through the emulator
    Replay(ReplayArgs),

    /// Print a JSON schema
    Schema {
        /// Type to describe
        #[arg(value_enum, default_value_t = SchemaTarget::Snapshot)]
        target: SchemaTarget,

        /// Rewrite for draft-07 consumers
        #[arg(long)]
        draft07: bool,
    },

    /// Validate a configuration file
    CheckConfig {
        /// File to check
        path: PathBuf,
    },
}

impl Command {
    /// Config file named on the command line, if any.
    pub fn config_path(&self) -> Option<&PathBuf> {
        match self {
            Command::Replay(args) => args.config.as_ref(),
            Command::CheckConfig { path } => Some(path),
            Command::Schema { .. } => None,
        }
    }
}
