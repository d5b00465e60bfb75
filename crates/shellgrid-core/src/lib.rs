//! # shellgrid-core
//!
//! Core types for shellgrid.
//!
//! This crate contains the fundamental types shared by the emulator and
//! the session orchestrator:
//!
//! - Geometry types (Position, Dimensions)
//! - Cell, color and palette types for the terminal grid
//! - Session types (SessionId, HostRef, SessionState, SessionInfo)
//! - The persisted session snapshot
//! - Client configuration
//! - Error types
//!
//! ## Architecture
//!
//! This is Layer 0 in the architecture - all other crates depend on this one,
//! but this crate has no dependencies on other shellgrid crates.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cell;
pub mod config;
pub mod error;
pub mod geometry;
pub mod palette;
pub mod session;
pub mod snapshot;

pub use cell::{Cell, CellAttributes, Color};
pub use config::{
    AutoAttachSettings, ClientConfig, LoggingSettings, OrchestratorSettings, TerminalSettings,
};
pub use error::{Error, Result, TransportError};
pub use geometry::{Dimensions, Position};
pub use palette::Rgb;
pub use session::{HostRef, SessionId, SessionInfo, SessionState};
pub use snapshot::SessionSnapshot;
