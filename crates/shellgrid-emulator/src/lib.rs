//! # shellgrid-emulator
//!
//! Terminal emulator for shellgrid.
//!
//! This crate provides:
//! - VTE parser for ANSI/VT escape sequences
//! - Terminal grid state with scroll region, scrollback and dirty tracking
//! - A lock-guarded [`Terminal`] shared by the read pump and renderers
//! - Bell and title events over a broadcast channel
//!
//! ## Architecture
//!
//! This is Layer 1 in the architecture - it depends on shellgrid-core
//! and performs no I/O of its own.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod grid;
pub mod parser;
pub mod terminal;

// Re-export commonly used types
pub use grid::{Cursor, DirtyRegion, Grid, DEFAULT_SCROLLBACK};
pub use parser::{Parser, Performer, TerminalEvent};
pub use terminal::{ScreenSnapshot, Terminal, DEFAULT_EVENT_CAPACITY, DEFAULT_READ_TIMEOUT};
