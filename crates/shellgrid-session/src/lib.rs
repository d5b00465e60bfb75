//! # shellgrid-session
//!
//! Remote session orchestration for shellgrid.
//!
//! This crate provides:
//! - The [`Transport`] and [`SnapshotStore`] contracts a client plugs in
//! - Host-key and password prompts relayed to the caller
//! - The [`Orchestrator`]: session registry, read pumps, reconnects,
//!   keep-alive probes and snapshot persistence
//! - [`SessionEvent`] fan-out over broadcast channels
//!
//! ## Architecture
//!
//! This is Layer 2 in the architecture - it depends on shellgrid-core
//! and shellgrid-emulator to drive one terminal per remote session.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod event;
pub mod orchestrator;
pub mod persistence;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use auth::{
    AuthPrompt, AuthRequest, ChannelAuthPrompt, DenyAllPrompt, HostKeyVerificationRequest,
    PasswordRequest,
};
pub use event::SessionEvent;
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use persistence::{MemorySnapshotStore, SnapshotStore};
pub use session::Session;
pub use transport::{Credentials, Transport, TransportFactory};
