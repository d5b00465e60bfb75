//! The byte transport a session runs over.
//!
//! A real client plugs in an SSH implementation here. The orchestrator only
//! needs an authenticated duplex byte stream it can resize and probe.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use shellgrid_core::{HostRef, TransportError};

use crate::auth::AuthPrompt;

/// Secrets used to authenticate a connection.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Password, if password authentication is used
    pub password: Option<String>,
    /// Name of a stored private key, if key authentication is used
    pub key_alias: Option<String>,
}

impl Credentials {
    /// Password credentials.
    pub fn password(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
            key_alias: None,
        }
    }

    /// Key credentials.
    pub fn key(alias: impl Into<String>) -> Self {
        Self {
            password: None,
            key_alias: Some(alias.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_alias", &self.key_alias)
            .finish()
    }
}

/// One connection to a remote shell.
///
/// `read` and `write` are called concurrently from different tasks, so
/// implementations must not serialize them behind a single lock.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open and authenticate the connection, asking `prompt` about host keys
    /// and passwords.
    async fn connect(
        &self,
        target: &HostRef,
        credentials: &Credentials,
        prompt: &dyn AuthPrompt,
    ) -> Result<(), TransportError>;

    /// Write bytes to the remote shell.
    async fn write(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Wait for the next chunk of output.
    ///
    /// Returns `Ok(None)` when the remote side closed the stream.
    async fn read(&self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Tell the remote side the terminal size changed.
    async fn resize(&self, cols: u16, rows: u16) -> Result<(), TransportError>;

    /// Send a no-op probe. Returns `false` when the connection is dead.
    async fn send_keep_alive(&self) -> bool;

    /// Close the connection. Must be safe to call more than once.
    async fn close(&self);
}

/// Creates a fresh transport for each connection attempt.
pub trait TransportFactory: Send + Sync {
    /// New, unconnected transport for `host`.
    fn create(&self, host: &HostRef) -> Arc<dyn Transport>;
}
