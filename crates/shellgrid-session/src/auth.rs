//! Host-key and password prompts relayed to the caller.
//!
//! The orchestrator never decides whether a host is trusted or what the
//! password is. A transport asks through an [`AuthPrompt`], the orchestrator
//! tags the request with the session id, and the caller answers.

use std::sync::Arc;

use async_trait::async_trait;
use shellgrid_core::{HostRef, SessionId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Request to accept or reject a server host key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKeyVerificationRequest {
    /// Session that is connecting, filled in by the orchestrator
    pub session_id: Option<SessionId>,
    /// Host being connected to
    pub host: HostRef,
    /// Key algorithm, e.g. `ssh-ed25519`
    pub key_type: String,
    /// Key fingerprint as shown to the user
    pub fingerprint: String,
}

/// Request for a password or keyboard-interactive answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordRequest {
    /// Session that is connecting, filled in by the orchestrator
    pub session_id: Option<SessionId>,
    /// Host being connected to
    pub host: HostRef,
    /// Prompt text from the server
    pub prompt: String,
}

/// Answers authentication questions raised while connecting.
#[async_trait]
pub trait AuthPrompt: Send + Sync {
    /// Return `true` to trust the host key.
    async fn verify_host_key(&self, request: HostKeyVerificationRequest) -> bool;

    /// Return the password, or `None` to abort authentication.
    async fn request_password(&self, request: PasswordRequest) -> Option<String>;
}

/// Prompt that rejects every host key and never supplies a password.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAllPrompt;

#[async_trait]
impl AuthPrompt for DenyAllPrompt {
    async fn verify_host_key(&self, request: HostKeyVerificationRequest) -> bool {
        debug!("Rejecting host key for {}", request.host.address());
        false
    }

    async fn request_password(&self, _request: PasswordRequest) -> Option<String> {
        None
    }
}

/// Wraps the caller's prompt for one connection attempt.
pub(crate) struct RelayPrompt {
    session_id: SessionId,
    inner: Arc<dyn AuthPrompt>,
}

impl RelayPrompt {
    pub(crate) fn new(session_id: SessionId, inner: Arc<dyn AuthPrompt>) -> Self {
        Self { session_id, inner }
    }
}

#[async_trait]
impl AuthPrompt for RelayPrompt {
    async fn verify_host_key(&self, mut request: HostKeyVerificationRequest) -> bool {
        request.session_id = Some(self.session_id);
        info!(
            session_id = %self.session_id,
            "Host key verification requested: {} {}",
            request.key_type,
            request.fingerprint
        );
        let accepted = self.inner.verify_host_key(request).await;
        if !accepted {
            warn!(session_id = %self.session_id, "Host key rejected by user");
        }
        accepted
    }

    async fn request_password(&self, mut request: PasswordRequest) -> Option<String> {
        request.session_id = Some(self.session_id);
        debug!(session_id = %self.session_id, "Password requested");
        self.inner.request_password(request).await
    }
}

/// An authentication question waiting for the UI to answer.
#[derive(Debug)]
pub enum AuthRequest {
    /// Accept or reject a host key
    HostKey {
        /// What is being asked
        request: HostKeyVerificationRequest,
        /// Send the answer here
        respond: oneshot::Sender<bool>,
    },
    /// Supply a password
    Password {
        /// What is being asked
        request: PasswordRequest,
        /// Send the answer here; `None` aborts
        respond: oneshot::Sender<Option<String>>,
    },
}

/// [`AuthPrompt`] that forwards requests over a channel.
///
/// The connecting task waits until the receiver answers. A dropped
/// receiver or responder counts as a rejection.
#[derive(Debug, Clone)]
pub struct ChannelAuthPrompt {
    tx: mpsc::Sender<AuthRequest>,
}

impl ChannelAuthPrompt {
    /// Create a prompt and the receiver the UI reads requests from.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AuthRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl AuthPrompt for ChannelAuthPrompt {
    async fn verify_host_key(&self, request: HostKeyVerificationRequest) -> bool {
        let (respond, answer) = oneshot::channel();
        if self
            .tx
            .send(AuthRequest::HostKey { request, respond })
            .await
            .is_err()
        {
            warn!("Auth prompt receiver dropped, rejecting host key");
            return false;
        }
        answer.await.unwrap_or(false)
    }

    async fn request_password(&self, request: PasswordRequest) -> Option<String> {
        let (respond, answer) = oneshot::channel();
        if self
            .tx
            .send(AuthRequest::Password { request, respond })
            .await
            .is_err()
        {
            warn!("Auth prompt receiver dropped, aborting password request");
            return None;
        }
        answer.await.ok().flatten()
    }
}
