//! Snapshot storage contract and the background writer feeding it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use shellgrid_core::{Result, SessionId, SessionSnapshot};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Durable storage for session snapshots, owned by the host application.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Insert or replace the snapshot for `session_id`.
    async fn save_snapshot(&self, session_id: SessionId, snapshot: SessionSnapshot) -> Result<()>;

    /// Every stored snapshot.
    async fn load_all_snapshots(&self) -> Result<Vec<SessionSnapshot>>;

    /// Forget the snapshot for `session_id`. Missing ids are not an error.
    async fn delete_snapshot(&self, session_id: SessionId) -> Result<()>;
}

/// In-process store, for tests and for clients without durable storage.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<SessionId, SessionSnapshot>>,
}

impl MemorySnapshotStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored snapshot for one session.
    pub fn get(&self, session_id: &SessionId) -> Option<SessionSnapshot> {
        self.snapshots.lock().get(session_id).cloned()
    }

    /// Number of stored snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn save_snapshot(&self, session_id: SessionId, snapshot: SessionSnapshot) -> Result<()> {
        self.snapshots.lock().insert(session_id, snapshot);
        Ok(())
    }

    async fn load_all_snapshots(&self) -> Result<Vec<SessionSnapshot>> {
        Ok(self.snapshots.lock().values().cloned().collect())
    }

    async fn delete_snapshot(&self, session_id: SessionId) -> Result<()> {
        self.snapshots.lock().remove(&session_id);
        Ok(())
    }
}

/// Work queued for the persistence worker.
#[derive(Debug)]
pub(crate) enum PersistCommand {
    Save(Box<SessionSnapshot>),
    Delete(SessionId),
}

/// Apply queued commands to the store in order until every sender is gone.
///
/// Store failures are logged and do not stop the worker.
pub(crate) async fn run_persist_worker(
    store: Arc<dyn SnapshotStore>,
    mut rx: mpsc::UnboundedReceiver<PersistCommand>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            PersistCommand::Save(snapshot) => {
                let session_id = snapshot.session_id;
                if let Err(e) = store.save_snapshot(session_id, *snapshot).await {
                    error!(session_id = %session_id, "Failed to save snapshot: {}", e);
                }
            }
            PersistCommand::Delete(session_id) => {
                if let Err(e) = store.delete_snapshot(session_id).await {
                    error!(session_id = %session_id, "Failed to delete snapshot: {}", e);
                }
            }
        }
    }
    debug!("Persistence worker stopped");
}
