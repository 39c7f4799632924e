/// Session registry: the process-wide table mapping a source URL to its
/// download session.
///
/// Structural changes (insert, replace, remove) are serialized under a
/// single async mutex so two concurrent starts for the same id can never
/// race a duplicate process into existence. Reads of an individual
/// session's state go through that session's watch channel, owned by the
/// session task.
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use muse_shared::models::{RegistryStats, SessionSnapshot, SessionState};

use crate::session::SessionHandle;

pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Insert-or-return-existing with the replace-after-terminal policy:
    /// a live (`Queued`/`Running`/`Paused`) session is returned
    /// unchanged, making repeated starts idempotent; a terminal one is
    /// discarded and rebuilt via `make`. Returns the handle and whether
    /// it was freshly created.
    pub async fn get_or_create(
        &self,
        id: &str,
        make: impl FnOnce() -> SessionHandle,
    ) -> (SessionHandle, bool) {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(id) {
            if existing.is_live() {
                debug!("Session {} already active, returning existing", id);
                return (existing.clone(), false);
            }
            info!("Replacing terminal session {}", id);
        }
        let handle = make();
        sessions.insert(id.to_string(), handle.clone());
        (handle, true)
    }

    pub async fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.lock().await.get(id).cloned()
    }

    /// Evict a session record. Sessions are retained until removed or
    /// replaced; there is no automatic garbage collection.
    pub async fn remove(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.lock().await.remove(id)
    }

    pub async fn snapshots(&self) -> Vec<SessionSnapshot> {
        self.sessions
            .lock()
            .await
            .values()
            .map(|h| h.snapshot())
            .collect()
    }

    /// Handles of every non-terminal session, for shutdown.
    pub async fn live_handles(&self) -> Vec<SessionHandle> {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|h| h.is_live())
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> RegistryStats {
        let sessions = self.sessions.lock().await;
        let mut stats = RegistryStats {
            total: sessions.len(),
            ..Default::default()
        };
        for handle in sessions.values() {
            match handle.state() {
                SessionState::Queued => stats.queued += 1,
                SessionState::Running => stats.running += 1,
                SessionState::Paused => stats.paused += 1,
                SessionState::Completed => stats.completed += 1,
                SessionState::Failed => stats.failed += 1,
                SessionState::Canceled => stats.canceled += 1,
            }
        }
        stats
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
