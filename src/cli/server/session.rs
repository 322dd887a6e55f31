//! Session management for the HTTP server.
//!
//! Each server session owns one conversation. The route key (`ServerSession::id`)
//! stays fixed for the life of the handle, while the conversation inside gets
//! a new id whenever it is cleared.
//!
//! ```text
//! +------------------------------------------+
//! |  SessionManager (DashMap)                |
//! |    +-- ServerSession 1: Mutex<Session>   |
//! |    +-- ServerSession 2: Mutex<Session>   |
//! |    +-- ... (max configurable sessions)   |
//! +------------------------------------------+
//! ```
//!
//! The conversation mutex serializes turns: a second request on the same
//! session waits for the running one to finish.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::session::Session;

use super::types::SessionInfo;

/// Maximum concurrent sessions (default)
pub const DEFAULT_MAX_SESSIONS: usize = 10;

/// Session TTL for idle cleanup - 30 minutes (default)
pub const DEFAULT_SESSION_TTL_SECS: u64 = 30 * 60;

/// A server-side handle on one conversation.
pub struct ServerSession {
    /// Route key (UUID v4), stable across `/clear`
    pub id: String,

    /// Cancelled when the session is removed or cleaned up
    pub cancel_token: CancellationToken,

    pub created_at: Instant,

    pub last_activity: RwLock<Instant>,

    pub conversation: Mutex<Session>,
}

impl ServerSession {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4().to_string(),
            cancel_token: CancellationToken::new(),
            created_at: now,
            last_activity: RwLock::new(now),
            conversation: Mutex::new(Session::new()),
        }
    }

    /// Update the last activity timestamp to now.
    pub async fn touch(&self) {
        *self.last_activity.write().await = Instant::now();
    }

    /// Check if this session is idle (no activity for given duration).
    pub async fn is_idle(&self, max_idle_secs: u64) -> bool {
        let last = *self.last_activity.read().await;
        last.elapsed().as_secs() > max_idle_secs
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            age_ms: self.created_at.elapsed().as_millis() as u64,
            is_active: !self.cancel_token.is_cancelled(),
        }
    }
}

impl Default for ServerSession {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSession")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("is_cancelled", &self.cancel_token.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Thread-safe session manager using DashMap for O(1) lookup.
///
/// Enforces a maximum session count; idle sessions are dropped by
/// `cleanup_idle()`.
pub struct SessionManager {
    sessions: DashMap<String, Arc<ServerSession>>,

    pub max_sessions: usize,
}

impl SessionManager {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions,
        }
    }

    /// Create a new session, returning error if at capacity.
    pub fn create(&self) -> anyhow::Result<Arc<ServerSession>> {
        if self.sessions.len() >= self.max_sessions {
            anyhow::bail!("Maximum session limit ({}) reached", self.max_sessions);
        }

        let session = Arc::new(ServerSession::new());
        self.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ServerSession>> {
        self.sessions.get(id).map(|r| r.clone())
    }

    /// Remove a session by ID and cancel its token.
    pub fn remove(&self, id: &str) -> Option<Arc<ServerSession>> {
        let (_, session) = self.sessions.remove(id)?;
        session.cancel_token.cancel();
        Some(session)
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .map(|entry| entry.value().info())
            .collect()
    }

    /// Drop sessions idle for longer than `max_idle_secs`. Returns how many
    /// were removed.
    pub async fn cleanup_idle(&self, max_idle_secs: u64) -> usize {
        let mut to_remove = Vec::new();

        // No shard guard may be held across the await below
        let sessions: Vec<_> = self.sessions.iter().map(|e| e.value().clone()).collect();
        for session in sessions {
            if session.is_idle(max_idle_secs).await {
                to_remove.push(session.id.clone());
            }
        }

        let removed_count = to_remove.len();
        for id in to_remove {
            if self.remove(&id).is_some() {
                tracing::info!("Cleaned up idle session: {}", id);
            }
        }

        removed_count
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SESSIONS)
    }
}
