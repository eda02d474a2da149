//! Registry of active sessions.
//!
//! Backs the health endpoint and enforces the concurrent session limit.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

use dashmap::DashMap;
use uuid::Uuid;

use crate::exec::ExecTarget;

/// Unique identifier for a session.
pub type SessionId = String;

/// Information about an active session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Unique session identifier.
    pub id: SessionId,
    /// Container the session is attached to.
    pub target: ExecTarget,
    /// When the session was registered.
    pub started_at: SystemTime,
}

/// Thread-safe registry of active sessions with a capacity limit.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, SessionInfo>,
    active: AtomicUsize,
    max_sessions: usize,
}

impl SessionRegistry {
    /// Creates a registry admitting at most `max_sessions` sessions.
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            active: AtomicUsize::new(0),
            max_sessions,
        }
    }

    /// Registers a session for `target`.
    ///
    /// Returns `None` when the registry is full.
    pub fn try_register(&self, target: ExecTarget) -> Option<SessionInfo> {
        let max = self.max_sessions;
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()?;

        let info = SessionInfo {
            id: Uuid::new_v4().to_string(),
            target,
            started_at: SystemTime::now(),
        };
        self.sessions.insert(info.id.clone(), info.clone());
        Some(info)
    }

    /// Removes a session. Unknown ids are ignored.
    pub fn remove(&self, id: &SessionId) -> Option<SessionInfo> {
        let (_, info) = self.sessions.remove(id)?;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Some(info)
    }

    /// Gets information about a specific session.
    pub fn get(&self, id: &SessionId) -> Option<SessionInfo> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Lists all active sessions.
    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Returns the number of active sessions.
    pub fn count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Returns the session limit.
    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }
}
