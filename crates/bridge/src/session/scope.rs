//! Session lifetime scope.

use std::sync::atomic::{AtomicU8, Ordering};

use tokio_util::sync::CancellationToken;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Normal operation.
    Running,
    /// The forced-exit sequence has started.
    Exiting,
    /// The scope is cancelled. Terminal.
    Closed,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Running,
            1 => SessionState::Exiting,
            _ => SessionState::Closed,
        }
    }
}

/// Cancellation scope shared by every task of one session.
#[derive(Debug)]
pub struct SessionScope {
    token: CancellationToken,
    state: AtomicU8,
}

impl SessionScope {
    /// Creates a scope that is cancelled together with `parent`.
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            state: AtomicU8::new(SessionState::Running as u8),
        }
    }

    /// Returns the underlying token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns true once the scope has been cancelled, directly or via its parent.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the scope is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        if self.token.is_cancelled() {
            return SessionState::Closed;
        }
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Moves `Running` to `Exiting`.
    ///
    /// Returns true only for the first caller, so the exit sequence runs at
    /// most once per session.
    pub fn begin_exit(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Running as u8,
                SessionState::Exiting as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Cancels the scope. Safe to call any number of times.
    pub fn close(&self) {
        self.state
            .store(SessionState::Closed as u8, Ordering::SeqCst);
        self.token.cancel();
    }
}
