//! Session lifecycle states

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

/// Lifecycle of the backend stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Preparing a fresh connection attempt
    Initializing,

    /// Transport connect in flight
    Connecting,

    /// Connected and idle
    Ready,

    /// User message sent, no response started yet
    Waiting,

    /// Response audio streaming in
    Responding,

    /// Disconnected, waiting out the backoff delay
    Retrying,

    /// User-initiated shutdown (terminal)
    Quitting,

    /// Retry budget exhausted (terminal)
    Error,
}

impl SessionPhase {
    /// Terminal phases never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Quitting | SessionPhase::Error)
    }

    /// Phases with an open transport connection
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            SessionPhase::Ready | SessionPhase::Waiting | SessionPhase::Responding
        )
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Initializing => "initializing",
            SessionPhase::Connecting => "connecting",
            SessionPhase::Ready => "ready",
            SessionPhase::Waiting => "waiting",
            SessionPhase::Responding => "responding",
            SessionPhase::Retrying => "retrying",
            SessionPhase::Quitting => "quitting",
            SessionPhase::Error => "error",
        };
        f.write_str(name)
    }
}

/// Mutable session state, owned exclusively by the session task
#[derive(Debug)]
pub struct SessionState {
    /// Current phase; observers see it through the watch channel
    pub phase: SessionPhase,

    /// Consecutive failed attempts since the last successful connection
    pub retry_attempt: u32,

    /// Backoff to base the next retry delay on
    pub backoff: Duration,

    /// Id of the live connection, None while disconnected
    pub connection_id: Option<Uuid>,

    initial_backoff: Duration,
}

impl SessionState {
    pub fn new(initial_backoff: Duration) -> Self {
        Self {
            phase: SessionPhase::Initializing,
            retry_attempt: 0,
            backoff: initial_backoff,
            connection_id: None,
            initial_backoff,
        }
    }

    /// Applied on every successful connection: the attempt counter and
    /// backoff reset to their floors. Never called on a manual
    /// reconnect request.
    pub fn mark_connected(&mut self, connection_id: Uuid) {
        self.retry_attempt = 0;
        self.backoff = self.initial_backoff;
        self.connection_id = Some(connection_id);
    }

    pub fn mark_disconnected(&mut self) {
        self.connection_id = None;
    }
}
