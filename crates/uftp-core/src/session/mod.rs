//! Peer sessions.
//!
//! The server serves one peer at a time. A session begins when the
//! demultiplexer announces a new peer queue, becomes active on `CONNECT`,
//! and ends on `EXIT`, queue closure or shutdown.

pub mod client;
pub mod server;

pub use client::Client;
pub use server::{PeerSession, Server};

use crate::error::SessionError;

/// Server-side session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No peer
    Idle,
    /// Peer queue accepted, waiting for `CONNECT`
    AwaitingConnect,
    /// Connected; control frames are dispatched
    Active,
}

impl SessionState {
    /// Whether moving to `to` is a legal transition
    pub fn can_transition(self, to: SessionState) -> bool {
        matches!(
            (self, to),
            (SessionState::Idle, SessionState::AwaitingConnect)
                | (SessionState::AwaitingConnect, SessionState::Active)
                | (SessionState::AwaitingConnect, SessionState::Idle)
                | (SessionState::Active, SessionState::Active)
                | (SessionState::Active, SessionState::Idle)
        )
    }

    /// Move to `to`
    ///
    /// # Errors
    /// `SessionError::InvalidTransition` if the move is not allowed.
    pub fn transition_to(&mut self, to: SessionState) -> Result<(), SessionError> {
        if !self.can_transition(to) {
            return Err(SessionError::InvalidTransition { from: *self, to });
        }
        tracing::trace!("Session {:?} -> {:?}", self, to);
        *self = to;
        Ok(())
    }
}
