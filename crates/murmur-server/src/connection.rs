//! Per-connection lifecycle state.
//!
//! `Connecting -> Authenticating -> Online -> Closed`, with `Closed` also
//! reachable from every earlier state. `Closed` is terminal.

use murmur_core::{RelayError, RelayResult};
use std::fmt;
use std::net::SocketAddr;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport accepted, nothing exchanged yet.
    Connecting,
    /// Token extraction/validation in progress.
    Authenticating,
    /// Admitted to the registry.
    Online,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Online => "online",
            ConnectionState::Closed => "closed",
        }
    }

    fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticating)
                | (Authenticating, Online)
                | (Connecting | Authenticating | Online, Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle tracker for one transport session.
#[derive(Debug)]
pub struct Connection {
    remote: SocketAddr,
    state: ConnectionState,
    username: Option<String>,
    conn_id: Option<u64>,
}

impl Connection {
    pub fn new(remote: SocketAddr) -> Self {
        Self {
            remote,
            state: ConnectionState::Connecting,
            username: None,
            conn_id: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Username bound at admission; `None` before `Online`.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn begin_auth(&mut self) -> RelayResult<()> {
        self.transition(ConnectionState::Authenticating)
    }

    /// Bind the admitted identity. The username cannot change afterwards.
    pub fn go_online(&mut self, username: &str, conn_id: u64) -> RelayResult<()> {
        self.transition(ConnectionState::Online)?;
        self.username = Some(username.to_string());
        self.conn_id = Some(conn_id);
        Ok(())
    }

    /// Move to `Closed`. Returns whether the connection had been online,
    /// i.e. whether registry cleanup is owed.
    pub fn close(&mut self) -> RelayResult<bool> {
        let was_online = self.state == ConnectionState::Online;
        self.transition(ConnectionState::Closed)?;
        Ok(was_online)
    }

    fn transition(&mut self, next: ConnectionState) -> RelayResult<()> {
        if !self.state.can_transition_to(next) {
            warn!(remote = %self.remote, from = %self.state, to = %next, "rejected state transition");
            return Err(RelayError::InvalidTransition {
                from: self.state.as_str(),
                to: next.as_str(),
            });
        }
        debug!(remote = %self.remote, conn_id = ?self.conn_id, from = %self.state, to = %next, "connection state");
        self.state = next;
        Ok(())
    }
}
