//! Connection state machine

use crate::{Error, Result};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket open, server greeting not yet processed
    Initial,

    /// SSLRequest sent, TLS handshake in progress
    NegotiatingTls,

    /// Handshake response sent, authentication exchange in progress
    Authenticating,

    /// Idle (ready for a command)
    Idle,

    /// Command sent, reading its response
    CommandInProgress,

    /// Closed
    Closed,
}

impl ConnectionState {
    /// Name used in logs and error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::NegotiatingTls => "negotiating_tls",
            Self::Authenticating => "authenticating",
            Self::Idle => "idle",
            Self::CommandInProgress => "command_in_progress",
            Self::Closed => "closed",
        }
    }

    /// Whether `next` may follow this state. Any state may close.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (_, Closed) => true,
            (Initial, NegotiatingTls | Authenticating) => true,
            (NegotiatingTls, Authenticating) => true,
            (Authenticating, Idle) => true,
            (Idle, CommandInProgress) | (CommandInProgress, Idle) => true,
            _ => false,
        }
    }

    /// Move to `next`, leaving the state untouched on an illegal transition
    pub fn transition(&mut self, next: ConnectionState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(Error::InvalidState {
                expected: format!("a state reachable from {}", self),
                actual: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
