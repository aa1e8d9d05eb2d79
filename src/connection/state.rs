//! Connection and authentication state machine
//!
//! Pure transitions only. The session feeds it socket events and handshake
//! text and carries out whatever it returns.

use std::fmt;

use crate::auth::ClientCredentials;
use crate::protocol::{HandshakeMessage, IdentityResponse};
use crate::{Error, Result};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No socket
    #[default]
    Disconnected,
    /// Socket requested, not yet open
    Connecting,
    /// Socket open, handshake in progress
    AwaitingChallenge,
    /// Handshake complete; traffic is binary frames
    Authenticated,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingChallenge => "awaiting-challenge",
            Self::Authenticated => "authenticated",
        };
        f.write_str(s)
    }
}

/// What the session must do after a handshake message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Nothing to do
    Ignored,
    /// Send this identity response
    Respond(IdentityResponse),
    /// The server accepted us
    Authenticated,
}

/// Tracks connection state, handshake progress and connect attempts
#[derive(Debug, Default)]
pub struct ConnectionMachine {
    state: ConnectionState,
    challenge_answered: bool,
    retry_count: u32,
}

impl ConnectionMachine {
    /// Machine in `Disconnected`
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the handshake has completed
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state == ConnectionState::Authenticated
    }

    /// Connect attempts since the last successful open
    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// A connect was requested; returns false if a socket already exists
    pub fn connect_requested(&mut self) -> bool {
        if self.state != ConnectionState::Disconnected {
            return false;
        }
        self.state = ConnectionState::Connecting;
        self.retry_count += 1;
        true
    }

    /// The socket reported open
    pub fn socket_opened(&mut self) -> bool {
        if self.state != ConnectionState::Connecting {
            return false;
        }
        self.state = ConnectionState::AwaitingChallenge;
        self.challenge_answered = false;
        self.retry_count = 0;
        true
    }

    /// Feed a pre-authentication text message
    ///
    /// Only `AwaitingChallenge` reacts. The first challenge is answered with
    /// an identity response signed over `timestamp`; a repeat challenge is
    /// ignored. A welcome moves to `Authenticated` only after a challenge was
    /// answered.
    ///
    /// # Errors
    ///
    /// Returns error if the text is not JSON or signing fails
    pub fn on_handshake(
        &mut self,
        text: &str,
        credentials: &ClientCredentials,
        client_type: &str,
        timestamp: &str,
    ) -> Result<HandshakeStep> {
        if self.state != ConnectionState::AwaitingChallenge {
            tracing::debug!(state = %self.state, "handshake message outside handshake ignored");
            return Ok(HandshakeStep::Ignored);
        }

        let message = HandshakeMessage::parse(text)
            .map_err(|e| Error::Protocol(format!("bad handshake message: {e}")))?;

        if message.is_challenge() {
            if self.challenge_answered {
                tracing::debug!("repeat challenge ignored");
                return Ok(HandshakeStep::Ignored);
            }
            let response = credentials.identity_response(client_type, timestamp)?;
            self.challenge_answered = true;
            return Ok(HandshakeStep::Respond(response));
        }

        if message.is_welcome() && self.challenge_answered {
            self.state = ConnectionState::Authenticated;
            return Ok(HandshakeStep::Authenticated);
        }

        tracing::debug!(operation = message.operation.as_deref(), "handshake message ignored");
        Ok(HandshakeStep::Ignored)
    }

    /// The socket closed or failed, or we disconnected; returns the prior state
    pub fn closed(&mut self) -> ConnectionState {
        let previous = self.state;
        self.state = ConnectionState::Disconnected;
        self.challenge_answered = false;
        previous
    }
}
