//! Session negotiation over the realtime channel
//!
//! Drives one login-time exchange with the realtime backend:
//!
//! 1. Connect to the well-known host and read the handshake
//! 2. Follow at most one redirect to another host
//! 3. Authenticate with the id token
//! 4. Query `userz/{uid}/familyKeyz` and take the first key
//! 5. Close the channel
//!
//! Every wait is bounded by the configured timeout. There is no retry; a
//! failed negotiation is reported and the caller decides what to do.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::channel::{ChannelError, DuplexChannel};
use crate::models::SessionDescriptor;
use crate::protocol::{self, ClientFrame, Handshake, ProtocolError};

/// Negotiation progress, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Disconnected,
    /// Socket open, waiting for the handshake
    Connected,
    HandshakeReceived,
    Redirecting,
    Reconnected,
    Authenticating,
    Authenticated,
    QueryingKey,
    KeyObtained,
    Closed,
}

/// Errors that abort a negotiation
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("Realtime channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Unexpected realtime response: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Result of a successful negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub family_key: String,
    pub user_id: String,
    /// Session granted by the handshake, if the server granted one
    pub session: Option<SessionDescriptor>,
}

/// Obtains the family key for an id token
pub struct Negotiator<C> {
    channel: C,
    host: String,
    timeout: Duration,
    state: NegotiationState,
}

impl<C: DuplexChannel> Negotiator<C> {
    /// Create a negotiator starting at `host`
    pub fn new(channel: C, host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            channel,
            host: host.into(),
            timeout,
            state: NegotiationState::Disconnected,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Borrow the underlying channel
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Run the whole exchange and return the family key
    ///
    /// The channel is closed on every exit path.
    pub async fn negotiate(&mut self, id_token: &str) -> Result<Negotiated, NegotiationError> {
        let result = self.run(id_token).await;

        self.channel.reset();
        self.channel.close().await;
        self.transition(NegotiationState::Closed);

        result
    }

    async fn run(&mut self, id_token: &str) -> Result<Negotiated, NegotiationError> {
        let host = self.host.clone();
        self.channel.connect(&host, None).await?;
        self.transition(NegotiationState::Connected);

        let session = self.handshake().await?;
        if let Some(ref session) = session {
            info!(
                "Realtime session {} on {} (protocol v{}, server ts {})",
                session.session_id, session.host, session.version, session.timestamp
            );
        }

        self.channel.reset();
        self.transition(NegotiationState::Authenticating);
        self.channel.send(&ClientFrame::auth(id_token)).await?;
        let auth = self.receive().await?;
        let user_id = protocol::parse_auth_user_id(&auth)?;
        self.transition(NegotiationState::Authenticated);
        debug!("Authenticated as {}", user_id);

        self.channel.reset();
        self.transition(NegotiationState::QueryingKey);
        self.channel
            .send(&ClientFrame::family_keys_query(&user_id))
            .await?;
        let keys = self.receive().await?;
        let family_key = protocol::parse_family_key(&keys)?;
        self.transition(NegotiationState::KeyObtained);
        info!("Obtained family key {}", family_key);

        Ok(Negotiated {
            family_key,
            user_id,
            session,
        })
    }

    /// Read the handshake, following a single redirect
    async fn handshake(&mut self) -> Result<Option<SessionDescriptor>, NegotiationError> {
        let frame = self.receive().await?;
        self.transition(NegotiationState::HandshakeReceived);

        match protocol::parse_handshake(&frame)? {
            Handshake::Established(session) => Ok(Some(session)),
            Handshake::Redirect { host, kind } => {
                info!("Realtime session refused, redirecting to {}", host);
                debug!("Redirect type: {:?}", kind);
                self.transition(NegotiationState::Redirecting);

                self.channel.reset();
                self.channel.close().await;
                self.channel.connect(&host, None).await?;
                self.transition(NegotiationState::Reconnected);

                // One hop only: a second refusal is not followed
                let frame = self.receive().await?;
                self.transition(NegotiationState::HandshakeReceived);
                Ok(protocol::descriptor_after_redirect(&frame))
            }
        }
    }

    /// Wait for and dequeue exactly one message
    async fn receive(&mut self) -> Result<Value, NegotiationError> {
        self.channel.await_message(self.timeout).await?;
        self.channel
            .next_message()
            .ok_or(NegotiationError::Channel(ChannelError::Closed))
    }

    fn transition(&mut self, next: NegotiationState) {
        debug!("Negotiation {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}
