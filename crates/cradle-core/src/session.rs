//! Login and logout
//!
//! A login verifies the password over REST, negotiates the family key over
//! the realtime channel with the fresh id token, then stores tokens and
//! family key in one write. Logging out forgets all local state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::channel::DuplexChannel;
use crate::gateway::{Gateway, GatewayError};
use crate::models::Credentials;
use crate::negotiator::{NegotiationError, Negotiator};
use crate::storage::{KeyValueStore, LocalState, SharedState, StorageError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Login failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Could not obtain the family key: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SessionError {
    /// Whether the user typed the wrong email or password
    pub fn is_bad_credentials(&self) -> bool {
        matches!(self, SessionError::Gateway(GatewayError::AuthenticationFailed))
    }
}

/// Result of a successful login
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoggedIn {
    pub user_id: String,
    pub family_key: String,
    /// Id token expiration, epoch seconds
    pub expires_at: i64,
    /// Realtime session granted during negotiation
    pub session_id: Option<String>,
    /// Whether cached events of another family were discarded
    pub cache_reset: bool,
}

/// Snapshot of the stored login
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub logged_in: bool,
    pub family_key: String,
    pub expires_at: i64,
    pub cursor: String,
    pub last_session: String,
}

/// Login state on top of the shared local state
pub struct Session<G, S> {
    gateway: G,
    state: SharedState<S>,
}

impl<G: Gateway, S: KeyValueStore> Session<G, S> {
    pub fn new(gateway: G, state: SharedState<S>) -> Self {
        Self { gateway, state }
    }

    pub fn state(&self) -> &SharedState<S> {
        &self.state
    }

    pub async fn login<C: DuplexChannel>(
        &self,
        negotiator: &mut Negotiator<C>,
        email: &str,
        password: &str,
    ) -> Result<LoggedIn, SessionError> {
        self.login_at(negotiator, email, password, Utc::now()).await
    }

    /// Log in, computing the token expiration from `now`
    ///
    /// Nothing is stored unless negotiation succeeds, so a failed login keeps
    /// the previous account intact. Switching to an account of another family
    /// discards the cached events and cursor.
    pub async fn login_at<C: DuplexChannel>(
        &self,
        negotiator: &mut Negotiator<C>,
        email: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<LoggedIn, SessionError> {
        let grant = self.gateway.verify_password(email, password).await?;
        let expires_at = now.timestamp().saturating_add(grant.expires_in);
        info!("Password verified for {}", email);

        let negotiated = negotiator.negotiate(&grant.id_token).await?;
        let session_id = negotiated.session.map(|session| session.session_id);

        let mut state = LocalState::lock(&self.state)?;
        let previous_family = state.family_key()?;
        let cache_reset = !previous_family.is_empty() && previous_family != negotiated.family_key;
        if cache_reset {
            info!("Family changed, discarding cached events");
        }
        let credentials = Credentials {
            id_token: grant.id_token,
            refresh_token: grant.refresh_token,
            expires_at,
            family_key: negotiated.family_key.clone(),
        };
        state.save_login(&credentials, session_id.as_deref(), cache_reset)?;

        Ok(LoggedIn {
            user_id: negotiated.user_id,
            family_key: negotiated.family_key,
            expires_at,
            session_id,
            cache_reset,
        })
    }
}

/// Forget tokens, family key, cursor and cached events
pub fn logout<S: KeyValueStore>(state: &SharedState<S>) -> Result<(), SessionError> {
    LocalState::lock(state)?.clear()?;
    info!("Logged out");
    Ok(())
}

pub fn status<S: KeyValueStore>(state: &SharedState<S>) -> Result<SessionStatus, SessionError> {
    let state = LocalState::lock(state)?;
    let credentials = state.credentials()?;
    Ok(SessionStatus {
        logged_in: credentials.is_complete(),
        family_key: credentials.family_key,
        expires_at: credentials.expires_at,
        cursor: state.cursor()?,
        last_session: state.last_session()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::PasswordGrant;
    use crate::models::Trackz;
    use crate::storage::MemoryStore;
    use crate::testing::{FakeGateway, ScriptedChannel};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(NOW, 0).unwrap()
    }

    fn gateway() -> FakeGateway {
        FakeGateway {
            password: Some(PasswordGrant {
                id_token: "id-1".to_string(),
                refresh_token: "refresh-1".to_string(),
                expires_in: 3600,
                local_id: "uid-1".to_string(),
                email: "parent@example.com".to_string(),
            }),
            ..FakeGateway::new()
        }
    }

    fn negotiator(family_key: &str) -> Negotiator<ScriptedChannel> {
        let mut keys = serde_json::Map::new();
        keys.insert(family_key.to_string(), Value::Bool(true));
        let channel = ScriptedChannel::new(
            vec![json!({"t": "c", "d": {"t": "h", "d": {"ts": 1, "v": "5", "h": "h", "s": "sess-9"}}})],
            vec![
                json!({"t": "d", "d": {"r": 2, "b": {"s": "ok", "d": {"auth": {"user_id": "uid-1"}}}}}),
                json!({"t": "d", "d": {"r": 4, "b": {"s": "ok", "d": keys}}}),
            ],
        );
        Negotiator::new(channel, "realtime.host", Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_login_stores_tokens_and_family_key() {
        let session = Session::new(gateway(), LocalState::new(MemoryStore::new()).shared());
        let mut negotiator = negotiator("fam-1");

        let logged_in = session
            .login_at(&mut negotiator, "parent@example.com", "secret", now())
            .await
            .unwrap();
        assert_eq!(logged_in.family_key, "fam-1");
        assert_eq!(logged_in.user_id, "uid-1");
        assert_eq!(logged_in.expires_at, NOW + 3600);
        assert_eq!(logged_in.session_id.as_deref(), Some("sess-9"));
        assert!(!logged_in.cache_reset);

        // The negotiation authenticated with the freshly issued token
        assert_eq!(negotiator.channel().sent()[0]["d"]["b"]["cred"], "id-1");

        let state = LocalState::lock(session.state()).unwrap();
        let credentials = state.credentials().unwrap();
        assert_eq!(credentials.id_token, "id-1");
        assert_eq!(credentials.refresh_token, "refresh-1");
        assert_eq!(credentials.expires_at, NOW + 3600);
        assert_eq!(credentials.family_key, "fam-1");
        assert_eq!(state.last_session().unwrap(), "sess-9");
    }

    #[tokio::test]
    async fn test_bad_password_skips_negotiation() {
        let session = Session::new(FakeGateway::new(), LocalState::new(MemoryStore::new()).shared());
        let mut negotiator = negotiator("fam-1");

        let err = session
            .login_at(&mut negotiator, "parent@example.com", "wrong", now())
            .await
            .unwrap_err();
        assert!(err.is_bad_credentials());
        assert!(negotiator.channel().calls.is_empty());
        assert!(!status(session.state()).unwrap().logged_in);
    }

    fn failing_negotiator() -> Negotiator<ScriptedChannel> {
        let channel = ScriptedChannel::new(vec![json!({"d": {"d": {"ts": 1}}})], vec![]);
        Negotiator::new(channel, "realtime.host", Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_failed_negotiation_stores_nothing() {
        let session = Session::new(gateway(), LocalState::new(MemoryStore::new()).shared());

        let err = session
            .login_at(&mut failing_negotiator(), "parent@example.com", "secret", now())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Negotiation(_)));

        let status = status(session.state()).unwrap();
        assert!(!status.logged_in);
        assert_eq!(status.family_key, "");
        assert!(LocalState::lock(session.state()).unwrap().store().is_empty());
    }

    #[tokio::test]
    async fn test_failed_relogin_keeps_previous_account() {
        let mut state = LocalState::new(MemoryStore::new());
        state.save_tokens("id-old", "refresh-old", NOW + 60).unwrap();
        state.save_family_key("fam-old").unwrap();
        state.commit_sync(&Trackz::new(), "cursor-old").unwrap();
        let session = Session::new(gateway(), state.shared());

        session
            .login_at(&mut failing_negotiator(), "parent@example.com", "secret", now())
            .await
            .unwrap_err();

        let state = LocalState::lock(session.state()).unwrap();
        let credentials = state.credentials().unwrap();
        assert_eq!(credentials.id_token, "id-old");
        assert_eq!(credentials.refresh_token, "refresh-old");
        assert_eq!(credentials.expires_at, NOW + 60);
        assert_eq!(credentials.family_key, "fam-old");
        assert_eq!(state.cursor().unwrap(), "cursor-old");
    }

    #[tokio::test]
    async fn test_oversized_token_lifetime_saturates() {
        let mut gateway = gateway();
        if let Some(grant) = gateway.password.as_mut() {
            grant.expires_in = i64::MAX;
        }
        let session = Session::new(gateway, LocalState::new(MemoryStore::new()).shared());

        let logged_in = session
            .login_at(&mut negotiator("fam-1"), "parent@example.com", "secret", now())
            .await
            .unwrap();
        assert_eq!(logged_in.expires_at, i64::MAX);
        assert_eq!(status(session.state()).unwrap().expires_at, i64::MAX);
    }

    #[tokio::test]
    async fn test_login_to_other_family_resets_cache() {
        let mut state = LocalState::new(MemoryStore::new());
        state.save_family_key("fam-old").unwrap();
        let trackz: Trackz = [(
            "e1".to_string(),
            crate::models::TrackedEvent::from_value(json!({"type": "DIAPER", "beginDt": 1}))
                .unwrap(),
        )]
        .into_iter()
        .collect();
        state.commit_sync(&trackz, "cursor-old").unwrap();
        let session = Session::new(gateway(), state.shared());

        let logged_in = session
            .login_at(&mut negotiator("fam-new"), "parent@example.com", "secret", now())
            .await
            .unwrap();
        assert!(logged_in.cache_reset);

        let state = LocalState::lock(session.state()).unwrap();
        assert!(state.trackz().unwrap().is_empty());
        assert_eq!(state.cursor().unwrap(), "");
    }

    #[tokio::test]
    async fn test_relogin_same_family_keeps_cache() {
        let mut state = LocalState::new(MemoryStore::new());
        state.save_family_key("fam-1").unwrap();
        state.commit_sync(&Trackz::new(), "cursor-1").unwrap();
        let session = Session::new(gateway(), state.shared());

        session
            .login_at(&mut negotiator("fam-1"), "parent@example.com", "secret", now())
            .await
            .unwrap();
        assert_eq!(status(session.state()).unwrap().cursor, "cursor-1");
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let shared = LocalState::new(MemoryStore::new()).shared();
        let session = Session::new(gateway(), Arc::clone(&shared));
        session
            .login_at(&mut negotiator("fam-1"), "parent@example.com", "secret", now())
            .await
            .unwrap();
        assert!(status(session.state()).unwrap().logged_in);

        logout(&shared).unwrap();

        let status = status(session.state()).unwrap();
        assert!(!status.logged_in);
        assert_eq!(status.expires_at, 0);
        assert_eq!(status.last_session, "");
        assert!(LocalState::lock(&shared).unwrap().store().is_empty());
    }
}
