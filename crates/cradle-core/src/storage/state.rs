//! Typed view over the persisted key-value layout

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tracing::warn;

use super::error::{StorageError, StorageResult};
use super::KeyValueStore;
use crate::models::{Credentials, TrackedEvent, Trackz};

/// Persisted key names
pub mod keys {
    pub const TRACKZ: &str = "trackz";
    pub const ID_TOKEN: &str = "idToken";
    pub const REFRESH_TOKEN: &str = "refreshToken";
    pub const NEXT_SYNC_TOKEN: &str = "nextSyncToken";
    pub const TOKEN_EXPIRATION: &str = "tokenExpiration";
    pub const FAMILY_KEY: &str = "familyKey";
    pub const WEB_SOCKET_SESSION: &str = "webSocketSession";
}

/// Local state shared between the sync engine (writer) and readers
pub type SharedState<S> = Arc<Mutex<LocalState<S>>>;

/// Credential set, cursor and cached events on top of a [`KeyValueStore`]
pub struct LocalState<S> {
    store: S,
}

impl<S: KeyValueStore> LocalState<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Wrap into a [`SharedState`]
    pub fn shared(self) -> SharedState<S> {
        Arc::new(Mutex::new(self))
    }

    /// Lock a shared state, mapping poisoning to a storage error
    pub fn lock(shared: &SharedState<S>) -> StorageResult<MutexGuard<'_, LocalState<S>>> {
        shared.lock().map_err(|_| StorageError::LockPoisoned)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn get_string(&self, key: &str) -> StorageResult<String> {
        Ok(self.store.get(key)?.unwrap_or_default())
    }

    /// Cached events
    ///
    /// Entries that no longer decode are skipped with a warning so one bad
    /// record cannot hide the rest of the cache.
    pub fn trackz(&self) -> StorageResult<Trackz> {
        let Some(json) = self.store.get(keys::TRACKZ)? else {
            return Ok(Trackz::new());
        };

        let raw: BTreeMap<String, Value> =
            serde_json::from_str(&json).map_err(|e| StorageError::InvalidValue {
                key: keys::TRACKZ.to_string(),
                details: e.to_string(),
            })?;

        let mut trackz = Trackz::new();
        for (id, value) in raw {
            match TrackedEvent::from_value(value) {
                Ok(event) => {
                    trackz.insert(id, event);
                }
                Err(e) => warn!("Skipping cached event {}: {}", id, e),
            }
        }
        Ok(trackz)
    }

    /// Sync cursor, empty when no sync has completed
    pub fn cursor(&self) -> StorageResult<String> {
        self.get_string(keys::NEXT_SYNC_TOKEN)
    }

    pub fn family_key(&self) -> StorageResult<String> {
        self.get_string(keys::FAMILY_KEY)
    }

    /// Last realtime session id recorded at login
    pub fn last_session(&self) -> StorageResult<String> {
        self.get_string(keys::WEB_SOCKET_SESSION)
    }

    /// Token expiration in epoch seconds
    ///
    /// Missing or unparseable values read as 0, which forces a refresh.
    pub fn token_expiration(&self) -> StorageResult<i64> {
        let raw = self.get_string(keys::TOKEN_EXPIRATION)?;
        if raw.is_empty() {
            return Ok(0);
        }
        match raw.trim().parse() {
            Ok(secs) => Ok(secs),
            Err(_) => {
                warn!("Ignoring unparseable token expiration {:?}", raw);
                Ok(0)
            }
        }
    }

    pub fn credentials(&self) -> StorageResult<Credentials> {
        Ok(Credentials {
            id_token: self.get_string(keys::ID_TOKEN)?,
            refresh_token: self.get_string(keys::REFRESH_TOKEN)?,
            expires_at: self.token_expiration()?,
            family_key: self.family_key()?,
        })
    }

    /// Persist a fresh id token, refresh token and expiration together
    pub fn save_tokens(
        &mut self,
        id_token: &str,
        refresh_token: &str,
        expires_at: i64,
    ) -> StorageResult<()> {
        self.store.set_many(&[
            (keys::ID_TOKEN, id_token.to_string()),
            (keys::REFRESH_TOKEN, refresh_token.to_string()),
            (keys::TOKEN_EXPIRATION, expires_at.to_string()),
        ])
    }

    /// Persist a completed login as one write
    ///
    /// Tokens and family key land together, so a login that fails halfway
    /// never pairs one account's tokens with another's family key. With
    /// `reset_cache` the cached events and cursor are emptied as well.
    pub fn save_login(
        &mut self,
        credentials: &Credentials,
        session_id: Option<&str>,
        reset_cache: bool,
    ) -> StorageResult<()> {
        let mut entries = vec![
            (keys::ID_TOKEN, credentials.id_token.clone()),
            (keys::REFRESH_TOKEN, credentials.refresh_token.clone()),
            (keys::TOKEN_EXPIRATION, credentials.expires_at.to_string()),
            (keys::FAMILY_KEY, credentials.family_key.clone()),
        ];
        if let Some(session_id) = session_id {
            entries.push((keys::WEB_SOCKET_SESSION, session_id.to_string()));
        }
        if reset_cache {
            entries.push((keys::TRACKZ, serde_json::to_string(&Trackz::new())?));
            entries.push((keys::NEXT_SYNC_TOKEN, String::new()));
        }
        self.store.set_many(&entries)
    }

    pub fn save_family_key(&mut self, family_key: &str) -> StorageResult<()> {
        self.store.set(keys::FAMILY_KEY, family_key)
    }

    pub fn save_last_session(&mut self, session_id: &str) -> StorageResult<()> {
        self.store.set(keys::WEB_SOCKET_SESSION, session_id)
    }

    /// Persist a merged event mapping and its cursor as one write
    pub fn commit_sync(&mut self, trackz: &Trackz, cursor: &str) -> StorageResult<()> {
        let json = serde_json::to_string(trackz)?;
        self.store.set_many(&[
            (keys::TRACKZ, json),
            (keys::NEXT_SYNC_TOKEN, cursor.to_string()),
        ])
    }

    /// Forget everything (logout)
    pub fn clear(&mut self) -> StorageResult<()> {
        self.store.clear()
    }
}
