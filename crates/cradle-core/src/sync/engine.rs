//! Sync engine
//!
//! One sync cycle refreshes the id token when it has expired, fetches the
//! events changed since the stored cursor, merges them into the cache and
//! persists the merged mapping together with the new cursor.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::merge::{classify, merge};
use crate::gateway::{Gateway, GatewayError};
use crate::storage::{KeyValueStore, LocalState, SharedState, StorageError};

/// Engine status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    /// Minting a new id token
    Refreshing,
    Fetching,
    /// Writing merged events
    Persisting,
    /// Last cycle failed
    Error,
}

/// Result of one [`SyncEngine::sync_once`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced {
        /// Recognized events in the fetched page
        fetched: usize,
        /// Fetched records that were not a known event kind
        dropped: usize,
        /// Cached events after the merge
        total: usize,
        /// Whether the id token was refreshed first
        refreshed: bool,
    },
    /// Another sync was already running
    Busy,
    Failed(String),
}

impl SyncOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncOutcome::Synced { .. })
    }
}

#[derive(Debug, Error)]
enum SyncError {
    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Token refresh failed: {0}")]
    Refresh(#[source] GatewayError),

    #[error("Fetch failed: {0}")]
    Fetch(#[source] GatewayError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Incremental sync of the local event cache
pub struct SyncEngine<G, S> {
    gateway: G,
    state: SharedState<S>,
    /// Held for the duration of a cycle
    in_flight: Mutex<()>,
    status: watch::Sender<SyncStatus>,
    status_rx: watch::Receiver<SyncStatus>,
}

impl<G: Gateway, S: KeyValueStore> SyncEngine<G, S> {
    pub fn new(gateway: G, state: SharedState<S>) -> Self {
        let (status, status_rx) = watch::channel(SyncStatus::Idle);
        Self {
            gateway,
            state,
            in_flight: Mutex::new(()),
            status,
            status_rx,
        }
    }

    pub fn status(&self) -> SyncStatus {
        *self.status_rx.borrow()
    }

    /// Subscribe to status changes
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_rx.clone()
    }

    pub fn state(&self) -> &SharedState<S> {
        &self.state
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Run one sync cycle now
    pub async fn sync_once(&self) -> SyncOutcome {
        self.sync_once_at(Utc::now()).await
    }

    /// Run one sync cycle, deciding token expiry against `now`
    ///
    /// Never fails: errors are logged and reported as
    /// [`SyncOutcome::Failed`], with the cached events and cursor left as
    /// they were.
    pub async fn sync_once_at(&self, now: DateTime<Utc>) -> SyncOutcome {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("Sync already in flight");
            return SyncOutcome::Busy;
        };

        debug!("Starting sync");
        match self.run(now).await {
            Ok(outcome) => {
                self.set_status(SyncStatus::Idle);
                if let SyncOutcome::Synced {
                    fetched,
                    dropped,
                    total,
                    ..
                } = outcome
                {
                    info!(
                        "Sync complete, fetched={} dropped={} total={}",
                        fetched, dropped, total
                    );
                }
                outcome
            }
            Err(e) => {
                self.set_status(SyncStatus::Error);
                warn!("Sync failed: {}", e);
                SyncOutcome::Failed(e.to_string())
            }
        }
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<SyncOutcome, SyncError> {
        let (credentials, cursor) = {
            let state = LocalState::lock(&self.state)?;
            (state.credentials()?, state.cursor()?)
        };
        if !credentials.is_complete() {
            return Err(SyncError::NotLoggedIn);
        }

        let now_secs = now.timestamp();
        let refreshed = credentials.is_expired(now_secs);
        let mut id_token = credentials.id_token.clone();
        if refreshed {
            self.set_status(SyncStatus::Refreshing);
            debug!("Id token expired at {}, refreshing", credentials.expires_at);
            let grant = self
                .gateway
                .refresh_token(&credentials.refresh_token)
                .await
                .map_err(SyncError::Refresh)?;

            let expires_at = now_secs.saturating_add(grant.expires_in);
            LocalState::lock(&self.state)?.save_tokens(
                &grant.id_token,
                &grant.refresh_token,
                expires_at,
            )?;
            id_token = grant.id_token;
            info!("Refreshed id token, valid until {}", expires_at);
        }

        self.set_status(SyncStatus::Fetching);
        if cursor.is_empty() {
            debug!("No cursor, requesting a full sync");
        }
        let page = self
            .gateway
            .fetch_stats(&id_token, &credentials.family_key, &cursor)
            .await
            .map_err(SyncError::Fetch)?;

        let classified = classify(page.trackz);
        let fetched = classified.events.len();
        let dropped = classified.dropped.len();

        self.set_status(SyncStatus::Persisting);
        let mut state = LocalState::lock(&self.state)?;
        let mut trackz = state.trackz()?;
        merge(&mut trackz, classified.events);
        state.commit_sync(&trackz, &page.next_sync_key)?;

        Ok(SyncOutcome::Synced {
            fetched,
            dropped,
            total: trackz.len(),
            refreshed,
        })
    }

    /// Sync every `interval` until `shutdown` resolves
    ///
    /// The first cycle runs immediately. `on_outcome` sees every result;
    /// a failed cycle is simply retried on the next tick.
    pub async fn run_periodic<F>(
        &self,
        interval: Duration,
        shutdown: impl Future<Output = ()>,
        mut on_outcome: F,
    ) where
        F: FnMut(&SyncOutcome),
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!("Syncing every {}s", interval.as_secs());
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Stopping periodic sync");
                    break;
                }
                _ = ticker.tick() => {
                    let outcome = self.sync_once().await;
                    on_outcome(&outcome);
                }
            }
        }
    }

    fn set_status(&self, status: SyncStatus) {
        let _ = self.status.send(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{StatsResult, TokenGrant};
    use crate::models::Trackz;
    use crate::storage::{MemoryStore, SqliteStore};
    use crate::testing::FakeGateway;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tokio::sync::Notify;

    const NOW: i64 = 1_700_000_000;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(NOW, 0).unwrap()
    }

    fn logged_in(expires_at: i64) -> SharedState<MemoryStore> {
        let mut state = LocalState::new(MemoryStore::new());
        state.save_tokens("id-old", "refresh-old", expires_at).unwrap();
        state.save_family_key("fam").unwrap();
        state.shared()
    }

    fn page(cursor: &str, events: &[(&str, Value)]) -> StatsResult {
        StatsResult {
            next_sync_key: cursor.to_string(),
            trackz: events
                .iter()
                .map(|(id, value)| (id.to_string(), value.clone()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn diaper(begin: i64) -> Value {
        json!({"type": "DIAPER", "beginDt": begin, "diaperTypePee": true, "childKey": "c1"})
    }

    fn trackz_of<S: KeyValueStore>(state: &SharedState<S>) -> Trackz {
        LocalState::lock(state).unwrap().trackz().unwrap()
    }

    fn cursor_of<S: KeyValueStore>(state: &SharedState<S>) -> String {
        LocalState::lock(state).unwrap().cursor().unwrap()
    }

    #[tokio::test]
    async fn test_first_sync_fills_empty_cache() {
        let state = logged_in(NOW + 600);
        let gateway = FakeGateway::new().with_stats(page("abc123", &[("e1", diaper(1000))]));
        let engine = SyncEngine::new(gateway, Arc::clone(&state));

        let outcome = engine.sync_once_at(now()).await;
        assert_eq!(
            outcome,
            SyncOutcome::Synced {
                fetched: 1,
                dropped: 0,
                total: 1,
                refreshed: false
            }
        );

        assert!(trackz_of(&state).contains_key("e1"));
        assert_eq!(cursor_of(&state), "abc123");
        assert_eq!(
            engine.gateway().fetches.lock().unwrap()[0],
            ("id-old".to_string(), "fam".to_string(), String::new())
        );
        assert_eq!(engine.status(), SyncStatus::Idle);
    }

    #[tokio::test]
    async fn test_incremental_sync_is_additive() {
        let state = logged_in(NOW + 600);
        let gateway = FakeGateway::new()
            .with_stats(page("c1", &[("e1", diaper(1))]))
            .with_stats(page("c2", &[("e2", diaper(2))]));
        let engine = SyncEngine::new(gateway, Arc::clone(&state));

        assert!(engine.sync_once_at(now()).await.is_synced());
        assert!(engine.sync_once_at(now()).await.is_synced());

        let trackz = trackz_of(&state);
        assert!(trackz.contains_key("e1"));
        assert!(trackz.contains_key("e2"));
        assert_eq!(cursor_of(&state), "c2");

        // The second fetch resumed from the first cursor
        assert_eq!(engine.gateway().fetches.lock().unwrap()[1].2, "c1");
    }

    #[tokio::test]
    async fn test_refetched_event_is_overwritten() {
        let state = logged_in(NOW + 600);
        let gateway = FakeGateway::new()
            .with_stats(page("c1", &[("e1", diaper(1))]))
            .with_stats(page("c2", &[("e1", diaper(99))]));
        let engine = SyncEngine::new(gateway, Arc::clone(&state));

        engine.sync_once_at(now()).await;
        engine.sync_once_at(now()).await;

        assert_eq!(trackz_of(&state)["e1"].begin_ms(), 99);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_before_fetch() {
        let state = logged_in(NOW);
        let gateway = FakeGateway::new()
            .with_refresh(TokenGrant {
                id_token: "id-new".to_string(),
                refresh_token: "refresh-new".to_string(),
                expires_in: 3600,
                user_id: "uid".to_string(),
            })
            .with_stats(page("c1", &[]));
        let engine = SyncEngine::new(gateway, Arc::clone(&state));

        let outcome = engine.sync_once_at(now()).await;
        assert!(matches!(
            outcome,
            SyncOutcome::Synced {
                refreshed: true,
                ..
            }
        ));
        assert_eq!(engine.gateway().calls(), vec!["refresh", "fetch"]);
        assert_eq!(engine.gateway().fetches.lock().unwrap()[0].0, "id-new");

        let credentials = LocalState::lock(&state).unwrap().credentials().unwrap();
        assert_eq!(credentials.id_token, "id-new");
        assert_eq!(credentials.refresh_token, "refresh-new");
        assert_eq!(credentials.expires_at, NOW + 3600);
    }

    #[tokio::test]
    async fn test_oversized_refresh_lifetime_saturates() {
        let state = logged_in(NOW);
        let gateway = FakeGateway::new()
            .with_refresh(TokenGrant {
                id_token: "id-new".to_string(),
                refresh_token: "refresh-new".to_string(),
                expires_in: i64::MAX,
                user_id: "uid".to_string(),
            })
            .with_stats(page("c1", &[]));
        let engine = SyncEngine::new(gateway, Arc::clone(&state));

        assert!(engine.sync_once_at(now()).await.is_synced());
        let credentials = LocalState::lock(&state).unwrap().credentials().unwrap();
        assert_eq!(credentials.expires_at, i64::MAX);
        assert!(!credentials.is_expired(NOW));
    }

    #[tokio::test]
    async fn test_valid_token_is_not_refreshed() {
        let state = logged_in(NOW + 1);
        let gateway = FakeGateway::new().with_stats(page("c1", &[]));
        let engine = SyncEngine::new(gateway, state);

        engine.sync_once_at(now()).await;
        assert_eq!(engine.gateway().calls(), vec!["fetch"]);
    }

    #[tokio::test]
    async fn test_refresh_failure_fetches_nothing() {
        let state = logged_in(NOW - 10);
        let engine = SyncEngine::new(FakeGateway::new(), Arc::clone(&state));

        let outcome = engine.sync_once_at(now()).await;
        assert!(matches!(outcome, SyncOutcome::Failed(ref reason) if reason.contains("refresh")));
        assert_eq!(engine.gateway().calls(), vec!["refresh"]);
        assert_eq!(
            LocalState::lock(&state).unwrap().credentials().unwrap().id_token,
            "id-old"
        );
        assert_eq!(engine.status(), SyncStatus::Error);
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_state_untouched() {
        let state = logged_in(NOW + 600);
        let gateway = FakeGateway::new().with_stats(page("c1", &[("e1", diaper(1))]));
        let engine = SyncEngine::new(gateway, Arc::clone(&state));
        engine.sync_once_at(now()).await;

        // No more canned pages: the fake answers 500
        let outcome = engine.sync_once_at(now()).await;
        assert!(matches!(outcome, SyncOutcome::Failed(_)));
        assert_eq!(cursor_of(&state), "c1");
        assert_eq!(trackz_of(&state).len(), 1);
    }

    #[tokio::test]
    async fn test_unrecognized_feed_is_dropped() {
        let state = logged_in(NOW + 600);
        let gateway = FakeGateway::new().with_stats(page(
            "c1",
            &[
                ("f1", json!({"type": "FEED", "feedType": "BREAST", "beginDt": 5, "breastBeginSide": "LEFT"})),
                ("f2", json!({"type": "FEED", "beginDt": 6})),
            ],
        ));
        let engine = SyncEngine::new(gateway, Arc::clone(&state));

        let outcome = engine.sync_once_at(now()).await;
        assert_eq!(
            outcome,
            SyncOutcome::Synced {
                fetched: 1,
                dropped: 1,
                total: 1,
                refreshed: false
            }
        );
        let trackz = trackz_of(&state);
        assert!(trackz.contains_key("f1"));
        assert!(!trackz.contains_key("f2"));
    }

    #[tokio::test]
    async fn test_not_logged_in_makes_no_calls() {
        let state = LocalState::new(MemoryStore::new()).shared();
        let engine = SyncEngine::new(FakeGateway::new(), state);

        let outcome = engine.sync_once_at(now()).await;
        assert_eq!(outcome, SyncOutcome::Failed("Not logged in".to_string()));
        assert!(engine.gateway().calls().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_sync_is_busy() {
        let hold = Arc::new(Notify::new());
        let gateway = FakeGateway {
            hold_fetch: Some(Arc::clone(&hold)),
            ..FakeGateway::new()
        }
        .with_stats(page("c1", &[("e1", diaper(1))]));
        let engine = SyncEngine::new(gateway, logged_in(NOW + 600));

        let (first, second) = tokio::join!(engine.sync_once_at(now()), async {
            let outcome = engine.sync_once_at(now()).await;
            hold.notify_one();
            outcome
        });

        assert!(first.is_synced());
        assert_eq!(second, SyncOutcome::Busy);
        assert_eq!(engine.gateway().calls(), vec!["fetch"]);
    }

    #[tokio::test]
    async fn test_sync_persists_to_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cradle.db");

        {
            let mut state = LocalState::new(SqliteStore::open(&path).unwrap());
            state.save_tokens("id", "refresh", NOW + 600).unwrap();
            state.save_family_key("fam").unwrap();
            let gateway = FakeGateway::new().with_stats(page("abc123", &[("e1", diaper(1000))]));
            let engine = SyncEngine::new(gateway, state.shared());
            assert!(engine.sync_once_at(now()).await.is_synced());
        }

        let reopened = LocalState::new(SqliteStore::open(&path).unwrap());
        assert_eq!(reopened.cursor().unwrap(), "abc123");
        assert!(reopened.trackz().unwrap().contains_key("e1"));
    }

    #[tokio::test]
    async fn test_run_periodic_until_shutdown() {
        let state = logged_in(i64::MAX);
        let gateway = FakeGateway::new()
            .with_stats(page("c1", &[("e1", diaper(1))]))
            .with_stats(page("c2", &[("e2", diaper(2))]));
        let engine = SyncEngine::new(gateway, Arc::clone(&state));

        let stop = Arc::new(Notify::new());
        let shutdown = {
            let stop = Arc::clone(&stop);
            async move { stop.notified().await }
        };

        let mut outcomes = Vec::new();
        engine
            .run_periodic(Duration::from_millis(1), shutdown, |outcome| {
                outcomes.push(outcome.clone());
                if outcomes.len() == 2 {
                    stop.notify_one();
                }
            })
            .await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(SyncOutcome::is_synced));
        assert_eq!(cursor_of(&state), "c2");
    }
}
