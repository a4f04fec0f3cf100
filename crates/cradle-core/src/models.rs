//! Data models for Cradle
//!
//! Defines the tracked event records (feed, sleep, diaper, pump, routine),
//! the session credential set and the realtime handshake descriptor.
//!
//! Events keep the backend's wire shape: the `type` discriminant selects the
//! kind, and feed events carry a second `feedType` discriminant. Classification
//! reads the discriminants first and only then decodes the kind-specific body.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Mapping from event identifier to event record
pub type Trackz = BTreeMap<String, TrackedEvent>;

/// Event kind, the value of the `type` discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Feed,
    Sleep,
    Diaper,
    Pump,
    Routine,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Feed,
        EventKind::Sleep,
        EventKind::Diaper,
        EventKind::Pump,
        EventKind::Routine,
    ];

    /// Wire tag for this kind
    pub fn as_tag(&self) -> &'static str {
        match self {
            EventKind::Feed => "FEED",
            EventKind::Sleep => "SLEEP",
            EventKind::Diaper => "DIAPER",
            EventKind::Pump => "PUMP",
            EventKind::Routine => "ROUTINE",
        }
    }

    /// Parse a wire tag (exact match, as sent by the backend)
    pub fn from_tag(tag: &str) -> Option<Self> {
        EventKind::ALL.into_iter().find(|kind| kind.as_tag() == tag)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.as_tag().to_lowercase())
    }
}

impl FromStr for EventKind {
    type Err = String;

    /// Case-insensitive, accepts plurals ("diapers")
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        let singular = upper.strip_suffix('S').unwrap_or(&upper);
        EventKind::from_tag(&upper)
            .or_else(|| EventKind::from_tag(singular))
            .ok_or_else(|| {
                format!(
                    "unknown event kind '{}' (expected feed, sleep, diaper, pump or routine)",
                    s
                )
            })
    }
}

/// Fields shared by every event kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    /// Start of the event, epoch milliseconds
    #[serde(deserialize_with = "decode::begin")]
    pub begin_dt: i64,
    #[serde(default, deserialize_with = "decode::lenient")]
    pub child_key: String,
    #[serde(default, deserialize_with = "decode::lenient")]
    pub create_user_key: String,
    #[serde(default, deserialize_with = "decode::lenient")]
    pub user_key: String,
    #[serde(default, deserialize_with = "decode::lenient")]
    pub tz: String,
    #[serde(default, deserialize_with = "decode::millis")]
    pub update_dt: i64,
    #[serde(default, deserialize_with = "decode::millis")]
    pub server_update_dt: i64,
    #[serde(default, deserialize_with = "decode::millis")]
    pub ord: i64,
    #[serde(default, deserialize_with = "decode::lenient")]
    pub etag: String,
    /// Server fields without a typed counterpart, kept so they survive a save
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BreastSide {
    Left,
    Right,
}

/// Nursing session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreastFeed {
    #[serde(flatten)]
    pub meta: EventMeta,
    #[serde(default, deserialize_with = "decode::lenient", skip_serializing_if = "Option::is_none")]
    pub breast_begin_side: Option<BreastSide>,
    /// Milliseconds nursed on the left side
    #[serde(default, deserialize_with = "decode::opt_millis", skip_serializing_if = "Option::is_none")]
    pub breast_left_duration: Option<i64>,
    /// Milliseconds nursed on the right side
    #[serde(default, deserialize_with = "decode::opt_millis", skip_serializing_if = "Option::is_none")]
    pub breast_right_duration: Option<i64>,
}

/// Bottle feed
///
/// Volumes are stored as `num * base^exp` in `unit`; `bottleVolume` is the
/// pre-normalised total the dashboard sums.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BottleFeed {
    #[serde(flatten)]
    pub meta: EventMeta,
    #[serde(default, deserialize_with = "decode::lenient", skip_serializing_if = "Option::is_none")]
    pub bottle_volume: Option<f64>,
    #[serde(default, deserialize_with = "decode::lenient", skip_serializing_if = "Option::is_none")]
    pub bottle_volume_base: Option<f64>,
    #[serde(default, deserialize_with = "decode::lenient", skip_serializing_if = "Option::is_none")]
    pub bottle_volume_exp: Option<i32>,
    #[serde(default, deserialize_with = "decode::lenient", skip_serializing_if = "Option::is_none")]
    pub bottle_volume_num: Option<f64>,
    #[serde(default, deserialize_with = "decode::lenient", skip_serializing_if = "Option::is_none")]
    pub bottle_volume_unit: Option<String>,
    #[serde(default, deserialize_with = "decode::lenient", skip_serializing_if = "Option::is_none")]
    pub bottle_type_breast_milk: Option<bool>,
    #[serde(default, deserialize_with = "decode::lenient", skip_serializing_if = "Option::is_none")]
    pub bottle_type_formula: Option<bool>,
    #[serde(default, deserialize_with = "decode::lenient", skip_serializing_if = "Option::is_none")]
    pub bottle_breast_milk_volume_num: Option<f64>,
    #[serde(default, deserialize_with = "decode::lenient", skip_serializing_if = "Option::is_none")]
    pub bottle_breast_milk_volume_exp: Option<i32>,
    #[serde(default, deserialize_with = "decode::lenient", skip_serializing_if = "Option::is_none")]
    pub bottle_breast_milk_volume_unit: Option<String>,
}

/// Feed events, discriminated by `feedType`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "feedType")]
pub enum FeedEvent {
    #[serde(rename = "BREAST")]
    Breast(BreastFeed),
    #[serde(rename = "BOTTLE")]
    Bottle(BottleFeed),
}

impl FeedEvent {
    pub fn meta(&self) -> &EventMeta {
        match self {
            FeedEvent::Breast(feed) => &feed.meta,
            FeedEvent::Bottle(feed) => &feed.meta,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    /// End of the nap; absent while the baby is still asleep
    #[serde(default, deserialize_with = "decode::opt_millis", skip_serializing_if = "Option::is_none")]
    pub end_dt: Option<i64>,
}

impl SleepEvent {
    /// Length of a finished nap in milliseconds
    pub fn duration_ms(&self) -> Option<i64> {
        self.end_dt.map(|end| end - self.meta.begin_dt)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiaperEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    #[serde(default, deserialize_with = "decode::lenient", skip_serializing_if = "Option::is_none")]
    pub diaper_type_pee: Option<bool>,
    #[serde(default, deserialize_with = "decode::lenient", skip_serializing_if = "Option::is_none")]
    pub diaper_type_poop: Option<bool>,
    #[serde(default, deserialize_with = "decode::lenient", skip_serializing_if = "Option::is_none")]
    pub diaper_type_dry: Option<bool>,
    #[serde(default, deserialize_with = "decode::lenient", skip_serializing_if = "Option::is_none")]
    pub diaper_type_rash: Option<bool>,
}

impl DiaperEvent {
    pub fn is_wet(&self) -> bool {
        self.diaper_type_pee.unwrap_or(false)
    }

    pub fn is_soiled(&self) -> bool {
        self.diaper_type_poop.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PumpEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    #[serde(default, deserialize_with = "decode::opt_millis", skip_serializing_if = "Option::is_none")]
    pub end_dt: Option<i64>,
    #[serde(default, deserialize_with = "decode::opt_millis", skip_serializing_if = "Option::is_none")]
    pub breast_left_duration: Option<i64>,
    #[serde(default, deserialize_with = "decode::opt_millis", skip_serializing_if = "Option::is_none")]
    pub breast_right_duration: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    #[serde(default, deserialize_with = "decode::lenient")]
    pub routine_name: String,
    #[serde(default, deserialize_with = "decode::lenient")]
    pub note: String,
}

/// A tracked event, discriminated by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TrackedEvent {
    #[serde(rename = "FEED")]
    Feed(FeedEvent),
    #[serde(rename = "SLEEP")]
    Sleep(SleepEvent),
    #[serde(rename = "DIAPER")]
    Diaper(DiaperEvent),
    #[serde(rename = "PUMP")]
    Pump(PumpEvent),
    #[serde(rename = "ROUTINE")]
    Routine(RoutineEvent),
}

/// Why a raw event could not be classified
#[derive(Debug, Error)]
pub enum EventError {
    #[error("event has no 'type' discriminant")]
    MissingKind,

    #[error("unsupported event type '{0}'")]
    UnknownKind(String),

    #[error("unsupported feed type {0:?}")]
    UnknownFeedType(Option<String>),

    #[error("malformed {kind} event: {source}")]
    Malformed {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },
}

impl TrackedEvent {
    /// Classify a raw backend record
    ///
    /// Reads `type` (and `feedType` for feeds) before decoding, so unknown
    /// kinds are reported as such rather than as decode failures.
    pub fn from_value(value: Value) -> Result<Self, EventError> {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(EventError::MissingKind)?;
        let kind =
            EventKind::from_tag(tag).ok_or_else(|| EventError::UnknownKind(tag.to_string()))?;

        if kind == EventKind::Feed {
            let feed_type = value.get("feedType").and_then(Value::as_str);
            if !matches!(feed_type, Some("BREAST") | Some("BOTTLE")) {
                return Err(EventError::UnknownFeedType(feed_type.map(str::to_string)));
            }
        }

        serde_json::from_value(value).map_err(|source| EventError::Malformed { kind, source })
    }

    pub fn kind(&self) -> EventKind {
        match self {
            TrackedEvent::Feed(_) => EventKind::Feed,
            TrackedEvent::Sleep(_) => EventKind::Sleep,
            TrackedEvent::Diaper(_) => EventKind::Diaper,
            TrackedEvent::Pump(_) => EventKind::Pump,
            TrackedEvent::Routine(_) => EventKind::Routine,
        }
    }

    pub fn meta(&self) -> &EventMeta {
        match self {
            TrackedEvent::Feed(feed) => feed.meta(),
            TrackedEvent::Sleep(event) => &event.meta,
            TrackedEvent::Diaper(event) => &event.meta,
            TrackedEvent::Pump(event) => &event.meta,
            TrackedEvent::Routine(event) => &event.meta,
        }
    }

    /// Start timestamp, epoch milliseconds
    pub fn begin_ms(&self) -> i64 {
        self.meta().begin_dt
    }
}

/// Field decoders for server records
///
/// A field of the wrong type reads as its default instead of rejecting the
/// record. Only an unusable `beginDt` makes a record malformed.
mod decode {
    use serde::de::{DeserializeOwned, Error};
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    /// Epoch milliseconds from an integer, a float or a numeric string
    pub fn millis_of(value: &Value) -> Option<i64> {
        match value {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>().ok().or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(|f| f as i64)
                })
            }
            _ => None,
        }
    }

    pub fn begin<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let value = Value::deserialize(deserializer)?;
        millis_of(&value).ok_or_else(|| D::Error::custom(format!("unusable beginDt {}", value)))
    }

    pub fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        Ok(millis_of(&Value::deserialize(deserializer)?).unwrap_or_default())
    }

    pub fn opt_millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
        Ok(millis_of(&Value::deserialize(deserializer)?))
    }

    pub fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned + Default,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }
}

/// Stored login credentials
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub id_token: String,
    pub refresh_token: String,
    /// Expiration of `id_token`, epoch seconds
    pub expires_at: i64,
    pub family_key: String,
}

impl Credentials {
    /// Whether the id token must be refreshed before use at `now_secs`
    pub fn is_expired(&self, now_secs: i64) -> bool {
        self.expires_at <= now_secs
    }

    /// Whether a login has completed (token and family key present)
    pub fn is_complete(&self) -> bool {
        !self.id_token.is_empty() && !self.family_key.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("id_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("family_key", &self.family_key)
            .finish()
    }
}

/// Session parameters announced by the realtime server's handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptor {
    /// Server timestamp, epoch milliseconds
    pub timestamp: i64,
    pub version: String,
    pub host: String,
    pub session_id: String,
}
