//! Classification and merge of fetched events

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use crate::models::{EventError, TrackedEvent, Trackz};

/// Fetched events split into recognized and dropped
#[derive(Debug, Default)]
pub struct Classified {
    pub events: Trackz,
    pub dropped: Vec<(String, EventError)>,
}

/// Classify a raw fetch page
///
/// Records are dropped only for an unknown `type`/`feedType` or an unusable
/// `beginDt`; other ill-typed fields decode to their defaults.
pub fn classify(raw: BTreeMap<String, Value>) -> Classified {
    let mut classified = Classified::default();
    for (id, value) in raw {
        match TrackedEvent::from_value(value) {
            Ok(event) => {
                classified.events.insert(id, event);
            }
            Err(e) => {
                warn!("Dropping fetched event {}: {}", id, e);
                classified.dropped.push((id, e));
            }
        }
    }
    classified
}

/// Shallow merge: fetched keys overwrite, nothing is ever removed
pub fn merge(cached: &mut Trackz, fetched: Trackz) {
    cached.extend(fetched);
}
