//! Event query command handlers

use anyhow::Result;
use chrono::{Local, Utc};

use cradle_core::queries::{self, EventRef};
use cradle_core::{EventKind, LocalState, SharedState, SqliteStore, Trackz};

use crate::output::Output;

/// List cached events, optionally narrowed to one kind and to today
pub fn list(
    state: SharedState<SqliteStore>,
    kind: Option<EventKind>,
    today: bool,
    output: &Output,
) -> Result<()> {
    let trackz = LocalState::lock(&state)?.trackz()?;
    let start_ms = today.then(|| queries::start_of_day_ms(&Local::now()));
    output.print_events(&select(&trackz, kind, start_ms));
    Ok(())
}

/// Show the earliest event of a kind
pub fn first(state: SharedState<SqliteStore>, kind: EventKind, output: &Output) -> Result<()> {
    let trackz = LocalState::lock(&state)?.trackz()?;
    output.print_event(
        "First",
        kind,
        queries::first_event_by_kind(&trackz, kind),
        None,
    );
    Ok(())
}

/// Show the latest event of a kind and how long ago it started
pub fn last(state: SharedState<SqliteStore>, kind: EventKind, output: &Output) -> Result<()> {
    let trackz = LocalState::lock(&state)?.trackz()?;
    let found = queries::last_event_by_kind(&trackz, kind);
    let freshness = found
        .map(|(_, event)| queries::freshness(event.begin_ms(), Utc::now().timestamp_millis()));
    output.print_event("Last", kind, found, freshness);
    Ok(())
}

fn select(trackz: &Trackz, kind: Option<EventKind>, start_ms: Option<i64>) -> Vec<EventRef<'_>> {
    let start_ms = start_ms.unwrap_or(i64::MIN);
    match kind {
        Some(kind) => queries::events_by_kind_since(trackz, kind, start_ms),
        None => EventKind::ALL
            .into_iter()
            .flat_map(|kind| queries::events_by_kind_since(trackz, kind, start_ms))
            .collect(),
    }
}
