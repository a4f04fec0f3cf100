//! Summary command handlers

use anyhow::{bail, Result};
use chrono::Local;

use cradle_core::queries;
use cradle_core::{LocalState, SharedState, SqliteStore};

use crate::output::Output;

/// Today's diaper, feed and nap totals
pub fn today(state: SharedState<SqliteStore>, output: &Output) -> Result<()> {
    let trackz = LocalState::lock(&state)?.trackz()?;
    let start_ms = queries::start_of_day_ms(&Local::now());
    output.print_summary(&queries::daily_summary(&trackz, start_ms));
    Ok(())
}

/// Per-day counts for the last `days` days
pub fn week(state: SharedState<SqliteStore>, days: u32, output: &Output) -> Result<()> {
    if days == 0 || days > 366 {
        bail!("--days must be between 1 and 366");
    }
    let trackz = LocalState::lock(&state)?.trackz()?;
    output.print_day_counts(&queries::daily_counts(&trackz, &Local::now(), days));
    Ok(())
}
