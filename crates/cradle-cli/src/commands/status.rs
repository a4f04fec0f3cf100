//! Status command handler

use anyhow::Result;
use chrono::{Local, TimeZone, Utc};

use cradle_core::{queries, session};
use cradle_core::{Config, EventKind, LocalState, SharedState, SqliteStore};

use crate::output::{Output, OutputFormat};

/// Show login state, cursor and cached event counts
pub fn show(config: &Config, state: SharedState<SqliteStore>, output: &Output) -> Result<()> {
    let trackz = LocalState::lock(&state)?.trackz()?;
    let status = session::status(&state)?;
    let counts: Vec<(EventKind, usize)> = EventKind::ALL
        .into_iter()
        .map(|kind| (kind, queries::events_by_kind(&trackz, kind).len()))
        .collect();
    let token_valid = status.expires_at > Utc::now().timestamp();

    match output.format {
        OutputFormat::Json => {
            let counts: serde_json::Map<String, serde_json::Value> = counts
                .iter()
                .map(|(kind, n)| (kind.to_string(), (*n).into()))
                .collect();
            println!(
                "{}",
                serde_json::json!({
                    "logged_in": status.logged_in,
                    "family_key": status.family_key,
                    "token_expires_at": status.expires_at,
                    "token_valid": token_valid,
                    "cursor": status.cursor,
                    "last_session": status.last_session,
                    "store": config.store_path(),
                    "counts": counts,
                    "total": trackz.len()
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", if status.logged_in { "logged-in" } else { "logged-out" });
        }
        OutputFormat::Human => {
            println!("Cradle Status");
            println!("=============");
            println!();
            println!("Session:");
            if status.logged_in {
                println!("  Family key: {}", status.family_key);
                let expiry = Local
                    .timestamp_opt(status.expires_at, 0)
                    .single()
                    .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| status.expires_at.to_string());
                println!(
                    "  Token:      {} ({})",
                    if token_valid { "valid" } else { "expired, refreshed on next sync" },
                    expiry
                );
            } else {
                println!("  Not logged in. Run `cradle login --email <email>`.");
            }
            println!();
            println!("Sync:");
            println!(
                "  Cursor: {}",
                if status.cursor.is_empty() {
                    "(none, next sync is a full sync)"
                } else {
                    status.cursor.as_str()
                }
            );
            println!("  Store:  {}", config.store_path().display());
            println!();
            println!("Cached events: {}", trackz.len());
            for (kind, n) in counts {
                println!("  {:<8} {}", kind, n);
            }
        }
    }

    Ok(())
}
