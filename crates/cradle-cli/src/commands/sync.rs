//! Sync command handlers

use std::time::Duration;

use anyhow::{bail, Result};
use serde_json::json;

use cradle_core::{Config, HttpGateway, SharedState, SqliteStore, SyncEngine, SyncOutcome};

use crate::output::{Output, OutputFormat};

/// Run one sync cycle
pub async fn sync(config: &Config, state: SharedState<SqliteStore>, output: &Output) -> Result<()> {
    let engine = SyncEngine::new(HttpGateway::from_config(config)?, state);

    output.message("Syncing...");
    let outcome = engine.sync_once().await;
    report(&outcome, output);

    if let SyncOutcome::Failed(reason) = outcome {
        bail!("{}\nIf this persists, run `cradle login` again.", reason);
    }
    Ok(())
}

/// Sync periodically until Ctrl-C
pub async fn watch(
    config: &Config,
    state: SharedState<SqliteStore>,
    interval: Option<u64>,
    output: &Output,
) -> Result<()> {
    let interval = interval
        .map(|secs| Duration::from_secs(secs.max(1)))
        .unwrap_or_else(|| config.sync_interval());
    let engine = SyncEngine::new(HttpGateway::from_config(config)?, state);

    output.message(&format!(
        "Syncing every {}s, press Ctrl-C to stop",
        interval.as_secs()
    ));

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    engine
        .run_periodic(interval, shutdown, |outcome| report(outcome, output))
        .await;

    output.message("Stopped");
    Ok(())
}

fn report(outcome: &SyncOutcome, output: &Output) {
    match output.format {
        OutputFormat::Json => {
            let value = match outcome {
                SyncOutcome::Synced {
                    fetched,
                    dropped,
                    total,
                    refreshed,
                } => json!({
                    "status": "synced",
                    "fetched": fetched,
                    "dropped": dropped,
                    "total": total,
                    "refreshed": refreshed
                }),
                SyncOutcome::Busy => json!({"status": "busy"}),
                SyncOutcome::Failed(reason) => json!({"status": "failed", "error": reason}),
            };
            println!("{}", value);
        }
        OutputFormat::Quiet => {}
        OutputFormat::Human => match outcome {
            SyncOutcome::Synced {
                fetched,
                dropped,
                total,
                ..
            } => {
                output.success(&format!(
                    "Sync complete - {} new or updated, {} cached",
                    fetched, total
                ));
                if *dropped > 0 {
                    println!("  {} unrecognized event(s) skipped", dropped);
                }
            }
            SyncOutcome::Busy => println!("A sync is already running"),
            SyncOutcome::Failed(reason) => eprintln!("⚠ Sync failed: {}", reason),
        },
    }
}
