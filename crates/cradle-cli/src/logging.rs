//! Logging setup
//!
//! Logs go to stderr, or to `log_file` when one is configured so that
//! `watch` can run in the background. `CRADLE_LOG` (a level, or full
//! directives) wins over `RUST_LOG`, which wins over `--verbose`.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing::info;
use tracing_subscriber::EnvFilter;

use cradle_core::Config;

/// Filter directives for a level name (`info`, `debug`, ...)
fn directives(level: &str) -> String {
    format!("cradle_core={},cradle={}", level, level)
}

fn env_filter(verbose: bool) -> EnvFilter {
    match std::env::var("CRADLE_LOG") {
        Ok(value) if value.contains('=') => EnvFilter::new(value),
        Ok(level) => EnvFilter::new(directives(&level)),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(directives(if verbose { "debug" } else { "info" }))
        }),
    }
}

/// Install the global subscriber (ignored if one is already set)
pub fn init(config: &Config, verbose: bool) {
    let filter = env_filter(verbose);

    if let Some(ref log_path) = config.log_file {
        let log_file = match OpenOptions::new().create(true).append(true).open(log_path) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
                return;
            }
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(false)
            .with_writer(Mutex::new(log_file))
            .try_init();

        info!("Logging to {:?}", log_path);
        return;
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives() {
        assert_eq!(directives("debug"), "cradle_core=debug,cradle=debug");
    }
}
