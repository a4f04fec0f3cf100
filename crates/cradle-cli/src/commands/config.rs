//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use cradle_core::Config;

use crate::output::{Output, OutputFormat};

const KEYS: &str = "data_dir, api_key, instance_token, realtime_host, realtime_namespace, \
                    functions_url, identity_url, token_url, handshake_timeout_secs, \
                    sync_interval_secs, log_file";

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "api_key": mask(&config.api_key),
                    "instance_token": mask(&config.instance_token),
                    "realtime_host": config.realtime_host,
                    "realtime_namespace": config.realtime_namespace,
                    "functions_url": config.functions_url,
                    "identity_url": config.identity_url,
                    "token_url": config.token_url,
                    "handshake_timeout_secs": config.handshake_timeout_secs,
                    "sync_interval_secs": config.sync_interval_secs,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:               {}", config.data_dir.display());
            println!("  api_key:                {}", mask(&config.api_key));
            println!("  instance_token:         {}", mask(&config.instance_token));
            println!("  realtime_host:          {}", config.realtime_host);
            println!("  realtime_namespace:     {}", config.realtime_namespace);
            println!("  functions_url:          {}", config.functions_url);
            println!("  identity_url:           {}", config.identity_url);
            println!("  token_url:              {}", config.token_url);
            println!("  handshake_timeout_secs: {}", config.handshake_timeout_secs);
            println!("  sync_interval_secs:     {}", config.sync_interval_secs);
            println!(
                "  log_file:               {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    let shown = match key.as_str() {
        "api_key" | "instance_token" => mask(&value),
        _ => value,
    };
    output.success(&format!("Set {} = {}", key, shown));

    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => config.data_dir = value.into(),
        "api_key" => config.api_key = value.to_string(),
        "instance_token" => config.instance_token = value.to_string(),
        "realtime_host" => config.realtime_host = non_empty(key, value)?,
        "realtime_namespace" => config.realtime_namespace = non_empty(key, value)?,
        "functions_url" => config.functions_url = non_empty(key, value)?,
        "identity_url" => config.identity_url = non_empty(key, value)?,
        "token_url" => config.token_url = non_empty(key, value)?,
        "handshake_timeout_secs" => {
            config.handshake_timeout_secs = value
                .parse()
                .context("Invalid value for handshake_timeout_secs. Use a number of seconds.")?;
        }
        "sync_interval_secs" => {
            config.sync_interval_secs = value
                .parse()
                .context("Invalid value for sync_interval_secs. Use a number of seconds.")?;
        }
        "log_file" => {
            config.log_file = if value.is_empty() || value == "none" {
                None
            } else {
                Some(value.into())
            };
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                KEYS
            );
        }
    }
    Ok(())
}

fn non_empty(key: &str, value: &str) -> Result<String> {
    if value.trim().is_empty() {
        bail!("{} cannot be empty", key);
    }
    Ok(value.trim().to_string())
}

/// Show only the last four characters of a secret
fn mask(secret: &str) -> String {
    if secret.is_empty() {
        return "(not set)".to_string();
    }
    let tail: String = secret
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{}", tail)
}
