//! Login and logout command handlers

use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};

use cradle_core::session;
use cradle_core::{
    ChannelEndpoint, Config, HttpGateway, Negotiator, Session, SessionError, SharedState,
    SqliteStore, WsChannel,
};

use crate::output::{Output, OutputFormat};

/// Log in and negotiate the family key
pub async fn login(
    config: &Config,
    state: SharedState<SqliteStore>,
    email: String,
    password: Option<String>,
    output: &Output,
) -> Result<()> {
    if config.api_key.is_empty() {
        bail!(
            "API key not configured. Set it with:\n  \
             cradle config set api_key <key>"
        );
    }

    let password = match password {
        Some(password) => password,
        None => read_password()?,
    };

    let gateway = HttpGateway::from_config(config)?;
    let session = Session::new(gateway, state);
    let channel = WsChannel::new(ChannelEndpoint::new(&config.realtime_namespace));
    let mut negotiator = Negotiator::new(
        channel,
        config.realtime_host.as_str(),
        config.handshake_timeout(),
    );

    output.message(&format!("Logging in as {}...", email));
    let logged_in = match session.login(&mut negotiator, &email, &password).await {
        Ok(logged_in) => logged_in,
        Err(e) if e.is_bad_credentials() => bail!("Invalid email or password"),
        Err(e @ SessionError::Negotiation(_)) => {
            return Err(e).context("Password accepted but the family key could not be obtained")
        }
        Err(e) => return Err(e.into()),
    };

    match output.format {
        OutputFormat::Json => output.json(&logged_in),
        OutputFormat::Quiet => println!("{}", logged_in.family_key),
        OutputFormat::Human => {
            output.success(&format!("Logged in, family key {}", logged_in.family_key));
            if logged_in.cache_reset {
                println!("  Cached events from the previous family were discarded.");
            }
            println!("  Run `cradle sync` to fetch events.");
        }
    }

    Ok(())
}

/// Forget all local state
pub fn logout(state: SharedState<SqliteStore>, output: &Output) -> Result<()> {
    session::logout(&state)?;
    output.success("Logged out, local data cleared");
    Ok(())
}

/// Read the password from the first line of stdin
fn read_password() -> Result<String> {
    eprint!("Password: ");
    io::stderr().flush()?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password from stdin")?;

    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("No password given");
    }
    Ok(password)
}
