//! CLI entry point for vendorgate.
//!
//! This binary provides the `vendorgate` command with subcommands for
//! authorizing vendors, serving their APIs as tools, and managing the
//! local credential cache.

mod cli;
mod helpers;
mod server;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{Map, Value};
use tokio::io::BufReader;
use tracing::{info, warn};
use url::Url;
use vendorgate_adapters::{Adapter, AdapterError, RestAdapter};
use vendorgate_auth::{
    AuthError, AuthManager, CallbackServer, CodeReceiver, CredentialStatus, Expiry, OAuthConfig,
    PasteReceiver, VendorgateConfig, WithTimeout,
};

use crate::cli::{Cli, Commands};
use crate::helpers::{format_duration, format_timestamp, init_tracing};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is not an error.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(match cli.command {
        Commands::Auth { .. } | Commands::Server { .. } => "info",
        _ => "warn",
    });

    let vendor = cli.command.vendor().map(str::to_string);
    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            if let Some(vendor) = vendor
                && let Some(hint) = auth_error(&e).and_then(|auth| auth.operator_hint(&vendor))
            {
                eprintln!("hint: {hint}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<()> {
    let manager = AuthManager::new(VendorgateConfig::from_env())
        .context("failed to open the credential store")?;

    match command {
        Commands::Auth {
            vendor,
            user,
            scopes,
            paste,
            timeout,
        } => cmd_auth(&manager, &vendor, &user, &scopes, paste, timeout).await,
        Commands::Server { vendor, user } => cmd_server(&manager, &vendor, &user).await,
        Commands::SetToken {
            vendor,
            user,
            token,
            refresh_token,
            expires_in,
            extra,
        } => cmd_set_token(
            &manager,
            &vendor,
            &user,
            &token,
            refresh_token.as_deref(),
            expires_in,
            extra,
        ),
        Commands::Logout { vendor, user } => cmd_logout(&manager, &vendor, &user),
        Commands::Status { vendor, json } => cmd_status(&manager, vendor.as_deref(), json),
    }
}

/// The authentication error behind `err`, if there is one.
fn auth_error(err: &anyhow::Error) -> Option<&AuthError> {
    err.downcast_ref::<AuthError>()
        .or_else(|| err.downcast_ref::<AdapterError>().and_then(AdapterError::auth))
}

// ---------------------------------------------------------------------------
// Subcommand: auth
// ---------------------------------------------------------------------------

async fn cmd_auth(
    manager: &AuthManager,
    vendor: &str,
    user: &str,
    scopes: &[String],
    paste: bool,
    timeout: Option<u64>,
) -> Result<()> {
    let config = manager.load_config(vendor)?;

    if paste {
        authorize(manager, &config, user, scopes, PasteReceiver::stdin(), timeout, true).await
    } else {
        let receiver = CallbackServer::bind(&config.redirect_uri)
            .await
            .with_context(|| format!("cannot listen on {} (try --paste)", config.redirect_uri))?;
        authorize(manager, &config, user, scopes, receiver, timeout, false).await
    }
}

async fn authorize<R>(
    manager: &AuthManager,
    config: &OAuthConfig,
    user: &str,
    scopes: &[String],
    receiver: R,
    timeout: Option<u64>,
    paste: bool,
) -> Result<()>
where
    R: CodeReceiver,
{
    let on_url = |url: &Url| {
        eprintln!();
        eprintln!("  Open this URL in your browser to authorize {}:", config.vendor);
        eprintln!();
        eprintln!("    {url}");
        eprintln!();
        if paste {
            eprintln!("  Then paste the full URL you were redirected to and press Enter:");
        } else {
            eprintln!("  Waiting for the redirect on {} ...", config.redirect_uri);
        }
    };

    let flow = async {
        match timeout {
            Some(secs) => {
                let mut receiver = WithTimeout::new(receiver, Duration::from_secs(secs));
                manager.authenticate(config, user, scopes, &mut receiver, on_url).await
            }
            None => {
                let mut receiver = receiver;
                manager.authenticate(config, user, scopes, &mut receiver, on_url).await
            }
        }
    };

    let credential = tokio::select! {
        result = flow => result?,
        _ = tokio::signal::ctrl_c() => anyhow::bail!("authorization cancelled"),
    };

    println!();
    println!("  Authorized {}/{}.", credential.vendor, credential.user_id);
    match credential.expires_at {
        Some(ts) => println!("  Access token expires {}.", format_timestamp(ts)),
        None => println!("  Access token does not expire."),
    }
    if !credential.is_refreshable() {
        println!("  No refresh token was issued; re-run `vendorgate auth` when it expires.");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: server
// ---------------------------------------------------------------------------

async fn cmd_server(manager: &AuthManager, vendor: &str, user: &str) -> Result<()> {
    let configs = match manager.load_config(vendor) {
        Ok(config) => vec![config],
        Err(AuthError::ConfigNotFound { .. }) => {
            let path = manager.settings().oauth_config_path(vendor)?;
            warn!(
                vendor,
                path = %path.display(),
                "no OAuth config; stored tokens will not be refreshed"
            );
            Vec::new()
        }
        Err(e) => return Err(e.into()),
    };

    let guard = Arc::new(manager.guard(configs));
    let adapter = RestAdapter::new(vendor, user, guard);

    match adapter.health_check().await {
        Ok(status) => info!(vendor, user, %status, "adapter health"),
        Err(e) => warn!(vendor, user, error = %e, "health check failed"),
    }

    server::serve(&adapter, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

// ---------------------------------------------------------------------------
// Subcommand: set-token
// ---------------------------------------------------------------------------

fn cmd_set_token(
    manager: &AuthManager,
    vendor: &str,
    user: &str,
    token: &str,
    refresh_token: Option<&str>,
    expires_in: Option<i64>,
    extra: Vec<(String, String)>,
) -> Result<()> {
    let extra: Map<String, Value> = extra
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();

    let credential =
        manager.store_static_token(vendor, user, token, refresh_token, expires_in, extra)?;

    println!("  Stored token for {}/{}.", credential.vendor, credential.user_id);
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: logout
// ---------------------------------------------------------------------------

fn cmd_logout(manager: &AuthManager, vendor: &str, user: &str) -> Result<()> {
    match manager.logout(vendor, user) {
        Ok(()) => println!("  Removed credential for {vendor}/{user}."),
        Err(AuthError::NotFound { .. }) => println!("  No credential stored for {vendor}/{user}."),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: status
// ---------------------------------------------------------------------------

fn cmd_status(manager: &AuthManager, vendor: Option<&str>, json: bool) -> Result<()> {
    let statuses = manager.status(vendor)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    if statuses.is_empty() {
        println!("  No stored credentials.");
        return Ok(());
    }

    println!();
    println!("  {:<14} {:<12} {:<28} {:<8} EXPIRES", "VENDOR", "USER", "STATE", "REFRESH");
    for status in &statuses {
        println!(
            "  {:<14} {:<12} {:<28} {:<8} {}",
            status.vendor,
            status.user_id,
            describe_expiry(status),
            if status.refreshable { "yes" } else { "no" },
            status.expires_at.map(format_timestamp).unwrap_or_else(|| "-".into()),
        );
    }
    println!();
    Ok(())
}

fn describe_expiry(status: &CredentialStatus) -> String {
    match status.expiry {
        Expiry::Never => "valid (no expiry)".to_string(),
        Expiry::Valid { remaining_secs } => {
            format!("valid ({} left)", format_duration(remaining_secs))
        }
        Expiry::Expiring { remaining_secs } => {
            format!("expiring ({} left)", format_duration(remaining_secs))
        }
        Expiry::Expired { since_secs } => format!("expired ({} ago)", format_duration(since_secs)),
    }
}
