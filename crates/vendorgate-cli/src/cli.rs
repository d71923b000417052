//! CLI argument definitions for vendorgate.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use clap::{Parser, Subcommand};
use vendorgate_auth::DEFAULT_USER_ID;

use crate::helpers::parse_key_val;

/// vendorgate -- OAuth-backed vendor API tools.
#[derive(Parser)]
#[command(
    name = "vendorgate",
    version,
    about = "vendorgate -- OAuth-backed vendor API tools",
    long_about = "Authorizes against third-party SaaS vendors, keeps their tokens fresh in a \
                  local credential cache, and serves each vendor's API as line-delimited \
                  JSON tools."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the OAuth authorization flow and store the resulting credential.
    Auth {
        /// Vendor identifier (e.g. hubspot, zoom, salesforce).
        vendor: String,

        /// Local credential owner.
        #[arg(long, default_value = DEFAULT_USER_ID)]
        user: String,

        /// Scope to request; repeat for several. Defaults to the config's scopes.
        #[arg(long = "scope")]
        scopes: Vec<String>,

        /// Paste the redirect URL instead of running the local callback listener.
        #[arg(long)]
        paste: bool,

        /// Give up waiting for the redirect after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Serve the vendor's API as JSON tools over stdin/stdout.
    Server {
        /// Vendor identifier.
        vendor: String,

        /// Local credential owner.
        #[arg(long, default_value = DEFAULT_USER_ID)]
        user: String,
    },

    /// Store a manually obtained token.
    SetToken {
        /// Vendor identifier.
        vendor: String,

        /// Local credential owner.
        #[arg(long, default_value = DEFAULT_USER_ID)]
        user: String,

        /// Access token (or API key).
        #[arg(long, env = "VENDORGATE_TOKEN", hide_env_values = true)]
        token: String,

        /// Refresh token, if the vendor issued one.
        #[arg(long)]
        refresh_token: Option<String>,

        /// Lifetime of the access token in seconds.
        #[arg(long)]
        expires_in: Option<i64>,

        /// Vendor-specific field as key=value; repeat for several.
        #[arg(long = "extra", value_parser = parse_key_val)]
        extra: Vec<(String, String)>,
    },

    /// Delete a stored credential.
    Logout {
        /// Vendor identifier.
        vendor: String,

        /// Local credential owner.
        #[arg(long, default_value = DEFAULT_USER_ID)]
        user: String,
    },

    /// List stored credentials and their expiry (never prints tokens).
    Status {
        /// Only show this vendor.
        vendor: Option<String>,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    /// Vendor the command operates on, if it names one.
    pub fn vendor(&self) -> Option<&str> {
        match self {
            Self::Auth { vendor, .. }
            | Self::Server { vendor, .. }
            | Self::SetToken { vendor, .. }
            | Self::Logout { vendor, .. } => Some(vendor.as_str()),
            Self::Status { vendor, .. } => vendor.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_defaults() {
        let cli = Cli::try_parse_from(["vendorgate", "auth", "hubspot"]).unwrap();
        match cli.command {
            Commands::Auth {
                vendor,
                user,
                scopes,
                paste,
                timeout,
            } => {
                assert_eq!(vendor, "hubspot");
                assert_eq!(user, "local");
                assert!(scopes.is_empty());
                assert!(!paste);
                assert!(timeout.is_none());
            }
            _ => panic!("expected auth"),
        }
    }

    #[test]
    fn repeated_scopes_and_paste() {
        let cli = Cli::try_parse_from([
            "vendorgate",
            "auth",
            "zoom",
            "--scope",
            "meeting:read",
            "--scope",
            "user:read",
            "--paste",
        ])
        .unwrap();
        match cli.command {
            Commands::Auth { scopes, paste, .. } => {
                assert_eq!(scopes, vec!["meeting:read", "user:read"]);
                assert!(paste);
            }
            _ => panic!("expected auth"),
        }
    }

    #[test]
    fn set_token_with_extras() {
        let cli = Cli::try_parse_from([
            "vendorgate",
            "set-token",
            "zendesk",
            "--token",
            "abc",
            "--expires-in",
            "3600",
            "--extra",
            "custom_subdomain=acme",
        ])
        .unwrap();
        assert_eq!(cli.command.vendor(), Some("zendesk"));
        match cli.command {
            Commands::SetToken {
                token,
                expires_in,
                extra,
                refresh_token,
                ..
            } => {
                assert_eq!(token, "abc");
                assert_eq!(expires_in, Some(3600));
                assert!(refresh_token.is_none());
                assert_eq!(extra, vec![("custom_subdomain".to_string(), "acme".to_string())]);
            }
            _ => panic!("expected set-token"),
        }
    }

    #[test]
    fn malformed_extra_rejected() {
        let args = ["vendorgate", "set-token", "x", "--token", "t", "--extra", "novalue"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn status_vendor_is_optional() {
        let cli = Cli::try_parse_from(["vendorgate", "status"]).unwrap();
        assert_eq!(cli.command.vendor(), None);
        let cli = Cli::try_parse_from(["vendorgate", "status", "zoom", "--json"]).unwrap();
        assert_eq!(cli.command.vendor(), Some("zoom"));
    }
}
