//! Error types for the auth crate.
//!
//! All token lifecycle operations surface errors through [`AuthError`]. The
//! first group of variants is the authentication taxonomy callers are
//! expected to branch on; the rest are ambient failures (configuration,
//! transport, parsing).

use serde_json::Value;
use vendorgate_vault::VaultError;

/// Unified error type for the vendorgate auth engine.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    // -- Authentication taxonomy -------------------------------------------
    /// No credential is on record; the operator must authorize first.
    #[error("no credential on record for {vendor}/{user_id}")]
    NotFound { vendor: String, user_id: String },

    /// Credential storage is unavailable (permissions, disk errors).
    #[error("credential storage unavailable: {0}")]
    IoFailure(#[source] std::io::Error),

    /// The vendor rejected the authorization code exchange.
    #[error(
        "authorization code exchange rejected by {vendor}{}: {payload}",
        status_suffix(.status)
    )]
    AuthExchange {
        vendor: String,
        status: Option<u16>,
        /// The vendor's error payload, kept for diagnostics.
        payload: Value,
    },

    /// The credential carries no refresh token.
    #[error("credential for {vendor}/{user_id} has no refresh token")]
    NotRefreshable { vendor: String, user_id: String },

    /// The refresh token itself was rejected (revoked or invalid).
    #[error("refresh token rejected by {vendor}{}: {payload}", status_suffix(.status))]
    RefreshRejected {
        vendor: String,
        status: Option<u16>,
        payload: Value,
    },

    /// The refresh failed for a reason that may clear up on its own.
    #[error("transient refresh failure for {vendor}: {reason}")]
    RefreshTransient { vendor: String, reason: String },

    /// The vendor still rejected the call after a successful refresh.
    #[error("authentication expired for {vendor}/{user_id}: request rejected after refresh")]
    AuthenticationExpired { vendor: String, user_id: String },

    // -- Configuration ------------------------------------------------------
    /// No OAuth configuration is available for the vendor.
    #[error("no OAuth configuration for vendor {vendor}")]
    ConfigNotFound { vendor: String },

    /// Configuration is present but unusable.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // -- Authorization flow -------------------------------------------------
    /// The authorization flow could not continue.
    #[error("authorization flow failed: {reason}")]
    FlowFailed { reason: String },

    /// A caller-imposed wait for the redirect elapsed.
    #[error("callback timed out after {timeout_secs} seconds")]
    CallbackTimeout { timeout_secs: u64 },

    // -- Underlying errors --------------------------------------------------
    /// Transport failure of an outbound request.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Credential store error other than not-found and I/O.
    #[error("credential store error: {0}")]
    Vault(#[source] VaultError),

    /// JSON serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error outside credential storage (callback listener, prompt).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing error.
    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl From<VaultError> for AuthError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::CredentialNotFound { vendor, user_id } => {
                Self::NotFound { vendor, user_id }
            }
            VaultError::Io(e) => Self::IoFailure(e),
            other => Self::Vault(other),
        }
    }
}

impl AuthError {
    /// Whether the operator has to run the authorization flow again.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::NotRefreshable { .. }
                | Self::RefreshRejected { .. }
                | Self::AuthenticationExpired { .. }
                | Self::AuthExchange { .. }
        )
    }

    /// Whether retrying later (with backoff) may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RefreshTransient { .. } => true,
            Self::Request(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Stable snake_case name of the variant, for machine-readable output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::IoFailure(_) => "io_failure",
            Self::AuthExchange { .. } => "auth_exchange",
            Self::NotRefreshable { .. } => "not_refreshable",
            Self::RefreshRejected { .. } => "refresh_rejected",
            Self::RefreshTransient { .. } => "refresh_transient",
            Self::AuthenticationExpired { .. } => "authentication_expired",
            Self::ConfigNotFound { .. } => "config_not_found",
            Self::InvalidConfig { .. } => "invalid_config",
            Self::FlowFailed { .. } => "flow_failed",
            Self::CallbackTimeout { .. } => "callback_timeout",
            Self::Request(_) => "request",
            Self::Vault(_) => "vault",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
            Self::UrlParse(_) => "url_parse",
        }
    }

    /// Operator-facing advice for this failure, if there is any.
    pub fn operator_hint(&self, vendor: &str) -> Option<String> {
        if self.requires_reauthorization() {
            Some(format!(
                "run `vendorgate auth {vendor}` to authorize again"
            ))
        } else if self.is_retryable() {
            Some("the vendor could not be reached; retry later".to_string())
        } else {
            None
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, AuthError>;
