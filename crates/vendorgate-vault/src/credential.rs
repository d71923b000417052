//! The per-vendor, per-user credential record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stored token material and metadata for one vendor/user pair.
///
/// Records are always replaced whole; there is no field-level merge on
/// write. `extra` carries vendor-specific fields (subdomain, instance URL,
/// tenant id, granted scope, ...) that the lifecycle code never interprets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// Vendor identifier (e.g. "hubspot", "zoom").
    pub vendor: String,

    /// Opaque id of the local credential owner.
    pub user_id: String,

    /// Bearer token presented to the vendor API.
    pub access_token: String,

    /// Token used to obtain a new access token, if the vendor issues one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Unix timestamp (seconds) when the access token expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,

    /// Vendor-specific passthrough fields.
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl Credential {
    /// Create a credential with only an access token.
    pub fn new(
        vendor: impl Into<String>,
        user_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            vendor: vendor.into(),
            user_id: user_id.into(),
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            extra: Map::new(),
        }
    }

    /// Set the refresh token.
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Set the absolute expiry (Unix seconds).
    pub fn with_expires_at(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Insert a vendor-specific extra field.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Whether a non-empty refresh token is present.
    pub fn is_refreshable(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Whether the token expires at or before `now + margin_secs`.
    ///
    /// Credentials without an expiry never expire.
    pub fn expires_within(&self, now: i64, margin_secs: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at.saturating_sub(margin_secs),
            None => false,
        }
    }

    /// Seconds until expiry relative to `now`; negative once expired.
    pub fn remaining_secs(&self, now: i64) -> Option<i64> {
        self.expires_at.map(|expires_at| expires_at.saturating_sub(now))
    }

    /// Read a string-valued extra field.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}
