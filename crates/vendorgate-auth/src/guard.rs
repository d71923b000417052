//! Guarded vendor calls.
//!
//! [`AuthenticatedRequestGuard::call`] loads the stored credential, refreshes
//! it first if it expires within the safety margin, and hands it to the
//! caller's request closure. If the vendor answers with an authorization
//! rejection, the guard refreshes once and retries once; a second rejection
//! is [`AuthError::AuthenticationExpired`]. Every other response is returned
//! untouched.
//!
//! Refreshes are serialized per (vendor, user_id). A task that waited for
//! the lock re-reads the store and reuses a token another task already
//! refreshed instead of spending the refresh token again.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use vendorgate_vault::{Credential, CredentialStore};

use crate::config::OAuthConfig;
use crate::error::{AuthError, Result};
use crate::refresh::TokenRefresher;
use crate::vendor::VendorProfile;

/// Refresh tokens that expire within this many seconds.
pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 60;

type LockKey = (String, String);

/// Wraps outbound vendor calls with token attachment and single retry.
pub struct AuthenticatedRequestGuard {
    refresher: TokenRefresher,
    configs: HashMap<String, Arc<OAuthConfig>>,
    margin_secs: i64,
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl AuthenticatedRequestGuard {
    pub fn new(refresher: TokenRefresher) -> Self {
        Self {
            refresher,
            configs: HashMap::new(),
            margin_secs: DEFAULT_REFRESH_MARGIN_SECS,
            locks: DashMap::new(),
        }
    }

    /// Register the OAuth config used to refresh `config.vendor` tokens.
    pub fn with_config(mut self, config: OAuthConfig) -> Self {
        self.configs.insert(config.vendor.clone(), Arc::new(config));
        self
    }

    pub fn with_margin_secs(mut self, margin_secs: i64) -> Self {
        self.margin_secs = margin_secs;
        self
    }

    pub fn store(&self) -> &CredentialStore {
        self.refresher.store()
    }

    /// OAuth config registered for `vendor`, if any.
    pub fn config(&self, vendor: &str) -> Option<&OAuthConfig> {
        self.configs.get(vendor).map(Arc::as_ref)
    }

    /// Profile deciding which statuses count as rejections for `vendor`.
    pub fn profile(&self, vendor: &str) -> VendorProfile {
        self.config(vendor)
            .map(|c| c.profile)
            .unwrap_or_else(|| VendorProfile::for_vendor(vendor))
    }

    /// Return a credential that is not about to expire.
    ///
    /// Refreshes (and persists) first when the stored token expires within
    /// the margin. A token that has no refresh token but has not yet expired
    /// is returned as is, with a warning.
    ///
    /// # Errors
    ///
    /// [`AuthError::NotFound`] without touching the network when nothing is
    /// stored, plus any refresh error.
    pub async fn ensure_token(&self, vendor: &str, user_id: &str) -> Result<Credential> {
        let credential = self.store().load(vendor, user_id)?;
        let now = chrono::Utc::now().timestamp();

        if !credential.expires_within(now, self.margin_secs) {
            return Ok(credential);
        }

        if !credential.is_refreshable() && !credential.expires_within(now, 0) {
            tracing::warn!(
                vendor,
                user_id,
                expires_in = credential.remaining_secs(now),
                "token expiring and cannot be refreshed, using it until it expires"
            );
            return Ok(credential);
        }

        tracing::debug!(
            vendor,
            user_id,
            expires_in = credential.remaining_secs(now),
            "token expiring, refreshing before the call"
        );
        self.refresh_serialized(vendor, user_id, &credential.access_token)
            .await
    }

    /// Run `request` with a valid token, refreshing and retrying once if the
    /// vendor rejects it.
    ///
    /// `request` may be invoked twice; each invocation gets the credential
    /// to use.
    ///
    /// # Errors
    ///
    /// - Any [`ensure_token`](Self::ensure_token) error.
    /// - [`AuthError::Request`] if the request itself fails in transport.
    /// - [`AuthError::AuthenticationExpired`] if the retried request is
    ///   rejected as well.
    pub async fn call<F, Fut>(
        &self,
        vendor: &str,
        user_id: &str,
        mut request: F,
    ) -> Result<reqwest::Response>
    where
        F: FnMut(Credential) -> Fut,
        Fut: Future<Output = reqwest::Result<reqwest::Response>>,
    {
        let profile = self.profile(vendor);
        let credential = self.ensure_token(vendor, user_id).await?;
        let used_token = credential.access_token.clone();

        let response = request(credential).await?;
        let status = response.status().as_u16();
        if !profile.is_auth_rejection(status) {
            return Ok(response);
        }

        tracing::warn!(vendor, user_id, status, "vendor rejected token, refreshing once");
        drop(response);

        let refreshed = self.refresh_serialized(vendor, user_id, &used_token).await?;
        let response = request(refreshed).await?;
        let status = response.status().as_u16();
        if profile.is_auth_rejection(status) {
            tracing::warn!(vendor, user_id, status, "vendor rejected refreshed token");
            return Err(AuthError::AuthenticationExpired {
                vendor: vendor.to_string(),
                user_id: user_id.to_string(),
            });
        }

        Ok(response)
    }

    /// Refresh under the per-key lock unless `stale_token` was already
    /// replaced by a fresh one.
    async fn refresh_serialized(
        &self,
        vendor: &str,
        user_id: &str,
        stale_token: &str,
    ) -> Result<Credential> {
        let lock = self.lock_for(vendor, user_id);
        let _held = lock.lock().await;

        let current = self.store().load(vendor, user_id)?;
        let now = chrono::Utc::now().timestamp();
        if current.access_token != stale_token && !current.expires_within(now, self.margin_secs) {
            tracing::debug!(vendor, user_id, "token already refreshed by another task");
            return Ok(current);
        }

        if !current.is_refreshable() {
            return Err(AuthError::NotRefreshable {
                vendor: vendor.to_string(),
                user_id: user_id.to_string(),
            });
        }

        let config = self.config(vendor).ok_or_else(|| AuthError::ConfigNotFound {
            vendor: vendor.to_string(),
        })?;
        self.refresher.refresh(config, &current).await
    }

    fn lock_for(&self, vendor: &str, user_id: &str) -> Arc<Mutex<()>> {
        let entry = self
            .locks
            .entry((vendor.to_string(), user_id.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())));
        Arc::clone(entry.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard_with(cred: Option<Credential>) -> (tempfile::TempDir, AuthenticatedRequestGuard) {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path()).unwrap();
        if let Some(cred) = cred {
            store.save(&cred.vendor, &cred.user_id, &cred).unwrap();
        }
        let refresher = TokenRefresher::new(reqwest::Client::new(), store);
        (dir, AuthenticatedRequestGuard::new(refresher))
    }

    #[tokio::test]
    async fn ensure_token_returns_fresh_credential_as_is() {
        let now = chrono::Utc::now().timestamp();
        let cred = Credential::new("acme", "local", "fresh").with_expires_at(now + 3600);
        let (_dir, guard) = guard_with(Some(cred.clone()));
        assert_eq!(guard.ensure_token("acme", "local").await.unwrap(), cred);
    }

    #[tokio::test]
    async fn ensure_token_without_expiry_never_refreshes() {
        let cred = Credential::new("notion", "local", "secret_x");
        let (_dir, guard) = guard_with(Some(cred.clone()));
        assert_eq!(guard.ensure_token("notion", "local").await.unwrap(), cred);
    }

    #[tokio::test]
    async fn ensure_token_missing_is_not_found() {
        let (_dir, guard) = guard_with(None);
        let err = guard.ensure_token("acme", "local").await.unwrap_err();
        assert!(matches!(err, AuthError::NotFound { .. }));
    }

    #[tokio::test]
    async fn expired_without_refresh_token_is_not_refreshable() {
        let now = chrono::Utc::now().timestamp();
        let cred = Credential::new("acme", "local", "old").with_expires_at(now - 10);
        let (_dir, guard) = guard_with(Some(cred));

        let mut calls = 0;
        let err = guard
            .call("acme", "local", |_cred| {
                calls += 1;
                async { reqwest::get("http://127.0.0.1:9/").await }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotRefreshable { .. }));
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn unrefreshable_token_is_used_until_it_expires() {
        let now = chrono::Utc::now().timestamp();
        let cred = Credential::new("acme", "local", "still-valid").with_expires_at(now + 45);
        let (_dir, guard) = guard_with(Some(cred.clone()));
        assert_eq!(guard.ensure_token("acme", "local").await.unwrap(), cred);

        let expired = Credential::new("acme", "local", "gone").with_expires_at(now - 5);
        guard.store().save("acme", "local", &expired).unwrap();
        let err = guard.ensure_token("acme", "local").await.unwrap_err();
        assert!(matches!(err, AuthError::NotRefreshable { .. }));
    }

    #[tokio::test]
    async fn expiring_with_refresh_token_but_no_config() {
        let now = chrono::Utc::now().timestamp();
        let cred = Credential::new("acme", "local", "old")
            .with_refresh_token("rt")
            .with_expires_at(now + 5);
        let (_dir, guard) = guard_with(Some(cred));
        let err = guard.ensure_token("acme", "local").await.unwrap_err();
        assert!(matches!(err, AuthError::ConfigNotFound { .. }));
    }

    #[test]
    fn margin_and_profile_defaults() {
        let (_dir, guard) = guard_with(None);
        assert_eq!(guard.margin_secs, DEFAULT_REFRESH_MARGIN_SECS);
        assert!(guard.profile("acme").is_auth_rejection(401));

        let guard = guard.with_margin_secs(5);
        assert_eq!(guard.margin_secs, 5);
    }

    #[test]
    fn locks_are_per_key() {
        let (_dir, guard) = guard_with(None);
        let a = guard.lock_for("acme", "local");
        let b = guard.lock_for("acme", "local");
        let c = guard.lock_for("acme", "other");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
