//! Refresh-token grant.
//!
//! [`TokenRefresher::refresh`] trades a credential's refresh token for a new
//! access token with one POST, persists the successor credential and
//! returns it. Failures are split into terminal rejections, which need the
//! operator to authorize again, and transient ones the caller may retry.

use reqwest::StatusCode;
use vendorgate_vault::{Credential, CredentialStore};

use crate::config::OAuthConfig;
use crate::error::{AuthError, Result};
use crate::oauth::post_token_request;

/// Performs refresh-token grants and stores the result.
#[derive(Debug, Clone)]
pub struct TokenRefresher {
    client: reqwest::Client,
    store: CredentialStore,
}

impl TokenRefresher {
    pub fn new(client: reqwest::Client, store: CredentialStore) -> Self {
        Self { client, store }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Refresh `credential` and persist the result.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NotRefreshable`] without a refresh token; nothing is
    ///   sent.
    /// - [`AuthError::RefreshRejected`] for 400/401 and other non-retryable
    ///   statuses, or a 2xx body with no usable access token.
    /// - [`AuthError::RefreshTransient`] for transport failures, timeouts,
    ///   408, 429 and 5xx.
    /// - [`AuthError::IoFailure`] if the new credential cannot be stored.
    pub async fn refresh(
        &self,
        config: &OAuthConfig,
        credential: &Credential,
    ) -> Result<Credential> {
        let vendor = credential.vendor.as_str();
        let user_id = credential.user_id.as_str();

        let refresh_token = match credential.refresh_token.as_deref() {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => {
                return Err(AuthError::NotRefreshable {
                    vendor: vendor.to_string(),
                    user_id: user_id.to_string(),
                });
            }
        };

        let mut params = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token),
        ];
        if config.profile.refresh_sends_scope && !config.scopes.is_empty() {
            params.push(("scope", config.scopes.join(" ")));
        }

        tracing::info!(vendor, user_id, "refreshing access token");

        let reply = post_token_request(&self.client, config, config.refresh_endpoint(), params)
            .await
            .map_err(|e| {
                tracing::warn!(vendor, user_id, error = %e, "refresh request failed");
                AuthError::RefreshTransient {
                    vendor: vendor.to_string(),
                    reason: e.to_string(),
                }
            })?;

        let status = reply.status;
        if !status.is_success() {
            tracing::warn!(vendor, user_id, status = status.as_u16(), "refresh failed");
            return Err(if is_transient_status(status) {
                AuthError::RefreshTransient {
                    vendor: vendor.to_string(),
                    reason: format!("HTTP {status}: {}", reply.body),
                }
            } else {
                AuthError::RefreshRejected {
                    vendor: vendor.to_string(),
                    status: Some(status.as_u16()),
                    payload: reply.body,
                }
            });
        }

        let now = chrono::Utc::now().timestamp();
        let grant = config
            .profile
            .kind
            .normalize_token_response(&reply.body, config, now)
            .map_err(|reason| {
                tracing::warn!(vendor, user_id, %reason, "unusable refresh response");
                AuthError::RefreshRejected {
                    vendor: vendor.to_string(),
                    status: Some(status.as_u16()),
                    payload: reply.body.clone(),
                }
            })?;

        let refreshed = grant.into_refreshed(credential);
        self.store.save(vendor, user_id, &refreshed)?;

        tracing::info!(
            vendor,
            user_id,
            expires_in = refreshed.remaining_secs(now),
            rotated = refreshed.refresh_token != credential.refresh_token,
            "access token refreshed"
        );
        Ok(refreshed)
    }
}

/// Statuses worth retrying later: timeouts, throttling, server errors.
fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_statuses() {
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::REQUEST_TIMEOUT));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
        assert!(!is_transient_status(StatusCode::UNAUTHORIZED));
        assert!(!is_transient_status(StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn missing_refresh_token_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path()).unwrap();
        let refresher = TokenRefresher::new(reqwest::Client::new(), store);
        // Unroutable endpoint: reaching the network would fail differently.
        let config = OAuthConfig::for_test("acme", "http://127.0.0.1:9");

        let cred = Credential::new("acme", "local", "tok");
        let err = refresher.refresh(&config, &cred).await.unwrap_err();
        assert!(matches!(err, AuthError::NotRefreshable { .. }));

        let cred = Credential::new("acme", "local", "tok").with_refresh_token("");
        let err = refresher.refresh(&config, &cred).await.unwrap_err();
        assert!(matches!(err, AuthError::NotRefreshable { .. }));
    }
}
