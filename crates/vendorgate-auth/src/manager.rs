//! High-level entry point for the CLI and adapters.
//!
//! The [`AuthManager`] owns the credential store and the shared HTTP client
//! and runs the operator-facing operations end to end: the authorization
//! flow, manual token entry, logout and status. Guarded calls go through the
//! [`AuthenticatedRequestGuard`] it builds.

use serde::Serialize;
use serde_json::{Map, Value};
use url::Url;
use vendorgate_vault::{Credential, CredentialStore};

use crate::config::{OAuthConfig, VendorgateConfig};
use crate::error::{AuthError, Result};
use crate::guard::{AuthenticatedRequestGuard, DEFAULT_REFRESH_MARGIN_SECS};
use crate::oauth::{FlowState, OAuthFlow};
use crate::receiver::CodeReceiver;
use crate::refresh::TokenRefresher;

/// User id used when the operator does not name one.
pub const DEFAULT_USER_ID: &str = "local";

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Expiry of a stored credential relative to now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum Expiry {
    /// The vendor issued a non-expiring token.
    Never,
    Valid { remaining_secs: i64 },
    /// Within the refresh margin; the next guarded call refreshes it.
    Expiring { remaining_secs: i64 },
    Expired { since_secs: i64 },
}

/// Secret-free summary of one stored credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialStatus {
    pub vendor: String,
    pub user_id: String,
    pub refreshable: bool,
    pub expires_at: Option<i64>,
    pub expiry: Expiry,
    /// Names of the vendor extras on record (values are not shown).
    pub extra_keys: Vec<String>,
}

impl CredentialStatus {
    fn of(credential: &Credential, now: i64) -> Self {
        let expiry = match credential.remaining_secs(now) {
            None => Expiry::Never,
            Some(left) if left <= 0 => Expiry::Expired {
                since_secs: left.saturating_neg(),
            },
            Some(left) if left <= DEFAULT_REFRESH_MARGIN_SECS => Expiry::Expiring {
                remaining_secs: left,
            },
            Some(left) => Expiry::Valid {
                remaining_secs: left,
            },
        };

        Self {
            vendor: credential.vendor.clone(),
            user_id: credential.user_id.clone(),
            refreshable: credential.is_refreshable(),
            expires_at: credential.expires_at,
            expiry,
            extra_keys: credential.extra.keys().cloned().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// AuthManager
// ---------------------------------------------------------------------------

/// Operator-facing credential lifecycle operations.
#[derive(Debug, Clone)]
pub struct AuthManager {
    settings: VendorgateConfig,
    store: CredentialStore,
    client: reqwest::Client,
}

impl AuthManager {
    /// Open the credential store named by `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::IoFailure`] if the store directory cannot be
    /// created.
    pub fn new(settings: VendorgateConfig) -> Result<Self> {
        let store = CredentialStore::open(&settings.credentials_dir)?;
        Ok(Self::with_store(settings, store, reqwest::Client::new()))
    }

    pub fn with_store(
        settings: VendorgateConfig,
        store: CredentialStore,
        client: reqwest::Client,
    ) -> Self {
        Self {
            settings,
            store,
            client,
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn settings(&self) -> &VendorgateConfig {
        &self.settings
    }

    /// Load the OAuth config for `vendor` from the config directory.
    pub fn load_config(&self, vendor: &str) -> Result<OAuthConfig> {
        self.settings.load_oauth_config(vendor)
    }

    /// Build a guard that refreshes with the given configs.
    pub fn guard<I>(&self, configs: I) -> AuthenticatedRequestGuard
    where
        I: IntoIterator<Item = OAuthConfig>,
    {
        let refresher = TokenRefresher::new(self.client.clone(), self.store.clone());
        configs
            .into_iter()
            .fold(AuthenticatedRequestGuard::new(refresher), |guard, config| {
                guard.with_config(config)
            })
    }

    /// Run the authorization-code flow for `user_id` and store the result.
    ///
    /// `on_url` is called once with the URL the operator has to open. The
    /// flow then waits on `receiver` without a timeout of its own.
    ///
    /// # Errors
    ///
    /// Any flow error; on failure nothing is written to the store.
    pub async fn authenticate<R, F>(
        &self,
        config: &OAuthConfig,
        user_id: &str,
        scopes: &[String],
        receiver: &mut R,
        on_url: F,
    ) -> Result<Credential>
    where
        R: CodeReceiver + ?Sized,
        F: FnOnce(&Url),
    {
        tracing::info!(vendor = %config.vendor, user_id, "starting authorization code flow");

        let mut flow = OAuthFlow::with_client(config.clone(), self.client.clone());
        let url = flow.build_authorization_url(scopes)?;
        on_url(&url);

        flow.await_redirect(receiver).await?;
        flow.exchange_code(user_id).await?;
        let credential = flow.complete(&self.store)?;

        debug_assert_eq!(flow.state(), FlowState::Complete);
        Ok(credential)
    }

    /// Store a manually obtained token, replacing any previous record.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] for an empty token and store
    /// errors otherwise.
    pub fn store_static_token(
        &self,
        vendor: &str,
        user_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_in: Option<i64>,
        extra: Map<String, Value>,
    ) -> Result<Credential> {
        if access_token.trim().is_empty() {
            return Err(AuthError::InvalidConfig {
                reason: "access token must not be empty".to_string(),
            });
        }

        let mut credential = Credential::new(vendor, user_id, access_token.trim());
        if let Some(refresh_token) = refresh_token.filter(|t| !t.trim().is_empty()) {
            credential = credential.with_refresh_token(refresh_token.trim());
        }
        if let Some(secs) = expires_in {
            let now = chrono::Utc::now().timestamp();
            credential = credential.with_expires_at(now.saturating_add(secs));
        }
        credential.extra = extra;

        self.store.save(vendor, user_id, &credential)?;
        tracing::info!(vendor, user_id, "stored manually entered credential");
        Ok(credential)
    }

    /// Delete the stored credential.
    pub fn logout(&self, vendor: &str, user_id: &str) -> Result<()> {
        self.store.delete(vendor, user_id)?;
        Ok(())
    }

    /// Summaries of stored credentials, optionally for one vendor.
    ///
    /// Unreadable records are skipped with a warning.
    pub fn status(&self, vendor: Option<&str>) -> Result<Vec<CredentialStatus>> {
        let vendors = match vendor {
            Some(vendor) => vec![vendor.to_string()],
            None => self.store.vendors()?,
        };
        let now = chrono::Utc::now().timestamp();

        let mut statuses = Vec::new();
        for vendor in vendors {
            for user_id in self.store.list(&vendor)? {
                match self.store.load(&vendor, &user_id) {
                    Ok(credential) => statuses.push(CredentialStatus::of(&credential, now)),
                    Err(e) => {
                        tracing::warn!(
                            %vendor,
                            %user_id,
                            error = %e,
                            "unreadable credential record"
                        );
                    }
                }
            }
        }
        Ok(statuses)
    }
}
