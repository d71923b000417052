//! OAuth token lifecycle for vendorgate.
//!
//! This crate turns a vendor's OAuth client configuration into usable bearer
//! tokens and keeps them usable:
//!
//! - **Authorization code flow** with state nonce and optional PKCE
//!   ([`OAuthFlow`]), fed by a [`CodeReceiver`]: local callback listener,
//!   pasted redirect URL, or a host-supplied channel.
//! - **Refresh** of stored credentials ([`TokenRefresher`]).
//! - **Guarded calls** that refresh before an expiring token is used and
//!   retry exactly once after a rejection ([`AuthenticatedRequestGuard`]).
//!
//! Credentials are persisted in a [`vendorgate_vault::CredentialStore`].
//! Per-vendor differences (endpoints, client authentication, response
//! shapes) live in [`vendor`].
//!
//! # Architecture
//!
//! ```text
//! AuthManager
//! ├── OAuthFlow                   (authorization code + state + PKCE)
//! │   └── CodeReceiver            (CallbackServer / PasteReceiver / ChannelReceiver)
//! ├── AuthenticatedRequestGuard   (ensure_token, call)
//! │   └── TokenRefresher          (refresh-token grant)
//! └── CredentialStore             (one JSON file per vendor/user)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use vendorgate_auth::{AuthManager, VendorgateConfig};
//!
//! # async fn example() -> vendorgate_auth::Result<()> {
//! let manager = AuthManager::new(VendorgateConfig::from_env())?;
//! let config = manager.load_config("hubspot")?;
//! let guard = manager.guard([config]);
//!
//! let client = reqwest::Client::new();
//! let response = guard
//!     .call("hubspot", "local", |cred| {
//!         client
//!             .get("https://api.hubapi.com/crm/v3/objects/contacts")
//!             .bearer_auth(cred.access_token)
//!             .send()
//!     })
//!     .await?;
//! println!("status: {}", response.status());
//! # Ok(())
//! # }
//! ```

pub mod callback;
pub mod config;
pub mod error;
pub mod guard;
pub mod manager;
pub mod oauth;
pub mod receiver;
pub mod refresh;
pub mod vendor;

pub use callback::CallbackServer;
pub use config::{OAuthConfig, VendorgateConfig};
pub use error::{AuthError, Result};
pub use guard::{AuthenticatedRequestGuard, DEFAULT_REFRESH_MARGIN_SECS};
pub use manager::{AuthManager, CredentialStatus, DEFAULT_USER_ID, Expiry};
pub use oauth::{FlowState, OAuthFlow};
pub use receiver::{
    AuthorizationRedirect, ChannelReceiver, CodeReceiver, PasteReceiver, WithTimeout,
};
pub use refresh::TokenRefresher;
pub use vendor::{VendorKind, VendorProfile};
