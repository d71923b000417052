//! Local credential store for vendorgate.
//!
//! Every vendor adapter keeps its token material in a [`CredentialStore`]:
//! one JSON record per (vendor, user_id) pair, replaced atomically on every
//! write. The store never interprets token contents; refresh and expiry
//! policy live in `vendorgate-auth`.
//!
//! # Modules
//!
//! - [`credential`]: the [`Credential`] record.
//! - [`store`]: file-backed load/save/delete/list.
//! - [`error`]: unified error type.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use vendorgate_vault::{Credential, CredentialStore};
//!
//! # fn example() -> vendorgate_vault::Result<()> {
//! let store = CredentialStore::open("local_auth/credentials")?;
//!
//! let cred = Credential::new("hubspot", "local", "pat-na1-...")
//!     .with_refresh_token("ref-...")
//!     .with_expires_at(1_900_000_000);
//! store.save("hubspot", "local", &cred)?;
//!
//! let loaded = store.load("hubspot", "local")?;
//! assert_eq!(loaded, cred);
//! # Ok(())
//! # }
//! ```

pub mod credential;
pub mod error;
pub mod store;

pub use credential::Credential;
pub use error::{Result, VaultError};
pub use store::{CredentialStore, validate_key_segment};
