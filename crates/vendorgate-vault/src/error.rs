//! Vault error types.
//!
//! All store operations surface errors through [`VaultError`], the single
//! error type returned by every public API in this crate. Each variant
//! carries enough context for callers to decide how to handle the failure
//! without inspecting opaque strings.

/// Unified error type for the vendorgate credential store.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// No credential is on record for this vendor/user pair.
    #[error("credential not found: vendor={vendor}, user_id={user_id}")]
    CredentialNotFound { vendor: String, user_id: String },

    /// A vendor or user id cannot be mapped to a storage path.
    #[error("invalid credential key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    /// The record handed to `save` belongs to a different vendor/user pair.
    #[error(
        "credential key mismatch: stored under {vendor}/{user_id}, \
         record says {record_vendor}/{record_user_id}"
    )]
    KeyMismatch {
        vendor: String,
        user_id: String,
        record_vendor: String,
        record_user_id: String,
    },

    /// The storage backend is unavailable (permissions, disk full, ...).
    #[error("credential storage io error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored record could not be encoded or decoded.
    #[error("credential serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the vault crate.
pub type Result<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_not_found() {
        let err = VaultError::CredentialNotFound {
            vendor: "hubspot".into(),
            user_id: "local".into(),
        };
        assert_eq!(
            err.to_string(),
            "credential not found: vendor=hubspot, user_id=local"
        );
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: VaultError = io.into();
        assert!(matches!(err, VaultError::Io(_)));
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VaultError>();
    }
}
