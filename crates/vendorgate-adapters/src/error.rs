//! Adapter error types.
//!
//! All adapters surface errors through [`AdapterError`]. Authentication
//! failures keep their [`AuthError`] intact so callers can still tell a
//! re-authorization case from a transient one.

use vendorgate_auth::AuthError;

/// Unified error type for vendorgate adapters.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The requested tool does not exist on this adapter.
    #[error("tool not found: `{tool_name}` on adapter `{adapter_id}`")]
    ToolNotFound {
        adapter_id: String,
        tool_name: String,
    },

    /// The parameters supplied to a tool are invalid.
    #[error("invalid parameters for tool `{tool_name}`: {reason}")]
    InvalidParams { tool_name: String, reason: String },

    /// Token lifecycle failure from the guard.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Transport failure while reading a vendor response.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The adapter cannot be used with the configuration it was given.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl AdapterError {
    /// The wrapped authentication error, if this is one.
    pub fn auth(&self) -> Option<&AuthError> {
        match self {
            Self::Auth(e) => Some(e),
            _ => None,
        }
    }
}

/// Convenience alias used throughout the adapters crate.
pub type Result<T> = std::result::Result<T, AdapterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_stay_transparent() {
        let err: AdapterError = AuthError::NotFound {
            vendor: "acme".into(),
            user_id: "local".into(),
        }
        .into();
        assert_eq!(err.to_string(), "no credential on record for acme/local");
        assert!(err.auth().unwrap().requires_reauthorization());
    }

    #[test]
    fn tool_errors_name_the_tool() {
        let err = AdapterError::InvalidParams {
            tool_name: "api_request".into(),
            reason: "path is required".into(),
        };
        assert!(err.to_string().contains("`api_request`"));
        assert!(err.auth().is_none());
    }
}
