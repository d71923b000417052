//! Per-vendor profiles and token response normalization.
//!
//! Vendors disagree on almost everything around OAuth: where the client
//! credentials go, whether the token request is form- or JSON-encoded,
//! whether `expires_in` is present, which extra fields come back. Each
//! vendor identifier maps to a static [`VendorProfile`] chosen once at
//! startup, and the profile's [`VendorKind`] tag selects the normalization
//! step that turns a raw token response into a [`TokenGrant`].

use serde_json::{Map, Value};
use vendorgate_vault::Credential;

use crate::config::OAuthConfig;

/// Status codes treated as an authorization rejection unless a profile says
/// otherwise.
const DEFAULT_REJECTION_STATUSES: &[u16] = &[401];

/// Fields consumed by normalization; everything else is passed through.
const TOKEN_FIELDS: &[&str] = &["access_token", "refresh_token", "expires_in", "expires_at"];

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Normalization variant for a vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorKind {
    /// Plain RFC 6749 token responses.
    Generic,
    HubSpot,
    Salesforce,
    Zoom,
    Notion,
    GitHub,
    Microsoft,
    Shopify,
}

/// Where the token endpoint expects the client credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuth {
    /// `client_id` / `client_secret` as request body fields.
    RequestBody,
    /// HTTP Basic `Authorization` header.
    BasicHeader,
}

/// Encoding of the token request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    Form,
    Json,
}

/// Static description of how to talk OAuth to one vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorProfile {
    pub kind: VendorKind,
    /// Default authorization endpoint; may contain `{custom_subdomain}`.
    pub auth_url: &'static str,
    /// Default token endpoint; may contain `{custom_subdomain}`.
    pub token_url: &'static str,
    /// Base URL of the resource API used by guarded calls.
    pub api_base_url: &'static str,
    pub client_auth: ClientAuth,
    pub body_encoding: BodyEncoding,
    /// Whether to send a PKCE (S256) challenge.
    pub use_pkce: bool,
    /// HTTP statuses meaning "this token is not accepted".
    pub rejection_statuses: &'static [u16],
    /// Query pairs always added to the authorization URL.
    pub auth_params: &'static [(&'static str, &'static str)],
    /// Whether the refresh request must repeat the granted scopes.
    pub refresh_sends_scope: bool,
}

impl VendorProfile {
    const GENERIC: Self = Self {
        kind: VendorKind::Generic,
        auth_url: "",
        token_url: "",
        api_base_url: "",
        client_auth: ClientAuth::RequestBody,
        body_encoding: BodyEncoding::Form,
        use_pkce: true,
        rejection_statuses: DEFAULT_REJECTION_STATUSES,
        auth_params: &[],
        refresh_sends_scope: false,
    };

    /// Look up the profile for a vendor identifier.
    ///
    /// Unknown identifiers get the generic RFC 6749 profile, whose endpoints
    /// must then come from the vendor's OAuth config file.
    pub fn for_vendor(vendor: &str) -> Self {
        match vendor {
            "hubspot" => Self {
                kind: VendorKind::HubSpot,
                auth_url: "https://app.hubspot.com/oauth/authorize",
                token_url: "https://api.hubapi.com/oauth/v1/token",
                api_base_url: "https://api.hubapi.com",
                use_pkce: false,
                ..Self::GENERIC
            },
            "salesforce" => Self {
                kind: VendorKind::Salesforce,
                auth_url: "https://{custom_subdomain}.my.salesforce.com/services/oauth2/authorize",
                token_url: "https://{custom_subdomain}.my.salesforce.com/services/oauth2/token",
                api_base_url: "https://{custom_subdomain}.my.salesforce.com/services/data/v52.0",
                ..Self::GENERIC
            },
            "zoom" => Self {
                kind: VendorKind::Zoom,
                auth_url: "https://zoom.us/oauth/authorize",
                token_url: "https://zoom.us/oauth/token",
                api_base_url: "https://api.zoom.us/v2",
                client_auth: ClientAuth::BasicHeader,
                use_pkce: false,
                ..Self::GENERIC
            },
            "notion" => Self {
                kind: VendorKind::Notion,
                auth_url: "https://api.notion.com/v1/oauth/authorize",
                token_url: "https://api.notion.com/v1/oauth/token",
                api_base_url: "https://api.notion.com/v1",
                client_auth: ClientAuth::BasicHeader,
                body_encoding: BodyEncoding::Json,
                use_pkce: false,
                auth_params: &[("owner", "user")],
                ..Self::GENERIC
            },
            "github" => Self {
                kind: VendorKind::GitHub,
                auth_url: "https://github.com/login/oauth/authorize",
                token_url: "https://github.com/login/oauth/access_token",
                api_base_url: "https://api.github.com",
                use_pkce: false,
                ..Self::GENERIC
            },
            "microsoft" | "outlook" | "teams" | "onedrive" | "sharepoint" | "mexcel" => Self {
                kind: VendorKind::Microsoft,
                auth_url: "https://login.microsoftonline.com/common/oauth2/v2.0/authorize",
                token_url: "https://login.microsoftonline.com/common/oauth2/v2.0/token",
                api_base_url: "https://graph.microsoft.com/v1.0",
                use_pkce: false,
                auth_params: &[("response_mode", "query")],
                refresh_sends_scope: true,
                ..Self::GENERIC
            },
            "shopify" => Self {
                kind: VendorKind::Shopify,
                auth_url: "https://{custom_subdomain}.myshopify.com/admin/oauth/authorize",
                token_url: "https://{custom_subdomain}.myshopify.com/admin/oauth/access_token",
                api_base_url: "https://{custom_subdomain}.myshopify.com/admin/api/2024-01",
                use_pkce: false,
                ..Self::GENERIC
            },
            _ => Self::GENERIC,
        }
    }

    /// Whether `status` means the presented token was not accepted.
    pub fn is_auth_rejection(&self, status: u16) -> bool {
        self.rejection_statuses.contains(&status)
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Vendor-neutral result of a token exchange or refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    /// `None` when the vendor did not (re)issue a refresh token.
    pub refresh_token: Option<String>,
    /// Absolute expiry in Unix seconds.
    pub expires_at: Option<i64>,
    /// Every response field that is not part of the token triple.
    pub extra: Map<String, Value>,
}

impl TokenGrant {
    /// Build a fresh credential from this grant.
    pub fn into_credential(self, vendor: &str, user_id: &str) -> Credential {
        Credential {
            vendor: vendor.to_string(),
            user_id: user_id.to_string(),
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self.expires_at,
            extra: self.extra,
        }
    }

    /// Build the successor of `previous` after a refresh.
    ///
    /// The old refresh token is kept when the vendor does not rotate it, and
    /// the vendor's new extras are laid over the previous ones.
    pub fn into_refreshed(self, previous: &Credential) -> Credential {
        let mut extra = previous.extra.clone();
        extra.extend(self.extra);

        Credential {
            vendor: previous.vendor.clone(),
            user_id: previous.user_id.clone(),
            access_token: self.access_token,
            refresh_token: self.refresh_token.or_else(|| previous.refresh_token.clone()),
            expires_at: self.expires_at,
            extra,
        }
    }
}

impl VendorKind {
    /// Turn a raw token endpoint body into a [`TokenGrant`].
    ///
    /// Returns the reason as a string when the body does not carry a usable
    /// token; callers attach the raw payload to their own error variant.
    pub fn normalize_token_response(
        &self,
        raw: &Value,
        config: &OAuthConfig,
        now: i64,
    ) -> std::result::Result<TokenGrant, String> {
        let body = raw
            .as_object()
            .ok_or_else(|| "token response is not a JSON object".to_string())?;

        if let Some(error) = body.get("error").filter(|e| !e.is_null())
            && !body.contains_key("access_token")
        {
            let description = body
                .get("error_description")
                .and_then(Value::as_str)
                .map(|d| format!(": {d}"))
                .unwrap_or_default();
            return Err(format!("vendor returned error {error}{description}"));
        }

        let mut grant = base_grant(body, now)?;

        match self {
            Self::Generic | Self::Zoom | Self::GitHub | Self::Microsoft | Self::Notion => {}
            Self::HubSpot => {
                // Default to one hour when `expires_in` is missing.
                if grant.expires_at.is_none() {
                    grant.expires_at = Some(now.saturating_add(3600));
                }
            }
            Self::Salesforce => {
                if !grant.extra.contains_key("instance_url")
                    && let Some(subdomain) = config.option("custom_subdomain")
                {
                    grant.extra.insert(
                        "instance_url".into(),
                        Value::String(format!("https://{subdomain}.my.salesforce.com")),
                    );
                }
            }
            Self::Shopify => {
                if let Some(shop) = config.option("custom_subdomain") {
                    grant
                        .extra
                        .insert("custom_subdomain".into(), Value::String(shop.to_string()));
                    grant.extra.insert(
                        "shop_url".into(),
                        Value::String(format!("https://{shop}.myshopify.com")),
                    );
                }
            }
        }

        Ok(grant)
    }
}

/// Extract the common token triple and pass everything else through.
fn base_grant(body: &Map<String, Value>, now: i64) -> std::result::Result<TokenGrant, String> {
    let access_token = body
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| "no access token found in response".to_string())?
        .to_string();

    let refresh_token = body
        .get("refresh_token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(String::from);

    // Negative values are garbage and count as absent.
    let expires_at = match body
        .get("expires_at")
        .and_then(as_seconds)
        .filter(|at| *at > 0)
    {
        Some(at) => Some(at),
        None => body
            .get("expires_in")
            .and_then(as_seconds)
            .filter(|secs| *secs >= 0)
            .map(|secs| now.saturating_add(secs)),
    };

    let extra = body
        .iter()
        .filter(|(k, _)| !TOKEN_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(TokenGrant {
        access_token,
        refresh_token,
        expires_at,
        extra,
    })
}

/// Accept integer seconds as a JSON number or numeric string.
fn as_seconds(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000;

    fn config(vendor: &str) -> OAuthConfig {
        OAuthConfig::for_test(vendor, "https://vendor.test")
    }

    #[test]
    fn unknown_vendor_is_generic() {
        let profile = VendorProfile::for_vendor("acme");
        assert_eq!(profile.kind, VendorKind::Generic);
        assert!(profile.auth_url.is_empty());
        assert!(profile.is_auth_rejection(401));
        assert!(!profile.is_auth_rejection(403));
    }

    #[test]
    fn microsoft_aliases_share_profile() {
        for vendor in ["microsoft", "outlook", "teams", "sharepoint"] {
            let profile = VendorProfile::for_vendor(vendor);
            assert_eq!(profile.kind, VendorKind::Microsoft);
            assert!(profile.refresh_sends_scope);
        }
    }

    #[test]
    fn basic_auth_vendors() {
        assert_eq!(
            VendorProfile::for_vendor("zoom").client_auth,
            ClientAuth::BasicHeader
        );
        let notion = VendorProfile::for_vendor("notion");
        assert_eq!(notion.client_auth, ClientAuth::BasicHeader);
        assert_eq!(notion.body_encoding, BodyEncoding::Json);
    }

    #[test]
    fn generic_normalization() {
        let raw = json!({
            "access_token": "at",
            "refresh_token": "rt",
            "expires_in": 3600,
            "token_type": "Bearer",
            "scope": "read write"
        });
        let grant = VendorKind::Generic
            .normalize_token_response(&raw, &config("acme"), NOW)
            .unwrap();
        assert_eq!(grant.access_token, "at");
        assert_eq!(grant.refresh_token.as_deref(), Some("rt"));
        assert_eq!(grant.expires_at, Some(NOW + 3600));
        assert_eq!(grant.extra["scope"], "read write");
        assert_eq!(grant.extra["token_type"], "Bearer");
        assert!(!grant.extra.contains_key("access_token"));
    }

    #[test]
    fn expires_in_as_string() {
        let raw = json!({"access_token": "at", "expires_in": "120"});
        let grant = VendorKind::Generic
            .normalize_token_response(&raw, &config("acme"), NOW)
            .unwrap();
        assert_eq!(grant.expires_at, Some(NOW + 120));
    }

    #[test]
    fn huge_expires_in_saturates() {
        let raw = json!({"access_token": "at", "expires_in": i64::MAX});
        let grant = VendorKind::Generic
            .normalize_token_response(&raw, &config("acme"), NOW)
            .unwrap();
        assert_eq!(grant.expires_at, Some(i64::MAX));

        let raw = json!({"access_token": "at", "expires_in": 1e20});
        let grant = VendorKind::Generic
            .normalize_token_response(&raw, &config("acme"), NOW)
            .unwrap();
        assert_eq!(grant.expires_at, Some(i64::MAX));
    }

    #[test]
    fn negative_expiry_is_ignored() {
        let raw = json!({"access_token": "at", "expires_in": -60});
        let grant = VendorKind::Generic
            .normalize_token_response(&raw, &config("acme"), NOW)
            .unwrap();
        assert!(grant.expires_at.is_none());

        let raw = json!({"access_token": "at", "expires_at": -1, "expires_in": 60});
        let grant = VendorKind::Generic
            .normalize_token_response(&raw, &config("acme"), NOW)
            .unwrap();
        assert_eq!(grant.expires_at, Some(NOW + 60));
    }

    #[test]
    fn explicit_expires_at_wins() {
        let raw = json!({"access_token": "at", "expires_in": 60, "expires_at": NOW + 999});
        let grant = VendorKind::Generic
            .normalize_token_response(&raw, &config("acme"), NOW)
            .unwrap();
        assert_eq!(grant.expires_at, Some(NOW + 999));
    }

    #[test]
    fn missing_access_token_is_error() {
        let raw = json!({"token_type": "Bearer"});
        let err = VendorKind::Generic
            .normalize_token_response(&raw, &config("acme"), NOW)
            .unwrap_err();
        assert!(err.contains("no access token"));
    }

    #[test]
    fn error_in_success_body_is_error() {
        // GitHub answers 200 with an error object for bad codes.
        let raw = json!({
            "error": "bad_verification_code",
            "error_description": "The code passed is incorrect or expired."
        });
        let err = VendorKind::GitHub
            .normalize_token_response(&raw, &config("github"), NOW)
            .unwrap_err();
        assert!(err.contains("bad_verification_code"));
        assert!(err.contains("incorrect or expired"));
    }

    #[test]
    fn non_object_body_is_error() {
        let err = VendorKind::Generic
            .normalize_token_response(&json!("nope"), &config("acme"), NOW)
            .unwrap_err();
        assert!(err.contains("not a JSON object"));
    }

    #[test]
    fn hubspot_defaults_expiry_and_keeps_hub_fields() {
        let raw = json!({
            "access_token": "at",
            "refresh_token": "rt",
            "hub_id": 42,
            "hub_domain": "acme.com",
        });
        let grant = VendorKind::HubSpot
            .normalize_token_response(&raw, &config("hubspot"), NOW)
            .unwrap();
        assert_eq!(grant.expires_at, Some(NOW + 3600));
        assert_eq!(grant.extra["hub_id"], 42);
        assert_eq!(grant.extra["hub_domain"], "acme.com");
    }

    #[test]
    fn notion_has_no_refresh_or_expiry() {
        let raw = json!({
            "access_token": "secret_abc",
            "bot_id": "b-1",
            "workspace_id": "w-1",
            "owner": {"type": "user"}
        });
        let grant = VendorKind::Notion
            .normalize_token_response(&raw, &config("notion"), NOW)
            .unwrap();
        assert!(grant.refresh_token.is_none());
        assert!(grant.expires_at.is_none());
        assert_eq!(grant.extra["workspace_id"], "w-1");
        assert_eq!(grant.extra["owner"]["type"], "user");
    }

    #[test]
    fn salesforce_fills_instance_url_from_subdomain() {
        let mut cfg = config("salesforce");
        cfg.options
            .insert("custom_subdomain".into(), "acme".into());
        let raw = json!({"access_token": "00D"});
        let grant = VendorKind::Salesforce
            .normalize_token_response(&raw, &cfg, NOW)
            .unwrap();
        assert_eq!(grant.extra["instance_url"], "https://acme.my.salesforce.com");

        let raw = json!({"access_token": "00D", "instance_url": "https://eu1.salesforce.com"});
        let grant = VendorKind::Salesforce
            .normalize_token_response(&raw, &cfg, NOW)
            .unwrap();
        assert_eq!(grant.extra["instance_url"], "https://eu1.salesforce.com");
    }

    #[test]
    fn shopify_stamps_shop_url() {
        let mut cfg = config("shopify");
        cfg.options.insert("custom_subdomain".into(), "store".into());
        let raw = json!({"access_token": "shpat", "scope": "read_orders"});
        let grant = VendorKind::Shopify
            .normalize_token_response(&raw, &cfg, NOW)
            .unwrap();
        assert_eq!(grant.extra["shop_url"], "https://store.myshopify.com");
        assert!(grant.expires_at.is_none());
    }

    #[test]
    fn refreshed_credential_keeps_unrotated_refresh_token_and_extras() {
        let previous = Credential::new("acme", "local", "old")
            .with_refresh_token("rt-1")
            .with_expires_at(NOW - 10)
            .with_extra("tenant", "t-1")
            .with_extra("scope", "read");

        let grant = TokenGrant {
            access_token: "new".into(),
            refresh_token: None,
            expires_at: Some(NOW + 3600),
            extra: [("scope".to_string(), json!("read write"))].into_iter().collect(),
        };

        let next = grant.into_refreshed(&previous);
        assert_eq!(next.access_token, "new");
        assert_eq!(next.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(next.expires_at, Some(NOW + 3600));
        assert_eq!(next.extra["tenant"], "t-1");
        assert_eq!(next.extra["scope"], "read write");
    }

    #[test]
    fn refreshed_credential_takes_rotated_refresh_token() {
        let previous = Credential::new("acme", "local", "old").with_refresh_token("rt-1");
        let grant = TokenGrant {
            access_token: "new".into(),
            refresh_token: Some("rt-2".into()),
            expires_at: None,
            extra: Map::new(),
        };
        assert_eq!(
            grant.into_refreshed(&previous).refresh_token.as_deref(),
            Some("rt-2")
        );
    }
}
