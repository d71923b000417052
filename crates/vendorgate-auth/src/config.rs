//! OAuth client configuration.
//!
//! Each vendor has one `oauth.json` under the OAuth config directory:
//!
//! ```text
//! <oauth_config_dir>/
//! ├── hubspot/oauth.json
//! └── salesforce/oauth.json
//! ```
//!
//! Endpoint URLs default to the vendor's [`VendorProfile`] and may be
//! overridden in the file. `client_id`, `client_secret` and `redirect_uri`
//! can additionally be overridden from the environment
//! (`VENDORGATE_OAUTH_<VENDOR>_CLIENT_ID` and friends). A config is loaded
//! once at startup and never mutated by token operations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::error::{AuthError, Result};
use crate::vendor::VendorProfile;

/// Redirect URI used when neither the file nor the environment sets one.
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080";

/// Default directory holding `<vendor>/oauth.json` files.
pub const DEFAULT_OAUTH_CONFIG_DIR: &str = "local_auth/oauth_configs";

/// Default root of the credential store.
pub const DEFAULT_CREDENTIALS_DIR: &str = "local_auth/credentials";

const OAUTH_CONFIG_FILE: &str = "oauth.json";
const ENV_PREFIX: &str = "VENDORGATE";

// ---------------------------------------------------------------------------
// OAuthConfig
// ---------------------------------------------------------------------------

/// Resolved OAuth client configuration for one vendor.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub vendor: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub auth_url: String,
    pub token_url: String,
    /// Refresh endpoint when it differs from `token_url`.
    pub refresh_url: Option<String>,
    /// Scopes requested when the caller does not name any.
    pub scopes: Vec<String>,
    /// Extra query pairs for the authorization URL.
    pub extra_auth_params: BTreeMap<String, String>,
    /// Remaining string keys of the config file (e.g. `custom_subdomain`).
    pub options: BTreeMap<String, String>,
    pub profile: VendorProfile,
}

impl OAuthConfig {
    /// Start a config for `vendor` with the profile's default endpoints.
    pub fn new(vendor: impl Into<String>, client_id: impl Into<String>) -> Self {
        let vendor = vendor.into();
        let profile = VendorProfile::for_vendor(&vendor);
        Self {
            vendor,
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            auth_url: profile.auth_url.to_string(),
            token_url: profile.token_url.to_string(),
            refresh_url: None,
            scopes: Vec::new(),
            extra_auth_params: BTreeMap::new(),
            options: BTreeMap::new(),
            profile,
        }
    }

    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = uri.into();
        self
    }

    pub fn with_endpoints(
        mut self,
        auth_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        self.auth_url = auth_url.into();
        self.token_url = token_url.into();
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Parse the contents of an `oauth.json` file for `vendor`.
    ///
    /// Google-style files that nest the client under `installed` or `web`
    /// are accepted, as are `auth_uri`/`token_uri` key spellings and a
    /// `redirect_uris` list (the first entry is used).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if the document is not a usable
    /// client configuration.
    pub fn from_json(vendor: &str, contents: &str) -> Result<Self> {
        let mut doc: Value = serde_json::from_str(contents).map_err(|e| AuthError::InvalidConfig {
            reason: format!("{vendor} oauth config is not valid JSON: {e}"),
        })?;

        for wrapper in ["installed", "web"] {
            if let Some(inner) = doc.get_mut(wrapper).map(Value::take)
                && inner.is_object()
            {
                doc = inner;
                break;
            }
        }

        let file: OAuthConfigFile =
            serde_json::from_value(doc).map_err(|e| AuthError::InvalidConfig {
                reason: format!("{vendor} oauth config: {e}"),
            })?;

        let mut config = Self::new(vendor, file.client_id);
        config.client_secret = file.client_secret.filter(|s| !s.is_empty());
        if let Some(uri) = file.redirect_uri.and_then(OneOrMany::into_first) {
            config.redirect_uri = uri;
        }
        if let Some(url) = file.auth_url {
            config.auth_url = url;
        }
        if let Some(url) = file.token_url {
            config.token_url = url;
        }
        config.refresh_url = file.refresh_url;
        config.scopes = file.scopes.map(ScopeList::into_vec).unwrap_or_default();
        config.extra_auth_params = file.extra_auth_params;
        config.options = file
            .options
            .into_iter()
            .filter_map(|(k, v)| match v {
                Value::String(s) => Some((k, s)),
                Value::Number(n) => Some((k, n.to_string())),
                Value::Bool(b) => Some((k, b.to_string())),
                _ => None,
            })
            .collect();

        Ok(config)
    }

    /// Apply `VENDORGATE_OAUTH_<VENDOR>_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = env_prefix(&self.vendor);
        let get = |suffix: &str| lookup(&format!("{prefix}_{suffix}")).filter(|v| !v.is_empty());

        if let Some(id) = get("CLIENT_ID") {
            tracing::debug!(vendor = %self.vendor, "client_id overridden from environment");
            self.client_id = id;
        }
        if let Some(secret) = get("CLIENT_SECRET") {
            self.client_secret = Some(secret);
        }
        if let Some(uri) = get("REDIRECT_URI") {
            self.redirect_uri = uri;
        }
    }

    /// Substitute `{option}` placeholders in the endpoint URLs and check
    /// that the config is complete.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] for a missing client id or
    /// endpoint, or a placeholder with no matching option.
    pub fn resolve(mut self) -> Result<Self> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::InvalidConfig {
                reason: format!("{} oauth config has no client_id", self.vendor),
            });
        }

        let auth_url = self.substitute("auth_url", &self.auth_url)?;
        let token_url = self.substitute("token_url", &self.token_url)?;
        self.auth_url = auth_url;
        self.token_url = token_url;
        if let Some(url) = self.refresh_url.take() {
            self.refresh_url = Some(self.substitute("refresh_url", &url)?);
        }
        Ok(self)
    }

    /// Endpoint used for refresh-token grants.
    pub fn refresh_endpoint(&self) -> &str {
        self.refresh_url.as_deref().unwrap_or(&self.token_url)
    }

    /// Look up a vendor option such as `custom_subdomain`.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Base URL of the vendor's resource API.
    ///
    /// An `api_base_url` option wins over the profile default.
    pub fn api_base_url(&self) -> Result<String> {
        let base = self
            .option("api_base_url")
            .unwrap_or(self.profile.api_base_url);
        if base.is_empty() {
            return Err(AuthError::InvalidConfig {
                reason: format!(
                    "{} has no default API base URL; set api_base_url in its oauth config",
                    self.vendor
                ),
            });
        }
        self.substitute("api_base_url", base)
    }

    fn substitute(&self, field: &str, template: &str) -> Result<String> {
        let mut out = template.to_string();
        for (key, value) in &self.options {
            out = out.replace(&format!("{{{key}}}"), value);
        }

        if out.is_empty() {
            return Err(AuthError::InvalidConfig {
                reason: format!("{} oauth config has no {field}", self.vendor),
            });
        }
        if let Some(start) = out.find('{')
            && let Some(len) = out[start..].find('}')
        {
            return Err(AuthError::InvalidConfig {
                reason: format!(
                    "{} {field} needs option {} in its oauth config",
                    self.vendor,
                    &out[start + 1..start + len]
                ),
            });
        }
        Ok(out)
    }
}

/// Environment variable prefix for a vendor, e.g. `VENDORGATE_OAUTH_ZOOM`.
fn env_prefix(vendor: &str) -> String {
    let name: String = vendor
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{ENV_PREFIX}_OAUTH_{name}")
}

/// On-disk shape of `oauth.json`.
#[derive(Debug, Deserialize)]
struct OAuthConfigFile {
    client_id: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default, alias = "redirect_uris")]
    redirect_uri: Option<OneOrMany>,
    #[serde(default, alias = "auth_uri")]
    auth_url: Option<String>,
    #[serde(default, alias = "token_uri")]
    token_url: Option<String>,
    #[serde(default)]
    refresh_url: Option<String>,
    #[serde(default, alias = "scope")]
    scopes: Option<ScopeList>,
    #[serde(default)]
    extra_auth_params: BTreeMap<String, String>,
    #[serde(flatten)]
    options: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_first(self) -> Option<String> {
        match self {
            Self::One(s) => Some(s),
            Self::Many(v) => v.into_iter().next(),
        }
    }
}

/// Scopes as a JSON list or a space/comma separated string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScopeList {
    Joined(String),
    List(Vec<String>),
}

impl ScopeList {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::Joined(s) => s
                .split(|c: char| c.is_whitespace() || c == ',')
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            Self::List(v) => v,
        }
    }
}

// ---------------------------------------------------------------------------
// VendorgateConfig
// ---------------------------------------------------------------------------

/// Process-wide settings, built once at startup and passed by reference.
#[derive(Debug, Clone)]
pub struct VendorgateConfig {
    pub oauth_config_dir: PathBuf,
    pub credentials_dir: PathBuf,
}

impl Default for VendorgateConfig {
    fn default() -> Self {
        Self {
            oauth_config_dir: PathBuf::from(DEFAULT_OAUTH_CONFIG_DIR),
            credentials_dir: PathBuf::from(DEFAULT_CREDENTIALS_DIR),
        }
    }
}

impl VendorgateConfig {
    /// Read directory settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read directory settings through an arbitrary lookup function.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let setting =
            |name: &str| lookup(&format!("{ENV_PREFIX}_{name}")).filter(|d| !d.is_empty());
        if let Some(dir) = setting("OAUTH_CONFIG_DIR") {
            config.oauth_config_dir = PathBuf::from(dir);
        }
        if let Some(dir) = setting("CREDENTIALS_DIR") {
            config.credentials_dir = PathBuf::from(dir);
        }
        config
    }

    /// Path of the OAuth config file for `vendor`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Vault`] if `vendor` is not a valid key segment,
    /// the same rule the credential store applies.
    pub fn oauth_config_path(&self, vendor: &str) -> Result<PathBuf> {
        vendorgate_vault::validate_key_segment(vendor)?;
        Ok(self.oauth_config_dir.join(vendor).join(OAUTH_CONFIG_FILE))
    }

    /// Load, override from the environment and resolve the config for
    /// `vendor`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ConfigNotFound`] if the vendor has no config
    /// file, [`AuthError::InvalidConfig`] if it cannot be used and
    /// [`AuthError::Vault`] if `vendor` is not a valid identifier.
    pub fn load_oauth_config(&self, vendor: &str) -> Result<OAuthConfig> {
        let path = self.oauth_config_path(vendor)?;
        load_oauth_config_from(&path, vendor, |key| std::env::var(key).ok())
    }
}

/// Load and resolve one vendor's config file with an explicit env lookup.
pub fn load_oauth_config_from<F>(path: &Path, vendor: &str, lookup: F) -> Result<OAuthConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AuthError::ConfigNotFound {
                vendor: vendor.to_string(),
            });
        }
        Err(e) => return Err(AuthError::Io(e)),
    };

    let mut config = OAuthConfig::from_json(vendor, &contents)?;
    config.apply_env_overrides(lookup);
    let config = config.resolve()?;

    tracing::debug!(
        vendor,
        path = %path.display(),
        scopes = config.scopes.len(),
        "loaded oauth config"
    );
    Ok(config)
}

#[cfg(test)]
impl OAuthConfig {
    /// Resolved config whose endpoints all live under `base`.
    pub(crate) fn for_test(vendor: &str, base: &str) -> Self {
        Self::new(vendor, "client-id")
            .with_client_secret("client-secret")
            .with_endpoints(format!("{base}/authorize"), format!("{base}/token"))
            .with_redirect_uri("http://127.0.0.1:8400/callback")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
