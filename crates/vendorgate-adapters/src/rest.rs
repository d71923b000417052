//! Guarded REST adapter.
//!
//! [`RestAdapter`] exposes one vendor's REST API as tools. Every call goes
//! through the [`AuthenticatedRequestGuard`], so tokens are refreshed before
//! they expire and a rejected token is refreshed and retried once. Vendor
//! responses other than authorization rejections are returned as they came,
//! status and body included.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use vendorgate_auth::{AuthError, AuthenticatedRequestGuard, VendorKind, VendorProfile};
use vendorgate_vault::Credential;

use crate::error::{AdapterError, Result};
use crate::traits::{Adapter, AdapterType, AuthRequirement, HealthStatus, ToolDefinition};

const USER_AGENT: &str = concat!("vendorgate/", env!("CARGO_PKG_VERSION"));

const SALESFORCE_API_VERSION: &str = "v52.0";

const TOOL_API_REQUEST: &str = "api_request";
const TOOL_WHOAMI: &str = "whoami";

/// Identity endpoint of each vendor, relative to its API base URL.
fn default_whoami_path(kind: VendorKind) -> Option<&'static str> {
    match kind {
        VendorKind::HubSpot => Some("/account-info/v3/details"),
        VendorKind::Salesforce => Some("/chatter/users/me"),
        VendorKind::Zoom => Some("/users/me"),
        VendorKind::Notion => Some("/users/me"),
        VendorKind::GitHub => Some("/user"),
        VendorKind::Microsoft => Some("/me"),
        VendorKind::Shopify => Some("/shop.json"),
        VendorKind::Generic => None,
    }
}

/// REST adapter for a single (vendor, user_id).
pub struct RestAdapter {
    vendor: String,
    user_id: String,
    kind: VendorKind,
    /// Fixed API base URL; resolved from the credential when unset.
    base_url: Option<String>,
    whoami_path: Option<String>,
    scopes: Vec<String>,
    guard: Arc<AuthenticatedRequestGuard>,
    client: reqwest::Client,
}

impl RestAdapter {
    /// Create an adapter for `vendor` using the config registered on `guard`.
    pub fn new(vendor: &str, user_id: &str, guard: Arc<AuthenticatedRequestGuard>) -> Self {
        let kind = guard.profile(vendor).kind;
        let config = guard.config(vendor);

        let base_url = config
            .and_then(|c| c.api_base_url().ok())
            .map(|url| url.trim_end_matches('/').to_string());
        let whoami_path = config
            .and_then(|c| c.option("whoami_path"))
            .or_else(|| default_whoami_path(kind))
            .map(String::from);
        let scopes = config.map(|c| c.scopes.clone()).unwrap_or_default();

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();

        Self {
            vendor: vendor.to_string(),
            user_id: user_id.to_string(),
            kind,
            base_url,
            whoami_path,
            scopes,
            guard,
            client,
        }
    }

    /// Pin the API base URL.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = Some(base_url.trim_end_matches('/').to_string());
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    // -----------------------------------------------------------------------
    // URL and header helpers
    // -----------------------------------------------------------------------

    /// API base URL for requests made with `credential`.
    ///
    /// Order: pinned base URL, the credential's `api_base_url` extra, the
    /// Salesforce `instance_url`, then the vendor profile default with
    /// `{custom_subdomain}` taken from the credential.
    fn resolve_base_url(&self, credential: &Credential) -> Result<String> {
        if let Some(base) = &self.base_url {
            return Ok(base.clone());
        }
        if let Some(base) = credential.extra_str("api_base_url") {
            return Ok(base.trim_end_matches('/').to_string());
        }
        if self.kind == VendorKind::Salesforce
            && let Some(instance) = credential.extra_str("instance_url")
        {
            return Ok(format!(
                "{}/services/data/{SALESFORCE_API_VERSION}",
                instance.trim_end_matches('/')
            ));
        }

        let template = VendorProfile::for_vendor(&self.vendor).api_base_url;
        if template.is_empty() {
            return Err(AdapterError::ConfigError(format!(
                "no API base URL known for {}; set api_base_url in its oauth config",
                self.vendor
            )));
        }

        let mut base = template.to_string();
        if let Some(subdomain) = credential.extra_str("custom_subdomain") {
            base = base.replace("{custom_subdomain}", subdomain);
        }
        if base.contains('{') {
            return Err(AdapterError::ConfigError(format!(
                "{} needs custom_subdomain in its oauth config or credential",
                self.vendor
            )));
        }
        Ok(base)
    }

    /// Attach the token (and vendor-required headers) to a request.
    fn authorize(&self, request: reqwest::RequestBuilder, token: &str) -> reqwest::RequestBuilder {
        match self.kind {
            VendorKind::Shopify => request.header("X-Shopify-Access-Token", token),
            VendorKind::GitHub => request
                .bearer_auth(token)
                .header("Accept", "application/vnd.github+json")
                .header("X-GitHub-Api-Version", "2022-11-28"),
            VendorKind::Notion => request
                .bearer_auth(token)
                .header("Notion-Version", "2022-06-28"),
            _ => request.bearer_auth(token),
        }
    }

    // -----------------------------------------------------------------------
    // Guarded send
    // -----------------------------------------------------------------------

    /// Send one request through the guard and shape the response.
    async fn send_guarded(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let base = match &self.base_url {
            Some(base) => base.clone(),
            None => {
                let credential = self.guard.ensure_token(&self.vendor, &self.user_id).await?;
                self.resolve_base_url(&credential)?
            }
        };
        let url = format!("{base}{path}");
        debug!(vendor = %self.vendor, %method, %url, "sending vendor request");

        let client = &self.client;
        let response = self
            .guard
            .call(&self.vendor, &self.user_id, |credential| {
                let mut request = client.request(method.clone(), url.as_str());
                if !query.is_empty() {
                    request = request.query(query);
                }
                if let Some(body) = body {
                    request = request.json(body);
                }
                self.authorize(request, &credential.access_token).send()
            })
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if !status.is_success() {
            warn!(
                vendor = %self.vendor,
                status = status.as_u16(),
                %url,
                "vendor returned an error status"
            );
        }

        Ok(json!({
            "status": status.as_u16(),
            "ok": status.is_success(),
            "body": body,
        }))
    }

    // -----------------------------------------------------------------------
    // Tool implementations
    // -----------------------------------------------------------------------

    async fn tool_api_request(&self, params: Value) -> Result<Value> {
        let invalid = |reason: &str| AdapterError::InvalidParams {
            tool_name: TOOL_API_REQUEST.to_string(),
            reason: reason.to_string(),
        };

        let method = params
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_ascii_uppercase();
        let method = match method.as_str() {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "PATCH" => Method::PATCH,
            "DELETE" => Method::DELETE,
            other => return Err(invalid(&format!("unsupported method {other}"))),
        };

        let path = params
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("path is required"))?;
        if !path.starts_with('/') || path.starts_with("//") || path.contains("://") {
            return Err(invalid("path must be relative to the vendor API, starting with '/'"));
        }

        let query = match params.get("query") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| match v {
                    Value::String(s) => Ok((k.clone(), s.clone())),
                    Value::Number(_) | Value::Bool(_) => Ok((k.clone(), v.to_string())),
                    _ => Err(invalid("query values must be strings, numbers or booleans")),
                })
                .collect::<Result<Vec<_>>>()?,
            Some(_) => return Err(invalid("query must be an object")),
        };

        let body = params.get("body").filter(|b| !b.is_null());

        info!(vendor = %self.vendor, %method, path, "api_request");
        self.send_guarded(method, path, &query, body).await
    }

    async fn tool_whoami(&self) -> Result<Value> {
        let path = self
            .whoami_path
            .as_deref()
            .ok_or_else(|| AdapterError::ToolNotFound {
                adapter_id: self.vendor.clone(),
                tool_name: TOOL_WHOAMI.to_string(),
            })?;
        self.send_guarded(Method::GET, path, &[], None).await
    }
}

#[async_trait]
impl Adapter for RestAdapter {
    fn id(&self) -> &str {
        &self.vendor
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::for_vendor(&self.vendor, self.kind)
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        match self.guard.ensure_token(&self.vendor, &self.user_id).await {
            Ok(_) => Ok(HealthStatus::Healthy),
            Err(e @ AuthError::IoFailure(_)) => Err(e.into()),
            Err(e) if e.is_retryable() => {
                warn!(vendor = %self.vendor, error = %e, "token refresh temporarily unavailable");
                Ok(HealthStatus::Degraded)
            }
            Err(e) => {
                warn!(vendor = %self.vendor, error = %e, "adapter needs authorization");
                Ok(HealthStatus::Unhealthy)
            }
        }
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        let mut tools = vec![ToolDefinition {
            name: TOOL_API_REQUEST.into(),
            description: format!(
                "Call the {} REST API with the stored credential. \
                 Returns the HTTP status and the response body.",
                self.vendor
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "method": {
                        "type": "string",
                        "enum": ["GET", "POST", "PUT", "PATCH", "DELETE"],
                        "description": "HTTP method (default: GET)"
                    },
                    "path": {
                        "type": "string",
                        "description": "Path relative to the API base URL, starting with '/'"
                    },
                    "query": {
                        "type": "object",
                        "description": "Query string parameters"
                    },
                    "body": {
                        "description": "JSON request body"
                    }
                },
                "required": ["path"]
            }),
        }];

        if self.whoami_path.is_some() {
            tools.push(ToolDefinition {
                name: TOOL_WHOAMI.into(),
                description: format!(
                    "Return the {} identity the stored credential belongs to.",
                    self.vendor
                ),
                parameters: json!({"type": "object", "properties": {}}),
            });
        }
        tools
    }

    async fn execute_tool(&self, name: &str, params: Value) -> Result<Value> {
        match name {
            TOOL_API_REQUEST => self.tool_api_request(params).await,
            TOOL_WHOAMI => self.tool_whoami().await,
            _ => Err(AdapterError::ToolNotFound {
                adapter_id: self.vendor.clone(),
                tool_name: name.to_string(),
            }),
        }
    }

    fn required_auth(&self) -> Option<AuthRequirement> {
        Some(AuthRequirement {
            provider: self.vendor.clone(),
            user_id: self.user_id.clone(),
            scopes: self.scopes.clone(),
        })
    }
}
