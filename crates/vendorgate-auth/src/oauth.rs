//! OAuth 2.0 authorization code flow.
//!
//! [`OAuthFlow`] drives one three-legged authorization for one
//! (vendor, user_id):
//!
//! ```text
//! Idle ──build_authorization_url──▶ AuthorizationRequested
//!      ──accept_redirect/await_redirect──▶ CodeReceived
//!      ──exchange_code──▶ TokenExchanged ──complete──▶ Complete
//! ```
//!
//! Any failure moves the flow to `Failed`. The `state` parameter is a fresh
//! nonce per flow and a redirect is only accepted if it echoes that nonce.
//! Vendors whose profile enables it also get a PKCE (S256) challenge.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use serde_json::{Map, Value};
use url::Url;
use vendorgate_vault::{Credential, CredentialStore};

use crate::config::OAuthConfig;
use crate::error::{AuthError, Result};
use crate::receiver::{AuthorizationRedirect, CodeReceiver};
use crate::vendor::{BodyEncoding, ClientAuth};

/// Length of the PKCE code verifier in bytes (before base64 encoding).
const PKCE_VERIFIER_BYTES: usize = 32;

// ---------------------------------------------------------------------------
// PKCE helpers
// ---------------------------------------------------------------------------

/// Generate a PKCE code verifier (random 32 bytes, base64url encoded).
///
/// # Errors
///
/// Returns an error if the system CSPRNG fails.
pub fn generate_pkce_verifier() -> Result<String> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; PKCE_VERIFIER_BYTES];
    rng.fill(&mut bytes).map_err(|_| AuthError::FlowFailed {
        reason: "failed to generate PKCE verifier: CSPRNG error".to_string(),
    })?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// `BASE64URL(SHA256(verifier))`
pub fn pkce_challenge(verifier: &str) -> String {
    let hash = digest::digest(&digest::SHA256, verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash.as_ref())
}

/// Fresh `state` nonce for one flow.
pub fn generate_state_nonce() -> String {
    uuid::Uuid::now_v7().simple().to_string()
}

// ---------------------------------------------------------------------------
// Authorization URL
// ---------------------------------------------------------------------------

/// Build the authorization URL for `config`.
///
/// The result depends only on its inputs. An empty `scopes` slice falls
/// back to the config's default scopes. Profile parameters come first and
/// config `extra_auth_params` override them.
///
/// # Errors
///
/// Returns [`AuthError::UrlParse`] if `auth_url` is not a valid URL.
pub fn authorization_url(
    config: &OAuthConfig,
    scopes: &[String],
    state: &str,
    code_challenge: Option<&str>,
) -> Result<Url> {
    let mut url = Url::parse(&config.auth_url)?;
    let scopes = if scopes.is_empty() {
        config.scopes.as_slice()
    } else {
        scopes
    };

    {
        let mut params = url.query_pairs_mut();
        params.append_pair("response_type", "code");
        params.append_pair("client_id", &config.client_id);
        params.append_pair("redirect_uri", &config.redirect_uri);
        params.append_pair("state", state);

        if !scopes.is_empty() {
            params.append_pair("scope", &scopes.join(" "));
        }

        if let Some(challenge) = code_challenge {
            params.append_pair("code_challenge", challenge);
            params.append_pair("code_challenge_method", "S256");
        }

        for (key, value) in config.profile.auth_params {
            if !config.extra_auth_params.contains_key(*key) {
                params.append_pair(key, value);
            }
        }
        for (key, value) in &config.extra_auth_params {
            params.append_pair(key, value);
        }
    }

    Ok(url)
}

// ---------------------------------------------------------------------------
// Token endpoint
// ---------------------------------------------------------------------------

/// Status and decoded body of a token endpoint response.
#[derive(Debug, Clone)]
pub(crate) struct TokenEndpointReply {
    pub status: StatusCode,
    /// The JSON body, or the raw text as a JSON string if it was not JSON.
    pub body: Value,
}

/// POST a grant to a token endpoint the way the vendor's profile requires.
///
/// Client credentials go in the body or a Basic header, and the body is
/// form- or JSON-encoded. Only transport failures are errors; HTTP status
/// handling is left to the caller.
pub(crate) async fn post_token_request(
    client: &reqwest::Client,
    config: &OAuthConfig,
    url: &str,
    mut params: Vec<(&'static str, String)>,
) -> reqwest::Result<TokenEndpointReply> {
    let profile = &config.profile;
    let mut request = client.post(url).header(ACCEPT, "application/json");

    match profile.client_auth {
        ClientAuth::RequestBody => {
            params.push(("client_id", config.client_id.clone()));
            if let Some(secret) = &config.client_secret {
                params.push(("client_secret", secret.clone()));
            }
        }
        ClientAuth::BasicHeader => {
            request = request.basic_auth(&config.client_id, config.client_secret.as_deref());
        }
    }

    request = match profile.body_encoding {
        BodyEncoding::Form => request.form(&params),
        BodyEncoding::Json => {
            let body: Map<String, Value> = params
                .into_iter()
                .map(|(k, v)| (k.to_string(), Value::String(v)))
                .collect();
            request.json(&body)
        }
    };

    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await?;
    let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

    Ok(TokenEndpointReply { status, body })
}

// ---------------------------------------------------------------------------
// Flow
// ---------------------------------------------------------------------------

/// Where an [`OAuthFlow`] currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    AuthorizationRequested,
    CodeReceived,
    TokenExchanged,
    Complete,
    Failed,
}

impl std::fmt::Display for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::AuthorizationRequested => "authorization requested",
            Self::CodeReceived => "code received",
            Self::TokenExchanged => "token exchanged",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One authorization-code flow for one vendor user.
pub struct OAuthFlow {
    config: OAuthConfig,
    client: reqwest::Client,
    state: FlowState,
    nonce: Option<String>,
    pkce_verifier: Option<String>,
    code: Option<String>,
    credential: Option<Credential>,
}

impl OAuthFlow {
    pub fn new(config: OAuthConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    /// Use a shared HTTP client for the token exchange.
    pub fn with_client(config: OAuthConfig, client: reqwest::Client) -> Self {
        Self {
            config,
            client,
            state: FlowState::Idle,
            nonce: None,
            pkce_verifier: None,
            code: None,
            credential: None,
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Issue the nonce (and PKCE verifier) and build the authorization URL.
    ///
    /// # Errors
    ///
    /// Fails if the flow is not idle or the config's `auth_url` is invalid.
    pub fn build_authorization_url(&mut self, scopes: &[String]) -> Result<Url> {
        self.expect_state(FlowState::Idle, "build the authorization URL")?;

        let nonce = generate_state_nonce();
        let verifier = if self.config.profile.use_pkce {
            Some(self.guard(generate_pkce_verifier())?)
        } else {
            None
        };
        let challenge = verifier.as_deref().map(pkce_challenge);

        let url = authorization_url(&self.config, scopes, &nonce, challenge.as_deref());
        let url = self.guard(url)?;

        self.nonce = Some(nonce);
        self.pkce_verifier = verifier;
        self.state = FlowState::AuthorizationRequested;

        tracing::info!(
            vendor = %self.config.vendor,
            pkce = self.pkce_verifier.is_some(),
            "authorization URL issued"
        );
        Ok(url)
    }

    /// Validate a redirect and keep its code.
    ///
    /// # Errors
    ///
    /// Fails the flow if the vendor returned `error=`, the `state` does not
    /// match this flow's nonce, or no code is present.
    pub fn accept_redirect(&mut self, redirect: AuthorizationRedirect) -> Result<()> {
        self.expect_state(FlowState::AuthorizationRequested, "accept a redirect")?;

        if let Some(error) = redirect.error {
            let description = redirect
                .error_description
                .map(|d| format!(" ({d})"))
                .unwrap_or_default();
            return self.fail(AuthError::FlowFailed {
                reason: format!("{} returned error: {error}{description}", self.config.vendor),
            });
        }

        if redirect.state.is_none() || redirect.state != self.nonce {
            tracing::warn!(vendor = %self.config.vendor, "redirect state does not match this flow");
            return self.fail(AuthError::FlowFailed {
                reason: "state parameter does not match the issued nonce".to_string(),
            });
        }

        let Some(code) = redirect.code.filter(|c| !c.is_empty()) else {
            return self.fail(AuthError::FlowFailed {
                reason: "redirect carries no authorization code".to_string(),
            });
        };

        self.code = Some(code);
        self.state = FlowState::CodeReceived;
        tracing::debug!(vendor = %self.config.vendor, "authorization code received");
        Ok(())
    }

    /// Wait for the redirect on `receiver`, then validate it.
    ///
    /// This is the only suspension point of the flow and imposes no timeout
    /// of its own. If the receiver gives up (cancellation, closed input,
    /// a caller-imposed timeout) the flow fails with the receiver's error.
    pub async fn await_redirect<R>(&mut self, receiver: &mut R) -> Result<()>
    where
        R: CodeReceiver + ?Sized,
    {
        self.expect_state(FlowState::AuthorizationRequested, "await a redirect")?;
        let redirect = receiver.receive().await;
        let redirect = self.guard(redirect)?;
        self.accept_redirect(redirect)
    }

    /// Exchange the received code at the vendor's token endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::AuthExchange`] with the vendor's payload for a
    /// non-2xx status or a body without a usable token, and
    /// [`AuthError::Request`] on transport failure. Either fails the flow.
    pub async fn exchange_code(&mut self, user_id: &str) -> Result<Credential> {
        self.expect_state(FlowState::CodeReceived, "exchange the code")?;
        let code = self.code.take().unwrap_or_default();

        let mut params = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.clone()),
        ];
        if let Some(verifier) = &self.pkce_verifier {
            params.push(("code_verifier", verifier.clone()));
        }

        tracing::debug!(
            vendor = %self.config.vendor,
            token_url = %self.config.token_url,
            "exchanging authorization code"
        );

        let token_url = &self.config.token_url;
        let reply = post_token_request(&self.client, &self.config, token_url, params).await;
        let reply = self.guard(reply.map_err(AuthError::from))?;

        if !reply.status.is_success() {
            tracing::warn!(
                vendor = %self.config.vendor,
                status = reply.status.as_u16(),
                "authorization code exchange rejected"
            );
            return self.fail(AuthError::AuthExchange {
                vendor: self.config.vendor.clone(),
                status: Some(reply.status.as_u16()),
                payload: reply.body,
            });
        }

        let now = chrono::Utc::now().timestamp();
        let grant = match self
            .config
            .profile
            .kind
            .normalize_token_response(&reply.body, &self.config, now)
        {
            Ok(grant) => grant,
            Err(reason) => {
                tracing::warn!(vendor = %self.config.vendor, %reason, "unusable token response");
                return self.fail(AuthError::AuthExchange {
                    vendor: self.config.vendor.clone(),
                    status: Some(reply.status.as_u16()),
                    payload: reply.body,
                });
            }
        };

        let credential = grant.into_credential(&self.config.vendor, user_id);
        self.credential = Some(credential.clone());
        self.state = FlowState::TokenExchanged;

        tracing::info!(
            vendor = %self.config.vendor,
            user_id,
            refreshable = credential.is_refreshable(),
            "authorization code exchanged"
        );
        Ok(credential)
    }

    /// Persist the exchanged credential and finish the flow.
    ///
    /// # Errors
    ///
    /// A store failure fails the flow; it never reports `Complete` with an
    /// unsaved credential.
    pub fn complete(&mut self, store: &CredentialStore) -> Result<Credential> {
        self.expect_state(FlowState::TokenExchanged, "complete")?;
        let Some(credential) = self.credential.take() else {
            return self.fail(AuthError::FlowFailed {
                reason: "no credential to persist".to_string(),
            });
        };

        let saved = store
            .save(&credential.vendor, &credential.user_id, &credential)
            .map_err(AuthError::from);
        self.guard(saved)?;

        self.state = FlowState::Complete;
        tracing::info!(
            vendor = %credential.vendor,
            user_id = %credential.user_id,
            "authorization complete"
        );
        Ok(credential)
    }

    /// Abandon the flow at the operator's request.
    pub fn cancel(&mut self) {
        if self.state != FlowState::Complete {
            tracing::info!(
                vendor = %self.config.vendor,
                from = %self.state,
                "authorization cancelled"
            );
            self.state = FlowState::Failed;
        }
    }

    fn expect_state(&self, expected: FlowState, action: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(AuthError::FlowFailed {
                reason: format!("cannot {action} while the flow is {}", self.state),
            })
        }
    }

    fn fail<T>(&mut self, err: AuthError) -> Result<T> {
        self.state = FlowState::Failed;
        self.nonce = None;
        self.pkce_verifier = None;
        Err(err)
    }

    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => self.fail(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_config() -> OAuthConfig {
        OAuthConfig::for_test("acme", "https://auth.example.com").with_scopes(["read", "write"])
    }

    fn query(url: &Url) -> HashMap<String, String> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    fn redirect(code: Option<&str>, state: Option<&str>) -> AuthorizationRedirect {
        AuthorizationRedirect {
            code: code.map(String::from),
            state: state.map(String::from),
            error: None,
            error_description: None,
        }
    }

    #[test]
    fn pkce_verifier_is_correct_length_and_url_safe() {
        let verifier = generate_pkce_verifier().unwrap();
        // 32 bytes base64url encoded = 43 characters (no padding).
        assert_eq!(verifier.len(), 43);
        assert!(
            verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn pkce_challenge_matches_rfc7636_vector() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            pkce_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn state_nonces_are_unique() {
        assert_ne!(generate_state_nonce(), generate_state_nonce());
    }

    #[test]
    fn authorization_url_includes_all_params() {
        let url = authorization_url(&test_config(), &[], "nonce-1", Some("chal")).unwrap();
        let params = query(&url);

        assert_eq!(url.path(), "/authorize");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "client-id");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:8400/callback");
        assert_eq!(params["state"], "nonce-1");
        assert_eq!(params["scope"], "read write");
        assert_eq!(params["code_challenge"], "chal");
        assert_eq!(params["code_challenge_method"], "S256");
    }

    #[test]
    fn authorization_url_is_deterministic() {
        let scopes = vec!["contacts".to_string()];
        let a = authorization_url(&test_config(), &scopes, "s", None).unwrap();
        let b = authorization_url(&test_config(), &scopes, "s", None).unwrap();
        assert_eq!(a, b);
        assert_eq!(query(&a)["scope"], "contacts");
        assert!(!query(&a).contains_key("code_challenge"));
    }

    #[test]
    fn authorization_url_profile_and_extra_params() {
        let config = OAuthConfig::new("notion", "id").with_redirect_uri("http://localhost:8080");
        let params = query(&authorization_url(&config, &[], "s", None).unwrap());
        assert_eq!(params["owner"], "user");
        assert!(!params.contains_key("scope"));

        let mut config = test_config();
        config
            .extra_auth_params
            .insert("access_type".into(), "offline".into());
        let params = query(&authorization_url(&config, &[], "s", None).unwrap());
        assert_eq!(params["access_type"], "offline");
    }

    #[test]
    fn flow_issues_nonce_and_pkce_for_generic_vendor() {
        let mut flow = OAuthFlow::new(test_config());
        assert_eq!(flow.state(), FlowState::Idle);

        let url = flow.build_authorization_url(&[]).unwrap();
        let params = query(&url);
        assert_eq!(flow.state(), FlowState::AuthorizationRequested);
        assert_eq!(params.get("state"), flow.nonce.as_ref());
        assert!(params.contains_key("code_challenge"));
    }

    #[test]
    fn flow_skips_pkce_when_profile_disables_it() {
        let config = OAuthConfig::for_test("hubspot", "https://auth.example.com");
        let mut flow = OAuthFlow::new(config);
        let params = query(&flow.build_authorization_url(&[]).unwrap());
        assert!(!params.contains_key("code_challenge"));
        assert!(flow.pkce_verifier.is_none());
    }

    #[test]
    fn flow_accepts_matching_state() {
        let mut flow = OAuthFlow::new(test_config());
        flow.build_authorization_url(&[]).unwrap();
        let nonce = flow.nonce.clone().unwrap();

        flow.accept_redirect(redirect(Some("the-code"), Some(&nonce)))
            .unwrap();
        assert_eq!(flow.state(), FlowState::CodeReceived);
        assert_eq!(flow.code.as_deref(), Some("the-code"));
    }

    #[test]
    fn flow_rejects_mismatched_or_missing_state() {
        let mut flow = OAuthFlow::new(test_config());
        flow.build_authorization_url(&[]).unwrap();
        let err = flow
            .accept_redirect(redirect(Some("code"), Some("forged")))
            .unwrap_err();
        assert!(matches!(err, AuthError::FlowFailed { .. }));
        assert_eq!(flow.state(), FlowState::Failed);

        let mut flow = OAuthFlow::new(test_config());
        flow.build_authorization_url(&[]).unwrap();
        assert!(flow.accept_redirect(redirect(Some("code"), None)).is_err());
        assert_eq!(flow.state(), FlowState::Failed);
    }

    #[test]
    fn flow_fails_on_vendor_error_redirect() {
        let mut flow = OAuthFlow::new(test_config());
        flow.build_authorization_url(&[]).unwrap();
        let err = flow
            .accept_redirect(AuthorizationRedirect {
                code: None,
                state: flow.nonce.clone(),
                error: Some("access_denied".into()),
                error_description: Some("user said no".into()),
            })
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("access_denied"));
        assert!(msg.contains("user said no"));
        assert_eq!(flow.state(), FlowState::Failed);
    }

    #[test]
    fn flow_rejects_out_of_order_calls() {
        let mut flow = OAuthFlow::new(test_config());
        let err = flow
            .accept_redirect(redirect(Some("c"), Some("s")))
            .unwrap_err();
        assert!(err.to_string().contains("while the flow is idle"));
        // Out-of-order calls do not change the state.
        assert_eq!(flow.state(), FlowState::Idle);

        flow.build_authorization_url(&[]).unwrap();
        assert!(flow.build_authorization_url(&[]).is_err());
    }

    #[test]
    fn cancel_fails_the_flow() {
        let mut flow = OAuthFlow::new(test_config());
        flow.build_authorization_url(&[]).unwrap();
        flow.cancel();
        assert_eq!(flow.state(), FlowState::Failed);
    }

    #[tokio::test]
    async fn exchange_requires_received_code() {
        let mut flow = OAuthFlow::new(test_config());
        let err = flow.exchange_code("local").await.unwrap_err();
        assert!(matches!(err, AuthError::FlowFailed { .. }));
    }
}
