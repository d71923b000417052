//! Ways an authorization redirect reaches the flow.
//!
//! A [`CodeReceiver`] produces the query parameters of the vendor's
//! redirect. It does not validate them; [`OAuthFlow`](crate::OAuthFlow)
//! checks the `state` nonce and any `error=` itself. Implementations:
//!
//! - [`CallbackServer`](crate::CallbackServer): local HTTP listener.
//! - [`PasteReceiver`]: the operator pastes the redirect URL.
//! - [`ChannelReceiver`]: the host process hands the redirect over.
//!
//! None of them time out on their own; wrap one in [`WithTimeout`] to
//! bound the wait.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use url::Url;

use crate::error::{AuthError, Result};

/// Query parameters of an authorization redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationRedirect {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl AuthorizationRedirect {
    /// Decode a raw query string (without the leading `?`).
    pub fn from_query(query: &str) -> Self {
        let mut redirect = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = value.into_owned();
            match key.as_ref() {
                "code" => redirect.code = Some(value),
                "state" => redirect.state = Some(value),
                "error" => redirect.error = Some(value),
                "error_description" => redirect.error_description = Some(value),
                _ => {}
            }
        }
        redirect
    }

    /// Decode a pasted redirect: a full URL, a path with query, or a bare
    /// query string.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::FlowFailed`] when the input has neither a code
    /// nor an error, e.g. a bare code without its `state`.
    pub fn from_pasted(input: &str) -> Result<Self> {
        let input = input.trim();
        let query = match Url::parse(input) {
            Ok(url) => url.query().unwrap_or_default().to_string(),
            Err(_) => match input.split_once('?') {
                Some((_, query)) => query.to_string(),
                None if input.contains('=') => input.to_string(),
                None => String::new(),
            },
        };

        let redirect = Self::from_query(&query);
        if redirect.code.is_none() && redirect.error.is_none() {
            return Err(AuthError::FlowFailed {
                reason: "paste the full redirect URL (it must include code and state)".to_string(),
            });
        }
        Ok(redirect)
    }

    /// Whether this request is an OAuth redirect at all.
    pub fn is_redirect(&self) -> bool {
        self.code.is_some() || self.error.is_some()
    }
}

/// Source of an authorization redirect.
#[async_trait]
pub trait CodeReceiver: Send {
    /// Wait until a redirect arrives.
    async fn receive(&mut self) -> Result<AuthorizationRedirect>;
}

// ---------------------------------------------------------------------------
// Paste
// ---------------------------------------------------------------------------

/// Reads a pasted redirect URL from a line-oriented input.
pub struct PasteReceiver<R> {
    input: R,
}

impl PasteReceiver<BufReader<tokio::io::Stdin>> {
    /// Read from the process's standard input.
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R> PasteReceiver<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(input: R) -> Self {
        Self { input }
    }
}

#[async_trait]
impl<R> CodeReceiver for PasteReceiver<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn receive(&mut self) -> Result<AuthorizationRedirect> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.input.read_line(&mut line).await? == 0 {
                return Err(AuthError::FlowFailed {
                    reason: "input closed before a redirect URL was pasted".to_string(),
                });
            }
            if !line.trim().is_empty() {
                return AuthorizationRedirect::from_pasted(&line);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Receives the redirect from the host process over a oneshot channel.
pub struct ChannelReceiver {
    rx: Option<oneshot::Receiver<AuthorizationRedirect>>,
}

impl ChannelReceiver {
    pub fn new(rx: oneshot::Receiver<AuthorizationRedirect>) -> Self {
        Self { rx: Some(rx) }
    }

    /// Create a receiver together with the sender the host keeps.
    pub fn pair() -> (oneshot::Sender<AuthorizationRedirect>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl CodeReceiver for ChannelReceiver {
    async fn receive(&mut self) -> Result<AuthorizationRedirect> {
        let rx = self.rx.take().ok_or_else(|| AuthError::FlowFailed {
            reason: "redirect channel already consumed".to_string(),
        })?;
        rx.await.map_err(|_| AuthError::FlowFailed {
            reason: "authorization cancelled: redirect channel closed".to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Timeout
// ---------------------------------------------------------------------------

/// Bounds the wait of another receiver.
pub struct WithTimeout<R> {
    inner: R,
    timeout: Duration,
}

impl<R> WithTimeout<R> {
    pub fn new(inner: R, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<R> CodeReceiver for WithTimeout<R>
where
    R: CodeReceiver,
{
    async fn receive(&mut self) -> Result<AuthorizationRedirect> {
        match tokio::time::timeout(self.timeout, self.inner.receive()).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::CallbackTimeout {
                timeout_secs: self.timeout.as_secs(),
            }),
        }
    }
}
