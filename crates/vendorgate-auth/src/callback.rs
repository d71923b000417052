//! Local HTTP listener for the OAuth redirect.
//!
//! The vendor redirects the browser to the configured `redirect_uri`, e.g.
//! `http://localhost:8080/?code=xxx&state=yyy`. [`CallbackServer`] binds the
//! port of that URI on the loopback interface, answers stray requests (the
//! browser's favicon request, a reload without parameters) and returns the
//! first request that carries a code or an error.
//!
//! This uses a raw [`tokio::net::TcpListener`]; the redirect is a single
//! small GET request.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use url::Url;

use crate::error::{AuthError, Result};
use crate::receiver::{AuthorizationRedirect, CodeReceiver};

/// Page returned to the browser once the redirect has been captured.
const SUCCESS_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Authorization received</title>
    <style>
        body {
            font-family: -apple-system, "Segoe UI", Roboto, sans-serif;
            text-align: center;
            margin-top: 20vh;
            color: #333;
        }
        h1 { color: #22c55e; }
    </style>
</head>
<body>
    <h1>Authorization received</h1>
    <p>You can close this tab and return to the terminal.</p>
</body>
</html>"#;

const ERROR_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Authorization failed</title></head>
<body style="font-family: sans-serif; text-align: center; margin-top: 20vh;">
    <h1 style="color: #dc2626;">Authorization failed</h1>
    <p>The vendor returned an error. Check the terminal for details.</p>
</body>
</html>"#;

/// Requests are small GETs; anything beyond this is ignored.
const MAX_REQUEST_BYTES: usize = 8192;

/// Idle connections are dropped after this long without a request.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// One-shot HTTP listener bound to the redirect URI's port.
pub struct CallbackServer {
    listener: TcpListener,
}

impl CallbackServer {
    /// Bind the loopback port named by `redirect_uri`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if the URI is not an `http` URL
    /// on a loopback host, and [`AuthError::Io`] if the port cannot be bound.
    pub async fn bind(redirect_uri: &str) -> Result<Self> {
        let url = Url::parse(redirect_uri)?;
        if url.scheme() != "http" {
            return Err(AuthError::InvalidConfig {
                reason: format!("callback listener needs an http redirect_uri, got {redirect_uri}"),
            });
        }

        let host = match url.host_str() {
            Some("localhost") | Some("127.0.0.1") => "127.0.0.1",
            Some("[::1]") | Some("::1") => "[::1]",
            other => {
                return Err(AuthError::InvalidConfig {
                    reason: format!(
                        "callback listener only binds loopback hosts, got {}",
                        other.unwrap_or("<none>")
                    ),
                });
            }
        };
        let port = url.port_or_known_default().unwrap_or(80);

        Self::bind_addr(&format!("{host}:{port}")).await
    }

    /// Bind an explicit address such as `127.0.0.1:0`.
    pub async fn bind_addr(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(
            addr = %listener.local_addr()?,
            "callback server listening for OAuth redirect"
        );
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve connections until one carries the redirect.
    ///
    /// Connections are answered concurrently, so a socket the browser opens
    /// speculatively and never uses cannot hold up the real redirect.
    async fn accept_redirect(&self) -> Result<AuthorizationRedirect> {
        let mut pending = JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (mut stream, peer) = accepted?;
                    tracing::debug!(peer = %peer, "accepted callback connection");
                    pending.spawn(async move { Self::handle(&mut stream).await });
                }
                Some(joined) = pending.join_next(), if !pending.is_empty() => match joined {
                    Ok(Ok(Some(redirect))) => {
                        tracing::info!("callback received");
                        return Ok(redirect);
                    }
                    Ok(Ok(None)) => {}
                    Ok(Err(e)) => {
                        tracing::debug!(error = %e, "dropping callback connection");
                    }
                    Err(e) => tracing::debug!(error = %e, "callback connection task failed"),
                },
            }
        }
    }

    /// Answer one connection; `Some` if it was the redirect.
    async fn handle(stream: &mut TcpStream) -> Result<Option<AuthorizationRedirect>> {
        let mut buf = vec![0u8; MAX_REQUEST_BYTES];
        let n = tokio::time::timeout(READ_TIMEOUT, stream.read(&mut buf))
            .await
            .map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "callback connection sent no request",
                )
            })??;
        let request = String::from_utf8_lossy(&buf[..n]);

        let target = match Self::request_target(&request) {
            Some(target) => target,
            None => {
                Self::respond(stream, "400 Bad Request", "text/plain", "bad request").await?;
                return Ok(None);
            }
        };

        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        if path == "/favicon.ico" {
            Self::respond(stream, "204 No Content", "text/plain", "").await?;
            return Ok(None);
        }

        let redirect = AuthorizationRedirect::from_query(query);
        if !redirect.is_redirect() {
            Self::respond(
                stream,
                "400 Bad Request",
                "text/plain",
                "missing authorization code",
            )
            .await?;
            return Ok(None);
        }

        let page = if redirect.error.is_some() {
            ERROR_HTML
        } else {
            SUCCESS_HTML
        };
        Self::respond(stream, "200 OK", "text/html; charset=utf-8", page).await?;
        Ok(Some(redirect))
    }

    /// Target of `GET <target> HTTP/1.1`.
    fn request_target(request: &str) -> Option<&str> {
        let line = request.lines().next()?;
        let mut parts = line.split_whitespace();
        let method = parts.next()?;
        let target = parts.next()?;
        (method == "GET").then_some(target)
    }

    async fn respond(
        stream: &mut TcpStream,
        status: &str,
        content_type: &str,
        body: &str,
    ) -> Result<()> {
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\n\
             Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl CodeReceiver for CallbackServer {
    async fn receive(&mut self) -> Result<AuthorizationRedirect> {
        self.accept_redirect().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
