//! Line-delimited JSON tool server.
//!
//! Each input line is one request, answered by exactly one output line:
//!
//! ```text
//! -> {"id": 1, "tool": "api_request", "arguments": {"path": "/contacts"}}
//! <- {"id": 1, "ok": true, "result": {"status": 200, "ok": true, "body": [...]}}
//! -> {"list_tools": true}
//! <- {"ok": true, "result": [{"name": "api_request", ...}]}
//! ```
//!
//! Failures are reported in-band as `{"ok": false, "error": {...}}`; the
//! loop only stops at end of input or on an I/O error.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};
use vendorgate_adapters::{Adapter, AdapterError};

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    arguments: Value,
    #[serde(default)]
    list_tools: bool,
}

/// Serve tool requests from `input` until it is exhausted.
pub async fn serve<R, W>(adapter: &dyn Adapter, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!(adapter = adapter.id(), "tool server ready");

    let mut lines = input.lines();
    let mut served = 0u64;
    while let Some(line) = lines.next_line().await.context("failed to read request")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = handle_line(adapter, line).await;
        let mut encoded = serde_json::to_vec(&response).context("failed to encode response")?;
        encoded.push(b'\n');
        output
            .write_all(&encoded)
            .await
            .context("failed to write response")?;
        output.flush().await.context("failed to flush response")?;
        served += 1;
    }

    info!(adapter = adapter.id(), requests = served, "input closed, tool server stopping");
    Ok(())
}

async fn handle_line(adapter: &dyn Adapter, line: &str) -> Value {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "malformed request line");
            return failure(None, "invalid_request", &e.to_string(), None);
        }
    };
    let id = request.id;

    if request.list_tools {
        return success(id, json!(adapter.tools()));
    }

    let Some(tool) = request.tool else {
        return failure(id, "invalid_request", "request names no tool", None);
    };
    let arguments = if request.arguments.is_null() {
        json!({})
    } else {
        request.arguments
    };

    debug!(tool = %tool, "executing tool");
    match adapter.execute_tool(&tool, arguments).await {
        Ok(result) => success(id, result),
        Err(e) => {
            warn!(tool = %tool, error = %e, "tool failed");
            failure(id, error_kind(&e), &e.to_string(), error_details(adapter.id(), &e))
        }
    }
}

fn error_kind(err: &AdapterError) -> &'static str {
    match err {
        AdapterError::ToolNotFound { .. } => "tool_not_found",
        AdapterError::InvalidParams { .. } => "invalid_params",
        AdapterError::Auth(e) => e.kind(),
        AdapterError::Request(_) => "request",
        AdapterError::ConfigError(_) => "config",
        AdapterError::SerializationError(_) => "serialization",
    }
}

fn error_details(vendor: &str, err: &AdapterError) -> Option<Value> {
    let auth = err.auth()?;
    Some(json!({
        "hint": auth.operator_hint(vendor),
        "reauthorize": auth.requires_reauthorization(),
        "retryable": auth.is_retryable(),
    }))
}

fn success(id: Option<Value>, result: Value) -> Value {
    let mut response = json!({"ok": true, "result": result});
    attach_id(&mut response, id);
    response
}

fn failure(id: Option<Value>, kind: &str, message: &str, details: Option<Value>) -> Value {
    let mut error = json!({"kind": kind, "message": message});
    if let (Some(Value::Object(details)), Some(error)) = (details, error.as_object_mut()) {
        error.extend(details);
    }
    let mut response = json!({"ok": false, "error": error});
    attach_id(&mut response, id);
    response
}

fn attach_id(response: &mut Value, id: Option<Value>) {
    if let (Some(id), Some(obj)) = (id, response.as_object_mut()) {
        obj.insert("id".to_string(), id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use vendorgate_adapters::{AdapterType, AuthRequirement, HealthStatus, ToolDefinition};
    use vendorgate_auth::AuthError;

    struct EchoAdapter;

    #[async_trait]
    impl Adapter for EchoAdapter {
        fn id(&self) -> &str {
            "acme"
        }

        fn adapter_type(&self) -> AdapterType {
            AdapterType::Other
        }

        async fn health_check(&self) -> vendorgate_adapters::Result<HealthStatus> {
            Ok(HealthStatus::Healthy)
        }

        fn tools(&self) -> Vec<ToolDefinition> {
            vec![ToolDefinition {
                name: "echo".into(),
                description: "Echo the arguments".into(),
                parameters: json!({"type": "object"}),
            }]
        }

        async fn execute_tool(
            &self,
            name: &str,
            params: Value,
        ) -> vendorgate_adapters::Result<Value> {
            match name {
                "echo" => Ok(params),
                "expired" => Err(AuthError::AuthenticationExpired {
                    vendor: "acme".into(),
                    user_id: "local".into(),
                }
                .into()),
                _ => Err(AdapterError::ToolNotFound {
                    adapter_id: "acme".into(),
                    tool_name: name.into(),
                }),
            }
        }

        fn required_auth(&self) -> Option<AuthRequirement> {
            None
        }
    }

    async fn run(input: &str) -> Vec<Value> {
        let mut output = Vec::new();
        serve(&EchoAdapter, input.as_bytes(), &mut output).await.unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn one_response_per_request_line() {
        let responses = run(concat!(
            "{\"id\": 1, \"tool\": \"echo\", \"arguments\": {\"x\": 1}}\n",
            "\n",
            "{\"list_tools\": true}\n",
            "{\"tool\": \"echo\"}\n",
        ))
        .await;

        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0], json!({"id": 1, "ok": true, "result": {"x": 1}}));
        assert_eq!(responses[1]["result"][0]["name"], "echo");
        assert_eq!(responses[2]["result"], json!({}));
    }

    #[tokio::test]
    async fn errors_are_reported_in_band() {
        let responses = run(concat!(
            "not json\n",
            "{\"id\": \"a\"}\n",
            "{\"tool\": \"nope\"}\n",
            "{\"id\": 2, \"tool\": \"expired\"}\n",
        ))
        .await;

        assert_eq!(responses[0]["error"]["kind"], "invalid_request");
        assert_eq!(responses[1]["id"], "a");
        assert_eq!(responses[1]["error"]["kind"], "invalid_request");
        assert_eq!(responses[2]["error"]["kind"], "tool_not_found");

        let expired = &responses[3];
        assert_eq!(expired["ok"], false);
        assert_eq!(expired["id"], 2);
        assert_eq!(expired["error"]["kind"], "authentication_expired");
        assert_eq!(expired["error"]["reauthorize"], true);
        assert_eq!(
            expired["error"]["hint"],
            "run `vendorgate auth acme` to authorize again"
        );
    }

    #[tokio::test]
    async fn empty_input_ends_cleanly() {
        assert!(run("").await.is_empty());
    }
}
