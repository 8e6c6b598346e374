//! MCP wire transport: JSON-RPC 2.0 over streamable HTTP.
//!
//! [`McpRpc`] is the minimal transport contract the adapter drives —
//! initialize, list tools, call a tool, close. Keeping it a trait means
//! tests substitute a scripted fake and the adapter logic stays
//! independent of the HTTP plumbing. [`HttpMcpRpc`] is the production
//! implementation on `reqwest`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The protocol revision this client declares on `initialize`.
pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";

const CLIENT_NAME: &str = "llm-bridge";
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A transport-level MCP failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpRpcError {
    /// What went wrong.
    pub message: String,
    /// Whether the failure was the request token being cancelled.
    pub cancelled: bool,
}

impl McpRpcError {
    /// A plain transport or protocol failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cancelled: false,
        }
    }

    /// The request token fired mid-call.
    pub fn cancelled() -> Self {
        Self {
            message: "operation cancelled".into(),
            cancelled: true,
        }
    }
}

impl std::fmt::Display for McpRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for McpRpcError {}

/// What the server told us during `initialize`.
#[derive(Debug, Clone, Default)]
pub struct McpHandshake {
    /// The server's advertised name, when present.
    pub server_name: Option<String>,
    /// The protocol version the server settled on.
    pub protocol_version: Option<String>,
    /// Whether the server advertises tool capability. Without it the
    /// adapter skips discovery and exposes no tools.
    pub tool_capable: bool,
}

/// One tool as advertised by an MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpToolInfo {
    /// The tool name.
    pub name: String,
    /// Description shown to the model.
    #[serde(default)]
    pub description: Option<String>,
    /// The server's raw input schema, kept verbatim.
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Option<Value>,
}

/// The result of one `tools/call`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct McpCallOutcome {
    /// The server's error flag.
    pub is_error: bool,
    /// Content blocks, verbatim.
    pub content: Value,
    /// Structured content, verbatim.
    pub structured_content: Value,
}

impl McpCallOutcome {
    fn from_result(result: &Value) -> Self {
        Self {
            is_error: result
                .get("isError")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            content: result.get("content").cloned().unwrap_or(Value::Null),
            structured_content: result
                .get("structuredContent")
                .cloned()
                .unwrap_or(Value::Null),
        }
    }
}

/// The transport contract the adapter drives.
///
/// Object-safe (boxed futures) so the production HTTP transport and
/// test fakes interchange freely.
pub trait McpRpc: Send + Sync {
    /// Performs the `initialize` handshake.
    fn initialize<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<McpHandshake, McpRpcError>> + Send + 'a>>;

    /// Fetches the server's tool catalog.
    fn list_tools<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<McpToolInfo>, McpRpcError>> + Send + 'a>>;

    /// Invokes one tool with structured arguments.
    fn call_tool<'a>(
        &'a self,
        name: &'a str,
        arguments: Value,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<McpCallOutcome, McpRpcError>> + Send + 'a>>;

    /// Closes the transport. Idempotent.
    fn close<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// JSON-RPC 2.0 over streamable HTTP, via `reqwest`.
///
/// One POST per request; the `Mcp-Session-Id` header returned by the
/// server during `initialize` is echoed on subsequent calls. The
/// caller's authorization value rides along as the `Authorization`
/// header on every request, including each `tools/call`.
pub struct HttpMcpRpc {
    url: String,
    auth: Option<String>,
    extra_headers: HashMap<String, String>,
    client: reqwest::Client,
    next_id: AtomicU64,
    session_id: Mutex<Option<String>>,
}

impl HttpMcpRpc {
    /// Builds a transport for `url` with an optional authorization
    /// value and custom headers.
    pub fn new(
        url: impl Into<String>,
        auth: Option<String>,
        extra_headers: HashMap<String, String>,
    ) -> Result<Self, McpRpcError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| McpRpcError::failed(format!("building HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            auth,
            extra_headers,
            client,
            next_id: AtomicU64::new(0),
            session_id: Mutex::new(None),
        })
    }

    fn build_headers(&self) -> Result<HeaderMap, McpRpcError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "accept",
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        for (key, value) in &self.extra_headers {
            let name = HeaderName::from_str(key)
                .map_err(|e| McpRpcError::failed(format!("invalid header name {key:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| McpRpcError::failed(format!("invalid value for header {key:?}: {e}")))?;
            headers.insert(name, value);
        }
        if let Some(auth) = &self.auth {
            headers.insert(
                "authorization",
                HeaderValue::from_str(auth)
                    .map_err(|_| McpRpcError::failed("authorization value is not a valid header"))?,
            );
        }
        if let Some(session) = self.session_id.lock().expect("session lock poisoned").as_deref() {
            headers.insert(
                "mcp-session-id",
                HeaderValue::from_str(session)
                    .map_err(|_| McpRpcError::failed("session id is not a valid header"))?,
            );
        }
        Ok(headers)
    }

    async fn post(&self, body: Value, cancel: &CancellationToken) -> Result<reqwest::Response, McpRpcError> {
        let headers = self.build_headers()?;
        let send = self.client.post(&self.url).headers(headers).json(&body).send();

        let response = tokio::select! {
            () = cancel.cancelled() => return Err(McpRpcError::cancelled()),
            result = send => result.map_err(|e| McpRpcError::failed(format!("HTTP request failed: {e}")))?,
        };

        if let Some(session) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock().expect("session lock poisoned") = Some(session.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpRpcError::failed(format!("HTTP {status}: {body}")));
        }
        Ok(response)
    }

    /// Sends one JSON-RPC request and unwraps its `result`.
    async fn request(
        &self,
        method: &str,
        params: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, McpRpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!(url = %self.url, method, "mcp request");

        let response = self.post(body, cancel).await?;
        let envelope: Value = tokio::select! {
            () = cancel.cancelled() => return Err(McpRpcError::cancelled()),
            result = response.json() => {
                result.map_err(|e| McpRpcError::failed(format!("parsing {method} response: {e}")))?
            }
        };

        if let Some(error) = envelope.get("error") {
            return Err(McpRpcError::failed(format!("{method}: {error}")));
        }
        envelope
            .get("result")
            .cloned()
            .ok_or_else(|| McpRpcError::failed(format!("{method}: response carried no result")))
    }

    /// Fires the `notifications/initialized` notification. Failures are
    /// ignored — the handshake already succeeded.
    async fn notify_initialized(&self, cancel: &CancellationToken) {
        let body = json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
        });
        let _ = self.post(body, cancel).await;
    }
}

impl McpRpc for HttpMcpRpc {
    fn initialize<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<McpHandshake, McpRpcError>> + Send + 'a>> {
        Box::pin(async move {
            let params = json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": CLIENT_NAME,
                    "version": CLIENT_VERSION,
                },
            });
            let result = self.request("initialize", params, cancel).await?;
            self.notify_initialized(cancel).await;

            Ok(McpHandshake {
                server_name: result["serverInfo"]["name"].as_str().map(str::to_string),
                protocol_version: result["protocolVersion"].as_str().map(str::to_string),
                tool_capable: result["capabilities"].get("tools").is_some(),
            })
        })
    }

    fn list_tools<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<McpToolInfo>, McpRpcError>> + Send + 'a>> {
        Box::pin(async move {
            let result = self.request("tools/list", json!({}), cancel).await?;
            let tools = result.get("tools").cloned().unwrap_or_else(|| json!([]));
            serde_json::from_value(tools)
                .map_err(|e| McpRpcError::failed(format!("parsing tool catalog: {e}")))
        })
    }

    fn call_tool<'a>(
        &'a self,
        name: &'a str,
        arguments: Value,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<McpCallOutcome, McpRpcError>> + Send + 'a>> {
        Box::pin(async move {
            let params = json!({
                "name": name,
                "arguments": arguments,
            });
            let result = self.request("tools/call", params, cancel).await?;
            Ok(McpCallOutcome::from_result(&result))
        })
    }

    fn close<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        // Streamable HTTP holds no persistent connection beyond the
        // pool; dropping the session id is all teardown requires.
        Box::pin(async move {
            *self.session_id.lock().expect("session lock poisoned") = None;
        })
    }
}

impl std::fmt::Debug for HttpMcpRpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpMcpRpc")
            .field("url", &self.url)
            .field("has_auth", &self.auth.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_outcome_from_full_result() {
        let result = json!({
            "isError": true,
            "content": [{"type": "text", "text": "boom"}],
            "structuredContent": {"code": 7},
        });
        let outcome = McpCallOutcome::from_result(&result);
        assert!(outcome.is_error);
        assert_eq!(outcome.content[0]["text"], "boom");
        assert_eq!(outcome.structured_content["code"], 7);
    }

    #[test]
    fn test_call_outcome_defaults() {
        let outcome = McpCallOutcome::from_result(&json!({}));
        assert!(!outcome.is_error);
        assert_eq!(outcome.content, Value::Null);
        assert_eq!(outcome.structured_content, Value::Null);
    }

    #[test]
    fn test_tool_info_deserializes_raw_schema() {
        let info: McpToolInfo = serde_json::from_value(json!({
            "name": "lookup",
            "description": "Find a patient",
            "inputSchema": {
                "type": "object",
                "properties": {"patient": {"type": "string"}},
            },
        }))
        .unwrap();
        assert_eq!(info.name, "lookup");
        assert_eq!(info.input_schema.unwrap()["type"], "object");
    }

    #[test]
    fn test_tool_info_tolerates_missing_fields() {
        let info: McpToolInfo = serde_json::from_value(json!({"name": "bare"})).unwrap();
        assert!(info.description.is_none());
        assert!(info.input_schema.is_none());
    }

    #[test]
    fn test_rpc_error_cancelled_flag() {
        assert!(McpRpcError::cancelled().cancelled);
        assert!(!McpRpcError::failed("x").cancelled);
    }

    #[test]
    fn test_http_rpc_rejects_invalid_header_names() {
        let mut headers = HashMap::new();
        headers.insert("bad header".into(), "value".into());
        let rpc = HttpMcpRpc::new("http://localhost:1/mcp", None, headers).unwrap();
        assert!(rpc.build_headers().is_err());
    }

    #[test]
    fn test_http_rpc_headers_include_auth_and_custom() {
        let mut headers = HashMap::new();
        headers.insert("x-tenant".into(), "acme".into());
        let rpc = HttpMcpRpc::new(
            "http://localhost:1/mcp",
            Some("Bearer token".into()),
            headers,
        )
        .unwrap();
        let built = rpc.build_headers().unwrap();
        assert_eq!(built.get("authorization").unwrap(), "Bearer token");
        assert_eq!(built.get("x-tenant").unwrap(), "acme");
    }
}
