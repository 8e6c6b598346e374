//! MCP tool bridging.
//!
//! [`McpToolAdapter`] is a persistent handle to one MCP server. It
//! connects over streamable HTTP, discovers the server's tool catalog
//! (optionally filtered by an allow-list), and exposes each remote tool
//! as a local [`Tool`] whose handler forwards to `tools/call`. This is
//! how providers without native MCP support gain MCP capability
//! transparently: by the time the orchestration loop runs, MCP tools
//! are indistinguishable from local ones.
//!
//! Failure policy follows the connect/call split: infrastructure
//! failures during connect or discovery are fatal
//! ([`LlmError::McpConnectFailed`] / [`LlmError::McpListToolsFailed`]),
//! while failures during a call degrade into an
//! `{"is_error": true, "error": …}` payload so the conversation can
//! continue and the model can react.

mod rpc;

pub use rpc::{
    HttpMcpRpc, McpCallOutcome, McpHandshake, McpRpc, McpRpcError, McpToolInfo,
    MCP_PROTOCOL_VERSION,
};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock, RwLock};

use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::LlmError;
use crate::tool::{Tool, ToolError, ToolHandler, ToolHandlerFuture};

/// Declares one remote MCP server to bridge during generation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct McpToolDescriptor {
    /// Logical name, used as a namespace label in logs.
    pub name: String,
    /// The server URL.
    pub url: String,
    /// Authorization value delivered as the `Authorization` header on
    /// the handshake and on every tool call.
    pub auth_token: Option<String>,
    /// Extra HTTP headers for the transport.
    pub headers: HashMap<String, String>,
    /// Tools to expose, by exact name. `None` means every tool the
    /// server advertises.
    pub allowed_tools: Option<Vec<String>>,
}

impl McpToolDescriptor {
    /// A descriptor with just a label and URL.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Trims allow-list entries; blank entries are dropped, and an
/// allow-list that ends up empty means "allow everything".
fn normalize_allow_list(allowed: Option<&[String]>) -> Option<HashSet<String>> {
    let allowed = allowed?;
    let set: HashSet<String> = allowed
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    if set.is_empty() {
        None
    } else {
        Some(set)
    }
}

/// A persistent handle to one MCP server.
///
/// Connect before use; disconnect from the generation's cleanup path.
/// The adapter must outlive any handler closures produced by
/// [`as_tools`](Self::as_tools) — they hold an `Arc` back to it, so the
/// adapter itself is always handed out as `Arc<McpToolAdapter>`.
pub struct McpToolAdapter {
    label: String,
    server_url: String,
    allowed: Option<HashSet<String>>,
    rpc: RwLock<Option<Arc<dyn McpRpc>>>,
    tools: RwLock<Vec<McpToolInfo>>,
}

impl McpToolAdapter {
    /// Connects to the server described by `descriptor` over streamable
    /// HTTP and performs discovery.
    pub async fn connect(
        descriptor: &McpToolDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Arc<Self>, LlmError> {
        if descriptor.url.trim().is_empty() {
            return Err(LlmError::McpConnectFailed {
                url: descriptor.url.clone(),
                message: "server URL is required".into(),
            });
        }
        let rpc = HttpMcpRpc::new(
            descriptor.url.clone(),
            descriptor.auth_token.clone(),
            descriptor.headers.clone(),
        )
        .map_err(|e| LlmError::McpConnectFailed {
            url: descriptor.url.clone(),
            message: e.message,
        })?;
        Self::connect_with(Arc::new(rpc), descriptor, cancel).await
    }

    /// Connects through a caller-supplied transport. This is the seam
    /// the tests drive with a scripted [`McpRpc`].
    pub async fn connect_with(
        rpc: Arc<dyn McpRpc>,
        descriptor: &McpToolDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Arc<Self>, LlmError> {
        let connect_err = |e: McpRpcError| {
            if e.cancelled {
                LlmError::Cancelled
            } else {
                LlmError::McpConnectFailed {
                    url: descriptor.url.clone(),
                    message: e.message,
                }
            }
        };

        let handshake = match rpc.initialize(cancel).await {
            Ok(handshake) => handshake,
            Err(e) => {
                rpc.close().await;
                return Err(connect_err(e));
            }
        };

        let tools = if handshake.tool_capable {
            match rpc.list_tools(cancel).await {
                Ok(tools) => tools,
                Err(e) => {
                    rpc.close().await;
                    return Err(connect_err(e));
                }
            }
        } else {
            Vec::new()
        };

        let adapter = Self {
            label: descriptor.name.clone(),
            server_url: descriptor.url.clone(),
            allowed: normalize_allow_list(descriptor.allowed_tools.as_deref()),
            rpc: RwLock::new(Some(rpc)),
            tools: RwLock::new(Vec::new()),
        };
        adapter.install_tools(tools);

        info!(
            server = %adapter.label,
            url = %adapter.server_url,
            tools = adapter.tools.read().expect("mcp lock poisoned").len(),
            protocol = handshake.protocol_version.as_deref().unwrap_or("unknown"),
            "mcp adapter connected"
        );
        Ok(Arc::new(adapter))
    }

    fn install_tools(&self, tools: Vec<McpToolInfo>) {
        let filtered: Vec<McpToolInfo> = match &self.allowed {
            None => tools,
            Some(allowed) => tools
                .into_iter()
                .filter(|tool| allowed.contains(&tool.name))
                .collect(),
        };
        store_cached_tool_names(
            &self.server_url,
            filtered.iter().map(|t| t.name.clone()).collect(),
        );
        *self.tools.write().expect("mcp lock poisoned") = filtered;
    }

    fn live_rpc(&self) -> Option<Arc<dyn McpRpc>> {
        self.rpc.read().expect("mcp lock poisoned").clone()
    }

    /// Re-fetches the tool catalog from the connected server.
    pub async fn refresh_tools(&self, cancel: &CancellationToken) -> Result<(), LlmError> {
        let Some(rpc) = self.live_rpc() else {
            return Err(LlmError::McpListToolsFailed {
                url: self.server_url.clone(),
                message: "adapter is not connected".into(),
            });
        };
        let tools = rpc.list_tools(cancel).await.map_err(|e| {
            if e.cancelled {
                LlmError::Cancelled
            } else {
                LlmError::McpListToolsFailed {
                    url: self.server_url.clone(),
                    message: e.message,
                }
            }
        })?;
        self.install_tools(tools);
        Ok(())
    }

    /// Closes the transport. Idempotent; safe from cleanup paths.
    pub async fn disconnect(&self) {
        let rpc = self.rpc.write().expect("mcp lock poisoned").take();
        if let Some(rpc) = rpc {
            rpc.close().await;
            debug!(server = %self.label, "mcp adapter disconnected");
        }
    }

    /// The filtered tool catalog, as a defensive copy.
    pub fn tools(&self) -> Vec<McpToolInfo> {
        self.tools.read().expect("mcp lock poisoned").clone()
    }

    /// The adapter's namespace label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Exposes the catalog as local [`Tool`]s whose handlers forward to
    /// [`execute_tool`](Self::execute_tool) on this adapter.
    pub fn as_tools(self: &Arc<Self>) -> Vec<Tool> {
        self.tools()
            .into_iter()
            .map(|info| Tool {
                handler: Arc::new(McpToolHandler {
                    adapter: Arc::clone(self),
                    tool_name: info.name.clone(),
                }),
                name: info.name,
                description: info.description,
                input_schema: info.input_schema,
            })
            .collect()
    }

    /// Invokes one remote tool.
    ///
    /// Transport failures and tool-reported errors both come back as an
    /// `Ok` payload with `is_error: true` — tool failures belong in the
    /// conversation, not in the error channel. Only a missing
    /// connection or a blank name is a handler error.
    pub async fn execute_tool(
        &self,
        tool_name: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        let Some(rpc) = self.live_rpc() else {
            return Err(ToolError::new("mcp client is not connected"));
        };
        if tool_name.trim().is_empty() {
            return Err(ToolError::new("tool name is required"));
        }

        let arguments = match arguments {
            Value::Null => Value::Object(Map::new()),
            Value::Object(map) => Value::Object(map),
            other => {
                return Ok(json!({
                    "is_error": true,
                    "error": format!("tool arguments must be a JSON object, got {other}"),
                }));
            }
        };

        match rpc.call_tool(tool_name, arguments, cancel).await {
            Ok(outcome) if outcome.is_error => Ok(json!({
                "is_error": true,
                "error": error_text(&outcome.content),
            })),
            Ok(outcome) => Ok(json!({
                "is_error": false,
                "content": outcome.content,
                "structured_content": outcome.structured_content,
            })),
            Err(e) => Ok(json!({
                "is_error": true,
                "error": e.message,
            })),
        }
    }
}

impl std::fmt::Debug for McpToolAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpToolAdapter")
            .field("label", &self.label)
            .field("url", &self.server_url)
            .field("connected", &self.live_rpc().is_some())
            .field("tools", &self.tools.read().expect("mcp lock poisoned").len())
            .finish()
    }
}

/// Flattens MCP content blocks into an error message.
fn error_text(content: &Value) -> String {
    let texts: Vec<&str> = content
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect();
    if texts.is_empty() {
        "tool reported an error".to_string()
    } else {
        texts.join("\n")
    }
}

/// Forwards one bridged tool's invocations to its adapter.
struct McpToolHandler {
    adapter: Arc<McpToolAdapter>,
    tool_name: String,
}

impl ToolHandler for McpToolHandler {
    fn call<'a>(&'a self, cancel: &'a CancellationToken, arguments: Value) -> ToolHandlerFuture<'a> {
        Box::pin(async move {
            self.adapter
                .execute_tool(&self.tool_name, arguments, cancel)
                .await
        })
    }
}

// ── Per-URL tool-name cache ─────────────────────────────────────────

static TOOL_NAME_CACHE: OnceLock<RwLock<HashMap<String, Vec<String>>>> = OnceLock::new();

fn tool_name_cache() -> &'static RwLock<HashMap<String, Vec<String>>> {
    TOOL_NAME_CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// The last tool names observed for `server_url`, as a defensive copy.
///
/// A pure optimization for callers that want to short-circuit repeated
/// discovery across generators; the adapter keeps it current on every
/// successful connect and refresh.
pub fn cached_tool_names(server_url: &str) -> Option<Vec<String>> {
    tool_name_cache()
        .read()
        .expect("tool name cache poisoned")
        .get(server_url)
        .cloned()
}

fn store_cached_tool_names(server_url: &str, names: Vec<String>) {
    tool_name_cache()
        .write()
        .expect("tool name cache poisoned")
        .insert(server_url.to_string(), names);
}

/// Empties the process-wide tool-name cache. Intended for tests.
pub fn clear_tool_name_cache() {
    tool_name_cache()
        .write()
        .expect("tool name cache poisoned")
        .clear();
}
