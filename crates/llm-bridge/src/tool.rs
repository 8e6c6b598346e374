//! Local tool declarations and per-request tool assembly.
//!
//! A [`Tool`] pairs a name, an optional description, a JSON-schema
//! input descriptor, and a handler. Handlers are owned by the caller
//! and invoked by the orchestration loop with the request's
//! cancellation token and canonicalized JSON arguments.
//!
//! [`ToolSet::assemble`] merges local tools with MCP-adapted tools into
//! one ordered sequence plus a name→handler map, failing fast on empty
//! or duplicate names.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::chat::ToolSpec;
use crate::error::LlmError;

/// An error returned by a tool handler.
///
/// Handler errors do not fail the round — the loop serializes them as a
/// `{"error": "<message>"}` tool output so the model can recover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolError {
    /// Human-readable description, shown to the model.
    pub message: String,
}

impl ToolError {
    /// Builds an error from any displayable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ToolError {}

/// Boxed future returned by tool handlers.
pub type ToolHandlerFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'a>>;

/// A single invocable tool implementation.
///
/// Object-safe so handlers can be stored as `Arc<dyn ToolHandler>`.
/// Implementations should honor `cancel` across any I/O they perform.
pub trait ToolHandler: Send + Sync {
    /// Executes the tool with canonical JSON arguments.
    ///
    /// The returned value is JSON-encoded verbatim into the follow-up
    /// request's tool-output record.
    fn call<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        arguments: Value,
    ) -> ToolHandlerFuture<'a>;
}

/// A tool declaration: identity, schema, and handler.
#[derive(Clone)]
pub struct Tool {
    /// Unique (per request) tool name.
    pub name: String,
    /// Description shown to the model.
    pub description: Option<String>,
    /// JSON Schema (object) for the tool input. `None` defaults to
    /// `{"type": "object", "properties": {}}` at assembly time.
    pub input_schema: Option<Value>,
    /// The caller-owned handler.
    pub handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("has_schema", &self.input_schema.is_some())
            .finish_non_exhaustive()
    }
}

impl PartialEq for Tool {
    /// Compares identity, description, and schema. Handlers carry no
    /// usable equality.
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.description == other.description
            && self.input_schema == other.input_schema
    }
}

/// The schema used when a tool declares none.
pub fn default_input_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// Wraps an async closure as a tool handler.
///
/// The closure receives the cancellation token and the canonical JSON
/// arguments:
///
/// ```rust
/// use llm_bridge::tool::{tool_fn, Tool};
/// use serde_json::json;
///
/// let tool = Tool {
///     name: "get_secret".into(),
///     description: Some("Returns the secret".into()),
///     input_schema: None,
///     handler: tool_fn(|_cancel, _args| async { Ok(json!({"secret": "abc"})) }),
/// };
/// assert_eq!(tool.name, "get_secret");
/// ```
pub fn tool_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(CancellationToken, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    struct FnHandler<F>(F);

    impl<F, Fut> ToolHandler for FnHandler<F>
    where
        F: Fn(CancellationToken, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        fn call<'a>(
            &'a self,
            cancel: &'a CancellationToken,
            arguments: Value,
        ) -> ToolHandlerFuture<'a> {
            Box::pin((self.0)(cancel.clone(), arguments))
        }
    }

    Arc::new(FnHandler(f))
}

/// Canonicalizes model-delivered arguments before a handler sees them.
///
/// Models deliver arguments as a native JSON object, as a string
/// containing JSON, or as nothing at all. Handlers always receive a
/// parsed value: strings holding JSON are decoded, other strings pass
/// through unchanged, and `null` becomes the empty object.
pub fn canonical_arguments(raw: &Value) -> Value {
    match raw {
        Value::Null => json!({}),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                json!({})
            } else {
                serde_json::from_str(trimmed).unwrap_or_else(|_| raw.clone())
            }
        }
        other => other.clone(),
    }
}

/// Strips the wrapper prefixes some models prepend to tool names
/// (`tool.X`, `function.X`, `functions.X`).
pub fn normalize_call_name(name: &str) -> &str {
    for prefix in ["tool.", "function.", "functions."] {
        if let Some(stripped) = name.strip_prefix(prefix) {
            return stripped;
        }
    }
    name
}

/// The assembled tool surface for one request: ordered specs for the
/// backend plus a name→handler map for the loop.
pub struct ToolSet {
    specs: Vec<ToolSpec>,
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolSet {
    /// An empty set (no tools offered to the model).
    pub fn empty() -> Self {
        Self {
            specs: Vec::new(),
            handlers: HashMap::new(),
        }
    }

    /// Merges local tools with MCP-adapted tools, locals first.
    ///
    /// Fails with [`LlmError::ToolMissingName`] on an empty name and
    /// [`LlmError::DuplicateToolName`] on a collision from any source.
    /// Missing schemas default to [`default_input_schema`].
    pub fn assemble(local: &[Tool], adapted: &[Tool]) -> Result<Self, LlmError> {
        let mut set = Self::empty();
        for tool in local.iter().chain(adapted) {
            set.push(tool)?;
        }
        Ok(set)
    }

    fn push(&mut self, tool: &Tool) -> Result<(), LlmError> {
        if tool.name.trim().is_empty() {
            return Err(LlmError::ToolMissingName);
        }
        if self.handlers.contains_key(&tool.name) {
            return Err(LlmError::DuplicateToolName(tool.name.clone()));
        }
        self.specs.push(ToolSpec {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool
                .input_schema
                .clone()
                .unwrap_or_else(default_input_schema),
        });
        self.handlers
            .insert(tool.name.clone(), Arc::clone(&tool.handler));
        Ok(())
    }

    /// Ordered handler-free specs, for the backend request.
    pub fn specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    /// Looks up the handler for a model-emitted call name, after prefix
    /// normalization.
    pub fn handler(&self, call_name: &str) -> Option<&Arc<dyn ToolHandler>> {
        self.handlers.get(normalize_call_name(call_name))
    }

    /// Number of assembled tools.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether no tools were assembled.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet")
            .field(
                "tools",
                &self.specs.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_tool(name: &str) -> Tool {
        Tool {
            name: name.into(),
            description: None,
            input_schema: None,
            handler: tool_fn(|_cancel, _args| async { Ok(json!(null)) }),
        }
    }

    #[test]
    fn test_assemble_preserves_order_locals_first() {
        let set = ToolSet::assemble(
            &[noop_tool("alpha"), noop_tool("beta")],
            &[noop_tool("gamma")],
        )
        .unwrap();
        let names: Vec<&str> = set.specs().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_assemble_rejects_duplicates_across_sources() {
        let err =
            ToolSet::assemble(&[noop_tool("lookup")], &[noop_tool("lookup")]).unwrap_err();
        assert!(matches!(err, LlmError::DuplicateToolName(name) if name == "lookup"));
    }

    #[test]
    fn test_assemble_rejects_blank_name() {
        let err = ToolSet::assemble(&[noop_tool("  ")], &[]).unwrap_err();
        assert!(matches!(err, LlmError::ToolMissingName));
    }

    #[test]
    fn test_missing_schema_defaults_to_empty_object() {
        let set = ToolSet::assemble(&[noop_tool("bare")], &[]).unwrap();
        assert_eq!(set.specs()[0].input_schema, default_input_schema());
    }

    #[test]
    fn test_declared_schema_is_kept() {
        let mut tool = noop_tool("typed");
        tool.input_schema = Some(json!({
            "type": "object",
            "properties": {"q": {"type": "string"}},
            "required": ["q"]
        }));
        let set = ToolSet::assemble(std::slice::from_ref(&tool), &[]).unwrap();
        assert_eq!(set.specs()[0].input_schema, tool.input_schema.unwrap());
    }

    #[test]
    fn test_handler_lookup_normalizes_prefixes() {
        let set = ToolSet::assemble(&[noop_tool("get_secret")], &[]).unwrap();
        for name in [
            "get_secret",
            "tool.get_secret",
            "function.get_secret",
            "functions.get_secret",
        ] {
            assert!(set.handler(name).is_some(), "{name} should resolve");
        }
        assert!(set.handler("other").is_none());
    }

    #[test]
    fn test_normalize_call_name_leaves_plain_names() {
        assert_eq!(normalize_call_name("lookup"), "lookup");
        assert_eq!(normalize_call_name("tools.lookup"), "tools.lookup");
    }

    #[test]
    fn test_canonical_arguments_parses_json_strings() {
        let raw = Value::String(r#"{"patient": "42"}"#.into());
        assert_eq!(canonical_arguments(&raw), json!({"patient": "42"}));
    }

    #[test]
    fn test_canonical_arguments_null_and_blank_become_empty_object() {
        assert_eq!(canonical_arguments(&Value::Null), json!({}));
        assert_eq!(canonical_arguments(&Value::String("  ".into())), json!({}));
    }

    #[test]
    fn test_canonical_arguments_passes_objects_through() {
        let raw = json!({"a": 1});
        assert_eq!(canonical_arguments(&raw), raw);
    }

    #[test]
    fn test_canonical_arguments_keeps_non_json_strings() {
        let raw = Value::String("plain words".into());
        assert_eq!(canonical_arguments(&raw), raw);
    }

    #[tokio::test]
    async fn test_tool_fn_handler_executes() {
        let handler = tool_fn(|_cancel, args| async move {
            let name = args["name"].as_str().unwrap_or("world").to_string();
            Ok(json!({"greeting": format!("hello {name}")}))
        });
        let out = handler
            .call(&CancellationToken::new(), json!({"name": "rust"}))
            .await
            .unwrap();
        assert_eq!(out, json!({"greeting": "hello rust"}));
    }

    #[tokio::test]
    async fn test_tool_fn_handler_error() {
        let handler = tool_fn(|_cancel, _args| async { Err(ToolError::new("backend down")) });
        let err = handler
            .call(&CancellationToken::new(), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.message, "backend down");
    }
}
