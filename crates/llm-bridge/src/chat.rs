//! Neutral conversation shapes and the backend trait.
//!
//! The orchestration loop speaks a small provider-agnostic vocabulary:
//! role-tagged messages, tool-call records, tool-output records, and
//! opaque vendor items (e.g. encrypted reasoning state) that must be
//! echoed back verbatim in subsequent rounds. Backends translate these
//! shapes into their wire format and back.
//!
//! [`ChatBackend`] is object-safe (boxed futures) so adapters can be
//! held as `Arc<dyn ChatBackend>` where needed, while the generators in
//! [`generator`](crate::generator) stay generic for the common case.

use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::LlmError;
use crate::options::ReasoningLevel;

/// The neutral role of a conversation entry.
///
/// Backends map these into their native message kinds: `System` becomes
/// a system message / instruction / block depending on the provider
/// family, `Human` a user message, `Assistant` an assistant or model
/// message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextRole {
    /// Instructions or persona, outside the user/assistant exchange.
    System,
    /// Content presented as coming from a human (e.g. RAG material).
    Human,
    /// Chained prior assistant output.
    Assistant,
}

impl ContextRole {
    /// The canonical wire spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Human => "human",
            Self::Assistant => "assistant",
        }
    }

    /// Parses a role string; anything unrecognized is treated as
    /// [`ContextRole::Human`].
    pub fn from_wire(value: &str) -> Self {
        match value {
            "system" => Self::System,
            "assistant" => Self::Assistant,
            _ => Self::Human,
        }
    }
}

/// A model-emitted request to invoke one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Identifier echoed back on the matching tool-output record.
    pub call_id: String,
    /// The tool name as the model emitted it (may carry a `tool.` /
    /// `function.` / `functions.` prefix).
    pub name: String,
    /// Raw arguments. May be a JSON object, or a string containing JSON
    /// — [`canonical_arguments`](crate::tool::canonical_arguments)
    /// normalizes before the handler sees them.
    pub arguments: Value,
    /// The vendor's original item, echoed verbatim into the follow-up
    /// history when present.
    pub raw: Option<Value>,
}

/// One entry of the client-assembled conversation history.
///
/// History is rebuilt from scratch each round and never mutated in
/// place once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HistoryItem {
    /// A role-tagged text message.
    Message {
        /// Who the entry is attributed to.
        role: ContextRole,
        /// The message text.
        content: String,
    },
    /// An assistant-emitted tool call, replayed so follow-up rounds see
    /// the full exchange.
    ToolCall(ToolCallRecord),
    /// The output of a tool call, keyed by the call it answers.
    ToolOutput {
        /// The [`ToolCallRecord::call_id`] this output answers.
        call_id: String,
        /// Canonical JSON text of the handler's return value.
        output: String,
    },
    /// A vendor item the core does not interpret (e.g. encrypted
    /// reasoning state), preserved byte-for-byte.
    Opaque(Value),
}

/// One item of a backend's response.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputItem {
    /// Assistant text.
    Message {
        /// The assistant's text.
        text: String,
        /// The vendor's original item, when the adapter preserved it.
        raw: Option<Value>,
    },
    /// A tool call the orchestrator must execute.
    ToolCall(ToolCallRecord),
    /// A vendor item passed through without interpretation.
    Opaque(Value),
}

impl OutputItem {
    /// Converts this output item into the history entry that replays it
    /// on the next round. Items with a preserved vendor form replay
    /// that form so provider-opaque fields survive.
    pub fn to_history(&self) -> HistoryItem {
        match self {
            Self::Message {
                raw: Some(raw), ..
            } => HistoryItem::Opaque(raw.clone()),
            Self::Message { text, raw: None } => HistoryItem::Message {
                role: ContextRole::Assistant,
                content: text.clone(),
            },
            Self::ToolCall(record) => HistoryItem::ToolCall(record.clone()),
            Self::Opaque(value) => HistoryItem::Opaque(value.clone()),
        }
    }
}

/// Token counts for a single backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub input_tokens: u64,
    /// Tokens produced by the response.
    pub output_tokens: u64,
    /// Provider-reported total (input + output + any accounting extras).
    pub total_tokens: u64,
    /// Input tokens served from the provider's prompt cache.
    pub cached_input_tokens: u64,
    /// Tokens spent on chain-of-thought reasoning.
    pub reasoning_tokens: u64,
}

/// A complete backend response for one round.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatTurn {
    /// Output items in provider order.
    pub items: Vec<OutputItem>,
    /// Token usage for this call.
    pub usage: TokenUsage,
    /// Provider response identifier, when reported.
    pub response_id: Option<String>,
    /// Provider response status, when reported.
    pub response_status: Option<String>,
}

impl ChatTurn {
    /// Concatenated assistant text across all message items.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for item in &self.items {
            if let OutputItem::Message { text, .. } = item {
                out.push_str(text);
            }
        }
        out
    }

    /// The tool calls the model emitted this round, in provider order.
    pub fn tool_calls(&self) -> Vec<&ToolCallRecord> {
        self.items
            .iter()
            .filter_map(|item| match item {
                OutputItem::ToolCall(record) => Some(record),
                _ => None,
            })
            .collect()
    }
}

/// A handler-free view of one tool, as given to backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique tool name.
    pub name: String,
    /// Description shown to the model.
    pub description: Option<String>,
    /// JSON Schema (object) describing the tool input.
    pub input_schema: Value,
}

/// The provider-agnostic request one round submits.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatRequest {
    /// The full conversation so far (stateless: resent every round).
    pub items: Vec<HistoryItem>,
    /// Tools the model may call.
    pub tools: Vec<ToolSpec>,
    /// Explicit model name, when the caller set one.
    pub model: Option<String>,
    /// Sampling temperature (sampling-capable models only).
    pub temperature: Option<f64>,
    /// Output token ceiling.
    pub max_tokens: Option<u32>,
    /// Reasoning effort (reasoning-capable models only).
    pub reasoning_level: Option<ReasoningLevel>,
    /// Schema for response-format-constrained decoding, when the
    /// backend supports it.
    pub response_schema: Option<Value>,
    /// Ask the provider to return reasoning state in a replayable form,
    /// so multi-round reasoning stays coherent without server-side
    /// conversation ids.
    pub include_reasoning_state: bool,
}

/// Static facts about a backend instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendInfo {
    /// Provider name for the `provider` metadata key.
    pub provider: Cow<'static, str>,
    /// Model used when the config leaves the model unset.
    pub default_model: Cow<'static, str>,
    /// Whether the backend can constrain decoding to a response-format
    /// schema. When `false` (or when tools are in play) the schema is
    /// delivered as a prompt instruction instead.
    pub schema_constrained_output: bool,
}

/// The trait every chat backend implements.
///
/// Object-safe: returns boxed futures so adapters can be erased behind
/// `dyn ChatBackend`. One call submits one full request (history, tools,
/// knobs) and yields one [`ChatTurn`]; the orchestration loop owns all
/// iteration.
///
/// Implementations must observe `cancel` on their outbound I/O and
/// return [`LlmError::Cancelled`] once it fires.
pub trait ChatBackend: Send + Sync {
    /// Submits one round and returns the provider's response.
    fn submit<'a>(
        &'a self,
        request: &'a ChatRequest,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<ChatTurn, LlmError>> + Send + 'a>>;

    /// Static facts about this backend.
    fn info(&self) -> BackendInfo;
}

impl<'b, B: ChatBackend + ?Sized> ChatBackend for &'b B {
    fn submit<'a>(
        &'a self,
        request: &'a ChatRequest,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<ChatTurn, LlmError>> + Send + 'a>> {
        (**self).submit(request, cancel)
    }

    fn info(&self) -> BackendInfo {
        (**self).info()
    }
}

impl<B: ChatBackend + ?Sized> ChatBackend for std::sync::Arc<B> {
    fn submit<'a>(
        &'a self,
        request: &'a ChatRequest,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<ChatTurn, LlmError>> + Send + 'a>> {
        (**self).submit(request, cancel)
    }

    fn info(&self) -> BackendInfo {
        (**self).info()
    }
}
