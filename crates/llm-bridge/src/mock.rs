//! Mock backend for testing.
//!
//! [`MockBackend`] is a queue-based fake: tests control exactly which
//! [`ChatTurn`]s (or errors) each round receives, without touching the
//! network. Every submitted [`ChatRequest`] is recorded for later
//! assertion. When the queue runs dry the optional default turn is
//! served, which makes "the model always calls a tool" scenarios a
//! one-liner.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::chat::{
    BackendInfo, ChatBackend, ChatRequest, ChatTurn, OutputItem, TokenUsage, ToolCallRecord,
};
use crate::error::LlmError;

/// Cloneable error subset for mock queuing.
///
/// [`LlmError`] holds a boxed source in some variants and is not
/// `Clone`, so queues store this mirror instead; it converts at dequeue
/// time.
#[derive(Debug, Clone)]
pub enum MockError {
    /// Maps to [`LlmError::ProviderCallFailed`].
    Provider {
        /// HTTP status, if any.
        status: Option<http::StatusCode>,
        /// Error message.
        message: String,
    },
    /// Maps to [`LlmError::Cancelled`].
    Cancelled,
}

impl MockError {
    fn into_llm_error(self) -> LlmError {
        match self {
            Self::Provider { status, message } => LlmError::ProviderCallFailed { status, message },
            Self::Cancelled => LlmError::Cancelled,
        }
    }
}

/// A queue-based mock chat backend.
///
/// # Panics
///
/// `submit` panics when the queue is empty and no default turn is set —
/// a test bug, not a runtime condition.
pub struct MockBackend {
    turns: Mutex<VecDeque<Result<ChatTurn, MockError>>>,
    default_turn: Mutex<Option<ChatTurn>>,
    requests: Mutex<Vec<ChatRequest>>,
    info: BackendInfo,
}

impl MockBackend {
    /// A mock with the stock identity (`mock` / `mock-model`) and
    /// schema-constrained output enabled.
    pub fn new() -> Self {
        Self::with_info(BackendInfo {
            provider: "mock".into(),
            default_model: "mock-model".into(),
            schema_constrained_output: true,
        })
    }

    /// A mock with a custom identity.
    pub fn with_info(info: BackendInfo) -> Self {
        Self {
            turns: Mutex::new(VecDeque::new()),
            default_turn: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            info,
        }
    }

    /// Enqueues a turn for the next `submit`.
    pub fn queue_turn(&self, turn: ChatTurn) -> &Self {
        self.turns.lock().unwrap().push_back(Ok(turn));
        self
    }

    /// Enqueues an error for the next `submit`.
    pub fn queue_error(&self, error: MockError) -> &Self {
        self.turns.lock().unwrap().push_back(Err(error));
        self
    }

    /// Serve `turn` whenever the queue is empty.
    pub fn set_default_turn(&self, turn: ChatTurn) -> &Self {
        *self.default_turn.lock().unwrap() = Some(turn);
        self
    }

    /// Every request submitted so far, in order.
    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of `submit` calls so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend")
            .field("queued", &self.turns.lock().unwrap().len())
            .field("recorded", &self.requests.lock().unwrap().len())
            .finish()
    }
}

impl ChatBackend for MockBackend {
    fn submit<'a>(
        &'a self,
        request: &'a ChatRequest,
        _cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<ChatTurn, LlmError>> + Send + 'a>> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.turns.lock().unwrap().pop_front();
        let result = match next {
            Some(Ok(turn)) => Ok(turn),
            Some(Err(e)) => Err(e.into_llm_error()),
            None => match self.default_turn.lock().unwrap().clone() {
                Some(turn) => Ok(turn),
                None => panic!("MockBackend queue is empty and no default turn is set"),
            },
        };
        Box::pin(async move { result })
    }

    fn info(&self) -> BackendInfo {
        self.info.clone()
    }
}

/// A turn holding one assistant message and nominal usage.
pub fn text_turn(text: &str) -> ChatTurn {
    ChatTurn {
        items: vec![OutputItem::Message {
            text: text.into(),
            raw: None,
        }],
        usage: usage(10, 5),
        response_id: Some("resp_mock".into()),
        response_status: Some("completed".into()),
    }
}

/// A turn holding one tool call and nominal usage.
pub fn tool_call_turn(call_id: &str, name: &str, arguments: Value) -> ChatTurn {
    ChatTurn {
        items: vec![OutputItem::ToolCall(ToolCallRecord {
            call_id: call_id.into(),
            name: name.into(),
            arguments,
            raw: None,
        })],
        usage: usage(10, 5),
        response_id: Some("resp_mock".into()),
        response_status: Some("completed".into()),
    }
}

/// Usage with the given input/output counts and a consistent total.
pub fn usage(input: u64, output: u64) -> TokenUsage {
    TokenUsage {
        input_tokens: input,
        output_tokens: output,
        total_tokens: input + output,
        cached_input_tokens: 0,
        reasoning_tokens: 0,
    }
}
