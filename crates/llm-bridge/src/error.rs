//! Unified error type for all generation operations.
//!
//! Every backend maps its native failures into [`LlmError`], giving
//! callers a single type to match against regardless of which provider
//! is in use. Variants follow the library's failure taxonomy: invalid
//! input, option incompatibility, tool assembly, MCP lifecycle, provider
//! calls, structured output, embeddings, audio, and cancellation.
//!
//! Generation entry points return [`GenerateFailure`], which pairs the
//! error with whatever metadata had accumulated before the failure
//! (latency, api-call counts, token totals). The orchestration loop
//! never converts an error into process termination.

use std::collections::HashMap;

/// The unified error type returned by all core and adapter operations.
///
/// Variants are `#[non_exhaustive]` — new kinds may be added in minor
/// releases without breaking downstream matches (always include a
/// wildcard arm).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LlmError {
    /// A caller-supplied input was unusable (empty prompt, empty file
    /// path, blank embedding input, non-positive dimensions).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An option was rejected by the model-family normalizer while
    /// strict mode was in effect.
    #[error("option {option:?} is not supported by model {model:?}")]
    IncompatibleOption {
        /// The offending option name (e.g. `"temperature"`).
        option: String,
        /// The model the option was checked against.
        model: String,
    },

    /// Two tools (local or MCP-adapted) share the same name.
    #[error("duplicate tool name {0:?}")]
    DuplicateToolName(String),

    /// A tool was declared with an empty name.
    #[error("tool name is required")]
    ToolMissingName,

    /// The model called a tool no handler was registered for.
    #[error("no tool handler configured for {name:?}")]
    ToolMissingHandler {
        /// The tool name the model asked for (after prefix
        /// normalization).
        name: String,
    },

    /// A registered prompt-context provider returned an error.
    #[error("prompt context provider failed: {source}")]
    ContextProviderFailed {
        /// The provider's own error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The MCP handshake (transport open or `initialize`) failed.
    #[error("MCP connect to {url} failed: {message}")]
    McpConnectFailed {
        /// The MCP server URL.
        url: String,
        /// A human-readable description of the failure.
        message: String,
    },

    /// The MCP `tools/list` call failed on an established connection.
    #[error("MCP tools/list against {url} failed: {message}")]
    McpListToolsFailed {
        /// The MCP server URL.
        url: String,
        /// A human-readable description of the failure.
        message: String,
    },

    /// The underlying provider HTTP call failed.
    ///
    /// `status` is `None` when the request never received a response
    /// (connection reset, DNS failure, timeout).
    #[error("provider call failed (status={status:?}): {message}")]
    ProviderCallFailed {
        /// The HTTP status code, if one was received.
        status: Option<http::StatusCode>,
        /// A description preserving the provider's error text.
        message: String,
    },

    /// The provider completed normally but produced no assistant text.
    #[error("response output is empty")]
    ResponseEmpty,

    /// The final-round output could not be parsed as the requested type,
    /// even after the single repair round.
    #[error("structured output parse failed: {message}")]
    StructuredOutputParseFailed {
        /// What went wrong during parsing or validation.
        message: String,
        /// The raw text that failed to parse, for diagnostics.
        raw: String,
    },

    /// The tool loop performed `limit` rounds without the model
    /// producing a final answer.
    #[error("exceeded tool call loop limit ({limit})")]
    ToolLoopLimitExceeded {
        /// The configured round limit.
        limit: usize,
    },

    /// The embedding response vector count did not match the input count.
    #[error("embedding response size mismatch: expected {expected}, got {actual}")]
    EmbeddingShapeMismatch {
        /// Number of inputs submitted.
        expected: usize,
        /// Number of vectors received.
        actual: usize,
    },

    /// The embedding response carried no vectors at all.
    #[error("embedding response has no data")]
    EmbeddingResponseEmpty,

    /// The audio file path could not be opened.
    #[error("audio file missing or unreadable: {0}")]
    AudioFileMissing(String),

    /// The audio file's media type could not be resolved to `audio/*`.
    #[error("unsupported audio media type for {0:?}")]
    AudioUnsupportedMediaType(String),

    /// The transcription completed but the transcript was blank.
    #[error("transcription response is empty")]
    AudioResponseEmpty,

    /// The request-scoped cancellation token was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl LlmError {
    /// Returns `true` if this error was caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` if the rendered error message contains `needle`.
    ///
    /// Walks the `source()` chain, so a match anywhere in the wrapped
    /// stack counts.
    pub fn contains_message(&self, needle: &str) -> bool {
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(self);
        while let Some(err) = current {
            if err.to_string().contains(needle) {
                return true;
            }
            current = err.source();
        }
        false
    }
}

/// A failed generation: the error plus best-effort metadata.
///
/// `Generate` always aggregates metadata as it goes (provider, model,
/// latency, api-call and token totals). When the operation fails, that
/// partial map is returned here alongside the error so callers can still
/// account for the work performed.
#[derive(Debug)]
pub struct GenerateFailure {
    /// What went wrong.
    pub error: LlmError,
    /// Metadata accumulated up to the point of failure.
    pub metadata: HashMap<String, String>,
}

impl GenerateFailure {
    /// Pairs an error with the metadata gathered so far.
    pub fn new(error: LlmError, metadata: HashMap<String, String>) -> Self {
        Self { error, metadata }
    }
}

impl std::fmt::Display for GenerateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for GenerateFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<GenerateFailure> for LlmError {
    fn from(failure: GenerateFailure) -> Self {
        failure.error
    }
}
