//! # llm-bridge
//!
//! Provider-agnostic client core for Large Language Model backends.
//!
//! One surface, three capabilities — generative text (plain or
//! schema-constrained), vector embeddings, and audio transcription —
//! with the shape of each provider's HTTP API hidden behind a small
//! neutral vocabulary. This crate contains **zero** provider-specific
//! code; concrete backends live in sibling crates and implement
//! [`ChatBackend`] (plus the embedding and audio traits).
//!
//! The four load-bearing subsystems:
//!
//! 1. The **stateless orchestration loop** ([`flow`]): every round
//!    resubmits the full conversation, executes model-initiated tool
//!    calls, and feeds their outputs back — no provider-side session
//!    state, bounded at twelve rounds.
//! 2. The **MCP tool adapter** ([`mcp`]): a streamable-HTTP client that
//!    turns a remote MCP server's catalog into ordinary local tools, so
//!    providers without native MCP support gain it transparently.
//! 3. The **prompt-context model** ([`context`]): static entries plus
//!    dynamic providers, composed in a fixed order ahead of the primary
//!    prompt.
//! 4. The **option and metadata contract** ([`options`], [`metadata`]):
//!    per-model-family option compatibility and a stable, bit-exact
//!    metadata key vocabulary across providers.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────────────┐  ┌────────────────────┐
//!  │  llm-bridge-openai │  │   (other adapters) │
//!  └─────────┬──────────┘  └─────────┬──────────┘
//!            │                       │
//!            └───────────┬───────────┘
//!                        ▼
//!              ┌──────────────────────┐
//!              │      llm-bridge      │  ← you are here
//!              │ (loop, MCP, context, │
//!              │  options, metadata)  │
//!              └──────────────────────┘
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use llm_bridge::{resolve_options, with_max_tokens, TextGenerator};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(backend: impl llm_bridge::ChatBackend + 'static) -> Result<(), Box<dyn std::error::Error>> {
//! let config = resolve_options(&[with_max_tokens(512)]);
//! let generator = TextGenerator::new(backend, "Explain ownership in Rust", config)?;
//! let generation = generator.generate(&CancellationToken::new()).await?;
//! println!("{} ({})", generation.value, generation.metadata["latency_ms"]);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`audio`] | Transcription options, keyword hints, MIME resolution |
//! | [`chat`] | Neutral conversation shapes and the [`ChatBackend`] trait |
//! | [`context`] | Prompt-context store and dynamic providers |
//! | [`embedding`] | Embedding traits, validation, shape normalization |
//! | [`error`] | Unified [`LlmError`] and [`GenerateFailure`] |
//! | [`flow`] | The stateless tool-call orchestration loop |
//! | [`generator`] | [`TextGenerator`] / [`StructuredGenerator`] engines |
//! | [`mcp`] | MCP tool adapter and streamable-HTTP transport |
//! | [`metadata`] | Metadata keys and usage aggregation |
//! | [`options`] | Option mutators, resolution, model-family normalizer |
//! | [`structured`] | Schema derivation, fence stripping, parsing |

#![warn(missing_docs)]

pub mod audio;
pub mod chat;
pub mod context;
pub mod embedding;
pub mod error;
pub mod flow;
pub mod generator;
pub mod mcp;
pub mod metadata;
pub mod options;
pub mod structured;
pub mod tool;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use audio::{
    build_transcription_prompt, AudioKeyword, AudioOptions, AudioTranscriptionGenerator,
    DEFAULT_TRANSCRIPTION_INSTRUCTION,
};
pub use chat::{
    BackendInfo, ChatBackend, ChatRequest, ChatTurn, ContextRole, HistoryItem, OutputItem,
    TokenUsage, ToolCallRecord, ToolSpec,
};
pub use context::{
    context_provider_fn, PromptContext, PromptContextProvider, PromptContextStore,
};
pub use embedding::{EmbeddingGenerator, EmbeddingVector};
pub use error::{GenerateFailure, LlmError};
pub use flow::{run_chat_flow, MAX_TOOL_ROUNDS};
pub use generator::{ContentGenerator, Generation, TextGenerator};
pub use mcp::{McpToolAdapter, McpToolDescriptor};
pub use metadata::{GenerationMetadata, UsageTotals};
pub use options::{
    is_reasoning_model, normalize_for_model, resolve_options, with_auth_token,
    with_embedding_dimensions, with_endpoint_url, with_ignore_invalid_options, with_max_tokens,
    with_mcp_tools, with_model, with_reasoning_level, with_temperature, with_tools,
    GenerationConfig, GeneratorOption, ReasoningLevel, DEFAULT_REASONING_PREFIXES,
};
pub use tool::{tool_fn, Tool, ToolError, ToolHandler, ToolSet};

#[cfg(feature = "schema")]
pub use generator::StructuredGenerator;

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockBackend, MockError};
