//! Wire types for the Responses, Embeddings, and Transcriptions APIs.
//!
//! Response output items are kept as raw [`Value`]s: anything the core
//! does not interpret (reasoning items, annotations) must survive
//! byte-for-byte so it can be echoed back in the stateless history.

use serde::Deserialize;
use serde_json::Value;

/// A Responses API response.
#[derive(Debug, Deserialize)]
pub struct ResponsesApiResponse {
    /// Response identifier.
    #[serde(default)]
    pub id: Option<String>,
    /// Response status (`completed`, `incomplete`, …).
    #[serde(default)]
    pub status: Option<String>,
    /// Output items, verbatim.
    #[serde(default)]
    pub output: Vec<Value>,
    /// Usage accounting.
    #[serde(default)]
    pub usage: ResponsesUsage,
}

/// Usage block of a Responses API response.
#[derive(Debug, Default, Deserialize)]
pub struct ResponsesUsage {
    /// Prompt tokens.
    #[serde(default)]
    pub input_tokens: u64,
    /// Completion tokens.
    #[serde(default)]
    pub output_tokens: u64,
    /// Total tokens.
    #[serde(default)]
    pub total_tokens: u64,
    /// Cached-input detail.
    #[serde(default)]
    pub input_tokens_details: InputTokensDetails,
    /// Reasoning detail.
    #[serde(default)]
    pub output_tokens_details: OutputTokensDetails,
}

/// Input-token details.
#[derive(Debug, Default, Deserialize)]
pub struct InputTokensDetails {
    /// Tokens served from the prompt cache.
    #[serde(default)]
    pub cached_tokens: u64,
}

/// Output-token details.
#[derive(Debug, Default, Deserialize)]
pub struct OutputTokensDetails {
    /// Tokens spent on reasoning.
    #[serde(default)]
    pub reasoning_tokens: u64,
}

/// An Embeddings API response.
#[derive(Debug, Deserialize)]
pub struct EmbeddingsApiResponse {
    /// One row per input.
    #[serde(default)]
    pub data: Vec<EmbeddingRow>,
    /// The model that produced the vectors.
    #[serde(default)]
    pub model: Option<String>,
    /// Usage accounting.
    #[serde(default)]
    pub usage: EmbeddingsUsage,
}

/// One embedding row.
#[derive(Debug, Deserialize)]
pub struct EmbeddingRow {
    /// Input index this vector answers.
    pub index: usize,
    /// The vector.
    pub embedding: Vec<f64>,
}

/// Usage block of an embeddings response.
#[derive(Debug, Default, Deserialize)]
pub struct EmbeddingsUsage {
    /// Prompt tokens.
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Total tokens.
    #[serde(default)]
    pub total_tokens: u64,
}

/// A Transcriptions API response (`response_format: json`).
#[derive(Debug, Deserialize)]
pub struct TranscriptionApiResponse {
    /// The transcript.
    #[serde(default)]
    pub text: String,
    /// Usage accounting, when the model reports it.
    #[serde(default)]
    pub usage: Option<TranscriptionUsage>,
}

/// Usage block of a transcription response.
#[derive(Debug, Default, Deserialize)]
pub struct TranscriptionUsage {
    /// Prompt tokens.
    #[serde(default)]
    pub input_tokens: u64,
    /// Completion tokens.
    #[serde(default)]
    pub output_tokens: u64,
    /// Total tokens.
    #[serde(default)]
    pub total_tokens: u64,
}
