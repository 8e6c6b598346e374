//! Generation metadata keys and usage aggregation.
//!
//! Every operation returns a flat string→string metadata map with a
//! stable key vocabulary, identical across providers. Keys are written
//! with the constants below; values are plain decimal strings (no
//! separators). `provider`, `model`, and `latency_ms` are always
//! present; the remaining keys appear when applicable.

use std::collections::HashMap;
use std::time::Instant;

use crate::chat::{ChatTurn, TokenUsage};

/// Metadata map returned alongside every generation result.
pub type GenerationMetadata = HashMap<String, String>;

/// Provider name.
pub const METADATA_KEY_PROVIDER: &str = "provider";
/// Model name.
pub const METADATA_KEY_MODEL: &str = "model";
/// Wall-clock latency of the whole operation, in milliseconds.
pub const METADATA_KEY_LATENCY_MS: &str = "latency_ms";
/// Prompt tokens, summed across rounds.
pub const METADATA_KEY_INPUT_TOKENS: &str = "input_tokens";
/// Completion tokens, summed across rounds.
pub const METADATA_KEY_OUTPUT_TOKENS: &str = "output_tokens";
/// Total tokens, summed across rounds.
pub const METADATA_KEY_TOTAL_TOKENS: &str = "total_tokens";
/// Cached prompt tokens, summed across rounds.
pub const METADATA_KEY_CACHED_INPUT_TOKENS: &str = "cached_input_tokens";
/// Reasoning tokens, summed across rounds.
pub const METADATA_KEY_REASONING_TOKENS: &str = "reasoning_tokens";
/// Number of provider calls the operation made.
pub const METADATA_KEY_API_CALLS: &str = "api_calls";
/// Number of tool rounds the orchestration loop ran.
pub const METADATA_KEY_TOOL_ROUNDS: &str = "tool_rounds";
/// Provider response identifier of the final response.
pub const METADATA_KEY_RESPONSE_ID: &str = "response_id";
/// Provider response status of the final response.
pub const METADATA_KEY_RESPONSE_STATUS: &str = "response_status";
/// Number of embedding vectors returned.
pub const METADATA_KEY_EMBEDDING_COUNT: &str = "embedding_count";
/// Dimensionality of the returned embedding vectors.
pub const METADATA_KEY_EMBEDDING_DIMS: &str = "embedding_dims";

/// Seeds a metadata map with `provider` and `model`.
///
/// A blank model name is recorded as `"unknown"` rather than omitted,
/// so the required keys are always present.
pub fn init_metadata(provider: &str, model: &str) -> GenerationMetadata {
    let model = model.trim();
    let mut meta = GenerationMetadata::new();
    meta.insert(METADATA_KEY_PROVIDER.into(), provider.to_string());
    meta.insert(
        METADATA_KEY_MODEL.into(),
        if model.is_empty() { "unknown" } else { model }.to_string(),
    );
    meta
}

/// Stamps `latency_ms` from `start` to now. Called on every exit path,
/// success or failure.
pub fn set_latency_metadata(meta: &mut GenerationMetadata, start: Instant) {
    meta.insert(
        METADATA_KEY_LATENCY_MS.into(),
        start.elapsed().as_millis().to_string(),
    );
}

/// Rolling totals accumulated across the rounds of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsageTotals {
    /// Provider calls made so far.
    pub api_calls: u32,
    /// Tool rounds completed so far.
    pub tool_rounds: u32,
    /// Summed prompt tokens.
    pub input_tokens: u64,
    /// Summed completion tokens.
    pub output_tokens: u64,
    /// Summed total tokens.
    pub total_tokens: u64,
    /// Summed cached prompt tokens.
    pub cached_input_tokens: u64,
    /// Summed reasoning tokens.
    pub reasoning_tokens: u64,
}

impl UsageTotals {
    /// Folds one call's usage into the totals and counts the call.
    pub fn record(&mut self, usage: &TokenUsage) {
        self.api_calls = self.api_calls.saturating_add(1);
        self.input_tokens = self.input_tokens.saturating_add(usage.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(usage.output_tokens);
        self.total_tokens = self.total_tokens.saturating_add(usage.total_tokens);
        self.cached_input_tokens = self
            .cached_input_tokens
            .saturating_add(usage.cached_input_tokens);
        self.reasoning_tokens = self
            .reasoning_tokens
            .saturating_add(usage.reasoning_tokens);
    }

    /// Writes the totals into `meta` under the canonical keys.
    pub fn apply(&self, meta: &mut GenerationMetadata) {
        meta.insert(METADATA_KEY_API_CALLS.into(), self.api_calls.to_string());
        meta.insert(METADATA_KEY_TOOL_ROUNDS.into(), self.tool_rounds.to_string());
        meta.insert(
            METADATA_KEY_INPUT_TOKENS.into(),
            self.input_tokens.to_string(),
        );
        meta.insert(
            METADATA_KEY_OUTPUT_TOKENS.into(),
            self.output_tokens.to_string(),
        );
        meta.insert(
            METADATA_KEY_TOTAL_TOKENS.into(),
            self.total_tokens.to_string(),
        );
        meta.insert(
            METADATA_KEY_CACHED_INPUT_TOKENS.into(),
            self.cached_input_tokens.to_string(),
        );
        meta.insert(
            METADATA_KEY_REASONING_TOKENS.into(),
            self.reasoning_tokens.to_string(),
        );
    }
}

/// Writes the final turn's identifiers (`response_id`,
/// `response_status`) when the provider reported them.
pub fn apply_turn_metadata(meta: &mut GenerationMetadata, turn: &ChatTurn) {
    if let Some(id) = turn.response_id.as_deref() {
        if !id.is_empty() {
            meta.insert(METADATA_KEY_RESPONSE_ID.into(), id.to_string());
        }
    }
    if let Some(status) = turn.response_status.as_deref() {
        if !status.is_empty() {
            meta.insert(METADATA_KEY_RESPONSE_STATUS.into(), status.to_string());
        }
    }
}
