//! Generator options and the model-family option normalizer.
//!
//! Callers configure a generator with an ordered list of
//! [`GeneratorOption`] mutators — a closed universe, so unrecognized
//! options are impossible by construction. [`resolve_options`] folds
//! them into an immutable [`GenerationConfig`] snapshot; resolution is
//! pure, so resolving the same list twice yields an equal config.
//!
//! Before a request is built, [`normalize_for_model`] enforces
//! per-family compatibility: reasoning-capable models reject
//! `temperature`, sampling-capable models reject `reasoning_level`.
//! With [`with_ignore_invalid_options`] the offending knob is dropped
//! (with a warning) instead.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::LlmError;
use crate::mcp::McpToolDescriptor;
use crate::tool::Tool;

/// Reasoning effort for models that support it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningLevel {
    /// No extended reasoning.
    None,
    /// Minimal reasoning budget.
    Low,
    /// Balanced reasoning budget.
    Medium,
    /// Maximum reasoning budget.
    High,
}

impl ReasoningLevel {
    /// The wire spelling (`none`, `low`, `medium`, `high`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// The resolved, immutable snapshot of caller-supplied options.
///
/// Copied by value into each generator — later caller changes never
/// affect in-flight operations.
#[derive(Clone, Default)]
pub struct GenerationConfig {
    /// Drop unsupported options instead of failing.
    pub ignore_invalid_options: bool,
    /// Provider endpoint / base-URL override.
    pub endpoint_url: Option<String>,
    /// Provider auth token override.
    pub auth_token: Option<String>,
    /// Sampling temperature (sampling-capable models only).
    pub temperature: Option<f64>,
    /// Output token ceiling.
    pub max_tokens: Option<u32>,
    /// Embedding vector size, where the provider supports it.
    pub embedding_dimensions: Option<u32>,
    /// Explicit model name override.
    pub model: Option<String>,
    /// Reasoning effort (reasoning-capable models only).
    pub reasoning_level: Option<ReasoningLevel>,
    /// Local tool declarations, in registration order.
    pub tools: Vec<Tool>,
    /// Remote MCP servers to bridge during generation, in order.
    pub mcp_tools: Vec<McpToolDescriptor>,
}

impl GenerationConfig {
    /// The model name to use, falling back to `default_model` when the
    /// caller left the model unset or blank.
    pub fn resolved_model<'a>(&'a self, default_model: &'a str) -> &'a str {
        match self.model.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => default_model,
        }
    }
}

impl std::fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("ignore_invalid_options", &self.ignore_invalid_options)
            .field("endpoint_url", &self.endpoint_url)
            .field("has_auth_token", &self.auth_token.is_some())
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("embedding_dimensions", &self.embedding_dimensions)
            .field("model", &self.model)
            .field("reasoning_level", &self.reasoning_level)
            .field(
                "tools",
                &self.tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            )
            .field("mcp_tools", &self.mcp_tools)
            .finish()
    }
}

impl PartialEq for GenerationConfig {
    /// Structural equality over every observable field. Tools compare by
    /// name, description, and schema (handlers are behind `Arc` and
    /// carry no usable identity).
    fn eq(&self, other: &Self) -> bool {
        self.ignore_invalid_options == other.ignore_invalid_options
            && self.endpoint_url == other.endpoint_url
            && self.auth_token == other.auth_token
            && self.temperature == other.temperature
            && self.max_tokens == other.max_tokens
            && self.embedding_dimensions == other.embedding_dimensions
            && self.model == other.model
            && self.reasoning_level == other.reasoning_level
            && self.tools == other.tools
            && self.mcp_tools == other.mcp_tools
    }
}

/// One option mutator. Build with the `with_*` constructors below.
///
/// Cloneable and reapplicable: options hold `Fn` closures, so the same
/// list can be resolved any number of times with identical results.
#[derive(Clone)]
pub struct GeneratorOption(Arc<dyn Fn(&mut GenerationConfig) + Send + Sync>);

impl GeneratorOption {
    fn new(apply: impl Fn(&mut GenerationConfig) + Send + Sync + 'static) -> Self {
        Self(Arc::new(apply))
    }

    fn apply(&self, config: &mut GenerationConfig) {
        (self.0)(config);
    }
}

impl std::fmt::Debug for GeneratorOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GeneratorOption")
    }
}

/// Folds an ordered option list into a config snapshot.
///
/// Later options win over earlier ones for the same field.
pub fn resolve_options(options: &[GeneratorOption]) -> GenerationConfig {
    let mut config = GenerationConfig::default();
    for option in options {
        option.apply(&mut config);
    }
    config
}

/// Drop unsupported options instead of failing resolution.
pub fn with_ignore_invalid_options(value: bool) -> GeneratorOption {
    GeneratorOption::new(move |cfg| cfg.ignore_invalid_options = value)
}

/// Override the provider endpoint / base URL.
pub fn with_endpoint_url(value: impl Into<String>) -> GeneratorOption {
    let value = value.into();
    GeneratorOption::new(move |cfg| cfg.endpoint_url = Some(value.clone()))
}

/// Override the provider auth token.
pub fn with_auth_token(value: impl Into<String>) -> GeneratorOption {
    let value = value.into();
    GeneratorOption::new(move |cfg| cfg.auth_token = Some(value.clone()))
}

/// Set the sampling temperature.
pub fn with_temperature(value: f64) -> GeneratorOption {
    GeneratorOption::new(move |cfg| cfg.temperature = Some(value))
}

/// Cap the number of generated tokens.
pub fn with_max_tokens(value: u32) -> GeneratorOption {
    GeneratorOption::new(move |cfg| cfg.max_tokens = Some(value))
}

/// Request a specific embedding dimensionality.
pub fn with_embedding_dimensions(value: u32) -> GeneratorOption {
    GeneratorOption::new(move |cfg| cfg.embedding_dimensions = Some(value))
}

/// Set an explicit model name.
pub fn with_model(value: impl Into<String>) -> GeneratorOption {
    let value = value.into();
    GeneratorOption::new(move |cfg| cfg.model = Some(value.clone()))
}

/// Set the reasoning effort level.
pub fn with_reasoning_level(level: ReasoningLevel) -> GeneratorOption {
    GeneratorOption::new(move |cfg| cfg.reasoning_level = Some(level))
}

/// Declare local tools for tool calling.
pub fn with_tools(tools: Vec<Tool>) -> GeneratorOption {
    GeneratorOption::new(move |cfg| cfg.tools = tools.clone())
}

/// Declare remote MCP tool servers to bridge.
pub fn with_mcp_tools(descriptors: Vec<McpToolDescriptor>) -> GeneratorOption {
    GeneratorOption::new(move |cfg| cfg.mcp_tools = descriptors.clone())
}

/// Model-name prefixes treated as reasoning-capable out of the box.
pub const DEFAULT_REASONING_PREFIXES: &[&str] = &["o1", "o3", "o4", "gpt-5"];

/// Whether `model` belongs to a reasoning-capable family.
///
/// Case-insensitive prefix match on the trimmed name. An empty name is
/// sampling-capable.
pub fn is_reasoning_model(model: &str, prefixes: &[&str]) -> bool {
    let name = model.trim().to_ascii_lowercase();
    if name.is_empty() {
        return false;
    }
    prefixes
        .iter()
        .any(|prefix| name.starts_with(&prefix.to_ascii_lowercase()))
}

/// Enforces per-family option compatibility for `model`.
///
/// Reasoning-capable models reject `temperature`; sampling-capable
/// models reject `reasoning_level`. In strict mode the first offender
/// fails with [`LlmError::IncompatibleOption`]; with
/// `ignore_invalid_options` the knob is dropped and a warning emitted.
/// All other options pass through untouched. Idempotent in lenient
/// mode: applying it twice equals applying it once.
pub fn normalize_for_model(
    model: &str,
    mut config: GenerationConfig,
    prefixes: &[&str],
) -> Result<GenerationConfig, LlmError> {
    let reasoning = is_reasoning_model(model, prefixes);

    if reasoning && config.temperature.is_some() {
        if config.ignore_invalid_options {
            warn!(model, "ignoring temperature for reasoning model");
            config.temperature = None;
        } else {
            return Err(LlmError::IncompatibleOption {
                option: "temperature".into(),
                model: model.to_string(),
            });
        }
    }

    if !reasoning && config.reasoning_level.is_some() {
        if config.ignore_invalid_options {
            warn!(model, "ignoring reasoning level for non-reasoning model");
            config.reasoning_level = None;
        } else {
            return Err(LlmError::IncompatibleOption {
                option: "reasoning_level".into(),
                model: model.to_string(),
            });
        }
    }

    Ok(config)
}
