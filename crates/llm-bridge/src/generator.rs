//! Content generators: the caller-facing engines.
//!
//! A generator is constructed once with a prompt and a resolved config
//! snapshot, carries its own prompt-context store, and on each
//! `generate` composes inputs, bridges MCP servers, assembles tools,
//! and drives the orchestration loop. Adapters instantiate
//! [`TextGenerator`] / [`StructuredGenerator`] with their concrete
//! backend; callers hold them through the object-safe
//! [`ContentGenerator`] trait when they need provider erasure.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::chat::{ChatBackend, ChatRequest, ChatTurn, ContextRole, HistoryItem};
use crate::context::{assemble_input_items, PromptContextProvider, PromptContextStore};
use crate::error::{GenerateFailure, LlmError};
use crate::flow::run_chat_flow;
use crate::mcp::McpToolAdapter;
use crate::metadata::{
    apply_turn_metadata, init_metadata, set_latency_metadata, GenerationMetadata, UsageTotals,
};
use crate::options::{
    is_reasoning_model, normalize_for_model, GenerationConfig, DEFAULT_REASONING_PREFIXES,
};
use crate::tool::{Tool, ToolSet};

/// A successful generation: the value plus its metadata map.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation<T> {
    /// The generated value.
    pub value: T,
    /// Aggregated metadata (`provider`, `model`, `latency_ms`, token
    /// totals, …).
    pub metadata: GenerationMetadata,
}

/// Object-safe generator surface.
///
/// Concrete generators come from provider adapters; the core never
/// constructs one around a real backend itself.
pub trait ContentGenerator<T>: Send + Sync {
    /// Runs one generation under the request-scoped token.
    fn generate<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<Generation<T>, GenerateFailure>> + Send + 'a>>;

    /// Appends one static prompt-context entry.
    fn add_prompt_context(&self, role: ContextRole, content: &str);

    /// Registers a dynamic prompt-context provider.
    fn add_prompt_context_provider(&self, provider: Arc<dyn PromptContextProvider>);
}

/// Shared engine state: backend, prompt, config snapshot, context.
#[derive(Debug)]
struct FlowEngine<B> {
    backend: B,
    prompt: String,
    config: GenerationConfig,
    context: PromptContextStore,
    reasoning_prefixes: Vec<String>,
}

impl<B: ChatBackend> FlowEngine<B> {
    fn new(backend: B, prompt: String, config: GenerationConfig) -> Result<Self, LlmError> {
        if prompt.trim().is_empty() {
            return Err(LlmError::InvalidArgument("prompt is required".into()));
        }
        Ok(Self {
            backend,
            prompt,
            config,
            context: PromptContextStore::new(),
            reasoning_prefixes: DEFAULT_REASONING_PREFIXES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        })
    }

    fn prefix_slices(&self) -> Vec<&str> {
        self.reasoning_prefixes.iter().map(String::as_str).collect()
    }

    /// Composes inputs, bridges MCP, assembles tools, and runs the
    /// loop. Adapters opened here are disconnected on every exit path.
    async fn run_flow(
        &self,
        model: &str,
        schema: Option<&Value>,
        cancel: &CancellationToken,
        totals: &mut UsageTotals,
    ) -> Result<(String, ChatTurn), LlmError> {
        let contexts = self.context.compose(cancel).await?;

        let prefixes = self.prefix_slices();
        let config = normalize_for_model(model, self.config.clone(), &prefixes)?;
        let reasoning = is_reasoning_model(model, &prefixes);

        info!(
            model,
            context_count = contexts.len(),
            tools = config.tools.len(),
            mcp_tools = config.mcp_tools.len(),
            structured = schema.is_some(),
            "starting generation"
        );

        let mut items = assemble_input_items(&self.prompt, &contexts);

        // Schema delivery: native response-format when the backend can
        // constrain decoding and no tools are in play, prompt-appended
        // instruction otherwise.
        let mut response_schema = None;
        if let Some(schema) = schema {
            let native = self.backend.info().schema_constrained_output
                && config.tools.is_empty()
                && config.mcp_tools.is_empty();
            if native {
                response_schema = Some(schema.clone());
            } else {
                let instruction = crate::structured::schema_instruction(schema);
                let prompt_index = items.len() - 1;
                items.insert(
                    prompt_index,
                    HistoryItem::Message {
                        role: ContextRole::System,
                        content: instruction,
                    },
                );
            }
        }

        let mut adapters: Vec<Arc<McpToolAdapter>> = Vec::new();
        for descriptor in &config.mcp_tools {
            match McpToolAdapter::connect(descriptor, cancel).await {
                Ok(adapter) => adapters.push(adapter),
                Err(e) => {
                    disconnect_all(&adapters).await;
                    return Err(e);
                }
            }
        }

        let adapted: Vec<Tool> = adapters.iter().flat_map(McpToolAdapter::as_tools).collect();
        let tools = match ToolSet::assemble(&config.tools, &adapted) {
            Ok(tools) => tools,
            Err(e) => {
                disconnect_all(&adapters).await;
                return Err(e);
            }
        };

        let request = ChatRequest {
            items,
            tools: tools.specs().to_vec(),
            model: Some(model.to_string()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            reasoning_level: config.reasoning_level,
            response_schema,
            include_reasoning_state: reasoning,
        };

        let result = run_chat_flow(&self.backend, &request, &tools, cancel, totals).await;
        disconnect_all(&adapters).await;

        let turn = result?;
        let text = turn.text();
        if text.trim().is_empty() {
            return Err(LlmError::ResponseEmpty);
        }
        Ok((text, turn))
    }
}

async fn disconnect_all(adapters: &[Arc<McpToolAdapter>]) {
    for adapter in adapters {
        adapter.disconnect().await;
    }
}

/// Stamps totals and latency, then wraps the result for the caller.
fn seal<T>(
    result: Result<T, LlmError>,
    mut meta: GenerationMetadata,
    totals: &UsageTotals,
    start: Instant,
) -> Result<Generation<T>, GenerateFailure> {
    totals.apply(&mut meta);
    set_latency_metadata(&mut meta, start);
    match result {
        Ok(value) => Ok(Generation {
            value,
            metadata: meta,
        }),
        Err(error) => Err(GenerateFailure::new(error, meta)),
    }
}

// ── Text generation ─────────────────────────────────────────────────

/// Generates plain text through the orchestration loop.
#[derive(Debug)]
pub struct TextGenerator<B> {
    engine: FlowEngine<B>,
}

impl<B: ChatBackend> TextGenerator<B> {
    /// Builds a generator. Fails with [`LlmError::InvalidArgument`] on a
    /// blank prompt.
    pub fn new(
        backend: B,
        prompt: impl Into<String>,
        config: GenerationConfig,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            engine: FlowEngine::new(backend, prompt.into(), config)?,
        })
    }

    /// Replaces the reasoning-model prefix heuristic.
    #[must_use]
    pub fn with_reasoning_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.engine.reasoning_prefixes = prefixes;
        self
    }

    /// Appends one static prompt-context entry.
    pub fn add_prompt_context(&self, role: ContextRole, content: impl Into<String>) {
        self.engine.context.add(role, content);
    }

    /// Registers a dynamic prompt-context provider.
    pub fn add_prompt_context_provider(&self, provider: Arc<dyn PromptContextProvider>) {
        self.engine.context.add_provider(provider);
    }

    /// Runs one generation.
    pub async fn generate(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Generation<String>, GenerateFailure> {
        let start = Instant::now();
        let info = self.engine.backend.info();
        let model = self
            .engine
            .config
            .resolved_model(&info.default_model)
            .to_string();
        let mut meta = init_metadata(&info.provider, &model);
        let mut totals = UsageTotals::default();

        let result = self
            .engine
            .run_flow(&model, None, cancel, &mut totals)
            .await
            .map(|(text, turn)| {
                apply_turn_metadata(&mut meta, &turn);
                text
            });
        seal(result, meta, &totals, start)
    }
}

impl<B: ChatBackend + 'static> ContentGenerator<String> for TextGenerator<B> {
    fn generate<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<Generation<String>, GenerateFailure>> + Send + 'a>>
    {
        Box::pin(self.generate(cancel))
    }

    fn add_prompt_context(&self, role: ContextRole, content: &str) {
        self.engine.context.add(role, content);
    }

    fn add_prompt_context_provider(&self, provider: Arc<dyn PromptContextProvider>) {
        self.engine.context.add_provider(provider);
    }
}

// ── Structured generation ───────────────────────────────────────────

/// Generates a typed value constrained by the JSON Schema of `T`.
///
/// The schema is derived (and frozen) at construction. After the loop
/// finishes, the final text is fence-stripped and parsed; one repair
/// round is attempted on parse failure, then the operation fails with
/// [`LlmError::StructuredOutputParseFailed`].
#[cfg(feature = "schema")]
pub struct StructuredGenerator<T, B> {
    engine: FlowEngine<B>,
    schema: Value,
    _marker: std::marker::PhantomData<fn() -> T>,
}

#[cfg(feature = "schema")]
impl<T, B> StructuredGenerator<T, B>
where
    T: serde::de::DeserializeOwned + schemars::JsonSchema + Send + Sync,
    B: ChatBackend,
{
    /// Builds a generator, deriving the strict schema for `T`.
    pub fn new(
        backend: B,
        prompt: impl Into<String>,
        config: GenerationConfig,
    ) -> Result<Self, LlmError> {
        let schema = crate::structured::schema_for::<T>()?;
        Ok(Self {
            engine: FlowEngine::new(backend, prompt.into(), config)?,
            schema,
            _marker: std::marker::PhantomData,
        })
    }

    /// Replaces the reasoning-model prefix heuristic.
    #[must_use]
    pub fn with_reasoning_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.engine.reasoning_prefixes = prefixes;
        self
    }

    /// The frozen schema this generator constrains output to.
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Appends one static prompt-context entry.
    pub fn add_prompt_context(&self, role: ContextRole, content: impl Into<String>) {
        self.engine.context.add(role, content);
    }

    /// Registers a dynamic prompt-context provider.
    pub fn add_prompt_context_provider(&self, provider: Arc<dyn PromptContextProvider>) {
        self.engine.context.add_provider(provider);
    }

    /// Runs one generation and parses the result as `T`.
    pub async fn generate(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Generation<T>, GenerateFailure> {
        let start = Instant::now();
        let info = self.engine.backend.info();
        let model = self
            .engine
            .config
            .resolved_model(&info.default_model)
            .to_string();
        let mut meta = init_metadata(&info.provider, &model);
        let mut totals = UsageTotals::default();

        let result = self
            .generate_inner(&model, cancel, &mut totals, &mut meta)
            .await;
        seal(result, meta, &totals, start)
    }

    async fn generate_inner(
        &self,
        model: &str,
        cancel: &CancellationToken,
        totals: &mut UsageTotals,
        meta: &mut GenerationMetadata,
    ) -> Result<T, LlmError> {
        let (text, turn) = self
            .engine
            .run_flow(model, Some(&self.schema), cancel, totals)
            .await?;
        apply_turn_metadata(meta, &turn);

        let text = match self.parse_and_validate(&text) {
            Ok(value) => return Ok(value),
            Err(first_error) => {
                tracing::debug!(error = %first_error, "structured parse failed, attempting repair round");
                self.repair_round(model, &text, cancel, totals, meta).await?
            }
        };
        self.parse_and_validate(&text)
    }

    /// One fresh minimal request asking the model to reformat its prior
    /// output. Single-shot — never recursive.
    async fn repair_round(
        &self,
        model: &str,
        prior_output: &str,
        cancel: &CancellationToken,
        totals: &mut UsageTotals,
        meta: &mut GenerationMetadata,
    ) -> Result<String, LlmError> {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }

        let prompt = format!(
            "The following output was supposed to be JSON matching the schema \
             below, but it does not parse. Reformat it so it is valid JSON \
             matching the schema. Output only the JSON.\n\nSchema:\n{}\n\n\
             Output to repair:\n{}",
            self.schema, prior_output
        );
        let request = ChatRequest {
            items: vec![HistoryItem::Message {
                role: ContextRole::Human,
                content: prompt,
            }],
            model: Some(model.to_string()),
            max_tokens: self.engine.config.max_tokens,
            response_schema: self
                .engine
                .backend
                .info()
                .schema_constrained_output
                .then(|| self.schema.clone()),
            ..Default::default()
        };

        let turn = self.engine.backend.submit(&request, cancel).await?;
        totals.record(&turn.usage);
        apply_turn_metadata(meta, &turn);
        Ok(turn.text())
    }

    fn parse_and_validate(&self, text: &str) -> Result<T, LlmError> {
        let cleaned = crate::structured::strip_fences(text);
        let value: Value =
            serde_json::from_str(cleaned).map_err(|e| LlmError::StructuredOutputParseFailed {
                message: e.to_string(),
                raw: text.to_string(),
            })?;
        crate::structured::validate_against_schema(&self.schema, &value)?;
        serde_json::from_value(value).map_err(|e| LlmError::StructuredOutputParseFailed {
            message: e.to_string(),
            raw: text.to_string(),
        })
    }
}

#[cfg(feature = "schema")]
impl<T, B> ContentGenerator<T> for StructuredGenerator<T, B>
where
    T: serde::de::DeserializeOwned + schemars::JsonSchema + Send + Sync + 'static,
    B: ChatBackend + 'static,
{
    fn generate<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<Generation<T>, GenerateFailure>> + Send + 'a>> {
        Box::pin(self.generate(cancel))
    }

    fn add_prompt_context(&self, role: ContextRole, content: &str) {
        self.engine.context.add(role, content);
    }

    fn add_prompt_context_provider(&self, provider: Arc<dyn PromptContextProvider>) {
        self.engine.context.add_provider(provider);
    }
}
