//! Embeddings over the Embeddings API.

use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

use llm_bridge::embedding::{
    apply_embedding_metadata, collect_indexed_rows, validate_embedding_dimensions,
    validate_embedding_inputs, EmbeddingGenerator, EmbeddingVector,
};
use llm_bridge::metadata::{
    init_metadata, set_latency_metadata, METADATA_KEY_INPUT_TOKENS, METADATA_KEY_MODEL,
    METADATA_KEY_OUTPUT_TOKENS, METADATA_KEY_TOTAL_TOKENS,
};
use llm_bridge::{GenerateFailure, Generation, GenerationConfig, GenerationMetadata, LlmError};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::backend::ApiClient;
use crate::config::{OpenAiConfig, DEFAULT_EMBEDDING_MODEL};

/// [`EmbeddingGenerator`] over the Embeddings API.
pub struct OpenAiEmbeddingGenerator {
    api: ApiClient,
    config: GenerationConfig,
}

impl OpenAiEmbeddingGenerator {
    /// Builds a generator from a resolved option snapshot.
    pub fn new(config: GenerationConfig) -> Self {
        Self {
            api: ApiClient::new(OpenAiConfig::from_generation_config(&config)),
            config,
        }
    }

    fn model(&self) -> &str {
        self.config.resolved_model(DEFAULT_EMBEDDING_MODEL)
    }

    async fn batch_inner(
        &self,
        cancel: &CancellationToken,
        inputs: &[String],
        meta: &mut GenerationMetadata,
    ) -> Result<Vec<EmbeddingVector>, LlmError> {
        validate_embedding_inputs(inputs)?;
        validate_embedding_dimensions(self.config.embedding_dimensions)?;

        info!(
            inputs = inputs.len(),
            model = self.model(),
            dimensions = self.config.embedding_dimensions,
            "embedding request"
        );

        let mut body = Map::new();
        body.insert("model".into(), json!(self.model()));
        body.insert("input".into(), json!(inputs));
        if let Some(dimensions) = self.config.embedding_dimensions {
            body.insert("dimensions".into(), json!(dimensions));
        }

        let response = self
            .api
            .post_json("/embeddings", &Value::Object(body), cancel)
            .await?;
        let parsed: crate::types::EmbeddingsApiResponse = serde_json::from_value(response)
            .map_err(|e| LlmError::ProviderCallFailed {
                status: None,
                message: format!("unexpected embeddings payload: {e}"),
            })?;

        if parsed.data.is_empty() {
            return Err(LlmError::EmbeddingResponseEmpty);
        }
        let rows = parsed
            .data
            .into_iter()
            .map(|row| (row.index, row.embedding))
            .collect();
        let vectors = collect_indexed_rows(rows, inputs.len())?;

        if let Some(model) = parsed.model.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            meta.insert(METADATA_KEY_MODEL.into(), model.to_string());
        }
        meta.insert(
            METADATA_KEY_INPUT_TOKENS.into(),
            parsed.usage.prompt_tokens.to_string(),
        );
        meta.insert(
            METADATA_KEY_TOTAL_TOKENS.into(),
            parsed.usage.total_tokens.to_string(),
        );
        meta.insert(METADATA_KEY_OUTPUT_TOKENS.into(), "0".into());
        apply_embedding_metadata(meta, &vectors);

        Ok(vectors)
    }

    /// Embeds a batch of inputs, one vector per input.
    pub async fn generate_batch(
        &self,
        cancel: &CancellationToken,
        inputs: &[String],
    ) -> Result<Generation<Vec<EmbeddingVector>>, GenerateFailure> {
        let start = Instant::now();
        let mut meta = init_metadata("openai", self.model());

        let result = self.batch_inner(cancel, inputs, &mut meta).await;
        set_latency_metadata(&mut meta, start);
        match result {
            Ok(vectors) => Ok(Generation {
                value: vectors,
                metadata: meta,
            }),
            Err(error) => Err(GenerateFailure::new(error, meta)),
        }
    }

    /// Embeds one input: the single-element case of
    /// [`generate_batch`](Self::generate_batch).
    pub async fn generate(
        &self,
        cancel: &CancellationToken,
        input: &str,
    ) -> Result<Generation<EmbeddingVector>, GenerateFailure> {
        let inputs = [input.to_string()];
        let batch = self.generate_batch(cancel, &inputs).await?;
        let Generation { mut value, metadata } = batch;
        match (value.len(), value.pop()) {
            (1, Some(vector)) => Ok(Generation {
                value: vector,
                metadata,
            }),
            (count, _) => Err(GenerateFailure::new(
                LlmError::EmbeddingShapeMismatch {
                    expected: 1,
                    actual: count,
                },
                metadata,
            )),
        }
    }
}

impl std::fmt::Debug for OpenAiEmbeddingGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbeddingGenerator")
            .field("model", &self.model())
            .finish_non_exhaustive()
    }
}

impl EmbeddingGenerator for OpenAiEmbeddingGenerator {
    fn generate<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        input: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Generation<EmbeddingVector>, GenerateFailure>> + Send + 'a>>
    {
        Box::pin(self.generate(cancel, input))
    }

    fn generate_batch<'a>(
        &'a self,
        cancel: &'a CancellationToken,
        inputs: &'a [String],
    ) -> Pin<
        Box<
            dyn Future<Output = Result<Generation<Vec<EmbeddingVector>>, GenerateFailure>>
                + Send
                + 'a,
        >,
    > {
        Box::pin(self.generate_batch(cancel, inputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_bridge::{resolve_options, with_embedding_dimensions, with_model};

    #[test]
    fn test_model_defaults() {
        let generator = OpenAiEmbeddingGenerator::new(GenerationConfig::default());
        assert_eq!(generator.model(), DEFAULT_EMBEDDING_MODEL);
    }

    #[test]
    fn test_model_override() {
        let config = resolve_options(&[with_model("text-embedding-3-large")]);
        let generator = OpenAiEmbeddingGenerator::new(config);
        assert_eq!(generator.model(), "text-embedding-3-large");
    }

    #[tokio::test]
    async fn test_empty_batch_rejected_before_any_call() {
        let generator = OpenAiEmbeddingGenerator::new(GenerationConfig::default());
        let failure = generator
            .generate_batch(&CancellationToken::new(), &[])
            .await
            .unwrap_err();
        assert!(matches!(failure.error, LlmError::InvalidArgument(_)));
        assert_eq!(failure.metadata["provider"], "openai");
        assert!(failure.metadata.contains_key("latency_ms"));
    }

    #[tokio::test]
    async fn test_zero_dimensions_rejected() {
        let config = resolve_options(&[with_embedding_dimensions(0)]);
        let generator = OpenAiEmbeddingGenerator::new(config);
        let failure = generator
            .generate_batch(&CancellationToken::new(), &["hello".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(failure.error, LlmError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_blank_input_rejected() {
        let generator = OpenAiEmbeddingGenerator::new(GenerationConfig::default());
        let failure = generator
            .generate(&CancellationToken::new(), "   ")
            .await
            .unwrap_err();
        assert!(matches!(failure.error, LlmError::InvalidArgument(_)));
    }
}
