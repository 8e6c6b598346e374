//! # llm-bridge-openai
//!
//! OpenAI Responses-style backend for [`llm-bridge`](llm_bridge): text
//! generation (plain and structured), embeddings, and audio
//! transcription.
//!
//! The factory functions below mirror the core's conceptual surface —
//! construct a generator with a prompt (or file path) and options, then
//! call `generate` with a cancellation token. Credentials come from the
//! `auth_token` option when present, else from `OPEN_API_TOKEN` /
//! `OPENAI_API_KEY`.
//!
//! ```rust,no_run
//! use llm_bridge_openai::new_string_generator;
//! use llm_bridge::{with_max_tokens, with_model};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let generator = new_string_generator(
//!     "Summarize the visit note.",
//!     &[with_model("gpt-5-mini"), with_max_tokens(512)],
//! )?;
//! let generation = generator.generate(&CancellationToken::new()).await?;
//! println!("{}", generation.value);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod audio;
mod backend;
mod config;
mod convert;
mod embeddings;
mod types;

pub use audio::OpenAiAudioGenerator;
pub use backend::OpenAiBackend;
pub use config::{
    api_key_from_env, OpenAiConfig, DEFAULT_BASE_URL, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_GENERATION_MODEL, DEFAULT_TRANSCRIPTION_MODEL,
};
pub use embeddings::OpenAiEmbeddingGenerator;

use llm_bridge::{
    resolve_options, AudioOptions, GeneratorOption, LlmError, TextGenerator,
};

#[cfg(feature = "schema")]
use llm_bridge::StructuredGenerator;

/// Creates a plain-text generator for `prompt`.
pub fn new_string_generator(
    prompt: impl Into<String>,
    options: &[GeneratorOption],
) -> Result<TextGenerator<OpenAiBackend>, LlmError> {
    let config = resolve_options(options);
    let backend = OpenAiBackend::new(OpenAiConfig::from_generation_config(&config));
    TextGenerator::new(backend, prompt, config)
}

/// Creates a generator whose output is parsed into `T`.
#[cfg(feature = "schema")]
pub fn new_structured_generator<T>(
    prompt: impl Into<String>,
    options: &[GeneratorOption],
) -> Result<StructuredGenerator<T, OpenAiBackend>, LlmError>
where
    T: serde::de::DeserializeOwned + schemars::JsonSchema + Send + Sync,
{
    let config = resolve_options(options);
    let backend = OpenAiBackend::new(OpenAiConfig::from_generation_config(&config));
    StructuredGenerator::new(backend, prompt, config)
}

/// Creates an embedding generator.
pub fn new_embedding_generator(
    options: &[GeneratorOption],
) -> Result<OpenAiEmbeddingGenerator, LlmError> {
    Ok(OpenAiEmbeddingGenerator::new(resolve_options(options)))
}

/// Creates an audio transcription generator for `file_path`.
pub fn new_audio_generator(
    file_path: impl Into<String>,
    options: AudioOptions,
) -> Result<OpenAiAudioGenerator, LlmError> {
    OpenAiAudioGenerator::new(file_path, options)
}
