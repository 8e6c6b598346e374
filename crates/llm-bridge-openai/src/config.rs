//! Adapter configuration and credential discovery.

use std::time::Duration;

use llm_bridge::{AudioOptions, GenerationConfig};

/// The default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// Model used for text generation when none is configured.
pub const DEFAULT_GENERATION_MODEL: &str = "gpt-5-mini";
/// Model used for embeddings when none is configured.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
/// Model used for audio transcription when none is configured.
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Configuration for the OpenAI-style adapter.
#[derive(Clone)]
pub struct OpenAiConfig {
    /// API key. When empty, requests will be rejected by the server;
    /// use [`OpenAiConfig::from_generation_config`] to fall back to the
    /// environment.
    pub api_key: String,
    /// API base URL.
    pub base_url: String,
    /// Explicit model override.
    pub model: Option<String>,
    /// Per-request timeout applied to the shared client.
    pub timeout: Option<Duration>,
    /// Reuse an existing client for connection pooling.
    pub client: Option<reqwest::Client>,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: None,
            timeout: None,
            client: None,
        }
    }
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("has_api_key", &!self.api_key.is_empty())
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl OpenAiConfig {
    /// Builds adapter configuration from a resolved option snapshot.
    ///
    /// The caller's `auth_token` and `endpoint_url` win; otherwise the
    /// key comes from `OPEN_API_TOKEN` / `OPENAI_API_KEY` and the URL
    /// from [`DEFAULT_BASE_URL`].
    pub fn from_generation_config(config: &GenerationConfig) -> Self {
        Self {
            api_key: config
                .auth_token
                .clone()
                .unwrap_or_else(api_key_from_env),
            base_url: config
                .endpoint_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: config.model.clone(),
            ..Self::default()
        }
    }

    /// Builds adapter configuration from audio options.
    pub fn from_audio_options(options: &AudioOptions) -> Self {
        Self::from_generation_config(&options.generation_config())
    }
}

/// Credential discovery: `OPEN_API_TOKEN` first, then `OPENAI_API_KEY`.
pub fn api_key_from_env() -> String {
    std::env::var("OPEN_API_TOKEN")
        .or_else(|_| std::env::var("OPENAI_API_KEY"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_bridge::{resolve_options, with_auth_token, with_endpoint_url, with_model};

    #[test]
    fn test_default_config() {
        let config = OpenAiConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!(config.api_key.is_empty());
        assert!(config.model.is_none());
    }

    #[test]
    fn test_from_generation_config_overrides() {
        let resolved = resolve_options(&[
            with_auth_token("sk-test"),
            with_endpoint_url("https://proxy.example/v1"),
            with_model("gpt-4.1"),
        ]);
        let config = OpenAiConfig::from_generation_config(&resolved);
        assert_eq!(config.api_key, "sk-test");
        assert_eq!(config.base_url, "https://proxy.example/v1");
        assert_eq!(config.model.as_deref(), Some("gpt-4.1"));
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = OpenAiConfig {
            api_key: "sk-secret".into(),
            ..Default::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("has_api_key: true"));
    }
}
