//! Audio transcription over the Transcriptions API.

use std::future::Future;
use std::pin::Pin;
use std::path::Path;
use std::time::Instant;

use llm_bridge::audio::{build_transcription_prompt, resolve_audio_mime, AudioOptions};
use llm_bridge::metadata::{
    init_metadata, set_latency_metadata, METADATA_KEY_INPUT_TOKENS, METADATA_KEY_OUTPUT_TOKENS,
    METADATA_KEY_TOTAL_TOKENS,
};
use llm_bridge::{
    AudioTranscriptionGenerator, GenerateFailure, Generation, GenerationMetadata, LlmError,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::backend::ApiClient;
use crate::config::{OpenAiConfig, DEFAULT_TRANSCRIPTION_MODEL};

/// [`AudioTranscriptionGenerator`] over the Transcriptions API.
pub struct OpenAiAudioGenerator {
    api: ApiClient,
    file_path: String,
    options: AudioOptions,
}

impl OpenAiAudioGenerator {
    /// Builds a generator for one source file.
    ///
    /// The options are snapshotted here; later caller mutation does not
    /// affect this generator.
    pub fn new(file_path: impl Into<String>, options: AudioOptions) -> Result<Self, LlmError> {
        let file_path = file_path.into();
        if file_path.trim().is_empty() {
            return Err(LlmError::InvalidArgument("file path is required".into()));
        }
        Ok(Self {
            api: ApiClient::new(OpenAiConfig::from_audio_options(&options)),
            file_path,
            options,
        })
    }

    fn model(&self) -> &str {
        self.options
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_TRANSCRIPTION_MODEL)
    }

    async fn transcribe_inner(
        &self,
        cancel: &CancellationToken,
        meta: &mut GenerationMetadata,
    ) -> Result<String, LlmError> {
        let mime = resolve_audio_mime(&self.file_path)?;
        let bytes = tokio::fs::read(&self.file_path)
            .await
            .map_err(|_| LlmError::AudioFileMissing(self.file_path.clone()))?;

        info!(model = self.model(), mime = %mime, "audio transcription request");

        let file_name = Path::new(&self.file_path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("audio")
            .to_string();
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(&mime)
            .map_err(|_| LlmError::AudioUnsupportedMediaType(self.file_path.clone()))?;

        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model().to_string())
            .text("response_format", "json");
        let prompt = build_transcription_prompt(&self.options);
        if !prompt.is_empty() {
            form = form.text("prompt", prompt);
        }

        let response = self
            .api
            .post_multipart("/audio/transcriptions", form, cancel)
            .await?;
        let parsed: crate::types::TranscriptionApiResponse = serde_json::from_value(response)
            .map_err(|e| LlmError::ProviderCallFailed {
                status: None,
                message: format!("unexpected transcription payload: {e}"),
            })?;

        if let Some(usage) = parsed.usage {
            meta.insert(
                METADATA_KEY_INPUT_TOKENS.into(),
                usage.input_tokens.to_string(),
            );
            meta.insert(
                METADATA_KEY_OUTPUT_TOKENS.into(),
                usage.output_tokens.to_string(),
            );
            meta.insert(
                METADATA_KEY_TOTAL_TOKENS.into(),
                usage.total_tokens.to_string(),
            );
        }

        let transcript = parsed.text.trim().to_string();
        if transcript.is_empty() {
            return Err(LlmError::AudioResponseEmpty);
        }
        Ok(transcript)
    }

    /// Transcribes the source file.
    pub async fn generate(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Generation<String>, GenerateFailure> {
        let start = Instant::now();
        let mut meta = init_metadata("openai", self.model());

        let result = self.transcribe_inner(cancel, &mut meta).await;
        set_latency_metadata(&mut meta, start);
        match result {
            Ok(transcript) => Ok(Generation {
                value: transcript,
                metadata: meta,
            }),
            Err(error) => Err(GenerateFailure::new(error, meta)),
        }
    }
}

impl std::fmt::Debug for OpenAiAudioGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAudioGenerator")
            .field("file_path", &self.file_path)
            .field("model", &self.model())
            .finish_non_exhaustive()
    }
}

impl AudioTranscriptionGenerator for OpenAiAudioGenerator {
    fn generate<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<Generation<String>, GenerateFailure>> + Send + 'a>>
    {
        Box::pin(self.generate(cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_bridge::AudioKeyword;

    #[test]
    fn test_blank_path_rejected() {
        let err = OpenAiAudioGenerator::new("   ", AudioOptions::default()).unwrap_err();
        assert!(matches!(err, LlmError::InvalidArgument(_)));
    }

    #[test]
    fn test_model_defaults_and_override() {
        let generator =
            OpenAiAudioGenerator::new("visit.wav", AudioOptions::default()).unwrap();
        assert_eq!(generator.model(), DEFAULT_TRANSCRIPTION_MODEL);

        let generator = OpenAiAudioGenerator::new(
            "visit.wav",
            AudioOptions {
                model: Some("gpt-4o-transcribe".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(generator.model(), "gpt-4o-transcribe");
    }

    #[test]
    fn test_options_snapshot_isolated_from_caller() {
        let mut options = AudioOptions {
            keywords: vec![AudioKeyword {
                word: "losartan".into(),
                common_mistypes: vec![],
                definition: String::new(),
            }],
            ..Default::default()
        };
        let generator = OpenAiAudioGenerator::new("visit.wav", options.clone()).unwrap();
        options.keywords.clear();
        assert_eq!(generator.options.keywords.len(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_extension_fails_before_io() {
        let generator =
            OpenAiAudioGenerator::new("notes.txt", AudioOptions::default()).unwrap();
        let failure = generator.generate(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            failure.error,
            LlmError::AudioUnsupportedMediaType(_)
        ));
        assert!(failure.metadata.contains_key("latency_ms"));
    }

    #[tokio::test]
    async fn test_missing_file_fails() {
        let generator = OpenAiAudioGenerator::new(
            "/nonexistent/visit.wav",
            AudioOptions::default(),
        )
        .unwrap();
        let failure = generator.generate(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(failure.error, LlmError::AudioFileMissing(_)));
    }
}
