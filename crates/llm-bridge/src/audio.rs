//! Audio transcription support.
//!
//! Provider adapters implement [`AudioTranscriptionGenerator`]; this
//! module owns the provider-independent pieces: option snapshotting,
//! keyword normalization, transcription-prompt assembly, and MIME
//! resolution. The prompt rule: a caller-supplied prompt is used
//! verbatim (no keyword hints appended); otherwise the default
//! instruction gets a single `Common missed words: <json>` line when
//! any keywords survive normalization.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{GenerateFailure, LlmError};
use crate::generator::Generation;
use crate::options::GenerationConfig;

/// A domain term the transcriber tends to miss.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AudioKeyword {
    /// The canonical spelling.
    #[serde(rename = "Word")]
    pub word: String,
    /// Frequent mis-transcriptions of the word.
    #[serde(rename = "CommonMistypes")]
    pub common_mistypes: Vec<String>,
    /// What the word means, as a disambiguation hint.
    #[serde(rename = "Definition")]
    pub definition: String,
}

/// Options for one transcription generator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioOptions {
    /// Drop unsupported options instead of failing.
    pub ignore_invalid_options: bool,
    /// Provider endpoint override.
    pub endpoint_url: Option<String>,
    /// Provider auth token override.
    pub auth_token: Option<String>,
    /// Explicit model name override.
    pub model: Option<String>,
    /// Overrides the provider's prompt behavior entirely. When set,
    /// keyword hints are not appended.
    pub prompt: Option<String>,
    /// Domain terms that may be missed in transcription.
    pub keywords: Vec<AudioKeyword>,
}

impl AudioOptions {
    /// Derives the generation config the provider client is built from.
    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            ignore_invalid_options: self.ignore_invalid_options,
            endpoint_url: self.endpoint_url.clone(),
            auth_token: self.auth_token.clone(),
            model: self
                .model
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string),
            ..GenerationConfig::default()
        }
    }
}

/// "Audio file in, transcript out."
pub trait AudioTranscriptionGenerator: Send + Sync {
    /// Transcribes the generator's source file.
    fn generate<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<Generation<String>, GenerateFailure>> + Send + 'a>>;
}

/// The instruction used when the caller supplied no prompt.
pub const DEFAULT_TRANSCRIPTION_INSTRUCTION: &str =
    "Transcribe this audio accurately. Return only the transcript text.";

/// Trims keyword fields, drops blank mistypes, and drops entries whose
/// word, definition, and mistypes are all empty.
pub fn normalize_keywords(keywords: &[AudioKeyword]) -> Vec<AudioKeyword> {
    let mut normalized = Vec::with_capacity(keywords.len());
    for keyword in keywords {
        let word = keyword.word.trim().to_string();
        let definition = keyword.definition.trim().to_string();
        let common_mistypes: Vec<String> = keyword
            .common_mistypes
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect();

        if word.is_empty() && definition.is_empty() && common_mistypes.is_empty() {
            continue;
        }
        normalized.push(AudioKeyword {
            word,
            common_mistypes,
            definition,
        });
    }
    normalized
}

/// The `Common missed words: <json-array>` hint line, or `None` when no
/// keywords survive normalization.
pub fn keyword_hint_line(keywords: &[AudioKeyword]) -> Option<String> {
    let normalized = normalize_keywords(keywords);
    if normalized.is_empty() {
        return None;
    }
    let rendered = serde_json::to_string(&normalized).ok()?;
    Some(format!("Common missed words: {rendered}"))
}

/// Assembles the prompt sent to the transcription provider.
pub fn build_transcription_prompt(options: &AudioOptions) -> String {
    if let Some(prompt) = options.prompt.as_deref() {
        let custom = prompt.trim();
        if !custom.is_empty() {
            return custom.to_string();
        }
    }

    match keyword_hint_line(&options.keywords) {
        Some(hint) => format!("{DEFAULT_TRANSCRIPTION_INSTRUCTION}\n{hint}"),
        None => DEFAULT_TRANSCRIPTION_INSTRUCTION.to_string(),
    }
}

/// Resolves the MIME type for an audio file.
///
/// The explicit extension map is consulted first; anything else falls
/// back to a system MIME lookup whose result must be an `audio/*` type.
pub fn resolve_audio_mime(path: &str) -> Result<String, LlmError> {
    if path.trim().is_empty() {
        return Err(LlmError::InvalidArgument("file path is required".into()));
    }

    let extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let known = match extension.as_str() {
        "wav" => Some("audio/wav"),
        "mp3" => Some("audio/mpeg"),
        "m4a" => Some("audio/mp4"),
        "mp4" => Some("audio/mp4"),
        "webm" => Some("audio/webm"),
        "ogg" => Some("audio/ogg"),
        "flac" => Some("audio/flac"),
        "aac" => Some("audio/aac"),
        _ => None,
    };
    if let Some(mime) = known {
        return Ok(mime.to_string());
    }

    let guessed = mime_guess::from_path(path).first();
    match guessed {
        Some(mime) if mime.type_() == mime_guess::mime::AUDIO => Ok(mime.essence_str().to_string()),
        _ => Err(LlmError::AudioUnsupportedMediaType(path.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyword(word: &str, mistypes: &[&str], definition: &str) -> AudioKeyword {
        AudioKeyword {
            word: word.into(),
            common_mistypes: mistypes.iter().map(|m| (*m).to_string()).collect(),
            definition: definition.into(),
        }
    }

    #[test]
    fn test_normalize_trims_and_drops_empty_entries() {
        let keywords = vec![
            keyword(" losartan ", ["losarton", "  "].as_slice(), " an ARB "),
            keyword("   ", &[], ""),
        ];
        let normalized = normalize_keywords(&keywords);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].word, "losartan");
        assert_eq!(normalized[0].common_mistypes, vec!["losarton"]);
        assert_eq!(normalized[0].definition, "an ARB");
    }

    #[test]
    fn test_keyword_hint_line_json_shape() {
        let keywords = vec![keyword("losartan", &["losarton"], "an ARB")];
        let hint = keyword_hint_line(&keywords).unwrap();
        assert!(hint.starts_with("Common missed words: "));
        let payload = hint.strip_prefix("Common missed words: ").unwrap();
        let parsed: Vec<AudioKeyword> = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed[0].word, "losartan");
    }

    #[test]
    fn test_keyword_hint_serializes_pascal_case_fields() {
        let hint = keyword_hint_line(&[keyword("w", &["m"], "d")]).unwrap();
        assert!(hint.contains("\"Word\""));
        assert!(hint.contains("\"CommonMistypes\""));
        assert!(hint.contains("\"Definition\""));
    }

    #[test]
    fn test_prompt_custom_wins_and_suppresses_keywords() {
        let options = AudioOptions {
            prompt: Some("Just write it down.".into()),
            keywords: vec![keyword("losartan", &[], "")],
            ..Default::default()
        };
        assert_eq!(build_transcription_prompt(&options), "Just write it down.");
    }

    #[test]
    fn test_prompt_default_with_keywords() {
        let options = AudioOptions {
            keywords: vec![keyword("losartan", &[], "")],
            ..Default::default()
        };
        let prompt = build_transcription_prompt(&options);
        assert!(prompt.starts_with(DEFAULT_TRANSCRIPTION_INSTRUCTION));
        assert!(prompt.contains("Common missed words:"));
    }

    #[test]
    fn test_prompt_blank_keyword_and_no_custom_prompt() {
        let options = AudioOptions {
            keywords: vec![keyword("  ", &[""], "")],
            ..Default::default()
        };
        assert_eq!(
            build_transcription_prompt(&options),
            DEFAULT_TRANSCRIPTION_INSTRUCTION
        );
    }

    #[test]
    fn test_prompt_blank_custom_falls_back() {
        let options = AudioOptions {
            prompt: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(
            build_transcription_prompt(&options),
            DEFAULT_TRANSCRIPTION_INSTRUCTION
        );
    }

    #[test]
    fn test_resolve_mime_known_extensions() {
        assert_eq!(resolve_audio_mime("note.wav").unwrap(), "audio/wav");
        assert_eq!(resolve_audio_mime("note.MP3").unwrap(), "audio/mpeg");
        assert_eq!(resolve_audio_mime("visit.m4a").unwrap(), "audio/mp4");
        assert_eq!(resolve_audio_mime("clip.ogg").unwrap(), "audio/ogg");
        assert_eq!(resolve_audio_mime("clip.flac").unwrap(), "audio/flac");
    }

    #[test]
    fn test_resolve_mime_rejects_non_audio() {
        let err = resolve_audio_mime("notes.txt").unwrap_err();
        assert!(matches!(err, LlmError::AudioUnsupportedMediaType(_)));
    }

    #[test]
    fn test_resolve_mime_rejects_blank_path() {
        let err = resolve_audio_mime("  ").unwrap_err();
        assert!(matches!(err, LlmError::InvalidArgument(_)));
    }

    #[test]
    fn test_generation_config_from_options() {
        let options = AudioOptions {
            endpoint_url: Some("https://example.test".into()),
            auth_token: Some("tok".into()),
            model: Some("  whisper-large  ".into()),
            ..Default::default()
        };
        let config = options.generation_config();
        assert_eq!(config.endpoint_url.as_deref(), Some("https://example.test"));
        assert_eq!(config.model.as_deref(), Some("whisper-large"));
        assert!(config.tools.is_empty());
    }

    #[test]
    fn test_generation_config_blank_model_dropped() {
        let options = AudioOptions {
            model: Some("   ".into()),
            ..Default::default()
        };
        assert!(options.generation_config().model.is_none());
    }
}
