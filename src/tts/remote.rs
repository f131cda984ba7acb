//! OpenAI-compatible HTTP speech backend.

use crate::config::RemoteSpeechConfig;
use crate::tts::error::SynthesisError;
use crate::tts::scratch::PayloadStore;
use crate::tts::synthesizer::Synthesizer;
use crate::tts::types::{AudioPayload, TextChunk};
use serde::Serialize;
use std::time::Duration;

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

/// Calls `POST {base_url}/audio/speech` and returns WAV audio.
pub struct RemoteSynthesizer {
    client: reqwest::blocking::Client,
    config: RemoteSpeechConfig,
    api_key: Option<String>,
    store: PayloadStore,
}

impl RemoteSynthesizer {
    /// Reads the API key from the configured environment variable.
    pub fn new(config: RemoteSpeechConfig, store: PayloadStore) -> Result<Self, SynthesisError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SynthesisError::Unavailable {
                backend: "openai".to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            config,
            api_key,
            store,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/audio/speech", self.config.base_url.trim_end_matches('/'))
    }
}

impl Synthesizer for RemoteSynthesizer {
    fn synthesize(&self, chunk: &TextChunk) -> Result<AudioPayload, SynthesisError> {
        let Some(api_key) = &self.api_key else {
            return Err(SynthesisError::Unavailable {
                backend: self.name().to_string(),
                reason: format!("{} is not set", self.config.api_key_env),
            });
        };
        let backend_err = |message: String| SynthesisError::Backend {
            backend: "openai".to_string(),
            message,
        };

        let request = SpeechRequest {
            model: &self.config.model,
            input: &chunk.text,
            voice: &self.config.voice,
            response_format: "wav",
        };
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .map_err(|e| backend_err(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(backend_err(format!("HTTP {status}: {}", body.trim())));
        }
        let bytes = response
            .bytes()
            .map_err(|e| backend_err(format!("failed to read audio: {e}")))?;
        if bytes.is_empty() {
            return Err(SynthesisError::EmptyAudio {
                backend: self.name().to_string(),
            });
        }
        Ok(self.store.store(bytes.to_vec(), "wav")?)
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let config = RemoteSpeechConfig {
            base_url: "http://localhost:8000/v1/".to_string(),
            api_key_env: "VOXLINE_TEST_UNSET_KEY".to_string(),
            ..Default::default()
        };
        let synth = RemoteSynthesizer::new(config, PayloadStore::Memory).unwrap();
        assert_eq!(synth.endpoint(), "http://localhost:8000/v1/audio/speech");
    }

    #[test]
    fn test_missing_key_is_unavailable() {
        let config = RemoteSpeechConfig {
            api_key_env: "VOXLINE_TEST_UNSET_KEY".to_string(),
            ..Default::default()
        };
        let synth = RemoteSynthesizer::new(config, PayloadStore::Memory).unwrap();
        assert!(!synth.is_available());
        let err = synth.synthesize(&TextChunk::new(0, "hi")).unwrap_err();
        assert!(matches!(err, SynthesisError::Unavailable { .. }));
    }
}
