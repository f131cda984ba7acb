//! Local Ollama chat backend.

use crate::config::OllamaConfig;
use crate::error::{Result, VoxlineError};
use crate::reply::{DEFAULT_SYSTEM_PROMPT, Reply, ReplyError, Responder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ChatResponseMessage>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Calls `POST {base_url}/api/chat` without streaming.
pub struct OllamaResponder {
    client: reqwest::blocking::Client,
    config: OllamaConfig,
    name: String,
}

impl OllamaResponder {
    pub fn new(config: OllamaConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VoxlineError::Other(format!("failed to build HTTP client: {e}")))?;
        let name = format!("ollama ({})", config.model);
        Ok(Self {
            client,
            config,
            name,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn error(&self, error: reqwest::Error) -> ReplyError {
        if error.is_connect() {
            ReplyError::Unavailable {
                backend: self.name.clone(),
            }
        } else {
            ReplyError::Backend {
                backend: self.name.clone(),
                message: error.to_string(),
            }
        }
    }
}

impl Responder for OllamaResponder {
    fn generate_reply(&self, message: &str) -> std::result::Result<Reply, ReplyError> {
        let system = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: message,
                },
            ],
            stream: false,
        };

        let response = self
            .client
            .post(self.url("/api/chat"))
            .json(&request)
            .send()
            .map_err(|e| self.error(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ReplyError::Backend {
                backend: self.name.clone(),
                message: format!("HTTP {status}"),
            });
        }
        let body: ChatResponse = response.json().map_err(|e| self.error(e))?;
        let text = body
            .message
            .map(|m| m.content.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(ReplyError::EmptyReply {
                backend: self.name.clone(),
            });
        }
        Ok(Reply::new(text, self.name.clone()))
    }

    fn name(&self) -> &str {
        &self.name
    }

    /// Probes `GET /api/version`.
    fn is_available(&self) -> bool {
        self.client
            .get(self.url("/api/version"))
            .timeout(PROBE_TIMEOUT)
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable() -> OllamaResponder {
        OllamaResponder::new(OllamaConfig {
            base_url: "http://127.0.0.1:9/".to_string(),
            timeout_secs: 2,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_url_trims_trailing_slash() {
        assert_eq!(unreachable().url("/api/chat"), "http://127.0.0.1:9/api/chat");
    }

    #[test]
    fn test_name_includes_model() {
        assert_eq!(unreachable().name(), "ollama (llama3.2)");
    }

    #[test]
    fn test_unreachable_server_is_an_error_not_a_reply() {
        let responder = unreachable();
        assert!(!responder.is_available());
        assert!(responder.generate_reply("hello").is_err());
    }

    #[test]
    fn test_response_parsing() {
        let body: ChatResponse =
            serde_json::from_str(r#"{"message":{"role":"assistant","content":" Hi! "},"done":true}"#)
                .unwrap();
        assert_eq!(body.message.unwrap().content, " Hi! ");
    }
}
