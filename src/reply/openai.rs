//! OpenAI-compatible chat completions backend.

use crate::config::OpenAiChatConfig;
use crate::error::{Result, VoxlineError};
use crate::reply::{DEFAULT_SYSTEM_PROMPT, Reply, ReplyError, Responder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Calls `POST {base_url}/chat/completions` with a bearer token read from
/// the configured environment variable.
pub struct OpenAiResponder {
    client: reqwest::blocking::Client,
    config: OpenAiChatConfig,
    api_key: Option<String>,
    name: String,
}

impl OpenAiResponder {
    pub fn new(config: OpenAiChatConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: OpenAiChatConfig, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VoxlineError::Other(format!("failed to build HTTP client: {e}")))?;
        let name = format!("openai ({})", config.model);
        Ok(Self {
            client,
            config,
            api_key,
            name,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn request<'a>(&'a self, message: &'a str) -> ChatCompletionRequest<'a> {
        let system = self
            .config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        ChatCompletionRequest {
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
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        }
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

    fn reply_text(&self, body: ChatCompletionResponse) -> std::result::Result<Reply, ReplyError> {
        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(ReplyError::EmptyReply {
                backend: self.name.clone(),
            });
        }
        Ok(Reply::new(text, self.name.clone()))
    }
}

impl Responder for OpenAiResponder {
    fn generate_reply(&self, message: &str) -> std::result::Result<Reply, ReplyError> {
        let Some(api_key) = &self.api_key else {
            return Err(ReplyError::Unavailable {
                backend: format!("{} ({} is not set)", self.name, self.config.api_key_env),
            });
        };

        let response = self
            .client
            .post(self.url("/chat/completions"))
            .bearer_auth(api_key)
            .json(&self.request(message))
            .send()
            .map_err(|e| self.error(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ReplyError::Backend {
                backend: self.name.clone(),
                message: format!("HTTP {status}"),
            });
        }
        let body: ChatCompletionResponse = response.json().map_err(|e| self.error(e))?;
        self.reply_text(body)
    }

    fn name(&self) -> &str {
        &self.name
    }

    /// Probes `GET /models`, which costs no tokens.
    fn is_available(&self) -> bool {
        let Some(api_key) = &self.api_key else {
            return false;
        };
        self.client
            .get(self.url("/models"))
            .bearer_auth(api_key)
            .timeout(PROBE_TIMEOUT)
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}
