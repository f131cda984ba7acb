//! Reply generation.
//!
//! A [`Responder`] turns one user message into reply text. Failures are typed:
//! [`FallbackResponder`] switches to its second responder only when the
//! first returns an error, never by inspecting the reply text.

#[cfg(feature = "remote")]
pub mod ollama;
#[cfg(feature = "remote")]
pub mod openai;
pub mod rules;

use crate::config::ReplyConfig;
use crate::error::{Result, VoxlineError};
use std::sync::Arc;
use thiserror::Error;

#[cfg(feature = "remote")]
pub use ollama::OllamaResponder;
#[cfg(feature = "remote")]
pub use openai::OpenAiResponder;
pub use rules::RuleResponder;

/// Responder ids understood by [`responder_from_config`].
pub const RESPONDER_IDS: &[&str] = &["rules", "ollama", "openai"];

#[cfg(feature = "remote")]
const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a friendly voice assistant. Answer briefly, in the language the user speaks.";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplyError {
    #[error("Responder unavailable: {backend}")]
    Unavailable { backend: String },

    #[error("{backend} failed: {message}")]
    Backend { backend: String, message: String },

    #[error("{backend} returned an empty reply")]
    EmptyReply { backend: String },
}

/// Reply text and the responder that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub responder: String,
}

impl Reply {
    pub fn new(text: impl Into<String>, responder: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            responder: responder.into(),
        }
    }
}

/// Produces a reply for one user message.
pub trait Responder: Send + Sync {
    fn generate_reply(&self, message: &str) -> std::result::Result<Reply, ReplyError>;

    fn name(&self) -> &str;

    fn is_available(&self) -> bool;
}

impl<T: Responder + ?Sized> Responder for Arc<T> {
    fn generate_reply(&self, message: &str) -> std::result::Result<Reply, ReplyError> {
        (**self).generate_reply(message)
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }
}

impl<T: Responder + ?Sized> Responder for Box<T> {
    fn generate_reply(&self, message: &str) -> std::result::Result<Reply, ReplyError> {
        (**self).generate_reply(message)
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }
}

/// Tries `primary`, then `fallback` if the primary is unavailable or errors.
pub struct FallbackResponder {
    primary: Box<dyn Responder>,
    fallback: Box<dyn Responder>,
    name: String,
}

impl FallbackResponder {
    pub fn new(primary: Box<dyn Responder>, fallback: Box<dyn Responder>) -> Self {
        let name = format!("{}+{}", primary.name(), fallback.name());
        Self {
            primary,
            fallback,
            name,
        }
    }
}

impl Responder for FallbackResponder {
    fn generate_reply(&self, message: &str) -> std::result::Result<Reply, ReplyError> {
        if !self.primary.is_available() {
            tracing::debug!(
                primary = self.primary.name(),
                fallback = self.fallback.name(),
                "primary responder unavailable"
            );
            return self.fallback.generate_reply(message);
        }
        match self.primary.generate_reply(message) {
            Ok(reply) => Ok(reply),
            Err(e) => {
                tracing::warn!(
                    primary = self.primary.name(),
                    fallback = self.fallback.name(),
                    error = %e,
                    "responder failed, using fallback"
                );
                self.fallback.generate_reply(message)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.primary.is_available() || self.fallback.is_available()
    }
}

/// Builds one responder by id.
pub fn build_responder(id: &str, config: &ReplyConfig) -> Result<Box<dyn Responder>> {
    match id {
        "rules" => Ok(Box::new(RuleResponder::new())),
        #[cfg(feature = "remote")]
        "ollama" => Ok(Box::new(OllamaResponder::new(config.ollama.clone())?)),
        #[cfg(feature = "remote")]
        "openai" => Ok(Box::new(OpenAiResponder::new(config.openai.clone())?)),
        #[cfg(not(feature = "remote"))]
        "ollama" | "openai" => {
            let _ = config;
            Err(VoxlineError::BackendUnavailable {
                backend: format!("{id} (built without the remote feature)"),
            })
        }
        other => Err(VoxlineError::UnknownBackend {
            kind: "responder",
            id: other.to_string(),
        }),
    }
}

/// Builds the configured responder, wrapped with its fallback if one is set.
pub fn responder_from_config(config: &ReplyConfig) -> Result<Arc<dyn Responder>> {
    let primary = build_responder(&config.backend, config)?;
    match config.fallback.as_deref() {
        Some(fallback) if fallback != config.backend => {
            let fallback = build_responder(fallback, config)?;
            Ok(Arc::new(FallbackResponder::new(primary, fallback)))
        }
        _ => Ok(Arc::from(primary)),
    }
}

/// Mock responder for testing.
#[derive(Debug, Clone)]
pub struct MockResponder {
    name: String,
    reply: std::result::Result<String, ReplyError>,
    available: bool,
}

impl MockResponder {
    /// Always replies with `text`.
    pub fn replying(name: &str, text: &str) -> Self {
        Self {
            name: name.to_string(),
            reply: Ok(text.to_string()),
            available: true,
        }
    }

    /// Always fails with a backend error.
    pub fn failing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reply: Err(ReplyError::Backend {
                backend: name.to_string(),
                message: "mock failure".to_string(),
            }),
            available: true,
        }
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }
}

impl Responder for MockResponder {
    fn generate_reply(&self, _message: &str) -> std::result::Result<Reply, ReplyError> {
        self.reply
            .clone()
            .map(|text| Reply::new(text, self.name.clone()))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_not_used_on_success() {
        let responder = FallbackResponder::new(
            Box::new(MockResponder::replying("primary", "from primary")),
            Box::new(MockResponder::replying("backup", "from backup")),
        );
        let reply = responder.generate_reply("hello").unwrap();
        assert_eq!(reply, Reply::new("from primary", "primary"));
    }

    #[test]
    fn test_fallback_used_on_error_variant() {
        let responder = FallbackResponder::new(
            Box::new(MockResponder::failing("primary")),
            Box::new(MockResponder::replying("backup", "from backup")),
        );
        let reply = responder.generate_reply("hello").unwrap();
        assert_eq!(reply.responder, "backup");
    }

    #[test]
    fn test_reply_text_mentioning_error_is_not_a_failure() {
        let responder = FallbackResponder::new(
            Box::new(MockResponder::replying("primary", "The error failed to reproduce.")),
            Box::new(MockResponder::replying("backup", "from backup")),
        );
        let reply = responder.generate_reply("hello").unwrap();
        assert_eq!(reply.responder, "primary");
    }

    #[test]
    fn test_fallback_skips_unavailable_primary() {
        let responder = FallbackResponder::new(
            Box::new(MockResponder::replying("primary", "x").unavailable()),
            Box::new(MockResponder::replying("backup", "from backup")),
        );
        assert!(responder.is_available());
        assert_eq!(responder.generate_reply("hi").unwrap().responder, "backup");
    }

    #[test]
    fn test_both_failing_returns_fallback_error() {
        let responder = FallbackResponder::new(
            Box::new(MockResponder::failing("primary")),
            Box::new(MockResponder::failing("backup")),
        );
        let err = responder.generate_reply("hi").unwrap_err();
        assert!(matches!(err, ReplyError::Backend { backend, .. } if backend == "backup"));
    }

    #[test]
    fn test_fallback_name_joins_both() {
        let responder = FallbackResponder::new(
            Box::new(MockResponder::replying("a", "x")),
            Box::new(MockResponder::replying("b", "y")),
        );
        assert_eq!(responder.name(), "a+b");
    }

    #[test]
    fn test_factory_builds_rules() {
        let responder = responder_from_config(&ReplyConfig::default()).unwrap();
        assert_eq!(responder.name(), "rules");
        assert!(responder.is_available());
    }

    #[test]
    fn test_factory_rejects_unknown_id() {
        let config = ReplyConfig {
            backend: "gpt-9".to_string(),
            ..Default::default()
        };
        let err = responder_from_config(&config).err().unwrap();
        assert!(matches!(
            err,
            VoxlineError::UnknownBackend { kind: "responder", .. }
        ));
    }

    #[test]
    fn test_factory_ignores_fallback_equal_to_primary() {
        let config = ReplyConfig {
            fallback: Some("rules".to_string()),
            ..Default::default()
        };
        assert_eq!(responder_from_config(&config).unwrap().name(), "rules");
    }

    #[cfg(feature = "remote")]
    #[test]
    fn test_factory_builds_openai() {
        let config = ReplyConfig {
            backend: "openai".to_string(),
            ..Default::default()
        };
        let responder = build_responder("openai", &config).unwrap();
        assert_eq!(responder.name(), "openai (gpt-3.5-turbo)");
    }

    #[test]
    fn test_every_listed_id_is_known() {
        for id in RESPONDER_IDS {
            assert!(!matches!(
                build_responder(id, &ReplyConfig::default()),
                Err(VoxlineError::UnknownBackend { .. })
            ));
        }
    }

    #[test]
    fn test_reply_error_display() {
        let err = ReplyError::Backend {
            backend: "ollama".to_string(),
            message: "HTTP 500".to_string(),
        };
        assert_eq!(err.to_string(), "ollama failed: HTTP 500");
    }
}
