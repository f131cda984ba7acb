//! voxline - Voice assistant pipeline with streaming text-to-speech
//!
//! Long replies are split into chunks that are synthesized and played
//! concurrently, so speech starts before the whole reply is synthesized.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod conversation;
pub mod defaults;
pub mod error;
pub mod history;
pub mod output;
pub mod reply;
pub mod tts;

// Speech pipeline
pub use tts::{
    PipelineRunStats, PipelineState, Player, ProgressCallback, StreamingOptions, StreamingTts,
    Synthesizer,
};

// Conversation
pub use conversation::{Conversation, ConversationStats, TurnOutcome};
pub use history::{ConversationRecord, ConversationSink, HistoryQuery};
pub use reply::{Reply, ReplyError, Responder};

// Error handling
pub use error::{Result, VoxlineError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_has_hash_suffix_only_with_git_hash() {
        let ver = version_string();
        match option_env!("GIT_HASH") {
            Some(hash) if !hash.is_empty() => assert_eq!(ver.split('+').nth(1), Some(hash)),
            _ => assert_eq!(ver, env!("CARGO_PKG_VERSION")),
        }
    }
}
