//! Error types for voxline.

use crate::reply::ReplyError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxlineError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Backend selection errors
    #[error("Unknown {kind} backend: {id}")]
    UnknownBackend { kind: &'static str, id: String },

    #[error("Backend unavailable: {backend}")]
    BackendUnavailable { backend: String },

    // Pipeline lifecycle errors
    #[error("Speech pipeline is busy with another run")]
    PipelineBusy,

    #[error("Failed to start pipeline worker: {message}")]
    WorkerSpawn { message: String },

    // Conversation errors
    #[error("Reply generation failed: {0}")]
    Reply(#[from] ReplyError),

    #[error("Conversation history error: {message}")]
    History { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, VoxlineError>;
