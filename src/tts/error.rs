//! Error types and reporting for the speech pipeline workers.

use std::fmt;
use thiserror::Error;

/// Why a backend could not synthesize a chunk.
#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("{backend} is unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    #[error("{backend} failed: {message}")]
    Backend { backend: String, message: String },

    #[error("{backend} produced no audio")]
    EmptyAudio { backend: String },

    #[error("I/O error during synthesis: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a player could not play a chunk.
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("{player} is unavailable: {reason}")]
    Unavailable { player: String, reason: String },

    #[error("playback stopped")]
    Stopped,

    #[error("{player} failed: {message}")]
    Failed { player: String, message: String },

    #[error("cannot decode audio: {message}")]
    Decode { message: String },

    #[error("I/O error during playback: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors a worker reports while processing a chunk.
#[derive(Debug, Clone)]
pub enum WorkerError {
    /// The chunk is skipped; the worker moves on.
    Recoverable(String),
    /// The worker stops.
    Fatal(String),
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::Recoverable(msg) => write!(f, "Recoverable error: {}", msg),
            WorkerError::Fatal(msg) => write!(f, "Fatal error: {}", msg),
        }
    }
}

impl std::error::Error for WorkerError {}

/// Trait for reporting worker errors.
pub trait ErrorReporter: Send + Sync {
    /// Reports an error from a worker.
    fn report(&self, worker: &str, error: &WorkerError);
}

/// Error reporter that forwards to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, worker: &str, error: &WorkerError) {
        match error {
            WorkerError::Recoverable(msg) => tracing::warn!(worker, "{msg}"),
            WorkerError::Fatal(msg) => tracing::error!(worker, "{msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_error_display() {
        let recoverable = WorkerError::Recoverable("chunk 2 failed".to_string());
        assert_eq!(recoverable.to_string(), "Recoverable error: chunk 2 failed");

        let fatal = WorkerError::Fatal("queue closed".to_string());
        assert_eq!(fatal.to_string(), "Fatal error: queue closed");
    }

    #[test]
    fn test_synthesis_error_display() {
        let error = SynthesisError::Backend {
            backend: "espeak-ng".to_string(),
            message: "exit status 1".to_string(),
        };
        assert_eq!(error.to_string(), "espeak-ng failed: exit status 1");

        let empty = SynthesisError::EmptyAudio {
            backend: "tone".to_string(),
        };
        assert_eq!(empty.to_string(), "tone produced no audio");
    }

    #[test]
    fn test_playback_error_display() {
        assert_eq!(PlaybackError::Stopped.to_string(), "playback stopped");
        let error = PlaybackError::Failed {
            player: "aplay".to_string(),
            message: "device busy".to_string(),
        };
        assert_eq!(error.to_string(), "aplay failed: device busy");
    }

    #[test]
    fn test_log_reporter() {
        let reporter = LogReporter;
        // Just ensure it doesn't panic
        reporter.report("synthesis", &WorkerError::Recoverable("test".to_string()));
        reporter.report("playback", &WorkerError::Fatal("test".to_string()));
    }
}
