//! Default configuration constants for voxline.
//!
//! Shared by the config layer, the CLI and the streaming pipeline so every
//! entry point agrees on the same numbers.

use std::time::Duration;

/// Default maximum chunk length in characters.
///
/// Roughly one spoken sentence: long enough for natural prosody, short enough
/// that the first chunk synthesizes quickly.
pub const MAX_CHUNK_SIZE: usize = 80;

/// Default capacity of the synthesis → playback queue.
pub const QUEUE_SIZE: usize = 10;

/// How often blocked workers wake up to check for cancellation.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long `cancel()` waits for workers before detaching them.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Temp audio files older than this are swept when a scratch directory opens.
pub const STALE_AFTER: Duration = Duration::from_secs(600);

/// File name prefix for temp audio files owned by chunks.
pub const SCRATCH_PREFIX: &str = "voxline-chunk-";

/// Default synthesizer backend identifier.
pub const DEFAULT_SYNTHESIZER: &str = "espeak";

/// Default player backend identifier.
pub const DEFAULT_PLAYER: &str = "aplay";

/// Default reply backend identifier.
pub const DEFAULT_RESPONDER: &str = "rules";

/// Default speech language passed to synthesizers that accept one.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Default user id for conversation records.
pub const DEFAULT_USER_ID: &str = "default";

/// Prefix of generated session ids (`session_<unix seconds>`).
pub const SESSION_PREFIX: &str = "session_";

/// Default conversation timeout for the interactive chat loop.
pub const CONVERSATION_TIMEOUT_SECS: u64 = 300;

/// Days of conversation history kept before pruning.
pub const HISTORY_RETENTION_DAYS: u32 = 30;

/// Sample rate of audio produced by the built-in tone synthesizer.
pub const TONE_SAMPLE_RATE: u32 = 22050;

/// Number of chunks shown in the preview when a run starts.
pub const PREVIEW_CHUNKS: usize = 3;
