//! Streaming text-to-speech.
//!
//! Long text is split into chunks that are synthesized and played
//! concurrently, so the first words are heard while later chunks are still
//! being synthesized.

pub mod cancel;
pub mod chunker;
#[cfg(feature = "cpal-audio")]
pub mod cpal_player;
pub mod error;
mod playback_worker;
pub mod player;
pub mod registry;
#[cfg(feature = "remote")]
pub mod remote;
pub mod scratch;
pub mod stats;
mod synthesis_worker;
pub mod streaming;
pub mod synthesizer;
pub mod types;

pub use cancel::CancelToken;
pub use chunker::{chunk_text, split_text};
pub use error::{ErrorReporter, LogReporter, PlaybackError, SynthesisError, WorkerError};
pub use player::{CommandPlayer, MockPlayer, NullPlayer, Player};
pub use registry::{BackendRegistry, BackendStatus};
pub use scratch::{PayloadStore, ScratchDir};
pub use stats::PipelineRunStats;
pub use streaming::{PipelineState, StreamingOptions, StreamingTts};
pub use synthesizer::{
    CommandSynthesizer, FallbackSynthesizer, MockSynthesizer, Synthesizer, ToneSynthesizer,
};
pub use types::{AudioChunk, AudioPayload, ProgressCallback, TextChunk};
