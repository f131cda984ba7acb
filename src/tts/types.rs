//! Data types flowing through the streaming speech pipeline.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempPath;

/// Called with `(fraction_complete, message)` after each chunk is synthesized.
///
/// Runs on the synthesis thread, so it must return quickly.
pub type ProgressCallback = Arc<dyn Fn(f32, &str) + Send + Sync>;

/// A segment of response text, indexed in original text order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Position in the chunker output; playback follows this order.
    pub index: usize,
    /// Trimmed text to synthesize.
    pub text: String,
}

impl TextChunk {
    /// Creates a new text chunk.
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }
}

/// Synthesized audio, either held in memory or written to a temp file.
///
/// A file payload deletes its file when dropped.
#[derive(Debug)]
pub enum AudioPayload {
    /// Encoded audio bytes (WAV, MP3, ...).
    Memory(Vec<u8>),
    /// Temp file exclusively owned by this payload.
    File(TempPath),
}

impl AudioPayload {
    /// Size of the in-memory buffer, or `None` for file payloads.
    pub fn byte_len(&self) -> Option<usize> {
        match self {
            AudioPayload::Memory(bytes) => Some(bytes.len()),
            AudioPayload::File(_) => None,
        }
    }

    /// Path of the backing file, if any.
    pub fn file_path(&self) -> Option<&Path> {
        match self {
            AudioPayload::Memory(_) => None,
            AudioPayload::File(path) => Some(&**path),
        }
    }
}

/// Audio produced from one [`TextChunk`].
///
/// Owned by exactly one pipeline stage at a time. The payload is released
/// after playback, on cancellation, or at the latest when the chunk drops.
#[derive(Debug)]
pub struct AudioChunk {
    /// Index inherited from the source text chunk.
    pub index: usize,
    /// Text the audio was synthesized from.
    pub text: String,
    /// Wall-clock time the backend spent synthesizing.
    pub synthesis_duration: Duration,
    /// When the chunk left the synthesizer.
    pub created_at: Instant,
    payload: Option<AudioPayload>,
}

impl AudioChunk {
    /// Creates an audio chunk owning `payload`.
    pub fn new(chunk: TextChunk, payload: AudioPayload, synthesis_duration: Duration) -> Self {
        Self {
            index: chunk.index,
            text: chunk.text,
            synthesis_duration,
            created_at: Instant::now(),
            payload: Some(payload),
        }
    }

    /// The audio payload, or `None` once released.
    pub fn payload(&self) -> Option<&AudioPayload> {
        self.payload.as_ref()
    }

    /// Whether the chunk still holds audio.
    pub fn has_audio(&self) -> bool {
        self.payload.is_some()
    }

    /// Path of the temp file backing this chunk, if it has one.
    pub fn file_path(&self) -> Option<&Path> {
        self.payload.as_ref().and_then(AudioPayload::file_path)
    }

    /// Releases the payload: deletes the temp file or frees the buffer.
    ///
    /// Idempotent. Cleanup failures (file already gone, permissions) are logged
    /// and swallowed.
    pub fn release(&mut self) {
        match self.payload.take() {
            Some(AudioPayload::File(path)) => {
                let path_display = path.display().to_string();
                if let Err(e) = path.close()
                    && e.kind() != std::io::ErrorKind::NotFound
                {
                    tracing::debug!(index = self.index, path = %path_display, error = %e, "temp audio cleanup failed");
                }
            }
            Some(AudioPayload::Memory(_)) | None => {}
        }
    }
}

impl Drop for AudioChunk {
    fn drop(&mut self) {
        self.release();
    }
}

/// Item on the synthesis → playback queue.
#[derive(Debug)]
pub(crate) enum Handoff {
    Chunk(AudioChunk),
    /// No more chunks will arrive for this run.
    EndOfStream,
}

impl Handoff {
    /// Release any audio held by this item.
    pub(crate) fn release(self) {
        if let Handoff::Chunk(mut chunk) = self {
            chunk.release();
        }
    }
}
