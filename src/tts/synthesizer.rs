//! Speech synthesis backends.
//!
//! Every backend implements [`Synthesizer`]. Which one runs is decided by an
//! explicit backend id in the configuration (see [`crate::tts::registry`]),
//! never by inspecting display names or output text.

use crate::defaults;
use crate::tts::error::SynthesisError;
use crate::tts::scratch::PayloadStore;
use crate::tts::types::{AudioPayload, TextChunk};
use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Trait for text-to-speech synthesis.
///
/// Implementations block for the duration of the backend call.
pub trait Synthesizer: Send + Sync {
    /// Synthesize one chunk of text.
    fn synthesize(&self, chunk: &TextChunk) -> Result<AudioPayload, SynthesisError>;

    /// Backend name for logs and reports.
    fn name(&self) -> &str;

    /// Whether the backend can be used at all (binary installed, key set, ...).
    fn is_available(&self) -> bool;
}

impl<T: Synthesizer + ?Sized> Synthesizer for Arc<T> {
    fn synthesize(&self, chunk: &TextChunk) -> Result<AudioPayload, SynthesisError> {
        (**self).synthesize(chunk)
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }
}

impl<T: Synthesizer + ?Sized> Synthesizer for Box<T> {
    fn synthesize(&self, chunk: &TextChunk) -> Result<AudioPayload, SynthesisError> {
        (**self).synthesize(chunk)
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }
}

/// Returns true if `program` resolves to an executable on `PATH`
/// (or is an existing path itself).
pub fn command_on_path(program: &str) -> bool {
    if program.contains(std::path::MAIN_SEPARATOR) {
        return std::path::Path::new(program).is_file();
    }
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| dir.join(program).is_file())
}

/// Encode mono 16-bit samples as a WAV file in memory.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut buffer = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut buffer), spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }
    Ok(buffer)
}

/// Offline backend that renders each chunk as a sine tone.
///
/// Tone length follows text length, which makes it useful for exercising
/// the pipeline without a speech engine installed.
#[derive(Debug, Clone)]
pub struct ToneSynthesizer {
    store: PayloadStore,
    sample_rate: u32,
    frequency: f32,
    per_char: Duration,
}

impl ToneSynthesizer {
    pub fn new(store: PayloadStore) -> Self {
        Self {
            store,
            sample_rate: defaults::TONE_SAMPLE_RATE,
            frequency: 440.0,
            per_char: Duration::from_millis(40),
        }
    }

    /// Sets how much audio is produced per input character.
    pub fn with_per_char(mut self, per_char: Duration) -> Self {
        self.per_char = per_char;
        self
    }

    pub fn with_frequency(mut self, frequency: f32) -> Self {
        self.frequency = frequency;
        self
    }

    fn render(&self, text: &str) -> Vec<i16> {
        let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
        let duration = self.per_char.saturating_mul(chars);
        let count = (duration.as_secs_f64() * f64::from(self.sample_rate)) as usize;
        let step = std::f32::consts::TAU * self.frequency / self.sample_rate as f32;
        (0..count)
            .map(|i| ((i as f32 * step).sin() * 0.2 * f32::from(i16::MAX)) as i16)
            .collect()
    }
}

impl Synthesizer for ToneSynthesizer {
    fn synthesize(&self, chunk: &TextChunk) -> Result<AudioPayload, SynthesisError> {
        let samples = self.render(&chunk.text);
        if samples.is_empty() {
            return Err(SynthesisError::EmptyAudio {
                backend: self.name().to_string(),
            });
        }
        let wav = encode_wav(&samples, self.sample_rate).map_err(|e| SynthesisError::Backend {
            backend: self.name().to_string(),
            message: e.to_string(),
        })?;
        Ok(self.store.store(wav, "wav")?)
    }

    fn name(&self) -> &str {
        "tone"
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Placeholder replaced by the chunk text in command arguments.
pub const TEXT_PLACEHOLDER: &str = "{text}";
/// Placeholder replaced by the output file path in command arguments.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Backend that runs an external speech program per chunk.
///
/// Arguments may contain `{text}` and `{output}`. Without `{text}` the chunk
/// is written to the program's stdin; without `{output}` the audio is read
/// from its stdout.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    name: String,
    program: String,
    args: Vec<String>,
    extension: String,
    store: PayloadStore,
}

impl CommandSynthesizer {
    pub fn new(
        name: impl Into<String>,
        program: impl Into<String>,
        args: Vec<String>,
        store: PayloadStore,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            extension: "wav".to_string(),
            store,
        }
    }

    /// `espeak-ng` writing WAV files in the given voice/language.
    pub fn espeak(language: &str, store: PayloadStore) -> Self {
        let args = ["-v", language, "-w", OUTPUT_PLACEHOLDER, TEXT_PLACEHOLDER]
            .iter()
            .map(|s| s.to_string())
            .collect();
        Self::new("espeak-ng", "espeak-ng", args, store)
    }

    /// macOS `say` writing 16-bit WAV files.
    pub fn say(store: PayloadStore) -> Self {
        let args = [
            "-o",
            OUTPUT_PLACEHOLDER,
            "--data-format=LEI16@22050",
            TEXT_PLACEHOLDER,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        Self::new("say", "say", args, store)
    }

    /// File extension of the audio the program produces.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    fn backend_error(&self, message: impl Into<String>) -> SynthesisError {
        SynthesisError::Backend {
            backend: self.name.clone(),
            message: message.into(),
        }
    }
}

impl Synthesizer for CommandSynthesizer {
    fn synthesize(&self, chunk: &TextChunk) -> Result<AudioPayload, SynthesisError> {
        let writes_file = self.args.iter().any(|a| a.contains(OUTPUT_PLACEHOLDER));
        let takes_text_arg = self.args.iter().any(|a| a.contains(TEXT_PLACEHOLDER));

        let output_path = if writes_file {
            Some(self.store.temp_file(&self.extension)?)
        } else {
            None
        };
        let output_str = output_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| {
                a.replace(TEXT_PLACEHOLDER, &chunk.text)
                    .replace(OUTPUT_PLACEHOLDER, &output_str)
            })
            .collect();

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(if takes_text_arg {
                Stdio::null()
            } else {
                Stdio::piped()
            })
            .stdout(if writes_file {
                Stdio::null()
            } else {
                Stdio::piped()
            })
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SynthesisError::Unavailable {
                    backend: self.name.clone(),
                    reason: format!("{} not found on PATH", self.program),
                }
            } else {
                SynthesisError::Io(e)
            }
        })?;

        if !takes_text_arg && let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(chunk.text.as_bytes())?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.backend_error(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        match output_path {
            Some(path) => {
                let len = std::fs::metadata(&path)?.len();
                if len == 0 {
                    return Err(SynthesisError::EmptyAudio {
                        backend: self.name.clone(),
                    });
                }
                Ok(self.store.adopt(path)?)
            }
            None => {
                if output.stdout.is_empty() {
                    return Err(SynthesisError::EmptyAudio {
                        backend: self.name.clone(),
                    });
                }
                Ok(self.store.store(output.stdout, &self.extension)?)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        command_on_path(&self.program)
    }
}

/// Tries `primary` first and falls back to `fallback` when it returns an error.
pub struct FallbackSynthesizer {
    primary: Box<dyn Synthesizer>,
    fallback: Box<dyn Synthesizer>,
    name: String,
}

impl FallbackSynthesizer {
    pub fn new(primary: Box<dyn Synthesizer>, fallback: Box<dyn Synthesizer>) -> Self {
        let name = format!("{}+{}", primary.name(), fallback.name());
        Self {
            primary,
            fallback,
            name,
        }
    }
}

impl Synthesizer for FallbackSynthesizer {
    fn synthesize(&self, chunk: &TextChunk) -> Result<AudioPayload, SynthesisError> {
        if self.primary.is_available() {
            match self.primary.synthesize(chunk) {
                Ok(payload) => return Ok(payload),
                Err(e) => tracing::warn!(
                    index = chunk.index,
                    primary = self.primary.name(),
                    fallback = self.fallback.name(),
                    error = %e,
                    "synthesis failed, using fallback"
                ),
            }
        }
        self.fallback.synthesize(chunk)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.primary.is_available() || self.fallback.is_available()
    }
}

/// Blocks callers until opened. Used by mocks to hold a stage in place.
#[derive(Debug, Default)]
pub struct Gate {
    closed: Mutex<bool>,
    changed: Condvar,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        if let Ok(mut closed) = self.closed.lock() {
            *closed = true;
        }
    }

    pub fn open(&self) {
        if let Ok(mut closed) = self.closed.lock() {
            *closed = false;
        }
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.lock().map(|c| *c).unwrap_or(false)
    }

    /// Waits until the gate opens or `abort` returns true.
    pub fn wait_while_closed(&self, abort: impl Fn() -> bool) {
        let Ok(mut closed) = self.closed.lock() else {
            return;
        };
        while *closed && !abort() {
            match self.changed.wait_timeout(closed, defaults::POLL_INTERVAL) {
                Ok((guard, _)) => closed = guard,
                Err(_) => return,
            }
        }
    }
}

/// Mock synthesizer for testing.
///
/// Each payload holds the chunk index as decimal text, which
/// [`crate::tts::player::MockPlayer`] decodes to record play order.
#[derive(Debug, Clone, Default)]
pub struct MockSynthesizer {
    fail_on: HashSet<usize>,
    delay: Duration,
    unavailable: bool,
    files: Option<PayloadStore>,
    gate: Arc<Gate>,
    calls: Arc<Mutex<Vec<usize>>>,
    created: Arc<Mutex<Vec<PathBuf>>>,
    in_flight: Arc<AtomicBool>,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail synthesis for the given chunk index.
    pub fn with_failure_on(mut self, index: usize) -> Self {
        self.fail_on.insert(index);
        self
    }

    /// Sleep this long per chunk.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Report the backend as unavailable.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Produce file payloads in `store` instead of memory buffers.
    pub fn with_store(mut self, store: PayloadStore) -> Self {
        self.files = Some(store);
        self
    }

    /// Gate that holds every synthesis call while closed.
    pub fn gate(&self) -> Arc<Gate> {
        self.gate.clone()
    }

    /// Indices passed to `synthesize`, in call order.
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Paths of every file payload produced so far.
    pub fn created_files(&self) -> Vec<PathBuf> {
        self.created.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Whether a `synthesize` call is currently running.
    pub fn is_synthesizing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }
}

impl MockSynthesizer {
    fn produce(&self, chunk: &TextChunk) -> Result<AudioPayload, SynthesisError> {
        if self.fail_on.contains(&chunk.index) {
            return Err(SynthesisError::Backend {
                backend: "mock".to_string(),
                message: format!("mock failure on chunk {}", chunk.index),
            });
        }
        let bytes = chunk.index.to_string().into_bytes();
        let Some(store) = &self.files else {
            return Ok(AudioPayload::Memory(bytes));
        };
        let payload = store.store(bytes, "wav")?;
        if let (Some(path), Ok(mut created)) = (payload.file_path(), self.created.lock()) {
            created.push(path.to_path_buf());
        }
        Ok(payload)
    }
}

impl Synthesizer for MockSynthesizer {
    fn synthesize(&self, chunk: &TextChunk) -> Result<AudioPayload, SynthesisError> {
        self.in_flight.store(true, Ordering::SeqCst);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(chunk.index);
        }
        self.gate.wait_while_closed(|| false);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let result = self.produce(chunk);
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn is_available(&self) -> bool {
        !self.unavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: usize, text: &str) -> TextChunk {
        TextChunk::new(index, text)
    }

    #[test]
    fn test_tone_produces_wav_in_memory() {
        let synth = ToneSynthesizer::new(PayloadStore::Memory);
        let payload = synth.synthesize(&chunk(0, "hello")).unwrap();
        let AudioPayload::Memory(bytes) = payload else {
            panic!("expected memory payload");
        };
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, defaults::TONE_SAMPLE_RATE);
        // 5 chars * 40ms = 200ms
        let expected = (0.2 * defaults::TONE_SAMPLE_RATE as f64) as u32;
        assert_eq!(reader.duration(), expected);
    }

    #[test]
    fn test_tone_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PayloadStore::Disk(crate::tts::scratch::ScratchDir::open(
            tmp.path(),
            defaults::STALE_AFTER,
        ));
        let synth = ToneSynthesizer::new(store);
        let payload = synth.synthesize(&chunk(0, "hi")).unwrap();
        let path = payload.file_path().unwrap().to_path_buf();
        assert!(hound::WavReader::open(&path).is_ok());
    }

    #[test]
    fn test_tone_zero_length_is_empty_audio() {
        let synth = ToneSynthesizer::new(PayloadStore::Memory).with_per_char(Duration::ZERO);
        let err = synth.synthesize(&chunk(0, "hi")).unwrap_err();
        assert!(matches!(err, SynthesisError::EmptyAudio { .. }));
    }

    #[test]
    fn test_command_missing_program_is_unavailable() {
        let synth = CommandSynthesizer::new(
            "ghost",
            "voxline-no-such-program",
            vec![TEXT_PLACEHOLDER.to_string()],
            PayloadStore::Memory,
        );
        assert!(!synth.is_available());
        let err = synth.synthesize(&chunk(0, "hi")).unwrap_err();
        assert!(matches!(err, SynthesisError::Unavailable { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_reads_stdout() {
        let synth = CommandSynthesizer::new(
            "echo",
            "echo",
            vec!["-n".to_string(), TEXT_PLACEHOLDER.to_string()],
            PayloadStore::Memory,
        );
        let payload = synth.synthesize(&chunk(0, "audio")).unwrap();
        let AudioPayload::Memory(bytes) = payload else {
            panic!("expected memory payload");
        };
        assert_eq!(bytes, b"audio");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_pipes_text_to_stdin() {
        let synth = CommandSynthesizer::new("cat", "cat", Vec::new(), PayloadStore::Memory);
        let payload = synth.synthesize(&chunk(0, "piped text")).unwrap();
        assert_eq!(payload.byte_len(), Some("piped text".len()));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_writes_output_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PayloadStore::Disk(crate::tts::scratch::ScratchDir::open(
            tmp.path(),
            defaults::STALE_AFTER,
        ));
        let synth = CommandSynthesizer::new(
            "sh",
            "sh",
            vec![
                "-c".to_string(),
                "printf '%s' \"$0\" > \"$1\"".to_string(),
                TEXT_PLACEHOLDER.to_string(),
                OUTPUT_PLACEHOLDER.to_string(),
            ],
            store,
        );
        let payload = synth.synthesize(&chunk(0, "file audio")).unwrap();
        let path = payload.file_path().unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"file audio");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_failure_is_backend_error() {
        let synth = CommandSynthesizer::new("false", "false", Vec::new(), PayloadStore::Memory);
        let err = synth.synthesize(&chunk(0, "x")).unwrap_err();
        assert!(matches!(err, SynthesisError::Backend { .. }));
    }

    #[test]
    fn test_fallback_triggers_on_error_variant() {
        let primary = MockSynthesizer::new().with_failure_on(0);
        let fallback = ToneSynthesizer::new(PayloadStore::Memory);
        let synth = FallbackSynthesizer::new(Box::new(primary.clone()), Box::new(fallback));

        assert_eq!(synth.name(), "mock+tone");
        let payload = synth.synthesize(&chunk(0, "hi")).unwrap();
        // Tone output is a WAV, mock output would be "0"
        assert!(payload.byte_len().unwrap() > 1);
        assert_eq!(primary.calls(), vec![0]);

        // Success from primary is returned as is
        let payload = synth.synthesize(&chunk(1, "hi")).unwrap();
        assert_eq!(payload.byte_len(), Some(1));
    }

    #[test]
    fn test_fallback_skips_unavailable_primary() {
        let primary = MockSynthesizer::new().unavailable();
        let synth = FallbackSynthesizer::new(
            Box::new(primary.clone()),
            Box::new(ToneSynthesizer::new(PayloadStore::Memory)),
        );
        assert!(synth.is_available());
        synth.synthesize(&chunk(0, "hi")).unwrap();
        assert!(primary.calls().is_empty());
    }

    #[test]
    fn test_mock_failure_and_payload() {
        let synth = MockSynthesizer::new().with_failure_on(2);
        let payload = synth.synthesize(&chunk(1, "a")).unwrap();
        let AudioPayload::Memory(bytes) = payload else {
            panic!("expected memory payload");
        };
        assert_eq!(bytes, b"1");
        assert!(synth.synthesize(&chunk(2, "b")).is_err());
        assert_eq!(synth.calls(), vec![1, 2]);
    }

    #[test]
    fn test_gate_blocks_until_opened() {
        let synth = MockSynthesizer::new();
        let gate = synth.gate();
        gate.close();

        let worker = {
            let synth = synth.clone();
            std::thread::spawn(move || synth.synthesize(&TextChunk::new(0, "x")).is_ok())
        };
        std::thread::sleep(Duration::from_millis(100));
        assert!(synth.is_synthesizing());
        gate.open();
        assert!(worker.join().unwrap());
        assert!(!synth.is_synthesizing());
    }

    #[test]
    fn test_command_on_path() {
        assert!(!command_on_path("voxline-no-such-program"));
        #[cfg(unix)]
        assert!(command_on_path("sh"));
    }
}
