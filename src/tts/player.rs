//! Audio output backends.

use crate::defaults;
use crate::tts::error::PlaybackError;
use crate::tts::synthesizer::{Gate, command_on_path};
use crate::tts::types::AudioPayload;
use std::collections::HashSet;
use std::io::Write;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Trait for audio playback.
///
/// `play` blocks until the payload finished playing or `stop` was called.
/// `stop` must be safe to call from another thread at any time.
pub trait Player: Send + Sync {
    /// Play one payload to completion.
    fn play(&self, audio: &AudioPayload) -> Result<(), PlaybackError>;

    /// Interrupt the current `play` call, if any.
    fn stop(&self);

    /// Player name for logs and reports.
    fn name(&self) -> &str;

    /// Whether the output device or program is usable.
    fn is_available(&self) -> bool;
}

impl<T: Player + ?Sized> Player for Arc<T> {
    fn play(&self, audio: &AudioPayload) -> Result<(), PlaybackError> {
        (**self).play(audio)
    }

    fn stop(&self) {
        (**self).stop()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }
}

impl<T: Player + ?Sized> Player for Box<T> {
    fn play(&self, audio: &AudioPayload) -> Result<(), PlaybackError> {
        (**self).play(audio)
    }

    fn stop(&self) {
        (**self).stop()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }
}

/// Counts `stop` calls so a `play` call can tell whether it was interrupted.
#[derive(Debug, Default)]
struct StopSignal {
    generation: AtomicU64,
}

impl StopSignal {
    fn current(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn raise(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn raised_since(&self, generation: u64) -> bool {
        self.current() != generation
    }
}

/// Plays audio through an external program such as `aplay` or `afplay`.
///
/// Memory payloads are piped to stdin (the program must accept `-` or read
/// stdin by default); file payloads are passed as the last argument.
#[derive(Debug)]
pub struct CommandPlayer {
    name: String,
    program: String,
    args: Vec<String>,
    /// Whether the program can read audio from stdin.
    reads_stdin: bool,
    child: Mutex<Option<Child>>,
    stop_signal: StopSignal,
}

impl CommandPlayer {
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            reads_stdin: true,
            child: Mutex::new(None),
            stop_signal: StopSignal::default(),
        }
    }

    /// ALSA `aplay`.
    pub fn aplay() -> Self {
        Self::new("aplay", "aplay", vec!["-q".to_string()])
    }

    /// PulseAudio / PipeWire `paplay`.
    pub fn paplay() -> Self {
        Self::new("paplay", "paplay", Vec::new())
    }

    /// macOS `afplay`, which only plays files.
    pub fn afplay() -> Self {
        Self::new("afplay", "afplay", Vec::new()).file_only()
    }

    /// Marks the program as unable to read stdin; memory payloads are spilled
    /// to a temp file first.
    pub fn file_only(mut self) -> Self {
        self.reads_stdin = false;
        self
    }

    fn failed(&self, message: impl Into<String>) -> PlaybackError {
        PlaybackError::Failed {
            player: self.name.clone(),
            message: message.into(),
        }
    }

    fn spawn(&self, audio: &AudioPayload) -> Result<(Child, Option<tempfile::TempPath>), PlaybackError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut spill = None;
        match audio {
            AudioPayload::File(path) => {
                command.arg(&**path).stdin(Stdio::null());
            }
            AudioPayload::Memory(bytes) if !self.reads_stdin => {
                let path = tempfile::Builder::new()
                    .prefix(defaults::SCRATCH_PREFIX)
                    .suffix(".wav")
                    .tempfile()?
                    .into_temp_path();
                std::fs::write(&path, bytes)?;
                command.arg(&*path).stdin(Stdio::null());
                spill = Some(path);
            }
            AudioPayload::Memory(_) => {
                command.stdin(Stdio::piped());
            }
        }

        let child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PlaybackError::Unavailable {
                    player: self.name.clone(),
                    reason: format!("{} not found on PATH", self.program),
                }
            } else {
                PlaybackError::Io(e)
            }
        })?;
        Ok((child, spill))
    }
}

impl Player for CommandPlayer {
    fn play(&self, audio: &AudioPayload) -> Result<(), PlaybackError> {
        let generation = self.stop_signal.current();
        let (mut child, _spill) = self.spawn(audio)?;

        // Feed stdin outside the lock so stop() can still kill the child.
        let stdin = child.stdin.take();
        let stderr = child.stderr.take();
        {
            let mut slot = self
                .child
                .lock()
                .map_err(|_| self.failed("player state poisoned"))?;
            *slot = Some(child);
        }
        if self.stop_signal.raised_since(generation) {
            self.stop();
        }
        if let (Some(mut stdin), AudioPayload::Memory(bytes)) = (stdin, audio)
            && let Err(e) = stdin.write_all(bytes)
            && e.kind() != std::io::ErrorKind::BrokenPipe
        {
            tracing::debug!(player = %self.name, error = %e, "writing audio to player failed");
        }

        let status = loop {
            let polled = {
                let mut slot = self
                    .child
                    .lock()
                    .map_err(|_| self.failed("player state poisoned"))?;
                match slot.as_mut() {
                    Some(child) => child.try_wait()?,
                    None => return Err(PlaybackError::Stopped),
                }
            };
            if let Some(status) = polled {
                break status;
            }
            std::thread::sleep(Duration::from_millis(10));
        };

        if let Ok(mut slot) = self.child.lock() {
            slot.take();
        }
        if self.stop_signal.raised_since(generation) {
            return Err(PlaybackError::Stopped);
        }
        if !status.success() {
            let message = stderr
                .and_then(|mut s| {
                    let mut buf = String::new();
                    std::io::Read::read_to_string(&mut s, &mut buf).ok()?;
                    Some(buf.trim().to_string())
                })
                .unwrap_or_default();
            return Err(self.failed(format!("{} exited with {status}: {message}", self.program)));
        }
        Ok(())
    }

    fn stop(&self) {
        self.stop_signal.raise();
        if let Ok(mut slot) = self.child.lock()
            && let Some(child) = slot.as_mut()
        {
            if let Err(e) = child.kill() {
                tracing::debug!(player = %self.name, error = %e, "killing player failed");
            }
            // Reap so the process does not linger as a zombie
            if let Err(e) = child.wait() {
                tracing::debug!(player = %self.name, error = %e, "reaping player failed");
            }
            slot.take();
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        command_on_path(&self.program)
    }
}

/// Discards audio. Useful for `--silent` runs and for benchmarking synthesis.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPlayer;

impl Player for NullPlayer {
    fn play(&self, _audio: &AudioPayload) -> Result<(), PlaybackError> {
        Ok(())
    }

    fn stop(&self) {}

    fn name(&self) -> &str {
        "null"
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Mock player for testing.
///
/// Decodes payloads written by [`crate::tts::synthesizer::MockSynthesizer`]
/// back to chunk indices and records the order they were played in.
#[derive(Debug, Clone, Default)]
pub struct MockPlayer {
    duration: Duration,
    fail_on: HashSet<usize>,
    unavailable: bool,
    ignores_stop: bool,
    gate: Arc<Gate>,
    played: Arc<Mutex<Vec<usize>>>,
    started: Arc<Mutex<Vec<usize>>>,
    playing: Arc<AtomicUsize>,
    max_concurrent: Arc<AtomicUsize>,
    stopped: Arc<AtomicBool>,
    stop_signal: Arc<StopSignal>,
}

impl MockPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each `play` call takes this long unless stopped.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Fail playback of the given chunk index.
    pub fn with_failure_on(mut self, index: usize) -> Self {
        self.fail_on.insert(index);
        self
    }

    /// Report the device as unavailable.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    /// Record `stop` calls but keep playing, like a device that cannot be
    /// interrupted.
    pub fn ignoring_stop(mut self) -> Self {
        self.ignores_stop = true;
        self
    }

    /// Gate that holds every `play` call at its start while closed.
    pub fn gate(&self) -> Arc<Gate> {
        self.gate.clone()
    }

    /// Indices that finished playing successfully, in order.
    pub fn played(&self) -> Vec<usize> {
        self.played.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Indices whose playback started, in order.
    pub fn started(&self) -> Vec<usize> {
        self.started.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Highest number of simultaneous `play` calls observed.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    /// Whether `stop` was ever called.
    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn decode(audio: &AudioPayload) -> Result<usize, PlaybackError> {
        let bytes = match audio {
            AudioPayload::Memory(bytes) => bytes.clone(),
            AudioPayload::File(path) => std::fs::read(path)?,
        };
        String::from_utf8_lossy(&bytes)
            .trim()
            .parse()
            .map_err(|e| PlaybackError::Decode {
                message: format!("mock payload is not an index: {e}"),
            })
    }
}

impl Player for MockPlayer {
    fn play(&self, audio: &AudioPayload) -> Result<(), PlaybackError> {
        let generation = self.stop_signal.current();
        let index = Self::decode(audio)?;

        let now_playing = self.playing.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now_playing, Ordering::SeqCst);
        if let Ok(mut started) = self.started.lock() {
            started.push(index);
        }

        self.gate
            .wait_while_closed(|| self.stop_signal.raised_since(generation));

        let mut remaining = self.duration;
        while !remaining.is_zero() && !self.stop_signal.raised_since(generation) {
            let step = remaining.min(Duration::from_millis(5));
            std::thread::sleep(step);
            remaining -= step;
        }

        self.playing.fetch_sub(1, Ordering::SeqCst);

        if self.stop_signal.raised_since(generation) {
            return Err(PlaybackError::Stopped);
        }
        if self.fail_on.contains(&index) {
            return Err(PlaybackError::Failed {
                player: "mock".to_string(),
                message: format!("mock failure on chunk {index}"),
            });
        }
        if let Ok(mut played) = self.played.lock() {
            played.push(index);
        }
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if !self.ignores_stop {
            self.stop_signal.raise();
        }
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn is_available(&self) -> bool {
        !self.unavailable
    }
}
