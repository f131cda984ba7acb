//! Streaming speech pipeline: chunk → synthesize ∥ play.
//!
//! [`StreamingTts::run`] splits the text, then starts two threads joined by a
//! bounded queue. The synthesis thread blocks when the queue is full, so at
//! most `queue_size` chunks wait ahead of playback. `run` returns as soon as
//! both threads are started.

use crate::config::TtsConfig;
use crate::defaults;
use crate::error::{Result, VoxlineError};
use crate::tts::cancel::CancelToken;
use crate::tts::chunker::chunk_text;
use crate::tts::error::{ErrorReporter, LogReporter};
use crate::tts::playback_worker::{FinishGuard, PlaybackWorker};
use crate::tts::player::Player;
use crate::tts::stats::{PipelineRunStats, RunStats};
use crate::tts::synthesis_worker::SynthesisWorker;
use crate::tts::synthesizer::Synthesizer;
use crate::tts::types::{Handoff, ProgressCallback};
use crossbeam_channel::{Receiver, bounded};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Lifecycle of the most recent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    Idle = 0,
    Chunking = 1,
    Streaming = 2,
    Completed = 3,
    Cancelled = 4,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Chunking,
            2 => Self::Streaming,
            3 => Self::Completed,
            4 => Self::Cancelled,
            _ => Self::Idle,
        }
    }

    /// Whether a run is in progress.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Chunking | Self::Streaming)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Chunking => "chunking",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Knobs that shape a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingOptions {
    /// Maximum chunk length in characters.
    pub max_chunk_size: usize,
    /// Capacity of the synthesis → playback queue.
    pub queue_size: usize,
    /// How long `cancel` waits for the workers before detaching them.
    pub join_timeout: Duration,
    /// How often blocked workers wake up to check for cancellation.
    pub poll_interval: Duration,
}

impl Default for StreamingOptions {
    fn default() -> Self {
        Self {
            max_chunk_size: defaults::MAX_CHUNK_SIZE,
            queue_size: defaults::QUEUE_SIZE,
            join_timeout: defaults::JOIN_TIMEOUT,
            poll_interval: defaults::POLL_INTERVAL,
        }
    }
}

impl StreamingOptions {
    pub fn from_config(config: &TtsConfig) -> Self {
        Self {
            max_chunk_size: config.max_chunk_size.max(1),
            queue_size: config.queue_size.max(1),
            join_timeout: config.join_timeout(),
            poll_interval: defaults::POLL_INTERVAL,
        }
    }
}

/// Resources of the current run, guarded by the coordinator's mutex.
#[derive(Default)]
struct RunSlot {
    cancel: CancelToken,
    rx: Option<Receiver<Handoff>>,
    workers: Vec<JoinHandle<()>>,
    /// Workers of a cancelled run that have not exited yet. No new run may
    /// start until they are gone.
    stopping: Vec<JoinHandle<()>>,
    stats: Option<Arc<RunStats>>,
}

impl RunSlot {
    /// Joins stopping workers that have exited. Returns how many are left.
    fn reap_stopping(&mut self) -> usize {
        let mut remaining = Vec::new();
        for handle in self.stopping.drain(..) {
            if handle.is_finished() {
                join_reporting_panic(handle);
            } else {
                remaining.push(handle);
            }
        }
        self.stopping = remaining;
        self.stopping.len()
    }

    fn drain(&self) -> usize {
        let Some(rx) = &self.rx else {
            return 0;
        };
        let mut released = 0;
        while let Ok(item) = rx.try_recv() {
            if matches!(item, Handoff::Chunk(_)) {
                released += 1;
            }
            item.release();
        }
        released
    }
}

/// Pipeline coordinator.
///
/// Owns the backends and at most one run at a time. A second `run` while one
/// is active is rejected with [`VoxlineError::PipelineBusy`].
pub struct StreamingTts {
    synthesizer: Arc<dyn Synthesizer>,
    player: Arc<dyn Player>,
    options: StreamingOptions,
    reporter: Arc<dyn ErrorReporter>,
    state: Arc<AtomicU8>,
    slot: Mutex<RunSlot>,
}

impl StreamingTts {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        player: Arc<dyn Player>,
        options: StreamingOptions,
    ) -> Self {
        Self {
            synthesizer,
            player,
            options,
            reporter: Arc::new(LogReporter),
            state: Arc::new(AtomicU8::new(PipelineState::Idle as u8)),
            slot: Mutex::new(RunSlot::default()),
        }
    }

    /// Sets a custom error reporter for chunk-level failures.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn options(&self) -> &StreamingOptions {
        &self.options
    }

    pub fn synthesizer(&self) -> &Arc<dyn Synthesizer> {
        &self.synthesizer
    }

    pub fn player(&self) -> &Arc<dyn Player> {
        &self.player
    }

    fn lock_slot(&self) -> MutexGuard<'_, RunSlot> {
        // A poisoned slot still holds valid handles
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: PipelineState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Starts speaking `text`.
    ///
    /// Returns `Ok(true)` once both workers are running, `Ok(false)` when the
    /// text is blank and there is nothing to speak. Errors only for setup
    /// problems: another run is active or still shutting down, or a backend
    /// is unavailable.
    pub fn run(&self, text: &str, progress: Option<ProgressCallback>) -> Result<bool> {
        let mut slot = self.lock_slot();

        if self.state().is_active() {
            return Err(VoxlineError::PipelineBusy);
        }
        let stopping = slot.reap_stopping();
        if stopping > 0 {
            tracing::debug!(threads = stopping, "previous run still shutting down");
            return Err(VoxlineError::PipelineBusy);
        }
        self.set_state(PipelineState::Chunking);

        let chunks = chunk_text(text, self.options.max_chunk_size);
        if chunks.is_empty() {
            let stats = RunStats::new(0);
            stats.finish();
            slot.stats = Some(Arc::new(stats));
            self.set_state(PipelineState::Completed);
            tracing::debug!("nothing to speak");
            return Ok(false);
        }

        for (backend, available) in [
            (self.synthesizer.name(), self.synthesizer.is_available()),
            (self.player.name(), self.player.is_available()),
        ] {
            if !available {
                self.set_state(PipelineState::Idle);
                return Err(VoxlineError::BackendUnavailable {
                    backend: backend.to_string(),
                });
            }
        }

        // Workers of a finished run have exited or are about to
        for handle in slot.workers.drain(..) {
            join_reporting_panic(handle);
        }
        slot.drain();

        let total = chunks.len();
        let (tx, rx) = bounded(self.options.queue_size);
        let cancel = CancelToken::new();
        let stats = Arc::new(RunStats::new(total));
        slot.cancel = cancel.clone();
        slot.rx = Some(rx.clone());
        slot.stats = Some(stats.clone());

        self.set_state(PipelineState::Streaming);

        let synthesis = SynthesisWorker {
            synthesizer: self.synthesizer.clone(),
            chunks,
            tx,
            cancel: cancel.clone(),
            stats: stats.clone(),
            reporter: self.reporter.clone(),
            progress,
            poll_interval: self.options.poll_interval,
        };
        let playback = PlaybackWorker {
            player: self.player.clone(),
            rx,
            cancel: cancel.clone(),
            stats: stats.clone(),
            reporter: self.reporter.clone(),
            poll_interval: self.options.poll_interval,
            on_finish: self.finish_guard(cancel.clone(), stats.clone()),
        };

        match synthesis.spawn() {
            Ok(handle) => slot.workers.push(handle),
            Err(e) => return Err(self.abort_start(&mut slot, e)),
        }
        match playback.spawn() {
            Ok(handle) => slot.workers.push(handle),
            Err(e) => return Err(self.abort_start(&mut slot, e)),
        }

        tracing::info!(
            chunks = total,
            queue_size = self.options.queue_size,
            synthesizer = self.synthesizer.name(),
            player = self.player.name(),
            "speech run started"
        );
        Ok(true)
    }

    /// Completion hook run by the playback thread as it exits.
    fn finish_guard(&self, cancel: CancelToken, stats: Arc<RunStats>) -> FinishGuard {
        let state = self.state.clone();
        FinishGuard::new(move || {
            // Stops a synthesis thread still waiting on a queue nobody reads
            cancel.cancel();
            stats.finish();
            let completed = state
                .compare_exchange(
                    PipelineState::Streaming as u8,
                    PipelineState::Completed as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok();
            let snap = stats.snapshot();
            tracing::info!(
                completed,
                total = snap.total_chunks,
                synthesized = snap.synthesized_count,
                played = snap.played_count,
                elapsed_ms = snap.elapsed.as_millis() as u64,
                "speech run finished"
            );
        })
    }

    fn abort_start(&self, slot: &mut RunSlot, error: std::io::Error) -> VoxlineError {
        slot.cancel.cancel();
        if let Some(stats) = &slot.stats {
            stats.finish();
        }
        self.set_state(PipelineState::Idle);
        VoxlineError::WorkerSpawn {
            message: error.to_string(),
        }
    }

    /// Stops the current run.
    ///
    /// Playback is told to stop, queued chunks are released, and the workers
    /// get up to `join_timeout` to exit. Workers still running after that are
    /// detached, and `run` reports busy until they exit. The slot lock is only
    /// held between polls, so `stats` stays responsive. Returns true if a run
    /// was active.
    pub fn cancel(&self) -> bool {
        let (was_active, mut released) = {
            let mut slot = self.lock_slot();
            let was_active = [PipelineState::Streaming, PipelineState::Chunking]
                .into_iter()
                .any(|from| {
                    self.state
                        .compare_exchange(
                            from as u8,
                            PipelineState::Cancelled as u8,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        )
                        .is_ok()
                });

            slot.cancel.cancel();
            if was_active {
                self.player.stop();
            }
            let workers = std::mem::take(&mut slot.workers);
            slot.stopping.extend(workers);
            (was_active, slot.drain())
        };

        let deadline = Instant::now() + self.options.join_timeout;
        let mut slot = loop {
            let mut slot = self.lock_slot();
            released += slot.drain();

            let remaining = slot.reap_stopping();
            if remaining == 0 {
                break slot;
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    threads = remaining,
                    "speech workers still running after cancel, detaching"
                );
                break slot;
            }
            // A play call that began after the first stop has to be stopped too
            self.player.stop();
            drop(slot);
            thread::sleep(self.options.poll_interval.min(Duration::from_millis(10)));
        };

        if let Some(stats) = &slot.stats {
            stats.finish();
        }
        released += slot.drain();
        slot.rx = None;
        if was_active {
            tracing::info!(released, "speech run cancelled");
        }
        was_active
    }

    /// Whether a run is chunking or streaming.
    pub fn is_running(&self) -> bool {
        self.state().is_active()
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Snapshot of the latest run, or empty stats before the first run.
    pub fn stats(&self) -> PipelineRunStats {
        self.lock_slot()
            .stats
            .as_ref()
            .map(|s| s.snapshot())
            .unwrap_or_default()
    }

    /// Number of synthesized chunks waiting for playback.
    pub fn queued_chunks(&self) -> usize {
        self.lock_slot().rx.as_ref().map_or(0, Receiver::len)
    }

    /// Polls until the run is no longer active. Returns false on timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        while self.is_running() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return false;
            }
            thread::sleep(self.options.poll_interval.min(Duration::from_millis(10)));
        }
        true
    }

    /// First chunks of `text` as they would be spoken.
    pub fn preview(&self, text: &str) -> Vec<String> {
        chunk_text(text, self.options.max_chunk_size)
            .into_iter()
            .take(defaults::PREVIEW_CHUNKS)
            .map(|c| c.text)
            .collect()
    }
}

impl Drop for StreamingTts {
    fn drop(&mut self) {
        if self.is_running() {
            self.cancel();
        }
    }
}

fn join_reporting_panic(handle: JoinHandle<()>) {
    let name = handle.thread().name().unwrap_or("worker").to_string();
    if let Err(panic_info) = handle.join() {
        let msg = panic_info
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
            .unwrap_or("unknown panic");
        tracing::error!(thread = %name, "speech worker panicked: {msg}");
    }
}
