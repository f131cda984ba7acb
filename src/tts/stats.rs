//! Per-run statistics for the streaming speech pipeline.
//!
//! Every counter has a single writer: synthesis counters belong to the
//! synthesis worker, playback counters to the playback worker. Readers take
//! a [`PipelineRunStats`] snapshot, which may be momentarily stale.

use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Live counters for one run.
#[derive(Debug)]
pub struct RunStats {
    started: Instant,
    total_chunks: usize,
    synthesized: AtomicUsize,
    synthesis_failures: AtomicUsize,
    played: AtomicUsize,
    playback_failures: AtomicUsize,
    synthesis_micros: AtomicU64,
    playback_micros: AtomicU64,
    first_audio: OnceLock<Duration>,
    first_playback: OnceLock<Duration>,
    finished: OnceLock<Duration>,
}

impl RunStats {
    /// Starts the clock for a run of `total_chunks` chunks.
    pub fn new(total_chunks: usize) -> Self {
        Self {
            started: Instant::now(),
            total_chunks,
            synthesized: AtomicUsize::new(0),
            synthesis_failures: AtomicUsize::new(0),
            played: AtomicUsize::new(0),
            playback_failures: AtomicUsize::new(0),
            synthesis_micros: AtomicU64::new(0),
            playback_micros: AtomicU64::new(0),
            first_audio: OnceLock::new(),
            first_playback: OnceLock::new(),
            finished: OnceLock::new(),
        }
    }

    /// When the run started.
    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn total_chunks(&self) -> usize {
        self.total_chunks
    }

    /// A chunk left the synthesis stage; `ready` is when its audio was ready.
    /// Returns the new synthesized count.
    pub(crate) fn record_synthesized(&self, ready: Instant) -> usize {
        self.first_audio
            .get_or_init(|| ready.saturating_duration_since(self.started));
        self.synthesized.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn record_synthesis_failure(&self) {
        self.synthesis_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn add_synthesis_time(&self, elapsed: Duration) {
        self.synthesis_micros
            .fetch_add(micros(elapsed), Ordering::Relaxed);
    }

    /// A chunk finished playing; `began` is when its playback started.
    pub(crate) fn record_played(&self, began: Instant) {
        self.first_playback
            .get_or_init(|| began.saturating_duration_since(self.started));
        self.played.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_playback_failure(&self) {
        self.playback_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn add_playback_time(&self, elapsed: Duration) {
        self.playback_micros
            .fetch_add(micros(elapsed), Ordering::Relaxed);
    }

    /// Freezes the elapsed time. Later calls are ignored.
    pub(crate) fn finish(&self) {
        self.finished.get_or_init(|| self.started.elapsed());
    }

    /// Takes a consistent-enough copy of the counters.
    pub fn snapshot(&self) -> PipelineRunStats {
        PipelineRunStats {
            total_chunks: self.total_chunks,
            synthesized_count: self.synthesized.load(Ordering::SeqCst),
            failed_syntheses: self.synthesis_failures.load(Ordering::SeqCst),
            played_count: self.played.load(Ordering::SeqCst),
            failed_playbacks: self.playback_failures.load(Ordering::SeqCst),
            first_audio: self.first_audio.get().copied(),
            first_playback: self.first_playback.get().copied(),
            total_synthesis_time: Duration::from_micros(
                self.synthesis_micros.load(Ordering::Relaxed),
            ),
            total_playback_time: Duration::from_micros(self.playback_micros.load(Ordering::Relaxed)),
            elapsed: self
                .finished
                .get()
                .copied()
                .unwrap_or_else(|| self.started.elapsed()),
        }
    }
}

fn micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

/// Snapshot of one run's statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineRunStats {
    pub total_chunks: usize,
    pub synthesized_count: usize,
    pub failed_syntheses: usize,
    pub played_count: usize,
    pub failed_playbacks: usize,
    /// Time from run start until the first chunk left the synthesis stage.
    pub first_audio: Option<Duration>,
    /// Time from run start until the first successfully played chunk began.
    pub first_playback: Option<Duration>,
    pub total_synthesis_time: Duration,
    pub total_playback_time: Duration,
    /// Run duration so far, or the final duration once the run ended.
    pub elapsed: Duration,
}

impl PipelineRunStats {
    /// Average synthesis time per synthesized chunk.
    pub fn avg_synthesis_time(&self) -> Option<Duration> {
        average(self.total_synthesis_time, self.synthesized_count)
    }

    /// Average playback time per played chunk.
    pub fn avg_playback_time(&self) -> Option<Duration> {
        average(self.total_playback_time, self.played_count)
    }

    /// Percentage of waiting saved versus synthesizing everything before
    /// speaking: `(elapsed - first_playback) / elapsed * 100`.
    pub fn latency_improvement(&self) -> Option<f64> {
        let first = self.first_playback?;
        if self.elapsed.is_zero() {
            return None;
        }
        let total = self.elapsed.as_secs_f64();
        Some((total - first.as_secs_f64()) / total * 100.0)
    }
}

fn average(total: Duration, count: usize) -> Option<Duration> {
    let count = u32::try_from(count).ok().filter(|&c| c > 0)?;
    Some(total / count)
}

fn secs(d: Option<Duration>) -> f64 {
    d.map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

impl fmt::Display for PipelineRunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Streaming speech statistics:")?;
        writeln!(f, "  chunks:              {}", self.total_chunks)?;
        writeln!(
            f,
            "  synthesized:         {} ({} failed)",
            self.synthesized_count, self.failed_syntheses
        )?;
        writeln!(
            f,
            "  played:              {} ({} failed)",
            self.played_count, self.failed_playbacks
        )?;
        writeln!(f, "  first audio after:   {:.2}s", secs(self.first_audio))?;
        writeln!(f, "  first playback after:{:>6.2}s", secs(self.first_playback))?;
        writeln!(
            f,
            "  synthesis time:      {:.2}s",
            self.total_synthesis_time.as_secs_f64()
        )?;
        writeln!(
            f,
            "  playback time:       {:.2}s",
            self.total_playback_time.as_secs_f64()
        )?;
        write!(f, "  total:               {:.2}s", self.elapsed.as_secs_f64())?;
        if let Some(avg) = self.avg_synthesis_time() {
            write!(f, "\n  avg synthesis:       {:.2}s/chunk", avg.as_secs_f64())?;
        }
        if let Some(avg) = self.avg_playback_time() {
            write!(f, "\n  avg playback:        {:.2}s/chunk", avg.as_secs_f64())?;
        }
        if let Some(improvement) = self.latency_improvement() {
            write!(f, "\n  latency saved:       {improvement:.1}%")?;
        }
        Ok(())
    }
}
