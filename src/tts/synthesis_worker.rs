//! Synthesis stage: text chunks in, audio chunks onto the playback queue.

use crate::tts::cancel::CancelToken;
use crate::tts::error::{ErrorReporter, WorkerError};
use crate::tts::stats::RunStats;
use crate::tts::synthesizer::Synthesizer;
use crate::tts::types::{AudioChunk, Handoff, ProgressCallback, TextChunk};
use crossbeam_channel::{SendTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Synthesizes chunks in index order and hands each off as soon as it is ready.
pub(crate) struct SynthesisWorker {
    pub synthesizer: Arc<dyn Synthesizer>,
    pub chunks: Vec<TextChunk>,
    pub tx: Sender<Handoff>,
    pub cancel: CancelToken,
    pub stats: Arc<RunStats>,
    pub reporter: Arc<dyn ErrorReporter>,
    pub progress: Option<ProgressCallback>,
    pub poll_interval: Duration,
}

impl SynthesisWorker {
    pub const NAME: &'static str = "synthesis";

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("voxline-synthesis".to_string())
            .spawn(move || self.run())
    }

    fn run(self) {
        let total = self.chunks.len();
        for chunk in &self.chunks {
            if self.cancel.is_cancelled() {
                tracing::debug!(index = chunk.index, "synthesis cancelled");
                break;
            }

            let started = Instant::now();
            let result = self.synthesizer.synthesize(chunk);
            let elapsed = started.elapsed();
            self.stats.add_synthesis_time(elapsed);

            let payload = match result {
                Ok(payload) => payload,
                Err(e) => {
                    self.stats.record_synthesis_failure();
                    self.reporter.report(
                        Self::NAME,
                        &WorkerError::Recoverable(format!("chunk {} skipped: {e}", chunk.index)),
                    );
                    continue;
                }
            };

            let mut audio = AudioChunk::new(chunk.clone(), payload, elapsed);
            // Audio finished after cancellation is never queued
            if self.cancel.is_cancelled() {
                audio.release();
                break;
            }

            let ready = audio.created_at;
            match self.enqueue(Handoff::Chunk(audio)) {
                Ok(()) => {
                    let done = self.stats.record_synthesized(ready);
                    tracing::debug!(
                        index = chunk.index,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "chunk synthesized"
                    );
                    if let Some(progress) = &self.progress {
                        let fraction = done as f32 / total as f32;
                        progress(fraction, &format!("Synthesized chunk {done}/{total}"));
                    }
                }
                Err(rejected) => {
                    rejected.release();
                    break;
                }
            }
        }

        self.finish();
    }

    /// Blocks while the queue is full, waking up to check for cancellation.
    /// Gives the item back if the run was cancelled or the queue closed.
    fn enqueue(&self, mut item: Handoff) -> Result<(), Handoff> {
        loop {
            match self.tx.send_timeout(item, self.poll_interval) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(back)) => {
                    if self.cancel.is_cancelled() {
                        return Err(back);
                    }
                    item = back;
                }
                Err(SendTimeoutError::Disconnected(back)) => return Err(back),
            }
        }
    }

    /// Signals end-of-stream. After cancellation the playback side is already
    /// leaving, so the sentinel is only offered without blocking.
    fn finish(&self) {
        let delivered = if self.cancel.is_cancelled() {
            self.tx.try_send(Handoff::EndOfStream).is_ok()
        } else {
            self.enqueue(Handoff::EndOfStream).is_ok()
        };
        if !delivered {
            tracing::debug!("end-of-stream not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults;
    use crate::tts::error::LogReporter;
    use crate::tts::synthesizer::MockSynthesizer;
    use crossbeam_channel::bounded;
    use std::sync::Mutex;

    fn chunks(n: usize) -> Vec<TextChunk> {
        (0..n).map(|i| TextChunk::new(i, format!("chunk {i}"))).collect()
    }

    fn worker(
        synth: MockSynthesizer,
        n: usize,
        tx: Sender<Handoff>,
        cancel: CancelToken,
        stats: Arc<RunStats>,
    ) -> SynthesisWorker {
        SynthesisWorker {
            synthesizer: Arc::new(synth),
            chunks: chunks(n),
            tx,
            cancel,
            stats,
            reporter: Arc::new(LogReporter),
            progress: None,
            poll_interval: Duration::from_millis(10),
        }
    }

    fn collect(rx: &crossbeam_channel::Receiver<Handoff>) -> (Vec<usize>, bool) {
        let mut indices = Vec::new();
        let mut ended = false;
        while let Ok(item) = rx.recv_timeout(Duration::from_secs(2)) {
            match item {
                Handoff::Chunk(chunk) => indices.push(chunk.index),
                Handoff::EndOfStream => {
                    ended = true;
                    break;
                }
            }
        }
        (indices, ended)
    }

    #[test]
    fn test_enqueues_in_order_then_sentinel() {
        let (tx, rx) = bounded(16);
        let stats = Arc::new(RunStats::new(4));
        worker(MockSynthesizer::new(), 4, tx, CancelToken::new(), stats.clone())
            .spawn()
            .unwrap()
            .join()
            .unwrap();

        let (indices, ended) = collect(&rx);
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert!(ended);
        assert_eq!(stats.snapshot().synthesized_count, 4);
        assert!(stats.snapshot().first_audio.is_some());
    }

    #[test]
    fn test_failed_chunk_is_skipped() {
        let (tx, rx) = bounded(16);
        let stats = Arc::new(RunStats::new(5));
        worker(
            MockSynthesizer::new().with_failure_on(2),
            5,
            tx,
            CancelToken::new(),
            stats.clone(),
        )
        .spawn()
        .unwrap()
        .join()
        .unwrap();

        let (indices, ended) = collect(&rx);
        assert_eq!(indices, vec![0, 1, 3, 4]);
        assert!(ended);
        let snap = stats.snapshot();
        assert_eq!(snap.synthesized_count, 4);
        assert_eq!(snap.failed_syntheses, 1);
    }

    #[test]
    fn test_progress_reports_fraction() {
        let (tx, _rx) = bounded(16);
        let seen: Arc<Mutex<Vec<(f32, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut w = worker(
            MockSynthesizer::new(),
            4,
            tx,
            CancelToken::new(),
            Arc::new(RunStats::new(4)),
        );
        w.progress = Some(Arc::new(move |fraction, message: &str| {
            sink.lock().unwrap().push((fraction, message.to_string()));
        }));
        w.spawn().unwrap().join().unwrap();

        let seen = seen.lock().unwrap();
        let fractions: Vec<f32> = seen.iter().map(|(f, _)| *f).collect();
        assert_eq!(fractions, vec![0.25, 0.5, 0.75, 1.0]);
        assert_eq!(seen[3].1, "Synthesized chunk 4/4");
    }

    #[test]
    fn test_blocks_when_queue_full() {
        let (tx, rx) = bounded(2);
        let synth = MockSynthesizer::new();
        let stats = Arc::new(RunStats::new(6));
        let handle = worker(synth.clone(), 6, tx, CancelToken::new(), stats.clone())
            .spawn()
            .unwrap();

        thread::sleep(Duration::from_millis(200));
        assert_eq!(rx.len(), 2);
        assert_eq!(stats.snapshot().synthesized_count, 2);
        // Third chunk synthesized and waiting for room
        assert_eq!(synth.calls(), vec![0, 1, 2]);

        let (indices, ended) = collect(&rx);
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
        assert!(ended);
        handle.join().unwrap();
    }

    #[test]
    fn test_cancel_unblocks_full_queue_and_releases() {
        let tmp = tempfile::tempdir().unwrap();
        let store = crate::tts::scratch::PayloadStore::Disk(crate::tts::scratch::ScratchDir::open(
            tmp.path(),
            defaults::STALE_AFTER,
        ));
        let synth = MockSynthesizer::new().with_store(store);
        let (tx, rx) = bounded(1);
        let cancel = CancelToken::new();
        let handle = worker(synth.clone(), 5, tx, cancel.clone(), Arc::new(RunStats::new(5)))
            .spawn()
            .unwrap();

        thread::sleep(Duration::from_millis(100));
        cancel.cancel();
        handle.join().unwrap();

        // Chunk 0 sits in the queue; chunk 1 was rejected and released
        assert_eq!(synth.calls(), vec![0, 1]);
        let files = synth.created_files();
        assert_eq!(files.len(), 2);
        assert!(files[0].exists());
        assert!(!files[1].exists());

        while let Ok(item) = rx.try_recv() {
            item.release();
        }
        assert!(!files[0].exists());
    }

    #[test]
    fn test_cancel_before_start_sends_nothing_but_sentinel() {
        let (tx, rx) = bounded(4);
        let cancel = CancelToken::new();
        cancel.cancel();
        let synth = MockSynthesizer::new();
        worker(synth.clone(), 3, tx, cancel, Arc::new(RunStats::new(3)))
            .spawn()
            .unwrap()
            .join()
            .unwrap();

        assert!(synth.calls().is_empty());
        assert!(matches!(rx.try_recv(), Ok(Handoff::EndOfStream)));
    }
}
