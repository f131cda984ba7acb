//! Playback stage: drains the queue and plays chunks one at a time.

use crate::tts::cancel::CancelToken;
use crate::tts::error::{ErrorReporter, PlaybackError, WorkerError};
use crate::tts::player::Player;
use crate::tts::stats::RunStats;
use crate::tts::types::Handoff;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Runs once when the playback thread exits, however it exits.
pub(crate) struct FinishGuard(Option<Box<dyn FnOnce() + Send>>);

impl FinishGuard {
    pub fn new(on_finish: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(on_finish)))
    }
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if let Some(on_finish) = self.0.take() {
            on_finish();
        }
    }
}

/// Plays chunks strictly in queue order, never two at once.
pub(crate) struct PlaybackWorker {
    pub player: Arc<dyn Player>,
    pub rx: Receiver<Handoff>,
    pub cancel: CancelToken,
    pub stats: Arc<RunStats>,
    pub reporter: Arc<dyn ErrorReporter>,
    pub poll_interval: Duration,
    pub on_finish: FinishGuard,
}

impl PlaybackWorker {
    pub const NAME: &'static str = "playback";

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("voxline-playback".to_string())
            .spawn(move || self.run())
    }

    fn run(self) {
        loop {
            let item = match self.rx.recv_timeout(self.poll_interval) {
                Ok(item) => item,
                Err(RecvTimeoutError::Timeout) => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let mut chunk = match item {
                Handoff::Chunk(chunk) => chunk,
                Handoff::EndOfStream => {
                    tracing::debug!("end of stream");
                    break;
                }
            };
            if self.cancel.is_cancelled() {
                chunk.release();
                break;
            }

            let Some(payload) = chunk.payload() else {
                continue;
            };
            let began = Instant::now();
            let result = self.player.play(payload);
            self.stats.add_playback_time(began.elapsed());
            let index = chunk.index;
            chunk.release();

            match result {
                Ok(()) => {
                    self.stats.record_played(began);
                    tracing::debug!(index, "chunk played");
                }
                Err(PlaybackError::Stopped) if self.cancel.is_cancelled() => break,
                Err(e) => {
                    self.stats.record_playback_failure();
                    self.reporter.report(
                        Self::NAME,
                        &WorkerError::Recoverable(format!("chunk {index} not played: {e}")),
                    );
                }
            }
        }

        // Anything still queued belongs to a cancelled run
        if self.cancel.is_cancelled() {
            while let Ok(item) = self.rx.try_recv() {
                item.release();
            }
        }
        drop(self.on_finish);
    }
}
