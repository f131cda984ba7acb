//! One conversational turn: reply → speak → persist.
//!
//! Only reply generation can fail a turn. Speech and persistence problems are
//! logged and reflected in the [`TurnOutcome`].

use crate::config::ConversationConfig;
use crate::defaults;
use crate::error::Result;
use crate::history::{ConversationRecord, ConversationSink, ServiceNames};
use crate::reply::{Reply, Responder};
use crate::tts::streaming::StreamingTts;
use crate::tts::types::ProgressCallback;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// `session_<unix seconds>`.
pub fn new_session_id() -> String {
    format!(
        "{}{}",
        defaults::SESSION_PREFIX,
        chrono::Utc::now().timestamp()
    )
}

/// What happened during one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub reply: Reply,
    pub reply_time: Duration,
    /// Speech started for the reply.
    pub spoken: bool,
    /// The turn reached the history sink.
    pub saved: bool,
}

/// Running totals for a conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationStats {
    pub turns: usize,
    pub failed_replies: usize,
    pub unsaved_turns: usize,
    pub total_reply_time: Duration,
    pub total_speech_time: Duration,
    pub elapsed: Duration,
}

impl ConversationStats {
    pub fn avg_reply_time(&self) -> Option<Duration> {
        (self.turns > 0).then(|| self.total_reply_time / self.turns as u32)
    }

    pub fn avg_speech_time(&self) -> Option<Duration> {
        (self.turns > 0).then(|| self.total_speech_time / self.turns as u32)
    }

    pub fn turns_per_minute(&self) -> f64 {
        let minutes = self.elapsed.as_secs_f64() / 60.0;
        if minutes > 0.0 {
            self.turns as f64 / minutes
        } else {
            0.0
        }
    }
}

impl fmt::Display for ConversationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ms = |d: Option<Duration>| d.map_or("-".to_string(), |d| format!("{}ms", d.as_millis()));
        writeln!(f, "  turns:               {}", self.turns)?;
        if self.failed_replies > 0 {
            writeln!(f, "  failed replies:      {}", self.failed_replies)?;
        }
        if self.unsaved_turns > 0 {
            writeln!(f, "  unsaved turns:       {}", self.unsaved_turns)?;
        }
        writeln!(f, "  elapsed:             {:.1}s", self.elapsed.as_secs_f64())?;
        writeln!(f, "  avg reply time:      {}", ms(self.avg_reply_time()))?;
        writeln!(f, "  avg speech time:     {}", ms(self.avg_speech_time()))?;
        write!(f, "  turns per minute:    {:.1}", self.turns_per_minute())
    }
}

#[derive(Debug, Default)]
struct Totals {
    turns: usize,
    failed_replies: usize,
    unsaved_turns: usize,
    reply_time: Duration,
    speech_time: Duration,
    /// Speech was started and its time is not yet counted.
    speech_pending: bool,
}

/// Drives turns against a responder, an optional speech pipeline and an
/// optional history sink.
pub struct Conversation {
    responder: Arc<dyn Responder>,
    speech: Option<Arc<StreamingTts>>,
    sink: Option<Arc<dyn ConversationSink>>,
    session_id: String,
    user_id: String,
    timeout: Option<Duration>,
    started: Instant,
    progress: Option<ProgressCallback>,
    totals: Mutex<Totals>,
}

impl Conversation {
    pub fn new(responder: Arc<dyn Responder>, config: &ConversationConfig) -> Self {
        Self {
            responder,
            speech: None,
            sink: None,
            session_id: new_session_id(),
            user_id: config.user_id.clone(),
            timeout: config.timeout(),
            started: Instant::now(),
            progress: None,
            totals: Mutex::new(Totals::default()),
        }
    }

    /// Speaks replies through `speech`.
    pub fn with_speech(mut self, speech: Arc<StreamingTts>) -> Self {
        self.speech = Some(speech);
        self
    }

    /// Saves every turn to `sink`.
    pub fn with_history(mut self, sink: Arc<dyn ConversationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Progress callback passed to each speech run.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn speech(&self) -> Option<&Arc<StreamingTts>> {
        self.speech.as_ref()
    }

    fn totals(&self) -> MutexGuard<'_, Totals> {
        self.totals.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the conversation has run longer than its timeout.
    pub fn is_timed_out(&self) -> bool {
        self.timeout.is_some_and(|t| self.started.elapsed() > t)
    }

    /// Replies to `message`, speaks the reply, and records the turn.
    ///
    /// Waits for the previous reply to finish speaking first.
    pub fn turn(&self, message: &str) -> Result<TurnOutcome> {
        self.wait_for_speech(None);

        let began = Instant::now();
        let reply = match self.responder.generate_reply(message) {
            Ok(reply) => reply,
            Err(e) => {
                self.totals().failed_replies += 1;
                return Err(e.into());
            }
        };
        let reply_time = began.elapsed();
        tracing::debug!(
            responder = %reply.responder,
            reply_ms = reply_time.as_millis() as u64,
            "reply generated"
        );

        let spoken = self.speak(&reply.text);
        let saved = self.persist(message, &reply, reply_time, spoken);

        let mut totals = self.totals();
        totals.turns += 1;
        totals.reply_time += reply_time;
        if spoken {
            totals.speech_pending = true;
        }
        if !saved && self.sink.is_some() {
            totals.unsaved_turns += 1;
        }
        drop(totals);

        Ok(TurnOutcome {
            reply,
            reply_time,
            spoken,
            saved,
        })
    }

    fn speak(&self, text: &str) -> bool {
        let Some(speech) = &self.speech else {
            return false;
        };
        match speech.run(text, self.progress.clone()) {
            Ok(started) => started,
            Err(e) => {
                tracing::warn!(error = %e, "reply not spoken");
                false
            }
        }
    }

    fn persist(&self, message: &str, reply: &Reply, reply_time: Duration, spoken: bool) -> bool {
        let Some(sink) = &self.sink else {
            return false;
        };
        let services = ServiceNames {
            asr: None,
            reply: Some(reply.responder.clone()),
            tts: self
                .speech
                .as_ref()
                .map(|s| s.synthesizer().name().to_string()),
        };
        let record = ConversationRecord::new(&self.session_id, &self.user_id, message, &reply.text)
            .with_services(services)
            .with_metadata("reply_ms", reply_time.as_millis() as u64)
            .with_metadata("spoken", spoken);
        match sink.save(&record) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(session = %self.session_id, error = %e, "conversation turn not saved");
                false
            }
        }
    }

    /// Waits until the current reply has finished speaking. Returns false on
    /// timeout.
    pub fn wait_for_speech(&self, timeout: Option<Duration>) -> bool {
        let Some(speech) = &self.speech else {
            return true;
        };
        if !speech.wait(timeout) {
            return false;
        }
        let mut totals = self.totals();
        if totals.speech_pending {
            totals.speech_pending = false;
            totals.speech_time += speech.stats().elapsed;
        }
        true
    }

    /// Cuts off the reply being spoken.
    pub fn stop_speaking(&self) -> bool {
        let stopped = self.speech.as_ref().is_some_and(|s| s.cancel());
        if stopped {
            let mut totals = self.totals();
            if totals.speech_pending
                && let Some(speech) = &self.speech
            {
                totals.speech_pending = false;
                totals.speech_time += speech.stats().elapsed;
            }
        }
        stopped
    }

    pub fn stats(&self) -> ConversationStats {
        let totals = self.totals();
        ConversationStats {
            turns: totals.turns,
            failed_replies: totals.failed_replies,
            unsaved_turns: totals.unsaved_turns,
            total_reply_time: totals.reply_time,
            total_speech_time: totals.speech_time,
            elapsed: self.started.elapsed(),
        }
    }
}
