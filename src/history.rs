//! Conversation history.
//!
//! Each turn is saved as one [`ConversationRecord`]. [`JsonlHistory`] appends
//! records to a JSON-lines file; [`MemoryHistory`] keeps them in memory.

use crate::error::{Result, VoxlineError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Backends that took part in a turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceNames {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tts: Option<String>,
}

/// One user message and the reply to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub session_id: String,
    pub user_id: String,
    pub user_message: String,
    pub ai_response: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub services: ServiceNames,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ConversationRecord {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        user_message: impl Into<String>,
        ai_response: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            user_message: user_message.into(),
            ai_response: ai_response.into(),
            timestamp: Utc::now(),
            services: ServiceNames::default(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_services(mut self, services: ServiceNames) -> Self {
        self.services = services;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Filter for [`ConversationSink::query`]. Results are newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    /// Zero means no limit.
    pub limit: usize,
    pub offset: usize,
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            session_id: None,
            user_id: None,
            limit: 50,
            offset: 0,
        }
    }
}

impl HistoryQuery {
    fn matches(&self, record: &ConversationRecord) -> bool {
        self.session_id
            .as_ref()
            .is_none_or(|s| *s == record.session_id)
            && self.user_id.as_ref().is_none_or(|u| *u == record.user_id)
    }

    /// Sorts newest first, then applies offset and limit.
    fn apply(&self, mut records: Vec<ConversationRecord>) -> Vec<ConversationRecord> {
        records.retain(|r| self.matches(r));
        // Stable sort keeps later-written records first among equal timestamps
        records.reverse();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let take = if self.limit == 0 { usize::MAX } else { self.limit };
        records.into_iter().skip(self.offset).take(take).collect()
    }
}

/// Aggregate counts for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStats {
    pub total_messages: usize,
    pub total_sessions: usize,
    pub first_message: Option<DateTime<Utc>>,
    pub last_message: Option<DateTime<Utc>>,
}

/// Where conversation turns are persisted.
pub trait ConversationSink: Send + Sync {
    fn save(&self, record: &ConversationRecord) -> Result<()>;

    fn query(&self, query: &HistoryQuery) -> Result<Vec<ConversationRecord>>;

    /// Deletes records older than `cutoff`. Returns how many were removed.
    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    fn user_stats(&self, user_id: &str) -> Result<UserStats> {
        let records = self.query(&HistoryQuery {
            user_id: Some(user_id.to_string()),
            limit: 0,
            ..Default::default()
        })?;
        let sessions: BTreeSet<&str> = records.iter().map(|r| r.session_id.as_str()).collect();
        Ok(UserStats {
            total_messages: records.len(),
            total_sessions: sessions.len(),
            first_message: records.iter().map(|r| r.timestamp).min(),
            last_message: records.iter().map(|r| r.timestamp).max(),
        })
    }
}

/// Append-only JSON-lines file, one record per line.
pub struct JsonlHistory {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn history_error(&self, action: &str, e: impl std::fmt::Display) -> VoxlineError {
        VoxlineError::History {
            message: format!("failed to {action} {}: {e}", self.path.display()),
        }
    }

    fn load(&self) -> Result<Vec<ConversationRecord>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.history_error("open", e)),
        };

        let mut records = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| self.history_error("read", e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(
                    path = %self.path.display(),
                    line = number + 1,
                    error = %e,
                    "skipping corrupt history line"
                ),
            }
        }
        Ok(records)
    }
}

impl ConversationSink for JsonlHistory {
    fn save(&self, record: &ConversationRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| self.history_error("create", e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.history_error("open", e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| self.history_error("write", e))?;
        tracing::debug!(session = %record.session_id, "conversation turn saved");
        Ok(())
    }

    fn query(&self, query: &HistoryQuery) -> Result<Vec<ConversationRecord>> {
        Ok(query.apply(self.load()?))
    }

    /// Rewrites the file without old records. The new file replaces the old
    /// one in a single rename, so a crash never leaves a half-written log.
    /// Corrupt lines do not survive the rewrite.
    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut records = self.load()?;
        let before = records.len();
        records.retain(|r| r.timestamp >= cutoff);
        let removed = before - records.len();
        if removed == 0 {
            return Ok(0);
        }

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut file =
            tempfile::NamedTempFile::new_in(dir).map_err(|e| self.history_error("create", e))?;
        for record in &records {
            let line = serde_json::to_string(record)?;
            writeln!(file, "{line}").map_err(|e| self.history_error("write", e))?;
        }
        file.persist(&self.path)
            .map_err(|e| self.history_error("replace", e.error))?;
        tracing::info!(removed, kept = records.len(), "old conversation turns pruned");
        Ok(removed)
    }
}

/// Keeps records in memory. Used for tests and when history is disabled.
#[derive(Default)]
pub struct MemoryHistory {
    records: Mutex<Vec<ConversationRecord>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConversationSink for MemoryHistory {
    fn save(&self, record: &ConversationRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| VoxlineError::History {
                message: "history lock poisoned".to_string(),
            })?
            .push(record.clone());
        Ok(())
    }

    fn query(&self, query: &HistoryQuery) -> Result<Vec<ConversationRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| VoxlineError::History {
                message: "history lock poisoned".to_string(),
            })?
            .clone();
        Ok(query.apply(records))
    }

    fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut records = self.records.lock().map_err(|_| VoxlineError::History {
            message: "history lock poisoned".to_string(),
        })?;
        let before = records.len();
        records.retain(|r| r.timestamp >= cutoff);
        Ok(before - records.len())
    }
}

/// Sink that rejects every write. Used for tests.
pub struct FailingHistory;

impl ConversationSink for FailingHistory {
    fn save(&self, _record: &ConversationRecord) -> Result<()> {
        Err(VoxlineError::History {
            message: "storage offline".to_string(),
        })
    }

    fn query(&self, _query: &HistoryQuery) -> Result<Vec<ConversationRecord>> {
        Err(VoxlineError::History {
            message: "storage offline".to_string(),
        })
    }

    fn prune_before(&self, _cutoff: DateTime<Utc>) -> Result<usize> {
        Err(VoxlineError::History {
            message: "storage offline".to_string(),
        })
    }
}
