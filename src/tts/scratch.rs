//! Scratch space for on-disk audio payloads.

use crate::defaults;
use crate::tts::types::AudioPayload;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempPath;

/// Directory holding temp audio files, one per chunk.
///
/// Files are created with [`defaults::SCRATCH_PREFIX`] and handed out as
/// [`TempPath`]s, so each file has exactly one owner and disappears with it.
/// Files a crashed process left behind are swept when the directory opens.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    dir: PathBuf,
}

impl ScratchDir {
    /// Opens the system temp directory and sweeps stale chunk files.
    pub fn system() -> Self {
        Self::open(std::env::temp_dir(), defaults::STALE_AFTER)
    }

    /// Opens `dir` and removes chunk files older than `stale_after`.
    ///
    /// Sweep failures are logged, never returned.
    pub fn open(dir: impl Into<PathBuf>, stale_after: Duration) -> Self {
        let scratch = Self { dir: dir.into() };
        match scratch.sweep(stale_after) {
            Ok(0) => {}
            Ok(removed) => tracing::info!(removed, dir = %scratch.dir.display(), "swept stale audio files"),
            Err(e) => tracing::debug!(dir = %scratch.dir.display(), error = %e, "stale audio sweep failed"),
        }
        scratch
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Creates an empty temp file with the given extension (`"wav"`, `"mp3"`).
    pub fn create(&self, extension: &str) -> io::Result<TempPath> {
        std::fs::create_dir_all(&self.dir)?;
        let suffix = format!(".{extension}");
        let file = tempfile::Builder::new()
            .prefix(defaults::SCRATCH_PREFIX)
            .suffix(&suffix)
            .tempfile_in(&self.dir)?;
        Ok(file.into_temp_path())
    }

    /// Removes chunk files whose modification time is older than `stale_after`.
    /// Returns the number of files removed.
    pub fn sweep(&self, stale_after: Duration) -> io::Result<usize> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !name.starts_with(defaults::SCRATCH_PREFIX) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age >= stale_after && std::fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Where synthesizers put the audio they produce.
#[derive(Debug, Clone, Default)]
pub enum PayloadStore {
    /// Keep encoded audio in memory.
    #[default]
    Memory,
    /// Write each chunk to its own file in the scratch directory.
    Disk(ScratchDir),
}

impl PayloadStore {
    /// Wraps encoded audio bytes as a payload.
    pub fn store(&self, bytes: Vec<u8>, extension: &str) -> io::Result<AudioPayload> {
        match self {
            PayloadStore::Memory => Ok(AudioPayload::Memory(bytes)),
            PayloadStore::Disk(scratch) => {
                let path = scratch.create(extension)?;
                std::fs::write(&path, &bytes)?;
                Ok(AudioPayload::File(path))
            }
        }
    }

    /// Creates an empty temp file for a backend that writes its own output.
    pub fn temp_file(&self, extension: &str) -> io::Result<TempPath> {
        match self {
            PayloadStore::Disk(scratch) => scratch.create(extension),
            PayloadStore::Memory => {
                let suffix = format!(".{extension}");
                let file = tempfile::Builder::new()
                    .prefix(defaults::SCRATCH_PREFIX)
                    .suffix(&suffix)
                    .tempfile()?;
                Ok(file.into_temp_path())
            }
        }
    }

    /// Turns a file a backend wrote into a payload: kept as the file on disk,
    /// or read into memory and deleted.
    pub fn adopt(&self, path: TempPath) -> io::Result<AudioPayload> {
        match self {
            PayloadStore::Disk(_) => Ok(AudioPayload::File(path)),
            PayloadStore::Memory => {
                let bytes = std::fs::read(&path)?;
                Ok(AudioPayload::Memory(bytes))
            }
        }
    }

    pub fn is_disk(&self) -> bool {
        matches!(self, PayloadStore::Disk(_))
    }
}
