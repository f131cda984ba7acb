//! Command-line interface for voxline
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Talk to a voice assistant and hear long replies as they are synthesized
#[derive(Parser, Debug)]
#[command(
    name = "voxline",
    version,
    about = "Voice assistant pipeline with streaming text-to-speech"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress progress and statistics output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug logs, -vv: trace logs)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse a duration string.
///
/// Supports any duration format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`, `2h`), and compound (`1h30m`, `2m30s`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Backend and sizing overrides shared by `speak` and `chat`.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct SpeechArgs {
    /// Synthesizer backend (tone, espeak, say, command, openai)
    #[arg(long, value_name = "ID")]
    pub synthesizer: Option<String>,

    /// Player backend (aplay, paplay, afplay, cpal, null, command)
    #[arg(long, value_name = "ID")]
    pub player: Option<String>,

    /// Maximum characters per chunk
    #[arg(long, value_name = "CHARS")]
    pub max_chunk_size: Option<usize>,

    /// Synthesized chunks allowed to wait ahead of playback
    #[arg(long, value_name = "N")]
    pub queue_size: Option<usize>,

    /// Keep synthesized audio in temp files instead of memory
    #[arg(long)]
    pub cache_to_disk: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Speak text, streaming chunk by chunk (reads stdin when TEXT is omitted or "-")
    Speak {
        /// Text to speak
        text: Option<String>,

        /// Read the text from a file
        #[arg(long, short = 'f', value_name = "PATH", conflicts_with = "text")]
        file: Option<PathBuf>,

        #[command(flatten)]
        speech: SpeechArgs,

        /// Don't print the chunk preview
        #[arg(long)]
        no_preview: bool,

        /// Cancel the run after this long. Examples: 30s, 5m
        #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
        timeout: Option<Duration>,
    },

    /// Show how text would be split into chunks
    Chunk {
        /// Text to split (reads stdin when omitted or "-")
        text: Option<String>,

        /// Maximum characters per chunk
        #[arg(long, value_name = "CHARS")]
        max_chunk_size: Option<usize>,

        /// Print chunks as a JSON array
        #[arg(long)]
        json: bool,
    },

    /// Interactive conversation: type a message, hear the reply
    Chat {
        /// Continue an existing session instead of starting a new one
        #[arg(long, value_name = "ID")]
        session: Option<String>,

        /// Reply backend (rules, ollama, openai)
        #[arg(long, value_name = "ID")]
        responder: Option<String>,

        /// Print replies without speaking them
        #[arg(long)]
        no_speak: bool,

        /// Don't save turns to history
        #[arg(long)]
        no_history: bool,

        #[command(flatten)]
        speech: SpeechArgs,
    },

    /// Show saved conversation turns, newest first
    History {
        /// Only this session
        #[arg(long, value_name = "ID")]
        session: Option<String>,

        /// Only this user
        #[arg(long, value_name = "ID")]
        user: Option<String>,

        /// Maximum turns to show (0 for all)
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,

        /// Skip this many of the newest turns
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Print records as JSON lines
        #[arg(long)]
        json: bool,

        /// Show totals for the user instead of turns
        #[arg(long)]
        stats: bool,

        /// Delete turns older than `history.retention_days`
        #[arg(long, conflicts_with_all = ["json", "stats"])]
        prune: bool,
    },

    /// List speech backends and whether they can run here
    Backends,

    /// Inspect configuration
    Config {
        /// Action to perform
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}
