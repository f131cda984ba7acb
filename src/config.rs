use crate::defaults;
use crate::error::VoxlineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub tts: TtsConfig,
    pub reply: ReplyConfig,
    pub history: HistoryConfig,
    pub conversation: ConversationConfig,
}

/// Streaming speech configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TtsConfig {
    /// Synthesizer backend id (`espeak`, `say`, `tone`, `command`, `openai`)
    pub synthesizer: String,
    /// Backend used when the primary synthesizer fails
    pub fallback_synthesizer: Option<String>,
    /// Player backend id (`aplay`, `paplay`, `afplay`, `cpal`, `command`, `null`)
    pub player: String,
    /// Output device name for the `cpal` player
    pub device: Option<String>,
    /// Voice/language passed to synthesizers that accept one
    pub language: String,
    /// Maximum chunk length in characters
    pub max_chunk_size: usize,
    /// Capacity of the synthesis → playback queue
    pub queue_size: usize,
    /// Keep synthesized audio in temp files instead of memory
    pub cache_to_disk: bool,
    /// Directory for temp audio files (system temp dir when unset)
    pub scratch_dir: Option<PathBuf>,
    /// How long cancellation waits for workers, in milliseconds
    pub join_timeout_ms: u64,
    /// Print the first chunks when a run starts
    pub show_preview: bool,
    pub command: CommandConfig,
    pub remote: RemoteSpeechConfig,
}

/// External programs for the `command` synthesizer and player
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommandConfig {
    /// Synthesis program; arguments may use `{text}` and `{output}`
    pub program: Option<String>,
    pub args: Vec<String>,
    /// Extension of the audio the program writes
    pub extension: String,
    /// Playback program; receives the audio file path as last argument
    pub player_program: Option<String>,
    pub player_args: Vec<String>,
}

/// OpenAI-compatible speech endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteSpeechConfig {
    pub base_url: String,
    pub model: String,
    pub voice: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub timeout_secs: u64,
}

/// Reply generation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplyConfig {
    /// Responder backend id (`rules`, `ollama`, `openai`)
    pub backend: String,
    /// Responder used when the primary returns an error
    pub fallback: Option<String>,
    pub ollama: OllamaConfig,
    pub openai: OpenAiChatConfig,
}

/// Local Ollama server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub system_prompt: Option<String>,
    pub timeout_secs: u64,
}

/// OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpenAiChatConfig {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

/// Conversation history configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    /// JSON-lines file (defaults to the data directory)
    pub path: Option<PathBuf>,
    /// Turns older than this many days are pruned when chat starts (0 keeps everything)
    pub retention_days: u32,
}

/// Interactive conversation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConversationConfig {
    pub user_id: String,
    /// Speak replies through the streaming pipeline
    pub speak_replies: bool,
    /// End the chat loop once the conversation is this many seconds old (0 disables)
    pub timeout_secs: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            synthesizer: defaults::DEFAULT_SYNTHESIZER.to_string(),
            fallback_synthesizer: Some("tone".to_string()),
            player: defaults::DEFAULT_PLAYER.to_string(),
            device: None,
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            max_chunk_size: defaults::MAX_CHUNK_SIZE,
            queue_size: defaults::QUEUE_SIZE,
            cache_to_disk: false,
            scratch_dir: None,
            join_timeout_ms: defaults::JOIN_TIMEOUT.as_millis() as u64,
            show_preview: true,
            command: CommandConfig::default(),
            remote: RemoteSpeechConfig::default(),
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            extension: "wav".to_string(),
            player_program: None,
            player_args: Vec::new(),
        }
    }
}

impl Default for RemoteSpeechConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            backend: defaults::DEFAULT_RESPONDER.to_string(),
            fallback: None,
            ollama: OllamaConfig::default(),
            openai: OpenAiChatConfig::default(),
        }
    }
}

impl Default for OpenAiChatConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            system_prompt: None,
            max_tokens: 150,
            temperature: 0.7,
            timeout_secs: 30,
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2".to_string(),
            system_prompt: None,
            timeout_secs: 60,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            retention_days: defaults::HISTORY_RETENTION_DAYS,
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            user_id: defaults::DEFAULT_USER_ID.to_string(),
            speak_replies: true,
            timeout_secs: defaults::CONVERSATION_TIMEOUT_SECS,
        }
    }
}

impl TtsConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

impl HistoryConfig {
    /// Configured history file, or `<data_dir>/voxline/history.jsonl`.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(|| {
            dirs::data_dir().map(|dir| dir.join("voxline").join("history.jsonl"))
        })
    }

    /// Oldest timestamp still kept, `None` when retention is disabled.
    pub fn retention_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        (self.retention_days > 0)
            .then(|| now - chrono::Duration::days(i64::from(self.retention_days)))
    }
}

impl ConversationConfig {
    /// Conversation length limit, `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXLINE_SYNTHESIZER → tts.synthesizer
    /// - VOXLINE_PLAYER → tts.player
    /// - VOXLINE_REPLY_BACKEND → reply.backend
    /// - VOXLINE_MAX_CHUNK_SIZE → tts.max_chunk_size (ignored unless a number)
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(synthesizer) = std::env::var("VOXLINE_SYNTHESIZER")
            && !synthesizer.is_empty()
        {
            self.tts.synthesizer = synthesizer;
        }

        if let Ok(player) = std::env::var("VOXLINE_PLAYER")
            && !player.is_empty()
        {
            self.tts.player = player;
        }

        if let Ok(backend) = std::env::var("VOXLINE_REPLY_BACKEND")
            && !backend.is_empty()
        {
            self.reply.backend = backend;
        }

        if let Ok(size) = std::env::var("VOXLINE_MAX_CHUNK_SIZE") {
            match size.trim().parse() {
                Ok(size) => self.tts.max_chunk_size = size,
                Err(_) if size.is_empty() => {}
                Err(e) => tracing::warn!(value = %size, error = %e, "ignoring VOXLINE_MAX_CHUNK_SIZE"),
            }
        }

        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.tts.max_chunk_size == 0 {
            return Err(VoxlineError::ConfigInvalidValue {
                key: "tts.max_chunk_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.tts.queue_size == 0 {
            return Err(VoxlineError::ConfigInvalidValue {
                key: "tts.queue_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.tts.synthesizer.trim().is_empty() {
            return Err(VoxlineError::ConfigInvalidValue {
                key: "tts.synthesizer".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voxline/config.toml on Linux
    pub fn default_path() -> crate::error::Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("voxline").join("config.toml"))
            .ok_or_else(|| VoxlineError::ConfigParse {
                message: "could not determine config directory".to_string(),
            })
    }

    /// Render as TOML for `config show`.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_voxline_env() {
        remove_env("VOXLINE_SYNTHESIZER");
        remove_env("VOXLINE_PLAYER");
        remove_env("VOXLINE_REPLY_BACKEND");
        remove_env("VOXLINE_MAX_CHUNK_SIZE");
    }

    fn write_config(contents: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.tts.synthesizer, "espeak");
        assert_eq!(config.tts.fallback_synthesizer.as_deref(), Some("tone"));
        assert_eq!(config.tts.player, "aplay");
        assert_eq!(config.tts.max_chunk_size, 80);
        assert_eq!(config.tts.queue_size, 10);
        assert!(!config.tts.cache_to_disk);
        assert_eq!(config.tts.join_timeout(), defaults::JOIN_TIMEOUT);

        assert_eq!(config.reply.backend, "rules");
        assert!(config.reply.fallback.is_none());

        assert!(config.history.enabled);
        assert_eq!(config.conversation.user_id, "default");
        assert_eq!(config.conversation.timeout(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_file = write_config(
            r#"
            [tts]
            synthesizer = "command"
            player = "null"
            max_chunk_size = 120
            queue_size = 4
            cache_to_disk = true

            [tts.command]
            program = "piper"
            args = ["--output_file", "{output}"]

            [reply]
            backend = "ollama"
            fallback = "rules"

            [reply.ollama]
            model = "qwen2.5"

            [history]
            enabled = false

            [conversation]
            user_id = "alice"
            timeout_secs = 0
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.tts.synthesizer, "command");
        assert_eq!(config.tts.player, "null");
        assert_eq!(config.tts.max_chunk_size, 120);
        assert_eq!(config.tts.queue_size, 4);
        assert!(config.tts.cache_to_disk);
        assert_eq!(config.tts.command.program.as_deref(), Some("piper"));
        assert_eq!(config.tts.command.args, vec!["--output_file", "{output}"]);
        assert_eq!(config.tts.command.extension, "wav");

        assert_eq!(config.reply.backend, "ollama");
        assert_eq!(config.reply.fallback.as_deref(), Some("rules"));
        assert_eq!(config.reply.ollama.model, "qwen2.5");
        assert_eq!(config.reply.ollama.base_url, "http://localhost:11434");

        assert!(!config.history.enabled);
        assert_eq!(config.conversation.user_id, "alice");
        assert_eq!(config.conversation.timeout(), None);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let temp_file = write_config(
            r#"
            [tts]
            max_chunk_size = 40
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.tts.max_chunk_size, 40);
        assert_eq!(config.tts.queue_size, 10);
        assert_eq!(config.tts.synthesizer, "espeak");
        assert_eq!(config.reply, ReplyConfig::default());
        assert_eq!(config.history, HistoryConfig::default());
    }

    #[test]
    fn test_env_override_backends() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxline_env();

        set_env("VOXLINE_SYNTHESIZER", "tone");
        set_env("VOXLINE_PLAYER", "null");
        set_env("VOXLINE_REPLY_BACKEND", "ollama");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.tts.synthesizer, "tone");
        assert_eq!(config.tts.player, "null");
        assert_eq!(config.reply.backend, "ollama");

        clear_voxline_env();
    }

    #[test]
    fn test_env_override_chunk_size() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxline_env();

        set_env("VOXLINE_MAX_CHUNK_SIZE", "200");
        assert_eq!(Config::default().with_env_overrides().tts.max_chunk_size, 200);

        set_env("VOXLINE_MAX_CHUNK_SIZE", "lots");
        assert_eq!(Config::default().with_env_overrides().tts.max_chunk_size, 80);

        clear_voxline_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_voxline_env();

        set_env("VOXLINE_SYNTHESIZER", "");
        set_env("VOXLINE_MAX_CHUNK_SIZE", "");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.tts.synthesizer, "espeak");
        assert_eq!(config.tts.max_chunk_size, 80);

        clear_voxline_env();
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.tts.max_chunk_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tts.max_chunk_size"));

        config.tts.max_chunk_size = 80;
        config.tts.queue_size = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tts.queue_size"));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let temp_file = write_config(
            r#"
            [tts
            synthesizer = "broken
        "#,
        );

        assert!(Config::load(temp_file.path()).is_err());
        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_default_path_ends_with_config_toml() {
        let path = Config::default_path().unwrap();
        let path_str = path.to_string_lossy();

        assert!(path_str.contains("voxline"));
        assert!(path_str.ends_with("config.toml"));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let rendered = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_openai_responder_section() {
        let temp_file = write_config(
            r#"
            [reply]
            backend = "openai"

            [reply.openai]
            model = "gpt-4o-mini"
            max_tokens = 200
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.reply.backend, "openai");
        assert_eq!(config.reply.openai.model, "gpt-4o-mini");
        assert_eq!(config.reply.openai.max_tokens, 200);
        assert_eq!(config.reply.openai.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.reply.openai.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn test_retention_cutoff() {
        let now = Utc::now();
        let history = HistoryConfig::default();
        assert_eq!(history.retention_days, 30);
        assert_eq!(
            history.retention_cutoff(now),
            Some(now - chrono::Duration::days(30))
        );

        let keep_all = HistoryConfig {
            retention_days: 0,
            ..Default::default()
        };
        assert!(keep_all.retention_cutoff(now).is_none());
    }
}
