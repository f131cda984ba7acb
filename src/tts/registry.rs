//! Backend selection by explicit identifier.

use crate::config::TtsConfig;
use crate::error::{Result, VoxlineError};
use crate::tts::player::{CommandPlayer, NullPlayer, Player};
use crate::tts::scratch::{PayloadStore, ScratchDir};
use crate::tts::synthesizer::{CommandSynthesizer, FallbackSynthesizer, Synthesizer, ToneSynthesizer};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builds a synthesizer from the speech configuration.
pub type SynthesizerFactory =
    Box<dyn Fn(&TtsConfig, &PayloadStore) -> Result<Box<dyn Synthesizer>> + Send + Sync>;

/// Builds a player from the speech configuration.
pub type PlayerFactory = Box<dyn Fn(&TtsConfig) -> Result<Box<dyn Player>> + Send + Sync>;

/// Availability of one registered backend, for `voxline backends`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendStatus {
    pub kind: &'static str,
    pub id: String,
    pub available: bool,
    /// Why the backend could not be built, if it could not.
    pub note: Option<String>,
}

/// Maps backend ids to factories.
pub struct BackendRegistry {
    synthesizers: BTreeMap<String, SynthesizerFactory>,
    players: BTreeMap<String, PlayerFactory>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Chooses memory or disk payloads from the configuration.
pub fn payload_store(config: &TtsConfig) -> PayloadStore {
    if !config.cache_to_disk {
        return PayloadStore::Memory;
    }
    let scratch = match &config.scratch_dir {
        Some(dir) => ScratchDir::open(dir, crate::defaults::STALE_AFTER),
        None => ScratchDir::system(),
    };
    PayloadStore::Disk(scratch)
}

#[cfg(any(not(feature = "remote"), not(feature = "cpal-audio")))]
fn not_built(id: &str, feature: &str) -> VoxlineError {
    VoxlineError::BackendUnavailable {
        backend: format!("{id} (built without the {feature} feature)"),
    }
}

impl BackendRegistry {
    /// Registry with no backends.
    pub fn empty() -> Self {
        Self {
            synthesizers: BTreeMap::new(),
            players: BTreeMap::new(),
        }
    }

    /// Registry with every built-in backend.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();

        registry.register_synthesizer("tone", |_, store| {
            Ok(Box::new(ToneSynthesizer::new(store.clone())))
        });
        registry.register_synthesizer("espeak", |config, store| {
            Ok(Box::new(CommandSynthesizer::espeak(&config.language, store.clone())))
        });
        registry.register_synthesizer("say", |_, store| {
            Ok(Box::new(CommandSynthesizer::say(store.clone())))
        });
        registry.register_synthesizer("command", |config, store| {
            let program = config.command.program.clone().ok_or_else(|| {
                VoxlineError::ConfigInvalidValue {
                    key: "tts.command.program".to_string(),
                    message: "required by the command synthesizer".to_string(),
                }
            })?;
            Ok(Box::new(
                CommandSynthesizer::new(program.clone(), program, config.command.args.clone(), store.clone())
                    .with_extension(config.command.extension.clone()),
            ))
        });
        registry.register_synthesizer("openai", |config, store| {
            #[cfg(feature = "remote")]
            {
                let synth = crate::tts::remote::RemoteSynthesizer::new(
                    config.remote.clone(),
                    store.clone(),
                )
                .map_err(|e| VoxlineError::BackendUnavailable {
                    backend: e.to_string(),
                })?;
                Ok(Box::new(synth) as Box<dyn Synthesizer>)
            }
            #[cfg(not(feature = "remote"))]
            {
                let _ = (config, store);
                Err(not_built("openai", "remote"))
            }
        });

        registry.register_player("aplay", |_| Ok(Box::new(CommandPlayer::aplay())));
        registry.register_player("paplay", |_| Ok(Box::new(CommandPlayer::paplay())));
        registry.register_player("afplay", |_| Ok(Box::new(CommandPlayer::afplay())));
        registry.register_player("null", |_| Ok(Box::new(NullPlayer)));
        registry.register_player("command", |config| {
            let program = config.command.player_program.clone().ok_or_else(|| {
                VoxlineError::ConfigInvalidValue {
                    key: "tts.command.player_program".to_string(),
                    message: "required by the command player".to_string(),
                }
            })?;
            Ok(Box::new(
                CommandPlayer::new(program.clone(), program, config.command.player_args.clone())
                    .file_only(),
            ))
        });
        registry.register_player("cpal", |config| {
            #[cfg(feature = "cpal-audio")]
            {
                Ok(Box::new(crate::tts::cpal_player::CpalPlayer::new(config.device.clone()))
                    as Box<dyn Player>)
            }
            #[cfg(not(feature = "cpal-audio"))]
            {
                let _ = config;
                Err(not_built("cpal", "cpal-audio"))
            }
        });

        registry
    }

    pub fn register_synthesizer<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn(&TtsConfig, &PayloadStore) -> Result<Box<dyn Synthesizer>> + Send + Sync + 'static,
    {
        self.synthesizers.insert(id.into(), Box::new(factory));
    }

    pub fn register_player<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn(&TtsConfig) -> Result<Box<dyn Player>> + Send + Sync + 'static,
    {
        self.players.insert(id.into(), Box::new(factory));
    }

    pub fn synthesizer_ids(&self) -> Vec<&str> {
        self.synthesizers.keys().map(String::as_str).collect()
    }

    pub fn player_ids(&self) -> Vec<&str> {
        self.players.keys().map(String::as_str).collect()
    }

    /// Builds the synthesizer registered under `id`.
    pub fn build_synthesizer(
        &self,
        id: &str,
        config: &TtsConfig,
        store: &PayloadStore,
    ) -> Result<Box<dyn Synthesizer>> {
        let factory = self
            .synthesizers
            .get(id)
            .ok_or_else(|| VoxlineError::UnknownBackend {
                kind: "synthesizer",
                id: id.to_string(),
            })?;
        factory(config, store)
    }

    /// Builds the player registered under `id`.
    pub fn build_player(&self, id: &str, config: &TtsConfig) -> Result<Box<dyn Player>> {
        let factory = self
            .players
            .get(id)
            .ok_or_else(|| VoxlineError::UnknownBackend {
                kind: "player",
                id: id.to_string(),
            })?;
        factory(config)
    }

    /// Builds the configured synthesizer, wrapped with its fallback if one is set.
    pub fn synthesizer_from_config(&self, config: &TtsConfig) -> Result<Arc<dyn Synthesizer>> {
        let store = payload_store(config);
        let primary = self.build_synthesizer(&config.synthesizer, config, &store)?;
        match config
            .fallback_synthesizer
            .as_deref()
            .filter(|id| *id != config.synthesizer)
        {
            Some(fallback_id) => {
                let fallback = self.build_synthesizer(fallback_id, config, &store)?;
                Ok(Arc::new(FallbackSynthesizer::new(primary, fallback)))
            }
            None => Ok(Arc::from(primary)),
        }
    }

    /// Builds the configured player.
    pub fn player_from_config(&self, config: &TtsConfig) -> Result<Arc<dyn Player>> {
        Ok(Arc::from(self.build_player(&config.player, config)?))
    }

    /// Tries to build every backend and reports whether it is usable.
    pub fn statuses(&self, config: &TtsConfig) -> Vec<BackendStatus> {
        let store = PayloadStore::Memory;
        let synthesizers = self.synthesizers.iter().map(|(id, factory)| {
            let built = factory(config, &store);
            status("synthesizer", id, built.as_ref().map(|s| s.is_available()))
        });
        let players = self.players.iter().map(|(id, factory)| {
            let built = factory(config);
            status("player", id, built.as_ref().map(|p| p.is_available()))
        });
        synthesizers.chain(players).collect()
    }
}

fn status(
    kind: &'static str,
    id: &str,
    built: std::result::Result<bool, &VoxlineError>,
) -> BackendStatus {
    match built {
        Ok(available) => BackendStatus {
            kind,
            id: id.to_string(),
            available,
            note: None,
        },
        Err(e) => BackendStatus {
            kind,
            id: id.to_string(),
            available: false,
            note: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::synthesizer::MockSynthesizer;
    use crate::tts::types::TextChunk;

    #[test]
    fn test_defaults_are_registered() {
        let registry = BackendRegistry::with_defaults();
        for id in ["tone", "espeak", "say", "command", "openai"] {
            assert!(registry.synthesizer_ids().contains(&id), "{id}");
        }
        for id in ["aplay", "paplay", "afplay", "command", "null", "cpal"] {
            assert!(registry.player_ids().contains(&id), "{id}");
        }
    }

    #[test]
    fn test_unknown_synthesizer_is_rejected() {
        let registry = BackendRegistry::with_defaults();
        let err = registry
            .build_synthesizer("Google TTS", &TtsConfig::default(), &PayloadStore::Memory)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            VoxlineError::UnknownBackend { kind: "synthesizer", .. }
        ));
    }

    #[test]
    fn test_unknown_player_is_rejected() {
        let registry = BackendRegistry::with_defaults();
        let err = registry
            .build_player("speakers", &TtsConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, VoxlineError::UnknownBackend { kind: "player", .. }));
    }

    #[test]
    fn test_command_synthesizer_requires_program() {
        let registry = BackendRegistry::with_defaults();
        let err = registry
            .build_synthesizer("command", &TtsConfig::default(), &PayloadStore::Memory)
            .err()
            .unwrap();
        assert!(matches!(err, VoxlineError::ConfigInvalidValue { .. }));
    }

    #[test]
    fn test_fallback_is_wrapped() {
        let registry = BackendRegistry::with_defaults();
        let config = TtsConfig {
            synthesizer: "espeak".to_string(),
            fallback_synthesizer: Some("tone".to_string()),
            ..Default::default()
        };
        let synth = registry.synthesizer_from_config(&config).unwrap();
        assert_eq!(synth.name(), "espeak-ng+tone");
        assert!(synth.is_available());
    }

    #[test]
    fn test_fallback_equal_to_primary_is_ignored() {
        let registry = BackendRegistry::with_defaults();
        let config = TtsConfig {
            synthesizer: "tone".to_string(),
            fallback_synthesizer: Some("tone".to_string()),
            ..Default::default()
        };
        let synth = registry.synthesizer_from_config(&config).unwrap();
        assert_eq!(synth.name(), "tone");
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = BackendRegistry::empty();
        registry.register_synthesizer("mock", |_, _| Ok(Box::new(MockSynthesizer::new())));
        let synth = registry
            .build_synthesizer("mock", &TtsConfig::default(), &PayloadStore::Memory)
            .unwrap();
        assert!(synth.synthesize(&TextChunk::new(0, "x")).is_ok());
    }

    #[test]
    fn test_disk_store_follows_config() {
        let tmp = tempfile::tempdir().unwrap();
        let config = TtsConfig {
            cache_to_disk: true,
            scratch_dir: Some(tmp.path().to_path_buf()),
            ..Default::default()
        };
        assert!(payload_store(&config).is_disk());
        assert!(!payload_store(&TtsConfig::default()).is_disk());
    }

    #[test]
    fn test_statuses_cover_every_backend() {
        let registry = BackendRegistry::with_defaults();
        let statuses = registry.statuses(&TtsConfig::default());
        assert_eq!(
            statuses.len(),
            registry.synthesizer_ids().len() + registry.player_ids().len()
        );
        let tone = statuses.iter().find(|s| s.id == "tone").unwrap();
        assert!(tone.available);
        let null = statuses.iter().find(|s| s.id == "null").unwrap();
        assert!(null.available);
        let command = statuses
            .iter()
            .find(|s| s.kind == "synthesizer" && s.id == "command")
            .unwrap();
        assert!(!command.available);
        assert!(command.note.is_some());
    }
}
