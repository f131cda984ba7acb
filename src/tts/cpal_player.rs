//! In-process WAV playback through CPAL.

use crate::defaults;
use crate::tts::error::PlaybackError;
use crate::tts::player::Player;
use crate::tts::types::AudioPayload;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Plays WAV payloads on an output device.
///
/// The stream is built on the calling thread for each payload, so nothing
/// `!Send` outlives a `play` call.
#[derive(Debug, Default)]
pub struct CpalPlayer {
    device_name: Option<String>,
    generation: AtomicU64,
}

/// Mono samples in [-1, 1].
struct Decoded {
    samples: Vec<f32>,
    sample_rate: u32,
}

/// Shared read position into the samples being played.
struct Feed {
    samples: Arc<Vec<f32>>,
    position: Arc<AtomicUsize>,
    done: Arc<AtomicBool>,
}

impl Feed {
    /// Fills one interleaved output buffer, padding with silence at the end.
    fn fill<T: Copy>(&self, data: &mut [T], channels: usize, convert: impl Fn(f32) -> T) {
        let frames = data.len() / channels;
        let start = self.position.fetch_add(frames, Ordering::SeqCst);
        for (i, frame) in data.chunks_mut(channels).enumerate() {
            let value = convert(self.samples.get(start + i).copied().unwrap_or(0.0));
            frame.fill(value);
        }
        if start + frames >= self.samples.len() {
            self.done.store(true, Ordering::SeqCst);
        }
    }
}

impl CpalPlayer {
    /// Uses the named output device, or the host default when `None`.
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            generation: AtomicU64::new(0),
        }
    }

    fn device(&self) -> Result<cpal::Device, PlaybackError> {
        let host = cpal::default_host();
        let unavailable = |reason: String| PlaybackError::Unavailable {
            player: "cpal".to_string(),
            reason,
        };
        match &self.device_name {
            Some(name) => {
                let devices = host
                    .output_devices()
                    .map_err(|e| unavailable(format!("failed to enumerate devices: {e}")))?;
                for device in devices {
                    if let Ok(device_name) = device.name()
                        && &device_name == name
                    {
                        return Ok(device);
                    }
                }
                Err(unavailable(format!("output device '{name}' not found")))
            }
            None => host
                .default_output_device()
                .ok_or_else(|| unavailable("no default output device".to_string())),
        }
    }

    fn decode(audio: &AudioPayload) -> Result<Decoded, PlaybackError> {
        let reader: Box<dyn Read> = match audio {
            AudioPayload::Memory(bytes) => Box::new(Cursor::new(bytes.as_slice())),
            AudioPayload::File(path) => Box::new(std::io::BufReader::new(std::fs::File::open(path)?)),
        };
        let decode_err = |e: hound::Error| PlaybackError::Decode {
            message: e.to_string(),
        };
        let mut wav = hound::WavReader::new(reader).map_err(decode_err)?;
        let spec = wav.spec();
        let channels = usize::from(spec.channels.max(1));

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => wav
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(decode_err)?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
                wav.samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / scale))
                    .collect::<Result<_, _>>()
                    .map_err(decode_err)?
            }
        };

        let samples = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();
        Ok(Decoded {
            samples,
            sample_rate: spec.sample_rate,
        })
    }
}

/// Linear interpolation resampling.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;
    (0..output_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples.get(idx).copied().unwrap_or(0.0);
            let b = samples.get(idx + 1).copied().unwrap_or(a);
            a + (b - a) * frac
        })
        .collect()
}

impl Player for CpalPlayer {
    fn play(&self, audio: &AudioPayload) -> Result<(), PlaybackError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let decoded = Self::decode(audio)?;
        let device = self.device()?;
        let failed = |message: String| PlaybackError::Failed {
            player: "cpal".to_string(),
            message,
        };

        let default_config = device
            .default_output_config()
            .map_err(|e| failed(format!("failed to query output config: {e}")))?;
        let device_rate = default_config.sample_rate().0;
        let channels = usize::from(default_config.channels().max(1));
        let config: cpal::StreamConfig = default_config.clone().into();

        let samples = Arc::new(resample(&decoded.samples, decoded.sample_rate, device_rate));
        let done = Arc::new(AtomicBool::new(samples.is_empty()));
        let stream_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        let err_slot = stream_error.clone();
        let err_callback = move |err: cpal::StreamError| {
            if let Ok(mut slot) = err_slot.lock() {
                *slot = Some(err.to_string());
            }
        };

        let feed = Feed {
            samples,
            position: Arc::new(AtomicUsize::new(0)),
            done: done.clone(),
        };
        let stream = match default_config.sample_format() {
            cpal::SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    feed.fill(data, channels, |v| {
                        (v.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
                    });
                },
                err_callback,
                None,
            ),
            _ => device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    feed.fill(data, channels, |v| v);
                },
                err_callback,
                None,
            ),
        }
        .map_err(|e| failed(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| failed(format!("failed to start output stream: {e}")))?;

        while !done.load(Ordering::SeqCst) {
            if self.generation.load(Ordering::SeqCst) != generation {
                return Err(PlaybackError::Stopped);
            }
            if let Ok(slot) = stream_error.lock()
                && let Some(message) = slot.as_ref()
            {
                return Err(failed(message.clone()));
            }
            std::thread::sleep(defaults::POLL_INTERVAL / 5);
        }
        // Let the device drain its last buffer
        std::thread::sleep(defaults::POLL_INTERVAL);
        Ok(())
    }

    fn stop(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "cpal"
    }

    fn is_available(&self) -> bool {
        self.device().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::synthesizer::encode_wav;

    #[test]
    fn test_decode_mono_wav() {
        let wav = encode_wav(&[0, i16::MAX, i16::MIN], 16000).unwrap();
        let decoded = CpalPlayer::decode(&AudioPayload::Memory(wav)).unwrap();
        assert_eq!(decoded.sample_rate, 16000);
        assert_eq!(decoded.samples.len(), 3);
        assert!(decoded.samples[1] > 0.99);
        assert!(decoded.samples[2] <= -0.99);
    }

    #[test]
    fn test_decode_rejects_non_wav() {
        let err = CpalPlayer::decode(&AudioPayload::Memory(b"not audio".to_vec()))
            .err()
            .unwrap();
        assert!(matches!(err, PlaybackError::Decode { .. }));
    }

    #[test]
    fn test_resample_doubles_length() {
        let out = resample(&[0.0, 1.0], 8000, 16000);
        assert_eq!(out.len(), 4);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_resample_same_rate_is_identity() {
        assert_eq!(resample(&[0.25, 0.5], 22050, 22050), vec![0.25, 0.5]);
    }
}
