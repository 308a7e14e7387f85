use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{HatchError, HatchResult};
use crate::project::{AssetSource, SoundJson};

const MAX_AUDIO_EVENTS: usize = 256;

#[derive(Clone, Debug, PartialEq)]
pub struct Sound {
    pub name: String,
    /// False when the asset could not be decoded; playing it is a no-op.
    pub audible: bool,
    pub duration: Duration,
}

impl Sound {
    pub fn silent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            audible: false,
            duration: Duration::ZERO,
        }
    }

    /// Loads a sound, falling back to a silent one on any failure.
    pub fn load(info: &SoundJson, assets: &dyn AssetSource) -> Self {
        match Self::try_load(info, assets) {
            Ok(sound) => sound,
            Err(e) => {
                warn!(
                    "[Hatch audio] Sound '{}' unavailable, using silent fallback: {e}",
                    info.name
                );
                Self::silent(info.name.clone())
            }
        }
    }

    fn try_load(info: &SoundJson, assets: &dyn AssetSource) -> HatchResult<Self> {
        if !info.data_format.eq_ignore_ascii_case("wav") {
            return Err(HatchError::asset(format!(
                "Unsupported sound format {}",
                info.data_format
            )));
        }
        let bytes = assets.open(&info.asset_name()?)?;
        let duration = wav_duration(&bytes)
            .ok_or_else(|| HatchError::asset("not a RIFF/WAVE stream"))?;
        debug!("[Hatch audio] Loaded '{}' ({duration:?})", info.name);
        Ok(Self {
            name: info.name.clone(),
            audible: true,
            duration,
        })
    }
}

/// Reads the play length from a RIFF/WAVE header; `None` if the header is malformed.
pub fn wav_duration(bytes: &[u8]) -> Option<Duration> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return None;
    }
    let le32 = |at: usize| -> Option<u32> {
        bytes
            .get(at..at + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    };
    let mut cursor = 12;
    let mut byte_rate = None;
    let mut data_len = None;
    while cursor + 8 <= bytes.len() {
        let id = &bytes[cursor..cursor + 4];
        let len = le32(cursor + 4)? as usize;
        let body = cursor + 8;
        match id {
            b"fmt " => byte_rate = le32(body + 8),
            b"data" => data_len = Some(len.min(bytes.len().saturating_sub(body))),
            _ => {}
        }
        cursor = body + len + (len & 1);
    }
    match (byte_rate?, data_len?) {
        (0, _) => None,
        (rate, len) => Some(Duration::from_nanos(
            (len as u64).saturating_mul(1_000_000_000) / u64::from(rate),
        )),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AudioEvent {
    pub target: String,
    pub sound: String,
    pub audible: bool,
}

/// Per-target sound banks plus a bounded log of what was played.
#[derive(Default)]
pub struct AudioManager {
    sounds: HashMap<String, Vec<Sound>>,
    recent_events: Vec<AudioEvent>,
    stopped: u64,
}

impl AudioManager {
    pub fn register(&mut self, target: impl Into<String>, sounds: Vec<Sound>) {
        self.sounds.insert(target.into(), sounds);
    }

    pub fn sounds(&self, target: &str) -> &[Sound] {
        self.sounds.get(target).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Records a playback request and returns the sound that was played.
    pub fn play(&mut self, target: &str, name: &str) -> HatchResult<Sound> {
        let sound = self
            .sounds(target)
            .iter()
            .find(|s| s.name == name)
            .cloned()
            .ok_or_else(|| HatchError::runtime(format!("'{target}' has no sound '{name}'")))?;
        self.push_event(AudioEvent {
            target: target.to_string(),
            sound: sound.name.clone(),
            audible: sound.audible,
        });
        Ok(sound)
    }

    pub fn stop_all(&mut self) {
        self.stopped = self.stopped.saturating_add(1);
        debug!("[Hatch audio] Stop all sounds");
    }

    /// How many times every sound was stopped.
    pub fn stop_count(&self) -> u64 {
        self.stopped
    }

    pub fn recent_events(&self) -> &[AudioEvent] {
        &self.recent_events
    }

    fn push_event(&mut self, event: AudioEvent) {
        self.recent_events.push(event);
        if self.recent_events.len() > MAX_AUDIO_EVENTS {
            let excess = self.recent_events.len() - MAX_AUDIO_EVENTS;
            self.recent_events.drain(0..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::MemoryAssets;

    /// Minimal PCM wav: 8 kHz mono 8-bit, `samples` bytes of silence.
    fn wav_bytes(samples: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + samples).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&8000u32.to_le_bytes());
        out.extend_from_slice(&8000u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&8u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&samples.to_le_bytes());
        out.extend(std::iter::repeat(128u8).take(samples as usize));
        out
    }

    fn sound_json(name: &str, format: &str, md5ext: &str) -> SoundJson {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "dataFormat": format,
            "md5ext": md5ext
        }))
        .expect("parse sound")
    }

    #[test]
    fn wav_header_gives_duration() {
        let duration = wav_duration(&wav_bytes(4000)).expect("valid wav");
        assert_eq!(duration, Duration::from_millis(500));
        assert!(wav_duration(b"RIFF\0\0\0\0AVI ").is_none());
        assert!(wav_duration(b"ID3").is_none());
    }

    #[test]
    fn unsupported_or_broken_sounds_fall_back_to_silent() {
        let assets = MemoryAssets::new()
            .with("pop.wav", wav_bytes(800))
            .with("meow.mp3", vec![0xFF, 0xFB, 0x90])
            .with("bad.wav", b"not a wav".to_vec());

        let pop = Sound::load(&sound_json("pop", "wav", "pop.wav"), &assets);
        assert!(pop.audible);
        assert_eq!(pop.duration, Duration::from_millis(100));

        let meow = Sound::load(&sound_json("meow", "mp3", "meow.mp3"), &assets);
        assert_eq!(meow, Sound::silent("meow"));

        let bad = Sound::load(&sound_json("bad", "wav", "bad.wav"), &assets);
        assert!(!bad.audible);

        let missing = Sound::load(&sound_json("gone", "wav", "gone.wav"), &assets);
        assert!(!missing.audible);
    }

    #[test]
    fn play_records_event_and_rejects_unknown_names() {
        let mut audio = AudioManager::default();
        audio.register("Cat", vec![Sound::silent("meow")]);

        let played = audio.play("Cat", "meow").expect("known sound");
        assert!(!played.audible);
        assert_eq!(
            audio.recent_events(),
            &[AudioEvent {
                target: "Cat".into(),
                sound: "meow".into(),
                audible: false,
            }]
        );

        let err = audio.play("Cat", "bark").expect_err("unknown sound");
        assert!(matches!(err, HatchError::Runtime(_)));
        assert!(audio.play("Dog", "meow").is_err());
    }

    #[test]
    fn event_log_is_bounded() {
        let mut audio = AudioManager::default();
        audio.register("Cat", vec![Sound::silent("meow")]);
        for _ in 0..(MAX_AUDIO_EVENTS + 10) {
            audio.play("Cat", "meow").expect("play");
        }
        assert_eq!(audio.recent_events().len(), MAX_AUDIO_EVENTS);
    }
}
