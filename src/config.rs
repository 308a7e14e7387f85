use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

pub const DEFAULT_STEP_DELAY_MS: u64 = 1;
pub const DEFAULT_FRAME_RATE_HZ: u32 = 40;
pub const DEFAULT_CONFIG_PATH: &str = "hatch.json";

/// What `control_stop` with "all" does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    /// Terminate the whole process.
    #[default]
    Process,
    /// Cancel every running execution unit at its next suspension point.
    Scoped,
}

impl StopMode {
    fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "process" => Some(Self::Process),
            "scoped" | "script" => Some(Self::Scoped),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub step_delay: Duration,
    pub frame_rate_hz: u32,
    pub stop_mode: StopMode,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            step_delay: Duration::from_millis(DEFAULT_STEP_DELAY_MS),
            frame_rate_hz: DEFAULT_FRAME_RATE_HZ,
            stop_mode: StopMode::Process,
        }
    }
}

#[derive(Deserialize, Default)]
struct ConfigFile {
    step_delay_ms: Option<u64>,
    frame_rate_hz: Option<u32>,
    stop_mode: Option<StopMode>,
}

impl RuntimeConfig {
    /// Configuration with no pacing delay and scoped stops, for embedding in tests.
    pub fn immediate() -> Self {
        Self {
            step_delay: Duration::ZERO,
            stop_mode: StopMode::Scoped,
            ..Self::default()
        }
    }

    /// Defaults, then the JSON file at `$HATCH_CONFIG`, then environment overrides.
    pub fn load() -> Self {
        let path = std::env::var("HATCH_CONFIG")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::default();
        if let Ok(contents) = std::fs::read_to_string(&path) {
            match serde_json::from_str::<ConfigFile>(&contents) {
                Ok(file) => {
                    info!("[Hatch config] Loaded runtime config from {path}");
                    config.apply_file(file);
                }
                Err(e) => warn!("[Hatch config] Failed to parse {path}: {e}"),
            }
        }
        config.apply_env();
        config
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(ms) = file.step_delay_ms {
            self.step_delay = Duration::from_millis(ms);
        }
        if let Some(hz) = file.frame_rate_hz {
            self.frame_rate_hz = hz.max(1);
        }
        if let Some(mode) = file.stop_mode {
            self.stop_mode = mode;
        }
    }

    fn apply_env(&mut self) {
        if let Some(ms) = env_u64("HATCH_STEP_DELAY_MS") {
            self.step_delay = Duration::from_millis(ms);
        }
        if let Some(hz) = env_u64("HATCH_FRAME_RATE") {
            self.frame_rate_hz = hz.clamp(1, 1000) as u32;
        }
        if let Ok(label) = std::env::var("HATCH_STOP_MODE") {
            match StopMode::from_label(&label) {
                Some(mode) => self.stop_mode = mode,
                None => warn!("[Hatch config] Ignoring unknown HATCH_STOP_MODE '{label}'"),
            }
        }
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate_hz.max(1) as f64)
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let mut config = RuntimeConfig::default();
        let file: ConfigFile =
            serde_json::from_str(r#"{ "step_delay_ms": 0, "stop_mode": "scoped" }"#)
                .expect("parse config file");
        config.apply_file(file);
        assert_eq!(config.step_delay, Duration::ZERO);
        assert_eq!(config.stop_mode, StopMode::Scoped);
        assert_eq!(config.frame_rate_hz, DEFAULT_FRAME_RATE_HZ);
    }

    #[test]
    fn stop_mode_labels_are_case_insensitive() {
        assert_eq!(StopMode::from_label(" Scoped "), Some(StopMode::Scoped));
        assert_eq!(StopMode::from_label("PROCESS"), Some(StopMode::Process));
        assert_eq!(StopMode::from_label("later"), None);
    }

    #[test]
    fn frame_interval_follows_rate() {
        let config = RuntimeConfig {
            frame_rate_hz: 40,
            ..RuntimeConfig::default()
        };
        assert_eq!(config.frame_interval(), Duration::from_millis(25));
    }
}
