use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{KikeeParams, MatchPolicy, Result, RisingWhistleParams, WhistlerError};

/// Top-level configuration structure for the application.
///
/// Every section falls back to its defaults, so a config file only needs to
/// mention the values it changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub matcher: MatcherConfig,
    pub gestures: GestureConfig,
    pub replay: ReplayConfig,
}

impl AppConfig {
    /// Settings for live listening: the device rate wins at runtime and the
    /// analyzer keeps the same number of peaks as fixture replay.
    pub fn live_defaults() -> Self {
        let config = Self::default();
        Self {
            audio: AudioConfig {
                max_peaks: config.replay.max_peaks,
                ..config.audio
            },
            ..config
        }
    }

    /// Reads a JSON configuration file and validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.audio.validate()?;
        tracing::debug!(?path, "loaded configuration");
        Ok(config)
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Rate assumed for analysis when the device does not report one.
    pub sample_rate: u32,
    /// Ring buffer length; one analysis frame per full buffer.
    pub buffer_size: usize,
    /// Peaks at or below this amplitude are discarded.
    pub min_amplitude: f32,
    /// Cap on the number of peaks kept per frame. Without it, leakage from
    /// an off-bin tone reaches the gesture guards as extra peaks.
    pub max_peaks: Option<usize>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            buffer_size: 4_000,
            min_amplitude: crate::analysis::DEFAULT_MIN_AMPLITUDE,
            max_peaks: Some(2),
        }
    }
}

impl AudioConfig {
    /// Rejects settings the detector cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(WhistlerError::msg("sample_rate must be positive"));
        }
        if self.buffer_size < 2 {
            return Err(WhistlerError::msg(format!(
                "buffer_size must hold at least two samples, got {}",
                self.buffer_size
            )));
        }
        if !self.min_amplitude.is_finite() || self.min_amplitude < 0.0 {
            return Err(WhistlerError::msg(format!(
                "min_amplitude must be a non-negative number, got {}",
                self.min_amplitude
            )));
        }
        Ok(())
    }
}

/// Settings shared by every registered matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub policy: MatchPolicy,
    /// Capacity of each gesture's notification queue.
    pub notification_capacity: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            policy: MatchPolicy::default(),
            notification_capacity: 16,
        }
    }
}

/// Numeric parameters of the built-in gestures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    pub rising: RisingWhistleParams,
    pub kikee: KikeeParams,
}

/// Frame filtering applied when replaying recorded fixtures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub min_amplitude: f32,
    pub max_peaks: Option<usize>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            min_amplitude: 0.005,
            max_peaks: Some(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"audio": {"buffer_size": 2048}}"#).unwrap();

        assert_eq!(config.audio.buffer_size, 2_048);
        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(config.matcher.notification_capacity, 16);
        assert_eq!(config.gestures.rising.sustain_low, 900.0);
        assert_eq!(config.replay.max_peaks, Some(2));
    }

    #[test]
    fn live_analysis_matches_replay_peak_count() {
        let config = AppConfig::live_defaults();
        assert_eq!(config.audio.max_peaks, config.replay.max_peaks);

        let uncapped: AppConfig =
            serde_json::from_str(r#"{"audio": {"max_peaks": null}}"#).unwrap();
        assert_eq!(uncapped.audio.max_peaks, None);
    }

    #[test]
    fn parses_match_policy() {
        let config: AppConfig =
            serde_json::from_str(r#"{"matcher": {"policy": "keep_siblings"}}"#).unwrap();
        assert_eq!(config.matcher.policy, MatchPolicy::KeepSiblings);
    }

    #[test]
    fn rejects_degenerate_audio_settings() {
        let mut audio = AudioConfig::default();
        assert!(audio.validate().is_ok());

        audio.buffer_size = 1;
        assert!(audio.validate().is_err());

        audio.buffer_size = 1_024;
        audio.sample_rate = 0;
        assert!(audio.validate().is_err());
    }

    #[test]
    fn load_reports_missing_files() {
        let err = AppConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, WhistlerError::Io(_)));
    }
}
