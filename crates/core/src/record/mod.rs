//! Recorded frame sequences used as regression fixtures.
//!
//! A fixture is a JSON array of frames, each frame an array of peaks. File
//! names start with `pos_` when the recording contains a gesture and `neg_`
//! when it must not trigger one.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{FrameMatcher, ReplayConfig, Result, WaveSet, WhistlerError};

/// Ordered analysis frames captured from a live session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Recording {
    frames: Vec<WaveSet>,
}

impl Recording {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_frames(frames: Vec<WaveSet>) -> Self {
        Self { frames }
    }

    pub fn push(&mut self, waves: WaveSet) {
        self.frames.push(waves);
    }

    pub fn frames(&self) -> &[WaveSet] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Reads a fixture written by [`Recording::save`] or by older tools.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Writes the recording as compact JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = serde_json::to_vec(self)?;
        std::fs::write(path.as_ref(), data)?;
        tracing::debug!(path = ?path.as_ref(), frames = self.frames.len(), "saved recording");
        Ok(())
    }
}

/// Whether a fixture is expected to contain a gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    Positive,
    Negative,
}

impl Expectation {
    /// Reads the expectation from a `pos_...` or `neg_...` file name.
    pub fn from_file_name(name: &str) -> Result<Self> {
        match name.split_once('_').map(|(prefix, _)| prefix) {
            Some("pos") => Ok(Expectation::Positive),
            Some("neg") => Ok(Expectation::Negative),
            _ => Err(WhistlerError::msg(format!(
                "fixture name `{name}` does not start with pos_ or neg_"
            ))),
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            Expectation::Positive => "pos",
            Expectation::Negative => "neg",
        }
    }

    /// Whether a replay producing `matches` matches passes.
    pub fn is_met_by(self, matches: usize) -> bool {
        match self {
            Expectation::Positive => matches > 0,
            Expectation::Negative => matches == 0,
        }
    }
}

/// `<dir>/<pos|neg>_<name>_<timestamp>.json`
pub fn fixture_file_name(
    dir: impl AsRef<Path>,
    name: &str,
    expectation: Expectation,
    timestamp: &str,
) -> PathBuf {
    dir.as_ref().join(format!(
        "{}_{name}_{timestamp}.json",
        expectation.prefix()
    ))
}

/// Per-frame clean-up applied before replaying, so recordings made with a
/// permissive noise floor behave like the live analyzer output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayFilter {
    pub min_amplitude: f32,
    pub max_peaks: Option<usize>,
}

impl Default for ReplayFilter {
    fn default() -> Self {
        Self::from(&ReplayConfig::default())
    }
}

impl From<&ReplayConfig> for ReplayFilter {
    fn from(config: &ReplayConfig) -> Self {
        Self {
            min_amplitude: config.min_amplitude,
            max_peaks: config.max_peaks,
        }
    }
}

impl ReplayFilter {
    /// Filtered copy of one recorded frame.
    pub fn apply(&self, waves: &WaveSet) -> WaveSet {
        let waves = waves.clone().above_floor(self.min_amplitude);
        match self.max_peaks {
            Some(count) => waves.strongest_n(count),
            None => waves,
        }
    }
}

/// Outcome of replaying one recording.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub frames: usize,
    /// Indices of the frames on which a match fired.
    pub match_frames: Vec<usize>,
}

impl ReplayReport {
    pub fn matches(&self) -> usize {
        self.match_frames.len()
    }
}

impl fmt::Display for ReplayReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} matches over {} frames", self.matches(), self.frames)
    }
}

/// Feeds every frame of `recording` through `matcher`.
pub fn replay(
    matcher: &mut dyn FrameMatcher,
    recording: &Recording,
    filter: &ReplayFilter,
) -> ReplayReport {
    let mut report = ReplayReport {
        frames: recording.len(),
        ..Default::default()
    };

    for (index, frame) in recording.frames().iter().enumerate() {
        let waves = filter.apply(frame);
        if let Some(peak) = waves.strongest() {
            tracing::trace!(frame = index, %peak, "replaying frame");
        }
        if matcher.step(&waves) {
            report.match_frames.push(index);
        }
    }

    tracing::debug!(gesture = matcher.label(), %report, "replay finished");
    report
}
