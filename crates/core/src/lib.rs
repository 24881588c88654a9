//! Core library for the Whistler gesture listener.
//!
//! Audio arrives as mono samples and fills the [`Detector`]'s ring buffer.
//! Every full buffer is turned into a [`WaveSet`] by the
//! [`SpectralAnalyzer`], and each registered gesture's [`Matcher`] advances
//! its candidate automata over that frame. Completed gestures are reported
//! through non-blocking [`MatchEvent`] queues.
//!
//! Capturing from a real input device needs the `capture` feature.

pub mod analysis;
#[cfg(feature = "capture")]
pub mod audio;
pub mod config;
pub mod detector;
pub mod error;
pub mod gestures;
pub mod matcher;
pub mod pattern;
pub mod record;

pub use analysis::{SpectralAnalyzer, SpectralPeak, WaveSet};
#[cfg(feature = "capture")]
pub use audio::AudioCapture;
pub use config::{AppConfig, AudioConfig, GestureConfig, MatcherConfig, ReplayConfig};
pub use detector::{Detector, FrameMatcher, MatchEvent};
pub use error::{Result, WhistlerError};
pub use gestures::{Kikee, KikeeParams, RisingWhistle, RisingWhistleParams};
pub use matcher::{MatchPolicy, Matcher, TransitionRecord, TransitionTarget};
pub use pattern::{GestureDefinition, PatternState, Transition};
pub use record::{Expectation, Recording, ReplayFilter, ReplayReport};
