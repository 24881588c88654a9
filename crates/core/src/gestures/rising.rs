//! Rising whistle: a steady tone, a climb, a drop well below the peak, then
//! silence.

use serde::{Deserialize, Serialize};

use crate::{GestureDefinition, PatternState, Transition, WaveSet};

pub const RISING_WHISTLE: &str = "rising-whistle";

/// Tuning for [`RisingWhistle`]. All frequencies are in Hz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RisingWhistleParams {
    /// Lower bound (exclusive) of the opening tone.
    pub sustain_low: f32,
    /// Upper bound (exclusive) of the opening tone.
    pub sustain_high: f32,
    /// Smallest jump that counts as a rise; a jump of exactly this size
    /// qualifies.
    pub rise_step: f32,
    /// How far above the sustained tone the climb has to reach.
    pub rise_span: f32,
    /// How far below the peak the drop has to go.
    pub fall_span: f32,
    /// Empty frames tolerated while sustaining, counting the one that
    /// enters `Quiet`. With 1 the candidate survives a single gap.
    pub quiet_frames: u32,
    /// Rises required after the first one before a drop can succeed.
    pub min_rise_cycles: u32,
}

impl Default for RisingWhistleParams {
    fn default() -> Self {
        Self {
            sustain_low: 900.0,
            sustain_high: 1_300.0,
            rise_step: 25.0,
            rise_span: 200.0,
            fall_span: 500.0,
            quiet_frames: 1,
            min_rise_cycles: 1,
        }
    }
}

/// States of the rising whistle. `freq` is the tone the next guard is
/// measured against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RisingWhistle {
    Start,
    /// Holding a tone inside the sustain band.
    Sustain {
        freq: f32,
    },
    /// A gap while sustaining; `count` gaps seen before this one.
    Quiet {
        count: u32,
        freq: f32,
    },
    /// Climbing towards `target`; `count` rises after the first.
    Rising {
        count: u32,
        freq: f32,
        target: f32,
    },
    /// Dropping towards `target`.
    Falling {
        count: u32,
        freq: f32,
        target: f32,
    },
    /// Waiting for the closing silence.
    Success,
}

impl RisingWhistle {
    /// The gesture under the [`RISING_WHISTLE`] label.
    pub fn definition(params: RisingWhistleParams) -> GestureDefinition<Self> {
        GestureDefinition::new(RISING_WHISTLE, RisingWhistle::Start, params)
    }

    /// Shared by `Sustain` and `Quiet`: a jump starts the climb, an in-range
    /// tone keeps (or resumes) the sustain.
    fn from_sustain(p: &RisingWhistleParams, freq: f32, waves: &WaveSet) -> Option<Self> {
        if let Some(next) = waves.loudest_frequency_from(freq + p.rise_step) {
            return Some(RisingWhistle::Rising {
                count: 0,
                freq: next,
                target: freq + p.rise_span,
            });
        }
        waves
            .loudest_frequency_in_range(p.sustain_low, p.sustain_high)
            .map(|freq| RisingWhistle::Sustain { freq })
    }
}

impl PatternState for RisingWhistle {
    type Params = RisingWhistleParams;

    fn name(&self) -> String {
        match self {
            RisingWhistle::Start => "START".to_string(),
            RisingWhistle::Sustain { freq } => format!("SUSTAIN({freq:.2})"),
            RisingWhistle::Quiet { count, freq } => format!("QUIET({count}, {freq:.2})"),
            RisingWhistle::Rising {
                count,
                freq,
                target,
            } => format!("RISING({count}, {freq:.2}, {target:.2})"),
            RisingWhistle::Falling {
                count,
                freq,
                target,
            } => format!("FALLING({count}, {freq:.2}, {target:.2})"),
            RisingWhistle::Success => "SUCCESS".to_string(),
        }
    }

    fn handle(&self, p: &RisingWhistleParams, waves: &WaveSet) -> Transition<Self> {
        let next = match *self {
            RisingWhistle::Start => waves
                .loudest_frequency_in_range(p.sustain_low, p.sustain_high)
                .map(|freq| RisingWhistle::Sustain { freq }),
            RisingWhistle::Sustain { freq } => Self::from_sustain(p, freq, waves).or_else(|| {
                (waves.is_silent() && p.quiet_frames > 0)
                    .then_some(RisingWhistle::Quiet { count: 0, freq })
            }),
            RisingWhistle::Quiet { count, freq } => {
                Self::from_sustain(p, freq, waves).or_else(|| {
                    (waves.is_silent() && count + 1 < p.quiet_frames).then_some(
                        RisingWhistle::Quiet {
                            count: count + 1,
                            freq,
                        },
                    )
                })
            }
            RisingWhistle::Rising {
                count,
                freq,
                target,
            } => {
                if let Some(next) = waves.loudest_frequency_from(freq + p.rise_step) {
                    Some(RisingWhistle::Rising {
                        count: count + 1,
                        freq: next,
                        target,
                    })
                } else if freq >= target && waves.has_frequency_below(freq) {
                    waves
                        .loudest_frequency_below(freq)
                        .map(|next| RisingWhistle::Falling {
                            count,
                            freq: next,
                            target: freq - p.fall_span,
                        })
                } else if waves.has_frequency_in_range(freq - p.rise_step, freq + p.rise_step) {
                    Some(*self)
                } else {
                    None
                }
            }
            RisingWhistle::Falling {
                count,
                freq,
                target,
            } => {
                if count >= p.min_rise_cycles && waves.has_frequency_below(target) {
                    Some(RisingWhistle::Success)
                } else {
                    waves
                        .loudest_frequency_below(freq)
                        .map(|next| RisingWhistle::Falling {
                            count,
                            freq: next,
                            target,
                        })
                }
            }
            RisingWhistle::Success => {
                if waves.is_silent() {
                    return Transition::Matched;
                }
                Some(RisingWhistle::Success)
            }
        };

        match next {
            Some(state) => Transition::Next(state),
            None => Transition::Abandoned,
        }
    }
}
