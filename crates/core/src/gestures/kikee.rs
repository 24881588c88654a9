//! "Ki-kee": a mid tone, an optional short pause, then a jump above the
//! first note that slides back down.

use serde::{Deserialize, Serialize};

use crate::{GestureDefinition, PatternState, Transition, WaveSet};

pub const KIKEE: &str = "kikee";

/// Tuning for [`Kikee`]. All frequencies are in Hz and all bounds are
/// exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KikeeParams {
    /// Band that opens the gesture.
    pub start_low: f32,
    pub start_high: f32,
    /// Band the first note may be held in.
    pub hold_low: f32,
    pub hold_high: f32,
    /// The second note has to clear this frequency.
    pub peak_above: f32,
    /// The slide ends once a peak drops below this frequency.
    pub finish_below: f32,
    /// Empty frames tolerated after the one that enters `Quiet`, so the
    /// pause may last `quiet_frames + 1` frames. The rising whistle's
    /// parameter of the same name counts the entering frame too.
    pub quiet_frames: u32,
    /// Downward steps the slide needs before it may finish.
    pub min_descent_steps: u32,
}

impl Default for KikeeParams {
    fn default() -> Self {
        Self {
            start_low: 100.0,
            start_high: 1_300.0,
            hold_low: 1_000.0,
            hold_high: 1_300.0,
            peak_above: 1_350.0,
            finish_below: 1_100.0,
            quiet_frames: 2,
            min_descent_steps: 3,
        }
    }
}

/// States of the ki-kee gesture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Kikee {
    Start,
    /// First note heard.
    Init,
    /// Pause between the notes.
    Quiet { count: u32 },
    /// Second note, sliding down from `freq`.
    Peak { count: u32, freq: f32 },
    /// Waiting for the closing silence.
    Success,
}

impl Kikee {
    /// The gesture under the [`KIKEE`] label.
    pub fn definition(params: KikeeParams) -> GestureDefinition<Self> {
        GestureDefinition::new(KIKEE, Kikee::Start, params)
    }

    fn peak(p: &KikeeParams, waves: &WaveSet) -> Option<Self> {
        if !waves.has_frequency_above(p.peak_above) {
            return None;
        }
        waves
            .highest_frequency()
            .map(|freq| Kikee::Peak { count: 0, freq })
    }
}

impl PatternState for Kikee {
    type Params = KikeeParams;

    fn name(&self) -> String {
        match self {
            Kikee::Start => "START".to_string(),
            Kikee::Init => "INIT".to_string(),
            Kikee::Quiet { count } => format!("QUIET({count})"),
            Kikee::Peak { count, freq } => format!("PEAK({count}, {freq:.2})"),
            Kikee::Success => "SUCCESS".to_string(),
        }
    }

    fn handle(&self, p: &KikeeParams, waves: &WaveSet) -> Transition<Self> {
        let next = match *self {
            Kikee::Start => waves
                .has_frequency_in_range(p.start_low, p.start_high)
                .then_some(Kikee::Init),
            Kikee::Init => Self::peak(p, waves).or_else(|| {
                if waves.has_frequency_in_range(p.hold_low, p.hold_high) {
                    Some(Kikee::Init)
                } else if waves.is_silent() {
                    Some(Kikee::Quiet { count: 0 })
                } else {
                    None
                }
            }),
            Kikee::Quiet { count } => Self::peak(p, waves).or_else(|| {
                (waves.is_silent() && count < p.quiet_frames)
                    .then_some(Kikee::Quiet { count: count + 1 })
            }),
            Kikee::Peak { count, freq } => {
                if waves.has_frequency_below(p.finish_below) && count >= p.min_descent_steps {
                    Some(Kikee::Success)
                } else {
                    waves
                        .highest_frequency_below(freq)
                        .map(|freq| Kikee::Peak {
                            count: count + 1,
                            freq,
                        })
                }
            }
            Kikee::Success => {
                if waves.is_silent() {
                    return Transition::Matched;
                }
                Some(Kikee::Success)
            }
        };

        match next {
            Some(state) => Transition::Next(state),
            None => Transition::Abandoned,
        }
    }
}
