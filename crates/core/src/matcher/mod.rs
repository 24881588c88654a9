use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{GestureDefinition, PatternState, Transition, WaveSet};

/// What happens to the other live candidates once one of them matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Drop every candidate carried over from earlier frames. A candidate
    /// spawned by the start state on the matching frame is still kept.
    #[default]
    ClearSiblings,
    /// Let siblings continue towards matches of their own.
    KeepSiblings,
}

/// Where a candidate went on a given frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionTarget {
    State(String),
    Matched,
    Abandoned,
}

impl fmt::Display for TransitionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionTarget::State(name) => f.write_str(name),
            TransitionTarget::Matched => f.write_str("MATCH"),
            TransitionTarget::Abandoned => f.write_str("abandoned"),
        }
    }
}

/// One `(source, destination)` pair observed during a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRecord {
    pub source: String,
    pub target: TransitionTarget,
}

impl fmt::Display for TransitionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}

/// Runs every live interpretation of one gesture in lock step.
///
/// Each frame advances all candidates, drops those that fail their guards,
/// and offers the frame to the start state so a new interpretation can begin
/// while others are in flight. Equal successors are merged, so a held tone
/// keeps one candidate per distinct state instead of one per frame.
#[derive(Debug)]
pub struct Matcher<S: PatternState> {
    gesture: GestureDefinition<S>,
    policy: MatchPolicy,
    candidates: Vec<S>,
    next: Vec<S>,
    trace: Option<Vec<TransitionRecord>>,
    frames: u64,
    matches: u64,
}

impl<S: PatternState> Matcher<S> {
    /// A matcher with no live candidates and the default [`MatchPolicy`].
    pub fn new(gesture: GestureDefinition<S>) -> Self {
        Self {
            gesture,
            policy: MatchPolicy::default(),
            candidates: Vec::new(),
            next: Vec::new(),
            trace: None,
            frames: 0,
            matches: 0,
        }
    }

    /// Sets what happens to siblings once a candidate matches.
    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Keeps the transitions of the latest step for [`Matcher::transitions`].
    pub fn record_transitions(mut self, enabled: bool) -> Self {
        self.trace = enabled.then(Vec::new);
        self
    }

    /// The gesture this matcher recognises.
    pub fn gesture(&self) -> &GestureDefinition<S> {
        &self.gesture
    }

    pub fn label(&self) -> &str {
        self.gesture.label()
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    /// Candidates that survived the latest step.
    pub fn candidates(&self) -> &[S] {
        &self.candidates
    }

    /// Transitions taken during the latest step, when recording is enabled.
    pub fn transitions(&self) -> &[TransitionRecord] {
        self.trace.as_deref().unwrap_or(&[])
    }

    /// Frames stepped since construction.
    pub fn frames_seen(&self) -> u64 {
        self.frames
    }

    /// Frames on which a match fired.
    pub fn matches(&self) -> u64 {
        self.matches
    }

    /// Forgets every candidate.
    pub fn reset(&mut self) {
        self.candidates.clear();
        self.next.clear();
        if let Some(trace) = self.trace.as_mut() {
            trace.clear();
        }
    }

    /// Advances the automaton by one frame and reports whether any candidate
    /// completed the gesture on it.
    pub fn step(&mut self, waves: &WaveSet) -> bool {
        self.frames += 1;
        if let Some(trace) = self.trace.as_mut() {
            trace.clear();
        }

        let label = self.gesture.label();
        let params = self.gesture.params();
        let mut matched = false;

        for state in self.candidates.drain(..) {
            let outcome = state.handle(params, waves);
            observe(label, &mut self.trace, &state, &outcome);
            match outcome {
                Transition::Next(next) => admit(&mut self.next, next),
                Transition::Matched => matched = true,
                Transition::Abandoned => {}
            }
        }

        if matched && self.policy == MatchPolicy::ClearSiblings && !self.next.is_empty() {
            tracing::trace!(
                gesture = label,
                cleared = self.next.len(),
                "match cleared sibling candidates"
            );
            self.next.clear();
        }

        let start = self.gesture.start();
        match start.handle(params, waves) {
            Transition::Abandoned => {}
            outcome => {
                observe(label, &mut self.trace, start, &outcome);
                matched |= outcome.is_matched();
                if let Transition::Next(next) = outcome {
                    admit(&mut self.next, next);
                }
            }
        }

        std::mem::swap(&mut self.candidates, &mut self.next);

        if matched {
            self.matches += 1;
            tracing::debug!(gesture = label, frame = self.frames, "gesture matched");
        }
        matched
    }
}

fn admit<S: PatternState>(next: &mut Vec<S>, state: S) {
    if !next.contains(&state) {
        next.push(state);
    }
}

fn observe<S: PatternState>(
    gesture: &str,
    trace: &mut Option<Vec<TransitionRecord>>,
    source: &S,
    outcome: &Transition<S>,
) {
    tracing::trace!(
        gesture,
        source = %source.name(),
        dest = %target_of(outcome),
        "transition"
    );
    if let Some(trace) = trace.as_mut() {
        trace.push(TransitionRecord {
            source: source.name(),
            target: target_of(outcome),
        });
    }
}

fn target_of<S: PatternState>(outcome: &Transition<S>) -> TransitionTarget {
    match outcome {
        Transition::Next(state) => TransitionTarget::State(state.name()),
        Transition::Matched => TransitionTarget::Matched,
        Transition::Abandoned => TransitionTarget::Abandoned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RisingWhistle, RisingWhistleParams, SpectralPeak};

    fn tone(freq: f32) -> WaveSet {
        WaveSet::from_peaks(vec![SpectralPeak::new(0.3, freq, 0.0)])
    }

    fn rising_matcher() -> Matcher<RisingWhistle> {
        Matcher::new(RisingWhistle::definition(RisingWhistleParams::default()))
            .record_transitions(true)
    }

    fn canonical_frames() -> Vec<WaveSet> {
        let mut frames: Vec<WaveSet> = Vec::new();
        frames.extend([1_000.0, 1_000.0, 1_000.0].map(tone));
        frames.extend([1_050.0, 1_100.0, 1_150.0, 1_200.0, 1_250.0].map(tone));
        frames.extend([850.0, 700.0, 450.0].map(tone));
        frames.push(WaveSet::new());
        frames
    }

    fn run(matcher: &mut Matcher<RisingWhistle>, frames: &[WaveSet]) -> Vec<usize> {
        frames
            .iter()
            .enumerate()
            .filter_map(|(index, waves)| matcher.step(waves).then_some(index))
            .collect()
    }

    #[test]
    fn silence_never_matches() {
        let mut matcher = rising_matcher();
        for _ in 0..100 {
            assert!(!matcher.step(&WaveSet::new()));
            assert!(matcher.candidates().is_empty());
        }
        assert_eq!(matcher.frames_seen(), 100);
        assert_eq!(matcher.matches(), 0);
    }

    #[test]
    fn canonical_gesture_matches_once() {
        let frames = canonical_frames();
        for policy in [MatchPolicy::ClearSiblings, MatchPolicy::KeepSiblings] {
            let mut matcher = rising_matcher().with_policy(policy);
            let hits = run(&mut matcher, &frames);
            assert_eq!(hits, vec![frames.len() - 1], "policy {policy:?}");

            for _ in 0..10 {
                assert!(!matcher.step(&WaveSet::new()));
            }
            assert_eq!(matcher.matches(), 1);
        }
    }

    #[test]
    fn gesture_without_trailing_silence_does_not_match() {
        let mut frames = canonical_frames();
        frames.pop();
        let mut matcher = rising_matcher();
        assert!(run(&mut matcher, &frames).is_empty());
        assert!(matcher
            .candidates()
            .iter()
            .any(|state| *state == RisingWhistle::Success));
    }

    #[test]
    fn failed_candidates_disappear_next_frame() {
        let mut matcher = rising_matcher();
        matcher.step(&tone(1_000.0));
        assert_eq!(
            matcher.candidates(),
            &[RisingWhistle::Sustain { freq: 1_000.0 }]
        );

        matcher.step(&tone(600.0));
        assert!(matcher.transitions().contains(&TransitionRecord {
            source: "SUSTAIN(1000.00)".to_string(),
            target: TransitionTarget::Abandoned,
        }));
        assert!(matcher.candidates().is_empty());

        matcher.step(&tone(600.0));
        assert!(matcher.transitions().is_empty());
    }

    #[test]
    fn overlapping_candidates_evolve_independently() {
        let mut matcher = rising_matcher();
        matcher.step(&tone(1_000.0));
        matcher.step(&tone(1_050.0));
        assert_eq!(
            matcher.candidates(),
            &[
                RisingWhistle::Rising {
                    count: 0,
                    freq: 1_050.0,
                    target: 1_200.0,
                },
                RisingWhistle::Sustain { freq: 1_050.0 },
            ]
        );

        matcher.step(&tone(1_060.0));
        assert_eq!(
            matcher.candidates(),
            &[
                RisingWhistle::Rising {
                    count: 0,
                    freq: 1_050.0,
                    target: 1_200.0,
                },
                RisingWhistle::Sustain { freq: 1_060.0 },
            ]
        );
        let rendered: Vec<String> = matcher.transitions().iter().map(|t| t.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "RISING(0, 1050.00, 1200.00) -> RISING(0, 1050.00, 1200.00)",
                "SUSTAIN(1050.00) -> SUSTAIN(1060.00)",
                "START -> SUSTAIN(1060.00)",
            ]
        );
    }

    #[test]
    fn held_tone_keeps_one_candidate() {
        let mut matcher = rising_matcher();
        let hum = tone(1_000.0);
        for _ in 0..5_000 {
            assert!(!matcher.step(&hum));
            assert_eq!(
                matcher.candidates(),
                &[RisingWhistle::Sustain { freq: 1_000.0 }]
            );
        }

        let mut kikee = Matcher::new(crate::Kikee::definition(Default::default()));
        for _ in 0..5_000 {
            kikee.step(&tone(1_100.0));
        }
        assert_eq!(kikee.candidates(), &[crate::Kikee::Init]);
    }

    #[test]
    fn exact_rise_steps_reach_the_match() {
        let mut frames: Vec<WaveSet> = [1_000.0, 1_000.0, 1_000.0].map(tone).to_vec();
        frames.extend((1..=10).map(|step| tone(1_000.0 + 25.0 * step as f32)));
        frames.extend([800.0, 600.0, 450.0].map(tone));
        frames.push(WaveSet::new());

        let mut matcher = rising_matcher();
        assert_eq!(run(&mut matcher, &frames), vec![frames.len() - 1]);
    }

    /// Arms on sound and matches on silence once it has heard enough frames;
    /// shorter runs keep waiting through silence.
    #[derive(Debug, Clone, PartialEq)]
    enum Pulse {
        Start,
        Armed(u32),
    }

    impl PatternState for Pulse {
        type Params = u32;

        fn name(&self) -> String {
            format!("{self:?}")
        }

        fn handle(&self, needed: &u32, waves: &WaveSet) -> Transition<Self> {
            match (self, waves.is_silent()) {
                (Pulse::Start, false) => Transition::Next(Pulse::Armed(1)),
                (Pulse::Start, true) => Transition::Abandoned,
                (Pulse::Armed(n), false) => Transition::Next(Pulse::Armed(n + 1)),
                (Pulse::Armed(n), true) if n >= needed => Transition::Matched,
                (Pulse::Armed(_), true) => Transition::Next(self.clone()),
            }
        }
    }

    fn pulse_matches(policy: MatchPolicy) -> u64 {
        let mut matcher =
            Matcher::new(GestureDefinition::new("pulse", Pulse::Start, 3)).with_policy(policy);
        let sound = tone(500.0);
        let silence = WaveSet::new();
        for waves in [&sound, &sound, &sound, &silence, &sound, &silence] {
            matcher.step(waves);
        }
        matcher.matches()
    }

    #[test]
    fn clear_siblings_drops_lagging_candidates() {
        assert_eq!(pulse_matches(MatchPolicy::ClearSiblings), 1);
    }

    #[test]
    fn keep_siblings_lets_them_finish() {
        assert_eq!(pulse_matches(MatchPolicy::KeepSiblings), 2);
    }

    #[test]
    fn reset_forgets_candidates() {
        let mut matcher = rising_matcher();
        matcher.step(&tone(1_000.0));
        assert!(!matcher.candidates().is_empty());
        matcher.reset();
        assert!(matcher.candidates().is_empty());
        assert_eq!(matcher.label(), "rising-whistle");
    }
}
