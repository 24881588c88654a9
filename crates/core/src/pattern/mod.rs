//! Gesture automata.
//!
//! A gesture is a closed set of states, usually an enum, whose `handle`
//! method walks an ordered guard chain over the current [`WaveSet`]. The
//! [`Matcher`](crate::Matcher) runs many copies of the automaton at once, one
//! per candidate interpretation of the incoming frames.

use std::{fmt, sync::Arc};

use crate::WaveSet;

/// Outcome of feeding one frame to a candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition<S> {
    /// The candidate lives on as `S`, which may equal the current state.
    Next(S),
    /// The gesture completed on this frame.
    Matched,
    /// No guard held; the candidate is dropped.
    Abandoned,
}

impl<S> Transition<S> {
    /// True for the match marker.
    pub fn is_matched(&self) -> bool {
        matches!(self, Transition::Matched)
    }
}

/// One state of a gesture automaton.
///
/// States are immutable values. `handle` must only look at `params` and the
/// frame, and its guard chain must end in [`Transition::Abandoned`] so every
/// frame has a defined outcome. Two equal states therefore have the same
/// future, which lets the matcher keep only one of them.
pub trait PatternState: Clone + PartialEq + fmt::Debug + Send + 'static {
    /// Per-gesture numeric configuration shared by all candidates.
    type Params: fmt::Debug + Send + Sync + 'static;

    /// Human readable label used in transition traces.
    fn name(&self) -> String;

    /// Walks the guard chain for one frame.
    fn handle(&self, params: &Self::Params, waves: &WaveSet) -> Transition<Self>;
}

/// Everything a [`Matcher`](crate::Matcher) needs to recognise one gesture:
/// its label, the stateless start state and the numeric parameters.
#[derive(Debug, Clone)]
pub struct GestureDefinition<S: PatternState> {
    label: Arc<str>,
    start: S,
    params: Arc<S::Params>,
}

impl<S: PatternState> GestureDefinition<S> {
    /// Bundles a label, the start state and the gesture's parameters.
    pub fn new(label: impl Into<Arc<str>>, start: S, params: S::Params) -> Self {
        Self {
            label: label.into(),
            start,
            params: Arc::new(params),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn shared_label(&self) -> Arc<str> {
        self.label.clone()
    }

    pub fn start(&self) -> &S {
        &self.start
    }

    pub fn params(&self) -> &S::Params {
        &self.params
    }
}
