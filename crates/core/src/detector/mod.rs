use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::{
    AudioConfig, GestureDefinition, Matcher, MatcherConfig, PatternState, Result,
    SpectralAnalyzer, WaveSet,
};

/// Delivered to a gesture's sink when the gesture completes.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchEvent {
    pub gesture: Arc<str>,
    /// Zero-based index of the analysis frame that confirmed the match.
    pub frame: u64,
    /// Stream time at the end of that frame.
    pub stream_time: Duration,
}

/// Object-safe view of a [`Matcher`] so gestures with different state types
/// can share one detector.
pub trait FrameMatcher: Send {
    fn label(&self) -> &str;

    /// Advances by one frame; true when a match fired.
    fn step(&mut self, waves: &WaveSet) -> bool;
}

impl<S: PatternState> FrameMatcher for Matcher<S> {
    fn label(&self) -> &str {
        Matcher::label(self)
    }

    fn step(&mut self, waves: &WaveSet) -> bool {
        Matcher::step(self, waves)
    }
}

struct Registration {
    label: Arc<str>,
    matcher: Box<dyn FrameMatcher>,
    sink: Sender<MatchEvent>,
}

/// Owns the sample ring buffer and every registered matcher.
///
/// Samples are pushed from the delivery context. Each time the write index
/// wraps, the buffer is analysed once and the resulting frame is handed to
/// every matcher in registration order. Nothing here blocks: notifications go
/// through bounded queues and are dropped when a queue is full.
pub struct Detector {
    buffer: Vec<f32>,
    index: usize,
    analyzer: SpectralAnalyzer,
    registrations: Vec<Registration>,
    taps: Vec<Sender<WaveSet>>,
    matcher_config: MatcherConfig,
    frames: u64,
    dropped: Arc<AtomicUsize>,
}

impl Detector {
    /// Validates `config` and sizes the ring buffer from it.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            buffer: vec![0.0; config.buffer_size],
            index: 0,
            analyzer: SpectralAnalyzer::from_config(config),
            registrations: Vec::new(),
            taps: Vec::new(),
            matcher_config: MatcherConfig::default(),
            frames: 0,
            dropped: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Applies the sibling policy and queue capacity to gestures registered
    /// from now on.
    pub fn with_matcher_config(mut self, config: MatcherConfig) -> Self {
        self.matcher_config = config;
        self
    }

    /// Registers a gesture and returns the receiving end of its sink.
    pub fn register<S: PatternState>(
        &mut self,
        gesture: GestureDefinition<S>,
    ) -> Receiver<MatchEvent> {
        let label = gesture.shared_label();
        let matcher = Matcher::new(gesture).with_policy(self.matcher_config.policy);
        self.attach(label, Box::new(matcher))
    }

    /// Registers an already configured matcher.
    pub fn register_matcher<M: FrameMatcher + 'static>(
        &mut self,
        matcher: M,
    ) -> Receiver<MatchEvent> {
        let label: Arc<str> = Arc::from(matcher.label());
        self.attach(label, Box::new(matcher))
    }

    fn attach(&mut self, label: Arc<str>, matcher: Box<dyn FrameMatcher>) -> Receiver<MatchEvent> {
        let (sink, receiver) = bounded(self.matcher_config.notification_capacity.max(1));
        tracing::info!(gesture = %label, "registered gesture");
        self.registrations.push(Registration {
            label,
            matcher,
            sink,
        });
        receiver
    }

    /// Streams every analysed frame to the returned receiver. Frames are
    /// dropped while the receiver lags; the tap is removed once it hangs up.
    pub fn tap(&mut self, capacity: usize) -> Receiver<WaveSet> {
        let (sender, receiver) = bounded(capacity.max(1));
        self.taps.push(sender);
        receiver
    }

    /// Rate the analyzer converts bins to Hz with.
    pub fn sample_rate(&self) -> u32 {
        self.analyzer.sample_rate()
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    /// Analysis frames completed so far.
    pub fn frames_processed(&self) -> u64 {
        self.frames
    }

    /// Labels of the registered gestures, in registration order.
    pub fn gestures(&self) -> impl Iterator<Item = &str> {
        self.registrations.iter().map(|reg| &*reg.label)
    }

    /// Notifications and tapped frames dropped because a queue was full.
    pub fn dropped_notifications(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Shared drop counter, readable after the detector has been moved into
    /// a capture callback.
    pub fn drop_counter(&self) -> Arc<AtomicUsize> {
        self.dropped.clone()
    }

    /// Writes one mono sample and processes a frame when the buffer wraps.
    pub fn push_sample(&mut self, sample: f32) {
        self.buffer[self.index] = sample;
        self.index = (self.index + 1) % self.buffer.len();
        if self.index == 0 {
            self.process_frame();
        }
    }

    pub fn push_samples(&mut self, samples: &[f32]) {
        for sample in samples {
            self.push_sample(*sample);
        }
    }

    /// Pushes interleaved multi-channel data, averaging each frame to mono.
    pub fn push_interleaved<T, F>(&mut self, data: &[T], channels: usize, mut convert: F)
    where
        T: Copy,
        F: FnMut(T) -> f32,
    {
        if channels <= 1 {
            for sample in data {
                self.push_sample(convert(*sample));
            }
            return;
        }

        for frame in data.chunks(channels) {
            let sum: f32 = frame.iter().map(|sample| convert(*sample)).sum();
            self.push_sample(sum / frame.len() as f32);
        }
    }

    fn process_frame(&mut self) {
        let frame = self.frames;
        self.frames += 1;

        let waves = self.analyzer.analyze(&self.buffer);
        let stream_time = Duration::from_secs_f64(
            self.frames as f64 * self.buffer.len() as f64 / f64::from(self.sample_rate()),
        );

        for reg in &mut self.registrations {
            if !reg.matcher.step(&waves) {
                continue;
            }
            let event = MatchEvent {
                gesture: reg.label.clone(),
                frame,
                stream_time,
            };
            match reg.sink.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(gesture = %reg.label, frame, "match notification dropped");
                }
                Err(TrySendError::Disconnected(_)) => {
                    tracing::trace!(gesture = %reg.label, frame, "match sink closed");
                }
            }
        }

        if self.taps.is_empty() {
            return;
        }
        let dropped = &self.dropped;
        self.taps.retain(|tap| match tap.try_send(waves.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                dropped.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

impl fmt::Debug for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detector")
            .field("buffer_size", &self.buffer.len())
            .field("index", &self.index)
            .field("analyzer", &self.analyzer)
            .field(
                "gestures",
                &self.registrations.iter().map(|reg| &reg.label).collect::<Vec<_>>(),
            )
            .field("taps", &self.taps.len())
            .field("frames", &self.frames)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use super::*;
    use crate::{GestureConfig, Kikee, MatchPolicy, RisingWhistle};

    const RATE: u32 = 8_192;
    const LEN: usize = 1_024;

    fn audio_config() -> AudioConfig {
        AudioConfig {
            sample_rate: RATE,
            buffer_size: LEN,
            ..Default::default()
        }
    }

    /// One buffer of a tone; frequencies are multiples of the 8 Hz bin width
    /// so each block produces a single clean peak.
    fn block(freq: Option<u32>) -> Vec<f32> {
        (0..LEN as u32)
            .map(|i| match freq {
                Some(freq) => {
                    let cycle = (freq * i) % RATE;
                    0.3 * (2.0 * PI * cycle as f32 / RATE as f32).sin()
                }
                None => 0.0,
            })
            .collect()
    }

    fn rising_whistle_audio() -> Vec<f32> {
        [
            Some(1_000),
            Some(1_000),
            Some(1_000),
            Some(1_048),
            Some(1_096),
            Some(1_144),
            Some(1_192),
            Some(1_240),
            Some(848),
            Some(696),
            Some(448),
            None,
        ]
        .into_iter()
        .flat_map(block)
        .collect()
    }

    #[test]
    fn analyses_once_per_full_buffer() {
        let mut detector = Detector::new(&audio_config()).unwrap();
        let taps = detector.tap(8);

        detector.push_samples(&vec![0.0; LEN - 1]);
        assert_eq!(detector.frames_processed(), 0);
        assert!(taps.try_recv().is_err());

        detector.push_sample(0.0);
        assert_eq!(detector.frames_processed(), 1);
        assert!(taps.try_recv().unwrap().is_silent());

        detector.push_samples(&block(Some(1_000)));
        let waves = taps.try_recv().unwrap();
        assert_eq!(waves.strongest().map(|peak| peak.frequency), Some(1_000.0));
    }

    #[test]
    fn reports_a_whistled_gesture() {
        let mut detector = Detector::new(&audio_config()).unwrap();
        let gestures = GestureConfig::default();
        let rising = detector.register(RisingWhistle::definition(gestures.rising));
        let kikee = detector.register(Kikee::definition(gestures.kikee));

        detector.push_samples(&rising_whistle_audio());

        let event = rising.try_recv().expect("rising whistle should match");
        assert_eq!(&*event.gesture, "rising-whistle");
        assert_eq!(event.frame, 11);
        assert_eq!(event.stream_time, Duration::from_millis(1_500));
        assert!(rising.try_recv().is_err());
        assert!(kikee.try_recv().is_err());
        assert_eq!(
            detector.gestures().collect::<Vec<_>>(),
            vec!["rising-whistle", "kikee"]
        );
    }

    #[test]
    fn steady_off_bin_tone_is_not_a_gesture() {
        let audio = crate::AppConfig::live_defaults().audio;
        let mut detector = Detector::new(&audio).unwrap();
        let gestures = GestureConfig::default();
        let rising = detector.register(RisingWhistle::definition(gestures.rising));
        let kikee = detector.register(Kikee::definition(gestures.kikee));
        let frames = detector.tap(32);

        let rate = f64::from(audio.sample_rate);
        let hum: Vec<f32> = (0..audio.buffer_size * 20)
            .map(|i| (0.3 * (std::f64::consts::TAU * 1_003.0 * i as f64 / rate).sin()) as f32)
            .collect();
        detector.push_samples(&hum);
        detector.push_samples(&vec![0.0; audio.buffer_size * 2]);

        assert_eq!(detector.frames_processed(), 22);
        assert!(frames.try_iter().all(|waves| waves.len() <= 2));
        assert!(rising.try_recv().is_err());
        assert!(kikee.try_recv().is_err());
    }

    #[test]
    fn full_sinks_drop_instead_of_blocking() {
        let config = MatcherConfig {
            policy: MatchPolicy::ClearSiblings,
            notification_capacity: 1,
        };
        let mut detector = Detector::new(&audio_config())
            .unwrap()
            .with_matcher_config(config);
        let rising = detector.register(RisingWhistle::definition(Default::default()));
        let dropped = detector.drop_counter();

        let audio = rising_whistle_audio();
        detector.push_samples(&audio);
        detector.push_samples(&audio);

        assert_eq!(dropped.load(Ordering::Relaxed), 1);
        assert_eq!(rising.try_iter().count(), 1);

        detector.push_samples(&audio);
        assert_eq!(rising.try_recv().map(|event| event.frame), Ok(35));
    }

    #[test]
    fn closed_sinks_and_taps_are_tolerated() {
        let mut detector = Detector::new(&audio_config()).unwrap();
        drop(detector.register(RisingWhistle::definition(Default::default())));
        drop(detector.tap(1));

        detector.push_samples(&rising_whistle_audio());
        assert_eq!(detector.frames_processed(), 12);
        assert_eq!(detector.dropped_notifications(), 0);
        assert!(detector.taps.is_empty());
    }

    #[test]
    fn accepts_preconfigured_matchers() {
        let mut detector = Detector::new(&audio_config()).unwrap();
        let matcher = Matcher::new(RisingWhistle::definition(Default::default()))
            .with_policy(MatchPolicy::KeepSiblings)
            .record_transitions(true);
        let events = detector.register_matcher(matcher);

        detector.push_samples(&rising_whistle_audio());
        assert_eq!(events.try_iter().count(), 1);
    }

    #[test]
    fn downmixes_interleaved_input() {
        let mut detector = Detector::new(&AudioConfig {
            sample_rate: RATE,
            buffer_size: 4,
            ..Default::default()
        })
        .unwrap();

        let stereo: [i16; 6] = [16_384, -16_384, 8_192, 8_192, 0, 32_767];
        detector.push_interleaved(&stereo, 2, |s| s as f32 / 32_768.0);
        assert_eq!(detector.frames_processed(), 0);
        assert_eq!(&detector.buffer[..3], &[0.0, 0.25, 32_767.0 / 65_536.0]);

        detector.push_interleaved(&[0.5_f32], 1, |s| s);
        assert_eq!(detector.frames_processed(), 1);
        assert_eq!(detector.index, 0);
    }

    #[test]
    fn rejects_invalid_buffers() {
        let config = AudioConfig {
            buffer_size: 0,
            ..Default::default()
        };
        assert!(Detector::new(&config).is_err());
    }

    #[test]
    fn detector_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Detector>();
    }
}
