use std::{
    f32::consts::{FRAC_PI_2, PI},
    fmt,
    sync::Arc,
};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::AudioConfig;

/// Noise floor applied by the analyzer when no configuration says otherwise.
pub const DEFAULT_MIN_AMPLITUDE: f32 = 1.0e-3;

/// One frequency bin that survived the noise floor.
///
/// Fixtures written by older tools use capitalised keys, so both spellings
/// are accepted when reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpectralPeak {
    #[serde(alias = "Amplitude")]
    pub amplitude: f32,
    #[serde(alias = "Frequency")]
    pub frequency: f32,
    #[serde(alias = "PhaseOffset")]
    pub phase_offset: f32,
}

impl SpectralPeak {
    /// Builds a peak from its amplitude, frequency in Hz and phase.
    pub fn new(amplitude: f32, frequency: f32, phase_offset: f32) -> Self {
        Self {
            amplitude,
            frequency,
            phase_offset,
        }
    }

    /// Value of the sinusoid this peak describes at time `t` seconds.
    pub fn value(&self, t: f32) -> f32 {
        self.amplitude * (t * 2.0 * PI * self.frequency + self.phase_offset).sin()
    }
}

impl fmt::Display for SpectralPeak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Amp={}, Freq={}, Phase={}",
            self.amplitude, self.frequency, self.phase_offset
        )
    }
}

/// Spectral peaks of one buffer, strongest first.
///
/// Every constructor keeps the amplitude ordering, including deserialisation,
/// so guards may rely on the first matching peak being the loudest one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<SpectralPeak>")]
pub struct WaveSet(Vec<SpectralPeak>);

impl WaveSet {
    /// The silent frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from arbitrary peaks, ordering them by amplitude.
    pub fn from_peaks(mut peaks: Vec<SpectralPeak>) -> Self {
        peaks.sort_by(|a, b| b.amplitude.total_cmp(&a.amplitude));
        Self(peaks)
    }

    /// Peaks in descending amplitude order.
    pub fn peaks(&self) -> &[SpectralPeak] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SpectralPeak> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when nothing rose above the noise floor this frame.
    pub fn is_silent(&self) -> bool {
        self.0.is_empty()
    }

    /// The loudest peak, if any.
    pub fn strongest(&self) -> Option<&SpectralPeak> {
        self.0.first()
    }

    /// Drops every peak at or below `floor`.
    pub fn above_floor(mut self, floor: f32) -> Self {
        self.0.retain(|peak| peak.amplitude > floor);
        self
    }

    /// Keeps at most the `count` strongest peaks.
    pub fn strongest_n(mut self, count: usize) -> Self {
        self.0.truncate(count);
        self
    }

    /// Whether any peak lies strictly between `low` and `high`.
    pub fn has_frequency_in_range(&self, low: f32, high: f32) -> bool {
        self.0
            .iter()
            .any(|peak| low < peak.frequency && peak.frequency < high)
    }

    /// Whether any peak lies strictly above `freq`.
    pub fn has_frequency_above(&self, freq: f32) -> bool {
        self.0.iter().any(|peak| peak.frequency > freq)
    }

    /// Whether any peak lies strictly below `freq`.
    pub fn has_frequency_below(&self, freq: f32) -> bool {
        self.0.iter().any(|peak| peak.frequency < freq)
    }

    /// Frequency of the loudest peak strictly between `low` and `high`.
    pub fn loudest_frequency_in_range(&self, low: f32, high: f32) -> Option<f32> {
        self.0
            .iter()
            .find(|peak| low < peak.frequency && peak.frequency < high)
            .map(|peak| peak.frequency)
    }

    pub fn loudest_frequency_above(&self, freq: f32) -> Option<f32> {
        self.loudest_frequency_in_range(freq, f32::INFINITY)
    }

    /// Like [`loudest_frequency_above`](Self::loudest_frequency_above) but
    /// also accepts a peak sitting exactly on `freq`.
    pub fn loudest_frequency_from(&self, freq: f32) -> Option<f32> {
        self.0
            .iter()
            .find(|peak| peak.frequency >= freq)
            .map(|peak| peak.frequency)
    }

    pub fn loudest_frequency_below(&self, freq: f32) -> Option<f32> {
        self.loudest_frequency_in_range(f32::NEG_INFINITY, freq)
    }

    /// Highest frequency present, regardless of amplitude.
    pub fn highest_frequency(&self) -> Option<f32> {
        self.0
            .iter()
            .map(|peak| peak.frequency)
            .max_by(|a, b| a.total_cmp(b))
    }

    /// Highest frequency strictly below `freq`.
    pub fn highest_frequency_below(&self, freq: f32) -> Option<f32> {
        self.0
            .iter()
            .map(|peak| peak.frequency)
            .filter(|frequency| *frequency < freq)
            .max_by(|a, b| a.total_cmp(b))
    }

    /// Sum of every peak's sinusoid at time `t` seconds.
    pub fn value(&self, t: f32) -> f32 {
        self.0.iter().map(|peak| peak.value(t)).sum()
    }
}

impl From<Vec<SpectralPeak>> for WaveSet {
    fn from(peaks: Vec<SpectralPeak>) -> Self {
        Self::from_peaks(peaks)
    }
}

impl<'a> IntoIterator for &'a WaveSet {
    type Item = &'a SpectralPeak;
    type IntoIter = std::slice::Iter<'a, SpectralPeak>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for WaveSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, peak) in self.0.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{peak}")?;
        }
        Ok(())
    }
}

/// Turns a block of mono samples into a [`WaveSet`].
///
/// The FFT plan and its buffers are built for the first block size seen and
/// reused afterwards, so steady-state analysis only allocates the output.
/// The analyzer is `Send` and can live inside an audio callback.
/// Output depends on nothing but the input block and the configuration.
pub struct SpectralAnalyzer {
    sample_rate: u32,
    min_amplitude: f32,
    max_peaks: Option<usize>,
    fft: Option<FftResources>,
}

impl SpectralAnalyzer {
    /// Creates an analyzer with the default noise floor and no peak cap.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            min_amplitude: DEFAULT_MIN_AMPLITUDE,
            max_peaks: None,
            fft: None,
        }
    }

    /// Creates an analyzer from the audio section of the configuration and
    /// pre-plans the FFT for the configured buffer size.
    pub fn from_config(config: &AudioConfig) -> Self {
        let mut analyzer = Self::new(config.sample_rate)
            .with_min_amplitude(config.min_amplitude)
            .with_max_peaks(config.max_peaks);
        if config.buffer_size >= 2 {
            analyzer.prepare_fft(config.buffer_size);
        }
        analyzer
    }

    /// Peaks at or below this amplitude are dropped.
    pub fn with_min_amplitude(mut self, min_amplitude: f32) -> Self {
        self.min_amplitude = min_amplitude;
        self
    }

    /// Keeps only the strongest `max_peaks` peaks when set.
    pub fn with_max_peaks(mut self, max_peaks: Option<usize>) -> Self {
        self.max_peaks = max_peaks;
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn min_amplitude(&self) -> f32 {
        self.min_amplitude
    }

    /// Analyses one block. Blocks shorter than two samples produce silence.
    pub fn analyze(&mut self, samples: &[f32]) -> WaveSet {
        let len = samples.len();
        if len < 2 {
            return WaveSet::new();
        }

        let bin_hz = self.sample_rate as f32 / len as f32;
        let scale = 2.0 / len as f32;
        let min_amplitude = self.min_amplitude;
        let fft = self.prepare_fft(len);
        fft.input.copy_from_slice(samples);

        if let Err(err) =
            fft.plan
                .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)
        {
            tracing::warn!(%err, len, "fft rejected analysis buffers");
            return WaveSet::new();
        }

        let peaks = fft.spectrum[..len / 2]
            .iter()
            .enumerate()
            .map(|(index, bin)| interpret_bin(*bin, index, bin_hz, scale))
            .filter(|peak| peak.amplitude > min_amplitude)
            .collect();

        let waves = WaveSet::from_peaks(peaks);
        match self.max_peaks {
            Some(count) => waves.strongest_n(count),
            None => waves,
        }
    }

    fn prepare_fft(&mut self, size: usize) -> &mut FftResources {
        let resources = match self.fft.take() {
            Some(fft) if fft.size == size => fft,
            _ => FftResources::new(size),
        };
        self.fft.insert(resources)
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl FftResources {
    fn new(size: usize) -> Self {
        let plan = RealFftPlanner::<f32>::new().plan_fft_forward(size);
        let scratch = plan.make_scratch_vec();
        let spectrum = plan.make_output_vec();
        let input = plan.make_input_vec();
        Self {
            size,
            plan,
            scratch,
            spectrum,
            input,
        }
    }
}

impl fmt::Debug for SpectralAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralAnalyzer")
            .field("sample_rate", &self.sample_rate)
            .field("min_amplitude", &self.min_amplitude)
            .field("max_peaks", &self.max_peaks)
            .field("fft", &self.fft)
            .finish()
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

fn interpret_bin(bin: Complex32, index: usize, bin_hz: f32, scale: f32) -> SpectralPeak {
    SpectralPeak {
        amplitude: bin.norm() * scale,
        frequency: index as f32 * bin_hz,
        phase_offset: approximate_phase(bin.re, bin.im),
    }
}

/// `atan(im / re) + π/2`, which is only correct modulo π. Matching never
/// looks at phase, so the cheaper form is kept. A zero bin maps to π/2.
fn approximate_phase(re: f32, im: f32) -> f32 {
    let ratio = im / re;
    let ratio = if ratio.is_nan() { 0.0 } else { ratio };
    ratio.atan() + FRAC_PI_2
}
