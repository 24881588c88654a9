//! Microphone capture via CPAL.
//!
//! The capture handle owns the input device for its whole lifetime. The
//! [`Detector`] is moved into the stream callback, so analysis and matching
//! run on the audio thread and results leave it only through the detector's
//! notification queues.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SizedSample, StreamConfig};

use crate::{Detector, Result, WhistlerError};

/// Where the capture handle is in its start / stop / resume / close cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Running,
    Paused,
}

impl Lifecycle {
    fn check_start(self) -> Result<()> {
        match self {
            Lifecycle::Idle => Ok(()),
            _ => Err(WhistlerError::device(
                "capture already started; use resume after stop",
            )),
        }
    }

    /// Whether the stream has to be played again.
    fn check_resume(self) -> Result<bool> {
        match self {
            Lifecycle::Idle => Err(WhistlerError::device("capture has not been started")),
            Lifecycle::Running => Ok(false),
            Lifecycle::Paused => Ok(true),
        }
    }
}

/// Input device handle with an explicit start / stop / resume / close
/// lifecycle.
pub struct AudioCapture {
    device: cpal::Device,
    config: StreamConfig,
    format: SampleFormat,
    stream: Option<cpal::Stream>,
    state: Lifecycle,
}

impl AudioCapture {
    /// List input device names so the CLI can offer a selector.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|err| WhistlerError::device(err.to_string()))?;
        Ok(devices.filter_map(|device| device.name().ok()).collect())
    }

    /// Acquires an input device, the named one if given, otherwise the host
    /// default. Failure here is the only capture error callers need to handle.
    pub fn open(preferred_device: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();
        let device = match preferred_device {
            Some(name) => host
                .input_devices()
                .map_err(|err| WhistlerError::device(err.to_string()))?
                .find(|device| device.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| WhistlerError::device(format!("input device '{name}' not found")))?,
            None => host
                .default_input_device()
                .ok_or_else(|| WhistlerError::device("no default input device available"))?,
        };

        let default_config = device
            .default_input_config()
            .map_err(|err| WhistlerError::device(err.to_string()))?;
        let format = default_config.sample_format();
        let config: StreamConfig = default_config.into();

        let capture = Self {
            device,
            config,
            format,
            stream: None,
            state: Lifecycle::Idle,
        };
        tracing::info!(
            device = %capture.device_name(),
            sample_rate = capture.sample_rate(),
            channels = capture.channels(),
            ?format,
            "opened audio input"
        );
        Ok(capture)
    }

    /// Device name as reported by the host.
    pub fn device_name(&self) -> String {
        self.device
            .name()
            .unwrap_or_else(|_| "unknown input device".to_string())
    }

    /// Native rate of the device; build the detector with this value.
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Interleaved channels per callback frame.
    pub fn channels(&self) -> usize {
        usize::from(self.config.channels.max(1))
    }

    /// True while samples are being delivered.
    pub fn is_running(&self) -> bool {
        self.state == Lifecycle::Running
    }

    /// Moves `detector` onto the audio thread and starts delivery. A stream
    /// owns its detector for life, so use [`resume`](Self::resume) after
    /// [`stop`](Self::stop).
    pub fn start(&mut self, detector: Detector) -> Result<()> {
        self.state.check_start()?;
        if detector.sample_rate() != self.sample_rate() {
            tracing::warn!(
                detector = detector.sample_rate(),
                device = self.sample_rate(),
                "detector sample rate differs from the device"
            );
        }

        let stream = match self.format {
            SampleFormat::F32 => self.build_stream::<f32>(detector)?,
            SampleFormat::I16 => self.build_stream::<i16>(detector)?,
            SampleFormat::U16 => self.build_stream::<u16>(detector)?,
            other => {
                return Err(WhistlerError::device(format!(
                    "unsupported sample format: {other:?}"
                )))
            }
        };
        stream
            .play()
            .map_err(|err| WhistlerError::device(err.to_string()))?;
        self.stream = Some(stream);
        self.state = Lifecycle::Running;
        tracing::info!("audio capture started");
        Ok(())
    }

    /// Pauses delivery. The stream and its detector stay allocated until
    /// [`close`](Self::close).
    pub fn stop(&mut self) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream
                .pause()
                .map_err(|err| WhistlerError::device(err.to_string()))?;
            self.state = Lifecycle::Paused;
            tracing::info!("audio capture paused");
        }
        Ok(())
    }

    /// Restarts a stream paused by [`stop`](Self::stop); the detector keeps
    /// its buffer and candidates.
    pub fn resume(&mut self) -> Result<()> {
        if !self.state.check_resume()? {
            return Ok(());
        }
        if let Some(stream) = &self.stream {
            stream
                .play()
                .map_err(|err| WhistlerError::device(err.to_string()))?;
            self.state = Lifecycle::Running;
            tracing::info!("audio capture resumed");
        }
        Ok(())
    }

    /// Releases the stream. Safe to call any number of times.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.pause() {
                tracing::debug!(%err, "failed to pause audio stream on close");
            }
            drop(stream);
            tracing::info!("audio capture closed");
        }
        self.state = Lifecycle::Idle;
    }

    fn build_stream<T>(&self, mut detector: Detector) -> Result<cpal::Stream>
    where
        T: SizedSample + Send + 'static,
        f32: cpal::FromSample<T>,
    {
        let channels = self.channels();
        self.device
            .build_input_stream(
                &self.config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    detector.push_interleaved(data, channels, |sample| {
                        cpal::Sample::from_sample(sample)
                    });
                },
                |err| tracing::warn!(%err, "audio stream error"),
                None,
            )
            .map_err(|err| WhistlerError::device(err.to_string()))
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.close();
    }
}
