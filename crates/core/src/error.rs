/// Result alias that carries the custom [`WhistlerError`] type.
pub type Result<T> = std::result::Result<T, WhistlerError>;

/// Common error type for the core crate.
///
/// Only setup paths produce these: opening the capture device, loading
/// configuration and reading fixtures. Per-frame processing never fails.
#[derive(Debug, thiserror::Error)]
pub enum WhistlerError {
    /// Free-form error for conditions without a dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration or fixture JSON that failed to parse or serialise.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    /// The audio capture device could not be acquired or configured.
    #[error("audio device unavailable: {0}")]
    Device(String),
    /// The FFT backend rejected its buffers.
    #[error("fft failed: {0}")]
    Fft(#[from] realfft::FftError),
}

impl WhistlerError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Creates a capture setup error.
    pub fn device<T: Into<String>>(msg: T) -> Self {
        Self::Device(msg.into())
    }
}

impl From<&str> for WhistlerError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for WhistlerError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
