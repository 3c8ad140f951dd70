//! Mixer-specific error types.

use cpal::SampleFormat;
use thiserror::Error;

/// Errors reported by the control surface (session and voice operations).
#[derive(Debug, Error)]
pub enum MixerError {
    /// An audio session is already open in this process.
    #[error("an audio session is already open in this process")]
    AlreadyOpen,

    /// No usable audio output device was found.
    #[error("no suitable audio output device found")]
    NoDevice,

    /// The requested session configuration cannot be used.
    #[error("unusable session configuration: {0}")]
    UnsupportedConfig(&'static str),

    /// Failed to enumerate audio output devices.
    #[error("failed to enumerate audio devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    /// Failed to query the device's supported configurations.
    #[error("failed to query device configurations: {0}")]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),

    /// Failed to query the device's default configuration.
    #[error("failed to query default device configuration: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    /// Failed to build the output stream.
    #[error("failed to build audio stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    /// Failed to start the output stream.
    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    /// Failed to pause the output stream.
    #[error("failed to pause audio stream: {0}")]
    PauseStream(#[from] cpal::PauseStreamError),

    /// The voice is already playing.
    #[error("voice is already playing")]
    AlreadyPlaying,

    /// The handle does not refer to a live voice.
    #[error("voice handle does not refer to a live voice")]
    UnknownVoice,

    /// The source sample encoding is not supported.
    #[error("unsupported source sample format: {0:?}")]
    UnsupportedFormat(SampleFormat),

    /// The source channel count is not supported.
    #[error("unsupported source channel count: {0} (only mono and stereo are supported)")]
    UnsupportedChannels(u16),

    /// Failed to create the rate converter for a voice.
    #[error("failed to create resampler: {0}")]
    ResamplerConstruction(#[from] rubato::ResamplerConstructionError),

    /// Voice buffer allocation failed.
    #[error("failed to allocate voice buffers")]
    OutOfMemory,

    /// The mixer state lock was poisoned by a panicked thread.
    #[error("mixer state lock was poisoned")]
    Poisoned,
}

/// Errors produced by a conversion stream while moving source data.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The source sample encoding is not supported.
    #[error("unsupported source sample format: {0:?}")]
    UnsupportedFormat(SampleFormat),

    /// The resampler rejected or failed to process input data.
    #[error("failed to resample source data: {0}")]
    Resample(#[from] rubato::ResampleError),
}

/// Errors recorded by the per-callback mix entry point.
///
/// The output buffer is always left in a safe, silent-or-mixed state when
/// one of these is returned; the error exists for diagnostics, not control
/// flow on the audio thread.
#[derive(Debug, Error)]
pub enum MixError {
    /// The destination buffer does not match the configured period length.
    #[error("output buffer length mismatch: expected {expected} samples, got {got}")]
    BufferLenMismatch {
        /// Expected sample count (frames × channels).
        expected: usize,
        /// Actual sample count handed to the callback.
        got: usize,
    },

    /// A voice's conversion stream failed mid-callback.
    #[error("voice conversion failed: {0}")]
    Convert(#[from] ConvertError),
}
