//! Audio session management.
//!
//! This module handles the cpal output stream including:
//! - Device selection and output format negotiation
//! - Audio callback setup driving the mixing core
//! - The thread-safe control surface forwarding into the core
//! - Error handling for stream operations

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Sample, Stream, StreamConfig};
use env_logger::{Builder, Env};

use crate::constants::{DEFAULT_BUFFER_FRAMES, DEFAULT_SAMPLE_RATE, OUTPUT_CHANNELS};
use crate::errors::MixerError;
use crate::format::{AudioSpec, OutputSpec};
use crate::mixer::Mixer;
use crate::registry::VoiceId;
use crate::source::AudioSource;

/// One session may be open per process at a time.
static SESSION_OPEN: AtomicBool = AtomicBool::new(false);

/// Requested configuration for [`AudioSession::open`].
///
/// The device hint selects an output device by name; `None` uses the host
/// default. Rate and buffer size are requests, not guarantees: the actual
/// negotiated values are reported by [`AudioSession::spec`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Output device name, or `None` for the default device.
    pub device: Option<String>,

    /// Requested output sampling rate in Hz.
    pub sample_rate: u32,

    /// Requested audio buffer size in sample frames.
    pub buffer_frames: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            buffer_frames: DEFAULT_BUFFER_FRAMES,
        }
    }
}

/// An open audio session: the output stream plus the shared mixing core.
///
/// Opening starts playback immediately; dropping (or [`close`ing](Self::close))
/// the session halts the callback and releases the device. All control
/// methods may be called from any thread relative to the audio callback;
/// they serialize on the same lock the callback holds while mixing.
pub struct AudioSession {
    core: Arc<Mutex<Mixer>>,
    stream: Stream,
    spec: OutputSpec,
}

/// Setup and configure the logger for audio operations.
pub fn setup_logger() {
    // Default to `info`; users can override via `RUST_LOG`.
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .try_init()
        .unwrap_or(()); // Ignore initialization errors
}

impl AudioSession {
    /// Opens the audio device and starts the mixing callback.
    ///
    /// Fails with [`MixerError::AlreadyOpen`] if another session is open in
    /// this process, with [`MixerError::NoDevice`] if no matching output
    /// device exists, or with the underlying stream error if the host
    /// rejects the negotiated configuration.
    pub fn open(config: SessionConfig) -> Result<Self, MixerError> {
        setup_logger();

        if config.sample_rate == 0 {
            return Err(MixerError::UnsupportedConfig("sample rate must be nonzero"));
        }
        if config.buffer_frames == 0 {
            return Err(MixerError::UnsupportedConfig("buffer size must be nonzero"));
        }

        if SESSION_OPEN.swap(true, Ordering::AcqRel) {
            return Err(MixerError::AlreadyOpen);
        }

        match Self::open_stream(config) {
            Ok(session) => Ok(session),
            Err(err) => {
                SESSION_OPEN.store(false, Ordering::Release);
                Err(err)
            }
        }
    }

    fn open_stream(config: SessionConfig) -> Result<Self, MixerError> {
        let host = cpal::default_host();
        let device = match &config.device {
            Some(name) => host
                .output_devices()?
                .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
                .ok_or(MixerError::NoDevice)?,
            None => host.default_output_device().ok_or(MixerError::NoDevice)?,
        };

        let sample_rate = negotiate_rate(&device, config.sample_rate)?;
        let spec = OutputSpec {
            sample_rate,
            buffer_frames: config.buffer_frames,
        };

        log::info!(
            "opening audio session ({} ch @ {} Hz, {} frames)",
            OUTPUT_CHANNELS,
            sample_rate,
            config.buffer_frames
        );

        let core = Arc::new(Mutex::new(Mixer::new(spec)));
        let callback_core = Arc::clone(&core);

        let stream_config = StreamConfig {
            channels: OUTPUT_CHANNELS,
            sample_rate,
            buffer_size: BufferSize::Fixed(config.buffer_frames as u32),
        };

        let stream = device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| match callback_core.lock() {
                Ok(mut mixer) => {
                    if let Err(err) = mixer.mix(data) {
                        log::error!("mix callback degraded to silence: {err}");
                    }
                }
                Err(_) => data.fill(Sample::EQUILIBRIUM),
            },
            |err| {
                log::error!("audio stream error: {err}");
            },
            None,
        )?;

        stream.play()?;

        Ok(Self { core, stream, spec })
    }

    /// Halts the callback and releases the audio device.
    ///
    /// Dropping the session has the same effect; `close` exists so the end
    /// of playback can be a visible statement rather than a scope edge.
    pub fn close(self) {
        let _ = self.stream.pause();
        // Drop releases the stream and the open-session guard.
    }

    /// The negotiated output format.
    pub fn spec(&self) -> OutputSpec {
        self.spec
    }

    /// Pauses or resumes the device callback; affects every voice.
    pub fn set_paused(&self, paused: bool) -> Result<(), MixerError> {
        if paused {
            self.stream.pause()?;
        } else {
            self.stream.play()?;
        }
        Ok(())
    }

    /// The master gain, in [0, 2].
    pub fn master_gain(&self) -> Result<f32, MixerError> {
        Ok(self.core()?.master_gain())
    }

    /// Sets the master gain, clamped to [0, 2].
    pub fn set_master_gain(&self, gain: f32) -> Result<(), MixerError> {
        self.core()?.set_master_gain(gain);
        Ok(())
    }

    /// Creates an idle voice pulling from `source`.
    pub fn add_voice(
        &self,
        spec: AudioSpec,
        source: Box<dyn AudioSource>,
    ) -> Result<VoiceId, MixerError> {
        self.core()?.add_voice(spec, source)
    }

    /// Destroys a voice, pausing it first if it is playing.
    pub fn free_voice(&self, id: VoiceId) -> Result<(), MixerError> {
        self.core()?.free_voice(id)
    }

    /// Starts playback of an idle voice.
    pub fn play(&self, id: VoiceId) -> Result<(), MixerError> {
        self.core()?.play(id)
    }

    /// Stops playback of a voice; a no-op if it is already idle.
    pub fn pause(&self, id: VoiceId) -> Result<(), MixerError> {
        self.core()?.pause(id)
    }

    /// Whether the voice is currently playing.
    pub fn is_playing(&self, id: VoiceId) -> Result<bool, MixerError> {
        Ok(self.core()?.is_playing(id))
    }

    /// The voice's gain, in [0, 2].
    pub fn gain(&self, id: VoiceId) -> Result<f32, MixerError> {
        self.core()?.gain(id)
    }

    /// Sets the voice's gain, clamped to [0, 2].
    pub fn set_gain(&self, id: VoiceId, gain: f32) -> Result<(), MixerError> {
        self.core()?.set_gain(id, gain)
    }

    /// The voice's pan, in [-1, 1].
    pub fn pan(&self, id: VoiceId) -> Result<f32, MixerError> {
        self.core()?.pan(id)
    }

    /// Sets the voice's pan, clamped to [-1, 1].
    pub fn set_pan(&self, id: VoiceId, pan: f32) -> Result<(), MixerError> {
        self.core()?.set_pan(id, pan)
    }

    fn core(&self) -> Result<MutexGuard<'_, Mixer>, MixerError> {
        self.core.lock().map_err(|_| MixerError::Poisoned)
    }
}

impl Drop for AudioSession {
    fn drop(&mut self) {
        SESSION_OPEN.store(false, Ordering::Release);
    }
}

/// Picks the output rate: the requested one if the device supports it for
/// stereo f32 output, the device default otherwise.
fn negotiate_rate(device: &cpal::Device, requested: u32) -> Result<u32, MixerError> {
    for range in device.supported_output_configs()? {
        if range.channels() == OUTPUT_CHANNELS
            && range.sample_format() == cpal::SampleFormat::F32
            && range.min_sample_rate() <= requested
            && requested <= range.max_sample_rate()
        {
            return Ok(requested);
        }
    }

    let default = device.default_output_config()?;
    log::info!(
        "requested rate {} Hz unsupported, using device default {} Hz",
        requested,
        default.sample_rate()
    );
    Ok(default.sample_rate())
}
