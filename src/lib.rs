//! Real-time software audio mixing.
//!
//! This crate composites an arbitrary number of independently-driven audio
//! voices into one interleaved stereo f32 stream. It is organized into
//! modules, each with a specific responsibility:
//!
//! - [`session`]: cpal stream management and the thread-safe control surface
//! - [`mixer`]: the per-callback mixing engine
//! - [`convert`]: streaming format/channel/rate conversion per voice
//! - [`source`]: the pull-source contract and the in-memory source
//! - [`format`]: source and output format descriptors
//! - [`constants`]: configuration constants and limits
//! - [`errors`]: mixer-specific error types
//!
//! Each voice has its own native format, gain and pan; conversion to the
//! output format happens on the fly while mixing. A typical program opens
//! a session, hands it pull sources and controls the resulting voices:
//!
//! ```no_run
//! use softmix::{AudioSession, BufferSource, SessionConfig};
//!
//! # fn main() -> Result<(), softmix::MixerError> {
//! let session = AudioSession::open(SessionConfig::default())?;
//!
//! // A one-second 440 Hz tone in the session's output rate.
//! let rate = session.spec().sample_rate;
//! let tone: Vec<f32> = (0..rate)
//!     .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / rate as f32).sin() * 0.5)
//!     .collect();
//! let source = BufferSource::from_f32(1, rate, &tone);
//!
//! let voice = session.add_voice(source.spec(), Box::new(source))?;
//! session.set_pan(voice, -0.5)?;
//! session.play(voice)?;
//! # Ok(())
//! # }
//! ```

pub mod constants;
pub mod convert;
pub mod errors;
pub mod format;
pub mod mixer;
mod registry;
pub mod session;
pub mod source;
mod voice;

pub use convert::{ConvertStream, Converter};
pub use errors::{ConvertError, MixError, MixerError};
pub use format::{AudioSpec, OutputSpec};
pub use mixer::Mixer;
pub use registry::VoiceId;
pub use session::{AudioSession, SessionConfig};
pub use source::{AudioSource, BufferSource, SourceState};
