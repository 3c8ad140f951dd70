//! Pull-based audio sources.
//!
//! The mixing engine drives every voice through the [`AudioSource`] trait:
//! whenever a voice's conversion stream runs dry during a callback, the
//! engine asks the source to refill the voice's native-format input buffer.
//!
//! [`BufferSource`] is the bundled implementation for preloaded in-memory
//! audio, with optional seamless looping and frame-aligned seeking. Decoding
//! files into such a buffer is the caller's concern.

use std::sync::{Arc, Mutex};

use crate::format::{AudioSpec, silence_byte};

/// Outcome of a single [`AudioSource::pull`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// The source can provide more data after this refill.
    HasMore,

    /// The source has no further data; the buffer was padded with silence.
    Finished,
}

/// A refill capability supplying native-format audio bytes to a voice.
///
/// `pull` is invoked on the real-time audio thread. Implementations must
/// fully populate `buf` before returning (padding with silence if the
/// stream ends mid-buffer) and must return promptly without blocking on
/// I/O; any slow decoder work belongs in a prefetch layer that feeds the
/// source, not in `pull` itself.
///
/// Returning [`SourceState::Finished`] marks the voice as ended; once its
/// already-converted data drains, the engine stops the voice. A looping
/// source instead rewinds internally and keeps returning
/// [`SourceState::HasMore`].
pub trait AudioSource: Send {
    /// Fills `buf` completely with interleaved native-format bytes.
    fn pull(&mut self, buf: &mut [u8]) -> SourceState;
}

/// Shared access to a source that the caller keeps controlling (loop
/// toggles, rewinds) after handing it to a voice. The lock is held only
/// for the duration of one refill.
impl<S: AudioSource> AudioSource for Arc<Mutex<S>> {
    fn pull(&mut self, buf: &mut [u8]) -> SourceState {
        match self.lock() {
            Ok(mut source) => source.pull(buf),
            Err(_) => {
                buf.fill(0);
                SourceState::Finished
            }
        }
    }
}

/// A source playing preloaded native-format audio from memory.
///
/// The backing buffer is shared (`Arc<[u8]>`), so several voices can play
/// the same data without copying it. A trailing partial frame in the data
/// is ignored.
#[derive(Debug, Clone)]
pub struct BufferSource {
    spec: AudioSpec,
    data: Arc<[u8]>,
    position: usize,
    looping: bool,
}

impl BufferSource {
    /// Creates a source over interleaved native-format bytes.
    pub fn new(spec: AudioSpec, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            spec,
            data: data.into(),
            position: 0,
            looping: false,
        }
    }

    /// Creates an f32 source from interleaved samples.
    pub fn from_f32(channels: u16, sample_rate: u32, samples: &[f32]) -> Self {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
        Self::new(
            AudioSpec::new(cpal::SampleFormat::F32, channels, sample_rate),
            bytes,
        )
    }

    /// The native format of the buffered data.
    pub fn spec(&self) -> AudioSpec {
        self.spec
    }

    /// Whether the source rewinds seamlessly instead of finishing.
    pub fn looping(&self) -> bool {
        self.looping
    }

    /// Enables or disables seamless looping.
    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Moves the read position back to the start of the data.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Moves the read position to `ms` milliseconds from the start,
    /// aligned to a frame boundary and clamped to the data length.
    pub fn seek_to_ms(&mut self, ms: u64) {
        let frame = ms * u64::from(self.spec.sample_rate) / 1000;
        let byte = (frame as usize).saturating_mul(self.frame_bytes());
        self.position = byte.min(self.playable_len());
    }

    /// Total duration of the buffered data in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        let frames = (self.playable_len() / self.frame_bytes()) as u64;
        frames * 1000 / u64::from(self.spec.sample_rate.max(1))
    }

    /// Current read position in milliseconds.
    pub fn position_ms(&self) -> u64 {
        let frames = (self.position / self.frame_bytes()) as u64;
        frames * 1000 / u64::from(self.spec.sample_rate.max(1))
    }

    // Degenerate specs (zero channels) are rejected at voice creation, but
    // a standalone source must not divide by zero either.
    fn frame_bytes(&self) -> usize {
        self.spec.frame_bytes().max(1)
    }

    fn playable_len(&self) -> usize {
        self.data.len() - self.data.len() % self.frame_bytes()
    }
}

impl AudioSource for BufferSource {
    fn pull(&mut self, buf: &mut [u8]) -> SourceState {
        let len = self.playable_len();

        let mut written = 0;
        while written < buf.len() {
            if self.position >= len {
                if self.looping && len > 0 {
                    self.position = 0;
                    continue;
                }

                buf[written..].fill(silence_byte(self.spec.format));
                return SourceState::Finished;
            }

            let n = (len - self.position).min(buf.len() - written);
            buf[written..written + n].copy_from_slice(&self.data[self.position..self.position + n]);
            self.position += n;
            written += n;
        }

        SourceState::HasMore
    }
}
