//! Audio format descriptors.
//!
//! [`AudioSpec`] describes the native format of a voice's source data;
//! [`OutputSpec`] describes the canonical format the mixer renders in.
//! The canonical encoding is always interleaved f32 with
//! [`OUTPUT_CHANNELS`] channels, so only the rate and period length vary.

use cpal::SampleFormat;

use crate::constants::OUTPUT_CHANNELS;

/// The native format of a source: sample encoding, channel count and rate.
///
/// Fixed at voice creation, immutable thereafter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioSpec {
    /// Sample encoding of the source data.
    pub format: SampleFormat,

    /// Number of interleaved channels (1 for mono, 2 for stereo).
    pub channels: u16,

    /// Sampling rate in Hz.
    pub sample_rate: u32,
}

impl AudioSpec {
    /// Creates a new source format descriptor.
    pub fn new(format: SampleFormat, channels: u16, sample_rate: u32) -> Self {
        Self {
            format,
            channels,
            sample_rate,
        }
    }

    /// Size in bytes of one sample frame (all channels).
    pub fn frame_bytes(&self) -> usize {
        self.format.sample_size() * self.channels as usize
    }
}

/// The canonical output format negotiated when the session opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    /// Output sampling rate in Hz.
    pub sample_rate: u32,

    /// Length of one callback period in sample frames.
    pub buffer_frames: usize,
}

impl OutputSpec {
    /// Number of f32 samples in one callback period (frames × channels).
    pub fn buffer_samples(&self) -> usize {
        self.buffer_frames * OUTPUT_CHANNELS as usize
    }
}

/// The byte value representing silence for a given encoding.
///
/// Unsigned 8-bit audio is centered on 0x80; every other supported
/// encoding is centered on zero bytes.
pub fn silence_byte(format: SampleFormat) -> u8 {
    match format {
        SampleFormat::U8 => 0x80,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_bytes() {
        assert_eq!(AudioSpec::new(SampleFormat::I16, 2, 44_100).frame_bytes(), 4);
        assert_eq!(AudioSpec::new(SampleFormat::F32, 1, 48_000).frame_bytes(), 4);
        assert_eq!(AudioSpec::new(SampleFormat::U8, 2, 22_050).frame_bytes(), 2);
    }

    #[test]
    fn test_buffer_samples() {
        let spec = OutputSpec {
            sample_rate: 44_100,
            buffer_frames: 512,
        };
        assert_eq!(spec.buffer_samples(), 1024);
    }

    #[test]
    fn test_silence_byte() {
        assert_eq!(silence_byte(SampleFormat::U8), 0x80);
        assert_eq!(silence_byte(SampleFormat::I16), 0);
        assert_eq!(silence_byte(SampleFormat::F32), 0);
    }
}
