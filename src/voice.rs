//! Voice state: one independently controlled audio producer.
//!
//! A voice owns its pull source, its conversion stream and the two buffers
//! the mixing engine shuttles data through: a native-format input buffer
//! holding one callback period at the source rate, and a canonical-format
//! output buffer holding one callback period at the output rate.

use crate::constants::{DEFAULT_GAIN, DEFAULT_PAN, GAIN_MAX, GAIN_MIN, PAN_MAX, PAN_MIN};
use crate::convert::{ConvertStream, Converter, RESAMPLER_CHUNK_FRAMES};
use crate::errors::MixerError;
use crate::format::{AudioSpec, OutputSpec};
use crate::source::AudioSource;

pub(crate) struct Voice {
    /// Native source format, fixed at creation.
    pub(crate) spec: AudioSpec,

    /// Linear gain, clamped to [0, 2].
    pub(crate) gain: f32,

    /// Stereo pan, clamped to [-1, 1].
    pub(crate) pan: f32,

    /// Set when the source reported its permanent end of stream.
    pub(crate) eos: bool,

    pub(crate) source: Box<dyn AudioSource>,
    pub(crate) converter: Box<dyn ConvertStream>,

    /// One callback period of native-format bytes, refilled by the source.
    pub(crate) in_buffer: Vec<u8>,

    /// One callback period of canonical samples, drained from the converter.
    pub(crate) out_buffer: Vec<f32>,

    /// Refills tolerated without converted output before the engine gives
    /// up on this voice for the current callback. Chunked rate conversion
    /// legitimately needs several refills before the first sample appears;
    /// anything beyond that bound is a stalled source.
    pub(crate) max_refills: u32,
}

impl Voice {
    pub(crate) fn new(
        spec: AudioSpec,
        source: Box<dyn AudioSource>,
        out: &OutputSpec,
    ) -> Result<Self, MixerError> {
        let converter = Converter::new(spec, out)?;
        Self::with_converter(spec, source, Box::new(converter), out)
    }

    pub(crate) fn with_converter(
        spec: AudioSpec,
        source: Box<dyn AudioSource>,
        converter: Box<dyn ConvertStream>,
        out: &OutputSpec,
    ) -> Result<Self, MixerError> {
        // One callback period of frames at the source rate, rounded up so a
        // faster source never starves the converter.
        let in_frames = (spec.sample_rate as usize * out.buffer_frames)
            .div_ceil(out.sample_rate as usize)
            .max(1);
        let in_bytes = in_frames * spec.frame_bytes();

        let in_buffer = alloc_zeroed(in_bytes)?;
        let out_buffer = alloc_zeroed(out.buffer_samples())?;

        Ok(Self {
            spec,
            gain: DEFAULT_GAIN,
            pan: DEFAULT_PAN,
            eos: false,
            source,
            converter,
            in_buffer,
            out_buffer,
            max_refills: 2 + RESAMPLER_CHUNK_FRAMES.div_ceil(in_frames) as u32,
        })
    }

    /// Sets the gain, clamped to [0, 2]. Non-finite values are ignored.
    pub(crate) fn set_gain(&mut self, gain: f32) {
        if gain.is_finite() {
            self.gain = gain.clamp(GAIN_MIN, GAIN_MAX);
        }
    }

    /// Sets the pan, clamped to [-1, 1]. Non-finite values are ignored.
    pub(crate) fn set_pan(&mut self, pan: f32) {
        if pan.is_finite() {
            self.pan = pan.clamp(PAN_MIN, PAN_MAX);
        }
    }
}

fn alloc_zeroed<T: Clone + Default>(len: usize) -> Result<Vec<T>, MixerError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| MixerError::OutOfMemory)?;
    buf.resize(len, T::default());
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use cpal::SampleFormat;

    use super::*;
    use crate::source::{BufferSource, SourceState};

    fn out_spec() -> OutputSpec {
        OutputSpec {
            sample_rate: 44_100,
            buffer_frames: 4_096,
        }
    }

    fn make_voice(spec: AudioSpec) -> Voice {
        let source = BufferSource::new(spec, vec![0u8; 0]);
        Voice::new(spec, Box::new(source), &out_spec()).unwrap()
    }

    #[test]
    fn test_buffer_sizing_same_rate() {
        let voice = make_voice(AudioSpec::new(SampleFormat::F32, 2, 44_100));

        // One period of stereo f32 at the output rate on both sides.
        assert_eq!(voice.in_buffer.len(), 4_096 * 2 * 4);
        assert_eq!(voice.out_buffer.len(), 4_096 * 2);
    }

    #[test]
    fn test_buffer_sizing_rounds_up_for_faster_sources() {
        let voice = make_voice(AudioSpec::new(SampleFormat::I16, 1, 48_000));

        // ceil(48000 * 4096 / 44100) = 4459 frames of mono i16.
        assert_eq!(voice.in_buffer.len(), 4_459 * 2);
    }

    #[test]
    fn test_defaults() {
        let voice = make_voice(AudioSpec::new(SampleFormat::F32, 2, 44_100));
        assert_eq!(voice.gain, 1.0);
        assert_eq!(voice.pan, 0.0);
        assert!(!voice.eos);
    }

    #[test]
    fn test_gain_clamped_at_assignment() {
        let mut voice = make_voice(AudioSpec::new(SampleFormat::F32, 2, 44_100));

        voice.set_gain(3.5);
        assert_eq!(voice.gain, 2.0);

        voice.set_gain(-1.0);
        assert_eq!(voice.gain, 0.0);

        voice.set_gain(f32::NAN);
        assert_eq!(voice.gain, 0.0);
    }

    #[test]
    fn test_pan_clamped_at_assignment() {
        let mut voice = make_voice(AudioSpec::new(SampleFormat::F32, 2, 44_100));

        voice.set_pan(2.0);
        assert_eq!(voice.pan, 1.0);

        voice.set_pan(-5.0);
        assert_eq!(voice.pan, -1.0);

        voice.set_pan(f32::INFINITY);
        assert_eq!(voice.pan, -1.0);
    }

    #[test]
    fn test_unsupported_spec_fails_construction() {
        let spec = AudioSpec::new(SampleFormat::F64, 2, 44_100);
        let source = BufferSource::new(spec, vec![0u8; 0]);
        assert!(matches!(
            Voice::new(spec, Box::new(source), &out_spec()),
            Err(MixerError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_voice_pull_roundtrip() {
        let spec = AudioSpec::new(SampleFormat::F32, 2, 44_100);
        let source = BufferSource::from_f32(2, 44_100, &[0.5; 16]);
        let mut voice = Voice::new(spec, Box::new(source), &out_spec()).unwrap();

        // A short source pads its period with silence and finishes.
        assert_eq!(voice.source.pull(&mut voice.in_buffer), SourceState::Finished);
    }
}
