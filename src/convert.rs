//! Streaming sample conversion.
//!
//! Every voice feeds its native-format bytes through a conversion stream
//! that yields interleaved stereo f32 at the output rate. The stream
//! accepts arbitrarily-sized input chunks and is drained in
//! arbitrarily-sized output chunks, buffering internally as needed.
//!
//! [`Converter`] is the production implementation: it decodes the source
//! encoding through cpal's sample conversions, maps mono/stereo channel
//! layouts, and rate-converts with a fixed-chunk FFT resampler. A source
//! already in the canonical format passes through the same code path with
//! the resampler disabled, so the mixing engine has exactly one way of
//! reading voice data.

use std::collections::VecDeque;

use cpal::{Sample, SampleFormat};
use rubato::{FftFixedIn, Resampler};

use crate::constants::OUTPUT_CHANNELS;
use crate::errors::{ConvertError, MixerError};
use crate::format::{AudioSpec, OutputSpec};

/// Input chunk size, in frames, handed to the resampler in one pass.
pub const RESAMPLER_CHUNK_FRAMES: usize = 1024;

/// Number of sub-chunks the FFT resampler splits each chunk into.
const RESAMPLER_SUB_CHUNKS: usize = 2;

/// A buffering stream converting native-format bytes to canonical samples.
///
/// `put` may be called with partial frames; the stream reassembles them.
/// `available` reports how many converted f32 samples are ready, and `get`
/// drains them. All methods are non-blocking and allocation-free after
/// construction, as required on the audio thread.
pub trait ConvertStream: Send {
    /// Feeds interleaved native-format bytes into the stream.
    fn put(&mut self, input: &[u8]) -> Result<(), ConvertError>;

    /// Number of converted output samples ready to be read.
    fn available(&self) -> usize;

    /// Drains up to `output.len()` converted samples; returns the count.
    fn get(&mut self, output: &mut [f32]) -> usize;
}

/// Production conversion stream: decode, channel-map, resample.
pub struct Converter {
    src: AudioSpec,

    /// Undecoded bytes carried between `put` calls (partial frames).
    carry: Vec<u8>,

    /// Decode scratch, reused every `put`.
    decoded: Vec<f32>,

    /// Planar input queued for the resampler, canonical channel order.
    fifo: [Vec<f32>; 2],

    /// Resampler output scratch, reused every chunk.
    scratch: Vec<Vec<f32>>,

    /// None when the source rate already matches the output rate.
    resampler: Option<FftFixedIn<f32>>,

    /// Converted interleaved output awaiting `get`.
    ready: VecDeque<f32>,
}

impl Converter {
    /// Builds a conversion stream from a source format to the canonical
    /// output format, validating the source encoding and channel count.
    pub fn new(src: AudioSpec, out: &OutputSpec) -> Result<Self, MixerError> {
        if !format_supported(src.format) {
            return Err(MixerError::UnsupportedFormat(src.format));
        }
        if src.channels == 0 || src.channels > OUTPUT_CHANNELS {
            return Err(MixerError::UnsupportedChannels(src.channels));
        }

        let (resampler, scratch) = if src.sample_rate == out.sample_rate {
            (None, Vec::new())
        } else {
            let resampler = FftFixedIn::<f32>::new(
                src.sample_rate as usize,
                out.sample_rate as usize,
                RESAMPLER_CHUNK_FRAMES,
                RESAMPLER_SUB_CHUNKS,
                OUTPUT_CHANNELS as usize,
            )?;
            let max_out = resampler.output_frames_max();
            let scratch = (0..OUTPUT_CHANNELS).map(|_| vec![0.0; max_out]).collect();
            (Some(resampler), scratch)
        };

        Ok(Self {
            src,
            carry: Vec::new(),
            decoded: Vec::new(),
            fifo: [Vec::new(), Vec::new()],
            scratch,
            resampler,
            ready: VecDeque::new(),
        })
    }
}

impl ConvertStream for Converter {
    fn put(&mut self, input: &[u8]) -> Result<(), ConvertError> {
        self.carry.extend_from_slice(input);

        // Decode whole frames only; a split frame waits for the next put.
        let frame_bytes = self.src.frame_bytes();
        let whole = self.carry.len() - self.carry.len() % frame_bytes;
        if whole == 0 {
            return Ok(());
        }

        self.decoded.clear();
        decode_samples(self.src.format, &self.carry[..whole], &mut self.decoded)?;
        self.carry.drain(..whole);

        // Channel-map into the canonical stereo layout.
        if self.resampler.is_some() {
            match self.src.channels {
                1 => {
                    for &s in &self.decoded {
                        self.fifo[0].push(s);
                        self.fifo[1].push(s);
                    }
                }
                _ => {
                    for frame in self.decoded.chunks_exact(2) {
                        self.fifo[0].push(frame[0]);
                        self.fifo[1].push(frame[1]);
                    }
                }
            }
            self.run_resampler()?;
        } else {
            match self.src.channels {
                1 => {
                    for &s in &self.decoded {
                        self.ready.push_back(s);
                        self.ready.push_back(s);
                    }
                }
                _ => self.ready.extend(self.decoded.iter().copied()),
            }
        }

        Ok(())
    }

    fn available(&self) -> usize {
        self.ready.len()
    }

    fn get(&mut self, output: &mut [f32]) -> usize {
        let n = output.len().min(self.ready.len());
        for (dst, src) in output[..n].iter_mut().zip(self.ready.drain(..n)) {
            *dst = src;
        }
        n
    }
}

impl Converter {
    fn run_resampler(&mut self) -> Result<(), ConvertError> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(());
        };

        while self.fifo[0].len() >= RESAMPLER_CHUNK_FRAMES {
            let chunk = [
                &self.fifo[0][..RESAMPLER_CHUNK_FRAMES],
                &self.fifo[1][..RESAMPLER_CHUNK_FRAMES],
            ];
            let (consumed, produced) =
                resampler.process_into_buffer(&chunk, &mut self.scratch, None)?;

            self.fifo[0].drain(..consumed);
            self.fifo[1].drain(..consumed);

            for i in 0..produced {
                self.ready.push_back(self.scratch[0][i]);
                self.ready.push_back(self.scratch[1][i]);
            }
        }

        Ok(())
    }
}

fn format_supported(format: SampleFormat) -> bool {
    matches!(
        format,
        SampleFormat::U8 | SampleFormat::I16 | SampleFormat::I32 | SampleFormat::F32
    )
}

fn decode_samples(
    format: SampleFormat,
    bytes: &[u8],
    out: &mut Vec<f32>,
) -> Result<(), ConvertError> {
    match format {
        SampleFormat::U8 => {
            for &b in bytes {
                out.push(f32::from_sample(b));
            }
        }
        SampleFormat::I16 => {
            for c in bytes.chunks_exact(2) {
                out.push(f32::from_sample(i16::from_ne_bytes([c[0], c[1]])));
            }
        }
        SampleFormat::I32 => {
            for c in bytes.chunks_exact(4) {
                out.push(f32::from_sample(i32::from_ne_bytes([c[0], c[1], c[2], c[3]])));
            }
        }
        SampleFormat::F32 => {
            for c in bytes.chunks_exact(4) {
                out.push(f32::from_ne_bytes([c[0], c[1], c[2], c[3]]));
            }
        }
        other => return Err(ConvertError::UnsupportedFormat(other)),
    }

    Ok(())
}
