//! Mixer configuration constants and limits.

/// Default output sampling rate in Hz.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Default audio buffer size in sample frames.
pub const DEFAULT_BUFFER_FRAMES: usize = 4_096;

/// Number of output channels (the mixer is stereo only).
pub const OUTPUT_CHANNELS: u16 = 2;

/// Minimum per-voice and master gain (muted).
pub const GAIN_MIN: f32 = 0.0;

/// Maximum per-voice and master gain (200%).
pub const GAIN_MAX: f32 = 2.0;

/// Leftmost pan position.
pub const PAN_MIN: f32 = -1.0;

/// Rightmost pan position.
pub const PAN_MAX: f32 = 1.0;

/// Gain assigned to a freshly created voice (100%).
pub const DEFAULT_GAIN: f32 = 1.0;

/// Pan assigned to a freshly created voice (center).
pub const DEFAULT_PAN: f32 = 0.0;
