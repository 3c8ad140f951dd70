//! Real-time mixing engine.
//!
//! [`Mixer`] owns the voice registry, the master gain and the canonical
//! output format, and renders one callback period at a time with
//! [`Mixer::mix`]. It is driven by the session's audio callback in
//! production, but is fully usable on its own for host-callback-free
//! embedding and for tests.
//!
//! Per callback, each active voice is drained in variable-size chunks:
//! whatever converted data is ready is pulled from the voice's conversion
//! stream, gain and linear panning are applied per stereo frame, and the
//! result is summed into the destination with saturating addition. When a
//! voice's converter runs dry its source is asked for another period of
//! native data; a source that has permanently ended is unlinked on the
//! spot and the rest of its destination range stays untouched.

use cpal::Sample;

use crate::constants::{DEFAULT_GAIN, GAIN_MAX, GAIN_MIN};
use crate::errors::{ConvertError, MixError, MixerError};
use crate::format::{AudioSpec, OutputSpec};
use crate::registry::{VoiceId, VoiceRegistry};
use crate::source::{AudioSource, SourceState};
use crate::voice::Voice;

enum VoiceOutcome {
    /// The voice filled (or silently skipped) its share of the period.
    Mixed,

    /// The voice ran out of data for good and must be unlinked.
    Finished,
}

/// The mixing core: active-voice registry, master gain, canonical format.
pub struct Mixer {
    spec: OutputSpec,
    master_gain: f32,
    registry: VoiceRegistry,
}

impl Mixer {
    /// Creates a mixer rendering in the given canonical format.
    ///
    /// `spec.buffer_frames` must be nonzero.
    pub fn new(spec: OutputSpec) -> Self {
        Self {
            spec,
            master_gain: DEFAULT_GAIN,
            registry: VoiceRegistry::new(),
        }
    }

    /// The canonical output format.
    pub fn spec(&self) -> OutputSpec {
        self.spec
    }

    /// The master gain, in [0, 2].
    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    /// Sets the master gain, clamped to [0, 2]. Non-finite values are
    /// ignored.
    pub fn set_master_gain(&mut self, gain: f32) {
        if gain.is_finite() {
            self.master_gain = gain.clamp(GAIN_MIN, GAIN_MAX);
        }
    }

    /// Creates an idle voice for the given source. Fails if the source
    /// format is unsupported or its buffers cannot be allocated.
    pub fn add_voice(
        &mut self,
        spec: AudioSpec,
        source: Box<dyn AudioSource>,
    ) -> Result<VoiceId, MixerError> {
        let voice = Voice::new(spec, source, &self.spec)?;
        Ok(self.registry.add(voice))
    }

    /// Destroys a voice, pausing it first if it is playing.
    pub fn free_voice(&mut self, id: VoiceId) -> Result<(), MixerError> {
        match self.registry.take(id) {
            Some(_) => Ok(()),
            None => Err(MixerError::UnknownVoice),
        }
    }

    /// Starts playback of an idle voice, clearing its end-of-stream flag.
    pub fn play(&mut self, id: VoiceId) -> Result<(), MixerError> {
        self.registry.activate(id)?;
        if let Some(voice) = self.registry.get_mut(id) {
            voice.eos = false;
        }
        Ok(())
    }

    /// Stops playback of a voice; a no-op if it is already idle. Buffers
    /// and pending converted data are retained, so a later `play` resumes
    /// where the source left off.
    pub fn pause(&mut self, id: VoiceId) -> Result<(), MixerError> {
        if self.registry.get(id).is_none() {
            return Err(MixerError::UnknownVoice);
        }
        self.registry.deactivate(id);
        Ok(())
    }

    /// Whether the voice is currently linked into the play order.
    pub fn is_playing(&self, id: VoiceId) -> bool {
        self.registry.is_active(id)
    }

    /// The voice's gain, in [0, 2].
    pub fn gain(&self, id: VoiceId) -> Result<f32, MixerError> {
        self.registry
            .get(id)
            .map(|v| v.gain)
            .ok_or(MixerError::UnknownVoice)
    }

    /// Sets the voice's gain, clamped to [0, 2].
    pub fn set_gain(&mut self, id: VoiceId, gain: f32) -> Result<(), MixerError> {
        self.registry
            .get_mut(id)
            .map(|v| v.set_gain(gain))
            .ok_or(MixerError::UnknownVoice)
    }

    /// The voice's pan, in [-1, 1].
    pub fn pan(&self, id: VoiceId) -> Result<f32, MixerError> {
        self.registry
            .get(id)
            .map(|v| v.pan)
            .ok_or(MixerError::UnknownVoice)
    }

    /// Sets the voice's pan, clamped to [-1, 1].
    pub fn set_pan(&mut self, id: VoiceId, pan: f32) -> Result<(), MixerError> {
        self.registry
            .get_mut(id)
            .map(|v| v.set_pan(pan))
            .ok_or(MixerError::UnknownVoice)
    }

    /// Renders one callback period into `output` (interleaved stereo f32).
    ///
    /// The buffer is always left in a safe state: zeroed on entry, then
    /// filled with whatever was mixed before any failure. A length
    /// mismatch produces silence and an error; a converter failure aborts
    /// the remaining voices for this period but keeps the contributions
    /// already mixed.
    pub fn mix(&mut self, output: &mut [f32]) -> Result<(), MixError> {
        output.fill(Sample::EQUILIBRIUM);

        let expected = self.spec.buffer_samples();
        if output.len() != expected {
            return Err(MixError::BufferLenMismatch {
                expected,
                got: output.len(),
            });
        }

        if self.registry.active_count() == 0 {
            return Ok(());
        }

        let mut pos = 0;
        while let Some(id) = self.registry.active_at(pos) {
            let Some(voice) = self.registry.get_mut(id) else {
                pos += 1;
                continue;
            };

            match mix_voice(voice, output) {
                Ok(VoiceOutcome::Mixed) => pos += 1,
                Ok(VoiceOutcome::Finished) => {
                    // The next voice slides into this position.
                    self.registry.deactivate(id);
                }
                Err(err) => return Err(MixError::Convert(err)),
            }
        }

        let master = self.master_gain;
        for s in output.iter_mut() {
            *s = (*s * master).clamp(-1.0, 1.0);
        }

        Ok(())
    }
}

/// Drains one voice into the destination until its share of the period is
/// accounted for. The written counter only ever grows, so the loop is
/// bounded; the refill guard covers sources whose converter never yields.
fn mix_voice(voice: &mut Voice, output: &mut [f32]) -> Result<VoiceOutcome, ConvertError> {
    let total = output.len();
    let gain = voice.gain;
    let amplitude = voice.pan / 2.0 + 0.5;

    let mut written = 0;
    let mut silent_refills = 0u32;
    while written < total {
        let want = voice
            .converter
            .available()
            .min(voice.out_buffer.len())
            .min(total - written);
        let got = voice.converter.get(&mut voice.out_buffer[..want]);

        for (frame, out_frame) in voice.out_buffer[..got]
            .chunks_exact(2)
            .zip(output[written..written + got].chunks_exact_mut(2))
        {
            let left = frame[0] * gain * (1.0 - amplitude);
            let right = frame[1] * gain * amplitude;
            out_frame[0] = (out_frame[0] + left).clamp(-1.0, 1.0);
            out_frame[1] = (out_frame[1] + right).clamp(-1.0, 1.0);
        }

        written += got;

        if voice.converter.available() == 0 {
            if voice.eos {
                // Out of data for good: the rest of this voice's range
                // stays as other voices left it.
                return Ok(VoiceOutcome::Finished);
            }

            if voice.source.pull(&mut voice.in_buffer) == SourceState::Finished {
                voice.eos = true;
            }
            voice.converter.put(&voice.in_buffer)?;

            if voice.converter.available() == 0 {
                silent_refills += 1;
                if silent_refills > voice.max_refills {
                    log::warn!("voice source stalled; skipping it for this period");
                    break;
                }
            } else {
                silent_refills = 0;
            }
        }
    }

    Ok(VoiceOutcome::Mixed)
}

#[cfg(test)]
mod tests {
    use cpal::SampleFormat;

    use super::*;
    use crate::convert::ConvertStream;
    use crate::source::BufferSource;

    const FRAMES: usize = 64;

    fn make_mixer() -> Mixer {
        Mixer::new(OutputSpec {
            sample_rate: 44_100,
            buffer_frames: FRAMES,
        })
    }

    fn canonical() -> AudioSpec {
        AudioSpec::new(SampleFormat::F32, 2, 44_100)
    }

    /// Emits a constant stereo f32 value forever.
    struct ConstSource {
        value: f32,
    }

    impl AudioSource for ConstSource {
        fn pull(&mut self, buf: &mut [u8]) -> SourceState {
            for chunk in buf.chunks_exact_mut(4) {
                chunk.copy_from_slice(&self.value.to_ne_bytes());
            }
            SourceState::HasMore
        }
    }

    /// Emits samples that keep increasing by a small step, so tests can
    /// tell "resumed" apart from "restarted".
    struct CountingSource {
        next: f32,
    }

    impl AudioSource for CountingSource {
        fn pull(&mut self, buf: &mut [u8]) -> SourceState {
            for chunk in buf.chunks_exact_mut(4) {
                chunk.copy_from_slice(&self.next.to_ne_bytes());
                self.next += 0.001;
            }
            SourceState::HasMore
        }
    }

    fn add_const(mixer: &mut Mixer, value: f32) -> VoiceId {
        mixer
            .add_voice(canonical(), Box::new(ConstSource { value }))
            .unwrap()
    }

    fn render(mixer: &mut Mixer) -> Vec<f32> {
        let mut out = vec![9.9; FRAMES * 2];
        mixer.mix(&mut out).unwrap();
        out
    }

    #[test]
    fn test_empty_mix_is_silence() {
        let mut mixer = make_mixer();
        let out = render(&mut mixer);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_buffer_len_mismatch_fails_safe() {
        let mut mixer = make_mixer();
        let id = add_const(&mut mixer, 0.8);
        mixer.play(id).unwrap();

        let mut out = vec![9.9; FRAMES * 2 + 2];
        let result = mixer.mix(&mut out);

        assert!(matches!(result, Err(MixError::BufferLenMismatch { .. })));
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_single_voice_center_pan_halves_each_channel() {
        let mut mixer = make_mixer();
        let id = add_const(&mut mixer, 0.8);
        mixer.play(id).unwrap();

        let out = render(&mut mixer);
        assert!(out.iter().all(|&s| (s - 0.4).abs() < 1e-6));
    }

    #[test]
    fn test_pan_extremes() {
        for (pan, expected_left, expected_right) in
            [(-1.0, 1.0, 0.0), (0.0, 0.5, 0.5), (1.0, 0.0, 1.0)]
        {
            let mut mixer = make_mixer();
            let id = add_const(&mut mixer, 1.0);
            mixer.set_pan(id, pan).unwrap();
            mixer.play(id).unwrap();

            let out = render(&mut mixer);
            for frame in out.chunks_exact(2) {
                assert!((frame[0] - expected_left).abs() < 1e-6, "pan {pan}");
                assert!((frame[1] - expected_right).abs() < 1e-6, "pan {pan}");
            }
        }
    }

    #[test]
    fn test_two_voices_sum_to_source_value() {
        // At center pan each voice contributes half its value per channel,
        // so two equal voices reconstruct the value exactly.
        for v in [0.3, 0.9, -0.5] {
            let mut mixer = make_mixer();
            for _ in 0..2 {
                let id = add_const(&mut mixer, v);
                mixer.play(id).unwrap();
            }

            let out = render(&mut mixer);
            assert!(out.iter().all(|&s| (s - v).abs() < 1e-6), "value {v}");
        }
    }

    #[test]
    fn test_mixing_saturates_at_unity() {
        let mut mixer = make_mixer();
        for _ in 0..2 {
            let id = add_const(&mut mixer, 0.9);
            mixer.set_gain(id, 2.0).unwrap();
            mixer.play(id).unwrap();
        }

        // Each voice contributes 0.9 per channel; the sum clamps to 1.
        let out = render(&mut mixer);
        assert!(out.iter().all(|&s| (s - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_negative_saturation() {
        let mut mixer = make_mixer();
        for _ in 0..2 {
            let id = add_const(&mut mixer, -0.9);
            mixer.set_gain(id, 2.0).unwrap();
            mixer.play(id).unwrap();
        }

        let out = render(&mut mixer);
        assert!(out.iter().all(|&s| (s + 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_master_gain_is_a_final_pass() {
        let mut mixer = make_mixer();
        let id = add_const(&mut mixer, 0.4);
        mixer.play(id).unwrap();

        mixer.set_master_gain(2.0);
        let out = render(&mut mixer);
        assert!(out.iter().all(|&s| (s - 0.4).abs() < 1e-6));

        mixer.set_master_gain(0.0);
        let out = render(&mut mixer);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_master_gain_clamps_output() {
        let mut mixer = make_mixer();
        let id = add_const(&mut mixer, 0.6);
        mixer.set_gain(id, 2.0).unwrap();
        mixer.play(id).unwrap();

        // 0.6 × gain 2 × pan 0.5 = 0.6 per channel, × master 2 = 1.2 → 1.
        mixer.set_master_gain(2.0);
        let out = render(&mut mixer);
        assert!(out.iter().all(|&s| (s - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_master_gain_clamped_at_assignment() {
        let mut mixer = make_mixer();

        mixer.set_master_gain(5.0);
        assert_eq!(mixer.master_gain(), 2.0);

        mixer.set_master_gain(-1.0);
        assert_eq!(mixer.master_gain(), 0.0);

        mixer.set_master_gain(f32::NAN);
        assert_eq!(mixer.master_gain(), 0.0);
    }

    #[test]
    fn test_voice_gain_pan_clamped_via_controls() {
        let mut mixer = make_mixer();
        let id = add_const(&mut mixer, 0.5);

        mixer.set_gain(id, 3.5).unwrap();
        assert_eq!(mixer.gain(id).unwrap(), 2.0);

        mixer.set_pan(id, -7.0).unwrap();
        assert_eq!(mixer.pan(id).unwrap(), -1.0);
    }

    #[test]
    fn test_play_pause_state_machine() {
        let mut mixer = make_mixer();
        let id = add_const(&mut mixer, 0.5);

        assert!(!mixer.is_playing(id));

        mixer.play(id).unwrap();
        assert!(mixer.is_playing(id));

        // Playing an active voice fails and changes nothing.
        assert!(matches!(mixer.play(id), Err(MixerError::AlreadyPlaying)));
        assert!(mixer.is_playing(id));

        mixer.pause(id).unwrap();
        assert!(!mixer.is_playing(id));

        // Pausing an idle voice is a successful no-op.
        mixer.pause(id).unwrap();
        assert!(!mixer.is_playing(id));

        mixer.play(id).unwrap();
        assert!(mixer.is_playing(id));
    }

    #[test]
    fn test_pause_resume_continues_where_source_left_off() {
        let mut mixer = make_mixer();
        let id = mixer
            .add_voice(canonical(), Box::new(CountingSource { next: 0.0 }))
            .unwrap();
        mixer.play(id).unwrap();

        let first = render(&mut mixer);

        mixer.pause(id).unwrap();
        mixer.play(id).unwrap();

        let second = render(&mut mixer);

        // The source kept counting: the resumed period starts above where
        // the first one ended, instead of back at zero.
        assert!(second[0] > first[FRAMES * 2 - 1]);
        assert!(second[0] > 0.0);
    }

    #[test]
    fn test_end_of_stream_removes_voice_within_one_period() {
        let mut mixer = make_mixer();
        // Half a period of data, then permanent end of stream.
        let source = BufferSource::from_f32(2, 44_100, &vec![0.5; FRAMES]);
        let id = mixer.add_voice(canonical(), Box::new(source)).unwrap();
        mixer.play(id).unwrap();

        let first = render(&mut mixer);
        // Data half mixed at 0.25, padded half silent.
        assert!(first[..FRAMES].iter().all(|&s| (s - 0.25).abs() < 1e-6));
        assert!(first[FRAMES..].iter().all(|&s| s == 0.0));

        // End of stream was observed; the next period unlinks the voice.
        assert!(mixer.is_playing(id));
        let second = render(&mut mixer);
        assert!(!mixer.is_playing(id));
        assert!(second.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_looping_source_keeps_voice_alive() {
        let mut mixer = make_mixer();
        let mut source = BufferSource::from_f32(2, 44_100, &vec![0.5; 16]);
        source.set_looping(true);
        let id = mixer.add_voice(canonical(), Box::new(source)).unwrap();
        mixer.play(id).unwrap();

        for _ in 0..8 {
            let out = render(&mut mixer);
            assert!(out.iter().all(|&s| (s - 0.25).abs() < 1e-6));
            assert!(mixer.is_playing(id));
        }
    }

    #[test]
    fn test_free_then_recreate_is_indistinguishable() {
        let mut mixer = make_mixer();
        let id = add_const(&mut mixer, 0.5);
        mixer.set_gain(id, 1.7).unwrap();
        mixer.set_pan(id, -0.3).unwrap();
        mixer.play(id).unwrap();

        mixer.free_voice(id).unwrap();

        // The handle is stale everywhere.
        assert!(!mixer.is_playing(id));
        assert!(matches!(mixer.gain(id), Err(MixerError::UnknownVoice)));
        assert!(matches!(
            mixer.set_gain(id, 1.0),
            Err(MixerError::UnknownVoice)
        ));
        assert!(matches!(mixer.free_voice(id), Err(MixerError::UnknownVoice)));

        let recreated = add_const(&mut mixer, 0.5);
        assert_eq!(mixer.gain(recreated).unwrap(), 1.0);
        assert_eq!(mixer.pan(recreated).unwrap(), 0.0);
        assert!(!mixer.is_playing(recreated));
    }

    #[test]
    fn test_free_active_voice_unlinks_it() {
        let mut mixer = make_mixer();
        let keep = add_const(&mut mixer, 0.2);
        let gone = add_const(&mut mixer, 0.6);
        mixer.play(keep).unwrap();
        mixer.play(gone).unwrap();

        mixer.free_voice(gone).unwrap();

        let out = render(&mut mixer);
        assert!(out.iter().all(|&s| (s - 0.1).abs() < 1e-6));
    }

    #[test]
    fn test_stress_32_voices_clamped_sum() {
        let mut mixer = make_mixer();
        let values: Vec<f32> = (0..32).map(|i| (i as f32 - 16.0) / 20.0).collect();
        for &v in &values {
            let id = add_const(&mut mixer, v);
            mixer.play(id).unwrap();
        }

        let out = render(&mut mixer);

        // Saturating addition applied voice by voice, in play order.
        let expected = values
            .iter()
            .fold(0.0f32, |acc, &v| (acc + v * 0.5).clamp(-1.0, 1.0));

        assert!(out.iter().all(|&s| (-1.0..=1.0).contains(&s)));
        assert!(
            out.iter().all(|&s| (s - expected).abs() < 1e-5),
            "expected {expected}, got {}",
            out[0]
        );
    }

    /// A conversion stream that accepts data but never yields output.
    struct StalledConverter;

    impl ConvertStream for StalledConverter {
        fn put(&mut self, _input: &[u8]) -> Result<(), ConvertError> {
            Ok(())
        }

        fn available(&self) -> usize {
            0
        }

        fn get(&mut self, _output: &mut [f32]) -> usize {
            0
        }
    }

    /// A conversion stream that fails on the first refill.
    struct FailingConverter;

    impl ConvertStream for FailingConverter {
        fn put(&mut self, _input: &[u8]) -> Result<(), ConvertError> {
            Err(ConvertError::UnsupportedFormat(SampleFormat::F64))
        }

        fn available(&self) -> usize {
            0
        }

        fn get(&mut self, _output: &mut [f32]) -> usize {
            0
        }
    }

    fn add_with_converter(mixer: &mut Mixer, converter: Box<dyn ConvertStream>) -> VoiceId {
        let spec = canonical();
        let voice = Voice::with_converter(
            spec,
            Box::new(ConstSource { value: 0.5 }),
            converter,
            &mixer.spec(),
        )
        .unwrap();
        let id = mixer.registry.add(voice);
        mixer.registry.activate(id).unwrap();
        id
    }

    #[test]
    fn test_stalled_converter_terminates_and_stays_active() {
        let mut mixer = make_mixer();
        let id = add_with_converter(&mut mixer, Box::new(StalledConverter));

        // Must terminate despite the converter never producing data.
        let out = render(&mut mixer);
        assert!(out.iter().all(|&s| s == 0.0));
        assert!(mixer.is_playing(id));
    }

    #[test]
    fn test_converter_failure_keeps_earlier_contributions() {
        let mut mixer = make_mixer();
        let good = add_const(&mut mixer, 0.8);
        mixer.play(good).unwrap();
        let bad = add_with_converter(&mut mixer, Box::new(FailingConverter));

        let mut out = vec![9.9; FRAMES * 2];
        let result = mixer.mix(&mut out);

        assert!(matches!(result, Err(MixError::Convert(_))));
        // The first voice's contribution survived the abort.
        assert!(out.iter().all(|&s| (s - 0.4).abs() < 1e-6));
        assert!(mixer.is_playing(bad));
    }
}
