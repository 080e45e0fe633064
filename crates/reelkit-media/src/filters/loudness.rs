//! Loudness-normalisation gate (scenario S5), grounded on
//! `original_source/src/modules/plus/filter_loudness.c`. Full EBU R128
//! requires K-weighting and gated integration across the whole programme;
//! this filter implements the single-block momentary-loudness estimate
//! (unweighted mean square per channel, ITU-R BS.1770's unity channel
//! weighting for a stereo bed) and a static gain to hit the target, which
//! is what a one-block filter invocation can measure.

use reelkit_core::error::Result;
use reelkit_core::filter::Filter;
use reelkit_core::frame::{AudioBuffer, Frame};
use reelkit_core::properties::Properties;
use reelkit_core::profile::Profile;

use super::{impl_filter_service, FilterBase};

/// -23 LUFS is the EBU R128 broadcast default.
const DEFAULT_TARGET_LUFS: f64 = -23.0;

pub struct Loudness {
    base: FilterBase,
    target_lufs: f64,
}

impl Loudness {
    pub fn new(target_lufs: f64) -> Self {
        Self { base: FilterBase::new(), target_lufs }
    }
}

impl Default for Loudness {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_LUFS)
    }
}

impl_filter_service!(Loudness);

impl Filter for Loudness {
    fn properties(&self) -> &Properties {
        &self.base.properties
    }
    fn properties_mut(&mut self) -> &mut Properties {
        &mut self.base.properties
    }

    fn process(&mut self, frame: &mut Frame) -> Result<()> {
        let target = self.properties().get_float("target_lufs");
        let target = if target == 0.0 { self.target_lufs } else { target };
        frame.push_audio(Box::new(move |f, format, freq, channels, samples| {
            let upstream = f.get_audio(format, freq, channels, samples)?;
            Ok(apply_gain(&upstream, target))
        }));
        Ok(())
    }
}

/// Unweighted momentary loudness in LUFS: `-0.691 + 10*log10(sum of each
/// channel's mean square)`, the ITU-R BS.1770 formula with unity channel
/// weights (no K-weighting, no surround-channel +1.5dB terms — out of
/// scope for a single-block gate).
pub fn measured_lufs(samples: &[f32], channels: u16) -> f64 {
    let channels = channels.max(1) as usize;
    let frame_count = samples.len() / channels;
    if frame_count == 0 {
        return f64::NEG_INFINITY;
    }
    let mut sum_sq = vec![0.0f64; channels];
    for frame in samples.chunks_exact(channels) {
        for (c, &s) in frame.iter().enumerate() {
            sum_sq[c] += (s as f64) * (s as f64);
        }
    }
    let total: f64 = sum_sq.iter().map(|s| s / frame_count as f64).sum();
    if total <= 0.0 {
        return f64::NEG_INFINITY;
    }
    -0.691 + 10.0 * total.log10()
}

/// Linear gain that moves `measured` LUFS to `target` LUFS.
pub fn gain_for_target(measured: f64, target: f64) -> f64 {
    if measured.is_infinite() {
        return 1.0;
    }
    10f64.powf((target - measured) / 20.0)
}

fn apply_gain(src: &AudioBuffer, target_lufs: f64) -> AudioBuffer {
    let measured = measured_lufs(src.as_slice(), src.channels);
    let gain = gain_for_target(measured, target_lufs) as f32;
    let out: Vec<f32> = src.as_slice().iter().map(|&s| s * gain).collect();
    AudioBuffer::new(out, src.format, src.frequency, src.channels, src.samples)
}

/// Registry constructor. `arg` is the target LUFS as a decimal string
/// (accepting a leading `-`); absent or unparsable falls back to -23 LUFS.
pub fn ctor(_profile: &Profile, _id: &str, arg: Option<&str>) -> Result<std::sync::Arc<parking_lot::Mutex<dyn Filter>>> {
    let target = arg.and_then(|s| s.parse().ok()).unwrap_or(DEFAULT_TARGET_LUFS);
    Ok(std::sync::Arc::new(parking_lot::Mutex::new(Loudness::new(target))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use reelkit_core::frame::AudioFormat;
    use std::sync::Arc;

    /// Scenario S5: 10000 stereo samples at 48kHz, all-ones input, target
    /// -23 LUFS. First output sample equals the analytical gain within
    /// ±0.001 (spec.md §8 S5).
    #[test]
    fn all_ones_attenuates_by_the_analytical_gain() {
        let samples = 10_000usize;
        let data = vec![1.0f32; samples * 2];
        let measured = measured_lufs(&data, 2);
        // mean square per channel = 1.0, two channels -> sum = 2.0.
        let expected_measured = -0.691 + 10.0 * 2.0f64.log10();
        assert!((measured - expected_measured).abs() < 1e-9);

        let expected_gain = 10f64.powf((-23.0 - expected_measured) / 20.0);

        let mut f = Loudness::new(-23.0);
        let handle = Arc::new(RwLock::new(Properties::new()));
        let mut frame = Frame::new(0, handle);
        frame.set_audio(AudioBuffer::new(data, AudioFormat::F32, 48_000, 2, samples));
        f.process(&mut frame).unwrap();
        let out = frame.get_audio(AudioFormat::F32, 48_000, 2, samples).unwrap();

        assert!((out.as_slice()[0] as f64 - expected_gain).abs() < 0.001);
    }

    #[test]
    fn silence_is_not_boosted_to_infinite_gain() {
        let mut f = Loudness::new(-23.0);
        let handle = Arc::new(RwLock::new(Properties::new()));
        let mut frame = Frame::new(0, handle);
        frame.set_audio(AudioBuffer::silence(48_000, 2, 100));
        f.process(&mut frame).unwrap();
        let out = frame.get_audio(AudioFormat::F32, 48_000, 2, 100).unwrap();
        assert!(out.as_slice().iter().all(|&s| s == 0.0));
    }
}
