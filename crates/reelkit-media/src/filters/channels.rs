//! Channel-layout normaliser (spec §4.13 group 5), grounded on
//! `original_source/src/modules/core/filter_audiochannels.c` /
//! `filter_channelcopy.c`. Downmixes 5.1 to stereo with the ATSC A/52
//! coefficients spec.md §4.13 names; any other channel-count reduction
//! averages the extra channels into the kept ones, and upmixing duplicates
//! the last available channel into the new slots.

use reelkit_core::error::Result;
use reelkit_core::filter::Filter;
use reelkit_core::frame::{AudioBuffer, Frame};
use reelkit_core::properties::Properties;
use reelkit_core::profile::Profile;

use super::{impl_filter_service, FilterBase};

/// ATSC A/52 5.1 -> stereo downmix coefficient for the centre channel.
const CENTER_COEFF: f32 = 0.707;
/// ATSC A/52 5.1 -> stereo downmix coefficient for the surround channels.
const SURROUND_COEFF: f32 = 0.5;

pub struct ChannelConform {
    base: FilterBase,
    target_channels: u16,
}

impl ChannelConform {
    pub fn new(target_channels: u16) -> Self {
        Self { base: FilterBase::new(), target_channels }
    }
}

impl_filter_service!(ChannelConform);

impl Filter for ChannelConform {
    fn properties(&self) -> &Properties {
        &self.base.properties
    }
    fn properties_mut(&mut self) -> &mut Properties {
        &mut self.base.properties
    }

    fn process(&mut self, frame: &mut Frame) -> Result<()> {
        let target = self.target_channels;
        frame.push_audio(Box::new(move |f, format, freq, _channels, samples| {
            let upstream = f.get_audio(format, freq, 0, samples)?;
            if upstream.channels == target || upstream.channels == 0 {
                return Ok(upstream);
            }
            Ok(conform(&upstream, target))
        }));
        Ok(())
    }
}

/// `L' = L + 0.707*C + 0.5*Ls`, `R' = R + 0.707*C + 0.5*Rs` (spec §4.13
/// group 5), applied to a conventional 5.1 layout `[L, R, C, LFE, Ls, Rs]`.
fn downmix_5_1_to_stereo(data: &[f32], samples: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; samples * 2];
    for i in 0..samples {
        let base = i * 6;
        let (l, r, c, _lfe, ls, rs) =
            (data[base], data[base + 1], data[base + 2], data[base + 3], data[base + 4], data[base + 5]);
        out[i * 2] = (l + CENTER_COEFF * c + SURROUND_COEFF * ls).clamp(-1.0, 1.0);
        out[i * 2 + 1] = (r + CENTER_COEFF * c + SURROUND_COEFF * rs).clamp(-1.0, 1.0);
    }
    out
}

fn conform(src: &AudioBuffer, target: u16) -> AudioBuffer {
    let data = src.as_slice();
    let out = if src.channels == 6 && target == 2 {
        downmix_5_1_to_stereo(data, src.samples)
    } else if target < src.channels {
        downmix_by_averaging(data, src.samples, src.channels as usize, target as usize)
    } else {
        upmix_by_duplication(data, src.samples, src.channels as usize, target as usize)
    };
    AudioBuffer::new(out, src.format, src.frequency, target, src.samples)
}

fn downmix_by_averaging(data: &[f32], samples: usize, from: usize, to: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; samples * to];
    for i in 0..samples {
        for c in 0..to {
            out[i * to + c] = data[i * from + c];
        }
        // Fold any remaining source channels evenly into the kept ones.
        for c in to..from {
            let target = c % to;
            out[i * to + target] += data[i * from + c];
        }
    }
    out
}

fn upmix_by_duplication(data: &[f32], samples: usize, from: usize, to: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; samples * to];
    for i in 0..samples {
        for c in 0..to {
            out[i * to + c] = data[i * from + c.min(from - 1)];
        }
    }
    out
}

/// Registry constructor for the loader's `channels` normaliser group.
pub fn ctor(_profile: &Profile, _id: &str, arg: Option<&str>) -> Result<std::sync::Arc<parking_lot::Mutex<dyn Filter>>> {
    let target = arg.and_then(|s| s.parse().ok()).unwrap_or(2u16);
    Ok(std::sync::Arc::new(parking_lot::Mutex::new(ChannelConform::new(target))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use reelkit_core::frame::AudioFormat;
    use std::sync::Arc;

    #[test]
    fn downmixes_5_1_with_atsc_coefficients() {
        let mut f = ChannelConform::new(2);
        let handle = Arc::new(RwLock::new(Properties::new()));
        let mut frame = Frame::new(0, handle);
        // One sample: L=1, R=0, C=1, LFE=1, Ls=1, Rs=0.
        frame.set_audio(AudioBuffer::new(vec![1.0, 0.0, 1.0, 1.0, 1.0, 0.0], AudioFormat::F32, 48_000, 6, 1));
        f.process(&mut frame).unwrap();
        let audio = frame.get_audio(AudioFormat::F32, 48_000, 0, 1).unwrap();
        assert_eq!(audio.channels, 2);
        let expected_l = 1.0 + CENTER_COEFF + SURROUND_COEFF;
        assert!((audio.as_slice()[0] - expected_l.clamp(-1.0, 1.0)).abs() < 1e-6);
    }

    #[test]
    fn mono_upmixes_by_duplication() {
        let mut f = ChannelConform::new(2);
        let handle = Arc::new(RwLock::new(Properties::new()));
        let mut frame = Frame::new(0, handle);
        frame.set_audio(AudioBuffer::new(vec![0.3], AudioFormat::F32, 48_000, 1, 1));
        f.process(&mut frame).unwrap();
        let audio = frame.get_audio(AudioFormat::F32, 48_000, 0, 1).unwrap();
        assert_eq!(audio.as_slice(), &[0.3, 0.3]);
    }
}
