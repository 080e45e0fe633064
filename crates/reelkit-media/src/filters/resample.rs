//! Audio resample normaliser (spec §4.13 group 4), grounded on
//! `original_source/src/modules/avformat/filter_avresample.c` /
//! `src/modules/resample/filter_resample.c`. Linear interpolation between
//! samples — resampling kernels proper are out of scope (spec.md §1); this
//! only needs to land each profile's requested frequency close enough that
//! downstream channel conform and consumers see a consistent rate.

use reelkit_core::error::Result;
use reelkit_core::filter::Filter;
use reelkit_core::frame::{AudioBuffer, Frame};
use reelkit_core::properties::Properties;
use reelkit_core::profile::Profile;

use super::{impl_filter_service, FilterBase};

pub struct Resample {
    base: FilterBase,
    target_freq: u32,
}

impl Resample {
    pub fn new(target_freq: u32) -> Self {
        Self { base: FilterBase::new(), target_freq }
    }
}

impl_filter_service!(Resample);

impl Filter for Resample {
    fn properties(&self) -> &Properties {
        &self.base.properties
    }
    fn properties_mut(&mut self) -> &mut Properties {
        &mut self.base.properties
    }

    fn process(&mut self, frame: &mut Frame) -> Result<()> {
        let target_freq = self.target_freq;
        frame.push_audio(Box::new(move |f, format, _freq, channels, samples| {
            let upstream = f.get_audio(format, 0, channels, samples)?;
            if upstream.frequency == target_freq || upstream.samples == 0 {
                return Ok(upstream);
            }
            Ok(linear_resample(&upstream, target_freq))
        }));
        Ok(())
    }
}

fn linear_resample(src: &AudioBuffer, target_freq: u32) -> AudioBuffer {
    let channels = src.channels as usize;
    let ratio = target_freq as f64 / src.frequency as f64;
    let out_samples = ((src.samples as f64) * ratio).round().max(0.0) as usize;
    let data = src.as_slice();

    let mut out = vec![0.0f32; out_samples * channels];
    for i in 0..out_samples {
        let src_pos = i as f64 / ratio;
        let i0 = src_pos.floor() as usize;
        let frac = (src_pos - i0 as f64) as f32;
        let i1 = (i0 + 1).min(src.samples.saturating_sub(1));
        let i0 = i0.min(src.samples.saturating_sub(1));
        for c in 0..channels {
            let a = data[i0 * channels + c];
            let b = data[i1 * channels + c];
            out[i * channels + c] = a + (b - a) * frac;
        }
    }
    AudioBuffer::new(out, src.format, target_freq, src.channels, out_samples)
}

/// Registry constructor for the loader's `resample` normaliser group, sized
/// to a nominal consumer target frequency (48 kHz).
pub fn ctor(_profile: &Profile, _id: &str, arg: Option<&str>) -> Result<std::sync::Arc<parking_lot::Mutex<dyn Filter>>> {
    let target = arg.and_then(|s| s.parse().ok()).unwrap_or(48_000u32);
    Ok(std::sync::Arc::new(parking_lot::Mutex::new(Resample::new(target))))
}
