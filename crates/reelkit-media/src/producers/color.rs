//! Solid-colour/silence producer. Backs the loader's construction-failure
//! fallback and the blank entries a playlist wraps around real clips.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use reelkit_core::error::Result;
use reelkit_core::frame::{AudioBuffer, AudioFormat, Frame, ImageBuffer, ImageFormat};
use reelkit_core::producer::{Producer, ProducerState};
use reelkit_core::profile::Profile;
use reelkit_core::properties::Properties;
use reelkit_core::service::{FilterChain, Service, ServiceId, ServiceKind};

/// Default length in frames when `arg` carries no explicit one (10 minutes
/// at 25fps) — long enough that no realistic clip runs past it, short
/// enough that a runaway loop on an un-cut colour producer still ends.
const DEFAULT_LENGTH: i64 = 15_000;

pub struct ColorProducer {
    id: ServiceId,
    properties: Properties,
    state: ProducerState,
    filter_chain: FilterChain,
    width: u32,
    height: u32,
    y: u8,
    u: u8,
    v: u8,
    audio_frequency: u32,
    audio_channels: u16,
}

impl ColorProducer {
    /// `arg` is a colour spec understood by [`Properties::get_color`]
    /// (`#RRGGBB`, `0xAARRGGBB`, a named colour, or absent for black).
    pub fn new(profile: &Profile, arg: Option<&str>) -> Self {
        let mut parse = Properties::new();
        parse.set_string("resource", arg.unwrap_or("black"));
        let rgb = parse.get_color("resource");
        let (y, u, v) = rgb_to_yuv(rgb.r, rgb.g, rgb.b);

        let mut properties = Properties::new();
        properties.set_string("resource", arg.unwrap_or("black"));

        Self {
            id: ServiceId::new(),
            properties,
            state: ProducerState::new(DEFAULT_LENGTH),
            filter_chain: FilterChain::new(),
            width: profile.width,
            height: profile.height,
            y,
            u,
            v,
            audio_frequency: 48_000,
            audio_channels: 2,
        }
    }
}

/// BT.601 full-range RGB -> YUV, rounded to the nearest byte.
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let u = -0.168736 * r - 0.331264 * g + 0.5 * b + 128.0;
    let v = 0.5 * r - 0.418688 * g - 0.081312 * b + 128.0;
    (y.round().clamp(0.0, 255.0) as u8, u.round().clamp(0.0, 255.0) as u8, v.round().clamp(0.0, 255.0) as u8)
}

impl Service for ColorProducer {
    fn id(&self) -> ServiceId {
        self.id
    }

    fn kind(&self) -> ServiceKind {
        ServiceKind::Producer
    }

    fn filter_chain(&self) -> &FilterChain {
        &self.filter_chain
    }

    fn filter_chain_mut(&mut self) -> &mut FilterChain {
        &mut self.filter_chain
    }

    fn get_frame(&mut self, index: i64) -> Result<Option<Frame>> {
        let handle = Arc::new(RwLock::new(Properties::new()));
        let mut frame = Frame::new(index, handle);

        let yl = (self.width * self.height) as usize;
        let uvl = yl / 4;
        let mut data = vec![self.y; yl];
        data.extend(std::iter::repeat(self.u).take(uvl));
        data.extend(std::iter::repeat(self.v).take(uvl));
        frame.set_image(ImageBuffer::new(data, ImageFormat::Yuv420p, self.width, self.height, self.width));
        frame.set_audio(AudioBuffer::silence(self.audio_frequency, self.audio_channels, 0));

        let count = self.filter_chain.filter_count();
        self.filter_chain.apply_filters(&mut frame, count)?;
        Ok(Some(frame))
    }
}

impl Producer for ColorProducer {
    fn state(&self) -> &ProducerState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ProducerState {
        &mut self.state
    }

    fn properties(&self) -> &Properties {
        &self.properties
    }

    fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }
}

/// Registry constructor signature (`Repository::register_producer`).
pub fn ctor(profile: &Profile, _id: &str, arg: Option<&str>) -> Result<Arc<Mutex<dyn Producer>>> {
    Ok(Arc::new(Mutex::new(ColorProducer::new(profile, arg))) as Arc<Mutex<dyn Producer>>)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelkit_core::frame::ImageFormat;

    #[test]
    fn black_fills_zeroed_luma_and_neutral_chroma() {
        let mut p = ColorProducer::new(&Profile::PROGRESSIVE_HD, None);
        let mut frame = p.get_frame(0).unwrap().unwrap();
        let img = frame.get_image(ImageFormat::Yuv420p, 0, 0, false).unwrap();
        let yl = (Profile::PROGRESSIVE_HD.width * Profile::PROGRESSIVE_HD.height) as usize;
        assert!(img.as_slice()[..yl].iter().all(|&b| b == 0));
        assert!(img.as_slice()[yl..].iter().all(|&b| b == 128));
    }

    #[test]
    fn red_has_high_luma_weight_and_shifted_chroma() {
        let mut p = ColorProducer::new(&Profile::PROGRESSIVE_HD, Some("red"));
        let mut frame = p.get_frame(0).unwrap().unwrap();
        let img = frame.get_image(ImageFormat::Yuv420p, 0, 0, false).unwrap();
        let yl = (Profile::PROGRESSIVE_HD.width * Profile::PROGRESSIVE_HD.height) as usize;
        assert_eq!(img.as_slice()[0], 76); // 0.299 * 255 rounded
    }

    #[test]
    fn length_is_finite_so_playback_terminates() {
        let p = ColorProducer::new(&Profile::PROGRESSIVE_HD, None);
        assert_eq!(p.length(), DEFAULT_LENGTH);
    }
}
