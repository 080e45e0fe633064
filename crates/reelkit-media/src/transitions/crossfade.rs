//! Linear dissolve between two clips, blended in gamma-encoded byte space
//! with a smooth-step ease applied to the raw alpha so the midpoint doesn't
//! read as muddy.

use std::sync::Arc;

use parking_lot::Mutex;

use reelkit_core::error::Result;
use reelkit_core::frame::{Frame, ImageBuffer, ImageFormat};
use reelkit_core::profile::Profile;
use reelkit_core::properties::Properties;
use reelkit_core::transition::Transition;

use super::helpers::{blend_byte, ease_in_out};
use super::{impl_transition_service, prepare, TransitionBase};

pub struct Crossfade {
    base: TransitionBase,
}

impl Crossfade {
    pub fn new() -> Self {
        Self { base: TransitionBase::new() }
    }
}

impl Default for Crossfade {
    fn default() -> Self {
        Self::new()
    }
}

impl_transition_service!(Crossfade);

impl Transition for Crossfade {
    fn properties(&self) -> &Properties {
        &self.base.properties
    }
    fn properties_mut(&mut self) -> &mut Properties {
        &mut self.base.properties
    }

    fn process(&mut self, a: Frame, b: Frame) -> Result<Frame> {
        let (mut a, img_a, img_b, alpha) = prepare(self, a, b)?;
        let eased = ease_in_out(alpha);
        let blended: Vec<u8> = img_a.as_slice().iter().zip(img_b.as_slice()).map(|(&x, &y)| blend_byte(x, y, eased)).collect();
        a.set_image(ImageBuffer::new(blended, ImageFormat::Yuv420p, img_a.width, img_a.height, img_a.width));
        Ok(a)
    }
}

/// Registry constructor; takes no arguments.
pub fn ctor(_profile: &Profile, _id: &str, _arg: Option<&str>) -> Result<Arc<Mutex<dyn Transition>>> {
    Ok(Arc::new(Mutex::new(Crossfade::new())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use reelkit_core::frame::AudioBuffer;
    use std::sync::Arc;

    fn yuv_frame(position: i64, y_val: u8, uv_val: u8, w: u32, h: u32) -> Frame {
        let handle = Arc::new(RwLock::new(Properties::new()));
        let mut f = Frame::new(position, handle);
        let mut buf = vec![y_val; super::super::helpers::y_len(w, h)];
        buf.extend(vec![uv_val; super::super::helpers::uv_len(w, h) * 2]);
        f.set_image(ImageBuffer::new(buf, ImageFormat::Yuv420p, w, h, w));
        f.set_audio(AudioBuffer::silence(48000, 2, 0));
        f
    }

    #[test]
    fn midpoint_is_symmetric_average() {
        let mut cf = Crossfade::new();
        cf.properties_mut().set_int("in", 0);
        cf.properties_mut().set_int("out", 10);
        let a = yuv_frame(5, 0, 0, 4, 4);
        let b = yuv_frame(5, 200, 0, 4, 4);
        let mut out = cf.process(a, b).unwrap();
        let img = out.get_image(ImageFormat::Yuv420p, 0, 0, false).unwrap();
        assert!(img.as_slice()[..super::super::helpers::y_len(4, 4)].iter().all(|&v| v == 100));
    }

    #[test]
    fn alpha_zero_is_frame_a() {
        let mut cf = Crossfade::new();
        cf.properties_mut().set_int("in", 0);
        cf.properties_mut().set_int("out", 10);
        let a = yuv_frame(0, 10, 0, 4, 4);
        let b = yuv_frame(0, 250, 0, 4, 4);
        let mut out = cf.process(a, b).unwrap();
        let img = out.get_image(ImageFormat::Yuv420p, 0, 0, false).unwrap();
        assert!(img.as_slice()[..super::super::helpers::y_len(4, 4)].iter().all(|&v| v == 10));
    }
}
