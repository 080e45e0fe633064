//! Dip-to-black: the outgoing clip fades to black over the first half of the
//! overlap, the incoming clip rises from black over the second half. Unlike
//! a crossfade the two clips never mix directly.

use std::sync::Arc;

use parking_lot::Mutex;

use reelkit_core::error::Result;
use reelkit_core::frame::{Frame, ImageBuffer, ImageFormat};
use reelkit_core::profile::Profile;
use reelkit_core::properties::Properties;
use reelkit_core::transition::Transition;

use super::helpers::{blend_byte, ease_in_out};
use super::{impl_transition_service, prepare, TransitionBase};

pub struct DipToBlack {
    base: TransitionBase,
}

impl DipToBlack {
    pub fn new() -> Self {
        Self { base: TransitionBase::new() }
    }
}

impl Default for DipToBlack {
    fn default() -> Self {
        Self::new()
    }
}

impl_transition_service!(DipToBlack);

impl Transition for DipToBlack {
    fn properties(&self) -> &Properties {
        &self.base.properties
    }
    fn properties_mut(&mut self) -> &mut Properties {
        &mut self.base.properties
    }

    fn process(&mut self, a: Frame, b: Frame) -> Result<Frame> {
        let (mut a, img_a, img_b, alpha) = prepare(self, a, b)?;
        let blended: Vec<u8> = if alpha <= 0.5 {
            let ramp = ease_in_out(alpha * 2.0);
            img_a.as_slice().iter().map(|&v| blend_byte(v, 0, ramp)).collect()
        } else {
            let ramp = ease_in_out((alpha - 0.5) * 2.0);
            img_b.as_slice().iter().map(|&v| blend_byte(0, v, ramp)).collect()
        };
        a.set_image(ImageBuffer::new(blended, ImageFormat::Yuv420p, img_a.width, img_a.height, img_a.width));
        Ok(a)
    }
}

/// Registry constructor; takes no arguments.
pub fn ctor(_profile: &Profile, _id: &str, _arg: Option<&str>) -> Result<Arc<Mutex<dyn Transition>>> {
    Ok(Arc::new(Mutex::new(DipToBlack::new())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use reelkit_core::frame::AudioBuffer;
    use std::sync::Arc;

    fn yuv_frame(position: i64, y_val: u8, w: u32, h: u32) -> Frame {
        let handle = Arc::new(RwLock::new(Properties::new()));
        let mut f = Frame::new(position, handle);
        let mut buf = vec![y_val; super::super::helpers::y_len(w, h)];
        buf.extend(vec![128u8; super::super::helpers::uv_len(w, h) * 2]);
        f.set_image(ImageBuffer::new(buf, ImageFormat::Yuv420p, w, h, w));
        f.set_audio(AudioBuffer::silence(48000, 2, 0));
        f
    }

    #[test]
    fn deepest_point_is_black() {
        let mut t = DipToBlack::new();
        t.properties_mut().set_int("in", 0);
        t.properties_mut().set_int("out", 10);
        let a = yuv_frame(5, 200, 4, 4);
        let b = yuv_frame(5, 200, 4, 4);
        let mut out = t.process(a, b).unwrap();
        let img = out.get_image(ImageFormat::Yuv420p, 0, 0, false).unwrap();
        let y = &img.as_slice()[..super::super::helpers::y_len(4, 4)];
        assert!(y.iter().all(|&v| v == 0));
    }

    #[test]
    fn start_is_pure_frame_a() {
        let mut t = DipToBlack::new();
        t.properties_mut().set_int("in", 0);
        t.properties_mut().set_int("out", 10);
        let a = yuv_frame(0, 200, 4, 4);
        let b = yuv_frame(0, 50, 4, 4);
        let mut out = t.process(a, b).unwrap();
        let img = out.get_image(ImageFormat::Yuv420p, 0, 0, false).unwrap();
        let y = &img.as_slice()[..super::super::helpers::y_len(4, 4)];
        assert!(y.iter().all(|&v| v == 200));
    }
}
