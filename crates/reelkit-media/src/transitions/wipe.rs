//! Left-to-right wipe: a vertical bar sweeps across the frame, uncovering
//! frame_b from the left as frame_a exits to the right. A small feather
//! softens the leading edge.

use std::sync::Arc;

use parking_lot::Mutex;

use reelkit_core::error::Result;
use reelkit_core::frame::{Frame, ImageBuffer, ImageFormat};
use reelkit_core::profile::Profile;
use reelkit_core::properties::Properties;
use reelkit_core::transition::Transition;

use super::helpers::{blend_byte, ease_in_out, norm_x, split_planes, wipe_alpha};
use super::{impl_transition_service, prepare, TransitionBase};

/// Feather width as a fraction of frame width; ~38px at a 1920-wide output.
const FEATHER: f32 = 0.02;

pub struct Wipe {
    base: TransitionBase,
}

impl Wipe {
    pub fn new() -> Self {
        Self { base: TransitionBase::new() }
    }
}

impl Default for Wipe {
    fn default() -> Self {
        Self::new()
    }
}

impl_transition_service!(Wipe);

impl Transition for Wipe {
    fn properties(&self) -> &Properties {
        &self.base.properties
    }
    fn properties_mut(&mut self) -> &mut Properties {
        &mut self.base.properties
    }

    fn process(&mut self, a: Frame, b: Frame) -> Result<Frame> {
        let (mut a, img_a, img_b, alpha) = prepare(self, a, b)?;
        let (w, h) = (img_a.width, img_a.height);
        let edge = ease_in_out(alpha);

        let (ay, au, av) = split_planes(img_a.as_slice(), w, h);
        let (by, bu, bv) = split_planes(img_b.as_slice(), w, h);
        let mut out = Vec::with_capacity(img_a.as_slice().len());

        for py in 0..h {
            for px in 0..w {
                let wa = wipe_alpha(norm_x(px, w), edge, FEATHER);
                out.push(blend_byte(by[(py * w + px) as usize], ay[(py * w + px) as usize], wa));
            }
        }
        let (uw, uh) = (w / 2, h / 2);
        for py in 0..uh {
            for px in 0..uw {
                let wa = wipe_alpha(norm_x(px, uw), edge, FEATHER);
                out.push(blend_byte(bu[(py * uw + px) as usize], au[(py * uw + px) as usize], wa));
            }
        }
        for py in 0..uh {
            for px in 0..uw {
                let wa = wipe_alpha(norm_x(px, uw), edge, FEATHER);
                out.push(blend_byte(bv[(py * uw + px) as usize], av[(py * uw + px) as usize], wa));
            }
        }

        a.set_image(ImageBuffer::new(out, ImageFormat::Yuv420p, w, h, w));
        Ok(a)
    }
}

/// Registry constructor; takes no arguments.
pub fn ctor(_profile: &Profile, _id: &str, _arg: Option<&str>) -> Result<Arc<Mutex<dyn Transition>>> {
    Ok(Arc::new(Mutex::new(Wipe::new())))
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
    fn half_alpha_splits_left_right() {
        let mut t = Wipe::new();
        t.properties_mut().set_int("in", 0);
        t.properties_mut().set_int("out", 10);
        let a = yuv_frame(5, 200, 100, 8, 4);
        let b = yuv_frame(5, 50, 128, 8, 4);
        let mut out = t.process(a, b).unwrap();
        let img = out.get_image(ImageFormat::Yuv420p, 0, 0, false).unwrap();
        assert_eq!(img.as_slice()[0], 50);
        assert_eq!(img.as_slice()[7], 200);
    }

    #[test]
    fn zero_alpha_is_all_frame_a() {
        let mut t = Wipe::new();
        t.properties_mut().set_int("in", 0);
        t.properties_mut().set_int("out", 10);
        let a = yuv_frame(0, 200, 100, 8, 4);
        let b = yuv_frame(0, 50, 128, 8, 4);
        let mut out = t.process(a, b).unwrap();
        let img = out.get_image(ImageFormat::Yuv420p, 0, 0, false).unwrap();
        let yl = super::super::helpers::y_len(8, 4);
        assert!(img.as_slice()[..yl].iter().all(|&v| v == 200));
    }
}
