//! Horizontal push: frame_b slides in from the right while frame_a is
//! pushed off to the left. No blending — every output pixel is copied
//! verbatim from exactly one source frame, avoiding the "double image"
//! ghosting a crossfade shows during motion.

use std::sync::Arc;

use parking_lot::Mutex;

use reelkit_core::error::Result;
use reelkit_core::frame::{Frame, ImageBuffer, ImageFormat};
use reelkit_core::profile::Profile;
use reelkit_core::properties::Properties;
use reelkit_core::transition::Transition;

use super::helpers::{ease_in_out_cubic, split_planes};
use super::{impl_transition_service, prepare, TransitionBase};

pub struct Push {
    base: TransitionBase,
}

impl Push {
    pub fn new() -> Self {
        Self { base: TransitionBase::new() }
    }
}

impl Default for Push {
    fn default() -> Self {
        Self::new()
    }
}

impl_transition_service!(Push);

/// Displace one plane: columns left of the moving boundary come from
/// frame_a (shifted by `boundary` columns), columns at/right of it come
/// from frame_b (shifted by `width - boundary`).
fn push_plane(plane_a: &[u8], plane_b: &[u8], w: u32, h: u32, boundary: u32, out: &mut Vec<u8>) {
    for py in 0..h {
        for px in 0..w {
            let idx = if px < w - boundary {
                (py * w + px + boundary) as usize
            } else {
                (py * w + (px - (w - boundary))) as usize
            };
            let from_a = px < w - boundary;
            out.push(if from_a { plane_a[idx] } else { plane_b[idx] });
        }
    }
}

impl Transition for Push {
    fn properties(&self) -> &Properties {
        &self.base.properties
    }
    fn properties_mut(&mut self) -> &mut Properties {
        &mut self.base.properties
    }

    fn process(&mut self, a: Frame, b: Frame) -> Result<Frame> {
        let (mut a, img_a, img_b, alpha) = prepare(self, a, b)?;
        let (w, h) = (img_a.width, img_a.height);
        let p = ease_in_out_cubic(alpha);
        let boundary = (w as f32 * p).round() as u32;

        let (ay, au, av) = split_planes(img_a.as_slice(), w, h);
        let (by, bu, bv) = split_planes(img_b.as_slice(), w, h);
        let mut out = Vec::with_capacity(img_a.as_slice().len());

        push_plane(ay, by, w, h, boundary, &mut out);
        let (uw, uh) = (w / 2, h / 2);
        push_plane(au, bu, uw, uh, boundary / 2, &mut out);
        push_plane(av, bv, uw, uh, boundary / 2, &mut out);

        a.set_image(ImageBuffer::new(out, ImageFormat::Yuv420p, w, h, w));
        Ok(a)
    }
}

/// Registry constructor; takes no arguments.
pub fn ctor(_profile: &Profile, _id: &str, _arg: Option<&str>) -> Result<Arc<Mutex<dyn Transition>>> {
    Ok(Arc::new(Mutex::new(Push::new())))
}
