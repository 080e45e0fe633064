//! Iris wipe: a circle expands from the frame center, revealing the
//! incoming clip through the growing aperture. Radius is eased on a cubic
//! curve and feathered to avoid an aliased ring.

use std::sync::Arc;

use parking_lot::Mutex;

use reelkit_core::error::Result;
use reelkit_core::frame::{Frame, ImageBuffer, ImageFormat};
use reelkit_core::profile::Profile;
use reelkit_core::properties::Properties;
use reelkit_core::transition::Transition;

use super::helpers::{blend_byte, center_dist, ease_in_out_cubic, norm_x, norm_y, split_planes, uv_len, wipe_alpha, y_len};
use super::{impl_transition_service, prepare, TransitionBase};

const FEATHER: f32 = 0.04;
/// Distance from center to the furthest corner is ~0.707; a small margin
/// keeps the iris fully open at alpha=1.
const MAX_RADIUS: f32 = 0.75;

pub struct Iris {
    base: TransitionBase,
}

impl Iris {
    pub fn new() -> Self {
        Self { base: TransitionBase::new() }
    }
}

impl Default for Iris {
    fn default() -> Self {
        Self::new()
    }
}

impl_transition_service!(Iris);

impl Transition for Iris {
    fn properties(&self) -> &Properties {
        &self.base.properties
    }
    fn properties_mut(&mut self) -> &mut Properties {
        &mut self.base.properties
    }

    fn process(&mut self, a: Frame, b: Frame) -> Result<Frame> {
        let (mut a, img_a, img_b, alpha) = prepare(self, a, b)?;
        let (w, h) = (img_a.width, img_a.height);
        let radius = ease_in_out_cubic(alpha) * MAX_RADIUS;

        let yl = y_len(w, h);
        let uvl = uv_len(w, h);
        let mut out = vec![0u8; yl + uvl * 2];

        let (ya, ua, va) = split_planes(img_a.as_slice(), w, h);
        let (yb, ub, vb) = split_planes(img_b.as_slice(), w, h);

        for py in 0..h {
            let ny = norm_y(py, h);
            for px in 0..w {
                let dist = center_dist(norm_x(px, w), ny);
                let i = (py * w + px) as usize;
                out[i] = blend_byte(ya[i], yb[i], wipe_alpha(radius, dist, FEATHER));
            }
        }

        let (uw, uh) = (w / 2, h / 2);
        for py in 0..uh {
            let ny = norm_y(py, uh);
            for px in 0..uw {
                let dist = center_dist(norm_x(px, uw), ny);
                let i = (py * uw + px) as usize;
                out[yl + i] = blend_byte(ua[i], ub[i], wipe_alpha(radius, dist, FEATHER));
            }
        }
        for py in 0..uh {
            let ny = norm_y(py, uh);
            for px in 0..uw {
                let dist = center_dist(norm_x(px, uw), ny);
                let i = (py * uw + px) as usize;
                out[yl + uvl + i] = blend_byte(va[i], vb[i], wipe_alpha(radius, dist, FEATHER));
            }
        }

        a.set_image(ImageBuffer::new(out, ImageFormat::Yuv420p, w, h, w));
        Ok(a)
    }
}

/// Registry constructor; takes no arguments.
pub fn ctor(_profile: &Profile, _id: &str, _arg: Option<&str>) -> Result<Arc<Mutex<dyn Transition>>> {
    Ok(Arc::new(Mutex::new(Iris::new())))
}
