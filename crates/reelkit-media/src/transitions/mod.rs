pub mod helpers;

mod crossfade;
mod dip_to_black;
mod iris;
mod push;
mod wipe;

pub use crossfade::{ctor as crossfade_ctor, Crossfade};
pub use dip_to_black::{ctor as dip_to_black_ctor, DipToBlack};
pub use iris::{ctor as iris_ctor, Iris};
pub use push::{ctor as push_ctor, Push};
pub use wipe::{ctor as wipe_ctor, Wipe};

use reelkit_core::error::Result;
use reelkit_core::frame::{Frame, ImageBuffer, ImageFormat};
use reelkit_core::properties::Properties;
use reelkit_core::service::{FilterChain, Service, ServiceId, ServiceKind};
use reelkit_core::transition::Transition;

/// Common identity/property-bag plumbing every spatial transition embeds.
/// Transitions are never pulled through `get_frame` directly — the tractor
/// calls `process` — so that method exists only to satisfy [`Service`].
pub struct TransitionBase {
    pub id: ServiceId,
    pub properties: Properties,
    pub filter_chain: FilterChain,
}

impl TransitionBase {
    pub fn new() -> Self {
        Self { id: ServiceId::new(), properties: Properties::new(), filter_chain: FilterChain::new() }
    }
}

impl Default for TransitionBase {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! impl_transition_service {
    ($ty:ty) => {
        impl Service for $ty {
            fn id(&self) -> ServiceId {
                self.base.id
            }
            fn kind(&self) -> ServiceKind {
                ServiceKind::Transition
            }
            fn filter_chain(&self) -> &FilterChain {
                &self.base.filter_chain
            }
            fn filter_chain_mut(&mut self) -> &mut FilterChain {
                &mut self.base.filter_chain
            }
            fn get_frame(&mut self, _index: i64) -> Result<Option<Frame>> {
                Ok(None)
            }
        }
    };
}
pub(crate) use impl_transition_service;

/// Resolve both frames to packed YUV420P and the progress `alpha` (position
/// mapped onto `[in, out]`, clamped to `[0, 1]`) a spatial transition needs.
pub(crate) fn prepare(t: &dyn Transition, mut a: Frame, b: Frame) -> Result<(Frame, ImageBuffer, ImageBuffer, f32)> {
    let img_a = a.get_image(ImageFormat::Yuv420p, 0, 0, true)?;
    let img_b_owner = b;
    let mut img_b_owner = img_b_owner;
    let img_b = img_b_owner.get_image(ImageFormat::Yuv420p, 0, 0, false)?;

    let (in_pt, out_pt) = t.in_out();
    let span = (out_pt - in_pt).max(1) as f32;
    let alpha = helpers::clamp01((a.position() - in_pt) as f32 / span);

    Ok((a, img_a, img_b, alpha))
}
