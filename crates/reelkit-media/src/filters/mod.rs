//! Concrete filters, most of them the normaliser candidates the loader
//! chains onto a raw producer to conform it to the target profile (spec
//! §4.13): colour-space conversion, deinterlacing, rescaling, resampling,
//! and channel-layout conform. `loudness` is the one user-facing effect
//! grounded on scenario S5 rather than a normaliser.

pub mod channels;
pub mod colorspace;
pub mod deinterlace;
pub mod loudness;
pub mod resample;
pub mod rescale;

pub use channels::ChannelConform;
pub use colorspace::ColorspaceConvert;
pub use deinterlace::Deinterlace;
pub use loudness::Loudness;
pub use resample::Resample;
pub use rescale::Rescale;

use reelkit_core::frame::Frame;
use reelkit_core::properties::Properties;
use reelkit_core::service::{FilterChain, Service, ServiceId, ServiceKind};

/// Common identity/property-bag plumbing every filter in this module
/// embeds, mirroring `transitions::TransitionBase`. Filters are never
/// pulled through `get_frame` directly — a producer or a transition's field
/// calls `process` — so that method exists only to satisfy [`Service`].
pub struct FilterBase {
    pub id: ServiceId,
    pub properties: Properties,
    pub filter_chain: FilterChain,
}

impl FilterBase {
    pub fn new() -> Self {
        Self { id: ServiceId::new(), properties: Properties::new(), filter_chain: FilterChain::new() }
    }
}

impl Default for FilterBase {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! impl_filter_service {
    ($ty:ty) => {
        impl Service for $ty {
            fn id(&self) -> ServiceId {
                self.base.id
            }
            fn kind(&self) -> ServiceKind {
                ServiceKind::Filter
            }
            fn filter_chain(&self) -> &FilterChain {
                &self.base.filter_chain
            }
            fn filter_chain_mut(&mut self) -> &mut FilterChain {
                &mut self.base.filter_chain
            }
            fn get_frame(&mut self, _index: i64) -> reelkit_core::error::Result<Option<Frame>> {
                Ok(None)
            }
        }
    };
}
pub(crate) use impl_filter_service;
