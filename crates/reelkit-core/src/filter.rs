//! A service that transforms a frame by deferring work onto its resolver
//! stack (spec §3.5, §4.7).

use crate::error::Result;
use crate::frame::Frame;
use crate::properties::Properties;
use crate::service::Service;

/// `process` runs in the thread that produced the frame; it reads the
/// filter's own properties (possibly animated by `frame.position()`) and
/// pushes a resolver rather than doing the transform eagerly. The resolver
/// only runs once a consumer calls `get_image`/`get_audio`.
pub trait Filter: Service {
    fn properties(&self) -> &Properties;
    fn properties_mut(&mut self) -> &mut Properties;

    /// `[in, out]` frame range this filter applies over; `(0, 0)` means
    /// "applies everywhere" (spec §4.7). Backed by the `in`/`out`
    /// properties by default, so setting them via the property bag is
    /// enough to scope a filter without a separate setter.
    fn in_out(&self) -> (i64, i64) {
        (self.properties().get_int("in"), self.properties().get_int("out"))
    }

    fn process(&mut self, frame: &mut Frame) -> Result<()>;
}
