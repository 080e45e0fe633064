//! A service that combines two frames at the same position (spec §3.5,
//! §4.8).

use crate::error::Result;
use crate::frame::Frame;
use crate::properties::Properties;
use crate::service::Service;

/// `process` receives two frames at the same position and typically pushes a
/// resolver onto `a`'s image/audio stack that, once invoked, pulls both A's
/// and B's buffers and combines them; it returns the (now combined) A frame.
pub trait Transition: Service {
    fn properties(&self) -> &Properties;
    fn properties_mut(&mut self) -> &mut Properties;

    /// `true` if this transition applies regardless of `[in, out]`.
    fn always_active(&self) -> bool {
        self.properties().get_int("always_active") != 0
    }

    /// `[in, out]` range (profile frame units) this transition is scheduled
    /// over, ignored when `always_active()`.
    fn in_out(&self) -> (i64, i64) {
        (self.properties().get_int("in"), self.properties().get_int("out"))
    }

    fn is_active_at(&self, position: i64) -> bool {
        if self.always_active() {
            return true;
        }
        let (in_pt, out_pt) = self.in_out();
        in_pt <= position && position <= out_pt
    }

    /// Combine `a` and `b`, returning the combined frame (conventionally
    /// `a` with its resolver stack extended).
    fn process(&mut self, a: Frame, b: Frame) -> Result<Frame>;
}
