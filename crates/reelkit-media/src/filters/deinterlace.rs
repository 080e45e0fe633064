//! Deinterlace normaliser (spec §4.13 group 2), only attached by the loader
//! when the producer announces interlaced content via `progressive = 0`.
//! Grounded on `original_source/src/modules/avformat/filter_avdeinterlace.c`;
//! implements the simplest of that family's strategies (line-blend) rather
//! than a motion-adaptive one, since field-order-aware deinterlacing is a
//! pixel kernel and out of scope (spec.md §1).

use reelkit_core::error::Result;
use reelkit_core::filter::Filter;
use reelkit_core::frame::{Frame, ImageBuffer};
use reelkit_core::properties::Properties;
use reelkit_core::profile::Profile;

use super::{impl_filter_service, FilterBase};

pub struct Deinterlace {
    base: FilterBase,
}

impl Deinterlace {
    pub fn new() -> Self {
        Self { base: FilterBase::new() }
    }
}

impl Default for Deinterlace {
    fn default() -> Self {
        Self::new()
    }
}

impl_filter_service!(Deinterlace);

impl Filter for Deinterlace {
    fn properties(&self) -> &Properties {
        &self.base.properties
    }
    fn properties_mut(&mut self) -> &mut Properties {
        &mut self.base.properties
    }

    fn process(&mut self, frame: &mut Frame) -> Result<()> {
        frame.push_get_image(Box::new(move |f, format, w, h, writable| {
            let upstream = f.get_image(format, w, h, writable)?;
            Ok(blend_fields(&upstream))
        }));
        Ok(())
    }
}

/// Each output line is the average of itself and the next, which suppresses
/// the comb artefact from alternating top/bottom fields at the cost of
/// vertical sharpness. The bottom line has no successor and is left as is.
fn blend_fields(src: &ImageBuffer) -> ImageBuffer {
    let stride = src.stride as usize;
    let h = src.height as usize;
    let mut data = src.as_slice().to_vec();
    let plane_len = stride * h;
    if data.len() < plane_len {
        return src.clone();
    }
    for row in 0..h.saturating_sub(1) {
        let (this, next) = (row * stride, (row + 1) * stride);
        for col in 0..stride {
            let a = data[this + col] as u16;
            let b = data[next + col] as u16;
            data[this + col] = ((a + b) / 2) as u8;
        }
    }
    ImageBuffer::new(data, src.format, src.width, src.height, src.stride)
}

/// Registry constructor for the loader's `deinterlace` normaliser group.
pub fn ctor(_profile: &Profile, _id: &str, _arg: Option<&str>) -> Result<std::sync::Arc<parking_lot::Mutex<dyn Filter>>> {
    Ok(std::sync::Arc::new(parking_lot::Mutex::new(Deinterlace::new())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use reelkit_core::frame::ImageFormat;
    use std::sync::Arc;

    #[test]
    fn blends_alternating_rows_toward_the_mean() {
        let mut f = Deinterlace::new();
        let handle = Arc::new(RwLock::new(Properties::new()));
        let mut frame = Frame::new(0, handle);
        // 2-row, 2-col RGB24: row 0 black, row 1 white.
        let mut data = vec![0u8; 2 * 3];
        data.extend(vec![255u8; 2 * 3]);
        frame.set_image(ImageBuffer::new(data, ImageFormat::Rgb24, 2, 2, 6));
        f.process(&mut frame).unwrap();
        let img = frame.get_image(ImageFormat::Rgb24, 0, 0, false).unwrap();
        assert_eq!(img.as_slice()[0], 127);
        // Last row has no successor, stays at its original value.
        assert_eq!(img.as_slice()[6], 255);
    }
}
