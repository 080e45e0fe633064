//! Colour-space / pixel-format normaliser: the first group the loader tries
//! to attach (spec §4.13 group 1), grounded on
//! `original_source/src/modules/core/filter_colorspace.c`.
//!
//! This toy pipeline only ever decodes into YUV420P (BT.601/BT.709 full
//! range) or RGB24, so the conversion matrix is the familiar ITU-R BT.601
//! one; a richer implementation would pick the matrix from the frame's
//! `meta.media.colorspace` property instead of assuming BT.601.

use reelkit_core::error::Result;
use reelkit_core::frame::{Frame, ImageBuffer, ImageFormat};
use reelkit_core::filter::Filter;
use reelkit_core::properties::Properties;
use reelkit_core::profile::Profile;
use reelkit_core::slice::run_slices_mut;

use super::{impl_filter_service, FilterBase};

/// Row bands handed to the slice runner; one per rayon worker is plenty
/// for a per-pixel conversion this cheap.
const CONVERT_JOBS: usize = 4;

pub struct ColorspaceConvert {
    base: FilterBase,
    target: ImageFormat,
}

impl ColorspaceConvert {
    pub fn new(target: ImageFormat) -> Self {
        Self { base: FilterBase::new(), target }
    }
}

impl_filter_service!(ColorspaceConvert);

impl Filter for ColorspaceConvert {
    fn properties(&self) -> &Properties {
        &self.base.properties
    }
    fn properties_mut(&mut self) -> &mut Properties {
        &mut self.base.properties
    }

    fn process(&mut self, frame: &mut Frame) -> Result<()> {
        let target = self.target;
        frame.push_get_image(Box::new(move |f, _requested, w, h, writable| {
            let upstream = f.get_image(ImageFormat::Yuv420p, w, h, writable)?;
            Ok(convert(&upstream, target))
        }));
        Ok(())
    }
}

/// Convert between YUV420P (no stride padding) and packed RGB24/RGBA32.
/// Identity when `upstream.format == target`.
fn convert(upstream: &ImageBuffer, target: ImageFormat) -> ImageBuffer {
    match (upstream.format, target) {
        (a, b) if a == b => upstream.clone(),
        (ImageFormat::Yuv420p, ImageFormat::Rgb24) => yuv420p_to_rgb(upstream, false),
        (ImageFormat::Yuv420p, ImageFormat::Rgba32) => yuv420p_to_rgb(upstream, true),
        _ => upstream.clone(),
    }
}

/// Per-row BT.601 YUV420P->RGB conversion, spread over the image's row
/// bands via the slice runner (spec §5) since each row is independent of
/// every other — the same "SMP slices over horizontal bands" shape the
/// spec describes for filters in general.
fn yuv420p_to_rgb(src: &ImageBuffer, alpha: bool) -> ImageBuffer {
    let (w, h) = (src.width, src.height);
    let data = src.as_slice();
    let yl = (w * h) as usize;
    let cw = (w / 2).max(1);
    let (y_plane, u_plane, v_plane) = (&data[..yl], &data[yl..yl + (yl / 4)], &data[yl + (yl / 4)..]);

    let bpp = if alpha { 4 } else { 3 };
    let mut out = vec![0u8; (w * h) as usize * bpp];
    run_slices_mut(&mut out, h, CONVERT_JOBS, |band, rows| {
        for local_row in 0..(band.end - band.start) {
            let row = band.start + local_row;
            for col in 0..w {
                let yi = (row * w + col) as usize;
                let ci = ((row / 2) * cw + col / 2) as usize;
                let y = y_plane[yi] as f32;
                let u = u_plane.get(ci).copied().unwrap_or(128) as f32 - 128.0;
                let v = v_plane.get(ci).copied().unwrap_or(128) as f32 - 128.0;
                let r = (y + 1.402 * v).round().clamp(0.0, 255.0) as u8;
                let g = (y - 0.344136 * u - 0.714136 * v).round().clamp(0.0, 255.0) as u8;
                let b = (y + 1.772 * u).round().clamp(0.0, 255.0) as u8;
                let out_i = (local_row * w + col) as usize * bpp;
                rows[out_i] = r;
                rows[out_i + 1] = g;
                rows[out_i + 2] = b;
                if alpha {
                    rows[out_i + 3] = 255;
                }
            }
        }
    });
    ImageBuffer::new(out, if alpha { ImageFormat::Rgba32 } else { ImageFormat::Rgb24 }, w, h, w * bpp as u32)
}

/// Registry constructor for the loader's `colorspace` normaliser group
/// (`reelkit-core::factory::FilterCtor` signature). `arg` names the target
/// format (`rgb24`, `rgba32`); anything else, including `None`, keeps YUV.
pub fn ctor(
    _profile: &Profile,
    _id: &str,
    arg: Option<&str>,
) -> Result<std::sync::Arc<parking_lot::Mutex<dyn Filter>>> {
    let target = match arg {
        Some("rgb24") => ImageFormat::Rgb24,
        Some("rgba32") => ImageFormat::Rgba32,
        _ => ImageFormat::Yuv420p,
    };
    Ok(std::sync::Arc::new(parking_lot::Mutex::new(ColorspaceConvert::new(target))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use std::sync::Arc;

    #[test]
    fn neutral_gray_yuv_converts_to_mid_gray_rgb() {
        let mut f = ColorspaceConvert::new(ImageFormat::Rgb24);
        let handle = Arc::new(RwLock::new(Properties::new()));
        let mut frame = Frame::new(0, handle);
        let mut data = vec![128u8; 4 * 4];
        data.extend(vec![128u8; 2 * 2 * 2]);
        frame.set_image(ImageBuffer::new(data, ImageFormat::Yuv420p, 4, 4, 4));
        f.process(&mut frame).unwrap();
        let img = frame.get_image(ImageFormat::Rgb24, 0, 0, false).unwrap();
        assert_eq!(img.format, ImageFormat::Rgb24);
        assert_eq!(img.as_slice()[..3], [128, 128, 128]);
    }

    #[test]
    fn same_format_is_identity() {
        let mut f = ColorspaceConvert::new(ImageFormat::Yuv420p);
        let handle = Arc::new(RwLock::new(Properties::new()));
        let mut frame = Frame::new(0, handle);
        let mut data = vec![16u8; 4 * 4];
        data.extend(vec![200u8; 2 * 2 * 2]);
        frame.set_image(ImageBuffer::new(data.clone(), ImageFormat::Yuv420p, 4, 4, 4));
        f.process(&mut frame).unwrap();
        let img = frame.get_image(ImageFormat::Yuv420p, 0, 0, false).unwrap();
        assert_eq!(img.as_slice(), &data[..]);
    }
}
