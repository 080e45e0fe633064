//! Rescale normaliser (spec §4.13 group 3), grounded on
//! `original_source/src/modules/core/filter_rescale.c` /
//! `filter_resize.c`. Nearest-neighbour on the luma plane and each chroma
//! plane independently; a production-grade filter would reach for a real
//! swscale-equivalent, but pixel kernels are explicitly out of scope
//! (spec.md §1).

use reelkit_core::error::Result;
use reelkit_core::filter::Filter;
use reelkit_core::frame::{Frame, ImageBuffer, ImageFormat};
use reelkit_core::properties::Properties;
use reelkit_core::profile::Profile;

use super::{impl_filter_service, FilterBase};

pub struct Rescale {
    base: FilterBase,
    target_w: u32,
    target_h: u32,
}

impl Rescale {
    pub fn new(target_w: u32, target_h: u32) -> Self {
        Self { base: FilterBase::new(), target_w, target_h }
    }
}

impl_filter_service!(Rescale);

impl Filter for Rescale {
    fn properties(&self) -> &Properties {
        &self.base.properties
    }
    fn properties_mut(&mut self) -> &mut Properties {
        &mut self.base.properties
    }

    fn process(&mut self, frame: &mut Frame) -> Result<()> {
        let (tw, th) = (self.target_w, self.target_h);
        frame.push_get_image(Box::new(move |f, format, _w, _h, writable| {
            let upstream = f.get_image(format, 0, 0, writable)?;
            if upstream.width == tw && upstream.height == th {
                return Ok(upstream);
            }
            Ok(nearest_neighbor(&upstream, tw, th))
        }));
        Ok(())
    }
}

fn nearest_neighbor(src: &ImageBuffer, tw: u32, th: u32) -> ImageBuffer {
    match src.format {
        ImageFormat::Yuv420p => resize_yuv420p(src, tw, th),
        _ => resize_packed(src, tw, th, bytes_per_pixel(src.format)),
    }
}

fn bytes_per_pixel(fmt: ImageFormat) -> u32 {
    match fmt {
        ImageFormat::Rgb24 => 3,
        ImageFormat::Rgba32 => 4,
        ImageFormat::Yuv420p | ImageFormat::Yuv422p => 1,
    }
}

fn resize_packed(src: &ImageBuffer, tw: u32, th: u32, bpp: u32) -> ImageBuffer {
    let data = src.as_slice();
    let mut out = vec![0u8; (tw * th * bpp) as usize];
    for y in 0..th {
        let sy = (y as u64 * src.height as u64 / th.max(1) as u64) as u32;
        for x in 0..tw {
            let sx = (x as u64 * src.width as u64 / tw.max(1) as u64) as u32;
            let src_off = ((sy * src.width + sx) * bpp) as usize;
            let dst_off = ((y * tw + x) * bpp) as usize;
            out[dst_off..dst_off + bpp as usize].copy_from_slice(&data[src_off..src_off + bpp as usize]);
        }
    }
    ImageBuffer::new(out, src.format, tw, th, tw * bpp)
}

fn resize_plane(plane: &[u8], sw: u32, sh: u32, tw: u32, th: u32) -> Vec<u8> {
    let mut out = vec![0u8; (tw * th) as usize];
    for y in 0..th {
        let sy = (y as u64 * sh as u64 / th.max(1) as u64) as u32;
        for x in 0..tw {
            let sx = (x as u64 * sw as u64 / tw.max(1) as u64) as u32;
            out[(y * tw + x) as usize] = plane[(sy * sw + sx) as usize];
        }
    }
    out
}

fn resize_yuv420p(src: &ImageBuffer, tw: u32, th: u32) -> ImageBuffer {
    let data = src.as_slice();
    let (sw, sh) = (src.width, src.height);
    let yl = (sw * sh) as usize;
    let cl = yl / 4;
    let (y_plane, u_plane, v_plane) = (&data[..yl], &data[yl..yl + cl], &data[yl + cl..]);

    let (cw_t, ch_t) = ((tw / 2).max(1), (th / 2).max(1));
    let y_out = resize_plane(y_plane, sw, sh, tw, th);
    let u_out = resize_plane(u_plane, (sw / 2).max(1), (sh / 2).max(1), cw_t, ch_t);
    let v_out = resize_plane(v_plane, (sw / 2).max(1), (sh / 2).max(1), cw_t, ch_t);

    let mut out = Vec::with_capacity(y_out.len() + u_out.len() + v_out.len());
    out.extend(y_out);
    out.extend(u_out);
    out.extend(v_out);
    ImageBuffer::new(out, ImageFormat::Yuv420p, tw, th, tw)
}

/// Registry constructor for the loader's `rescale` normaliser group, sized
/// to the run's target `Profile`.
pub fn ctor(profile: &Profile, _id: &str, _arg: Option<&str>) -> Result<std::sync::Arc<parking_lot::Mutex<dyn Filter>>> {
    Ok(std::sync::Arc::new(parking_lot::Mutex::new(Rescale::new(profile.width, profile.height))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use std::sync::Arc;

    #[test]
    fn matching_size_is_a_no_op() {
        let mut f = Rescale::new(4, 4);
        let handle = Arc::new(RwLock::new(Properties::new()));
        let mut frame = Frame::new(0, handle);
        frame.set_image(ImageBuffer::new(vec![7u8; 4 * 4 * 3], ImageFormat::Rgb24, 4, 4, 12));
        f.process(&mut frame).unwrap();
        let img = frame.get_image(ImageFormat::Rgb24, 0, 0, false).unwrap();
        assert_eq!((img.width, img.height), (4, 4));
    }

    #[test]
    fn downscale_halves_dimensions() {
        let mut f = Rescale::new(2, 2);
        let handle = Arc::new(RwLock::new(Properties::new()));
        let mut frame = Frame::new(0, handle);
        let mut data = vec![100u8; 4 * 4];
        data.extend(vec![128u8; 2 * 2 * 2]);
        frame.set_image(ImageBuffer::new(data, ImageFormat::Yuv420p, 4, 4, 4));
        f.process(&mut frame).unwrap();
        let img = frame.get_image(ImageFormat::Yuv420p, 0, 0, false).unwrap();
        assert_eq!((img.width, img.height), (2, 2));
        assert_eq!(img.as_slice().len(), 2 * 2 + 2 * 1 * 1 * 2);
    }
}
