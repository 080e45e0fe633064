//! Math utilities shared by the spatial/temporal transitions in this module.
//! Plain `f32`/byte-slice operations — no decoder or pipeline types.

#[inline]
pub fn clamp01(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

/// Smooth-step cubic ease-in/out. Zero derivative at both endpoints, so
/// there's no visible pop at the start or end of a dissolve.
#[inline]
pub fn ease_in_out(t: f32) -> f32 {
    let t = clamp01(t);
    t * t * (3.0 - 2.0 * t)
}

/// Stronger cubic ease-in/out, used where the smooth-step curve reads too
/// gentle (iris radius, push displacement).
#[inline]
pub fn ease_in_out_cubic(t: f32) -> f32 {
    let t = clamp01(t);
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

/// Blend two gamma-encoded byte values at `alpha` in `[0, 1]`. `alpha = 0`
/// returns `a`, `alpha = 1` returns `b`. Operates in gamma space, which is a
/// correct approximation for SDR content.
#[inline]
pub fn blend_byte(a: u8, b: u8, alpha: f32) -> u8 {
    ((1.0 - alpha) * a as f32 + alpha * b as f32).round() as u8
}

#[inline]
pub fn norm_x(x: u32, w: u32) -> f32 {
    (x as f32 + 0.5) / w as f32
}

#[inline]
pub fn norm_y(y: u32, h: u32) -> f32 {
    (y as f32 + 0.5) / h as f32
}

/// Distance from frame center for normalized coordinates: `0.0` at center,
/// `~0.707` at the furthest corner.
#[inline]
pub fn center_dist(nx: f32, ny: f32) -> f32 {
    let dx = nx - 0.5;
    let dy = ny - 0.5;
    (dx * dx + dy * dy).sqrt()
}

/// Map a coordinate against an edge position into a soft-edge blend alpha.
/// `feather = 0.0` gives a hard binary cut.
#[inline]
pub fn wipe_alpha(coord: f32, edge: f32, feather: f32) -> f32 {
    if feather <= 0.0 {
        return if coord >= edge { 1.0 } else { 0.0 };
    }
    clamp01((coord - (edge - feather * 0.5)) / feather)
}

/// Packed YUV420P layout (no stride padding): Y plane, then U, then V, each
/// contiguous.
#[inline]
pub fn y_len(w: u32, h: u32) -> usize {
    (w * h) as usize
}

#[inline]
pub fn uv_len(w: u32, h: u32) -> usize {
    ((w / 2) * (h / 2)) as usize
}

/// Split a packed YUV420P buffer into (Y, U, V) plane slices.
#[inline]
pub fn split_planes(buf: &[u8], w: u32, h: u32) -> (&[u8], &[u8], &[u8]) {
    let yl = y_len(w, h);
    let cl = uv_len(w, h);
    debug_assert_eq!(buf.len(), yl + cl * 2, "split_planes: {} != {}", buf.len(), yl + cl * 2);
    (&buf[..yl], &buf[yl..yl + cl], &buf[yl + cl..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ease_in_out_endpoints() {
        assert_eq!(ease_in_out(0.0), 0.0);
        assert_eq!(ease_in_out(1.0), 1.0);
        assert!((ease_in_out(0.5) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn blend_byte_endpoints() {
        assert_eq!(blend_byte(0, 255, 0.0), 0);
        assert_eq!(blend_byte(0, 255, 1.0), 255);
        assert_eq!(blend_byte(100, 200, 0.5), 150);
    }

    #[test]
    fn plane_layout_1080p() {
        let (w, h) = (1920_u32, 1080_u32);
        assert_eq!(y_len(w, h), 1920 * 1080);
        assert_eq!(uv_len(w, h), 960 * 540);
    }

    #[test]
    fn wipe_alpha_hard_edge() {
        assert_eq!(wipe_alpha(0.3, 0.5, 0.0), 0.0);
        assert_eq!(wipe_alpha(0.7, 0.5, 0.0), 1.0);
    }
}
