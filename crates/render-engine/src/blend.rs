//! Porter-Duff "over" on straight (non-premultiplied) RGBA8.

use image::{Rgba, RgbaImage};

/// Composite `src` (colour `rgb`, coverage `a_s` in [0, 1]) over `dst`.
///
/// `a_s == 0` leaves `dst` untouched and `a_s == 1` replaces it, so those
/// two cases are exact.
#[inline]
pub fn over(dst: &mut Rgba<u8>, rgb: [u8; 3], a_s: f32) {
    if a_s <= 0.0 {
        return;
    }
    if a_s >= 1.0 {
        *dst = Rgba([rgb[0], rgb[1], rgb[2], 255]);
        return;
    }

    let a_d = f32::from(dst[3]) / 255.0;
    let a_o = a_s + a_d * (1.0 - a_s);
    let divisor = if a_o > 0.0 { a_o } else { 1.0 };

    for c in 0..3 {
        let v = (f32::from(rgb[c]) * a_s + f32::from(dst[c]) * a_d * (1.0 - a_s)) / divisor;
        dst[c] = to_u8(v);
    }
    dst[3] = to_u8(a_o * 255.0);
}

/// Composite one straight-alpha pixel over another.
#[inline]
pub fn over_pixel(dst: &mut Rgba<u8>, src: Rgba<u8>) {
    over(dst, [src[0], src[1], src[2]], f32::from(src[3]) / 255.0);
}

/// Per-pixel coverage of an image's alpha channel, row-major.
pub fn alpha_plane(image: &RgbaImage) -> Vec<f32> {
    image.pixels().map(|p| f32::from(p[3]) / 255.0).collect()
}

/// Composite `src` over `dst` with its top-left corner at `(x, y)`.
///
/// Parts of `src` outside `dst` are clipped. `alpha` is the coverage
/// plane of `src` (see [`alpha_plane`]); pass `None` to read it from the
/// alpha channel.
pub fn blend_onto(dst: &mut RgbaImage, src: &RgbaImage, alpha: Option<&[f32]>, x: i64, y: i64) {
    let Some(region) = clip(dst.dimensions(), src.dimensions(), x, y) else {
        return;
    };
    let src_w = src.width() as usize;

    for sy in region.src_y0..region.src_y1 {
        let dy = (i64::from(sy) + y) as u32;
        for sx in region.src_x0..region.src_x1 {
            let s = src.get_pixel(sx, sy);
            let a_s = match alpha {
                Some(plane) => plane[sy as usize * src_w + sx as usize],
                None => f32::from(s[3]) / 255.0,
            };
            let dx = (i64::from(sx) + x) as u32;
            over(dst.get_pixel_mut(dx, dy), [s[0], s[1], s[2]], a_s);
        }
    }
}

/// Visible part of a placed source image, in source coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Clip {
    src_x0: u32,
    src_y0: u32,
    src_x1: u32,
    src_y1: u32,
}

fn clip(dst: (u32, u32), src: (u32, u32), x: i64, y: i64) -> Option<Clip> {
    let (dw, dh) = (i64::from(dst.0), i64::from(dst.1));
    let (sw, sh) = (i64::from(src.0), i64::from(src.1));

    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + sw).min(dw);
    let y1 = (y + sh).min(dh);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    Some(Clip {
        src_x0: (x0 - x) as u32,
        src_y0: (y0 - y) as u32,
        src_x1: (x1 - x) as u32,
        src_y1: (y1 - y) as u32,
    })
}

#[inline]
fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transparent_source_preserves_destination() {
        let mut px = Rgba([10, 20, 30, 40]);
        over(&mut px, [255, 255, 255], 0.0);
        assert_eq!(px, Rgba([10, 20, 30, 40]));
    }

    #[test]
    fn test_opaque_source_replaces_destination() {
        let mut px = Rgba([10, 20, 30, 40]);
        over_pixel(&mut px, Rgba([200, 100, 50, 255]));
        assert_eq!(px, Rgba([200, 100, 50, 255]));
    }

    #[test]
    fn test_half_alpha_over_transparent_keeps_colour() {
        let mut px = Rgba([0, 0, 0, 0]);
        over(&mut px, [200, 100, 50], 0.5);
        assert_eq!(px, Rgba([200, 100, 50, 128]));
    }

    #[test]
    fn test_half_alpha_over_opaque_mixes() {
        let mut px = Rgba([0, 0, 0, 255]);
        over(&mut px, [255, 255, 255], 0.5);
        assert_eq!(px, Rgba([128, 128, 128, 255]));
    }

    #[test]
    fn test_blend_clips_negative_and_overhanging_placements() {
        let mut dst = RgbaImage::new(4, 4);
        let src = RgbaImage::from_pixel(3, 3, Rgba([255, 0, 0, 255]));

        blend_onto(&mut dst, &src, None, -2, 3);
        let painted: Vec<_> = dst
            .enumerate_pixels()
            .filter(|(_, _, p)| p[3] > 0)
            .map(|(x, y, _)| (x, y))
            .collect();
        assert_eq!(painted, vec![(0, 3)]);

        // Entirely off-canvas.
        let before = dst.clone();
        blend_onto(&mut dst, &src, None, 4, 0);
        blend_onto(&mut dst, &src, None, -3, -3);
        assert_eq!(dst, before);
    }

    #[test]
    fn test_explicit_alpha_plane_is_used() {
        let mut dst = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 0, 255]));
        let src = RgbaImage::from_pixel(2, 1, Rgba([255, 255, 255, 255]));
        blend_onto(&mut dst, &src, Some(&[0.0, 1.0]), 0, 0);
        assert_eq!(*dst.get_pixel(0, 0), Rgba([0, 0, 0, 255]));
        assert_eq!(*dst.get_pixel(1, 0), Rgba([255, 255, 255, 255]));
    }
}
