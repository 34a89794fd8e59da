//! Reference image scaling on the CPU.
//!
//! Mirrors the compute resize pass: texel centres are sampled in normalized coordinates
//! with clamp-to-edge addressing, then `(value - mean) * norm` is applied per channel.

use super::{
    color::ColorFormat,
    convert::{pixel_from_rgba32f, pixel_to_rgba32f},
    desc::{ImageDesc, ImagePlaneDesc},
    raw::{ManagedRawImage, RawImage, Rgba32f},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeFilter {
    #[default]
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeParams {
    pub scale_w: f32,
    pub scale_h: f32,
    pub means: [f32; 4],
    pub norms: [f32; 4],
    pub filter: ResizeFilter,
    /// Output format, `ColorFormat::None` keeps the source format
    pub format: ColorFormat,
}

impl Default for ResizeParams {
    fn default() -> Self {
        Self {
            scale_w: 1.0,
            scale_h: 1.0,
            means: [0.0; 4],
            norms: [1.0; 4],
            filter: ResizeFilter::Nearest,
            format: ColorFormat::None,
        }
    }
}

/// Output size for a scale factor: `round(dim * scale)`, never below one pixel.
pub fn scaled_extent(width: u32, height: u32, scale_w: f32, scale_h: f32) -> (u32, u32) {
    let w = (width as f32 * scale_w).round().max(1.0) as u32;
    let h = (height as f32 * scale_h).round().max(1.0) as u32;
    (w, h)
}

fn texel(src: &RawImage<'_>, p: usize, x: i64, y: i64, z: u32) -> Rgba32f {
    let plane = src.desc().plane(p);
    let x = x.clamp(0, plane.width as i64 - 1) as u32;
    let y = y.clamp(0, plane.height as i64 - 1) as u32;
    pixel_to_rgba32f(src.at(p, x, y, z), plane.format)
}

fn lerp(a: Rgba32f, b: Rgba32f, t: f32) -> Rgba32f {
    Rgba32f {
        r: a.r + (b.r - a.r) * t,
        g: a.g + (b.g - a.g) * t,
        b: a.b + (b.b - a.b) * t,
        a: a.a + (b.a - a.a) * t,
    }
}

fn sample(src: &RawImage<'_>, p: usize, u: f32, v: f32, z: u32, filter: ResizeFilter) -> Rgba32f {
    let plane = src.desc().plane(p);
    let (sx, sy) = (u * plane.width as f32, v * plane.height as f32);
    match filter {
        ResizeFilter::Nearest => texel(src, p, sx.floor() as i64, sy.floor() as i64, z),
        ResizeFilter::Linear => {
            let (fx, fy) = (sx - 0.5, sy - 0.5);
            let (x0, y0) = (fx.floor(), fy.floor());
            let (tx, ty) = (fx - x0, fy - y0);
            let (x0, y0) = (x0 as i64, y0 as i64);
            let top = lerp(texel(src, p, x0, y0, z), texel(src, p, x0 + 1, y0, z), tx);
            let bottom = lerp(texel(src, p, x0, y0 + 1, z), texel(src, p, x0 + 1, y0 + 1, z), tx);
            lerp(top, bottom, ty)
        }
    }
}

/// Resize every plane of `src`.
pub fn resize(src: RawImage<'_>, params: &ResizeParams) -> ManagedRawImage {
    let format = if params.format == ColorFormat::None { src.format() } else { params.format };
    let (dst_w, dst_h) = scaled_extent(src.width(), src.height(), params.scale_w, params.scale_h);

    let planes = src
        .desc()
        .planes
        .iter()
        .map(|p| ImagePlaneDesc::new(format, dst_w, dst_h, p.depth))
        .collect();
    let mut dst = ManagedRawImage::new(ImageDesc::new(planes, src.desc().alignment));

    for p in 0..src.planes() {
        let depth = src.desc().plane(p).depth;
        for z in 0..depth {
            for y in 0..dst_h {
                for x in 0..dst_w {
                    let u = (x as f32 + 0.5) / dst_w as f32;
                    let v = (y as f32 + 0.5) / dst_h as f32;
                    let px = sample(&src, p, u, v, z, params.filter);
                    let n = |c: f32, i: usize| (c - params.means[i]) * params.norms[i];
                    let px = Rgba32f {
                        r: n(px.r, 0),
                        g: n(px.g, 1),
                        b: n(px.b, 2),
                        a: n(px.a, 3),
                    };
                    pixel_from_rgba32f(px, format, dst.at_mut(p, x, y, z));
                }
            }
        }
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::raw::{Pixel, Rgba8};

    fn gradient(width: u32, height: u32) -> ManagedRawImage {
        let desc = ImageDesc::single(ColorFormat::Rgba8, width, height, 1, 4);
        let mut image = ManagedRawImage::new(desc);
        for y in 0..height {
            for x in 0..width {
                Rgba8 { r: (x * 20) as u8, g: (y * 20) as u8, b: 0, a: 255 }.write(image.at_mut(0, x, y, 0));
            }
        }
        image
    }

    #[test]
    fn extent_rounds_scaled_size() {
        assert_eq!(scaled_extent(4, 4, 0.5, 0.5), (2, 2));
        assert_eq!(scaled_extent(5, 3, 0.5, 0.5), (3, 2));
        assert_eq!(scaled_extent(2, 2, 2.0, 2.0), (4, 4));
        assert_eq!(scaled_extent(1, 1, 0.1, 0.1), (1, 1));
    }

    #[test]
    fn nearest_downscale_picks_stride_two_texels() {
        let src = gradient(4, 4);
        let params = ResizeParams { scale_w: 0.5, scale_h: 0.5, ..Default::default() };
        let dst = resize(src.as_raw(), &params);
        assert_eq!(dst.desc().width(), 2);
        let px = Rgba8::read(dst.as_raw().at(0, 1, 0, 0));
        assert_eq!(px.r, 60);
        let px = Rgba8::read(dst.as_raw().at(0, 0, 1, 0));
        assert_eq!(px.g, 60);
    }

    #[test]
    fn linear_upscale_interpolates() {
        let src = gradient(2, 1);
        let params = ResizeParams {
            scale_w: 2.0,
            filter: ResizeFilter::Linear,
            ..Default::default()
        };
        let dst = resize(src.as_raw(), &params);
        let reds: Vec<u8> = (0..4).map(|x| Rgba8::read(dst.as_raw().at(0, x, 0, 0)).r).collect();
        assert_eq!(reds, vec![0, 5, 15, 20]);
    }

    #[test]
    fn normalization_and_format_change() {
        let src = gradient(2, 2);
        let params = ResizeParams {
            means: [0.5, 0.0, 0.0, 0.0],
            norms: [2.0, 1.0, 1.0, 1.0],
            format: ColorFormat::Rgba32f,
            ..Default::default()
        };
        let dst = resize(src.as_raw(), &params);
        assert_eq!(dst.desc().format(), ColorFormat::Rgba32f);
        let px = Rgba32f::read(dst.as_raw().at(0, 0, 0, 0));
        assert_eq!(px.r, -1.0);
        assert_eq!(px.a, 1.0);
    }
}
