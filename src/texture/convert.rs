//! Per-format pixel converters.
//!
//! Every converter takes a [`RawImage`] and produces a new owned image of the target
//! pixel type with the same geometry. Source formats without a defined conversion panic.

use super::{
    color::{ColorFormat, ColorFormatType},
    raw::{ManagedRawImage, Pixel, R8, R32f, RawImage, Rgb8, Rgba8, Rgba16f, Rgba32f, TypedImage},
};
use crate::utils::fp16::{f16_to_f32, f32_to_f16};

fn f32_at(src: &[u8], i: usize) -> f32 {
    f32::from_le_bytes([src[i * 4], src[i * 4 + 1], src[i * 4 + 2], src[i * 4 + 3]])
}

fn f16_at(src: &[u8], i: usize) -> f32 {
    f16_to_f32(u16::from_le_bytes([src[i * 2], src[i * 2 + 1]]))
}

fn unorm(v: u8) -> f32 {
    v as f32 / 255.0
}

// negative values roll over instead of saturating
fn to_unorm8(v: f32) -> u8 {
    (v * 255.0).round() as i32 as u8
}

fn unsupported(format: ColorFormat) -> ! {
    panic!("unsupported color format: {}", format)
}

pub fn pixel_to_rgba32f(src: &[u8], format: ColorFormat) -> Rgba32f {
    match format {
        ColorFormat::Rgba32f => Rgba32f::read(src),
        ColorFormat::Rgb32f => Rgba32f {
            r: f32_at(src, 0),
            g: f32_at(src, 1),
            b: f32_at(src, 2),
            a: 1.0,
        },
        ColorFormat::Rgba16f => Rgba32f {
            r: f16_at(src, 0),
            g: f16_at(src, 1),
            b: f16_at(src, 2),
            a: f16_at(src, 3),
        },
        ColorFormat::Rgba8 => Rgba32f {
            r: unorm(src[0]),
            g: unorm(src[1]),
            b: unorm(src[2]),
            a: unorm(src[3]),
        },
        ColorFormat::Rgb8 => Rgba32f {
            r: unorm(src[0]),
            g: unorm(src[1]),
            b: unorm(src[2]),
            a: 1.0,
        },
        ColorFormat::R8 => Rgba32f {
            r: unorm(src[0]),
            ..Default::default()
        },
        other => unsupported(other),
    }
}

pub fn pixel_to_rgba16f(src: &[u8], format: ColorFormat) -> Rgba16f {
    let px = match format {
        ColorFormat::Rgba16f => return Rgba16f::read(src),
        ColorFormat::Rgba32f | ColorFormat::Rgb32f | ColorFormat::Rgba8 | ColorFormat::Rgb8 => {
            pixel_to_rgba32f(src, format)
        }
        other => unsupported(other),
    };
    Rgba16f {
        r: f32_to_f16(px.r),
        g: f32_to_f16(px.g),
        b: f32_to_f16(px.b),
        a: f32_to_f16(px.a),
    }
}

pub fn pixel_to_r32f(src: &[u8], format: ColorFormat) -> R32f {
    match format {
        ColorFormat::R32f | ColorFormat::Rgba32f => R32f(f32_at(src, 0)),
        ColorFormat::R16f | ColorFormat::Rgba16f => R32f(f16_at(src, 0)),
        ColorFormat::R8 | ColorFormat::Rgba8 => R32f(unorm(src[0])),
        other => unsupported(other),
    }
}

pub fn pixel_to_rgba8(src: &[u8], format: ColorFormat) -> Rgba8 {
    match format {
        ColorFormat::Rgba32f => Rgba8 {
            r: to_unorm8(f32_at(src, 0)),
            g: to_unorm8(f32_at(src, 1)),
            b: to_unorm8(f32_at(src, 2)),
            a: to_unorm8(f32_at(src, 3)),
        },
        ColorFormat::Rgb32f => Rgba8 {
            r: to_unorm8(f32_at(src, 0)),
            g: to_unorm8(f32_at(src, 1)),
            b: to_unorm8(f32_at(src, 2)),
            a: 255,
        },
        ColorFormat::Rgba16f => Rgba8 {
            r: to_unorm8(f16_at(src, 0)),
            g: to_unorm8(f16_at(src, 1)),
            b: to_unorm8(f16_at(src, 2)),
            a: to_unorm8(f16_at(src, 3)),
        },
        ColorFormat::Rgb16f => Rgba8 {
            r: to_unorm8(f16_at(src, 0)),
            g: to_unorm8(f16_at(src, 1)),
            b: to_unorm8(f16_at(src, 2)),
            a: 255,
        },
        ColorFormat::Rgba8 => Rgba8::read(src),
        ColorFormat::Rgb8 => Rgba8 {
            r: src[0],
            g: src[1],
            b: src[2],
            a: 255,
        },
        other => unsupported(other),
    }
}

pub fn pixel_to_r8(src: &[u8], format: ColorFormat) -> R8 {
    match format {
        ColorFormat::R32f | ColorFormat::Rgba32f => R8(to_unorm8(f32_at(src, 0))),
        ColorFormat::R16f | ColorFormat::Rgba16f => R8(to_unorm8(f16_at(src, 0))),
        ColorFormat::R8 | ColorFormat::Rgba8 => R8(src[0]),
        other => unsupported(other),
    }
}

/// Raw channel values, without unorm scaling, as `(x - mean) * norm`.
pub fn pixel_normalize(src: &[u8], format: ColorFormat, means: &[f32; 4], norms: &[f32; 4]) -> Rgba32f {
    let raw: [f32; 4] = match format {
        ColorFormat::Rgba32f => [f32_at(src, 0), f32_at(src, 1), f32_at(src, 2), f32_at(src, 3)],
        ColorFormat::Rgb32f => [f32_at(src, 0), f32_at(src, 1), f32_at(src, 2), f32::NAN],
        ColorFormat::Rgba16f => [f16_at(src, 0), f16_at(src, 1), f16_at(src, 2), f16_at(src, 3)],
        ColorFormat::Rgba8 => [src[0] as f32, src[1] as f32, src[2] as f32, src[3] as f32],
        ColorFormat::Rgb8 => [src[0] as f32, src[1] as f32, src[2] as f32, f32::NAN],
        ColorFormat::R8 => {
            // the empty channels are normalized with the red parameters
            let empty = (0.0 - means[0]) * norms[0];
            return Rgba32f {
                r: (src[0] as f32 - means[0]) * norms[0],
                g: empty,
                b: empty,
                a: empty,
            };
        }
        other => unsupported(other),
    };
    let n = |i: usize| (raw[i] - means[i]) * norms[i];
    Rgba32f {
        r: n(0),
        g: n(1),
        b: n(2),
        a: if raw[3].is_nan() { 1.0 } else { n(3) },
    }
}

/// Store a float pixel into `dst` using the encoding of `format`, the way a storage image
/// write would. Unsigned normalized formats are clamped to `[0, 1]` first.
pub fn pixel_from_rgba32f(px: Rgba32f, format: ColorFormat, dst: &mut [u8]) {
    let u8n = |v: f32| to_unorm8(v.clamp(0.0, 1.0));
    match format {
        ColorFormat::Rgba32f => px.write(dst),
        ColorFormat::R32f => R32f(px.r).write(dst),
        ColorFormat::Rgba16f => Rgba16f {
            r: f32_to_f16(px.r),
            g: f32_to_f16(px.g),
            b: f32_to_f16(px.b),
            a: f32_to_f16(px.a),
        }
        .write(dst),
        ColorFormat::R16f => dst[..2].copy_from_slice(&f32_to_f16(px.r).to_le_bytes()),
        ColorFormat::Rgba8 => Rgba8 {
            r: u8n(px.r),
            g: u8n(px.g),
            b: u8n(px.b),
            a: u8n(px.a),
        }
        .write(dst),
        ColorFormat::R8 => R8(u8n(px.r)).write(dst),
        other => unsupported(other),
    }
}

fn map_pixels<P: Pixel>(src: RawImage<'_>, mut f: impl FnMut(&[u8], ColorFormat) -> P) -> TypedImage<P> {
    let mut dst = TypedImage::<P>::new(src.desc().convert_format(P::FORMAT));
    for (p, plane) in src.desc().planes.iter().enumerate() {
        for z in 0..plane.depth {
            for y in 0..plane.height {
                for x in 0..plane.width {
                    let px = f(src.at(p, x, y, z), plane.format);
                    dst.set(p, x, y, z, px);
                }
            }
        }
    }
    dst
}

pub fn to_rgba32f(src: RawImage<'_>) -> TypedImage<Rgba32f> {
    map_pixels(src, pixel_to_rgba32f)
}

/// Like [`to_rgba32f`], remapping each channel from `[0, 1]` to `[min, max]`.
pub fn to_rgba32f_range(src: RawImage<'_>, min: f32, max: f32) -> TypedImage<Rgba32f> {
    let scale = max - min;
    map_pixels(src, |bytes, format| {
        let px = pixel_to_rgba32f(bytes, format);
        Rgba32f {
            r: px.r * scale + min,
            g: px.g * scale + min,
            b: px.b * scale + min,
            a: px.a * scale + min,
        }
    })
}

pub fn to_rgba16f(src: RawImage<'_>) -> TypedImage<Rgba16f> {
    map_pixels(src, pixel_to_rgba16f)
}

pub fn to_r32f(src: RawImage<'_>) -> TypedImage<R32f> {
    map_pixels(src, pixel_to_r32f)
}

pub fn to_rgba8(src: RawImage<'_>, make_opaque: bool) -> TypedImage<Rgba8> {
    map_pixels(src, |bytes, format| {
        let mut px = pixel_to_rgba8(bytes, format);
        if make_opaque {
            px.a = 255;
        }
        px
    })
}

pub fn to_rgb8(src: RawImage<'_>) -> TypedImage<Rgb8> {
    map_pixels(src, |bytes, format| {
        let px = pixel_to_rgba8(bytes, format);
        Rgb8 { r: px.r, g: px.g, b: px.b }
    })
}

pub fn to_r8(src: RawImage<'_>) -> TypedImage<R8> {
    map_pixels(src, pixel_to_r8)
}

pub fn normalize(src: RawImage<'_>, means: &[f32; 4], norms: &[f32; 4]) -> TypedImage<Rgba32f> {
    map_pixels(src, |bytes, format| pixel_normalize(bytes, format, means, norms))
}

/// Clamp float formats to `[0, 1]`. Integer formats are copied unchanged.
pub fn clamp(src: RawImage<'_>) -> ManagedRawImage {
    let mut dst = src.to_managed();
    for (p, plane) in src.desc().planes.iter().enumerate() {
        let kind = plane.format.format_type();
        let components = match kind {
            ColorFormatType::Float32 => plane.bytes_per_pixel() / 4,
            ColorFormatType::Float16 => plane.bytes_per_pixel() / 2,
            ColorFormatType::Uint8 | ColorFormatType::Uint16 => continue,
            ColorFormatType::None => unsupported(plane.format),
        };
        for z in 0..plane.depth {
            for y in 0..plane.height {
                for x in 0..plane.width {
                    let px = dst.at_mut(p, x, y, z);
                    for i in 0..components {
                        if kind == ColorFormatType::Float32 {
                            let v = f32_at(px, i).clamp(0.0, 1.0);
                            px[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
                        } else {
                            let v = f16_at(px, i).clamp(0.0, 1.0);
                            px[i * 2..i * 2 + 2].copy_from_slice(&f32_to_f16(v).to_le_bytes());
                        }
                    }
                }
            }
        }
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::texture::desc::ImageDesc;
    use rand::Rng;

    fn random_rgba8(width: u32, height: u32) -> ManagedRawImage {
        let desc = ImageDesc::single(ColorFormat::Rgba8, width, height, 1, 4);
        let mut rng = rand::rng();
        let bytes: Vec<u8> = (0..desc.size).map(|_| rng.random()).collect();
        ManagedRawImage::from_bytes(desc, &bytes)
    }

    #[test]
    fn rgba8_survives_float_round_trip() {
        let src = random_rgba8(7, 5);
        let float = to_rgba32f(src.as_raw());
        let back = to_rgba8(float.as_raw(), false);
        for y in 0..5 {
            for x in 0..7 {
                let a = Rgba8::read(src.as_raw().at(0, x, y, 0));
                let b = back.get(0, x, y, 0);
                for (u, v) in [(a.r, b.r), (a.g, b.g), (a.b, b.b), (a.a, b.a)] {
                    assert!((u as i32 - v as i32).abs() <= 1, "{:?} vs {:?}", a, b);
                }
            }
        }
    }

    #[test]
    fn rgba8_survives_half_round_trip() {
        let src = random_rgba8(4, 4);
        let half = to_rgba16f(src.as_raw());
        let back = to_rgba8(half.as_raw(), false);
        for y in 0..4 {
            for x in 0..4 {
                let a = Rgba8::read(src.as_raw().at(0, x, y, 0));
                let b = back.get(0, x, y, 0);
                assert!((a.g as i32 - b.g as i32).abs() <= 1);
            }
        }
    }

    #[test]
    fn make_opaque_forces_alpha() {
        let src = random_rgba8(2, 2);
        let out = to_rgba8(src.as_raw(), true);
        assert!((0..2).all(|x| out.get(0, x, 1, 0).a == 255));
    }

    #[test]
    fn rgb8_gets_unit_alpha() {
        let desc = ImageDesc::single(ColorFormat::Rgb8, 1, 1, 1, 4);
        let src = ManagedRawImage::from_bytes(desc, &[255, 0, 51, 0]);
        let px = to_rgba32f(src.as_raw()).get(0, 0, 0, 0);
        assert_eq!(px, Rgba32f { r: 1.0, g: 0.0, b: 0.2, a: 1.0 });
    }

    #[test]
    fn range_remaps_unit_interval() {
        let desc = ImageDesc::single(ColorFormat::R8, 1, 1, 1, 4);
        let src = ManagedRawImage::from_bytes(desc, &[255, 0, 0, 0]);
        let px = to_rgba32f_range(src.as_raw(), -1.0, 1.0).get(0, 0, 0, 0);
        assert_eq!(px.r, 1.0);
        assert_eq!(px.g, -1.0);
    }

    #[test]
    fn normalize_uses_raw_values() {
        let desc = ImageDesc::single(ColorFormat::Rgba8, 1, 1, 1, 4);
        let src = ManagedRawImage::from_bytes(desc, &[128, 0, 255, 255]);
        let px = normalize(src.as_raw(), &[128.0, 0.0, 127.5, 0.0], &[1.0, 1.0, 2.0, 0.5]).get(0, 0, 0, 0);
        assert_eq!(px, Rgba32f { r: 0.0, g: 0.0, b: 255.0, a: 127.5 });
    }

    #[test]
    fn clamp_limits_float_channels() {
        let desc = ImageDesc::single(ColorFormat::Rgba32f, 1, 1, 1, 4);
        let mut src = TypedImage::<Rgba32f>::new(desc);
        src.set(0, 0, 0, 0, Rgba32f { r: -0.5, g: 0.25, b: 3.0, a: 1.0 });
        let clamped = TypedImage::<Rgba32f>::from_managed(clamp(src.as_raw()));
        assert_eq!(clamped.get(0, 0, 0, 0), Rgba32f { r: 0.0, g: 0.25, b: 1.0, a: 1.0 });
    }

    #[test]
    fn r32f_reads_red_channel() {
        let src = random_rgba8(1, 1);
        let red = src.pixels()[0];
        assert_eq!(to_r32f(src.as_raw()).get(0, 0, 0, 0).0, red as f32 / 255.0);
        assert_eq!(to_r8(src.as_raw()).get(0, 0, 0, 0).0, red);
    }

    #[test]
    #[should_panic(expected = "unsupported color format: RG8")]
    fn unsupported_source_panics() {
        let desc = ImageDesc::single(ColorFormat::Rg8, 2, 2, 1, 4);
        let _ = to_rgba32f(ManagedRawImage::new(desc).as_raw());
    }
}
