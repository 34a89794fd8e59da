use rand::Rng;
use snn::{
    ColorFormat, GpuContext, ImageTexture,
    texture::{
        convert::{to_rgba8, to_rgba32f},
        desc::ImageDesc,
        raw::ManagedRawImage,
    },
};

fn uniform_rgba8(width: u32, height: u32, pixel: [f32; 4]) -> ImageTexture {
    let mut texture = ImageTexture::with_dims_on_cpu(&GpuContext::Cpu, [width, height, 1, 1], ColorFormat::Rgba8);
    let values: Vec<f32> = pixel.iter().copied().cycle().take((width * height * 4) as usize).collect();
    texture.write_channels(&values);
    texture
}

/// Every pixel of the gradient is distinct, see [`gradient_pixel`].
fn gradient_rgba8(width: u32, height: u32) -> ImageTexture {
    let mut texture = ImageTexture::with_dims_on_cpu(&GpuContext::Cpu, [width, height, 1, 1], ColorFormat::Rgba8);
    let values: Vec<f32> = (0..height)
        .flat_map(|y| (0..width).flat_map(move |x| gradient_pixel(x, y)))
        .collect();
    texture.write_channels(&values);
    texture
}

fn gradient_pixel(x: u32, y: u32) -> [f32; 4] {
    [(x * 10) as f32, (y * 10) as f32, (x + 4 * y) as f32, 255.0]
}

#[test]
fn half_then_double_resize_samples_odd_texels() {
    let mut src = gradient_rgba8(4, 4);

    let mut half = src.resize_scaled(0.5, 0.5, [0.0; 4], [1.0; 4], false).unwrap();
    assert_eq!(half.dims(), [2, 2, 1, 1]);
    assert_eq!(half.format(), ColorFormat::Rgba8);
    let raw = half.cpu_image();
    // texel centres of the half image land on every second source texel
    for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
        let texel = gradient_pixel(2 * x + 1, 2 * y + 1).map(|v| v as u8);
        assert_eq!(raw.at(0, x, y, 0), &texel, "half texel ({}, {})", x, y);
    }

    let back = half.resize_scaled(2.0, 2.0, [0.0; 4], [1.0; 4], false).unwrap();
    assert_eq!(back.dims(), [4, 4, 1, 1]);
    let values = back.read_channels();
    for y in 0..4 {
        for x in 0..4 {
            let i = ((y * 4 + x) * 4) as usize;
            let want = gradient_pixel((x / 2) * 2 + 1, (y / 2) * 2 + 1);
            assert_eq!(&values[i..i + 4], &want, "restored texel ({}, {})", x, y);
        }
    }
}

#[test]
fn linear_resize_of_a_flat_image_stays_flat() {
    let mut src = uniform_rgba8(4, 4, [10.0, 20.0, 30.0, 255.0]);
    let up = src.resize_scaled(1.5, 1.5, [0.0; 4], [1.0; 4], true).unwrap();
    assert_eq!(up.dims(), [6, 6, 1, 1]);
    assert!(up.read_channels().chunks(4).all(|v| v == [10.0, 20.0, 30.0, 255.0]));
}

#[test]
fn rgba8_survives_a_float_round_trip() {
    let desc = ImageDesc::single(ColorFormat::Rgba8, 13, 9, 1, 4);
    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..desc.size).map(|_| rng.random()).collect();
    let src = ManagedRawImage::from_bytes(desc, &bytes);

    let float = to_rgba32f(src.as_raw());
    let back = to_rgba8(float.as_raw(), false);
    for y in 0..9 {
        for x in 0..13 {
            let a = src.as_raw().at(0, x, y, 0);
            let b = back.as_raw().at(0, x, y, 0);
            for c in 0..4 {
                assert!(a[c].abs_diff(b[c]) <= 1, "({}, {}) channel {}: {} vs {}", x, y, c, a[c], b[c]);
            }
        }
    }
}

#[test]
fn nv12_planes_are_packed_back_to_back() {
    let desc = ImageDesc::nv12(4, 4);
    let (y, uv) = (desc.plane(0), desc.plane(1));
    assert_eq!((y.offset, y.size()), (0, 16));
    assert_eq!((uv.offset, uv.size()), (16, 8));
    assert_eq!((uv.width, uv.height), (2, 2));
    assert_eq!(uv.bytes_per_pixel(), 2);
}

#[test]
fn png_slices_reload_with_the_same_pixels() {
    let dir = std::env::temp_dir().join(format!("snn_png_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let mut rng = rand::rng();
    // slices are saved opaque
    let values: Vec<f32> = (0..3 * 2 * 4)
        .map(|i| if i % 4 == 3 { 255.0 } else { rng.random_range(0..=255u8) as f32 })
        .collect();
    let mut texture = ImageTexture::with_dims_on_cpu(&GpuContext::Cpu, [3, 2, 1, 1], ColorFormat::Rgba8);
    texture.write_channels(&values);

    let written = texture.save_png_slices(&dir, 0, "_out").unwrap();
    assert_eq!(written, 1);

    let reloaded = ImageTexture::from_png(&GpuContext::Cpu, dir.join("00_out.png")).unwrap();
    assert_eq!(reloaded.dims(), [3, 2, 1, 1]);
    assert_eq!(reloaded.read_channels(), values);
    let _ = std::fs::remove_dir_all(dir);
}
