//! CPU pixel buffers: borrowed views, owned buffers and pixel-typed images.

use std::{fmt, marker::PhantomData};

use super::{
    color::ColorFormat,
    desc::{DEFAULT_ALIGNMENT, ImageDesc},
};

/// Largest alignment an owned buffer can honour.
pub const MAX_ALIGNMENT: u32 = 16;

#[derive(Clone, Copy, Default)]
#[repr(C, align(16))]
struct Block([u8; 16]);

/// Heap byte buffer whose start is aligned to [`MAX_ALIGNMENT`].
#[derive(Clone, Default)]
pub struct AlignedBytes {
    blocks: Vec<Block>,
    len: usize,
}

impl AlignedBytes {
    pub fn zeroed(len: usize) -> Self {
        Self {
            blocks: vec![Block::default(); len.div_ceil(16)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // Block is plain bytes, so the backing storage is a valid u8 slice of blocks.len() * 16 bytes
        unsafe { std::slice::from_raw_parts(self.blocks.as_ptr() as *const u8, self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.blocks.as_mut_ptr() as *mut u8, self.len) }
    }
}

/// A pixel type with a fixed in-memory encoding.
pub trait Pixel: Copy + Default + fmt::Debug + PartialEq {
    const FORMAT: ColorFormat;

    fn read(bytes: &[u8]) -> Self;

    fn write(&self, bytes: &mut [u8]);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rgb8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct R8(pub u8);

/// Four half floats, stored as raw binary16 bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rgba16f {
    pub r: u16,
    pub g: u16,
    pub b: u16,
    pub a: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rgba32f {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct R32f(pub f32);

fn read_f32(bytes: &[u8], i: usize) -> f32 {
    f32::from_le_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
}

fn read_u16(bytes: &[u8], i: usize) -> u16 {
    u16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]])
}

impl Pixel for Rgba8 {
    const FORMAT: ColorFormat = ColorFormat::Rgba8;

    fn read(bytes: &[u8]) -> Self {
        Self { r: bytes[0], g: bytes[1], b: bytes[2], a: bytes[3] }
    }

    fn write(&self, bytes: &mut [u8]) {
        bytes[..4].copy_from_slice(&[self.r, self.g, self.b, self.a]);
    }
}

impl Pixel for Rgb8 {
    const FORMAT: ColorFormat = ColorFormat::Rgb8;

    fn read(bytes: &[u8]) -> Self {
        Self { r: bytes[0], g: bytes[1], b: bytes[2] }
    }

    fn write(&self, bytes: &mut [u8]) {
        bytes[..3].copy_from_slice(&[self.r, self.g, self.b]);
    }
}

impl Pixel for R8 {
    const FORMAT: ColorFormat = ColorFormat::R8;

    fn read(bytes: &[u8]) -> Self {
        Self(bytes[0])
    }

    fn write(&self, bytes: &mut [u8]) {
        bytes[0] = self.0;
    }
}

impl Pixel for Rgba16f {
    const FORMAT: ColorFormat = ColorFormat::Rgba16f;

    fn read(bytes: &[u8]) -> Self {
        Self {
            r: read_u16(bytes, 0),
            g: read_u16(bytes, 1),
            b: read_u16(bytes, 2),
            a: read_u16(bytes, 3),
        }
    }

    fn write(&self, bytes: &mut [u8]) {
        for (i, v) in [self.r, self.g, self.b, self.a].iter().enumerate() {
            bytes[i * 2..i * 2 + 2].copy_from_slice(&v.to_le_bytes());
        }
    }
}

impl Pixel for Rgba32f {
    const FORMAT: ColorFormat = ColorFormat::Rgba32f;

    fn read(bytes: &[u8]) -> Self {
        Self {
            r: read_f32(bytes, 0),
            g: read_f32(bytes, 1),
            b: read_f32(bytes, 2),
            a: read_f32(bytes, 3),
        }
    }

    fn write(&self, bytes: &mut [u8]) {
        for (i, v) in [self.r, self.g, self.b, self.a].iter().enumerate() {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
    }
}

impl Pixel for R32f {
    const FORMAT: ColorFormat = ColorFormat::R32f;

    fn read(bytes: &[u8]) -> Self {
        Self(read_f32(bytes, 0))
    }

    fn write(&self, bytes: &mut [u8]) {
        bytes[..4].copy_from_slice(&self.0.to_le_bytes());
    }
}

/// Non-owning view of a pixel buffer laid out by an [`ImageDesc`].
#[derive(Clone, Copy)]
pub struct RawImage<'a> {
    desc: &'a ImageDesc,
    pixels: &'a [u8],
}

impl<'a> RawImage<'a> {
    pub fn new(desc: &'a ImageDesc, pixels: &'a [u8]) -> Self {
        assert!(
            pixels.len() >= desc.size as usize,
            "pixel buffer holds {} bytes, descriptor needs {}",
            pixels.len(),
            desc.size
        );
        if !desc.is_empty() && desc.alignment > 0 {
            assert_eq!(
                pixels.as_ptr() as usize % desc.alignment as usize,
                0,
                "the pixel buffer pointer does not meet alignment requirement"
            );
        }
        Self { desc, pixels }
    }

    pub fn desc(&self) -> &'a ImageDesc {
        self.desc
    }

    pub fn pixels(&self) -> &'a [u8] {
        &self.pixels[..self.desc.size as usize]
    }

    pub fn is_empty(&self) -> bool {
        self.desc.is_empty()
    }

    pub fn planes(&self) -> usize {
        self.desc.planes.len()
    }

    pub fn format(&self) -> ColorFormat {
        self.desc.format()
    }

    pub fn width(&self) -> u32 {
        self.desc.width()
    }

    pub fn height(&self) -> u32 {
        self.desc.height()
    }

    pub fn depth(&self) -> u32 {
        self.desc.depth()
    }

    pub fn channels(&self) -> u32 {
        self.desc.channels()
    }

    /// Bytes of one pixel in plane `p`.
    pub fn at(&self, p: usize, x: u32, y: u32, z: u32) -> &'a [u8] {
        let plane = self.desc.plane(p);
        let start = plane.pixel(x, y, z);
        &self.pixels[start..start + plane.bytes_per_pixel()]
    }

    /// Row `y` of slice `z` in plane `p`, without pitch padding.
    pub fn row(&self, p: usize, y: u32, z: u32) -> &'a [u8] {
        let plane = self.desc.plane(p);
        let start = plane.pixel(0, y, z);
        &self.pixels[start..start + (plane.width * plane.step / 8) as usize]
    }

    /// One depth slice of plane `p` packed without row padding.
    pub fn packed_slice(&self, p: usize, z: u32) -> Vec<u8> {
        let plane = self.desc.plane(p);
        let mut out = Vec::with_capacity((plane.width * plane.height * plane.step / 8) as usize);
        for y in 0..plane.height {
            out.extend_from_slice(self.row(p, y, z));
        }
        out
    }

    pub fn to_managed(&self) -> ManagedRawImage {
        ManagedRawImage::from_bytes(self.desc.clone(), self.pixels())
    }
}

/// Owned pixel buffer allocated with the descriptor's alignment.
#[derive(Clone, Default)]
pub struct ManagedRawImage {
    desc: ImageDesc,
    pixels: AlignedBytes,
}

impl ManagedRawImage {
    /// Zero-filled image.
    pub fn new(desc: ImageDesc) -> Self {
        assert!(
            desc.alignment <= MAX_ALIGNMENT,
            "alignment {} exceeds the supported maximum of {}",
            desc.alignment,
            MAX_ALIGNMENT
        );
        let pixels = AlignedBytes::zeroed(desc.size as usize);
        Self { desc, pixels }
    }

    pub fn from_bytes(desc: ImageDesc, bytes: &[u8]) -> Self {
        let mut image = Self::new(desc);
        let len = image.pixels.len();
        assert!(
            bytes.len() >= len,
            "source holds {} bytes, image needs {}",
            bytes.len(),
            len
        );
        image.pixels.as_mut_slice().copy_from_slice(&bytes[..len]);
        image
    }

    pub fn as_raw(&self) -> RawImage<'_> {
        RawImage::new(&self.desc, self.pixels.as_slice())
    }

    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    pub fn is_empty(&self) -> bool {
        self.desc.is_empty()
    }

    pub fn pixels(&self) -> &[u8] {
        self.pixels.as_slice()
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        self.pixels.as_mut_slice()
    }

    pub fn at_mut(&mut self, p: usize, x: u32, y: u32, z: u32) -> &mut [u8] {
        let plane = self.desc.plane(p);
        let start = plane.pixel(x, y, z);
        let len = plane.bytes_per_pixel();
        &mut self.pixels.as_mut_slice()[start..start + len]
    }

    /// Mirror every plane vertically.
    pub fn flip_vertical(&mut self) {
        let planes = self.desc.planes.clone();
        let pixels = self.pixels.as_mut_slice();
        for plane in planes {
            let row_len = (plane.width * plane.step / 8) as usize;
            for z in 0..plane.depth {
                for y in 0..plane.height / 2 {
                    let top = plane.pixel(0, y, z);
                    let bottom = plane.pixel(0, plane.height - 1 - y, z);
                    let (head, tail) = pixels.split_at_mut(bottom);
                    head[top..top + row_len].swap_with_slice(&mut tail[..row_len]);
                }
            }
        }
    }
}

impl fmt::Debug for ManagedRawImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedRawImage")
            .field("desc", &self.desc)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// An owned image whose planes all store pixel type `P`.
#[derive(Clone, Debug)]
pub struct TypedImage<P: Pixel> {
    image: ManagedRawImage,
    _pixel: PhantomData<P>,
}

impl<P: Pixel> TypedImage<P> {
    pub fn new(desc: ImageDesc) -> Self {
        Self::from_managed(ManagedRawImage::new(desc))
    }

    pub fn with_size(width: u32, height: u32, depth: u32) -> Self {
        Self::new(ImageDesc::single(P::FORMAT, width, height, depth, DEFAULT_ALIGNMENT))
    }

    pub fn from_managed(image: ManagedRawImage) -> Self {
        for plane in &image.desc().planes {
            assert_eq!(
                plane.format.bits(),
                P::FORMAT.bits(),
                "plane format {} does not match pixel type {}",
                plane.format,
                P::FORMAT
            );
        }
        Self {
            image,
            _pixel: PhantomData,
        }
    }

    pub fn get(&self, p: usize, x: u32, y: u32, z: u32) -> P {
        P::read(self.image.as_raw().at(p, x, y, z))
    }

    pub fn set(&mut self, p: usize, x: u32, y: u32, z: u32, value: P) {
        value.write(self.image.at_mut(p, x, y, z));
    }

    pub fn as_raw(&self) -> RawImage<'_> {
        self.image.as_raw()
    }

    pub fn desc(&self) -> &ImageDesc {
        self.image.desc()
    }

    pub fn into_managed(self) -> ManagedRawImage {
        self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_bytes_start_on_sixteen() {
        for len in [1usize, 3, 17, 64] {
            let bytes = AlignedBytes::zeroed(len);
            assert_eq!(bytes.as_slice().as_ptr() as usize % 16, 0);
            assert_eq!(bytes.len(), len);
        }
    }

    #[test]
    fn typed_pixels_round_trip() {
        let mut image = TypedImage::<Rgba32f>::with_size(2, 2, 1);
        let px = Rgba32f { r: 0.5, g: -1.0, b: 2.0, a: 1.0 };
        image.set(0, 1, 1, 0, px);
        assert_eq!(image.get(0, 1, 1, 0), px);
        assert_eq!(image.get(0, 0, 0, 0), Rgba32f::default());
    }

    #[test]
    #[should_panic(expected = "does not match pixel type")]
    fn typed_image_rejects_other_widths() {
        let desc = ImageDesc::single(ColorFormat::Rgb8, 2, 2, 1, 4);
        let _ = TypedImage::<Rgba8>::new(desc);
    }

    #[test]
    fn srgb_shares_rgba8_width() {
        let desc = ImageDesc::single(ColorFormat::Srgb8A8, 2, 2, 1, 4);
        let _ = TypedImage::<Rgba8>::new(desc);
    }

    #[test]
    fn rows_skip_pitch_padding() {
        let desc = ImageDesc::single(ColorFormat::R8, 3, 2, 1, 4);
        let bytes: Vec<u8> = (0..8).collect();
        let image = ManagedRawImage::from_bytes(desc, &bytes);
        assert_eq!(image.as_raw().packed_slice(0, 0), vec![0, 1, 2, 4, 5, 6]);
    }

    #[test]
    fn flip_swaps_rows() {
        let desc = ImageDesc::single(ColorFormat::R8, 4, 3, 1, 4);
        let bytes: Vec<u8> = (0..12).collect();
        let mut image = ManagedRawImage::from_bytes(desc, &bytes);
        image.flip_vertical();
        assert_eq!(&image.pixels()[..4], &[8, 9, 10, 11]);
        assert_eq!(&image.pixels()[4..8], &[4, 5, 6, 7]);
        assert_eq!(&image.pixels()[8..], &[0, 1, 2, 3]);
    }
}
