//! Memory layout descriptors for CPU-side images.

use super::color::ColorFormat;

pub const DEFAULT_ALIGNMENT: u32 = 4;

/// Geometry of one memory plane.
///
/// `step` is in bits per pixel, everything else is in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImagePlaneDesc {
    pub format: ColorFormat,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub channels: u32,
    pub step: u32,
    pub pitch: u32,
    pub slice: u32,
    pub offset: u32,
}

impl ImagePlaneDesc {
    /// A plane hint with all layout fields left for [`ImageDesc::reset`] to compute.
    pub fn new(format: ColorFormat, width: u32, height: u32, depth: u32) -> Self {
        Self {
            format,
            width,
            height,
            depth,
            channels: format.channels() * depth,
            ..Default::default()
        }
    }

    /// Bytes covered by this plane.
    pub fn size(&self) -> u32 {
        self.slice * self.depth
    }

    /// Byte offset of pixel `(x, y, z)` from the start of the image buffer.
    pub fn pixel(&self, x: u32, y: u32, z: u32) -> usize {
        self.offset as usize
            + z as usize * self.slice as usize
            + y as usize * self.pitch as usize
            + (x as usize * self.step as usize) / 8
    }

    pub fn bytes_per_pixel(&self) -> usize {
        (self.step / 8) as usize
    }
}

/// A full image layout: one or more planes sharing one buffer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageDesc {
    pub planes: Vec<ImagePlaneDesc>,
    pub size: u32,
    pub alignment: u32,
}

fn align_up(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

impl ImageDesc {
    /// Build a descriptor from plane hints. See [`ImageDesc::reset`].
    pub fn new(planes: Vec<ImagePlaneDesc>, alignment: u32) -> Self {
        let mut desc = Self::default();
        desc.reset(planes, alignment);
        desc
    }

    /// Single plane image of `format` with `depth` slices.
    pub fn single(format: ColorFormat, width: u32, height: u32, depth: u32, alignment: u32) -> Self {
        Self::new(vec![ImagePlaneDesc::new(format, width, height, depth)], alignment)
    }

    /// Recompute step, pitch, slice, offsets and total size from the plane hints.
    ///
    /// Non-zero hints act as lower bounds. A zero `offset` places the plane right after
    /// the planes before it, a non-zero one pins it. An `alignment` of 0 means 4.
    ///
    /// Panics when a plane is empty, its channel count does not match the format and depth,
    /// or any computed quantity breaks the alignment.
    pub fn reset(&mut self, planes: Vec<ImagePlaneDesc>, alignment: u32) {
        self.planes = planes;
        self.size = 0;
        self.alignment = if alignment == 0 { DEFAULT_ALIGNMENT } else { alignment };
        assert!(
            self.alignment.is_power_of_two(),
            "image alignment must be a power of two, got {}",
            self.alignment
        );

        let alignment = self.alignment;
        for p in self.planes.iter_mut() {
            assert!(
                p.width > 0 && p.height > 0 && p.depth > 0,
                "empty image plane {}x{}x{}",
                p.width,
                p.height,
                p.depth
            );
            let fd = p.format.desc();
            assert_eq!(
                p.channels,
                fd.ch * p.depth,
                "{} plane with depth {} must have {} channels",
                fd.name,
                p.depth,
                fd.ch * p.depth
            );

            p.step = p.step.max(fd.bits);
            p.pitch = align_up((p.width * p.step / 8).max(p.pitch), alignment);
            p.slice = (p.pitch * p.height).max(p.slice);

            if p.offset == 0 {
                p.offset = self.size;
            }
            self.size = self.size.max(p.offset + p.size());

            assert_eq!(p.pitch % alignment, 0, "pitch {} breaks alignment {}", p.pitch, alignment);
            assert_eq!(p.slice % alignment, 0, "slice {} breaks alignment {}", p.slice, alignment);
            assert_eq!(p.offset % alignment, 0, "offset {} breaks alignment {}", p.offset, alignment);
            assert_eq!(p.size() % alignment, 0, "plane size {} breaks alignment {}", p.size(), alignment);
            assert_eq!(self.size % alignment, 0, "image size {} breaks alignment {}", self.size, alignment);
        }
    }

    /// NV12: a full-res R8 luma plane followed by a half-res interleaved RG8 chroma plane,
    /// tightly packed.
    pub fn nv12(width: u32, height: u32) -> Self {
        Self::semi_planar(width, height)
    }

    /// NV21 shares NV12's layout with V and U swapped inside the chroma plane.
    pub fn nv21(width: u32, height: u32) -> Self {
        Self::semi_planar(width, height)
    }

    fn semi_planar(width: u32, height: u32) -> Self {
        let y = Self::yuv_plane(ColorFormat::R8, width, height, 0);
        let uv = Self::yuv_plane(ColorFormat::Rg8, width.div_ceil(2), height.div_ceil(2), y.size());
        Self {
            size: y.size() + uv.size(),
            planes: vec![y, uv],
            alignment: 1,
        }
    }

    /// I420: full-res Y followed by half-res U and V planes, all R8.
    pub fn i420(width: u32, height: u32) -> Self {
        let (cw, ch) = (width.div_ceil(2), height.div_ceil(2));
        let y = Self::yuv_plane(ColorFormat::R8, width, height, 0);
        let u = Self::yuv_plane(ColorFormat::R8, cw, ch, y.size());
        let v = Self::yuv_plane(ColorFormat::R8, cw, ch, y.size() + u.size());
        Self {
            size: y.size() + u.size() + v.size(),
            planes: vec![y, u, v],
            alignment: 1,
        }
    }

    // YUV planes carry the channel count of the whole image, so they bypass `reset`.
    fn yuv_plane(format: ColorFormat, width: u32, height: u32, offset: u32) -> ImagePlaneDesc {
        let step = format.bits();
        let pitch = width * step / 8;
        ImagePlaneDesc {
            format,
            width,
            height,
            depth: 1,
            channels: 3,
            step,
            pitch,
            slice: pitch * height,
            offset,
        }
    }

    /// Same geometry in another format, with the layout recomputed.
    pub fn convert_format(&self, format: ColorFormat) -> ImageDesc {
        let planes = self
            .planes
            .iter()
            .map(|p| ImagePlaneDesc::new(format, p.width, p.height, p.depth))
            .collect();
        ImageDesc::new(planes, self.alignment)
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty() || self.size == 0
    }

    pub fn plane(&self, p: usize) -> &ImagePlaneDesc {
        &self.planes[p]
    }

    pub fn format(&self) -> ColorFormat {
        self.planes.first().map(|p| p.format).unwrap_or_default()
    }

    pub fn width(&self) -> u32 {
        self.planes.first().map_or(0, |p| p.width)
    }

    pub fn height(&self) -> u32 {
        self.planes.first().map_or(0, |p| p.height)
    }

    pub fn depth(&self) -> u32 {
        self.planes.first().map_or(0, |p| p.depth)
    }

    pub fn channels(&self) -> u32 {
        self.planes.first().map_or(0, |p| p.channels)
    }

    /// Byte offset of pixel `(x, y, z)` in plane `p`.
    pub fn pixel(&self, p: usize, x: u32, y: u32, z: u32) -> usize {
        self.planes[p].pixel(x, y, z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_rounds_pitch_to_alignment() {
        let desc = ImageDesc::single(ColorFormat::Rgb8, 3, 2, 1, 4);
        let p = desc.plane(0);
        assert_eq!(p.step, 24);
        assert_eq!(p.pitch, 12);
        assert_eq!(p.slice, 24);
        assert_eq!(p.offset, 0);
        assert_eq!(desc.size, 24);
    }

    #[test]
    fn zero_alignment_means_four() {
        let desc = ImageDesc::single(ColorFormat::R8, 5, 1, 1, 0);
        assert_eq!(desc.alignment, 4);
        assert_eq!(desc.plane(0).pitch, 8);
    }

    #[test]
    fn layout_invariants_hold_for_many_shapes() {
        let formats = [
            ColorFormat::Rgba8,
            ColorFormat::Rgb8,
            ColorFormat::R8,
            ColorFormat::Rg8,
            ColorFormat::Rgba16f,
            ColorFormat::R16f,
            ColorFormat::Rgba32f,
        ];
        for format in formats {
            for alignment in [1u32, 2, 4, 8, 16] {
                for width in 1..9 {
                    for height in 1..5 {
                        let desc = ImageDesc::single(format, width, height, 2, alignment);
                        let p = desc.plane(0);
                        assert!(p.pitch >= width * p.step / 8);
                        assert!(p.slice >= p.pitch * height);
                        assert_eq!(desc.size % alignment, 0);
                        assert_eq!(desc.size, p.slice * 2);
                    }
                }
            }
        }
    }

    #[test]
    fn planes_are_laid_out_in_order() {
        let desc = ImageDesc::new(
            vec![
                ImagePlaneDesc::new(ColorFormat::Rgba8, 4, 4, 1),
                ImagePlaneDesc::new(ColorFormat::R8, 4, 4, 1),
            ],
            4,
        );
        assert_eq!(desc.plane(0).offset, 0);
        assert_eq!(desc.plane(1).offset, 64);
        assert_eq!(desc.size, 80);
    }

    #[test]
    fn pinned_offset_is_kept() {
        let mut second = ImagePlaneDesc::new(ColorFormat::R8, 4, 1, 1);
        second.offset = 32;
        let desc = ImageDesc::new(vec![ImagePlaneDesc::new(ColorFormat::R8, 4, 1, 1), second], 4);
        assert_eq!(desc.plane(1).offset, 32);
        assert_eq!(desc.size, 36);
    }

    #[test]
    fn nv12_offsets() {
        let desc = ImageDesc::nv12(4, 4);
        assert_eq!(desc.planes.len(), 2);
        assert_eq!(desc.plane(0).offset, 0);
        assert_eq!(desc.plane(0).size(), 16);
        assert_eq!(desc.plane(1).offset, 16);
        assert_eq!(desc.plane(1).size(), 8);
        assert_eq!(desc.plane(1).width, 2);
        assert_eq!(desc.plane(1).step, 16);
        assert_eq!(desc.size, 24);
    }

    #[test]
    fn i420_has_three_planes() {
        let desc = ImageDesc::i420(4, 2);
        assert_eq!(desc.planes.len(), 3);
        assert_eq!(desc.plane(1).offset, 8);
        assert_eq!(desc.plane(2).offset, 10);
        assert_eq!(desc.size, 12);
    }

    #[test]
    fn pixel_offsets() {
        let desc = ImageDesc::single(ColorFormat::Rgba8, 4, 4, 2, 4);
        assert_eq!(desc.pixel(0, 1, 2, 1), 64 + 2 * 16 + 4);
    }

    #[test]
    fn convert_format_keeps_geometry() {
        let desc = ImageDesc::single(ColorFormat::Rgba8, 3, 3, 2, 4);
        let converted = desc.convert_format(ColorFormat::Rgba32f);
        assert_eq!(converted.width(), 3);
        assert_eq!(converted.depth(), 2);
        assert_eq!(converted.plane(0).pitch, 48);
        assert_eq!(converted.channels(), 8);
    }

    #[test]
    #[should_panic(expected = "channels")]
    fn wrong_channel_count_panics() {
        let mut p = ImagePlaneDesc::new(ColorFormat::Rgba8, 2, 2, 1);
        p.channels = 3;
        ImageDesc::new(vec![p], 4);
    }

    #[test]
    #[should_panic(expected = "breaks alignment")]
    fn unaligned_slice_panics() {
        let mut p = ImagePlaneDesc::new(ColorFormat::R8, 4, 1, 1);
        p.slice = 6;
        ImageDesc::new(vec![p], 4);
    }
}
