//! PNG and `.dump` persistence for CPU images.

use std::{fs, io::Write, path::Path};

use image::ExtendedColorType;

use super::{
    color::{ColorFormat, ColorFormatType},
    convert::{clamp, to_r8, to_r32f, to_rgb8, to_rgba8, to_rgba32f},
    desc::ImageDesc,
    raw::{ManagedRawImage, RawImage},
};
use crate::utils::{error::SnnError, fp16::f16_to_f32};

/// Size of the ASCII header in front of every `.dump` payload.
pub const BIN_HEADER_LEN: usize = 32;

/// `"w h d channels"`, zero padded to [`BIN_HEADER_LEN`] bytes.
pub fn bin_header(width: u32, height: u32, depth: u32, channels: u32) -> [u8; BIN_HEADER_LEN] {
    let text = format!("{} {} {} {}", width, height, depth, channels);
    let mut header = [0u8; BIN_HEADER_LEN];
    let len = text.len().min(BIN_HEADER_LEN - 1);
    header[..len].copy_from_slice(&text.as_bytes()[..len]);
    header
}

/// Parse the dimensions back out of a `.dump` header.
pub fn parse_bin_header(bytes: &[u8]) -> Option<[u32; 4]> {
    let header = bytes.get(..BIN_HEADER_LEN)?;
    let end = header.iter().position(|&b| b == 0).unwrap_or(BIN_HEADER_LEN);
    let text = std::str::from_utf8(&header[..end]).ok()?;
    let mut dims = [0u32; 4];
    let mut fields = text.split_whitespace();
    for d in dims.iter_mut() {
        *d = fields.next()?.parse().ok()?;
    }
    Some(dims)
}

impl RawImage<'_> {
    /// Write depth slice `slice` of the first plane as an 8-bit PNG.
    pub fn save_to_png<P: AsRef<Path>>(
        &self,
        path: P,
        slice: u32,
        make_opaque: bool,
        clamp_values: bool,
    ) -> Result<(), SnnError> {
        let path = path.as_ref();
        if self.is_empty() {
            log::warn!("Skipping empty image for {:?}", path);
            return Ok(());
        }
        if slice >= self.depth() {
            return Err(SnnError::Image(format!(
                "slice {} out of range for image depth {}",
                slice,
                self.depth()
            )));
        }

        let clamped;
        let src = if clamp_values && is_float(self.format()) {
            clamped = clamp(*self);
            clamped.as_raw()
        } else {
            *self
        };

        let (pixels, color) = match src.format() {
            ColorFormat::R32f | ColorFormat::R16f => {
                (to_r8(src).as_raw().packed_slice(0, slice), ExtendedColorType::L8)
            }
            ColorFormat::R8 => (src.packed_slice(0, slice), ExtendedColorType::L8),
            ColorFormat::Rgb32f | ColorFormat::Rgb16f => {
                (to_rgb8(src).as_raw().packed_slice(0, slice), ExtendedColorType::Rgb8)
            }
            ColorFormat::Rgb8 => (src.packed_slice(0, slice), ExtendedColorType::Rgb8),
            ColorFormat::Rgba32f | ColorFormat::Rgba16f => (
                to_rgba8(src, make_opaque).as_raw().packed_slice(0, slice),
                ExtendedColorType::Rgba8,
            ),
            ColorFormat::Rgba8 if make_opaque => (
                to_rgba8(src, true).as_raw().packed_slice(0, slice),
                ExtendedColorType::Rgba8,
            ),
            ColorFormat::Rgba8 => (src.packed_slice(0, slice), ExtendedColorType::Rgba8),
            other => {
                return Err(SnnError::Image(format!("cannot save {} image as PNG", other)));
            }
        };

        image::save_buffer(path, &pixels, src.width(), src.height(), color)?;
        Ok(())
    }

    /// Write the header plus a float payload: RGBA32F for RGBA images, R32F otherwise.
    pub fn save_to_bin<P: AsRef<Path>>(&self, path: P) -> Result<(), SnnError> {
        let path = path.as_ref();
        if self.is_empty() {
            log::warn!("Skipping empty image for {:?}", path);
            return Ok(());
        }

        let mut file = fs::File::create(path)?;
        file.write_all(&bin_header(self.width(), self.height(), self.depth(), self.channels()))?;
        match self.format() {
            ColorFormat::Rgba32f => file.write_all(self.pixels())?,
            ColorFormat::Rgba8 | ColorFormat::Rgba16f => file.write_all(to_rgba32f(*self).as_raw().pixels())?,
            _ => file.write_all(to_r32f(*self).as_raw().pixels())?,
        }
        Ok(())
    }

    /// Human readable dump of every channel value, one row of pixels per line.
    pub fn pretty_print<W: Write>(&self, out: &mut W) -> Result<(), SnnError> {
        for (p, plane) in self.desc().planes.iter().enumerate() {
            writeln!(
                out,
                "----plane: {}, w: {}, h: {}, d: {}, c: {}, format: {}----",
                p, plane.width, plane.height, plane.depth, plane.channels, plane.format
            )?;
            let kind = plane.format.format_type();
            for z in 0..plane.depth {
                writeln!(out, "slice {}:", z)?;
                for y in 0..plane.height {
                    for x in 0..plane.width {
                        let px = self.at(p, x, y, z);
                        let values: Vec<String> = match kind {
                            ColorFormatType::Float32 => px
                                .chunks_exact(4)
                                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]).to_string())
                                .collect(),
                            ColorFormatType::Float16 => px
                                .chunks_exact(2)
                                .map(|c| f16_to_f32(u16::from_le_bytes([c[0], c[1]])).to_string())
                                .collect(),
                            ColorFormatType::Uint16 => px
                                .chunks_exact(2)
                                .map(|c| u16::from_le_bytes([c[0], c[1]]).to_string())
                                .collect(),
                            _ => px.iter().map(|b| b.to_string()).collect(),
                        };
                        write!(out, "({}), ", values.join(" "))?;
                    }
                    writeln!(out)?;
                }
            }
        }
        Ok(())
    }
}

fn is_float(format: ColorFormat) -> bool {
    matches!(
        format.format_type(),
        ColorFormatType::Float16 | ColorFormatType::Float32
    )
}

/// Load a PNG into an RGBA8 image.
pub fn load_png<P: AsRef<Path>>(path: P, alignment: u32) -> Result<ManagedRawImage, SnnError> {
    let rgba = image::open(path.as_ref())?.to_rgba8();
    let (width, height) = rgba.dimensions();
    let desc = ImageDesc::single(ColorFormat::Rgba8, width, height, 1, alignment);
    let mut image = ManagedRawImage::new(desc);
    let row_len = width as usize * 4;
    for (y, row) in rgba.as_raw().chunks_exact(row_len).enumerate() {
        let start = image.desc().pixel(0, 0, y as u32, 0);
        image.pixels_mut()[start..start + row_len].copy_from_slice(row);
    }
    Ok(image)
}
