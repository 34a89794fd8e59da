use std::fmt;

use vulkanalia::vk;

use crate::utils::fp16::f32_to_f16;

/// Pixel formats understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorFormat {
    #[default]
    None,
    Rgba32f,
    Rgb32f,
    Rgba16f,
    Rgba16u,
    Rgb16f,
    R32f,
    Rgba8,
    Srgb8A8,
    Rgb8,
    Srgb8,
    R16f,
    Rg8,
    R8,
    /// Full-res Y plane followed by a half-res interleaved U/V plane
    Nv12,
    /// Full-res Y plane followed by a half-res interleaved V/U plane
    Nv21,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFormatType {
    None,
    Uint8,
    Uint16,
    Float16,
    Float32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorFormatDesc {
    pub name: &'static str,
    /// bits per pixel
    pub bits: u32,
    pub ch: u32,
}

impl ColorFormatDesc {
    pub fn bytes(&self) -> u32 {
        self.bits / 8
    }

    /// bytes per channel
    pub fn color_depth(&self) -> u32 {
        if self.ch == 0 { 0 } else { self.bits / 8 / self.ch }
    }
}

impl ColorFormat {
    pub const ALL: [ColorFormat; 16] = [
        ColorFormat::None,
        ColorFormat::Rgba32f,
        ColorFormat::Rgb32f,
        ColorFormat::Rgba16f,
        ColorFormat::Rgba16u,
        ColorFormat::Rgb16f,
        ColorFormat::R32f,
        ColorFormat::Rgba8,
        ColorFormat::Srgb8A8,
        ColorFormat::Rgb8,
        ColorFormat::Srgb8,
        ColorFormat::R16f,
        ColorFormat::Rg8,
        ColorFormat::R8,
        ColorFormat::Nv12,
        ColorFormat::Nv21,
    ];

    pub const fn desc(self) -> ColorFormatDesc {
        let (name, bits, ch) = match self {
            ColorFormat::None => ("NONE", 0, 0),
            ColorFormat::Rgba32f => ("RGBA32F", 128, 4),
            // RGB32F is stored padded to four floats
            ColorFormat::Rgb32f => ("RGB32F", 128, 3),
            ColorFormat::Rgba16f => ("RGBA16F", 64, 4),
            ColorFormat::Rgba16u => ("RGBA16U", 64, 4),
            ColorFormat::Rgb16f => ("RGB16F", 48, 3),
            ColorFormat::R32f => ("R32F", 32, 1),
            ColorFormat::Rgba8 => ("RGBA8", 32, 4),
            ColorFormat::Srgb8A8 => ("SRGB8_A8", 32, 4),
            ColorFormat::Rgb8 => ("RGB8", 24, 3),
            ColorFormat::Srgb8 => ("SRGB8", 24, 3),
            ColorFormat::R16f => ("R16F", 16, 1),
            ColorFormat::Rg8 => ("RG8", 16, 2),
            ColorFormat::R8 => ("R8", 8, 1),
            ColorFormat::Nv12 => ("NV12", 12, 3),
            ColorFormat::Nv21 => ("NV21", 12, 3),
        };
        ColorFormatDesc { name, bits, ch }
    }

    pub fn name(self) -> &'static str {
        self.desc().name
    }

    pub fn bits(self) -> u32 {
        self.desc().bits
    }

    pub fn channels(self) -> u32 {
        self.desc().ch
    }

    pub fn bytes(self) -> u32 {
        self.desc().bytes()
    }

    pub fn from_name(name: &str) -> ColorFormat {
        Self::ALL
            .iter()
            .copied()
            .find(|cf| cf.name().eq_ignore_ascii_case(name))
            .unwrap_or(ColorFormat::None)
    }

    pub fn format_type(self) -> ColorFormatType {
        match self {
            ColorFormat::Rgba32f | ColorFormat::Rgb32f | ColorFormat::R32f => ColorFormatType::Float32,
            ColorFormat::Rgba16f | ColorFormat::Rgb16f | ColorFormat::R16f => ColorFormatType::Float16,
            ColorFormat::Rgba16u => ColorFormatType::Uint16,
            ColorFormat::Rgba8
            | ColorFormat::Srgb8A8
            | ColorFormat::Rgb8
            | ColorFormat::Srgb8
            | ColorFormat::Rg8
            | ColorFormat::R8 => ColorFormatType::Uint8,
            ColorFormat::None | ColorFormat::Nv12 | ColorFormat::Nv21 => ColorFormatType::None,
        }
    }

    pub fn vk_format(self) -> vk::Format {
        match self {
            ColorFormat::None => vk::Format::UNDEFINED,
            ColorFormat::Rgba32f => vk::Format::R32G32B32A32_SFLOAT,
            ColorFormat::Rgb32f => vk::Format::R32G32B32_SFLOAT,
            ColorFormat::Rgba16f | ColorFormat::Rgb16f => vk::Format::R16G16B16A16_SFLOAT,
            ColorFormat::Rgba16u => vk::Format::R16G16B16A16_UNORM,
            ColorFormat::R32f => vk::Format::R32_SFLOAT,
            ColorFormat::Rgba8 => vk::Format::R8G8B8A8_UNORM,
            ColorFormat::Srgb8A8 => vk::Format::R8G8B8A8_SRGB,
            ColorFormat::Rgb8 => vk::Format::R8G8B8_UNORM,
            ColorFormat::Srgb8 => vk::Format::R8G8B8_SRGB,
            ColorFormat::R16f => vk::Format::R16_SFLOAT,
            ColorFormat::Rg8 => vk::Format::R8G8_UNORM,
            ColorFormat::R8 => vk::Format::R8_UNORM,
            ColorFormat::Nv12 | ColorFormat::Nv21 => vk::Format::G8_B8_R8_3PLANE_420_UNORM,
        }
    }

    pub fn from_vk_format(format: vk::Format) -> ColorFormat {
        Self::ALL
            .iter()
            .skip(1)
            .copied()
            .find(|cf| cf.vk_format() == format)
            .unwrap_or(ColorFormat::None)
    }
}

impl fmt::Display for ColorFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encode float samples into the byte layout of `format`.
///
/// Used for weight textures, which arrive as f32 and are stored either as
/// RGBA16F or in their native float layout.
pub fn convert_color_buffer(format: ColorFormat, values: &[f32]) -> Vec<u8> {
    match format.format_type() {
        ColorFormatType::Float16 => values
            .iter()
            .flat_map(|&v| f32_to_f16(v).to_le_bytes())
            .collect(),
        ColorFormatType::Float32 => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        ColorFormatType::Uint8 => values
            .iter()
            .map(|&v| (v * 255.0).round().clamp(0.0, 255.0) as u8)
            .collect(),
        _ => panic!("unsupported color format: {}", format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_known_sizes() {
        assert_eq!(ColorFormat::Rgba32f.bytes(), 16);
        assert_eq!(ColorFormat::Rgb32f.channels(), 3);
        assert_eq!(ColorFormat::Rgba16f.bytes(), 8);
        assert_eq!(ColorFormat::Rgb8.bytes(), 3);
        assert_eq!(ColorFormat::Nv12.bits(), 12);
        assert_eq!(ColorFormat::Rgba8.desc().color_depth(), 1);
        assert_eq!(ColorFormat::None.desc().color_depth(), 0);
    }

    #[test]
    fn names_round_trip() {
        for cf in ColorFormat::ALL {
            assert_eq!(ColorFormat::from_name(cf.name()), cf);
        }
        assert_eq!(ColorFormat::from_name("rgba8"), ColorFormat::Rgba8);
        assert_eq!(ColorFormat::from_name("bogus"), ColorFormat::None);
    }

    #[test]
    fn vulkan_mapping_prefers_first_match() {
        assert_eq!(ColorFormat::from_vk_format(vk::Format::R16G16B16A16_SFLOAT), ColorFormat::Rgba16f);
        assert_eq!(ColorFormat::from_vk_format(vk::Format::R8_UNORM), ColorFormat::R8);
        assert_eq!(ColorFormat::from_vk_format(vk::Format::D32_SFLOAT), ColorFormat::None);
    }

    #[test]
    fn half_buffer_encoding() {
        let bytes = convert_color_buffer(ColorFormat::Rgba16f, &[1.0, 0.0]);
        assert_eq!(bytes, vec![0x00, 0x3c, 0x00, 0x00]);
        let bytes = convert_color_buffer(ColorFormat::R32f, &[1.0]);
        assert_eq!(bytes, 1.0f32.to_le_bytes().to_vec());
    }
}
