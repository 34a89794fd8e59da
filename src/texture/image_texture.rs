//! Backend-tagged images that move between CPU memory and GPU images.

use std::{cell::RefCell, fmt, io::Write, path::Path, rc::Rc};

use vulkanalia::vk;

use crate::{
    gpu::{
        context::GpuContext,
        resize_op::resize_image,
        staging::{get_device_image_via_staging, set_device_image_via_staging},
        vk_image::{Image, default_image_usage},
    },
    utils::{error::SnnError, fp16::f16_to_f32, fp16::f32_to_f16},
};

use super::{
    color::{ColorFormat, ColorFormatType},
    convert::{to_r8, to_r32f, to_rgb8, to_rgba8, to_rgba16f, to_rgba32f},
    desc::{DEFAULT_ALIGNMENT, ImageDesc, ImagePlaneDesc},
    io::load_png,
    raw::{ManagedRawImage, RawImage},
    resize::{ResizeFilter, ResizeParams, resize, scaled_extent},
};

pub type ImageTextureRef = Rc<RefCell<ImageTexture>>;

/// Which copy of the pixels is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    Cpu,
    Gpu,
}

/// Pixel storage for one tensor of the network.
///
/// Dimensions are `[width, height, depth, planes]`. Every plane is a 3D image of
/// `depth` slices, so an RGBA texture carries `4 * depth * planes` channels.
pub struct ImageTexture {
    context: GpuContext,
    dims: [u32; 4],
    format: ColorFormat,
    alignment: u32,
    cpu: ManagedRawImage,
    gpu: Vec<Rc<Image>>,
    residency: Residency,
    output_mat: Vec<Vec<f32>>,
}

impl ImageTexture {
    pub fn empty(context: &GpuContext) -> Self {
        Self {
            context: context.clone(),
            dims: [0; 4],
            format: ColorFormat::None,
            alignment: DEFAULT_ALIGNMENT,
            cpu: ManagedRawImage::default(),
            gpu: Vec::new(),
            residency: Residency::Cpu,
            output_mat: Vec::new(),
        }
    }

    /// Texture of the given size, allocated on the context's native side.
    pub fn with_dims(
        context: &GpuContext,
        dims: [u32; 4],
        format: ColorFormat,
    ) -> Result<Self, SnnError> {
        Self::with_dims_aligned(context, dims, format, DEFAULT_ALIGNMENT)
    }

    /// Like [`Self::with_dims`], with host rows padded to `alignment` bytes.
    pub fn with_dims_aligned(
        context: &GpuContext,
        dims: [u32; 4],
        format: ColorFormat,
        alignment: u32,
    ) -> Result<Self, SnnError> {
        let mut texture = Self::empty(context);
        texture.alignment = alignment;
        texture.reset_texture(dims, format)?;
        Ok(texture)
    }

    /// Texture whose pixels live in host memory until uploaded.
    pub fn with_dims_on_cpu(context: &GpuContext, dims: [u32; 4], format: ColorFormat) -> Self {
        Self::with_dims_on_cpu_aligned(context, dims, format, DEFAULT_ALIGNMENT)
    }

    pub fn with_dims_on_cpu_aligned(
        context: &GpuContext,
        dims: [u32; 4],
        format: ColorFormat,
        alignment: u32,
    ) -> Self {
        let mut texture = Self::empty(context);
        texture.dims = dims;
        texture.format = format;
        texture.alignment = alignment;
        texture.cpu = ManagedRawImage::new(cpu_desc(dims, format, alignment));
        texture
    }

    /// Wrap a CPU image. Each plane of `image` must share one format and size.
    pub fn from_image(context: &GpuContext, image: ManagedRawImage) -> Self {
        let desc = image.desc();
        let dims = if desc.is_empty() {
            [0; 4]
        } else {
            [desc.width(), desc.height(), desc.depth(), desc.planes.len() as u32]
        };
        Self {
            context: context.clone(),
            dims,
            format: desc.format(),
            alignment: desc.alignment,
            cpu: image,
            gpu: Vec::new(),
            residency: Residency::Cpu,
            output_mat: Vec::new(),
        }
    }

    pub fn from_png<P: AsRef<Path>>(context: &GpuContext, path: P) -> Result<Self, SnnError> {
        Ok(Self::from_image(context, load_png(path, DEFAULT_ALIGNMENT)?))
    }

    pub fn into_ref(self) -> ImageTextureRef {
        Rc::new(RefCell::new(self))
    }

    /// Wrap GPU images owned elsewhere, one per plane.
    pub fn from_vk_images(
        context: &GpuContext,
        images: Vec<Rc<Image>>,
        format: ColorFormat,
    ) -> Result<Self, SnnError> {
        let first = images
            .first()
            .ok_or_else(|| SnnError::Image("no images to attach".to_string()))?;
        let extent = first.extent();
        let mut texture = Self::empty(context);
        texture.dims = [extent.width, extent.height, extent.depth, images.len() as u32];
        texture.format = format;
        texture.gpu = images;
        texture.residency = Residency::Gpu;
        Ok(texture)
    }

    /// Share `other`'s storage. GPU images are shared, CPU pixels are copied.
    pub fn attach(&mut self, other: &ImageTexture) {
        self.dims = other.dims;
        self.format = other.format;
        self.alignment = other.alignment;
        self.cpu = other.cpu.clone();
        self.gpu = other.gpu.clone();
        self.residency = other.residency;
    }

    /// Reallocate for new dimensions or format, discarding the contents.
    pub fn reset_texture(&mut self, dims: [u32; 4], format: ColorFormat) -> Result<(), SnnError> {
        self.dims = dims;
        self.format = format;
        self.gpu.clear();
        self.output_mat.clear();

        match &self.context {
            GpuContext::Cpu => {
                self.cpu = ManagedRawImage::new(cpu_desc(dims, format, self.alignment));
                self.residency = Residency::Cpu;
            }
            GpuContext::Vulkan(_) => {
                self.cpu = ManagedRawImage::default();
                self.gpu = self.create_gpu_images()?;
                self.residency = Residency::Gpu;
            }
        }
        Ok(())
    }

    fn create_gpu_images(&self) -> Result<Vec<Rc<Image>>, SnnError> {
        let device = self.context.vulkan().ok_or_else(|| {
            SnnError::Image("GPU images require a Vulkan context".to_string())
        })?;
        let extent = vk::Extent3D {
            width: self.dims[0],
            height: self.dims[1],
            depth: self.dims[2],
        };
        (0..self.dims[3].max(1))
            .map(|_| {
                Image::new(device, extent, self.format.vk_format(), default_image_usage())
                    .map(Rc::new)
            })
            .collect()
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    pub fn dims(&self) -> [u32; 4] {
        self.dims
    }

    pub fn width(&self) -> u32 {
        self.dims[0]
    }

    pub fn height(&self) -> u32 {
        self.dims[1]
    }

    pub fn depth(&self) -> u32 {
        self.dims[2]
    }

    pub fn planes(&self) -> u32 {
        self.dims[3]
    }

    /// Channels across all planes and slices.
    pub fn channels(&self) -> u32 {
        self.format.channels() * self.dims[2] * self.dims[3]
    }

    pub fn format(&self) -> ColorFormat {
        self.format
    }

    pub fn is_empty(&self) -> bool {
        self.dims.iter().any(|&d| d == 0)
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    pub fn is_gpu(&self) -> bool {
        self.residency == Residency::Gpu
    }

    /// Record that a GPU pass has written new contents.
    pub fn mark_gpu_written(&mut self) {
        if !self.gpu.is_empty() {
            self.residency = Residency::Gpu;
        }
    }

    /// GPU image backing plane `i`.
    pub fn vk_image(&self, i: usize) -> Result<Rc<Image>, SnnError> {
        self.gpu.get(i).cloned().ok_or_else(|| {
            SnnError::Image(format!(
                "texture {}x{}x{} {} has no GPU image for plane {}",
                self.dims[0], self.dims[1], self.dims[2], self.format, i
            ))
        })
    }

    pub fn vk_images(&self) -> &[Rc<Image>] {
        &self.gpu
    }

    /// CPU pixels. Only current when [`Self::residency`] is `Cpu`.
    pub fn cpu_image(&self) -> RawImage<'_> {
        self.cpu.as_raw()
    }

    /// Bring the pixels to host memory. No-op when they are already there.
    pub fn download(&mut self) -> Result<(), SnnError> {
        if self.residency == Residency::Cpu {
            return Ok(());
        }
        let device = self.context.vulkan().cloned().ok_or_else(|| {
            SnnError::Image("download needs a Vulkan context".to_string())
        })?;

        let desc = cpu_desc(self.dims, self.format, self.alignment);
        if self.cpu.desc() != &desc {
            self.cpu = ManagedRawImage::new(desc);
        }

        for (p, image) in self.gpu.iter().enumerate() {
            let packed = get_device_image_via_staging(&device, image)?;
            let plane = *self.cpu.desc().plane(p);
            let row_len = (plane.width * plane.step / 8) as usize;
            let pixels = self.cpu.pixels_mut();
            for (i, row) in packed.chunks_exact(row_len).enumerate() {
                let z = i as u32 / plane.height;
                let y = i as u32 % plane.height;
                let start = plane.pixel(0, y, z);
                pixels[start..start + row_len].copy_from_slice(row);
            }
        }

        self.residency = Residency::Cpu;
        Ok(())
    }

    /// Push host pixels to the GPU, recreating the images if size or format changed.
    pub fn upload(&mut self) -> Result<(), SnnError> {
        if self.residency == Residency::Gpu {
            return Ok(());
        }
        let device = self.context.vulkan().cloned().ok_or_else(|| {
            SnnError::Image("upload needs a Vulkan context".to_string())
        })?;
        if self.cpu.is_empty() {
            return Err(SnnError::Image("cannot upload an empty texture".to_string()));
        }

        let extent = vk::Extent3D {
            width: self.dims[0],
            height: self.dims[1],
            depth: self.dims[2],
        };
        let stale = self.gpu.len() != self.dims[3] as usize
            || self
                .gpu
                .iter()
                .any(|img| img.extent() != extent || img.format() != self.format.vk_format());
        if stale {
            self.gpu = self.create_gpu_images()?;
        }

        let raw = self.cpu.as_raw();
        for (p, image) in self.gpu.iter().enumerate() {
            let packed: Vec<u8> = (0..self.dims[2])
                .flat_map(|z| raw.packed_slice(p, z))
                .collect();
            set_device_image_via_staging(
                &device,
                image,
                &packed,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )?;
        }

        self.residency = Residency::Gpu;
        Ok(())
    }

    /// Convert to `format`. No-op if it already matches.
    pub fn convert_format(&mut self, format: ColorFormat) -> Result<(), SnnError> {
        if format == self.format {
            log::debug!("convert_format: texture already is {}", format);
            return Ok(());
        }

        let was_gpu = self.is_gpu();
        self.download()?;

        let src = self.cpu.as_raw();
        let converted = match format {
            ColorFormat::Rgba32f => to_rgba32f(src).into_managed(),
            ColorFormat::Rgba16f => to_rgba16f(src).into_managed(),
            ColorFormat::R32f => to_r32f(src).into_managed(),
            ColorFormat::Rgba8 => to_rgba8(src, false).into_managed(),
            ColorFormat::Rgb8 => to_rgb8(src).into_managed(),
            ColorFormat::R8 => to_r8(src).into_managed(),
            other => panic!("unsupported color format: {}", other),
        };

        self.format = format;
        self.cpu = converted;
        if was_gpu {
            self.gpu.clear();
            self.upload()?;
        }
        Ok(())
    }

    /// Mirror the image vertically.
    pub fn flip(&mut self) -> Result<(), SnnError> {
        let was_gpu = self.is_gpu();
        self.download()?;
        self.cpu.flip_vertical();
        if was_gpu {
            self.upload()?;
        }
        Ok(())
    }

    /// Scale to `round(dim * scale)`, normalizing with `(v - mean) * norm` on the way.
    ///
    /// Vulkan textures are resized by a compute pass and come back as RGBA16F before
    /// any requested format conversion. CPU textures use the reference resize.
    pub fn resize(&mut self, params: &ResizeParams) -> Result<ImageTexture, SnnError> {
        let target = if params.format == ColorFormat::None {
            self.format
        } else {
            params.format
        };
        let identity = params.scale_w == 1.0
            && params.scale_h == 1.0
            && params.means == [0.0; 4]
            && params.norms == [1.0; 4];
        if identity && target == self.format {
            log::debug!("resize: nothing to do for a unit scale");
            let mut copy = ImageTexture::empty(&self.context);
            copy.attach(self);
            return Ok(copy);
        }

        match self.context.vulkan().cloned() {
            None => {
                self.download()?;
                let resized = resize(self.cpu.as_raw(), params);
                Ok(ImageTexture::from_image(&self.context, resized))
            }
            Some(device) => {
                self.upload()?;
                let (w, h) = scaled_extent(self.dims[0], self.dims[1], params.scale_w, params.scale_h);
                let mut out = ImageTexture::with_dims(
                    &self.context,
                    [w, h, self.dims[2], self.dims[3]],
                    ColorFormat::Rgba16f,
                )?;
                for (src, dst) in self.gpu.iter().zip(out.gpu.iter()) {
                    resize_image(&device, src, dst, params.filter, &params.means, &params.norms)?;
                }
                out.convert_format(target)?;
                Ok(out)
            }
        }
    }

    /// Convenience wrapper over [`Self::resize`] with a filter flag.
    pub fn resize_scaled(
        &mut self,
        scale_w: f32,
        scale_h: f32,
        means: [f32; 4],
        norms: [f32; 4],
        linear: bool,
    ) -> Result<ImageTexture, SnnError> {
        self.resize(&ResizeParams {
            scale_w,
            scale_h,
            means,
            norms,
            filter: if linear { ResizeFilter::Linear } else { ResizeFilter::Nearest },
            format: ColorFormat::None,
        })
    }

    pub fn set_output_mat(&mut self, rows: Vec<Vec<f32>>) {
        self.output_mat = rows;
    }

    pub fn output_mat(&self) -> &[Vec<f32>] {
        &self.output_mat
    }

    /// Every channel value in height, width, channel order.
    ///
    /// Channel `c` lives in plane `c / (4 * depth)`, slice `(c / 4) % depth`,
    /// component `c % 4`. Reads host pixels, so download first.
    pub fn read_channels(&self) -> Vec<f32> {
        if self.cpu.is_empty() {
            return Vec::new();
        }
        let raw = self.cpu.as_raw();
        let comps = self.format.channels();
        let mut values = Vec::with_capacity(self.element_count());
        for y in 0..self.dims[1] {
            for x in 0..self.dims[0] {
                for p in 0..self.dims[3] as usize {
                    for z in 0..self.dims[2] {
                        let px = raw.at(p, x, y, z);
                        for c in 0..comps as usize {
                            values.push(read_component(px, self.format, c));
                        }
                    }
                }
            }
        }
        values
    }

    /// Inverse of [`Self::read_channels`]: fill host pixels from HWC values.
    ///
    /// Missing values leave pixels untouched, extra values are ignored.
    pub fn write_channels(&mut self, values: &[f32]) {
        if self.cpu.is_empty() {
            return;
        }
        let comps = self.format.channels() as usize;
        let format = self.format;
        let mut it = values.iter();
        'outer: for y in 0..self.dims[1] {
            for x in 0..self.dims[0] {
                for p in 0..self.dims[3] as usize {
                    for z in 0..self.dims[2] {
                        let px = self.cpu.at_mut(p, x, y, z);
                        for c in 0..comps {
                            match it.next() {
                                Some(&v) => write_component(px, format, c, v),
                                None => break 'outer,
                            }
                        }
                    }
                }
            }
        }
        self.residency = Residency::Cpu;
    }

    pub fn element_count(&self) -> usize {
        self.dims[0] as usize * self.dims[1] as usize * self.channels() as usize
    }

    /// Save every slice of every plane as `<dir>/<NN><suffix>.png`, numbering from `first`.
    pub fn save_png_slices(
        &mut self,
        dir: &Path,
        first: usize,
        suffix: &str,
    ) -> Result<usize, SnnError> {
        self.download()?;
        let mut index = first;
        for p in 0..self.cpu.desc().planes.len() {
            let (desc, pixels) = self.plane_view(p);
            let raw = RawImage::new(&desc, pixels);
            for z in 0..desc.depth() {
                raw.save_to_png(dir.join(format!("{:02}{}.png", index, suffix)), z, true, true)?;
                index += 1;
            }
        }
        Ok(index - first)
    }

    /// Save the texture as a `.dump` file.
    pub fn save_bin(&mut self, path: &Path) -> Result<(), SnnError> {
        self.download()?;
        self.cpu.as_raw().save_to_bin(path)
    }

    pub fn pretty_print<W: Write>(&mut self, out: &mut W) -> Result<(), SnnError> {
        self.download()?;
        self.cpu.as_raw().pretty_print(out)
    }

    fn plane_view(&self, p: usize) -> (ImageDesc, &[u8]) {
        let mut plane = *self.cpu.desc().plane(p);
        let start = plane.offset as usize;
        let len = plane.size() as usize;
        plane.offset = 0;
        let desc = ImageDesc::new(vec![plane], self.cpu.desc().alignment);
        (desc, &self.cpu.pixels()[start..start + len])
    }
}

fn cpu_desc(dims: [u32; 4], format: ColorFormat, alignment: u32) -> ImageDesc {
    let planes = (0..dims[3].max(1))
        .map(|_| ImagePlaneDesc::new(format, dims[0], dims[1], dims[2]))
        .collect();
    ImageDesc::new(planes, alignment)
}

fn read_component(px: &[u8], format: ColorFormat, c: usize) -> f32 {
    match format.format_type() {
        ColorFormatType::Float32 => {
            f32::from_le_bytes([px[c * 4], px[c * 4 + 1], px[c * 4 + 2], px[c * 4 + 3]])
        }
        ColorFormatType::Float16 => f16_to_f32(u16::from_le_bytes([px[c * 2], px[c * 2 + 1]])),
        ColorFormatType::Uint16 => u16::from_le_bytes([px[c * 2], px[c * 2 + 1]]) as f32,
        ColorFormatType::Uint8 => px[c] as f32,
        ColorFormatType::None => panic!("unsupported color format: {}", format),
    }
}

fn write_component(px: &mut [u8], format: ColorFormat, c: usize, v: f32) {
    match format.format_type() {
        ColorFormatType::Float32 => px[c * 4..c * 4 + 4].copy_from_slice(&v.to_le_bytes()),
        ColorFormatType::Float16 => {
            px[c * 2..c * 2 + 2].copy_from_slice(&f32_to_f16(v).to_le_bytes())
        }
        ColorFormatType::Uint16 => {
            px[c * 2..c * 2 + 2].copy_from_slice(&(v.round().clamp(0.0, 65535.0) as u16).to_le_bytes())
        }
        ColorFormatType::Uint8 => px[c] = v.round().clamp(0.0, 255.0) as u8,
        ColorFormatType::None => panic!("unsupported color format: {}", format),
    }
}

impl fmt::Debug for ImageTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageTexture")
            .field("context", &self.context)
            .field("dims", &self.dims)
            .field("format", &self.format)
            .field("residency", &self.residency)
            .field("gpu_planes", &self.gpu.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(context: &GpuContext) -> ImageTexture {
        let mut texture = ImageTexture::with_dims(context, [4, 2, 1, 1], ColorFormat::Rgba8).unwrap();
        let values: Vec<f32> = (0..32).map(|v| v as f32).collect();
        texture.write_channels(&values);
        texture
    }

    #[test]
    fn cpu_textures_are_host_resident() {
        let texture = ImageTexture::with_dims(&GpuContext::Cpu, [8, 4, 2, 3], ColorFormat::Rgba16f).unwrap();
        assert_eq!(texture.residency(), Residency::Cpu);
        assert_eq!(texture.channels(), 24);
        assert_eq!(texture.cpu_image().planes(), 3);
        assert!(texture.vk_image(0).is_err());
    }

    #[test]
    fn channel_order_is_hwc() {
        let texture = gradient(&GpuContext::Cpu);
        let values = texture.read_channels();
        assert_eq!(values.len(), 32);
        assert_eq!(values[5], 5.0);
        // pixel (1, 0) starts at its fifth value
        assert_eq!(texture.cpu_image().at(0, 1, 0, 0), &[4, 5, 6, 7]);
    }

    #[test]
    fn channels_span_planes_and_slices() {
        let mut texture =
            ImageTexture::with_dims(&GpuContext::Cpu, [1, 1, 2, 2], ColorFormat::Rgba32f).unwrap();
        let values: Vec<f32> = (0..16).map(|v| v as f32 * 0.5).collect();
        texture.write_channels(&values);

        assert_eq!(texture.read_channels(), values);
        let raw = texture.cpu_image();
        // channel 12 is plane 1, slice 1, component 0
        assert_eq!(&raw.at(1, 0, 0, 1)[..4], &6.0f32.to_le_bytes());
    }

    #[test]
    fn convert_format_is_noop_when_matching() {
        let mut texture = gradient(&GpuContext::Cpu);
        texture.convert_format(ColorFormat::Rgba8).unwrap();
        assert_eq!(texture.format(), ColorFormat::Rgba8);

        texture.convert_format(ColorFormat::Rgba32f).unwrap();
        assert_eq!(texture.format(), ColorFormat::Rgba32f);
        let values = texture.read_channels();
        assert!((values[31] - 31.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn flip_swaps_rows() {
        let mut texture = gradient(&GpuContext::Cpu);
        texture.flip().unwrap();
        assert_eq!(texture.cpu_image().at(0, 0, 0, 0), &[16, 17, 18, 19]);
    }

    #[test]
    fn cpu_resize_rounds_extent() {
        let mut texture =
            ImageTexture::with_dims(&GpuContext::Cpu, [5, 3, 1, 1], ColorFormat::Rgba8).unwrap();
        let resized = texture.resize_scaled(0.5, 0.5, [0.0; 4], [1.0; 4], true).unwrap();
        assert_eq!(resized.dims(), [3, 2, 1, 1]);
    }

    #[test]
    fn unit_resize_returns_a_copy() {
        let mut texture = gradient(&GpuContext::Cpu);
        let copy = texture.resize(&ResizeParams::default()).unwrap();
        assert_eq!(copy.read_channels(), texture.read_channels());
    }

    #[test]
    fn upload_requires_vulkan() {
        let mut texture = gradient(&GpuContext::Cpu);
        texture.download().unwrap();
        assert!(texture.upload().is_err());
    }
}
