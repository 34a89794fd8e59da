use std::{cell::Cell, fmt, ptr, sync::Arc};

use vulkanalia::{vk, vk::DeviceV1_0};

use crate::utils::error::SnnError;

use super::context::VulkanDevice;

/// Usage flags for every image the engine allocates.
pub fn default_image_usage() -> vk::ImageUsageFlags {
    vk::ImageUsageFlags::STORAGE
        | vk::ImageUsageFlags::SAMPLED
        | vk::ImageUsageFlags::TRANSFER_SRC
        | vk::ImageUsageFlags::TRANSFER_DST
}

/// Native objects backing an image allocated by the engine.
pub struct ImageMemory {
    image: vk::Image,
    view: vk::ImageView,
    memory: vk::DeviceMemory,
    device: Arc<VulkanDevice>,
}

impl Drop for ImageMemory {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_image_view(self.view, None);
            self.device.device.destroy_image(self.image, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}

enum Storage {
    /// Held only so the native objects are destroyed with the image
    #[allow(dead_code)]
    Owned(ImageMemory),
    /// Handles belong to someone else, nothing is destroyed on drop
    External,
}

/// A 3D Vulkan image with its view and tracked layout.
///
/// The layout is what the engine believes the image is in after every
/// recorded barrier, so it must only change through barrier recording.
pub struct Image {
    handle: vk::Image,
    view: vk::ImageView,
    format: vk::Format,
    extent: vk::Extent3D,
    layout: Cell<vk::ImageLayout>,
    storage: Storage,
}

impl Image {
    pub fn new(
        device: &Arc<VulkanDevice>,
        extent: vk::Extent3D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Result<Self, SnnError> {
        let vk_device = &device.device;

        unsafe {
            let image_info = vk::ImageCreateInfo {
                s_type: vk::StructureType::IMAGE_CREATE_INFO,
                next: ptr::null(),
                flags: vk::ImageCreateFlags::empty(),
                image_type: vk::ImageType::_3D,
                format,
                extent,
                mip_levels: 1,
                array_layers: 1,
                samples: vk::SampleCountFlags::_1,
                tiling: vk::ImageTiling::OPTIMAL,
                usage,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                queue_family_index_count: 0,
                queue_family_indices: ptr::null(),
                initial_layout: vk::ImageLayout::UNDEFINED,
            };

            let image = vk_device.create_image(&image_info, None)?;
            let requirements = vk_device.get_image_memory_requirements(image);

            let memory_type = match device.find_memory_type(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            ) {
                Ok(index) => index,
                Err(e) => {
                    vk_device.destroy_image(image, None);
                    return Err(e);
                }
            };

            let alloc_info = vk::MemoryAllocateInfo {
                s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
                next: ptr::null(),
                allocation_size: requirements.size,
                memory_type_index: memory_type,
            };

            let memory = match vk_device.allocate_memory(&alloc_info, None) {
                Ok(memory) => memory,
                Err(e) => {
                    vk_device.destroy_image(image, None);
                    return Err(e.into());
                }
            };

            if let Err(e) = vk_device.bind_image_memory(image, memory, 0) {
                vk_device.destroy_image(image, None);
                vk_device.free_memory(memory, None);
                return Err(e.into());
            }

            let view_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                next: ptr::null(),
                flags: vk::ImageViewCreateFlags::empty(),
                image,
                view_type: vk::ImageViewType::_3D,
                format,
                components: vk::ComponentMapping::default(),
                subresource_range: color_subresource_range(),
            };

            let view = match vk_device.create_image_view(&view_info, None) {
                Ok(view) => view,
                Err(e) => {
                    vk_device.destroy_image(image, None);
                    vk_device.free_memory(memory, None);
                    return Err(e.into());
                }
            };

            Ok(Self {
                handle: image,
                view,
                format,
                extent,
                layout: Cell::new(vk::ImageLayout::UNDEFINED),
                storage: Storage::Owned(ImageMemory {
                    image,
                    view,
                    memory,
                    device: Arc::clone(device),
                }),
            })
        }
    }

    /// Wrap handles owned elsewhere, such as a caller's output image.
    pub fn external(
        handle: vk::Image,
        view: vk::ImageView,
        format: vk::Format,
        extent: vk::Extent3D,
        layout: vk::ImageLayout,
    ) -> Self {
        Self {
            handle,
            view,
            format,
            extent,
            layout: Cell::new(layout),
            storage: Storage::External,
        }
    }

    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    pub fn layout(&self) -> vk::ImageLayout {
        self.layout.get()
    }

    pub fn set_layout(&self, layout: vk::ImageLayout) {
        self.layout.set(layout);
    }

    pub fn is_external(&self) -> bool {
        matches!(self.storage, Storage::External)
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("handle", &self.handle)
            .field("format", &self.format)
            .field("extent", &self.extent)
            .field("layout", &self.layout.get())
            .field("external", &self.is_external())
            .finish()
    }
}

pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

pub struct Sampler {
    pub sampler: vk::Sampler,
    device: Arc<VulkanDevice>,
}

impl Sampler {
    /// Clamp-to-edge sampler with normalized coordinates.
    pub fn new(device: &Arc<VulkanDevice>, filter: vk::Filter) -> Result<Self, SnnError> {
        let sampler_info = vk::SamplerCreateInfo {
            s_type: vk::StructureType::SAMPLER_CREATE_INFO,
            next: ptr::null(),
            flags: vk::SamplerCreateFlags::empty(),
            mag_filter: filter,
            min_filter: filter,
            mipmap_mode: vk::SamplerMipmapMode::NEAREST,
            address_mode_u: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_v: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_w: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            mip_lod_bias: 0.0,
            anisotropy_enable: vk::FALSE,
            max_anisotropy: 1.0,
            compare_enable: vk::FALSE,
            compare_op: vk::CompareOp::NEVER,
            min_lod: 0.0,
            max_lod: 0.0,
            border_color: vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
            unnormalized_coordinates: vk::FALSE,
        };

        let sampler = unsafe { device.device.create_sampler(&sampler_info, None)? };

        Ok(Self {
            sampler,
            device: Arc::clone(device),
        })
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_sampler(self.sampler, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use vulkanalia::vk::Handle;

    use super::*;

    #[test]
    fn external_images_track_layout_without_owning() {
        let image = Image::external(
            vk::Image::from_raw(7),
            vk::ImageView::null(),
            vk::Format::R16G16B16A16_SFLOAT,
            vk::Extent3D { width: 4, height: 4, depth: 1 },
            vk::ImageLayout::UNDEFINED,
        );

        assert!(image.is_external());
        image.set_layout(vk::ImageLayout::GENERAL);
        assert_eq!(image.layout(), vk::ImageLayout::GENERAL);
        assert_eq!(image.handle().as_raw(), 7);
    }
}
