// SPDX-License-Identifier: CEPL-1.0
use crate::device::DeviceContext;
use crate::layout::{cmd_transition, ImageLayoutState, LayoutTracker};
use crate::memory::allocate;
use anyhow::{Context, Result};
use ash::vk;

/// Creation parameters for [`GpuImage::new`].
#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub usage: vk::ImageUsageFlags,
    pub tiling: vk::ImageTiling,
    pub flags: vk::ImageCreateFlags,
    pub aspect: vk::ImageAspectFlags,
    pub memory: vk::MemoryPropertyFlags,
    pub initial: ImageLayoutState,
}

impl ImageDesc {
    /// Sampled, device-local 2D color image filled by a transfer.
    pub fn sampled_2d(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            format,
            mip_levels: 1,
            array_layers: 1,
            usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            tiling: vk::ImageTiling::OPTIMAL,
            flags: vk::ImageCreateFlags::empty(),
            aspect: vk::ImageAspectFlags::COLOR,
            memory: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            initial: ImageLayoutState::Undefined,
        }
    }

    /// Six-layer cube-compatible image.
    pub fn cube(size: u32, format: vk::Format, mip_levels: u32) -> Self {
        Self {
            mip_levels,
            array_layers: 6,
            flags: vk::ImageCreateFlags::CUBE_COMPATIBLE,
            ..Self::sampled_2d(
                vk::Extent2D {
                    width: size,
                    height: size,
                },
                format,
            )
        }
    }

    /// Host-written linear image used as a copy source.
    pub fn linear_staging(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            usage: vk::ImageUsageFlags::TRANSFER_SRC,
            tiling: vk::ImageTiling::LINEAR,
            memory: vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
            initial: ImageLayoutState::Preinitialized,
            ..Self::sampled_2d(extent, format)
        }
    }

    pub fn depth(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: depth_aspect(format),
            ..Self::sampled_2d(extent, format)
        }
    }
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// Aspect used for views and barriers of a depth image.
pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

/// Image, its memory, an optional view and sampler, and its tracked layout.
pub struct GpuImage {
    device: ash::Device,
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub aspect: vk::ImageAspectFlags,
    layout: LayoutTracker,
}

impl GpuImage {
    pub fn new(ctx: &DeviceContext, desc: &ImageDesc) -> Result<Self> {
        let ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            flags: desc.flags,
            image_type: vk::ImageType::TYPE_2D,
            format: desc.format,
            extent: vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            },
            mip_levels: desc.mip_levels,
            array_layers: desc.array_layers,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: desc.tiling,
            usage: desc.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: desc.initial.vk_layout(),
            ..Default::default()
        };
        unsafe {
            let image = ctx
                .device
                .create_image(&ci, None)
                .with_context(|| format!("create_image {:?}", desc.format))?;
            let mut out = Self {
                device: ctx.device.clone(),
                image,
                memory: vk::DeviceMemory::null(),
                view: vk::ImageView::null(),
                sampler: vk::Sampler::null(),
                format: desc.format,
                extent: desc.extent,
                mip_levels: desc.mip_levels,
                array_layers: desc.array_layers,
                aspect: desc.aspect,
                layout: LayoutTracker::new(desc.initial),
            };
            let req = ctx.device.get_image_memory_requirements(image);
            out.memory = allocate(ctx, req, desc.memory).context("image memory")?;
            ctx.device.bind_image_memory(image, out.memory, 0)?;
            Ok(out)
        }
    }

    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: self.array_layers,
        }
    }

    pub fn layout(&self) -> ImageLayoutState {
        self.layout.current()
    }

    /// Create the image's view. Replaces nothing; call once.
    pub fn create_view(&mut self, view_type: vk::ImageViewType) -> Result<()> {
        let ci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image: self.image,
            view_type,
            format: self.format,
            components: vk::ComponentMapping {
                r: vk::ComponentSwizzle::R,
                g: vk::ComponentSwizzle::G,
                b: vk::ComponentSwizzle::B,
                a: vk::ComponentSwizzle::A,
            },
            subresource_range: self.full_range(),
            ..Default::default()
        };
        self.view = unsafe { self.device.create_image_view(&ci, None) }
            .with_context(|| format!("create_image_view {view_type:?}"))?;
        Ok(())
    }

    /// Trilinear clamp-to-edge sampler covering every mip level.
    pub fn create_sampler(&mut self, ctx: &DeviceContext) -> Result<()> {
        let ci = sampler_info(ctx, self.mip_levels);
        self.sampler = unsafe { self.device.create_sampler(&ci, None) }.context("create_sampler")?;
        Ok(())
    }

    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.view,
            image_layout: self.layout.current().vk_layout(),
        }
    }

    /// Record a barrier moving the whole image from `expected` to `to`.
    pub fn transition_to(
        &mut self,
        cmd: vk::CommandBuffer,
        expected: ImageLayoutState,
        to: ImageLayoutState,
    ) -> Result<()> {
        let t = self.layout.transition(expected, to)?;
        unsafe { cmd_transition(&self.device, cmd, self.image, self.full_range(), &t) };
        Ok(())
    }

    pub(crate) fn subresource_layout(&self) -> vk::SubresourceLayout {
        let sub = vk::ImageSubresource {
            aspect_mask: self.aspect,
            mip_level: 0,
            array_layer: 0,
        };
        unsafe { self.device.get_image_subresource_layout(self.image, sub) }
    }

    /// Map a host-visible image, hand the bytes to `fill`, unmap.
    pub(crate) fn with_mapped<F>(&mut self, fill: F) -> Result<()>
    where
        F: FnOnce(&mut [u8]),
    {
        let layout = self.subresource_layout();
        unsafe {
            let ptr = self.device.map_memory(
                self.memory,
                layout.offset,
                layout.size,
                vk::MemoryMapFlags::empty(),
            )?;
            let bytes = std::slice::from_raw_parts_mut(ptr as *mut u8, layout.size as usize);
            fill(bytes);
            self.device.unmap_memory(self.memory);
        }
        Ok(())
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            if self.sampler != vk::Sampler::null() {
                self.device.destroy_sampler(self.sampler, None);
            }
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
            }
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

pub const MAX_ANISOTROPY: f32 = 16.0;

fn sampler_info(ctx: &DeviceContext, mip_levels: u32) -> vk::SamplerCreateInfo<'static> {
    let anisotropy = effective_anisotropy(ctx.anisotropy, ctx.limits.max_sampler_anisotropy);
    vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::LINEAR,
        min_filter: vk::Filter::LINEAR,
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        address_mode_u: vk::SamplerAddressMode::CLAMP_TO_EDGE,
        address_mode_v: vk::SamplerAddressMode::CLAMP_TO_EDGE,
        address_mode_w: vk::SamplerAddressMode::CLAMP_TO_EDGE,
        mip_lod_bias: 0.0,
        anisotropy_enable: if anisotropy.is_some() { vk::TRUE } else { vk::FALSE },
        max_anisotropy: anisotropy.unwrap_or(1.0),
        compare_op: vk::CompareOp::NEVER,
        min_lod: 0.0,
        max_lod: mip_levels as f32,
        border_color: vk::BorderColor::FLOAT_OPAQUE_WHITE,
        ..Default::default()
    }
}

/// Anisotropy to request, or `None` when the feature is off.
pub fn effective_anisotropy(enabled: bool, device_max: f32) -> Option<f32> {
    enabled.then(|| MAX_ANISOTROPY.min(device_max).max(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stencil_formats_get_both_aspects() {
        assert_eq!(depth_aspect(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            depth_aspect(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert!(has_stencil(vk::Format::D32_SFLOAT_S8_UINT));
    }

    #[test]
    fn anisotropy_is_clamped_to_device_limit() {
        assert_eq!(effective_anisotropy(true, 8.0), Some(8.0));
        assert_eq!(effective_anisotropy(true, 64.0), Some(16.0));
        assert_eq!(effective_anisotropy(false, 16.0), None);
    }

    #[test]
    fn descriptor_presets() {
        let cube = ImageDesc::cube(128, vk::Format::R32G32B32A32_SFLOAT, 8);
        assert_eq!(cube.array_layers, 6);
        assert!(cube.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE));
        assert_eq!(cube.extent.width, 128);

        let staging = ImageDesc::linear_staging(
            vk::Extent2D {
                width: 4,
                height: 4,
            },
            vk::Format::R8G8B8A8_UNORM,
        );
        assert_eq!(staging.tiling, vk::ImageTiling::LINEAR);
        assert_eq!(staging.initial, ImageLayoutState::Preinitialized);
        assert!(staging
            .memory
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE));

        let depth = ImageDesc::depth(
            vk::Extent2D {
                width: 8,
                height: 8,
            },
            vk::Format::D24_UNORM_S8_UINT,
        );
        assert!(depth.aspect.contains(vk::ImageAspectFlags::STENCIL));
        assert_eq!(depth.usage, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT);
    }
}
