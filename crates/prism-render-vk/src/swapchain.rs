// SPDX-License-Identifier: CEPL-1.0
use crate::device::{DeviceContext, Surface};
use anyhow::{Context, Result};
use ash::khr::swapchain;
use ash::vk;
use prism_render::RenderSize;
use tracing::info;

pub const PREFERRED_FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;

/// B8G8R8A8_SRGB with the sRGB nonlinear color space when offered, else the
/// first format the surface reports.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    // a single UNDEFINED entry means the surface has no preference
    if let [only] = formats {
        if only.format == vk::Format::UNDEFINED {
            return Some(vk::SurfaceFormatKHR {
                format: PREFERRED_FORMAT,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            });
        }
    }
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == PREFERRED_FORMAT && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// Non-blocking modes first; FIFO is always available and is the fallback.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    let order: [vk::PresentModeKHR; 2] = if vsync {
        [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
    } else {
        [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX]
    };
    order
        .into_iter()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// `min + 1`, capped at `max` unless the surface reports no maximum (0).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: want
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: want
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// Every swapchain parameter derived from what the surface supports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub image_count: u32,
    pub extent: vk::Extent2D,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    pub fn new(
        caps: &vk::SurfaceCapabilitiesKHR,
        formats: &[vk::SurfaceFormatKHR],
        modes: &[vk::PresentModeKHR],
        want: RenderSize,
        vsync: bool,
    ) -> Option<Self> {
        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };
        Some(Self {
            format: choose_surface_format(formats)?,
            present_mode: choose_present_mode(modes, vsync),
            image_count: choose_image_count(caps),
            extent: choose_extent(caps, want),
            pre_transform,
        })
    }
}

/// Swapchain, its images and one view per image.
pub struct Swapchain {
    device: ash::Device,
    pub loader: swapchain::Device,
    pub handle: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
}

impl Swapchain {
    /// Build a swapchain for `surface`. `old` is passed as the replacement
    /// hint; the caller drops it once this returns.
    pub fn new(
        ctx: &DeviceContext,
        surface: &Surface,
        want: RenderSize,
        vsync: bool,
        old: Option<&Swapchain>,
    ) -> Result<Self> {
        let (caps, formats, modes) = unsafe {
            (
                surface
                    .loader
                    .get_physical_device_surface_capabilities(ctx.phys, surface.handle)?,
                surface
                    .loader
                    .get_physical_device_surface_formats(ctx.phys, surface.handle)?,
                surface
                    .loader
                    .get_physical_device_surface_present_modes(ctx.phys, surface.handle)?,
            )
        };
        let plan = SwapchainPlan::new(&caps, &formats, &modes, want, vsync)
            .context("surface reports no formats")?;

        // graphics and present may be different families
        let families = [ctx.graphics_family, ctx.present_family];
        let (sharing_mode, family_count) = if ctx.graphics_family != ctx.present_family {
            (vk::SharingMode::CONCURRENT, 2)
        } else {
            (vk::SharingMode::EXCLUSIVE, 0)
        };

        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: surface.handle,
            min_image_count: plan.image_count,
            image_format: plan.format.format,
            image_color_space: plan.format.color_space,
            image_extent: plan.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_count,
            p_queue_family_indices: families.as_ptr(),
            pre_transform: plan.pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: plan.present_mode,
            clipped: vk::TRUE,
            old_swapchain: old.map_or(vk::SwapchainKHR::null(), |o| o.handle),
            ..Default::default()
        };

        let loader = swapchain::Device::new(ctx.instance(), &ctx.device);
        let handle = unsafe { loader.create_swapchain(&info, None) }.context("create_swapchain")?;
        let mut out = Self {
            device: ctx.device.clone(),
            loader,
            handle,
            format: plan.format,
            present_mode: plan.present_mode,
            extent: plan.extent,
            images: Vec::new(),
            views: Vec::new(),
        };
        out.images = unsafe { out.loader.get_swapchain_images(handle) }?;
        out.create_views()?;

        info!(
            "vk: swapchain {}x{} {:?}/{:?} {:?}, {} images (min {})",
            plan.extent.width,
            plan.extent.height,
            plan.format.format,
            plan.format.color_space,
            plan.present_mode,
            out.images.len(),
            caps.min_image_count
        );
        Ok(out)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    fn create_views(&mut self) -> Result<()> {
        for &image in &self.images {
            let ci = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: self.format.format,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            let view = unsafe { self.device.create_image_view(&ci, None) }?;
            self.views.push(view);
        }
        Ok(())
    }

    /// Destroy the image views ahead of the swapchain itself.
    pub fn release_views(&mut self) {
        for view in self.views.drain(..) {
            unsafe { self.device.destroy_image_view(view, None) };
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.release_views();
        unsafe { self.loader.destroy_swapchain(self.handle, None) };
    }
}

/// One framebuffer per swapchain view, sharing the depth attachment.
pub struct Framebuffers {
    device: ash::Device,
    pub handles: Vec<vk::Framebuffer>,
}

impl Framebuffers {
    pub fn new(
        device: &ash::Device,
        render_pass: vk::RenderPass,
        views: &[vk::ImageView],
        depth_view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let mut out = Self {
            device: device.clone(),
            handles: Vec::with_capacity(views.len()),
        };
        for &view in views {
            let attachments = [view, depth_view];
            let ci = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass,
                attachment_count: attachments.len() as u32,
                p_attachments: attachments.as_ptr(),
                width: extent.width,
                height: extent.height,
                layers: 1,
                ..Default::default()
            };
            let fb = unsafe { device.create_framebuffer(&ci, None) }.context("create_framebuffer")?;
            out.handles.push(fb);
        }
        Ok(out)
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        for fb in self.handles.drain(..) {
            unsafe { self.device.destroy_framebuffer(fb, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 32,
            },
            max_image_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        }
    }

    fn size(width: u32, height: u32) -> RenderSize {
        RenderSize { width, height }
    }

    #[test]
    fn image_count_within_bounds() {
        for min in 1..5 {
            for max in min..8 {
                let n = choose_image_count(&caps(min, max));
                assert!(n <= max, "min={min} max={max} n={n}");
                if max > min {
                    assert!(n >= min + 1, "min={min} max={max} n={n}");
                }
            }
        }
        // unbounded
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
        assert_eq!(choose_image_count(&caps(3, 3)), 3);
    }

    #[test]
    fn extent_is_clamped_componentwise() {
        let c = caps(2, 0);
        assert_eq!(
            choose_extent(&c, size(1440, 900)),
            vk::Extent2D {
                width: 1440,
                height: 900
            }
        );
        assert_eq!(
            choose_extent(&c, size(10, 5000)),
            vk::Extent2D {
                width: 64,
                height: 1080
            }
        );
        assert_eq!(
            choose_extent(&c, size(4000, 1)),
            vk::Extent2D {
                width: 1920,
                height: 32
            }
        );
    }

    #[test]
    fn surface_dictated_extent_wins() {
        let mut c = caps(2, 0);
        c.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert_eq!(choose_extent(&c, size(1440, 900)), c.current_extent);
    }

    #[test]
    fn srgb_bgra_preferred_then_first() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[unorm, srgb]), Some(srgb));
        assert_eq!(choose_surface_format(&[unorm]), Some(unorm));
        assert_eq!(choose_surface_format(&[]), None);

        let any = vk::SurfaceFormatKHR {
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[any]), Some(srgb));
    }

    #[test]
    fn present_mode_preferences() {
        use vk::PresentModeKHR as P;
        let all = [P::FIFO, P::IMMEDIATE, P::MAILBOX];
        assert_eq!(choose_present_mode(&all, true), P::MAILBOX);
        assert_eq!(choose_present_mode(&all, false), P::IMMEDIATE);
        assert_eq!(choose_present_mode(&[P::FIFO, P::IMMEDIATE], true), P::IMMEDIATE);
        assert_eq!(choose_present_mode(&[P::FIFO], false), P::FIFO);
        assert_eq!(choose_present_mode(&[], true), P::FIFO);
    }

    #[test]
    fn plan_is_stable_for_the_same_inputs() {
        let c = caps(2, 4);
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];
        let modes = [vk::PresentModeKHR::FIFO];
        let a = SwapchainPlan::new(&c, &formats, &modes, size(1440, 900), true);
        let b = SwapchainPlan::new(&c, &formats, &modes, size(1440, 900), true);
        assert!(a.is_some());
        assert_eq!(a, b);
    }
}
