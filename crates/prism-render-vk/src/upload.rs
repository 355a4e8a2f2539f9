// SPDX-License-Identifier: CEPL-1.0
//! Synchronous staged transfers into device-local buffers and images.
//!
//! Every upload records a single-use command buffer, submits it on the
//! graphics queue and waits for the queue to go idle before returning, so
//! staging resources can be dropped as soon as the call ends.
use crate::device::DeviceContext;
use crate::image::{GpuImage, ImageDesc};
use crate::layout::ImageLayoutState as L;
use crate::memory::GpuBuffer;
use anyhow::{anyhow, Context, Result};
use ash::vk;
use prism_assets::{CubemapAsset, Rgba8Image, TexelFormat, CUBE_FACES};
use tracing::debug;

pub fn texel_format_to_vk(format: TexelFormat) -> vk::Format {
    match format {
        TexelFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TexelFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TexelFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
    }
}

/// Copy `height` tightly packed rows of `row_bytes` into `dst`, starting
/// row `i` at `i * row_pitch`. Padding bytes in `dst` are left untouched.
pub fn copy_rows_with_pitch(
    src: &[u8],
    row_bytes: usize,
    height: usize,
    row_pitch: usize,
    dst: &mut [u8],
) -> Result<()> {
    if row_pitch < row_bytes {
        return Err(anyhow!("row pitch {row_pitch} smaller than row {row_bytes}"));
    }
    if src.len() < row_bytes * height {
        return Err(anyhow!(
            "source holds {} bytes, {height} rows of {row_bytes} need {}",
            src.len(),
            row_bytes * height
        ));
    }
    if height > 0 && dst.len() < row_pitch * (height - 1) + row_bytes {
        return Err(anyhow!("destination too small for {height} rows at pitch {row_pitch}"));
    }
    for (i, row) in src.chunks_exact(row_bytes).take(height).enumerate() {
        let at = i * row_pitch;
        dst[at..at + row_bytes].copy_from_slice(row);
    }
    Ok(())
}

/// One buffer-to-image copy per (face, mip level), reading the face-major
/// texel blob at its cumulative offsets.
pub fn cubemap_regions(asset: &CubemapAsset) -> Result<Vec<vk::BufferImageCopy>> {
    if asset.width != asset.height {
        return Err(anyhow!(
            "cubemap faces must be square, got {}x{}",
            asset.width,
            asset.height
        ));
    }
    let mut regions = Vec::with_capacity(CUBE_FACES * asset.mip_levels as usize);
    for face in 0..CUBE_FACES {
        for level in 0..asset.mip_levels as usize {
            let lvl = asset
                .level(face, level)
                .ok_or_else(|| anyhow!("cubemap is missing face {face} level {level}"))?;
            if lvl.offset + lvl.size > asset.data.len() {
                return Err(anyhow!("face {face} level {level} overruns texel data"));
            }
            regions.push(vk::BufferImageCopy {
                buffer_offset: lvl.offset as vk::DeviceSize,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: level as u32,
                    base_array_layer: face as u32,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D {
                    width: lvl.width,
                    height: lvl.height,
                    depth: 1,
                },
            });
        }
    }
    Ok(regions)
}

/// Owns a transient command pool on the graphics family.
pub struct Uploader {
    device: ash::Device,
    queue: vk::Queue,
    pool: vk::CommandPool,
}

impl Uploader {
    pub fn new(ctx: &DeviceContext) -> Result<Self> {
        let ci = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: ctx.graphics_family,
            flags: vk::CommandPoolCreateFlags::TRANSIENT,
            ..Default::default()
        };
        let pool = unsafe { ctx.device.create_command_pool(&ci, None) }
            .context("create_command_pool (upload)")?;
        Ok(Self {
            device: ctx.device.clone(),
            queue: ctx.graphics_queue,
            pool,
        })
    }

    /// Record with `record`, submit, and block until the queue is idle.
    pub fn one_time<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer) -> Result<()>,
    {
        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let cmd = unsafe { self.device.allocate_command_buffers(&ai) }?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no command buffer allocated"))?;

        let result = (|| -> Result<()> {
            let bi = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            unsafe { self.device.begin_command_buffer(cmd, &bi)? };
            record(cmd)?;
            unsafe {
                self.device.end_command_buffer(cmd)?;
                let si = vk::SubmitInfo {
                    s_type: vk::StructureType::SUBMIT_INFO,
                    command_buffer_count: 1,
                    p_command_buffers: &cmd,
                    ..Default::default()
                };
                self.device
                    .queue_submit(self.queue, std::slice::from_ref(&si), vk::Fence::null())?;
                self.device.queue_wait_idle(self.queue)?;
            }
            Ok(())
        })();

        unsafe {
            self.device
                .free_command_buffers(self.pool, std::slice::from_ref(&cmd))
        };
        result
    }

    /// Device-local buffer holding `bytes`. TRANSFER_DST is added to `usage`.
    pub fn upload_buffer(
        &self,
        ctx: &DeviceContext,
        bytes: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> Result<GpuBuffer> {
        let staging = GpuBuffer::staging(ctx, bytes)?;
        let dst = GpuBuffer::new(
            ctx,
            staging.size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        self.copy_buffer(&staging, &dst, staging.size)?;
        debug!("vk: uploaded {} bytes ({:?})", bytes.len(), usage);
        Ok(dst)
    }

    /// Replace the contents of a device-local buffer through staging.
    pub fn update_buffer(&self, ctx: &DeviceContext, dst: &GpuBuffer, bytes: &[u8]) -> Result<()> {
        if bytes.len() as vk::DeviceSize > dst.size {
            return Err(anyhow!(
                "update of {} bytes exceeds buffer size {}",
                bytes.len(),
                dst.size
            ));
        }
        let staging = GpuBuffer::staging(ctx, bytes)?;
        self.copy_buffer(&staging, dst, staging.size)
    }

    /// Copy a device-local buffer back to the host. `src` needs TRANSFER_SRC.
    pub fn read_back(&self, ctx: &DeviceContext, src: &GpuBuffer) -> Result<Vec<u8>> {
        if !src.usage.contains(vk::BufferUsageFlags::TRANSFER_SRC) {
            return Err(anyhow!("read_back needs a TRANSFER_SRC buffer"));
        }
        let readback = GpuBuffer::new(
            ctx,
            src.size,
            vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        self.copy_buffer(src, &readback, src.size)?;
        readback.read_all()
    }

    fn copy_buffer(&self, src: &GpuBuffer, dst: &GpuBuffer, size: vk::DeviceSize) -> Result<()> {
        self.one_time(|cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            unsafe {
                self.device.cmd_copy_buffer(
                    cmd,
                    src.buffer,
                    dst.buffer,
                    std::slice::from_ref(&region),
                )
            };
            Ok(())
        })
    }

    /// Sampled RGBA8 texture. The pixels go through a linear staging image
    /// written row by row at the driver's row pitch.
    pub fn upload_texture_2d(&self, ctx: &DeviceContext, img: &Rgba8Image) -> Result<GpuImage> {
        let extent = vk::Extent2D {
            width: img.width,
            height: img.height,
        };
        let format = vk::Format::R8G8B8A8_UNORM;

        let mut staging = GpuImage::new(ctx, &ImageDesc::linear_staging(extent, format))
            .context("texture staging image")?;
        let row_pitch = staging.subresource_layout().row_pitch as usize;
        let mut copied = Ok(());
        staging.with_mapped(|dst| {
            copied = copy_rows_with_pitch(
                &img.pixels,
                img.row_bytes(),
                img.height as usize,
                row_pitch,
                dst,
            );
        })?;
        copied?;

        let mut texture = GpuImage::new(ctx, &ImageDesc::sampled_2d(extent, format))?;
        self.one_time(|cmd| {
            staging.transition_to(cmd, L::Preinitialized, L::TransferSrc)?;
            texture.transition_to(cmd, L::Undefined, L::TransferDst)?;
            let layers = vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            };
            let region = vk::ImageCopy {
                src_subresource: layers,
                src_offset: vk::Offset3D::default(),
                dst_subresource: layers,
                dst_offset: vk::Offset3D::default(),
                extent: vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                },
            };
            unsafe {
                self.device.cmd_copy_image(
                    cmd,
                    staging.image,
                    L::TransferSrc.vk_layout(),
                    texture.image,
                    L::TransferDst.vk_layout(),
                    std::slice::from_ref(&region),
                )
            };
            texture.transition_to(cmd, L::TransferDst, L::ShaderReadOnly)
        })?;

        texture.create_view(vk::ImageViewType::TYPE_2D)?;
        texture.create_sampler(ctx)?;
        debug!(
            "vk: texture {}x{} uploaded (row pitch {})",
            img.width, img.height, row_pitch
        );
        Ok(texture)
    }

    /// Cube image with every face and mip level of `asset`, a cube view and
    /// a sampler.
    pub fn upload_cubemap(&self, ctx: &DeviceContext, asset: &CubemapAsset) -> Result<GpuImage> {
        let regions = cubemap_regions(asset)?;
        let staging = GpuBuffer::staging(ctx, &asset.data).context("cubemap staging")?;

        let desc = ImageDesc::cube(
            asset.width,
            texel_format_to_vk(asset.format),
            asset.mip_levels,
        );
        let mut cube = GpuImage::new(ctx, &desc)?;
        self.one_time(|cmd| {
            cube.transition_to(cmd, L::Undefined, L::TransferDst)?;
            unsafe {
                self.device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.buffer,
                    cube.image,
                    L::TransferDst.vk_layout(),
                    &regions,
                )
            };
            cube.transition_to(cmd, L::TransferDst, L::ShaderReadOnly)
        })?;

        cube.create_view(vk::ImageViewType::CUBE)?;
        cube.create_sampler(ctx)?;
        debug!(
            "vk: cubemap {}x{} {:?}, {} regions",
            asset.width,
            asset.height,
            asset.format,
            regions.len()
        );
        Ok(cube)
    }

    /// Depth attachment with its view, already in the attachment layout.
    pub fn create_depth(
        &self,
        ctx: &DeviceContext,
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> Result<GpuImage> {
        let mut depth = GpuImage::new(ctx, &ImageDesc::depth(extent, format))?;
        depth.create_view(vk::ImageViewType::TYPE_2D)?;
        self.one_time(|cmd| depth.transition_to(cmd, L::Undefined, L::DepthAttachment))?;
        Ok(depth)
    }
}

impl Drop for Uploader {
    fn drop(&mut self) {
        unsafe { self.device.destroy_command_pool(self.pool, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_assets::MipLevel;

    #[test]
    fn rows_land_at_row_pitch() {
        // 3 rows of 2 RGBA8 texels, pitch padded by 8 bytes
        let row_bytes = 8;
        let pitch = 16;
        let src: Vec<u8> = (0..24).collect();
        let mut dst = vec![0xEE; pitch * 3];
        copy_rows_with_pitch(&src, row_bytes, 3, pitch, &mut dst).expect("copy");

        for i in 0..3 {
            assert_eq!(&dst[i * pitch..i * pitch + row_bytes], &src[i * 8..i * 8 + 8]);
            // padding is never written
            assert!(dst[i * pitch + row_bytes..(i + 1) * pitch]
                .iter()
                .all(|&b| b == 0xEE));
        }
    }

    #[test]
    fn tight_pitch_is_a_flat_copy() {
        let src: Vec<u8> = (0..32).collect();
        let mut dst = vec![0; 32];
        copy_rows_with_pitch(&src, 8, 4, 8, &mut dst).expect("copy");
        assert_eq!(dst, src);
    }

    #[test]
    fn short_buffers_are_rejected() {
        let mut dst = vec![0; 10];
        assert!(copy_rows_with_pitch(&[0; 16], 8, 2, 16, &mut dst).is_err());
        assert!(copy_rows_with_pitch(&[0; 4], 8, 2, 8, &mut [0; 16]).is_err());
        assert!(copy_rows_with_pitch(&[0; 16], 8, 2, 4, &mut [0; 16]).is_err());
    }

    fn two_level_cube() -> CubemapAsset {
        let mut levels = Vec::new();
        let mut offset = 0;
        for _ in 0..CUBE_FACES {
            let mut chain = Vec::new();
            for (w, size) in [(4u32, 64usize), (2, 16)] {
                chain.push(MipLevel {
                    offset,
                    size,
                    width: w,
                    height: w,
                });
                offset += size;
            }
            levels.push(chain);
        }
        CubemapAsset {
            width: 4,
            height: 4,
            format: TexelFormat::Rgba8Unorm,
            mip_levels: 2,
            data: vec![0; offset],
            levels,
        }
    }

    #[test]
    fn cubemap_regions_walk_faces_then_levels() {
        let regions = cubemap_regions(&two_level_cube()).expect("regions");
        assert_eq!(regions.len(), 12);

        let mut expected = 0u64;
        for (i, r) in regions.iter().enumerate() {
            let face = (i / 2) as u32;
            let level = (i % 2) as u32;
            assert_eq!(r.image_subresource.base_array_layer, face);
            assert_eq!(r.image_subresource.mip_level, level);
            assert_eq!(r.image_subresource.layer_count, 1);
            assert_eq!(r.buffer_offset, expected);
            assert_eq!(r.image_extent.width, 4 >> level);
            expected += if level == 0 { 64 } else { 16 };
        }
    }

    #[test]
    fn cubemap_regions_reject_overruns() {
        let mut asset = two_level_cube();
        asset.data.truncate(100);
        assert!(cubemap_regions(&asset).is_err());
        asset.levels[5].pop();
        asset.data.resize(6 * 80, 0);
        assert!(cubemap_regions(&asset).is_err());
    }

    #[test]
    fn cubemap_regions_reject_non_square_faces() {
        let mut asset = two_level_cube();
        asset.height = 2;
        assert!(cubemap_regions(&asset).is_err());
    }

    #[test]
    fn texel_formats_map_to_vulkan() {
        assert_eq!(
            texel_format_to_vk(TexelFormat::Rgba32Float),
            vk::Format::R32G32B32A32_SFLOAT
        );
        assert_eq!(
            texel_format_to_vk(TexelFormat::Rgba8Unorm),
            vk::Format::R8G8B8A8_UNORM
        );
    }
}
