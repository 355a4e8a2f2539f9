// SPDX-License-Identifier: CEPL-1.0
use crate::device::DeviceContext;
use crate::memory::GpuBuffer;
use crate::upload::Uploader;
use anyhow::{anyhow, Result};
use ash::vk;
use prism_math::GeometryData;

/// Device-local vertex and index buffers for one indexed draw.
pub struct GpuMesh {
    pub vertices: GpuBuffer,
    pub indices: GpuBuffer,
    pub index_count: u32,
}

impl GpuMesh {
    pub fn upload(ctx: &DeviceContext, uploader: &Uploader, geometry: &GeometryData) -> Result<Self> {
        if geometry.vertices.is_empty() || geometry.indices.is_empty() {
            return Err(anyhow!("cannot upload empty geometry"));
        }
        let vertices = uploader.upload_buffer(
            ctx,
            bytemuck::cast_slice(&geometry.vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let indices = uploader.upload_buffer(
            ctx,
            bytemuck::cast_slice(&geometry.indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;
        Ok(Self {
            vertices,
            indices,
            index_count: geometry.indices.len() as u32,
        })
    }

    pub(crate) unsafe fn draw(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertices.buffer], &[0]);
        device.cmd_bind_index_buffer(cmd, self.indices.buffer, 0, vk::IndexType::UINT32);
        device.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
    }
}
