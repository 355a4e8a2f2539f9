// SPDX-License-Identifier: CEPL-1.0
//! std140 uniform blocks and the per-image ring they are written into.
use crate::device::DeviceContext;
use crate::memory::{align_up, GpuBuffer};
use anyhow::{anyhow, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use prism_math::glam::{Mat4, Vec3};
use prism_render::{FrameParams, Material, PointLight};

/// Binding 0: transforms and eye position.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SceneUbo {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub cam_position: [f32; 3],
    _pad: f32,
}

impl SceneUbo {
    pub fn new(model: Mat4, view: Mat4, projection: Mat4, cam_position: Vec3) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            projection: projection.to_cols_array_2d(),
            cam_position: cam_position.to_array(),
            _pad: 0.0,
        }
    }
}

/// Binding 4.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct MaterialUbo {
    pub roughness: f32,
    pub metallic: f32,
    pub gloss: f32,
    pub r: f32,
    pub g: f32,
    pub b: f32,
    _pad: [f32; 2],
}

impl From<&Material> for MaterialUbo {
    fn from(m: &Material) -> Self {
        Self {
            roughness: m.roughness,
            metallic: m.metallic,
            gloss: m.gloss,
            r: m.albedo.x,
            g: m.albedo.y,
            b: m.albedo.z,
            _pad: [0.0; 2],
        }
    }
}

/// Binding 5.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct PointLightUbo {
    pub position: [f32; 4],
    pub color: [f32; 3],
    pub radius: f32,
    pub enable: i32,
    _pad: [i32; 3],
}

impl From<&PointLight> for PointLightUbo {
    fn from(l: &PointLight) -> Self {
        Self {
            position: l.position.to_array(),
            color: l.color.to_array(),
            radius: l.radius,
            enable: l.enabled as i32,
            _pad: [0; 3],
        }
    }
}

/// Persistently mapped buffer with one aligned slot per swapchain image.
pub struct UniformRing {
    buffer: GpuBuffer,
    block_size: vk::DeviceSize,
    stride: vk::DeviceSize,
    slots: usize,
}

impl UniformRing {
    pub fn new(
        ctx: &DeviceContext,
        block_size: vk::DeviceSize,
        slots: usize,
    ) -> Result<Self> {
        let stride = align_up(
            block_size,
            ctx.limits.min_uniform_buffer_offset_alignment,
        );
        let mut buffer = GpuBuffer::new(
            ctx,
            stride * slots as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        buffer.map_persistent()?;
        Ok(Self {
            buffer,
            block_size,
            stride,
            slots,
        })
    }

    pub fn for_block<T: Pod>(ctx: &DeviceContext, slots: usize) -> Result<Self> {
        Self::new(ctx, std::mem::size_of::<T>() as vk::DeviceSize, slots)
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Byte offset of `slot`, as passed to `vkCmdBindDescriptorSets`.
    pub fn offset(&self, slot: usize) -> u32 {
        (self.stride * slot as vk::DeviceSize) as u32
    }

    pub fn write<T: Pod>(&mut self, slot: usize, block: &T) -> Result<()> {
        if slot >= self.slots {
            return Err(anyhow!("uniform slot {slot} out of {}", self.slots));
        }
        let offset = self.offset(slot) as vk::DeviceSize;
        self.buffer.write(offset, bytemuck::bytes_of(block))
    }

    /// Descriptor range covering one slot.
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer.buffer,
            offset: 0,
            range: self.block_size,
        }
    }
}

/// The four rings behind bindings 0, 4 and 5 of both descriptor sets.
pub struct FrameUniforms {
    pub scene: UniformRing,
    pub skybox: UniformRing,
    pub material: UniformRing,
    pub light: UniformRing,
}

impl FrameUniforms {
    pub fn new(ctx: &DeviceContext, slots: usize) -> Result<Self> {
        Ok(Self {
            scene: UniformRing::for_block::<SceneUbo>(ctx, slots)?,
            skybox: UniformRing::for_block::<SceneUbo>(ctx, slots)?,
            material: UniformRing::for_block::<MaterialUbo>(ctx, slots)?,
            light: UniformRing::for_block::<PointLightUbo>(ctx, slots)?,
        })
    }

    pub fn slots(&self) -> usize {
        self.scene.slots()
    }

    pub fn write_frame(&mut self, slot: usize, frame: &FrameParams) -> Result<()> {
        let blocks = FrameBlocks::from(frame);
        self.scene.write(slot, &blocks.scene)?;
        self.skybox.write(slot, &blocks.skybox)?;
        self.material.write(slot, &blocks.material)?;
        self.light.write(slot, &blocks.light)
    }

    /// Dynamic offsets for bindings 0, 4, 5, in binding order.
    pub fn dynamic_offsets(&self, slot: usize) -> [u32; 3] {
        [
            self.scene.offset(slot),
            self.material.offset(slot),
            self.light.offset(slot),
        ]
    }
}

/// Host-side copies of every block written for one frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameBlocks {
    pub scene: SceneUbo,
    pub skybox: SceneUbo,
    pub material: MaterialUbo,
    pub light: PointLightUbo,
}

impl From<&FrameParams> for FrameBlocks {
    fn from(frame: &FrameParams) -> Self {
        Self {
            scene: SceneUbo::new(
                frame.model,
                frame.view,
                frame.projection,
                frame.camera_position,
            ),
            skybox: SceneUbo::new(
                frame.skybox_model(),
                frame.view,
                frame.projection,
                frame.camera_position,
            ),
            material: MaterialUbo::from(&frame.material),
            light: PointLightUbo::from(&frame.light),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_math::glam::Vec4;
    use std::mem::{offset_of, size_of};

    #[test]
    fn std140_sizes_and_offsets() {
        assert_eq!(size_of::<SceneUbo>(), 208);
        assert_eq!(offset_of!(SceneUbo, view), 64);
        assert_eq!(offset_of!(SceneUbo, projection), 128);
        assert_eq!(offset_of!(SceneUbo, cam_position), 192);

        assert_eq!(size_of::<MaterialUbo>(), 32);
        assert_eq!(offset_of!(MaterialUbo, b), 20);

        assert_eq!(size_of::<PointLightUbo>(), 48);
        assert_eq!(offset_of!(PointLightUbo, color), 16);
        assert_eq!(offset_of!(PointLightUbo, radius), 28);
        assert_eq!(offset_of!(PointLightUbo, enable), 32);
    }

    #[test]
    fn frame_blocks_carry_scene_values() {
        let frame = FrameParams {
            view: Mat4::from_translation(Vec3::new(0.0, 0.0, -3.0)),
            camera_position: Vec3::new(2.0, 2.0, 2.0),
            light: PointLight::orbiting(0.0, true),
            ..FrameParams::default()
        };
        let b = FrameBlocks::from(&frame);
        assert_eq!(b.scene.cam_position, [2.0, 2.0, 2.0]);
        assert_eq!(b.scene.model, frame.model.to_cols_array_2d());
        // skybox drops the view translation
        assert_eq!(b.skybox.model[3], [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(b.skybox.view, b.scene.view);
        assert_eq!(b.material.roughness, 0.5);
        assert_eq!((b.material.r, b.material.g, b.material.b), (1.0, 1.0, 1.0));
        assert_eq!(b.light.enable, 1);
        assert_eq!(b.light.position, Vec4::new(0.0, 3.0, 3.0, 0.0).to_array());
        assert_eq!(b.light.radius, 100.0);
    }

    #[test]
    fn disabled_light_encodes_zero() {
        let ubo = PointLightUbo::from(&PointLight::default());
        assert_eq!(ubo.enable, 0);
        assert_eq!(ubo.color, [1.0, 1.0, 1.0]);
    }
}
