// SPDX-License-Identifier: CEPL-1.0
use crate::image::GpuImage;
use crate::uniforms::{FrameUniforms, UniformRing};
use anyhow::{Context, Result};
use ash::vk;

pub const SCENE_UBO: u32 = 0;
pub const RADIANCE: u32 = 1;
pub const IRRADIANCE: u32 = 2;
pub const SKYBOX: u32 = 3;
pub const MATERIAL_UBO: u32 = 4;
pub const LIGHT_UBO: u32 = 5;

pub const SET_COUNT: u32 = 2;

/// The six bindings shared by the scene and skybox sets.
pub fn layout_bindings() -> [vk::DescriptorSetLayoutBinding<'static>; 6] {
    let ubo = |binding, stage_flags| vk::DescriptorSetLayoutBinding {
        binding,
        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        descriptor_count: 1,
        stage_flags,
        ..Default::default()
    };
    let sampler = |binding| vk::DescriptorSetLayoutBinding {
        binding,
        descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        descriptor_count: 1,
        stage_flags: vk::ShaderStageFlags::FRAGMENT,
        ..Default::default()
    };
    [
        ubo(
            SCENE_UBO,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        ),
        sampler(RADIANCE),
        sampler(IRRADIANCE),
        sampler(SKYBOX),
        ubo(MATERIAL_UBO, vk::ShaderStageFlags::FRAGMENT),
        ubo(LIGHT_UBO, vk::ShaderStageFlags::FRAGMENT),
    ]
}

/// Pool sizes for exactly [`SET_COUNT`] sets of [`layout_bindings`].
pub fn pool_sizes() -> Vec<vk::DescriptorPoolSize> {
    let per_set = |ty| {
        layout_bindings()
            .iter()
            .filter(|b| b.descriptor_type == ty)
            .map(|b| b.descriptor_count)
            .sum::<u32>()
            * SET_COUNT
    };
    [
        vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    ]
    .into_iter()
    .map(|ty| vk::DescriptorPoolSize {
        ty,
        descriptor_count: per_set(ty),
    })
    .collect()
}

/// Cubemaps sampled by both sets.
pub struct SceneTextures<'a> {
    pub radiance: &'a GpuImage,
    pub irradiance: &'a GpuImage,
    pub skybox: &'a GpuImage,
}

/// Set layout, pool, and the scene/skybox sets.
pub struct DescriptorState {
    device: ash::Device,
    pub layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    pub scene_set: vk::DescriptorSet,
    pub skybox_set: vk::DescriptorSet,
}

impl DescriptorState {
    pub fn new(device: &ash::Device) -> Result<Self> {
        let bindings = layout_bindings();
        let lci = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: bindings.len() as u32,
            p_bindings: bindings.as_ptr(),
            ..Default::default()
        };
        let layout = unsafe { device.create_descriptor_set_layout(&lci, None) }
            .context("create_descriptor_set_layout")?;
        let mut out = Self {
            device: device.clone(),
            layout,
            pool: vk::DescriptorPool::null(),
            scene_set: vk::DescriptorSet::null(),
            skybox_set: vk::DescriptorSet::null(),
        };

        let sizes = pool_sizes();
        let pci = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: SET_COUNT,
            pool_size_count: sizes.len() as u32,
            p_pool_sizes: sizes.as_ptr(),
            ..Default::default()
        };
        out.pool = unsafe { device.create_descriptor_pool(&pci, None) }
            .context("create_descriptor_pool")?;

        let layouts = [layout; SET_COUNT as usize];
        let ai = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: out.pool,
            descriptor_set_count: layouts.len() as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        let sets = unsafe { device.allocate_descriptor_sets(&ai) }
            .context("allocate_descriptor_sets")?;
        out.scene_set = sets[0];
        out.skybox_set = sets[1];
        Ok(out)
    }

    /// Point both sets at the cubemaps. The skybox set differs only in
    /// which ring backs binding 0.
    pub fn write_textures(&self, textures: &SceneTextures<'_>) {
        let images = [
            (RADIANCE, textures.radiance.descriptor_info()),
            (IRRADIANCE, textures.irradiance.descriptor_info()),
            (SKYBOX, textures.skybox.descriptor_info()),
        ];
        let mut writes = Vec::with_capacity(images.len() * 2);
        for set in [self.scene_set, self.skybox_set] {
            for (binding, info) in &images {
                writes.push(vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: set,
                    dst_binding: *binding,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    p_image_info: info,
                    ..Default::default()
                });
            }
        }
        unsafe { self.device.update_descriptor_sets(&writes, &[]) };
    }

    pub fn write_uniforms(&self, uniforms: &FrameUniforms) {
        let infos = |scene: &UniformRing| {
            [
                (SCENE_UBO, scene.descriptor_info()),
                (MATERIAL_UBO, uniforms.material.descriptor_info()),
                (LIGHT_UBO, uniforms.light.descriptor_info()),
            ]
        };
        let scene = infos(&uniforms.scene);
        let skybox = infos(&uniforms.skybox);

        let mut writes = Vec::with_capacity(6);
        for (set, blocks) in [(self.scene_set, &scene), (self.skybox_set, &skybox)] {
            for (binding, info) in blocks {
                writes.push(vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: set,
                    dst_binding: *binding,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                    p_buffer_info: info,
                    ..Default::default()
                });
            }
        }
        unsafe { self.device.update_descriptor_sets(&writes, &[]) };
    }
}

impl Drop for DescriptorState {
    fn drop(&mut self) {
        unsafe {
            // sets are freed with the pool
            self.device.destroy_descriptor_pool(self.pool, None);
            self.device
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings_are_in_order_with_expected_types() {
        let b = layout_bindings();
        let numbers: Vec<u32> = b.iter().map(|b| b.binding).collect();
        assert_eq!(numbers, [0, 1, 2, 3, 4, 5]);
        for i in [1, 2, 3] {
            assert_eq!(b[i].descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
            assert_eq!(b[i].stage_flags, vk::ShaderStageFlags::FRAGMENT);
        }
        for i in [0, 4, 5] {
            assert_eq!(b[i].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC);
        }
        assert!(b[0].stage_flags.contains(vk::ShaderStageFlags::VERTEX));
        assert!(!b[4].stage_flags.contains(vk::ShaderStageFlags::VERTEX));
    }

    #[test]
    fn pool_holds_exactly_two_sets() {
        let sizes = pool_sizes();
        assert_eq!(sizes.len(), 2);
        for s in &sizes {
            assert_eq!(s.descriptor_count, 6, "{:?}", s.ty);
        }
    }
}
