// SPDX-License-Identifier: CEPL-1.0
use crate::layout::ImageLayoutState;
use crate::shader::ShaderPair;
use anyhow::{anyhow, Context, Result};
use ash::vk;
use prism_math::Vertex;
use std::ffi::CStr;

const ENTRY: &CStr = c"main";

/// Color + depth attachments, one subpass.
pub struct RenderPass {
    device: ash::Device,
    pub handle: vk::RenderPass,
}

impl RenderPass {
    pub fn new(device: &ash::Device, color: vk::Format, depth: vk::Format) -> Result<Self> {
        let attachments = [
            vk::AttachmentDescription {
                format: color,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: ImageLayoutState::Undefined.vk_layout(),
                final_layout: ImageLayoutState::PresentSource.vk_layout(),
                ..Default::default()
            },
            vk::AttachmentDescription {
                format: depth,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: ImageLayoutState::Undefined.vk_layout(),
                final_layout: ImageLayoutState::DepthAttachment.vk_layout(),
                ..Default::default()
            },
        ];
        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &color_ref,
            p_depth_stencil_attachment: &depth_ref,
            ..Default::default()
        };
        let dependency = external_dependency();
        let ci = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: attachments.len() as u32,
            p_attachments: attachments.as_ptr(),
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: 1,
            p_dependencies: &dependency,
            ..Default::default()
        };
        let handle =
            unsafe { device.create_render_pass(&ci, None) }.context("create_render_pass")?;
        Ok(Self {
            device: device.clone(),
            handle,
        })
    }
}

/// Orders this frame's attachment writes after the previous frame's. Frames in
/// flight share one depth image, so the depth clear must wait for the prior
/// frame's fragment tests as well as its color output.
pub fn external_dependency() -> vk::SubpassDependency {
    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: stages,
        dst_stage_mask: stages,
        src_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ
            | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ..Default::default()
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.destroy_render_pass(self.handle, None) };
    }
}

/// Immutable description of one graphics pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineTemplate {
    pub vertex: vk::ShaderModule,
    pub fragment: vk::ShaderModule,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
    pub flags: vk::PipelineCreateFlags,
    /// Creation hint only; the derived pipeline does not depend on it.
    pub base: vk::Pipeline,
}

impl PipelineTemplate {
    /// Scene pipeline state: front-face culling with clockwise winding,
    /// depth LESS, and permission for other pipelines to derive from it.
    pub fn scene(
        shaders: (vk::ShaderModule, vk::ShaderModule),
        layout: vk::PipelineLayout,
        render_pass: vk::RenderPass,
    ) -> Self {
        Self {
            vertex: shaders.0,
            fragment: shaders.1,
            layout,
            render_pass,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::FRONT,
            front_face: vk::FrontFace::CLOCKWISE,
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::LESS,
            flags: vk::PipelineCreateFlags::ALLOW_DERIVATIVES,
            base: vk::Pipeline::null(),
        }
    }

    /// Copy of this template marked as a derivative of `base`, with its own
    /// shaders and rasterizer winding.
    pub fn derive(
        &self,
        base: vk::Pipeline,
        shaders: (vk::ShaderModule, vk::ShaderModule),
        cull_mode: vk::CullModeFlags,
        front_face: vk::FrontFace,
    ) -> Self {
        Self {
            vertex: shaders.0,
            fragment: shaders.1,
            cull_mode,
            front_face,
            flags: vk::PipelineCreateFlags::DERIVATIVE,
            base,
            ..*self
        }
    }

    pub fn build(&self, device: &ash::Device) -> Result<vk::Pipeline> {
        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: self.vertex,
                p_name: ENTRY.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: self.fragment,
                p_name: ENTRY.as_ptr(),
                ..Default::default()
            },
        ];

        let binding = vertex_binding();
        let attributes = vertex_attributes();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: 1,
            p_vertex_binding_descriptions: &binding,
            vertex_attribute_description_count: attributes.len() as u32,
            p_vertex_attribute_descriptions: attributes.as_ptr(),
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: self.topology,
            ..Default::default()
        };
        let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: dyn_states.len() as u32,
            p_dynamic_states: dyn_states.as_ptr(),
            ..Default::default()
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: self.polygon_mode,
            cull_mode: self.cull_mode,
            front_face: self.front_face,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
            depth_test_enable: self.depth_test.into(),
            depth_write_enable: self.depth_write.into(),
            depth_compare_op: self.depth_compare,
            ..Default::default()
        };
        let color_blend_att = vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::R
                | vk::ColorComponentFlags::G
                | vk::ColorComponentFlags::B
                | vk::ColorComponentFlags::A,
            blend_enable: vk::FALSE,
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color_blend_att,
            ..Default::default()
        };

        let info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            flags: self.flags,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_depth_stencil_state: &depth_stencil,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout: self.layout,
            render_pass: self.render_pass,
            subpass: 0,
            base_pipeline_handle: self.base,
            base_pipeline_index: -1,
            ..Default::default()
        };

        let pipelines = unsafe {
            device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&info),
                None,
            )
        }
        .map_err(|(_, err)| anyhow!("create_graphics_pipelines failed: {err:?}"))?;
        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("create_graphics_pipelines returned nothing"))
    }
}

pub fn vertex_binding() -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription {
        binding: 0,
        stride: Vertex::STRIDE,
        input_rate: vk::VertexInputRate::VERTEX,
    }
}

/// position (0), normal (1), uv (2).
pub fn vertex_attributes() -> [vk::VertexInputAttributeDescription; 3] {
    [
        vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 0,
        },
        vk::VertexInputAttributeDescription {
            location: 1,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: Vertex::NORMAL_OFFSET,
        },
        vk::VertexInputAttributeDescription {
            location: 2,
            binding: 0,
            format: vk::Format::R32G32_SFLOAT,
            offset: Vertex::UV_OFFSET,
        },
    ]
}

/// Pipeline layout plus the scene pipeline and the skybox derived from it.
pub struct Pipelines {
    device: ash::Device,
    pub layout: vk::PipelineLayout,
    pub scene: vk::Pipeline,
    pub skybox: vk::Pipeline,
    pub scene_template: PipelineTemplate,
    pub skybox_template: PipelineTemplate,
}

impl Pipelines {
    pub fn new(
        device: &ash::Device,
        set_layout: vk::DescriptorSetLayout,
        render_pass: vk::RenderPass,
        scene_shaders: &ShaderPair,
        skybox_shaders: &ShaderPair,
    ) -> Result<Self> {
        let lci = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: 1,
            p_set_layouts: &set_layout,
            ..Default::default()
        };
        let layout = unsafe { device.create_pipeline_layout(&lci, None) }
            .context("create_pipeline_layout")?;

        let scene_template = PipelineTemplate::scene(
            (scene_shaders.vertex.handle, scene_shaders.fragment.handle),
            layout,
            render_pass,
        );
        let mut out = Self {
            device: device.clone(),
            layout,
            scene: vk::Pipeline::null(),
            skybox: vk::Pipeline::null(),
            scene_template,
            skybox_template: scene_template,
        };
        out.scene = scene_template.build(device).context("scene pipeline")?;

        out.skybox_template = scene_template.derive(
            out.scene,
            (skybox_shaders.vertex.handle, skybox_shaders.fragment.handle),
            vk::CullModeFlags::FRONT,
            vk::FrontFace::COUNTER_CLOCKWISE,
        );
        out.skybox = out
            .skybox_template
            .build(device)
            .context("skybox pipeline")?;
        Ok(out)
    }
}

impl Drop for Pipelines {
    fn drop(&mut self) {
        unsafe {
            if self.skybox != vk::Pipeline::null() {
                self.device.destroy_pipeline(self.skybox, None);
            }
            if self.scene != vk::Pipeline::null() {
                self.device.destroy_pipeline(self.scene, None);
            }
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn module(raw: u64) -> vk::ShaderModule {
        vk::ShaderModule::from_raw(raw)
    }

    #[test]
    fn depth_writes_are_ordered_across_frames() {
        let dep = external_dependency();
        assert_eq!(dep.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dep.dst_subpass, 0);
        let depth_stages = vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        for stages in [dep.src_stage_mask, dep.dst_stage_mask] {
            assert!(stages.contains(depth_stages));
            assert!(stages.contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT));
        }
        assert!(dep
            .src_access_mask
            .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
        assert!(dep.dst_access_mask.contains(
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
                | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        ));
    }

    #[test]
    fn skybox_shares_layout_and_render_pass() {
        let layout = vk::PipelineLayout::from_raw(0x10);
        let pass = vk::RenderPass::from_raw(0x20);
        let base = vk::Pipeline::from_raw(0x30);
        let scene = PipelineTemplate::scene((module(1), module(2)), layout, pass);
        let skybox = scene.derive(
            base,
            (module(3), module(4)),
            vk::CullModeFlags::FRONT,
            vk::FrontFace::COUNTER_CLOCKWISE,
        );

        assert_eq!(skybox.layout, scene.layout);
        assert_eq!(skybox.render_pass, scene.render_pass);
        assert_ne!(skybox.front_face, scene.front_face);
        assert_ne!((skybox.vertex, skybox.fragment), (scene.vertex, scene.fragment));
        assert_eq!(skybox.base, base);
        assert_eq!(skybox.flags, vk::PipelineCreateFlags::DERIVATIVE);
        assert_eq!(scene.flags, vk::PipelineCreateFlags::ALLOW_DERIVATIVES);

        // all other state is identical
        let normalized = PipelineTemplate {
            vertex: scene.vertex,
            fragment: scene.fragment,
            cull_mode: scene.cull_mode,
            front_face: scene.front_face,
            flags: scene.flags,
            base: scene.base,
            ..skybox
        };
        assert_eq!(normalized, scene);
    }

    #[test]
    fn scene_fixed_function_state() {
        let t = PipelineTemplate::scene(
            (module(1), module(2)),
            vk::PipelineLayout::null(),
            vk::RenderPass::null(),
        );
        assert_eq!(t.cull_mode, vk::CullModeFlags::FRONT);
        assert_eq!(t.front_face, vk::FrontFace::CLOCKWISE);
        assert_eq!(t.depth_compare, vk::CompareOp::LESS);
        assert!(t.depth_test && t.depth_write);
        assert_eq!(t.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(t.base, vk::Pipeline::null());
    }

    #[test]
    fn vertex_layout_matches_vertex_struct() {
        let b = vertex_binding();
        assert_eq!(b.stride, 32);
        let a = vertex_attributes();
        assert_eq!(
            a.iter().map(|a| (a.location, a.offset)).collect::<Vec<_>>(),
            [(0, 0), (1, 12), (2, 24)]
        );
        assert_eq!(a[2].format, vk::Format::R32G32_SFLOAT);
    }
}
