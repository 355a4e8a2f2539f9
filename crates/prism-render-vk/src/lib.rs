// SPDX-License-Identifier: CEPL-1.0
pub mod descriptors;
pub mod device;
pub mod frame;
pub mod image;
pub mod layout;
pub mod memory;
pub mod mesh;
pub mod pipeline;
pub mod resize;
pub mod shader;
pub mod swapchain;
pub mod uniforms;
pub mod upload;

use anyhow::{anyhow, Context, Result};
use ash::vk;
use prism_render::{FrameParams, RenderOptions, RenderSize, Renderer, SceneDesc};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};

pub use descriptors::{DescriptorState, SceneTextures};
pub use device::{ContextOptions, DeviceContext, DeviceError, Surface};
pub use frame::{FrameCommands, FrameOutcome, FrameSync, RecordInputs};
pub use image::{GpuImage, ImageDesc};
pub use layout::{ImageLayoutState, LayoutError, LayoutTracker, LayoutTransition};
pub use memory::{GpuBuffer, MemoryError};
pub use mesh::GpuMesh;
pub use pipeline::{PipelineTemplate, Pipelines, RenderPass};
pub use resize::{ResizeController, ResizeState, SwapchainRebuild};
pub use shader::{CompileError, ShaderCompiler, ShaderModule, ShaderPair, ShaderStage};
pub use swapchain::{Framebuffers, Swapchain, SwapchainPlan};
pub use uniforms::{FrameUniforms, MaterialUbo, PointLightUbo, SceneUbo, UniformRing};
pub use upload::Uploader;

/// Shader pair names looked up under `SceneDesc::shader_dir`.
pub const SCENE_SHADER: &str = "test";
pub const SKYBOX_SHADER: &str = "skybox";

// Fields drop top to bottom. Everything created from the device sits above
// `surface` and `ctx`, and the extent-dependent objects come first.
pub struct VkRenderer {
    // extent-dependent; None while released
    commands: FrameCommands,
    sync: FrameSync,
    framebuffers: Option<Framebuffers>,
    depth: Option<GpuImage>,
    pipelines: Option<Pipelines>,
    render_pass: Option<RenderPass>,
    swapchain: Swapchain,

    // scene lifetime
    descriptors: DescriptorState,
    uniforms: FrameUniforms,
    mesh: GpuMesh,
    skybox_mesh: GpuMesh,
    radiance: GpuImage,
    irradiance: GpuImage,
    skybox: GpuImage,
    albedo: Option<GpuImage>,
    scene_shaders: ShaderPair,
    skybox_shaders: ShaderPair,
    uploader: Uploader,

    resize: ResizeController,
    paused: bool,
    clear_color: [f32; 4],
    vsync: bool,
    depth_format: vk::Format,

    surface: Surface,
    ctx: DeviceContext,
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        // Nothing may be destroyed while a submission still references it.
        if let Err(e) = self.sync.wait_all() {
            warn!("vk: teardown wait failed: {e:#}");
        }
        self.ctx.wait_idle();
        debug!("vk: renderer teardown");
    }
}

impl VkRenderer {
    // STRICT ORDER (startup):
    // 1) instance, surface, device, queues
    // 2) one-time upload pool, then meshes and cubemaps
    // 3) shaders
    // 4) swapchain
    // 5) uniform ring and descriptor sets, one slot per swapchain image
    // 6) render pass, pipelines, depth, framebuffers; record once
    fn build(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        options: &RenderOptions,
        scene: &SceneDesc,
    ) -> Result<Self> {
        let display_raw = display
            .display_handle()
            .map_err(|e| anyhow!("display handle: {e}"))?
            .as_raw();
        let window_raw = window
            .window_handle()
            .map_err(|e| anyhow!("window handle: {e}"))?
            .as_raw();

        // 1) device
        let (ctx, surface) = DeviceContext::new(
            display_raw,
            Some(window_raw),
            &ContextOptions {
                validation: options.validation,
                pause_on_validation: options.pause_on_validation,
                require_discrete: true,
            },
        )?;
        let surface = surface.context("device context returned no surface")?;

        // 2) static resources
        let uploader = Uploader::new(&ctx)?;
        let mesh = GpuMesh::upload(&ctx, &uploader, &scene.mesh).context("scene mesh")?;
        let skybox_mesh =
            GpuMesh::upload(&ctx, &uploader, &scene.skybox_mesh).context("skybox mesh")?;
        let radiance = uploader
            .upload_cubemap(&ctx, &scene.radiance)
            .context("radiance cubemap")?;
        let irradiance = uploader
            .upload_cubemap(&ctx, &scene.irradiance)
            .context("irradiance cubemap")?;
        let skybox = uploader
            .upload_cubemap(&ctx, &scene.skybox)
            .context("skybox cubemap")?;
        let albedo = match &scene.albedo {
            Some(img) => Some(
                uploader
                    .upload_texture_2d(&ctx, img)
                    .context("albedo texture")?,
            ),
            None => None,
        };

        // 3) shaders
        let compiler = ShaderCompiler::new()?;
        let scene_shaders =
            ShaderPair::load(&compiler, &ctx.device, &scene.shader_dir, SCENE_SHADER)?;
        let skybox_shaders =
            ShaderPair::load(&compiler, &ctx.device, &scene.shader_dir, SKYBOX_SHADER)?;

        // 4) swapchain
        let swapchain = Swapchain::new(&ctx, &surface, size, options.vsync, None)?;
        let image_count = swapchain.image_count();

        // 5) uniforms
        let uniforms = FrameUniforms::new(&ctx, image_count)?;
        let descriptors = DescriptorState::new(&ctx.device)?;
        descriptors.write_uniforms(&uniforms);

        let depth_format = ctx.depth_format()?;
        let commands = FrameCommands::new(&ctx.device, ctx.graphics_family, image_count)?;
        let sync = FrameSync::new(&ctx.device, image_count)?;

        let mut r = Self {
            commands,
            sync,
            framebuffers: None,
            depth: None,
            pipelines: None,
            render_pass: None,
            swapchain,
            descriptors,
            uniforms,
            mesh,
            skybox_mesh,
            radiance,
            irradiance,
            skybox,
            albedo,
            scene_shaders,
            skybox_shaders,
            uploader,
            resize: ResizeController::new(size),
            paused: size.is_zero_area(),
            clear_color: options.clear_color,
            vsync: options.vsync,
            depth_format,
            surface,
            ctx,
        };
        r.descriptors.write_textures(&r.textures());

        // 6) targets + record
        r.build_targets()?;
        r.record()?;
        info!(
            "vk: renderer ready on '{}' ({} images, depth {:?}, albedo {:?})",
            r.ctx.device_name,
            r.swapchain.image_count(),
            r.depth_format,
            r.albedo.as_ref().map(|a| (a.extent.width, a.extent.height))
        );
        Ok(r)
    }

    fn textures(&self) -> SceneTextures<'_> {
        SceneTextures {
            radiance: &self.radiance,
            irradiance: &self.irradiance,
            skybox: &self.skybox,
        }
    }

    /// Render pass, pipelines, depth and framebuffers for the current
    /// swapchain.
    fn build_targets(&mut self) -> Result<()> {
        let device = &self.ctx.device;
        let render_pass = RenderPass::new(device, self.swapchain.format.format, self.depth_format)?;
        let pipelines = Pipelines::new(
            device,
            self.descriptors.layout,
            render_pass.handle,
            &self.scene_shaders,
            &self.skybox_shaders,
        )?;
        let depth =
            self.uploader
                .create_depth(&self.ctx, self.swapchain.extent, self.depth_format)?;
        let framebuffers = Framebuffers::new(
            device,
            render_pass.handle,
            &self.swapchain.views,
            depth.view,
            self.swapchain.extent,
        )?;
        self.render_pass = Some(render_pass);
        self.pipelines = Some(pipelines);
        self.depth = Some(depth);
        self.framebuffers = Some(framebuffers);
        Ok(())
    }

    /// Re-record every per-image command buffer. Callers make sure none is
    /// pending.
    fn record(&self) -> Result<()> {
        let (Some(render_pass), Some(pipelines), Some(framebuffers)) =
            (&self.render_pass, &self.pipelines, &self.framebuffers)
        else {
            return Err(anyhow!("record called while swapchain targets are released"));
        };
        let offsets: Vec<[u32; 3]> = (0..self.commands.buffers.len())
            .map(|i| self.uniforms.dynamic_offsets(i))
            .collect();
        self.commands.record_all(&RecordInputs {
            render_pass: render_pass.handle,
            framebuffers: &framebuffers.handles,
            extent: self.swapchain.extent,
            clear_color: self.clear_color,
            layout: pipelines.layout,
            scene_pipeline: pipelines.scene,
            skybox_pipeline: pipelines.skybox,
            scene_set: self.descriptors.scene_set,
            skybox_set: self.descriptors.skybox_set,
            mesh: &self.mesh,
            skybox_mesh: &self.skybox_mesh,
            dynamic_offsets: &offsets,
        })?;
        debug!("vk: recorded {} command buffers", self.commands.buffers.len());
        Ok(())
    }

    fn recreate(&mut self, size: Option<RenderSize>) -> Result<()> {
        let mut ctl = std::mem::take(&mut self.resize);
        let out = match size {
            Some(size) => ctl.resize(size, self),
            None => ctl.refresh(self),
        };
        self.resize = ctl;
        out.map(|_| ())
    }
}

// STRICT ORDER (recreate):
// 1) wait for both acquire slots, then device_wait_idle
// 2) destroy framebuffers, pipelines, render pass, depth, image views
// 3) new swapchain with the old one as hint; old handle dropped after
// 4) render pass, pipelines, depth, framebuffers
// 5) per-image sync and command buffers sized to the new image count
// 6) re-record
impl SwapchainRebuild for VkRenderer {
    fn wait_idle(&mut self) -> Result<()> {
        self.sync.wait_all()?;
        unsafe { self.ctx.device.device_wait_idle() }.context("device_wait_idle")?;
        Ok(())
    }

    fn release(&mut self) {
        self.framebuffers = None;
        self.pipelines = None;
        self.render_pass = None;
        self.depth = None;
        self.swapchain.release_views();
        self.commands.free();
    }

    fn rebuild(&mut self, size: RenderSize) -> Result<()> {
        let swapchain = Swapchain::new(
            &self.ctx,
            &self.surface,
            size,
            self.vsync,
            Some(&self.swapchain),
        )?;
        self.swapchain = swapchain;

        self.build_targets()?;

        let image_count = self.swapchain.image_count();
        if image_count != self.sync.image_count() {
            self.sync = FrameSync::new(&self.ctx.device, image_count)?;
        }
        self.commands.allocate(image_count)?;
        if image_count > self.uniforms.slots() {
            self.uniforms = FrameUniforms::new(&self.ctx, image_count)?;
            self.descriptors.write_uniforms(&self.uniforms);
        }

        self.record()
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        options: &RenderOptions,
        scene: &SceneDesc,
    ) -> Result<Self> {
        Self::build(window, display, size, options, scene)
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        if size.is_zero_area() {
            if !self.paused {
                info!("vk: resize to {}x{}, paused", size.width, size.height);
            }
            self.paused = true;
            return Ok(());
        }
        if self.paused {
            info!("vk: resize to {}x{}, resumed", size.width, size.height);
        }
        self.paused = false;
        self.recreate(Some(size))
    }

    // STRICT PER-FRAME ORDER:
    // 1) acquire (waits on this slot's previous submission)
    // 2) uniforms for the acquired image, then submit
    // 3) present; a stale surface triggers recreation afterwards
    fn render(&mut self, frame: &FrameParams) -> Result<()> {
        if self.paused || self.resize.state() == ResizeState::Recreating {
            return Ok(());
        }
        let uniforms = &mut self.uniforms;
        let outcome = self.sync.draw(
            &self.swapchain.loader,
            self.swapchain.handle,
            self.ctx.graphics_queue,
            self.ctx.present_queue,
            &self.commands.buffers,
            |img| uniforms.write_frame(img, frame),
        )?;
        match outcome {
            FrameOutcome::Presented => Ok(()),
            FrameOutcome::Skipped | FrameOutcome::NeedsRecreate => {
                debug!("vk: {outcome:?}, recreating swapchain");
                self.recreate(None)
            }
        }
    }

    /// While paused only the preference is stored; the resize that ends the
    /// pause rebuilds with it.
    fn set_vsync(&mut self, on: bool) -> Result<()> {
        if self.vsync == on {
            return Ok(());
        }
        self.vsync = on;
        info!("vk: vsync {}", if on { "on" } else { "off" });
        if self.paused {
            return Ok(());
        }
        self.recreate(None)
    }

    fn extent(&self) -> RenderSize {
        RenderSize {
            width: self.swapchain.extent.width,
            height: self.swapchain.extent.height,
        }
    }
}
