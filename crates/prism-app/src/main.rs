// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;
mod controls;
mod scene;

use anyhow::{anyhow, Result};
use clap::Parser;
use config::{load_cfg, AppCfg, Args};
use prism_core::{init_tracing, FrameClock};
use prism_math::Camera;
use prism_platform::KeyState;
use prism_render::{FrameParams, Material, PointLight, RenderSize, Renderer, SceneDesc};
use prism_render_vk::VkRenderer;
use tracing::{error, info};

use prism_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

struct App {
    cfg: AppCfg,
    scene: Option<SceneDesc>,
    window: Option<Window>,
    renderer: Option<VkRenderer>,
    render_size: RenderSize,

    camera: Camera,
    material: Material,
    light_on: bool,
    vsync: bool,
    keys: KeyState,
    clock: FrameClock,

    exiting: bool,
    paused: bool,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.fatal = Some(err);
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        // renderer before the window it presents to
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    fn create(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let w = &self.cfg.window;
        let window = event_loop.create_window(
            Window::default_attributes()
                .with_title(w.title.clone())
                .with_inner_size(PhysicalSize::new(w.width, w.height)),
        )?;
        let size = window.inner_size();
        self.render_size = RenderSize {
            width: size.width,
            height: size.height,
        };

        let scene = self
            .scene
            .take()
            .ok_or_else(|| anyhow!("scene already consumed"))?;
        let renderer = VkRenderer::new(
            &window,
            &window,
            self.render_size,
            &self.cfg.render.into(),
            &scene,
        )?;
        self.camera.set_aspect(renderer.extent().aspect());
        self.camera.update();

        info!("vsync cfg = {}", self.vsync);
        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }

    fn frame(&mut self) -> Result<()> {
        let dt = self.clock.tick();

        self.camera
            .apply_movement(controls::movement(&self.keys), dt);
        self.camera.update();
        let (metallic, roughness) = controls::material_dirs(&self.keys);
        self.material.adjust(metallic, roughness, dt);
        let light_on = controls::light_toggle(&self.keys, self.light_on);
        if light_on != self.light_on {
            info!("point light {}", if light_on { "on" } else { "off" });
            self.light_on = light_on;
        }
        let toggle_vsync = controls::vsync_toggled(&self.keys);
        self.keys.end_frame();
        if toggle_vsync {
            self.vsync = !self.vsync;
            if let Some(r) = &mut self.renderer {
                r.set_vsync(self.vsync)?;
            }
        }

        let params = FrameParams {
            model: FrameParams::scene_model(),
            view: self.camera.view(),
            projection: self.camera.projection(),
            camera_position: self.camera.position(),
            material: self.material,
            light: PointLight::orbiting(self.clock.elapsed(), self.light_on),
        };
        if let Some(r) = &mut self.renderer {
            r.render(&params)?;
        }

        if let Some(fps) = self.clock.take_fps() {
            info!(
                "fps ~ {} (metallic {:.2}, roughness {:.2})",
                fps, self.material.metallic, self.material.roughness
            );
        }
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.create(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }

        self.paused = self.render_size.is_zero_area();
        info!("resumed → paused={}", self.paused);
        if !self.paused {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                self.paused = self.render_size.is_zero_area();
                info!(
                    "Resized → {}x{} (paused={})",
                    self.render_size.width, self.render_size.height, self.paused
                );

                let res = match &mut self.renderer {
                    Some(r) => r.resize(self.render_size).map(|()| r.extent()),
                    None => return,
                };
                match res {
                    Ok(extent) => {
                        if !self.paused {
                            self.camera.set_aspect(extent.aspect());
                            if let Some(w) = &self.window {
                                w.request_redraw();
                            }
                        }
                    }
                    Err(e) => self.fail(event_loop, e),
                }
            }

            WindowEvent::Focused(focused) => {
                info!("Focused({})", focused);
                if !focused {
                    self.keys.clear();
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    info!("Escape");
                    self.shutdown(event_loop);
                    return;
                }
                self.keys.handle_event(&event);
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                if let Err(e) = self.frame() {
                    self.fail(event_loop, e);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if self.paused {
            // minimized: sleep until the next resize
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let mut cfg = load_cfg(&args.config);
    cfg.apply_args(&args);

    println!("{}", controls::HELP);

    let scene = scene::load_scene(&cfg.scene)?;
    let camera = Camera::new(cfg.camera.into(), 1.0);
    let event_loop: EventLoop<()> = EventLoop::new()?;

    let vsync = cfg.render.vsync;
    let mut app = App {
        cfg,
        scene: Some(scene),
        window: None,
        renderer: None,
        render_size: RenderSize::default(),
        camera,
        material: Material::default(),
        light_on: false,
        vsync,
        keys: KeyState::new(),
        clock: FrameClock::new(),
        exiting: false,
        paused: false,
        fatal: None,
    };

    event_loop.run_app(&mut app)?;
    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
