// SPDX-License-Identifier: CEPL-1.0
use clap::Parser;
use prism_math::CameraDesc;
use prism_math::glam::Vec3;
use prism_render::RenderOptions;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML config file
    #[arg(long, default_value = "prism.toml")]
    pub config: PathBuf,
    /// OBJ model drawn instead of the sphere
    #[arg(long)]
    pub model: Option<PathBuf>,
    /// Block on validation errors until Enter is pressed
    #[arg(long)]
    pub validation_pause: bool,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
    pub scene: SceneCfg,
    pub camera: CameraCfg,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            width: 1440,
            height: 900,
            title: "PBR Test Vulkan".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub vsync: bool,
    pub validation: bool,
    pub pause_on_validation: bool,
}

impl Default for RenderCfg {
    fn default() -> Self {
        let d = RenderOptions::default();
        Self {
            clear_color: d.clear_color,
            vsync: d.vsync,
            validation: d.validation,
            pause_on_validation: d.pause_on_validation,
        }
    }
}

impl From<RenderCfg> for RenderOptions {
    fn from(c: RenderCfg) -> Self {
        RenderOptions {
            clear_color: c.clear_color,
            vsync: c.vsync,
            validation: c.validation,
            pause_on_validation: c.pause_on_validation,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SceneCfg {
    pub shader_dir: PathBuf,
    pub radiance: PathBuf,
    pub irradiance: PathBuf,
    pub skybox: PathBuf,
    pub albedo: Option<PathBuf>,
    pub model: Option<PathBuf>,
    pub sphere_radius: f32,
    pub sphere_slices: u32,
    pub sphere_stacks: u32,
}

impl Default for SceneCfg {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from("shaders"),
            radiance: PathBuf::from("assets/textures/radiance.ktx"),
            irradiance: PathBuf::from("assets/textures/irradiance.ktx"),
            skybox: PathBuf::from("assets/textures/skybox.ktx"),
            albedo: None,
            model: None,
            sphere_radius: 1.0,
            sphere_slices: 60,
            sphere_stacks: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct CameraCfg {
    pub position: [f32; 3],
    pub look_at: [f32; 3],
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub speed: f32,
}

impl Default for CameraCfg {
    fn default() -> Self {
        let d = CameraDesc::default();
        Self {
            position: d.position.to_array(),
            look_at: d.look_at.to_array(),
            fov_degrees: d.fov_degrees,
            near: d.near,
            far: d.far,
            speed: d.speed,
        }
    }
}

impl From<CameraCfg> for CameraDesc {
    fn from(c: CameraCfg) -> Self {
        CameraDesc {
            position: Vec3::from_array(c.position),
            look_at: Vec3::from_array(c.look_at),
            fov_degrees: c.fov_degrees,
            near: c.near,
            far: c.far,
            speed: c.speed,
        }
    }
}

impl AppCfg {
    /// Command-line flags win over the file.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(model) = &args.model {
            self.scene.model = Some(model.clone());
        }
        if args.validation_pause {
            self.render.validation = true;
            self.render.pause_on_validation = true;
        }
    }
}

pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(text)
}

/// Missing or broken config files fall back to defaults.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => match parse_cfg(&s) {
            Ok(cfg) => {
                info!("config: loaded {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("config: {} is invalid, using defaults: {e}", path.display());
                AppCfg::default()
            }
        },
        Err(e) => {
            info!("config: {} not read ({e}), using defaults", path.display());
            AppCfg::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = parse_cfg("").expect("parse");
        assert_eq!(cfg, AppCfg::default());
        assert_eq!((cfg.window.width, cfg.window.height), (1440, 900));
        assert_eq!(cfg.window.title, "PBR Test Vulkan");
        assert_eq!(
            (cfg.scene.sphere_slices, cfg.scene.sphere_stacks),
            (60, 60)
        );
        assert_eq!(cfg.camera.position, [2.0, 2.0, 2.0]);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = parse_cfg(
            r#"
            [render]
            vsync = false

            [camera]
            speed = 12.5

            [scene]
            albedo = "assets/albedo.png"
            "#,
        )
        .expect("parse");
        assert!(!cfg.render.vsync);
        assert_eq!(cfg.render.clear_color, RenderCfg::default().clear_color);
        assert_eq!(cfg.camera.speed, 12.5);
        assert_eq!(cfg.camera.far, 1000.0);
        assert_eq!(cfg.scene.albedo, Some(PathBuf::from("assets/albedo.png")));
        assert_eq!(cfg.scene.shader_dir, PathBuf::from("shaders"));
    }

    #[test]
    fn wrong_types_are_rejected() {
        assert!(parse_cfg("[window]\nwidth = \"wide\"\n").is_err());
    }

    #[test]
    fn missing_file_falls_back() {
        let cfg = load_cfg(Path::new("definitely/not/here/prism.toml"));
        assert_eq!(cfg, AppCfg::default());
    }

    #[test]
    fn flags_override_file() {
        let mut cfg = AppCfg::default();
        let args = Args::parse_from(["prism", "--model", "bunny.obj", "--validation-pause"]);
        cfg.apply_args(&args);
        assert_eq!(cfg.scene.model, Some(PathBuf::from("bunny.obj")));
        assert!(cfg.render.validation && cfg.render.pause_on_validation);
        assert_eq!(args.config, PathBuf::from("prism.toml"));
    }

    #[test]
    fn camera_cfg_converts() {
        let desc = CameraDesc::from(CameraCfg {
            position: [0.0, 1.0, 5.0],
            ..CameraCfg::default()
        });
        assert_eq!(desc.position, Vec3::new(0.0, 1.0, 5.0));
        assert_eq!(desc.fov_degrees, 45.0);
    }
}
