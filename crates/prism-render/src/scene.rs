// SPDX-License-Identifier: CEPL-1.0
use prism_assets::{CubemapAsset, Rgba8Image};
use prism_math::glam::{Mat3, Mat4, Vec3, Vec4};
use prism_math::GeometryData;
use std::path::PathBuf;

/// Backend knobs that are not part of the scene itself.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderOptions {
    pub clear_color: [f32; 4],
    pub vsync: bool,
    pub validation: bool,
    pub pause_on_validation: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            clear_color: [0.02, 0.02, 0.04, 1.0],
            vsync: true,
            validation: cfg!(debug_assertions),
            pause_on_validation: false,
        }
    }
}

/// Everything uploaded once at startup.
#[derive(Clone, Debug)]
pub struct SceneDesc {
    pub shader_dir: PathBuf,
    pub mesh: GeometryData,
    pub skybox_mesh: GeometryData,
    pub radiance: CubemapAsset,
    pub irradiance: CubemapAsset,
    pub skybox: CubemapAsset,
    pub albedo: Option<Rgba8Image>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    pub roughness: f32,
    pub metallic: f32,
    pub gloss: f32,
    pub albedo: Vec3,
}

impl Material {
    pub const ADJUST_RATE: f32 = 0.15;
    pub const METALLIC_RANGE: (f32, f32) = (0.1, 1.0);
    pub const ROUGHNESS_RANGE: (f32, f32) = (0.01, 1.0);

    /// Each direction is +1, -1 or 0; results are clamped to the valid ranges.
    pub fn adjust(&mut self, metallic_dir: f32, roughness_dir: f32, dt: f32) {
        let step = Self::ADJUST_RATE * dt;
        self.metallic = (self.metallic + metallic_dir * step)
            .clamp(Self::METALLIC_RANGE.0, Self::METALLIC_RANGE.1);
        self.roughness = (self.roughness + roughness_dir * step)
            .clamp(Self::ROUGHNESS_RANGE.0, Self::ROUGHNESS_RANGE.1);
    }
}

impl Default for Material {
    fn default() -> Self {
        Self {
            roughness: 0.5,
            metallic: 0.5,
            gloss: 0.0,
            albedo: Vec3::ONE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointLight {
    pub position: Vec4,
    pub color: Vec3,
    pub radius: f32,
    pub enabled: bool,
}

impl PointLight {
    /// Light swinging along x over time, as seen in the demo scene.
    pub fn orbiting(time: f32, enabled: bool) -> Self {
        Self {
            position: Vec4::new(time.sin() * 10.0, 3.0, 3.0, 0.0),
            color: Vec3::ONE,
            radius: 100.0,
            enabled,
        }
    }
}

impl Default for PointLight {
    fn default() -> Self {
        Self::orbiting(0.0, false)
    }
}

/// Per-frame values the renderer copies into its uniform ring.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameParams {
    pub model: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
    pub camera_position: Vec3,
    pub material: Material,
    pub light: PointLight,
}

impl FrameParams {
    pub const SKYBOX_SCALE: f32 = 500.0;

    /// Scene mesh turned half a revolution about +Y.
    pub fn scene_model() -> Mat4 {
        Mat4::from_rotation_y(180f32.to_radians())
    }

    /// Skybox model: the view's rotation only, scaled out to the far field.
    pub fn skybox_model(&self) -> Mat4 {
        Mat4::from_mat3(Mat3::from_mat4(self.view))
            * Mat4::from_scale(Vec3::splat(Self::SKYBOX_SCALE))
    }
}

impl Default for FrameParams {
    fn default() -> Self {
        Self {
            model: Self::scene_model(),
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            camera_position: Vec3::ZERO,
            material: Material::default(),
            light: PointLight::default(),
        }
    }
}
