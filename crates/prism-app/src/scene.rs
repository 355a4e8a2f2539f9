// SPDX-License-Identifier: CEPL-1.0
use crate::config::SceneCfg;
use anyhow::{Context, Result};
use prism_assets::{load_obj, load_rgba8, CubemapAsset, LoadError};
use prism_math::{skybox_cube, sphere};
use prism_render::SceneDesc;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{info, warn};

/// Fallback colors when a cubemap file does not exist.
const RADIANCE_FALLBACK: [f32; 4] = [0.6, 0.6, 0.65, 1.0];
const IRRADIANCE_FALLBACK: [f32; 4] = [0.3, 0.3, 0.35, 1.0];
const SKYBOX_FALLBACK: [f32; 4] = [0.15, 0.2, 0.3, 1.0];

/// Load every CPU-side input the renderer uploads at startup. A model that
/// fails to load is fatal; cubemap files that do not exist fall back to a
/// solid color, any other cubemap error is fatal.
pub fn load_scene(cfg: &SceneCfg) -> Result<SceneDesc> {
    let mesh = match &cfg.model {
        Some(path) => {
            let geo = load_obj(path).with_context(|| format!("model {}", path.display()))?;
            info!(
                "scene: model {} ({} triangles)",
                path.display(),
                geo.triangle_count()
            );
            geo
        }
        None => sphere(cfg.sphere_radius, cfg.sphere_slices, cfg.sphere_stacks),
    };

    let albedo = match &cfg.albedo {
        Some(path) => match load_rgba8(path) {
            Ok(img) => Some(img),
            Err(e) => {
                warn!("scene: albedo {} skipped: {e}", path.display());
                None
            }
        },
        None => None,
    };

    Ok(SceneDesc {
        shader_dir: cfg.shader_dir.clone(),
        mesh,
        skybox_mesh: skybox_cube(),
        radiance: cubemap_or_solid(&cfg.radiance, RADIANCE_FALLBACK)?,
        irradiance: cubemap_or_solid(&cfg.irradiance, IRRADIANCE_FALLBACK)?,
        skybox: cubemap_or_solid(&cfg.skybox, SKYBOX_FALLBACK)?,
        albedo,
    })
}

fn cubemap_or_solid(path: &Path, rgba: [f32; 4]) -> Result<CubemapAsset> {
    match CubemapAsset::load(path) {
        Ok(cube) => Ok(cube),
        Err(LoadError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
            warn!("scene: cubemap {} not found, using solid color", path.display());
            Ok(CubemapAsset::solid(1, rgba))
        }
        Err(e) => Err(e).with_context(|| format!("cubemap {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn defaults_build_sphere_and_solid_cubemaps() {
        let cfg = SceneCfg {
            radiance: PathBuf::from("missing/radiance.ktx"),
            irradiance: PathBuf::from("missing/irradiance.ktx"),
            skybox: PathBuf::from("missing/skybox.ktx"),
            sphere_slices: 8,
            sphere_stacks: 4,
            ..SceneCfg::default()
        };
        let scene = load_scene(&cfg).expect("scene");
        assert_eq!(scene.mesh, sphere(1.0, 8, 4));
        assert_eq!(scene.skybox_mesh.vertices.len(), 36);
        assert_eq!(scene.radiance.mip_levels, 1);
        assert_eq!(scene.skybox, CubemapAsset::solid(1, SKYBOX_FALLBACK));
        assert!(scene.albedo.is_none());
    }

    #[test]
    fn missing_model_is_fatal() {
        let cfg = SceneCfg {
            model: Some(PathBuf::from("missing/model.obj")),
            ..SceneCfg::default()
        };
        assert!(load_scene(&cfg).is_err());
    }

    #[test]
    fn corrupt_cubemap_is_fatal() {
        let path = std::env::temp_dir().join(format!("prism-corrupt-{}.ktx", std::process::id()));
        std::fs::write(&path, b"not a ktx container").expect("write");
        let cfg = SceneCfg {
            radiance: path.clone(),
            irradiance: PathBuf::from("missing/irradiance.ktx"),
            skybox: PathBuf::from("missing/skybox.ktx"),
            sphere_slices: 4,
            sphere_stacks: 2,
            ..SceneCfg::default()
        };
        let result = load_scene(&cfg);
        std::fs::remove_file(&path).expect("cleanup");
        let err = result.expect_err("corrupt cubemap must not fall back");
        assert!(err.to_string().contains("cubemap"));
    }

    #[test]
    fn missing_albedo_is_skipped() {
        let cfg = SceneCfg {
            albedo: Some(PathBuf::from("missing/albedo.png")),
            sphere_slices: 4,
            sphere_stacks: 2,
            ..SceneCfg::default()
        };
        assert!(load_scene(&cfg).expect("scene").albedo.is_none());
    }
}
