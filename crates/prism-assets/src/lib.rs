// SPDX-License-Identifier: CEPL-1.0
//! File-backed inputs for the renderer: meshes, cubemaps and 2D images.
pub mod ktx;
pub mod model;
pub mod texture;

pub use ktx::{CubemapAsset, MipLevel, TexelFormat, CUBE_FACES};
pub use model::{load_obj, load_obj_from_reader};
pub use texture::{decode_rgba8, load_rgba8, Rgba8Image};

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse OBJ: {0}")]
    Obj(#[from] tobj::LoadError),
    #[error("OBJ contains no triangles")]
    EmptyModel,
    #[error("invalid KTX container: {0}")]
    Ktx(String),
    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
}
