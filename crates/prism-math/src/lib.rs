// SPDX-License-Identifier: CEPL-1.0
pub mod camera;
pub mod geometry;
pub mod vertex;

pub use camera::{Camera, CameraDesc, Movement};
pub use geometry::{skybox_cube, sphere, GeometryData};
pub use vertex::Vertex;

pub use glam;
