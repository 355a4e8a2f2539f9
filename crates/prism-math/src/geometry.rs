// SPDX-License-Identifier: CEPL-1.0
use crate::vertex::Vertex;
use glam::{Vec2, Vec3};
use std::f32::consts::{FRAC_PI_2, PI, TAU};

/// Triangle list ready for upload: vertices plus u32 indices.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GeometryData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl GeometryData {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Non-indexed vertex soup with sequential indices.
    pub fn from_vertices(vertices: Vec<Vertex>) -> Self {
        let indices = (0..vertices.len() as u32).collect();
        Self { vertices, indices }
    }
}

/// UV sphere: north pole, `stacks - 1` rings of `slices + 1` vertices, south pole.
///
/// The first and last stacks are pole fans, the inner stacks are split quads.
/// `slices` is raised to 3 and `stacks` to 2 if smaller.
pub fn sphere(radius: f32, slices: u32, stacks: u32) -> GeometryData {
    let slices = slices.max(3);
    let stacks = stacks.max(2);

    let ring_len = slices + 1;
    let mut vertices = Vec::with_capacity((ring_len * (stacks - 1) + 2) as usize);
    let mut indices = Vec::with_capacity((slices * stacks * 6) as usize);

    vertices.push(Vertex::new(
        Vec3::new(0.0, radius, 0.0),
        Vec3::Y,
        Vec2::ZERO,
    ));

    let phi_step = PI / stacks as f32;
    let theta_step = TAU / slices as f32;

    for i in 1..stacks {
        let phi = i as f32 * phi_step;
        for j in 0..=slices {
            let theta = j as f32 * theta_step;
            let p = Vec3::new(
                radius * phi.sin() * theta.cos(),
                radius * phi.cos(),
                radius * phi.sin() * theta.sin(),
            );
            let uv = Vec2::new(theta / FRAC_PI_2, phi / PI);
            vertices.push(Vertex::new(p, p.normalize_or_zero(), uv));
        }
    }

    vertices.push(Vertex::new(
        Vec3::new(0.0, -radius, 0.0),
        Vec3::NEG_Y,
        Vec2::new(0.0, 1.0),
    ));

    // north fan
    for i in 1..=slices {
        indices.extend_from_slice(&[0, i + 1, i]);
    }

    // inner stacks, offset past the north pole
    let base = 1;
    for i in 0..stacks - 2 {
        for j in 0..slices {
            let a = base + i * ring_len + j;
            let b = base + (i + 1) * ring_len + j;
            indices.extend_from_slice(&[a, a + 1, b, b, a + 1, b + 1]);
        }
    }

    // south fan against the last ring
    let south = vertices.len() as u32 - 1;
    let base = south - ring_len;
    for i in 0..slices {
        indices.extend_from_slice(&[south, base + i, base + i + 1]);
    }

    GeometryData { vertices, indices }
}

const CUBE_FACES: [(Vec3, [Vec3; 6]); 6] = [
    // front
    (
        Vec3::Z,
        [
            Vec3::new(-1.0, -1.0, 1.0),
            Vec3::new(1.0, -1.0, 1.0),
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(-1.0, 1.0, 1.0),
            Vec3::new(-1.0, -1.0, 1.0),
        ],
    ),
    // back
    (
        Vec3::NEG_Z,
        [
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(-1.0, 1.0, -1.0),
            Vec3::new(1.0, 1.0, -1.0),
            Vec3::new(1.0, 1.0, -1.0),
            Vec3::new(1.0, -1.0, -1.0),
            Vec3::new(-1.0, -1.0, -1.0),
        ],
    ),
    // up
    (
        Vec3::Y,
        [
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(1.0, 1.0, -1.0),
            Vec3::new(-1.0, 1.0, -1.0),
            Vec3::new(-1.0, 1.0, -1.0),
            Vec3::new(-1.0, 1.0, 1.0),
            Vec3::new(1.0, 1.0, 1.0),
        ],
    ),
    // down
    (
        Vec3::NEG_Y,
        [
            Vec3::new(1.0, -1.0, 1.0),
            Vec3::new(-1.0, -1.0, 1.0),
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(1.0, -1.0, -1.0),
            Vec3::new(1.0, -1.0, 1.0),
        ],
    ),
    // right
    (
        Vec3::X,
        [
            Vec3::new(1.0, -1.0, 1.0),
            Vec3::new(1.0, -1.0, -1.0),
            Vec3::new(1.0, 1.0, -1.0),
            Vec3::new(1.0, 1.0, -1.0),
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(1.0, -1.0, 1.0),
        ],
    ),
    // left
    (
        Vec3::NEG_X,
        [
            Vec3::new(-1.0, -1.0, 1.0),
            Vec3::new(-1.0, 1.0, 1.0),
            Vec3::new(-1.0, 1.0, -1.0),
            Vec3::new(-1.0, 1.0, -1.0),
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(-1.0, -1.0, 1.0),
        ],
    ),
];

const FACE_UVS: [Vec2; 6] = [
    Vec2::new(0.0, 0.0),
    Vec2::new(1.0, 0.0),
    Vec2::new(1.0, 1.0),
    Vec2::new(1.0, 1.0),
    Vec2::new(0.0, 1.0),
    Vec2::new(0.0, 0.0),
];

/// Unit cube around the origin for the environment backdrop, 36 vertices.
pub fn skybox_cube() -> GeometryData {
    let vertices = CUBE_FACES
        .iter()
        .flat_map(|(normal, corners)| {
            corners
                .iter()
                .zip(FACE_UVS)
                .map(move |(&p, uv)| Vertex::new(p, *normal, uv))
        })
        .collect();
    GeometryData::from_vertices(vertices)
}
