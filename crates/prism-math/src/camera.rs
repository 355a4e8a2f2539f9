// SPDX-License-Identifier: CEPL-1.0
use bitflags::bitflags;
use glam::{Mat4, Vec3};

bitflags! {
    /// Directions requested this frame; several may be held at once.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Movement: u8 {
        const FORWARD = 1 << 0;
        const BACK    = 1 << 1;
        const LEFT    = 1 << 2;
        const RIGHT   = 1 << 3;
        const UP      = 1 << 4;
        const DOWN    = 1 << 5;
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraDesc {
    pub position: Vec3,
    pub look_at: Vec3,
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub speed: f32,
}

impl Default for CameraDesc {
    fn default() -> Self {
        Self {
            position: Vec3::splat(2.0),
            look_at: Vec3::ZERO,
            fov_degrees: 45.0,
            near: 0.1,
            far: 1000.0,
            speed: 5.0,
        }
    }
}

/// Free-moving camera that keeps facing a fixed target point.
#[derive(Clone, Debug)]
pub struct Camera {
    desc: CameraDesc,
    position: Vec3,
    aspect: f32,
    front: Vec3,
    right: Vec3,
    up: Vec3,
    view: Mat4,
    projection: Mat4,
}

impl Camera {
    pub fn new(desc: CameraDesc, aspect: f32) -> Self {
        let mut cam = Self {
            desc,
            position: desc.position,
            aspect,
            front: Vec3::NEG_Z,
            right: Vec3::X,
            up: Vec3::Y,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        };
        cam.update();
        cam
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 {
            self.aspect = aspect;
        }
    }

    /// Translate along the current basis by `speed * dt` per requested direction.
    pub fn apply_movement(&mut self, movement: Movement, dt: f32) {
        let dist = self.desc.speed * dt;
        let mut delta = Vec3::ZERO;
        if movement.contains(Movement::FORWARD) {
            delta += self.front;
        }
        if movement.contains(Movement::BACK) {
            delta -= self.front;
        }
        if movement.contains(Movement::LEFT) {
            delta -= self.right;
        }
        if movement.contains(Movement::RIGHT) {
            delta += self.right;
        }
        if movement.contains(Movement::UP) {
            delta += self.up;
        }
        if movement.contains(Movement::DOWN) {
            delta -= self.up;
        }
        self.position += delta * dist;
    }

    /// Rebuild basis, view and projection from the current position and aspect.
    pub fn update(&mut self) {
        self.front = (self.desc.look_at - self.position)
            .try_normalize()
            .unwrap_or(Vec3::NEG_Z);
        self.right = self.front.cross(Vec3::Y).try_normalize().unwrap_or(Vec3::X);
        self.up = self.right.cross(self.front).normalize();
        self.view = Mat4::look_at_rh(self.position, self.position + self.front, self.up);

        // Vulkan clip space: y points down.
        let mut proj = Mat4::perspective_rh(
            self.desc.fov_degrees.to_radians(),
            self.aspect,
            self.desc.near,
            self.desc.far,
        );
        proj.y_axis.y *= -1.0;
        self.projection = proj;
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }
    pub fn front(&self) -> Vec3 {
        self.front
    }
    pub fn view(&self) -> Mat4 {
        self.view
    }
    pub fn projection(&self) -> Mat4 {
        self.projection
    }
}
