//! The camera collaborator.

use glam::{Mat3, Mat4, Vec3};

/// Supplies the matrices the geometry passes upload.
pub trait Camera {
    /// Update the viewport, typically changing the aspect ratio.
    fn set_viewport(&mut self, width: u32, height: u32);
    /// Combined view-projection matrix.
    fn view_projection(&self) -> Mat4;
    /// Normal matrix: inverse-transpose of the view's upper 3x3.
    fn normal(&self) -> Mat3;
}

/// A right-handed look-at camera with a GL perspective projection.
#[derive(Debug, Clone, PartialEq)]
pub struct PerspectiveCamera {
    /// Eye position.
    pub eye: Vec3,
    /// Point looked at.
    pub center: Vec3,
    /// Up direction.
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fovy: f32,
    /// Near plane distance.
    pub z_near: f32,
    /// Far plane distance.
    pub z_far: f32,
    aspect: f32,
}

impl PerspectiveCamera {
    /// Create a camera with a square viewport.
    #[must_use]
    pub fn new(eye: Vec3, center: Vec3, up: Vec3) -> Self {
        Self {
            eye,
            center,
            up,
            fovy: 40.0_f32.to_radians(),
            z_near: 0.1,
            z_far: 1024.0,
            aspect: 1.0,
        }
    }

    /// Width over height of the current viewport.
    #[must_use]
    pub fn aspect_ratio(&self) -> f32 {
        self.aspect
    }

    /// The view matrix.
    #[must_use]
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.center, self.up)
    }

    /// The projection matrix.
    #[must_use]
    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh_gl(self.fovy, self.aspect, self.z_near, self.z_far)
    }
}

impl Default for PerspectiveCamera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 0.0, 1.0), Vec3::ZERO, Vec3::Y)
    }
}

impl Camera for PerspectiveCamera {
    #[expect(clippy::cast_precision_loss)]
    fn set_viewport(&mut self, width: u32, height: u32) {
        // Keep the previous aspect for degenerate sizes (minimized windows).
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    fn view_projection(&self) -> Mat4 {
        self.projection() * self.view()
    }

    fn normal(&self) -> Mat3 {
        Mat3::from_mat4(self.view()).inverse().transpose()
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec4;

    use super::*;

    const EPSILON: f32 = 1e-4;

    #[test]
    fn set_viewport_updates_aspect() {
        let mut camera = PerspectiveCamera::default();
        camera.set_viewport(800, 400);
        assert!((camera.aspect_ratio() - 2.0).abs() < EPSILON);

        camera.set_viewport(0, 400);
        assert!((camera.aspect_ratio() - 2.0).abs() < EPSILON);
    }

    #[test]
    fn center_projects_to_clip_origin() {
        let camera = PerspectiveCamera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let clip = camera.view_projection() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < EPSILON && ndc.y.abs() < EPSILON);
        assert!(ndc.z > -1.0 && ndc.z < 1.0);
    }

    #[test]
    fn normal_matrix_of_rigid_view_is_its_rotation() {
        let camera = PerspectiveCamera::new(Vec3::new(3.0, 2.0, 5.0), Vec3::ZERO, Vec3::Y);
        let rotation = Mat3::from_mat4(camera.view());
        let normal = camera.normal();
        for (a, b) in normal.to_cols_array().iter().zip(rotation.to_cols_array()) {
            assert!((a - b).abs() < EPSILON);
        }
    }
}
