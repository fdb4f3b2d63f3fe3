//! Uniform buffer layout shared with the shaders.
//!
//! The block is `#[repr(C)]` and `Pod` so it can be written to mapped memory
//! with `bytemuck::bytes_of`. All three matrices are column-major, which is
//! what both glam and GLSL use.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Camera position used by every drawable's view matrix.
pub const EYE: Vec3 = Vec3::new(2.0, 2.0, 2.0);

/// Vertical field of view of the projection.
pub const FOV_Y_DEGREES: f32 = 45.0;
pub const Z_NEAR: f32 = 0.1;
pub const Z_FAR: f32 = 10.0;

/// Per-object transform block bound at binding 0.
///
/// # Memory Layout
///
/// - Offset 0: model (64 bytes)
/// - Offset 64: view (64 bytes)
/// - Offset 128: proj (64 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct TransformBlock {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl TransformBlock {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(model: Mat4, view: Mat4, proj: Mat4) -> Self {
        Self { model, view, proj }
    }
}

impl Default for TransformBlock {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY,
            view: view_matrix(),
            proj: projection(1.0),
        }
    }
}

/// Looks from [`EYE`] at the origin with +Z up.
pub fn view_matrix() -> Mat4 {
    Mat4::look_at_rh(EYE, Vec3::ZERO, Vec3::Z)
}

/// Right-handed perspective with the Y axis flipped for Vulkan clip space.
pub fn projection(aspect: f32) -> Mat4 {
    let mut proj = Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), aspect, Z_NEAR, Z_FAR);
    proj.y_axis.y *= -1.0;
    proj
}

/// Translate to `position`, then spin about Z by `elapsed_secs * speed` radians.
pub fn model_matrix(position: Vec3, elapsed_secs: f32, rotation_speed: f32) -> Mat4 {
    Mat4::from_translation(position) * Mat4::from_rotation_z(elapsed_secs * rotation_speed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_block_layout() {
        assert_eq!(TransformBlock::SIZE, 192);
        assert_eq!(std::mem::align_of::<TransformBlock>(), 16);
        assert_eq!(std::mem::offset_of!(TransformBlock, view), 64);
        assert_eq!(std::mem::offset_of!(TransformBlock, proj), 128);
    }

    #[test]
    fn test_projection_flips_y() {
        let aspect = 16.0 / 9.0;
        let gl = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
        let vk = projection(aspect);

        assert_eq!(vk.y_axis.y, -gl.y_axis.y);
        assert_eq!(vk.x_axis, gl.x_axis);
        assert_eq!(vk.z_axis, gl.z_axis);
    }

    #[test]
    fn test_model_matrix_rotates_about_z() {
        let position = Vec3::new(1.0, 0.0, 0.0);
        let model = model_matrix(position, 1.0, std::f32::consts::FRAC_PI_2);

        // +X rotated a quarter turn lands on +Y, then gets translated
        let p = model.transform_point3(Vec3::X);
        assert!((p - Vec3::new(1.0, 1.0, 0.0)).length() < 1e-5);

        // Zero speed is a pure translation
        assert_eq!(model_matrix(position, 5.0, 0.0), Mat4::from_translation(position));
    }

    #[test]
    fn test_view_looks_at_origin() {
        let view = view_matrix();
        let eye_in_view = view.transform_point3(EYE);
        assert!(eye_in_view.length() < 1e-5);

        let origin = view.transform_point3(Vec3::ZERO);
        assert!(origin.z < 0.0, "origin should be in front of the camera");
    }

    #[test]
    fn test_bytes_of_block() {
        let block = TransformBlock::default();
        assert_eq!(bytemuck::bytes_of(&block).len(), TransformBlock::SIZE);
    }
}
