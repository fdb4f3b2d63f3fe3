//! Vertex data structures and input descriptions.
//!
//! # Vertex Types
//!
//! - [`ColorVertex`] - position and color, for flat-color geometry
//! - [`TexturedVertex`] - position, color and UV, for sampled geometry
//!
//! Both implement [`VertexFormat`], which yields the [`VertexLayout`] a
//! pipeline is built with.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// Binding and attribute descriptions for one interleaved vertex buffer.
#[derive(Clone, Debug)]
pub struct VertexLayout {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

/// A vertex type that can describe its own input layout.
pub trait VertexFormat: Pod {
    fn layout() -> VertexLayout;
}

fn binding_for<T>() -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription {
        binding: 0,
        stride: std::mem::size_of::<T>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }
}

fn attribute(location: u32, format: vk::Format, offset: usize) -> vk::VertexInputAttributeDescription {
    vk::VertexInputAttributeDescription {
        binding: 0,
        location,
        format,
        offset: offset as u32,
    }
}

/// Vertex with position and color.
///
/// - location 0: position (vec3)
/// - location 1: color (vec3)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ColorVertex {
    pub position: Vec3,
    pub color: Vec3,
}

impl ColorVertex {
    #[inline]
    pub const fn new(position: Vec3, color: Vec3) -> Self {
        Self { position, color }
    }
}

impl VertexFormat for ColorVertex {
    fn layout() -> VertexLayout {
        VertexLayout {
            bindings: vec![binding_for::<Self>()],
            attributes: vec![
                attribute(0, vk::Format::R32G32B32_SFLOAT, std::mem::offset_of!(Self, position)),
                attribute(1, vk::Format::R32G32B32_SFLOAT, std::mem::offset_of!(Self, color)),
            ],
        }
    }
}

/// Vertex with position, color and texture coordinates.
///
/// # Memory Layout
///
/// - Offset 0: position (12 bytes)
/// - Offset 12: color (12 bytes)
/// - Offset 24: tex_coord (8 bytes)
/// - Total size: 32 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TexturedVertex {
    pub position: Vec3,
    pub color: Vec3,
    pub tex_coord: Vec2,
}

impl TexturedVertex {
    #[inline]
    pub const fn new(position: Vec3, color: Vec3, tex_coord: Vec2) -> Self {
        Self {
            position,
            color,
            tex_coord,
        }
    }
}

impl VertexFormat for TexturedVertex {
    fn layout() -> VertexLayout {
        VertexLayout {
            bindings: vec![binding_for::<Self>()],
            attributes: vec![
                attribute(0, vk::Format::R32G32B32_SFLOAT, std::mem::offset_of!(Self, position)),
                attribute(1, vk::Format::R32G32B32_SFLOAT, std::mem::offset_of!(Self, color)),
                attribute(2, vk::Format::R32G32_SFLOAT, std::mem::offset_of!(Self, tex_coord)),
            ],
        }
    }
}
