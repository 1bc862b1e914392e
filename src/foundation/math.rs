//! Minimal math aliases used at the core's boundary (extents, offsets, clear colors).
//!
//! The engine's scene-level math (cameras, transforms) lives outside the core;
//! this module only carries what the Graphic façade and presentation layer need.

pub use nalgebra::{Matrix4, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type (also used for RGBA clear colors)
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;
