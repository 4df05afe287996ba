//! Math utilities and types
//!
//! Thin aliases over `nalgebra` plus the few scalar helpers the lightmap
//! systems share.

pub use nalgebra::{Vector2, Vector3};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// Linear interpolation, GLSL `mix` semantics
#[inline]
pub fn mix(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Convert a `[x, y, z]` array (config representation) into a vector
#[inline]
pub fn vec3_from_array(v: [f32; 3]) -> Vec3 {
    Vec3::new(v[0], v[1], v[2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mix_endpoints() {
        assert_relative_eq!(mix(2.0, 6.0, 0.0), 2.0);
        assert_relative_eq!(mix(2.0, 6.0, 1.0), 6.0);
        assert_relative_eq!(mix(2.0, 6.0, 0.25), 3.0);
    }

    #[test]
    fn test_vec3_from_array() {
        assert_eq!(vec3_from_array([1.0, -2.0, 3.5]), Vec3::new(1.0, -2.0, 3.5));
    }
}
