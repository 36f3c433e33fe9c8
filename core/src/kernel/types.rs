//! Common geometry types for the kernel abstraction layer.
//!
//! These types are kernel-agnostic and used to communicate between
//! the script bindings and the kernel implementation.

use serde::{Deserialize, Serialize};

/// A 3D vector/direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3D {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Normalize to unit length.
    pub fn normalize(&self) -> Self {
        let len = self.length();
        if len < 1e-10 {
            Self::new(0.0, 0.0, 1.0) // Default to Z-up if zero vector
        } else {
            Self::new(self.x / len, self.y / len, self.z / len)
        }
    }
}

/// Rigid or uniform-scale placement applied to an existing shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    Translate(Vector3D),
    /// Rotation about an axis through the origin, angle in radians.
    Rotate { axis: Vector3D, angle: f64 },
    /// Uniform scale about the origin.
    Scale(f64),
}

impl Placement {
    /// The same placement as a homogeneous matrix, for mesh-backed shapes.
    pub fn to_matrix(&self) -> crate::geometry::Matrix4 {
        use crate::geometry::{Matrix4, Vector3};
        use nalgebra::{Rotation3, Unit};

        match *self {
            Placement::Translate(v) => Matrix4::new_translation(&Vector3::new(v.x, v.y, v.z)),
            Placement::Rotate { axis, angle } => {
                let axis = axis.normalize();
                let axis = Unit::new_normalize(Vector3::new(axis.x, axis.y, axis.z));
                Rotation3::from_axis_angle(&axis, angle).to_homogeneous()
            }
            Placement::Scale(s) => Matrix4::new_scaling(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point3;

    #[test]
    fn test_rotation_matrix_quarter_turn() {
        let m = Placement::Rotate {
            axis: Vector3D::new(0.0, 0.0, 1.0),
            angle: std::f64::consts::FRAC_PI_2,
        }
        .to_matrix();
        let p = m.transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert!(p.x.abs() < 1e-9);
        assert!((p.y - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_axis_defaults_to_z() {
        assert_eq!(Vector3D::new(0.0, 0.0, 0.0).normalize(), Vector3D::new(0.0, 0.0, 1.0));
    }
}
