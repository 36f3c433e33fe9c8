//! Mesh buffers and the pure conversions around them.

use nalgebra as na;

pub type Point3 = na::Point3<f64>;
pub type Vector3 = na::Vector3<f64>;
pub type Matrix4 = na::Matrix4<f64>;

pub mod mesh;
pub use mesh::Mesh;

pub mod codec;
pub use codec::{to_obj, to_stl};

pub mod import;
pub use import::{parse_obj, parse_stl, FileFormat};
