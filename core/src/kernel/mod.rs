//! Kernel abstraction layer for CAD geometry operations.
//!
//! This module provides a trait-based abstraction over the underlying CAD kernel,
//! allowing for swapping implementations (e.g., Truck → custom kernel) without
//! changing the script bindings or the worker protocol.

pub mod types;
mod truck;

#[cfg(test)]
mod tests_truck;

pub use truck::TruckKernel;
pub use types::*;

use crate::geometry::Mesh;
use thiserror::Error;

/// Errors that can occur during kernel operations.
#[derive(Debug, Error, Clone)]
pub enum KernelOpError {
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("Tessellation failed: {0}")]
    TessellationFailed(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

/// Result type for kernel operations.
pub type KernelResult<T> = Result<T, KernelOpError>;

/// Abstract interface for CAD kernel geometry operations.
///
/// A kernel value is moved into each worker thread, so it must be `Send`.
/// Solids never leave the worker that created them and carry no such bound.
pub trait GeometryKernel: Send + Sync + Clone + 'static {
    /// The kernel's internal solid representation.
    type Solid: Clone + 'static;

    /// Create a box solid spanning `(0,0,0)..(width, height, depth)`.
    fn create_box(&self, width: f64, height: f64, depth: f64) -> KernelResult<Self::Solid>;

    /// Create a sphere centred at the origin.
    fn create_sphere(&self, radius: f64) -> KernelResult<Self::Solid>;

    /// Create a cylinder on the XY plane extending along +Z.
    fn create_cylinder(&self, radius: f64, height: f64) -> KernelResult<Self::Solid>;

    /// Create a cone or frustum along +Z; `top_radius` may be zero.
    fn create_cone(&self, bottom_radius: f64, top_radius: f64, height: f64) -> KernelResult<Self::Solid>;

    /// Return a moved copy of a solid.
    fn place(&self, solid: &Self::Solid, placement: &Placement) -> KernelResult<Self::Solid>;

    // === Boolean Operations ===

    /// Compute the union of two solids (A ∪ B).
    fn boolean_union(&self, solid_a: &Self::Solid, solid_b: &Self::Solid) -> KernelResult<Self::Solid>;

    /// Compute the intersection of two solids (A ∩ B).
    fn boolean_intersect(&self, solid_a: &Self::Solid, solid_b: &Self::Solid) -> KernelResult<Self::Solid>;

    /// Compute the difference of two solids (A - B).
    fn boolean_subtract(&self, solid_a: &Self::Solid, solid_b: &Self::Solid) -> KernelResult<Self::Solid>;

    /// Convert a solid to a triangle mesh whose chordal deviation from the
    /// true surface stays within `tolerance`.
    fn tessellate(&self, solid: &Self::Solid, tolerance: f64) -> KernelResult<Mesh>;

    // === STEP File I/O ===

    /// Export solids to STEP format and return as a string.
    fn export_step(&self, solids: &[&Self::Solid]) -> KernelResult<String>;

    /// Import solids from STEP format string.
    fn import_step(&self, step_data: &str) -> KernelResult<Vec<Self::Solid>>;
}
