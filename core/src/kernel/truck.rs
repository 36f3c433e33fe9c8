//! Truck-based implementation of the geometry kernel.
//!
//! This module provides a CAD kernel implementation using the Truck library,
//! which is licensed under Apache-2.0 (MIT-compatible).

use super::types::*;
use super::{GeometryKernel, KernelOpError, KernelResult};
use crate::geometry::{Mesh, Point3 as GeoPoint3};

// Use truck's pre-exported types which come from cgmath64
use truck_meshalgo::tessellation::MeshableShape;
use truck_modeling::{builder, Point3, Rad, Shell, Solid, Vector3, Wire};

/// Truck-based CAD kernel implementation.
#[derive(Debug, Clone)]
pub struct TruckKernel {
    /// Tolerance used by boolean operations.
    pub tolerance: f64,
}

impl TruckKernel {
    pub fn new() -> Self {
        Self {
            tolerance: 0.05,
        }
    }

    pub fn with_tolerance(tolerance: f64) -> Self {
        Self { tolerance }
    }
}

impl Default for TruckKernel {
    fn default() -> Self {
        Self::new()
    }
}

fn require_positive(what: &str, value: f64) -> KernelResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(KernelOpError::InvalidGeometry(format!(
            "{} must be positive, got {}",
            what, value
        )))
    }
}

fn to_truck(v: Vector3D) -> Vector3 {
    Vector3::new(v.x, v.y, v.z)
}

impl GeometryKernel for TruckKernel {
    type Solid = Solid;

    fn create_box(&self, width: f64, height: f64, depth: f64) -> KernelResult<Self::Solid> {
        require_positive("Box width", width)?;
        require_positive("Box height", height)?;
        require_positive("Box depth", depth)?;

        // Box is from (0,0,0) to (width, height, depth)
        let v = builder::vertex(Point3::new(0.0, 0.0, 0.0));
        let edge0 = builder::tsweep(&v, Vector3::new(width, 0.0, 0.0));
        let face0 = builder::tsweep(&edge0, Vector3::new(0.0, height, 0.0));
        let solid = builder::tsweep(&face0, Vector3::new(0.0, 0.0, depth));

        Ok(solid)
    }

    fn create_sphere(&self, radius: f64) -> KernelResult<Self::Solid> {
        require_positive("Sphere radius", radius)?;

        // Half meridian from the north pole to the south pole, then spun
        // around Z. Both ends sit on the axis, which `cone` requires.
        let north = builder::vertex(Point3::new(0.0, 0.0, radius));
        let meridian: Wire = builder::rsweep(
            &north,
            Point3::new(0.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Rad(std::f64::consts::PI),
        );
        let shell: Shell = builder::cone(&meridian, Vector3::new(0.0, 0.0, 1.0), Rad(7.0));

        Solid::try_new(vec![shell])
            .map_err(|e| KernelOpError::OperationFailed(format!("Failed to close sphere: {:?}", e)))
    }

    fn create_cylinder(&self, radius: f64, height: f64) -> KernelResult<Self::Solid> {
        require_positive("Cylinder radius", radius)?;
        require_positive("Cylinder height", height)?;

        let circle = self.build_circle_wire(radius);
        let disk = builder::try_attach_plane(&[circle])
            .map_err(|e| KernelOpError::OperationFailed(format!("Failed to create disk: {:?}", e)))?;
        Ok(builder::tsweep(&disk, Vector3::new(0.0, 0.0, height)))
    }

    fn create_cone(&self, bottom_radius: f64, top_radius: f64, height: f64) -> KernelResult<Self::Solid> {
        require_positive("Cone bottom radius", bottom_radius)?;
        require_positive("Cone height", height)?;
        if !top_radius.is_finite() || top_radius < 0.0 {
            return Err(KernelOpError::InvalidGeometry(format!(
                "Cone top radius must be non-negative, got {}",
                top_radius
            )));
        }

        // Profile in the XZ half-plane, starting and ending on the Z axis.
        let mut points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(bottom_radius, 0.0, 0.0),
        ];
        if top_radius > 0.0 {
            points.push(Point3::new(top_radius, 0.0, height));
        }
        points.push(Point3::new(0.0, 0.0, height));

        let vertices: Vec<_> = points.into_iter().map(builder::vertex).collect();
        let profile: Wire = vertices
            .windows(2)
            .map(|pair| builder::line(&pair[0], &pair[1]))
            .collect();
        let shell: Shell = builder::cone(&profile, Vector3::new(0.0, 0.0, 1.0), Rad(7.0));

        Solid::try_new(vec![shell])
            .map_err(|e| KernelOpError::OperationFailed(format!("Failed to close cone: {:?}", e)))
    }

    fn place(&self, solid: &Self::Solid, placement: &Placement) -> KernelResult<Self::Solid> {
        let origin = Point3::new(0.0, 0.0, 0.0);
        let placed = match *placement {
            Placement::Translate(v) => builder::translated(solid, to_truck(v)),
            Placement::Rotate { axis, angle } => {
                if axis.length() < 1e-10 {
                    return Err(KernelOpError::InvalidGeometry("Rotation axis is zero".into()));
                }
                builder::rotated(solid, origin, to_truck(axis.normalize()), Rad(angle))
            }
            Placement::Scale(s) => {
                require_positive("Scale factor", s)?;
                builder::scaled(solid, origin, Vector3::new(s, s, s))
            }
        };
        Ok(placed)
    }

    // === Boolean Operations ===

    fn boolean_union(&self, solid_a: &Self::Solid, solid_b: &Self::Solid) -> KernelResult<Self::Solid> {
        truck_shapeops::or(solid_a, solid_b, self.tolerance)
            .ok_or_else(|| KernelOpError::OperationFailed("Boolean union failed".into()))
    }

    fn boolean_intersect(&self, solid_a: &Self::Solid, solid_b: &Self::Solid) -> KernelResult<Self::Solid> {
        truck_shapeops::and(solid_a, solid_b, self.tolerance)
            .ok_or_else(|| KernelOpError::OperationFailed("Boolean intersection failed".into()))
    }

    fn boolean_subtract(&self, solid_a: &Self::Solid, solid_b: &Self::Solid) -> KernelResult<Self::Solid> {
        // Subtraction is: A - B = A AND (NOT B)
        // Solid::not() mutates in place, so we clone first
        let mut complement_b = solid_b.clone();
        complement_b.not();
        truck_shapeops::and(solid_a, &complement_b, self.tolerance)
            .ok_or_else(|| KernelOpError::OperationFailed("Boolean subtraction failed".into()))
    }

    fn tessellate(&self, solid: &Self::Solid, tolerance: f64) -> KernelResult<Mesh> {
        if !(tolerance.is_finite() && tolerance > 0.0) {
            return Err(KernelOpError::TessellationFailed(format!(
                "tolerance must be positive, got {}",
                tolerance
            )));
        }

        // triangulation returns a Solid<Point3, PolylineCurve, Option<PolygonMesh>>
        // where each face has an Option<PolygonMesh> instead of Surface
        let meshed_solid = solid.triangulation(tolerance);

        let mut mesh = Mesh::new();
        let mut faces = 0usize;
        let mut failed = 0usize;

        for shell in meshed_solid.boundaries() {
            for face in shell.face_iter() {
                faces += 1;
                let Some(polygon_mesh) = face.surface() else {
                    failed += 1;
                    continue;
                };

                // Truck does not share vertices across topological faces, so
                // each face is normalled on its own and edges stay crisp.
                let mut face_mesh = Mesh::new();
                for pos in polygon_mesh.positions().iter() {
                    face_mesh.add_vertex(GeoPoint3::new(pos.x, pos.y, pos.z));
                }
                let count = face_mesh.vertex_count();
                for tri in polygon_mesh.tri_faces() {
                    let idx = [tri[0].pos, tri[1].pos, tri[2].pos];
                    if idx.iter().any(|&i| i >= count) {
                        return Err(KernelOpError::TessellationFailed(
                            "kernel produced an out-of-range triangle".into(),
                        ));
                    }
                    face_mesh.add_triangle(idx[0] as u32, idx[1] as u32, idx[2] as u32);
                }
                face_mesh.compute_vertex_normals();
                mesh.append(&face_mesh);
            }
        }

        if faces > 0 && failed == faces {
            return Err(KernelOpError::TessellationFailed(format!(
                "none of {} faces could be meshed",
                faces
            )));
        }
        if failed > 0 {
            tracing::warn!("tessellation skipped {} of {} faces", failed, faces);
        }

        Ok(mesh)
    }

    // === STEP File I/O ===

    fn export_step(&self, solids: &[&Self::Solid]) -> KernelResult<String> {
        use truck_stepio::out::{CompleteStepDisplay, StepHeaderDescriptor, StepModels};

        if solids.is_empty() {
            return Err(KernelOpError::InvalidGeometry("Nothing to export".into()));
        }

        // 1. Compress the solids (required for STEP export)
        let compressed: Vec<_> = solids.iter().map(|s| s.compress()).collect();

        // 2. StepModels implements FromIterator for &CompressedSolid
        let models: StepModels<_, _, _> = compressed.iter().collect();

        // 3. Fixed header so identical shapes export identically
        let header = StepHeaderDescriptor {
            file_name: "cascade_export.step".to_string(),
            time_stamp: "1970-01-01T00:00:00".to_string(),
            authors: vec!["CascadeStudio".to_string()],
            organization: vec!["CascadeStudio".to_string()],
            organization_system: "truck".to_string(),
            authorization: "".to_string(),
        };

        let display = CompleteStepDisplay::new(models, header);
        Ok(display.to_string())
    }

    fn import_step(&self, _step_data: &str) -> KernelResult<Vec<Self::Solid>> {
        // Truck v0.3 StepIO import is incomplete for solids (ManifoldSolidBrep not supported)
        Err(KernelOpError::NotImplemented(
            "STEP import is not supported by the truck kernel".into(),
        ))
    }
}

impl TruckKernel {
    /// Build a circular wire around the Z axis using rsweep (rotational sweep of a vertex).
    /// This creates a true circle edge, preserving cylindrical topology on extrusion.
    fn build_circle_wire(&self, radius: f64) -> Wire {
        let v = builder::vertex(Point3::new(radius, 0.0, 0.0));
        // Truck requires angle > 2π for closed shapes (2π ≈ 6.28, so use 7.0)
        builder::rsweep(
            &v,
            Point3::new(0.0, 0.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
            Rad(7.0),
        )
    }
}
