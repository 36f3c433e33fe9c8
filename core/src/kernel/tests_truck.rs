// Kernel-level checks against the truck implementation.
// Boolean geometry mirrors the cube/cylinder case from truck issue #68,
// which is known to succeed.

use super::*;
use crate::geometry::Mesh;

const TOL: f64 = 0.1;

fn assert_indices_in_range(mesh: &Mesh) {
    let n = mesh.vertex_count() as u32;
    assert!(mesh.indices.iter().flatten().all(|&i| i < n));
}

fn drill(kernel: &TruckKernel) -> <TruckKernel as GeometryKernel>::Solid {
    let cylinder = kernel.create_cylinder(1.5, 14.0).expect("cylinder");
    kernel
        .place(&cylinder, &Placement::Translate(Vector3D::new(5.0, 5.0, -2.0)))
        .expect("translate")
}

#[test]
fn test_box_tessellates_with_normals() {
    let kernel = TruckKernel::new();
    let solid = kernel.create_box(10.0, 10.0, 10.0).unwrap();
    let mesh = kernel.tessellate(&solid, TOL).unwrap();

    assert!(mesh.vertex_count() > 0);
    // Six planar faces, at least two triangles each.
    assert!(mesh.triangle_count() >= 12);
    assert_eq!(mesh.normals.as_ref().map(Vec::len), Some(mesh.vertex_count()));
    assert_indices_in_range(&mesh);

    let max_z = mesh.vertices.iter().map(|v| v[2]).fold(f32::MIN, f32::max);
    assert!((max_z - 10.0).abs() < 1e-4);
}

#[test]
fn test_rejects_degenerate_dimensions() {
    let kernel = TruckKernel::new();
    assert!(matches!(kernel.create_box(0.0, 1.0, 1.0), Err(KernelOpError::InvalidGeometry(_))));
    assert!(matches!(kernel.create_sphere(-1.0), Err(KernelOpError::InvalidGeometry(_))));
    assert!(matches!(kernel.create_cylinder(1.0, f64::NAN), Err(KernelOpError::InvalidGeometry(_))));
}

#[test]
fn test_sphere_density_follows_tolerance() {
    let kernel = TruckKernel::new();
    let sphere = kernel.create_sphere(10.0).unwrap();

    let coarse = kernel.tessellate(&sphere, 1.0).unwrap();
    let fine = kernel.tessellate(&sphere, 0.01).unwrap();

    assert_indices_in_range(&coarse);
    assert_indices_in_range(&fine);
    assert!(fine.triangle_count() > coarse.triangle_count());
}

#[test]
fn test_cylinder_and_cone_mesh() {
    let kernel = TruckKernel::new();
    let cylinder = kernel.create_cylinder(5.0, 10.0).unwrap();
    let cone = kernel.create_cone(5.0, 0.0, 10.0).unwrap();
    let frustum = kernel.create_cone(5.0, 2.0, 10.0).unwrap();

    for solid in [&cylinder, &cone, &frustum] {
        let mesh = kernel.tessellate(solid, TOL).unwrap();
        assert!(!mesh.is_empty());
        assert_indices_in_range(&mesh);
    }
}

#[test]
fn test_translate_moves_geometry() {
    let kernel = TruckKernel::new();
    let solid = kernel.create_box(1.0, 1.0, 1.0).unwrap();
    let moved = kernel
        .place(&solid, &Placement::Translate(Vector3D::new(100.0, 0.0, 0.0)))
        .unwrap();
    let mesh = kernel.tessellate(&moved, TOL).unwrap();
    assert!(mesh.vertices.iter().all(|v| v[0] >= 99.99));
}

#[test]
fn test_boolean_subtract_cube_cylinder() {
    let kernel = TruckKernel::new();
    let cube = kernel.create_box(10.0, 10.0, 10.0).unwrap();
    let result = kernel.boolean_subtract(&cube, &drill(&kernel));
    assert!(result.is_ok(), "SUBTRACT operation should succeed");

    let mesh = kernel.tessellate(&result.unwrap(), TOL).unwrap();
    assert_indices_in_range(&mesh);
}

#[test]
fn test_boolean_union_and_intersect_cube_cylinder() {
    let kernel = TruckKernel::new();
    let cube = kernel.create_box(10.0, 10.0, 10.0).unwrap();
    let cylinder = drill(&kernel);
    assert!(kernel.boolean_union(&cube, &cylinder).is_ok(), "OR operation should succeed");
    assert!(kernel.boolean_intersect(&cube, &cylinder).is_ok(), "AND operation should succeed");
}

#[test]
fn test_step_export_is_stable() {
    let kernel = TruckKernel::new();
    let solid = kernel.create_box(10.0, 20.0, 30.0).unwrap();

    let step = kernel.export_step(&[&solid]).unwrap();
    assert!(step.contains("ISO-10303-21"));
    assert_eq!(step, kernel.export_step(&[&solid]).unwrap());

    assert!(kernel.export_step(&[]).is_err());
}

#[test]
fn test_step_import_not_supported() {
    let kernel = TruckKernel::new();
    assert!(matches!(kernel.import_step("ISO-10303-21;"), Err(KernelOpError::NotImplemented(_))));
}
