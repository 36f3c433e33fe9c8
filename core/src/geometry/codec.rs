//! ASCII STL and OBJ writers.
//!
//! Both are pure and deterministic: the same mesh always produces the same
//! bytes, and nothing time-dependent is embedded.

use super::Mesh;
use crate::error::CascadeError;
use std::fmt::Write;

const SOLID_NAME: &str = "cascade";
const FALLBACK_NORMAL: [f32; 3] = [0.0, 0.0, 1.0];

/// Convert a mesh to ASCII STL.
///
/// Missing vertex normals are substituted with `(0, 0, 1)`; STL export never
/// fails because of normals.
pub fn to_stl(mesh: &Mesh) -> Result<String, CascadeError> {
    mesh.validate()?;

    let mut out = String::with_capacity(64 + mesh.triangle_count() * 256);
    let _ = writeln!(out, "solid {}", SOLID_NAME);

    for tri in &mesh.indices {
        let n = facet_normal(mesh, tri);
        let _ = writeln!(out, "  facet normal {} {} {}", n[0], n[1], n[2]);
        out.push_str("    outer loop\n");
        for &i in tri {
            let v = mesh.vertices[i as usize];
            let _ = writeln!(out, "      vertex {} {} {}", v[0], v[1], v[2]);
        }
        out.push_str("    endloop\n");
        out.push_str("  endfacet\n");
    }

    let _ = writeln!(out, "endsolid {}", SOLID_NAME);
    Ok(out)
}

/// Convert a mesh to Wavefront OBJ with 1-based face indices.
pub fn to_obj(mesh: &Mesh) -> Result<String, CascadeError> {
    mesh.validate()?;
    if let Some(normals) = &mesh.normals {
        if normals.len() != mesh.vertices.len() {
            return Err(CascadeError::InvalidMesh(format!(
                "{} normals for {} vertices",
                normals.len(),
                mesh.vertices.len()
            )));
        }
    }

    let mut out = String::with_capacity(mesh.vertex_count() * 64 + mesh.triangle_count() * 32);

    for v in &mesh.vertices {
        let _ = writeln!(out, "v {} {} {}", v[0], v[1], v[2]);
    }

    match &mesh.normals {
        Some(normals) => {
            for n in normals {
                let _ = writeln!(out, "vn {} {} {}", n[0], n[1], n[2]);
            }
            for tri in &mesh.indices {
                let [a, b, c] = tri.map(|i| i + 1);
                let _ = writeln!(out, "f {a}//{a} {b}//{b} {c}//{c}");
            }
        }
        None => {
            for tri in &mesh.indices {
                let [a, b, c] = tri.map(|i| i + 1);
                let _ = writeln!(out, "f {a} {b} {c}");
            }
        }
    }

    Ok(out)
}

/// Normalized mean of the triangle's vertex normals.
fn facet_normal(mesh: &Mesh, tri: &[u32; 3]) -> [f32; 3] {
    let mut sum = [0.0f32; 3];
    for &i in tri {
        let n = mesh
            .normals
            .as_ref()
            .and_then(|normals| normals.get(i as usize))
            .copied()
            .unwrap_or(FALLBACK_NORMAL);
        for k in 0..3 {
            sum[k] += n[k];
        }
    }
    let len = (sum[0] * sum[0] + sum[1] * sum[1] + sum[2] * sum[2]).sqrt();
    if len > 1e-12 {
        [sum[0] / len, sum[1] / len, sum[2] / len]
    } else {
        FALLBACK_NORMAL
    }
}
