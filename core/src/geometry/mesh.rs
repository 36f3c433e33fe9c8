use super::{Matrix4, Point3, Vector3};
use crate::error::CascadeError;
use serde::{Deserialize, Serialize};

/// Triangulated representation of a shape set.
///
/// Normals, when present, are per vertex and parallel to `vertices`.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub vertices: Vec<[f32; 3]>,
    pub indices: Vec<[u32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normals: Option<Vec<[f32; 3]>>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn add_vertex(&mut self, p: Point3) -> u32 {
        let idx = self.vertices.len() as u32;
        self.vertices.push([p.x as f32, p.y as f32, p.z as f32]);
        idx
    }

    pub fn add_triangle(&mut self, i0: u32, i1: u32, i2: u32) {
        self.indices.push([i0, i1, i2]);
    }

    /// Appends another mesh, shifting its indices past our vertices.
    ///
    /// Normals survive only if both sides carry them; a mix drops them so the
    /// length invariant holds.
    pub fn append(&mut self, other: &Mesh) {
        let had_geometry = !self.vertices.is_empty();
        let offset = self.vertices.len() as u32;

        self.normals = match (self.normals.take(), &other.normals) {
            (Some(mut ours), Some(theirs)) => {
                ours.extend_from_slice(theirs);
                Some(ours)
            }
            (None, Some(theirs)) if !had_geometry => Some(theirs.clone()),
            _ => None,
        };

        self.vertices.extend_from_slice(&other.vertices);
        self.indices.extend(
            other
                .indices
                .iter()
                .map(|t| [t[0] + offset, t[1] + offset, t[2] + offset]),
        );
    }

    /// Recomputes per-vertex normals as the area-weighted mean of adjacent faces.
    pub fn compute_vertex_normals(&mut self) {
        let mut acc = vec![Vector3::zeros(); self.vertices.len()];
        for tri in &self.indices {
            let [a, b, c] = tri.map(|i| self.position(i as usize));
            // Unnormalized cross product weights by triangle area.
            let face = (b - a).cross(&(c - a));
            for &i in tri {
                if let Some(n) = acc.get_mut(i as usize) {
                    *n += face;
                }
            }
        }
        self.normals = Some(
            acc.into_iter()
                .map(|n| {
                    let len = n.norm();
                    if len > 1e-12 {
                        let n = n / len;
                        [n.x as f32, n.y as f32, n.z as f32]
                    } else {
                        [0.0, 0.0, 1.0]
                    }
                })
                .collect(),
        );
    }

    /// Applies an affine transform in place; normals are recomputed afterwards.
    pub fn transform(&mut self, matrix: &Matrix4) {
        for v in &mut self.vertices {
            let p = matrix.transform_point(&Point3::new(v[0] as f64, v[1] as f64, v[2] as f64));
            *v = [p.x as f32, p.y as f32, p.z as f32];
        }
        if self.normals.is_some() {
            self.compute_vertex_normals();
        }
    }

    /// Checks the buffer invariants the codecs rely on.
    pub fn validate(&self) -> Result<(), CascadeError> {
        if self.vertices.is_empty() {
            return Err(CascadeError::InvalidMesh("mesh has no vertices".into()));
        }
        if self.indices.is_empty() {
            return Err(CascadeError::InvalidMesh("mesh has no triangle indices".into()));
        }
        let count = self.vertices.len();
        for (t, tri) in self.indices.iter().enumerate() {
            if let Some(bad) = tri.iter().find(|&&i| i as usize >= count) {
                return Err(CascadeError::InvalidMesh(format!(
                    "triangle {} references vertex {} but mesh has {} vertices",
                    t, bad, count
                )));
            }
        }
        Ok(())
    }

    fn position(&self, i: usize) -> Point3 {
        let v = self.vertices.get(i).copied().unwrap_or_default();
        Point3::new(v[0] as f64, v[1] as f64, v[2] as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Mesh {
        let mut mesh = Mesh::new();
        let a = mesh.add_vertex(Point3::new(0.0, 0.0, 0.0));
        let b = mesh.add_vertex(Point3::new(1.0, 0.0, 0.0));
        let c = mesh.add_vertex(Point3::new(0.0, 1.0, 0.0));
        mesh.add_triangle(a, b, c);
        mesh
    }

    #[test]
    fn test_append_offsets_indices() {
        let mut mesh = triangle();
        mesh.append(&triangle());
        assert_eq!(mesh.vertex_count(), 6);
        assert_eq!(mesh.indices[1], [3, 4, 5]);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn test_append_drops_normals_on_mix() {
        let mut with_normals = triangle();
        with_normals.compute_vertex_normals();

        let mut mesh = triangle();
        mesh.append(&with_normals);
        assert!(mesh.normals.is_none());

        let mut empty = Mesh::new();
        empty.append(&with_normals);
        assert_eq!(empty.normals.as_ref().map(Vec::len), Some(3));
    }

    #[test]
    fn test_vertex_normals_face_up() {
        let mut mesh = triangle();
        mesh.compute_vertex_normals();
        let normals = mesh.normals.unwrap();
        assert_eq!(normals.len(), 3);
        assert!((normals[0][2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut mesh = triangle();
        mesh.add_triangle(0, 1, 7);
        assert!(matches!(mesh.validate(), Err(CascadeError::InvalidMesh(_))));
        assert!(matches!(Mesh::new().validate(), Err(CascadeError::InvalidMesh(_))));
    }

    #[test]
    fn test_transform_translates() {
        let mut mesh = triangle();
        mesh.transform(&Matrix4::new_translation(&Vector3::new(0.0, 0.0, 5.0)));
        assert!(mesh.vertices.iter().all(|v| (v[2] - 5.0).abs() < 1e-6));
    }
}
