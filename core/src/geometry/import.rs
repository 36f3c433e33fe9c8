//! Parsers for uploaded mesh files.

use super::Mesh;
use crate::error::CascadeError;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// File formats accepted by `importFile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Stl,
    Obj,
    Step,
}

impl FileFormat {
    pub const EXTENSIONS: &'static [&'static str] = &["stl", "obj", "step", "stp"];

    /// Resolve the format from a filename's extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Result<Self, CascadeError> {
        let ext = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .ok_or_else(|| CascadeError::UnsupportedFormat(format!("'{}' has no extension", filename)))?;

        match ext.as_str() {
            "stl" => Ok(FileFormat::Stl),
            "obj" => Ok(FileFormat::Obj),
            "step" | "stp" => Ok(FileFormat::Step),
            other => Err(CascadeError::UnsupportedFormat(format!(
                "'.{}' is not one of {:?}",
                other,
                Self::EXTENSIONS
            ))),
        }
    }
}

/// Parse ASCII or binary STL into an indexed mesh.
pub fn parse_stl(bytes: &[u8]) -> Result<Mesh, CascadeError> {
    let stl = stl_io::read_stl(&mut Cursor::new(bytes))
        .map_err(|e| CascadeError::InvalidMesh(format!("failed to read STL: {}", e)))?;

    let mut mesh = Mesh::new();
    mesh.vertices = stl.vertices.iter().map(|v| [v[0], v[1], v[2]]).collect();
    for face in &stl.faces {
        let [a, b, c] = face.vertices;
        mesh.add_triangle(a as u32, b as u32, c as u32);
    }
    mesh.validate()?;
    mesh.compute_vertex_normals();
    Ok(mesh)
}

/// Parse the geometry subset of Wavefront OBJ: `v` and `f` records.
///
/// Polygonal faces are fan-triangulated; negative (relative) indices are
/// resolved; texture and normal references in faces are ignored.
pub fn parse_obj(bytes: &[u8]) -> Result<Mesh, CascadeError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| CascadeError::InvalidMesh(format!("OBJ is not UTF-8: {}", e)))?;

    let mut mesh = Mesh::new();
    for (line_no, line) in text.lines().enumerate() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("v") => {
                let coords: Vec<f32> = parts
                    .take(3)
                    .map(str::parse::<f32>)
                    .collect::<Result<_, _>>()
                    .map_err(|e| obj_error(line_no, &e.to_string()))?;
                if coords.len() != 3 {
                    return Err(obj_error(line_no, "vertex needs three coordinates"));
                }
                mesh.vertices.push([coords[0], coords[1], coords[2]]);
            }
            Some("f") => {
                let corners = parts
                    .map(|token| resolve_obj_index(token, mesh.vertices.len()))
                    .collect::<Option<Vec<u32>>>()
                    .ok_or_else(|| obj_error(line_no, "bad face index"))?;
                if corners.len() < 3 {
                    return Err(obj_error(line_no, "face needs at least three vertices"));
                }
                for k in 1..corners.len() - 1 {
                    mesh.add_triangle(corners[0], corners[k], corners[k + 1]);
                }
            }
            _ => {}
        }
    }

    mesh.validate()?;
    mesh.compute_vertex_normals();
    Ok(mesh)
}

fn resolve_obj_index(token: &str, vertex_count: usize) -> Option<u32> {
    let raw: i64 = token.split('/').next()?.parse().ok()?;
    let idx = if raw < 0 {
        vertex_count as i64 + raw
    } else {
        raw - 1
    };
    (0..vertex_count as i64).contains(&idx).then_some(idx as u32)
}

fn obj_error(line_no: usize, msg: &str) -> CascadeError {
    CascadeError::InvalidMesh(format!("OBJ line {}: {}", line_no + 1, msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASCII_STL: &str = "solid t
  facet normal 0 0 1
    outer loop
      vertex 0 0 0
      vertex 1 0 0
      vertex 0 1 0
    endloop
  endfacet
endsolid t
";

    #[test]
    fn test_format_from_filename() {
        assert_eq!(FileFormat::from_filename("part.STL").unwrap(), FileFormat::Stl);
        assert_eq!(FileFormat::from_filename("a.b.stp").unwrap(), FileFormat::Step);
        assert!(matches!(
            FileFormat::from_filename("model.iges"),
            Err(CascadeError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            FileFormat::from_filename("README"),
            Err(CascadeError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_parse_ascii_stl() {
        let mesh = parse_stl(ASCII_STL.as_bytes()).unwrap();
        assert_eq!(mesh.triangle_count(), 1);
        assert_eq!(mesh.vertex_count(), 3);
    }

    #[test]
    fn test_parse_stl_garbage() {
        assert!(matches!(parse_stl(b"not an stl"), Err(CascadeError::InvalidMesh(_))));
    }

    #[test]
    fn test_parse_obj_quad_and_negative_indices() {
        let obj = "# quad\nv 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1/1/1 2/2/2 3/3/3 4/4/4\nf -4 -3 -2\n";
        let mesh = parse_obj(obj.as_bytes()).unwrap();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.indices, vec![[0, 1, 2], [0, 2, 3], [0, 1, 2]]);
    }

    #[test]
    fn test_parse_obj_out_of_range() {
        let obj = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 9\n";
        assert!(matches!(parse_obj(obj.as_bytes()), Err(CascadeError::InvalidMesh(_))));
    }
}
