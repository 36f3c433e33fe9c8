//! Request bodies and the checks applied before they reach the service.

use cascade_core::{CascadeError, GuiState};
use serde::Deserialize;

pub const DEFAULT_MESH_RESOLUTION: f64 = 0.1;

fn default_mesh_resolution() -> f64 {
    DEFAULT_MESH_RESOLUTION
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub code: String,
    #[serde(default)]
    pub gui_state: GuiState,
    #[serde(default = "default_mesh_resolution")]
    pub mesh_resolution: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportStepRequest {
    pub code: String,
    #[serde(default)]
    pub gui_state: GuiState,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidateRequest {
    pub code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportQuery {
    pub filename: String,
}

pub fn require_code(code: &str) -> Result<(), CascadeError> {
    if code.trim().is_empty() {
        return Err(CascadeError::Validation("code must not be empty".into()));
    }
    Ok(())
}

/// Upload names are labels only; they never touch the filesystem, but
/// anything path-like is still refused.
pub fn check_upload(filename: &str, size: usize, max_bytes: usize) -> Result<(), CascadeError> {
    if filename.trim().is_empty() {
        return Err(CascadeError::Validation("filename is required".into()));
    }
    if filename.contains(['/', '\\']) || filename.contains("..") {
        return Err(CascadeError::Validation(format!(
            "filename {:?} must not contain a path",
            filename
        )));
    }
    if size > max_bytes {
        return Err(CascadeError::Validation(format!(
            "upload is {} bytes; the limit is {}",
            size, max_bytes
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_defaults() {
        let req: ExecuteRequest = serde_json::from_str(r#"{"code": "Box(1,1,1);"}"#).unwrap();
        assert_eq!(req.mesh_resolution, DEFAULT_MESH_RESOLUTION);
        assert!(req.gui_state.is_empty());
    }

    #[test]
    fn test_execute_camel_case() {
        let req: ExecuteRequest = serde_json::from_str(
            r#"{"code": "x", "guiState": {"Size": 15}, "meshResolution": 0.5}"#,
        )
        .unwrap();
        assert_eq!(req.mesh_resolution, 0.5);
        assert_eq!(req.gui_state.len(), 1);
    }

    #[test]
    fn test_require_code() {
        assert!(require_code("  \n").is_err());
        assert!(require_code("Box(1,1,1);").is_ok());
    }

    #[test]
    fn test_check_upload() {
        assert!(check_upload("part.stl", 10, 100).is_ok());
        assert!(check_upload("", 10, 100).is_err());
        assert!(check_upload("../etc/passwd.stl", 10, 100).is_err());
        assert!(check_upload("part.stl", 101, 100).is_err());
    }
}
