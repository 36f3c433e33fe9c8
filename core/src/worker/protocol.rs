//! Messages exchanged between a controller and an execution worker.
//!
//! Every request gets exactly one response, and a worker answers requests in
//! the order they were sent. The types are serde-tagged so the same contract
//! can be carried over a pipe or socket as JSON.

use crate::geometry::{FileFormat, Mesh};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Current value of one GUI control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GuiValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl GuiValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            GuiValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            GuiValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            GuiValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for GuiValue {
    fn from(n: f64) -> Self {
        GuiValue::Number(n)
    }
}

impl From<bool> for GuiValue {
    fn from(b: bool) -> Self {
        GuiValue::Bool(b)
    }
}

impl From<&str> for GuiValue {
    fn from(s: &str) -> Self {
        GuiValue::Text(s.to_string())
    }
}

/// Control name → value. Ordered so serialized state is stable.
pub type GuiState = BTreeMap<String, GuiValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Log,
    Warn,
    Error,
}

/// One line of script console output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.level, self.message)
    }
}

/// Native exchange formats the kernel can write directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NativeFormat {
    #[serde(rename = "STEP")]
    Step,
}

/// Controller → worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerRequest {
    /// Allocate the modeling context.
    Init,
    /// Run a script against the given GUI state.
    #[serde(rename_all = "camelCase")]
    Evaluate { code: String, gui_state: GuiState },
    /// Mesh every shape in the current shape set.
    #[serde(rename_all = "camelCase")]
    Tessellate { max_deviation: f64 },
    /// Serialize the shape set in a kernel-native format.
    ExportNative { format: NativeFormat },
    /// Parse an uploaded file into a shape.
    LoadFile {
        filename: String,
        format: FileFormat,
        bytes: Vec<u8>,
    },
}

impl WorkerRequest {
    /// Short name used in logs and timeout errors.
    pub fn stage(&self) -> &'static str {
        match self {
            WorkerRequest::Init => "init",
            WorkerRequest::Evaluate { .. } => "evaluate",
            WorkerRequest::Tessellate { .. } => "tessellate",
            WorkerRequest::ExportNative { .. } => "exportNative",
            WorkerRequest::LoadFile { .. } => "loadFile",
        }
    }
}

/// Outcome of one script evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationReport {
    pub success: bool,
    pub logs: Vec<LogEntry>,
    /// Caller state merged with every default the script declared.
    pub gui_state: GuiState,
    pub shape_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Worker → controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerResponse {
    Ready {
        ready: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Evaluated(EvaluationReport),
    #[serde(rename_all = "camelCase")]
    Tessellated { mesh: Mesh, shape_count: usize },
    Exported { content: String },
    #[serde(rename_all = "camelCase")]
    FileLoaded { shape_ref: String, status: String },
    /// The request was refused or failed inside the worker.
    Error { code: FaultCode, message: String },
}

impl WorkerResponse {
    pub fn fault(code: FaultCode, message: impl Into<String>) -> Self {
        WorkerResponse::Error {
            code,
            message: message.into(),
        }
    }
}

/// Why a worker answered with `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FaultCode {
    /// Request arrived in a state that cannot serve it.
    InvalidState,
    /// The geometry kernel rejected the operation.
    Kernel,
    /// Format the kernel cannot read or write.
    Unsupported,
    /// Uploaded bytes could not be parsed.
    BadInput,
    /// The worker panicked and will exit after replying.
    Panicked,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gui_state_untagged_json() {
        let json = r#"{"Size": 15, "Hollow": true, "Label": "A"}"#;
        let state: GuiState = serde_json::from_str(json).unwrap();
        assert_eq!(state["Size"], GuiValue::Number(15.0));
        assert_eq!(state["Hollow"], GuiValue::Bool(true));
        assert_eq!(state["Label"], GuiValue::Text("A".into()));
    }

    #[test]
    fn test_request_wire_shape() {
        let req = WorkerRequest::Tessellate { max_deviation: 0.1 };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["type"], "tessellate");
        assert_eq!(json["maxDeviation"], 0.1);

        let export: WorkerRequest =
            serde_json::from_str(r#"{"type":"exportNative","format":"STEP"}"#).unwrap();
        assert_eq!(export.stage(), "exportNative");
    }

    #[test]
    fn test_error_response_carries_code() {
        let resp = WorkerResponse::fault(FaultCode::InvalidState, "worker not initialized");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "invalidState");
    }
}
