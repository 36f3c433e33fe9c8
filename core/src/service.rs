//! Public entry points: run, export, import and check scripts.
//!
//! Every operation that touches geometry acquires a fresh worker, drives it
//! through the protocol, and releases it whether or not the run succeeded.

use crate::config::{ServiceConfig, MESH_RESOLUTION_RANGE};
use crate::error::{CascadeError, CascadeResult};
use crate::geometry::{to_obj, to_stl, FileFormat, Mesh};
use crate::kernel::{GeometryKernel, TruckKernel};
use crate::lint::{self, ScriptReport};
use crate::pool::{PoolStats, WorkerHandle, WorkerPool};
use crate::worker::protocol::{
    EvaluationReport, FaultCode, GuiState, LogEntry, NativeFormat, WorkerRequest, WorkerResponse,
};
use serde::Serialize;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

/// Result of a successful `execute_script`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutput {
    pub mesh: Mesh,
    pub logs: Vec<LogEntry>,
    pub elapsed_ms: u64,
    pub shape_count: usize,
    pub gui_state: GuiState,
}

/// Result of a successful `import_file`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutput {
    pub shape_ref: String,
    pub status: String,
    pub mesh: Mesh,
}

pub struct CascadeService<K: GeometryKernel = TruckKernel> {
    pool: WorkerPool<K>,
    config: ServiceConfig,
}

impl CascadeService<TruckKernel> {
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_kernel(TruckKernel::new(), config)
    }
}

impl<K: GeometryKernel> CascadeService<K> {
    pub fn with_kernel(kernel: K, config: ServiceConfig) -> Self {
        Self {
            pool: WorkerPool::new(kernel, config.pool.clone()),
            config,
        }
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Start the background lifetime sweeper.
    pub fn start_sweeper(&self) -> JoinHandle<()> {
        self.pool.start_sweeper()
    }

    /// Evaluate a script and tessellate everything it leaves in the scene.
    #[instrument(skip(self, code, gui_state), fields(code_len = code.len()))]
    pub async fn execute_script(
        &self,
        code: &str,
        gui_state: GuiState,
        mesh_resolution: f64,
    ) -> CascadeResult<ExecutionOutput> {
        self.check_code(code)?;
        check_resolution(mesh_resolution)?;
        let started = Instant::now();

        let worker = self.pool.acquire()?;
        let result: CascadeResult<ExecutionOutput> = async {
            self.init(&worker).await?;
            let report = self.evaluate(&worker, code, gui_state).await?;
            let (mesh, shape_count) = self.tessellate(&worker, mesh_resolution).await?;
            Ok(ExecutionOutput {
                mesh,
                logs: report.logs,
                elapsed_ms: started.elapsed().as_millis() as u64,
                shape_count,
                gui_state: report.gui_state,
            })
        }
        .await;
        worker.release();

        match &result {
            Ok(out) => info!(
                shapes = out.shape_count,
                triangles = out.mesh.triangle_count(),
                elapsed_ms = out.elapsed_ms,
                "script executed"
            ),
            Err(e) => warn!(kind = ?e.kind(), error = %e, "script execution failed"),
        }
        result
    }

    /// Evaluate a script and write its solids as STEP text.
    #[instrument(skip(self, code, gui_state), fields(code_len = code.len()))]
    pub async fn export_step(&self, code: &str, gui_state: GuiState) -> CascadeResult<String> {
        self.check_code(code)?;

        let worker = self.pool.acquire()?;
        let result: CascadeResult<String> = async {
            self.init(&worker).await?;
            self.evaluate(&worker, code, gui_state).await?;
            let request = WorkerRequest::ExportNative {
                format: NativeFormat::Step,
            };
            match worker.send(request, self.config.timeouts.export).await? {
                WorkerResponse::Exported { content } => Ok(content),
                WorkerResponse::Error { message, .. } => Err(CascadeError::Export(message)),
                other => Err(unexpected("exportNative", &other)),
            }
        }
        .await;
        worker.release();
        result
    }

    /// Evaluate, tessellate and encode as ASCII STL.
    pub async fn export_stl(
        &self,
        code: &str,
        gui_state: GuiState,
        mesh_resolution: f64,
    ) -> CascadeResult<String> {
        let out = self.execute_script(code, gui_state, mesh_resolution).await?;
        to_stl(&out.mesh)
    }

    /// Evaluate, tessellate and encode as Wavefront OBJ.
    pub async fn export_obj(
        &self,
        code: &str,
        gui_state: GuiState,
        mesh_resolution: f64,
    ) -> CascadeResult<String> {
        let out = self.execute_script(code, gui_state, mesh_resolution).await?;
        to_obj(&out.mesh)
    }

    /// Parse an uploaded file into a shape and mesh it for display.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn import_file(&self, filename: &str, bytes: Vec<u8>) -> CascadeResult<ImportOutput> {
        let format = FileFormat::from_filename(filename)?;
        if bytes.is_empty() {
            return Err(CascadeError::Validation(format!("{} is empty", filename)));
        }

        let worker = self.pool.acquire()?;
        let result: CascadeResult<ImportOutput> = async {
            self.init(&worker).await?;
            let request = WorkerRequest::LoadFile {
                filename: filename.to_string(),
                format,
                bytes,
            };
            let (shape_ref, status) = match worker.send(request, self.config.timeouts.evaluate).await? {
                WorkerResponse::FileLoaded { shape_ref, status } => (shape_ref, status),
                WorkerResponse::Error {
                    code: FaultCode::Unsupported,
                    message,
                } => return Err(CascadeError::UnsupportedFormat(message)),
                WorkerResponse::Error { message, .. } => return Err(CascadeError::InvalidMesh(message)),
                other => return Err(unexpected("loadFile", &other)),
            };
            let (mesh, _) = self
                .tessellate(&worker, self.config.default_mesh_resolution)
                .await?;
            Ok(ImportOutput {
                shape_ref,
                status,
                mesh,
            })
        }
        .await;
        worker.release();
        result
    }

    /// Check a script without running it. Never touches the pool.
    pub fn validate_script(&self, code: &str) -> ScriptReport {
        lint::validate_script(code)
    }

    // === Protocol steps ===

    async fn init(&self, worker: &WorkerHandle) -> CascadeResult<()> {
        match worker.send(WorkerRequest::Init, self.config.timeouts.init).await? {
            WorkerResponse::Ready { ready: true, .. } => Ok(()),
            WorkerResponse::Ready { error, .. } => Err(CascadeError::WorkerLost(format!(
                "worker failed to initialize: {}",
                error.unwrap_or_default()
            ))),
            other => Err(unexpected("init", &other)),
        }
    }

    async fn evaluate(
        &self,
        worker: &WorkerHandle,
        code: &str,
        gui_state: GuiState,
    ) -> CascadeResult<EvaluationReport> {
        let request = WorkerRequest::Evaluate {
            code: code.to_string(),
            gui_state,
        };
        match worker.send(request, self.config.timeouts.evaluate).await? {
            WorkerResponse::Evaluated(report) if report.success => Ok(report),
            WorkerResponse::Evaluated(report) => Err(CascadeError::Compilation {
                message: report.error.unwrap_or_else(|| "script failed".to_string()),
                logs: report.logs,
            }),
            WorkerResponse::Error { message, .. } => Err(CascadeError::Compilation {
                message,
                logs: Vec::new(),
            }),
            other => Err(unexpected("evaluate", &other)),
        }
    }

    async fn tessellate(&self, worker: &WorkerHandle, max_deviation: f64) -> CascadeResult<(Mesh, usize)> {
        let request = WorkerRequest::Tessellate { max_deviation };
        match worker.send(request, self.config.timeouts.tessellate).await? {
            WorkerResponse::Tessellated { mesh, shape_count } => Ok((mesh, shape_count)),
            WorkerResponse::Error { message, .. } => Err(CascadeError::Tessellation(message)),
            other => Err(unexpected("tessellate", &other)),
        }
    }

    fn check_code(&self, code: &str) -> CascadeResult<()> {
        if code.len() > self.config.max_code_len {
            return Err(CascadeError::Validation(format!(
                "script is {} bytes; the limit is {}",
                code.len(),
                self.config.max_code_len
            )));
        }
        Ok(())
    }
}

fn check_resolution(mesh_resolution: f64) -> CascadeResult<()> {
    let (lo, hi) = MESH_RESOLUTION_RANGE;
    if !mesh_resolution.is_finite() || mesh_resolution < lo || mesh_resolution > hi {
        return Err(CascadeError::Validation(format!(
            "meshResolution must be within [{}, {}], got {}",
            lo, hi, mesh_resolution
        )));
    }
    Ok(())
}

fn unexpected(stage: &str, response: &WorkerResponse) -> CascadeError {
    CascadeError::WorkerLost(format!("unexpected {} response: {:?}", stage, response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_bounds() {
        assert!(check_resolution(0.01).is_ok());
        assert!(check_resolution(1.0).is_ok());
        assert!(check_resolution(0.0).is_err());
        assert!(check_resolution(1.5).is_err());
        assert!(check_resolution(f64::NAN).is_err());
    }

    #[tokio::test]
    async fn test_oversized_script_rejected_before_pool() {
        let service = CascadeService::new(ServiceConfig::default().with_max_code_len(8));
        let err = service
            .execute_script("Box(1, 1, 1);", GuiState::new(), 0.1)
            .await
            .unwrap_err();
        assert!(matches!(err, CascadeError::Validation(_)));
        assert_eq!(service.pool_stats().created, 0);
    }

    #[tokio::test]
    async fn test_unknown_extension_rejected() {
        let service = CascadeService::new(ServiceConfig::default());
        let err = service
            .import_file("model.3mf", b"data".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, CascadeError::UnsupportedFormat(_)));
    }
}
