//! Execution workers.
//!
//! An [`ExecutionWorker`] owns one modeling session and answers protocol
//! requests one at a time. [`spawn`] runs it on a dedicated OS thread fed by a
//! channel; the pool is the only caller.

pub mod bindings;
pub mod protocol;
pub mod state;

use crate::geometry::{import, FileFormat};
use crate::kernel::{GeometryKernel, KernelOpError};
use protocol::{EvaluationReport, FaultCode, GuiState, NativeFormat, WorkerRequest, WorkerResponse};
use serde::Serialize;
use state::{Session, Shape};
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::{oneshot, OwnedSemaphorePermit};
use tracing::{debug, warn};
use uuid::Uuid;

/// How often an idle worker re-checks its cancel flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Where a worker is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkerStatus {
    Created,
    Initializing,
    Ready,
    Evaluating,
    Tessellating,
    Exporting,
    Loading,
    /// A script failed; only a fresh worker can run another.
    Faulted,
    Terminated,
}

/// A request paired with the channel its answer goes back on.
pub struct Envelope {
    pub request: WorkerRequest,
    pub reply: oneshot::Sender<WorkerResponse>,
}

pub struct ExecutionWorker<K: GeometryKernel> {
    kernel: K,
    status: WorkerStatus,
    cancel: Arc<AtomicBool>,
    session: Option<Rc<RefCell<Session<K>>>>,
    /// Set once a script or file has populated the session.
    populated: bool,
}

impl<K: GeometryKernel> ExecutionWorker<K> {
    pub fn new(kernel: K, cancel: Arc<AtomicBool>) -> Self {
        Self {
            kernel,
            status: WorkerStatus::Created,
            cancel,
            session: None,
            populated: false,
        }
    }

    pub fn status(&self) -> WorkerStatus {
        self.status
    }

    /// Answer one request. Never panics on bad input; protocol misuse comes
    /// back as an `Error` response.
    pub fn handle(&mut self, request: WorkerRequest) -> WorkerResponse {
        if self.status == WorkerStatus::Terminated {
            return WorkerResponse::fault(FaultCode::InvalidState, "worker has terminated");
        }

        match request {
            WorkerRequest::Init => self.init(),
            WorkerRequest::Evaluate { code, gui_state } => self.evaluate(&code, gui_state),
            WorkerRequest::Tessellate { max_deviation } => self.tessellate(max_deviation),
            WorkerRequest::ExportNative { format } => self.export(format),
            WorkerRequest::LoadFile {
                filename,
                format,
                bytes,
            } => self.load_file(&filename, format, &bytes),
        }
    }

    pub fn terminate(&mut self) {
        self.session = None;
        self.status = WorkerStatus::Terminated;
    }

    fn init(&mut self) -> WorkerResponse {
        if self.status != WorkerStatus::Created {
            return WorkerResponse::Ready {
                ready: self.status == WorkerStatus::Ready,
                error: None,
            };
        }
        self.status = WorkerStatus::Initializing;
        self.session = Some(Rc::new(RefCell::new(Session::new(
            self.kernel.clone(),
            GuiState::new(),
        ))));
        self.status = WorkerStatus::Ready;
        WorkerResponse::Ready {
            ready: true,
            error: None,
        }
    }

    fn require_ready(&self) -> Result<(), WorkerResponse> {
        match self.status {
            WorkerStatus::Ready => Ok(()),
            WorkerStatus::Created => Err(WorkerResponse::fault(
                FaultCode::InvalidState,
                "worker not initialized",
            )),
            WorkerStatus::Faulted => Err(WorkerResponse::fault(
                FaultCode::InvalidState,
                "worker is unusable after a failed evaluation",
            )),
            other => Err(WorkerResponse::fault(
                FaultCode::InvalidState,
                format!("worker is busy ({:?})", other),
            )),
        }
    }

    fn evaluate(&mut self, code: &str, gui_state: GuiState) -> WorkerResponse {
        if let Err(refused) = self.require_ready() {
            return refused;
        }
        self.status = WorkerStatus::Evaluating;

        let session = Rc::new(RefCell::new(Session::new(self.kernel.clone(), gui_state)));
        let outcome = {
            let mut engine = bindings::sandbox_engine();
            bindings::install(&mut engine, &session, &self.cancel);
            let mut scope = bindings::script_scope();
            engine
                .compile(code)
                .map_err(|e| e.to_string())
                .and_then(|ast| {
                    engine
                        .run_ast_with_scope(&mut scope, &ast)
                        .map_err(|e| e.to_string())
                })
        };

        let report = {
            let s = session.borrow();
            EvaluationReport {
                success: outcome.is_ok(),
                logs: s.logs.clone(),
                gui_state: s.gui_state.clone(),
                shape_count: s.shapes.len(),
                error: outcome.err(),
            }
        };

        if report.success {
            debug!(shapes = report.shape_count, "script evaluated");
            self.session = Some(session);
            self.populated = true;
            self.status = WorkerStatus::Ready;
        } else {
            debug!(error = ?report.error, "script failed");
            self.session = None;
            self.status = WorkerStatus::Faulted;
        }
        WorkerResponse::Evaluated(report)
    }

    fn populated_session(&self) -> Result<Rc<RefCell<Session<K>>>, WorkerResponse> {
        self.require_ready()?;
        match (&self.session, self.populated) {
            (Some(session), true) => Ok(session.clone()),
            _ => Err(WorkerResponse::fault(
                FaultCode::InvalidState,
                "nothing to process; evaluate a script or load a file first",
            )),
        }
    }

    fn tessellate(&mut self, max_deviation: f64) -> WorkerResponse {
        let session = match self.populated_session() {
            Ok(session) => session,
            Err(refused) => return refused,
        };
        self.status = WorkerStatus::Tessellating;

        let session = session.borrow();
        let response = match session.tessellate(max_deviation) {
            Ok(mesh) => WorkerResponse::Tessellated {
                mesh,
                shape_count: session.shapes.len(),
            },
            Err(message) => WorkerResponse::fault(FaultCode::Kernel, message),
        };
        self.status = WorkerStatus::Ready;
        response
    }

    fn export(&mut self, format: NativeFormat) -> WorkerResponse {
        let session = match self.populated_session() {
            Ok(session) => session,
            Err(refused) => return refused,
        };
        self.status = WorkerStatus::Exporting;

        let response = match format {
            NativeFormat::Step => match session.borrow().export_step() {
                Ok(content) => WorkerResponse::Exported { content },
                Err(message) => WorkerResponse::fault(FaultCode::Kernel, message),
            },
        };
        self.status = WorkerStatus::Ready;
        response
    }

    fn load_file(&mut self, filename: &str, format: FileFormat, bytes: &[u8]) -> WorkerResponse {
        if let Err(refused) = self.require_ready() {
            return refused;
        }
        let Some(session) = self.session.clone() else {
            return WorkerResponse::fault(FaultCode::InvalidState, "worker not initialized");
        };
        self.status = WorkerStatus::Loading;

        let loaded: Result<Vec<Shape<K::Solid>>, (FaultCode, String)> = match format {
            FileFormat::Stl => import::parse_stl(bytes)
                .map(|mesh| vec![Shape::Mesh(mesh)])
                .map_err(|e| (FaultCode::BadInput, e.to_string())),
            FileFormat::Obj => import::parse_obj(bytes)
                .map(|mesh| vec![Shape::Mesh(mesh)])
                .map_err(|e| (FaultCode::BadInput, e.to_string())),
            FileFormat::Step => self
                .load_step(bytes)
                .map(|solids| solids.into_iter().map(Shape::Solid).collect()),
        };
        self.status = WorkerStatus::Ready;

        match loaded {
            Ok(shapes) => {
                let count = shapes.len();
                let mut session = session.borrow_mut();
                for shape in shapes {
                    session.shapes.push(shape);
                }
                self.populated = true;
                let shape_ref = Uuid::new_v4().to_string();
                debug!(%shape_ref, filename, count, "file loaded");
                WorkerResponse::FileLoaded {
                    shape_ref,
                    status: format!("loaded {} ({} shapes)", filename, count),
                }
            }
            Err((code, message)) => WorkerResponse::fault(code, message),
        }
    }

    /// Solids stay exact in the session; the caller picks the tessellation
    /// resolution later.
    fn load_step(&self, bytes: &[u8]) -> Result<Vec<K::Solid>, (FaultCode, String)> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| (FaultCode::BadInput, "STEP file is not valid UTF-8".to_string()))?;
        let solids = self.kernel.import_step(text).map_err(|e| match e {
            KernelOpError::NotImplemented(msg) => (FaultCode::Unsupported, msg),
            other => (FaultCode::BadInput, other.to_string()),
        })?;
        if solids.is_empty() {
            return Err((FaultCode::BadInput, "STEP file contains no solids".to_string()));
        }
        Ok(solids)
    }
}

/// Keeps a worker thread counted, and its pool slot taken, until the thread
/// exits however it exits.
pub struct AliveGuard {
    alive: Arc<AtomicUsize>,
    _slot: OwnedSemaphorePermit,
}

impl AliveGuard {
    pub fn new(alive: Arc<AtomicUsize>, slot: OwnedSemaphorePermit) -> Self {
        alive.fetch_add(1, Ordering::SeqCst);
        Self { alive, _slot: slot }
    }
}

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.alive.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Start a worker thread that holds `guard` for its whole life. If the thread
/// cannot be started the guard is dropped here.
pub fn spawn<K: GeometryKernel>(
    id: u64,
    kernel: K,
    cancel: Arc<AtomicBool>,
    inbox: Receiver<Envelope>,
    guard: AliveGuard,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("cascade-worker-{}", id))
        .spawn(move || {
            let _guard = guard;
            run(id, ExecutionWorker::new(kernel, cancel.clone()), &cancel, &inbox);
        })
}

fn run<K: GeometryKernel>(
    id: u64,
    mut worker: ExecutionWorker<K>,
    cancel: &AtomicBool,
    inbox: &Receiver<Envelope>,
) {
    debug!(worker = id, "worker started");
    while !cancel.load(Ordering::SeqCst) {
        let envelope = match inbox.recv_timeout(POLL_INTERVAL) {
            Ok(envelope) => envelope,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let stage = envelope.request.stage();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker.handle(envelope.request)));
        let (response, fatal) = match outcome {
            Ok(response) => (response, false),
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(worker = id, stage, %reason, "worker panicked");
                (
                    WorkerResponse::fault(FaultCode::Panicked, format!("{} panicked: {}", stage, reason)),
                    true,
                )
            }
        };

        // A cancelled worker has no one waiting on it.
        if cancel.load(Ordering::SeqCst) {
            break;
        }
        let _ = envelope.reply.send(response);
        if fatal {
            break;
        }
    }
    worker.terminate();
    debug!(worker = id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{KernelResult, Placement, TruckKernel};
    use protocol::GuiValue;

    fn worker() -> ExecutionWorker<TruckKernel> {
        ExecutionWorker::new(TruckKernel::new(), Arc::new(AtomicBool::new(false)))
    }

    fn evaluate(w: &mut ExecutionWorker<TruckKernel>, code: &str) -> EvaluationReport {
        match w.handle(WorkerRequest::Evaluate {
            code: code.into(),
            gui_state: GuiState::new(),
        }) {
            WorkerResponse::Evaluated(report) => report,
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn test_requests_before_init_are_refused() {
        let mut w = worker();
        let resp = w.handle(WorkerRequest::Tessellate { max_deviation: 0.1 });
        assert!(matches!(
            resp,
            WorkerResponse::Error {
                code: FaultCode::InvalidState,
                ..
            }
        ));
        assert_eq!(w.status(), WorkerStatus::Created);
    }

    #[test]
    fn test_evaluate_then_tessellate() {
        let mut w = worker();
        assert!(matches!(w.handle(WorkerRequest::Init), WorkerResponse::Ready { ready: true, .. }));

        let report = evaluate(&mut w, "Box(10, 10, 10);");
        assert!(report.success);
        assert_eq!(report.shape_count, 1);

        match w.handle(WorkerRequest::Tessellate { max_deviation: 0.1 }) {
            WorkerResponse::Tessellated { mesh, shape_count } => {
                assert_eq!(shape_count, 1);
                assert!(mesh.validate().is_ok());
            }
            other => panic!("unexpected response: {:?}", other),
        }
        assert_eq!(w.status(), WorkerStatus::Ready);
    }

    #[test]
    fn test_failed_evaluation_faults_worker() {
        let mut w = worker();
        w.handle(WorkerRequest::Init);
        let report = evaluate(&mut w, r#"console.log("before"); Box(-1, 1, 1);"#);
        assert!(!report.success);
        assert_eq!(report.logs.len(), 1);
        assert!(report.error.is_some());
        assert_eq!(w.status(), WorkerStatus::Faulted);

        let resp = w.handle(WorkerRequest::ExportNative {
            format: NativeFormat::Step,
        });
        assert!(matches!(resp, WorkerResponse::Error { .. }));
    }

    #[test]
    fn test_gui_defaults_reported() {
        let mut w = worker();
        w.handle(WorkerRequest::Init);
        let report = evaluate(&mut w, r#"let h = Checkbox("Hollow", false); Box(1, 1, 1);"#);
        assert_eq!(report.gui_state["Hollow"], GuiValue::Bool(false));
    }

    #[test]
    fn test_step_import_is_unsupported() {
        let mut w = worker();
        w.handle(WorkerRequest::Init);
        let resp = w.handle(WorkerRequest::LoadFile {
            filename: "part.step".into(),
            format: FileFormat::Step,
            bytes: b"ISO-10303-21;".to_vec(),
        });
        assert!(matches!(
            resp,
            WorkerResponse::Error {
                code: FaultCode::Unsupported,
                ..
            }
        ));
    }

    #[test]
    fn test_loaded_file_gets_uuid_reference() {
        let mut w = worker();
        w.handle(WorkerRequest::Init);
        let resp = w.handle(WorkerRequest::LoadFile {
            filename: "tri.obj".into(),
            format: FileFormat::Obj,
            bytes: b"v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n".to_vec(),
        });
        match resp {
            WorkerResponse::FileLoaded { shape_ref, status } => {
                assert!(Uuid::parse_str(&shape_ref).is_ok(), "{}", shape_ref);
                assert!(status.contains("tri.obj"));
            }
            other => panic!("unexpected response: {:?}", other),
        }
        match w.handle(WorkerRequest::Tessellate { max_deviation: 0.1 }) {
            WorkerResponse::Tessellated { shape_count, mesh } => {
                assert_eq!(shape_count, 1);
                assert_eq!(mesh.triangle_count(), 1);
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    /// Truck kernel whose STEP reader yields one sphere.
    #[derive(Clone)]
    struct SphereStepKernel(TruckKernel);

    impl GeometryKernel for SphereStepKernel {
        type Solid = <TruckKernel as GeometryKernel>::Solid;

        fn create_box(&self, w: f64, h: f64, d: f64) -> KernelResult<Self::Solid> {
            self.0.create_box(w, h, d)
        }
        fn create_sphere(&self, r: f64) -> KernelResult<Self::Solid> {
            self.0.create_sphere(r)
        }
        fn create_cylinder(&self, r: f64, h: f64) -> KernelResult<Self::Solid> {
            self.0.create_cylinder(r, h)
        }
        fn create_cone(&self, r1: f64, r2: f64, h: f64) -> KernelResult<Self::Solid> {
            self.0.create_cone(r1, r2, h)
        }
        fn place(&self, s: &Self::Solid, p: &Placement) -> KernelResult<Self::Solid> {
            self.0.place(s, p)
        }
        fn boolean_union(&self, a: &Self::Solid, b: &Self::Solid) -> KernelResult<Self::Solid> {
            self.0.boolean_union(a, b)
        }
        fn boolean_intersect(&self, a: &Self::Solid, b: &Self::Solid) -> KernelResult<Self::Solid> {
            self.0.boolean_intersect(a, b)
        }
        fn boolean_subtract(&self, a: &Self::Solid, b: &Self::Solid) -> KernelResult<Self::Solid> {
            self.0.boolean_subtract(a, b)
        }
        fn tessellate(&self, s: &Self::Solid, tolerance: f64) -> KernelResult<crate::geometry::Mesh> {
            self.0.tessellate(s, tolerance)
        }
        fn export_step(&self, solids: &[&Self::Solid]) -> KernelResult<String> {
            self.0.export_step(solids)
        }
        fn import_step(&self, _step_data: &str) -> KernelResult<Vec<Self::Solid>> {
            Ok(vec![self.0.create_sphere(5.0)?])
        }
    }

    fn step_triangles(max_deviation: f64) -> usize {
        let mut w = ExecutionWorker::new(
            SphereStepKernel(TruckKernel::new()),
            Arc::new(AtomicBool::new(false)),
        );
        w.handle(WorkerRequest::Init);
        let resp = w.handle(WorkerRequest::LoadFile {
            filename: "ball.step".into(),
            format: FileFormat::Step,
            bytes: b"ISO-10303-21;".to_vec(),
        });
        assert!(matches!(resp, WorkerResponse::FileLoaded { .. }), "{:?}", resp);
        match w.handle(WorkerRequest::Tessellate { max_deviation }) {
            WorkerResponse::Tessellated { mesh, .. } => mesh.triangle_count(),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn test_step_solids_mesh_at_requested_resolution() {
        assert!(step_triangles(0.05) > step_triangles(0.5));
    }

    #[test]
    fn test_thread_exits_when_inbox_closes() {
        let alive = Arc::new(AtomicUsize::new(0));
        let slots = Arc::new(tokio::sync::Semaphore::new(1));
        let permit = slots.clone().try_acquire_owned().unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        let handle = spawn(
            7,
            TruckKernel::new(),
            Arc::new(AtomicBool::new(false)),
            rx,
            AliveGuard::new(alive.clone(), permit),
        )
        .unwrap();
        assert_eq!(slots.available_permits(), 0);
        drop(tx);
        handle.join().unwrap();
        assert_eq!(alive.load(Ordering::SeqCst), 0);
        assert_eq!(slots.available_permits(), 1);
    }
}
