pub mod config;
pub mod error;
pub mod geometry;
pub mod kernel;
pub mod lint;
pub mod pool;
pub mod service;
pub mod worker;

pub use config::{PoolConfig, ServiceConfig, Timeouts};
pub use error::{CascadeError, CascadeResult, ErrorKind};
pub use geometry::{FileFormat, Mesh};
pub use lint::ScriptReport;
pub use pool::{PoolStats, WorkerPool};
pub use service::{CascadeService, ExecutionOutput, ImportOutput};
pub use worker::protocol::{GuiState, GuiValue, LogEntry, LogLevel};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
