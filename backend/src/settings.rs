use cascade_core::{PoolConfig, ServiceConfig, Timeouts};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Server settings, read from `CASCADE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    pub addr: SocketAddr,
    pub service: ServiceConfig,
    pub max_upload_bytes: usize,
    /// Directory of frontend assets served at `/`, if any.
    pub static_dir: Option<PathBuf>,
}

impl Settings {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let default_addr = DEFAULT_ADDR.parse::<SocketAddr>().map_err(|e| e.to_string())?;
        let addr = parse_or(&get, "CASCADE_ADDR", default_addr)?;

        let mut pool = PoolConfig::default();
        pool.max_workers = parse_or(&get, "CASCADE_MAX_WORKERS", pool.max_workers)?;
        if pool.max_workers == 0 {
            return Err("CASCADE_MAX_WORKERS must be at least 1".into());
        }
        let lifetime_ms = parse_or(&get, "CASCADE_WORKER_LIFETIME_MS", pool.max_lifetime.as_millis() as u64)?;
        let sweep_ms = parse_or(&get, "CASCADE_SWEEP_INTERVAL_MS", pool.sweep_interval.as_millis() as u64)?;
        if sweep_ms == 0 {
            return Err("CASCADE_SWEEP_INTERVAL_MS must be positive".into());
        }
        let pool = pool
            .with_max_lifetime(Duration::from_millis(lifetime_ms))
            .with_sweep_interval(Duration::from_millis(sweep_ms));

        let mut timeouts = Timeouts::default();
        let eval_ms = parse_or(&get, "CASCADE_EVAL_TIMEOUT_MS", timeouts.evaluate.as_millis() as u64)?;
        timeouts = timeouts.with_evaluate(Duration::from_millis(eval_ms));

        let service = ServiceConfig::default().with_pool(pool).with_timeouts(timeouts);

        Ok(Self {
            addr,
            service,
            max_upload_bytes: parse_or(&get, "CASCADE_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            static_dir: get("CASCADE_STATIC_DIR").map(PathBuf::from),
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| format!("invalid {}={:?}: {}", key, raw, e)),
        None => Ok(default),
    }
}
