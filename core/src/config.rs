//! Service tuning knobs.
//!
//! Everything has a working default; the backend overrides individual fields
//! from the environment.

use serde::Serialize;
use std::time::Duration;

/// Smallest and largest accepted mesh resolution (max chordal deviation).
pub const MESH_RESOLUTION_RANGE: (f64, f64) = (0.01, 1.0);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    /// Upper bound on live workers.
    pub max_workers: usize,
    /// Workers older than this are terminated by the sweeper.
    #[serde(with = "millis")]
    pub max_lifetime: Duration,
    #[serde(with = "millis")]
    pub sweep_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_lifetime: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_max_lifetime(mut self, max_lifetime: Duration) -> Self {
        self.max_lifetime = max_lifetime;
        self
    }

    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }
}

/// Per-stage budgets for worker requests.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeouts {
    #[serde(with = "millis")]
    pub init: Duration,
    #[serde(with = "millis")]
    pub evaluate: Duration,
    #[serde(with = "millis")]
    pub tessellate: Duration,
    #[serde(with = "millis")]
    pub export: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            init: Duration::from_secs(10),
            evaluate: Duration::from_secs(30),
            tessellate: Duration::from_secs(30),
            export: Duration::from_secs(30),
        }
    }
}

impl Timeouts {
    pub fn with_evaluate(mut self, evaluate: Duration) -> Self {
        self.evaluate = evaluate;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub pool: PoolConfig,
    pub timeouts: Timeouts,
    /// Longest script accepted, in bytes.
    pub max_code_len: usize,
    /// Resolution used when the caller does not pick one (imports).
    pub default_mesh_resolution: f64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            timeouts: Timeouts::default(),
            max_code_len: 256 * 1024,
            default_mesh_resolution: 0.1,
        }
    }
}

impl ServiceConfig {
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_max_code_len(mut self, max_code_len: usize) -> Self {
        self.max_code_len = max_code_len;
        self
    }
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = ServiceConfig::default();
        assert!(config.pool.max_workers > 0);
        let (lo, hi) = MESH_RESOLUTION_RANGE;
        assert!((lo..=hi).contains(&config.default_mesh_resolution));
    }

    #[test]
    fn test_serializes_durations_as_millis() {
        let timeouts = Timeouts::default().with_evaluate(Duration::from_millis(250));
        let config = ServiceConfig::default().with_timeouts(timeouts);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["timeouts"]["evaluate"], 250);
        assert_eq!(json["pool"]["maxWorkers"], 4);
    }
}
