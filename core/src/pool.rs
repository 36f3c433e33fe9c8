//! Bounded pool of execution workers.
//!
//! Each `acquire` starts a fresh worker thread; workers are never reused, so
//! no state can leak from one request to the next. A pool slot belongs to the
//! worker thread rather than to its handle: a terminated worker stuck in a
//! long kernel call keeps its slot until the thread really exits.

use crate::config::PoolConfig;
use crate::error::{CascadeError, CascadeResult};
use crate::kernel::{GeometryKernel, TruckKernel};
use crate::worker::protocol::{WorkerRequest, WorkerResponse};
use crate::worker::{self, AliveGuard, Envelope};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WorkerId(pub u64);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    /// Workers handed out and not yet released or terminated.
    pub live: usize,
    pub max_workers: usize,
    /// Workers created since the pool started.
    pub created: u64,
    /// Worker threads still running. Each holds a slot, so this never
    /// exceeds `max_workers` and may trail `live` after termination.
    pub threads_alive: usize,
}

struct LiveWorker {
    cancel: Arc<AtomicBool>,
    started: Instant,
}

/// State shared by the pool, its handles and the sweeper task.
struct Shared {
    live: Mutex<HashMap<WorkerId, LiveWorker>>,
    /// One permit per worker thread.
    slots: Arc<Semaphore>,
    next_id: AtomicU64,
    threads_alive: Arc<AtomicUsize>,
}

impl Shared {
    fn live(&self) -> MutexGuard<'_, HashMap<WorkerId, LiveWorker>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Signal a worker to stop and forget it. Idempotent.
    fn terminate(&self, id: WorkerId) -> bool {
        match self.live().remove(&id) {
            Some(worker) => {
                worker.cancel.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    fn sweep(&self, max_lifetime: Duration) -> usize {
        let now = Instant::now();
        let mut live = self.live();
        let expired: Vec<WorkerId> = live
            .iter()
            .filter(|(_, w)| now.duration_since(w.started) > max_lifetime)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            if let Some(worker) = live.remove(id) {
                worker.cancel.store(true, Ordering::SeqCst);
                warn!(worker = %id, "terminated worker past its lifetime");
            }
        }
        expired.len()
    }
}

pub struct WorkerPool<K: GeometryKernel = TruckKernel> {
    kernel: K,
    config: PoolConfig,
    shared: Arc<Shared>,
}

impl<K: GeometryKernel> WorkerPool<K> {
    pub fn new(kernel: K, config: PoolConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_workers));
        Self {
            kernel,
            config,
            shared: Arc::new(Shared {
                live: Mutex::new(HashMap::new()),
                slots,
                next_id: AtomicU64::new(1),
                threads_alive: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Start a fresh worker, or fail fast when every slot is held by a
    /// running thread.
    pub fn acquire(&self) -> CascadeResult<WorkerHandle> {
        let slot = self.shared.slots.clone().try_acquire_owned().map_err(|_| {
            warn!(
                max = self.config.max_workers,
                threads_alive = self.shared.threads_alive.load(Ordering::SeqCst),
                "worker pool exhausted"
            );
            CascadeError::PoolExhausted {
                max: self.config.max_workers,
            }
        })?;

        let id = WorkerId(self.shared.next_id.fetch_add(1, Ordering::SeqCst));
        let cancel = Arc::new(AtomicBool::new(false));
        let (inbox, rx) = mpsc::channel();

        let guard = AliveGuard::new(self.shared.threads_alive.clone(), slot);
        worker::spawn(id.0, self.kernel.clone(), cancel.clone(), rx, guard)
            .map_err(|e| CascadeError::WorkerLost(format!("failed to start {}: {}", id, e)))?;

        let mut live = self.shared.live();
        live.insert(
            id,
            LiveWorker {
                cancel: cancel.clone(),
                started: Instant::now(),
            },
        );
        debug!(worker = %id, live = live.len(), "worker acquired");

        Ok(WorkerHandle {
            id,
            inbox: Some(inbox),
            cancel,
            shared: self.shared.clone(),
        })
    }

    /// Terminate every worker older than the configured lifetime.
    pub fn sweep_expired(&self) -> usize {
        self.shared.sweep(self.config.max_lifetime)
    }

    /// Run `sweep_expired` periodically until the pool is dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_sweeper(&self) -> JoinHandle<()> {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let every = self.config.sweep_interval;
        let max_lifetime = self.config.max_lifetime;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                let swept = shared.sweep(max_lifetime);
                if swept > 0 {
                    info!(swept, "sweeper terminated expired workers");
                }
            }
        })
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            live: self.shared.live().len(),
            max_workers: self.config.max_workers,
            created: self.shared.next_id.load(Ordering::SeqCst) - 1,
            threads_alive: self.shared.threads_alive.load(Ordering::SeqCst),
        }
    }
}

/// Exclusive claim on one live worker.
///
/// Dropping the handle releases the worker, so early returns never leak it.
pub struct WorkerHandle {
    id: WorkerId,
    inbox: Option<mpsc::Sender<Envelope>>,
    cancel: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl WorkerHandle {
    /// Send one request and wait at most `timeout` for the answer.
    ///
    /// On timeout the worker is terminated before the error is returned.
    pub async fn send(&self, request: WorkerRequest, timeout: Duration) -> CascadeResult<WorkerResponse> {
        let stage = request.stage();
        let inbox = match &self.inbox {
            Some(inbox) if !self.cancel.load(Ordering::SeqCst) => inbox,
            _ => {
                return Err(CascadeError::WorkerLost(format!(
                    "{} was terminated before {}",
                    self.id, stage
                )))
            }
        };

        let (reply, answer) = oneshot::channel();
        inbox
            .send(Envelope { request, reply })
            .map_err(|_| CascadeError::WorkerLost(format!("{} exited before {}", self.id, stage)))?;

        match tokio::time::timeout(timeout, answer).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.shared.terminate(self.id);
                Err(CascadeError::WorkerLost(format!(
                    "{} exited during {}",
                    self.id, stage
                )))
            }
            Err(_) => {
                warn!(worker = %self.id, stage, timeout_ms = timeout.as_millis() as u64, "worker timed out");
                self.shared.terminate(self.id);
                Err(CascadeError::Timeout {
                    stage,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Terminate the worker and return its slot to the pool.
    pub fn release(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(inbox) = self.inbox.take() {
            drop(inbox);
            if self.shared.terminate(self.id) {
                debug!(worker = %self.id, "worker released");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(max: usize) -> WorkerPool {
        WorkerPool::new(TruckKernel::new(), PoolConfig::default().with_max_workers(max))
    }

    async fn wait_for_threads(pool: &WorkerPool, expected: usize) {
        for _ in 0..100 {
            if pool.stats().threads_alive == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("threads_alive stuck at {}", pool.stats().threads_alive);
    }

    #[tokio::test]
    async fn test_acquire_respects_ceiling() {
        let pool = pool(1);
        let first = pool.acquire().unwrap();
        assert!(matches!(pool.acquire(), Err(CascadeError::PoolExhausted { max: 1 })));

        first.release();
        wait_for_threads(&pool, 0).await;
        let second = pool.acquire().unwrap();
        assert_eq!(pool.stats().created, 2);
        drop(second);
        assert_eq!(pool.stats().live, 0);
        wait_for_threads(&pool, 0).await;
    }

    #[tokio::test]
    async fn test_send_round_trip() {
        let pool = pool(2);
        let handle = pool.acquire().unwrap();
        let resp = handle
            .send(WorkerRequest::Init, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(matches!(resp, WorkerResponse::Ready { ready: true, .. }));
    }

    #[tokio::test]
    async fn test_sweep_terminates_expired_workers() {
        let config = PoolConfig::default()
            .with_max_workers(2)
            .with_max_lifetime(Duration::from_millis(10));
        let pool = WorkerPool::new(TruckKernel::new(), config);
        let handle = pool.acquire().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(pool.sweep_expired(), 1);
        assert_eq!(pool.stats().live, 0);

        let err = handle
            .send(WorkerRequest::Init, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CascadeError::WorkerLost(_)));
        wait_for_threads(&pool, 0).await;
    }

    #[tokio::test]
    async fn test_sweeper_reaps_without_manual_sweep() {
        let config = PoolConfig::default()
            .with_max_workers(1)
            .with_max_lifetime(Duration::from_millis(20))
            .with_sweep_interval(Duration::from_millis(10));
        let pool = WorkerPool::new(TruckKernel::new(), config);
        let sweeper = pool.start_sweeper();
        let _handle = pool.acquire().unwrap();

        for _ in 0..100 {
            if pool.stats().live == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(pool.stats().live, 0);
        wait_for_threads(&pool, 0).await;
        assert!(pool.acquire().is_ok());
        sweeper.abort();
    }

    #[tokio::test]
    async fn test_sweeper_stops_with_pool() {
        let pool = WorkerPool::new(
            TruckKernel::new(),
            PoolConfig::default().with_sweep_interval(Duration::from_millis(5)),
        );
        let sweeper = pool.start_sweeper();
        drop(pool);
        tokio::time::timeout(Duration::from_secs(1), sweeper)
            .await
            .unwrap()
            .unwrap();
    }
}
