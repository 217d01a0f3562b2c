//! Bounded worker pools
//!
//! Each pool runs units as tokio tasks gated by two semaphores: one bounds
//! how many units execute at once, the other bounds how many are admitted
//! (running plus queued). Submitting past the admission limit waits up to
//! the submit timeout and then fails with [`PoolError::Saturated`].

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::TestKind;

/// Pool errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Pool '{pool}' saturated: no capacity after {waited_ms}ms")]
    Saturated { pool: String, waited_ms: u64 },

    #[error("Pool '{0}' is shut down")]
    Closed(String),
}

/// Sizing and timeouts of one pool
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Units executing at once
    pub max_concurrency: usize,
    /// Units allowed to wait for a worker
    pub queue_capacity: usize,
    pub submit_timeout_ms: u64,
    pub drain_timeout_secs: u64,
}

impl PoolConfig {
    pub fn ui() -> Self {
        Self {
            max_concurrency: 4,
            queue_capacity: 50,
            ..Self::default()
        }
    }

    pub fn api() -> Self {
        Self {
            max_concurrency: 8,
            queue_capacity: 100,
            ..Self::default()
        }
    }

    fn capacity(&self) -> usize {
        self.max_concurrency.max(1) + self.queue_capacity
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            queue_capacity: 50,
            submit_timeout_ms: 30_000,
            drain_timeout_secs: 60,
        }
    }
}

/// A named, bounded execution pool
pub struct WorkerPool {
    name: String,
    config: PoolConfig,
    workers: Arc<Semaphore>,
    admission: Arc<Semaphore>,
    accepting: AtomicBool,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, config: PoolConfig) -> Self {
        let workers = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        let admission = Arc::new(Semaphore::new(config.capacity()));
        Self {
            name: name.into(),
            config,
            workers,
            admission,
            accepting: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Units admitted and not yet finished
    pub fn in_flight(&self) -> usize {
        self.config.capacity() - self.admission.available_permits()
    }

    /// Admit a unit and spawn it once a worker is free
    pub async fn submit<F, T>(&self, unit: F) -> Result<JoinHandle<T>, PoolError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(PoolError::Closed(self.name.clone()));
        }

        let wait = Duration::from_millis(self.config.submit_timeout_ms);
        let admitted = match tokio::time::timeout(wait, self.admission.clone().acquire_owned()).await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed(self.name.clone())),
            Err(_) => {
                warn!("Pool {} saturated after {}ms", self.name, wait.as_millis());
                return Err(PoolError::Saturated {
                    pool: self.name.clone(),
                    waited_ms: self.config.submit_timeout_ms,
                });
            }
        };

        let workers = self.workers.clone();
        let pool = self.name.clone();
        Ok(tokio::spawn(async move {
            let _admitted = admitted;
            let _worker = workers.acquire_owned().await;
            debug!("{} worker picked up a unit", pool);
            unit.await
        }))
    }

    /// Stop admitting units and wait for admitted ones to finish.
    ///
    /// Returns false if the drain timeout elapsed first.
    pub async fn shutdown(&self) -> bool {
        self.accepting.store(false, Ordering::SeqCst);

        let capacity = self.config.capacity() as u32;
        let drain = Duration::from_secs(self.config.drain_timeout_secs);
        let drained = matches!(
            tokio::time::timeout(drain, self.admission.acquire_many(capacity)).await,
            Ok(Ok(_))
        );
        self.admission.close();

        if drained {
            info!("Pool {} drained and shut down", self.name);
        } else {
            warn!(
                "Pool {} shut down with {} units still running after {}s",
                self.name,
                self.in_flight(),
                self.config.drain_timeout_secs
            );
        }
        drained
    }
}

/// The UI and API pools, segregated by test kind
pub struct WorkerPools {
    pub ui: WorkerPool,
    pub api: WorkerPool,
}

impl WorkerPools {
    pub fn new(ui: PoolConfig, api: PoolConfig) -> Self {
        Self {
            ui: WorkerPool::new("ui-test", ui),
            api: WorkerPool::new("api-test", api),
        }
    }

    pub fn for_kind(&self, kind: TestKind) -> &WorkerPool {
        match kind {
            TestKind::Ui => &self.ui,
            TestKind::Api => &self.api,
        }
    }

    /// Shut both pools down, draining queued work
    pub async fn shutdown(&self) -> bool {
        let (ui, api) = tokio::join!(self.ui.shutdown(), self.api.shutdown());
        ui && api
    }
}

impl Default for WorkerPools {
    fn default() -> Self {
        Self::new(PoolConfig::ui(), PoolConfig::api())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn small(max_concurrency: usize, queue_capacity: usize) -> PoolConfig {
        PoolConfig {
            max_concurrency,
            queue_capacity,
            submit_timeout_ms: 100,
            drain_timeout_secs: 5,
        }
    }

    #[test]
    fn test_default_pool_sizes() {
        let pools = WorkerPools::default();
        assert_eq!(pools.ui.config().max_concurrency, 4);
        assert_eq!(pools.ui.config().queue_capacity, 50);
        assert_eq!(pools.api.config().max_concurrency, 8);
        assert_eq!(pools.api.config().queue_capacity, 100);
        assert_eq!(pools.for_kind(TestKind::Ui).name(), "ui-test");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new("bounded", small(2, 10));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let running = running.clone();
            let peak = peak.clone();
            handles.push(
                pool.submit(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap(),
            );
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturated_submit_times_out() {
        let pool = WorkerPool::new("tiny", small(1, 1));
        let _a = pool
            .submit(tokio::time::sleep(Duration::from_secs(10)))
            .await
            .unwrap();
        let _b = pool
            .submit(tokio::time::sleep(Duration::from_secs(10)))
            .await
            .unwrap();

        let err = pool
            .submit(tokio::time::sleep(Duration::from_secs(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Saturated { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_then_rejects() {
        let pool = WorkerPool::new("drain", small(1, 4));
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let done = done.clone();
            pool.submit(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                done.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }

        assert!(pool.shutdown().await);
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(
            pool.submit(async {}).await.unwrap_err(),
            PoolError::Closed("drain".to_string())
        );
    }

    #[tokio::test]
    async fn test_panicking_unit_surfaces_as_join_error() {
        let pool = WorkerPool::new("panic", small(1, 1));
        let handle = pool
            .submit(async {
                panic!("unit blew up");
            })
            .await
            .unwrap();
        let err = handle.await.unwrap_err();
        assert!(err.is_panic());
        // the permit is released even though the unit panicked
        assert_eq!(pool.in_flight(), 0);
    }
}
