//! Suite execution engine
//!
//! Runs every enabled case of a suite, either sequentially in suite order or
//! fanned out over the UI and API worker pools, then recomputes the run and
//! suite status from the persisted results.

use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use super::case_runner::CaseRunner;
use super::pool::WorkerPools;
use super::status::{self, StatusCounts};
use crate::models::{RunId, RunStatus, SuiteId, TestCase, TestKind, TestResult, TestRun};
use crate::store::{self, Store, StoreError};
use crate::utils::timer::Timer;

/// Largest accepted `parallel_threads`
pub const MAX_PARALLELISM: i64 = 8;

/// Engine errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("{0}")]
    NotFound(StoreError),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::RunNotFound(_)
            | StoreError::SuiteNotFound(_)
            | StoreError::CaseNotFound(_) => EngineError::NotFound(e),
            other => EngineError::Store(other),
        }
    }
}

/// Accept 1..=8, fall back to 1 for anything else
pub fn clamp_parallelism(requested: i64) -> Option<u8> {
    if (1..=MAX_PARALLELISM).contains(&requested) {
        u8::try_from(requested).ok()
    } else {
        None
    }
}

/// How a suite execution was carried out
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "threads", rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Nothing enabled; completed without touching the pools
    Immediate,
    Sequential,
    Parallel(u8),
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Immediate => write!(f, "IMMEDIATE"),
            ExecutionMode::Sequential => write!(f, "SEQUENTIAL"),
            ExecutionMode::Parallel(threads) => write!(f, "PARALLEL x{threads}"),
        }
    }
}

/// Outcome of one suite execution
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExecutionSummary {
    pub suite_id: SuiteId,
    pub run_id: RunId,
    pub mode: ExecutionMode,
    pub counts: StatusCounts,
    pub status: RunStatus,
    pub duration_ms: u64,
}

impl ExecutionSummary {
    pub fn pass_rate(&self) -> f64 {
        self.counts.pass_rate()
    }
}

impl fmt::Display for ExecutionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Suite {} run {} [{}] {} - Pass: {}/{} ({:.1}%) in {}ms",
            self.suite_id,
            self.run_id,
            self.mode,
            self.status,
            self.counts.passed,
            self.counts.total_enabled,
            self.pass_rate(),
            self.duration_ms
        )
    }
}

/// Orchestrates suite executions over injected pools
pub struct SuiteEngine {
    runner: CaseRunner,
    pools: Arc<WorkerPools>,
}

impl SuiteEngine {
    pub fn new(runner: CaseRunner, pools: Arc<WorkerPools>) -> Self {
        Self { runner, pools }
    }

    /// Bound each case execution; an expired case is recorded as FAILED
    /// after its browser session is closed
    pub fn with_unit_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.runner = self.runner.with_attempt_timeout(timeout);
        self
    }

    pub fn runner(&self) -> &CaseRunner {
        &self.runner
    }

    pub fn pools(&self) -> &Arc<WorkerPools> {
        &self.pools
    }

    fn store(&self) -> &dyn Store {
        self.runner.store().as_ref()
    }

    /// Execute all enabled cases of a suite under the given run
    pub async fn run(
        &self,
        suite_id: SuiteId,
        run_id: RunId,
        parallelism: i64,
        user: Option<&str>,
    ) -> Result<ExecutionSummary, EngineError> {
        let timer = Timer::start(format!("suite {suite_id}"));
        let threads = clamp_parallelism(parallelism).unwrap_or_else(|| {
            warn!(
                "Invalid parallel_threads {} for suite {}, defaulting to 1",
                parallelism, suite_id
            );
            1
        });

        let store = self.store();
        let mut suite = store::require_suite(store, suite_id).await?;
        let mut run = store::require_run(store, run_id).await?;

        run.parallel_threads = threads;
        run.start();
        let run = store.save_run(run).await?;

        suite.run_id = Some(run.id);
        suite.status = RunStatus::Running;
        store.save_suite(suite).await?;

        let cases = store.find_cases_by_suite(suite_id).await?;
        if cases.is_empty() {
            warn!("Empty suite {} - marking COMPLETE immediately", suite_id);
            return self
                .finish(suite_id, run_id, ExecutionMode::Immediate, timer)
                .await;
        }

        let enabled: Vec<TestCase> = cases.into_iter().filter(|c| c.enabled).collect();
        if enabled.is_empty() {
            warn!("All test cases disabled for suite {} - marking complete", suite_id);
            return self
                .finish(suite_id, run_id, ExecutionMode::Immediate, timer)
                .await;
        }

        let mode = if threads == 1 {
            info!("Executing suite {} in SEQUENTIAL mode", suite_id);
            self.run_sequential(&enabled, &run, user).await;
            ExecutionMode::Sequential
        } else {
            info!(
                "Executing suite {} in PARALLEL mode ({} threads)",
                suite_id, threads
            );
            self.run_parallel(enabled, &run, user).await;
            ExecutionMode::Parallel(threads)
        };

        self.finish(suite_id, run_id, mode, timer).await
    }

    async fn finish(
        &self,
        suite_id: SuiteId,
        run_id: RunId,
        mode: ExecutionMode,
        timer: Timer,
    ) -> Result<ExecutionSummary, EngineError> {
        let counts = status::recompute(self.store(), suite_id, run_id).await?;
        let summary = ExecutionSummary {
            suite_id,
            run_id,
            mode,
            counts,
            status: counts.status(),
            duration_ms: timer.elapsed_ms(),
        };

        info!(
            "Suite {} execution completed in {}ms - Pass: {}/{} ({:.1}%) -> {}",
            suite_id,
            summary.duration_ms,
            counts.passed,
            counts.total_enabled,
            summary.pass_rate(),
            summary.status
        );
        Ok(summary)
    }

    async fn run_sequential(&self, cases: &[TestCase], run: &TestRun, user: Option<&str>) {
        let mut passed = 0;
        let mut failed = 0;

        for case in cases {
            info!("Sequential execution: {} - {}", case.id, case.name);
            let outcome = AssertUnwindSafe(self.runner.execute(case, run, user))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(result)) if result.status.is_success() => passed += 1,
                Ok(Ok(result)) => {
                    failed += 1;
                    warn!(
                        "✗ FAILED: {} - {}",
                        case.id,
                        result.error_message.unwrap_or_default()
                    );
                }
                Ok(Err(e)) => {
                    failed += 1;
                    error!("✗ EXCEPTION in test case {}: {}", case.id, e);
                    self.record_failure(case, run, user, e.to_string()).await;
                }
                Err(payload) => {
                    failed += 1;
                    let message = panic_message(payload.as_ref());
                    error!("✗ PANIC in test case {}: {}", case.id, message);
                    self.record_failure(case, run, user, message).await;
                }
            }
        }

        info!(
            "Sequential suite finished: {} passed, {} failed of {}",
            passed,
            failed,
            cases.len()
        );
    }

    async fn run_parallel(&self, cases: Vec<TestCase>, run: &TestRun, user: Option<&str>) {
        let (ui_cases, api_cases): (Vec<_>, Vec<_>) = cases
            .into_iter()
            .partition(|c| c.test_kind() == TestKind::Ui);
        info!(
            "Dispatching {} UI cases to {} ({} workers) and {} API cases to {} ({} workers)",
            ui_cases.len(),
            self.pools.ui.name(),
            self.pools.ui.config().max_concurrency,
            api_cases.len(),
            self.pools.api.name(),
            self.pools.api.config().max_concurrency
        );

        let mut units = Vec::with_capacity(ui_cases.len() + api_cases.len());
        for case in ui_cases.into_iter().chain(api_cases) {
            let pool = self.pools.for_kind(case.test_kind());
            let runner = self.runner.clone();
            let unit_case = case.clone();
            let unit_run = run.clone();
            let unit_user = user.map(str::to_string);

            let unit = async move {
                runner
                    .execute(&unit_case, &unit_run, unit_user.as_deref())
                    .await
            };
            units.push((case, pool.submit(unit).await));
        }

        // fan-in barrier: every submitted unit settles before statuses are recomputed
        let outcomes = join_all(units.into_iter().map(|(case, submitted)| async move {
            let failure = match submitted {
                Ok(handle) => match handle.await {
                    Ok(Ok(_)) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(e) if e.is_panic() => {
                        Some(format!("panicked: {}", panic_message(e.into_panic().as_ref())))
                    }
                    Err(e) => Some(e.to_string()),
                },
                Err(e) => Some(e.to_string()),
            };
            (case, failure)
        }))
        .await;

        let mut failures = 0;
        for (case, failure) in outcomes {
            if let Some(message) = failure {
                failures += 1;
                error!("✗ UNIT FAILED: {} - {}", case.id, message);
                self.record_failure(&case, run, user, message).await;
            }
        }
        if failures > 0 {
            warn!("{} parallel units failed outside the case runner", failures);
        }
    }

    /// Persist a synthetic FAILED result for a case whose unit never produced one
    async fn record_failure(
        &self,
        case: &TestCase,
        run: &TestRun,
        user: Option<&str>,
        message: String,
    ) {
        let result = TestResult::fail(&case.name, 0, format!("Exception: {message}"))
            .with_case(&case.id)
            .with_run(run.id)
            .with_suite(case.suite_id)
            .with_user(user.map(str::to_string));

        if let Err(e) = self.store().create_result(result).await {
            error!("Could not record failure for {}: {}", case.id, e);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::driver::fake::{FakeApiDriver, FakeUiDriver};
    use crate::executor::pool::PoolConfig;
    use crate::models::{
        CaseKind, Expectation, HttpMethod, Locator, Priority, TestSuite, UiAction, UiStep,
    };
    use crate::store::{CaseStore, MemoryStore, RunStore, SuiteStore};

    pub fn ui_case(id: &str, locator: &str) -> TestCase {
        TestCase {
            id: id.to_string(),
            name: format!("ui {id}"),
            url: "https://example.com".to_string(),
            kind: CaseKind::Ui {
                locator: Locator::id(locator),
                steps: vec![UiStep::new(UiAction::Click, "")],
            },
            expected: Expectation::Succeeds,
            priority: Priority::Medium,
            enabled: true,
            description: String::new(),
            suite_id: None,
        }
    }

    pub fn api_case(id: &str, url: &str) -> TestCase {
        TestCase {
            id: id.to_string(),
            name: format!("api {id}"),
            url: url.to_string(),
            kind: CaseKind::Api {
                method: HttpMethod::Get,
                body: None,
            },
            expected: Expectation::Succeeds,
            priority: Priority::Medium,
            enabled: true,
            description: String::new(),
            suite_id: None,
        }
    }

    pub fn small_pools(ui: usize, api: usize) -> Arc<WorkerPools> {
        let config = |max_concurrency| PoolConfig {
            max_concurrency,
            queue_capacity: 20,
            submit_timeout_ms: 1_000,
            drain_timeout_secs: 5,
        };
        Arc::new(WorkerPools::new(config(ui), config(api)))
    }

    pub struct Harness {
        pub store: Arc<MemoryStore>,
        pub ui: Arc<FakeUiDriver>,
        pub api: Arc<FakeApiDriver>,
        pub engine: SuiteEngine,
    }

    impl Harness {
        pub fn new(ui: FakeUiDriver, api: FakeApiDriver, pools: Arc<WorkerPools>) -> Self {
            let store = Arc::new(MemoryStore::new());
            let ui = Arc::new(ui);
            let api = Arc::new(api);
            let runner = CaseRunner::new(store.clone(), ui.clone(), api.clone())
                .with_strict_expectations(true);
            Self {
                store,
                ui,
                api,
                engine: SuiteEngine::new(runner, pools),
            }
        }

        /// Create a suite with the given cases and a fresh run
        pub async fn suite(&self, cases: Vec<TestCase>) -> (SuiteId, RunId) {
            let suite = self.store.save_suite(TestSuite::new("suite")).await.unwrap();
            for mut case in cases {
                case.suite_id = Some(suite.id);
                self.store.save_case(case).await.unwrap();
            }
            let run = self.store.save_run(TestRun::new("run")).await.unwrap();
            (suite.id, run.id)
        }
    }
}
