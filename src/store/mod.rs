//! Run, suite, case and result stores
//!
//! The engine and dispatcher only see these traits; [`MemoryStore`] is the
//! bundled implementation and [`StoreSnapshot`] persists it between CLI
//! invocations.

mod memory;
mod snapshot;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{RunId, RunStatus, SuiteId, TestCase, TestResult, TestRun, TestSuite};

pub use memory::MemoryStore;
pub use snapshot::StoreSnapshot;

/// Store errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Test run {0} not found")]
    RunNotFound(RunId),

    #[error("Test suite {0} not found")]
    SuiteNotFound(SuiteId),

    #[error("Test case {0} not found")]
    CaseNotFound(String),

    #[error("Test case {0} already exists")]
    DuplicateCase(String),

    #[error("Result '{test_name}' references missing {reference}")]
    DanglingReference {
        test_name: String,
        reference: String,
    },
}

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a run (id 0) or replace an existing one
    async fn save_run(&self, run: TestRun) -> Result<TestRun, StoreError>;

    async fn find_run(&self, id: RunId) -> Result<Option<TestRun>, StoreError>;

    async fn find_runs(&self) -> Result<Vec<TestRun>, StoreError>;
}

#[async_trait]
pub trait SuiteStore: Send + Sync {
    /// Insert a suite (id 0) or replace an existing one
    async fn save_suite(&self, suite: TestSuite) -> Result<TestSuite, StoreError>;

    async fn find_suite(&self, id: SuiteId) -> Result<Option<TestSuite>, StoreError>;

    async fn find_suites(&self) -> Result<Vec<TestSuite>, StoreError>;

    /// Delete a suite together with the cases it owns
    async fn delete_suite(&self, id: SuiteId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Insert or replace a case; its owning suite must exist
    async fn save_case(&self, case: TestCase) -> Result<TestCase, StoreError>;

    async fn find_case(&self, id: &str) -> Result<Option<TestCase>, StoreError>;

    /// Cases of a suite in insertion order
    async fn find_cases_by_suite(&self, suite_id: SuiteId) -> Result<Vec<TestCase>, StoreError>;
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Append a result; assigns its id and flaky score
    async fn create_result(&self, result: TestResult) -> Result<TestResult, StoreError>;

    /// Results of one case within a run, latest first
    async fn find_by_run_and_name(
        &self,
        run_id: RunId,
        test_name: &str,
    ) -> Result<Vec<TestResult>, StoreError>;

    async fn find_by_run(&self, run_id: RunId) -> Result<Vec<TestResult>, StoreError>;

    async fn find_by_suite(&self, suite_id: SuiteId) -> Result<Vec<TestResult>, StoreError>;

    async fn find_results(&self) -> Result<Vec<TestResult>, StoreError>;

    /// Distinguishes "not executed yet" from "executed with no passes"
    async fn has_results(&self, run_id: RunId) -> Result<bool, StoreError> {
        Ok(!self.find_by_run(run_id).await?.is_empty())
    }
}

/// Everything the engine needs from persistence
pub trait Store: RunStore + SuiteStore + CaseStore + ResultStore {}

impl<T> Store for T where T: RunStore + SuiteStore + CaseStore + ResultStore {}

/// Load a run or fail with [`StoreError::RunNotFound`]
pub async fn require_run(store: &dyn Store, id: RunId) -> Result<TestRun, StoreError> {
    store.find_run(id).await?.ok_or(StoreError::RunNotFound(id))
}

/// Load a suite or fail with [`StoreError::SuiteNotFound`]
pub async fn require_suite(store: &dyn Store, id: SuiteId) -> Result<TestSuite, StoreError> {
    store
        .find_suite(id)
        .await?
        .ok_or(StoreError::SuiteNotFound(id))
}

/// Load a case or fail with [`StoreError::CaseNotFound`]
pub async fn require_case(store: &dyn Store, id: &str) -> Result<TestCase, StoreError> {
    store
        .find_case(id)
        .await?
        .ok_or_else(|| StoreError::CaseNotFound(id.to_string()))
}

/// Set a run's status, refusing to regress a terminal status
pub async fn update_run_status(
    store: &dyn Store,
    id: RunId,
    status: RunStatus,
) -> Result<TestRun, StoreError> {
    let mut run = require_run(store, id).await?;
    if !run.advance(status) {
        tracing::warn!(
            "Ignoring status change {} -> {} for run {}",
            run.status,
            status,
            id
        );
        return Ok(run);
    }
    store.save_run(run).await
}
