//! Test result models
//!
//! One result is recorded per executed case attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ResultId, RunId, SuiteId};

/// Outcome of a single case execution
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResultStatus {
    Passed,
    Failed,
}

impl ResultStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            ResultStatus::Passed => "✓",
            ResultStatus::Failed => "✗",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResultStatus::Passed)
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultStatus::Passed => write!(f, "PASSED"),
            ResultStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Recorded outcome of executing one case once
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Assigned by the store on create
    #[serde(default)]
    pub id: Option<ResultId>,
    /// Case that produced the result; absent for ad-hoc element checks
    #[serde(default)]
    pub case_id: Option<String>,
    pub test_name: String,
    pub status: ResultStatus,
    pub duration_ms: u64,
    #[serde(default)]
    pub retry_count: u32,
    pub error_message: Option<String>,
    #[serde(default)]
    pub flaky_score: f64,
    pub run_id: Option<RunId>,
    pub suite_id: Option<SuiteId>,
    pub executed_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TestResult {
    fn new(test_name: impl Into<String>, status: ResultStatus, duration_ms: u64) -> Self {
        Self {
            id: None,
            case_id: None,
            test_name: test_name.into(),
            status,
            duration_ms,
            retry_count: 0,
            error_message: None,
            flaky_score: 0.0,
            run_id: None,
            suite_id: None,
            executed_by: None,
            created_at: Utc::now(),
        }
    }

    pub fn pass(test_name: impl Into<String>, duration_ms: u64) -> Self {
        Self::new(test_name, ResultStatus::Passed, duration_ms)
    }

    pub fn fail(test_name: impl Into<String>, duration_ms: u64, message: impl Into<String>) -> Self {
        Self::new(test_name, ResultStatus::Failed, duration_ms).with_message(message)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_case(mut self, case_id: impl Into<String>) -> Self {
        self.case_id = Some(case_id.into());
        self
    }

    pub fn with_run(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_suite(mut self, suite_id: Option<SuiteId>) -> Self {
        self.suite_id = suite_id;
        self
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.executed_by = user;
        self
    }

    /// Heuristic instability score: retries weigh 10 each, plus duration in seconds
    pub fn compute_flaky_score(&self) -> f64 {
        f64::from(self.retry_count) * 10.0 + self.duration_ms as f64 / 1000.0
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.status.symbol(),
            self.test_name,
            self.duration_ms
        )?;
        if self.retry_count > 0 {
            write!(f, " (retries: {})", self.retry_count)?;
        }
        if let Some(msg) = &self.error_message {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}
