//! Status aggregation
//!
//! Maps outcome counts to a run/suite status and recomputes persisted
//! statuses from the result store.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::models::{RunId, RunStatus, SuiteId, TestCase, TestResult};
use crate::store::{self, Store, StoreError};

/// Map outcome counts onto a status.
///
/// No results at all for a non-empty suite is PENDING; passes with some
/// cases still missing a result count as COMPLETED.
pub fn aggregate(total_enabled: usize, passed: usize, failed: usize) -> RunStatus {
    if total_enabled == 0 {
        RunStatus::Completed
    } else if failed == 0 && passed == total_enabled {
        RunStatus::Passed
    } else if passed > 0 && failed > 0 {
        RunStatus::Completed
    } else if passed == 0 && failed > 0 {
        RunStatus::Failed
    } else if passed == 0 {
        RunStatus::Pending
    } else {
        RunStatus::Completed
    }
}

/// Outcome counts over the enabled cases of one suite execution
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total_enabled: usize,
    pub passed: usize,
    pub failed: usize,
}

impl StatusCounts {
    /// Count the latest result of each case.
    ///
    /// Results are matched by case id; a result without one (recorded
    /// before ids were kept) falls back to matching the case name.
    pub fn from_latest<'a>(
        cases: impl IntoIterator<Item = &'a TestCase>,
        results: &[TestResult],
    ) -> Self {
        let mut by_id: HashMap<&str, &TestResult> = HashMap::new();
        let mut by_name: HashMap<&str, &TestResult> = HashMap::new();
        for result in results {
            let (latest, key) = match result.case_id.as_deref() {
                Some(id) => (&mut by_id, id),
                None => (&mut by_name, result.test_name.as_str()),
            };
            let newer = latest.get(key).map_or(true, |seen| {
                (result.created_at, result.id) >= (seen.created_at, seen.id)
            });
            if newer {
                latest.insert(key, result);
            }
        }

        let mut counts = Self::default();
        for case in cases {
            counts.total_enabled += 1;
            let latest = by_id
                .get(case.id.as_str())
                .or_else(|| by_name.get(case.name.as_str()));
            match latest {
                Some(result) if result.status.is_success() => counts.passed += 1,
                Some(_) => counts.failed += 1,
                None => {}
            }
        }
        counts
    }

    pub fn status(&self) -> RunStatus {
        aggregate(self.total_enabled, self.passed, self.failed)
    }

    pub fn pass_rate(&self) -> f64 {
        let executed = self.passed + self.failed;
        if executed == 0 {
            0.0
        } else {
            (self.passed as f64 / executed as f64) * 100.0
        }
    }
}

/// Recompute and persist the status of a suite and its run.
///
/// Counts come from the run's persisted results for the suite's enabled
/// cases, so calling this any number of times converges on the same status.
pub async fn recompute(
    store: &dyn Store,
    suite_id: SuiteId,
    run_id: RunId,
) -> Result<StatusCounts, StoreError> {
    let mut suite = store::require_suite(store, suite_id).await?;
    let cases = store.find_cases_by_suite(suite_id).await?;
    let results = store.find_by_run(run_id).await?;

    let counts = StatusCounts::from_latest(cases.iter().filter(|c| c.enabled), &results);
    let status = counts.status();
    debug!(
        "Suite {} run {}: {}/{} passed, {} failed -> {}",
        suite_id, run_id, counts.passed, counts.total_enabled, counts.failed, status
    );

    let run = store::update_run_status(store, run_id, status).await?;
    if run.status != status {
        warn!(
            "Run {} kept status {} instead of recomputed {}",
            run_id, run.status, status
        );
    }

    if suite.run_id == Some(run_id) {
        suite.status = status;
        store.save_suite(suite).await?;
    } else {
        debug!(
            "Suite {} has moved on to run {:?}, leaving its status alone",
            suite_id, suite.run_id
        );
    }

    Ok(counts)
}
