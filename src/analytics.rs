//! Result analytics
//!
//! Pass-rate summaries, daily trends and flaky-test detection computed from
//! stored results.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{ResultStatus, SuiteId, TestResult};

/// Results considered when computing stability
const STABILITY_WINDOW: usize = 10;

/// Aggregate figures over a set of results
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Percentage (0 - 100)
    pub pass_rate: f64,
    pub avg_duration_ms: f64,
    /// Pass percentage of the most recent results
    pub stability_last_10: f64,
}

/// Pass rate for one calendar day (UTC)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub pass_rate: f64,
    pub total_tests: usize,
    pub passed: usize,
    pub failed: usize,
}

/// A test whose history shows retries or mixed outcomes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlakyTest {
    pub test_name: String,
    pub total_runs: usize,
    pub passes: usize,
    pub fails: usize,
    pub retry_count: u64,
    pub pass_rate: f64,
    pub avg_duration_ms: f64,
    /// Higher is flakier
    pub flaky_score: f64,
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

fn average_duration(results: &[&TestResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    results.iter().map(|r| r.duration_ms as f64).sum::<f64>() / results.len() as f64
}

fn count_passed(results: &[&TestResult]) -> usize {
    results
        .iter()
        .filter(|r| r.status == ResultStatus::Passed)
        .count()
}

fn in_suite(results: &[TestResult], suite_id: SuiteId) -> Vec<TestResult> {
    results
        .iter()
        .filter(|r| r.suite_id == Some(suite_id))
        .cloned()
        .collect()
}

pub fn summary(results: &[TestResult]) -> Summary {
    let all: Vec<&TestResult> = results.iter().collect();
    let passed = count_passed(&all);
    let failed = all
        .iter()
        .filter(|r| r.status == ResultStatus::Failed)
        .count();

    let mut recent = all.clone();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    recent.truncate(STABILITY_WINDOW);
    let stability = if recent.is_empty() {
        100.0
    } else {
        percent(count_passed(&recent), recent.len())
    };

    Summary {
        total: all.len(),
        passed,
        failed,
        pass_rate: percent(passed, all.len()),
        avg_duration_ms: average_duration(&all),
        stability_last_10: stability,
    }
}

pub fn suite_summary(results: &[TestResult], suite_id: SuiteId) -> Summary {
    summary(&in_suite(results, suite_id))
}

/// Daily pass rates for results created within `days` of `now`, oldest first
pub fn trends(results: &[TestResult], days: u32, now: DateTime<Utc>) -> Vec<TrendPoint> {
    let since = now - Duration::days(i64::from(days));

    let mut by_date: BTreeMap<NaiveDate, Vec<&TestResult>> = BTreeMap::new();
    for result in results.iter().filter(|r| r.created_at > since) {
        by_date
            .entry(result.created_at.date_naive())
            .or_default()
            .push(result);
    }

    by_date
        .into_iter()
        .map(|(date, day)| {
            let passed = count_passed(&day);
            TrendPoint {
                date,
                pass_rate: percent(passed, day.len()),
                total_tests: day.len(),
                passed,
                failed: day.len() - passed,
            }
        })
        .collect()
}

pub fn suite_trends(
    results: &[TestResult],
    suite_id: SuiteId,
    days: u32,
    now: DateTime<Utc>,
) -> Vec<TrendPoint> {
    trends(&in_suite(results, suite_id), days, now)
}

/// Tests with at least two results and either retries or mixed outcomes,
/// flakiest first
pub fn flaky_tests(results: &[TestResult]) -> Vec<FlakyTest> {
    let mut by_name: BTreeMap<&str, Vec<&TestResult>> = BTreeMap::new();
    for result in results {
        by_name.entry(&result.test_name).or_default().push(result);
    }

    let mut flaky: Vec<FlakyTest> = by_name
        .into_iter()
        .filter(|(_, history)| history.len() >= 2)
        .filter_map(|(name, history)| {
            let passes = count_passed(&history);
            let fails = history
                .iter()
                .filter(|r| r.status == ResultStatus::Failed)
                .count();
            let retries: u64 = history.iter().map(|r| u64::from(r.retry_count)).sum();
            if retries <= 1 && (passes == 0 || fails == 0) {
                return None;
            }

            let total = history.len();
            let avg_duration_ms = average_duration(&history);
            let flaky_score =
                retries as f64 * 10.0 + percent(fails, total) * 5.0 + avg_duration_ms / 1000.0;
            Some(FlakyTest {
                test_name: name.to_string(),
                total_runs: total,
                passes,
                fails,
                retry_count: retries,
                pass_rate: percent(passes, total),
                avg_duration_ms,
                flaky_score,
            })
        })
        .collect();

    flaky.sort_by(|a, b| b.flaky_score.total_cmp(&a.flaky_score));
    flaky
}

pub fn suite_flaky_tests(results: &[TestResult], suite_id: SuiteId) -> Vec<FlakyTest> {
    flaky_tests(&in_suite(results, suite_id))
}
