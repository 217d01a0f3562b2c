//! Output formatters
//!
//! Table and JSON renderings of suites, runs, results and analytics.

use serde::Serialize;

use crate::analytics::{FlakyTest, Summary, TrendPoint};
use crate::dispatch::ConsumerStats;
use crate::executor::ExecutionSummary;
use crate::models::{DeadLetter, ResultStatus, RunStatus, TestResult, TestRun, TestSuite};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            _ => None,
        }
    }
}

/// A run paired with whether any result was recorded for it
#[derive(Clone, Debug, Serialize)]
pub struct RunOverview {
    #[serde(flatten)]
    pub run: TestRun,
    pub has_results: bool,
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    fn json<T: Serialize + ?Sized>(&self, value: &T) -> Option<String> {
        match self.format {
            OutputFormat::Table => None,
            OutputFormat::Json => Some(serde_json::to_string(value).unwrap_or_default()),
            OutputFormat::JsonPretty => {
                Some(serde_json::to_string_pretty(value).unwrap_or_default())
            }
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if self.colorize {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    fn status(&self, status: RunStatus) -> String {
        let label = status.to_string();
        match status {
            RunStatus::Passed => self.paint(&label, "32"),
            RunStatus::Failed => self.paint(&label, "31"),
            RunStatus::Running => self.paint(&label, "33"),
            RunStatus::Pending | RunStatus::Completed => label,
        }
    }

    fn result_status(&self, status: ResultStatus) -> String {
        let label = format!("{} {}", status.symbol(), status);
        match status {
            ResultStatus::Passed => self.paint(&label, "32"),
            ResultStatus::Failed => self.paint(&label, "31"),
        }
    }

    /// Format the outcome of a suite execution
    pub fn format_execution(&self, summary: &ExecutionSummary, results: &[TestResult]) -> String {
        #[derive(Serialize)]
        struct Execution<'a> {
            summary: &'a ExecutionSummary,
            results: &'a [TestResult],
        }
        if let Some(json) = self.json(&Execution { summary, results }) {
            return json;
        }

        let mut output = String::new();
        output.push_str("\n╔══════════════════════════════════════════════════════════════╗\n");
        output.push_str(&format!(
            "║  Suite {:<6} Run {:<6} {:<33}║\n",
            summary.suite_id,
            summary.run_id,
            summary.mode.to_string()
        ));
        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");
        for result in results {
            output.push_str(&format!(
                "║  {:32} {} [{:>7}ms]\n",
                truncate(&result.test_name, 32),
                self.result_status(result.status),
                result.duration_ms
            ));
            if let Some(message) = &result.error_message {
                output.push_str(&format!("║      {}\n", truncate(message, 56)));
            }
        }
        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");
        output.push_str(&format!(
            "║  Status: {} | Pass: {}/{} | Fail: {} | Pass Rate: {:5.1}%\n",
            self.status(summary.status),
            summary.counts.passed,
            summary.counts.total_enabled,
            summary.counts.failed,
            summary.pass_rate()
        ));
        output.push_str(&format!("║  Duration: {}ms\n", summary.duration_ms));
        output.push_str("╚══════════════════════════════════════════════════════════════╝\n");
        output
    }

    pub fn format_results(&self, results: &[TestResult]) -> String {
        if let Some(json) = self.json(results) {
            return json;
        }
        if results.is_empty() {
            return "No results".to_string();
        }
        results
            .iter()
            .map(|result| {
                let line = result.to_string();
                match result.status {
                    ResultStatus::Passed => self.paint(&line, "32"),
                    ResultStatus::Failed => self.paint(&line, "31"),
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn format_suites(&self, suites: &[TestSuite]) -> String {
        if let Some(json) = self.json(suites) {
            return json;
        }
        if suites.is_empty() {
            return "No suites".to_string();
        }

        let mut output = format!(
            "{:>5}  {:30} {:10} {:>6}  {}\n",
            "ID", "NAME", "STATUS", "RUN", "CREATED"
        );
        output.push_str(&"-".repeat(72));
        output.push('\n');
        for suite in suites {
            output.push_str(&format!(
                "{:>5}  {:30} {:10} {:>6}  {}\n",
                suite.id,
                truncate(&suite.name, 30),
                self.status(suite.status),
                suite
                    .run_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                suite.created_at.format("%Y-%m-%d %H:%M")
            ));
        }
        output
    }

    pub fn format_runs(&self, runs: &[RunOverview]) -> String {
        if let Some(json) = self.json(runs) {
            return json;
        }
        if runs.is_empty() {
            return "No runs".to_string();
        }

        let mut output = format!(
            "{:>5}  {:30} {:10} {:>7}  {:8}\n",
            "ID", "NAME", "STATUS", "THREADS", "RESULTS"
        );
        output.push_str(&"-".repeat(68));
        output.push('\n');
        for overview in runs {
            let run = &overview.run;
            output.push_str(&format!(
                "{:>5}  {:30} {:10} {:>7}  {:8}\n",
                run.id,
                truncate(&run.name, 30),
                self.status(run.status),
                run.parallel_threads,
                if overview.has_results { "yes" } else { "none" }
            ));
        }
        output
    }

    pub fn format_summary(&self, summary: &Summary) -> String {
        if let Some(json) = self.json(summary) {
            return json;
        }
        format!(
            "Results: {} | Passed: {} | Failed: {}\n\
             Pass Rate: {:.1}% | Avg Duration: {:.0}ms | Stability (last 10): {:.1}%",
            summary.total,
            summary.passed,
            summary.failed,
            summary.pass_rate,
            summary.avg_duration_ms,
            summary.stability_last_10
        )
    }

    pub fn format_trends(&self, points: &[TrendPoint]) -> String {
        if let Some(json) = self.json(points) {
            return json;
        }
        if points.is_empty() {
            return "No results in window".to_string();
        }

        let mut output = format!(
            "{:10}  {:>6}  {:>6}  {:>6}  {:>8}\n",
            "DATE", "TOTAL", "PASS", "FAIL", "RATE"
        );
        for point in points {
            output.push_str(&format!(
                "{:10}  {:>6}  {:>6}  {:>6}  {:>7.1}%\n",
                point.date, point.total_tests, point.passed, point.failed, point.pass_rate
            ));
        }
        output
    }

    pub fn format_flaky(&self, tests: &[FlakyTest]) -> String {
        if let Some(json) = self.json(tests) {
            return json;
        }
        if tests.is_empty() {
            return "No flaky tests detected".to_string();
        }

        let mut output = format!(
            "{:32} {:>5} {:>5} {:>5} {:>7} {:>7} {:>8}\n",
            "TEST", "RUNS", "PASS", "FAIL", "RETRIES", "RATE", "SCORE"
        );
        for test in tests {
            output.push_str(&format!(
                "{:32} {:>5} {:>5} {:>5} {:>7} {:>6.1}% {:>8.1}\n",
                truncate(&test.test_name, 32),
                test.total_runs,
                test.passes,
                test.fails,
                test.retry_count,
                test.pass_rate,
                test.flaky_score
            ));
        }
        output
    }

    pub fn format_consumer_stats(&self, stats: &ConsumerStats) -> String {
        if let Some(json) = self.json(stats) {
            return json;
        }
        format!(
            "Received: {} | Succeeded: {} | Dead-lettered: {} | Dropped: {} | \
             Suites completed: {} | Suites failed: {}",
            stats.received,
            stats.succeeded,
            stats.dead_lettered,
            stats.abandoned,
            stats.suites_completed,
            stats.suites_failed
        )
    }

    pub fn format_dead_letters(&self, letters: &[DeadLetter]) -> String {
        if let Some(json) = self.json(letters) {
            return json;
        }
        if letters.is_empty() {
            return "No dead letters".to_string();
        }

        let mut output = String::new();
        for letter in letters {
            output.push_str(&format!(
                "{}  attempts={}  {}\n    {}\n",
                letter.failed_at.format("%Y-%m-%d %H:%M:%S"),
                letter.attempts,
                self.paint(&letter.reason, "31"),
                letter.payload
            ));
        }
        output
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let cut: String = text.chars().take(width.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics;

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("TABLE"), Some(OutputFormat::Table));
        assert_eq!(
            OutputFormat::from_str("json-pretty"),
            Some(OutputFormat::JsonPretty)
        );
        assert_eq!(OutputFormat::from_str("csv"), None);
    }

    #[test]
    fn test_suites_table_and_json() {
        let mut suite = TestSuite::new("checkout");
        suite.id = 7;
        suite.status = RunStatus::Passed;

        let table = ResultFormatter::new(OutputFormat::Table)
            .no_color()
            .format_suites(std::slice::from_ref(&suite));
        assert!(table.contains("checkout"));
        assert!(table.contains("PASSED"));

        let json = ResultFormatter::new(OutputFormat::Json).format_suites(&[suite]);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["id"], 7);
    }

    #[test]
    fn test_runs_json_flattens_overview() {
        let mut run = TestRun::new("nightly");
        run.id = 3;
        let json = ResultFormatter::new(OutputFormat::Json).format_runs(&[RunOverview {
            run,
            has_results: false,
        }]);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["name"], "nightly");
        assert_eq!(parsed[0]["has_results"], false);
    }

    #[test]
    fn test_summary_table() {
        let text = ResultFormatter::new(OutputFormat::Table)
            .no_color()
            .format_summary(&analytics::summary(&[]));
        assert!(text.contains("Stability (last 10): 100.0%"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }
}
