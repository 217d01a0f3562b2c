//! Run and suite models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{RunId, SuiteId};

/// Lifecycle status shared by runs and suites
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Passed,
    Failed,
    /// Finished with a mix of passes and failures, or with nothing to run
    Completed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Passed | RunStatus::Failed | RunStatus::Completed
        )
    }

    /// Transitions allowed within one execution.
    ///
    /// Terminal statuses may be replaced by another terminal status (a
    /// recomputation) but never moved back to PENDING or RUNNING.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match (self, next) {
            (_, next) if next.is_terminal() => true,
            (RunStatus::Pending, _) => true,
            (RunStatus::Running, RunStatus::Running) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Passed => "PASSED",
            RunStatus::Failed => "FAILED",
            RunStatus::Completed => "COMPLETED",
        };
        write!(f, "{s}")
    }
}

/// One execution context producing a set of results
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestRun {
    /// Zero until the run is first saved
    #[serde(default)]
    pub id: RunId,
    pub name: String,
    #[serde(default)]
    pub status: RunStatus,
    #[serde(default = "default_parallel_threads")]
    pub parallel_threads: u8,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub report_path: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    /// Case executed by a single-run request, when targeted
    #[serde(default)]
    pub case_id: Option<String>,
}

fn default_parallel_threads() -> u8 {
    1
}

impl TestRun {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            status: RunStatus::Pending,
            parallel_threads: 1,
            created_at: Utc::now(),
            report_path: None,
            created_by: None,
            case_id: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.created_by = Some(user.into());
        self
    }

    /// Begin a new execution of this run
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
    }

    /// Apply a status within the current execution.
    ///
    /// Returns false and leaves the status untouched if the move would
    /// regress a terminal status.
    pub fn advance(&mut self, next: RunStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

/// A named, ordered collection of cases
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestSuite {
    #[serde(default)]
    pub id: SuiteId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: RunStatus,
    /// Most recent execution
    #[serde(default)]
    pub run_id: Option<RunId>,
    #[serde(default)]
    pub report_path: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TestSuite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            description: String::new(),
            status: RunStatus::Pending,
            run_id: None,
            report_path: None,
            created_by: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.created_by = Some(user.into());
        self
    }
}

impl fmt::Display for TestSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Suite {}: {} [{}]", self.id, self.name, self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Passed));
        assert!(RunStatus::Passed.can_transition_to(RunStatus::Completed));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Pending));
        assert!(!RunStatus::Running.can_transition_to(RunStatus::Pending));
    }

    #[test]
    fn test_run_advance() {
        let mut run = TestRun::new("nightly");
        run.start();
        assert!(run.advance(RunStatus::Failed));
        assert!(!run.advance(RunStatus::Running));
        assert_eq!(run.status, RunStatus::Failed);

        // a new execution may restart a finished run
        run.start();
        assert_eq!(run.status, RunStatus::Running);
    }
}
