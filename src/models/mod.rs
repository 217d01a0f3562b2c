//! Data models for suite execution
//!
//! This module contains all data structures used throughout the application.

mod case;
mod request;
mod run;
mod test_result;

pub use case::{
    CaseDescriptor, CaseKind, Expectation, HttpMethod, Locator, LocatorStrategy, TestCase,
    TestKind, UiAction, UiStep,
};
pub use request::{
    DeadLetter, ElementTestRequest, InboundRequest, RunRequest, SuiteExecutionRequest,
};
pub use run::{RunStatus, TestRun, TestSuite};
pub use test_result::{ResultStatus, TestResult};

#[cfg(test)]
pub(crate) use case::Priority;

pub type RunId = u64;
pub type SuiteId = u64;
pub type ResultId = u64;
