//! Suite execution
//!
//! Case runner, worker pools, the suite engine and status aggregation.

mod case_runner;
mod engine;
mod pool;
mod status;

pub use case_runner::CaseRunner;
pub use engine::{clamp_parallelism, EngineError, ExecutionSummary, SuiteEngine};
pub use pool::{PoolConfig, WorkerPools};

#[cfg(test)]
pub(crate) use engine::fixtures;
