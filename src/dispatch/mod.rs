//! Request dispatch
//!
//! Consumes inbound run, suite and element requests, retries transient
//! failures with exponential backoff and dead-letters what cannot be
//! processed.

mod queue;
mod retry;
mod worker;

use thiserror::Error;

pub use queue::{consume, feed_lines, ConsumerStats, JsonLinesDeadLetters};
pub use retry::RetryPolicy;
pub use worker::Dispatcher;

#[cfg(test)]
pub(crate) use queue::MemoryDeadLetters;

/// Dispatch infrastructure errors
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Dead-letter I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Dead-letter encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}
