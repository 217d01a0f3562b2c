//! Retry policy and dispatch state machine
//!
//! [`RetryPolicy::transition`] is a pure function over [`DispatchState`];
//! the dispatcher only decides when the next event fires.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Exponential backoff settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub initial_interval_ms: u64,
    pub multiplier: f64,
    pub max_interval_ms: u64,
    /// Attempts in total, including the first
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: 1_000,
            multiplier: 2.0,
            max_interval_ms: 10_000,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following failed attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_interval_ms as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_interval_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Next state for `event` in `state`; unexpected events leave the state unchanged
    pub fn transition(&self, state: &DispatchState, event: &DispatchEvent) -> DispatchState {
        match (state, event) {
            (DispatchState::Received, DispatchEvent::Start) => {
                DispatchState::Attempting { attempt: 1 }
            }
            (DispatchState::Received, DispatchEvent::Outcome(AttemptOutcome::Rejected(reason))) => {
                DispatchState::DeadLettered {
                    attempts: 0,
                    reason: reason.clone(),
                }
            }
            (DispatchState::Attempting { attempt }, DispatchEvent::Outcome(outcome)) => {
                match outcome {
                    AttemptOutcome::Succeeded => DispatchState::Succeeded { attempts: *attempt },
                    AttemptOutcome::Retryable(reason) if *attempt >= self.max_attempts => {
                        DispatchState::DeadLettered {
                            attempts: *attempt,
                            reason: reason.clone(),
                        }
                    }
                    AttemptOutcome::Retryable(_) => DispatchState::RetryScheduled {
                        attempt: *attempt,
                        delay: self.delay_for(*attempt),
                    },
                    AttemptOutcome::NotFound(reason) => DispatchState::Abandoned {
                        reason: reason.clone(),
                    },
                    AttemptOutcome::Rejected(reason) => DispatchState::DeadLettered {
                        attempts: *attempt,
                        reason: reason.clone(),
                    },
                }
            }
            (DispatchState::RetryScheduled { attempt, .. }, DispatchEvent::RetryDue) => {
                DispatchState::Attempting {
                    attempt: attempt + 1,
                }
            }
            (state, _) => state.clone(),
        }
    }
}

/// Lifecycle of one inbound request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchState {
    Received,
    Attempting { attempt: u32 },
    /// `attempt` is the attempt that just failed
    RetryScheduled { attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    DeadLettered { attempts: u32, reason: String },
    Abandoned { reason: String },
}

impl DispatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DispatchState::Succeeded { .. }
                | DispatchState::DeadLettered { .. }
                | DispatchState::Abandoned { .. }
        )
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchState::Received => write!(f, "RECEIVED"),
            DispatchState::Attempting { attempt } => write!(f, "ATTEMPTING #{attempt}"),
            DispatchState::RetryScheduled { attempt, delay } => {
                write!(f, "RETRY_SCHEDULED after #{attempt} ({}ms)", delay.as_millis())
            }
            DispatchState::Succeeded { attempts } => write!(f, "SUCCEEDED in {attempts}"),
            DispatchState::DeadLettered { attempts, reason } => {
                write!(f, "DEAD_LETTERED after {attempts}: {reason}")
            }
            DispatchState::Abandoned { reason } => write!(f, "ABANDONED: {reason}"),
        }
    }
}

/// What one attempt produced
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    /// Transient failure; retried until attempts run out
    Retryable(String),
    /// The referenced run does not exist; never retried
    NotFound(String),
    /// The request itself is unusable; dead-lettered at once
    Rejected(String),
}

/// Inputs to the state machine
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchEvent {
    Start,
    Outcome(AttemptOutcome),
    RetryDue,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retryable() -> DispatchEvent {
        DispatchEvent::Outcome(AttemptOutcome::Retryable("boom".to_string()))
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4_000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(10_000));
        assert_eq!(policy.delay_for(30), Duration::from_millis(10_000));
    }

    #[test]
    fn test_success_on_third_attempt() {
        let policy = RetryPolicy::default();
        let mut state = policy.transition(&DispatchState::Received, &DispatchEvent::Start);
        assert_eq!(state, DispatchState::Attempting { attempt: 1 });

        state = policy.transition(&state, &retryable());
        assert_eq!(
            state,
            DispatchState::RetryScheduled {
                attempt: 1,
                delay: Duration::from_millis(1_000),
            }
        );
        state = policy.transition(&state, &DispatchEvent::RetryDue);
        state = policy.transition(&state, &retryable());
        assert_eq!(
            state,
            DispatchState::RetryScheduled {
                attempt: 2,
                delay: Duration::from_millis(2_000),
            }
        );
        state = policy.transition(&state, &DispatchEvent::RetryDue);
        state = policy.transition(&state, &DispatchEvent::Outcome(AttemptOutcome::Succeeded));
        assert_eq!(state, DispatchState::Succeeded { attempts: 3 });
        assert!(state.is_terminal());
    }

    #[test]
    fn test_exhaustion_dead_letters() {
        let policy = RetryPolicy::default();
        let mut state = DispatchState::Attempting { attempt: 3 };
        state = policy.transition(&state, &retryable());
        assert_eq!(
            state,
            DispatchState::DeadLettered {
                attempts: 3,
                reason: "boom".to_string(),
            }
        );
    }

    #[test]
    fn test_not_found_and_rejected_skip_retries() {
        let policy = RetryPolicy::default();
        let attempting = DispatchState::Attempting { attempt: 1 };

        let state = policy.transition(
            &attempting,
            &DispatchEvent::Outcome(AttemptOutcome::NotFound("run 9".to_string())),
        );
        assert_eq!(
            state,
            DispatchState::Abandoned {
                reason: "run 9".to_string(),
            }
        );

        let state = policy.transition(
            &DispatchState::Received,
            &DispatchEvent::Outcome(AttemptOutcome::Rejected("no action".to_string())),
        );
        assert_eq!(
            state,
            DispatchState::DeadLettered {
                attempts: 0,
                reason: "no action".to_string(),
            }
        );
    }

    #[test]
    fn test_terminal_states_ignore_events() {
        let policy = RetryPolicy::default();
        let done = DispatchState::Succeeded { attempts: 1 };
        assert_eq!(policy.transition(&done, &DispatchEvent::RetryDue), done);
        assert_eq!(policy.transition(&done, &retryable()), done);
    }
}
