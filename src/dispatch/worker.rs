//! Request dispatcher
//!
//! Single-run and element requests are retried under the configured
//! [`RetryPolicy`]; suite requests are handed to the engine on their own
//! task and never retried.

use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::queue::DeadLetterSink;
use super::retry::{AttemptOutcome, DispatchEvent, DispatchState, RetryPolicy};
use crate::executor::{clamp_parallelism, EngineError, ExecutionSummary, SuiteEngine};
use crate::models::{
    DeadLetter, ElementTestRequest, Expectation, InboundRequest, Locator, RunId, RunRequest,
    RunStatus, SuiteExecutionRequest, TestCase, TestResult, TestRun, UiStep,
};
use crate::store::{self, Store, StoreError};
use crate::utils::timer::Timer;

pub type SuiteHandle = JoinHandle<Result<ExecutionSummary, EngineError>>;

/// What became of a dispatched request
#[derive(Debug)]
pub enum Dispatched {
    Finished(DispatchState),
    /// A suite execution is running in the background
    Spawned(SuiteHandle),
    Dropped(String),
}

/// The unit a retried request executes
enum Work {
    /// A stored case; falls back to the run's own case id
    Case(Option<String>),
    Element {
        url: String,
        locator: Locator,
        steps: Vec<UiStep>,
        expected: Expectation,
    },
}

pub struct Dispatcher {
    engine: Arc<SuiteEngine>,
    policy: RetryPolicy,
    dead_letters: Arc<dyn DeadLetterSink>,
}

impl Dispatcher {
    pub fn new(
        engine: Arc<SuiteEngine>,
        policy: RetryPolicy,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        Self {
            engine,
            policy,
            dead_letters,
        }
    }

    fn store(&self) -> &dyn Store {
        self.engine.runner().store().as_ref()
    }

    pub async fn dispatch(&self, request: InboundRequest) -> Dispatched {
        match request {
            InboundRequest::Run(request) => {
                Dispatched::Finished(self.handle_run_request(&request).await)
            }
            InboundRequest::Element(request) => {
                Dispatched::Finished(self.handle_element_request(&request).await)
            }
            InboundRequest::Suite(request) => {
                let run_id = request.run_id;
                match self.handle_suite_request(request).await {
                    Some(handle) => Dispatched::Spawned(handle),
                    None => Dispatched::Dropped(format!("TestRun not found: {run_id}")),
                }
            }
        }
    }

    /// Execute one stored case for a run, retrying transient failures
    pub async fn handle_run_request(&self, request: &RunRequest) -> DispatchState {
        info!("Received TestRun request: {}", request.run_id);
        let payload = payload_of(&InboundRequest::Run(request.clone()));
        self.run_with_retry(payload, request.run_id, Work::Case(request.case_id.clone()))
            .await
    }

    /// Run an ad-hoc element check, retrying transient failures
    pub async fn handle_element_request(&self, request: &ElementTestRequest) -> DispatchState {
        info!(
            "Received element test request: #{} on {} (run {})",
            request.element_id, request.url, request.run_id
        );
        let payload = payload_of(&InboundRequest::Element(request.clone()));

        let steps = match request.steps() {
            Ok(steps) => steps,
            Err(e) => {
                let state = self.policy.transition(
                    &DispatchState::Received,
                    &DispatchEvent::Outcome(AttemptOutcome::Rejected(e.to_string())),
                );
                self.settle(&state, payload, request.run_id, None, 0).await;
                return state;
            }
        };

        let work = Work::Element {
            url: request.url.clone(),
            locator: Locator::id(&request.element_id),
            steps,
            expected: request.expectation(),
        };
        self.run_with_retry(payload, request.run_id, work).await
    }

    /// Validate the run and start the suite on a separate task
    pub async fn handle_suite_request(
        &self,
        request: SuiteExecutionRequest,
    ) -> Option<SuiteHandle> {
        info!(
            "Received suite execution request: suite {} run {} threads {}",
            request.suite_id, request.run_id, request.parallel_threads
        );

        let run = match self.store().find_run(request.run_id).await {
            Ok(Some(run)) => run,
            Ok(None) => {
                error!("TestRun not found: {}", request.run_id);
                return None;
            }
            Err(e) => {
                error!("Could not load TestRun {}: {}", request.run_id, e);
                return None;
            }
        };

        let threads = clamp_parallelism(request.parallel_threads).unwrap_or_else(|| {
            warn!(
                "Invalid parallel_threads {} for suite {}, using 1",
                request.parallel_threads, request.suite_id
            );
            1
        });

        let engine = Arc::clone(&self.engine);
        let user = run.created_by;
        Some(tokio::spawn(async move {
            let outcome = engine
                .run(
                    request.suite_id,
                    request.run_id,
                    i64::from(threads),
                    user.as_deref(),
                )
                .await;
            match &outcome {
                Ok(summary) => info!("{}", summary),
                Err(e) => error!("Suite {} execution failed: {}", request.suite_id, e),
            }
            outcome
        }))
    }

    /// Hand a letter to the sink, logging if the sink itself fails
    pub async fn dead_letter(&self, letter: DeadLetter) {
        warn!(
            "Dead-lettering request after {} attempt(s): {}",
            letter.attempts, letter.reason
        );
        if let Err(e) = self.dead_letters.send(letter).await {
            error!("Failed to write dead letter: {}", e);
        }
    }

    async fn run_with_retry(&self, payload: Value, run_id: RunId, work: Work) -> DispatchState {
        let timer = Timer::start(format!("run {run_id}"));
        let mut resolved = None;
        let mut state = self
            .policy
            .transition(&DispatchState::Received, &DispatchEvent::Start);

        loop {
            let event = match state {
                DispatchState::Attempting { attempt } => {
                    info!("Attempt #{} - processing TestRun {}", attempt, run_id);
                    let outcome = self.attempt(run_id, &work, &mut resolved).await;
                    DispatchEvent::Outcome(outcome)
                }
                DispatchState::RetryScheduled { attempt, delay } => {
                    warn!(
                        "Attempt #{} for TestRun {} failed, retrying in {}ms",
                        attempt,
                        run_id,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    DispatchEvent::RetryDue
                }
                _ => break,
            };
            state = self.policy.transition(&state, &event);
        }

        let duration_ms = timer.stop().as_millis() as u64;
        self.settle(&state, payload, run_id, resolved.as_ref(), duration_ms)
            .await;
        state
    }

    async fn attempt(
        &self,
        run_id: RunId,
        work: &Work,
        resolved: &mut Option<TestCase>,
    ) -> AttemptOutcome {
        let run = match self.store().find_run(run_id).await {
            Ok(Some(run)) => run,
            Ok(None) => return AttemptOutcome::NotFound(format!("TestRun not found: {run_id}")),
            Err(e) => return AttemptOutcome::Retryable(e.to_string()),
        };
        if run.status == RunStatus::Pending {
            if let Err(e) = store::update_run_status(self.store(), run_id, RunStatus::Running).await
            {
                warn!("Could not mark TestRun {} RUNNING: {}", run_id, e);
            }
        }

        let runner = self.engine.runner();
        let outcome = match work {
            Work::Case(requested) => {
                let case = match self.resolve_case(&run, requested.as_deref()).await {
                    Ok(case) => case,
                    Err(outcome) => return outcome,
                };
                let outcome = runner.attempt(&case).await;
                *resolved = Some(case);
                outcome
            }
            Work::Element {
                url,
                locator,
                steps,
                expected,
            } => runner.execute_ui(url, locator, steps, expected).await,
        };

        match outcome {
            Ok(()) => AttemptOutcome::Succeeded,
            Err(e) => {
                warn!("TestRun {} attempt failed: {}", run_id, e);
                AttemptOutcome::Retryable(e.to_string())
            }
        }
    }

    async fn resolve_case(
        &self,
        run: &TestRun,
        requested: Option<&str>,
    ) -> Result<TestCase, AttemptOutcome> {
        let Some(case_id) = requested.or(run.case_id.as_deref()) else {
            return Err(AttemptOutcome::Rejected(format!(
                "TestRun {} names no test case to execute",
                run.id
            )));
        };
        match store::require_case(self.store(), case_id).await {
            Ok(case) => Ok(case),
            Err(e @ StoreError::CaseNotFound(_)) => Err(AttemptOutcome::Rejected(e.to_string())),
            Err(e) => Err(AttemptOutcome::Retryable(e.to_string())),
        }
    }

    async fn settle(
        &self,
        state: &DispatchState,
        payload: Value,
        run_id: RunId,
        case: Option<&TestCase>,
        duration_ms: u64,
    ) {
        match state {
            DispatchState::Succeeded { attempts } => {
                info!("TestRun {} PASSED after {} attempt(s)", run_id, attempts);
                let recorded = self
                    .record(run_id, case, attempts.saturating_sub(1), None, duration_ms)
                    .await;
                if let Err(e) = recorded {
                    error!("Failed to record result for TestRun {}: {}", run_id, e);
                }
            }
            DispatchState::DeadLettered { attempts, reason } => {
                warn!(
                    "MAX RETRIES EXCEEDED for TestRun {} - marking FAILED and sending to DLQ",
                    run_id
                );
                match self
                    .record(run_id, case, *attempts, Some(reason), duration_ms)
                    .await
                {
                    Ok(()) => {}
                    Err(StoreError::RunNotFound(_)) => {
                        debug!("TestRun {} vanished before failure could be recorded", run_id)
                    }
                    Err(e) => error!("Failed to record failure for TestRun {}: {}", run_id, e),
                }
                self.dead_letter(DeadLetter::new(payload, reason.clone(), *attempts))
                    .await;
            }
            DispatchState::Abandoned { reason } => {
                error!("Dropping request for TestRun {}: {}", run_id, reason);
            }
            other => debug!("TestRun {} left in state {}", run_id, other),
        }
    }

    /// Set the run's final status and persist one result for the request
    async fn record(
        &self,
        run_id: RunId,
        case: Option<&TestCase>,
        retries: u32,
        failure: Option<&str>,
        duration_ms: u64,
    ) -> Result<(), StoreError> {
        let status = if failure.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Passed
        };
        let run = store::update_run_status(self.store(), run_id, status).await?;

        let (name, suite_id) = match case {
            Some(case) => (case.name.clone(), case.suite_id),
            None => (run.name.clone(), None),
        };
        let mut result = match failure {
            Some(reason) => TestResult::fail(name, duration_ms, reason),
            None => TestResult::pass(name, duration_ms),
        }
        .with_run(run.id)
        .with_suite(suite_id)
        .with_retries(retries)
        .with_user(run.created_by.clone());
        result.case_id = case.map(|c| c.id.clone());

        self.store().create_result(result).await.map(|_| ())
    }
}

fn payload_of(request: &InboundRequest) -> Value {
    serde_json::to_value(request).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::MemoryDeadLetters;
    use crate::driver::fake::{FakeApiDriver, FakeUiDriver};
    use crate::executor::fixtures::{small_pools, ui_case, Harness};
    use crate::models::{ResultStatus, SuiteId};
    use crate::store::{MemoryStore, ResultStore, RunStore};

    struct Setup {
        store: Arc<MemoryStore>,
        dispatcher: Dispatcher,
        letters: Arc<MemoryDeadLetters>,
        suite_id: SuiteId,
        run_id: RunId,
    }

    async fn setup(ui: FakeUiDriver, locator: &str) -> Setup {
        let harness = Harness::new(ui, FakeApiDriver::new(), small_pools(2, 2));
        let (suite_id, run_id) = harness.suite(vec![ui_case("TC1", locator)]).await;
        let Harness { store, engine, .. } = harness;
        let letters = Arc::new(MemoryDeadLetters::new());
        let dispatcher = Dispatcher::new(Arc::new(engine), RetryPolicy::default(), letters.clone());
        Setup {
            store,
            dispatcher,
            letters,
            suite_id,
            run_id,
        }
    }

    fn run_request(run_id: RunId) -> RunRequest {
        RunRequest {
            run_id,
            case_id: Some("TC1".to_string()),
        }
    }

    fn element_request(run_id: RunId, action: Option<&str>) -> ElementTestRequest {
        ElementTestRequest {
            url: "https://example.com/login".to_string(),
            element_id: "username".to_string(),
            action: action.map(str::to_string),
            actions: Vec::new(),
            expected_result: String::new(),
            run_id,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_third_attempt() {
        let s = setup(FakeUiDriver::new().failing_first(2), "login").await;

        let state = s.dispatcher.handle_run_request(&run_request(s.run_id)).await;
        assert_eq!(state, DispatchState::Succeeded { attempts: 3 });

        let run = s.store.find_run(s.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Passed);
        let results = s.store.find_by_run(s.run_id).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ResultStatus::Passed);
        assert_eq!(results[0].retry_count, 2);
        assert_eq!(results[0].test_name, "ui TC1");
        assert_eq!(results[0].case_id.as_deref(), Some("TC1"));
        assert!(s.letters.letters().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_dead_letters_once() {
        let s = setup(FakeUiDriver::new().with_missing("ghost"), "ghost").await;
        let started = tokio::time::Instant::now();

        let state = s.dispatcher.handle_run_request(&run_request(s.run_id)).await;
        assert!(matches!(state, DispatchState::DeadLettered { attempts: 3, .. }));
        // 1s + 2s of backoff between the three attempts
        assert!(started.elapsed() >= std::time::Duration::from_millis(3_000));

        let run = s.store.find_run(s.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        let results = s.store.find_by_run(s.run_id).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, ResultStatus::Failed);
        assert_eq!(results[0].retry_count, 3);

        let letters = s.letters.letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].attempts, 3);
        assert_eq!(letters[0].payload["run_id"], s.run_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_run_is_dropped() {
        let s = setup(FakeUiDriver::new(), "login").await;

        let state = s.dispatcher.handle_run_request(&run_request(999)).await;
        assert!(matches!(state, DispatchState::Abandoned { .. }));
        assert!(s.letters.letters().is_empty());
        assert!(s.store.find_results().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_without_case_is_rejected() {
        let s = setup(FakeUiDriver::new(), "login").await;
        let request = RunRequest {
            run_id: s.run_id,
            case_id: None,
        };

        let state = s.dispatcher.handle_run_request(&request).await;
        assert!(matches!(state, DispatchState::DeadLettered { attempts: 1, .. }));
        assert_eq!(s.letters.letters().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_case_is_rejected() {
        let s = setup(FakeUiDriver::new(), "login").await;
        let request = RunRequest {
            run_id: s.run_id,
            case_id: Some("TC404".to_string()),
        };

        let state = s.dispatcher.handle_run_request(&request).await;
        assert!(matches!(state, DispatchState::DeadLettered { attempts: 1, .. }));
        let letters = s.letters.letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].reason, "Test case TC404 not found");
    }

    #[tokio::test(start_paused = true)]
    async fn test_element_request_without_action_dead_letters_immediately() {
        let s = setup(FakeUiDriver::new(), "login").await;

        let state = s
            .dispatcher
            .handle_element_request(&element_request(s.run_id, None))
            .await;
        assert!(matches!(state, DispatchState::DeadLettered { attempts: 0, .. }));

        let letters = s.letters.letters();
        assert_eq!(letters.len(), 1);
        assert!(letters[0].reason.contains("username"));
        let run = s.store.find_run(s.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_element_request_passes() {
        let s = setup(FakeUiDriver::new(), "login").await;

        let state = s
            .dispatcher
            .handle_element_request(&element_request(s.run_id, Some("click")))
            .await;
        assert_eq!(state, DispatchState::Succeeded { attempts: 1 });

        let results = s.store.find_by_run(s.run_id).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].test_name, "run");
        assert_eq!(results[0].retry_count, 0);
    }

    #[tokio::test]
    async fn test_suite_request_runs_in_background() {
        let s = setup(FakeUiDriver::new(), "login").await;
        let suite_id = s.suite_id;

        let handle = s
            .dispatcher
            .handle_suite_request(SuiteExecutionRequest {
                suite_id,
                run_id: s.run_id,
                parallel_threads: 40,
            })
            .await
            .expect("run exists");
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.status, RunStatus::Passed);
        assert_eq!(summary.counts.passed, 1);

        let missing = s
            .dispatcher
            .handle_suite_request(SuiteExecutionRequest {
                suite_id,
                run_id: 404,
                parallel_threads: 1,
            })
            .await;
        assert!(missing.is_none());
    }
}
