//! In-memory store
//!
//! All four store traits behind a single `parking_lot` lock. Results are
//! append-only; suite deletion cascades to the suite's cases.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::debug;

use super::{CaseStore, ResultStore, RunStore, StoreError, StoreSnapshot, SuiteStore};
use crate::models::{RunId, SuiteId, TestCase, TestResult, TestRun, TestSuite};

#[derive(Default)]
struct State {
    next_id: u64,
    runs: BTreeMap<RunId, TestRun>,
    suites: BTreeMap<SuiteId, TestSuite>,
    cases: Vec<TestCase>,
    results: Vec<TestResult>,
}

impl State {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Thread-safe in-memory implementation of every store trait
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a snapshot
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let mut state = State {
            next_id: snapshot.next_id,
            runs: snapshot.runs.into_iter().map(|r| (r.id, r)).collect(),
            suites: snapshot.suites.into_iter().map(|s| (s.id, s)).collect(),
            cases: snapshot.cases,
            results: snapshot.results,
        };

        // never hand out an id that is already taken
        let highest = state
            .runs
            .keys()
            .chain(state.suites.keys())
            .copied()
            .chain(state.results.iter().filter_map(|r| r.id))
            .max()
            .unwrap_or(0);
        state.next_id = state.next_id.max(highest);

        Self {
            state: RwLock::new(state),
        }
    }

    /// Copy the current contents into a snapshot
    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.read();
        StoreSnapshot::new(
            state.next_id,
            state.runs.values().cloned().collect(),
            state.suites.values().cloned().collect(),
            state.cases.clone(),
            state.results.clone(),
        )
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn save_run(&self, mut run: TestRun) -> Result<TestRun, StoreError> {
        let mut state = self.state.write();
        if run.id == 0 {
            run.id = state.allocate_id();
        } else if !state.runs.contains_key(&run.id) {
            return Err(StoreError::RunNotFound(run.id));
        }
        state.runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn find_run(&self, id: RunId) -> Result<Option<TestRun>, StoreError> {
        Ok(self.state.read().runs.get(&id).cloned())
    }

    async fn find_runs(&self) -> Result<Vec<TestRun>, StoreError> {
        Ok(self.state.read().runs.values().cloned().collect())
    }
}

#[async_trait]
impl SuiteStore for MemoryStore {
    async fn save_suite(&self, mut suite: TestSuite) -> Result<TestSuite, StoreError> {
        let mut state = self.state.write();
        if suite.id == 0 {
            suite.id = state.allocate_id();
        } else if !state.suites.contains_key(&suite.id) {
            return Err(StoreError::SuiteNotFound(suite.id));
        }
        state.suites.insert(suite.id, suite.clone());
        Ok(suite)
    }

    async fn find_suite(&self, id: SuiteId) -> Result<Option<TestSuite>, StoreError> {
        Ok(self.state.read().suites.get(&id).cloned())
    }

    async fn find_suites(&self) -> Result<Vec<TestSuite>, StoreError> {
        Ok(self.state.read().suites.values().cloned().collect())
    }

    async fn delete_suite(&self, id: SuiteId) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if state.suites.remove(&id).is_none() {
            return Err(StoreError::SuiteNotFound(id));
        }
        let before = state.cases.len();
        state.cases.retain(|c| c.suite_id != Some(id));
        debug!(
            "Deleted suite {} and {} owned cases",
            id,
            before - state.cases.len()
        );
        Ok(())
    }
}

#[async_trait]
impl CaseStore for MemoryStore {
    async fn save_case(&self, case: TestCase) -> Result<TestCase, StoreError> {
        let mut state = self.state.write();
        if let Some(suite_id) = case.suite_id {
            if !state.suites.contains_key(&suite_id) {
                return Err(StoreError::SuiteNotFound(suite_id));
            }
        }

        match state.cases.iter_mut().find(|c| c.id == case.id) {
            Some(existing) if existing.suite_id == case.suite_id => *existing = case.clone(),
            Some(_) => return Err(StoreError::DuplicateCase(case.id)),
            None => state.cases.push(case.clone()),
        }
        Ok(case)
    }

    async fn find_case(&self, id: &str) -> Result<Option<TestCase>, StoreError> {
        Ok(self.state.read().cases.iter().find(|c| c.id == id).cloned())
    }

    async fn find_cases_by_suite(&self, suite_id: SuiteId) -> Result<Vec<TestCase>, StoreError> {
        Ok(self
            .state
            .read()
            .cases
            .iter()
            .filter(|c| c.suite_id == Some(suite_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn create_result(&self, mut result: TestResult) -> Result<TestResult, StoreError> {
        let mut state = self.state.write();

        if let Some(run_id) = result.run_id {
            let created = state.runs.get(&run_id).map(|r| r.created_at);
            if !created.is_some_and(|at| at <= result.created_at) {
                return Err(StoreError::DanglingReference {
                    test_name: result.test_name,
                    reference: format!("run {run_id}"),
                });
            }
        }
        if let Some(suite_id) = result.suite_id {
            let created = state.suites.get(&suite_id).map(|s| s.created_at);
            if !created.is_some_and(|at| at <= result.created_at) {
                return Err(StoreError::DanglingReference {
                    test_name: result.test_name,
                    reference: format!("suite {suite_id}"),
                });
            }
        }

        result.id = Some(state.allocate_id());
        result.flaky_score = result.compute_flaky_score();
        state.results.push(result.clone());
        Ok(result)
    }

    async fn find_by_run_and_name(
        &self,
        run_id: RunId,
        test_name: &str,
    ) -> Result<Vec<TestResult>, StoreError> {
        let state = self.state.read();
        // insertion order is creation order, so reversing gives latest first
        Ok(state
            .results
            .iter()
            .rev()
            .filter(|r| r.run_id == Some(run_id) && r.test_name == test_name)
            .cloned()
            .collect())
    }

    async fn find_by_run(&self, run_id: RunId) -> Result<Vec<TestResult>, StoreError> {
        Ok(self
            .state
            .read()
            .results
            .iter()
            .filter(|r| r.run_id == Some(run_id))
            .cloned()
            .collect())
    }

    async fn find_by_suite(&self, suite_id: SuiteId) -> Result<Vec<TestResult>, StoreError> {
        Ok(self
            .state
            .read()
            .results
            .iter()
            .filter(|r| r.suite_id == Some(suite_id))
            .cloned()
            .collect())
    }

    async fn find_results(&self) -> Result<Vec<TestResult>, StoreError> {
        Ok(self.state.read().results.clone())
    }

    async fn has_results(&self, run_id: RunId) -> Result<bool, StoreError> {
        Ok(self
            .state
            .read()
            .results
            .iter()
            .any(|r| r.run_id == Some(run_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CaseKind, Expectation, HttpMethod, Priority, ResultStatus};

    fn api_case(id: &str, suite_id: SuiteId) -> TestCase {
        TestCase {
            id: id.to_string(),
            name: format!("case {id}"),
            url: "https://example.com".to_string(),
            kind: CaseKind::Api {
                method: HttpMethod::Get,
                body: None,
            },
            expected: Expectation::Succeeds,
            priority: Priority::Medium,
            enabled: true,
            description: String::new(),
            suite_id: Some(suite_id),
        }
    }

    #[tokio::test]
    async fn test_ids_are_assigned() {
        let store = MemoryStore::new();
        let run = store.save_run(TestRun::new("r1")).await.unwrap();
        let suite = store.save_suite(TestSuite::new("s1")).await.unwrap();
        assert_ne!(run.id, 0);
        assert_ne!(suite.id, 0);
        assert_ne!(run.id, suite.id);

        let mut unknown = TestRun::new("ghost");
        unknown.id = 999;
        assert_eq!(
            store.save_run(unknown).await,
            Err(StoreError::RunNotFound(999))
        );
    }

    #[tokio::test]
    async fn test_suite_delete_cascades_to_cases() {
        let store = MemoryStore::new();
        let keep = store.save_suite(TestSuite::new("keep")).await.unwrap();
        let doomed = store.save_suite(TestSuite::new("doomed")).await.unwrap();
        store.save_case(api_case("A1", keep.id)).await.unwrap();
        store.save_case(api_case("B1", doomed.id)).await.unwrap();
        store.save_case(api_case("B2", doomed.id)).await.unwrap();

        store.delete_suite(doomed.id).await.unwrap();
        assert!(store.find_cases_by_suite(doomed.id).await.unwrap().is_empty());
        assert_eq!(store.find_cases_by_suite(keep.id).await.unwrap().len(), 1);
        assert!(store.find_case("B1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_case_requires_existing_suite() {
        let store = MemoryStore::new();
        assert_eq!(
            store.save_case(api_case("A1", 42)).await,
            Err(StoreError::SuiteNotFound(42))
        );
    }

    #[tokio::test]
    async fn test_results_latest_first_with_flaky_score() {
        let store = MemoryStore::new();
        let run = store.save_run(TestRun::new("r1")).await.unwrap();

        assert!(!store.has_results(run.id).await.unwrap());

        store
            .create_result(TestResult::fail("login", 100, "boom").with_run(run.id))
            .await
            .unwrap();
        let second = store
            .create_result(
                TestResult::pass("login", 3000)
                    .with_run(run.id)
                    .with_retries(2),
            )
            .await
            .unwrap();
        store
            .create_result(TestResult::pass("search", 10).with_run(run.id))
            .await
            .unwrap();

        assert!(store.has_results(run.id).await.unwrap());
        assert_eq!(second.flaky_score, 23.0);

        let login = store.find_by_run_and_name(run.id, "login").await.unwrap();
        assert_eq!(login.len(), 2);
        assert_eq!(login[0].status, ResultStatus::Passed);
        assert_eq!(login[1].status, ResultStatus::Failed);
        assert_eq!(store.find_by_run(run.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_dangling_references_rejected() {
        let store = MemoryStore::new();
        let err = store
            .create_result(TestResult::pass("login", 1).with_run(77))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DanglingReference { .. }));

        let err = store
            .create_result(TestResult::pass("login", 1).with_suite(Some(78)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DanglingReference { .. }));
    }

    #[tokio::test]
    async fn test_snapshot_restores_id_sequence() {
        let store = MemoryStore::new();
        let run = store.save_run(TestRun::new("r1")).await.unwrap();
        store
            .create_result(TestResult::pass("login", 1).with_run(run.id))
            .await
            .unwrap();

        let restored = MemoryStore::from_snapshot(store.snapshot());
        let next = restored.save_run(TestRun::new("r2")).await.unwrap();
        assert!(next.id > run.id);
        assert_eq!(restored.find_by_run(run.id).await.unwrap().len(), 1);
    }
}
