//! Store snapshot files
//!
//! Persists the whole in-memory store as JSON or YAML (picked by extension).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::models::{TestCase, TestResult, TestRun, TestSuite};

/// Serialisable copy of every record in a store
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Tool version that wrote the snapshot
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,

    /// Last id handed out
    #[serde(default)]
    pub next_id: u64,

    #[serde(default)]
    pub runs: Vec<TestRun>,

    #[serde(default)]
    pub suites: Vec<TestSuite>,

    #[serde(default)]
    pub cases: Vec<TestCase>,

    #[serde(default)]
    pub results: Vec<TestResult>,
}

impl StoreSnapshot {
    pub fn new(
        next_id: u64,
        runs: Vec<TestRun>,
        suites: Vec<TestSuite>,
        cases: Vec<TestCase>,
        results: Vec<TestResult>,
    ) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            saved_at: Some(Utc::now()),
            next_id,
            runs,
            suites,
            cases,
            results,
        }
    }

    /// Default snapshot location under the user's data directory
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("suite-runner")
            .join("store.json")
    }

    /// Load a snapshot, or an empty one if the file does not exist yet
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No store snapshot at {}, starting empty", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Load a snapshot from file
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open store snapshot: {}", path.display()))?;
        let reader = BufReader::new(file);

        let snapshot: Self = if is_yaml(path) {
            serde_yaml::from_reader(reader).context("Failed to parse YAML store snapshot")?
        } else {
            serde_json::from_reader(reader).context("Failed to parse JSON store snapshot")?
        };

        debug!(
            "Loaded store snapshot: {} suites, {} runs, {} results",
            snapshot.suites.len(),
            snapshot.runs.len(),
            snapshot.results.len()
        );
        Ok(snapshot)
    }

    /// Save the snapshot to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = File::create(path).context("Failed to create store snapshot")?;
        let writer = BufWriter::new(file);

        if is_yaml(path) {
            serde_yaml::to_writer(writer, self).context("Failed to write YAML store snapshot")?;
        } else {
            serde_json::to_writer_pretty(writer, self)
                .context("Failed to write JSON store snapshot")?;
        }

        info!("Saved store snapshot to {}", path.display());
        Ok(())
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "yaml" || ext == "yml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, ResultStore, RunStore, SuiteStore};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_snapshot_json_and_yaml() {
        let store = MemoryStore::new();
        let suite = store.save_suite(TestSuite::new("smoke")).await.unwrap();
        let run = store.save_run(TestRun::new("nightly")).await.unwrap();
        store
            .create_result(
                TestResult::pass("login", 120)
                    .with_run(run.id)
                    .with_suite(Some(suite.id)),
            )
            .await
            .unwrap();

        let dir = TempDir::new().unwrap();
        for name in ["store.json", "store.yaml"] {
            let path = dir.path().join("nested").join(name);
            store.snapshot().save(&path).unwrap();

            let loaded = StoreSnapshot::load(&path).unwrap();
            assert_eq!(loaded.suites.len(), 1);
            assert_eq!(loaded.runs[0].name, "nightly");
            assert_eq!(loaded.results[0].test_name, "login");
            assert_eq!(loaded.results[0].suite_id, Some(suite.id));
        }
    }

    #[test]
    fn test_missing_snapshot_is_empty() {
        let dir = TempDir::new().unwrap();
        let snapshot = StoreSnapshot::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert!(snapshot.runs.is_empty());
        assert_eq!(snapshot.next_id, 0);
    }
}
