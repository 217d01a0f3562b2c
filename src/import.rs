//! Suite definition import
//!
//! A suite definition is a YAML or JSON document naming a suite and listing
//! its cases as flat descriptors.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::models::{CaseDescriptor, TestCase, TestSuite};
use crate::store::Store;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub cases: Vec<CaseDescriptor>,
}

impl SuiteDefinition {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read suite definition: {}", path.display()))?;

        let is_yaml = path
            .extension()
            .map(|e| e == "yaml" || e == "yml")
            .unwrap_or(false);
        if is_yaml {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML suite: {}", path.display()))
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON suite: {}", path.display()))
        }
    }

    /// Validate every descriptor before anything is written
    pub fn cases(&self) -> Result<Vec<TestCase>> {
        self.cases
            .iter()
            .enumerate()
            .map(|(index, desc)| {
                TestCase::try_from(desc.clone()).with_context(|| {
                    format!("Invalid case #{} ({}) in suite '{}'", index + 1, desc.id, self.name)
                })
            })
            .collect()
    }
}

/// Create the suite and its cases; returns the stored suite and case count
pub async fn import_suite(
    store: &dyn Store,
    definition: &SuiteDefinition,
    user: Option<&str>,
) -> Result<(TestSuite, usize)> {
    let cases = definition.cases()?;

    let mut suite = TestSuite::new(&definition.name).with_description(&definition.description);
    if let Some(user) = user {
        suite = suite.with_user(user);
    }
    let suite = store.save_suite(suite).await?;

    let count = cases.len();
    for mut case in cases {
        case.suite_id = Some(suite.id);
        store
            .save_case(case)
            .await
            .with_context(|| format!("Failed to import into suite {}", suite.id))?;
    }

    info!("Imported suite {} '{}' with {} case(s)", suite.id, suite.name, count);
    Ok((suite, count))
}
