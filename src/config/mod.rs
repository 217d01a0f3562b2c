//! Configuration module
//!
//! Handles finding, loading and validating configuration, with environment
//! overrides applied on top.

pub mod env;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::dispatch::RetryPolicy;
use crate::driver::WebDriverSettings;
use crate::executor::PoolConfig;

pub use env::EnvConfig;

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./suite-runner.yaml",
    "./suite-runner.yml",
    "./suite-runner.json",
    "./.suite-runner/config.yaml",
    "~/.config/suite-runner/config.yaml",
    "~/.suite-runner.yaml",
];

/// Application configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Version of config file format
    #[serde(default = "default_version")]
    pub version: String,

    /// Pool for UI (browser) cases
    #[serde(default = "PoolConfig::ui")]
    pub ui_pool: PoolConfig,

    /// Pool for API cases
    #[serde(default = "PoolConfig::api")]
    pub api_pool: PoolConfig,

    /// Backoff for single-run and element requests
    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub driver: DriverConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            ui_pool: PoolConfig::ui(),
            api_pool: PoolConfig::api(),
            retry: RetryPolicy::default(),
            driver: DriverConfig::default(),
            execution: ExecutionConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Browser and HTTP driver settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// WebDriver endpoint (chromedriver, geckodriver, selenium)
    pub webdriver_url: String,
    pub headless: bool,
    pub browser_args: Vec<String>,
    /// How long to wait for an element to appear
    pub element_timeout_secs: u64,
    /// HTTP timeout for API cases
    pub http_timeout_secs: u64,
    pub accept_invalid_certs: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".to_string(),
            headless: true,
            browser_args: vec![
                "--no-sandbox".to_string(),
                "--disable-dev-shm-usage".to_string(),
            ],
            element_timeout_secs: 15,
            http_timeout_secs: 30,
            accept_invalid_certs: false,
        }
    }
}

impl DriverConfig {
    pub fn webdriver_settings(&self) -> WebDriverSettings {
        WebDriverSettings {
            base_url: self.webdriver_url.clone(),
            headless: self.headless,
            browser_args: self.browser_args.clone(),
            element_timeout: Duration::from_secs(self.element_timeout_secs),
            ..WebDriverSettings::default()
        }
    }
}

/// Case and suite execution behaviour
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Fail cases whose expected result does not match instead of logging a warning
    pub strict_expectations: bool,
    /// Upper bound on a single parallel unit; none waits indefinitely
    pub unit_timeout_secs: Option<u64>,
}

impl ExecutionConfig {
    pub fn unit_timeout(&self) -> Option<Duration> {
        self.unit_timeout_secs.map(Duration::from_secs)
    }
}

/// Where state lives between invocations
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Store snapshot; defaults to the user data directory
    pub store_path: Option<PathBuf>,
    /// JSON-lines dead-letter file; defaults next to the store
    pub dead_letter_path: Option<PathBuf>,
}

impl AppConfig {
    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Load from `path`, `SUITE_RUNNER_CONFIG` or a standard location, then
    /// apply environment overrides
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let env = EnvConfig::load();
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| env.config_file.as_deref().map(expand_path));

        let mut config = match explicit.or_else(Self::find) {
            Some(path) => {
                tracing::debug!("Loading config from {}", path.display());
                Self::load(&path)?
            }
            None => Self::default(),
        };
        if env.has_any() {
            tracing::debug!("Applying SUITE_RUNNER_* overrides");
        }
        config.apply_env(&env);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !["1.0"].contains(&self.version.as_str()) {
            anyhow::bail!("Unsupported config version: {}", self.version);
        }

        for (name, pool) in [("ui_pool", &self.ui_pool), ("api_pool", &self.api_pool)] {
            if pool.max_concurrency == 0 {
                anyhow::bail!("{name}.max_concurrency must be at least 1");
            }
        }

        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if self.retry.multiplier < 1.0 {
            anyhow::bail!(
                "retry.multiplier must be >= 1.0, got {}",
                self.retry.multiplier
            );
        }

        Ok(())
    }

    /// Overlay values set through `SUITE_RUNNER_*` variables
    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(store) = &env.store {
            self.storage.store_path = Some(expand_path(store));
        }
        if let Some(path) = &env.dead_letters {
            self.storage.dead_letter_path = Some(expand_path(path));
        }
        if let Some(url) = &env.webdriver_url {
            self.driver.webdriver_url = url.clone();
        }
        if let Some(timeout) = env.http_timeout {
            self.driver.http_timeout_secs = timeout;
        }
        if let Some(strict) = env.strict {
            self.execution.strict_expectations = strict;
        }
        if let Some(workers) = env.ui_workers {
            self.ui_pool.max_concurrency = workers;
        }
        if let Some(workers) = env.api_workers {
            self.api_pool.max_concurrency = workers;
        }
    }

    /// Store snapshot path, falling back to the user data directory
    pub fn store_path(&self) -> PathBuf {
        self.storage
            .store_path
            .clone()
            .unwrap_or_else(crate::store::StoreSnapshot::default_path)
    }

    /// Dead-letter file, falling back to a sibling of the store snapshot
    pub fn dead_letter_path(&self) -> PathBuf {
        self.storage.dead_letter_path.clone().unwrap_or_else(|| {
            self.store_path()
                .with_file_name("dead-letters.jsonl")
        })
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}
