//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

/// Environment variable prefix
const ENV_PREFIX: &str = "SUITE_RUNNER";

/// Overrides read from `SUITE_RUNNER_*` variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Store snapshot from SUITE_RUNNER_STORE
    pub store: Option<String>,
    /// WebDriver endpoint from SUITE_RUNNER_WEBDRIVER_URL
    pub webdriver_url: Option<String>,
    /// HTTP timeout from SUITE_RUNNER_HTTP_TIMEOUT
    pub http_timeout: Option<u64>,
    /// Strict expectations from SUITE_RUNNER_STRICT
    pub strict: Option<bool>,
    /// UI pool size from SUITE_RUNNER_UI_WORKERS
    pub ui_workers: Option<usize>,
    /// API pool size from SUITE_RUNNER_API_WORKERS
    pub api_workers: Option<usize>,
    /// Dead-letter file from SUITE_RUNNER_DEAD_LETTERS
    pub dead_letters: Option<String>,
    /// Config file from SUITE_RUNNER_CONFIG
    pub config_file: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            store: get_env("STORE"),
            webdriver_url: get_env("WEBDRIVER_URL"),
            http_timeout: get_env_parse("HTTP_TIMEOUT"),
            strict: get_env_bool("STRICT"),
            ui_workers: get_env_parse("UI_WORKERS"),
            api_workers: get_env_parse("API_WORKERS"),
            dead_letters: get_env("DEAD_LETTERS"),
            config_file: get_env("CONFIG"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.store.is_some()
            || self.webdriver_url.is_some()
            || self.http_timeout.is_some()
            || self.strict.is_some()
            || self.ui_workers.is_some()
            || self.api_workers.is_some()
            || self.dead_letters.is_some()
            || self.config_file.is_some()
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Print all SUITE_RUNNER environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_STORE          Path to the store snapshot (JSON or YAML)");
    println!("  {ENV_PREFIX}_WEBDRIVER_URL  WebDriver endpoint for UI cases");
    println!("  {ENV_PREFIX}_HTTP_TIMEOUT   API request timeout in seconds");
    println!("  {ENV_PREFIX}_STRICT         Fail on expectation mismatch (true/false)");
    println!("  {ENV_PREFIX}_UI_WORKERS     Concurrent UI cases");
    println!("  {ENV_PREFIX}_API_WORKERS    Concurrent API cases");
    println!("  {ENV_PREFIX}_DEAD_LETTERS   JSON-lines dead-letter file");
    println!("  {ENV_PREFIX}_CONFIG         Path to configuration file");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_WEBDRIVER_URL=http://localhost:4444");
    println!("  suite-runner run --suite 1 --threads 4");
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sets variables for the duration of a test and restores them on drop
    struct EnvGuard {
        previous: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn set(vars: &[(&str, &str)]) -> Self {
            let previous = vars
                .iter()
                .map(|(name, value)| {
                    let key = format!("{ENV_PREFIX}_{name}");
                    let old = env::var(&key).ok();
                    env::set_var(&key, value);
                    (key, old)
                })
                .collect();
            Self { previous }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in &self.previous {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_env_config_default() {
        let config = EnvConfig::default();
        assert!(config.store.is_none());
        assert!(!config.has_any());
    }

    #[test]
    fn test_env_overrides_are_parsed() {
        let _guard = EnvGuard::set(&[
            ("WEBDRIVER_URL", "http://grid:4444"),
            ("HTTP_TIMEOUT", "45"),
            ("UI_WORKERS", "not-a-number"),
            ("STRICT", "yes"),
        ]);

        let config = EnvConfig::load();
        assert_eq!(config.webdriver_url.as_deref(), Some("http://grid:4444"));
        assert_eq!(config.http_timeout, Some(45));
        assert_eq!(config.ui_workers, None);
        assert_eq!(config.strict, Some(true));
        assert!(config.has_any());
    }
}
