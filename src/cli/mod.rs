//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Test suite execution engine
#[derive(Parser, Debug)]
#[command(name = "suite-runner")]
#[command(version)]
#[command(about = "Execute UI and API test suites with bounded worker pools")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output (same as --log-level debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Configuration file (YAML or JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Store snapshot file, overriding configuration
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Output format (table, json, json-pretty)
    #[arg(short, long, global = true, default_value = "table")]
    pub format: String,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import a suite definition with its cases
    Import(ImportArgs),

    /// Create a run and execute a suite
    Run(RunArgs),

    /// Consume JSON-lines requests through the dispatcher
    Worker(WorkerArgs),

    /// Show dead-lettered requests
    DeadLetters(DeadLetterArgs),

    /// Show suites and runs
    Status(StatusArgs),

    /// Delete a suite and the cases it owns
    Delete(DeleteArgs),

    /// Result analytics
    Analytics(AnalyticsArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for import command
#[derive(Parser, Debug)]
pub struct ImportArgs {
    /// Suite definition file (YAML or JSON)
    pub file: PathBuf,

    /// User recorded as the suite's creator
    #[arg(short, long)]
    pub user: Option<String>,
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Suite to execute
    #[arg(short, long)]
    pub suite: u64,

    /// Parallel threads (1 runs sequentially, clamped to 1-8)
    #[arg(short, long, default_value = "1", allow_negative_numbers = true)]
    pub threads: i64,

    /// Name of the new run
    #[arg(short, long)]
    pub name: Option<String>,

    /// User recorded on the run and its results
    #[arg(short, long)]
    pub user: Option<String>,

    /// Reuse an existing run instead of creating one
    #[arg(long, conflicts_with = "name")]
    pub run: Option<u64>,
}

/// Arguments for worker command
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// JSON-lines request file (stdin when omitted)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Dead-letter file, overriding configuration
    #[arg(long)]
    pub dead_letters: Option<PathBuf>,

    /// Channel capacity between reader and dispatcher
    #[arg(long, default_value = "64")]
    pub buffer: usize,
}

/// Arguments for dead-letters command
#[derive(Parser, Debug)]
pub struct DeadLetterArgs {
    /// Dead-letter file, overriding configuration
    #[arg(long)]
    pub file: Option<PathBuf>,
}

/// Arguments for status command
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Show one suite with its cases
    #[arg(short, long)]
    pub suite: Option<u64>,

    /// Show results of one run
    #[arg(short, long)]
    pub run: Option<u64>,

    /// Only results of this test within the run, latest first
    #[arg(short, long, requires = "run")]
    pub test: Option<String>,
}

/// Arguments for delete command
#[derive(Parser, Debug)]
pub struct DeleteArgs {
    /// Suite to delete
    #[arg(short, long)]
    pub suite: u64,
}

/// Arguments for analytics command
#[derive(Parser, Debug)]
pub struct AnalyticsArgs {
    #[command(subcommand)]
    pub action: AnalyticsAction,
}

#[derive(Subcommand, Debug)]
pub enum AnalyticsAction {
    /// Pass rate, duration and stability
    Summary {
        /// Restrict to one suite
        #[arg(short, long)]
        suite: Option<u64>,
    },

    /// Daily pass rate
    Trends {
        #[arg(short, long)]
        suite: Option<u64>,

        /// Window in days
        #[arg(short, long, default_value = "7")]
        days: u32,
    },

    /// Tests with retries or mixed outcomes
    Flaky {
        #[arg(short, long)]
        suite: Option<u64>,

        /// Show at most this many tests
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a configuration file with default values
    Init {
        /// Output file path
        #[arg(short, long, default_value = "./suite-runner.yaml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration
    Show {
        /// List supported environment variables instead
        #[arg(long)]
        env: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_globals() {
        let args = Args::parse_from([
            "suite-runner",
            "run",
            "--suite",
            "3",
            "--threads",
            "-2",
            "--format",
            "json",
            "-v",
        ]);
        assert!(args.verbose);
        assert_eq!(args.format, "json");
        match args.command {
            Command::Run(run) => {
                assert_eq!(run.suite, 3);
                assert_eq!(run.threads, -2);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_status_test_filter_needs_run() {
        assert!(Args::try_parse_from(["suite-runner", "status", "--test", "login"]).is_err());

        let args = Args::parse_from([
            "suite-runner", "status", "--run", "4", "--test", "login",
        ]);
        match args.command {
            Command::Status(status) => {
                assert_eq!(status.run, Some(4));
                assert_eq!(status.test.as_deref(), Some("login"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_analytics_trends() {
        let args = Args::parse_from(["suite-runner", "analytics", "trends", "--days", "30"]);
        match args.command {
            Command::Analytics(AnalyticsArgs {
                action: AnalyticsAction::Trends { days, suite },
            }) => {
                assert_eq!(days, 30);
                assert_eq!(suite, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
