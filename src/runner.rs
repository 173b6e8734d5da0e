//! Test-execution engine adapter
//!
//! Runs pytest with the `pytest-json-report` plugin and turns the JSON report
//! into a typed [`TestReport`]. Anything that prevents a report from being
//! produced is reported as [`RunOutcome::Unavailable`], never as an error.

use crate::config::Config;
use crate::util::{run_command_with_timeout, tail};
use async_trait::async_trait;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::Duration;

/// What happened when a test file was executed
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Every collected test passed
    Passed,
    /// The run finished with failures and produced a report
    Completed(TestReport),
    /// No structured report could be obtained
    Unavailable { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    Passed,
    Failed,
    Error,
    Skipped,
    Xfailed,
    Xpassed,
    #[serde(other)]
    Other,
}

impl TestOutcome {
    pub fn is_failing(self) -> bool {
        matches!(self, TestOutcome::Failed | TestOutcome::Error)
    }
}

/// One phase (setup, call, teardown) of a test
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestStage {
    #[serde(default)]
    pub longrepr: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestEntry {
    pub nodeid: String,
    pub outcome: TestOutcome,
    #[serde(default)]
    pub setup: Option<TestStage>,
    #[serde(default)]
    pub call: Option<TestStage>,
}

impl TestEntry {
    /// Failure text from the call phase, else the setup phase
    pub fn failure_message(&self) -> String {
        [&self.call, &self.setup]
            .into_iter()
            .flatten()
            .filter_map(|stage| stage.longrepr.as_deref())
            .find(|text| !text.trim().is_empty())
            .unwrap_or("No failure details")
            .to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorEntry {
    #[serde(default)]
    pub nodeid: String,
    pub outcome: TestOutcome,
    #[serde(default)]
    pub longrepr: Option<String>,
}

/// Parsed pytest-json-report output. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestReport {
    #[serde(default)]
    pub tests: Vec<TestEntry>,
    #[serde(default)]
    pub collectors: Vec<CollectorEntry>,
}

/// A failing test and the reason it failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailingTest {
    pub name: String,
    pub message: String,
}

impl TestReport {
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Failing tests in report order
    pub fn failures(&self) -> Vec<FailingTest> {
        self.tests
            .iter()
            .filter(|t| t.outcome.is_failing())
            .map(|t| FailingTest {
                name: t.nodeid.clone(),
                message: t.failure_message(),
            })
            .collect()
    }

    /// First collection/import failure, if any
    pub fn collection_error(&self) -> Option<String> {
        self.collectors
            .iter()
            .find(|c| c.outcome.is_failing())
            .map(|c| {
                let detail = c.longrepr.as_deref().unwrap_or("collection failed");
                if c.nodeid.is_empty() {
                    detail.to_string()
                } else {
                    format!("{}: {}", c.nodeid, detail)
                }
            })
    }
}

/// Executes one generated test file
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self, test_path: &Path) -> RunOutcome;
}

/// Runs pytest in the project root
#[derive(Debug, Clone)]
pub struct PytestRunner {
    root: PathBuf,
    command: String,
    timeout: Duration,
}

impl PytestRunner {
    pub fn new(root: impl Into<PathBuf>, command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            root: root.into(),
            command: command.into(),
            timeout,
        }
    }

    pub fn from_config(root: &Path, config: &Config) -> Self {
        Self::new(
            root,
            config.pytest_command.clone(),
            Duration::from_secs(config.test_timeout_secs),
        )
    }

    fn base_command(&self) -> Option<Command> {
        let mut parts = self.command.split_whitespace();
        let program = parts.next()?;
        let mut cmd = Command::new(program);
        cmd.args(parts).current_dir(&self.root);
        Some(cmd)
    }

    /// Run `target` with the terminal attached, for interactive use
    pub fn run_attached(&self, target: &Path) -> io::Result<ExitStatus> {
        let mut cmd = self.base_command().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "pytest command is empty")
        })?;
        cmd.arg(target).status()
    }

    fn run_blocking(&self, test_path: &Path) -> RunOutcome {
        let Some(mut cmd) = self.base_command() else {
            return RunOutcome::Unavailable {
                reason: "pytest command is empty".to_string(),
            };
        };

        let report_file = match tempfile::Builder::new()
            .prefix("testagon-report-")
            .suffix(".json")
            .tempfile()
        {
            Ok(file) => file,
            Err(e) => {
                return RunOutcome::Unavailable {
                    reason: format!("could not create report file: {}", e),
                }
            }
        };

        cmd.arg(test_path)
            .arg("--json-report")
            .arg(format!("--json-report-file={}", report_file.path().display()))
            .arg("-q");

        tracing::debug!("Running {} on {}", self.command, test_path.display());
        let result = match run_command_with_timeout(&mut cmd, self.timeout) {
            Ok(result) => result,
            Err(reason) => return RunOutcome::Unavailable { reason },
        };

        if result.timed_out {
            return RunOutcome::Unavailable {
                reason: format!("test run timed out after {}s", self.timeout.as_secs()),
            };
        }
        if result.success() {
            return RunOutcome::Passed;
        }

        let raw = fs::read_to_string(report_file.path()).unwrap_or_default();
        match TestReport::parse(&raw) {
            Ok(report) => RunOutcome::Completed(report),
            Err(_) => RunOutcome::Unavailable {
                reason: format!(
                    "no JSON report was produced (is pytest-json-report installed?)\n{}",
                    tail(&result.combined_output(), 2000)
                ),
            },
        }
    }
}

#[async_trait]
impl TestRunner for PytestRunner {
    async fn run(&self, test_path: &Path) -> RunOutcome {
        let runner = self.clone();
        let test_path = test_path.to_path_buf();
        match tokio::task::spawn_blocking(move || runner.run_blocking(&test_path)).await {
            Ok(outcome) => outcome,
            Err(e) => RunOutcome::Unavailable {
                reason: format!("test runner task failed: {}", e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"{
        "created": 1700000000.0,
        "exitcode": 1,
        "summary": {"passed": 1, "failed": 2, "total": 3},
        "collectors": [{"nodeid": "", "outcome": "passed", "result": []}],
        "tests": [
            {"nodeid": "tests/test_a.py::test_ok", "outcome": "passed",
             "call": {"outcome": "passed", "duration": 0.1}},
            {"nodeid": "tests/test_a.py::test_math", "outcome": "failed",
             "setup": {"outcome": "passed"},
             "call": {"outcome": "failed", "longrepr": "assert 2 == 3"}},
            {"nodeid": "tests/test_a.py::test_fixture", "outcome": "error",
             "setup": {"outcome": "failed", "longrepr": "fixture 'db' not found"}}
        ]
    }"#;

    #[test]
    fn test_failures_prefer_call_then_setup() {
        let report = TestReport::parse(REPORT).unwrap();
        let failures = report.failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].name, "tests/test_a.py::test_math");
        assert_eq!(failures[0].message, "assert 2 == 3");
        assert_eq!(failures[1].message, "fixture 'db' not found");
        assert!(report.collection_error().is_none());
    }

    #[test]
    fn test_missing_details_fall_back() {
        let raw = r#"{"tests": [{"nodeid": "t::x", "outcome": "failed"}]}"#;
        let report = TestReport::parse(raw).unwrap();
        assert_eq!(report.failures()[0].message, "No failure details");
    }

    #[test]
    fn test_unknown_outcome_is_not_failing() {
        let raw = r#"{"tests": [{"nodeid": "t::x", "outcome": "rerun"}]}"#;
        let report = TestReport::parse(raw).unwrap();
        assert_eq!(report.tests[0].outcome, TestOutcome::Other);
        assert!(report.failures().is_empty());
    }

    #[test]
    fn test_collection_error_is_reported() {
        let raw = r#"{"tests": [], "collectors": [
            {"nodeid": "tests/test_a.py", "outcome": "failed",
             "longrepr": "ImportError: No module named 'app'"}
        ]}"#;
        let report = TestReport::parse(raw).unwrap();
        let message = report.collection_error().unwrap();
        assert!(message.starts_with("tests/test_a.py: ImportError"));
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let runner = PytestRunner::new(
            dir.path(),
            "testagon-definitely-not-a-real-binary",
            Duration::from_secs(5),
        );
        let outcome = runner.run(Path::new("tests/test_a.py")).await;
        assert!(matches!(outcome, RunOutcome::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_empty_command_is_unavailable() {
        let runner = PytestRunner::new(".", "  ", Duration::from_secs(5));
        let outcome = runner.run(Path::new("tests/test_a.py")).await;
        match outcome {
            RunOutcome::Unavailable { reason } => assert!(reason.contains("empty")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
