//! Test runner detection and execution.
//!
//! The test suite is a black box: detect the project type, run its runner
//! with a hard timeout, and report pass/fail plus a best-effort failed count.
//! A timeout or a runner that cannot start is a failure, never a pass.

use crate::config::ToolCommand;
use crate::util::run_with_timeout;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Result of running the external test suite.
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub passed: bool,
    pub failed_count: usize,
    pub timed_out: bool,
    pub output: String,
}

impl TestOutcome {
    pub fn failure(output: String) -> Self {
        TestOutcome {
            passed: false,
            failed_count: 0,
            timed_out: false,
            output,
        }
    }
}

/// Runs the project's test suite. Command-backed in production, canned in
/// orchestration tests.
pub trait TestRunner {
    fn run(&self) -> TestOutcome;
}

/// Detected project type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectType {
    Rust,
    Node,
    Python,
    Go,
    Unknown,
}

/// Detect project type from files in the repo root.
pub fn detect_project_type(repo_path: &Path) -> ProjectType {
    if repo_path.join("Cargo.toml").exists() {
        ProjectType::Rust
    } else if repo_path.join("package.json").exists() {
        ProjectType::Node
    } else if repo_path.join("pyproject.toml").exists()
        || repo_path.join("setup.py").exists()
        || repo_path.join("requirements.txt").exists()
    {
        ProjectType::Python
    } else if repo_path.join("go.mod").exists() {
        ProjectType::Go
    } else {
        ProjectType::Unknown
    }
}

fn test_command(project_type: ProjectType) -> Option<ToolCommand> {
    let (program, args): (&str, &[&str]) = match project_type {
        ProjectType::Rust => ("cargo", &["test"]),
        ProjectType::Node => ("npm", &["test"]),
        ProjectType::Python => ("pytest", &[]),
        ProjectType::Go => ("go", &["test", "./..."]),
        ProjectType::Unknown => return None,
    };
    Some(ToolCommand {
        program: program.to_string(),
        args: args.iter().map(|s| s.to_string()).collect(),
    })
}

/// Test runner backed by a detected or configured command.
pub struct CommandTestRunner {
    repo_root: PathBuf,
    command: Option<ToolCommand>,
    timeout: Duration,
}

impl CommandTestRunner {
    /// `override_command` comes from config; without it the runner is
    /// detected from the project layout.
    pub fn new(repo_root: &Path, override_command: Option<ToolCommand>, timeout: Duration) -> Self {
        let command =
            override_command.or_else(|| test_command(detect_project_type(repo_root)));
        CommandTestRunner {
            repo_root: repo_root.to_path_buf(),
            command,
            timeout,
        }
    }
}

impl TestRunner for CommandTestRunner {
    fn run(&self) -> TestOutcome {
        let Some(command) = &self.command else {
            return TestOutcome::failure("No test runner detected".to_string());
        };

        let mut cmd = Command::new(&command.program);
        cmd.current_dir(&self.repo_root).args(&command.args);

        tracing::debug!(command = %command.display(), "running tests");
        match run_with_timeout(&mut cmd, self.timeout) {
            Ok(outcome) => {
                let combined = format!("{}\n{}", outcome.stdout, outcome.stderr);
                TestOutcome {
                    passed: outcome.success,
                    failed_count: parse_failed_count(&combined),
                    timed_out: outcome.timed_out,
                    output: combined,
                }
            }
            Err(e) => TestOutcome::failure(format!("Failed to run {}: {}", command.program, e)),
        }
    }
}

/// Best-effort failed-test count from runner output. Most runners print
/// "<n> failed" somewhere; absence just means 0.
fn parse_failed_count(output: &str) -> usize {
    let re = Regex::new(r"(\d+)\s+failed").unwrap();
    re.captures_iter(output)
        .filter_map(|c| c[1].parse::<usize>().ok())
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_detect_rust_project() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        assert_eq!(detect_project_type(dir.path()), ProjectType::Rust);
    }

    #[test]
    fn test_detect_unknown_project() {
        let dir = TempDir::new().unwrap();
        assert_eq!(detect_project_type(dir.path()), ProjectType::Unknown);
    }

    #[test]
    fn test_parse_failed_count() {
        assert_eq!(
            parse_failed_count("test result: FAILED. 10 passed; 3 failed; 0 ignored"),
            3
        );
        assert_eq!(parse_failed_count("all good"), 0);
    }

    #[test]
    fn test_override_command_runs() {
        let dir = TempDir::new().unwrap();
        let runner = CommandTestRunner::new(
            dir.path(),
            Some(ToolCommand {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "echo '2 failed'; exit 1".to_string()],
            }),
            Duration::from_secs(5),
        );
        let outcome = runner.run();
        assert!(!outcome.passed);
        assert_eq!(outcome.failed_count, 2);
        assert!(!outcome.timed_out);
    }

    #[test]
    fn test_no_runner_is_a_failure_not_a_pass() {
        let dir = TempDir::new().unwrap();
        let runner = CommandTestRunner::new(dir.path(), None, Duration::from_secs(5));
        let outcome = runner.run();
        assert!(!outcome.passed);
    }

    #[test]
    fn test_timeout_is_a_failure() {
        let dir = TempDir::new().unwrap();
        let runner = CommandTestRunner::new(
            dir.path(),
            Some(ToolCommand {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "sleep 30".to_string()],
            }),
            Duration::from_millis(100),
        );
        let outcome = runner.run();
        assert!(!outcome.passed);
        assert!(outcome.timed_out);
    }
}
