//! External scanner invocation.
//!
//! The scanner is a black box: run it with a timeout, capture stdout, and let
//! the classifier decide what the output means. Failure to even start the
//! process is a tool failure like any other and comes back as a system
//! finding, never as an empty scan.

use crate::config::ToolCommand;
use crate::findings::{classify, ExitInfo, Finding, SeverityMap};
use crate::util::run_with_timeout;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Produces a fresh finding set on demand. Implemented over a real command
/// in production and over canned data in orchestration tests.
pub trait Scanner {
    fn scan(&self) -> Vec<Finding>;
}

/// Scanner backed by an external command printing JSON-lines findings.
pub struct CommandScanner {
    repo_root: PathBuf,
    command: ToolCommand,
    timeout: Duration,
    severity_map: SeverityMap,
}

impl CommandScanner {
    pub fn new(
        repo_root: &Path,
        command: ToolCommand,
        timeout: Duration,
        severity_map: SeverityMap,
    ) -> Self {
        CommandScanner {
            repo_root: repo_root.to_path_buf(),
            command,
            timeout,
            severity_map,
        }
    }
}

impl Scanner for CommandScanner {
    fn scan(&self) -> Vec<Finding> {
        let mut cmd = Command::new(&self.command.program);
        cmd.current_dir(&self.repo_root).args(&self.command.args);

        tracing::debug!(command = %self.command.display(), "running scanner");
        let outcome = match run_with_timeout(&mut cmd, self.timeout) {
            Ok(outcome) => outcome,
            Err(reason) => {
                // Spawn failure: the tool is unavailable, which the
                // classifier renders as a single system finding.
                tracing::warn!(%reason, "scanner could not be started");
                return classify("", &ExitInfo::Failed(None), &self.severity_map);
            }
        };

        let exit = if outcome.timed_out {
            ExitInfo::TimedOut
        } else if outcome.success {
            ExitInfo::Success
        } else {
            ExitInfo::Failed(outcome.exit_code)
        };

        classify(&outcome.stdout, &exit, &self.severity_map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::{RULE_TIMEOUT, RULE_TOOL_FAILED};

    fn scanner_for(dir: &Path, program: &str, args: &[&str], timeout_ms: u64) -> CommandScanner {
        CommandScanner::new(
            dir,
            ToolCommand {
                program: program.to_string(),
                args: args.iter().map(|s| s.to_string()).collect(),
            },
            Duration::from_millis(timeout_ms),
            SeverityMap::default(),
        )
    }

    #[test]
    fn test_scan_parses_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = scanner_for(
            dir.path(),
            "sh",
            &[
                "-c",
                r#"echo '{"file":"a.rs","line":1,"rule":"r1","message":"m"}'"#,
            ],
            5000,
        );
        let findings = scanner.scan();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule, "r1");
    }

    #[test]
    fn test_scan_missing_program_is_tool_failure() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = scanner_for(dir.path(), "definitely-not-a-real-binary", &[], 5000);
        let findings = scanner.scan();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule, RULE_TOOL_FAILED);
    }

    #[test]
    fn test_scan_timeout_is_timeout_finding() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = scanner_for(dir.path(), "sh", &["-c", "sleep 30"], 100);
        let findings = scanner.scan();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule, RULE_TIMEOUT);
    }
}
