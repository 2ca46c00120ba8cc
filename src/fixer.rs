//! Fix orchestrator: applies one rule's edits as a reversible batch.
//!
//! The batch is the atomic unit of rollback. Every distinct file the rule's
//! findings touch is snapshotted first; the edits are kept only when a fresh
//! scan shows strictly fewer findings for that rule and the test suite still
//! passes. Anything else — no improvement, broken tests, a strategy error, a
//! scanner that died mid-validation — restores the snapshot wholesale.

use crate::backup::BackupManager;
use crate::error::{PipelineError, Result};
use crate::findings::{count_for_rule, Finding};
use crate::scanner::Scanner;
use crate::strategy::StrategyRegistry;
use crate::testing::TestRunner;
use crate::util::resolve_in_repo;
use crate::validate::ValidationRunner;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// What one rule batch did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub rule: String,
    pub fixed: usize,
    pub failed: usize,
    pub files_touched: usize,
    pub rolled_back: bool,
}

impl BatchReport {
    fn unfixable(rule: &str, findings: usize) -> Self {
        BatchReport {
            rule: rule.to_string(),
            fixed: 0,
            failed: findings,
            files_touched: 0,
            rolled_back: false,
        }
    }
}

pub struct FixOrchestrator<'a> {
    repo_root: PathBuf,
    registry: &'a StrategyRegistry,
    backups: &'a BackupManager,
    scanner: &'a dyn Scanner,
    test_runner: &'a dyn TestRunner,
}

impl<'a> FixOrchestrator<'a> {
    pub fn new(
        repo_root: &Path,
        registry: &'a StrategyRegistry,
        backups: &'a BackupManager,
        scanner: &'a dyn Scanner,
        test_runner: &'a dyn TestRunner,
    ) -> Self {
        FixOrchestrator {
            repo_root: repo_root.to_path_buf(),
            registry,
            backups,
            scanner,
            test_runner,
        }
    }

    /// Run one batch for `rule` over its pre-batch findings.
    pub fn run_batch(&self, rule: &str, findings: &[Finding]) -> Result<BatchReport> {
        let pre_count = findings.len();
        if pre_count == 0 {
            return Ok(BatchReport::unfixable(rule, 0));
        }

        if !self.registry.is_registered(rule) {
            tracing::info!(rule, "no strategy registered, reporting findings as failed");
            return Ok(BatchReport::unfixable(rule, pre_count));
        }

        let mut by_file: BTreeMap<PathBuf, Vec<Finding>> = BTreeMap::new();
        for finding in findings {
            by_file
                .entry(finding.file.clone())
                .or_default()
                .push(finding.clone());
        }
        let files: Vec<PathBuf> = by_file.keys().cloned().collect();

        // Snapshot before any write. Snapshot failure aborts the batch before
        // the tree is touched.
        let snapshot = self.backups.snapshot(&files)?;

        let mut files_touched = 0;
        for (file, file_findings) in &by_file {
            match self.apply_to_file(rule, file, file_findings) {
                Ok(true) => files_touched += 1,
                Ok(false) => {}
                Err(err) => {
                    // An erroring strategy gets the same treatment as no
                    // improvement: full restore, never a partial batch.
                    tracing::warn!(rule, %err, "edit strategy failed");
                    self.backups.restore(&snapshot);
                    return Ok(BatchReport {
                        rule: rule.to_string(),
                        fixed: 0,
                        failed: pre_count,
                        files_touched: 0,
                        rolled_back: true,
                    });
                }
            }
        }

        let validation = ValidationRunner::new(self.scanner, self.test_runner).validate();
        let post_count = if validation.scan_failed {
            // Can't prove improvement without a trustworthy recount.
            None
        } else {
            Some(count_for_rule(&validation.findings, rule))
        };

        let improved = matches!(post_count, Some(post) if post < pre_count);
        if !improved || !validation.tests_passed {
            tracing::info!(
                rule,
                pre = pre_count,
                post = ?post_count,
                tests_passed = validation.tests_passed,
                "no strict improvement, rolling batch back"
            );
            self.backups.restore(&snapshot);
            return Ok(BatchReport {
                rule: rule.to_string(),
                fixed: 0,
                failed: pre_count,
                files_touched: 0,
                rolled_back: true,
            });
        }

        let post = post_count.unwrap_or(0);
        tracing::info!(rule, fixed = pre_count - post, remaining = post, "batch kept");
        Ok(BatchReport {
            rule: rule.to_string(),
            fixed: pre_count - post,
            failed: post,
            files_touched,
            rolled_back: false,
        })
    }

    /// Apply the strategy to one file. Returns whether the file was written.
    fn apply_to_file(&self, rule: &str, file: &Path, findings: &[Finding]) -> Result<bool> {
        let edit_failure = |reason: String| PipelineError::EditFailure {
            rule: rule.to_string(),
            file: file.to_path_buf(),
            reason,
        };

        let absolute = resolve_in_repo(&self.repo_root, file).map_err(&edit_failure)?;
        let content =
            fs::read_to_string(&absolute).map_err(|e| edit_failure(format!("cannot read: {}", e)))?;

        let strategy = self
            .registry
            .get(rule)
            .ok_or_else(|| edit_failure("strategy vanished from registry".to_string()))?;

        match strategy.apply(file, &content, findings).map_err(&edit_failure)? {
            Some(new_content) if new_content != content => {
                fs::write(&absolute, new_content)
                    .map_err(|e| edit_failure(format!("cannot write: {}", e)))?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::Severity;
    use crate::strategy::{EditStrategy, RULE_TRAILING_WHITESPACE};
    use crate::testing::TestOutcome;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    fn finding(file: &str, line: usize, rule: &str) -> Finding {
        Finding {
            file: PathBuf::from(file),
            line,
            column: 1,
            rule: rule.to_string(),
            message: "m".to_string(),
            severity: Severity::Warning,
        }
    }

    /// Scanner returning a scripted sequence of scans.
    struct ScriptedScanner {
        scans: RefCell<VecDeque<Vec<Finding>>>,
    }

    impl ScriptedScanner {
        fn new(scans: Vec<Vec<Finding>>) -> Self {
            ScriptedScanner {
                scans: RefCell::new(scans.into()),
            }
        }
    }

    impl Scanner for ScriptedScanner {
        fn scan(&self) -> Vec<Finding> {
            self.scans.borrow_mut().pop_front().unwrap_or_default()
        }
    }

    struct PassingTests;

    impl TestRunner for PassingTests {
        fn run(&self) -> TestOutcome {
            TestOutcome {
                passed: true,
                failed_count: 0,
                timed_out: false,
                output: String::new(),
            }
        }
    }

    struct FailingTests;

    impl TestRunner for FailingTests {
        fn run(&self) -> TestOutcome {
            TestOutcome {
                passed: false,
                failed_count: 1,
                timed_out: false,
                output: String::new(),
            }
        }
    }

    struct ErroringStrategy;

    impl EditStrategy for ErroringStrategy {
        fn name(&self) -> &'static str {
            "erroring"
        }

        fn apply(
            &self,
            _path: &Path,
            _content: &str,
            _findings: &[Finding],
        ) -> std::result::Result<Option<String>, String> {
            Err("strategy blew up".to_string())
        }
    }

    struct NoopStrategy;

    impl EditStrategy for NoopStrategy {
        fn name(&self) -> &'static str {
            "noop"
        }

        fn apply(
            &self,
            _path: &Path,
            _content: &str,
            _findings: &[Finding],
        ) -> std::result::Result<Option<String>, String> {
            Ok(None)
        }
    }

    fn write(repo: &Path, rel: &str, content: &str) {
        let path = repo.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn read(repo: &Path, rel: &str) -> String {
        fs::read_to_string(repo.join(rel)).unwrap()
    }

    #[test]
    fn test_successful_batch_reports_true_split() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/a.rs", "let a = 1;  \n");
        write(dir.path(), "src/b.rs", "let b = 2;\t\n");

        let rule = RULE_TRAILING_WHITESPACE;
        let pre = vec![finding("src/a.rs", 1, rule), finding("src/b.rs", 1, rule)];
        // Post-batch scan: both gone.
        let scanner = ScriptedScanner::new(vec![vec![]]);
        let registry = StrategyRegistry::with_builtins();
        let backups = BackupManager::new(dir.path());
        let orchestrator =
            FixOrchestrator::new(dir.path(), &registry, &backups, &scanner, &PassingTests);

        let report = orchestrator.run_batch(rule, &pre).unwrap();
        assert_eq!(
            report,
            BatchReport {
                rule: rule.to_string(),
                fixed: 2,
                failed: 0,
                files_touched: 2,
                rolled_back: false,
            }
        );
        assert_eq!(read(dir.path(), "src/a.rs"), "let a = 1;\n");
    }

    #[test]
    fn test_unregistered_rule_is_a_noop_with_all_failed() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/a.rs", "content\n");

        let pre = vec![finding("src/a.rs", 1, "bug/mystery")];
        let scanner = ScriptedScanner::new(vec![]);
        let registry = StrategyRegistry::with_builtins();
        let backups = BackupManager::new(dir.path());
        let orchestrator =
            FixOrchestrator::new(dir.path(), &registry, &backups, &scanner, &PassingTests);

        let report = orchestrator.run_batch("bug/mystery", &pre).unwrap();
        assert_eq!(report.fixed, 0);
        assert_eq!(report.failed, 1);
        assert!(!report.rolled_back);
        assert_eq!(read(dir.path(), "src/a.rs"), "content\n");
    }

    #[test]
    fn test_no_improvement_rolls_back_byte_identical() {
        // Scenario B: the edit applies but the recount still shows the
        // finding, so the tree must come back byte-identical.
        let dir = TempDir::new().unwrap();
        let original = "let a = 1;  \n";
        write(dir.path(), "src/a.rs", original);

        let rule = RULE_TRAILING_WHITESPACE;
        let pre = vec![finding("src/a.rs", 1, rule)];
        let scanner = ScriptedScanner::new(vec![vec![finding("src/a.rs", 1, rule)]]);
        let registry = StrategyRegistry::with_builtins();
        let backups = BackupManager::new(dir.path());
        let orchestrator =
            FixOrchestrator::new(dir.path(), &registry, &backups, &scanner, &PassingTests);

        let report = orchestrator.run_batch(rule, &pre).unwrap();
        assert!(report.rolled_back);
        assert_eq!(report.fixed, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(read(dir.path(), "src/a.rs"), original);
    }

    #[test]
    fn test_broken_tests_roll_back_even_on_improvement() {
        let dir = TempDir::new().unwrap();
        let original = "let a = 1;  \n";
        write(dir.path(), "src/a.rs", original);

        let rule = RULE_TRAILING_WHITESPACE;
        let pre = vec![finding("src/a.rs", 1, rule)];
        let scanner = ScriptedScanner::new(vec![vec![]]);
        let registry = StrategyRegistry::with_builtins();
        let backups = BackupManager::new(dir.path());
        let orchestrator =
            FixOrchestrator::new(dir.path(), &registry, &backups, &scanner, &FailingTests);

        let report = orchestrator.run_batch(rule, &pre).unwrap();
        assert!(report.rolled_back);
        assert_eq!(read(dir.path(), "src/a.rs"), original);
    }

    #[test]
    fn test_erroring_strategy_rolls_back_fully() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/a.rs", "aaa\n");

        let pre = vec![finding("src/a.rs", 1, "bug/explosive")];
        let scanner = ScriptedScanner::new(vec![]);
        let mut registry = StrategyRegistry::new();
        registry.register("bug/explosive", Box::new(ErroringStrategy));
        let backups = BackupManager::new(dir.path());
        let orchestrator =
            FixOrchestrator::new(dir.path(), &registry, &backups, &scanner, &PassingTests);

        let report = orchestrator.run_batch("bug/explosive", &pre).unwrap();
        assert!(report.rolled_back);
        assert_eq!(report.failed, 1);
        assert_eq!(report.files_touched, 0);
        assert_eq!(read(dir.path(), "src/a.rs"), "aaa\n");
    }

    #[test]
    fn test_scanner_failure_during_validation_rolls_back() {
        let dir = TempDir::new().unwrap();
        let original = "let a = 1;  \n";
        write(dir.path(), "src/a.rs", original);

        let rule = RULE_TRAILING_WHITESPACE;
        let pre = vec![finding("src/a.rs", 1, rule)];
        // Recount scan comes back as a system finding.
        let scanner = ScriptedScanner::new(vec![vec![Finding {
            file: PathBuf::new(),
            line: 0,
            column: 0,
            rule: crate::findings::RULE_TIMEOUT.to_string(),
            message: "scanner timed out".to_string(),
            severity: Severity::System,
        }]]);
        let registry = StrategyRegistry::with_builtins();
        let backups = BackupManager::new(dir.path());
        let orchestrator =
            FixOrchestrator::new(dir.path(), &registry, &backups, &scanner, &PassingTests);

        let report = orchestrator.run_batch(rule, &pre).unwrap();
        assert!(report.rolled_back);
        assert_eq!(read(dir.path(), "src/a.rs"), original);
    }

    #[test]
    fn test_noop_strategy_counts_as_no_improvement() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/a.rs", "fine\n");

        let pre = vec![finding("src/a.rs", 1, "style/phantom")];
        let scanner = ScriptedScanner::new(vec![vec![finding("src/a.rs", 1, "style/phantom")]]);
        let mut registry = StrategyRegistry::new();
        registry.register("style/phantom", Box::new(NoopStrategy));
        let backups = BackupManager::new(dir.path());
        let orchestrator =
            FixOrchestrator::new(dir.path(), &registry, &backups, &scanner, &PassingTests);

        let report = orchestrator.run_batch("style/phantom", &pre).unwrap();
        assert!(report.rolled_back);
        assert_eq!(report.files_touched, 0);
    }
}
