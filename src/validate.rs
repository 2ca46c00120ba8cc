//! Validation runner: re-invoke the scanner and the test suite after a write
//! and fold both into one structured verdict.

use crate::findings::Finding;
use crate::scanner::Scanner;
use crate::testing::{TestOutcome, TestRunner};

/// Combined post-write verdict. A scanner that failed during validation is a
/// validation failure, never a pass: `scan_failed` is set and the finding
/// count is unusable.
#[derive(Debug)]
pub struct ValidationReport {
    pub findings: Vec<Finding>,
    pub scan_failed: bool,
    pub tests_passed: bool,
    pub tests_failed: usize,
    pub tests_timed_out: bool,
}

impl ValidationReport {
    /// Finding count, only meaningful when the scan itself succeeded.
    pub fn scanner_findings_count(&self) -> Option<usize> {
        if self.scan_failed {
            None
        } else {
            Some(self.findings.len())
        }
    }

    pub fn is_pass(&self) -> bool {
        !self.scan_failed && self.tests_passed
    }
}

/// Runs scanner + tests as timed, blocking black boxes.
pub struct ValidationRunner<'a> {
    scanner: &'a dyn Scanner,
    test_runner: &'a dyn TestRunner,
}

impl<'a> ValidationRunner<'a> {
    pub fn new(scanner: &'a dyn Scanner, test_runner: &'a dyn TestRunner) -> Self {
        ValidationRunner {
            scanner,
            test_runner,
        }
    }

    pub fn validate(&self) -> ValidationReport {
        let findings = self.scanner.scan();
        let scan_failed = findings.iter().any(|f| f.is_system());

        let tests: TestOutcome = self.test_runner.run();
        if tests.timed_out {
            tracing::warn!("test suite timed out during validation");
        }

        ValidationReport {
            findings,
            scan_failed,
            tests_passed: tests.passed,
            tests_failed: tests.failed_count,
            tests_timed_out: tests.timed_out,
        }
    }
}
