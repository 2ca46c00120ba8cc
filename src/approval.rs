//! Change approval pipeline.
//!
//! Arbitrary higher-risk edits never go straight to the working tree. A
//! `ProposedChange` moves through a fixed lifecycle — drafted, safety-checked,
//! approved, sandbox-checked, applied, validated — and every gate can only
//! push it forward or reject it. Medium risk and above always waits for an
//! explicit approval call; no configuration can change that.

use crate::backup::BackupManager;
use crate::error::{PipelineError, Result, Tool};
use crate::findings::Finding;
use crate::sandbox::SandboxCheck;
use crate::scanner::Scanner;
use crate::store::ChangeStore;
use crate::testing::TestRunner;
use crate::util::resolve_in_repo;
use crate::validate::ValidationRunner;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// How much damage a change could plausibly do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    /// Everything above low always needs a human.
    pub fn requires_explicit_approval(&self) -> bool {
        !matches!(self, RiskTier::Low)
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
            RiskTier::Critical => "critical",
        }
    }
}

/// Lifecycle state. `Rejected`, `Validated` and `RolledBack` are terminal
/// (with the one exception that emergency rollback may still revert a
/// validated change).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeState {
    Drafted,
    SafetyChecked,
    Rejected,
    AwaitingApproval,
    Approved,
    SandboxPassed,
    Applied,
    Validated,
    RolledBack,
}

impl ChangeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChangeState::Rejected | ChangeState::Validated | ChangeState::RolledBack
        )
    }

    /// Legal forward transitions.
    fn can_advance_to(&self, to: ChangeState) -> bool {
        use ChangeState::*;
        matches!(
            (self, to),
            (Drafted, SafetyChecked)
                | (SafetyChecked, Rejected)
                | (SafetyChecked, AwaitingApproval)
                | (AwaitingApproval, Approved)
                | (AwaitingApproval, Rejected)
                | (Approved, SandboxPassed)
                | (Approved, Rejected)
                | (SandboxPassed, Applied)
                | (Applied, Validated)
                | (Applied, RolledBack)
                | (Validated, RolledBack)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChangeState::Drafted => "drafted",
            ChangeState::SafetyChecked => "safety-checked",
            ChangeState::Rejected => "rejected",
            ChangeState::AwaitingApproval => "awaiting-approval",
            ChangeState::Approved => "approved",
            ChangeState::SandboxPassed => "sandbox-passed",
            ChangeState::Applied => "applied",
            ChangeState::Validated => "validated",
            ChangeState::RolledBack => "rolled-back",
        }
    }
}

/// Outcome of one named safety predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyCheckResult {
    pub name: String,
    pub passed: bool,
}

/// A proposed edit moving through the approval lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedChange {
    pub id: Uuid,
    pub risk: RiskTier,
    /// Repo-relative target file.
    pub file: PathBuf,
    pub rationale: String,
    pub current_content: String,
    pub proposed_content: String,
    pub safety_results: Vec<SafetyCheckResult>,
    pub state: ChangeState,
    pub approved: bool,
    pub applied: bool,
    /// Snapshot taken immediately before the real write.
    pub snapshot_id: Option<Uuid>,
    /// Findings on the target file just before apply; validation counts
    /// anything beyond these as attributable to the change.
    pub baseline_findings: Vec<Finding>,
    /// Store-managed optimistic version counter.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProposedChange {
    pub fn draft(
        file: PathBuf,
        current_content: String,
        proposed_content: String,
        risk: RiskTier,
        rationale: String,
    ) -> Self {
        let now = Utc::now();
        ProposedChange {
            id: Uuid::new_v4(),
            risk,
            file,
            rationale,
            current_content,
            proposed_content,
            safety_results: Vec::new(),
            state: ChangeState::Drafted,
            approved: false,
            applied: false,
            snapshot_id: None,
            baseline_findings: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn advance(&mut self, to: ChangeState) -> Result<()> {
        if !self.state.can_advance_to(to) {
            return Err(PipelineError::internal(format!(
                "illegal transition {} -> {} on change {}",
                self.state.label(),
                to.label(),
                self.id
            )));
        }
        self.state = to;
        Ok(())
    }
}

/// A named host-supplied predicate over a proposed change. All registered
/// checks must pass — AND semantics, not a vote.
pub trait SafetyCheck: Send + Sync {
    fn name(&self) -> &str;
    fn check(&self, change: &ProposedChange) -> bool;
}

pub struct ApprovalPipeline<'a> {
    repo_root: PathBuf,
    store: &'a ChangeStore,
    backups: &'a BackupManager,
    sandbox: &'a dyn SandboxCheck,
    scanner: &'a dyn Scanner,
    test_runner: &'a dyn TestRunner,
    checks: Vec<Box<dyn SafetyCheck>>,
    auto_approve_low_risk: bool,
}

impl<'a> ApprovalPipeline<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo_root: &Path,
        store: &'a ChangeStore,
        backups: &'a BackupManager,
        sandbox: &'a dyn SandboxCheck,
        scanner: &'a dyn Scanner,
        test_runner: &'a dyn TestRunner,
        auto_approve_low_risk: bool,
    ) -> Self {
        ApprovalPipeline {
            repo_root: repo_root.to_path_buf(),
            store,
            backups,
            sandbox,
            scanner,
            test_runner,
            checks: Vec::new(),
            auto_approve_low_risk,
        }
    }

    pub fn register_safety_check(&mut self, check: Box<dyn SafetyCheck>) {
        self.checks.push(check);
    }

    /// Draft a change from read-only analysis. Nothing is written.
    pub fn draft(
        &self,
        file: &Path,
        proposed_content: String,
        risk: RiskTier,
        rationale: String,
    ) -> Result<ProposedChange> {
        let absolute =
            resolve_in_repo(&self.repo_root, file).map_err(PipelineError::internal)?;
        let current_content = fs::read_to_string(&absolute)?;
        let change = ProposedChange::draft(
            file.to_path_buf(),
            current_content,
            proposed_content,
            risk,
            rationale,
        );
        self.store.insert(&change)?;
        tracing::info!(id = %change.id, file = %file.display(), risk = risk.label(), "change drafted");
        Ok(change)
    }

    /// Run every registered safety predicate. Any failure rejects the change
    /// with the failing checks recorded; otherwise it moves to
    /// awaiting-approval (or straight to approved for low risk, when the
    /// host opted in).
    pub fn run_safety_checks(&self, id: Uuid) -> Result<ProposedChange> {
        let mut change = self.load(id)?;
        change.advance(ChangeState::SafetyChecked)?;

        change.safety_results = self
            .checks
            .iter()
            .map(|check| SafetyCheckResult {
                name: check.name().to_string(),
                passed: check.check(&change),
            })
            .collect();

        let all_passed = change.safety_results.iter().all(|r| r.passed);
        if !all_passed {
            let failing: Vec<&str> = change
                .safety_results
                .iter()
                .filter(|r| !r.passed)
                .map(|r| r.name.as_str())
                .collect();
            tracing::info!(id = %change.id, ?failing, "change rejected by safety checks");
            change.advance(ChangeState::Rejected)?;
            return self.store.update(&change);
        }

        change.advance(ChangeState::AwaitingApproval)?;
        if !change.risk.requires_explicit_approval() && self.auto_approve_low_risk {
            change.advance(ChangeState::Approved)?;
            change.approved = true;
            tracing::info!(id = %change.id, "low-risk change auto-approved");
        }
        self.store.update(&change)
    }

    /// Explicit approval. The only way any change at medium risk or above
    /// ever advances past awaiting-approval.
    pub fn approve(&self, id: Uuid) -> Result<ProposedChange> {
        let mut change = self.load(id)?;
        change.advance(ChangeState::Approved)?;
        change.approved = true;
        tracing::info!(id = %change.id, "change approved");
        self.store.update(&change)
    }

    /// Explicit rejection while awaiting approval.
    pub fn reject(&self, id: Uuid) -> Result<ProposedChange> {
        let mut change = self.load(id)?;
        change.advance(ChangeState::Rejected)?;
        self.store.update(&change)
    }

    /// Structural sandbox check; must pass before any real write.
    pub fn run_sandbox(&self, id: Uuid) -> Result<ProposedChange> {
        let mut change = self.load(id)?;
        if change.state != ChangeState::Approved {
            return Err(PipelineError::internal(format!(
                "change {} is {}, sandbox requires approved",
                change.id,
                change.state.label()
            )));
        }

        let passed = self.sandbox.check(&change.file, &change.proposed_content)?;
        change.safety_results.push(SafetyCheckResult {
            name: "sandbox-structural".to_string(),
            passed,
        });
        if passed {
            change.advance(ChangeState::SandboxPassed)?;
        } else {
            tracing::warn!(id = %change.id, "candidate failed sandbox check, rejecting");
            change.advance(ChangeState::Rejected)?;
        }
        self.store.update(&change)
    }

    /// Snapshot the target, then perform the real write.
    pub fn apply(&self, id: Uuid) -> Result<ProposedChange> {
        let mut change = self.load(id)?;
        if change.state != ChangeState::SandboxPassed {
            return Err(PipelineError::internal(format!(
                "change {} is {}, apply requires sandbox-passed",
                change.id,
                change.state.label()
            )));
        }

        // Baseline scan before the write; without a trustworthy baseline,
        // "new findings attributable to the change" is undecidable.
        let pre_scan = self.scanner.scan();
        if pre_scan.iter().any(|f| f.is_system()) {
            return Err(PipelineError::tool(
                Tool::Scanner,
                "scanner failed during pre-apply baseline",
            ));
        }
        change.baseline_findings = pre_scan
            .into_iter()
            .filter(|f| f.file == change.file)
            .collect();

        let snapshot = self.backups.snapshot(std::slice::from_ref(&change.file))?;
        change.snapshot_id = Some(snapshot.id);

        let absolute =
            resolve_in_repo(&self.repo_root, &change.file).map_err(PipelineError::internal)?;
        fs::write(&absolute, &change.proposed_content)?;

        change.advance(ChangeState::Applied)?;
        change.applied = true;
        tracing::info!(id = %change.id, file = %change.file.display(), "change applied");
        self.store.update(&change)
    }

    /// Post-apply validation: zero new findings attributable to the change
    /// and a passing test suite, or the change is restored and rolled back.
    pub fn validate_change(&self, id: Uuid) -> Result<ProposedChange> {
        let mut change = self.load(id)?;
        if change.state != ChangeState::Applied {
            return Err(PipelineError::internal(format!(
                "change {} is {}, validate requires applied",
                change.id,
                change.state.label()
            )));
        }

        let validation = ValidationRunner::new(self.scanner, self.test_runner).validate();
        // An unverifiable scan counts as failed validation.
        let new_findings: Option<usize> = if validation.scan_failed {
            None
        } else {
            Some(
                validation
                    .findings
                    .iter()
                    .filter(|f| f.file == change.file && !change.baseline_findings.contains(f))
                    .count(),
            )
        };

        if new_findings == Some(0) && validation.tests_passed {
            change.advance(ChangeState::Validated)?;
            tracing::info!(id = %change.id, "change validated");
            return self.store.update(&change);
        }

        tracing::warn!(
            id = %change.id,
            new_findings = ?new_findings,
            tests_passed = validation.tests_passed,
            "validation failed, rolling change back"
        );
        self.rollback(&mut change)?;
        self.store.update(&change)
    }

    fn rollback(&self, change: &mut ProposedChange) -> Result<()> {
        let snapshot_id = change.snapshot_id.ok_or_else(|| {
            PipelineError::internal(format!("change {} has no snapshot to restore", change.id))
        })?;
        let snapshot = self.backups.load(snapshot_id)?;
        let outcome = self.backups.restore(&snapshot);
        if !outcome.all_ok() {
            return Err(PipelineError::internal(format!(
                "restore of change {} left {} file(s) unrecovered",
                change.id,
                outcome.failed.len()
            )));
        }
        change.advance(ChangeState::RolledBack)?;
        change.applied = false;
        Ok(())
    }

    fn load(&self, id: Uuid) -> Result<ProposedChange> {
        self.store
            .get(id)?
            .ok_or_else(|| PipelineError::internal(format!("change {} not found", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::findings::Severity;
    use crate::sandbox::SandboxTester;
    use crate::testing::TestOutcome;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    struct ScriptedScanner {
        scans: RefCell<VecDeque<Vec<Finding>>>,
    }

    impl ScriptedScanner {
        fn new(scans: Vec<Vec<Finding>>) -> Self {
            ScriptedScanner {
                scans: RefCell::new(scans.into()),
            }
        }

        fn empty() -> Self {
            Self::new(vec![])
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
                failed_count: 2,
                timed_out: false,
                output: String::new(),
            }
        }
    }

    struct NamedCheck {
        name: &'static str,
        verdict: bool,
    }

    impl SafetyCheck for NamedCheck {
        fn name(&self) -> &str {
            self.name
        }

        fn check(&self, _change: &ProposedChange) -> bool {
            self.verdict
        }
    }

    struct Harness {
        dir: TempDir,
        store: ChangeStore,
        backups: BackupManager,
        sandbox: SandboxTester,
    }

    impl Harness {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            fs::create_dir_all(dir.path().join("src")).unwrap();
            fs::write(dir.path().join("src/a.rs"), "fn old() {}\n").unwrap();
            let store = ChangeStore::new(dir.path());
            let backups = BackupManager::new(dir.path());
            let sandbox = SandboxTester::new(dir.path(), Config::default().sandbox_timeout());
            Harness {
                dir,
                store,
                backups,
                sandbox,
            }
        }

        fn pipeline<'a>(
            &'a self,
            scanner: &'a dyn Scanner,
            tests: &'a dyn TestRunner,
            auto_approve: bool,
        ) -> ApprovalPipeline<'a> {
            ApprovalPipeline::new(
                self.dir.path(),
                &self.store,
                &self.backups,
                &self.sandbox,
                scanner,
                tests,
                auto_approve,
            )
        }

        fn target_content(&self) -> String {
            fs::read_to_string(self.dir.path().join("src/a.rs")).unwrap()
        }
    }

    fn finding_on(file: &str, rule: &str, line: usize) -> Finding {
        Finding {
            file: PathBuf::from(file),
            line,
            column: 1,
            rule: rule.to_string(),
            message: "m".to_string(),
            severity: Severity::Warning,
        }
    }

    #[test]
    fn test_critical_risk_waits_for_explicit_approval() {
        // Scenario D: passing every safety check is not approval.
        let scanner = ScriptedScanner::empty();
        let harness = Harness::new();
        let mut pipeline = harness.pipeline(&scanner, &PassingTests, true);
        pipeline.register_safety_check(Box::new(NamedCheck {
            name: "always-ok",
            verdict: true,
        }));

        let change = pipeline
            .draft(
                Path::new("src/a.rs"),
                "fn new() {}\n".to_string(),
                RiskTier::Critical,
                "rewrite".to_string(),
            )
            .unwrap();
        let change = pipeline.run_safety_checks(change.id).unwrap();
        assert_eq!(change.state, ChangeState::AwaitingApproval);
        assert!(!change.approved);

        // Sandbox (and everything after it) refuses to run before approval.
        assert!(pipeline.run_sandbox(change.id).is_err());
        assert!(pipeline.apply(change.id).is_err());

        let change = pipeline.approve(change.id).unwrap();
        assert_eq!(change.state, ChangeState::Approved);
        assert!(change.approved);
    }

    #[test]
    fn test_low_risk_auto_approves_only_when_configured() {
        let scanner = ScriptedScanner::empty();
        let harness = Harness::new();

        let pipeline = harness.pipeline(&scanner, &PassingTests, false);
        let change = pipeline
            .draft(
                Path::new("src/a.rs"),
                "fn new() {}\n".to_string(),
                RiskTier::Low,
                "tidy".to_string(),
            )
            .unwrap();
        let change = pipeline.run_safety_checks(change.id).unwrap();
        assert_eq!(change.state, ChangeState::AwaitingApproval);

        let scanner = ScriptedScanner::empty();
        let pipeline = harness.pipeline(&scanner, &PassingTests, true);
        let change2 = pipeline
            .draft(
                Path::new("src/a.rs"),
                "fn newer() {}\n".to_string(),
                RiskTier::Low,
                "tidy".to_string(),
            )
            .unwrap();
        let change2 = pipeline.run_safety_checks(change2.id).unwrap();
        assert_eq!(change2.state, ChangeState::Approved);
    }

    #[test]
    fn test_any_failing_check_rejects_and_is_recorded() {
        let scanner = ScriptedScanner::empty();
        let harness = Harness::new();
        let mut pipeline = harness.pipeline(&scanner, &PassingTests, true);
        pipeline.register_safety_check(Box::new(NamedCheck {
            name: "ok-check",
            verdict: true,
        }));
        pipeline.register_safety_check(Box::new(NamedCheck {
            name: "paranoid-check",
            verdict: false,
        }));

        let change = pipeline
            .draft(
                Path::new("src/a.rs"),
                "fn new() {}\n".to_string(),
                RiskTier::Low,
                "tidy".to_string(),
            )
            .unwrap();
        let change = pipeline.run_safety_checks(change.id).unwrap();
        assert_eq!(change.state, ChangeState::Rejected);
        assert!(change.state.is_terminal());
        let failing: Vec<_> = change
            .safety_results
            .iter()
            .filter(|r| !r.passed)
            .collect();
        assert_eq!(failing.len(), 1);
        assert_eq!(failing[0].name, "paranoid-check");
    }

    #[test]
    fn test_sandbox_failure_blocks_the_real_write() {
        let scanner = ScriptedScanner::empty();
        let harness = Harness::new();
        let pipeline = harness.pipeline(&scanner, &PassingTests, true);

        let change = pipeline
            .draft(
                Path::new("src/a.rs"),
                "fn broken( {\n".to_string(),
                RiskTier::Low,
                "oops".to_string(),
            )
            .unwrap();
        let change = pipeline.run_safety_checks(change.id).unwrap();
        assert_eq!(change.state, ChangeState::Approved);

        let change = pipeline.run_sandbox(change.id).unwrap();
        assert_eq!(change.state, ChangeState::Rejected);
        assert_eq!(harness.target_content(), "fn old() {}\n");
        assert!(pipeline.apply(change.id).is_err());
    }

    #[test]
    fn test_full_lifecycle_to_validated() {
        // Scans: pre-apply baseline, then validation re-scan.
        let scanner = ScriptedScanner::new(vec![vec![], vec![]]);
        let harness = Harness::new();
        let pipeline = harness.pipeline(&scanner, &PassingTests, true);

        let change = pipeline
            .draft(
                Path::new("src/a.rs"),
                "fn renewed() {}\n".to_string(),
                RiskTier::Low,
                "rename".to_string(),
            )
            .unwrap();
        let change = pipeline.run_safety_checks(change.id).unwrap();
        let change = pipeline.run_sandbox(change.id).unwrap();
        assert_eq!(change.state, ChangeState::SandboxPassed);

        let change = pipeline.apply(change.id).unwrap();
        assert_eq!(change.state, ChangeState::Applied);
        assert!(change.applied);
        assert!(change.snapshot_id.is_some());
        assert_eq!(harness.target_content(), "fn renewed() {}\n");

        let change = pipeline.validate_change(change.id).unwrap();
        assert_eq!(change.state, ChangeState::Validated);
        assert!(change.state.is_terminal());
    }

    #[test]
    fn test_new_attributable_finding_rolls_the_change_back() {
        // Baseline clean; post-apply scan blames the target file.
        let scanner = ScriptedScanner::new(vec![
            vec![],
            vec![finding_on("src/a.rs", "bug/regression", 1)],
        ]);
        let harness = Harness::new();
        let pipeline = harness.pipeline(&scanner, &PassingTests, true);

        let change = pipeline
            .draft(
                Path::new("src/a.rs"),
                "fn worse() {}\n".to_string(),
                RiskTier::Low,
                "regress".to_string(),
            )
            .unwrap();
        let change = pipeline.run_safety_checks(change.id).unwrap();
        let change = pipeline.run_sandbox(change.id).unwrap();
        let change = pipeline.apply(change.id).unwrap();
        assert_eq!(harness.target_content(), "fn worse() {}\n");

        let change = pipeline.validate_change(change.id).unwrap();
        assert_eq!(change.state, ChangeState::RolledBack);
        assert!(!change.applied);
        assert_eq!(harness.target_content(), "fn old() {}\n");
    }

    #[test]
    fn test_preexisting_finding_is_not_attributed() {
        let existing = finding_on("src/a.rs", "style/old-problem", 1);
        // The same finding before and after the apply: not the change's fault.
        let scanner =
            ScriptedScanner::new(vec![vec![existing.clone()], vec![existing.clone()]]);
        let harness = Harness::new();
        let pipeline = harness.pipeline(&scanner, &PassingTests, true);

        let change = pipeline
            .draft(
                Path::new("src/a.rs"),
                "fn renewed() {}\n".to_string(),
                RiskTier::Low,
                "rename".to_string(),
            )
            .unwrap();
        let change = pipeline.run_safety_checks(change.id).unwrap();
        let change = pipeline.run_sandbox(change.id).unwrap();
        let change = pipeline.apply(change.id).unwrap();
        let change = pipeline.validate_change(change.id).unwrap();
        assert_eq!(change.state, ChangeState::Validated);
    }

    #[test]
    fn test_broken_tests_roll_the_change_back() {
        let scanner = ScriptedScanner::new(vec![vec![], vec![]]);
        let harness = Harness::new();
        let pipeline = harness.pipeline(&scanner, &FailingTests, true);

        let change = pipeline
            .draft(
                Path::new("src/a.rs"),
                "fn renewed() {}\n".to_string(),
                RiskTier::Low,
                "rename".to_string(),
            )
            .unwrap();
        let change = pipeline.run_safety_checks(change.id).unwrap();
        let change = pipeline.run_sandbox(change.id).unwrap();
        let change = pipeline.apply(change.id).unwrap();
        let change = pipeline.validate_change(change.id).unwrap();
        assert_eq!(change.state, ChangeState::RolledBack);
        assert_eq!(harness.target_content(), "fn old() {}\n");
    }

    #[test]
    fn test_scanner_failure_at_baseline_aborts_before_write() {
        let scanner = ScriptedScanner::new(vec![vec![Finding {
            file: PathBuf::new(),
            line: 0,
            column: 0,
            rule: crate::findings::RULE_TOOL_FAILED.to_string(),
            message: "down".to_string(),
            severity: Severity::System,
        }]]);
        let harness = Harness::new();
        let pipeline = harness.pipeline(&scanner, &PassingTests, true);

        let change = pipeline
            .draft(
                Path::new("src/a.rs"),
                "fn renewed() {}\n".to_string(),
                RiskTier::Low,
                "rename".to_string(),
            )
            .unwrap();
        let change = pipeline.run_safety_checks(change.id).unwrap();
        let change = pipeline.run_sandbox(change.id).unwrap();

        let err = pipeline.apply(change.id).unwrap_err();
        assert!(err.is_tool_failure());
        assert_eq!(harness.target_content(), "fn old() {}\n");
    }

    #[test]
    fn test_terminal_states_accept_no_further_actions() {
        let scanner = ScriptedScanner::empty();
        let harness = Harness::new();
        let pipeline = harness.pipeline(&scanner, &PassingTests, true);

        let change = pipeline
            .draft(
                Path::new("src/a.rs"),
                "fn new() {}\n".to_string(),
                RiskTier::Medium,
                "edit".to_string(),
            )
            .unwrap();
        let change = pipeline.run_safety_checks(change.id).unwrap();
        let change = pipeline.reject(change.id).unwrap();
        assert_eq!(change.state, ChangeState::Rejected);

        assert!(pipeline.approve(change.id).is_err());
        assert!(pipeline.run_safety_checks(change.id).is_err());
    }
}
