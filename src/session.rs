//! Session controller: drives fix batches across a whole repository.
//!
//! A session is one guarded pass: pre-flight sanity checks, one scan,
//! rule batches in priority order, then a final validation and re-scan so the
//! report always states what the tree looks like now. The first rolled-back
//! batch halts further batches; an automated agent that just regressed does
//! not get to keep editing.

use crate::backup::BackupManager;
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::findings::{group_by_rule, Finding};
use crate::fixer::{BatchReport, FixOrchestrator};
use crate::scanner::Scanner;
use crate::strategy::StrategyRegistry;
use crate::testing::TestRunner;
use crate::validate::ValidationRunner;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Cumulative counters for one session run. Owned exclusively by that run;
/// two concurrent sessions never share one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub errors_before: usize,
    pub errors_after: usize,
    pub fixed: usize,
    pub failed: usize,
    pub files_touched: usize,
    pub rollbacks: usize,
    /// True when a tool failure made the error counts untrustworthy.
    /// "Could not determine" must never render as "0 errors".
    pub indeterminate: bool,
    /// Human-readable notes (tool-failure detail, halt reason).
    pub notes: Vec<String>,
}

impl SessionStats {
    pub fn rollback_occurred(&self) -> bool {
        self.rollbacks > 0
    }
}

/// Progress events, delivered to an injected observer so concurrent sessions
/// never share a log buffer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ScanCompleted { findings: usize, indeterminate: bool },
    BatchStarted { rule: String, findings: usize },
    BatchFinished(BatchReport),
    HaltedAfterRollback { rule: String },
    Finished(SessionStats),
}

pub trait EventSink {
    fn on_event(&self, event: &SessionEvent);
}

/// Sink that forwards events to `tracing`.
#[derive(Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::ScanCompleted {
                findings,
                indeterminate,
            } => {
                tracing::info!(findings, indeterminate, "scan completed");
            }
            SessionEvent::BatchStarted { rule, findings } => {
                tracing::info!(rule, findings, "batch started");
            }
            SessionEvent::BatchFinished(report) => {
                tracing::info!(
                    rule = report.rule,
                    fixed = report.fixed,
                    failed = report.failed,
                    rolled_back = report.rolled_back,
                    "batch finished"
                );
            }
            SessionEvent::HaltedAfterRollback { rule } => {
                tracing::warn!(rule, "halting further batches after rollback");
            }
            SessionEvent::Finished(stats) => {
                tracing::info!(
                    fixed = stats.fixed,
                    failed = stats.failed,
                    rollbacks = stats.rollbacks,
                    "session finished"
                );
            }
        }
    }
}

pub struct SessionController<'a> {
    repo_root: PathBuf,
    config: &'a Config,
    registry: &'a StrategyRegistry,
    backups: &'a BackupManager,
    scanner: &'a dyn Scanner,
    test_runner: &'a dyn TestRunner,
    sink: &'a dyn EventSink,
}

impl<'a> SessionController<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo_root: &Path,
        config: &'a Config,
        registry: &'a StrategyRegistry,
        backups: &'a BackupManager,
        scanner: &'a dyn Scanner,
        test_runner: &'a dyn TestRunner,
        sink: &'a dyn EventSink,
    ) -> Self {
        SessionController {
            repo_root: repo_root.to_path_buf(),
            config,
            registry,
            backups,
            scanner,
            test_runner,
            sink,
        }
    }

    /// Run one full session. `priority_order` names the rules to fix first;
    /// rules present in the scan but not listed run afterwards in lexical
    /// order, so every scanned rule gets exactly one batch.
    pub fn run_session(&self, priority_order: &[String]) -> Result<SessionStats> {
        self.preflight()?;

        let mut stats = SessionStats::default();
        let initial = self.scanner.scan();

        if let Some(note) = system_note(&initial) {
            // Zero-guard: the scan is untrustworthy, so nothing gets edited.
            stats.indeterminate = true;
            stats.notes.push(note);
            self.sink.on_event(&SessionEvent::ScanCompleted {
                findings: 0,
                indeterminate: true,
            });
            self.sink.on_event(&SessionEvent::Finished(stats.clone()));
            return Ok(stats);
        }

        self.sink.on_event(&SessionEvent::ScanCompleted {
            findings: initial.len(),
            indeterminate: false,
        });

        if initial.is_empty() {
            // Clean tree: all-zero stats, nothing to validate.
            self.sink.on_event(&SessionEvent::Finished(stats.clone()));
            return Ok(stats);
        }

        stats.errors_before = initial.len();
        let groups = group_by_rule(&initial);
        let order = effective_order(priority_order, &groups);

        let orchestrator = FixOrchestrator::new(
            &self.repo_root,
            self.registry,
            self.backups,
            self.scanner,
            self.test_runner,
        );

        for rule in &order {
            let findings = &groups[rule];
            self.sink.on_event(&SessionEvent::BatchStarted {
                rule: rule.clone(),
                findings: findings.len(),
            });

            let report = orchestrator.run_batch(rule, findings)?;
            stats.fixed += report.fixed;
            stats.failed += report.failed;
            stats.files_touched += report.files_touched;
            let halted = report.rolled_back;
            if halted {
                stats.rollbacks += 1;
            }
            self.sink.on_event(&SessionEvent::BatchFinished(report));

            if halted {
                stats
                    .notes
                    .push(format!("halted after rollback in rule '{}'", rule));
                self.sink
                    .on_event(&SessionEvent::HaltedAfterRollback { rule: rule.clone() });
                break;
            }
        }

        // Final validation + re-scan always runs, halt or not: the report
        // must state what the tree looks like now.
        let validation = ValidationRunner::new(self.scanner, self.test_runner).validate();
        if validation.scan_failed {
            stats.indeterminate = true;
            if let Some(note) = system_note(&validation.findings) {
                stats.notes.push(note);
            }
        } else {
            stats.errors_after = validation.findings.len();
        }
        if !validation.tests_passed {
            stats
                .notes
                .push("test suite failing at end of session".to_string());
        }

        self.sink.on_event(&SessionEvent::Finished(stats.clone()));
        Ok(stats)
    }

    /// Structural sanity checks that must hold before any mutation.
    fn preflight(&self) -> Result<()> {
        for required in &self.config.required_paths {
            if !self.repo_root.join(required).exists() {
                return Err(PipelineError::internal(format!(
                    "pre-flight failed: required path '{}' is missing",
                    required.display()
                )));
            }
        }

        // Duplicated entry-point files under one src/ tree mean the repo
        // layout is not what the strategies assume; refuse to edit it.
        let mut seen: BTreeMap<(PathBuf, String), usize> = BTreeMap::new();
        for entry in WalkDir::new(&self.repo_root)
            .into_iter()
            .filter_entry(|e| !is_skipped_dir(e.file_name().to_string_lossy().as_ref()))
            .flatten()
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !self.config.entry_point_names.contains(&name) {
                continue;
            }
            let anchor = entry
                .path()
                .ancestors()
                .find(|a| a.file_name().map(|n| n == "src").unwrap_or(false))
                .unwrap_or(&self.repo_root)
                .to_path_buf();
            *seen.entry((anchor, name)).or_default() += 1;
        }

        for ((anchor, name), count) in seen {
            if count > 1 {
                return Err(PipelineError::internal(format!(
                    "pre-flight failed: {} copies of '{}' under '{}'",
                    count,
                    name,
                    anchor.display()
                )));
            }
        }

        Ok(())
    }
}

fn is_skipped_dir(name: &str) -> bool {
    matches!(
        name,
        ".git" | ".patchguard" | "target" | "node_modules" | ".venv"
    )
}

fn system_note(findings: &[Finding]) -> Option<String> {
    findings
        .iter()
        .find(|f| f.is_system())
        .map(|f| format!("{}: {}", f.rule, f.message))
}

/// Priority order first (rules actually present, deduplicated), then the
/// remaining scanned rules lexically.
fn effective_order(priority: &[String], groups: &BTreeMap<String, Vec<Finding>>) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    for rule in priority {
        if groups.contains_key(rule) && !order.contains(rule) {
            order.push(rule.clone());
        }
    }
    for rule in groups.keys() {
        if !order.contains(rule) {
            order.push(rule.clone());
        }
    }
    order
}
