//! Finding model and classifier.
//!
//! Normalizes raw scanner output into typed findings. The one rule that
//! everything downstream leans on is the zero-guard: an empty finding list is
//! only believable when the scanner genuinely succeeded. Any tool failure
//! becomes a system-tier pseudo-finding so "could not determine" can never be
//! mistaken for "nothing to fix".

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Rule ids reserved for tool-failure pseudo-findings.
pub const RULE_TOOL_FAILED: &str = "system/tool-failed";
pub const RULE_TIMEOUT: &str = "system/timeout";
pub const RULE_PARSE_FAILED: &str = "system/parse-failed";

/// Severity of a finding. `System` is reserved for tool-failure
/// pseudo-findings and is never produced by prefix normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    System,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::System => "system",
        }
    }
}

/// A single reported issue, or a system-tier stand-in for tool failure.
///
/// Findings are produced fresh per scan and never mutated; the next scan
/// supersedes them wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
    pub rule: String,
    pub message: String,
    pub severity: Severity,
}

impl Finding {
    pub fn is_system(&self) -> bool {
        self.severity == Severity::System
    }

    fn system(rule: &str, message: String) -> Self {
        Finding {
            file: PathBuf::new(),
            line: 0,
            column: 0,
            rule: rule.to_string(),
            message,
            severity: Severity::System,
        }
    }
}

/// How the scanner process ended, as far as the classifier cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitInfo {
    Success,
    Failed(Option<i32>),
    TimedOut,
}

/// One entry in the rule-prefix severity table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityRule {
    pub prefix: String,
    pub severity: Severity,
}

/// Maps rule ids to severities by longest matching prefix.
#[derive(Debug, Clone, Default)]
pub struct SeverityMap {
    rules: Vec<SeverityRule>,
}

impl SeverityMap {
    pub fn new(mut rules: Vec<SeverityRule>) -> Self {
        // Longest prefix first so `style/tab` beats `style/`.
        rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        SeverityMap { rules }
    }

    pub fn severity_for(&self, rule: &str) -> Severity {
        self.rules
            .iter()
            .find(|r| rule.starts_with(&r.prefix))
            .map(|r| r.severity)
            .unwrap_or(Severity::Warning)
    }
}

/// One record as the scanner emits it: a JSON object per line.
#[derive(Debug, Deserialize)]
struct RawRecord {
    file: PathBuf,
    line: usize,
    #[serde(default)]
    column: usize,
    rule: String,
    message: String,
}

/// Classify raw scanner output into findings.
///
/// Pure: no IO, no side effects. On any failure (bad exit, timeout,
/// unparseable output) the result is exactly one system-tier finding, never
/// an empty list.
pub fn classify(raw: &str, exit: &ExitInfo, map: &SeverityMap) -> Vec<Finding> {
    match exit {
        ExitInfo::TimedOut => {
            return vec![Finding::system(RULE_TIMEOUT, "scanner timed out".to_string())];
        }
        ExitInfo::Failed(code) => {
            let detail = match code {
                Some(c) => format!("scanner exited with status {}", c),
                None => "scanner was killed by a signal".to_string(),
            };
            return vec![Finding::system(RULE_TOOL_FAILED, detail)];
        }
        ExitInfo::Success => {}
    }

    let mut findings = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        // A single bad line poisons the scan; a partial parse could hide
        // findings, which is exactly what the zero-guard forbids.
        match serde_json::from_str::<RawRecord>(trimmed) {
            Ok(record) => findings.push(Finding {
                severity: map.severity_for(&record.rule),
                file: record.file,
                line: record.line,
                column: record.column,
                rule: record.rule,
                message: record.message,
            }),
            Err(err) => {
                return vec![Finding::system(
                    RULE_PARSE_FAILED,
                    format!("unparseable scanner output at line {}: {}", idx + 1, err),
                )];
            }
        }
    }
    findings
}

/// Bucket findings by rule id. BTreeMap keeps iteration deterministic for
/// priority-order processing.
pub fn group_by_rule(findings: &[Finding]) -> BTreeMap<String, Vec<Finding>> {
    let mut groups: BTreeMap<String, Vec<Finding>> = BTreeMap::new();
    for finding in findings {
        groups
            .entry(finding.rule.clone())
            .or_default()
            .push(finding.clone());
    }
    groups
}

/// Count findings for one rule id.
pub fn count_for_rule(findings: &[Finding], rule: &str) -> usize {
    findings.iter().filter(|f| f.rule == rule).count()
}
