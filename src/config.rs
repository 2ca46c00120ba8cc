//! Per-repository configuration.
//!
//! Stored in `.patchguard/config.json` at the repo root. Everything has a
//! usable default so a bare `patchguard run` works on a repo with no config
//! at all.

use crate::findings::{Severity, SeverityMap, SeverityRule};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory under the repo root that holds all durable pipeline state.
pub const STATE_DIR: &str = ".patchguard";

const CONFIG_FILE: &str = "config.json";

/// A program plus arguments, invoked as a blocking black box.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// External scanner invocation; expected to print JSON-lines findings.
    pub scanner: ToolCommand,
    /// Test runner override. When absent the runner is detected from the
    /// project layout (Cargo.toml, package.json, ...).
    pub test_command: Option<ToolCommand>,
    #[serde(default = "default_scanner_timeout")]
    pub scanner_timeout_secs: u64,
    #[serde(default = "default_test_timeout")]
    pub test_timeout_secs: u64,
    #[serde(default = "default_sandbox_timeout")]
    pub sandbox_timeout_secs: u64,
    /// Rule-prefix severity table, longest prefix wins.
    #[serde(default = "default_severity_rules")]
    pub severity_rules: Vec<SeverityRule>,
    /// Paths that must exist before any mutation is attempted.
    #[serde(default = "default_required_paths")]
    pub required_paths: Vec<PathBuf>,
    /// File names that plausibly occur once per crate root; duplicates under
    /// a single src/ tree abort the pre-flight.
    #[serde(default = "default_entry_points")]
    pub entry_point_names: Vec<String>,
    /// Rule ids in the order batches should run; rules present in the scan
    /// but absent here run afterwards in lexical order.
    #[serde(default)]
    pub rule_priority: Vec<String>,
    /// Allow low-risk proposed changes to skip the human approval step.
    /// Medium and above always wait, regardless of this flag.
    #[serde(default)]
    pub auto_approve_low_risk: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            scanner: ToolCommand {
                program: "patchguard-scan".to_string(),
                args: Vec::new(),
            },
            test_command: None,
            scanner_timeout_secs: default_scanner_timeout(),
            test_timeout_secs: default_test_timeout(),
            sandbox_timeout_secs: default_sandbox_timeout(),
            severity_rules: default_severity_rules(),
            required_paths: default_required_paths(),
            entry_point_names: default_entry_points(),
            rule_priority: Vec::new(),
            auto_approve_low_risk: false,
        }
    }
}

fn default_scanner_timeout() -> u64 {
    120
}

fn default_test_timeout() -> u64 {
    600
}

fn default_sandbox_timeout() -> u64 {
    30
}

fn default_severity_rules() -> Vec<SeverityRule> {
    vec![
        SeverityRule {
            prefix: "style/".to_string(),
            severity: Severity::Info,
        },
        SeverityRule {
            prefix: "bug/".to_string(),
            severity: Severity::Error,
        },
    ]
}

fn default_required_paths() -> Vec<PathBuf> {
    Vec::new()
}

fn default_entry_points() -> Vec<String> {
    vec!["main.rs".to_string()]
}

impl Config {
    fn config_path(repo_root: &Path) -> PathBuf {
        repo_root.join(STATE_DIR).join(CONFIG_FILE)
    }

    /// Load config from the repo, or return defaults. A corrupt file is
    /// preserved next to the original and defaults are used.
    pub fn load(repo_root: &Path) -> Self {
        let path = Self::config_path(repo_root);
        if let Ok(content) = fs::read_to_string(&path) {
            match serde_json::from_str(&content) {
                Ok(config) => return config,
                Err(err) => {
                    preserve_corrupt_config(&path, &content);
                    tracing::warn!(
                        error = %err,
                        "config file was corrupted; backup saved, defaults loaded"
                    );
                }
            }
        }
        Self::default()
    }

    /// Save config to `.patchguard/config.json`.
    pub fn save(&self, repo_root: &Path) -> anyhow::Result<()> {
        let dir = repo_root.join(STATE_DIR);
        fs::create_dir_all(&dir)?;
        let content = serde_json::to_string_pretty(self)?;
        let path = dir.join(CONFIG_FILE);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn severity_map(&self) -> SeverityMap {
        SeverityMap::new(self.severity_rules.clone())
    }

    pub fn scanner_timeout(&self) -> Duration {
        Duration::from_secs(self.scanner_timeout_secs)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }

    pub fn sandbox_timeout(&self) -> Duration {
        Duration::from_secs(self.sandbox_timeout_secs)
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let backup = path.with_extension("json.corrupt");
    let _ = fs::write(backup, content);
}

/// Keep the state directory out of version control: `.gitignore` when one
/// exists, `.git/info/exclude` otherwise.
pub fn ensure_state_dir_ignored(repo_root: &Path) -> anyhow::Result<()> {
    let entry = format!("{}/", STATE_DIR);
    let gitignore_path = repo_root.join(".gitignore");
    if gitignore_path.exists() {
        append_ignore_entry(&gitignore_path, &entry)?;
        return Ok(());
    }

    let git_dir = repo_root.join(".git");
    if git_dir.is_dir() {
        let exclude_path = git_dir.join("info").join("exclude");
        if let Some(parent) = exclude_path.parent() {
            if fs::create_dir_all(parent).is_ok() && append_ignore_entry(&exclude_path, &entry).is_ok() {
                return Ok(());
            }
        }
    }

    append_ignore_entry(&gitignore_path, &entry)?;
    Ok(())
}

fn append_ignore_entry(path: &Path, entry: &str) -> anyhow::Result<()> {
    let content = fs::read_to_string(path).unwrap_or_default();
    let already_present = content.lines().any(|line| {
        let trimmed = line.trim();
        trimmed == entry || trimmed == STATE_DIR
    });
    if already_present {
        return Ok(());
    }

    let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    use std::io::Write;
    if !content.trim().is_empty() && !content.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "# patchguard state")?;
    writeln!(file, "{}", entry)?;
    Ok(())
}
