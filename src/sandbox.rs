//! Sandbox tester: structural validation before any real write.
//!
//! Candidate content is written to a scratch copy under
//! `.patchguard/sandbox/`, never to the real path, and the cheapest available
//! structural check runs against it. Passing means only "not structurally
//! broken" — it is a gate against obviously mangled output, not a claim of
//! correctness.

use crate::config::STATE_DIR;
use crate::error::Result;
use crate::util::run_with_timeout;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use uuid::Uuid;

const SANDBOX_DIR: &str = "sandbox";

/// Pre-write structural check over an isolated scratch copy.
pub trait SandboxCheck {
    fn check(&self, path: &Path, candidate: &str) -> Result<bool>;
}

pub struct SandboxTester {
    scratch_dir: PathBuf,
    timeout: Duration,
}

impl SandboxTester {
    pub fn new(repo_root: &Path, timeout: Duration) -> Self {
        let scratch_dir = repo_root.join(STATE_DIR).join(SANDBOX_DIR);
        // Scratch files from a crashed run are worthless; clear them.
        if scratch_dir.is_dir() {
            if let Ok(entries) = fs::read_dir(&scratch_dir) {
                for entry in entries.flatten() {
                    let _ = fs::remove_file(entry.path());
                }
            }
        }
        SandboxTester {
            scratch_dir,
            timeout,
        }
    }

    fn write_scratch(&self, path: &Path, candidate: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.scratch_dir)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "candidate".to_string());
        let scratch = self
            .scratch_dir
            .join(format!("{}-{}", Uuid::new_v4(), file_name));
        fs::write(&scratch, candidate)?;
        Ok(scratch)
    }
}

impl SandboxCheck for SandboxTester {
    fn check(&self, path: &Path, candidate: &str) -> Result<bool> {
        // An edit that empties a real file is structurally suspect on its own.
        if candidate.trim().is_empty() {
            return Ok(false);
        }

        let scratch = self.write_scratch(path, candidate)?;
        let verdict = run_structural_check(&scratch, path, candidate, self.timeout);
        let _ = fs::remove_file(&scratch);
        Ok(verdict)
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn run_structural_check(scratch: &Path, original: &Path, candidate: &str, timeout: Duration) -> bool {
    match extension(original).as_str() {
        "json" => serde_json::from_str::<serde_json::Value>(candidate).is_ok(),
        "py" => python_compile_check(scratch, timeout)
            .unwrap_or_else(|| delimiters_balanced(candidate, CommentStyle::Hash)),
        "rs" | "c" | "h" | "cpp" | "hpp" | "go" | "js" | "ts" | "java" => {
            delimiters_balanced(candidate, CommentStyle::Slashes)
        }
        _ => delimiters_balanced(candidate, CommentStyle::None),
    }
}

/// `python -m py_compile` when a Python toolchain is present; `None` when it
/// is not, so the caller can fall back to the generic scan.
fn python_compile_check(scratch: &Path, timeout: Duration) -> Option<bool> {
    let mut cmd = Command::new("python3");
    cmd.args(["-m", "py_compile"]).arg(scratch);
    match run_with_timeout(&mut cmd, timeout) {
        Ok(outcome) if !outcome.timed_out && outcome.exit_code.is_some() => Some(outcome.success),
        _ => None,
    }
}

#[derive(Clone, Copy, PartialEq)]
enum CommentStyle {
    Slashes,
    Hash,
    None,
}

/// Bracket-balance scan aware of string literals and comments. Deliberately
/// rough: the cheapest check that still catches truncated or garbled output.
fn delimiters_balanced(content: &str, comments: CommentStyle) -> bool {
    let mut stack: Vec<char> = Vec::new();
    let mut chars = content.chars().peekable();
    let mut in_string = false;
    let mut in_line_comment = false;
    let mut in_block_comment = false;

    while let Some(c) = chars.next() {
        if in_line_comment {
            if c == '\n' {
                in_line_comment = false;
            }
            continue;
        }
        if in_block_comment {
            if c == '*' && chars.peek() == Some(&'/') {
                chars.next();
                in_block_comment = false;
            }
            continue;
        }
        if in_string {
            match c {
                '\\' => {
                    chars.next();
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '#' if comments == CommentStyle::Hash => in_line_comment = true,
            '/' if comments == CommentStyle::Slashes => match chars.peek() {
                Some('/') => {
                    chars.next();
                    in_line_comment = true;
                }
                Some('*') => {
                    chars.next();
                    in_block_comment = true;
                }
                _ => {}
            },
            '(' | '[' | '{' => stack.push(c),
            ')' => {
                if stack.pop() != Some('(') {
                    return false;
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return false;
                }
            }
            '}' => {
                if stack.pop() != Some('{') {
                    return false;
                }
            }
            _ => {}
        }
    }

    stack.is_empty() && !in_string && !in_block_comment
}
