//! Edit strategies: rule-specific, mechanical text fixes.
//!
//! Dispatch is an explicit registry keyed by rule id. A rule with no
//! registered strategy is simply not fixable by this pipeline; the
//! orchestrator reports its findings as failed rather than guessing.

use crate::findings::Finding;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;

/// Built-in rule ids.
pub const RULE_TRAILING_WHITESPACE: &str = "style/trailing-whitespace";
pub const RULE_NO_FINAL_NEWLINE: &str = "style/no-final-newline";
pub const RULE_TAB_INDENT: &str = "style/tab-indent";

/// A rule-specific edit. Implementations must be pure text transforms: they
/// see current content and the rule's findings for that file, and return the
/// full replacement content. They never touch the filesystem.
pub trait EditStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` means the file already satisfies the rule. `Err` is an
    /// edit failure, which the orchestrator converts into a batch rollback.
    fn apply(
        &self,
        path: &Path,
        content: &str,
        findings: &[Finding],
    ) -> Result<Option<String>, String>;
}

/// Registry from rule id to strategy.
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Box<dyn EditStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in low-risk fixes.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(RULE_TRAILING_WHITESPACE, Box::new(TrailingWhitespace));
        registry.register(RULE_NO_FINAL_NEWLINE, Box::new(FinalNewline));
        registry.register(RULE_TAB_INDENT, Box::new(TabIndent::default()));
        registry
    }

    pub fn register(&mut self, rule: &str, strategy: Box<dyn EditStrategy>) {
        self.strategies.insert(rule.to_string(), strategy);
    }

    pub fn get(&self, rule: &str) -> Option<&dyn EditStrategy> {
        self.strategies.get(rule).map(|s| s.as_ref())
    }

    pub fn is_registered(&self, rule: &str) -> bool {
        self.strategies.contains_key(rule)
    }
}

/// Strips trailing spaces and tabs from every line.
pub struct TrailingWhitespace;

impl EditStrategy for TrailingWhitespace {
    fn name(&self) -> &'static str {
        "trailing-whitespace"
    }

    fn apply(
        &self,
        _path: &Path,
        content: &str,
        _findings: &[Finding],
    ) -> Result<Option<String>, String> {
        let had_final_newline = content.ends_with('\n');
        let mut out: String = content
            .lines()
            .map(|line| line.trim_end_matches([' ', '\t']))
            .collect::<Vec<_>>()
            .join("\n");
        if had_final_newline {
            out.push('\n');
        }
        if out == content {
            Ok(None)
        } else {
            Ok(Some(out))
        }
    }
}

/// Appends the missing final newline.
pub struct FinalNewline;

impl EditStrategy for FinalNewline {
    fn name(&self) -> &'static str {
        "final-newline"
    }

    fn apply(
        &self,
        _path: &Path,
        content: &str,
        _findings: &[Finding],
    ) -> Result<Option<String>, String> {
        if content.is_empty() || content.ends_with('\n') {
            Ok(None)
        } else {
            Ok(Some(format!("{}\n", content)))
        }
    }
}

/// Rewrites leading tabs to spaces.
pub struct TabIndent {
    spaces_per_tab: usize,
    leading_tabs: Regex,
}

impl Default for TabIndent {
    fn default() -> Self {
        TabIndent {
            spaces_per_tab: 4,
            leading_tabs: Regex::new(r"(?m)^\t+").unwrap(),
        }
    }
}

impl EditStrategy for TabIndent {
    fn name(&self) -> &'static str {
        "tab-indent"
    }

    fn apply(
        &self,
        _path: &Path,
        content: &str,
        _findings: &[Finding],
    ) -> Result<Option<String>, String> {
        if !self.leading_tabs.is_match(content) {
            return Ok(None);
        }
        let out = self.leading_tabs.replace_all(content, |caps: &regex::Captures| {
            " ".repeat(caps[0].len() * self.spaces_per_tab)
        });
        Ok(Some(out.into_owned()))
    }
}
