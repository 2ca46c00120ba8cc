//! Error taxonomy for the pipeline.
//!
//! Only failures that must surface to the caller are errors here. A safety
//! rejection is data on the change record, and a regression rollback is a
//! statistic on the batch report; neither is an `Err`.

use std::path::PathBuf;
use thiserror::Error;

/// Which external tool failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Scanner,
    TestRunner,
    SandboxCheck,
}

impl Tool {
    pub fn name(&self) -> &'static str {
        match self {
            Tool::Scanner => "scanner",
            Tool::TestRunner => "test runner",
            Tool::SandboxCheck => "sandbox check",
        }
    }
}

/// Errors that surface out of the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// An external tool was unavailable, crashed, or timed out. Never
    /// swallowed: a run that cannot scan is indeterminate, not clean.
    #[error("{} failed: {reason}", tool.name())]
    ToolFailure { tool: Tool, reason: String },

    /// An edit strategy could not produce content for a file. Recovered
    /// locally by the orchestrator (counts as a failed fix and triggers the
    /// batch rollback), surfaced only when snapshotting itself fails.
    #[error("edit strategy for rule '{rule}' failed on {}: {reason}", file.display())]
    EditFailure {
        rule: String,
        file: PathBuf,
        reason: String,
    },

    /// Unexpected failure inside the pipeline itself: IO on our own state,
    /// an illegal lifecycle transition, a poisoned store. Aborts the current
    /// batch or change with a rollback attempt.
    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn internal(msg: impl Into<String>) -> Self {
        PipelineError::Internal(msg.into())
    }

    pub fn tool(tool: Tool, reason: impl Into<String>) -> Self {
        PipelineError::ToolFailure {
            tool,
            reason: reason.into(),
        }
    }

    /// True when the run outcome is "could not determine" rather than a
    /// defect in the pipeline.
    pub fn is_tool_failure(&self) -> bool {
        matches!(self, PipelineError::ToolFailure { .. })
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
