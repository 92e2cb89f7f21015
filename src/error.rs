//! Engine-internal error taxonomy.
//!
//! A flat enum with a manual `Display` impl, deliberately unstyled: this
//! engine has no user-facing text surface of its own, so plain messages
//! are enough; callers that want color do their own formatting.

use std::path::PathBuf;

/// Engine-internal error categories (§7).
#[derive(Debug)]
pub enum LineError {
    /// A `git` subprocess invocation failed; `command` is the argv joined
    /// for logging, `detail` is the trimmed stderr/stdout tail.
    Git { command: String, detail: String },
    /// A ref or path could not be resolved to a commit.
    UnknownRef { reference: String },
    /// `create_branch` was called but the branch already exists.
    BranchAlreadyExists { branch: String },
    /// `create_worktree` was called but the path already exists.
    WorktreePathExists { path: PathBuf },
    /// Both the rebase and the hard-reset fallback failed (§4.1).
    RebaseAndResetFailed { target: String, detail: String },
    /// The configured agent command could not be spawned.
    AgentSpawnFailed { command: String, detail: String },
    /// The agent process exited with a non-zero status.
    AgentExited { command: String, code: Option<i32> },
    /// Failure allocating or wiring up a pseudo-terminal.
    PtySetupFailed { detail: String },
    /// A state-store file (status/last-seen/pid/trigger) could not be
    /// read or written.
    StateIo { path: PathBuf, detail: String },
    /// The station-name graph failed validation (duplicate/empty names,
    /// or a cycle the planner detected via coloring).
    InvalidStationGraph { detail: String },
}

impl std::fmt::Display for LineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineError::Git { command, detail } => {
                write!(f, "git command failed: {command}: {detail}")
            }
            LineError::UnknownRef { reference } => {
                write!(f, "unknown ref: {reference}")
            }
            LineError::BranchAlreadyExists { branch } => {
                write!(f, "branch already exists: {branch}")
            }
            LineError::WorktreePathExists { path } => {
                write!(f, "worktree path already exists: {}", path.display())
            }
            LineError::RebaseAndResetFailed { target, detail } => {
                write!(
                    f,
                    "rebase onto {target} failed, and the hard-reset fallback also failed: {detail}"
                )
            }
            LineError::AgentSpawnFailed { command, detail } => {
                write!(f, "failed to spawn agent command `{command}`: {detail}")
            }
            LineError::AgentExited { command, code } => match code {
                Some(code) => write!(f, "agent command `{command}` exited with code {code}"),
                None => write!(f, "agent command `{command}` was terminated by a signal"),
            },
            LineError::PtySetupFailed { detail } => {
                write!(f, "failed to set up pseudo-terminal: {detail}")
            }
            LineError::StateIo { path, detail } => {
                write!(f, "state file error at {}: {detail}", path.display())
            }
            LineError::InvalidStationGraph { detail } => {
                write!(f, "invalid station graph: {detail}")
            }
        }
    }
}

impl std::error::Error for LineError {}
