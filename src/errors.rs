//! Error types and formatting.
//!
//! Pipelines return `anyhow::Result`; domain failures are expressed as
//! [`LumenError`] variants so the binary boundary can map them to exit codes
//! and so messages carry a remediation hint where one is known. The variant
//! set is closed - new failure modes extend this enum rather than inventing
//! ad-hoc error strings.

use std::fmt;
use std::path::PathBuf;

use crate::styling::{ERROR_EMOJI, HINT_EMOJI};
use color_print::cformat;

/// Machine-readable codes attached to validation failures.
///
/// These form the contract with callers that parse `--json` output; the set
/// is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    WrongLocation,
    WuNotFound,
    WuAlreadyExists,
    WrongWuStatus,
    LaneOccupied,
    WorktreeExists,
    WorktreeMissing,
    GatesNotPassed,
    DirtyGit,
    RemoteUnavailable,
    InconsistentState,
    UnknownCommand,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WrongLocation => "WRONG_LOCATION",
            Self::WuNotFound => "WU_NOT_FOUND",
            Self::WuAlreadyExists => "WU_ALREADY_EXISTS",
            Self::WrongWuStatus => "WRONG_WU_STATUS",
            Self::LaneOccupied => "LANE_OCCUPIED",
            Self::WorktreeExists => "WORKTREE_EXISTS",
            Self::WorktreeMissing => "WORKTREE_MISSING",
            Self::GatesNotPassed => "GATES_NOT_PASSED",
            Self::DirtyGit => "DIRTY_GIT",
            Self::RemoteUnavailable => "REMOTE_UNAVAILABLE",
            Self::InconsistentState => "INCONSISTENT_STATE",
            Self::UnknownCommand => "UNKNOWN_COMMAND",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain errors surfaced by pipelines.
#[derive(Debug)]
pub enum LumenError {
    /// One or more validation failures; remediation per issue.
    Validation {
        command: String,
        issues: Vec<crate::context::ValidationIssue>,
    },
    WuNotFound {
        id: String,
    },
    InconsistentState {
        id: String,
        reason: String,
    },
    LaneOccupied {
        lane: String,
        held_by: String,
    },
    WorktreeExists {
        path: PathBuf,
    },
    WorktreeMissing {
        id: String,
        path: PathBuf,
    },
    DirtyWorkingTree {
        location: String,
        unrelated_files: Vec<String>,
    },
    GateFailed {
        gate: String,
        exit_code: Option<i32>,
        log_path: Option<PathBuf>,
    },
    MergeConflict {
        branch: String,
        target: String,
        summary: String,
    },
    LockError {
        wu_id: String,
        held_by: Option<String>,
        held_since: Option<String>,
    },
    RemoteUnavailable {
        remote: String,
        detail: String,
    },
    YamlParse {
        path: PathBuf,
        detail: String,
    },
    Io {
        path: PathBuf,
        detail: String,
    },
    Git {
        context: String,
        detail: String,
    },
}

impl LumenError {
    /// The `fixCommand` remediation where one is known.
    pub fn fix_command(&self) -> Option<String> {
        match self {
            Self::Validation { issues, .. } => {
                issues.iter().find_map(|i| i.fix_command.clone())
            }
            Self::WorktreeMissing { id, .. } => {
                Some(format!("lf recover --id {id} --action resume"))
            }
            Self::DirtyWorkingTree { .. } => Some("git stash or commit the listed files".into()),
            Self::InconsistentState { id, .. } => Some(format!("lf validate --id {id}")),
            _ => None,
        }
    }
}

impl fmt::Display for LumenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { command, issues } => {
                writeln!(
                    f,
                    "{}",
                    cformat!("{ERROR_EMOJI} <red>{command} blocked by {} validation failure(s)</>", issues.len())
                )?;
                for issue in issues {
                    writeln!(f, "  [{}] {}", issue.code, issue.message)?;
                    if let Some(fix) = &issue.fix_command {
                        writeln!(f, "{}", cformat!("  {HINT_EMOJI} <dim>{fix}</>"))?;
                    }
                }
                Ok(())
            }
            Self::WuNotFound { id } => {
                write!(f, "{}", cformat!("{ERROR_EMOJI} <red>No work unit <bold>{id}</> found</>"))
            }
            Self::InconsistentState { id, reason } => {
                write!(
                    f,
                    "{}",
                    cformat!(
                        "{ERROR_EMOJI} <red>State for <bold>{id}</> is inconsistent: {reason}</>\n{HINT_EMOJI} <dim>Run 'lf validate --id {id}' for details</>"
                    )
                )
            }
            Self::LaneOccupied { lane, held_by } => {
                write!(
                    f,
                    "{}",
                    cformat!(
                        "{ERROR_EMOJI} <red>Lane <bold>{lane}</> already has <bold>{held_by}</> in progress</>\n{HINT_EMOJI} <dim>Finish or release {held_by} first</>"
                    )
                )
            }
            Self::WorktreeExists { path } => {
                write!(
                    f,
                    "{}",
                    cformat!(
                        "{ERROR_EMOJI} <red>Worktree directory already exists: <bold>{}</></>\n{HINT_EMOJI} <dim>Use 'lf recover' to resume or clean it up</>",
                        path.display()
                    )
                )
            }
            Self::WorktreeMissing { id, path } => {
                write!(
                    f,
                    "{}",
                    cformat!(
                        "{ERROR_EMOJI} <red>Worktree for <bold>{id}</> missing at <bold>{}</></>\n{HINT_EMOJI} <dim>Run 'lf recover --id {id} --action resume'</>",
                        path.display()
                    )
                )
            }
            Self::DirtyWorkingTree {
                location,
                unrelated_files,
            } => {
                writeln!(
                    f,
                    "{}",
                    cformat!("{ERROR_EMOJI} <red>Uncommitted changes on {location} outside the work unit's paths:</>")
                )?;
                for file in unrelated_files {
                    writeln!(f, "  {file}")?;
                }
                write!(
                    f,
                    "{}",
                    cformat!("{HINT_EMOJI} <dim>Commit or stash them, or rerun with --force (audited)</>")
                )
            }
            Self::GateFailed {
                gate,
                exit_code,
                log_path,
            } => {
                let code = exit_code
                    .map(|c| format!(" (exit code {c})"))
                    .unwrap_or_default();
                write!(f, "{}", cformat!("{ERROR_EMOJI} <red>Gate <bold>{gate}</> failed{code}</>"))?;
                if let Some(path) = log_path {
                    write!(
                        f,
                        "\n{}",
                        cformat!("{HINT_EMOJI} <dim>Full output: {}</>", path.display())
                    )?;
                }
                Ok(())
            }
            Self::MergeConflict {
                branch,
                target,
                summary,
            } => {
                writeln!(
                    f,
                    "{}",
                    cformat!("{ERROR_EMOJI} <red>Rebase of <bold>{branch}</> onto <bold>{target}</> conflicted; rolled back</>")
                )?;
                if !summary.is_empty() {
                    writeln!(f, "{}", crate::styling::format_with_gutter(summary))?;
                }
                write!(
                    f,
                    "{}",
                    cformat!("{HINT_EMOJI} <dim>Rebase manually in the worktree, then rerun 'lf done'</>")
                )
            }
            Self::LockError {
                wu_id,
                held_by,
                held_since,
            } => {
                write!(f, "{}", cformat!("{ERROR_EMOJI} <red>Could not acquire merge lock for <bold>{wu_id}</></>"))?;
                if let (Some(holder), Some(since)) = (held_by, held_since) {
                    write!(f, "\n  held by {holder} since {since}")?;
                }
                Ok(())
            }
            Self::RemoteUnavailable { remote, detail } => {
                write!(
                    f,
                    "{}",
                    cformat!(
                        "{ERROR_EMOJI} <red>Remote <bold>{remote}</> unavailable: {detail}</>\n{HINT_EMOJI} <dim>Rerun with --no-push, or set git.require_remote = false</>"
                    )
                )
            }
            Self::YamlParse { path, detail } => {
                write!(
                    f,
                    "{}",
                    cformat!("{ERROR_EMOJI} <red>Failed to parse <bold>{}</>: {detail}</>", path.display())
                )
            }
            Self::Io { path, detail } => {
                write!(
                    f,
                    "{}",
                    cformat!("{ERROR_EMOJI} <red>I/O error at <bold>{}</>: {detail}</>", path.display())
                )
            }
            Self::Git { context, detail } => {
                write!(f, "{}", cformat!("{ERROR_EMOJI} <red>git {context} failed</>"))?;
                if !detail.is_empty() {
                    write!(f, "\n{}", crate::styling::format_with_gutter(detail))?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for LumenError {}

/// Map an error chain to the CLI exit code.
///
/// 0 is success (never produced here); 2 validation; 3 conflict/lock;
/// 4 gate failure; 1 everything else.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<LumenError>() {
        Some(
            LumenError::LaneOccupied { .. }
            | LumenError::MergeConflict { .. }
            | LumenError::LockError { .. }
            | LumenError::WorktreeExists { .. },
        ) => 3,
        Some(LumenError::GateFailed { .. }) => 4,
        Some(
            LumenError::Io { .. } | LumenError::Git { .. } | LumenError::RemoteUnavailable { .. },
        ) => 1,
        Some(_) => 2,
        None => 1,
    }
}
