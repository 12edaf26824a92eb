//! Execution context: where are we, what does git say, what state is the WU
//! in, and does the requested command make sense here.

mod registry;
mod resolver;
mod validator;

pub use registry::{CommandRegistry, CommandSpec, LocationReq, StatusReq};
pub use resolver::ContextResolver;
pub use validator::{Severity, ValidationIssue, ValidationResult, validate};

use std::path::PathBuf;

use crate::events::ProjectedState;
use crate::wu::{WorkUnit, WuId};

/// Where the current directory sits relative to the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum LocationType {
    /// The main checkout.
    Main,
    /// A linked worktree.
    Worktree,
    /// Inside the repository but detached from any branch.
    Detached,
    /// Not a git repository (or git itself is failing).
    Unknown,
}

/// Resolved location facts. Runtime-only; recomputed per command.
#[derive(Debug, Clone)]
pub struct WorktreeContext {
    pub location: LocationType,
    pub cwd: PathBuf,
    pub git_root: Option<PathBuf>,
    pub main_checkout: Option<PathBuf>,
    /// Final path component of the worktree root, when in one.
    pub worktree_name: Option<String>,
    /// WU id embedded in the worktree name, when recognizable.
    pub worktree_wu_id: Option<WuId>,
}

/// A snapshot of `git status --porcelain -b`, parsed.
///
/// Failures never propagate from here: `has_error` flips and the rest of the
/// fields keep their zero values, because location resolution must work even
/// in a broken checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitState {
    pub branch: Option<String>,
    pub is_detached: bool,
    pub is_dirty: bool,
    pub has_staged: bool,
    pub ahead: usize,
    pub behind: usize,
    pub tracking: Option<String>,
    pub modified_files: Vec<String>,
    pub has_error: bool,
    pub error_message: Option<String>,
}

/// YAML state and event projection for one WU, with the drift check applied.
#[derive(Debug, Clone)]
pub struct WuStateResult {
    pub yaml: WorkUnit,
    pub projected: ProjectedState,
    pub is_consistent: bool,
    pub inconsistency_reason: Option<String>,
}

/// Everything the validator looks at for one command invocation.
#[derive(Debug, Clone)]
pub struct WuContext {
    pub location: WorktreeContext,
    pub git: GitState,
    pub wu: Option<WuStateResult>,
    /// Session identifier from the environment, if any.
    pub session: Option<String>,
    /// Git state of the target WU's worktree, when it exists.
    pub worktree_git: Option<GitState>,
    /// Whether the target WU's worktree directory exists on disk.
    pub worktree_exists: bool,
    /// Commits on the WU's branch not on the base ref (when known).
    pub commits_ahead: Option<usize>,
    /// Lane requested by the command (claim), when any.
    pub requested_lane: Option<String>,
    /// The WU currently in progress on the requested lane, if any.
    pub lane_occupant: Option<WuId>,
}
