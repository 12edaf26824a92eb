//! Context validation.
//!
//! `validate` checks a command's declarative requirements against a resolved
//! [`WuContext`] and returns every failure at once - a user fixing
//! remediation items shouldn't discover them one re-run at a time.

use crate::errors::ErrorCode;
use crate::wu::WuStatus;

use super::registry::{CommandRegistry, LocationReq, StatusReq};
use super::{LocationType, WuContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// One validation finding, with remediation when known.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidationIssue {
    pub code: ErrorCode,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix_command: Option<String>,
}

impl ValidationIssue {
    fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: Severity::Error,
            message: message.into(),
            fix_command: None,
        }
    }

    fn warning(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: Severity::Warning,
            message: message.into(),
            fix_command: None,
        }
    }

    fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix_command = Some(fix.into());
        self
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        let (errors, warnings): (Vec<_>, Vec<_>) = issues
            .into_iter()
            .partition(|i| i.severity == Severity::Error);
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    pub fn has_code(&self, code: ErrorCode) -> bool {
        self.errors.iter().any(|i| i.code == code)
            || self.warnings.iter().any(|i| i.code == code)
    }
}

/// Validate `command` against `ctx`.
pub fn validate(command: &str, ctx: &WuContext) -> ValidationResult {
    let registry = CommandRegistry::global();
    let Some(spec) = registry.get(command) else {
        let mut issue = ValidationIssue::error(
            ErrorCode::UnknownCommand,
            format!("unknown command {command:?}"),
        );
        if let Some(suggestion) = registry.closest(command) {
            issue = issue.with_fix(format!("did you mean {suggestion}?"));
        }
        return ValidationResult::from_issues(vec![issue]);
    };

    let mut issues = Vec::new();

    // Location requirement
    let location_ok = match spec.required_location {
        LocationReq::Any => ctx.location.location != LocationType::Unknown,
        LocationReq::Main => ctx.location.location == LocationType::Main,
        LocationReq::Worktree => ctx.location.location == LocationType::Worktree,
    };
    if !location_ok {
        let mut issue = ValidationIssue::error(
            ErrorCode::WrongLocation,
            format!(
                "{} must run from {} (currently {})",
                spec.name,
                match spec.required_location {
                    LocationReq::Main => "the main checkout",
                    LocationReq::Worktree => "a worktree",
                    LocationReq::Any => "inside the repository",
                },
                ctx.location.location
            ),
        );
        if let Some(main) = &ctx.location.main_checkout {
            issue = issue.with_fix(format!("cd {} && {}", main.display(), spec.name));
        }
        issues.push(issue);
    }

    // WU status requirement
    match (spec.required_wu_status, &ctx.wu) {
        (StatusReq::Optional, _) => {}
        (StatusReq::None, Some(state)) => {
            issues.push(ValidationIssue::error(
                ErrorCode::WuAlreadyExists,
                format!("{} already exists (status {})", state.yaml.id, state.yaml.status),
            ));
        }
        (StatusReq::None, None) => {}
        (_, None) => {
            issues.push(ValidationIssue::error(
                ErrorCode::WuNotFound,
                "no such work unit in the workspace",
            ));
        }
        (StatusReq::Any, Some(_)) => {}
        (StatusReq::Is(required), Some(state)) => {
            if state.yaml.status != required {
                issues.push(ValidationIssue::error(
                    ErrorCode::WrongWuStatus,
                    format!(
                        "{} is {}, {} requires {}",
                        state.yaml.id, state.yaml.status, spec.name, required
                    ),
                ));
            }
        }
    }

    // Predicates, all of them - no short-circuit
    for predicate in spec.predicates {
        if let Some(issue) = evaluate_predicate(predicate, ctx) {
            issues.push(issue);
        }
    }

    ValidationResult::from_issues(issues)
}

/// Named predicates referenced by the registry. Pure over the context.
fn evaluate_predicate(name: &str, ctx: &WuContext) -> Option<ValidationIssue> {
    match name {
        "state-consistent" => {
            let state = ctx.wu.as_ref()?;
            if state.is_consistent {
                None
            } else {
                Some(
                    ValidationIssue::error(
                        ErrorCode::InconsistentState,
                        state
                            .inconsistency_reason
                            .clone()
                            .unwrap_or_else(|| "YAML and event store disagree".into()),
                    )
                    .with_fix(format!("lf validate --id {}", state.yaml.id)),
                )
            }
        }
        "lane-free" => {
            let lane = ctx.requested_lane.as_deref()?;
            let occupant = ctx.lane_occupant?;
            let own_id = ctx.wu.as_ref().map(|s| s.yaml.id);
            if Some(occupant) == own_id {
                None
            } else {
                Some(ValidationIssue::error(
                    ErrorCode::LaneOccupied,
                    format!("lane {lane:?} already has {occupant} in progress"),
                ))
            }
        }
        "worktree-absent" => {
            if ctx.worktree_exists {
                let id = ctx.wu.as_ref().map(|s| s.yaml.id.to_string()).unwrap_or_default();
                Some(
                    ValidationIssue::error(
                        ErrorCode::WorktreeExists,
                        "a worktree for this work unit already exists",
                    )
                    .with_fix(format!("lf recover --id {id} --action resume")),
                )
            } else {
                None
            }
        }
        "worktree-present" => {
            if ctx.worktree_exists {
                None
            } else {
                let id = ctx.wu.as_ref().map(|s| s.yaml.id.to_string()).unwrap_or_default();
                Some(
                    ValidationIssue::error(
                        ErrorCode::WorktreeMissing,
                        "the work unit's worktree is missing",
                    )
                    .with_fix(format!("lf recover --id {id} --action resume")),
                )
            }
        }
        "worktree-clean" => {
            let git = ctx.worktree_git.as_ref()?;
            if git.is_dirty {
                Some(ValidationIssue::error(
                    ErrorCode::DirtyGit,
                    format!(
                        "the worktree has {} uncommitted file(s); commit or stash them",
                        git.modified_files.len()
                    ),
                ))
            } else {
                None
            }
        }
        "has-commits" => {
            match ctx.commits_ahead {
                Some(0) => Some(ValidationIssue::warning(
                    ErrorCode::DirtyGit,
                    "the lane branch has no commits beyond the base",
                )),
                _ => None,
            }
        }
        "branch-tracks-origin" => {
            let git = ctx.worktree_git.as_ref()?;
            if git.tracking.is_none() {
                Some(ValidationIssue::warning(
                    ErrorCode::RemoteUnavailable,
                    "the lane branch does not track a remote",
                ))
            } else {
                None
            }
        }
        "not-on-main" => {
            let git = ctx.worktree_git.as_ref().unwrap_or(&ctx.git);
            match &git.branch {
                Some(branch) if branch == "main" || branch == "master" => {
                    Some(ValidationIssue::error(
                        ErrorCode::WrongLocation,
                        "refusing to operate directly on the trunk branch",
                    ))
                }
                _ => None,
            }
        }
        "releasable-status" => {
            let state = ctx.wu.as_ref()?;
            match state.yaml.status {
                WuStatus::InProgress | WuStatus::Blocked => None,
                other => Some(ValidationIssue::error(
                    ErrorCode::WrongWuStatus,
                    format!("only in_progress or blocked work units release (found {other})"),
                )),
            }
        }
        other => {
            log::warn!("unknown predicate {other:?} in registry");
            None
        }
    }
}
