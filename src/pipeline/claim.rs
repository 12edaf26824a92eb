//! `lf claim` - take a ready WU, provision its worktree, record the claim.

use anyhow::Context;

use crate::errors::LumenError;
use crate::events::{EventKind, WuEvent};
use crate::lock::AcquireOptions;
use crate::signals::Signal;
use crate::styling::{self, hint_message, info_message, success_message, warning_message};
use crate::wu::{WuId, WuStatus};

use super::Workspace;

#[derive(Debug, Clone)]
pub struct ClaimOptions {
    pub id: WuId,
    pub lane: String,
    /// Skip pushing the lane branch to the remote.
    pub no_push: bool,
    /// Skip the automatic base-ref fetch; branch from what's already local.
    pub no_auto: bool,
    /// Override the branch name policy.
    pub branch: Option<String>,
}

#[derive(Debug)]
pub struct ClaimOutcome {
    pub worktree_path: std::path::PathBuf,
    pub branch: String,
    pub surfaced_signals: Vec<Signal>,
}

pub fn run_claim(ws: &Workspace, opts: &ClaimOptions) -> anyhow::Result<ClaimOutcome> {
    let resolver = ws.resolver();
    let ctx = resolver.resolve(&ws.cwd, Some(&opts.id), Some(&opts.lane));
    let result = crate::context::validate("wu:claim", &ctx);
    if !result.valid {
        return Err(LumenError::Validation {
            command: "wu:claim".into(),
            issues: result.errors,
        }
        .into());
    }
    for warning in &result.warnings {
        styling::eprintln!("{}", warning_message(&warning.message));
    }

    let store = ws.wu_store();
    let mut wu = store.require(&opts.id)?;
    if wu.lane != opts.lane {
        return Err(LumenError::Validation {
            command: "wu:claim".into(),
            issues: vec![crate::context::ValidationIssue {
                code: crate::errors::ErrorCode::WrongWuStatus,
                severity: crate::context::Severity::Error,
                message: format!(
                    "{} belongs to lane {:?}, not {:?}",
                    wu.id, wu.lane, opts.lane
                ),
                fix_command: Some(format!("lf claim --id {} --lane '{}'", wu.id, wu.lane)),
            }],
        }
        .into());
    }

    let lock = ws.merge_lock();
    lock.with_lock(opts.id, AcquireOptions::default(), || {
        // Rescan under the lock: another claim may have won the lane since
        // validation ran.
        if let Some(occupant) = ws.events().lane_occupant(&opts.lane)
            && occupant != opts.id
        {
            return Err(LumenError::LaneOccupied {
                lane: opts.lane.clone(),
                held_by: occupant.to_string(),
            }
            .into());
        }

        let manager = ws.manager();
        let worktree_path = manager.create(&wu, opts.branch.as_deref(), opts.no_auto)?;
        let branch = opts
            .branch
            .clone()
            .unwrap_or_else(|| wu.branch_name());

        ws.append_event(
            &WuEvent::new(EventKind::Claim, opts.id)
                .with_lane(&opts.lane)
                .with_title(&wu.title),
        )?;

        wu.claimed_branch = Some(branch.clone());
        wu.worktree_path = Some(
            pathdiff::diff_paths(&worktree_path, &ws.root)
                .unwrap_or_else(|| worktree_path.clone())
                .to_string_lossy()
                .into_owned(),
        );
        ws.write_status(&ws.root, &mut wu, WuStatus::InProgress)
            .context("recording claim in WU YAML")?;
        ws.sync_metadata(&ws.root, Some(&wu))?;

        // Publish the lane branch so it tracks the remote. Best-effort: a
        // missing remote shouldn't undo a locally valid claim.
        if ws.config.require_remote && !opts.no_push {
            if let Err(e) = ws.repo.push_set_upstream(&ws.config.default_remote, &branch) {
                styling::eprintln!(
                    "{}",
                    warning_message(format!("could not push {branch}: {e}"))
                );
            }
        }

        // Surface unread signals aimed at this WU or lane
        let signal_store = ws.signal_store();
        let surfaced = signal_store.unread_for(&opts.id, &opts.lane);
        if !surfaced.is_empty() {
            styling::eprintln!("{}", info_message("Signals for this claim:"));
            for signal in &surfaced {
                styling::eprintln!("  [{}] {}", signal.created_at, signal.message);
            }
            let ids: Vec<String> = surfaced.iter().map(|s| s.id.clone()).collect();
            signal_store.mark_read(&ids)?;
        }

        styling::eprintln!(
            "{}",
            success_message(format!(
                "Claimed {} on {} → {}",
                wu.id,
                opts.lane,
                crate::path::format_path_for_display(&worktree_path)
            ))
        );
        let quoted = shell_escape::escape(worktree_path.to_string_lossy());
        styling::eprintln!("{}", hint_message(format!("cd {quoted} to start working")));

        Ok(ClaimOutcome {
            worktree_path,
            branch,
            surfaced_signals: surfaced,
        })
    })
}
