//! `lf recover` - resume, reset, or clean up claimed work.

use crate::errors::LumenError;
use crate::events::{EventKind, WuEvent};
use crate::lock::AcquireOptions;
use crate::styling::{self, hint_message, info_message, success_message, warning_message};
use crate::wu::{WuId, WuStatus};

use super::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RecoverAction {
    /// Re-establish the worktree and show recorded progress.
    Resume,
    /// Abandon the claim: release the WU, drop the worktree and branch.
    Reset,
    /// Remove orphaned worktrees and stale locks; report drift.
    Cleanup,
}

#[derive(Debug, Clone)]
pub struct RecoverOptions {
    pub id: WuId,
    pub action: RecoverAction,
    pub force: bool,
}

pub fn run_recover(ws: &Workspace, opts: &RecoverOptions) -> anyhow::Result<()> {
    let resolver = ws.resolver();
    let ctx = resolver.resolve(&ws.cwd, Some(&opts.id), None);
    let result = crate::context::validate("wu:recover", &ctx);
    if !result.valid {
        return Err(LumenError::Validation {
            command: "wu:recover".into(),
            issues: result.errors,
        }
        .into());
    }

    match opts.action {
        RecoverAction::Resume => resume(ws, opts),
        RecoverAction::Reset => reset(ws, opts),
        RecoverAction::Cleanup => cleanup(ws, opts),
    }
}

fn resume(ws: &Workspace, opts: &RecoverOptions) -> anyhow::Result<()> {
    let store = ws.wu_store();
    let wu = store.require(&opts.id)?;
    if wu.status != WuStatus::InProgress {
        return Err(LumenError::InconsistentState {
            id: wu.id.to_string(),
            reason: format!("resume expects in_progress, found {}", wu.status),
        }
        .into());
    }

    let manager = ws.manager();
    let path = manager.path_for(&wu);
    let branch = wu.claimed_branch.clone().unwrap_or_else(|| wu.branch_name());

    if path.is_dir() {
        manager.ensure_on_branch(&path, &branch)?;
        styling::eprintln!(
            "{}",
            info_message(format!(
                "Worktree intact at {}",
                crate::path::format_path_for_display(&path)
            ))
        );
    } else if ws.repo.branch_exists(&branch)? {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        ws.repo.add_worktree_for_branch(&path, &branch)?;
        styling::eprintln!(
            "{}",
            success_message(format!("Recreated worktree on existing branch {branch}"))
        );
    } else {
        // Both worktree and branch are gone; start over from the base
        manager.create(&wu, Some(&branch), false)?;
        styling::eprintln!(
            "{}",
            warning_message(format!(
                "Branch {branch} was lost; recreated from {}",
                manager.base_ref()
            ))
        );
    }

    // Replay checkpoint breadcrumbs so the agent can pick up where it left off
    let projected = ws.events().project_one(&opts.id);
    if let Some(progress) = &projected.progress {
        styling::eprintln!("{}", info_message(format!("Progress: {progress}")));
    }
    if let Some(next_steps) = &projected.next_steps {
        styling::eprintln!("{}", info_message(format!("Next steps: {next_steps}")));
    }
    let quoted = shell_escape::escape(path.to_string_lossy());
    styling::eprintln!("{}", hint_message(format!("cd {quoted}")));
    Ok(())
}

fn reset(ws: &Workspace, opts: &RecoverOptions) -> anyhow::Result<()> {
    let store = ws.wu_store();
    let mut wu = store.require(&opts.id)?;
    if !matches!(wu.status, WuStatus::InProgress | WuStatus::Blocked) && !opts.force {
        return Err(LumenError::InconsistentState {
            id: wu.id.to_string(),
            reason: format!("reset expects in_progress or blocked, found {}", wu.status),
        }
        .into());
    }

    let lock = ws.merge_lock();
    lock.with_lock(opts.id, AcquireOptions::default(), || {
        let manager = ws.manager();
        manager.delete(&wu, opts.force)?;

        ws.append_event(
            &WuEvent::new(EventKind::Release, opts.id)
                .with_lane(&wu.lane)
                .with_reason("recover reset"),
        )?;
        wu.claimed_branch = None;
        wu.worktree_path = None;
        ws.write_status(&ws.root, &mut wu, WuStatus::Ready)?;
        ws.sync_metadata(&ws.root, Some(&wu))?;

        styling::eprintln!(
            "{}",
            success_message(format!("{} reset to ready", wu.id))
        );
        Ok(())
    })
}

fn cleanup(ws: &Workspace, opts: &RecoverOptions) -> anyhow::Result<()> {
    // Stale merge lock
    let lock = ws.merge_lock();
    if let Some(info) = lock.read() {
        let age = chrono::DateTime::parse_from_rfc3339(&info.created_at)
            .map(|t| chrono::Utc::now().signed_duration_since(t.with_timezone(&chrono::Utc)))
            .ok();
        let stale = age.map(|a| a.num_seconds() > 60).unwrap_or(true);
        if stale {
            std::fs::remove_file(lock.path())?;
            styling::eprintln!(
                "{}",
                success_message(format!(
                    "Removed stale merge lock (held by {} since {})",
                    info.wu_id, info.created_at
                ))
            );
        } else {
            styling::eprintln!(
                "{}",
                info_message(format!("Merge lock is live (held by {})", info.wu_id))
            );
        }
    }

    // Orphaned worktrees: directories naming a WU that is not in progress
    let worktrees_dir = ws.config.worktrees_dir_abs(&ws.root);
    let projections = ws.events().replay();
    let store = ws.wu_store();
    if let Ok(entries) = std::fs::read_dir(&worktrees_dir) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(id) = crate::wu::WuId::extract(&name) else {
                continue;
            };
            let in_progress = projections
                .get(&id)
                .map(|p| p.status == WuStatus::InProgress)
                .unwrap_or(false);
            if in_progress {
                continue;
            }
            let Ok(Some(wu)) = store.load(&id) else {
                continue;
            };
            match ws.manager().delete(&wu, opts.force) {
                Ok(()) => styling::eprintln!(
                    "{}",
                    success_message(format!("Removed orphaned worktree {name}"))
                ),
                Err(e) => styling::eprintln!(
                    "{}",
                    warning_message(format!(
                        "Orphaned worktree {name} kept ({e}); rerun with --force to discard"
                    ))
                ),
            }
        }
    }

    // Report YAML/event drift so the operator knows what validate will say
    let mut drift = 0;
    for wu in store.list()? {
        let projected = projections
            .get(&wu.id)
            .cloned()
            .unwrap_or_default();
        if let Some(reason) = crate::events::detect_inconsistency(wu.status, &projected) {
            drift += 1;
            styling::eprintln!(
                "{}",
                warning_message(format!("{}: {reason}", wu.id))
            );
        }
    }
    if drift == 0 {
        styling::eprintln!("{}", info_message("No YAML/event drift detected"));
    }
    Ok(())
}
