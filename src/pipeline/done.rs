//! `lf done` - gates, metadata transaction, rebase, fast-forward merge.
//!
//! Failure classes and their on-disk outcomes:
//!
//! - before the metadata commit: nothing changed, lock released
//! - after the commit, before the merge: worktree reset to the pre-commit
//!   tip, snapshot restored, no `complete` event, lock released
//! - after the merge, before the push: local main ahead of origin; rerunning
//!   the push is idempotent
//! - after the push, before cleanup: worktree retained for inspection; a
//!   rerun sees `done` + stamp and exits successfully

use std::path::Path;

use anyhow::Context;

use crate::errors::LumenError;
use crate::events::{EventKind, WuEvent};
use crate::gates::{GateRunner, GateVars};
use crate::lock::AcquireOptions;
use crate::styling::{self, success_message, warning_message};
use crate::transaction::Snapshot;
use crate::worktree::RebaseOutcome;
use crate::wu::{WorkUnit, WuId, WuStatus};

use super::Workspace;

#[derive(Debug, Clone)]
pub struct DoneOptions {
    pub id: WuId,
    /// Bypass the dirty-main guard (audited).
    pub force: bool,
    /// Leave main unpushed.
    pub no_push: bool,
    /// Permit TODO markers in the changed files.
    pub allow_todo: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum DoneOutcome {
    Merged,
    /// The WU was already done; nothing to do.
    AlreadyDone,
}

pub fn run_done(ws: &Workspace, opts: &DoneOptions) -> anyhow::Result<DoneOutcome> {
    let store = ws.wu_store();
    let wu = store.require(&opts.id)?;

    // At-most-once: a second invocation sees `done` plus the stamp and
    // reports success instead of failing status validation.
    if wu.status == WuStatus::Done && ws.config.stamp_path(&ws.root, &opts.id).is_file() {
        styling::eprintln!(
            "{}",
            success_message(format!("{} is already done (stamp present)", opts.id))
        );
        return Ok(DoneOutcome::AlreadyDone);
    }

    let resolver = ws.resolver();
    let ctx = resolver.resolve(&ws.cwd, Some(&opts.id), None);
    let result = crate::context::validate("wu:done", &ctx);
    if !result.valid {
        return Err(LumenError::Validation {
            command: "wu:done".into(),
            issues: result.errors,
        }
        .into());
    }
    for warning in &result.warnings {
        styling::eprintln!("{}", warning_message(&warning.message));
    }

    dirty_main_guard(ws, &wu, opts.force)?;

    let lock = ws.merge_lock();
    lock.with_lock(opts.id, AcquireOptions::default(), || {
        merge_under_lock(ws, wu.clone(), opts)
    })
}

/// Every non-empty `git status --porcelain` line on main must be a path the
/// WU owns or a metadata file; anything else blocks the merge.
fn dirty_main_guard(ws: &Workspace, wu: &WorkUnit, force: bool) -> anyhow::Result<()> {
    let main_wt = ws.repo.worktree_at(&ws.root);
    let status = main_wt.run(&["status", "--porcelain"])?;
    let mut unrelated = Vec::new();
    for line in status.lines() {
        if line.len() < 3 {
            continue;
        }
        let path = line[2..].trim();
        let path = path.rsplit(" -> ").next().unwrap_or(path);
        if !ws.dirty_main_allowed(wu, path) {
            unrelated.push(path.to_string());
        }
    }
    if unrelated.is_empty() {
        return Ok(());
    }
    if force {
        // Bypass is allowed but leaves a trace
        log::warn!(
            "dirty-main guard bypassed with --force for {}: {}",
            wu.id,
            unrelated.join(", ")
        );
        let wu_label = wu.id.to_string();
        crate::command_log::record(
            "audit",
            Some(wu_label.as_str()),
            &format!("dirty-main bypass: {}", unrelated.join(" ")),
            None,
            None,
        );
        return Ok(());
    }
    Err(LumenError::DirtyWorkingTree {
        location: "main".into(),
        unrelated_files: unrelated,
    }
    .into())
}

fn merge_under_lock(
    ws: &Workspace,
    mut wu: WorkUnit,
    opts: &DoneOptions,
) -> anyhow::Result<DoneOutcome> {
    let manager = ws.manager();
    let worktree_path = manager.path_for(&wu);
    let branch = wu
        .claimed_branch
        .clone()
        .unwrap_or_else(|| wu.branch_name());
    manager.ensure_on_branch(&worktree_path, &branch)?;

    // 1. Gates - fail means abort with no writes
    let gate_log_dir = ws.config.gate_log_dir(&ws.root);
    let changed = ws
        .repo
        .worktree_at(&worktree_path)
        .changed_files(&manager.base_ref())
        .unwrap_or_default();
    let vars = GateVars {
        wu: wu.id.to_string(),
        lane: wu.lane.clone(),
        branch: branch.clone(),
        worktree: worktree_path.to_string_lossy().into_owned(),
        base: manager.base_ref(),
    };
    // --verbose turns on debug logging, which doubles as the signal to keep
    // full gate output on the terminal instead of agent-mode compaction
    let verbose = log::log_enabled!(log::Level::Debug);
    let runner = GateRunner::new(&ws.config.gates, &worktree_path, vars, gate_log_dir, verbose);
    let report = runner.run(&changed)?;
    if !report.passed {
        let failure = report.first_failure();
        return Err(LumenError::GateFailed {
            gate: failure.map(|f| f.gate.clone()).unwrap_or_default(),
            exit_code: failure.and_then(|f| f.exit_code),
            log_path: report.log_path.clone(),
        }
        .into());
    }

    // 2. Preflight - schema and path sanity before anything is written
    preflight(ws, &wu, &worktree_path, &changed, opts.allow_todo)?;

    // 3. Snapshot main's metadata copies, then write the new state in the
    //    worktree where it will be committed
    let main_metadata = ws.metadata_paths(&ws.root, &wu);
    let mut snapshot = Snapshot::capture(main_metadata.iter().cloned())?;

    let wt = ws.repo.worktree_at(&worktree_path);
    let pre_commit_sha = wt.head_sha()?;

    let commit_result = (|| -> anyhow::Result<()> {
        write_done_metadata(ws, &worktree_path, &mut wu)?;

        // 4. Commit the metadata in the worktree (only files that exist -
        //    the owning initiative may have no YAML yet)
        let rel_paths: Vec<String> = ws
            .metadata_paths(Path::new(""), &wu)
            .iter()
            .filter(|p| worktree_path.join(p).exists())
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let rel_refs: Vec<&str> = rel_paths.iter().map(String::as_str).collect();
        wt.add(&rel_refs)?;
        wt.commit(&format!("{}: {} (wu:done)", wu.id, wu.title))?;
        Ok(())
    })();
    if let Err(e) = commit_result {
        // Pre-commit failure: reset any partial metadata writes
        let _ = wt.reset_hard(&pre_commit_sha);
        let _ = snapshot.restore();
        return Err(e);
    }
    snapshot.commit();

    // 5. Rebase onto the base ref; conflicts roll everything back
    match manager.auto_rebase(&worktree_path, None)? {
        RebaseOutcome::Clean => {}
        RebaseOutcome::Conflict { summary } => {
            wt.reset_hard(&pre_commit_sha)
                .context("resetting worktree after rebase conflict")?;
            snapshot.restore()?;
            return Err(LumenError::MergeConflict {
                branch,
                target: manager.base_ref(),
                summary,
            }
            .into());
        }
    }

    // 6. The event log records completion before the merge publishes it;
    //    on later failure the YAML also says done, so state stays consistent
    ws.append_event(
        &WuEvent::new(EventKind::Complete, wu.id).with_lane(&wu.lane),
    )?;

    // 7. Drop main's superseded metadata copies so the fast-forward can
    //    update them (their bytes live in the snapshot)
    restore_tracked_copies(ws, &main_metadata);

    // 8. Fast-forward main. A failure here (main moved underneath us via an
    //    external push) restores main's metadata; the worktree keeps the
    //    rebased commit so the work is not lost.
    let main_wt = ws.repo.worktree_at(&ws.root);
    if let Err(e) = main_wt.merge_ff_only(&branch) {
        let _ = snapshot.restore();
        return Err(e.context(format!(
            "fast-forward to {} failed; run 'lf validate --id {}' before retrying",
            ws.config.main_branch, wu.id
        )));
    }

    // 9. Push - failure leaves local main ahead; a retry is idempotent
    if ws.config.require_remote && !opts.no_push {
        if let Err(e) = ws.repo.push(&ws.config.default_remote, &ws.config.main_branch) {
            styling::eprintln!(
                "{}",
                warning_message(format!(
                    "merge landed locally but push failed: {e}; rerun 'lf done --id {}' (idempotent) or push manually",
                    wu.id
                ))
            );
            return Ok(DoneOutcome::Merged);
        }
    }

    // 10. Cleanup - failure here retains the worktree for inspection
    if let Err(e) = manager.delete(&wu, false) {
        styling::eprintln!(
            "{}",
            warning_message(format!(
                "worktree retained ({e}); rerun is idempotent once it's removed"
            ))
        );
    }

    // Refresh main's generated docs so live (uncommitted) claims reappear
    // in the backlog now that the merged copy replaced it
    if let Err(e) = ws.sync_metadata(&ws.root, Some(&wu)) {
        log::warn!("post-merge metadata refresh failed: {e}");
    }

    styling::eprintln!(
        "{}",
        success_message(format!("{} merged to {}", wu.id, ws.config.main_branch))
    );
    Ok(DoneOutcome::Merged)
}

/// Schema, code-path, and TODO checks before any write.
fn preflight(
    ws: &Workspace,
    wu: &WorkUnit,
    worktree_path: &Path,
    changed: &[String],
    allow_todo: bool,
) -> anyhow::Result<()> {
    let issues = wu.schema_issues();
    if !issues.is_empty() {
        return Err(LumenError::YamlParse {
            path: ws.config.wu_path(&ws.root, &wu.id),
            detail: issues.join("; "),
        }
        .into());
    }

    // Declared code paths must exist in the worktree; suggest near-misses
    let wt = ws.repo.worktree_at(worktree_path);
    let tracked: Vec<String> = wt
        .run(&["ls-files"])
        .map(|out| out.lines().map(str::to_string).collect())
        .unwrap_or_default();
    for code_path in &wu.code_paths {
        let as_dir = format!("{}/", code_path.trim_end_matches('/'));
        let exists = worktree_path.join(code_path).exists()
            || tracked.iter().any(|f| f == code_path || f.starts_with(&as_dir));
        if !exists {
            let suggestion = tracked
                .iter()
                .map(|f| (f, strsim::jaro_winkler(code_path, f)))
                .filter(|(_, score)| *score > 0.85)
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(f, _)| f.clone());
            let mut detail = format!("declared code path {code_path:?} does not exist");
            if let Some(suggestion) = suggestion {
                detail.push_str(&format!(" (did you mean {suggestion:?}?)"));
            }
            return Err(LumenError::YamlParse {
                path: ws.config.wu_path(&ws.root, &wu.id),
                detail,
            }
            .into());
        }
    }

    // Leftover TODO markers in changed files block unless waived
    if !allow_todo {
        for file in changed {
            let path = worktree_path.join(file);
            let Ok(text) = std::fs::read_to_string(&path) else {
                continue; // binary or deleted
            };
            if text.contains("TODO") || text.contains("FIXME") {
                return Err(LumenError::Validation {
                    command: "wu:done".into(),
                    issues: vec![crate::context::ValidationIssue {
                        code: crate::errors::ErrorCode::GatesNotPassed,
                        severity: crate::context::Severity::Error,
                        message: format!("{file} still contains TODO/FIXME markers"),
                        fix_command: Some("resolve them or rerun with --allow-todo".to_string()),
                    }],
                }
                .into());
            }
        }
    }
    Ok(())
}

/// Write the done-state metadata into the worktree copy of the tree.
fn write_done_metadata(
    ws: &Workspace,
    worktree_path: &Path,
    wu: &mut WorkUnit,
) -> anyhow::Result<()> {
    wu.worktree_path = None;
    ws.write_status(worktree_path, wu, WuStatus::Done)?;

    // Stamp: title + timestamp prove completion even without the event log
    let stamp_path = worktree_path
        .join(&ws.config.stamps_dir)
        .join(format!("{}.done", wu.id));
    if let Some(parent) = stamp_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        &stamp_path,
        format!(
            "{}\n{}\n",
            wu.title,
            chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        ),
    )?;

    ws.sync_metadata(worktree_path, Some(wu))
}

/// Discard main's uncommitted copies of the snapshot paths so the merge can
/// update them. Tracked files are restored from HEAD; untracked copies are
/// removed - git refuses to fast-forward over an untracked file the merge
/// would create. Either way the snapshot holds the original bytes.
fn restore_tracked_copies(ws: &Workspace, paths: &[std::path::PathBuf]) {
    let main_wt = ws.repo.worktree_at(&ws.root);
    for path in paths {
        let Ok(rel) = path.strip_prefix(&ws.root) else {
            continue;
        };
        let rel = rel.to_string_lossy();
        let tracked = main_wt
            .run_check(&["ls-files", "--error-unmatch", rel.as_ref()])
            .unwrap_or(false);
        if tracked {
            let _ = main_wt.run(&["checkout", "--", rel.as_ref()]);
        } else if path.is_file() {
            let _ = std::fs::remove_file(path);
        }
    }
}
