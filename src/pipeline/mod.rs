//! Command orchestrators.
//!
//! Each lifecycle command is a short-lived pipeline over the same parts:
//! resolve context, validate, take the merge lock where state changes, do
//! the work, sync metadata. [`Workspace`] wires the parts together from a
//! discovered repository.

mod claim;
mod done;
mod ops;
mod recover;
mod status;
mod validate;

pub use claim::{ClaimOptions, ClaimOutcome, run_claim};
pub use done::{DoneOptions, DoneOutcome, run_done};
pub use ops::{
    CheckpointOptions, CreateOptions, run_block, run_checkpoint, run_create, run_release,
    run_spawn, run_unblock,
};
pub use recover::{RecoverAction, RecoverOptions, run_recover};
pub use status::{StatusOptions, run_status};
pub use validate::{ValidateOptions, run_validate};

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::WorkspaceConfig;
use crate::context::ContextResolver;
use crate::events::EventStore;
use crate::git::Repository;
use crate::lock::MergeLock;
use crate::signals::SignalStore;
use crate::spawn::SpawnRegistry;
use crate::worktree::WorktreeManager;
use crate::wu::{WorkUnit, WuStatus, WuStore};

/// A discovered repository plus its configuration.
#[derive(Debug)]
pub struct Workspace {
    pub repo: Repository,
    pub config: WorkspaceConfig,
    /// The main checkout root. All shared state lives under it.
    pub root: PathBuf,
    /// Where the command was invoked.
    pub cwd: PathBuf,
}

impl Workspace {
    /// Discover the workspace from `cwd` and load its configuration.
    pub fn discover(cwd: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let cwd = cwd.into();
        let repo = Repository::at(&cwd).context("not inside a git repository")?;
        let root = repo.main_checkout()?.to_path_buf();
        let config = WorkspaceConfig::load(&root)?;
        let ws = Self {
            repo,
            config,
            root,
            cwd,
        };
        // Best-effort: a read-only checkout can still run status/validate
        if let Err(e) = ws.ensure_runtime_excludes() {
            log::debug!("could not update .git/info/exclude: {e}");
        }
        Ok(ws)
    }

    pub fn wu_store(&self) -> WuStore {
        WuStore::new(
            self.config.wu_dir_abs(&self.root),
            self.config.default_domain.clone(),
        )
    }

    /// WU store reading a specific checkout (e.g. a worktree's copy).
    pub fn wu_store_at(&self, checkout_root: &Path) -> WuStore {
        WuStore::new(
            checkout_root.join(&self.config.wu_dir),
            self.config.default_domain.clone(),
        )
    }

    pub fn events(&self) -> EventStore {
        EventStore::new(self.config.events_path(&self.root))
    }

    pub fn spawns(&self) -> anyhow::Result<SpawnRegistry> {
        SpawnRegistry::load(self.config.spawn_events_path(&self.root))
    }

    pub fn signal_store(&self) -> SignalStore {
        SignalStore::new(self.config.signals_path(&self.root))
    }

    pub fn merge_lock(&self) -> MergeLock {
        MergeLock::new(self.config.merge_lock_path(&self.root))
    }

    pub fn resolver(&self) -> ContextResolver<'_> {
        ContextResolver::new(&self.config)
    }

    pub fn manager(&self) -> WorktreeManager<'_> {
        WorktreeManager::new(&self.repo, &self.config, &self.root)
    }

    /// Regenerate backlog.md and status.md in the checkout rooted at
    /// `checkout_root`, and reproject the owning initiative of `wu` if one
    /// exists. Used on the main checkout by claim/release/block and inside
    /// the worktree by the merge pipeline.
    pub fn sync_metadata(&self, checkout_root: &Path, wu: Option<&WorkUnit>) -> anyhow::Result<()> {
        let store = self.wu_store_at(checkout_root);
        let wus = store.list()?;
        crate::backlog::sync(&checkout_root.join(&self.config.wu_dir).join("backlog.md"), &wus)?;
        crate::status_doc::sync(
            &checkout_root.join(self.config.status_doc_rel()),
            &wus,
            &self.events(),
        )?;

        if let Some(wu) = wu
            && let Some(slug) = &wu.initiative
        {
            let path =
                crate::initiative::path_for(&checkout_root.join(&self.config.initiatives_dir), slug);
            if path.is_file() {
                let mut initiative = crate::initiative::Initiative::load(&path)?;
                let members: Vec<&WorkUnit> = wus
                    .iter()
                    .filter(|candidate| candidate.initiative.as_deref() == Some(slug))
                    .collect();
                if initiative.reproject(&members) {
                    initiative.save(&path)?;
                }
            }
        }
        Ok(())
    }

    /// The metadata paths of `wu` in the checkout rooted at `checkout_root`:
    /// its YAML, backlog, status page, stamp, and owning initiative YAML.
    /// These are the files the merge pipeline snapshots and commits.
    pub fn metadata_paths(&self, checkout_root: &Path, wu: &WorkUnit) -> Vec<PathBuf> {
        let mut paths = vec![
            checkout_root
                .join(&self.config.wu_dir)
                .join(format!("{}.yaml", wu.id)),
            checkout_root.join(&self.config.wu_dir).join("backlog.md"),
            checkout_root.join(self.config.status_doc_rel()),
            checkout_root
                .join(&self.config.stamps_dir)
                .join(format!("{}.done", wu.id)),
        ];
        if let Some(slug) = &wu.initiative {
            paths.push(crate::initiative::path_for(
                &checkout_root.join(&self.config.initiatives_dir),
                slug,
            ));
        }
        paths
    }

    /// Is `file` (repo-relative) allowed to be dirty on main while `wu`
    /// merges?
    ///
    /// The allowlist is a closed set: paths under the WU's `code_paths`,
    /// the WU's own YAML, `backlog.md`, `status.md`, the WU's stamp file,
    /// the three shared JSONL logs, and the owning initiative's YAML.
    /// Everything else blocks the merge. Runtime plumbing (worktree dirs,
    /// gate logs, the merge lock) never reaches this check because
    /// [`ensure_runtime_excludes`](Self::ensure_runtime_excludes) keeps it
    /// out of `git status`.
    pub fn dirty_main_allowed(&self, wu: &WorkUnit, file: &str) -> bool {
        // The WU's own paths (exact file or directory prefix)
        for code_path in &wu.code_paths {
            if file == code_path
                || file.starts_with(&format!("{}/", code_path.trim_end_matches('/')))
            {
                return true;
            }
        }

        let rel = |p: &Path| p.to_string_lossy().replace('\\', "/");
        let mut allow = vec![
            rel(&self.config.wu_dir.join(format!("{}.yaml", wu.id))),
            rel(&self.config.wu_dir.join("backlog.md")),
            rel(&self.config.status_doc_rel()),
            rel(&self.config.stamps_dir.join(format!("{}.done", wu.id))),
            rel(&self.config.state_dir.join("wu-events.jsonl")),
            rel(&self.config.state_dir.join("spawn-events.jsonl")),
            rel(&self.config.state_dir.join("signals.jsonl")),
        ];
        if let Some(slug) = &wu.initiative {
            allow.push(rel(&self.config.initiatives_dir.join(format!("{slug}.yaml"))));
        }
        allow.iter().any(|a| a == file)
    }

    /// Register runtime paths in `.git/info/exclude` so they never show up
    /// in `git status`: the per-WU worktree directory, gate logs, and the
    /// state dir's transient files (event logs, merge lock, audit logs).
    /// Stamps stay visible - they are committed by the merge pipeline.
    /// Idempotent; entries are appended only when missing.
    pub fn ensure_runtime_excludes(&self) -> anyhow::Result<()> {
        let rel = |p: &Path| p.to_string_lossy().replace('\\', "/");
        let worktrees = rel(&self.config.worktrees_dir);
        let state = rel(&self.config.state_dir);
        let wanted = [
            format!("/{worktrees}/"),
            "/.logs/".to_string(),
            format!("/{state}/wu-events.jsonl"),
            format!("/{state}/spawn-events.jsonl"),
            format!("/{state}/signals.jsonl"),
            format!("/{state}/merge.lock"),
            format!("/{state}/logs/"),
        ];

        let exclude_path = self.repo.git_common_dir().join("info").join("exclude");
        let existing = std::fs::read_to_string(&exclude_path).unwrap_or_default();
        let missing: Vec<&String> = wanted
            .iter()
            .filter(|entry| !existing.lines().any(|line| line.trim() == entry.as_str()))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        if let Some(parent) = exclude_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut block = String::new();
        if !existing.is_empty() && !existing.ends_with('\n') {
            block.push('\n');
        }
        for entry in missing {
            block.push_str(entry);
            block.push('\n');
        }
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&exclude_path)?;
        file.write_all(block.as_bytes())?;
        Ok(())
    }

    /// Append a WU event to the shared log at the main checkout.
    pub fn append_event(&self, event: &crate::events::WuEvent) -> anyhow::Result<()> {
        self.events().append(event)
    }

    /// Persist a status change to the WU YAML on the given checkout.
    pub fn write_status(
        &self,
        checkout_root: &Path,
        wu: &mut WorkUnit,
        status: WuStatus,
    ) -> anyhow::Result<()> {
        wu.status = status;
        self.wu_store_at(checkout_root).save(wu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wu::{WuId, WuType};

    fn wu_with_paths(paths: &[&str]) -> WorkUnit {
        WorkUnit {
            id: WuId(1503),
            title: "t".into(),
            lane: "CLI".into(),
            wu_type: WuType::Feature,
            status: WuStatus::InProgress,
            created: "2024-01-01".into(),
            priority: None,
            assigned_to: None,
            code_paths: paths.iter().map(|s| (*s).to_string()).collect(),
            acceptance: Vec::new(),
            notes: Vec::new(),
            initiative: None,
            phase: None,
            claimed_branch: None,
            worktree_path: None,
        }
    }

    fn scratch_workspace() -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        let out = std::process::Command::new("git")
            .args(["init", "-b", "main"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        assert!(out.status.success());
        let ws = Workspace::discover(dir.path()).unwrap();
        (dir, ws)
    }

    #[test]
    fn dirty_main_guard_classifies_files() {
        let (_dir, ws) = scratch_workspace();
        let wu = wu_with_paths(&["packages/cli/src/wu-done.ts"]);

        assert!(ws.dirty_main_allowed(&wu, "packages/cli/src/wu-done.ts"));
        assert!(ws.dirty_main_allowed(&wu, "docs/04-operations/tasks/status.md"));
        assert!(ws.dirty_main_allowed(&wu, "docs/04-operations/tasks/wu/backlog.md"));
        assert!(ws.dirty_main_allowed(&wu, "docs/04-operations/tasks/wu/WU-1503.yaml"));
        assert!(ws.dirty_main_allowed(&wu, ".lumenflow/wu-events.jsonl"));
        assert!(ws.dirty_main_allowed(&wu, ".lumenflow/spawn-events.jsonl"));
        assert!(ws.dirty_main_allowed(&wu, ".lumenflow/signals.jsonl"));
        assert!(ws.dirty_main_allowed(&wu, ".lumenflow/stamps/WU-1503.done"));
        assert!(!ws.dirty_main_allowed(&wu, "packages/memory/src/memory-store.ts"));
        assert!(!ws.dirty_main_allowed(&wu, "docs/04-operations/tasks/wu/WU-9.yaml"));
    }

    #[test]
    fn allowlist_is_closed_over_runtime_paths() {
        let (_dir, ws) = scratch_workspace();
        let wu = wu_with_paths(&["packages/cli/src/wu-done.ts"]);

        // Plumbing paths are handled by .git/info/exclude, not the allowlist
        assert!(!ws.dirty_main_allowed(&wu, ".lumenflow/logs/commands-20240101.jsonl"));
        assert!(!ws.dirty_main_allowed(&wu, ".lumenflow/merge.lock"));
        assert!(!ws.dirty_main_allowed(&wu, ".logs/gates-20240101-000000-cli-wu-1503.log"));
        assert!(!ws.dirty_main_allowed(&wu, "worktrees/cli-wu-1503/README.md"));
        // A stamp that isn't this WU's is a stray edit
        assert!(!ws.dirty_main_allowed(&wu, ".lumenflow/stamps/WU-9.done"));
    }

    #[test]
    fn initiative_yaml_allowed_only_for_owner() {
        let (_dir, ws) = scratch_workspace();
        let mut wu = wu_with_paths(&[]);
        assert!(!ws.dirty_main_allowed(&wu, "docs/04-operations/tasks/initiatives/api-revamp.yaml"));

        wu.initiative = Some("api-revamp".into());
        assert!(ws.dirty_main_allowed(&wu, "docs/04-operations/tasks/initiatives/api-revamp.yaml"));
        assert!(!ws.dirty_main_allowed(&wu, "docs/04-operations/tasks/initiatives/other.yaml"));
    }

    #[test]
    fn directory_code_paths_match_by_prefix() {
        let (_dir, ws) = scratch_workspace();
        let wu = wu_with_paths(&["src/gates/"]);
        assert!(ws.dirty_main_allowed(&wu, "src/gates/mod.rs"));
        assert!(!ws.dirty_main_allowed(&wu, "src/gateskeeper.rs"));
    }

    #[test]
    fn runtime_excludes_written_once() {
        let (dir, ws) = scratch_workspace();
        let exclude = dir.path().join(".git/info/exclude");
        let first = std::fs::read_to_string(&exclude).unwrap();
        assert!(first.lines().any(|l| l == "/worktrees/"));
        assert!(first.lines().any(|l| l == "/.lumenflow/merge.lock"));
        assert!(first.lines().any(|l| l == "/.lumenflow/logs/"));
        // Stamps stay visible to git; they get committed
        assert!(!first.contains("stamps"));

        // A second pass appends nothing
        ws.ensure_runtime_excludes().unwrap();
        assert_eq!(std::fs::read_to_string(&exclude).unwrap(), first);
    }
}
