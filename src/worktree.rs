//! Per-WU worktree provisioning and retirement.
//!
//! Path policy: `<main_checkout>/<worktrees_dir>/<lane-kebab>-<wu-id-lower>`.
//! Branch policy: `lane/<lane-kebab>/<wu-id-lower>`.
//!
//! Nothing here touches the main checkout's working tree: the main checkout
//! is only read (`worktree list`, `origin/<main>`), and all mutating git
//! commands run against a specific worktree path.

use std::path::{Path, PathBuf};

use crate::config::WorkspaceConfig;
use crate::errors::LumenError;
use crate::git::{Repository, WorkingTree};
use crate::wu::WorkUnit;

pub use crate::git::RebaseOutcome;

/// Collaborator port: regenerate derived docs after a successful rebase.
///
/// The real implementation lives outside the core; tests substitute fakes.
pub trait DocsRegenHook {
    fn regenerate(&self, worktree_path: &Path) -> anyhow::Result<()>;
}

#[derive(Debug)]
pub struct WorktreeManager<'a> {
    repo: &'a Repository,
    config: &'a WorkspaceConfig,
    root: PathBuf,
}

impl<'a> WorktreeManager<'a> {
    pub fn new(repo: &'a Repository, config: &'a WorkspaceConfig, root: impl Into<PathBuf>) -> Self {
        Self {
            repo,
            config,
            root: root.into(),
        }
    }

    /// The worktree path policy for this WU.
    pub fn path_for(&self, wu: &WorkUnit) -> PathBuf {
        self.config
            .worktrees_dir_abs(&self.root)
            .join(wu.worktree_dir_name())
    }

    /// The base ref branches start from and rebase onto.
    pub fn base_ref(&self) -> String {
        if self.config.require_remote {
            format!("{}/{}", self.config.default_remote, self.config.main_branch)
        } else {
            self.config.main_branch.clone()
        }
    }

    /// Provision the worktree and lane branch for `wu`.
    ///
    /// Fails with `WORKTREE_EXISTS` when the directory is already there -
    /// worktrees are owned by exactly one WU and are never reused.
    /// `skip_fetch` starts from whatever the base ref already points at.
    pub fn create(
        &self,
        wu: &WorkUnit,
        branch_override: Option<&str>,
        skip_fetch: bool,
    ) -> anyhow::Result<PathBuf> {
        let path = self.path_for(wu);
        if path.exists() {
            return Err(LumenError::WorktreeExists { path }.into());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if self.config.require_remote && !skip_fetch {
            self.repo
                .fetch(&self.config.default_remote, &self.config.main_branch)?;
        }

        let branch = branch_override
            .map(str::to_string)
            .unwrap_or_else(|| wu.branch_name());
        let start_point = self.base_ref();
        self.repo.add_worktree(&path, &branch, &start_point)?;
        Ok(path)
    }

    /// Retire the worktree and its lane branch. Idempotent: a missing
    /// worktree is success, a missing branch is success.
    pub fn delete(&self, wu: &WorkUnit, force: bool) -> anyhow::Result<()> {
        let path = self.path_for(wu);
        let branch = wu
            .claimed_branch
            .clone()
            .unwrap_or_else(|| wu.branch_name());

        if path.exists() {
            if !force {
                let wt = self.repo.worktree_at(&path);
                if wt.is_dirty()? {
                    return Err(LumenError::DirtyWorkingTree {
                        location: format!("worktree {}", path.display()),
                        unrelated_files: Vec::new(),
                    }
                    .into());
                }
            }
            self.repo.remove_worktree(&path, force)?;
        } else {
            // The registration may be dangling even when the directory is gone
            self.repo.prune_worktrees()?;
        }

        if self.repo.branch_exists(&branch)? {
            self.repo.delete_branch(&branch, force)?;
        }
        Ok(())
    }

    /// Switch the worktree to `branch` if it isn't already on it.
    pub fn ensure_on_branch(&self, worktree_path: &Path, branch: &str) -> anyhow::Result<()> {
        let wt = self.repo.worktree_at(worktree_path);
        if wt.branch()?.as_deref() != Some(branch) {
            wt.checkout(branch)?;
        }
        Ok(())
    }

    /// Fetch and rebase the worktree onto the base ref. On success, the docs
    /// hook (when provided) regenerates derived files in the worktree.
    pub fn auto_rebase(
        &self,
        worktree_path: &Path,
        docs_hook: Option<&dyn DocsRegenHook>,
    ) -> anyhow::Result<RebaseOutcome> {
        if self.config.require_remote {
            self.repo
                .fetch(&self.config.default_remote, &self.config.main_branch)?;
        }
        let wt = self.repo.worktree_at(worktree_path);
        let outcome = wt.rebase_onto(&self.base_ref())?;
        if matches!(outcome, RebaseOutcome::Clean)
            && let Some(hook) = docs_hook
        {
            hook.regenerate(worktree_path)?;
        }
        Ok(outcome)
    }

    /// A view over the worktree for `wu`, checking it exists.
    pub fn working_tree(&self, wu: &WorkUnit) -> anyhow::Result<WorkingTree<'_>> {
        let path = self.path_for(wu);
        if !path.is_dir() {
            return Err(LumenError::WorktreeMissing {
                id: wu.id.to_string(),
                path,
            }
            .into());
        }
        Ok(self.repo.worktree_at(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wu::{WuId, WuStatus, WuType};
    use std::process::Command;

    fn test_wu(id: u32) -> WorkUnit {
        WorkUnit {
            id: WuId(id),
            title: "Test".into(),
            lane: "Framework: Core".into(),
            wu_type: WuType::Feature,
            status: WuStatus::Ready,
            created: "2024-01-01".into(),
            priority: None,
            assigned_to: None,
            code_paths: Vec::new(),
            acceptance: Vec::new(),
            notes: Vec::new(),
            initiative: None,
            phase: None,
            claimed_branch: None,
            worktree_path: None,
        }
    }

    fn offline_config() -> WorkspaceConfig {
        WorkspaceConfig {
            require_remote: false,
            ..WorkspaceConfig::default()
        }
    }

    fn init_repo() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let run = |args: &[&str]| {
            let out = Command::new("git")
                .args(args)
                .current_dir(dir.path())
                .output()
                .unwrap();
            assert!(out.status.success(), "git {args:?} failed");
        };
        run(&["init", "-b", "main"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "Test"]);
        std::fs::write(dir.path().join("README.md"), "hello\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "-m", "init"]);
        let repo = Repository::at(dir.path()).unwrap();
        (dir, repo)
    }

    #[test]
    fn create_refuses_existing_directory() {
        let (dir, repo) = init_repo();
        let config = offline_config();
        let manager = WorktreeManager::new(&repo, &config, dir.path());
        let wu = test_wu(12);

        let path = manager.create(&wu, None, false).unwrap();
        assert!(path.ends_with("worktrees/framework-core-wu-12"));
        assert!(path.join("README.md").exists());

        let err = manager.create(&wu, None, false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LumenError>(),
            Some(LumenError::WorktreeExists { .. })
        ));
    }

    #[test]
    fn delete_is_idempotent_and_checks_cleanliness() {
        let (dir, repo) = init_repo();
        let config = offline_config();
        let manager = WorktreeManager::new(&repo, &config, dir.path());
        let wu = test_wu(13);

        let path = manager.create(&wu, None, false).unwrap();
        std::fs::write(path.join("scratch.txt"), "wip").unwrap();
        assert!(manager.delete(&wu, false).is_err());

        manager.delete(&wu, true).unwrap();
        assert!(!path.exists());
        assert!(!repo.branch_exists(&wu.branch_name()).unwrap());

        // Deleting again is success
        manager.delete(&wu, false).unwrap();
    }

    #[test]
    fn auto_rebase_picks_up_main_commits() {
        let (dir, repo) = init_repo();
        let config = offline_config();
        let manager = WorktreeManager::new(&repo, &config, dir.path());
        let wu = test_wu(14);
        let path = manager.create(&wu, None, false).unwrap();

        // Advance main after the branch forked
        std::fs::write(dir.path().join("main-only.txt"), "x").unwrap();
        let main_wt = repo.worktree_at(dir.path());
        main_wt.add(&["main-only.txt"]).unwrap();
        main_wt.commit("advance main").unwrap();

        let outcome = manager.auto_rebase(&path, None).unwrap();
        assert_eq!(outcome, RebaseOutcome::Clean);
        assert!(path.join("main-only.txt").exists());
    }

    #[test]
    fn docs_hook_runs_only_on_clean_rebase() {
        struct Recorder(std::cell::Cell<u32>);
        impl DocsRegenHook for Recorder {
            fn regenerate(&self, _path: &Path) -> anyhow::Result<()> {
                self.0.set(self.0.get() + 1);
                Ok(())
            }
        }

        let (dir, repo) = init_repo();
        let config = offline_config();
        let manager = WorktreeManager::new(&repo, &config, dir.path());
        let wu = test_wu(15);
        let path = manager.create(&wu, None, false).unwrap();

        let hook = Recorder(std::cell::Cell::new(0));
        manager.auto_rebase(&path, Some(&hook)).unwrap();
        assert_eq!(hook.0.get(), 1);
    }
}
