//! The [`Repository`] and [`WorkingTree`] adapter types.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, bail};
use once_cell::sync::OnceCell;

use crate::errors::LumenError;
use crate::shell_exec;

use super::{WorktreeInfo, parse_worktree_list};

/// Outcome of a rebase attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebaseOutcome {
    /// Branch now sits on top of the target.
    Clean,
    /// Conflict; the rebase was aborted and the tree left untouched.
    Conflict { summary: String },
}

/// A git repository, bound to the path it was discovered from.
///
/// Repo-wide operations (fetch, worktree listing, merges on the main
/// checkout) live here; per-checkout operations live on [`WorkingTree`].
#[derive(Debug)]
pub struct Repository {
    discovery_path: PathBuf,
    git_common_dir: PathBuf,
    main_checkout: OnceCell<PathBuf>,
}

impl Repository {
    /// Discover the repository containing `path`.
    pub fn at(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let discovery_path = path.into();
        let output = run_git(&discovery_path, &["rev-parse", "--git-common-dir"])?;
        if !output.status.success() {
            bail!(LumenError::Git {
                context: "rev-parse --git-common-dir".into(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let raw = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        let absolute = if raw.is_relative() {
            discovery_path.join(&raw)
        } else {
            raw
        };
        let git_common_dir = dunce::canonicalize(&absolute)
            .with_context(|| format!("Failed to resolve git dir {}", absolute.display()))?;
        Ok(Self {
            discovery_path,
            git_common_dir,
            main_checkout: OnceCell::new(),
        })
    }

    pub fn discovery_path(&self) -> &Path {
        &self.discovery_path
    }

    /// The shared `.git` directory (main checkout's, even from a worktree).
    pub fn git_common_dir(&self) -> &Path {
        &self.git_common_dir
    }

    /// The main checkout's root: the first entry of `worktree list`.
    ///
    /// Cached for the lifetime of the value; worktree additions never change
    /// which checkout is primary.
    pub fn main_checkout(&self) -> anyhow::Result<&Path> {
        let path = self.main_checkout.get_or_try_init(|| {
            let listed = self.list_worktrees()?;
            match listed.first() {
                Some(first) => Ok(first.path.clone()),
                None => self
                    .git_common_dir
                    .parent()
                    .map(Path::to_path_buf)
                    .context("Git directory has no parent"),
            }
        })?;
        Ok(path.as_path())
    }

    /// A view over the checkout at `path`.
    pub fn worktree_at(&self, path: impl Into<PathBuf>) -> WorkingTree<'_> {
        WorkingTree {
            repo: self,
            path: path.into(),
        }
    }

    /// A view over the main checkout.
    pub fn main_worktree(&self) -> anyhow::Result<WorkingTree<'_>> {
        Ok(self.worktree_at(self.main_checkout()?.to_path_buf()))
    }

    pub fn list_worktrees(&self) -> anyhow::Result<Vec<WorktreeInfo>> {
        let out = self.run(&["worktree", "list", "--porcelain"])?;
        Ok(parse_worktree_list(&out))
    }

    pub fn worktree_for_branch(&self, branch: &str) -> anyhow::Result<Option<PathBuf>> {
        Ok(self
            .list_worktrees()?
            .into_iter()
            .find(|wt| wt.branch.as_deref() == Some(branch))
            .map(|wt| wt.path))
    }

    pub fn branch_exists(&self, branch: &str) -> anyhow::Result<bool> {
        self.run_check(&[
            "show-ref",
            "--verify",
            "--quiet",
            &format!("refs/heads/{branch}"),
        ])
    }

    /// Fetch `branch` from `remote`. Returns a typed error so callers can
    /// decide whether an unavailable remote is fatal.
    pub fn fetch(&self, remote: &str, branch: &str) -> anyhow::Result<()> {
        let output = self.run_output(&["fetch", remote, branch])?;
        if !output.status.success() {
            bail!(LumenError::RemoteUnavailable {
                remote: remote.to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    pub fn push(&self, remote: &str, branch: &str) -> anyhow::Result<()> {
        let output = self.run_output(&["push", remote, branch])?;
        if !output.status.success() {
            bail!(LumenError::RemoteUnavailable {
                remote: remote.to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    pub fn push_set_upstream(&self, remote: &str, branch: &str) -> anyhow::Result<()> {
        let output = self.run_output(&["push", "-u", remote, branch])?;
        if !output.status.success() {
            bail!(LumenError::RemoteUnavailable {
                remote: remote.to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    /// `git worktree add -b <branch> <path> <start_point>`.
    pub fn add_worktree(
        &self,
        path: &Path,
        branch: &str,
        start_point: &str,
    ) -> anyhow::Result<()> {
        self.run(&[
            "worktree",
            "add",
            "-b",
            branch,
            &path.to_string_lossy(),
            start_point,
        ])
        .map(|_| ())
    }

    /// `git worktree add <path> <branch>` for an existing branch.
    pub fn add_worktree_for_branch(&self, path: &Path, branch: &str) -> anyhow::Result<()> {
        self.run(&["worktree", "add", &path.to_string_lossy(), branch])
            .map(|_| ())
    }

    pub fn remove_worktree(&self, path: &Path, force: bool) -> anyhow::Result<()> {
        let path_str = path.to_string_lossy();
        let args: Vec<&str> = if force {
            vec!["worktree", "remove", "--force", &path_str]
        } else {
            vec!["worktree", "remove", &path_str]
        };
        self.run(&args).map(|_| ())
    }

    pub fn prune_worktrees(&self) -> anyhow::Result<()> {
        self.run(&["worktree", "prune"]).map(|_| ())
    }

    pub fn delete_branch(&self, branch: &str, force: bool) -> anyhow::Result<()> {
        let flag = if force { "-D" } else { "-d" };
        self.run(&["branch", flag, branch]).map(|_| ())
    }

    // ========================================================================
    // Command plumbing (explicit cwd = discovery path)
    // ========================================================================

    /// Run a git command and return stdout; non-zero exit is an error.
    pub fn run(&self, args: &[&str]) -> anyhow::Result<String> {
        run_git_expect(&self.discovery_path, args)
    }

    /// Run a git command for its raw output (exit code has meaning).
    pub fn run_output(&self, args: &[&str]) -> anyhow::Result<std::process::Output> {
        run_git(&self.discovery_path, args)
    }

    /// Run a git command and return whether it exited 0.
    pub fn run_check(&self, args: &[&str]) -> anyhow::Result<bool> {
        Ok(self.run_output(args)?.status.success())
    }
}

/// A view over one checkout (the main one or a linked worktree).
#[derive(Debug)]
pub struct WorkingTree<'a> {
    repo: &'a Repository,
    path: PathBuf,
}

impl WorkingTree<'_> {
    pub fn repo(&self) -> &Repository {
        self.repo
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run(&self, args: &[&str]) -> anyhow::Result<String> {
        run_git_expect(&self.path, args)
    }

    pub fn run_output(&self, args: &[&str]) -> anyhow::Result<std::process::Output> {
        run_git(&self.path, args)
    }

    pub fn run_check(&self, args: &[&str]) -> anyhow::Result<bool> {
        Ok(self.run_output(args)?.status.success())
    }

    /// Current branch short name; `None` when HEAD is detached.
    pub fn branch(&self) -> anyhow::Result<Option<String>> {
        let output = self.run_output(&["symbolic-ref", "--short", "-q", "HEAD"])?;
        if output.status.success() {
            Ok(Some(
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            ))
        } else {
            Ok(None)
        }
    }

    /// One `git status --porcelain -b` call; callers parse what they need.
    pub fn status_porcelain(&self) -> anyhow::Result<String> {
        self.run(&["status", "--porcelain", "-b"])
    }

    pub fn is_dirty(&self) -> anyhow::Result<bool> {
        let status = self.run(&["status", "--porcelain"])?;
        Ok(!status.trim().is_empty())
    }

    pub fn head_sha(&self) -> anyhow::Result<String> {
        Ok(self.run(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    pub fn checkout(&self, branch: &str) -> anyhow::Result<()> {
        self.run(&["checkout", branch]).map(|_| ())
    }

    pub fn add(&self, paths: &[&str]) -> anyhow::Result<()> {
        let mut args = vec!["add", "--"];
        args.extend_from_slice(paths);
        self.run(&args).map(|_| ())
    }

    pub fn commit(&self, message: &str) -> anyhow::Result<()> {
        self.run(&["commit", "-m", message]).map(|_| ())
    }

    pub fn reset_hard(&self, rev: &str) -> anyhow::Result<()> {
        self.run(&["reset", "--hard", rev]).map(|_| ())
    }

    /// Files changed between `base_ref` and HEAD (three-dot diff).
    pub fn changed_files(&self, base_ref: &str) -> anyhow::Result<Vec<String>> {
        let out = self.run(&["diff", "--name-only", &format!("{base_ref}...HEAD")])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    /// Count of commits on HEAD not reachable from `base_ref`.
    pub fn commits_ahead(&self, base_ref: &str) -> anyhow::Result<usize> {
        let out = self.run(&["rev-list", "--count", &format!("{base_ref}..HEAD")])?;
        out.trim()
            .parse()
            .with_context(|| format!("unexpected rev-list output: {out:?}"))
    }

    /// `git merge --ff-only <branch>` in this checkout.
    pub fn merge_ff_only(&self, branch: &str) -> anyhow::Result<()> {
        let output = self.run_output(&["merge", "--ff-only", branch])?;
        if !output.status.success() {
            bail!(LumenError::Git {
                context: format!("merge --ff-only {branch}"),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    /// Rebase this checkout onto `target`; conflicts abort and report.
    pub fn rebase_onto(&self, target: &str) -> anyhow::Result<RebaseOutcome> {
        let output = self.run_output(&["rebase", target])?;
        if output.status.success() {
            return Ok(RebaseOutcome::Clean);
        }
        // Conflict (or other failure): capture the summary, then restore the
        // tree. An abort failure here means there was no rebase in progress,
        // which is fine.
        let summary = {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            [stdout.trim(), stderr.trim()]
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        };
        let _ = self.run_output(&["rebase", "--abort"]);
        Ok(RebaseOutcome::Conflict { summary })
    }
}

fn run_git(dir: &Path, args: &[&str]) -> anyhow::Result<std::process::Output> {
    let checkout = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".to_string());
    let mut cmd = Command::new("git");
    cmd.args(args).current_dir(dir);
    shell_exec::run_logged(&format!("git:{checkout}"), &mut cmd)
        .with_context(|| format!("Failed to execute: git {}", args.join(" ")))
}

fn run_git_expect(dir: &Path, args: &[&str]) -> anyhow::Result<String> {
    let output = run_git(dir, args)?;
    if !output.status.success() {
        // Some git commands print errors to stdout (e.g. `commit` with
        // nothing to commit)
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let detail = [stderr.trim(), stdout.trim()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        bail!(LumenError::Git {
            context: args.join(" "),
            detail,
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
