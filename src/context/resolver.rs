//! Context resolution: location, git state, WU state.
//!
//! Resolution never raises. Git failures degrade to `Unknown` location or a
//! `GitState` with `has_error`; the validator then produces proper errors
//! instead of the resolver panicking half-way through a broken checkout.
//! Results are cheap to recompute per command, so nothing is cached.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::WorkspaceConfig;
use crate::events::{EventStore, detect_inconsistency};
use crate::shell_exec;
use crate::wu::{WuId, WuStore};

use super::{GitState, LocationType, WorktreeContext, WuContext, WuStateResult};

#[derive(Debug)]
pub struct ContextResolver<'a> {
    config: &'a WorkspaceConfig,
}

impl<'a> ContextResolver<'a> {
    pub fn new(config: &'a WorkspaceConfig) -> Self {
        Self { config }
    }

    /// Decide where `cwd` sits: main checkout, linked worktree, detached, or
    /// not a repository at all.
    pub fn resolve_location(&self, cwd: &Path) -> WorktreeContext {
        let unknown = WorktreeContext {
            location: LocationType::Unknown,
            cwd: cwd.to_path_buf(),
            git_root: None,
            main_checkout: None,
            worktree_name: None,
            worktree_wu_id: None,
        };

        let Some(toplevel) = git_line(cwd, &["rev-parse", "--show-toplevel"]) else {
            return unknown;
        };
        let git_root = PathBuf::from(toplevel);

        // A `.git` *file* (not directory) marks a linked worktree
        let dot_git = git_root.join(".git");
        let is_worktree = dot_git.is_file();

        let main_checkout = if is_worktree {
            // First entry of `worktree list --porcelain` is the main checkout
            git_output(cwd, &["worktree", "list", "--porcelain"])
                .map(|out| crate::git::parse_worktree_list(&out))
                .and_then(|list| list.first().map(|wt| wt.path.clone()))
        } else {
            Some(git_root.clone())
        };

        let detached = git_line(cwd, &["symbolic-ref", "-q", "HEAD"]).is_none();

        let (worktree_name, worktree_wu_id) = if is_worktree {
            let name = git_root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned());
            let wu_id = name.as_deref().and_then(WuId::extract);
            (name, wu_id)
        } else {
            (None, None)
        };

        let location = if detached {
            LocationType::Detached
        } else if is_worktree {
            LocationType::Worktree
        } else {
            LocationType::Main
        };

        WorktreeContext {
            location,
            cwd: cwd.to_path_buf(),
            git_root: Some(git_root),
            main_checkout,
            worktree_name,
            worktree_wu_id,
        }
    }

    /// Parse one `git status --porcelain -b` call into a [`GitState`].
    pub fn read_git_state(&self, cwd: &Path) -> GitState {
        let output = match run_git(cwd, &["status", "--porcelain", "-b"]) {
            Some(output) => output,
            None => {
                return GitState {
                    has_error: true,
                    error_message: Some("failed to run git status".into()),
                    ..GitState::default()
                };
            }
        };
        if !output.status.success() {
            return GitState {
                has_error: true,
                error_message: Some(
                    String::from_utf8_lossy(&output.stderr).trim().to_string(),
                ),
                ..GitState::default()
            };
        }
        parse_status_porcelain(&String::from_utf8_lossy(&output.stdout))
    }

    /// Load YAML and replay the event store for `id`; `None` when the WU has
    /// no YAML file (or it cannot be read - logged, not raised).
    pub fn read_wu_state(&self, id: &WuId, repo_root: &Path) -> Option<WuStateResult> {
        let store = WuStore::new(
            self.config.wu_dir_abs(repo_root),
            self.config.default_domain.clone(),
        );
        let yaml = match store.load(id) {
            Ok(Some(wu)) => wu,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("could not load {id}: {e}");
                return None;
            }
        };
        let events = EventStore::new(self.config.events_path(repo_root));
        let projected = events.project_one(id);
        let inconsistency_reason = detect_inconsistency(yaml.status, &projected);
        Some(WuStateResult {
            is_consistent: inconsistency_reason.is_none(),
            inconsistency_reason,
            yaml,
            projected,
        })
    }

    /// The full context for one command invocation.
    pub fn resolve(
        &self,
        cwd: &Path,
        wu_id: Option<&WuId>,
        requested_lane: Option<&str>,
    ) -> WuContext {
        let location = self.resolve_location(cwd);
        let git = self.read_git_state(cwd);
        let session = std::env::var("LUMENFLOW_SESSION").ok().filter(|s| !s.is_empty());

        let repo_root = location.main_checkout.clone();
        let wu = match (&wu_id, &repo_root) {
            (Some(id), Some(root)) => self.read_wu_state(id, root),
            _ => None,
        };

        // Worktree facts for the target WU
        let (worktree_exists, worktree_git, commits_ahead) = match (&wu, &repo_root) {
            (Some(state), Some(root)) => {
                let path = root
                    .join(&self.config.worktrees_dir)
                    .join(state.yaml.worktree_dir_name());
                if path.is_dir() {
                    let wt_git = self.read_git_state(&path);
                    let base = if self.config.require_remote {
                        format!("{}/{}", self.config.default_remote, self.config.main_branch)
                    } else {
                        self.config.main_branch.clone()
                    };
                    let ahead = git_line(&path, &["rev-list", "--count", &format!("{base}..HEAD")])
                        .and_then(|s| s.trim().parse().ok());
                    (true, Some(wt_git), ahead)
                } else {
                    (false, None, None)
                }
            }
            _ => (false, None, None),
        };

        let lane_occupant = match (&requested_lane, &repo_root) {
            (Some(lane), Some(root)) => {
                EventStore::new(self.config.events_path(root)).lane_occupant(lane)
            }
            _ => None,
        };

        WuContext {
            location,
            git,
            wu,
            session,
            worktree_git,
            worktree_exists,
            commits_ahead,
            requested_lane: requested_lane.map(str::to_string),
            lane_occupant,
        }
    }
}

fn run_git(dir: &Path, args: &[&str]) -> Option<std::process::Output> {
    let mut cmd = Command::new("git");
    cmd.args(args).current_dir(dir);
    shell_exec::run_logged("resolve", &mut cmd).ok()
}

fn git_output(dir: &Path, args: &[&str]) -> Option<String> {
    let output = run_git(dir, args)?;
    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        None
    }
}

fn git_line(dir: &Path, args: &[&str]) -> Option<String> {
    git_output(dir, args).map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Parse `git status --porcelain -b` output.
fn parse_status_porcelain(text: &str) -> GitState {
    let mut state = GitState::default();

    for line in text.lines() {
        if let Some(header) = line.strip_prefix("## ") {
            parse_branch_header(header, &mut state);
            continue;
        }
        if line.len() < 3 {
            continue;
        }
        let (xy, path) = line.split_at(2);
        let path = path.trim_start();
        let x = xy.chars().next().unwrap_or(' ');
        state.is_dirty = true;
        if x != ' ' && x != '?' {
            state.has_staged = true;
        }
        // Renames list "old -> new"; keep the new path
        let path = path.rsplit(" -> ").next().unwrap_or(path);
        state.modified_files.push(path.to_string());
    }
    state
}

fn parse_branch_header(header: &str, state: &mut GitState) {
    // Forms: "main", "main...origin/main", "main...origin/main [ahead 1, behind 2]",
    // "HEAD (no branch)", "No commits yet on main"
    if header.starts_with("HEAD (no branch)") {
        state.is_detached = true;
        return;
    }
    let header = header.strip_prefix("No commits yet on ").unwrap_or(header);

    let (branch_part, rest) = match header.split_once("...") {
        Some((b, rest)) => (b, Some(rest)),
        None => (header.split(' ').next().unwrap_or(header), None),
    };
    state.branch = Some(branch_part.to_string());

    let Some(rest) = rest else { return };
    let (tracking, brackets) = match rest.split_once(" [") {
        Some((t, b)) => (t, Some(b.trim_end_matches(']'))),
        None => (rest, None),
    };
    state.tracking = Some(tracking.to_string());

    let Some(brackets) = brackets else { return };
    for part in brackets.split(", ") {
        if let Some(n) = part.strip_prefix("ahead ") {
            state.ahead = n.parse().unwrap_or(0);
        } else if let Some(n) = part.strip_prefix("behind ") {
            state.behind = n.parse().unwrap_or(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_branch_with_tracking_and_counts() {
        let state =
            parse_status_porcelain("## main...origin/main [ahead 2, behind 1]\n M src/lib.rs\n?? new.txt\n");
        assert_eq!(state.branch.as_deref(), Some("main"));
        assert_eq!(state.tracking.as_deref(), Some("origin/main"));
        assert_eq!(state.ahead, 2);
        assert_eq!(state.behind, 1);
        assert!(state.is_dirty);
        assert!(!state.has_staged);
        assert_eq!(state.modified_files, vec!["src/lib.rs", "new.txt"]);
    }

    #[test]
    fn parses_plain_branch_without_tracking() {
        let state = parse_status_porcelain("## feature-x\n");
        assert_eq!(state.branch.as_deref(), Some("feature-x"));
        assert_eq!(state.tracking, None);
        assert!(!state.is_dirty);
    }

    #[test]
    fn detects_staged_changes() {
        let state = parse_status_porcelain("## main\nM  staged.rs\n");
        assert!(state.has_staged);
        assert!(state.is_dirty);
    }

    #[test]
    fn detects_detached_head() {
        let state = parse_status_porcelain("## HEAD (no branch)\n");
        assert!(state.is_detached);
        assert_eq!(state.branch, None);
    }

    #[test]
    fn rename_keeps_new_path() {
        let state = parse_status_porcelain("## main\nR  old.rs -> new.rs\n");
        assert_eq!(state.modified_files, vec!["new.rs"]);
    }

    mod with_repo {
        use super::*;
        use crate::config::WorkspaceConfig;
        use std::process::Command;

        fn init_repo(dir: &Path) {
            let run = |args: &[&str]| {
                let out = Command::new("git").args(args).current_dir(dir).output().unwrap();
                assert!(out.status.success(), "git {args:?} failed");
            };
            run(&["init", "-b", "main"]);
            run(&["config", "user.email", "t@example.com"]);
            run(&["config", "user.name", "T"]);
            std::fs::write(dir.join("README.md"), "x\n").unwrap();
            run(&["add", "."]);
            run(&["commit", "-m", "init"]);
        }

        #[test]
        fn main_checkout_resolves_as_main() {
            let dir = tempfile::tempdir().unwrap();
            init_repo(dir.path());
            let config = WorkspaceConfig::default();
            let resolver = ContextResolver::new(&config);
            let ctx = resolver.resolve_location(dir.path());
            assert_eq!(ctx.location, LocationType::Main);
            assert!(ctx.worktree_name.is_none());
            assert_eq!(
                dunce::canonicalize(ctx.main_checkout.unwrap()).unwrap(),
                dunce::canonicalize(dir.path()).unwrap()
            );
        }

        #[test]
        fn linked_worktree_resolves_with_wu_id() {
            let dir = tempfile::tempdir().unwrap();
            init_repo(dir.path());
            let wt_path = dir.path().join("worktrees").join("framework-core-wu-12");
            let out = Command::new("git")
                .args([
                    "worktree",
                    "add",
                    "-b",
                    "lane/framework-core/wu-12",
                    wt_path.to_str().unwrap(),
                    "main",
                ])
                .current_dir(dir.path())
                .output()
                .unwrap();
            assert!(out.status.success());

            let config = WorkspaceConfig::default();
            let resolver = ContextResolver::new(&config);
            let ctx = resolver.resolve_location(&wt_path);
            assert_eq!(ctx.location, LocationType::Worktree);
            assert_eq!(ctx.worktree_name.as_deref(), Some("framework-core-wu-12"));
            assert_eq!(ctx.worktree_wu_id, Some(WuId(12)));
            assert_eq!(
                dunce::canonicalize(ctx.main_checkout.unwrap()).unwrap(),
                dunce::canonicalize(dir.path()).unwrap()
            );
        }

        #[test]
        fn detached_head_resolves_as_detached() {
            let dir = tempfile::tempdir().unwrap();
            init_repo(dir.path());
            let out = Command::new("git")
                .args(["checkout", "--detach", "HEAD"])
                .current_dir(dir.path())
                .output()
                .unwrap();
            assert!(out.status.success());

            let config = WorkspaceConfig::default();
            let resolver = ContextResolver::new(&config);
            let ctx = resolver.resolve_location(dir.path());
            assert_eq!(ctx.location, LocationType::Detached);
        }

        #[test]
        fn non_repo_resolves_as_unknown() {
            let dir = tempfile::tempdir().unwrap();
            let config = WorkspaceConfig::default();
            let resolver = ContextResolver::new(&config);
            let ctx = resolver.resolve_location(dir.path());
            assert_eq!(ctx.location, LocationType::Unknown);
            assert!(ctx.git_root.is_none());
        }

        #[test]
        fn resolution_is_deterministic() {
            let dir = tempfile::tempdir().unwrap();
            init_repo(dir.path());
            let config = WorkspaceConfig::default();
            let resolver = ContextResolver::new(&config);
            let a = resolver.resolve_location(dir.path());
            let b = resolver.resolve_location(dir.path());
            assert_eq!(a.location, b.location);
            assert_eq!(a.git_root, b.git_root);
            assert_eq!(a.main_checkout, b.main_checkout);
        }
    }
}
