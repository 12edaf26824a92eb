//! Workspace and user configuration.
//!
//! Configuration is layered the same way the CLI's own files are: an
//! optional user file at `~/.config/lumenflow/config.toml` provides machine
//! defaults, and the workspace file `.lumenflow.toml` at the repository root
//! overrides it. Both are deserialized into [`RawConfig`]; defaults are
//! applied once when resolving into [`WorkspaceConfig`].
//!
//! Only the workspace file should set repository layout keys (`wu_dir`,
//! `state_dir`, ...); the user file is the place for gate command defaults
//! shared across checkouts.

mod raw;

use std::path::{Path, PathBuf};

use anyhow::Context;
use indexmap::IndexMap;

pub use raw::{GatesRaw, GitRaw, RawConfig};

/// Default ordered gate chain. `risk` is the classification step; it runs
/// first so later gates can consult the tier.
pub const DEFAULT_GATE_ORDER: &[&str] = &["format", "lint", "typecheck", "test", "coverage"];

/// File name of the workspace configuration, relative to the repo root.
pub const WORKSPACE_FILE: &str = ".lumenflow.toml";

/// Resolved configuration with all defaults applied.
#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    /// Directory of per-WU YAML files, relative to the repo root.
    pub wu_dir: PathBuf,
    /// Directory of initiative YAML files.
    pub initiatives_dir: PathBuf,
    /// Directory worktrees are created under.
    pub worktrees_dir: PathBuf,
    /// Directory for event logs, the merge lock, and signals.
    pub state_dir: PathBuf,
    /// Directory for completion stamp files.
    pub stamps_dir: PathBuf,
    /// The trunk branch merges land on.
    pub main_branch: String,
    /// Remote used for fetch/push.
    pub default_remote: String,
    /// Domain appended to bare usernames in `assigned_to`.
    pub default_domain: String,
    /// Whether fetch/push failures are errors (true) or skipped (false).
    pub require_remote: bool,
    pub gates: GatesConfig,
}

/// Resolved gate-runner configuration.
#[derive(Debug, Clone)]
pub struct GatesConfig {
    /// Gate execution order. Gates without a configured command are skipped.
    pub order: Vec<String>,
    /// Shell command per gate, templated with `wu`, `lane`, `branch`,
    /// `worktree`, and `base`.
    pub commands: IndexMap<String, String>,
    /// Stop at the first failing gate.
    pub fail_fast: bool,
    /// Per-gate wall-clock budget in seconds.
    pub timeout_secs: u64,
    /// Changed-file patterns that classify a change as docs-only.
    pub docs_only_patterns: Vec<String>,
    /// Changed-file patterns that classify a change as high-risk.
    pub high_risk_patterns: Vec<String>,
    /// Test-path patterns that must run even for docs-only changes.
    pub safety_test_patterns: Vec<String>,
}

impl Default for GatesConfig {
    fn default() -> Self {
        Self {
            order: DEFAULT_GATE_ORDER.iter().map(|s| (*s).to_string()).collect(),
            commands: IndexMap::new(),
            fail_fast: true,
            timeout_secs: 600,
            docs_only_patterns: vec![
                r"\.md$".into(),
                r"\.txt$".into(),
                r"^docs/".into(),
                r"^LICENSE".into(),
            ],
            high_risk_patterns: vec![r"migrations/".into(), r"^\.github/".into()],
            safety_test_patterns: vec![r"safety".into()],
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            wu_dir: PathBuf::from("docs/04-operations/tasks/wu"),
            initiatives_dir: PathBuf::from("docs/04-operations/tasks/initiatives"),
            worktrees_dir: PathBuf::from("worktrees"),
            state_dir: PathBuf::from(".lumenflow"),
            stamps_dir: PathBuf::from(".lumenflow/stamps"),
            main_branch: "main".into(),
            default_remote: "origin".into(),
            default_domain: "lumenflow.local".into(),
            require_remote: true,
            gates: GatesConfig::default(),
        }
    }
}

/// Merge semantics for layered configs: fields set in `overlay` win.
pub trait Merge {
    fn merge_with(&self, overlay: &Self) -> Self;
}

impl WorkspaceConfig {
    /// Load configuration for a repository rooted at `repo_root`.
    ///
    /// Missing files are not errors; a file that exists but fails to parse
    /// is, so typos surface instead of silently using defaults.
    pub fn load(repo_root: &Path) -> anyhow::Result<Self> {
        let user = Self::read_raw(&Self::user_config_path())?;
        let workspace = Self::read_raw(&repo_root.join(WORKSPACE_FILE))?;

        let raw = match (user, workspace) {
            (Some(u), Some(w)) => u.merge_with(&w),
            (Some(u), None) => u,
            (None, Some(w)) => w,
            (None, None) => RawConfig::default(),
        };
        Ok(raw.resolve())
    }

    fn read_raw(path: &Path) -> anyhow::Result<Option<RawConfig>> {
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let raw: RawConfig = toml::from_str(&text)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(raw))
    }

    fn user_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lumenflow")
            .join("config.toml")
    }

    // ========================================================================
    // Derived paths (all relative paths are joined onto the repo root)
    // ========================================================================

    pub fn wu_dir_abs(&self, root: &Path) -> PathBuf {
        root.join(&self.wu_dir)
    }

    pub fn wu_path(&self, root: &Path, id: &crate::wu::WuId) -> PathBuf {
        self.wu_dir_abs(root).join(format!("{id}.yaml"))
    }

    pub fn backlog_path(&self, root: &Path) -> PathBuf {
        self.wu_dir_abs(root).join("backlog.md")
    }

    /// status.md lives one level above the WU directory (next to it in the
    /// tasks tree), not inside it.
    pub fn status_doc_rel(&self) -> PathBuf {
        self.wu_dir
            .parent()
            .map(|p| p.join("status.md"))
            .unwrap_or_else(|| PathBuf::from("status.md"))
    }

    pub fn status_doc_path(&self, root: &Path) -> PathBuf {
        root.join(self.status_doc_rel())
    }

    pub fn initiatives_dir_abs(&self, root: &Path) -> PathBuf {
        root.join(&self.initiatives_dir)
    }

    pub fn state_dir_abs(&self, root: &Path) -> PathBuf {
        root.join(&self.state_dir)
    }

    pub fn events_path(&self, root: &Path) -> PathBuf {
        self.state_dir_abs(root).join("wu-events.jsonl")
    }

    pub fn spawn_events_path(&self, root: &Path) -> PathBuf {
        self.state_dir_abs(root).join("spawn-events.jsonl")
    }

    pub fn signals_path(&self, root: &Path) -> PathBuf {
        self.state_dir_abs(root).join("signals.jsonl")
    }

    pub fn merge_lock_path(&self, root: &Path) -> PathBuf {
        self.state_dir_abs(root).join("merge.lock")
    }

    pub fn command_log_dir(&self, root: &Path) -> PathBuf {
        self.state_dir_abs(root).join("logs")
    }

    pub fn stamps_dir_abs(&self, root: &Path) -> PathBuf {
        root.join(&self.stamps_dir)
    }

    pub fn stamp_path(&self, root: &Path, id: &crate::wu::WuId) -> PathBuf {
        self.stamps_dir_abs(root).join(format!("{id}.done"))
    }

    pub fn worktrees_dir_abs(&self, root: &Path) -> PathBuf {
        root.join(&self.worktrees_dir)
    }

    /// Gate log directory: `LUMENFLOW_LOG_DIR` or `.logs` under the root.
    pub fn gate_log_dir(&self, root: &Path) -> PathBuf {
        match std::env::var_os("LUMENFLOW_LOG_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => root.join(".logs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_any_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = WorkspaceConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.main_branch, "main");
        assert_eq!(cfg.state_dir, PathBuf::from(".lumenflow"));
        assert!(cfg.require_remote);
        assert_eq!(cfg.gates.order, DEFAULT_GATE_ORDER);
    }

    #[test]
    fn workspace_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(WORKSPACE_FILE),
            r#"
main_branch = "trunk"
state_dir = ".flow"

[git]
require_remote = false

[gates]
fail_fast = false

[gates.commands]
test = "cargo test"
lint = "cargo clippy"
"#,
        )
        .unwrap();
        let cfg = WorkspaceConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.main_branch, "trunk");
        assert_eq!(cfg.state_dir, PathBuf::from(".flow"));
        assert!(!cfg.require_remote);
        assert!(!cfg.gates.fail_fast);
        assert_eq!(cfg.gates.commands.get("test").unwrap(), "cargo test");
        // Order stays the default chain even when only some commands are set
        assert_eq!(cfg.gates.order, DEFAULT_GATE_ORDER);
    }

    #[test]
    fn parse_error_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(WORKSPACE_FILE), "main_branch = [").unwrap();
        assert!(WorkspaceConfig::load(dir.path()).is_err());
    }

    #[test]
    fn derived_paths_join_root() {
        let cfg = WorkspaceConfig::default();
        let root = Path::new("/repo");
        assert_eq!(
            cfg.events_path(root),
            PathBuf::from("/repo/.lumenflow/wu-events.jsonl")
        );
        let id: crate::wu::WuId = "WU-7".parse().unwrap();
        assert_eq!(
            cfg.stamp_path(root, &id),
            PathBuf::from("/repo/.lumenflow/stamps/WU-7.done")
        );
    }
}
