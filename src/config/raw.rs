//! On-disk configuration shapes.
//!
//! Every field is optional so a user file and a workspace file can each set
//! only what they care about; [`RawConfig::resolve`] applies defaults once.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Deserialize;

use super::{GatesConfig, Merge, WorkspaceConfig};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub wu_dir: Option<PathBuf>,
    pub initiatives_dir: Option<PathBuf>,
    pub worktrees_dir: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub stamps_dir: Option<PathBuf>,
    pub main_branch: Option<String>,
    pub default_remote: Option<String>,
    pub default_domain: Option<String>,
    #[serde(default)]
    pub git: Option<GitRaw>,
    #[serde(default)]
    pub gates: Option<GatesRaw>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitRaw {
    pub require_remote: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatesRaw {
    pub order: Option<Vec<String>>,
    #[serde(default)]
    pub commands: IndexMap<String, String>,
    pub fail_fast: Option<bool>,
    pub timeout_secs: Option<u64>,
    pub docs_only_patterns: Option<Vec<String>>,
    pub high_risk_patterns: Option<Vec<String>>,
    pub safety_test_patterns: Option<Vec<String>>,
}

impl Merge for RawConfig {
    fn merge_with(&self, overlay: &Self) -> Self {
        Self {
            wu_dir: overlay.wu_dir.clone().or_else(|| self.wu_dir.clone()),
            initiatives_dir: overlay
                .initiatives_dir
                .clone()
                .or_else(|| self.initiatives_dir.clone()),
            worktrees_dir: overlay
                .worktrees_dir
                .clone()
                .or_else(|| self.worktrees_dir.clone()),
            state_dir: overlay.state_dir.clone().or_else(|| self.state_dir.clone()),
            stamps_dir: overlay
                .stamps_dir
                .clone()
                .or_else(|| self.stamps_dir.clone()),
            main_branch: overlay
                .main_branch
                .clone()
                .or_else(|| self.main_branch.clone()),
            default_remote: overlay
                .default_remote
                .clone()
                .or_else(|| self.default_remote.clone()),
            default_domain: overlay
                .default_domain
                .clone()
                .or_else(|| self.default_domain.clone()),
            git: match (&self.git, &overlay.git) {
                (Some(b), Some(o)) => Some(GitRaw {
                    require_remote: o.require_remote.or(b.require_remote),
                }),
                (b, o) => o.clone().or_else(|| b.clone()),
            },
            gates: match (&self.gates, &overlay.gates) {
                (Some(b), Some(o)) => Some(b.merge_with(o)),
                (b, o) => o.clone().or_else(|| b.clone()),
            },
        }
    }
}

impl Merge for GatesRaw {
    /// Commands merge by key (overlay wins); scalar options overlay-or-base.
    fn merge_with(&self, overlay: &Self) -> Self {
        let mut commands = self.commands.clone();
        for (k, v) in &overlay.commands {
            commands.insert(k.clone(), v.clone());
        }
        Self {
            order: overlay.order.clone().or_else(|| self.order.clone()),
            commands,
            fail_fast: overlay.fail_fast.or(self.fail_fast),
            timeout_secs: overlay.timeout_secs.or(self.timeout_secs),
            docs_only_patterns: overlay
                .docs_only_patterns
                .clone()
                .or_else(|| self.docs_only_patterns.clone()),
            high_risk_patterns: overlay
                .high_risk_patterns
                .clone()
                .or_else(|| self.high_risk_patterns.clone()),
            safety_test_patterns: overlay
                .safety_test_patterns
                .clone()
                .or_else(|| self.safety_test_patterns.clone()),
        }
    }
}

impl RawConfig {
    pub fn resolve(self) -> WorkspaceConfig {
        let defaults = WorkspaceConfig::default();
        let gate_defaults = GatesConfig::default();
        let gates = self.gates.unwrap_or_default();
        WorkspaceConfig {
            wu_dir: self.wu_dir.unwrap_or(defaults.wu_dir),
            initiatives_dir: self.initiatives_dir.unwrap_or(defaults.initiatives_dir),
            worktrees_dir: self.worktrees_dir.unwrap_or(defaults.worktrees_dir),
            state_dir: self.state_dir.unwrap_or(defaults.state_dir),
            stamps_dir: self.stamps_dir.unwrap_or(defaults.stamps_dir),
            main_branch: self.main_branch.unwrap_or(defaults.main_branch),
            default_remote: self.default_remote.unwrap_or(defaults.default_remote),
            default_domain: self.default_domain.unwrap_or(defaults.default_domain),
            require_remote: self
                .git
                .and_then(|g| g.require_remote)
                .unwrap_or(defaults.require_remote),
            gates: GatesConfig {
                order: gates.order.unwrap_or(gate_defaults.order),
                commands: gates.commands,
                fail_fast: gates.fail_fast.unwrap_or(gate_defaults.fail_fast),
                timeout_secs: gates.timeout_secs.unwrap_or(gate_defaults.timeout_secs),
                docs_only_patterns: gates
                    .docs_only_patterns
                    .unwrap_or(gate_defaults.docs_only_patterns),
                high_risk_patterns: gates
                    .high_risk_patterns
                    .unwrap_or(gate_defaults.high_risk_patterns),
                safety_test_patterns: gates
                    .safety_test_patterns
                    .unwrap_or(gate_defaults.safety_test_patterns),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> RawConfig {
        toml::from_str(s).unwrap()
    }

    #[test]
    fn overlay_wins_scalars_and_merges_commands() {
        let user = parse(
            r#"
main_branch = "master"
[gates.commands]
format = "fmt-user"
lint = "lint-user"
"#,
        );
        let workspace = parse(
            r#"
main_branch = "main"
[gates.commands]
lint = "lint-ws"
test = "test-ws"
"#,
        );
        let merged = user.merge_with(&workspace).resolve();
        assert_eq!(merged.main_branch, "main");
        assert_eq!(merged.gates.commands.get("format").unwrap(), "fmt-user");
        assert_eq!(merged.gates.commands.get("lint").unwrap(), "lint-ws");
        assert_eq!(merged.gates.commands.get("test").unwrap(), "test-ws");
    }

    #[test]
    fn unknown_keys_rejected() {
        let result: Result<RawConfig, _> = toml::from_str("not_a_key = 1");
        assert!(result.is_err());
    }
}
