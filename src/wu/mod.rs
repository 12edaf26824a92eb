//! Work-unit model: ids, status, YAML shape, and normalization.

mod store;

pub use store::WuStore;

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Matches a WU id anywhere in a string, case-insensitively.
static WU_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)wu-(\d+)").expect("static regex"));

/// A work-unit identifier, `WU-<n>`.
///
/// Globally unique and immutable for the life of the WU. Ordered by the
/// numeric component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WuId(pub u32);

impl WuId {
    /// Extract the first WU id embedded in arbitrary text (e.g. a worktree
    /// directory name like `framework-core-wu-12`).
    pub fn extract(text: &str) -> Option<Self> {
        WU_ID_RE
            .captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .map(WuId)
    }

    /// Lowercase form used in branch and directory names: `wu-12`.
    pub fn lower(&self) -> String {
        format!("wu-{}", self.0)
    }
}

impl fmt::Display for WuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WU-{}", self.0)
    }
}

impl FromStr for WuId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(rest) = s
            .strip_prefix("WU-")
            .or_else(|| s.strip_prefix("wu-"))
            .or_else(|| s.strip_prefix("Wu-"))
        else {
            bail!("work unit ids look like WU-123, got {s:?}");
        };
        let n: u32 = rest.parse()?;
        if n == 0 {
            bail!("work unit ids start at WU-1");
        }
        Ok(WuId(n))
    }
}

impl Serialize for WuId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for WuId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Lifecycle status. Derivable from the event store; the YAML copy must
/// agree with the projection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WuStatus {
    Ready,
    InProgress,
    Blocked,
    Done,
    Cancelled,
    Archived,
}

impl WuStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Archived)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WuType {
    Feature,
    Bug,
    Documentation,
    Process,
    Tooling,
    Chore,
    Refactor,
}

impl WuType {
    /// Resolve the canonical type from a possibly-aliased string.
    pub fn from_alias(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "feature" | "feat" => Some(Self::Feature),
            "bug" | "fix" | "bugfix" => Some(Self::Bug),
            "documentation" | "docs" | "doc" => Some(Self::Documentation),
            "process" => Some(Self::Process),
            "tooling" | "tool" | "tools" => Some(Self::Tooling),
            "chore" => Some(Self::Chore),
            "refactor" | "refactoring" => Some(Self::Refactor),
            _ => None,
        }
    }
}

/// Priority P0 (most urgent) through P3. The derived order puts P0 first,
/// which is what the ready-queue sort relies on.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum Priority {
    P0,
    P1,
    P2,
    P3,
}

/// Permissive value for fields that historically appear as either a string
/// or a number in WU YAML.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IntOrString {
    Int(u32),
    Str(String),
}

/// The on-disk YAML shape before normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct RawWorkUnit {
    pub id: WuId,
    pub title: String,
    pub lane: String,
    #[serde(rename = "type")]
    pub wu_type: String,
    pub status: WuStatus,
    pub created: String,
    pub priority: Option<String>,
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub code_paths: Vec<String>,
    #[serde(default)]
    pub acceptance: Vec<String>,
    #[serde(default)]
    pub notes: Vec<String>,
    pub initiative: Option<String>,
    pub phase: Option<IntOrString>,
    pub claimed_branch: Option<String>,
    pub worktree_path: Option<String>,
}

/// A normalized work unit.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WorkUnit {
    pub id: WuId,
    pub title: String,
    pub lane: String,
    #[serde(rename = "type")]
    pub wu_type: WuType,
    pub status: WuStatus,
    /// `YYYY-MM-DD`.
    pub created: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub code_paths: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub acceptance: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub notes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiative: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<String>,
}

impl RawWorkUnit {
    /// Apply the normalization rules:
    ///
    /// - ISO timestamps on `created` truncate to `YYYY-MM-DD`
    /// - string `phase` coerces to a positive integer
    /// - `type` aliases rewrite to the canonical name
    /// - bare usernames on `assigned_to` get `@<default_domain>`
    /// - `priority` is uppercased
    pub fn normalize(self, default_domain: &str) -> anyhow::Result<WorkUnit> {
        let wu_type = WuType::from_alias(&self.wu_type)
            .ok_or_else(|| anyhow::anyhow!("unknown work unit type {:?}", self.wu_type))?;

        let created = normalize_created(&self.created)?;

        let priority = match self.priority {
            None => None,
            Some(p) => Some(
                p.trim()
                    .to_ascii_uppercase()
                    .parse::<Priority>()
                    .map_err(|_| anyhow::anyhow!("unknown priority {p:?}"))?,
            ),
        };

        let phase = match self.phase {
            None => None,
            Some(IntOrString::Int(n)) => Some(n),
            Some(IntOrString::Str(s)) => Some(
                s.trim()
                    .parse::<u32>()
                    .map_err(|_| anyhow::anyhow!("phase must be a positive integer, got {s:?}"))?,
            ),
        };
        if phase == Some(0) {
            bail!("phase numbering starts at 1");
        }

        let assigned_to = self.assigned_to.map(|a| {
            let a = a.trim().to_string();
            if a.contains('@') {
                a
            } else {
                format!("{a}@{default_domain}")
            }
        });

        Ok(WorkUnit {
            id: self.id,
            title: self.title,
            lane: self.lane,
            wu_type,
            status: self.status,
            created,
            priority,
            assigned_to,
            code_paths: self.code_paths,
            acceptance: self.acceptance,
            notes: self.notes,
            initiative: self.initiative,
            phase,
            claimed_branch: self.claimed_branch,
            worktree_path: self.worktree_path,
        })
    }
}

fn normalize_created(created: &str) -> anyhow::Result<String> {
    let trimmed = created.trim();
    // Full timestamps truncate to the date component
    let date_part = trimmed.split(['T', ' ']).next().unwrap_or(trimmed);
    let parsed = chrono::NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|_| anyhow::anyhow!("created must be YYYY-MM-DD, got {created:?}"))?;
    Ok(parsed.format("%Y-%m-%d").to_string())
}

impl WorkUnit {
    /// Kebab-cased lane for branch and directory names.
    pub fn lane_slug(&self) -> String {
        crate::path::kebab_case(&self.lane)
    }

    /// Branch name policy: `lane/<lane-kebab>/<wu-id-lower>`.
    pub fn branch_name(&self) -> String {
        format!("lane/{}/{}", self.lane_slug(), self.id.lower())
    }

    /// Worktree directory name policy: `<lane-kebab>-<wu-id-lower>`.
    pub fn worktree_dir_name(&self) -> String {
        format!("{}-{}", self.lane_slug(), self.id.lower())
    }

    /// Semantic checks beyond what deserialization enforces.
    pub fn schema_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.title.trim().is_empty() {
            issues.push("title is empty".to_string());
        }
        if self.lane.trim().is_empty() {
            issues.push("lane is empty".to_string());
        }
        if self.initiative.is_some() && self.phase.is_none() {
            issues.push("initiative set but phase missing".to_string());
        }
        for path in &self.code_paths {
            if path.starts_with('/') {
                issues.push(format!("code path {path:?} must be repo-relative"));
            }
        }
        issues
    }
}
