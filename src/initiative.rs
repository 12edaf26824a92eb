//! Initiatives: grouping WUs into phases, with projected statuses.
//!
//! Phase and initiative statuses are projections of member WU statuses; the
//! YAML file is rewritten only when the projection changes, inside the same
//! snapshot as the WU metadata.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::LumenError;
use crate::wu::{WorkUnit, WuStatus};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InitiativeStatus {
    Ready,
    InProgress,
    Done,
    Archived,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Blocked,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub id: u32,
    pub status: PhaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Initiative {
    pub id: String,
    pub slug: String,
    pub status: InitiativeStatus,
    pub phases: Vec<Phase>,
}

impl Initiative {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| LumenError::Io {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        serde_yaml::from_str(&text).map_err(|e| {
            LumenError::YamlParse {
                path: path.to_path_buf(),
                detail: e.to_string(),
            }
            .into()
        })
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let yaml = serde_yaml::to_string(self)?;
        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::fs::write(tmp.path(), yaml)?;
        tmp.persist(path).map_err(|e| LumenError::Io {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        Ok(())
    }

    /// Reproject phase and initiative statuses from the member WUs.
    /// Returns true when anything changed (meaning the file needs writing).
    pub fn reproject(&mut self, members: &[&WorkUnit]) -> bool {
        let mut changed = false;

        for phase in &mut self.phases {
            let phase_wus: Vec<&&WorkUnit> = members
                .iter()
                .filter(|wu| wu.phase == Some(phase.id))
                .collect();
            if phase_wus.is_empty() {
                continue;
            }
            let next = project_phase(phase_wus.iter().map(|wu| wu.status));
            if phase.status != next {
                phase.status = next;
                changed = true;
            }
        }

        let next = self.project_status(members);
        if self.status != next {
            self.status = next;
            changed = true;
        }
        changed
    }

    fn project_status(&self, members: &[&WorkUnit]) -> InitiativeStatus {
        if self.status == InitiativeStatus::Archived {
            return InitiativeStatus::Archived;
        }
        let all_terminal =
            !members.is_empty() && members.iter().all(|wu| wu.status.is_terminal());
        let all_phases_done = self.phases.iter().all(|p| p.status == PhaseStatus::Done);
        if all_terminal && all_phases_done {
            return InitiativeStatus::Done;
        }
        let any_started = members.iter().any(|wu| {
            matches!(
                wu.status,
                WuStatus::InProgress | WuStatus::Blocked | WuStatus::Done
            )
        });
        if any_started {
            InitiativeStatus::InProgress
        } else {
            self.status
        }
    }
}

/// Phase status from member WU statuses:
/// done iff every WU is terminal; in_progress when any WU is in progress or
/// the phase is a mix of done and open; blocked when something is blocked
/// and nothing is moving; pending otherwise.
fn project_phase(statuses: impl Iterator<Item = WuStatus> + Clone) -> PhaseStatus {
    let any_in_progress = statuses.clone().any(|s| s == WuStatus::InProgress);
    if any_in_progress {
        return PhaseStatus::InProgress;
    }
    let any_blocked = statuses.clone().any(|s| s == WuStatus::Blocked);
    if any_blocked {
        return PhaseStatus::Blocked;
    }
    let all_terminal = statuses.clone().all(|s| s.is_terminal());
    if all_terminal {
        return PhaseStatus::Done;
    }
    let any_done = statuses.clone().any(|s| s == WuStatus::Done);
    if any_done {
        // Mix of done and open work
        return PhaseStatus::InProgress;
    }
    PhaseStatus::Pending
}

/// Path of an initiative file by slug.
pub fn path_for(initiatives_dir: &Path, slug: &str) -> PathBuf {
    initiatives_dir.join(format!("{slug}.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wu::{WuId, WuType};

    fn wu(id: u32, status: WuStatus, phase: u32) -> WorkUnit {
        WorkUnit {
            id: WuId(id),
            title: "t".into(),
            lane: "Core".into(),
            wu_type: WuType::Feature,
            status,
            created: "2024-01-01".into(),
            priority: None,
            assigned_to: None,
            code_paths: Vec::new(),
            acceptance: Vec::new(),
            notes: Vec::new(),
            initiative: Some("api-revamp".into()),
            phase: Some(phase),
            claimed_branch: None,
            worktree_path: None,
        }
    }

    fn initiative() -> Initiative {
        Initiative {
            id: "INIT-1".into(),
            slug: "api-revamp".into(),
            status: InitiativeStatus::Ready,
            phases: vec![
                Phase {
                    id: 1,
                    status: PhaseStatus::Pending,
                    title: Some("Groundwork".into()),
                },
                Phase {
                    id: 2,
                    status: PhaseStatus::Pending,
                    title: None,
                },
            ],
        }
    }

    #[test]
    fn phase_projection_rules() {
        use WuStatus::*;
        assert_eq!(project_phase([Ready, Ready].into_iter()), PhaseStatus::Pending);
        assert_eq!(
            project_phase([InProgress, Ready].into_iter()),
            PhaseStatus::InProgress
        );
        assert_eq!(
            project_phase([Blocked, Ready].into_iter()),
            PhaseStatus::Blocked
        );
        // In-progress wins over blocked
        assert_eq!(
            project_phase([Blocked, InProgress].into_iter()),
            PhaseStatus::InProgress
        );
        assert_eq!(project_phase([Done, Cancelled].into_iter()), PhaseStatus::Done);
        // Mix of done and open reads as in progress
        assert_eq!(
            project_phase([Done, Ready].into_iter()),
            PhaseStatus::InProgress
        );
    }

    #[test]
    fn reproject_updates_phases_and_initiative() {
        let mut init = initiative();
        let wus = [wu(1, WuStatus::InProgress, 1), wu(2, WuStatus::Ready, 2)];
        let members: Vec<&WorkUnit> = wus.iter().collect();
        assert!(init.reproject(&members));
        assert_eq!(init.phases[0].status, PhaseStatus::InProgress);
        assert_eq!(init.phases[1].status, PhaseStatus::Pending);
        assert_eq!(init.status, InitiativeStatus::InProgress);

        // No change means no write needed
        assert!(!init.reproject(&members));
    }

    #[test]
    fn initiative_done_when_everything_terminal() {
        let mut init = initiative();
        let wus = [wu(1, WuStatus::Done, 1), wu(2, WuStatus::Cancelled, 2)];
        let members: Vec<&WorkUnit> = wus.iter().collect();
        assert!(init.reproject(&members));
        assert_eq!(init.status, InitiativeStatus::Done);
        assert!(init.phases.iter().all(|p| p.status == PhaseStatus::Done));
    }

    #[test]
    fn yaml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = path_for(dir.path(), "api-revamp");
        let init = initiative();
        init.save(&path).unwrap();
        let loaded = Initiative::load(&path).unwrap();
        assert_eq!(loaded, init);
    }
}
