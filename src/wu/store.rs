//! YAML-backed work-unit store.
//!
//! One file per WU under the configured directory; the file name is the id.
//! Writes go through a temp file + rename so readers never observe a torn
//! file. The main checkout owns these files - worktree code must route
//! writes through the merge pipeline.

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::errors::LumenError;

use super::{Priority, RawWorkUnit, WorkUnit, WuId, WuStatus};

#[derive(Debug, Clone)]
pub struct WuStore {
    dir: PathBuf,
    default_domain: String,
}

impl WuStore {
    pub fn new(dir: impl Into<PathBuf>, default_domain: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            default_domain: default_domain.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &WuId) -> PathBuf {
        self.dir.join(format!("{id}.yaml"))
    }

    pub fn exists(&self, id: &WuId) -> bool {
        self.path_for(id).is_file()
    }

    /// Load and normalize one WU. `Ok(None)` when the file doesn't exist.
    pub fn load(&self, id: &WuId) -> anyhow::Result<Option<WorkUnit>> {
        let path = self.path_for(id);
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path).map_err(|e| LumenError::Io {
            path: path.clone(),
            detail: e.to_string(),
        })?;
        let raw: RawWorkUnit = serde_yaml::from_str(&text).map_err(|e| LumenError::YamlParse {
            path: path.clone(),
            detail: e.to_string(),
        })?;
        if raw.id != *id {
            return Err(LumenError::InconsistentState {
                id: id.to_string(),
                reason: format!("file {} declares id {}", path.display(), raw.id),
            }
            .into());
        }
        let wu = raw
            .normalize(&self.default_domain)
            .with_context(|| format!("normalizing {}", path.display()))?;
        Ok(Some(wu))
    }

    /// Load a WU that must exist.
    pub fn require(&self, id: &WuId) -> anyhow::Result<WorkUnit> {
        self.load(id)?
            .ok_or_else(|| LumenError::WuNotFound { id: id.to_string() }.into())
    }

    /// Write a WU atomically (temp file + rename in the same directory).
    pub fn save(&self, wu: &WorkUnit) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| LumenError::Io {
            path: self.dir.clone(),
            detail: e.to_string(),
        })?;
        let yaml = serde_yaml::to_string(wu)?;
        let path = self.path_for(&wu.id);
        let tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        std::fs::write(tmp.path(), &yaml)?;
        tmp.persist(&path)
            .map_err(|e| LumenError::Io {
                path: path.clone(),
                detail: e.to_string(),
            })?;
        Ok(())
    }

    /// All WUs, sorted by id. Files that fail to parse are skipped with a
    /// warning so one corrupt file doesn't hide the rest of the backlog.
    pub fn list(&self) -> anyhow::Result<Vec<WorkUnit>> {
        let mut out = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => {
                return Err(LumenError::Io {
                    path: self.dir.clone(),
                    detail: e.to_string(),
                }
                .into());
            }
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(stem) = name.strip_suffix(".yaml") else {
                continue;
            };
            let Ok(id) = stem.parse::<WuId>() else {
                continue;
            };
            match self.load(&id) {
                Ok(Some(wu)) => out.push(wu),
                Ok(None) => {}
                Err(e) => log::warn!("skipping {name}: {e}"),
            }
        }
        out.sort_by_key(|wu| wu.id);
        Ok(out)
    }

    /// Ready WUs in claim order: priority ascending (P0 first, absent
    /// priority sorts after P3), then `created` ascending, then id.
    pub fn query_ready(&self) -> anyhow::Result<Vec<WorkUnit>> {
        let mut ready: Vec<WorkUnit> = self
            .list()?
            .into_iter()
            .filter(|wu| wu.status == WuStatus::Ready)
            .collect();
        ready.sort_by(|a, b| {
            rank(a.priority)
                .cmp(&rank(b.priority))
                .then_with(|| a.created.cmp(&b.created))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(ready)
    }
}

fn rank(p: Option<Priority>) -> u8 {
    match p {
        Some(Priority::P0) => 0,
        Some(Priority::P1) => 1,
        Some(Priority::P2) => 2,
        Some(Priority::P3) => 3,
        None => 4,
    }
}
