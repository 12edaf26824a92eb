//! Spawn registry: JSONL log plus in-memory indexes.
//!
//! The log holds full records; a status change appends a fresh record with
//! the same id rather than rewriting history. Replay keeps the newest record
//! per spawn id and checks the invariants: one spawn per target, forward-only
//! status transitions.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::errors::LumenError;
use crate::wu::WuId;

use super::{SpawnRecord, SpawnStatus};

#[derive(Debug)]
pub struct SpawnRegistry {
    path: PathBuf,
    records: BTreeMap<String, SpawnRecord>,
    by_parent: BTreeMap<WuId, BTreeSet<String>>,
    by_target: BTreeMap<WuId, String>,
}

impl SpawnRegistry {
    /// Replay the log at `path`. Duplicate targets are errors; status
    /// regressions are warnings (the regressing record is ignored).
    pub fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let mut registry = Self {
            path,
            records: BTreeMap::new(),
            by_parent: BTreeMap::new(),
            by_target: BTreeMap::new(),
        };

        let text = match std::fs::read_to_string(&registry.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(registry),
            Err(e) => {
                log::warn!("spawn log {} unreadable: {e}", registry.path.display());
                return Ok(registry);
            }
        };

        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: SpawnRecord = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(e) => {
                    log::warn!(
                        "skipping malformed spawn record at {}:{}: {e}",
                        registry.path.display(),
                        idx + 1
                    );
                    continue;
                }
            };
            registry.absorb(record)?;
        }
        Ok(registry)
    }

    fn absorb(&mut self, record: SpawnRecord) -> anyhow::Result<()> {
        match self.records.get(&record.id) {
            None => {
                // New spawn id; a second spawn for the same target is an error
                if let Some(existing) = self.by_target.get(&record.target_wu_id) {
                    return Err(LumenError::InconsistentState {
                        id: record.target_wu_id.to_string(),
                        reason: format!(
                            "already delegated by {existing}, duplicate record {}",
                            record.id
                        ),
                    }
                    .into());
                }
                self.by_parent
                    .entry(record.parent_wu_id)
                    .or_default()
                    .insert(record.id.clone());
                self.by_target.insert(record.target_wu_id, record.id.clone());
                self.records.insert(record.id.clone(), record);
            }
            Some(existing) => {
                if existing.status.can_become(record.status) {
                    self.records.insert(record.id.clone(), record);
                } else if existing.status != record.status {
                    log::warn!(
                        "ignoring status regression {} -> {} for {}",
                        existing.status,
                        record.status,
                        record.id
                    );
                }
            }
        }
        Ok(())
    }

    fn append_line(&self, record: &SpawnRecord) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| LumenError::Io {
                path: self.path.clone(),
                detail: e.to_string(),
            })?;
        file.lock_exclusive().map_err(|e| LumenError::Io {
            path: self.path.clone(),
            detail: format!("lock failed: {e}"),
        })?;
        let result = (&file).write_all(line.as_bytes());
        let _ = fs2::FileExt::unlock(&file);
        result.map_err(|e| {
            LumenError::Io {
                path: self.path.clone(),
                detail: e.to_string(),
            }
            .into()
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a new delegation. Returns the spawn id.
    pub fn record(
        &mut self,
        parent: WuId,
        target: WuId,
        lane: &str,
        intent: Option<&str>,
    ) -> anyhow::Result<String> {
        if let Some(existing) = self.by_target.get(&target) {
            return Err(LumenError::InconsistentState {
                id: target.to_string(),
                reason: format!("already delegated by {existing}"),
            }
            .into());
        }
        let mut record = SpawnRecord::new(parent, target, lane);
        if let Some(intent) = intent {
            record = record.with_intent(intent);
        }
        self.append_line(&record)?;
        let id = record.id.clone();
        self.absorb(record)?;
        Ok(id)
    }

    /// Move a spawn to a new status, stamping `completedAt` on terminal
    /// states.
    pub fn update_status(&mut self, spawn_id: &str, status: SpawnStatus) -> anyhow::Result<()> {
        let Some(existing) = self.records.get(spawn_id) else {
            return Err(LumenError::InconsistentState {
                id: spawn_id.to_string(),
                reason: "unknown spawn id".to_string(),
            }
            .into());
        };
        if !existing.status.can_become(status) {
            return Err(LumenError::InconsistentState {
                id: spawn_id.to_string(),
                reason: format!("cannot move {} from {} to {status}", spawn_id, existing.status),
            }
            .into());
        }
        let mut updated = existing.clone();
        updated.status = status;
        updated.completed_at = match status {
            SpawnStatus::Completed | SpawnStatus::Failed => Some(
                chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            ),
            _ => None,
        };
        self.append_line(&updated)?;
        self.records.insert(spawn_id.to_string(), updated);
        Ok(())
    }

    pub fn get(&self, spawn_id: &str) -> Option<&SpawnRecord> {
        self.records.get(spawn_id)
    }

    pub fn get_by_target(&self, target: &WuId) -> Option<&SpawnRecord> {
        self.by_target.get(target).and_then(|id| self.records.get(id))
    }

    pub fn get_by_parent(&self, parent: &WuId) -> Vec<&SpawnRecord> {
        self.by_parent
            .get(parent)
            .map(|ids| ids.iter().filter_map(|id| self.records.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn get_pending(&self) -> Vec<&SpawnRecord> {
        self.records
            .values()
            .filter(|r| r.status == SpawnStatus::Pending)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (tempfile::TempDir, SpawnRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = SpawnRegistry::load(dir.path().join("spawn-events.jsonl")).unwrap();
        (dir, registry)
    }

    #[test]
    fn record_and_query() {
        let (_dir, mut registry) = registry();
        let id = registry
            .record(WuId(1), WuId(2), "Framework: Core", Some("split refactor"))
            .unwrap();

        let by_target = registry.get_by_target(&WuId(2)).unwrap();
        assert_eq!(by_target.id, id);
        assert_eq!(by_target.intent.as_deref(), Some("split refactor"));
        assert_eq!(registry.get_by_parent(&WuId(1)).len(), 1);
        assert_eq!(registry.get_pending().len(), 1);
    }

    #[test]
    fn duplicate_target_rejected() {
        let (_dir, mut registry) = registry();
        registry.record(WuId(1), WuId(2), "Core", None).unwrap();
        assert!(registry.record(WuId(3), WuId(2), "Core", None).is_err());
    }

    #[test]
    fn status_walk_and_persistence() {
        let (dir, mut registry) = registry();
        let id = registry.record(WuId(1), WuId(2), "Core", None).unwrap();
        registry.update_status(&id, SpawnStatus::Active).unwrap();
        registry.update_status(&id, SpawnStatus::Completed).unwrap();
        assert!(registry.get(&id).unwrap().completed_at.is_some());

        // Regressions rejected
        assert!(registry.update_status(&id, SpawnStatus::Active).is_err());

        // A fresh replay sees the final state
        let reloaded = SpawnRegistry::load(dir.path().join("spawn-events.jsonl")).unwrap();
        assert_eq!(reloaded.get(&id).unwrap().status, SpawnStatus::Completed);
        assert!(reloaded.get_pending().is_empty());
    }

    #[test]
    fn skipping_pending_to_completed_rejected() {
        let (_dir, mut registry) = registry();
        let id = registry.record(WuId(4), WuId(5), "API", None).unwrap();
        assert!(registry.update_status(&id, SpawnStatus::Completed).is_err());
    }
}
