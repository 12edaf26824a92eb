//! Append-only JSONL event log.
//!
//! Appends hold an OS advisory lock on the log file so concurrent processes
//! interleave whole lines; reads take no lock (append-only files tolerate
//! racy readers - a torn final line is skipped like any malformed line).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use indexmap::IndexMap;

use crate::errors::LumenError;
use crate::wu::WuId;

use super::{ProjectedState, WuEvent};

#[derive(Debug, Clone)]
pub struct EventStore {
    path: PathBuf,
}

impl EventStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event. Fail-closed: any I/O problem is an error.
    pub fn append(&self, event: &WuEvent) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LumenError::Io {
                path: parent.to_path_buf(),
                detail: e.to_string(),
            })?;
        }
        let mut line = serde_json::to_string(event)?;
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
        let result = (&file).write_all(line.as_bytes()).and_then(|_| (&file).flush());
        let unlock = fs2::FileExt::unlock(&file);
        result.map_err(|e| LumenError::Io {
            path: self.path.clone(),
            detail: e.to_string(),
        })?;
        unlock.map_err(|e| LumenError::Io {
            path: self.path.clone(),
            detail: format!("unlock failed: {e}"),
        })?;
        Ok(())
    }

    /// All events in file order. A malformed line is skipped with a warning;
    /// a missing or unreadable file reads as empty (with a warning when
    /// unreadable).
    pub fn read_all(&self) -> Vec<WuEvent> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                log::warn!("event log {} unreadable: {e}", self.path.display());
                return Vec::new();
            }
        };
        let mut events = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<WuEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => log::warn!(
                    "skipping malformed event at {}:{}: {e}",
                    self.path.display(),
                    idx + 1
                ),
            }
        }
        events
    }

    /// Replay the full log into per-WU projections (single linear scan).
    pub fn replay(&self) -> IndexMap<WuId, ProjectedState> {
        let mut states: IndexMap<WuId, ProjectedState> = IndexMap::new();
        for event in self.read_all() {
            let state = states.entry(event.wu_id).or_default();
            if !state.apply(&event) {
                log::warn!(
                    "ignoring out-of-order {} for {} (status {})",
                    event.kind,
                    event.wu_id,
                    state.status
                );
            }
        }
        states
    }

    /// Projection for one WU; the default `ready` state if it was never
    /// mentioned.
    pub fn project_one(&self, id: &WuId) -> ProjectedState {
        let mut state = ProjectedState::default();
        for event in self.read_all() {
            if event.wu_id == *id && !state.apply(&event) {
                log::warn!(
                    "ignoring out-of-order {} for {} (status {})",
                    event.kind,
                    event.wu_id,
                    state.status
                );
            }
        }
        state
    }

    /// The WU currently `in_progress` on `lane`, if any.
    pub fn lane_occupant(&self, lane: &str) -> Option<WuId> {
        self.replay()
            .into_iter()
            .find(|(_, state)| {
                state.status == crate::wu::WuStatus::InProgress
                    && state.lane.as_deref() == Some(lane)
            })
            .map(|(id, _)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::wu::WuStatus;

    fn store() -> (tempfile::TempDir, EventStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path().join("wu-events.jsonl"));
        (dir, store)
    }

    #[test]
    fn append_then_replay() {
        let (_dir, store) = store();
        store
            .append(&WuEvent::new(EventKind::Claim, WuId(1)).with_lane("Framework: Core"))
            .unwrap();
        store.append(&WuEvent::new(EventKind::Claim, WuId(2)).with_lane("CLI")).unwrap();
        store.append(&WuEvent::new(EventKind::Complete, WuId(2))).unwrap();

        let states = store.replay();
        assert_eq!(states[&WuId(1)].status, WuStatus::InProgress);
        assert_eq!(states[&WuId(2)].status, WuStatus::Done);
        assert_eq!(store.project_one(&WuId(1)).status, WuStatus::InProgress);
        // Never-mentioned WUs project as ready
        assert_eq!(store.project_one(&WuId(42)).status, WuStatus::Ready);
    }

    #[test]
    fn projection_ignores_other_wus() {
        let (_dir, store) = store();
        store.append(&WuEvent::new(EventKind::Claim, WuId(7))).unwrap();
        store.append(&WuEvent::new(EventKind::Claim, WuId(8))).unwrap();
        store.append(&WuEvent::new(EventKind::Complete, WuId(8))).unwrap();
        // WU-7's projection depends only on WU-7's events
        assert_eq!(store.project_one(&WuId(7)).status, WuStatus::InProgress);
    }

    #[test]
    fn replay_is_idempotent() {
        let (_dir, store) = store();
        for kind in [EventKind::Claim, EventKind::Block, EventKind::Unblock] {
            store.append(&WuEvent::new(kind, WuId(3)).with_lane("API")).unwrap();
        }
        let first = store.replay();
        let second = store.replay();
        assert_eq!(first, second);
    }

    #[test]
    fn malformed_lines_skipped() {
        let (_dir, store) = store();
        store.append(&WuEvent::new(EventKind::Claim, WuId(5))).unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(store.path()).unwrap();
            writeln!(file, "{{not json").unwrap();
        }
        store.append(&WuEvent::new(EventKind::Complete, WuId(5))).unwrap();

        assert_eq!(store.read_all().len(), 2);
        assert_eq!(store.project_one(&WuId(5)).status, WuStatus::Done);
    }

    #[test]
    fn missing_file_reads_empty() {
        let (_dir, store) = store();
        assert!(store.read_all().is_empty());
        assert!(store.replay().is_empty());
    }

    #[test]
    fn lane_occupancy_tracks_claims_and_completions() {
        let (_dir, store) = store();
        let lane = "Framework: Core";
        store.append(&WuEvent::new(EventKind::Claim, WuId(100)).with_lane(lane)).unwrap();
        assert_eq!(store.lane_occupant(lane), Some(WuId(100)));
        assert_eq!(store.lane_occupant("Other"), None);

        store.append(&WuEvent::new(EventKind::Complete, WuId(100))).unwrap();
        assert_eq!(store.lane_occupant(lane), None);
    }
}
