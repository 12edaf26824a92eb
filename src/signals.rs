//! Operator signals surfaced at claim time.
//!
//! Signals are short messages aimed at whoever next touches a WU or lane.
//! They live in `signals.jsonl`; the control-plane adapter pushes and pulls
//! them (`origin` and `remoteId` exist for its benefit). The core reads
//! unread signals during `claim` and marks them read.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::errors::LumenError;
use crate::wu::WuId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOrigin {
    Local,
    Remote,
}

/// One line of `signals.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub id: String,
    pub message: String,
    pub created_at: String,
    pub read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wu_id: Option<WuId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lane: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub signal_type: Option<String>,
    pub origin: SignalOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

impl Signal {
    pub fn local(message: impl Into<String>) -> Self {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("sig-{}", &raw[..8]),
            message: message.into(),
            created_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            read: false,
            wu_id: None,
            lane: None,
            signal_type: None,
            origin: SignalOrigin::Local,
            remote_id: None,
        }
    }

    pub fn for_wu(mut self, id: WuId) -> Self {
        self.wu_id = Some(id);
        self
    }

    pub fn for_lane(mut self, lane: impl Into<String>) -> Self {
        self.lane = Some(lane.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct SignalStore {
    path: PathBuf,
}

impl SignalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, signal: &Signal) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(signal)?;
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

    pub fn read_all(&self) -> Vec<Signal> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(_) => return Vec::new(),
        };
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| match serde_json::from_str(l) {
                Ok(signal) => Some(signal),
                Err(e) => {
                    log::warn!("skipping malformed signal: {e}");
                    None
                }
            })
            .collect()
    }

    /// Unread signals addressed to `wu` or its `lane` (or broadcast).
    pub fn unread_for(&self, wu: &WuId, lane: &str) -> Vec<Signal> {
        self.read_all()
            .into_iter()
            .filter(|s| !s.read)
            .filter(|s| {
                let targeted = s.wu_id.is_some() || s.lane.is_some();
                !targeted
                    || s.wu_id.as_ref() == Some(wu)
                    || s.lane.as_deref() == Some(lane)
            })
            .collect()
    }

    /// Mark the given signal ids read. Rewrites the whole file; callers hold
    /// the merge lock, which serializes writers.
    pub fn mark_read(&self, ids: &[String]) -> anyhow::Result<()> {
        if ids.is_empty() || !self.path.is_file() {
            return Ok(());
        }
        let mut signals = self.read_all();
        let mut changed = false;
        for signal in &mut signals {
            if !signal.read && ids.contains(&signal.id) {
                signal.read = true;
                changed = true;
            }
        }
        if !changed {
            return Ok(());
        }
        let mut out = String::new();
        for signal in &signals {
            out.push_str(&serde_json::to_string(signal)?);
            out.push('\n');
        }
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::fs::write(tmp.path(), &out)?;
        tmp.persist(&self.path).map_err(|e| LumenError::Io {
            path: self.path.clone(),
            detail: e.to_string(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, SignalStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SignalStore::new(dir.path().join("signals.jsonl"));
        (dir, store)
    }

    #[test]
    fn unread_filters_by_target() {
        let (_dir, store) = store();
        store.append(&Signal::local("broadcast")).unwrap();
        store.append(&Signal::local("for wu").for_wu(WuId(5))).unwrap();
        store.append(&Signal::local("for lane").for_lane("Core")).unwrap();
        store.append(&Signal::local("other wu").for_wu(WuId(9))).unwrap();

        let hits = store.unread_for(&WuId(5), "Core");
        let messages: Vec<&str> = hits.iter().map(|s| s.message.as_str()).collect();
        assert_eq!(messages, vec!["broadcast", "for wu", "for lane"]);
    }

    #[test]
    fn mark_read_persists() {
        let (_dir, store) = store();
        let signal = Signal::local("note").for_wu(WuId(1));
        store.append(&signal).unwrap();
        store.mark_read(&[signal.id.clone()]).unwrap();
        assert!(store.unread_for(&WuId(1), "any").is_empty());
        // Still present in the file, just read
        assert_eq!(store.read_all().len(), 1);
        assert!(store.read_all()[0].read);
    }

    #[test]
    fn wire_format_camel_case() {
        let mut signal = Signal::local("m").for_wu(WuId(2));
        signal.remote_id = Some("r-9".into());
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&signal).unwrap()).unwrap();
        assert_eq!(value["wuId"], "WU-2");
        assert_eq!(value["createdAt"], signal.created_at);
        assert_eq!(value["origin"], "local");
        assert_eq!(value["remoteId"], "r-9");
    }
}
