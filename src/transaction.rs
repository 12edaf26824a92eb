//! Snapshot transactions for metadata files.
//!
//! The merge pipeline mutates several files (WU YAML, backlog, status page,
//! initiative YAML, stamp) that must appear to change atomically with the
//! metadata commit. A [`Snapshot`] captures their bytes before any write;
//! [`Snapshot::restore`] puts every captured path back - rewriting changed
//! files and deleting ones that did not exist at capture time.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::errors::LumenError;

#[derive(Debug)]
pub struct Snapshot {
    /// Path -> original contents (`None` = absent at capture time).
    captured: BTreeMap<PathBuf, Option<Vec<u8>>>,
    committed: bool,
}

impl Snapshot {
    /// Capture the current bytes of every path.
    pub fn capture<I, P>(paths: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut captured = BTreeMap::new();
        for path in paths {
            let path = path.into();
            let contents = match std::fs::read(&path) {
                Ok(bytes) => Some(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => {
                    return Err(LumenError::Io {
                        path,
                        detail: e.to_string(),
                    }
                    .into());
                }
            };
            captured.insert(path, contents);
        }
        Ok(Self {
            captured,
            committed: false,
        })
    }

    /// Mark the transaction committed. Bookkeeping only - callers follow
    /// with `git add` + `git commit`.
    pub fn commit(&mut self) {
        self.committed = true;
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Put every captured path back to its captured state.
    ///
    /// Best-effort across paths: one failing restore doesn't stop the rest,
    /// and the first error is returned at the end.
    pub fn restore(&self) -> anyhow::Result<()> {
        let mut first_err: Option<anyhow::Error> = None;
        for (path, original) in &self.captured {
            let result = match original {
                Some(bytes) => {
                    if let Some(parent) = path.parent() {
                        let _ = std::fs::create_dir_all(parent);
                    }
                    std::fs::write(path, bytes)
                }
                None => match std::fs::remove_file(path) {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
                    _ => Ok(()),
                },
            };
            if let Err(e) = result {
                log::warn!("failed to restore {}: {e}", path.display());
                if first_err.is_none() {
                    first_err = Some(
                        LumenError::Io {
                            path: path.clone(),
                            detail: e.to_string(),
                        }
                        .into(),
                    );
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_rewrites_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("wu.yaml");
        let absent = dir.path().join("stamp.done");
        std::fs::write(&existing, "status: ready\n").unwrap();

        let snapshot = Snapshot::capture([existing.clone(), absent.clone()]).unwrap();

        // The pipeline writes both files...
        std::fs::write(&existing, "status: done\n").unwrap();
        std::fs::write(&absent, "stamped").unwrap();

        // ...then something downstream fails
        snapshot.restore().unwrap();
        assert_eq!(std::fs::read_to_string(&existing).unwrap(), "status: ready\n");
        assert!(!absent.exists());
    }

    #[test]
    fn restore_recreates_deleted_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backlog.md");
        std::fs::write(&path, "# Backlog\n").unwrap();

        let snapshot = Snapshot::capture([path.clone()]).unwrap();
        std::fs::remove_file(&path).unwrap();

        snapshot.restore().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Backlog\n");
    }

    #[test]
    fn commit_is_bookkeeping_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, "a").unwrap();
        let mut snapshot = Snapshot::capture([path.clone()]).unwrap();
        assert!(!snapshot.is_committed());
        snapshot.commit();
        assert!(snapshot.is_committed());
        // Restore still works after commit (used on post-commit merge failure)
        std::fs::write(&path, "b").unwrap();
        snapshot.restore().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a");
    }
}
