//! The merge lock: a cross-process mutex serializing publish steps.
//!
//! The lock is a JSON file whose presence means "held". Acquisition writes
//! the file atomically (exclusive temp file + rename); a holder that died is
//! detected by age and reclaimed. Re-entry by the same WU returns the
//! existing lock id so a retried `done` doesn't deadlock on itself.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::errors::LumenError;
use crate::wu::WuId;

/// Contents of `merge.lock`. Field order is part of the wire contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub wu_id: WuId,
    pub lock_id: String,
    /// RFC3339 UTC.
    pub created_at: String,
    pub pid: u32,
    pub hostname: String,
}

/// Tunables for [`MergeLock::acquire`].
#[derive(Debug, Clone, Copy)]
pub struct AcquireOptions {
    /// Give up after this long.
    pub wait: Duration,
    /// Sleep between attempts.
    pub poll_interval: Duration,
    /// A lock older than this is presumed dead and reclaimed.
    pub stale_after: Duration,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        let ms_env = |name: &str, fallback: Duration| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        };
        Self {
            wait: ms_env("LUMENFLOW_LOCK_WAIT_MS", Duration::from_secs(30)),
            poll_interval: ms_env("LUMENFLOW_LOCK_POLL_MS", Duration::from_millis(500)),
            stale_after: ms_env("LUMENFLOW_LOCK_STALE_MS", Duration::from_secs(60)),
        }
    }
}

/// Outcome of an acquisition attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Acquired {
    /// We hold the lock under this id.
    Yes { lock_id: String },
    /// Someone else holds it; diagnostics for the caller.
    No {
        held_by: WuId,
        held_since: String,
    },
}

#[derive(Debug, Clone)]
pub struct MergeLock {
    path: PathBuf,
}

impl MergeLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current lock file, if any. A corrupt lock file is treated as
    /// stale - it can't be released by id, so the only way out is reclaim.
    pub fn read(&self) -> Option<LockInfo> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&text) {
            Ok(info) => Some(info),
            Err(e) => {
                log::warn!("corrupt merge lock {}: {e}", self.path.display());
                None
            }
        }
    }

    /// Try to take the lock for `wu_id`, polling until `opts.wait` elapses.
    pub fn acquire(&self, wu_id: WuId, opts: AcquireOptions) -> anyhow::Result<Acquired> {
        let deadline = Instant::now() + opts.wait;
        loop {
            crate::interrupt::check()?;
            if self.path.exists() {
                match self.read() {
                    Some(existing) => {
                        // Idempotent re-entry: the same WU gets its lock back
                        if existing.wu_id == wu_id {
                            return Ok(Acquired::Yes {
                                lock_id: existing.lock_id,
                            });
                        }
                        if is_stale(&existing, opts.stale_after) {
                            log::warn!(
                                "reclaiming stale merge lock held by {} since {}",
                                existing.wu_id,
                                existing.created_at
                            );
                            let _ = std::fs::remove_file(&self.path);
                            continue;
                        }
                        if Instant::now() >= deadline {
                            return Ok(Acquired::No {
                                held_by: existing.wu_id,
                                held_since: existing.created_at,
                            });
                        }
                        std::thread::sleep(opts.poll_interval);
                        continue;
                    }
                    None => {
                        // Unreadable lock: reclaim
                        let _ = std::fs::remove_file(&self.path);
                        continue;
                    }
                }
            }

            match self.try_write(wu_id) {
                Ok(lock_id) => return Ok(Acquired::Yes { lock_id }),
                // Lost the race to another writer; loop and re-read
                Err(e) => {
                    log::debug!("merge lock write contention: {e}");
                    if Instant::now() >= deadline {
                        let holder = self.read();
                        return Ok(match holder {
                            Some(info) => Acquired::No {
                                held_by: info.wu_id,
                                held_since: info.created_at,
                            },
                            None => Acquired::No {
                                held_by: wu_id,
                                held_since: String::new(),
                            },
                        });
                    }
                    std::thread::sleep(opts.poll_interval);
                }
            }
        }
    }

    fn try_write(&self, wu_id: WuId) -> anyhow::Result<String> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let info = LockInfo {
            wu_id,
            lock_id: uuid::Uuid::new_v4().simple().to_string(),
            created_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            pid: std::process::id(),
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string()),
        };
        let json = serde_json::to_string(&info)?;

        // Exclusive create + rename: losers of the create race error out and
        // re-poll; the rename makes the final contents atomic.
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::fs::write(tmp.path(), &json)?;
        if self.path.exists() {
            anyhow::bail!("lock appeared during write");
        }
        tmp.persist_noclobber(&self.path)
            .map_err(|e| anyhow::anyhow!("lock race lost: {e}"))?;
        Ok(info.lock_id)
    }

    /// Release the lock if and only if `lock_id` still matches the file.
    pub fn release(&self, lock_id: &str) -> anyhow::Result<()> {
        match self.read() {
            Some(info) if info.lock_id == lock_id => {
                std::fs::remove_file(&self.path).map_err(|e| {
                    LumenError::Io {
                        path: self.path.clone(),
                        detail: e.to_string(),
                    }
                    .into()
                })
            }
            Some(info) => Err(LumenError::LockError {
                wu_id: info.wu_id.to_string(),
                held_by: Some(info.lock_id),
                held_since: Some(info.created_at),
            }
            .into()),
            // Already gone (reclaimed as stale, or released twice) - fine
            None => Ok(()),
        }
    }

    /// Acquire, run `f`, always release.
    pub fn with_lock<T>(
        &self,
        wu_id: WuId,
        opts: AcquireOptions,
        f: impl FnOnce() -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let lock_id = match self.acquire(wu_id, opts)? {
            Acquired::Yes { lock_id } => lock_id,
            Acquired::No {
                held_by,
                held_since,
            } => {
                return Err(LumenError::LockError {
                    wu_id: wu_id.to_string(),
                    held_by: Some(held_by.to_string()),
                    held_since: Some(held_since),
                }
                .into());
            }
        };
        let result = f();
        let released = self.release(&lock_id);
        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            // The operation's error wins; a failed release is logged
            (Err(e), Err(release_err)) => {
                log::warn!("release after failure also failed: {release_err}");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
        }
    }
}

fn is_stale(info: &LockInfo, stale_after: Duration) -> bool {
    let Ok(created) = chrono::DateTime::parse_from_rfc3339(&info.created_at) else {
        return true;
    };
    let age = chrono::Utc::now().signed_duration_since(created.with_timezone(&chrono::Utc));
    age.to_std().map(|a| a > stale_after).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock() -> (tempfile::TempDir, MergeLock) {
        let dir = tempfile::tempdir().unwrap();
        let lock = MergeLock::new(dir.path().join("merge.lock"));
        (dir, lock)
    }

    fn fast_opts() -> AcquireOptions {
        AcquireOptions {
            wait: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
            stale_after: Duration::from_secs(60),
        }
    }

    #[test]
    fn acquire_release_cycle() {
        let (_dir, lock) = lock();
        let Acquired::Yes { lock_id } = lock.acquire(WuId(5), fast_opts()).unwrap() else {
            panic!("expected acquisition");
        };
        assert!(lock.path().exists());

        let info = lock.read().unwrap();
        assert_eq!(info.wu_id, WuId(5));
        assert_eq!(info.lock_id, lock_id);
        assert!(info.pid > 0);

        lock.release(&lock_id).unwrap();
        assert!(!lock.path().exists());
        // Second release is a no-op
        lock.release(&lock_id).unwrap();
    }

    #[test]
    fn contention_reports_holder() {
        let (_dir, lock) = lock();
        let Acquired::Yes { .. } = lock.acquire(WuId(1), fast_opts()).unwrap() else {
            panic!();
        };
        match lock.acquire(WuId(2), fast_opts()).unwrap() {
            Acquired::No { held_by, .. } => assert_eq!(held_by, WuId(1)),
            Acquired::Yes { .. } => panic!("lock should be held"),
        }
    }

    #[test]
    fn reentry_by_same_wu_returns_existing_id() {
        let (_dir, lock) = lock();
        let Acquired::Yes { lock_id: first } = lock.acquire(WuId(3), fast_opts()).unwrap() else {
            panic!();
        };
        let Acquired::Yes { lock_id: second } = lock.acquire(WuId(3), fast_opts()).unwrap() else {
            panic!("re-entry should succeed");
        };
        assert_eq!(first, second);
    }

    #[test]
    fn stale_lock_reclaimed() {
        let (_dir, lock) = lock();
        // A lock created 90s ago with a 60s staleness threshold
        let old = chrono::Utc::now() - chrono::Duration::seconds(90);
        let info = LockInfo {
            wu_id: WuId(9),
            lock_id: "dead".into(),
            created_at: old.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            pid: 1,
            hostname: "gone".into(),
        };
        std::fs::write(lock.path(), serde_json::to_string(&info).unwrap()).unwrap();

        match lock.acquire(WuId(5), fast_opts()).unwrap() {
            Acquired::Yes { lock_id } => assert_ne!(lock_id, "dead"),
            Acquired::No { .. } => panic!("stale lock should be reclaimed"),
        }
        assert_eq!(lock.read().unwrap().wu_id, WuId(5));
    }

    #[test]
    fn release_with_wrong_id_refused() {
        let (_dir, lock) = lock();
        let Acquired::Yes { lock_id } = lock.acquire(WuId(7), fast_opts()).unwrap() else {
            panic!();
        };
        assert!(lock.release("not-the-id").is_err());
        assert!(lock.path().exists());
        lock.release(&lock_id).unwrap();
    }

    #[test]
    fn with_lock_releases_on_error() {
        let (_dir, lock) = lock();
        let result: anyhow::Result<()> =
            lock.with_lock(WuId(4), fast_opts(), || anyhow::bail!("inner failure"));
        assert!(result.is_err());
        assert!(!lock.path().exists());
    }

    #[test]
    fn wire_format_field_order() {
        let info = LockInfo {
            wu_id: WuId(1503),
            lock_id: "abc".into(),
            created_at: "2024-01-01T00:00:00Z".into(),
            pid: 42,
            hostname: "build-host".into(),
        };
        let json = serde_json::to_string(&info).unwrap();
        assert_eq!(
            json,
            r#"{"wuId":"WU-1503","lockId":"abc","createdAt":"2024-01-01T00:00:00Z","pid":42,"hostname":"build-host"}"#
        );
    }
}
