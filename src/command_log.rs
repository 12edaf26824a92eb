//! Command audit trail.
//!
//! Every external command lumenflow spawns (git calls, gate commands) lands
//! in a per-day JSONL file under `<state_dir>/logs/`, so "what ran, when,
//! under which session, and how did it exit" is answerable after the fact
//! without rerunning with `-v`. One file per UTC day keeps a merge's worth
//! of commands together; `init` prunes files older than the retention
//! window so the directory stays small without any in-band rotation.
//!
//! Entry shape (one JSON object per line):
//!
//! ```json
//! {"ts":"...","session":"s-42","scope":"gate:test","wu":"WU-7","cmd":"cargo test","exit":0,"ms":1201}
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

/// Day files older than this are removed at startup.
const KEEP_DAYS: u64 = 5;

/// Longest command string recorded per entry; the tail is rarely what an
/// audit needs and unbounded lines make the files painful to grep.
const MAX_CMD_CHARS: usize = 1500;

static AUDIT: OnceLock<Mutex<Audit>> = OnceLock::new();

struct Audit {
    dir: PathBuf,
    session: Option<String>,
}

/// Install the audit sink and prune expired day files.
///
/// Call once at startup, after the workspace's state directory is known.
/// Before (or without) `init`, [`record`] silently drops entries - commands
/// run during repository discovery are traced via `log::debug!` only.
pub fn init(log_dir: &Path, session: Option<String>) {
    prune_expired(log_dir);
    let _ = AUDIT.set(Mutex::new(Audit {
        dir: log_dir.to_path_buf(),
        session,
    }));
}

/// Record one external command.
///
/// `scope` names what spawned it (`git:<checkout>`, `gate:test`, `audit`);
/// `wu` ties the entry to a work unit when the caller knows one. `exit` and
/// `elapsed` are `None` when the outcome is unknown (spawn failures,
/// non-command audit notes).
pub fn record(
    scope: &str,
    wu: Option<&str>,
    command: &str,
    exit: Option<i32>,
    elapsed: Option<Duration>,
) {
    let Some(mutex) = AUDIT.get() else { return };
    let Ok(audit) = mutex.lock() else { return };
    write_entry(
        &audit.dir,
        audit.session.as_deref(),
        chrono::Utc::now(),
        scope,
        wu,
        command,
        exit,
        elapsed,
    );
}

#[allow(clippy::too_many_arguments)]
fn write_entry(
    dir: &Path,
    session: Option<&str>,
    now: chrono::DateTime<chrono::Utc>,
    scope: &str,
    wu: Option<&str>,
    command: &str,
    exit: Option<i32>,
    elapsed: Option<Duration>,
) {
    let entry = serde_json::json!({
        "ts": now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "session": session,
        "scope": scope,
        "wu": wu,
        "cmd": clip(command),
        "exit": exit,
        "ms": elapsed.map(|d| d.as_millis() as u64),
    });

    // Auditing must never fail the command it describes
    if std::fs::create_dir_all(dir).is_err() {
        return;
    }
    let path = dir.join(day_file(now.date_naive()));
    let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
    else {
        return;
    };
    let mut line = entry.to_string();
    line.push('\n');
    // One write_all per entry keeps lines whole under concurrent writers
    use std::io::Write;
    let _ = file.write_all(line.as_bytes());
}

fn day_file(day: chrono::NaiveDate) -> String {
    format!("commands-{}.jsonl", day.format("%Y%m%d"))
}

/// Cap an entry's command string at [`MAX_CMD_CHARS`] characters.
fn clip(command: &str) -> String {
    let mut clipped: String = command.chars().take(MAX_CMD_CHARS).collect();
    if clipped.len() < command.len() {
        clipped.push('…');
    }
    clipped
}

/// Remove `commands-YYYYMMDD.jsonl` files past the retention window.
/// Anything else in the directory is left alone.
fn prune_expired(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let cutoff = chrono::Utc::now().date_naive() - chrono::Days::new(KEEP_DAYS);
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(day) = name
            .strip_prefix("commands-")
            .and_then(|rest| rest.strip_suffix(".jsonl"))
        else {
            continue;
        };
        let Ok(parsed) = chrono::NaiveDate::parse_from_str(day, "%Y%m%d") else {
            continue;
        };
        if parsed < cutoff {
            let _ = std::fs::remove_file(entry.path());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(date: &str) -> chrono::DateTime<chrono::Utc> {
        format!("{date}T10:00:00Z").parse().unwrap()
    }

    #[test]
    fn entries_land_in_the_day_file() {
        let dir = tempfile::tempdir().unwrap();
        write_entry(
            dir.path(),
            Some("s-1"),
            ts("2024-06-01"),
            "gate:test",
            Some("WU-7"),
            "cargo test",
            Some(0),
            Some(Duration::from_millis(1201)),
        );
        write_entry(
            dir.path(),
            Some("s-1"),
            ts("2024-06-01"),
            "git:repo",
            None,
            "git fetch origin main",
            Some(1),
            None,
        );

        let text =
            std::fs::read_to_string(dir.path().join("commands-20240601.jsonl")).unwrap();
        let lines: Vec<&str> = text.trim().lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["session"], "s-1");
        assert_eq!(first["scope"], "gate:test");
        assert_eq!(first["wu"], "WU-7");
        assert_eq!(first["cmd"], "cargo test");
        assert_eq!(first["exit"], 0);
        assert_eq!(first["ms"], 1201);

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert!(second["wu"].is_null());
        assert!(second["ms"].is_null());
    }

    #[test]
    fn days_get_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        write_entry(dir.path(), None, ts("2024-06-01"), "git:a", None, "git a", Some(0), None);
        write_entry(dir.path(), None, ts("2024-06-02"), "git:b", None, "git b", Some(0), None);
        assert!(dir.path().join("commands-20240601.jsonl").exists());
        assert!(dir.path().join("commands-20240602.jsonl").exists());
    }

    #[test]
    fn clip_respects_char_boundaries() {
        let long = "é".repeat(MAX_CMD_CHARS + 10);
        let clipped = clip(&long);
        assert_eq!(clipped.chars().count(), MAX_CMD_CHARS + 1);
        assert!(clipped.ends_with('…'));
        assert_eq!(clip("git status"), "git status");
    }

    #[test]
    fn prune_removes_only_expired_day_files() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("commands-20200101.jsonl");
        let foreign = dir.path().join("notes.txt");
        let current = dir
            .path()
            .join(day_file(chrono::Utc::now().date_naive()));
        std::fs::write(&old, "{}\n").unwrap();
        std::fs::write(&foreign, "keep me").unwrap();
        std::fs::write(&current, "{}\n").unwrap();

        prune_expired(dir.path());

        assert!(!old.exists());
        assert!(foreign.exists());
        assert!(current.exists());
    }

    #[test]
    fn record_without_init_is_a_no_op() {
        record("git:x", None, "git status", Some(0), None);
    }
}
