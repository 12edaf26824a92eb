//! status.md generation.
//!
//! A small dashboard rewritten whenever WU state changes, inside the same
//! snapshot transaction as the rest of the metadata.

use std::path::Path;

use crate::errors::LumenError;
use crate::events::EventStore;
use crate::wu::{WorkUnit, WuStatus};

/// How many completions the "recently done" list shows.
const RECENT_DONE: usize = 10;

pub fn sync(path: &Path, wus: &[WorkUnit], events: &EventStore) -> anyhow::Result<()> {
    let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let mut out = String::new();
    out.push_str("# Status\n\n");
    out.push_str(&format!("_Updated: {now}_\n\n"));

    out.push_str("## In progress\n\n");
    let in_progress: Vec<&WorkUnit> = wus
        .iter()
        .filter(|wu| wu.status == WuStatus::InProgress)
        .collect();
    if in_progress.is_empty() {
        out.push_str("Nothing claimed.\n");
    } else {
        out.push_str("| WU | Title | Lane | Branch |\n|---|---|---|---|\n");
        for wu in in_progress {
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                wu.id,
                wu.title,
                wu.lane,
                wu.claimed_branch.as_deref().unwrap_or("-"),
            ));
        }
    }

    out.push_str("\n## Blocked\n\n");
    let blocked: Vec<&WorkUnit> = wus.iter().filter(|wu| wu.status == WuStatus::Blocked).collect();
    if blocked.is_empty() {
        out.push_str("None.\n");
    } else {
        for wu in blocked {
            out.push_str(&format!("- {} — {}\n", wu.id, wu.title));
        }
    }

    out.push_str("\n## Recently done\n\n");
    let completions: Vec<_> = events
        .read_all()
        .into_iter()
        .filter(|e| e.kind == crate::events::EventKind::Complete)
        .collect();
    if completions.is_empty() {
        out.push_str("None yet.\n");
    } else {
        for event in completions.iter().rev().take(RECENT_DONE) {
            let title = wus
                .iter()
                .find(|wu| wu.id == event.wu_id)
                .map(|wu| wu.title.as_str())
                .unwrap_or("(unknown)");
            out.push_str(&format!("- {} — {} ({})\n", event.wu_id, title, event.timestamp));
        }
    }

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::fs::write(tmp.path(), &out)?;
    tmp.persist(path).map_err(|e| LumenError::Io {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    Ok(())
}
