//! backlog.md maintenance.
//!
//! The backlog is a generated view over the WU store: a YAML frontmatter
//! block declares the section headings, and each section lists the WUs in
//! that status. Sync regenerates the sections while preserving the
//! frontmatter and any prose between it and the first section.

use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::errors::LumenError;
use crate::wu::{WorkUnit, WuStatus};

const DEFAULT_FRONTMATTER: &str = "---\nsections:\n  ready: \"## Ready\"\n  in_progress: \"## In Progress\"\n  blocked: \"## Blocked\"\n  done: \"## Done\"\n---\n";

const DEFAULT_PREAMBLE: &str = "\n# Backlog\n\n";

#[derive(Debug, Deserialize)]
struct Frontmatter {
    sections: IndexMap<String, String>,
}

/// Regenerate `backlog.md` from the current WU set.
pub fn sync(path: &Path, wus: &[WorkUnit]) -> anyhow::Result<()> {
    let existing = match std::fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            return Err(LumenError::Io {
                path: path.to_path_buf(),
                detail: e.to_string(),
            }
            .into());
        }
    };

    let (frontmatter_text, preamble, sections) = match existing.as_deref() {
        Some(text) => parse_layout(text)?,
        None => default_layout(),
    };

    let mut out = String::new();
    out.push_str(&frontmatter_text);
    out.push_str(&preamble);

    for (status_key, heading) in &sections {
        let Ok(status) = status_key.parse::<WuStatus>() else {
            log::warn!("backlog frontmatter names unknown status {status_key:?}");
            continue;
        };
        out.push_str(heading);
        out.push('\n');
        let mut any = false;
        for wu in wus.iter().filter(|wu| wu.status == status) {
            out.push_str(&entry_line(wu));
            out.push('\n');
            any = true;
        }
        if !any {
            out.push_str("- (none)\n");
        }
        out.push('\n');
    }

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::fs::write(tmp.path(), out.trim_end().to_string() + "\n")?;
    tmp.persist(path).map_err(|e| LumenError::Io {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    Ok(())
}

fn entry_line(wu: &WorkUnit) -> String {
    match wu.priority {
        Some(p) => format!("- {} — {} ({}, {})", wu.id, wu.title, wu.lane, p),
        None => format!("- {} — {} ({})", wu.id, wu.title, wu.lane),
    }
}

fn default_layout() -> (String, String, IndexMap<String, String>) {
    let fm: Frontmatter = serde_yaml::from_str(
        DEFAULT_FRONTMATTER
            .trim_start_matches("---\n")
            .trim_end_matches("---\n"),
    )
    .expect("static frontmatter");
    (
        DEFAULT_FRONTMATTER.to_string(),
        DEFAULT_PREAMBLE.to_string(),
        fm.sections,
    )
}

/// Split an existing backlog into (frontmatter, preamble, sections).
fn parse_layout(text: &str) -> anyhow::Result<(String, String, IndexMap<String, String>)> {
    let Some(rest) = text.strip_prefix("---\n") else {
        // No frontmatter: treat the whole file as replaceable and start over
        return Ok(default_layout());
    };
    let Some(end) = rest.find("\n---\n") else {
        return Ok(default_layout());
    };
    let yaml = &rest[..end];
    let body = &rest[end + "\n---\n".len()..];
    let frontmatter: Frontmatter = serde_yaml::from_str(yaml)
        .map_err(|e| anyhow::anyhow!("backlog frontmatter invalid: {e}"))?;

    // Preamble: body up to the first declared section heading
    let first_heading_pos = frontmatter
        .sections
        .values()
        .filter_map(|h| body.find(h.as_str()))
        .min()
        .unwrap_or(body.len());
    let preamble = &body[..first_heading_pos];

    Ok((
        format!("---\n{}\n---\n", yaml.trim_end()),
        preamble.to_string(),
        frontmatter.sections,
    ))
}
