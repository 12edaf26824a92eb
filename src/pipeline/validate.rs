//! `lf validate` - workspace audit: YAML schema, event drift, lane limits,
//! stamps, and orphaned worktrees.

use std::collections::HashMap;

use crate::errors::LumenError;
use crate::styling::{self, info_message, success_message, warning_message};
use crate::wu::{WuId, WuStatus};

use super::Workspace;

#[derive(Debug, Clone)]
pub struct ValidateOptions {
    pub id: Option<WuId>,
    /// With strict off, findings are reported but exit stays 0.
    pub strict: bool,
}

pub fn run_validate(ws: &Workspace, opts: &ValidateOptions) -> anyhow::Result<()> {
    let store = ws.wu_store();
    let projections = ws.events().replay();
    let mut findings: Vec<String> = Vec::new();

    let wus = match &opts.id {
        Some(id) => vec![store.require(id)?],
        None => store.list()?,
    };

    // Per-WU checks
    for wu in &wus {
        for issue in wu.schema_issues() {
            findings.push(format!("{}: {issue}", wu.id));
        }

        let projected = projections.get(&wu.id).cloned().unwrap_or_default();
        if let Some(reason) = crate::events::detect_inconsistency(wu.status, &projected) {
            findings.push(format!("{}: {reason}", wu.id));
        }

        // A stamp means merged; the YAML must agree
        let stamped = ws.config.stamp_path(&ws.root, &wu.id).is_file();
        if stamped && !wu.status.is_terminal() {
            findings.push(format!(
                "{}: stamp file present but status is {}",
                wu.id, wu.status
            ));
        }
        if wu.status == WuStatus::Done && !stamped {
            findings.push(format!("{}: done without a stamp file", wu.id));
        }

        // Claimed WUs should have their recorded worktree
        if wu.status == WuStatus::InProgress {
            let path = ws.manager().path_for(wu);
            if !path.is_dir() {
                findings.push(format!(
                    "{}: in_progress but worktree missing (lf recover --id {} --action resume)",
                    wu.id, wu.id
                ));
            }
        }
    }

    // Lane WIP limit across the whole store (skipped for single-WU runs)
    if opts.id.is_none() {
        let mut lanes: HashMap<&str, Vec<WuId>> = HashMap::new();
        for wu in &wus {
            if wu.status == WuStatus::InProgress {
                lanes.entry(wu.lane.as_str()).or_default().push(wu.id);
            }
        }
        for (lane, ids) in lanes {
            if ids.len() > 1 {
                let list: Vec<String> = ids.iter().map(WuId::to_string).collect();
                findings.push(format!(
                    "lane {lane:?} has {} WUs in progress: {}",
                    ids.len(),
                    list.join(", ")
                ));
            }
        }

        // Worktree directories nobody claims
        let worktrees_dir = ws.config.worktrees_dir_abs(&ws.root);
        if let Ok(entries) = std::fs::read_dir(&worktrees_dir) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                let Some(id) = WuId::extract(&name) else {
                    findings.push(format!("worktree {name:?} has no recognizable WU id"));
                    continue;
                };
                let active = wus
                    .iter()
                    .any(|wu| wu.id == id && wu.status == WuStatus::InProgress);
                if !active {
                    findings.push(format!(
                        "worktree {name:?} belongs to {id} which is not in progress"
                    ));
                }
            }
        }
    }

    if findings.is_empty() {
        styling::eprintln!(
            "{}",
            success_message(format!("{} work unit(s) consistent", wus.len()))
        );
        return Ok(());
    }

    for finding in &findings {
        styling::eprintln!("{}", warning_message(finding));
    }
    if !opts.strict {
        styling::eprintln!(
            "{}",
            info_message(format!("{} finding(s); non-strict mode", findings.len()))
        );
        return Ok(());
    }
    Err(LumenError::InconsistentState {
        id: opts
            .id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "workspace".into()),
        reason: format!("{} finding(s)", findings.len()),
    }
    .into())
}
