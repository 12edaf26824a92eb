//! `lf status` - context, claims, and the ready queue.

use serde::Serialize;

use crate::context::LocationType;
use crate::styling::{self, info_message};
use crate::wu::{WuId, WuStatus};

use super::Workspace;

#[derive(Debug, Clone)]
pub struct StatusOptions {
    pub id: Option<WuId>,
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    location: String,
    branch: Option<String>,
    dirty: bool,
    in_progress: Vec<WuLine>,
    blocked: Vec<WuLine>,
    ready: Vec<WuLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    wu: Option<WuDetail>,
}

#[derive(Debug, Serialize)]
struct WuLine {
    id: String,
    title: String,
    lane: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    priority: Option<String>,
}

#[derive(Debug, Serialize)]
struct WuDetail {
    id: String,
    title: String,
    lane: String,
    yaml_status: String,
    projected_status: String,
    consistent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    inconsistency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    claimed_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    worktree_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_steps: Option<String>,
}

pub fn run_status(ws: &Workspace, opts: &StatusOptions) -> anyhow::Result<()> {
    let resolver = ws.resolver();
    let ctx = resolver.resolve(&ws.cwd, opts.id.as_ref(), None);

    let store = ws.wu_store();
    let all = store.list()?;
    let line = |status: WuStatus| -> Vec<WuLine> {
        all.iter()
            .filter(|wu| wu.status == status)
            .map(|wu| WuLine {
                id: wu.id.to_string(),
                title: wu.title.clone(),
                lane: wu.lane.clone(),
                priority: wu.priority.map(|p| p.to_string()),
            })
            .collect()
    };

    let ready_queue: Vec<WuLine> = store
        .query_ready()?
        .into_iter()
        .map(|wu| WuLine {
            id: wu.id.to_string(),
            title: wu.title.clone(),
            lane: wu.lane.clone(),
            priority: wu.priority.map(|p| p.to_string()),
        })
        .collect();

    let wu_detail = ctx.wu.as_ref().map(|state| WuDetail {
        id: state.yaml.id.to_string(),
        title: state.yaml.title.clone(),
        lane: state.yaml.lane.clone(),
        yaml_status: state.yaml.status.to_string(),
        projected_status: state.projected.status.to_string(),
        consistent: state.is_consistent,
        inconsistency: state.inconsistency_reason.clone(),
        claimed_branch: state.yaml.claimed_branch.clone(),
        worktree_path: state.yaml.worktree_path.clone(),
        progress: state.projected.progress.clone(),
        next_steps: state.projected.next_steps.clone(),
    });

    let report = StatusReport {
        location: ctx.location.location.to_string(),
        branch: ctx.git.branch.clone(),
        dirty: ctx.git.is_dirty,
        in_progress: line(WuStatus::InProgress),
        blocked: line(WuStatus::Blocked),
        ready: ready_queue,
        wu: wu_detail,
    };

    if opts.json {
        styling::println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    styling::println!(
        "{}",
        info_message(format!(
            "Location: {} (branch {}, {})",
            report.location,
            report.branch.as_deref().unwrap_or("none"),
            if report.dirty { "dirty" } else { "clean" }
        ))
    );
    if ctx.location.location == LocationType::Worktree
        && let Some(id) = &ctx.location.worktree_wu_id
    {
        styling::println!("{}", info_message(format!("This worktree belongs to {id}")));
    }

    if let Some(wu) = &report.wu {
        styling::println!("\n{} — {}", wu.id, wu.title);
        styling::println!("  lane:   {}", wu.lane);
        styling::println!("  status: {} (events: {})", wu.yaml_status, wu.projected_status);
        if let Some(reason) = &wu.inconsistency {
            styling::println!("{}", styling::warning_message(reason));
        }
        if let Some(branch) = &wu.claimed_branch {
            styling::println!("  branch: {branch}");
        }
        if let Some(progress) = &wu.progress {
            styling::println!("  progress: {progress}");
        }
        return Ok(());
    }

    print_section("In progress", &report.in_progress);
    print_section("Blocked", &report.blocked);
    print_section("Ready (claim order)", &report.ready);
    Ok(())
}

fn print_section(title: &str, lines: &[WuLine]) {
    styling::println!("\n{title}:");
    if lines.is_empty() {
        styling::println!("  (none)");
    }
    for line in lines {
        match &line.priority {
            Some(p) => styling::println!("  {} [{}] {} ({})", line.id, p, line.title, line.lane),
            None => styling::println!("  {} {} ({})", line.id, line.title, line.lane),
        }
    }
}
