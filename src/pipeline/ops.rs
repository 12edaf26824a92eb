//! Small lifecycle operations: create, block/unblock, release, checkpoint,
//! spawn. Each validates, appends its event under the merge lock, and keeps
//! the YAML and generated docs in step.

use crate::errors::LumenError;
use crate::events::{EventKind, WuEvent};
use crate::lock::AcquireOptions;
use crate::spawn::SpawnEnvelope;
use crate::styling::{self, success_message};
use crate::wu::{Priority, RawWorkUnit, WuId, WuStatus, WuType};

use super::Workspace;

fn validate_or_fail(ws: &Workspace, command: &str, id: Option<&WuId>, lane: Option<&str>) -> anyhow::Result<()> {
    let resolver = ws.resolver();
    let ctx = resolver.resolve(&ws.cwd, id, lane);
    let result = crate::context::validate(command, &ctx);
    if !result.valid {
        return Err(LumenError::Validation {
            command: command.to_string(),
            issues: result.errors,
        }
        .into());
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub id: WuId,
    pub title: String,
    pub lane: String,
    pub wu_type: WuType,
    pub priority: Option<Priority>,
    pub code_paths: Vec<String>,
    pub initiative: Option<String>,
    pub phase: Option<u32>,
}

pub fn run_create(ws: &Workspace, opts: &CreateOptions) -> anyhow::Result<()> {
    validate_or_fail(ws, "wu:create", Some(&opts.id), None)?;

    let store = ws.wu_store();
    if store.exists(&opts.id) {
        return Err(LumenError::Validation {
            command: "wu:create".into(),
            issues: vec![crate::context::ValidationIssue {
                code: crate::errors::ErrorCode::WuAlreadyExists,
                severity: crate::context::Severity::Error,
                message: format!("{} already exists", opts.id),
                fix_command: None,
            }],
        }
        .into());
    }

    // Route through the raw shape so creation applies the same
    // normalization as loading (aliases, priority case, date truncation)
    let raw = RawWorkUnit {
        id: opts.id,
        title: opts.title.clone(),
        lane: opts.lane.clone(),
        wu_type: opts.wu_type.to_string(),
        status: WuStatus::Ready,
        created: chrono::Utc::now().format("%Y-%m-%d").to_string(),
        priority: opts.priority.map(|p| p.to_string()),
        assigned_to: None,
        code_paths: opts.code_paths.clone(),
        acceptance: Vec::new(),
        notes: Vec::new(),
        initiative: opts.initiative.clone(),
        phase: opts.phase.map(crate::wu::IntOrString::Int),
        claimed_branch: None,
        worktree_path: None,
    };
    let wu = raw.normalize(&ws.config.default_domain)?;
    let issues = wu.schema_issues();
    if !issues.is_empty() {
        anyhow::bail!("new work unit is invalid: {}", issues.join("; "));
    }
    store.save(&wu)?;
    ws.sync_metadata(&ws.root, Some(&wu))?;
    styling::eprintln!("{}", success_message(format!("Created {} ({})", wu.id, wu.lane)));
    Ok(())
}

pub fn run_block(ws: &Workspace, id: WuId, reason: &str) -> anyhow::Result<()> {
    validate_or_fail(ws, "wu:block", Some(&id), None)?;
    let store = ws.wu_store();
    let mut wu = store.require(&id)?;
    let lock = ws.merge_lock();
    lock.with_lock(id, AcquireOptions::default(), || {
        ws.append_event(
            &WuEvent::new(EventKind::Block, id)
                .with_lane(&wu.lane)
                .with_reason(reason),
        )?;
        ws.write_status(&ws.root, &mut wu, WuStatus::Blocked)?;
        ws.sync_metadata(&ws.root, Some(&wu))?;
        styling::eprintln!("{}", success_message(format!("{id} blocked: {reason}")));
        Ok(())
    })
}

pub fn run_unblock(ws: &Workspace, id: WuId) -> anyhow::Result<()> {
    validate_or_fail(ws, "wu:unblock", Some(&id), None)?;
    let store = ws.wu_store();
    let mut wu = store.require(&id)?;
    let lock = ws.merge_lock();
    lock.with_lock(id, AcquireOptions::default(), || {
        ws.append_event(&WuEvent::new(EventKind::Unblock, id).with_lane(&wu.lane))?;
        ws.write_status(&ws.root, &mut wu, WuStatus::InProgress)?;
        ws.sync_metadata(&ws.root, Some(&wu))?;
        styling::eprintln!("{}", success_message(format!("{id} back in progress")));
        Ok(())
    })
}

pub fn run_release(ws: &Workspace, id: WuId) -> anyhow::Result<()> {
    validate_or_fail(ws, "wu:release", Some(&id), None)?;
    let store = ws.wu_store();
    let mut wu = store.require(&id)?;
    let lock = ws.merge_lock();
    lock.with_lock(id, AcquireOptions::default(), || {
        ws.append_event(&WuEvent::new(EventKind::Release, id).with_lane(&wu.lane))?;
        wu.claimed_branch = None;
        wu.worktree_path = None;
        ws.write_status(&ws.root, &mut wu, WuStatus::Ready)?;
        ws.sync_metadata(&ws.root, Some(&wu))?;
        styling::eprintln!(
            "{}",
            success_message(format!(
                "{id} released; worktree retained (use 'lf recover --id {id} --action cleanup')"
            ))
        );
        Ok(())
    })
}

#[derive(Debug, Clone)]
pub struct CheckpointOptions {
    pub id: WuId,
    pub progress: Option<String>,
    pub next_steps: Option<String>,
}

pub fn run_checkpoint(ws: &Workspace, opts: &CheckpointOptions) -> anyhow::Result<()> {
    validate_or_fail(ws, "wu:checkpoint", Some(&opts.id), None)?;
    let mut event = WuEvent::new(EventKind::Checkpoint, opts.id);
    if let Some(progress) = &opts.progress {
        event = event.with_progress(progress);
    }
    if let Some(next_steps) = &opts.next_steps {
        event = event.with_next_steps(next_steps);
    }
    ws.append_event(&event)?;
    styling::eprintln!("{}", success_message(format!("Checkpoint recorded for {}", opts.id)));
    Ok(())
}

/// Record a delegation and print the transport envelope for the hand-off.
pub fn run_spawn(
    ws: &Workspace,
    parent: WuId,
    target: WuId,
    lane: &str,
    intent: Option<&str>,
) -> anyhow::Result<String> {
    validate_or_fail(ws, "wu:spawn", Some(&target), Some(lane))?;

    let parent_state = ws.events().project_one(&parent);
    if parent_state.status != WuStatus::InProgress {
        return Err(LumenError::InconsistentState {
            id: parent.to_string(),
            reason: format!(
                "spawning parent must be in_progress (found {})",
                parent_state.status
            ),
        }
        .into());
    }

    let lock = ws.merge_lock();
    lock.with_lock(parent, AcquireOptions::default(), || {
        let mut registry = ws.spawns()?;
        let spawn_id = registry.record(parent, target, lane, intent)?;
        let record = registry
            .get(&spawn_id)
            .expect("record just inserted")
            .clone();
        let envelope = SpawnEnvelope::new(record).serialize()?;
        styling::println!("{envelope}");
        Ok(spawn_id)
    })
}
