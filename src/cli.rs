//! Command-line surface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use lumenflow::pipeline::RecoverAction;
use lumenflow::wu::WuId;

fn parse_wu_id(s: &str) -> Result<WuId, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

#[derive(Parser)]
#[command(
    name = "lf",
    version,
    about = "Work-unit orchestration over git worktrees",
    max_term_width = 100
)]
pub struct Cli {
    /// Run as if started in this directory
    #[arg(short = 'C', global = true, value_name = "PATH")]
    pub directory: Option<PathBuf>,

    /// Show debug output (git commands, gate expansion)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Claim a ready work unit and provision its worktree
    Claim {
        #[arg(long, value_parser = parse_wu_id, value_name = "WU-n")]
        id: WuId,
        /// Lane the work unit belongs to (WIP limit 1)
        #[arg(long)]
        lane: String,
        /// Don't publish the lane branch to the remote
        #[arg(long)]
        no_push: bool,
        /// Don't fetch the base ref first; branch from the local ref
        #[arg(long)]
        no_auto: bool,
        /// Override the branch name policy
        #[arg(long)]
        branch: Option<String>,
    },

    /// Run gates and merge a claimed work unit to the trunk
    Done {
        #[arg(long, value_parser = parse_wu_id, value_name = "WU-n")]
        id: WuId,
        /// Bypass the dirty-main guard (audited)
        #[arg(long)]
        force: bool,
        /// Merge locally without pushing
        #[arg(long)]
        no_push: bool,
        /// Permit TODO/FIXME markers in changed files
        #[arg(long)]
        allow_todo: bool,
    },

    /// Show context, claims, and the ready queue
    Status {
        #[arg(long, value_parser = parse_wu_id, value_name = "WU-n")]
        id: Option<WuId>,
        #[arg(long)]
        json: bool,
    },

    /// Resume, reset, or clean up a claimed work unit
    Recover {
        #[arg(long, value_parser = parse_wu_id, value_name = "WU-n")]
        id: WuId,
        #[arg(long, value_enum)]
        action: RecoverAction,
        /// Discard dirty worktrees during reset/cleanup
        #[arg(long)]
        force: bool,
    },

    /// Audit YAML, event store, stamps, and worktrees for drift
    Validate {
        #[arg(long, value_parser = parse_wu_id, value_name = "WU-n")]
        id: Option<WuId>,
        /// Report findings without failing the command
        #[arg(long = "no-strict", action = clap::ArgAction::SetFalse)]
        strict: bool,
    },

    /// Create a new work unit
    Create {
        #[arg(long, value_parser = parse_wu_id, value_name = "WU-n")]
        id: WuId,
        #[arg(long)]
        title: String,
        #[arg(long)]
        lane: String,
        /// feature, bug, documentation, process, tooling, chore, refactor
        #[arg(long = "type", default_value = "feature")]
        wu_type: String,
        /// P0 through P3
        #[arg(long)]
        priority: Option<String>,
        /// Paths this work unit is allowed to touch (repeatable)
        #[arg(long = "code-path")]
        code_paths: Vec<String>,
        #[arg(long)]
        initiative: Option<String>,
        #[arg(long)]
        phase: Option<u32>,
    },

    /// Mark a work unit blocked
    Block {
        #[arg(long, value_parser = parse_wu_id, value_name = "WU-n")]
        id: WuId,
        #[arg(long)]
        reason: String,
    },

    /// Return a blocked work unit to progress
    Unblock {
        #[arg(long, value_parser = parse_wu_id, value_name = "WU-n")]
        id: WuId,
    },

    /// Abandon a claim, returning the work unit to ready
    Release {
        #[arg(long, value_parser = parse_wu_id, value_name = "WU-n")]
        id: WuId,
    },

    /// Record progress without changing status
    Checkpoint {
        #[arg(long, value_parser = parse_wu_id, value_name = "WU-n")]
        id: WuId,
        #[arg(long)]
        progress: Option<String>,
        #[arg(long = "next")]
        next_steps: Option<String>,
    },

    /// Delegate a target work unit to another agent
    Spawn {
        #[arg(long, value_parser = parse_wu_id, value_name = "WU-n")]
        parent: WuId,
        #[arg(long, value_parser = parse_wu_id, value_name = "WU-n")]
        target: WuId,
        #[arg(long)]
        lane: String,
        #[arg(long)]
        intent: Option<String>,
    },

    /// Leave a signal for whoever next claims a work unit or lane
    Signal {
        #[arg(long)]
        message: String,
        #[arg(long, value_parser = parse_wu_id, value_name = "WU-n")]
        wu: Option<WuId>,
        #[arg(long)]
        lane: Option<String>,
    },
}
