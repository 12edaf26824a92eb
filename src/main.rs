use std::process;

use clap::Parser;

use lumenflow::pipeline::{
    CheckpointOptions, ClaimOptions, CreateOptions, DoneOptions, RecoverOptions, StatusOptions,
    ValidateOptions, Workspace, run_block, run_checkpoint, run_claim, run_create, run_done,
    run_recover, run_release, run_spawn, run_status, run_unblock, run_validate,
};
use lumenflow::signals::Signal;
use lumenflow::styling::eprintln;
use lumenflow::wu::{Priority, WuType};
use lumenflow::{command_log, exit_code, interrupt};

mod cli;

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();

    interrupt::install();

    // Debug output via --verbose or RUST_LOG
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "off" }),
    )
    .format(|buf, record| {
        use anstyle::Style;
        use std::io::Write;
        let dim = Style::new().dimmed();
        let msg = record.args().to_string();
        if let Some(rest) = msg.strip_prefix("$ ") {
            let bold = Style::new().bold();
            writeln!(buf, "{dim}${dim:#} {bold}{rest}{bold:#}")
        } else {
            writeln!(buf, "{dim}{msg}{dim:#}")
        }
    })
    .init();

    let cwd = cli
        .directory
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| ".".into()));

    let result = run(&cli, cwd);

    if let Err(e) = result {
        eprintln!("{e}");
        for cause in e.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
        process::exit(exit_code(&e));
    }
}

fn run(cli: &Cli, cwd: std::path::PathBuf) -> anyhow::Result<()> {
    let ws = Workspace::discover(cwd)?;
    command_log::init(
        &ws.config.command_log_dir(&ws.root),
        std::env::var("LUMENFLOW_SESSION").ok(),
    );
    // First audit entry per run records what the operator actually invoked
    command_log::record("invocation", None, &invocation_summary(), None, None);

    match &cli.command {
        Commands::Claim {
            id,
            lane,
            no_push,
            no_auto,
            branch,
        } => {
            run_claim(
                &ws,
                &ClaimOptions {
                    id: *id,
                    lane: lane.clone(),
                    no_push: *no_push,
                    no_auto: *no_auto,
                    branch: branch.clone(),
                },
            )?;
            Ok(())
        }
        Commands::Done {
            id,
            force,
            no_push,
            allow_todo,
        } => {
            run_done(
                &ws,
                &DoneOptions {
                    id: *id,
                    force: *force,
                    no_push: *no_push,
                    allow_todo: *allow_todo,
                },
            )?;
            Ok(())
        }
        Commands::Status { id, json } => run_status(
            &ws,
            &StatusOptions {
                id: *id,
                json: *json,
            },
        ),
        Commands::Recover { id, action, force } => run_recover(
            &ws,
            &RecoverOptions {
                id: *id,
                action: *action,
                force: *force,
            },
        ),
        Commands::Validate { id, strict } => run_validate(
            &ws,
            &ValidateOptions {
                id: *id,
                strict: *strict,
            },
        ),
        Commands::Create {
            id,
            title,
            lane,
            wu_type,
            priority,
            code_paths,
            initiative,
            phase,
        } => {
            let wu_type = WuType::from_alias(wu_type)
                .ok_or_else(|| anyhow::anyhow!("unknown work unit type {wu_type:?}"))?;
            let priority = priority
                .as_deref()
                .map(|p| {
                    p.to_ascii_uppercase()
                        .parse::<Priority>()
                        .map_err(|_| anyhow::anyhow!("unknown priority {p:?}"))
                })
                .transpose()?;
            run_create(
                &ws,
                &CreateOptions {
                    id: *id,
                    title: title.clone(),
                    lane: lane.clone(),
                    wu_type,
                    priority,
                    code_paths: code_paths.clone(),
                    initiative: initiative.clone(),
                    phase: *phase,
                },
            )
        }
        Commands::Block { id, reason } => run_block(&ws, *id, reason),
        Commands::Unblock { id } => run_unblock(&ws, *id),
        Commands::Release { id } => run_release(&ws, *id),
        Commands::Checkpoint {
            id,
            progress,
            next_steps,
        } => run_checkpoint(
            &ws,
            &CheckpointOptions {
                id: *id,
                progress: progress.clone(),
                next_steps: next_steps.clone(),
            },
        ),
        Commands::Spawn {
            parent,
            target,
            lane,
            intent,
        } => {
            run_spawn(&ws, *parent, *target, lane, intent.as_deref())?;
            Ok(())
        }
        Commands::Signal { message, wu, lane } => {
            let mut signal = Signal::local(message);
            if let Some(id) = wu {
                signal = signal.for_wu(*id);
            }
            if let Some(lane) = lane {
                signal = signal.for_lane(lane);
            }
            ws.signal_store().append(&signal)?;
            eprintln!(
                "{}",
                lumenflow::styling::success_message(format!("Signal {} recorded", signal.id))
            );
            Ok(())
        }
    }
}

fn invocation_summary() -> String {
    std::env::args().collect::<Vec<_>>().join(" ")
}
