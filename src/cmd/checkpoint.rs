//! Checkpoint commands: `orderflow checkpoint ...` and `orderflow resume-phase`.

use anyhow::Result;
use console::style;

use orderflow::checkpoint::{CheckpointAction, ResponseOutcome, ResumeRouter};
use orderflow::config::OrderflowConfig;
use orderflow::phase::Phase;
use orderflow::store::{CheckpointKind, CheckpointStatus};

use super::super::CheckpointCommands;
use super::{open_store, print_json};

pub async fn cmd_checkpoint(
    config: &OrderflowConfig,
    command: CheckpointCommands,
    json: bool,
) -> Result<()> {
    let db = open_store(config)?;

    match command {
        CheckpointCommands::List { id } => {
            let checkpoints = db.call(move |db| db.list_checkpoints(id)).await?;
            if json {
                return print_json(&checkpoints);
            }
            if checkpoints.is_empty() {
                println!("No checkpoints for order {}.", id);
                return Ok(());
            }
            println!();
            println!(
                "{:>5}  {:<14} {:<13} {:<18} {:<24} Message",
                "ID", "Phase", "Kind", "Status", "Hold reason"
            );
            for cp in &checkpoints {
                let status = match cp.status {
                    CheckpointStatus::Pending => style(cp.status.as_str()).yellow(),
                    CheckpointStatus::Approved => style(cp.status.as_str()).green(),
                    _ => style(cp.status.as_str()).dim(),
                };
                println!(
                    "{:>5}  {:<14} {:<13} {:<18} {:<24} {}",
                    cp.id,
                    cp.phase,
                    cp.kind,
                    status,
                    cp.hold_reason.as_deref().unwrap_or("-"),
                    cp.message
                );
            }
            println!();
        }
        CheckpointCommands::Open {
            id,
            phase,
            kind,
            message,
        } => {
            let phase: Phase = phase.parse().map_err(anyhow::Error::msg)?;
            let kind: CheckpointKind = kind.parse().map_err(anyhow::Error::msg)?;
            let handler = config.checkpoint_handler()?;
            let checkpoint = db
                .call(move |db| handler.open_checkpoint(db, id, phase, kind, &message))
                .await?;
            if json {
                return print_json(&checkpoint);
            }
            println!(
                "{} Opened {} checkpoint {} for order {} at {} ({})",
                style("✓").green(),
                checkpoint.kind,
                style(checkpoint.id).bold(),
                id,
                checkpoint.phase,
                checkpoint.phase.name()
            );
        }
        CheckpointCommands::Respond {
            checkpoint_id,
            action,
            notes,
            actor,
        } => {
            let action: CheckpointAction = action.parse()?;
            let handler = config.checkpoint_handler()?;
            let outcome = db
                .call(move |db| {
                    handler.respond(db, checkpoint_id, action, notes.as_deref(), &actor)
                })
                .await?;
            if json {
                return print_json(&outcome);
            }
            let summary = match outcome {
                ResponseOutcome::Resumed { phase } => {
                    format!("hold lifted; resuming at {}", phase)
                }
                ResponseOutcome::Approved => "approved".to_string(),
                ResponseOutcome::ChangesRequested => "changes requested".to_string(),
                ResponseOutcome::Dismissed => "dismissed".to_string(),
                ResponseOutcome::Completed => "receipt confirmed; order completed".to_string(),
                ResponseOutcome::AlreadyCompleted => "order already completed".to_string(),
            };
            println!(
                "{} Checkpoint {} {}: {}",
                style("✓").green(),
                checkpoint_id,
                style(action).dim(),
                summary
            );
        }
    }
    Ok(())
}

pub fn cmd_resume_phase(
    config: &OrderflowConfig,
    reason: &str,
    current: Option<&str>,
) -> Result<()> {
    let current = current
        .map(|raw| raw.parse::<Phase>().map_err(anyhow::Error::msg))
        .transpose()?;
    let router = ResumeRouter::new(config.toml.resume_phase()?);
    let decision = router.resolve_str(reason, current)?;

    println!("{}", decision.phase);
    if decision.fell_back {
        eprintln!(
            "{} no current phase given; using default {}",
            style("note:").yellow(),
            router.fallback()
        );
    }
    Ok(())
}
