//! Protocol commands: `orderflow protocol ...` and `orderflow alerts`.

use anyhow::Result;
use console::style;

use orderflow::config::OrderflowConfig;
use orderflow::errors::ProtocolError;
use orderflow::phase::Phase;
use orderflow::protocol::{DispatchOutcome, Grade, LoopDecision, RevisionLoopState};

use super::super::ProtocolCommands;
use super::{open_store, print_json};

fn parse_phase(raw: &str) -> Result<Phase> {
    raw.parse::<Phase>().map_err(anyhow::Error::msg)
}

pub async fn cmd_protocol(
    config: &OrderflowConfig,
    command: ProtocolCommands,
    json: bool,
) -> Result<()> {
    let db = open_store(config)?;
    let dispatcher = config.dispatcher()?;

    match command {
        ProtocolCommands::Citations {
            id,
            phase,
            failed,
            passed,
        } => {
            let phase = parse_phase(&phase)?;
            let outcome = db
                .call(move |db| -> Result<DispatchOutcome, ProtocolError> {
                    db.in_transaction(|db| -> Result<(), ProtocolError> {
                        for citation in &failed {
                            db.record_citation_verification(id, phase, citation, false)?;
                        }
                        for citation in &passed {
                            db.record_citation_verification(id, phase, citation, true)?;
                        }
                        Ok(())
                    })?;
                    dispatcher.dispatch_order_gates(db, id, phase)
                })
                .await?;
            report(&outcome, json)?;
        }
        ProtocolCommands::Cost { id, phase, cents } => {
            let phase = parse_phase(&phase)?;
            let outcome = db
                .call(move |db| -> Result<DispatchOutcome, ProtocolError> {
                    db.record_phase_cost(id, phase, cents)?;
                    dispatcher.dispatch_order_gates(db, id, phase)
                })
                .await?;
            report(&outcome, json)?;
        }
        ProtocolCommands::Loop {
            id,
            phase,
            loops,
            grade,
            draft,
        } => {
            let phase = parse_phase(&phase)?;
            let state = RevisionLoopState {
                loop_count: loops,
                latest_grade: grade.parse::<Grade>()?,
                best_draft_id: draft,
            };
            let outcome = db
                .call(move |db| dispatcher.dispatch_revision_loop(db, id, phase, &state))
                .await?;
            if json {
                return print_json(&outcome);
            }
            let label = match outcome.decision {
                LoopDecision::Passed => style("passed").green(),
                LoopDecision::ReviseAgain => style("revise again").yellow(),
                LoopDecision::Exhausted => style("exhausted").red(),
            };
            println!("Order {} revision loop {}: {}", id, loops, label);
            if let Some(note) = &outcome.result.note {
                println!("  {} {}", style("disclosure").dim(), note);
            }
        }
        ProtocolCommands::Results { id } => {
            let records = db.call(move |db| db.get_protocol_records(id)).await?;
            if json {
                return print_json(&records);
            }
            if records.is_empty() {
                println!("No protocol results for order {}.", id);
                return Ok(());
            }
            println!();
            println!(
                "{:<14} {:<9} {:<12} {:<10} {:<26} Hash",
                "Phase", "Protocol", "Unit", "Severity", "Action"
            );
            for r in &records {
                let severity = if r.triggered {
                    style(r.severity.clone()).red()
                } else {
                    style("CLEAN".to_string()).green()
                };
                println!(
                    "{:<14} {:<9} {:<12} {:<10} {:<26} {}",
                    r.phase,
                    r.protocol_number,
                    r.analysis_unit_id,
                    severity,
                    r.action_taken,
                    &r.input_hash[..12.min(r.input_hash.len())]
                );
            }
            println!();
        }
    }
    Ok(())
}

fn report(outcome: &DispatchOutcome, json: bool) -> Result<()> {
    if json {
        return print_json(outcome);
    }
    println!();
    println!(
        "Order {} protocols after {}",
        style(outcome.order_id).bold(),
        outcome.phase
    );
    for r in &outcome.results {
        let mark = if r.triggered {
            style(r.severity.as_str()).red()
        } else {
            style("CLEAN").green()
        };
        println!(
            "  protocol {:<3} {:<9} {} / {}",
            r.protocol_number, mark, r.observed, r.threshold
        );
    }
    for hold in &outcome.holds {
        println!(
            "  {} checkpoint {} ({})",
            style("HOLD").red().bold(),
            hold.checkpoint.id,
            hold.checkpoint.hold_reason.as_deref().unwrap_or("-")
        );
    }
    if outcome.escalated {
        println!("  {} admin alerted", style("ESCALATED").red());
    }
    for note in &outcome.disclosures {
        println!("  {} {}", style("disclosure").dim(), note);
    }
    println!();
    Ok(())
}

pub async fn cmd_alerts(config: &OrderflowConfig, limit: i64, json: bool) -> Result<()> {
    let db = open_store(config)?;
    let alerts = db.call(move |db| db.list_alerts(limit)).await?;
    if json {
        return print_json(&alerts);
    }
    if alerts.is_empty() {
        println!("No queued alerts.");
        return Ok(());
    }
    for alert in &alerts {
        println!(
            "{:>5}  {:<22} {}  {}",
            alert.id,
            style(&alert.alert_type).yellow(),
            style(&alert.created_at).dim(),
            alert.payload
        );
    }
    Ok(())
}
