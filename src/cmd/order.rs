//! Order commands: `orderflow order ...` and `orderflow sweep-locks`.

use anyhow::{Context, Result};
use console::style;
use serde::Serialize;
use tracing::info;

use orderflow::config::OrderflowConfig;
use orderflow::errors::{RefundError, StatusError};
use orderflow::protocol::Tier;
use orderflow::refund;
use orderflow::status::{OrderStatus, update_status};
use orderflow::store::{Order, Workflow};

use super::super::OrderCommands;
use super::{open_store, print_json};

#[derive(Serialize)]
struct OrderView {
    order: Order,
    workflow: Option<Workflow>,
    pending_blocking_checkpoints: i64,
}

pub async fn cmd_order(config: &OrderflowConfig, command: OrderCommands, json: bool) -> Result<()> {
    let db = open_store(config)?;

    match command {
        OrderCommands::Create { tier } => {
            // Reject unknown tiers at intake rather than at the first protocol run.
            let tier: Tier = tier.parse()?;
            let order = db.call(move |db| db.create_order(tier.as_str())).await?;
            if json {
                return print_json(&order);
            }
            println!(
                "{} Created order {} (tier {}, {})",
                style("✓").green(),
                style(order.id).bold(),
                order.tier,
                order.status
            );
        }
        OrderCommands::Show { id } => {
            let view = db
                .call(move |db| -> Result<Option<OrderView>> {
                    let Some(order) = db.get_order(id)? else {
                        return Ok(None);
                    };
                    Ok(Some(OrderView {
                        workflow: db.get_workflow(id)?,
                        pending_blocking_checkpoints: db.count_pending_blocking_checkpoints(id)?,
                        order,
                    }))
                })
                .await?
                .with_context(|| format!("Order {} not found", id))?;
            if json {
                return print_json(&view);
            }
            print_order(&view);
        }
        OrderCommands::Transition { id, status, actor } => {
            let target: OrderStatus = status.parse()?;
            let result = db
                .call(move |db| update_status(db, id, target, &actor))
                .await;
            match result {
                Ok(t) => {
                    if json {
                        return print_json(&t);
                    }
                    println!(
                        "{} Order {}: {} → {}",
                        style("✓").green(),
                        id,
                        t.from,
                        style(t.to).bold()
                    );
                }
                Err(e @ StatusError::ConcurrentModification { .. }) => {
                    return Err(e).context("Order changed while updating; re-read and retry");
                }
                Err(e) => return Err(e.into()),
            }
        }
        OrderCommands::Refund { id, actor } => {
            let result = db
                .call(move |db| {
                    refund::with_refund_lock(db, id, |db| {
                        let t = update_status(db, id, OrderStatus::Refunded, &actor)?;
                        info!(order_id = id, actor = %actor, "refund recorded");
                        Ok(t)
                    })
                })
                .await;
            match result {
                Ok(t) => {
                    if json {
                        return print_json(&t);
                    }
                    println!("{} Order {} refunded (was {})", style("✓").green(), id, t.from);
                }
                Err(RefundError::AlreadyInProgress { status, .. }) => {
                    println!(
                        "{} Refund already in progress for order {} ({})",
                        style("!").yellow(),
                        id,
                        status
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}

fn print_order(view: &OrderView) {
    let order = &view.order;
    println!();
    println!("Order {}", style(order.id).bold());
    println!("  status          {} (v{})", style(order.status).cyan(), order.status_version);
    println!("  tier            {}", order.tier);
    if let Some(phase) = order.resume_phase {
        println!("  resume phase    {} ({})", phase, phase.name());
    }
    if order.refund_in_progress {
        println!("  refund          {}", style("in progress").yellow());
    }
    println!("  blocking holds  {}", view.pending_blocking_checkpoints);
    if let Some(workflow) = &view.workflow {
        println!("  workflow        {}", workflow.status.as_str());
        if let Some(phase) = &workflow.checkpoint_pending {
            println!("  parked at       {}", phase);
        }
        if workflow.max_loops_reached {
            println!(
                "  revision loops  {} (max reached, retained {})",
                workflow.revision_loop,
                workflow.retained_draft_id.as_deref().unwrap_or("-")
            );
        }
        for disclosure in &workflow.disclosures {
            println!("  {} {}", style("disclosure").dim(), disclosure);
        }
    }
    println!();
}

pub async fn cmd_sweep_locks(config: &OrderflowConfig) -> Result<()> {
    let db = open_store(config)?;
    let max_age = config.stale_lock_age();
    let cleared = db
        .call(move |db| refund::sweep_stale_locks(db, max_age))
        .await?;
    if cleared.is_empty() {
        println!("No stale refund locks.");
    } else {
        println!(
            "{} Released {} stale refund lock(s): {:?}",
            style("✓").green(),
            cleared.len(),
            cleared
        );
    }
    Ok(())
}
