//! Opening checkpoints and applying responses to them.
//!
//! Every response runs in one transaction: the checkpoint row, the
//! workflow's response log, the order status and the event trail move
//! together or not at all.

use std::str::FromStr;

use serde::Serialize;
use serde_json::json;
use tracing::info;

use super::resume::{HoldReason, ResumeRouter};
use crate::errors::CheckpointError;
use crate::phase::Phase;
use crate::protocol::metrics::queue_alert;
use crate::status::{OrderStatus, apply_transition, read_snapshot};
use crate::store::{Checkpoint, CheckpointKind, CheckpointStatus, PipelineDb, ResponseRecord};
use crate::store::db::now;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointAction {
    Approve,
    RequestChanges,
    ProvideEvidence,
    Dismiss,
    ConfirmReceipt,
}

impl CheckpointAction {
    pub const ALL: [CheckpointAction; 5] = [
        Self::Approve,
        Self::RequestChanges,
        Self::ProvideEvidence,
        Self::Dismiss,
        Self::ConfirmReceipt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::RequestChanges => "request_changes",
            Self::ProvideEvidence => "provide_evidence",
            Self::Dismiss => "dismiss",
            Self::ConfirmReceipt => "confirm_receipt",
        }
    }
}

impl std::fmt::Display for CheckpointAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointAction {
    type Err = CheckpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| CheckpointError::UnknownAction(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResponseOutcome {
    /// A hold was lifted; the pipeline restarts at `phase`.
    Resumed { phase: Phase },
    Approved,
    ChangesRequested,
    Dismissed,
    Completed,
    /// Receipt was already confirmed; nothing was written.
    AlreadyCompleted,
}

#[derive(Debug, Clone, Serialize)]
pub struct HoldOpened {
    pub checkpoint: Checkpoint,
    /// False when an identical hold was already pending and was reused.
    pub created: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CheckpointHandler {
    router: ResumeRouter,
}

impl CheckpointHandler {
    pub fn new(router: ResumeRouter) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &ResumeRouter {
        &self.router
    }

    /// Park the order on a blocking hold at `phase`.
    ///
    /// Records `phase` as the resume point and moves the order to `ON_HOLD`.
    /// A pending hold with the same reason is reused, so replays open nothing new.
    pub fn open_hold(
        &self,
        db: &PipelineDb,
        order_id: i64,
        phase: Phase,
        reason: HoldReason,
        message: &str,
        actor: &str,
    ) -> Result<HoldOpened, CheckpointError> {
        db.in_transaction(|db| {
            if let Some(existing) = db.find_pending_hold(order_id, reason.as_str())? {
                return Ok(HoldOpened {
                    checkpoint: existing,
                    created: false,
                });
            }

            let snapshot = read_snapshot(db, order_id)?;
            let checkpoint = db.create_checkpoint(
                order_id,
                phase,
                CheckpointKind::Blocking,
                Some(reason.as_str()),
                message,
            )?;
            let data = json!({
                "checkpoint_id": checkpoint.id,
                "hold_reason": reason.as_str(),
                "message": message,
            });
            db.set_checkpoint_pending(order_id, Some((phase, &data)))?;
            db.set_resume_phase(order_id, Some(phase))?;
            if snapshot.status != OrderStatus::OnHold {
                apply_transition(db, snapshot, OrderStatus::OnHold, actor)?;
            }
            db.insert_workflow_event(order_id, "hold_opened", Some(&data))?;

            info!(
                target: "orderflow::audit",
                order_id,
                checkpoint_id = checkpoint.id,
                phase = %phase,
                reason = %reason,
                "hold opened"
            );
            Ok(HoldOpened {
                checkpoint,
                created: true,
            })
        })
    }

    /// Open a review or notification checkpoint without changing order status.
    pub fn open_checkpoint(
        &self,
        db: &PipelineDb,
        order_id: i64,
        phase: Phase,
        kind: CheckpointKind,
        message: &str,
    ) -> Result<Checkpoint, CheckpointError> {
        db.in_transaction(|db| {
            read_snapshot(db, order_id)?;
            let checkpoint = db.create_checkpoint(order_id, phase, kind, None, message)?;
            let data = json!({
                "checkpoint_id": checkpoint.id,
                "kind": kind.as_str(),
                "message": message,
            });
            if kind == CheckpointKind::Blocking {
                db.set_checkpoint_pending(order_id, Some((phase, &data)))?;
            }
            db.insert_workflow_event(order_id, "checkpoint_opened", Some(&data))?;
            Ok(checkpoint)
        })
    }

    /// Apply a response to a checkpoint.
    pub fn respond(
        &self,
        db: &PipelineDb,
        checkpoint_id: i64,
        action: CheckpointAction,
        notes: Option<&str>,
        actor: &str,
    ) -> Result<ResponseOutcome, CheckpointError> {
        let checkpoint = db
            .get_checkpoint(checkpoint_id)?
            .ok_or(CheckpointError::NotFound { id: checkpoint_id })?;

        if action == CheckpointAction::ConfirmReceipt {
            return self.confirm_receipt(db, &checkpoint, notes, actor);
        }
        if checkpoint.status.is_resolved() {
            return Err(already_resolved(&checkpoint));
        }

        let is_hold = checkpoint.hold_reason.is_some();
        match (action, checkpoint.kind) {
            (CheckpointAction::Approve, _) if is_hold => {
                self.resolve_hold(db, &checkpoint, action, notes, actor)
            }
            (CheckpointAction::ProvideEvidence, CheckpointKind::Blocking) if is_hold => {
                self.resolve_hold(db, &checkpoint, action, notes, actor)
            }
            (CheckpointAction::Approve, _) => self.approve(db, &checkpoint, notes, actor),
            (CheckpointAction::RequestChanges, CheckpointKind::Blocking) if !is_hold => {
                self.request_changes(db, &checkpoint, notes, actor)
            }
            (CheckpointAction::Dismiss, CheckpointKind::Notification) => {
                self.dismiss(db, &checkpoint, notes, actor)
            }
            _ => Err(CheckpointError::InvalidAction {
                id: checkpoint.id,
                action: action.to_string(),
                kind: checkpoint.kind.to_string(),
            }),
        }
    }

    fn resolve_hold(
        &self,
        db: &PipelineDb,
        checkpoint: &Checkpoint,
        action: CheckpointAction,
        notes: Option<&str>,
        actor: &str,
    ) -> Result<ResponseOutcome, CheckpointError> {
        let order_id = checkpoint.order_id;
        let raw_reason = checkpoint.hold_reason.as_deref().unwrap_or_default();
        // A sentinel reason resumes at the phase this hold was opened in, not
        // at the order-wide resume point, which another hold may have moved.
        let decision = match self.router.resolve_str(raw_reason, Some(checkpoint.phase)) {
            Ok(decision) => decision,
            Err(e) => {
                queue_alert(
                    db,
                    "unknown_hold_reason",
                    &json!({
                        "order_id": order_id,
                        "checkpoint_id": checkpoint.id,
                        "hold_reason": raw_reason,
                    }),
                );
                return Err(e);
            }
        };

        db.in_transaction(|db| {
            mark(
                db,
                checkpoint,
                &[CheckpointStatus::Pending, CheckpointStatus::ChangesRequested],
                CheckpointStatus::Approved,
                notes,
                actor,
            )?;
            append_response(db, checkpoint, action, notes, actor)?;
            db.set_resume_phase(order_id, Some(decision.phase))?;

            if db.count_pending_blocking_checkpoints(order_id)? == 0 {
                db.set_checkpoint_pending(order_id, None)?;
                let snapshot = read_snapshot(db, order_id)?;
                if snapshot.status == OrderStatus::OnHold {
                    apply_transition(db, snapshot, OrderStatus::Processing, actor)?;
                }
            }
            db.insert_workflow_event(
                order_id,
                "hold_resolved",
                Some(&json!({
                    "checkpoint_id": checkpoint.id,
                    "hold_reason": raw_reason,
                    "resume_phase": decision.phase.as_str(),
                })),
            )?;
            Ok::<_, CheckpointError>(())
        })?;

        info!(
            target: "orderflow::audit",
            order_id,
            checkpoint_id = checkpoint.id,
            resume_phase = %decision.phase,
            actor,
            "hold resolved"
        );
        Ok(ResponseOutcome::Resumed {
            phase: decision.phase,
        })
    }

    fn approve(
        &self,
        db: &PipelineDb,
        checkpoint: &Checkpoint,
        notes: Option<&str>,
        actor: &str,
    ) -> Result<ResponseOutcome, CheckpointError> {
        db.in_transaction(|db| {
            mark(
                db,
                checkpoint,
                &[CheckpointStatus::Pending, CheckpointStatus::ChangesRequested],
                CheckpointStatus::Approved,
                notes,
                actor,
            )?;
            append_response(db, checkpoint, CheckpointAction::Approve, notes, actor)?;
            if db.count_pending_blocking_checkpoints(checkpoint.order_id)? == 0 {
                db.set_checkpoint_pending(checkpoint.order_id, None)?;
            }
            db.insert_workflow_event(
                checkpoint.order_id,
                "checkpoint_approved",
                Some(&json!({ "checkpoint_id": checkpoint.id })),
            )?;
            Ok(ResponseOutcome::Approved)
        })
    }

    /// Send the draft back for revision. An order awaiting approval moves to
    /// `REVISION_REQ` in the same transaction.
    fn request_changes(
        &self,
        db: &PipelineDb,
        checkpoint: &Checkpoint,
        notes: Option<&str>,
        actor: &str,
    ) -> Result<ResponseOutcome, CheckpointError> {
        db.in_transaction(|db| {
            mark(
                db,
                checkpoint,
                &[CheckpointStatus::Pending],
                CheckpointStatus::ChangesRequested,
                notes,
                actor,
            )?;
            append_response(db, checkpoint, CheckpointAction::RequestChanges, notes, actor)?;
            if db.count_pending_blocking_checkpoints(checkpoint.order_id)? == 0 {
                db.set_checkpoint_pending(checkpoint.order_id, None)?;
            }
            let snapshot = read_snapshot(db, checkpoint.order_id)?;
            if snapshot.status == OrderStatus::AwaitingApproval {
                apply_transition(db, snapshot, OrderStatus::RevisionReq, actor)?;
            }
            db.insert_workflow_event(
                checkpoint.order_id,
                "changes_requested",
                Some(&json!({ "checkpoint_id": checkpoint.id, "notes": notes })),
            )?;
            Ok(ResponseOutcome::ChangesRequested)
        })
    }

    fn dismiss(
        &self,
        db: &PipelineDb,
        checkpoint: &Checkpoint,
        notes: Option<&str>,
        actor: &str,
    ) -> Result<ResponseOutcome, CheckpointError> {
        db.in_transaction(|db| {
            mark(
                db,
                checkpoint,
                &[CheckpointStatus::Pending],
                CheckpointStatus::Dismissed,
                notes,
                actor,
            )?;
            append_response(db, checkpoint, CheckpointAction::Dismiss, notes, actor)?;
            Ok(ResponseOutcome::Dismissed)
        })
    }

    /// Final delivery confirmation. Completes the workflow and the order.
    ///
    /// Safe to repeat: once the order is `COMPLETED`, further confirmations
    /// return [`ResponseOutcome::AlreadyCompleted`] and write nothing.
    pub fn confirm_receipt(
        &self,
        db: &PipelineDb,
        checkpoint: &Checkpoint,
        notes: Option<&str>,
        actor: &str,
    ) -> Result<ResponseOutcome, CheckpointError> {
        let order_id = checkpoint.order_id;
        if read_snapshot(db, order_id)?.status == OrderStatus::Completed {
            info!(order_id, checkpoint_id = checkpoint.id, "receipt already confirmed");
            return Ok(ResponseOutcome::AlreadyCompleted);
        }
        if checkpoint.kind != CheckpointKind::Blocking {
            return Err(CheckpointError::InvalidAction {
                id: checkpoint.id,
                action: CheckpointAction::ConfirmReceipt.to_string(),
                kind: checkpoint.kind.to_string(),
            });
        }

        db.in_transaction(|db| {
            let marked = db.transition_checkpoint(
                checkpoint.id,
                &[CheckpointStatus::Pending],
                CheckpointStatus::Approved,
                notes,
                actor,
            )?;
            if !marked {
                // Lost to a concurrent confirmation, or the checkpoint was
                // resolved some other way.
                if read_snapshot(db, order_id)?.status == OrderStatus::Completed {
                    return Ok(ResponseOutcome::AlreadyCompleted);
                }
                let current = db
                    .get_checkpoint(checkpoint.id)?
                    .ok_or(CheckpointError::NotFound { id: checkpoint.id })?;
                return Err(already_resolved(&current));
            }

            append_response(db, checkpoint, CheckpointAction::ConfirmReceipt, notes, actor)?;
            db.mark_workflow_completed(order_id)?;
            db.insert_workflow_event(
                order_id,
                "workflow_completed",
                Some(&json!({ "checkpoint_id": checkpoint.id, "actor": actor })),
            )?;
            let snapshot = read_snapshot(db, order_id)?;
            apply_transition(db, snapshot, OrderStatus::Completed, actor)?;
            Ok(ResponseOutcome::Completed)
        })
    }
}

fn already_resolved(checkpoint: &Checkpoint) -> CheckpointError {
    CheckpointError::AlreadyResolved {
        id: checkpoint.id,
        status: checkpoint.status.to_string(),
    }
}

/// Conditionally move the checkpoint; losing the race reports it as resolved.
fn mark(
    db: &PipelineDb,
    checkpoint: &Checkpoint,
    from: &[CheckpointStatus],
    to: CheckpointStatus,
    notes: Option<&str>,
    actor: &str,
) -> Result<(), CheckpointError> {
    if db.transition_checkpoint(checkpoint.id, from, to, notes, actor)? {
        return Ok(());
    }
    let current = db
        .get_checkpoint(checkpoint.id)?
        .ok_or(CheckpointError::NotFound { id: checkpoint.id })?;
    Err(already_resolved(&current))
}

fn append_response(
    db: &PipelineDb,
    checkpoint: &Checkpoint,
    action: CheckpointAction,
    notes: Option<&str>,
    actor: &str,
) -> Result<(), CheckpointError> {
    db.append_checkpoint_response(
        checkpoint.order_id,
        &ResponseRecord {
            checkpoint_id: checkpoint.id,
            action: action.as_str().to_string(),
            notes: notes.map(str::to_string),
            actor: actor.to_string(),
            responded_at: now(),
        },
    )?;
    Ok(())
}
