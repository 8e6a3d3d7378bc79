//! Validated, optimistic status transitions.
//!
//! A transition is a read of `(status, status_version)` followed by one
//! conditional write that only lands if the version is unchanged (and, for
//! completion, if no blocking checkpoint is pending). Losers get
//! [`StatusError::ConcurrentModification`] and are expected to re-read; this
//! module never retries on its own.

use serde::Serialize;
use tracing::{debug, info};

use super::registry::{self, OrderStatus};
use crate::errors::StatusError;
use crate::store::PipelineDb;

/// What was read before attempting a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub order_id: i64,
    pub status: OrderStatus,
    pub version: i64,
}

/// A transition that has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub order_id: i64,
    pub from: OrderStatus,
    pub to: OrderStatus,
    /// Version the write was conditioned on. The stored version is now one higher.
    pub expected_version: i64,
    pub actor: String,
}

/// Statuses whose entry is gated on the order having no pending blocking checkpoint.
const CHECKPOINT_GATED: [OrderStatus; 1] = [OrderStatus::Completed];

/// Read the current status and version of an order.
pub fn read_snapshot(db: &PipelineDb, order_id: i64) -> Result<Snapshot, StatusError> {
    let raw = db
        .read_status(order_id)?
        .ok_or(StatusError::NotFound { order_id })?;
    // A stored status outside the registry means the row is corrupt.
    let status = raw.status.parse::<OrderStatus>()?;
    Ok(Snapshot {
        order_id,
        status,
        version: raw.version,
    })
}

/// Validate and apply `snapshot.status -> target` conditioned on `snapshot.version`.
pub fn apply_transition(
    db: &PipelineDb,
    snapshot: Snapshot,
    target: OrderStatus,
    actor: &str,
) -> Result<Transition, StatusError> {
    let Snapshot {
        order_id,
        status: current,
        version,
    } = snapshot;

    if current.is_terminal() {
        return Err(StatusError::TerminalState {
            order_id,
            status: current.to_string(),
        });
    }
    if !registry::is_valid_transition(current, target) {
        return Err(StatusError::InvalidTransition {
            from: current.to_string(),
            to: target.to_string(),
        });
    }
    let gated = CHECKPOINT_GATED.contains(&target);
    if gated {
        let pending = db.count_pending_blocking_checkpoints(order_id)?;
        if pending > 0 {
            return Err(StatusError::BlockingCheckpointsPending { order_id, pending });
        }
    }

    // The gate is repeated inside the write, so a checkpoint opened after the
    // count above still blocks it.
    let written = if gated {
        db.compare_and_set_status_unblocked(order_id, version, target)?
    } else {
        db.compare_and_set_status(order_id, version, target)?
    };
    if !written {
        if gated {
            let pending = db.count_pending_blocking_checkpoints(order_id)?;
            if pending > 0 {
                return Err(StatusError::BlockingCheckpointsPending { order_id, pending });
            }
        }
        debug!(order_id, expected_version = version, "status write lost the version race");
        return Err(StatusError::ConcurrentModification {
            order_id,
            expected_version: version,
        });
    }

    info!(
        target: "orderflow::audit",
        order_id,
        from = %current,
        to = %target,
        actor,
        version = version + 1,
        "order status changed"
    );

    Ok(Transition {
        order_id,
        from: current,
        to: target,
        expected_version: version,
        actor: actor.to_string(),
    })
}

/// Move an order to `target`.
///
/// Exactly one row is written on success. Every failure leaves the stored
/// status and version untouched.
pub fn update_status(
    db: &PipelineDb,
    order_id: i64,
    target: OrderStatus,
    actor: &str,
) -> Result<Transition, StatusError> {
    let snapshot = read_snapshot(db, order_id)?;
    apply_transition(db, snapshot, target, actor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;
    use crate::store::CheckpointKind;
    use anyhow::Result;

    fn order_in(db: &PipelineDb, path: &[OrderStatus]) -> Result<i64> {
        let order = db.create_order("B")?;
        for status in path {
            update_status(db, order.id, *status, "test")?;
        }
        Ok(order.id)
    }

    #[test]
    fn applies_legal_transition_and_bumps_version() -> Result<()> {
        let db = PipelineDb::new_in_memory()?;
        let id = order_in(&db, &[])?;

        let t = update_status(&db, id, OrderStatus::Processing, "scheduler")?;
        assert_eq!(t.from, OrderStatus::Submitted);
        assert_eq!(t.to, OrderStatus::Processing);
        assert_eq!(t.expected_version, 0);

        let order = db.get_order(id)?.unwrap();
        assert_eq!(order.status, OrderStatus::Processing);
        assert_eq!(order.status_version, 1);
        Ok(())
    }

    #[test]
    fn every_illegal_pair_is_rejected_without_side_effects() -> Result<()> {
        let db = PipelineDb::new_in_memory()?;
        for from in registry::all_statuses().iter().filter(|s| !s.is_terminal()) {
            for to in registry::all_statuses() {
                if registry::is_valid_transition(*from, *to) {
                    continue;
                }
                let id = db.create_order("B")?.id;
                db.force_raw_status(id, from.as_str())?;
                let before = db.read_status(id)?.unwrap();

                let err = update_status(&db, id, *to, "test").unwrap_err();
                assert!(
                    matches!(err, StatusError::InvalidTransition { .. }),
                    "{from} -> {to}: {err}"
                );
                assert_eq!(db.read_status(id)?.unwrap(), before);
            }
        }
        Ok(())
    }

    #[test]
    fn terminal_statuses_reject_everything() -> Result<()> {
        let db = PipelineDb::new_in_memory()?;
        for terminal in registry::terminal_statuses() {
            let id = db.create_order("A")?.id;
            db.force_raw_status(id, terminal.as_str())?;
            for to in registry::all_statuses() {
                let err = update_status(&db, id, *to, "test").unwrap_err();
                assert!(matches!(err, StatusError::TerminalState { .. }), "{terminal} -> {to}");
            }
        }
        Ok(())
    }

    #[test]
    fn missing_order_is_not_found() -> Result<()> {
        let db = PipelineDb::new_in_memory()?;
        let err = update_status(&db, 404, OrderStatus::Processing, "test").unwrap_err();
        assert!(matches!(err, StatusError::NotFound { order_id: 404 }));
        Ok(())
    }

    #[test]
    fn corrupted_stored_status_is_unknown_status() -> Result<()> {
        let db = PipelineDb::new_in_memory()?;
        let id = order_in(&db, &[])?;
        db.force_raw_status(id, "LIMBO")?;
        let err = update_status(&db, id, OrderStatus::Processing, "test").unwrap_err();
        assert!(matches!(err, StatusError::UnknownStatus(ref s) if s == "LIMBO"));
        Ok(())
    }

    #[test]
    fn stale_snapshot_loses_with_concurrent_modification() -> Result<()> {
        let db = PipelineDb::new_in_memory()?;
        let id = order_in(&db, &[OrderStatus::Processing])?;

        let snapshot = read_snapshot(&db, id)?;
        let first = apply_transition(&db, snapshot, OrderStatus::AwaitingApproval, "worker-1");
        let second = apply_transition(&db, snapshot, OrderStatus::OnHold, "worker-2");

        assert!(first.is_ok());
        let err = second.unwrap_err();
        assert!(matches!(err, StatusError::ConcurrentModification { .. }));
        assert!(err.is_retryable());

        let order = db.get_order(id)?.unwrap();
        assert_eq!(order.status, OrderStatus::AwaitingApproval);
        assert_eq!(order.status_version, snapshot.version + 1);
        Ok(())
    }

    #[test]
    fn two_connections_racing_on_one_file_produce_one_winner() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("orders.db");
        let id = {
            let db = PipelineDb::new(&path)?;
            order_in(&db, &[OrderStatus::Processing])?
        };

        let a = PipelineDb::new(&path)?;
        let b = PipelineDb::new(&path)?;
        let snap_a = read_snapshot(&a, id)?;
        let snap_b = read_snapshot(&b, id)?;
        assert_eq!(snap_a, snap_b);

        let handles = [
            (a, snap_a, OrderStatus::AwaitingApproval),
            (b, snap_b, OrderStatus::Failed),
        ]
        .map(|(db, snap, target)| {
            std::thread::spawn(move || apply_transition(&db, snap, target, "racer").is_ok())
        });
        let wins = handles
            .into_iter()
            .map(|h| h.join().expect("racer thread panicked"))
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);

        let db = PipelineDb::new(&path)?;
        assert_eq!(db.read_status(id)?.unwrap().version, snap_a.version + 1);
        Ok(())
    }

    #[test]
    fn completion_is_gated_on_pending_blocking_checkpoints() -> Result<()> {
        let db = PipelineDb::new_in_memory()?;
        let id = order_in(&db, &[OrderStatus::Processing, OrderStatus::AwaitingApproval])?;
        db.create_checkpoint(id, Phase::X, CheckpointKind::Blocking, None, "Final review")?;
        db.create_checkpoint(id, Phase::X, CheckpointKind::Notification, None, "FYI")?;

        let err = update_status(&db, id, OrderStatus::Completed, "client").unwrap_err();
        assert!(matches!(
            err,
            StatusError::BlockingCheckpointsPending { pending: 1, .. }
        ));
        assert_eq!(db.get_order(id)?.unwrap().status, OrderStatus::AwaitingApproval);
        Ok(())
    }
}
