//! Single-writer lock over an order's refund.
//!
//! Refunds are irreversible external calls and two initiators race for them:
//! a user-driven cancel and the scheduled hold timeout. Both target the same
//! order row, so one compare-and-swap on `refund_in_progress` is enough to
//! serialise them.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::errors::RefundError;
use crate::store::PipelineDb;

/// Result of one acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockAttempt {
    pub acquired: bool,
    /// Order status at the time of the attempt, for diagnostics.
    pub current_status: String,
}

/// Try to take the refund lock. Exactly one concurrent caller sees `acquired: true`.
pub fn acquire(db: &PipelineDb, order_id: i64) -> Result<LockAttempt, RefundError> {
    let acquired = db.try_lock_refund(order_id)?;
    let snapshot = db
        .read_status(order_id)?
        .ok_or(RefundError::NotFound { order_id })?;
    if acquired {
        info!(order_id, status = %snapshot.status, "refund lock acquired");
    } else {
        info!(order_id, status = %snapshot.status, "refund lock busy");
    }
    Ok(LockAttempt {
        acquired,
        current_status: snapshot.status,
    })
}

/// Unconditionally clear the refund flag.
pub fn release(db: &PipelineDb, order_id: i64) -> Result<(), RefundError> {
    db.release_refund(order_id)?;
    info!(order_id, "refund lock released");
    Ok(())
}

/// Holds the refund lock and releases it when dropped.
pub struct RefundGuard<'a> {
    db: &'a PipelineDb,
    order_id: i64,
    released: bool,
}

impl<'a> RefundGuard<'a> {
    /// Acquire the lock, failing with `AlreadyInProgress` if another caller holds it.
    pub fn acquire(db: &'a PipelineDb, order_id: i64) -> Result<Self, RefundError> {
        let attempt = acquire(db, order_id)?;
        if !attempt.acquired {
            return Err(RefundError::AlreadyInProgress {
                order_id,
                status: attempt.current_status,
            });
        }
        Ok(Self {
            db,
            order_id,
            released: false,
        })
    }

    /// Release now and surface any store error, instead of logging it on drop.
    pub fn release(mut self) -> Result<(), RefundError> {
        self.released = true;
        release(self.db, self.order_id)
    }
}

impl Drop for RefundGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = release(self.db, self.order_id) {
            // The stale-lock sweep will clear it.
            warn!(order_id = self.order_id, error = %e, "failed to release refund lock on drop");
        }
    }
}

/// Run `refund` while holding the order's refund lock.
///
/// The lock is released on every exit path: success, error and panic unwind.
pub fn with_refund_lock<T, F>(db: &PipelineDb, order_id: i64, refund: F) -> Result<T, RefundError>
where
    F: FnOnce(&PipelineDb) -> anyhow::Result<T>,
{
    let guard = RefundGuard::acquire(db, order_id)?;
    match refund(db) {
        Ok(value) => {
            guard.release()?;
            Ok(value)
        }
        Err(source) => {
            drop(guard);
            Err(RefundError::RefundFailed { order_id, source })
        }
    }
}

/// Clear refund locks older than `max_age`. Returns the orders that were unwedged.
pub fn sweep_stale_locks(db: &PipelineDb, max_age: Duration) -> Result<Vec<i64>, RefundError> {
    let max_age = chrono::Duration::from_std(max_age)
        .map_err(|e| anyhow::anyhow!("Invalid stale lock age: {}", e))?;
    let cleared = db.release_stale_refund_locks(Utc::now() - max_age)?;
    for order_id in &cleared {
        warn!(order_id, "cleared stale refund lock");
    }
    Ok(cleared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{OrderStatus, update_status};
    use crate::store::DbHandle;
    use anyhow::Result;

    #[test]
    fn second_acquire_fails_until_release() -> Result<()> {
        let db = PipelineDb::new_in_memory()?;
        let id = db.create_order("A")?.id;

        let first = acquire(&db, id)?;
        assert!(first.acquired);
        assert_eq!(first.current_status, "SUBMITTED");

        let second = acquire(&db, id)?;
        assert!(!second.acquired);
        assert_eq!(second.current_status, "SUBMITTED");

        release(&db, id)?;
        assert!(acquire(&db, id)?.acquired);
        Ok(())
    }

    #[test]
    fn acquire_on_missing_order_is_not_found() -> Result<()> {
        let db = PipelineDb::new_in_memory()?;
        assert!(matches!(
            acquire(&db, 5),
            Err(RefundError::NotFound { order_id: 5 })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_acquires_have_exactly_one_winner() -> Result<()> {
        let handle = DbHandle::new(PipelineDb::new_in_memory()?);
        let id = handle.call(|db| db.create_order("B")).await?.id;

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let handle = handle.clone();
                tokio::spawn(async move { handle.call(move |db| acquire(db, id)).await })
            })
            .collect();

        let mut winners = 0;
        for attempt in attempts {
            if attempt.await??.acquired {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        Ok(())
    }

    #[test]
    fn with_refund_lock_releases_after_success() -> Result<()> {
        let db = PipelineDb::new_in_memory()?;
        let id = db.create_order("A")?.id;

        let status = with_refund_lock(&db, id, |db| {
            assert!(db.get_order(id)?.unwrap().refund_in_progress);
            update_status(db, id, OrderStatus::Refunded, "refund-job")?;
            Ok(db.get_order(id)?.unwrap().status)
        })?;
        assert_eq!(status, OrderStatus::Refunded);
        assert!(!db.get_order(id)?.unwrap().refund_in_progress);
        Ok(())
    }

    #[test]
    fn with_refund_lock_releases_after_error() -> Result<()> {
        let db = PipelineDb::new_in_memory()?;
        let id = db.create_order("A")?.id;

        let err = with_refund_lock(&db, id, |_| -> Result<()> { anyhow::bail!("gateway timeout") })
            .unwrap_err();
        assert!(matches!(err, RefundError::RefundFailed { .. }));
        assert!(!db.get_order(id)?.unwrap().refund_in_progress);
        Ok(())
    }

    #[test]
    fn with_refund_lock_releases_after_panic() -> Result<()> {
        let db = PipelineDb::new_in_memory()?;
        let id = db.create_order("A")?.id;

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = with_refund_lock(&db, id, |_| -> Result<()> { panic!("refund client crashed") });
        }));
        assert!(outcome.is_err());
        assert!(!db.get_order(id)?.unwrap().refund_in_progress);
        Ok(())
    }

    #[test]
    fn with_refund_lock_rejects_second_initiator() -> Result<()> {
        let db = PipelineDb::new_in_memory()?;
        let id = db.create_order("A")?.id;

        let _held = RefundGuard::acquire(&db, id)?;
        let err = with_refund_lock(&db, id, |_| Ok(())).unwrap_err();
        assert!(matches!(err, RefundError::AlreadyInProgress { .. }));
        Ok(())
    }

    #[test]
    fn sweep_leaves_fresh_locks_alone() -> Result<()> {
        let db = PipelineDb::new_in_memory()?;
        let id = db.create_order("A")?.id;
        assert!(acquire(&db, id)?.acquired);

        assert!(sweep_stale_locks(&db, Duration::from_secs(900))?.is_empty());
        assert_eq!(sweep_stale_locks(&db, Duration::ZERO)?, vec![id]);
        assert!(acquire(&db, id)?.acquired);
        Ok(())
    }
}
