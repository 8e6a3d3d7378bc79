use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::models::*;
use crate::phase::Phase;
use crate::status::OrderStatus;

/// Async-safe handle to the pipeline database.
///
/// Wraps `PipelineDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<PipelineDb>>,
}

impl DbHandle {
    pub fn new(db: PipelineDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R, E>(&self, f: F) -> std::result::Result<R, E>
    where
        F: FnOnce(&PipelineDb) -> std::result::Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: From<anyhow::Error> + Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. For startup and tests only;
    /// never call this from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, PipelineDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

pub(crate) fn now() -> String {
    Utc::now().to_rfc3339()
}

pub struct PipelineDb {
    conn: Connection,
}

impl PipelineDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        Self::open(path, Duration::from_millis(5000))
    }

    /// Open with an explicit busy timeout. Several processes may share one
    /// file; conditional writes rely on SQLite's write lock, not on this handle.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        conn.busy_timeout(busy_timeout)
            .context("Failed to set busy timeout")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS orders (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    status TEXT NOT NULL DEFAULT 'SUBMITTED',
                    status_version INTEGER NOT NULL DEFAULT 0,
                    refund_in_progress INTEGER NOT NULL DEFAULT 0,
                    refund_locked_at TEXT,
                    resume_phase TEXT,
                    tier TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS workflows (
                    order_id INTEGER PRIMARY KEY REFERENCES orders(id),
                    status TEXT NOT NULL DEFAULT 'running',
                    checkpoint_pending TEXT,
                    checkpoint_data TEXT,
                    checkpoint_responses TEXT NOT NULL DEFAULT '[]',
                    max_loops_reached INTEGER NOT NULL DEFAULT 0,
                    revision_loop INTEGER NOT NULL DEFAULT 0,
                    retained_draft_id TEXT,
                    disclosures TEXT NOT NULL DEFAULT '[]',
                    completed_at TEXT
                );

                CREATE TABLE IF NOT EXISTS checkpoints (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    order_id INTEGER NOT NULL REFERENCES orders(id),
                    phase TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    hold_reason TEXT,
                    message TEXT NOT NULL DEFAULT '',
                    response_notes TEXT,
                    created_at TEXT NOT NULL,
                    resolved_at TEXT,
                    resolved_by TEXT
                );

                CREATE TABLE IF NOT EXISTS protocol_results (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    order_id INTEGER NOT NULL REFERENCES orders(id),
                    phase TEXT NOT NULL,
                    protocol_number INTEGER NOT NULL CHECK (protocol_number BETWEEN 1 AND 99),
                    analysis_unit_id TEXT NOT NULL,
                    triggered INTEGER NOT NULL,
                    severity TEXT NOT NULL,
                    action_taken TEXT NOT NULL,
                    disclosure TEXT,
                    evaluator_version TEXT NOT NULL,
                    input_hash TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    UNIQUE(order_id, phase, protocol_number, analysis_unit_id)
                );

                CREATE TABLE IF NOT EXISTS citation_verifications (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    order_id INTEGER NOT NULL REFERENCES orders(id),
                    phase TEXT NOT NULL,
                    citation_id TEXT NOT NULL,
                    passed INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    UNIQUE(order_id, phase, citation_id)
                );

                CREATE TABLE IF NOT EXISTS phase_costs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    order_id INTEGER NOT NULL REFERENCES orders(id),
                    phase TEXT NOT NULL,
                    cost_cents INTEGER NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS workflow_events (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    order_id INTEGER NOT NULL REFERENCES orders(id),
                    event_type TEXT NOT NULL,
                    payload TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS notification_queue (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    alert_type TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_checkpoints_order ON checkpoints(order_id, status);
                CREATE INDEX IF NOT EXISTS idx_protocol_results_order ON protocol_results(order_id);
                CREATE INDEX IF NOT EXISTS idx_citations_order ON citation_verifications(order_id);
                CREATE INDEX IF NOT EXISTS idx_phase_costs_order ON phase_costs(order_id);
                CREATE INDEX IF NOT EXISTS idx_workflow_events_order ON workflow_events(order_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    /// Run `f` inside a transaction, rolling back if it returns an error.
    ///
    /// When a transaction is already open on this connection, `f` joins it
    /// instead of nesting.
    pub fn in_transaction<R, E, F>(&self, f: F) -> std::result::Result<R, E>
    where
        F: FnOnce(&Self) -> std::result::Result<R, E>,
        E: From<anyhow::Error>,
    {
        if !self.conn.is_autocommit() {
            return f(self);
        }
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let out = f(self)?;
        tx.commit().context("Failed to commit transaction")?;
        Ok(out)
    }

    // ── Orders ────────────────────────────────────────────────────────

    /// Intake: create an order in `SUBMITTED` with its workflow row.
    pub fn create_order(&self, tier: &str) -> Result<Order> {
        let id = self.in_transaction(|db| -> Result<i64> {
            let ts = now();
            db.conn
                .execute(
                    "INSERT INTO orders (status, tier, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
                    params![OrderStatus::Submitted.as_str(), tier, ts],
                )
                .context("Failed to insert order")?;
            let id = db.conn.last_insert_rowid();
            db.conn
                .execute("INSERT INTO workflows (order_id) VALUES (?1)", params![id])
                .context("Failed to insert workflow")?;
            Ok(id)
        })?;
        self.get_order(id)?.context("Order not found after insert")
    }

    pub fn get_order(&self, id: i64) -> Result<Option<Order>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, status, status_version, refund_in_progress, refund_locked_at, resume_phase, tier, created_at, updated_at
                 FROM orders WHERE id = ?1",
                params![id],
                |row| {
                    Ok(OrderRow {
                        id: row.get(0)?,
                        status: row.get(1)?,
                        status_version: row.get(2)?,
                        refund_in_progress: row.get(3)?,
                        refund_locked_at: row.get(4)?,
                        resume_phase: row.get(5)?,
                        tier: row.get(6)?,
                        created_at: row.get(7)?,
                        updated_at: row.get(8)?,
                    })
                },
            )
            .optional()
            .context("Failed to query order")?;
        row.map(OrderRow::into_order).transpose()
    }

    pub fn read_status(&self, id: i64) -> Result<Option<StatusSnapshot>> {
        self.conn
            .query_row(
                "SELECT status, status_version FROM orders WHERE id = ?1",
                params![id],
                |row| {
                    Ok(StatusSnapshot {
                        status: row.get(0)?,
                        version: row.get(1)?,
                    })
                },
            )
            .optional()
            .context("Failed to read order status")
    }

    /// Conditional status write. Returns false when `expected_version` is stale.
    /// The version bump happens in the statement itself.
    pub fn compare_and_set_status(
        &self,
        id: i64,
        expected_version: i64,
        status: OrderStatus,
    ) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE orders SET status = ?1, status_version = status_version + 1, updated_at = ?2
                 WHERE id = ?3 AND status_version = ?4",
                params![status.as_str(), now(), id, expected_version],
            )
            .context("Failed to update order status")?;
        Ok(rows == 1)
    }

    /// Like [`compare_and_set_status`](Self::compare_and_set_status), but the
    /// write also requires that the order has no pending blocking checkpoint.
    /// Both conditions are checked by the one statement.
    pub fn compare_and_set_status_unblocked(
        &self,
        id: i64,
        expected_version: i64,
        status: OrderStatus,
    ) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE orders SET status = ?1, status_version = status_version + 1, updated_at = ?2
                 WHERE id = ?3 AND status_version = ?4
                   AND NOT EXISTS (
                       SELECT 1 FROM checkpoints
                       WHERE order_id = ?3 AND kind = 'blocking' AND status = 'pending'
                   )",
                params![status.as_str(), now(), id, expected_version],
            )
            .context("Failed to update order status")?;
        Ok(rows == 1)
    }

    pub fn set_resume_phase(&self, id: i64, phase: Option<Phase>) -> Result<()> {
        self.conn
            .execute(
                "UPDATE orders SET resume_phase = ?1, updated_at = ?2 WHERE id = ?3",
                params![phase.map(|p| p.as_str()), now(), id],
            )
            .context("Failed to set resume phase")?;
        Ok(())
    }

    /// Test hook for simulating a corrupted status column.
    #[cfg(test)]
    pub(crate) fn force_raw_status(&self, id: i64, status: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE orders SET status = ?1 WHERE id = ?2",
                params![status, id],
            )
            .context("Failed to force status")?;
        Ok(())
    }

    /// Test hook for writing an arbitrary tier code.
    #[cfg(test)]
    pub(crate) fn force_raw_tier(&self, id: i64, tier: &str) -> Result<()> {
        self.conn
            .execute("UPDATE orders SET tier = ?1 WHERE id = ?2", params![tier, id])
            .context("Failed to force tier")?;
        Ok(())
    }

    // ── Refund lock ───────────────────────────────────────────────────

    /// Compare-and-swap on `refund_in_progress`. True for exactly one caller.
    pub fn try_lock_refund(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE orders SET refund_in_progress = 1, refund_locked_at = ?1
                 WHERE id = ?2 AND refund_in_progress = 0",
                params![now(), id],
            )
            .context("Failed to acquire refund lock")?;
        Ok(rows == 1)
    }

    pub fn release_refund(&self, id: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE orders SET refund_in_progress = 0, refund_locked_at = NULL WHERE id = ?1",
                params![id],
            )
            .context("Failed to release refund lock")?;
        Ok(())
    }

    /// Clear refund locks taken before `cutoff`. Returns the cleared order ids.
    pub fn release_stale_refund_locks(&self, cutoff: DateTime<Utc>) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, refund_locked_at FROM orders WHERE refund_in_progress = 1 ORDER BY id",
            )
            .context("Failed to prepare stale lock query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?))
            })
            .context("Failed to query refund locks")?;

        let mut stale = Vec::new();
        for row in rows {
            let (id, locked_at) = row.context("Failed to read refund lock row")?;
            let expired = match locked_at {
                Some(ts) => DateTime::parse_from_rfc3339(&ts)
                    .map(|t| t.with_timezone(&Utc) < cutoff)
                    .unwrap_or(true),
                None => true,
            };
            if expired {
                stale.push(id);
            }
        }

        for id in &stale {
            self.release_refund(*id)?;
        }
        Ok(stale)
    }

    // ── Order-wide counters ───────────────────────────────────────────

    /// Record one citation verification outcome. A re-run of the same phase
    /// overwrites the earlier outcome for that citation.
    pub fn record_citation_verification(
        &self,
        order_id: i64,
        phase: Phase,
        citation_id: &str,
        passed: bool,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO citation_verifications (order_id, phase, citation_id, passed, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(order_id, phase, citation_id) DO UPDATE SET passed = excluded.passed",
                params![order_id, phase.as_str(), citation_id, passed, now()],
            )
            .context("Failed to record citation verification")?;
        Ok(())
    }

    pub fn record_phase_cost(&self, order_id: i64, phase: Phase, cost_cents: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO phase_costs (order_id, phase, cost_cents, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![order_id, phase.as_str(), cost_cents, now()],
            )
            .context("Failed to record phase cost")?;
        Ok(())
    }

    /// Totals across every phase of the order.
    pub fn load_order_counters(&self, order_id: i64) -> Result<OrderCounters> {
        let (citation_failures, citations_total) = self
            .conn
            .query_row(
                "SELECT COALESCE(SUM(CASE WHEN passed = 0 THEN 1 ELSE 0 END), 0), COUNT(*)
                 FROM citation_verifications WHERE order_id = ?1",
                params![order_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .context("Failed to count citation verifications")?;
        let cost_spend_cents = self
            .conn
            .query_row(
                "SELECT COALESCE(SUM(cost_cents), 0) FROM phase_costs WHERE order_id = ?1",
                params![order_id],
                |row| row.get::<_, i64>(0),
            )
            .context("Failed to sum phase costs")?;
        Ok(OrderCounters {
            citation_failures,
            citations_total,
            cost_spend_cents,
        })
    }

    // ── Protocol results ──────────────────────────────────────────────

    /// Insert one batch of protocol records in a single transaction.
    /// Duplicate keys are skipped. Returns the number of new rows.
    pub fn insert_protocol_records(&self, records: &[ProtocolRecord]) -> Result<usize> {
        self.in_transaction(|db| -> Result<usize> {
            let mut stmt = db
                .conn
                .prepare_cached(
                    "INSERT INTO protocol_results
                        (order_id, phase, protocol_number, analysis_unit_id, triggered, severity,
                         action_taken, disclosure, evaluator_version, input_hash, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                     ON CONFLICT(order_id, phase, protocol_number, analysis_unit_id) DO NOTHING",
                )
                .context("Failed to prepare protocol insert")?;
            let ts = now();
            let mut inserted = 0;
            for r in records {
                inserted += stmt
                    .execute(params![
                        r.order_id,
                        r.phase,
                        r.protocol_number,
                        r.analysis_unit_id,
                        r.triggered,
                        r.severity,
                        r.action_taken,
                        r.disclosure,
                        r.evaluator_version,
                        r.input_hash,
                        ts,
                    ])
                    .with_context(|| {
                        format!(
                            "Failed to insert protocol {} result for unit {}",
                            r.protocol_number, r.analysis_unit_id
                        )
                    })?;
            }
            Ok(inserted)
        })
    }

    pub fn get_protocol_records(&self, order_id: i64) -> Result<Vec<ProtocolRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT order_id, phase, protocol_number, analysis_unit_id, triggered, severity,
                        action_taken, disclosure, evaluator_version, input_hash
                 FROM protocol_results WHERE order_id = ?1
                 ORDER BY phase, protocol_number, analysis_unit_id",
            )
            .context("Failed to prepare get_protocol_records")?;
        let rows = stmt
            .query_map(params![order_id], |row| {
                Ok(ProtocolRecord {
                    order_id: row.get(0)?,
                    phase: row.get(1)?,
                    protocol_number: row.get(2)?,
                    analysis_unit_id: row.get(3)?,
                    triggered: row.get(4)?,
                    severity: row.get(5)?,
                    action_taken: row.get(6)?,
                    disclosure: row.get(7)?,
                    evaluator_version: row.get(8)?,
                    input_hash: row.get(9)?,
                })
            })
            .context("Failed to query protocol records")?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row.context("Failed to read protocol record row")?);
        }
        Ok(records)
    }

    // ── Checkpoints ───────────────────────────────────────────────────

    pub fn create_checkpoint(
        &self,
        order_id: i64,
        phase: Phase,
        kind: CheckpointKind,
        hold_reason: Option<&str>,
        message: &str,
    ) -> Result<Checkpoint> {
        self.conn
            .execute(
                "INSERT INTO checkpoints (order_id, phase, kind, hold_reason, message, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![order_id, phase.as_str(), kind.as_str(), hold_reason, message, now()],
            )
            .context("Failed to insert checkpoint")?;
        let id = self.conn.last_insert_rowid();
        self.get_checkpoint(id)?
            .context("Checkpoint not found after insert")
    }

    pub fn get_checkpoint(&self, id: i64) -> Result<Option<Checkpoint>> {
        let row = self
            .conn
            .query_row(
                &format!("{CHECKPOINT_SELECT} WHERE id = ?1"),
                params![id],
                CheckpointRow::from_row,
            )
            .optional()
            .context("Failed to query checkpoint")?;
        row.map(CheckpointRow::into_checkpoint).transpose()
    }

    pub fn list_checkpoints(&self, order_id: i64) -> Result<Vec<Checkpoint>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{CHECKPOINT_SELECT} WHERE order_id = ?1 ORDER BY id"))
            .context("Failed to prepare list_checkpoints")?;
        let rows = stmt
            .query_map(params![order_id], CheckpointRow::from_row)
            .context("Failed to query checkpoints")?;
        let mut checkpoints = Vec::new();
        for row in rows {
            let r = row.context("Failed to read checkpoint row")?;
            checkpoints.push(r.into_checkpoint()?);
        }
        Ok(checkpoints)
    }

    pub fn count_pending_blocking_checkpoints(&self, order_id: i64) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM checkpoints WHERE order_id = ?1 AND kind = 'blocking' AND status = 'pending'",
                params![order_id],
                |row| row.get(0),
            )
            .context("Failed to count pending checkpoints")
    }

    /// The open hold for `reason`, if one exists.
    pub fn find_pending_hold(&self, order_id: i64, reason: &str) -> Result<Option<Checkpoint>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "{CHECKPOINT_SELECT} WHERE order_id = ?1 AND kind = 'blocking'
                     AND status = 'pending' AND hold_reason = ?2 ORDER BY id LIMIT 1"
                ),
                params![order_id, reason],
                CheckpointRow::from_row,
            )
            .optional()
            .context("Failed to query pending hold")?;
        row.map(CheckpointRow::into_checkpoint).transpose()
    }

    /// Move a checkpoint to `status` if it is still in one of `from`.
    /// Returns false when another responder got there first.
    pub fn transition_checkpoint(
        &self,
        id: i64,
        from: &[CheckpointStatus],
        status: CheckpointStatus,
        notes: Option<&str>,
        actor: &str,
    ) -> Result<bool> {
        let allowed: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
        let allowed_json = serde_json::to_string(&allowed).context("Failed to encode statuses")?;
        let resolved_at = status.is_resolved().then(now);
        let rows = self
            .conn
            .execute(
                "UPDATE checkpoints
                 SET status = ?1, response_notes = COALESCE(?2, response_notes),
                     resolved_at = ?3, resolved_by = ?4
                 WHERE id = ?5 AND status IN (SELECT value FROM json_each(?6))",
                params![status.as_str(), notes, resolved_at, actor, id, allowed_json],
            )
            .context("Failed to update checkpoint")?;
        Ok(rows == 1)
    }

    // ── Workflows ─────────────────────────────────────────────────────

    pub fn get_workflow(&self, order_id: i64) -> Result<Option<Workflow>> {
        let row = self
            .conn
            .query_row(
                "SELECT order_id, status, checkpoint_pending, checkpoint_data, checkpoint_responses,
                        max_loops_reached, revision_loop, retained_draft_id, disclosures, completed_at
                 FROM workflows WHERE order_id = ?1",
                params![order_id],
                |row| {
                    Ok(WorkflowRow {
                        order_id: row.get(0)?,
                        status: row.get(1)?,
                        checkpoint_pending: row.get(2)?,
                        checkpoint_data: row.get(3)?,
                        checkpoint_responses: row.get(4)?,
                        max_loops_reached: row.get(5)?,
                        revision_loop: row.get(6)?,
                        retained_draft_id: row.get(7)?,
                        disclosures: row.get(8)?,
                        completed_at: row.get(9)?,
                    })
                },
            )
            .optional()
            .context("Failed to query workflow")?;
        row.map(WorkflowRow::into_workflow).transpose()
    }

    /// Park the workflow on a checkpoint, or clear it with `None`.
    pub fn set_checkpoint_pending(
        &self,
        order_id: i64,
        pending: Option<(Phase, &serde_json::Value)>,
    ) -> Result<()> {
        let (phase, data) = match pending {
            Some((phase, data)) => (
                Some(phase.as_str()),
                Some(serde_json::to_string(data).context("Failed to encode checkpoint data")?),
            ),
            None => (None, None),
        };
        self.conn
            .execute(
                "UPDATE workflows SET checkpoint_pending = ?1, checkpoint_data = ?2 WHERE order_id = ?3",
                params![phase, data, order_id],
            )
            .context("Failed to set pending checkpoint")?;
        Ok(())
    }

    pub fn append_checkpoint_response(&self, order_id: i64, record: &ResponseRecord) -> Result<()> {
        let record_json = serde_json::to_string(record).context("Failed to encode response")?;
        self.conn
            .execute(
                "UPDATE workflows SET checkpoint_responses = json_insert(checkpoint_responses, '$[#]', json(?1))
                 WHERE order_id = ?2",
                params![record_json, order_id],
            )
            .context("Failed to append checkpoint response")?;
        Ok(())
    }

    pub fn mark_workflow_completed(&self, order_id: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE workflows SET status = 'completed', completed_at = ?1,
                        checkpoint_pending = NULL, checkpoint_data = NULL
                 WHERE order_id = ?2",
                params![now(), order_id],
            )
            .context("Failed to mark workflow completed")?;
        Ok(())
    }

    /// Record revision-loop exhaustion: the loop count, the draft kept for
    /// downstream phases and the disclosure shown to the reviewer.
    pub fn record_loop_exhaustion(
        &self,
        order_id: i64,
        revision_loop: i64,
        retained_draft_id: Option<&str>,
        disclosure: &str,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE workflows
                 SET max_loops_reached = 1, revision_loop = ?1,
                     retained_draft_id = COALESCE(?2, retained_draft_id),
                     disclosures = CASE
                         WHEN EXISTS (SELECT 1 FROM json_each(disclosures) WHERE value = ?3) THEN disclosures
                         ELSE json_insert(disclosures, '$[#]', ?3)
                     END
                 WHERE order_id = ?4",
                params![revision_loop, retained_draft_id, disclosure, order_id],
            )
            .context("Failed to record loop exhaustion")?;
        Ok(())
    }

    /// Attach a disclosure to the workflow unless the same text is already there.
    pub fn add_disclosure(&self, order_id: i64, disclosure: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE workflows SET disclosures = json_insert(disclosures, '$[#]', ?1)
                 WHERE order_id = ?2
                   AND NOT EXISTS (SELECT 1 FROM json_each(disclosures) WHERE value = ?1)",
                params![disclosure, order_id],
            )
            .context("Failed to add disclosure")?;
        Ok(rows == 1)
    }

    pub fn set_revision_loop(&self, order_id: i64, revision_loop: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE workflows SET revision_loop = ?1 WHERE order_id = ?2",
                params![revision_loop, order_id],
            )
            .context("Failed to set revision loop")?;
        Ok(())
    }

    // ── Events and alerts ─────────────────────────────────────────────

    pub fn insert_workflow_event(
        &self,
        order_id: i64,
        event_type: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<i64> {
        let payload = payload
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to encode event payload")?;
        self.conn
            .execute(
                "INSERT INTO workflow_events (order_id, event_type, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![order_id, event_type, payload, now()],
            )
            .context("Failed to insert workflow event")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_workflow_events(&self, order_id: i64) -> Result<Vec<WorkflowEvent>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, order_id, event_type, payload, created_at
                 FROM workflow_events WHERE order_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare list_workflow_events")?;
        let rows = stmt
            .query_map(params![order_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .context("Failed to query workflow events")?;
        let mut events = Vec::new();
        for row in rows {
            let (id, order_id, event_type, payload, created_at) =
                row.context("Failed to read workflow event row")?;
            let payload = payload
                .map(|p| serde_json::from_str(&p))
                .transpose()
                .context("Failed to parse event payload")?;
            events.push(WorkflowEvent {
                id,
                order_id,
                event_type,
                payload,
                created_at,
            });
        }
        Ok(events)
    }

    pub fn enqueue_alert(&self, alert_type: &str, payload: &serde_json::Value) -> Result<i64> {
        let payload = serde_json::to_string(payload).context("Failed to encode alert payload")?;
        self.conn
            .execute(
                "INSERT INTO notification_queue (alert_type, payload, created_at) VALUES (?1, ?2, ?3)",
                params![alert_type, payload, now()],
            )
            .context("Failed to enqueue alert")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_alerts(&self, limit: i64) -> Result<Vec<QueuedAlert>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, alert_type, payload, created_at FROM notification_queue ORDER BY id LIMIT ?1",
            )
            .context("Failed to prepare list_alerts")?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .context("Failed to query alerts")?;
        let mut alerts = Vec::new();
        for row in rows {
            let (id, alert_type, payload, created_at) = row.context("Failed to read alert row")?;
            alerts.push(QueuedAlert {
                id,
                alert_type,
                payload: serde_json::from_str(&payload).context("Failed to parse alert payload")?,
                created_at,
            });
        }
        Ok(alerts)
    }
}

const CHECKPOINT_SELECT: &str = "SELECT id, order_id, phase, kind, status, hold_reason, message, response_notes, created_at, resolved_at, resolved_by FROM checkpoints";

struct OrderRow {
    id: i64,
    status: String,
    status_version: i64,
    refund_in_progress: bool,
    refund_locked_at: Option<String>,
    resume_phase: Option<String>,
    tier: String,
    created_at: String,
    updated_at: String,
}

impl OrderRow {
    fn into_order(self) -> Result<Order> {
        let status = self
            .status
            .parse::<OrderStatus>()
            .map_err(|e| anyhow::anyhow!("Order {}: {}", self.id, e))?;
        let resume_phase = self
            .resume_phase
            .as_deref()
            .map(str::parse::<Phase>)
            .transpose()
            .map_err(|e| anyhow::anyhow!("Order {}: {}", self.id, e))?;
        Ok(Order {
            id: self.id,
            status,
            status_version: self.status_version,
            refund_in_progress: self.refund_in_progress,
            refund_locked_at: self.refund_locked_at,
            resume_phase,
            tier: self.tier,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct CheckpointRow {
    id: i64,
    order_id: i64,
    phase: String,
    kind: String,
    status: String,
    hold_reason: Option<String>,
    message: String,
    response_notes: Option<String>,
    created_at: String,
    resolved_at: Option<String>,
    resolved_by: Option<String>,
}

impl CheckpointRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            order_id: row.get(1)?,
            phase: row.get(2)?,
            kind: row.get(3)?,
            status: row.get(4)?,
            hold_reason: row.get(5)?,
            message: row.get(6)?,
            response_notes: row.get(7)?,
            created_at: row.get(8)?,
            resolved_at: row.get(9)?,
            resolved_by: row.get(10)?,
        })
    }

    fn into_checkpoint(self) -> Result<Checkpoint> {
        Ok(Checkpoint {
            id: self.id,
            order_id: self.order_id,
            phase: self.phase.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            kind: self.kind.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            status: self.status.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            hold_reason: self.hold_reason,
            message: self.message,
            response_notes: self.response_notes,
            created_at: self.created_at,
            resolved_at: self.resolved_at,
            resolved_by: self.resolved_by,
        })
    }
}

struct WorkflowRow {
    order_id: i64,
    status: String,
    checkpoint_pending: Option<String>,
    checkpoint_data: Option<String>,
    checkpoint_responses: String,
    max_loops_reached: bool,
    revision_loop: i64,
    retained_draft_id: Option<String>,
    disclosures: String,
    completed_at: Option<String>,
}

impl WorkflowRow {
    fn into_workflow(self) -> Result<Workflow> {
        Ok(Workflow {
            order_id: self.order_id,
            status: self.status.parse().map_err(|e: String| anyhow::anyhow!(e))?,
            checkpoint_pending: self.checkpoint_pending,
            checkpoint_data: self
                .checkpoint_data
                .map(|d| serde_json::from_str(&d))
                .transpose()
                .context("Failed to parse checkpoint_data")?,
            checkpoint_responses: serde_json::from_str(&self.checkpoint_responses)
                .context("Failed to parse checkpoint_responses")?,
            max_loops_reached: self.max_loops_reached,
            revision_loop: self.revision_loop,
            retained_draft_id: self.retained_draft_id,
            disclosures: serde_json::from_str(&self.disclosures)
                .context("Failed to parse disclosures")?,
            completed_at: self.completed_at,
        })
    }
}
