//! Evaluate, persist, count and act.
//!
//! A dispatch is safe to replay: results are keyed on their analysis unit,
//! holds reuse a pending checkpoint with the same reason and disclosures are
//! deduplicated. Alerts are the one best-effort side effect.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

use super::evaluators::{Evaluators, LoopDecision, RevisionLoopState};
use super::metrics::ProtocolMetrics;
use super::persistence::{DEFAULT_BATCH_SIZE, PersistSummary, persist};
use super::tier::Tier;
use super::{ProtocolAction, ProtocolResult};
use crate::checkpoint::{CheckpointHandler, HoldOpened};
use crate::errors::ProtocolError;
use crate::phase::Phase;
use crate::store::PipelineDb;

/// Actor recorded on status changes the dispatcher makes.
pub const DISPATCH_ACTOR: &str = "protocol-dispatcher";

#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub order_id: i64,
    pub phase: Phase,
    pub results: Vec<ProtocolResult>,
    pub persisted: PersistSummary,
    pub holds: Vec<HoldOpened>,
    pub escalated: bool,
    pub disclosures: Vec<String>,
}

impl DispatchOutcome {
    pub fn held(&self) -> bool {
        !self.holds.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoopOutcome {
    pub order_id: i64,
    pub phase: Phase,
    pub decision: LoopDecision,
    pub result: ProtocolResult,
    pub persisted: PersistSummary,
    pub retained_draft_id: Option<String>,
}

#[derive(Clone)]
pub struct ProtocolDispatcher {
    evaluators: Evaluators,
    handler: CheckpointHandler,
    batch_size: usize,
    metrics: Arc<ProtocolMetrics>,
}

impl Default for ProtocolDispatcher {
    fn default() -> Self {
        Self::new(Evaluators::default(), CheckpointHandler::default(), DEFAULT_BATCH_SIZE)
    }
}

impl ProtocolDispatcher {
    pub fn new(evaluators: Evaluators, handler: CheckpointHandler, batch_size: usize) -> Self {
        Self {
            evaluators,
            handler,
            batch_size,
            metrics: Arc::new(ProtocolMetrics::new()),
        }
    }

    /// Share a metrics sink with other dispatchers.
    pub fn with_metrics(mut self, metrics: Arc<ProtocolMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<ProtocolMetrics> {
        &self.metrics
    }

    /// Load the order's tier. An unknown tier alerts an admin and fails the dispatch.
    fn order_tier(&self, db: &PipelineDb, order_id: i64) -> Result<Tier, ProtocolError> {
        let order = db
            .get_order(order_id)?
            .ok_or(ProtocolError::OrderNotFound { order_id })?;
        order.tier.parse::<Tier>().inspect_err(|e| {
            error!(order_id, tier = %order.tier, error = %e, "order has no threshold table");
            self.metrics.alert(
                db,
                "unknown_tier",
                json!({ "order_id": order_id, "tier": order.tier }),
            );
        })
    }

    /// Run the order-wide citation and cost protocols after `phase`.
    ///
    /// Counters span every phase of the order, so failures recorded in an
    /// earlier phase still count here. Results are keyed on the counter
    /// totals, so a later dispatch in the same phase with new signals is
    /// recorded alongside the earlier one.
    pub fn dispatch_order_gates(
        &self,
        db: &PipelineDb,
        order_id: i64,
        phase: Phase,
    ) -> Result<DispatchOutcome, ProtocolError> {
        let started = Instant::now();
        let tier = self.order_tier(db, order_id)?;
        let counters = db.load_order_counters(order_id)?;

        let results = vec![
            self.evaluators.citation_failures(&counters, tier),
            self.evaluators.cost_cap(&counters, tier),
        ];
        let unit = counters.analysis_unit();
        let persisted = persist(db, order_id, phase, &results, &unit, self.batch_size)?;
        for result in &results {
            self.metrics.record_result(result);
        }

        let mut outcome = DispatchOutcome {
            order_id,
            phase,
            results,
            persisted,
            holds: Vec::new(),
            escalated: false,
            disclosures: Vec::new(),
        };
        self.act(db, &mut outcome)?;
        self.metrics.record_dispatch_latency(started.elapsed());

        info!(
            order_id,
            phase = %phase,
            tier = %tier,
            failures = counters.citation_failures,
            spend_cents = counters.cost_spend_cents,
            held = outcome.held(),
            escalated = outcome.escalated,
            "order protocols dispatched"
        );
        Ok(outcome)
    }

    fn act(&self, db: &PipelineDb, outcome: &mut DispatchOutcome) -> Result<(), ProtocolError> {
        let (order_id, phase) = (outcome.order_id, outcome.phase);
        let triggered: Vec<ProtocolResult> =
            outcome.results.iter().filter(|r| r.triggered).cloned().collect();

        for result in &triggered {
            if let ProtocolAction::ContinueWithDisclosure = result.action {
                if let Some(note) = &result.note {
                    db.add_disclosure(order_id, note)?;
                    self.metrics.record_disclosure();
                    outcome.disclosures.push(note.clone());
                }
                continue;
            }
            let Some(reason) = result.action.hold_reason() else {
                continue;
            };

            let message = result.note.as_deref().unwrap_or(reason.as_str());
            let hold = self
                .handler
                .open_hold(db, order_id, phase, reason, message, DISPATCH_ACTOR)?;
            if hold.created {
                self.metrics.record_hold();
            }

            // Only alert once the hold is in place.
            if let ProtocolAction::Escalate(_) = result.action {
                self.metrics.alert(
                    db,
                    "protocol_escalation",
                    json!({
                        "order_id": order_id,
                        "phase": phase.as_str(),
                        "protocol_number": result.protocol_number,
                        "hold_reason": reason.as_str(),
                        "checkpoint_id": hold.checkpoint.id,
                        "observed": result.observed,
                        "threshold": result.threshold,
                    }),
                );
                self.metrics.record_escalation();
                outcome.escalated = true;
            }
            outcome.holds.push(hold);
        }
        Ok(())
    }

    /// Record one revision iteration and decide whether the loop continues.
    ///
    /// Each iteration is its own analysis unit, so the clean results of early
    /// iterations do not mask the exhaustion result of the last one.
    pub fn dispatch_revision_loop(
        &self,
        db: &PipelineDb,
        order_id: i64,
        phase: Phase,
        state: &RevisionLoopState,
    ) -> Result<LoopOutcome, ProtocolError> {
        let started = Instant::now();
        let tier = self.order_tier(db, order_id)?;
        let evaluation = self.evaluators.loop_exhaustion(state, tier);

        let unit = format!("loop-{}", state.loop_count);
        let persisted = persist(
            db,
            order_id,
            phase,
            std::slice::from_ref(&evaluation.result),
            &unit,
            self.batch_size,
        )?;
        self.metrics.record_result(&evaluation.result);

        db.in_transaction(|db| -> Result<(), ProtocolError> {
            db.set_revision_loop(order_id, i64::from(state.loop_count))?;
            if let Some(disclosure) = evaluation.disclosure() {
                db.record_loop_exhaustion(
                    order_id,
                    i64::from(state.loop_count),
                    evaluation.retained_draft_id.as_deref(),
                    disclosure,
                )?;
            }
            Ok(())
        })?;
        if evaluation.max_loops_reached {
            self.metrics.record_disclosure();
            info!(
                order_id,
                phase = %phase,
                loops = state.loop_count,
                grade = %state.latest_grade,
                retained_draft = evaluation.retained_draft_id.as_deref().unwrap_or("-"),
                "revision loop exhausted; continuing with disclosure"
            );
        }
        self.metrics.record_dispatch_latency(started.elapsed());

        Ok(LoopOutcome {
            order_id,
            phase,
            decision: evaluation.decision,
            result: evaluation.result,
            persisted,
            retained_draft_id: evaluation.retained_draft_id,
        })
    }
}
