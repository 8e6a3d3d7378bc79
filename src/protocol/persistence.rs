//! Idempotent, batched persistence of protocol results.
//!
//! Every evaluated result is written, clean or not. Rows are keyed on
//! `(order, phase, protocol, analysis unit)` so replaying a step inserts
//! nothing new.

use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, error};

use super::ProtocolResult;
use crate::errors::ProtocolError;
use crate::phase::Phase;
use crate::store::{PipelineDb, ProtocolRecord};

/// Batch size used when configuration does not override it.
pub const DEFAULT_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistSummary {
    pub batches: usize,
    /// Rows newly written.
    pub inserted: usize,
    /// Rows skipped because the key already existed.
    pub skipped: usize,
}

/// Deterministic fingerprint of what a result was computed over.
pub fn input_hash(analysis_unit_id: &str, phase: Phase, result: &ProtocolResult) -> String {
    let canonical = json!({
        "analysis_unit_id": analysis_unit_id,
        "phase": phase.as_str(),
        "outcome": result.outcome_label(),
    });
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn to_record(
    order_id: i64,
    phase: Phase,
    analysis_unit_id: &str,
    result: &ProtocolResult,
) -> ProtocolRecord {
    ProtocolRecord {
        order_id,
        phase: phase.as_str().to_string(),
        protocol_number: result.protocol_number,
        analysis_unit_id: analysis_unit_id.to_string(),
        triggered: result.triggered,
        severity: result.severity.as_str().to_string(),
        action_taken: result.action.as_str().to_string(),
        disclosure: result.note.clone(),
        evaluator_version: result.evaluator_version.clone(),
        input_hash: input_hash(analysis_unit_id, phase, result),
    }
}

/// Persist results that all belong to one analysis unit.
pub fn persist(
    db: &PipelineDb,
    order_id: i64,
    phase: Phase,
    results: &[ProtocolResult],
    analysis_unit_id: &str,
    batch_size: usize,
) -> Result<PersistSummary, ProtocolError> {
    let records: Vec<_> = results
        .iter()
        .map(|r| to_record(order_id, phase, analysis_unit_id, r))
        .collect();
    write_batches(db, order_id, &records, batch_size)
}

/// Persist results spread over several analysis units, such as one per citation.
pub fn persist_units(
    db: &PipelineDb,
    order_id: i64,
    phase: Phase,
    results: &[(String, ProtocolResult)],
    batch_size: usize,
) -> Result<PersistSummary, ProtocolError> {
    let records: Vec<_> = results
        .iter()
        .map(|(unit, r)| to_record(order_id, phase, unit, r))
        .collect();
    write_batches(db, order_id, &records, batch_size)
}

/// Each batch commits on its own. The first failing batch aborts the run;
/// earlier batches stay committed and a retry skips them.
fn write_batches(
    db: &PipelineDb,
    order_id: i64,
    records: &[ProtocolRecord],
    batch_size: usize,
) -> Result<PersistSummary, ProtocolError> {
    let batch_size = batch_size.max(1);
    let total_batches = records.len().div_ceil(batch_size);
    let mut summary = PersistSummary::default();

    for (i, chunk) in records.chunks(batch_size).enumerate() {
        let batch = i + 1;
        let inserted = db.insert_protocol_records(chunk).map_err(|source| {
            error!(order_id, batch, total_batches, error = %source, "protocol result batch failed");
            ProtocolError::Persistence {
                batch,
                total_batches,
                source,
            }
        })?;
        summary.batches += 1;
        summary.inserted += inserted;
        summary.skipped += chunk.len() - inserted;
    }

    debug!(
        order_id,
        batches = summary.batches,
        inserted = summary.inserted,
        skipped = summary.skipped,
        "protocol results persisted"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{EVALUATOR_VERSION, ProtocolAction, Severity};
    use crate::store::ORDER_LEVEL_UNIT;
    use anyhow::Result;

    fn result(protocol_number: i64, triggered: bool) -> ProtocolResult {
        ProtocolResult {
            protocol_number,
            triggered,
            severity: if triggered {
                Severity::Warning
            } else {
                Severity::Info
            },
            action: if triggered {
                ProtocolAction::ContinueWithDisclosure
            } else {
                ProtocolAction::None
            },
            note: triggered.then(|| "disclosed".to_string()),
            observed: 1,
            threshold: 1,
            evaluator_version: EVALUATOR_VERSION.to_string(),
        }
    }

    #[test]
    fn hash_depends_on_unit_phase_and_outcome_only() {
        let clean = result(7, false);
        let mut other_numbers = clean.clone();
        other_numbers.observed = 99;

        let a = input_hash("order", Phase::V1, &clean);
        assert_eq!(a, input_hash("order", Phase::V1, &other_numbers));
        assert_eq!(a.len(), 64);
        assert_ne!(a, input_hash("cite-1", Phase::V1, &clean));
        assert_ne!(a, input_hash("order", Phase::VII1, &clean));
        assert_ne!(a, input_hash("order", Phase::V1, &result(7, true)));
    }

    #[test]
    fn replay_inserts_nothing_new() -> Result<()> {
        let db = PipelineDb::new_in_memory()?;
        let id = db.create_order("B")?.id;
        let results = vec![result(7, false), result(10, true), result(16, false)];

        let first = persist(&db, id, Phase::V1, &results, ORDER_LEVEL_UNIT, 50)?;
        assert_eq!(first.inserted, 3);
        assert_eq!(first.skipped, 0);

        let replay = persist(&db, id, Phase::V1, &results, ORDER_LEVEL_UNIT, 50)?;
        assert_eq!(replay.inserted, 0);
        assert_eq!(replay.skipped, 3);
        assert_eq!(db.get_protocol_records(id)?.len(), 3);
        Ok(())
    }

    #[test]
    fn clean_results_are_persisted() -> Result<()> {
        let db = PipelineDb::new_in_memory()?;
        let id = db.create_order("A")?.id;
        persist(&db, id, Phase::III, &[result(7, false)], ORDER_LEVEL_UNIT, 10)?;

        let records = db.get_protocol_records(id)?;
        assert_eq!(records.len(), 1);
        assert!(!records[0].triggered);
        assert_eq!(records[0].action_taken, "none");
        assert_eq!(records[0].analysis_unit_id, "order");
        Ok(())
    }

    #[test]
    fn large_sets_are_chunked() -> Result<()> {
        let db = PipelineDb::new_in_memory()?;
        let id = db.create_order("D")?.id;
        let results: Vec<_> = (0..120)
            .map(|i| (format!("cite-{i}"), result(7, i % 3 == 0)))
            .collect();

        let summary = persist_units(&db, id, Phase::V1, &results, 50)?;
        assert_eq!(summary.batches, 3);
        assert_eq!(summary.inserted, 120);
        Ok(())
    }

    #[test]
    fn failing_batch_aborts_and_names_its_position() -> Result<()> {
        let db = PipelineDb::new_in_memory()?;
        let id = db.create_order("C")?.id;
        let mut results: Vec<_> = (0..5)
            .map(|i| (format!("cite-{i}"), result(7, false)))
            .collect();
        // Protocol numbers outside 1..=99 violate the table constraint.
        results[3].1.protocol_number = 0;

        let err = persist_units(&db, id, Phase::V1, &results, 2).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Persistence {
                batch: 2,
                total_batches: 3,
                ..
            }
        ));
        // Batch 1 committed, batch 2 rolled back, batch 3 never ran.
        let units: Vec<_> = db
            .get_protocol_records(id)?
            .into_iter()
            .map(|r| r.analysis_unit_id)
            .collect();
        assert_eq!(units, vec!["cite-0", "cite-1"]);
        Ok(())
    }
}
