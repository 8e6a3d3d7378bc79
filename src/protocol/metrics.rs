//! Best-effort protocol metrics and admin alerts.
//!
//! Recording never fails and never blocks the pipeline: counters are atomics,
//! and a poisoned lock or a failed alert write is logged and dropped.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use super::{ProtocolResult, Severity};
use crate::store::PipelineDb;

/// Queue an admin alert. Returns false if the write failed; the failure is
/// logged, never returned.
pub fn queue_alert(db: &PipelineDb, alert_type: &str, payload: &serde_json::Value) -> bool {
    match db.enqueue_alert(alert_type, payload) {
        Ok(id) => {
            debug!(alert_id = id, alert_type, "admin alert queued");
            true
        }
        Err(e) => {
            warn!(alert_type, error = %e, "failed to queue admin alert");
            false
        }
    }
}

#[derive(Default)]
struct LatencyStats {
    count: u64,
    total_ms: u64,
    max_ms: u64,
}

#[derive(Default)]
pub struct ProtocolMetrics {
    evaluations: AtomicU64,
    triggers: AtomicU64,
    holds: AtomicU64,
    escalations: AtomicU64,
    disclosures: AtomicU64,
    alerts_dropped: AtomicU64,
    /// Triggered results keyed by `(protocol, severity)`.
    by_protocol: Mutex<BTreeMap<(i64, Severity), u64>>,
    latency: Mutex<LatencyStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub evaluations: u64,
    pub triggers: u64,
    pub holds: u64,
    pub escalations: u64,
    pub disclosures: u64,
    pub alerts_dropped: u64,
    /// `"<protocol>:<severity>"` -> count.
    pub triggers_by_protocol: BTreeMap<String, u64>,
    pub dispatches: u64,
    pub mean_dispatch_ms: f64,
    pub max_dispatch_ms: u64,
}

impl ProtocolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_result(&self, result: &ProtocolResult) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        if !result.triggered {
            return;
        }
        self.triggers.fetch_add(1, Ordering::Relaxed);
        match self.by_protocol.lock() {
            Ok(mut map) => {
                *map.entry((result.protocol_number, result.severity)).or_insert(0) += 1;
            }
            Err(e) => warn!(error = %e, "protocol metrics lock poisoned"),
        }
        debug!(
            target: "orderflow::metrics",
            protocol = result.protocol_number,
            severity = %result.severity,
            action = result.action.as_str(),
            "protocol triggered"
        );
    }

    pub fn record_hold(&self) {
        self.holds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_escalation(&self) {
        self.escalations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disclosure(&self) {
        self.disclosures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch_latency(&self, elapsed: Duration) {
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        match self.latency.lock() {
            Ok(mut stats) => {
                stats.count += 1;
                stats.total_ms = stats.total_ms.saturating_add(ms);
                stats.max_ms = stats.max_ms.max(ms);
            }
            Err(e) => warn!(error = %e, "dispatch latency lock poisoned"),
        }
    }

    /// Queue an admin alert, counting it if the write fails.
    pub fn alert(&self, db: &PipelineDb, alert_type: &str, payload: serde_json::Value) {
        if !queue_alert(db, alert_type, &payload) {
            self.alerts_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let triggers_by_protocol = match self.by_protocol.lock() {
            Ok(map) => map
                .iter()
                .map(|((protocol, severity), n)| (format!("{protocol}:{severity}"), *n))
                .collect(),
            Err(e) => {
                warn!(error = %e, "protocol metrics lock poisoned");
                BTreeMap::new()
            }
        };
        let (dispatches, mean_dispatch_ms, max_dispatch_ms) = match self.latency.lock() {
            Ok(stats) if stats.count > 0 => (
                stats.count,
                stats.total_ms as f64 / stats.count as f64,
                stats.max_ms,
            ),
            Ok(_) => (0, 0.0, 0),
            Err(e) => {
                warn!(error = %e, "dispatch latency lock poisoned");
                (0, 0.0, 0)
            }
        };
        MetricsSnapshot {
            evaluations: self.evaluations.load(Ordering::Relaxed),
            triggers: self.triggers.load(Ordering::Relaxed),
            holds: self.holds.load(Ordering::Relaxed),
            escalations: self.escalations.load(Ordering::Relaxed),
            disclosures: self.disclosures.load(Ordering::Relaxed),
            alerts_dropped: self.alerts_dropped.load(Ordering::Relaxed),
            triggers_by_protocol,
            dispatches,
            mean_dispatch_ms,
            max_dispatch_ms,
        }
    }
}
