//! Quality and cost protocols.
//!
//! A protocol is a rule over accumulated pipeline signals. Evaluation is pure
//! ([`evaluators`]); every outcome, clean or not, is then persisted
//! ([`persistence`]), counted ([`metrics`]) and acted on ([`dispatch`]).
//!
//! Only two control outcomes exist: hold (optionally escalated to an admin)
//! or continue with a disclosure attached to the draft.

pub mod dispatch;
pub mod evaluators;
pub mod metrics;
pub mod persistence;
pub mod tier;

use serde::Serialize;

use crate::checkpoint::HoldReason;

pub use dispatch::{DispatchOutcome, LoopOutcome, ProtocolDispatcher};
pub use evaluators::{Evaluators, LoopDecision, LoopExhaustion, RevisionLoopState};
pub use metrics::{MetricsSnapshot, ProtocolMetrics};
pub use persistence::{PersistSummary, persist, persist_units};
pub use tier::{Grade, Tier, TierThresholds};

/// Version stamped on results when configuration does not override it.
pub const EVALUATOR_VERSION: &str = "1.0.0";

pub const PROTOCOL_CITATION_FAILURES: i64 = 7;
pub const PROTOCOL_LOOP_EXHAUSTION: i64 = 10;
pub const PROTOCOL_COST_CAP: i64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the pipeline does about a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "reason", rename_all = "snake_case")]
pub enum ProtocolAction {
    None,
    ContinueWithDisclosure,
    Hold(HoldReason),
    /// Alert an admin and hold.
    Escalate(HoldReason),
}

impl ProtocolAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ContinueWithDisclosure => "continue_with_disclosure",
            Self::Hold(_) => "hold",
            Self::Escalate(_) => "escalate",
        }
    }

    pub fn hold_reason(&self) -> Option<HoldReason> {
        match self {
            Self::Hold(reason) | Self::Escalate(reason) => Some(*reason),
            Self::None | Self::ContinueWithDisclosure => None,
        }
    }
}

/// Outcome of evaluating one protocol against one analysis unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtocolResult {
    pub protocol_number: i64,
    pub triggered: bool,
    pub severity: Severity,
    pub action: ProtocolAction,
    /// Human-readable text destined for the reviewer's disclosure.
    pub note: Option<String>,
    /// The signal compared against the threshold (failures, cents, loops).
    pub observed: i64,
    pub threshold: i64,
    pub evaluator_version: String,
}

impl ProtocolResult {
    /// Outcome label used in the idempotency hash: the severity when
    /// triggered, `CLEAN` otherwise.
    pub fn outcome_label(&self) -> &'static str {
        if self.triggered {
            self.severity.as_str()
        } else {
            "CLEAN"
        }
    }
}
