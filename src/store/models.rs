use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::phase::Phase;
use crate::status::OrderStatus;

/// Analysis-unit id used for protocol results that cover the whole order.
pub const ORDER_LEVEL_UNIT: &str = "order";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub status: OrderStatus,
    pub status_version: i64,
    pub refund_in_progress: bool,
    pub refund_locked_at: Option<String>,
    pub resume_phase: Option<Phase>,
    /// Raw tier code as stored. Parsed by the protocol layer, where an
    /// unknown tier is a configuration failure.
    pub tier: String,
    pub created_at: String,
    pub updated_at: String,
}

/// The two columns the status machine reads before a conditional write.
/// `status` stays a raw string so corrupted rows can be reported as such.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub status: String,
    pub version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    /// Pipeline cannot advance until resolved.
    Blocking,
    /// Informational; may be dismissed.
    Notification,
}

impl CheckpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocking => "blocking",
            Self::Notification => "notification",
        }
    }
}

impl std::fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blocking" => Ok(Self::Blocking),
            "notification" => Ok(Self::Notification),
            _ => Err(format!("Invalid checkpoint kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Pending,
    Approved,
    ChangesRequested,
    Dismissed,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::ChangesRequested => "changes_requested",
            Self::Dismissed => "dismissed",
        }
    }

    /// Approved and dismissed checkpoints are immutable history.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Approved | Self::Dismissed)
    }
}

impl std::fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "changes_requested" => Ok(Self::ChangesRequested),
            "dismissed" => Ok(Self::Dismissed),
            _ => Err(format!("Invalid checkpoint status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: i64,
    pub order_id: i64,
    pub phase: Phase,
    pub kind: CheckpointKind,
    pub status: CheckpointStatus,
    pub hold_reason: Option<String>,
    pub message: String,
    pub response_notes: Option<String>,
    pub created_at: String,
    pub resolved_at: Option<String>,
    pub resolved_by: Option<String>,
}

/// A checkpoint response as appended to `workflows.checkpoint_responses`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub checkpoint_id: i64,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub actor: String,
    pub responded_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Completed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
        }
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid workflow status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub order_id: i64,
    pub status: WorkflowStatus,
    /// Phase code of the checkpoint the workflow is parked on, if any.
    pub checkpoint_pending: Option<String>,
    pub checkpoint_data: Option<serde_json::Value>,
    pub checkpoint_responses: Vec<ResponseRecord>,
    pub max_loops_reached: bool,
    pub revision_loop: i64,
    pub retained_draft_id: Option<String>,
    pub disclosures: Vec<String>,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub id: i64,
    pub order_id: i64,
    pub event_type: String,
    pub payload: Option<serde_json::Value>,
    pub created_at: String,
}

/// One row of `protocol_results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolRecord {
    pub order_id: i64,
    pub phase: String,
    pub protocol_number: i64,
    pub analysis_unit_id: String,
    pub triggered: bool,
    pub severity: String,
    pub action_taken: String,
    pub disclosure: Option<String>,
    pub evaluator_version: String,
    pub input_hash: String,
}

/// Order-wide signal totals. Never scoped to a single phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCounters {
    pub citation_failures: i64,
    pub citations_total: i64,
    pub cost_spend_cents: i64,
}

impl OrderCounters {
    /// Analysis unit for order-level results evaluated against these totals,
    /// e.g. `order@5/12/300`. Equal totals replay onto the same rows; new
    /// signals in the same phase get fresh rows.
    pub fn analysis_unit(&self) -> String {
        format!(
            "{}@{}/{}/{}",
            ORDER_LEVEL_UNIT, self.citation_failures, self.citations_total, self.cost_spend_cents
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedAlert {
    pub id: i64,
    pub alert_type: String,
    pub payload: serde_json::Value,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_status_resolution() {
        assert!(!CheckpointStatus::Pending.is_resolved());
        assert!(!CheckpointStatus::ChangesRequested.is_resolved());
        assert!(CheckpointStatus::Approved.is_resolved());
        assert!(CheckpointStatus::Dismissed.is_resolved());
    }

    #[test]
    fn checkpoint_enums_parse_their_own_output() {
        for kind in [CheckpointKind::Blocking, CheckpointKind::Notification] {
            assert_eq!(kind.as_str().parse::<CheckpointKind>().unwrap(), kind);
        }
        assert!("urgent".parse::<CheckpointKind>().is_err());
        assert!("resolved".parse::<CheckpointStatus>().is_err());
    }

    #[test]
    fn response_record_omits_missing_notes() {
        let record = ResponseRecord {
            checkpoint_id: 1,
            action: "confirm_receipt".into(),
            notes: None,
            actor: "client".into(),
            responded_at: "2026-01-01T00:00:00+00:00".into(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("notes").is_none());
    }
}
