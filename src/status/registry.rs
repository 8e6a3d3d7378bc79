//! The closed set of order statuses and the legal transition graph.
//!
//! The graph is a static table rather than branching code: every non-terminal
//! status has exactly one entry listing its successors, and terminal statuses
//! have none. [`validate`] checks the table's shape; the binary runs it once at
//! startup and refuses to start on any problem.

use std::collections::{HashMap, HashSet, VecDeque};
use std::str::FromStr;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::errors::StatusError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Submitted,
    Processing,
    OnHold,
    AwaitingApproval,
    RevisionReq,
    RevisionInProgress,
    Failed,
    Completed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 10] = [
        Self::Submitted,
        Self::Processing,
        Self::OnHold,
        Self::AwaitingApproval,
        Self::RevisionReq,
        Self::RevisionInProgress,
        Self::Failed,
        Self::Completed,
        Self::Cancelled,
        Self::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "SUBMITTED",
            Self::Processing => "PROCESSING",
            Self::OnHold => "ON_HOLD",
            Self::AwaitingApproval => "AWAITING_APPROVAL",
            Self::RevisionReq => "REVISION_REQ",
            Self::RevisionInProgress => "REVISION_IN_PROGRESS",
            Self::Failed => "FAILED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Refunded => "REFUNDED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        TERMINAL.contains(self)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StatusError::UnknownStatus(s.to_string()))
    }
}

const TERMINAL: [OrderStatus; 3] = [
    OrderStatus::Completed,
    OrderStatus::Cancelled,
    OrderStatus::Refunded,
];

use OrderStatus::*;

const TRANSITIONS: &[(OrderStatus, &[OrderStatus])] = &[
    (Submitted, &[Processing, Cancelled, Refunded]),
    (
        Processing,
        &[OnHold, AwaitingApproval, Failed, Cancelled, Refunded],
    ),
    (OnHold, &[Processing, Cancelled, Refunded]),
    (
        AwaitingApproval,
        &[RevisionReq, Completed, OnHold, Cancelled, Refunded],
    ),
    (RevisionReq, &[RevisionInProgress, Cancelled]),
    (RevisionInProgress, &[AwaitingApproval, OnHold, Failed]),
    (Failed, &[Processing, Cancelled, Refunded]),
];

static GRAPH: LazyLock<HashMap<OrderStatus, &'static [OrderStatus]>> =
    LazyLock::new(|| TRANSITIONS.iter().copied().collect());

/// Every status the registry knows about.
pub fn all_statuses() -> &'static [OrderStatus] {
    &OrderStatus::ALL
}

pub fn terminal_statuses() -> &'static [OrderStatus] {
    &TERMINAL
}

/// True when `s` is the canonical spelling of a registered status.
pub fn is_valid_status(s: &str) -> bool {
    s.parse::<OrderStatus>().is_ok()
}

pub fn is_terminal(status: OrderStatus) -> bool {
    status.is_terminal()
}

/// Successors of `from`. Empty for terminal statuses.
pub fn allowed_transitions(from: OrderStatus) -> &'static [OrderStatus] {
    GRAPH.get(&from).copied().unwrap_or(&[])
}

pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

/// Check the transition table for shape errors.
///
/// Returns one message per problem; an empty vector means the table is sound.
pub fn validate() -> Vec<String> {
    let mut problems = Vec::new();

    let mut seen = HashSet::new();
    for (from, _) in TRANSITIONS {
        if !seen.insert(*from) {
            problems.push(format!("{} has more than one transition entry", from));
        }
        if from.is_terminal() {
            problems.push(format!("terminal status {} has outgoing transitions", from));
        }
    }

    for status in OrderStatus::ALL {
        if !status.is_terminal() && !GRAPH.contains_key(&status) {
            problems.push(format!("{} has no transition entry", status));
        }
    }

    let mut reachable = HashSet::from([Submitted]);
    let mut queue = VecDeque::from([Submitted]);
    while let Some(next) = queue.pop_front() {
        for succ in allowed_transitions(next) {
            if reachable.insert(*succ) {
                queue.push_back(*succ);
            }
        }
    }
    for status in OrderStatus::ALL {
        if !reachable.contains(&status) {
            problems.push(format!("{} is unreachable from SUBMITTED", status));
        }
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_is_sound() {
        assert!(validate().is_empty(), "{:?}", validate());
    }

    #[test]
    fn terminal_statuses_have_no_successors() {
        for status in terminal_statuses() {
            assert!(allowed_transitions(*status).is_empty(), "{status}");
            assert!(is_terminal(*status));
        }
    }

    #[test]
    fn non_terminal_statuses_have_successors() {
        for status in all_statuses().iter().filter(|s| !s.is_terminal()) {
            assert!(!allowed_transitions(*status).is_empty(), "{status}");
        }
    }

    #[test]
    fn parse_round_trips_canonical_names() {
        for status in all_statuses() {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), *status);
        }
    }

    #[test]
    fn parse_rejects_unknown_and_non_canonical_spelling() {
        assert!(!is_valid_status("processing"));
        assert!(!is_valid_status("DONE"));
        assert!(!is_valid_status(""));
        assert!(matches!(
            "DONE".parse::<OrderStatus>(),
            Err(StatusError::UnknownStatus(s)) if s == "DONE"
        ));
    }

    #[test]
    fn revision_request_cannot_jump_back_to_processing() {
        assert!(is_valid_transition(AwaitingApproval, RevisionReq));
        assert!(!is_valid_transition(RevisionReq, Processing));
        assert!(is_valid_transition(RevisionReq, RevisionInProgress));
    }

    #[test]
    fn no_self_transitions() {
        for status in all_statuses() {
            assert!(!is_valid_transition(*status, *status), "{status}");
        }
    }

    #[test]
    fn serde_uses_canonical_names() {
        let json = serde_json::to_string(&AwaitingApproval).unwrap();
        assert_eq!(json, "\"AWAITING_APPROVAL\"");
        let back: OrderStatus = serde_json::from_str("\"ON_HOLD\"").unwrap();
        assert_eq!(back, OnHold);
    }
}
