//! Typed error hierarchy for the orderflow core.
//!
//! One enum per subsystem:
//! - `StatusError`: registry validation and status-machine transitions
//! - `RefundError`: refund lock acquisition and the guarded refund itself
//! - `ProtocolError`: tier lookup, evaluation and result persistence
//! - `CheckpointError`: hold routing and checkpoint responses
//! - `ConfigError`: loading `orderflow.toml`
//!
//! Every enum maps onto the shared [`ErrorKind`] taxonomy so callers (and the
//! step executor driving them) can decide on retries without matching variants.

use thiserror::Error;

/// Cross-cutting classification of failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller input is wrong (unknown status, phase, action). Never retried.
    Validation,
    NotFound,
    /// Optimistic-lock loss. Re-read and reapply.
    ConcurrentModification,
    TerminalState,
    InvalidTransition,
    /// Store write failed; the step executor retries the whole step.
    Persistence,
    /// Fatal misconfiguration (unknown tier, unknown hold reason). Escalate.
    Configuration,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::ConcurrentModification | Self::Persistence)
    }
}

/// Errors from the status registry and status machine.
#[derive(Debug, Error)]
pub enum StatusError {
    #[error("Unknown order status '{0}'")]
    UnknownStatus(String),

    #[error("Order {order_id} not found")]
    NotFound { order_id: i64 },

    #[error("Order {order_id} is in terminal status {status}; no transitions allowed")]
    TerminalState { order_id: i64, status: String },

    #[error("Transition {from} -> {to} is not allowed")]
    InvalidTransition { from: String, to: String },

    #[error("Order {order_id} was modified concurrently (expected version {expected_version})")]
    ConcurrentModification { order_id: i64, expected_version: i64 },

    #[error("Order {order_id} has {pending} pending blocking checkpoint(s)")]
    BlockingCheckpointsPending { order_id: i64, pending: i64 },

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl StatusError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownStatus(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::TerminalState { .. } => ErrorKind::TerminalState,
            Self::InvalidTransition { .. } | Self::BlockingCheckpointsPending { .. } => {
                ErrorKind::InvalidTransition
            }
            Self::ConcurrentModification { .. } => ErrorKind::ConcurrentModification,
            Self::Database(_) => ErrorKind::Persistence,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Errors from the refund lock.
#[derive(Debug, Error)]
pub enum RefundError {
    #[error("Order {order_id} not found")]
    NotFound { order_id: i64 },

    #[error("Refund already in progress for order {order_id} (status {status})")]
    AlreadyInProgress { order_id: i64, status: String },

    #[error("Refund for order {order_id} failed: {source}")]
    RefundFailed {
        order_id: i64,
        #[source]
        source: anyhow::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl RefundError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyInProgress { .. } => ErrorKind::ConcurrentModification,
            Self::RefundFailed { .. } | Self::Database(_) => ErrorKind::Persistence,
        }
    }
}

/// Errors from protocol evaluation, persistence and dispatch.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unknown tier '{0}'")]
    UnknownTier(String),

    #[error("Invalid grade '{0}'")]
    InvalidGrade(String),

    #[error("Order {order_id} not found")]
    OrderNotFound { order_id: i64 },

    #[error("Failed to persist protocol results batch {batch} of {total_batches}: {source}")]
    Persistence {
        batch: usize,
        total_batches: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl ProtocolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownTier(_) => ErrorKind::Configuration,
            Self::InvalidGrade(_) => ErrorKind::Validation,
            Self::OrderNotFound { .. } => ErrorKind::NotFound,
            Self::Persistence { .. } | Self::Database(_) => ErrorKind::Persistence,
            Self::Status(e) => e.kind(),
            Self::Checkpoint(e) => e.kind(),
        }
    }
}

/// Errors from the checkpoint router and response handler.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Unknown hold reason '{0}'")]
    UnknownHoldReason(String),

    #[error("Unknown checkpoint action '{0}'")]
    UnknownAction(String),

    #[error("Checkpoint {id} not found")]
    NotFound { id: i64 },

    #[error("Checkpoint {id} is already {status}")]
    AlreadyResolved { id: i64, status: String },

    #[error("Action '{action}' is not valid for {kind} checkpoint {id}")]
    InvalidAction {
        id: i64,
        action: String,
        kind: String,
    },

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl CheckpointError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownHoldReason(_) => ErrorKind::Configuration,
            Self::UnknownAction(_) | Self::InvalidAction { .. } => {
                ErrorKind::Validation
            }
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyResolved { .. } => ErrorKind::TerminalState,
            Self::Status(e) => e.kind(),
            Self::Database(_) => ErrorKind::Persistence,
        }
    }
}

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    ReadFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_concurrency_and_persistence_are_retryable() {
        assert!(ErrorKind::ConcurrentModification.is_retryable());
        assert!(ErrorKind::Persistence.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::TerminalState.is_retryable());
        assert!(!ErrorKind::InvalidTransition.is_retryable());
        assert!(!ErrorKind::Configuration.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
    }

    #[test]
    fn status_error_concurrent_modification_carries_version() {
        let err = StatusError::ConcurrentModification {
            order_id: 7,
            expected_version: 3,
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("expected version 3"));
    }

    #[test]
    fn status_error_terminal_state_is_not_retryable() {
        let err = StatusError::TerminalState {
            order_id: 1,
            status: "COMPLETED".into(),
        };
        assert_eq!(err.kind(), ErrorKind::TerminalState);
        assert!(!err.is_retryable());
    }

    #[test]
    fn protocol_error_unknown_tier_is_configuration() {
        let err = ProtocolError::UnknownTier("Z".into());
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("'Z'"));
    }

    #[test]
    fn protocol_error_wraps_status_error_kind() {
        let err: ProtocolError = StatusError::InvalidTransition {
            from: "SUBMITTED".into(),
            to: "COMPLETED".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[test]
    fn checkpoint_error_unknown_hold_reason_is_configuration() {
        let err = CheckpointError::UnknownHoldReason("gremlins".into());
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&StatusError::UnknownStatus("x".into()));
        assert_std_error(&RefundError::NotFound { order_id: 1 });
        assert_std_error(&ProtocolError::UnknownTier("x".into()));
        assert_std_error(&CheckpointError::NotFound { id: 1 });
        assert_std_error(&ConfigError::InvalidValue {
            key: "k".into(),
            message: "m".into(),
        });
    }
}
