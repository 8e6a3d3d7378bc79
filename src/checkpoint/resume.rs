//! Where a held order picks up again once its hold is resolved.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::CheckpointError;
use crate::phase::Phase;

/// Phase used when a hold resumes "where it stopped" but the stop point was never recorded.
pub const DEFAULT_RESUME_PHASE: Phase = Phase::I;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldReason {
    EvidenceGap,
    MissingCaseFacts,
    JurisdictionUnsupported,
    CitationCriticalFailure,
    CostCapExceeded,
}

impl HoldReason {
    pub const ALL: [HoldReason; 5] = [
        Self::EvidenceGap,
        Self::MissingCaseFacts,
        Self::JurisdictionUnsupported,
        Self::CitationCriticalFailure,
        Self::CostCapExceeded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EvidenceGap => "evidence_gap",
            Self::MissingCaseFacts => "missing_case_facts",
            Self::JurisdictionUnsupported => "jurisdiction_unsupported",
            Self::CitationCriticalFailure => "citation_critical_failure",
            Self::CostCapExceeded => "cost_cap_exceeded",
        }
    }

    pub fn resume_target(&self) -> ResumeTarget {
        match self {
            Self::EvidenceGap => ResumeTarget::Phase(Phase::III),
            Self::MissingCaseFacts | Self::JurisdictionUnsupported => {
                ResumeTarget::Phase(Phase::II)
            }
            Self::CitationCriticalFailure | Self::CostCapExceeded => ResumeTarget::CurrentPhase,
        }
    }
}

impl std::fmt::Display for HoldReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HoldReason {
    type Err = CheckpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| CheckpointError::UnknownHoldReason(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeTarget {
    Phase(Phase),
    /// Retry the phase that was running when the hold opened.
    CurrentPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResumeDecision {
    pub phase: Phase,
    /// True when the current phase was needed but unknown.
    pub fell_back: bool,
}

/// Resolves hold reasons to resume phases with a configurable fallback.
#[derive(Debug, Clone, Copy)]
pub struct ResumeRouter {
    fallback: Phase,
}

impl Default for ResumeRouter {
    fn default() -> Self {
        Self::new(DEFAULT_RESUME_PHASE)
    }
}

impl ResumeRouter {
    pub fn new(fallback: Phase) -> Self {
        Self { fallback }
    }

    pub fn fallback(&self) -> Phase {
        self.fallback
    }

    pub fn resolve(&self, reason: HoldReason, current: Option<Phase>) -> ResumeDecision {
        match (reason.resume_target(), current) {
            (ResumeTarget::Phase(phase), _) => ResumeDecision {
                phase,
                fell_back: false,
            },
            (ResumeTarget::CurrentPhase, Some(phase)) => ResumeDecision {
                phase,
                fell_back: false,
            },
            (ResumeTarget::CurrentPhase, None) => {
                warn!(
                    reason = %reason,
                    fallback = %self.fallback,
                    "hold resumes at current phase but none was recorded; using fallback"
                );
                ResumeDecision {
                    phase: self.fallback,
                    fell_back: true,
                }
            }
        }
    }

    /// Parse `reason` and resolve it. Unknown reasons are configuration errors.
    pub fn resolve_str(
        &self,
        reason: &str,
        current: Option<Phase>,
    ) -> Result<ResumeDecision, CheckpointError> {
        Ok(self.resolve(reason.parse()?, current))
    }
}

/// Resume phase for `reason`, falling back to [`DEFAULT_RESUME_PHASE`].
pub fn get_resume_phase(reason: &str, current: Option<Phase>) -> Result<Phase, CheckpointError> {
    ResumeRouter::default()
        .resolve_str(reason, current)
        .map(|d| d.phase)
}
