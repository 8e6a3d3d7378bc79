//! Pure protocol evaluation. Nothing here touches the store.

use serde::{Deserialize, Serialize};

use super::tier::{Grade, Tier};
use super::{
    EVALUATOR_VERSION, PROTOCOL_CITATION_FAILURES, PROTOCOL_COST_CAP, PROTOCOL_LOOP_EXHAUSTION,
    ProtocolAction, ProtocolResult, Severity,
};
use crate::checkpoint::HoldReason;
use crate::store::OrderCounters;

/// Where a bounded revision loop stands after its latest iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionLoopState {
    /// Completed iterations, starting at 1.
    pub loop_count: u32,
    pub latest_grade: Grade,
    /// Highest-graded draft so far; retained if the loop exhausts.
    pub best_draft_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopDecision {
    /// Grade met the tier threshold.
    Passed,
    /// Below threshold with iterations left.
    ReviseAgain,
    /// Below threshold with no iterations left.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopExhaustion {
    pub result: ProtocolResult,
    pub decision: LoopDecision,
    pub max_loops_reached: bool,
    pub retained_draft_id: Option<String>,
}

impl LoopExhaustion {
    pub fn disclosure(&self) -> Option<&str> {
        self.result.note.as_deref()
    }
}

/// Evaluates protocols and stamps results with a fixed evaluator version.
#[derive(Debug, Clone)]
pub struct Evaluators {
    version: String,
}

impl Default for Evaluators {
    fn default() -> Self {
        Self::new(EVALUATOR_VERSION)
    }
}

impl Evaluators {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    fn clean(&self, protocol_number: i64, observed: i64, threshold: i64) -> ProtocolResult {
        ProtocolResult {
            protocol_number,
            triggered: false,
            severity: Severity::Info,
            action: ProtocolAction::None,
            note: None,
            observed,
            threshold,
            evaluator_version: self.version.clone(),
        }
    }

    /// Cumulative citation failures across every phase of the order.
    ///
    /// Holds once failures reach the tier limit. Below that, a large citation
    /// volume only attaches a disclosure.
    pub fn citation_failures(&self, counters: &OrderCounters, tier: Tier) -> ProtocolResult {
        let limits = tier.thresholds();
        let failures = counters.citation_failures;

        if failures >= limits.failure_limit {
            return ProtocolResult {
                protocol_number: PROTOCOL_CITATION_FAILURES,
                triggered: true,
                severity: Severity::Critical,
                action: ProtocolAction::Hold(HoldReason::CitationCriticalFailure),
                note: Some(format!(
                    "{failures} citations failed verification across this order, reaching the Tier {tier} limit of {}.",
                    limits.failure_limit
                )),
                observed: failures,
                threshold: limits.failure_limit,
                evaluator_version: self.version.clone(),
            };
        }

        if counters.citations_total >= limits.total_limit {
            return ProtocolResult {
                protocol_number: PROTOCOL_CITATION_FAILURES,
                triggered: true,
                severity: Severity::Warning,
                action: ProtocolAction::ContinueWithDisclosure,
                note: Some(format!(
                    "{} citations were analysed for this order (Tier {tier} review volume is {}); {failures} failed verification.",
                    counters.citations_total, limits.total_limit
                )),
                observed: counters.citations_total,
                threshold: limits.total_limit,
                evaluator_version: self.version.clone(),
            };
        }

        self.clean(PROTOCOL_CITATION_FAILURES, failures, limits.failure_limit)
    }

    /// Order-wide spend against the tier cost cap. Reaching the cap escalates.
    pub fn cost_cap(&self, counters: &OrderCounters, tier: Tier) -> ProtocolResult {
        let cap = tier.thresholds().cost_cap_cents;
        let spend = counters.cost_spend_cents;
        if spend < cap {
            return self.clean(PROTOCOL_COST_CAP, spend, cap);
        }
        ProtocolResult {
            protocol_number: PROTOCOL_COST_CAP,
            triggered: true,
            severity: Severity::Critical,
            action: ProtocolAction::Escalate(HoldReason::CostCapExceeded),
            note: Some(format!(
                "Processing cost of {spend} cents reached the Tier {tier} cap of {cap} cents."
            )),
            observed: spend,
            threshold: cap,
            evaluator_version: self.version.clone(),
        }
    }

    /// Decide what follows a revision iteration.
    ///
    /// Exhaustion never holds: the best draft moves on with a disclosure
    /// naming the loop count, final grade and threshold.
    pub fn loop_exhaustion(&self, state: &RevisionLoopState, tier: Tier) -> LoopExhaustion {
        let limits = tier.thresholds();
        let max = limits.max_revision_loops;
        let observed = i64::from(state.loop_count);
        let threshold = i64::from(max);

        if state.latest_grade >= limits.min_grade {
            return LoopExhaustion {
                result: self.clean(PROTOCOL_LOOP_EXHAUSTION, observed, threshold),
                decision: LoopDecision::Passed,
                max_loops_reached: false,
                retained_draft_id: None,
            };
        }
        if state.loop_count < max {
            return LoopExhaustion {
                result: self.clean(PROTOCOL_LOOP_EXHAUSTION, observed, threshold),
                decision: LoopDecision::ReviseAgain,
                max_loops_reached: false,
                retained_draft_id: None,
            };
        }

        let note = format!(
            "This draft went through {} revision cycles, the Tier {tier} maximum, without reaching the quality threshold of {}. Final grade: {}. The best available draft is delivered for attorney review.",
            state.loop_count, limits.min_grade, state.latest_grade
        );
        LoopExhaustion {
            result: ProtocolResult {
                protocol_number: PROTOCOL_LOOP_EXHAUSTION,
                triggered: true,
                severity: Severity::Warning,
                action: ProtocolAction::ContinueWithDisclosure,
                note: Some(note),
                observed,
                threshold,
                evaluator_version: self.version.clone(),
            },
            decision: LoopDecision::Exhausted,
            max_loops_reached: true,
            retained_draft_id: state.best_draft_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(failures: i64, total: i64, cents: i64) -> OrderCounters {
        OrderCounters {
            citation_failures: failures,
            citations_total: total,
            cost_spend_cents: cents,
        }
    }

    #[test]
    fn tier_b_holds_at_five_failures_not_four() {
        let eval = Evaluators::default();

        let four = eval.citation_failures(&counters(4, 10, 0), Tier::B);
        assert!(!four.triggered);
        assert_eq!(four.action, ProtocolAction::None);
        assert_eq!(four.observed, 4);
        assert_eq!(four.threshold, 5);

        let five = eval.citation_failures(&counters(5, 10, 0), Tier::B);
        assert!(five.triggered);
        assert_eq!(five.severity, Severity::Critical);
        assert_eq!(
            five.action,
            ProtocolAction::Hold(HoldReason::CitationCriticalFailure)
        );
    }

    #[test]
    fn citation_volume_only_discloses() {
        let eval = Evaluators::default();
        let result = eval.citation_failures(&counters(1, 40, 0), Tier::B);
        assert!(result.triggered);
        assert_eq!(result.severity, Severity::Warning);
        assert_eq!(result.action, ProtocolAction::ContinueWithDisclosure);
        assert!(result.note.unwrap().contains("40 citations"));
    }

    #[test]
    fn failure_limit_wins_over_volume() {
        let eval = Evaluators::default();
        let result = eval.citation_failures(&counters(3, 200, 0), Tier::A);
        assert_eq!(
            result.action,
            ProtocolAction::Hold(HoldReason::CitationCriticalFailure)
        );
    }

    #[test]
    fn cost_cap_escalates_at_cap() {
        let eval = Evaluators::default();
        assert!(!eval.cost_cap(&counters(0, 0, 1499), Tier::B).triggered);

        let at_cap = eval.cost_cap(&counters(0, 0, 1500), Tier::B);
        assert!(at_cap.triggered);
        assert_eq!(
            at_cap.action,
            ProtocolAction::Escalate(HoldReason::CostCapExceeded)
        );
    }

    #[test]
    fn results_carry_evaluator_version() {
        let eval = Evaluators::new("2.1.0");
        assert_eq!(eval.cost_cap(&counters(0, 0, 0), Tier::A).evaluator_version, "2.1.0");
    }

    fn loop_state(loop_count: u32, grade: f64) -> RevisionLoopState {
        RevisionLoopState {
            loop_count,
            latest_grade: Grade(grade),
            best_draft_id: Some("draft-2".into()),
        }
    }

    #[test]
    fn passing_grade_ends_loop_cleanly() {
        let outcome = Evaluators::default().loop_exhaustion(&loop_state(2, 3.3), Tier::B);
        assert_eq!(outcome.decision, LoopDecision::Passed);
        assert!(!outcome.result.triggered);
        assert!(outcome.disclosure().is_none());
    }

    #[test]
    fn below_threshold_with_loops_left_revises() {
        let outcome = Evaluators::default().loop_exhaustion(&loop_state(2, 3.0), Tier::B);
        assert_eq!(outcome.decision, LoopDecision::ReviseAgain);
        assert!(!outcome.max_loops_reached);
    }

    #[test]
    fn exhaustion_continues_with_disclosure_and_retains_best_draft() {
        let outcome = Evaluators::default().loop_exhaustion(&loop_state(3, 3.0), Tier::B);
        assert_eq!(outcome.decision, LoopDecision::Exhausted);
        assert!(outcome.result.triggered);
        assert_eq!(outcome.result.action, ProtocolAction::ContinueWithDisclosure);
        assert!(outcome.max_loops_reached);
        assert_eq!(outcome.retained_draft_id.as_deref(), Some("draft-2"));

        let text = outcome.disclosure().unwrap();
        assert!(text.contains("3 revision cycles"), "{text}");
        assert!(text.contains("B+ (3.3)"), "{text}");
        assert!(text.contains("B (3.0)"), "{text}");
    }
}
