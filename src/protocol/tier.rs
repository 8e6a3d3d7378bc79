//! Service tiers and the fixed threshold table they select.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    A,
    B,
    C,
    D,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Self::A, Self::B, Self::C, Self::D];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        }
    }

    pub fn thresholds(&self) -> &'static TierThresholds {
        // Indexed by declaration order; ALL and THRESHOLDS must stay aligned.
        &THRESHOLDS[*self as usize]
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "D" => Ok(Self::D),
            _ => Err(ProtocolError::UnknownTier(s.to_string())),
        }
    }
}

/// Per-tier limits consumed by the protocol evaluators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TierThresholds {
    pub tier: Tier,
    /// Order-wide failed citation verifications that force a hold.
    pub failure_limit: i64,
    /// Citations analysed before a volume disclosure is attached.
    pub total_limit: i64,
    pub cost_cap_cents: i64,
    /// Minimum grade (4.0 scale) a draft must reach.
    pub min_grade: Grade,
    pub max_revision_loops: u32,
}

const THRESHOLDS: [TierThresholds; 4] = [
    TierThresholds {
        tier: Tier::A,
        failure_limit: 3,
        total_limit: 20,
        cost_cap_cents: 500,
        min_grade: Grade(3.0),
        max_revision_loops: 3,
    },
    TierThresholds {
        tier: Tier::B,
        failure_limit: 5,
        total_limit: 40,
        cost_cap_cents: 1500,
        min_grade: Grade(3.3),
        max_revision_loops: 3,
    },
    TierThresholds {
        tier: Tier::C,
        failure_limit: 8,
        total_limit: 60,
        cost_cap_cents: 3500,
        min_grade: Grade(3.3),
        max_revision_loops: 3,
    },
    TierThresholds {
        tier: Tier::D,
        failure_limit: 10,
        total_limit: 80,
        cost_cap_cents: 7500,
        min_grade: Grade(3.7),
        max_revision_loops: 3,
    },
];

const LETTERS: [(&str, f64); 12] = [
    ("A+", 4.0),
    ("A", 4.0),
    ("A-", 3.7),
    ("B+", 3.3),
    ("B", 3.0),
    ("B-", 2.7),
    ("C+", 2.3),
    ("C", 2.0),
    ("C-", 1.7),
    ("D+", 1.3),
    ("D", 1.0),
    ("F", 0.0),
];

/// A quality grade on the 4.0 scale.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Grade(pub f64);

impl Grade {
    /// Closest letter at or below this grade, for disclosures.
    pub fn letter(&self) -> &'static str {
        LETTERS
            .iter()
            .find(|(_, v)| self.0 + f64::EPSILON >= *v)
            .map(|(l, _)| *l)
            .unwrap_or("F")
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:.1})", self.letter(), self.0)
    }
}

impl FromStr for Grade {
    type Err = ProtocolError;

    /// Accepts a letter grade (`B+`) or a number in `0.0..=4.0`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some((_, v)) = LETTERS.iter().find(|(l, _)| l.eq_ignore_ascii_case(trimmed)) {
            return Ok(Grade(*v));
        }
        match trimmed.parse::<f64>() {
            Ok(v) if (0.0..=4.0).contains(&v) => Ok(Grade(v)),
            _ => Err(ProtocolError::InvalidGrade(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_aligned_with_tier_order() {
        for tier in Tier::ALL {
            assert_eq!(tier.thresholds().tier, tier);
        }
    }

    #[test]
    fn tier_b_failure_limit_is_five() {
        assert_eq!(Tier::B.thresholds().failure_limit, 5);
    }

    #[test]
    fn unknown_tier_fails_loudly() {
        let err = "E".parse::<Tier>().unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownTier(ref t) if t == "E"));
        assert!("a".parse::<Tier>().is_err());
    }

    #[test]
    fn grades_parse_from_letters_and_numbers() {
        assert_eq!("B+".parse::<Grade>().unwrap(), Grade(3.3));
        assert_eq!("a-".parse::<Grade>().unwrap(), Grade(3.7));
        assert_eq!("3.15".parse::<Grade>().unwrap(), Grade(3.15));
        assert!("4.5".parse::<Grade>().is_err());
        assert!("excellent".parse::<Grade>().is_err());
    }

    #[test]
    fn letter_rounds_down() {
        assert_eq!(Grade(3.3).letter(), "B+");
        assert_eq!(Grade(3.5).letter(), "B+");
        assert_eq!(Grade(0.5).letter(), "F");
        assert_eq!(Grade(3.0).to_string(), "B (3.0)");
    }
}
