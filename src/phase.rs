//! Pipeline phase codes.
//!
//! The document pipeline runs its phases in a fixed order; this module only
//! names them so the control plane can record where an order is and where it
//! must resume. Phase content is produced elsewhere.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A stage of the document-production pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    #[serde(rename = "PHASE_I")]
    I,
    #[serde(rename = "PHASE_II")]
    II,
    #[serde(rename = "PHASE_III")]
    III,
    #[serde(rename = "PHASE_IV")]
    IV,
    #[serde(rename = "PHASE_V")]
    V,
    #[serde(rename = "PHASE_V.1")]
    V1,
    #[serde(rename = "PHASE_VI")]
    VI,
    #[serde(rename = "PHASE_VII")]
    VII,
    #[serde(rename = "PHASE_VII.1")]
    VII1,
    #[serde(rename = "PHASE_VIII")]
    VIII,
    #[serde(rename = "PHASE_VIII.5")]
    VIII5,
    #[serde(rename = "PHASE_IX")]
    IX,
    #[serde(rename = "PHASE_IX.1")]
    IX1,
    #[serde(rename = "PHASE_X")]
    X,
}

impl Phase {
    pub const ALL: [Phase; 14] = [
        Self::I,
        Self::II,
        Self::III,
        Self::IV,
        Self::V,
        Self::V1,
        Self::VI,
        Self::VII,
        Self::VII1,
        Self::VIII,
        Self::VIII5,
        Self::IX,
        Self::IX1,
        Self::X,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::I => "PHASE_I",
            Self::II => "PHASE_II",
            Self::III => "PHASE_III",
            Self::IV => "PHASE_IV",
            Self::V => "PHASE_V",
            Self::V1 => "PHASE_V.1",
            Self::VI => "PHASE_VI",
            Self::VII => "PHASE_VII",
            Self::VII1 => "PHASE_VII.1",
            Self::VIII => "PHASE_VIII",
            Self::VIII5 => "PHASE_VIII.5",
            Self::IX => "PHASE_IX",
            Self::IX1 => "PHASE_IX.1",
            Self::X => "PHASE_X",
        }
    }

    /// Short human name shown next to the code in operator output.
    pub fn name(&self) -> &'static str {
        match self {
            Self::I => "Intake",
            Self::II => "Case classification",
            Self::III => "Evidence mapping",
            Self::IV => "Authority research",
            Self::V => "Drafting",
            Self::V1 => "Citation verification",
            Self::VI => "Opposition analysis",
            Self::VII => "Quality grading",
            Self::VII1 => "Post-revision citation check",
            Self::VIII => "Revision",
            Self::VIII5 => "Caption validation",
            Self::IX => "Supporting documents",
            Self::IX1 => "Separate statement check",
            Self::X => "Final assembly",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| format!("Invalid phase: {}", s))
    }
}
