// Threat level classification and the moderation gate.
//
// Both are pure functions of the fused toxic score, shared by every entry
// point (HTTP send-email, quick-analyze, the SMTP relay) so the block policy
// can't drift between them.
//
// Boundaries resolve toward the lower bracket: exactly 0.7 is Medium and
// exactly 0.4 is Low.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::category::{Category, CategoryScores};

/// Toxic score above which content is High.
pub const HIGH_THRESHOLD: f64 = 0.7;
/// Toxic score above which content is Medium.
pub const MEDIUM_THRESHOLD: f64 = 0.4;
/// Minimum category score for a category to count as the primary harm.
pub const PRIMARY_HARM_THRESHOLD: f64 = 0.3;

/// Ordinal threat level derived from the toxic score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
}

impl ThreatLevel {
    /// Determine the level from a toxic score (0.0-1.0).
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s > HIGH_THRESHOLD => ThreatLevel::High,
            s if s > MEDIUM_THRESHOLD => ThreatLevel::Medium,
            _ => ThreatLevel::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Low => "Low",
            ThreatLevel::Medium => "Medium",
            ThreatLevel::High => "High",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Low" => Some(ThreatLevel::Low),
            "Medium" => Some(ThreatLevel::Medium),
            "High" => Some(ThreatLevel::High),
            _ => None,
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The moderation gate: Medium and High are blocked, Low passes.
pub fn should_block(level: ThreatLevel) -> bool {
    matches!(level, ThreatLevel::Medium | ThreatLevel::High)
}

/// The dominant category, if any score reaches the primary-harm threshold.
///
/// Walks categories in enum order and only replaces the running maximum on a
/// strictly greater score, so ties go to the earlier category.
pub fn primary_harm_type(scores: &CategoryScores) -> Option<Category> {
    let mut primary = None;
    let mut max_score = 0.0;

    for (category, score) in scores.iter() {
        if score > max_score && score >= PRIMARY_HARM_THRESHOLD {
            max_score = score;
            primary = Some(category);
        }
    }

    primary
}

/// Wire form of an optional primary harm: the category name or "None".
pub fn harm_type_label(harm: Option<Category>) -> &'static str {
    harm.map(|c| c.as_str()).unwrap_or("None")
}
