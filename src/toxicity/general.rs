// Shared output shape of the general-purpose toxicity classifier.
//
// Both general backends (local toxic-bert, Perspective API) report the six
// Jigsaw labels. This module owns the one mapping from those labels to harm
// categories, so the backends stay interchangeable.
//
// The general classifier only has an opinion on four categories. self_harm
// and misinformation are left absent, which is how the fusion engine knows to
// take the secondary provider's value for them directly.

use crate::scoring::category::{Category, PartialScores};

use super::traits::Signal;

/// Categories the general classifier detects natively.
pub const NATIVE_CATEGORIES: [Category; 4] = [
    Category::HateSpeech,
    Category::Cyberbullying,
    Category::Threats,
    Category::SexualContent,
];

/// The six Jigsaw toxicity labels, each 0.0-1.0.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ToxicLabels {
    pub toxic: f64,
    pub severe_toxic: f64,
    pub obscene: f64,
    pub threat: f64,
    pub insult: f64,
    pub identity_hate: f64,
}

impl ToxicLabels {
    /// The classifier's own severity estimate: toxic + severe_toxic, capped at 1.
    pub fn severity(&self) -> f64 {
        (self.toxic + self.severe_toxic).min(1.0)
    }

    /// Project the labels onto harm categories.
    pub fn to_scores(&self) -> PartialScores {
        PartialScores::new()
            .with(Category::HateSpeech, self.identity_hate)
            .with(Category::Cyberbullying, self.insult.max(self.threat))
            .with(Category::Threats, self.threat)
            .with(Category::SexualContent, self.obscene)
    }

    pub fn to_signal(&self) -> Signal {
        Signal {
            scores: self.to_scores(),
            severity: Some(self.severity()),
            escalation_hint: Some(self.toxic),
        }
    }
}
