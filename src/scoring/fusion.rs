// Fusion engine: combines signal providers into one verdict.
//
// Algorithm:
//   1. The general classifier always runs and yields per-category scores plus
//      its own severity estimate ("base toxic signal").
//   2. The secondary (LLM) provider runs only on escalation: when the caller
//      forces it, when base severity exceeds 0.2, or when the general
//      classifier's raw "toxic" label exceeds 0.1.
//   3. Per category: both present → weighted average (0.5/0.5 by default);
//      only one present → that value; neither → 0.
//   4. toxic_score = max(base severity, highest category score).
//   5. Threat level and primary harm follow from scoring::threat.
//
// Providers are only ever called through classify_bounded, so analysis is
// infallible: a failing provider just contributes nothing.
//
// Variance: with deterministic providers the verdict is a pure function of
// the text. The LLM provider runs at low temperature, and since it enters
// each category with weight (1 - general_weight), its run-to-run variance can
// move a category score by at most that weight (0.5 by default).

use std::sync::Arc;
use std::time::Duration;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::output::truncate_chars;
use crate::toxicity::traits::{classify_bounded, SignalProvider};

use super::category::{clamp_unit, Category, CategoryScores, PartialScores};
use super::threat::{harm_type_label, primary_harm_type, ThreatLevel, PRIMARY_HARM_THRESHOLD};

/// Tunables for the fusion algorithm.
#[derive(Debug, Clone)]
pub struct FusionSettings {
    /// Base severity above which the secondary provider is consulted.
    pub escalation_threshold: f64,
    /// General classifier "toxic" label above which the secondary is consulted.
    pub hint_threshold: f64,
    /// Weight of the general classifier when both providers score a category.
    pub general_weight: f64,
    /// Per-provider deadline.
    pub provider_timeout: Duration,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            escalation_threshold: 0.2,
            hint_threshold: 0.1,
            general_weight: 0.5,
            provider_timeout: Duration::from_secs(10),
        }
    }
}

/// The fused analysis result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToxicVerdict {
    pub toxic_score: f64,
    pub threat_level: ThreatLevel,
    #[serde(default, with = "harm_type_wire")]
    pub primary_harm_type: Option<Category>,
    pub category_scores: CategoryScores,
}

impl ToxicVerdict {
    /// Derive the verdict from fused category scores and the base severity.
    pub fn from_parts(category_scores: CategoryScores, base_severity: f64) -> Self {
        let toxic_score = clamp_unit(base_severity).max(category_scores.max_score());
        Self {
            toxic_score,
            threat_level: ThreatLevel::from_score(toxic_score),
            primary_harm_type: primary_harm_type(&category_scores),
            category_scores,
        }
    }
}

/// Verdict for a single provider's scores, used by the keyword fallback path.
/// The provider has no separate severity estimate, so toxic_score is simply
/// the highest category score.
pub fn standalone_verdict(scores: &PartialScores) -> ToxicVerdict {
    ToxicVerdict::from_parts(scores.to_scores(), 0.0)
}

/// The secondary provider's raw opinion, unfused (diagnostic bypass path).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecondaryVerdict {
    pub scores: PartialScores,
    pub threat_level: ThreatLevel,
    #[serde(serialize_with = "harm_type_wire::serialize")]
    pub primary_harm_type: Option<Category>,
}

impl SecondaryVerdict {
    /// Level from the highest returned score; primary harm is the top category
    /// when its score is strictly above the threshold.
    pub fn from_scores(scores: PartialScores) -> Self {
        let mut top: Option<(Category, f64)> = None;
        for (category, score) in scores.present() {
            if top.map_or(true, |(_, best)| score > best) {
                top = Some((category, score));
            }
        }

        let max_score = top.map(|(_, s)| s).unwrap_or(0.0);
        Self {
            scores,
            threat_level: ThreatLevel::from_score(max_score),
            primary_harm_type: top
                .filter(|&(_, s)| s > PRIMARY_HARM_THRESHOLD)
                .map(|(c, _)| c),
        }
    }
}

/// Combine the general classifier's scores with the secondary's.
///
/// A category only one provider scored keeps that provider's value; there is
/// no averaging against an absent signal.
pub fn fuse_scores(
    general: &PartialScores,
    secondary: Option<&PartialScores>,
    general_weight: f64,
) -> CategoryScores {
    let general_weight = clamp_unit(general_weight);
    let secondary = secondary.filter(|s| !s.is_empty());

    Category::ALL
        .iter()
        .map(|&category| {
            let g = general.get(category);
            let s = secondary.and_then(|s| s.get(category));
            let fused = match (g, s) {
                (Some(g), Some(s)) => general_weight * g + (1.0 - general_weight) * s,
                (None, Some(s)) => s,
                (Some(g), None) => g,
                (None, None) => 0.0,
            };
            (category, fused)
        })
        .collect()
}

/// The fusion engine. Built once at startup and shared behind an Arc.
pub struct FusionEngine {
    general: Arc<dyn SignalProvider>,
    secondary: Option<Arc<dyn SignalProvider>>,
    settings: FusionSettings,
}

impl FusionEngine {
    pub fn new(
        general: Arc<dyn SignalProvider>,
        secondary: Option<Arc<dyn SignalProvider>>,
        settings: FusionSettings,
    ) -> Self {
        Self {
            general,
            secondary,
            settings,
        }
    }

    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    fn should_escalate(&self, force: bool, base_severity: f64, hint: Option<f64>) -> bool {
        force
            || base_severity > self.settings.escalation_threshold
            || hint.is_some_and(|h| h > self.settings.hint_threshold)
    }

    /// Analyze text. `force_secondary` consults the secondary provider
    /// regardless of the escalation test.
    pub async fn analyze(&self, text: &str, force_secondary: bool) -> ToxicVerdict {
        let timeout = self.settings.provider_timeout;
        let base = classify_bounded(self.general.as_ref(), text, timeout).await;
        let base_severity = clamp_unit(base.severity.unwrap_or(0.0));

        let escalate = self.should_escalate(force_secondary, base_severity, base.escalation_hint);
        let secondary = match (&self.secondary, escalate) {
            (Some(provider), true) => Some(classify_bounded(provider.as_ref(), text, timeout).await),
            _ => None,
        };

        let scores = fuse_scores(
            &base.scores,
            secondary.as_ref().map(|s| &s.scores),
            self.settings.general_weight,
        );
        let verdict = ToxicVerdict::from_parts(scores, base_severity);

        debug!(
            escalate,
            secondary_used = secondary.as_ref().is_some_and(|s| !s.scores.is_empty()),
            base_severity,
            toxic_score = verdict.toxic_score,
            threat_level = %verdict.threat_level,
            primary_harm = harm_type_label(verdict.primary_harm_type),
            text_preview = %truncate_chars(text, 50),
            "Fused verdict"
        );

        verdict
    }

    /// Ask only the secondary provider. `None` when there is no secondary or
    /// it produced nothing.
    pub async fn secondary_only(&self, text: &str) -> Option<SecondaryVerdict> {
        let provider = self.secondary.as_ref()?;
        let signal = classify_bounded(provider.as_ref(), text, self.settings.provider_timeout).await;
        if signal.scores.is_empty() {
            return None;
        }
        Some(SecondaryVerdict::from_scores(signal.scores))
    }
}

/// Wire form of `Option<Category>`: the category name, or the string "None".
pub mod harm_type_wire {
    use super::*;

    pub fn serialize<S: Serializer>(
        harm: &Option<Category>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(harm_type_label(*harm))
    }

    /// Accepts a category name, "None", null, or anything unrecognized
    /// (which reads as no primary harm).
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Category>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(Category::parse))
    }
}
