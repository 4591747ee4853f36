// Keyword/dictionary classifier: the cheap, deterministic fallback.
//
// Scores every category by substring counting against a fixed dictionary:
// each occurrence of a keyword adds 0.2, capped at 1.0. It is never fused
// with the general or LLM classifiers; it produces its own standalone
// verdict for the low-fidelity analysis path.

use async_trait::async_trait;
use regex::Regex;

use crate::scoring::category::{Category, PartialScores};

use super::traits::{ProviderError, Signal, SignalProvider};

/// Score added per keyword occurrence.
const HIT_WEIGHT: f64 = 0.2;

/// The dictionary, in category order.
const KEYWORDS: [(Category, &[&str]); 6] = [
    (
        Category::HateSpeech,
        &["hate", "racial", "racist", "ethnicity", "minority"],
    ),
    (
        Category::Cyberbullying,
        &["stupid", "idiot", "loser", "ugly", "fat", "dumb"],
    ),
    (
        Category::Threats,
        &["kill", "hurt", "attack", "threaten", "violence", "revenge"],
    ),
    (
        Category::SelfHarm,
        &["suicide", "kill myself", "end my life", "self harm", "cutting"],
    ),
    (
        Category::SexualContent,
        &["sex", "porn", "naked", "nude", "explicit"],
    ),
    (
        Category::Misinformation,
        &["hoax", "conspiracy", "fake news", "government lies"],
    ),
];

pub struct KeywordClassifier {
    non_word: Regex,
    whitespace: Regex,
}

impl KeywordClassifier {
    pub fn new() -> Self {
        Self {
            non_word: Regex::new(r"[^\w\s]").expect("static regex"),
            whitespace: Regex::new(r"\s+").expect("static regex"),
        }
    }

    /// Lowercase, turn punctuation into spaces, collapse whitespace.
    fn normalize(&self, text: &str) -> String {
        let lowered = text.to_lowercase();
        let spaced = self.non_word.replace_all(&lowered, " ");
        self.whitespace.replace_all(&spaced, " ").trim().to_string()
    }

    /// Score every category. Deterministic and infallible.
    pub fn score(&self, text: &str) -> PartialScores {
        let normalized = self.normalize(text);

        KEYWORDS
            .iter()
            .map(|(category, words)| {
                let hits: usize = words
                    .iter()
                    .map(|word| normalized.matches(word).count())
                    .sum();
                (*category, (hits as f64 * HIT_WEIGHT).min(1.0))
            })
            .collect()
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalProvider for KeywordClassifier {
    fn name(&self) -> &'static str {
        "keywords"
    }

    async fn classify(&self, text: &str) -> Result<Signal, ProviderError> {
        Ok(Signal::from_scores(self.score(text)))
    }
}
