// Sentiment scoring for the analysis API.
//
// Sentiment is reported alongside the harm verdict but never feeds into it.
// Scores come from VADER (the `vader_sentiment` port of the NLTK analyzer):
// neg/neu/pos proportions plus a normalized compound score.

use serde::{Deserialize, Serialize};
use vader_sentiment::SentimentIntensityAnalyzer;

/// Sentiment proportions plus a compound score in [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SentimentScores {
    pub neg: f64,
    pub neu: f64,
    pub pos: f64,
    pub compound: f64,
}

/// Trait for sentiment analysis backends.
pub trait SentimentAnalyzer: Send + Sync {
    fn polarity_scores(&self, text: &str) -> SentimentScores;
}

/// VADER lexicon and rule-based scorer.
#[derive(Debug, Default, Clone, Copy)]
pub struct VaderSentiment;

impl SentimentAnalyzer for VaderSentiment {
    fn polarity_scores(&self, text: &str) -> SentimentScores {
        // The analyzer only borrows the crate's static lexicons
        let analyzer = SentimentIntensityAnalyzer::new();
        let scores = analyzer.polarity_scores(text);
        let get = |key: &str| round3(scores.get(key).copied().unwrap_or(0.0));

        SentimentScores {
            neg: get("neg"),
            neu: get("neu"),
            pos: get("pos"),
            compound: get("compound").clamp(-1.0, 1.0),
        }
    }
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_text() {
        let scores = VaderSentiment.polarity_scores("The meeting is on Tuesday");
        assert_eq!(scores.neu, 1.0);
        assert_eq!(scores.compound, 0.0);
    }

    #[test]
    fn test_negative_text() {
        let scores = VaderSentiment.polarity_scores("I hate you, you stupid idiot");
        assert!(scores.neg > 0.4, "neg = {}", scores.neg);
        assert!(scores.compound < -0.5, "compound = {}", scores.compound);
    }

    #[test]
    fn test_negation_flips_polarity() {
        let plain = VaderSentiment.polarity_scores("this is good");
        let negated = VaderSentiment.polarity_scores("this is not good");
        assert!(plain.compound > 0.0);
        assert!(negated.compound < 0.0);
    }

    #[test]
    fn test_emphasis_strengthens_score() {
        let plain = VaderSentiment.polarity_scores("this is good");
        let shouted = VaderSentiment.polarity_scores("this is GOOD!!!");
        assert!(shouted.compound > plain.compound);
    }

    #[test]
    fn test_proportions_sum_to_one() {
        let s = VaderSentiment.polarity_scores("What a wonderful day, but the traffic was awful");
        assert!((s.neg + s.neu + s.pos - 1.0).abs() < 0.01);
        assert!(s.pos > 0.0 && s.neg > 0.0);
    }
}
