// Harm categories and per-category score vectors.
//
// The category order below is load-bearing: primary-harm tie-breaking walks
// categories in exactly this order, so every score container is a fixed
// array indexed by `Category` rather than a map with incidental ordering.

use std::collections::HashMap;
use std::fmt;
use std::ops::Index;

use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

/// A harm category. Declaration order is the tie-breaking order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    HateSpeech,
    Cyberbullying,
    Threats,
    SelfHarm,
    SexualContent,
    Misinformation,
}

impl Category {
    /// Every category, in tie-breaking order.
    pub const ALL: [Category; 6] = [
        Category::HateSpeech,
        Category::Cyberbullying,
        Category::Threats,
        Category::SelfHarm,
        Category::SexualContent,
        Category::Misinformation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::HateSpeech => "hate_speech",
            Category::Cyberbullying => "cyberbullying",
            Category::Threats => "threats",
            Category::SelfHarm => "self_harm",
            Category::SexualContent => "sexual_content",
            Category::Misinformation => "misinformation",
        }
    }

    /// Parse a wire name. Unknown names return `None` rather than an error
    /// because upstream classifiers routinely add keys we don't track.
    pub fn parse(name: &str) -> Option<Self> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(name.trim()))
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Clamp a raw score into [0, 1]. NaN becomes 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// A complete score vector: every category has a value in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CategoryScores {
    values: [f64; 6],
}

impl CategoryScores {
    pub fn zeroed() -> Self {
        Self::default()
    }

    pub fn get(&self, category: Category) -> f64 {
        self.values[category.slot()]
    }

    /// Set a category's score, clamping into [0, 1].
    pub fn set(&mut self, category: Category, value: f64) {
        self.values[category.slot()] = clamp_unit(value);
    }

    /// Iterate `(category, score)` pairs in tie-breaking order.
    pub fn iter(&self) -> impl Iterator<Item = (Category, f64)> + '_ {
        Category::ALL.iter().map(move |&c| (c, self.get(c)))
    }

    /// Highest score across all categories (0.0 for an all-zero vector).
    pub fn max_score(&self) -> f64 {
        self.values.iter().copied().fold(0.0, f64::max)
    }
}

impl Index<Category> for CategoryScores {
    type Output = f64;

    fn index(&self, category: Category) -> &f64 {
        &self.values[category.slot()]
    }
}

impl FromIterator<(Category, f64)> for CategoryScores {
    fn from_iter<I: IntoIterator<Item = (Category, f64)>>(iter: I) -> Self {
        let mut scores = CategoryScores::zeroed();
        for (category, value) in iter {
            scores.set(category, value);
        }
        scores
    }
}

// Serialized as a JSON object keyed by category name, keys in enum order.
impl Serialize for CategoryScores {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Category::ALL.len()))?;
        for (category, score) in self.iter() {
            map.serialize_entry(category.as_str(), &score)?;
        }
        map.end()
    }
}

// Missing keys default to 0; unknown keys are ignored.
impl<'de> Deserialize<'de> for CategoryScores {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = HashMap::<String, f64>::deserialize(deserializer)?;
        Ok(raw
            .iter()
            .filter_map(|(name, &score)| Category::parse(name).map(|c| (c, score)))
            .collect())
    }
}

/// What a single provider reported: a score per category it has an opinion
/// on. Absent categories are `None` and never take part in averaging.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PartialScores {
    values: [Option<f64>; 6],
}

impl PartialScores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, category: Category) -> Option<f64> {
        self.values[category.slot()]
    }

    pub fn set(&mut self, category: Category, value: f64) {
        self.values[category.slot()] = Some(clamp_unit(value));
    }

    /// Builder-style `set`.
    pub fn with(mut self, category: Category, value: f64) -> Self {
        self.set(category, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    /// Present `(category, score)` pairs in tie-breaking order.
    pub fn present(&self) -> impl Iterator<Item = (Category, f64)> + '_ {
        Category::ALL
            .iter()
            .filter_map(move |&c| self.get(c).map(|v| (c, v)))
    }

    /// Fill in absent categories with 0.
    pub fn to_scores(&self) -> CategoryScores {
        self.present().collect()
    }
}

impl FromIterator<(Category, f64)> for PartialScores {
    fn from_iter<I: IntoIterator<Item = (Category, f64)>>(iter: I) -> Self {
        let mut scores = PartialScores::new();
        for (category, value) in iter {
            scores.set(category, value);
        }
        scores
    }
}

// Only present categories are emitted, in enum order.
impl Serialize for PartialScores {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let present: Vec<(Category, f64)> = self.present().collect();
        let mut map = serializer.serialize_map(Some(present.len()))?;
        for (category, score) in present {
            map.serialize_entry(category.as_str(), &score)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_is_declaration_order() {
        for (i, category) in Category::ALL.iter().enumerate() {
            assert_eq!(category.slot(), i);
        }
    }

    #[test]
    fn test_parse_known_and_unknown_names() {
        assert_eq!(Category::parse("self_harm"), Some(Category::SelfHarm));
        assert_eq!(Category::parse(" Threats "), Some(Category::Threats));
        assert_eq!(Category::parse("spam"), None);
    }

    #[test]
    fn test_set_clamps_and_zeroes_nan() {
        let mut scores = CategoryScores::zeroed();
        scores.set(Category::Threats, 1.7);
        scores.set(Category::HateSpeech, -0.2);
        scores.set(Category::SelfHarm, f64::NAN);
        assert_eq!(scores[Category::Threats], 1.0);
        assert_eq!(scores[Category::HateSpeech], 0.0);
        assert_eq!(scores[Category::SelfHarm], 0.0);
    }

    #[test]
    fn test_serialize_keeps_enum_order() {
        let scores: CategoryScores = [(Category::Misinformation, 0.5), (Category::HateSpeech, 0.25)]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&scores).unwrap();
        assert_eq!(
            json,
            r#"{"hate_speech":0.25,"cyberbullying":0.0,"threats":0.0,"self_harm":0.0,"sexual_content":0.0,"misinformation":0.5}"#
        );
    }

    #[test]
    fn test_deserialize_defaults_missing_and_ignores_unknown() {
        let scores: CategoryScores =
            serde_json::from_str(r#"{"threats": 0.9, "spam": 0.4}"#).unwrap();
        assert_eq!(scores[Category::Threats], 0.9);
        assert_eq!(scores[Category::HateSpeech], 0.0);
        assert_eq!(scores.max_score(), 0.9);
    }

    #[test]
    fn test_partial_scores_track_absence() {
        let partial = PartialScores::new().with(Category::SelfHarm, 0.6);
        assert_eq!(partial.get(Category::SelfHarm), Some(0.6));
        assert_eq!(partial.get(Category::Threats), None);
        assert!(!partial.is_empty());
        assert!(PartialScores::new().is_empty());
        assert_eq!(partial.to_scores()[Category::Threats], 0.0);
    }
}
