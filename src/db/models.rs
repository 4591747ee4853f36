// Data models: Rust structs that map to database rows.
//
// These are the types that flow through the application. They're separate
// from the database queries so other modules can use them without depending
// on rusqlite directly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::scoring::category::{Category, CategoryScores};
use crate::scoring::fusion::ToxicVerdict;
use crate::scoring::threat::harm_type_label;

/// One stored `/analyze` or `/analyze-email` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: i64,
    pub content: String,
    /// Negative sentiment proportion at analysis time.
    pub negative_score: f64,
    pub toxic_score: Option<f64>,
    pub threat_level: String,
    pub primary_harm_type: Option<String>,
    pub category_scores: CategoryScores,
    pub timestamp: String,
}

/// An analysis result about to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAnalysisRecord {
    pub content: String,
    pub negative_score: f64,
    pub verdict: ToxicVerdict,
}

/// A stored email send/relay attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailAttempt {
    pub id: i64,
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub content: String,
    pub full_content: String,
    pub toxic_score: Option<f64>,
    /// "Low" / "Medium" / "High", or "Unknown" when analysis failed.
    pub threat_level: String,
    /// Category name, "None", or "Unknown" when analysis failed.
    pub primary_harm_type: String,
    pub was_blocked: bool,
    pub created_at: String,
}

/// Audit record of one mail transaction, before it's stored.
///
/// Threat level and harm type are free strings so a degraded decision can
/// be recorded as "Unknown".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailAttemptLog {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub toxic_score: Option<f64>,
    #[serde(default = "unknown")]
    pub threat_level: String,
    #[serde(default = "unknown")]
    pub primary_harm_type: String,
    #[serde(default)]
    pub was_blocked: bool,
}

/// Label recorded when no verdict is available.
pub const UNKNOWN: &str = "Unknown";

fn unknown() -> String {
    UNKNOWN.to_string()
}

impl EmailAttemptLog {
    /// A log entry carrying a real verdict.
    pub fn with_verdict(
        sender: &str,
        recipient: &str,
        subject: &str,
        content: &str,
        verdict: &ToxicVerdict,
        was_blocked: bool,
    ) -> Self {
        Self {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            content: content.to_string(),
            toxic_score: Some(verdict.toxic_score),
            threat_level: verdict.threat_level.to_string(),
            primary_harm_type: harm_type_label(verdict.primary_harm_type).to_string(),
            was_blocked,
        }
    }

    /// A log entry for a transaction whose analysis failed.
    pub fn degraded(sender: &str, recipient: &str, subject: &str, content: &str) -> Self {
        Self {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            content: content.to_string(),
            toxic_score: None,
            threat_level: unknown(),
            primary_harm_type: unknown(),
            was_blocked: false,
        }
    }

    /// The composed text that was (or would have been) analyzed.
    pub fn full_content(&self) -> String {
        format!(
            "From: {}\nTo: {}\nSubject: {}\n\n{}",
            self.sender, self.recipient, self.subject, self.content
        )
    }
}

/// Aggregate counts over stored analyses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatStats {
    pub total_analyzed: i64,
    /// Keys: "high", "medium", "low".
    pub by_threat_level: BTreeMap<String, i64>,
    /// Keys: the six category names plus "None".
    pub by_harm_type: BTreeMap<String, i64>,
}

impl ThreatStats {
    /// Every bucket present with a zero count.
    pub fn empty() -> Self {
        let by_threat_level = ["high", "medium", "low"]
            .iter()
            .map(|k| (k.to_string(), 0))
            .collect();
        let by_harm_type = Category::ALL
            .iter()
            .map(|c| c.as_str())
            .chain(std::iter::once(harm_type_label(None)))
            .map(|k| (k.to_string(), 0))
            .collect();
        Self {
            total_analyzed: 0,
            by_threat_level,
            by_harm_type,
        }
    }
}
