// Colored terminal output for verdicts and stored records.
//
// This module handles all terminal-specific formatting. The main.rs command
// handlers delegate here.

use colored::Colorize;

use crate::db::models::{AnalysisRecord, EmailAttempt};
use crate::scoring::fusion::ToxicVerdict;
use crate::scoring::threat::{harm_type_label, should_block, ThreatLevel, PRIMARY_HARM_THRESHOLD};
use crate::sentiment::SentimentScores;

/// Display one analysis verdict.
pub fn display_verdict(text: &str, verdict: &ToxicVerdict, sentiment: Option<&SentimentScores>) {
    println!(
        "\n{}",
        format!("=== Analysis: \"{}\" ===", super::truncate_chars(text, 60)).bold()
    );

    println!(
        "  Threat level: {}   Toxic score: {:.3}",
        colorize_level(verdict.threat_level.as_str()),
        verdict.toxic_score
    );
    println!(
        "  Primary harm: {}",
        harm_type_label(verdict.primary_harm_type)
    );

    let decision = if should_block(verdict.threat_level) {
        "BLOCK".red().bold()
    } else {
        "allow".green()
    };
    println!("  Decision:     {decision}");

    println!("\n  {}", "Category scores".dimmed());
    for (category, score) in verdict.category_scores.iter() {
        let bar = score_bar(score);
        let line = format!("    {:<16} {:>5.3}  {}", category.as_str(), score, bar);
        if score >= PRIMARY_HARM_THRESHOLD {
            println!("{}", line.yellow());
        } else {
            println!("{line}");
        }
    }

    if let Some(s) = sentiment {
        println!(
            "\n  Sentiment: neg {:.3}  neu {:.3}  pos {:.3}  compound {:+.3}",
            s.neg, s.neu, s.pos, s.compound
        );
    }
    println!();
}

/// Display recent stored analyses.
pub fn display_recent_analyses(records: &[AnalysisRecord]) {
    if records.is_empty() {
        println!("Recent analyses: none yet");
        return;
    }

    println!("Recent analyses: {} most recent:", records.len());
    for record in records {
        println!(
            "  [{}] {:<8} {:<16} {}",
            record.timestamp,
            colorize_level(&record.threat_level),
            record.primary_harm_type.as_deref().unwrap_or("None"),
            super::truncate_chars(&record.content, 60).dimmed()
        );
    }
}

/// Display recent email attempts.
pub fn display_email_attempts(attempts: &[EmailAttempt]) {
    if attempts.is_empty() {
        println!("Email attempts: none yet");
        return;
    }

    println!("Email attempts: {} most recent:", attempts.len());
    for attempt in attempts {
        let status = if attempt.was_blocked {
            "blocked".red().to_string()
        } else {
            "passed".green().to_string()
        };
        println!(
            "  [{}] {:<7} {:<8} {} -> {}  \"{}\"",
            attempt.created_at,
            status,
            colorize_level(&attempt.threat_level),
            attempt.sender,
            attempt.recipient,
            super::truncate_chars(&attempt.subject, 40)
        );
    }
}

fn score_bar(score: f64) -> String {
    let filled = (score * 20.0).round() as usize;
    format!("{}{}", "#".repeat(filled), ".".repeat(20 - filled.min(20)))
}

/// Colorize a threat level string.
fn colorize_level(level: &str) -> colored::ColoredString {
    match ThreatLevel::parse(level) {
        Some(ThreatLevel::High) => level.red().bold(),
        Some(ThreatLevel::Medium) => level.yellow(),
        Some(ThreatLevel::Low) => level.green(),
        None => level.dimmed(),
    }
}
