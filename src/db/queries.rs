// Database queries: CRUD operations for all tables.
//
// Every database interaction goes through this module. This keeps SQL
// contained in one place and gives the rest of the app clean Rust interfaces.

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::models::{AnalysisRecord, EmailAttempt, EmailAttemptLog, NewAnalysisRecord, ThreatStats};
use crate::scoring::category::{Category, CategoryScores};
use crate::scoring::threat::harm_type_label;

fn now_timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

// --- Analysis records ---

/// Store an analysis result and return its ID.
pub fn insert_analysis(conn: &Connection, record: &NewAnalysisRecord) -> Result<i64> {
    let verdict = &record.verdict;
    let scores = &verdict.category_scores;
    conn.execute(
        "INSERT INTO analysis_records (content, negative_score, toxic_score, threat_level,
            primary_harm_type, hate_speech_score, cyberbullying_score, threats_score,
            self_harm_score, sexual_content_score, misinformation_score, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            record.content,
            record.negative_score,
            verdict.toxic_score,
            verdict.threat_level.as_str(),
            harm_type_label(verdict.primary_harm_type),
            scores[Category::HateSpeech],
            scores[Category::Cyberbullying],
            scores[Category::Threats],
            scores[Category::SelfHarm],
            scores[Category::SexualContent],
            scores[Category::Misinformation],
            now_timestamp(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn analysis_from_row(row: &Row<'_>) -> rusqlite::Result<AnalysisRecord> {
    let mut category_scores = CategoryScores::zeroed();
    for (offset, category) in Category::ALL.iter().enumerate() {
        let value: Option<f64> = row.get(6 + offset)?;
        category_scores.set(*category, value.unwrap_or(0.0));
    }

    Ok(AnalysisRecord {
        id: row.get(0)?,
        content: row.get(1)?,
        negative_score: row.get(2)?,
        toxic_score: row.get(3)?,
        threat_level: row.get(4)?,
        primary_harm_type: row.get(5)?,
        category_scores,
        timestamp: row.get(12)?,
    })
}

/// Most recent analyses first.
pub fn get_recent_analyses(conn: &Connection, limit: u32) -> Result<Vec<AnalysisRecord>> {
    // Column order matches Category::ALL so analysis_from_row can walk it.
    let mut stmt = conn.prepare(
        "SELECT id, content, negative_score, toxic_score, threat_level, primary_harm_type,
                hate_speech_score, cyberbullying_score, threats_score, self_harm_score,
                sexual_content_score, misinformation_score, created_at
         FROM analysis_records
         ORDER BY created_at DESC, id DESC
         LIMIT ?1",
    )?;

    let rows = stmt.query_map(params![limit], analysis_from_row)?;
    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

/// Counts by threat level and by primary harm type.
///
/// Every bucket is present in the result, including empty ones.
pub fn get_threat_stats(conn: &Connection) -> Result<ThreatStats> {
    let mut stats = ThreatStats::empty();

    stats.total_analyzed =
        conn.query_row("SELECT COUNT(*) FROM analysis_records", [], |row| row.get(0))?;

    let mut stmt = conn
        .prepare("SELECT threat_level, COUNT(*) FROM analysis_records GROUP BY threat_level")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    for row in rows {
        let (level, count) = row?;
        if let Some(slot) = stats.by_threat_level.get_mut(&level.to_lowercase()) {
            *slot += count;
        }
    }

    let mut stmt = conn.prepare(
        "SELECT COALESCE(primary_harm_type, 'None'), COUNT(*)
         FROM analysis_records
         GROUP BY COALESCE(primary_harm_type, 'None')",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    for row in rows {
        let (harm, count) = row?;
        if let Some(slot) = stats.by_harm_type.get_mut(&harm) {
            *slot += count;
        }
    }

    Ok(stats)
}

// --- Email attempts ---

/// Record an email attempt and return its ID.
pub fn insert_email_attempt(conn: &Connection, attempt: &EmailAttemptLog) -> Result<i64> {
    conn.execute(
        "INSERT INTO email_attempts (sender, recipient, subject, content, full_content,
            toxic_score, threat_level, primary_harm_type, was_blocked, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            attempt.sender,
            attempt.recipient,
            attempt.subject,
            attempt.content,
            attempt.full_content(),
            attempt.toxic_score,
            attempt.threat_level,
            attempt.primary_harm_type,
            attempt.was_blocked,
            now_timestamp(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn attempt_from_row(row: &Row<'_>) -> rusqlite::Result<EmailAttempt> {
    Ok(EmailAttempt {
        id: row.get(0)?,
        sender: row.get(1)?,
        recipient: row.get(2)?,
        subject: row.get(3)?,
        content: row.get(4)?,
        full_content: row.get(5)?,
        toxic_score: row.get(6)?,
        threat_level: row.get(7)?,
        primary_harm_type: row.get(8)?,
        was_blocked: row.get(9)?,
        created_at: row.get(10)?,
    })
}

const ATTEMPT_COLUMNS: &str = "id, sender, recipient, subject, content, full_content,
    toxic_score, threat_level, primary_harm_type, was_blocked, created_at";

/// Look up a single attempt by ID.
pub fn get_email_attempt(conn: &Connection, id: i64) -> Result<Option<EmailAttempt>> {
    let sql = format!("SELECT {ATTEMPT_COLUMNS} FROM email_attempts WHERE id = ?1");
    let result = conn
        .query_row(&sql, params![id], attempt_from_row)
        .optional()?;
    Ok(result)
}

/// Most recent email attempts first.
pub fn get_recent_email_attempts(conn: &Connection, limit: u32) -> Result<Vec<EmailAttempt>> {
    let sql = format!(
        "SELECT {ATTEMPT_COLUMNS} FROM email_attempts ORDER BY created_at DESC, id DESC LIMIT ?1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![limit], attempt_from_row)?;
    let mut attempts = Vec::new();
    for row in rows {
        attempts.push(row?);
    }
    Ok(attempts)
}
