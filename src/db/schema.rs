// Database schema: table creation and migrations.
//
// We use a simple version-based migration approach: a `schema_version` table
// tracks which migrations have run, and each migration is a function that
// executes SQL statements.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create all tables if they don't exist yet.
///
/// This is idempotent: safe to call on every startup.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Tracks schema version for future migrations
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Results of /analyze and /analyze-email
        CREATE TABLE IF NOT EXISTS analysis_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            content TEXT NOT NULL,
            negative_score REAL NOT NULL,
            toxic_score REAL,                  -- 0.0 to 1.0
            threat_level TEXT NOT NULL,        -- Low / Medium / High
            primary_harm_type TEXT,            -- category name or 'None'
            hate_speech_score REAL,
            cyberbullying_score REAL,
            threats_score REAL,
            self_harm_score REAL,
            sexual_content_score REAL,
            misinformation_score REAL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Every send-email call and every relayed SMTP transaction
        CREATE TABLE IF NOT EXISTS email_attempts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sender TEXT NOT NULL,
            recipient TEXT NOT NULL,
            subject TEXT NOT NULL,
            content TEXT NOT NULL,
            full_content TEXT NOT NULL,
            toxic_score REAL,                  -- null when analysis failed
            threat_level TEXT NOT NULL,        -- Low / Medium / High / Unknown
            primary_harm_type TEXT NOT NULL,
            was_blocked INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Index for the recent-threats listing
        CREATE INDEX IF NOT EXISTS idx_analysis_created
            ON analysis_records(created_at);

        -- Index for threat-stats level counts
        CREATE INDEX IF NOT EXISTS idx_analysis_level
            ON analysis_records(threat_level);

        CREATE INDEX IF NOT EXISTS idx_attempts_created
            ON email_attempts(created_at);
        ",
    )
    .context("Failed to create database tables")?;

    // Record initial schema version if not already set
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [1],
    )?;

    Ok(())
}

/// Count the number of tables in the database (useful for init confirmation).
pub fn table_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}
