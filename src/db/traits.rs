// Database trait: async interface for all audit storage operations.
//
// Implementor: SqliteDatabase (wraps rusqlite). Methods are async so the
// sync rusqlite backend (behind a tokio Mutex) can be shared across request
// handlers and relay sessions as `Arc<dyn Database>`.
//
// The trait mirrors the queries.rs function signatures.

use anyhow::Result;
use async_trait::async_trait;

use super::models::{AnalysisRecord, EmailAttempt, EmailAttemptLog, NewAnalysisRecord, ThreatStats};

#[async_trait]
pub trait Database: Send + Sync {
    // --- Lifecycle ---

    /// Count the number of user-created tables in the database.
    async fn table_count(&self) -> Result<i64>;

    // --- Analysis records ---

    /// Store an analysis result and return its ID.
    async fn insert_analysis(&self, record: &NewAnalysisRecord) -> Result<i64>;

    /// Most recent analyses, newest first.
    async fn get_recent_analyses(&self, limit: u32) -> Result<Vec<AnalysisRecord>>;

    /// Counts by threat level and primary harm type.
    async fn get_threat_stats(&self) -> Result<ThreatStats>;

    // --- Email attempts ---

    /// Record an email attempt and return its ID.
    async fn insert_email_attempt(&self, attempt: &EmailAttemptLog) -> Result<i64>;

    async fn get_email_attempt(&self, id: i64) -> Result<Option<EmailAttempt>>;

    /// Most recent email attempts, newest first.
    async fn get_recent_email_attempts(&self, limit: u32) -> Result<Vec<EmailAttempt>>;
}
